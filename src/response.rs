//! Typed response shapes for `chat/completions`.

use crate::types::{FinishReason, Role, Usage};
use serde::{Deserialize, Serialize};

/// Source cited in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub text: String,
    pub url: String,
}

/// Follow-up question suggested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedQuestion {
    pub question: String,
}

/// Image returned alongside a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageReference {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Generated message inside a completed choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
}

/// A completion choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub finish_reason: FinishReason,
    pub message: ResponseMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_questions: Option<Vec<RelatedQuestion>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImageReference>>,
}

/// Response body of a non-streamed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub model: String,
    /// Always `chat.completion`.
    pub object: String,
    /// Unix timestamp in seconds.
    pub created: i64,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl ChatCompletionResponse {
    /// Content of the first choice.
    pub fn text(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// Incremental content in a streamed choice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// A streamed choice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
    #[serde(default)]
    pub delta: Delta,
}

/// One SSE chunk of a streamed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub model: String,
    /// Always `chat.completion.chunk`.
    pub object: String,
    pub created: i64,
    pub choices: Vec<ChunkChoice>,
    /// Present only on the final chunk.
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ChatCompletionChunk {
    /// Delta content of the first choice.
    pub fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.delta.content.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// Concatenate the delta text of a chunk sequence.
pub fn collect_text(chunks: &[ChatCompletionChunk]) -> String {
    chunks.iter().filter_map(ChatCompletionChunk::text).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion() {
        let resp: ChatCompletionResponse = serde_json::from_value(serde_json::json!({
            "id": "12345",
            "model": "sonar",
            "object": "chat.completion",
            "created": 1709001234,
            "choices": [{
                "index": 0,
                "finish_reason": "stop",
                "message": {"role": "assistant", "content": "Python is a programming language."},
                "citations": [{"text": "Python is a high-level language", "url": "https://python.org"}]
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30}
        }))
        .unwrap();

        assert_eq!(resp.text(), Some("Python is a programming language."));
        assert_eq!(resp.usage.total_tokens, 30);
        assert_eq!(resp.choices[0].citations.as_ref().unwrap().len(), 1);
        assert_eq!(resp.choices[0].finish_reason, FinishReason::Stop);
    }

    #[test]
    fn test_collect_chunk_text() {
        let chunk = |content: &str| ChatCompletionChunk {
            id: "c".into(),
            model: "sonar".into(),
            object: "chat.completion.chunk".into(),
            created: 0,
            choices: vec![ChunkChoice {
                index: 0,
                finish_reason: None,
                delta: Delta {
                    role: Some(Role::Assistant),
                    content: Some(content.into()),
                },
            }],
            usage: None,
        };
        let chunks = vec![chunk("Hello"), chunk(""), chunk(" world")];
        assert_eq!(collect_text(&chunks), "Hello world");
    }
}
