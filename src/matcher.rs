//! Maps raw payloads to typed responses by endpoint.

use crate::error::Error;
use crate::response::{ChatCompletionChunk, ChatCompletionResponse};
use crate::stream::StreamEvent;
use crate::transport::{Endpoint, CHAT_COMPLETIONS};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Unparsed result of a call.
#[derive(Debug, Clone)]
pub enum RawPayload {
    /// Body of a unary call.
    Json(Value),
    /// Every event of a streamed call, headers last.
    Stream(Vec<StreamEvent>),
}

impl RawPayload {
    /// Data events of a streamed payload, in order.
    pub fn chunks(&self) -> impl Iterator<Item = &Value> {
        let events: &[StreamEvent] = match self {
            RawPayload::Json(_) => &[],
            RawPayload::Stream(events) => events,
        };
        events.iter().filter_map(StreamEvent::as_data)
    }
}

/// Typed result of a call.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchedResponse {
    Completion(ChatCompletionResponse),
    Chunks(Vec<ChatCompletionChunk>),
}

impl MatchedResponse {
    pub fn into_completion(self) -> Option<ChatCompletionResponse> {
        match self {
            MatchedResponse::Completion(c) => Some(c),
            MatchedResponse::Chunks(_) => None,
        }
    }

    pub fn into_chunks(self) -> Option<Vec<ChatCompletionChunk>> {
        match self {
            MatchedResponse::Completion(_) => None,
            MatchedResponse::Chunks(c) => Some(c),
        }
    }
}

/// Parse `payload` into the response shape registered for `endpoint`.
pub fn match_response(endpoint: &Endpoint, payload: &RawPayload) -> Result<MatchedResponse, Error> {
    if endpoint.path.trim_start_matches('/') == CHAT_COMPLETIONS && endpoint.method == Method::POST
    {
        return match payload {
            RawPayload::Json(value) => parse(value).map(MatchedResponse::Completion),
            RawPayload::Stream(_) => payload
                .chunks()
                .map(parse::<ChatCompletionChunk>)
                .collect::<Result<Vec<_>, _>>()
                .map(MatchedResponse::Chunks),
        };
    }

    Err(Error::UnsupportedOperation {
        endpoint: endpoint.path.clone(),
        method: endpoint.method.to_string(),
    })
}

fn parse<T: DeserializeOwned>(value: &Value) -> Result<T, Error> {
    T::deserialize(value).map_err(|e| Error::parse(e.to_string()))
}
