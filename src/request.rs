//! Chat-completion request body and its validation rules.
//!
//! Optional fields that are left unset are omitted from the JSON body, so the
//! API applies its own defaults. Validation checks the effective values.

use crate::types::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_TEMPERATURE: f32 = 0.2;
const DEFAULT_TOP_P: f32 = 0.9;
const DEFAULT_TOP_K: u32 = 0;
const DEFAULT_PRESENCE_PENALTY: f32 = 0.0;
const DEFAULT_FREQUENCY_PENALTY: f32 = 1.0;

/// Maximum number of `search_domain_filter` entries.
pub const MAX_DOMAIN_FILTERS: usize = 3;
/// Upper bound for `top_k`.
pub const MAX_TOP_K: u32 = 2048;

/// Time interval for search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchRecency {
    Hour,
    Day,
    Week,
    Month,
}

/// Reasons a request body is rejected before it is sent.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("messages must not be empty")]
    NoMessages,

    #[error("{field} = {value} is out of range ({range})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        range: &'static str,
    },

    #[error("cannot use both presence_penalty and frequency_penalty")]
    ConflictingPenalties,

    #[error("at most 3 search domain filters are allowed, got {0}")]
    TooManyDomainFilters(usize),

    #[error("invalid domain filter: {0:?}")]
    InvalidDomainFilter(String),
}

/// Request body for `POST chat/completions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_citations: Option<bool>,
    /// Domains to whitelist, or blacklist with a leading `-`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_domain_filter: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_images: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_related_questions: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_recency_filter: Option<SearchRecency>,
    /// 0 disables top-k filtering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
}

impl ChatCompletionRequest {
    /// Create a request with only the required fields set.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            temperature: None,
            top_p: None,
            return_citations: None,
            search_domain_filter: None,
            return_images: None,
            return_related_questions: None,
            search_recency_filter: None,
            top_k: None,
            stream: None,
            presence_penalty: None,
            frequency_penalty: None,
        }
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.top_p = Some(p);
        self
    }

    pub fn top_k(mut self, k: u32) -> Self {
        self.top_k = Some(k);
        self
    }

    pub fn return_citations(mut self, enabled: bool) -> Self {
        self.return_citations = Some(enabled);
        self
    }

    pub fn return_images(mut self, enabled: bool) -> Self {
        self.return_images = Some(enabled);
        self
    }

    pub fn return_related_questions(mut self, enabled: bool) -> Self {
        self.return_related_questions = Some(enabled);
        self
    }

    /// Limit citations to these domains. Prefix a domain with `-` to exclude it.
    pub fn search_domain_filter<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_domain_filter = Some(domains.into_iter().map(Into::into).collect());
        self
    }

    pub fn search_recency_filter(mut self, recency: SearchRecency) -> Self {
        self.search_recency_filter = Some(recency);
        self
    }

    pub fn stream(mut self, enabled: bool) -> Self {
        self.stream = Some(enabled);
        self
    }

    pub fn presence_penalty(mut self, penalty: f32) -> Self {
        self.presence_penalty = Some(penalty);
        self
    }

    pub fn frequency_penalty(mut self, penalty: f32) -> Self {
        self.frequency_penalty = Some(penalty);
        self
    }

    /// Whether the response will be delivered as an SSE stream.
    #[inline]
    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// Check every field constraint, returning the first violation.
    #[allow(clippy::float_cmp)]
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.messages.is_empty() {
            return Err(ValidationError::NoMessages);
        }

        let temperature = self.temperature.unwrap_or(DEFAULT_TEMPERATURE);
        if !(0.0..2.0).contains(&temperature) {
            return Err(out_of_range("temperature", temperature, "0 <= t < 2"));
        }

        let top_p = self.top_p.unwrap_or(DEFAULT_TOP_P);
        if !(0.0..=1.0).contains(&top_p) {
            return Err(out_of_range("top_p", top_p, "0 <= p <= 1"));
        }

        let top_k = self.top_k.unwrap_or(DEFAULT_TOP_K);
        if top_k > MAX_TOP_K {
            return Err(ValidationError::OutOfRange {
                field: "top_k",
                value: f64::from(top_k),
                range: "0 <= k <= 2048",
            });
        }

        let presence = self.presence_penalty.unwrap_or(DEFAULT_PRESENCE_PENALTY);
        if !(-2.0..=2.0).contains(&presence) {
            return Err(out_of_range("presence_penalty", presence, "-2 <= p <= 2"));
        }

        let frequency = self.frequency_penalty.unwrap_or(DEFAULT_FREQUENCY_PENALTY);
        if frequency.is_nan() || frequency <= 0.0 {
            return Err(out_of_range("frequency_penalty", frequency, "f > 0"));
        }

        if presence != DEFAULT_PRESENCE_PENALTY && frequency != DEFAULT_FREQUENCY_PENALTY {
            return Err(ValidationError::ConflictingPenalties);
        }

        if let Some(domains) = &self.search_domain_filter {
            if domains.len() > MAX_DOMAIN_FILTERS {
                return Err(ValidationError::TooManyDomainFilters(domains.len()));
            }
            for domain in domains {
                validate_domain_filter(domain)?;
            }
        }

        Ok(())
    }
}

fn out_of_range(field: &'static str, value: f32, range: &'static str) -> ValidationError {
    ValidationError::OutOfRange {
        field,
        value: f64::from(value),
        range,
    }
}

/// A filter is a domain, optionally prefixed with `-`, that contains a dot.
pub fn validate_domain_filter(filter: &str) -> Result<(), ValidationError> {
    let domain = filter.strip_prefix('-').unwrap_or(filter);
    if domain.is_empty() || !domain.contains('.') {
        return Err(ValidationError::InvalidDomainFilter(filter.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ChatCompletionRequest {
        ChatCompletionRequest::new("sonar", vec![Message::user("What is Python?")])
    }

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(base().validate(), Ok(()));
    }

    #[test]
    fn test_both_penalties_rejected() {
        let req = base().presence_penalty(0.5).frequency_penalty(1.5);
        assert_eq!(req.validate(), Err(ValidationError::ConflictingPenalties));

        // Either one alone is fine.
        assert!(base().presence_penalty(0.5).validate().is_ok());
        assert!(base().frequency_penalty(1.5).validate().is_ok());
        // Explicit defaults do not count as "set".
        assert!(base()
            .presence_penalty(0.0)
            .frequency_penalty(1.0)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_domain_filter_format() {
        for bad in ["-", "", "nodot", "-nodot"] {
            let req = base().search_domain_filter([bad]);
            assert_eq!(
                req.validate(),
                Err(ValidationError::InvalidDomainFilter(bad.to_string())),
                "{bad:?} should be rejected"
            );
        }

        let req = base().search_domain_filter(["example.com", "-spam.org"]);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_domain_filter_count() {
        let req = base().search_domain_filter(["a.com", "b.com", "c.com", "d.com"]);
        assert_eq!(req.validate(), Err(ValidationError::TooManyDomainFilters(4)));

        let req = base().search_domain_filter(["a.com", "b.com", "c.com"]);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_numeric_ranges() {
        assert!(base().temperature(0.0).validate().is_ok());
        assert!(base().temperature(2.0).validate().is_err());
        assert!(base().temperature(-0.1).validate().is_err());

        assert!(base().top_p(1.0).validate().is_ok());
        assert!(base().top_p(1.1).validate().is_err());

        assert!(base().top_k(2048).validate().is_ok());
        assert!(base().top_k(2049).validate().is_err());

        assert!(base().presence_penalty(-2.0).validate().is_ok());
        assert!(base().presence_penalty(2.5).validate().is_err());

        assert!(base().frequency_penalty(0.0).validate().is_err());
    }

    #[test]
    fn test_empty_messages_rejected() {
        let req = ChatCompletionRequest::new("sonar", Vec::new());
        assert_eq!(req.validate(), Err(ValidationError::NoMessages));
    }

    #[test]
    fn test_unset_fields_are_omitted() {
        let body = serde_json::to_value(base().max_tokens(64).stream(true)).unwrap();
        let obj = body.as_object().unwrap();
        assert_eq!(obj.len(), 4);
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["stream"], true);
        assert!(obj.get("temperature").is_none());
    }

    #[test]
    fn test_recency_serialization() {
        let body = serde_json::to_value(base().search_recency_filter(SearchRecency::Week)).unwrap();
        assert_eq!(body["search_recency_filter"], "week");
    }
}
