//! Rate-limited Perplexity chat completion client with token estimation and cost lookup.
//!
//! # Example
//! ```no_run
//! use perplexity_sdk::{ChatCompletionRequest, Client, Message};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), perplexity_sdk::Error> {
//!     let client = Client::from_env()?;
//!     let model = client.create_chat_completion(
//!         "llama-3.1-sonar-small-128k-online",
//!         Some(100_000),
//!         Some(50),
//!     );
//!
//!     let request = ChatCompletionRequest::new(
//!         model.model(),
//!         vec![Message::user("How many stars are in the Milky Way?")],
//!     )
//!     .max_tokens(256);
//!
//!     let response = model.invoke(&request).await?.into_completion();
//!     if let Some(text) = response.as_ref().and_then(|r| r.text()) {
//!         println!("{text}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod cost;
pub mod error;
pub mod matcher;
pub mod model;
pub mod rate_limit;
pub mod request;
pub mod response;
pub mod retry;
pub mod sse;
pub mod stream;
pub mod tables;
pub mod tokens;
pub mod transport;
pub mod types;

pub use client::{Client, ClientBuilder, ClientConfig};
pub use cost::{Cost, ModelPrice};
pub use error::Error;
pub use matcher::{match_response, MatchedResponse, RawPayload};
pub use model::{ChatModel, Invocation, InvokeOptions};
pub use rate_limit::{Clock, RateLimiter, RateLimiterState, SystemClock};
pub use request::{ChatCompletionRequest, SearchRecency, ValidationError};
pub use response::{ChatCompletionChunk, ChatCompletionResponse};
pub use retry::{RetryPolicy, Sleeper, TokioSleeper};
pub use stream::{EventStream, StreamEvent};
pub use tables::{MaxOutputTokenTable, ModelTables, PriceTable};
pub use tokens::TokenEstimator;
pub use transport::{Endpoint, RequestTransport};
pub use types::*;

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
