//! HTTP transport for a single endpoint: unary calls and SSE streaming.

use crate::error::Error;
use crate::stream::{ByteStream, EventStream};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::OnceCell;

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";

/// Path of the chat-completion endpoint.
pub const CHAT_COMPLETIONS: &str = "chat/completions";

/// An endpoint path plus HTTP method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub path: String,
    pub method: Method,
}

impl Endpoint {
    pub fn new(path: impl Into<String>, method: Method) -> Self {
        Self {
            path: path.into(),
            method,
        }
    }

    /// `POST chat/completions`.
    pub fn chat_completions() -> Self {
        Self::new(CHAT_COMPLETIONS, Method::POST)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Body of a completed unary call.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw body of a 2xx response, not yet decoded.
    Body(Bytes),
    /// Body was written to the caller's writer; holds the byte count.
    Written(u64),
}

/// Performs calls against one endpoint with one credential.
///
/// The HTTP session is created on first use and reused for every later call,
/// including concurrent ones.
pub struct RequestTransport {
    api_key: String,
    base_url: String,
    endpoint: Endpoint,
    content_type: Option<String>,
    timeout: Duration,
    session: OnceCell<reqwest::Client>,
}

impl RequestTransport {
    pub fn new(api_key: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            endpoint,
            content_type: Some("application/json".to_string()),
            timeout: Duration::from_secs(120),
            session: OnceCell::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Full URL of the endpoint.
    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url,
            self.endpoint.path.trim_start_matches('/')
        )
    }

    /// Whether the HTTP session has been created yet.
    pub fn has_session(&self) -> bool {
        self.session.initialized()
    }

    async fn session(&self) -> Result<&reqwest::Client, Error> {
        self.session
            .get_or_try_init(|| async {
                let mut headers = HeaderMap::new();
                let mut auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                    .map_err(|_| Error::Config("API key is not a valid header value".into()))?;
                auth.set_sensitive(true);
                headers.insert(AUTHORIZATION, auth);
                if let Some(content_type) = &self.content_type {
                    let value = HeaderValue::from_str(content_type)
                        .map_err(|_| Error::Config(format!("invalid content type: {content_type}")))?;
                    headers.insert(CONTENT_TYPE, value);
                }

                reqwest::Client::builder()
                    .default_headers(headers)
                    .timeout(self.timeout)
                    .pool_max_idle_per_host(10)
                    .pool_idle_timeout(Duration::from_secs(90))
                    .tcp_nodelay(true)
                    .build()
                    .map_err(|e| Error::Config(e.to_string()))
            })
            .await
    }

    /// Send the request and return the response if its status is 2xx.
    async fn send<B>(&self, body: &B) -> Result<reqwest::Response, Error>
    where
        B: Serialize + ?Sized,
    {
        let session = self.session().await?;
        tracing::debug!(endpoint = %self.endpoint, "sending request");

        let response = session
            .request(self.endpoint.method.clone(), self.url())
            .json(body)
            .send()
            .await
            .map_err(map_send_error)?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Perform one unary call.
    ///
    /// With `output`, the raw body is copied into the writer instead of being
    /// buffered. Headers are returned in both cases. A body that fails after
    /// bytes reached the writer is reported as `Error::Io`, since the writer
    /// already holds a partial body.
    pub async fn invoke<B, W>(
        &self,
        body: &B,
        output: Option<&mut W>,
    ) -> Result<(Payload, HeaderMap), Error>
    where
        B: Serialize + ?Sized,
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mut response = self.send(body).await?;
        let headers = response.headers().clone();

        if let Some(writer) = output {
            let mut written = 0u64;
            loop {
                let chunk = match response.chunk().await {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => break,
                    Err(e) if written > 0 => {
                        return Err(Error::Io(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            format!("response body failed after {written} bytes: {e}"),
                        )));
                    }
                    Err(e) => return Err(map_send_error(e)),
                };
                writer.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            writer.flush().await?;
            return Ok((Payload::Written(written), headers));
        }

        let bytes = response.bytes().await.map_err(map_send_error)?;
        Ok((Payload::Body(bytes), headers))
    }

    /// Start a streaming call.
    ///
    /// Errors before the first byte (including non-2xx statuses) are returned
    /// here. The returned stream yields the decoded events followed by the
    /// response headers.
    pub async fn stream<B>(&self, body: &B) -> Result<EventStream<ByteStream>, Error>
    where
        B: Serialize + ?Sized,
    {
        let response = self.send(body).await?;
        let headers = response.headers().clone();
        Ok(EventStream::new(Box::pin(response.bytes_stream()), headers))
    }
}

impl fmt::Debug for RequestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTransport")
            .field("base_url", &self.base_url)
            .field("endpoint", &self.endpoint)
            .field("content_type", &self.content_type)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn map_send_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout
    } else {
        Error::Http(e)
    }
}

/// Convert an error response to an `Error::Api`.
async fn error_from_response(resp: reqwest::Response) -> Error {
    let status = resp.status().as_u16();
    let headers = resp.headers().clone();
    let body = resp.text().await.unwrap_or_default();

    // Try to extract error message from JSON
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| {
            v["error"]["message"]
                .as_str()
                .map(std::string::ToString::to_string)
        })
        .unwrap_or(body);

    Error::api(status, message, headers)
}
