//! Lazy SSE event stream over a response body.

use crate::error::Error;
use crate::sse::{decode_line, Frame, LineDecoder};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use reqwest::header::HeaderMap;
use serde_json::Value;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

/// Boxed response body as produced by `reqwest::Response::bytes_stream`.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// One item of a streamed call.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A decoded `data:` payload.
    Data(Value),
    /// Response headers, always the last item.
    Headers(HeaderMap),
}

impl StreamEvent {
    pub fn as_data(&self) -> Option<&Value> {
        match self {
            StreamEvent::Data(v) => Some(v),
            StreamEvent::Headers(_) => None,
        }
    }

    pub fn as_headers(&self) -> Option<&HeaderMap> {
        match self {
            StreamEvent::Data(_) => None,
            StreamEvent::Headers(h) => Some(h),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Reading,
    /// Body ended without `[DONE]`; drain the unterminated tail once.
    Draining,
    EmitHeaders,
    Finished,
}

pin_project! {
    /// Single-pass stream of [`StreamEvent`]s.
    ///
    /// Yields each JSON data line, stops at `[DONE]` or end of body, then yields
    /// the response headers. Dropping it early drops the underlying response.
    pub struct EventStream<S> {
        #[pin]
        inner: S,
        decoder: LineDecoder,
        headers: Option<HeaderMap>,
        phase: Phase,
    }
}

impl<S> EventStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    /// Wrap a body stream together with the headers of its response.
    pub fn new(inner: S, headers: HeaderMap) -> Self {
        Self {
            inner,
            decoder: LineDecoder::new(),
            headers: Some(headers),
            phase: Phase::Reading,
        }
    }

    /// Check if the stream has yielded its final item.
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Finished
    }
}

impl<S> Stream for EventStream<S>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    type Item = Result<StreamEvent, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            match *this.phase {
                Phase::Reading => {
                    // Drain buffered lines before asking for more bytes
                    while let Some(line) = this.decoder.next_line() {
                        match decode_line(&line) {
                            Frame::Data(value) => {
                                return Poll::Ready(Some(Ok(StreamEvent::Data(value))))
                            }
                            Frame::Done => {
                                *this.phase = Phase::EmitHeaders;
                                break;
                            }
                            Frame::Skip => {}
                        }
                    }
                    if *this.phase != Phase::Reading {
                        continue;
                    }

                    match ready!(this.inner.as_mut().poll_next(cx)) {
                        Some(Ok(bytes)) => this.decoder.feed(&bytes),
                        Some(Err(e)) => {
                            *this.phase = Phase::Finished;
                            let err = if e.is_timeout() {
                                Error::Timeout
                            } else {
                                Error::Http(e)
                            };
                            return Poll::Ready(Some(Err(err)));
                        }
                        None => *this.phase = Phase::Draining,
                    }
                }
                Phase::Draining => {
                    *this.phase = Phase::EmitHeaders;
                    if let Some(tail) = this.decoder.finish() {
                        if let Frame::Data(value) = decode_line(&tail) {
                            return Poll::Ready(Some(Ok(StreamEvent::Data(value))));
                        }
                    }
                }
                Phase::EmitHeaders => {
                    *this.phase = Phase::Finished;
                    if let Some(headers) = this.headers.take() {
                        return Poll::Ready(Some(Ok(StreamEvent::Headers(headers))));
                    }
                }
                Phase::Finished => return Poll::Ready(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use reqwest::header::{HeaderValue, DATE};

    fn body(parts: &[&'static str]) -> impl Stream<Item = Result<Bytes, reqwest::Error>> {
        futures::stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    fn headers() -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(DATE, HeaderValue::from_static("Fri, 01 Mar 2024 12:00:00 GMT"));
        h
    }

    #[tokio::test]
    async fn test_data_then_headers() {
        let stream = EventStream::new(
            body(&[
                "data: {\"n\":1}\n\n",
                "data: {\"n\":",
                "2}\n\ndata: {\"n\":3}\n\n",
                "data: [DONE]\n\n",
            ]),
            headers(),
        );
        let events: Vec<StreamEvent> = stream.map(|e| e.unwrap()).collect().await;

        assert_eq!(events.len(), 4);
        let values: Vec<i64> = events
            .iter()
            .filter_map(StreamEvent::as_data)
            .map(|v| v["n"].as_i64().unwrap())
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
        assert!(events[3].as_headers().unwrap().contains_key(DATE));
    }

    #[tokio::test]
    async fn test_malformed_lines_do_not_abort() {
        let stream = EventStream::new(
            body(&["data: {\"ok\":1}\n", "data: {broken\n", "data: {\"ok\":2}\n"]),
            HeaderMap::new(),
        );
        let events: Vec<StreamEvent> = stream.map(|e| e.unwrap()).collect().await;

        assert_eq!(events.iter().filter(|e| e.as_data().is_some()).count(), 2);
        assert!(events.last().unwrap().as_headers().is_some());
    }

    #[tokio::test]
    async fn test_stops_reading_after_done() {
        let stream = EventStream::new(
            body(&["data: [DONE]\n", "data: {\"late\":true}\n"]),
            HeaderMap::new(),
        );
        let events: Vec<StreamEvent> = stream.map(|e| e.unwrap()).collect().await;

        assert_eq!(events.len(), 1);
        assert!(events[0].as_headers().is_some());
    }

    #[tokio::test]
    async fn test_unterminated_tail_is_emitted() {
        let mut stream = EventStream::new(body(&["data: {\"tail\":1}"]), HeaderMap::new());

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.as_data().unwrap()["tail"], 1);
        assert!(stream.next().await.unwrap().unwrap().as_headers().is_some());
        assert!(stream.next().await.is_none());
        assert!(stream.is_done());
    }
}
