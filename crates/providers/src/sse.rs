//! Shared SSE decoding for both adapters.
//!
//! Events are `\n\n`-delimited blocks; only `data:` lines matter. The
//! decoder buffers partial blocks across chunks; the stream builder feeds
//! every payload to a provider-specific parser closure and guarantees a
//! trailing `Closed` event even when the server hangs up without one.

use crate::util::from_reqwest;
use tether_domain::error::Result;
use tether_domain::stream::{EventStream, StopCause, StreamEvent};

/// Incremental SSE block decoder.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk; returns every complete `data:` payload.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos).collect();
            self.buffer.drain(..2);
            payloads.extend(data_lines(&block));
        }
        payloads
    }

    /// Flush whatever remains when the body closes.
    pub fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            Vec::new()
        } else {
            data_lines(&rest)
        }
    }
}

fn data_lines(block: &str) -> Vec<String> {
    block
        .lines()
        .filter_map(|line| {
            let data = line.trim().strip_prefix("data:")?.trim();
            (!data.is_empty()).then(|| data.to_string())
        })
        .collect()
}

/// Turn an SSE `reqwest::Response` into a stream of provider events.
///
/// The parser closure is `FnMut` because adapters keep assembly state
/// (open tool-use blocks) across payloads.
pub(crate) fn event_stream<F>(response: reqwest::Response, mut parse: F) -> EventStream
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut decoder = SseDecoder::new();
        let mut closed_seen = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    for payload in decoder.push(&String::from_utf8_lossy(&bytes)) {
                        for event in parse(&payload) {
                            if matches!(&event, Ok(StreamEvent::Closed { .. })) {
                                closed_seen = true;
                            }
                            yield event;
                        }
                    }
                }
                Ok(None) => {
                    for payload in decoder.finish() {
                        for event in parse(&payload) {
                            if matches!(&event, Ok(StreamEvent::Closed { .. })) {
                                closed_seen = true;
                            }
                            yield event;
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(from_reqwest(e));
                    break;
                }
            }
        }

        if !closed_seen {
            yield Ok(StreamEvent::Closed {
                cause: StopCause::EndOfTurn,
                tokens: None,
            });
        }
    };

    Box::pin(stream)
}
