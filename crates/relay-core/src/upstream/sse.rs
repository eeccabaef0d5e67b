//! Server-sent events framing.
//!
//! Turns the raw body chunks of a `text/event-stream` response into [`RawEvent`] frames.
//! Chunk boundaries are arbitrary: a frame, a line, or even a CRLF pair may be split across
//! chunks, so the decoder buffers until it sees a complete line.

use super::errors::UpstreamError;
use bytes::{Bytes, BytesMut};
use futures_util::{stream::BoxStream, Stream, StreamExt};
use std::{collections::VecDeque, pin::Pin};

/// One dispatched SSE frame, before any topic-specific decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    pub event: Option<String>,
    pub data: Option<String>,
    pub id: Option<String>,
}

/// Stream of frames from one upstream subscription.
pub type RawEventStream = BoxStream<'static, Result<RawEvent, UpstreamError>>;

/// Incremental line-oriented SSE parser.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    pending: RawEvent,
    has_fields: bool,
    skip_lf: bool,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a body chunk and returns every frame completed by it.
    ///
    /// Lines end at `\n`, `\r\n` or a lone `\r`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawEvent> {
        let mut chunk = chunk;
        if self.skip_lf && !chunk.is_empty() {
            self.skip_lf = false;
            if chunk[0] == b'\n' {
                chunk = &chunk[1..];
            }
        }
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n' || b == b'\r') {
            let mut consumed = end + 1;
            if self.buffer[end] == b'\r' {
                match self.buffer.get(end + 1) {
                    Some(b'\n') => consumed += 1,
                    Some(_) => {}
                    // The matching `\n`, if any, arrives with the next chunk.
                    None => self.skip_lf = true,
                }
            }
            let mut line = self.buffer.split_to(consumed);
            line.truncate(end);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }

        frames
    }

    /// Dispatches a frame still pending when the body ends without a blank line.
    pub fn finish(&mut self) -> Option<RawEvent> {
        self.skip_lf = false;
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &[u8]) -> Option<RawEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line[0] == b':' {
            return None;
        }

        let (field, value) = match line.iter().position(|&b| b == b':') {
            Some(colon) => {
                let mut value = &line[colon + 1..];
                if value.first() == Some(&b' ') {
                    value = &value[1..];
                }
                (&line[..colon], value)
            }
            None => (line, &[][..]),
        };
        let value = String::from_utf8_lossy(value);

        match field {
            b"event" => {
                self.pending.event = Some(value.into_owned());
                self.has_fields = true;
            }
            b"data" => {
                match &mut self.pending.data {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(&value);
                    }
                    None => self.pending.data = Some(value.into_owned()),
                }
                self.has_fields = true;
            }
            b"id" => {
                self.pending.id = Some(value.into_owned());
                self.has_fields = true;
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<RawEvent> {
        if !self.has_fields {
            return None;
        }
        self.has_fields = false;
        Some(std::mem::take(&mut self.pending))
    }
}

struct DecodeState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    ready: VecDeque<RawEvent>,
    done: bool,
}

/// Wraps a body byte stream into a stream of SSE frames.
///
/// A transport error is yielded once and ends the stream.
pub fn decode_event_stream<S>(body: S) -> RawEventStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        ready: VecDeque::new(),
        done: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.ready.pop_front() {
                return Some((Ok(frame), state));
            }
            if state.done {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    state.ready.extend(state.decoder.push(&chunk));
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(UpstreamError::Stream(e.to_string())), state));
                }
                None => {
                    state.done = true;
                    state.ready.extend(state.decoder.finish());
                }
            }
        }
    })
    .boxed()
}
