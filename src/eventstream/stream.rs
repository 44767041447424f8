use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};

use super::{Frame, FrameDecoder};
use crate::error::BridgeError;

struct FrameStreamState<S> {
    body: Pin<Box<S>>,
    decoder: FrameDecoder,
    decoded: Vec<Frame>,
    pending: VecDeque<Frame>,
    error: Option<BridgeError>,
    finished: bool,
}

/// Split an HTTP body into decoded frames.
///
/// The stream yields every complete frame in order. A fatal framing error or
/// a body read error is yielded once as `Err` and ends the stream; frames
/// decoded from the same chunk before the error are yielded first. Bytes
/// left over when the body ends without completing a frame are discarded.
pub fn frame_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<Frame, BridgeError>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    frame_stream_with_decoder(byte_stream, FrameDecoder::new())
}

/// [`frame_stream`] with a caller-configured decoder.
pub fn frame_stream_with_decoder<S, E>(
    byte_stream: S,
    decoder: FrameDecoder,
) -> impl Stream<Item = Result<Frame, BridgeError>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = FrameStreamState {
        body: Box::pin(byte_stream),
        decoder,
        decoded: Vec::with_capacity(8),
        pending: VecDeque::with_capacity(8),
        error: None,
        finished: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                return Some((Ok(frame), state));
            }
            if let Some(err) = state.error.take() {
                return Some((Err(err), state));
            }
            if state.finished {
                return None;
            }

            match state.body.as_mut().next().await {
                Some(Ok(chunk)) => {
                    state.decoder.feed(&chunk);
                    let result = state.decoder.decode_ready_frames_into(&mut state.decoded);
                    state.pending.extend(state.decoded.drain(..));
                    if let Err(err) = result {
                        state.error = Some(err.into());
                        state.finished = true;
                    }
                }
                Some(Err(err)) => {
                    state.error = Some(BridgeError::Transport(err.to_string()));
                    state.finished = true;
                }
                None => {
                    state.finished = true;
                    if state.decoder.buffered_len() > 0 {
                        tracing::debug!(
                            trailing_bytes = state.decoder.buffered_len(),
                            "event stream ended with an incomplete frame"
                        );
                    }
                }
            }
        }
    })
}
