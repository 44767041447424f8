//! Live-path glue: upstream status checks, the translated SSE byte stream
//! with keepalive pings, non-streaming collection, and axum responses.

use std::pin::{pin, Pin};
use std::time::{Duration, Instant};

use axum::response::Response;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::config::StreamConfig;
use crate::error::BridgeError;
use crate::eventstream::stream::frame_stream_with_decoder;
use crate::eventstream::{Frame, FrameDecoder};
use crate::observability::log_stream_complete;
use crate::protocol::anthropic::{MessageResponse, OutputEvent};
use crate::stream::sse::encode_sse_batch;
use crate::stream::thinking::floor_char_boundary;
use crate::stream::{MessageAggregator, StreamContext, PING_FRAME};

const MAX_UPSTREAM_ERROR_LEN: usize = 500;

/// Reduce an upstream error body to a short message: `error.message` or
/// `message` from a JSON body, otherwise the (lossy) text itself.
pub(crate) fn sanitize_upstream_error(body: &[u8]) -> String {
    let json_message = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json.get("error")
                .and_then(|e| e.get("message"))
                .or_else(|| json.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_owned)
        });
    let message = json_message.unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_owned());
    if message.len() > MAX_UPSTREAM_ERROR_LEN {
        let cut = floor_char_boundary(&message, MAX_UPSTREAM_ERROR_LEN);
        format!("{}...", &message[..cut])
    } else {
        message
    }
}

/// Pass a successful upstream response through; turn any other status into
/// [`BridgeError::Upstream`] carrying the error body.
///
/// # Errors
///
/// Returns [`BridgeError::Upstream`] for a non-2xx status, or
/// [`BridgeError::Transport`] when the error body cannot be read.
pub async fn check_upstream(response: reqwest::Response) -> Result<reqwest::Response, BridgeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .bytes()
        .await
        .map_err(|e| BridgeError::Transport(format!("Failed to read error body: {e}")))?;
    tracing::warn!(status = status.as_u16(), "upstream returned an error status");
    Err(BridgeError::Upstream {
        status: status.as_u16(),
        message: sanitize_upstream_error(&body),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    Streaming,
    Finished,
}

enum Step {
    Frame(Option<Result<Frame, BridgeError>>),
    Ping,
}

struct TranslateState<F> {
    frames: Pin<Box<F>>,
    ctx: StreamContext,
    keepalive_period: Option<Duration>,
    keepalive: Option<tokio::time::Interval>,
    events: Vec<OutputEvent>,
    phase: Phase,
    started_at: Instant,
}

impl<F> TranslateState<F> {
    fn take_chunk(&mut self) -> Result<Bytes, BridgeError> {
        let chunk = encode_sse_batch(&self.events);
        self.events.clear();
        chunk.map_err(BridgeError::from)
    }

    fn finish(&mut self) {
        self.ctx.finalize_into(&mut self.events);
        self.phase = Phase::Finished;
        log_stream_complete(
            self.ctx.model(),
            &self.ctx.usage(),
            self.ctx.stop_reason(),
            self.started_at,
        );
    }
}

/// Translate a backend body into Anthropic SSE chunks.
///
/// `message_start` goes out first. Each chunk after that carries the output
/// of one frame. When the body ends, fails to read, or hits a fatal framing
/// error, the context is finalized and the closing events are sent; the
/// stream never ends without `message_stop`. With `keepalive` set, a `ping`
/// frame is interleaved whenever the backend stays silent for that long.
///
/// Dropping the stream stops reading the body.
pub fn translate_stream<S, E>(
    byte_stream: S,
    ctx: StreamContext,
    keepalive: Option<Duration>,
) -> impl Stream<Item = Result<Bytes, BridgeError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    translate_stream_with_decoder(byte_stream, FrameDecoder::new(), ctx, keepalive)
}

/// [`translate_stream`] with a caller-configured decoder.
pub fn translate_stream_with_decoder<S, E>(
    byte_stream: S,
    decoder: FrameDecoder,
    ctx: StreamContext,
    keepalive: Option<Duration>,
) -> impl Stream<Item = Result<Bytes, BridgeError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = TranslateState {
        frames: Box::pin(frame_stream_with_decoder(byte_stream, decoder)),
        ctx,
        keepalive_period: keepalive.filter(|period| !period.is_zero()),
        keepalive: None,
        events: Vec::with_capacity(16),
        phase: Phase::Start,
        started_at: Instant::now(),
    };

    futures_util::stream::unfold(state, |mut st| async move {
        loop {
            match st.phase {
                Phase::Finished => return None,
                Phase::Start => {
                    // The timer needs the runtime, so it is created on first poll.
                    st.keepalive = st.keepalive_period.map(|period| {
                        let mut interval =
                            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                        interval
                    });
                    st.phase = Phase::Streaming;
                    tracing::debug!(
                        message_id = st.ctx.message_id(),
                        model = st.ctx.model(),
                        "translating backend stream"
                    );
                    st.ctx.initial_events_into(&mut st.events);
                }
                Phase::Streaming => {
                    let step = match st.keepalive.as_mut() {
                        Some(interval) => tokio::select! {
                            biased;
                            frame = st.frames.next() => Step::Frame(frame),
                            _ = interval.tick() => Step::Ping,
                        },
                        None => Step::Frame(st.frames.next().await),
                    };
                    match step {
                        Step::Ping => {
                            return Some((Ok(Bytes::from_static(PING_FRAME.as_bytes())), st));
                        }
                        Step::Frame(Some(Ok(frame))) => {
                            st.ctx.process_frame_into(&frame, &mut st.events);
                            if let Some(interval) = st.keepalive.as_mut() {
                                interval.reset();
                            }
                        }
                        Step::Frame(Some(Err(err))) => {
                            tracing::warn!(
                                error = %err,
                                message_id = st.ctx.message_id(),
                                "backend stream failed, closing the message"
                            );
                            st.finish();
                        }
                        Step::Frame(None) => st.finish(),
                    }
                }
            }

            if st.events.is_empty() {
                continue;
            }
            let chunk = st.take_chunk();
            if chunk.is_err() {
                st.phase = Phase::Finished;
            }
            return Some((chunk, st));
        }
    })
}

/// Drain a backend body and fold it into one [`MessageResponse`].
///
/// A read error or fatal framing error ends collection early; the message
/// built from the frames received so far is returned.
pub async fn collect_message<S, E>(byte_stream: S, ctx: StreamContext) -> MessageResponse
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    collect_message_with_decoder(byte_stream, FrameDecoder::new(), ctx).await
}

/// [`collect_message`] with a caller-configured decoder.
pub async fn collect_message_with_decoder<S, E>(
    byte_stream: S,
    decoder: FrameDecoder,
    mut ctx: StreamContext,
) -> MessageResponse
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let started_at = Instant::now();
    let mut frames = pin!(frame_stream_with_decoder(byte_stream, decoder));
    let mut aggregator = MessageAggregator::new();
    let mut events = ctx.initial_events();

    while let Some(item) = frames.next().await {
        match item {
            Ok(frame) => ctx.process_frame_into(&frame, &mut events),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    message_id = ctx.message_id(),
                    "backend stream failed, returning partial message"
                );
                break;
            }
        }
        aggregator.extend(&events);
        events.clear();
    }

    ctx.finalize_into(&mut events);
    aggregator.extend(&events);
    log_stream_complete(ctx.model(), &ctx.usage(), ctx.stop_reason(), started_at);
    aggregator.finish()
}

/// Wrap an SSE byte stream in a `200 text/event-stream` response.
pub fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Bytes, BridgeError>> + Send + 'static,
{
    let mut response = Response::new(axum::body::Body::from_stream(stream));
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}

/// Serialize a message as a `200 application/json` response.
///
/// # Errors
///
/// Returns [`BridgeError::Serialization`] if the message cannot be encoded.
pub fn json_response(message: &MessageResponse) -> Result<Response, BridgeError> {
    let body = serde_json::to_vec(message)?;
    let mut response = Response::new(axum::body::Body::from(body));
    *response.status_mut() = http::StatusCode::OK;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

/// Check an upstream response and stream it back as Anthropic SSE.
///
/// # Errors
///
/// Returns the [`check_upstream`] error for a non-2xx upstream status.
pub async fn forward_stream(
    upstream: reqwest::Response,
    ctx: StreamContext,
    config: &StreamConfig,
) -> Result<Response, BridgeError> {
    let upstream = check_upstream(upstream).await?;
    let stream = translate_stream_with_decoder(
        upstream.bytes_stream(),
        config.decoder(),
        ctx,
        config.keepalive_interval(),
    );
    Ok(sse_response(stream))
}

/// Check an upstream response and answer with one aggregate JSON message.
///
/// # Errors
///
/// Returns the [`check_upstream`] error for a non-2xx upstream status, or
/// [`BridgeError::Serialization`] if the message cannot be encoded.
pub async fn forward_message(
    upstream: reqwest::Response,
    ctx: StreamContext,
    config: &StreamConfig,
) -> Result<Response, BridgeError> {
    let upstream = check_upstream(upstream).await?;
    let message = collect_message_with_decoder(upstream.bytes_stream(), config.decoder(), ctx).await;
    json_response(&message)
}
