//! POST + Server-Sent Events transport.
//!
//! The backend streams `data: <json>` frames tagged by `type`. Everything is
//! surfaced as one [`EventStream`] of [`StreamEvent`] values; the stream ends
//! right after its terminal event (`Complete` or `Error`).

use anyhow::Context as _;
use futures::StreamExt as _;
use futures::stream::BoxStream;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub message: String,
    pub percent: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent<T> {
    Progress(Progress),
    Result(T),
    Error { message: String },
    Complete,
}

impl<T> StreamEvent<T> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Complete)
    }
}

pub type EventStream<T> = BoxStream<'static, StreamEvent<T>>;

/// Stops delivering events once `cancel` fires. Nothing buffered from the
/// abandoned stream is yielded afterwards.
pub fn with_cancellation<T: Send + 'static>(
    stream: EventStream<T>,
    cancel: CancellationToken,
) -> EventStream<T> {
    stream.take_until(cancel.cancelled_owned()).boxed()
}

pub async fn post_event_stream<T, B>(
    client: &reqwest::Client,
    url: &str,
    bearer_token: Option<&str>,
    body: &B,
) -> anyhow::Result<EventStream<T>>
where
    T: DeserializeOwned + Send + 'static,
    B: Serialize + ?Sized,
{
    let mut request = client
        .post(url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .json(body);
    if let Some(token) = bearer_token {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .await
        .with_context(|| format!("POST {url}"))?;

    let status = response.status();
    if !status.is_success() {
        let raw = response.text().await.unwrap_or_default();
        let message = crate::api::error_detail(&raw).unwrap_or(raw);
        tracing::warn!(%url, %status, %message, "event stream rejected");
        let event = StreamEvent::Error {
            message: format!("{message} ({status})"),
        };
        return Ok(futures::stream::iter([event]).boxed());
    }

    tracing::debug!(%url, "event stream opened");
    let stream = async_stream::stream! {
        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::default();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    yield StreamEvent::Error {
                        message: format!("read event stream: {err}"),
                    };
                    return;
                }
            };
            for event in decode_payloads::<T>(decoder.push(&chunk)) {
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    return;
                }
            }
        }

        for event in decode_payloads::<T>(decoder.finish().into_iter().collect()) {
            let terminal = event.is_terminal();
            yield event;
            if terminal {
                return;
            }
        }

        yield StreamEvent::Error {
            message: "event stream closed before completion".to_owned(),
        };
    };

    Ok(stream.boxed())
}

fn decode_payloads<T: DeserializeOwned>(payloads: Vec<String>) -> Vec<StreamEvent<T>> {
    payloads
        .iter()
        .filter_map(|payload| match decode_frame::<T>(payload) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "skip malformed event frame");
                None
            }
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct WireFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<u16>,
}

/// Decodes one `data:` payload. Frames that carry nothing for the caller
/// (`chunk`, `heartbeat`, unknown types) decode to `None`.
pub fn decode_frame<T: DeserializeOwned>(payload: &str) -> anyhow::Result<Option<StreamEvent<T>>> {
    let frame: WireFrame = serde_json::from_str(payload).context("parse event frame")?;
    let event = match frame.kind.as_str() {
        "progress" => StreamEvent::Progress(Progress {
            message: frame.message.unwrap_or_default(),
            percent: frame.progress.unwrap_or(0.0).clamp(0.0, 100.0).round() as u8,
        }),
        "result" => {
            let data = frame
                .data
                .ok_or_else(|| anyhow::anyhow!("result frame without data"))?;
            StreamEvent::Result(serde_json::from_value(data).context("parse result payload")?)
        }
        "error" => {
            let message = frame
                .error
                .or(frame.message)
                .unwrap_or_else(|| "unknown stream error".to_owned());
            if let Some(code) = frame.code {
                tracing::debug!(code, "error frame");
            }
            StreamEvent::Error { message }
        }
        "done" => StreamEvent::Complete,
        other => {
            tracing::trace!(kind = other, "ignore event frame");
            return Ok(None);
        }
    };
    Ok(Some(event))
}

/// Incremental SSE framing over raw body chunks. Chunks may split events and
/// multi-byte characters anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Returns the `data` payload of every event completed by `bytes`.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some((end, separator_len)) = find_event_end(&self.buffer) {
            let event: Vec<u8> = self.buffer.drain(..end + separator_len).collect();
            if let Some(data) = event_data(&String::from_utf8_lossy(&event[..end])) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flushes a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        event_data(&String::from_utf8_lossy(&rest))
    }
}

fn find_event_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = find(buffer, b"\n\n").map(|idx| (idx, 2));
    let crlf = find(buffer, b"\r\n\r\n").map(|idx| (idx, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn event_data(event: &str) -> Option<String> {
    let mut lines = Vec::new();
    for line in event.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(data) = line.strip_prefix("data:") {
            lines.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_handles_split_chunks_and_crlf() {
        let mut decoder = SseDecoder::default();
        let frame = "data: {\"type\":\"progress\",\"message\":\"加载\",\"progress\":10}\n\n";
        let bytes = frame.as_bytes();
        // Split inside a multi-byte character.
        let split = frame.find("加").unwrap() + 1;
        assert!(decoder.push(&bytes[..split]).is_empty());
        let payloads = decoder.push(&bytes[split..]);
        assert_eq!(payloads.len(), 1);
        assert!(payloads[0].contains("加载"));

        let payloads = decoder.push(b": keep-alive\r\n\r\ndata: {\"type\":\"done\"}\r\n\r\n");
        assert_eq!(payloads, vec!["{\"type\":\"done\"}".to_owned()]);
    }

    #[test]
    fn decoder_joins_multiline_data_and_flushes_tail() {
        let mut decoder = SseDecoder::default();
        assert_eq!(
            decoder.push(b"data: a\ndata: b\n\n"),
            vec!["a\nb".to_owned()]
        );
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), Some("tail".to_owned()));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn frames_map_to_events() -> anyhow::Result<()> {
        let progress = decode_frame::<serde_json::Value>(
            r#"{"type":"progress","message":"生成中","progress":130,"status":"processing"}"#,
        )?;
        assert_eq!(
            progress,
            Some(StreamEvent::Progress(Progress {
                message: "生成中".to_owned(),
                percent: 100,
            }))
        );

        let result = decode_frame::<Vec<u32>>(r#"{"type":"result","data":[1,2]}"#)?;
        assert_eq!(result, Some(StreamEvent::Result(vec![1, 2])));

        let error = decode_frame::<serde_json::Value>(r#"{"type":"error","error":"大纲不存在","code":404}"#)?;
        assert_eq!(
            error,
            Some(StreamEvent::Error {
                message: "大纲不存在".to_owned()
            })
        );

        assert_eq!(
            decode_frame::<serde_json::Value>(r#"{"type":"done"}"#)?,
            Some(StreamEvent::Complete)
        );
        assert_eq!(
            decode_frame::<serde_json::Value>(r#"{"type":"chunk","content":"..."}"#)?,
            None
        );
        assert!(decode_frame::<serde_json::Value>("not json").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn cancellation_drops_remaining_events() {
        let cancel = CancellationToken::new();
        let (tx, rx) = futures::channel::mpsc::unbounded::<StreamEvent<u32>>();
        let mut stream = with_cancellation(rx.boxed(), cancel.clone());

        tx.unbounded_send(StreamEvent::Progress(Progress {
            message: "a".to_owned(),
            percent: 10,
        }))
        .unwrap();
        assert!(matches!(stream.next().await, Some(StreamEvent::Progress(_))));

        cancel.cancel();
        tx.unbounded_send(StreamEvent::Result(7)).unwrap();
        assert_eq!(stream.next().await, None);
    }
}
