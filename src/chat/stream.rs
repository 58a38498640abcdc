// src/chat/stream.rs
//! Server-sent event stream for one chat turn.
//!
//! The reader runs as its own task and forwards decoded events in arrival
//! order. It finishes with exactly one terminal item: `Done`, `Failed` or
//! `TimedOut`.

use futures::{Stream, StreamExt};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::ApiClient;
use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentType {
    Data,
    Markdown,
    Plot,
    Error,
    Signal,
    Other(String),
}

impl ContentType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "data" => ContentType::Data,
            "markdown" => ContentType::Markdown,
            "plot" => ContentType::Plot,
            "error" => ContentType::Error,
            "signal" => ContentType::Signal,
            other => ContentType::Other(other.to_string()),
        }
    }

    /// Carries an agent result rather than progress or control.
    pub fn is_result(&self) -> bool {
        matches!(self, ContentType::Data | ContentType::Markdown | ContentType::Plot | ContentType::Error)
    }
}

impl Default for ContentType {
    fn default() -> Self {
        ContentType::Other(String::new())
    }
}

impl<'de> Deserialize<'de> for ContentType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.map(|r| ContentType::parse(&r)).unwrap_or_default())
    }
}

/// One decoded `data:` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StreamEvent {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub thought_process: Value,
}

impl StreamEvent {
    pub fn is_done(&self) -> bool {
        self.content_type == ContentType::Signal && self.content.as_str() == Some("DONE")
    }

    pub fn role(&self) -> &str {
        self.role.as_deref().unwrap_or("")
    }
}

/// Incremental `text/event-stream` decoder. Bytes may be split anywhere,
/// including inside a multi-byte character.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning the payloads of every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a final frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let rest = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
            self.line(&rest);
        }
        self.dispatch()
    }

    fn line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let frame = self.data.join("\n");
        self.data.clear();
        Some(frame)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(StreamEvent),
    Done,
    Failed(String),
    TimedOut,
}

impl StreamItem {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamItem::Event(_))
    }
}

/// A stream item tagged with the turn it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    pub chat_id: String,
    pub item: StreamItem,
}

/// Drive a byte stream to completion, emitting decoded items. Stops at the
/// first terminal item or when `emit` reports the receiver is gone.
pub async fn pump<S, B, E, F>(chat_id: &str, mut body: S, idle: Duration, mut emit: F)
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: fmt::Display,
    F: FnMut(StreamMessage) -> bool,
{
    let mut decoder = SseDecoder::new();
    let mut send = |item: StreamItem| {
        emit(StreamMessage { chat_id: chat_id.to_string(), item })
    };

    loop {
        let frames = match tokio::time::timeout(idle, body.next()).await {
            Err(_) => {
                log_warn!("Stream {} idle for {:?}, giving up", chat_id, idle);
                send(StreamItem::TimedOut);
                return;
            }
            Ok(None) => {
                if let Some(frame) = decoder.finish() {
                    if forward(chat_id, &frame, &mut send) != Some(false) {
                        return;
                    }
                }
                send(StreamItem::Failed("stream closed before DONE".to_string()));
                return;
            }
            Ok(Some(Err(e))) => {
                log_warn!("Stream {} transport error: {}", chat_id, e);
                send(StreamItem::Failed(e.to_string()));
                return;
            }
            Ok(Some(Ok(bytes))) => decoder.push(bytes.as_ref()),
        };

        for frame in frames {
            match forward(chat_id, &frame, &mut send) {
                Some(true) => return,
                Some(false) => {}
                None => return,
            }
        }
    }
}

/// Decode and emit one frame. `Some(true)` means the turn finished,
/// `None` means the receiver is gone.
fn forward<F: FnMut(StreamItem) -> bool>(chat_id: &str, frame: &str, send: &mut F) -> Option<bool> {
    let event: StreamEvent = match serde_json::from_str(frame) {
        Ok(event) => event,
        Err(e) => {
            log_warn!("Stream {} skipped undecodable frame: {}", chat_id, e);
            return Some(false);
        }
    };
    log_debug!("Stream {} event {:?} from {}", chat_id, event.content_type, event.role());

    if event.is_done() {
        send(StreamItem::Done);
        return Some(true);
    }
    if send(StreamItem::Event(event)) {
        Some(false)
    } else {
        None
    }
}

/// Owns the reader task; dropping it closes the connection.
#[derive(Debug)]
pub struct StreamHandle {
    pub chat_id: String,
    task: JoinHandle<()>,
}

impl StreamHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Open the event stream for `chat_id` and forward its items, wrapped by
/// `wrap`, into `sender`.
pub fn open_stream<T, W>(
    api: &ApiClient,
    chat_id: &str,
    endpoint: &str,
    idle: Duration,
    sender: mpsc::UnboundedSender<T>,
    wrap: W,
) -> StreamHandle
where
    T: Send + 'static,
    W: Fn(StreamMessage) -> T + Send + 'static,
{
    let api = api.clone();
    let path = ApiClient::stream_path(chat_id, endpoint);
    let id = chat_id.to_string();

    let task = tokio::spawn(async move {
        tracing::info!(chat_id = %id, path = %path, "opening event stream");
        let emit = move |message: StreamMessage| sender.send(wrap(message)).is_ok();

        let response = match api.execute(api.stream_request(&path)).await {
            Ok(response) => response,
            Err(e) => {
                log_warn!("Stream {} could not be opened: {}", id, e);
                emit(StreamMessage { chat_id: id.clone(), item: StreamItem::Failed(e.to_string()) });
                return;
            }
        };

        log_info!("Stream {} connected", id);
        pump(&id, response.bytes_stream(), idle, emit).await;
        tracing::info!(chat_id = %id, "event stream finished");
    });

    StreamHandle { chat_id: chat_id.to_string(), task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Vec<u8>, String>> + Unpin {
        stream::iter(parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect::<Vec<_>>())
    }

    async fn collect(parts: &[&str]) -> Vec<StreamItem> {
        let mut items = Vec::new();
        pump("c1", chunks(parts), Duration::from_secs(5), |m| {
            items.push(m.item);
            true
        })
        .await;
        items
    }

    #[test]
    fn test_decoder_split_frames() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\":").is_empty());
        assert!(decoder.push(b"1}\r\n").is_empty());
        assert_eq!(decoder.push(b"\r\ndata: x\n\n"), vec!["{\"a\":1}".to_string(), "x".to_string()]);
    }

    #[test]
    fn test_decoder_multiline_and_comments() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b": keepalive\n\nevent: message\ndata: one\ndata:two\nid: 4\n\n");
        assert_eq!(frames, vec!["one\ntwo".to_string()]);
    }

    #[test]
    fn test_decoder_split_utf8() {
        let text = "data: é\n\n".as_bytes();
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&text[..7]).is_empty());
        assert_eq!(decoder.push(&text[7..]), vec!["é".to_string()]);
    }

    #[test]
    fn test_decoder_finish_flushes_tail() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), Some("tail".to_string()));
        assert_eq!(decoder.finish(), None);
    }

    #[tokio::test]
    async fn test_pump_stops_at_done() {
        let items = collect(&[
            "data: {\"content_type\":\"data\",\"role\":\"sql-agent\",\"content\":[{\"a\":1}]}\n\n",
            "data: {\"content_type\":\"signal\",\"content\":\"DONE\"}\n\ndata: {\"content_type\":\"markdown\"}\n\n",
        ])
        .await;
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], StreamItem::Event(e) if e.role() == "sql-agent"));
        assert_eq!(items[1], StreamItem::Done);
    }

    #[tokio::test]
    async fn test_pump_reports_early_close() {
        let items = collect(&["data: {\"content_type\":\"progress\",\"content\":\"thinking\"}\n\n"]).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[1], StreamItem::Failed(_)));
    }

    #[tokio::test]
    async fn test_pump_skips_garbage_frames() {
        let items = collect(&["data: not json\n\n", "data: {\"content_type\":\"signal\",\"content\":\"DONE\"}"]).await;
        assert_eq!(items, vec![StreamItem::Done]);
    }

    #[tokio::test]
    async fn test_pump_transport_error() {
        let body = stream::iter(vec![
            Ok(b"data: {\"content_type\":\"markdown\",\"role\":\"chat-agent\",\"content\":\"hi\"}\n\n".to_vec()),
            Err("connection reset".to_string()),
        ]);
        let mut items = Vec::new();
        pump("c1", body, Duration::from_secs(5), |m| {
            items.push(m.item);
            true
        })
        .await;
        assert_eq!(items.last(), Some(&StreamItem::Failed("connection reset".to_string())));
        assert_eq!(items.iter().filter(|i| i.is_terminal()).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pump_idle_timeout() {
        let body = stream::pending::<Result<Vec<u8>, String>>();
        let mut items = Vec::new();
        pump("c1", body, Duration::from_secs(120), |m| {
            items.push(m.item);
            true
        })
        .await;
        assert_eq!(items, vec![StreamItem::TimedOut]);
    }

    /// Serve one canned SSE response on a local port and return its base URL.
    async fn serve_once(body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_open_stream_forwards_until_done() {
        let base = serve_once(concat!(
            "data: {\"content_type\":\"markdown\",\"role\":\"chat-agent\",\"content\":\"hi\"}\n\n",
            "data: {\"content_type\":\"signal\",\"content\":\"DONE\"}\n\n",
        ))
        .await;
        let config = crate::config::AppConfig { api_base_url: base, ..Default::default() };
        let api = ApiClient::new(&config).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = open_stream(&api, "c7", "stream", Duration::from_secs(5), tx, |m| m);
        assert_eq!(handle.chat_id, "c7");

        let first = rx.recv().await.unwrap();
        assert_eq!(first.chat_id, "c7");
        assert!(matches!(&first.item, StreamItem::Event(e) if e.role() == "chat-agent"));
        assert_eq!(rx.recv().await.unwrap().item, StreamItem::Done);
        // the task drops its sender once the terminal item is out
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_open_stream_reports_connect_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let config = crate::config::AppConfig { api_base_url: format!("http://{}", addr), ..Default::default() };
        let api = ApiClient::new(&config).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = open_stream(&api, "c8", "stream", Duration::from_secs(5), tx, |m| m);
        let message = rx.recv().await.unwrap();
        assert!(matches!(message.item, StreamItem::Failed(_)));
    }

    #[test]
    fn test_event_decoding_tolerates_nulls() {
        let event: StreamEvent =
            serde_json::from_str(r#"{"content_type":null,"role":null,"content":null}"#).unwrap();
        assert_eq!(event.content_type, ContentType::default());
        assert_eq!(event.role(), "");
        assert!(!event.is_done());
    }
}
