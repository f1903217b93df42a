//! Realtime transport client
//!
//! Owns exactly one live WebSocket connection to the OpenAI Realtime API and
//! translates its wire protocol into a small typed event surface. Events are
//! delivered over an mpsc channel rather than captured closures so the
//! orchestrator's main loop stays the single consumer of transport state.
//!
//! The client never retries a dropped connection; reconnection policy belongs
//! to the orchestrator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::types::SpeechRole;

pub const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Remote session parameters supplied by the active agent.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub instructions: String,
    /// Tool schemas in the Realtime wire format
    pub tools: Vec<Value>,
    pub voice: String,
}

/// Typed events emitted by the transport's receive loop.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Remote session established, carries the remote session id
    SessionCreated(String),
    /// Base64 PCM16 audio chunk
    Audio(String),
    /// One complete transcript turn. Assistant deltas are accumulated and
    /// emitted exactly once when the remote marks the turn done.
    Transcript {
        role: SpeechRole,
        text: String,
        tokens: Option<u32>,
    },
    ToolCall {
        call_id: String,
        name: String,
        arguments: Value,
    },
    Error(String),
    /// Connection closed; the receive loop has stopped.
    Closed,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("session configuration failed: {0}")]
    Configure(String),
}

/// Contract between the orchestrator and the remote speech service.
///
/// `connect` performs the handshake and remote session configuration; all
/// other sends are best-effort and must never panic or raise past this
/// boundary. `disconnect` is idempotent and safe from any state.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn connect(
        &mut self,
        config: SessionConfig,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;

    async fn send_audio(&mut self, audio: &[u8]);

    /// End-of-user-turn signal; the response streams back via events.
    async fn commit_audio(&mut self);

    /// Text-only turn input, also used for the synthetic greeting directive.
    async fn send_text(&mut self, text: &str);

    /// Best-effort cancellation of an in-flight response.
    async fn cancel_response(&mut self);

    async fn send_tool_result(&mut self, call_id: &str, result: &Value);

    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// tokio-tungstenite implementation of [`RealtimeTransport`].
pub struct OpenAiRealtimeClient {
    api_key: String,
    url: String,
    model: String,
    writer: Option<Arc<Mutex<WsSink>>>,
    connected: Arc<AtomicBool>,
    recv_task: Option<JoinHandle<()>>,
}

impl OpenAiRealtimeClient {
    pub fn new(api_key: impl Into<String>, url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            url: url.into(),
            model: model.into(),
            writer: None,
            connected: Arc::new(AtomicBool::new(false)),
            recv_task: None,
        }
    }

    async fn send_json(&self, payload: Value) {
        if !self.is_connected() {
            warn!("Dropping transport send: not connected");
            return;
        }
        if let Some(writer) = &self.writer {
            let text = payload.to_string();
            if let Err(e) = writer.lock().await.send(Message::Text(text.into())).await {
                warn!("Transport send failed: {}", e);
                self.connected.store(false, Ordering::SeqCst);
            }
        }
    }

    fn session_update(&self, config: &SessionConfig) -> Value {
        json!({
            "type": "session.update",
            "session": {
                "modalities": ["text", "audio"],
                "instructions": config.instructions,
                "voice": config.voice,
                "input_audio_format": "pcm16",
                "output_audio_format": "pcm16",
                "input_audio_transcription": { "model": "whisper-1" },
                "turn_detection": {
                    "type": "server_vad",
                    "threshold": 0.5,
                    "prefix_padding_ms": 300,
                    "silence_duration_ms": 500
                },
                "tools": config.tools,
                "tool_choice": "auto",
                "temperature": 0.7
            }
        })
    }
}

#[async_trait]
impl RealtimeTransport for OpenAiRealtimeClient {
    async fn connect(
        &mut self,
        config: SessionConfig,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let url = format!("{}?model={}", self.url, self.model);
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let headers = request.headers_mut();
        headers.insert(
            "Authorization",
            format!("Bearer {}", self.api_key)
                .parse()
                .map_err(|_| TransportError::Connect("invalid API key header".to_string()))?,
        );
        headers.insert(
            "OpenAI-Beta",
            "realtime=v1".parse().expect("static header value"),
        );

        info!("Connecting to OpenAI Realtime API");
        let (stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (sink, stream) = stream.split();

        let writer = Arc::new(Mutex::new(sink));
        self.writer = Some(writer.clone());
        self.connected.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(64);
        let connected = self.connected.clone();
        self.recv_task = Some(tokio::spawn(receive_loop(stream, writer, tx, connected)));

        // Configure the remote session before any audio flows
        self.send_json(self.session_update(&config)).await;
        if !self.is_connected() {
            return Err(TransportError::Configure("connection lost during setup".to_string()));
        }
        Ok(rx)
    }

    async fn send_audio(&mut self, audio: &[u8]) {
        if !self.is_connected() {
            warn!("Cannot send audio: not connected");
            return;
        }
        let audio_b64 = BASE64.encode(audio);
        self.send_json(json!({
            "type": "input_audio_buffer.append",
            "audio": audio_b64
        }))
        .await;
    }

    async fn commit_audio(&mut self) {
        self.send_json(json!({ "type": "input_audio_buffer.commit" })).await;
    }

    async fn send_text(&mut self, text: &str) {
        self.send_json(json!({
            "type": "conversation.item.create",
            "item": {
                "type": "message",
                "role": "user",
                "content": [{ "type": "input_text", "text": text }]
            }
        }))
        .await;
        self.send_json(json!({ "type": "response.create" })).await;
    }

    async fn cancel_response(&mut self) {
        self.send_json(json!({ "type": "response.cancel" })).await;
    }

    async fn send_tool_result(&mut self, call_id: &str, result: &Value) {
        self.send_json(json!({
            "type": "conversation.item.create",
            "item": {
                "type": "function_call_output",
                "call_id": call_id,
                "output": result.to_string()
            }
        }))
        .await;
        self.send_json(json!({ "type": "response.create" })).await;
    }

    async fn disconnect(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(task) = self.recv_task.take() {
            task.abort();
        }
        if let Some(writer) = self.writer.take() {
            let _ = writer.lock().await.send(Message::Close(None)).await;
        }
        debug!("Disconnected from OpenAI Realtime API");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// What the receive loop should do with one decoded remote event.
enum EventOutcome {
    Emit(TransportEvent),
    /// Malformed tool-call arguments: report a structured tool error back to
    /// the remote model without involving the orchestrator.
    ToolError { call_id: String, error: String },
    Ignore,
}

/// Accumulates assistant transcript deltas until the turn is marked done.
#[derive(Default)]
struct TurnAccumulator {
    assistant_transcript: String,
}

fn translate_event(event: &Value, acc: &mut TurnAccumulator) -> EventOutcome {
    let event_type = event.get("type").and_then(|t| t.as_str()).unwrap_or("");
    match event_type {
        "session.created" => {
            let id = event
                .pointer("/session/id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            info!("Remote session created: {}", id);
            EventOutcome::Emit(TransportEvent::SessionCreated(id))
        }
        "session.updated" => {
            debug!("Remote session configured");
            EventOutcome::Ignore
        }
        "response.audio.delta" => match event.get("delta").and_then(|v| v.as_str()) {
            Some(delta) if !delta.is_empty() => {
                EventOutcome::Emit(TransportEvent::Audio(delta.to_string()))
            }
            _ => EventOutcome::Ignore,
        },
        "response.audio_transcript.delta" => {
            if let Some(delta) = event.get("delta").and_then(|v| v.as_str()) {
                acc.assistant_transcript.push_str(delta);
            }
            EventOutcome::Ignore
        }
        "conversation.item.input_audio_transcription.completed" => {
            match event.get("transcript").and_then(|v| v.as_str()) {
                Some(text) if !text.trim().is_empty() => EventOutcome::Emit(TransportEvent::Transcript {
                    role: SpeechRole::User,
                    text: text.to_string(),
                    tokens: None,
                }),
                _ => EventOutcome::Ignore,
            }
        }
        "response.function_call_arguments.done" => {
            let call_id = event
                .get("call_id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let name = event
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let raw = event.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}");
            match serde_json::from_str::<Value>(raw) {
                Ok(arguments) => EventOutcome::Emit(TransportEvent::ToolCall { call_id, name, arguments }),
                Err(e) => {
                    warn!("Malformed tool arguments for {}: {}", name, e);
                    EventOutcome::ToolError {
                        call_id,
                        error: format!("invalid arguments: {e}"),
                    }
                }
            }
        }
        "response.done" => {
            let tokens = event
                .pointer("/response/usage/total_tokens")
                .and_then(|v| v.as_u64())
                .map(|t| t as u32);
            if acc.assistant_transcript.is_empty() {
                EventOutcome::Ignore
            } else {
                let text = std::mem::take(&mut acc.assistant_transcript);
                EventOutcome::Emit(TransportEvent::Transcript {
                    role: SpeechRole::Assistant,
                    text,
                    tokens,
                })
            }
        }
        "error" => {
            let message = event
                .pointer("/error/message")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown error")
                .to_string();
            error!("Remote error: {}", message);
            EventOutcome::Emit(TransportEvent::Error(message))
        }
        "rate_limits.updated" => {
            debug!("Rate limits: {:?}", event.get("rate_limits"));
            EventOutcome::Ignore
        }
        other => {
            debug!("Unhandled remote event: {}", other);
            EventOutcome::Ignore
        }
    }
}

async fn receive_loop(
    mut stream: WsStream,
    writer: Arc<Mutex<WsSink>>,
    tx: mpsc::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
) {
    let mut acc = TurnAccumulator::default();
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let event: Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("Undecodable remote frame: {}", e);
                        continue;
                    }
                };
                match translate_event(&event, &mut acc) {
                    EventOutcome::Emit(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    EventOutcome::ToolError { call_id, error } => {
                        let reply = json!({
                            "type": "conversation.item.create",
                            "item": {
                                "type": "function_call_output",
                                "call_id": call_id,
                                "output": json!({ "success": false, "error": error }).to_string()
                            }
                        });
                        let mut w = writer.lock().await;
                        let _ = w.send(Message::Text(reply.to_string().into())).await;
                        let _ = w
                            .send(Message::Text(json!({ "type": "response.create" }).to_string().into()))
                            .await;
                    }
                    EventOutcome::Ignore => {}
                }
            }
            Ok(Message::Close(frame)) => {
                info!("Remote closed the connection: {:?}", frame);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Receive loop error: {}", e);
                let _ = tx.send(TransportEvent::Error(e.to_string())).await;
                break;
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
    let _ = tx.send(TransportEvent::Closed).await;
}
