//! Session orchestrator: the state machine between one browser connection
//! and one remote realtime session
//!
//! The orchestrator owns the active agent and the active transport. A routing
//! tool result is intercepted here, never forwarded to the remote model: the
//! old transport is torn down, the next agent is built, and a fresh transport
//! is connected, all under the same session id and interaction log. Every
//! persistence call is best-effort; a failing session store never interrupts
//! a live call.

use std::sync::Arc;
use std::time::Instant;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::marketplace::{KnowledgeIndex, Marketplace};
use crate::types::{AgentKind, Caller, InteractionKind, SessionStatus, SpeechRole};

use super::agents::{History, MasterAgent, ShopAgent, VoiceAgent};
use super::session_log::{InteractionRecord, SessionStore};
use super::tools::ToolRegistry;
use super::transport::{RealtimeTransport, SessionConfig, TransportEvent};

/// Builds a fresh transport for each remote session; the orchestrator needs
/// a new one on every agent switch.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Box<dyn RealtimeTransport>;
}

/// Frames parsed from the browser's text messages. Raw binary frames are
/// audio and bypass JSON entirely.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Base64 PCM16 audio chunk
    Audio { data: String },
    /// Typed text turn
    Text { text: String },
    /// End-of-utterance when the client does its own turn-taking
    Commit,
    /// Barge-in: stop the in-flight response
    Cancel,
    /// Client is done; close the session cleanly
    End,
}

/// Frames sent to the browser, serialized as JSON text messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Audio {
        data: String,
    },
    Transcript {
        role: SpeechRole,
        text: String,
    },
    Status {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    AgentSwitch {
        from_agent: String,
        to_agent: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        shop_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        shop_name: Option<String>,
        message: String,
    },
    Error {
        message: String,
    },
}

/// What the server's socket reader hands the orchestrator.
#[derive(Debug)]
pub enum ClientFrame {
    Text(String),
    Binary(Vec<u8>),
    Closed,
}

/// Which agent the client asked to start with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentSelection {
    Master,
    Shop(Uuid),
}

enum Flow {
    Continue,
    /// Replace the transport event stream after an agent switch
    Swap(mpsc::Receiver<TransportEvent>),
    End(SessionStatus),
}

pub struct Orchestrator {
    market: Arc<dyn Marketplace>,
    knowledge: Arc<dyn KnowledgeIndex>,
    registry: Arc<ToolRegistry>,
    store: Arc<SessionStore>,
    factory: Arc<dyn TransportFactory>,
    out: mpsc::Sender<OutboundFrame>,
    caller: Option<Caller>,

    session_id: Option<Uuid>,
    agent: Box<dyn VoiceAgent>,
    transport: Box<dyn RealtimeTransport>,
    history: History,
}

impl Orchestrator {
    /// Run one complete session: connect, relay until either side ends,
    /// finalize. Consumes the client frame stream.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        market: Arc<dyn Marketplace>,
        knowledge: Arc<dyn KnowledgeIndex>,
        registry: Arc<ToolRegistry>,
        store: Arc<SessionStore>,
        factory: Arc<dyn TransportFactory>,
        out: mpsc::Sender<OutboundFrame>,
        caller: Option<Caller>,
        selection: AgentSelection,
        mut inbound: mpsc::Receiver<ClientFrame>,
    ) {
        let _ = out
            .send(OutboundFrame::Status {
                status: "connecting".to_string(),
                session_id: None,
                message: None,
            })
            .await;

        // Resolve the initial agent; a shop that cannot serve falls back to
        // the master agent instead of failing the connection
        let agent: Box<dyn VoiceAgent> = match selection {
            AgentSelection::Shop(shop_id) => {
                match ShopAgent::create(
                    registry.clone(),
                    market.clone(),
                    knowledge.clone(),
                    shop_id,
                    caller.clone(),
                )
                .await
                {
                    Ok(agent) => Box::new(agent),
                    Err(e) => {
                        warn!("Shop agent unavailable, starting with master: {}", e);
                        Box::new(MasterAgent::create(registry.clone(), market.clone(), caller.clone()).await)
                    }
                }
            }
            AgentSelection::Master => {
                Box::new(MasterAgent::create(registry.clone(), market.clone(), caller.clone()).await)
            }
        };

        let transport = factory.create();
        let mut this = Self {
            market,
            knowledge,
            registry,
            store,
            factory,
            out,
            caller,
            session_id: None,
            agent,
            transport,
            history: History::default(),
        };

        let mut events = match this.connect_transport().await {
            Ok(events) => events,
            Err(message) => {
                let _ = this.out.send(OutboundFrame::Error { message }).await;
                let _ = this
                    .out
                    .send(OutboundFrame::Status {
                        status: "error".to_string(),
                        session_id: None,
                        message: None,
                    })
                    .await;
                return;
            }
        };

        this.open_session().await;
        let _ = this
            .out
            .send(OutboundFrame::Status {
                status: "connected".to_string(),
                session_id: this.session_id,
                message: None,
            })
            .await;
        this.send_greeting().await;

        let status = loop {
            let flow = tokio::select! {
                frame = inbound.recv() => {
                    match frame {
                        Some(frame) => this.handle_client_frame(frame).await,
                        None => Flow::End(SessionStatus::Ended),
                    }
                }
                event = events.recv() => {
                    match event {
                        Some(event) => this.handle_transport_event(event).await,
                        None => Flow::End(SessionStatus::Ended),
                    }
                }
            };
            match flow {
                Flow::Continue => {}
                Flow::Swap(new_events) => events = new_events,
                Flow::End(status) => break status,
            }
        };

        this.finalize(status).await;
    }

    /// Connect the current transport with the current agent's session config.
    async fn connect_transport(&mut self) -> Result<mpsc::Receiver<TransportEvent>, String> {
        let mut instructions = self.agent.system_prompt().to_string();
        if !self.history.is_empty() {
            instructions.push_str(&self.history.render());
        }
        let config = SessionConfig {
            instructions,
            tools: self.agent.tool_schemas(),
            voice: self.agent.voice().to_string(),
        };
        self.transport
            .connect(config)
            .await
            .map_err(|e| e.to_string())
    }

    /// Blank interaction record snapshotting the current agent state.
    fn record(&self, kind: InteractionKind) -> InteractionRecord {
        InteractionRecord::snapshot(
            kind,
            self.agent.kind(),
            self.agent.role(),
            self.agent.shop().map(|s| s.id),
        )
    }

    async fn open_session(&mut self) {
        let shop = self.agent.shop().map(|s| (s.id, s.name.as_str()));
        match self
            .store
            .create_session(self.caller.as_ref(), self.agent.kind(), self.agent.role(), shop)
            .await
        {
            Ok(id) => {
                self.session_id = Some(id);
                info!(session = %id, agent = %self.agent.kind(), "voice session opened");
            }
            Err(e) => warn!("Failed to open session row: {}", e),
        }
    }

    /// Instruct the model to open with the agent's greeting.
    async fn send_greeting(&mut self) {
        let directive = format!(
            "Greet the caller now. Open with: \"{}\"",
            self.agent.greeting()
        );
        self.transport.send_text(&directive).await;
    }

    async fn handle_client_frame(&mut self, frame: ClientFrame) -> Flow {
        match frame {
            ClientFrame::Binary(bytes) => {
                self.transport.send_audio(&bytes).await;
                Flow::Continue
            }
            ClientFrame::Text(text) => match serde_json::from_str::<InboundFrame>(&text) {
                Ok(InboundFrame::Audio { data }) => {
                    match BASE64.decode(data.as_bytes()) {
                        Ok(bytes) => self.transport.send_audio(&bytes).await,
                        Err(e) => debug!("Undecodable client audio frame: {}", e),
                    }
                    Flow::Continue
                }
                Ok(InboundFrame::Text { text }) => {
                    self.history.push(SpeechRole::User, &text);
                    let mut record = self.record(InteractionKind::UserSpeech);
                    record.content = Some(text.clone());
                    self.log(record).await;
                    self.transport.send_text(&text).await;
                    Flow::Continue
                }
                Ok(InboundFrame::Commit) => {
                    self.transport.commit_audio().await;
                    Flow::Continue
                }
                Ok(InboundFrame::Cancel) => {
                    self.transport.cancel_response().await;
                    Flow::Continue
                }
                Ok(InboundFrame::End) => Flow::End(SessionStatus::Ended),
                Err(e) => {
                    // Unknown frame types are ignored, not fatal
                    debug!("Ignoring unrecognized client frame: {}", e);
                    Flow::Continue
                }
            },
            ClientFrame::Closed => Flow::End(SessionStatus::Ended),
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) -> Flow {
        match event {
            TransportEvent::SessionCreated(remote_id) => {
                if let Some(id) = self.session_id {
                    if let Err(e) = self.store.set_transport_session(id, &remote_id).await {
                        warn!("Failed to record transport session id: {}", e);
                    }
                }
                Flow::Continue
            }
            TransportEvent::Audio(data) => {
                if self.out.send(OutboundFrame::Audio { data }).await.is_err() {
                    return Flow::End(SessionStatus::Ended);
                }
                Flow::Continue
            }
            TransportEvent::Transcript { role, text, tokens } => {
                self.history.push(role, &text);
                let mut record = self.record(match role {
                    SpeechRole::User => InteractionKind::UserSpeech,
                    SpeechRole::Assistant => InteractionKind::AssistantSpeech,
                });
                record.content = Some(text.clone());
                record.tokens = tokens;
                self.log(record).await;
                if self
                    .out
                    .send(OutboundFrame::Transcript { role, text })
                    .await
                    .is_err()
                {
                    return Flow::End(SessionStatus::Ended);
                }
                Flow::Continue
            }
            TransportEvent::ToolCall { call_id, name, arguments } => {
                self.handle_tool_call(call_id, name, arguments).await
            }
            TransportEvent::Error(message) => {
                // Remote errors are surfaced and absorbed; the session goes on
                let mut record = self.record(InteractionKind::Error);
                record.content = Some(message.clone());
                self.log(record).await;
                let _ = self.out.send(OutboundFrame::Error { message }).await;
                Flow::Continue
            }
            TransportEvent::Closed => {
                info!("Remote transport closed");
                Flow::End(SessionStatus::Ended)
            }
        }
    }

    async fn handle_tool_call(&mut self, call_id: String, name: String, arguments: Value) -> Flow {
        let started = Instant::now();
        let result = self.agent.execute_tool(&name, arguments.clone()).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        let success = result["success"].as_bool().unwrap_or(false);
        debug!(tool = %name, success, latency_ms, "tool executed");

        let mut record = self.record(InteractionKind::ToolCall);
        record.tool_name = Some(name.clone());
        record.tool_input = Some(arguments.to_string());
        record.tool_output = Some(result.to_string());
        record.tool_success = Some(success);
        record.latency_ms = Some(latency_ms);
        self.log(record).await;

        // Routing directives are handled here; their result must not reach
        // the old transport, which is about to be torn down
        if success {
            match result["action"].as_str() {
                Some("route_to_shop") => {
                    if let Some(shop_id) =
                        result["shop_id"].as_str().and_then(|s| Uuid::parse_str(s).ok())
                    {
                        return self.switch_to_shop(shop_id, call_id, &result).await;
                    }
                }
                Some("route_to_master") => {
                    self.notify_switching(&result).await;
                    return self.switch_to_master().await;
                }
                _ => {}
            }
        }

        self.transport.send_tool_result(&call_id, &result).await;
        Flow::Continue
    }

    /// Handoff notice to the browser before the transport teardown starts.
    async fn notify_switching(&self, result: &Value) {
        let _ = self
            .out
            .send(OutboundFrame::Status {
                status: "switching".to_string(),
                session_id: self.session_id,
                message: result["message"].as_str().map(|m| m.to_string()),
            })
            .await;
    }

    /// The switching notice only goes out once the next agent actually
    /// exists; a caller must never be left on a dangling handoff.
    async fn switch_to_shop(&mut self, shop_id: Uuid, call_id: String, directive: &Value) -> Flow {
        let next = ShopAgent::create(
            self.registry.clone(),
            self.market.clone(),
            self.knowledge.clone(),
            shop_id,
            self.caller.clone(),
        )
        .await;
        let next = match next {
            Ok(agent) => agent,
            Err(e) => {
                // Stay on the current agent; both the model and the caller
                // hear that nothing changed
                warn!("Shop agent construction failed: {}", e);
                let failure = serde_json::json!({
                    "success": false,
                    "error": format!("Could not connect to that shop: {e}"),
                });
                self.transport.send_tool_result(&call_id, &failure).await;
                let _ = self
                    .out
                    .send(OutboundFrame::Error {
                        message: "That shop is unavailable right now; you are still with the same assistant.".to_string(),
                    })
                    .await;
                return Flow::Continue;
            }
        };
        self.notify_switching(directive).await;
        self.swap_agent(Box::new(next)).await
    }

    async fn switch_to_master(&mut self) -> Flow {
        let next = MasterAgent::create(self.registry.clone(), self.market.clone(), self.caller.clone()).await;
        self.swap_agent(Box::new(next)).await
    }

    /// Tear down the current transport, activate the next agent, reconnect.
    /// On a failed reconnect the master agent is the last resort.
    async fn swap_agent(&mut self, next: Box<dyn VoiceAgent>) -> Flow {
        let from = self.agent.kind();
        self.transport.disconnect().await;
        // Prompt context does not travel across agents; the durable record
        // is the interaction log
        self.history = History::default();
        self.agent = next;
        self.transport = self.factory.create();

        let mut events = self.connect_transport().await;
        if events.is_err() && self.agent.kind() != AgentKind::Master {
            warn!("Reconnect to shop agent failed, reverting to master");
            self.agent =
                Box::new(MasterAgent::create(self.registry.clone(), self.market.clone(), self.caller.clone()).await);
            self.transport = self.factory.create();
            events = self.connect_transport().await;
        }
        let events = match events {
            Ok(events) => events,
            Err(message) => {
                let _ = self.out.send(OutboundFrame::Error { message }).await;
                return Flow::End(SessionStatus::Error);
            }
        };

        let to = self.agent.kind();
        let shop = self.agent.shop().cloned();
        if let Some(id) = self.session_id {
            if let Err(e) = self
                .store
                .update_agent(
                    id,
                    to,
                    self.agent.role(),
                    shop.as_ref().map(|s| (s.id, s.name.as_str())),
                )
                .await
            {
                warn!("Failed to update session agent: {}", e);
            }
        }

        let message = match &shop {
            Some(shop) => format!("Connected to {}", shop.name),
            None => "Back with the main assistant".to_string(),
        };
        let mut record = self.record(InteractionKind::AgentSwitch);
        record.content = Some(format!("{from} -> {to}"));
        self.log(record).await;
        if self
            .out
            .send(OutboundFrame::AgentSwitch {
                from_agent: from.to_string(),
                to_agent: to.to_string(),
                shop_id: shop.as_ref().map(|s| s.id),
                shop_name: shop.as_ref().map(|s| s.name.clone()),
                message,
            })
            .await
            .is_err()
        {
            return Flow::End(SessionStatus::Ended);
        }

        info!(from = %from, to = %to, "agent switched");
        self.send_greeting().await;
        Flow::Swap(events)
    }

    async fn log(&self, record: InteractionRecord) {
        if let Some(id) = self.session_id {
            if let Err(e) = self.store.log_interaction(id, &record).await {
                warn!("Failed to log interaction: {}", e);
            }
        }
    }

    async fn finalize(&mut self, status: SessionStatus) {
        self.transport.disconnect().await;
        // The shop counter tallies completed sessions, attributed to the shop
        // the session was scoped to when it ended
        if let Some(shop) = self.agent.shop() {
            self.market.record_shop_session(shop.id).await;
        }
        if let Some(id) = self.session_id {
            if let Err(e) = self.store.end_session(id, status).await {
                warn!("Failed to finalize session: {}", e);
            }
            info!(session = %id, status = %status.as_str(), "voice session closed");
        }
        let _ = self
            .out
            .send(OutboundFrame::Status {
                status: "ended".to_string(),
                session_id: self.session_id,
                message: None,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inbound_frames_parse_from_client_json() {
        let frame: InboundFrame = serde_json::from_str(r#"{"type":"text","text":"hi"}"#).unwrap();
        assert!(matches!(frame, InboundFrame::Text { text } if text == "hi"));

        let frame: InboundFrame = serde_json::from_str(r#"{"type":"audio","data":"QUJD"}"#).unwrap();
        assert!(matches!(frame, InboundFrame::Audio { data } if data == "QUJD"));

        let frame: InboundFrame = serde_json::from_str(r#"{"type":"end"}"#).unwrap();
        assert!(matches!(frame, InboundFrame::End));

        assert!(serde_json::from_str::<InboundFrame>(r#"{"type":"mystery"}"#).is_err());
    }

    #[test]
    fn outbound_frames_serialize_with_tagged_type() {
        let frame = OutboundFrame::Status {
            status: "connected".to_string(),
            session_id: Some(Uuid::nil()),
            message: None,
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], json!("status"));
        assert_eq!(value["status"], json!("connected"));
        assert!(value.get("message").is_none());

        let frame = OutboundFrame::AgentSwitch {
            from_agent: "master".to_string(),
            to_agent: "shop".to_string(),
            shop_id: None,
            shop_name: Some("Glow Studio".to_string()),
            message: "Connected to Glow Studio".to_string(),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], json!("agent_switch"));
        assert_eq!(value["shop_name"], json!("Glow Studio"));
    }

    #[test]
    fn audio_frames_carry_base64_under_the_data_key() {
        let frame = OutboundFrame::Audio { data: "QUJD".to_string() };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], json!("audio"));
        assert_eq!(value["data"], json!("QUJD"));
    }

    #[test]
    fn transcript_frame_uses_snake_case_roles() {
        let frame = OutboundFrame::Transcript {
            role: SpeechRole::Assistant,
            text: "hello".to_string(),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["role"], json!("assistant"));
    }
}
