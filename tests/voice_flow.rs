//! End-to-end session flows over a scripted transport
//!
//! These tests run the real orchestrator, registry, marketplace, and session
//! store; only the remote speech service is replaced by a fake transport
//! whose events the tests inject by hand.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use salon_voice::marketplace::memory::InMemoryMarketplace;
use salon_voice::marketplace::{Marketplace, NullKnowledge, Shop};
use salon_voice::types::{Caller, SpeechRole};
use salon_voice::voice::orchestrator::{
    AgentSelection, ClientFrame, Orchestrator, OutboundFrame, TransportFactory,
};
use salon_voice::voice::session_log::SessionStore;
use salon_voice::voice::tools::ToolRegistry;
use salon_voice::voice::transport::{
    RealtimeTransport, SessionConfig, TransportError, TransportEvent,
};

/// What one scripted connection attempt recorded.
#[derive(Default)]
struct ConnectionRecord {
    config: Option<SessionConfig>,
    texts: Vec<String>,
    tool_results: Vec<(String, Value)>,
    audio_bytes: usize,
}

struct FakeShared {
    /// One entry per expected connect; `true` means the connect fails
    failures: Mutex<VecDeque<bool>>,
    connections: Mutex<Vec<Arc<Mutex<ConnectionRecord>>>>,
    event_senders: Mutex<Vec<mpsc::Sender<TransportEvent>>>,
}

impl FakeShared {
    fn new(failures: Vec<bool>) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(failures.into()),
            connections: Mutex::new(Vec::new()),
            event_senders: Mutex::new(Vec::new()),
        })
    }

    async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    async fn connection(&self, index: usize) -> Arc<Mutex<ConnectionRecord>> {
        self.connections.lock().await[index].clone()
    }

    /// Event sender for the most recent live connection.
    async fn current_events(&self) -> mpsc::Sender<TransportEvent> {
        self.event_senders.lock().await.last().unwrap().clone()
    }
}

struct FakeTransport {
    shared: Arc<FakeShared>,
    record: Option<Arc<Mutex<ConnectionRecord>>>,
    connected: AtomicBool,
}

#[async_trait]
impl RealtimeTransport for FakeTransport {
    async fn connect(
        &mut self,
        config: SessionConfig,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let fail = self.shared.failures.lock().await.pop_front().unwrap_or(false);
        if fail {
            return Err(TransportError::Connect("scripted failure".to_string()));
        }
        let record = Arc::new(Mutex::new(ConnectionRecord {
            config: Some(config),
            ..Default::default()
        }));
        self.shared.connections.lock().await.push(record.clone());
        self.record = Some(record);

        let (tx, rx) = mpsc::channel(16);
        self.shared.event_senders.lock().await.push(tx);
        self.connected.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    async fn send_audio(&mut self, audio: &[u8]) {
        if let Some(record) = &self.record {
            record.lock().await.audio_bytes += audio.len();
        }
    }

    async fn commit_audio(&mut self) {}

    async fn send_text(&mut self, text: &str) {
        if let Some(record) = &self.record {
            record.lock().await.texts.push(text.to_string());
        }
    }

    async fn cancel_response(&mut self) {}

    async fn send_tool_result(&mut self, call_id: &str, result: &Value) {
        if let Some(record) = &self.record {
            record
                .lock()
                .await
                .tool_results
                .push((call_id.to_string(), result.clone()));
        }
    }

    async fn disconnect(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

struct FakeFactory {
    shared: Arc<FakeShared>,
}

impl TransportFactory for FakeFactory {
    fn create(&self) -> Box<dyn RealtimeTransport> {
        Box::new(FakeTransport {
            shared: self.shared.clone(),
            record: None,
            connected: AtomicBool::new(false),
        })
    }
}

struct Harness {
    shared: Arc<FakeShared>,
    market: Arc<InMemoryMarketplace>,
    store: Arc<SessionStore>,
    shop: Shop,
    in_tx: mpsc::Sender<ClientFrame>,
    out_rx: mpsc::Receiver<OutboundFrame>,
}

impl Harness {
    async fn start(
        failures: Vec<bool>,
        caller: Option<Caller>,
        selection: AgentSelection,
    ) -> Self {
        let market = Arc::new(InMemoryMarketplace::new());
        let shop = market.seed_demo().await;
        let registry = Arc::new(ToolRegistry::new(market.clone() as Arc<dyn Marketplace>, 0.7));
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        let shared = FakeShared::new(failures);
        let factory = Arc::new(FakeFactory { shared: shared.clone() });

        let (in_tx, in_rx) = mpsc::channel(16);
        let (out_tx, out_rx) = mpsc::channel(64);
        tokio::spawn(Orchestrator::run(
            market.clone() as Arc<dyn Marketplace>,
            Arc::new(NullKnowledge),
            registry,
            store.clone(),
            factory,
            out_tx,
            caller,
            selection,
            in_rx,
        ));

        Self { shared, market, store, shop, in_tx, out_rx }
    }

    async fn next_frame(&mut self) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(2), self.out_rx.recv())
            .await
            .expect("timed out waiting for outbound frame")
            .expect("outbound channel closed");
        serde_json::to_value(&frame).unwrap()
    }

    /// Skip frames until one of the given type arrives.
    async fn frame_of_type(&mut self, frame_type: &str) -> Value {
        loop {
            let frame = self.next_frame().await;
            if frame["type"] == frame_type {
                return frame;
            }
        }
    }

    /// Consume connecting + connected and return the session id.
    async fn wait_connected(&mut self) -> Uuid {
        let frame = self.frame_of_type("status").await;
        assert_eq!(frame["status"], "connecting");
        let frame = self.frame_of_type("status").await;
        assert_eq!(frame["status"], "connected");
        Uuid::parse_str(frame["session_id"].as_str().unwrap()).unwrap()
    }

    async fn inject(&self, event: TransportEvent) {
        self.shared.current_events().await.send(event).await.unwrap();
    }

    async fn end(&mut self) {
        self.in_tx
            .send(ClientFrame::Text(r#"{"type":"end"}"#.to_string()))
            .await
            .unwrap();
        let frame = self.frame_of_type("status").await;
        assert_eq!(frame["status"], "ended");
    }
}

fn owner() -> Caller {
    Caller {
        id: Uuid::new_v4(),
        name: "Andy".to_string(),
        email: "andy@example.com".to_string(),
    }
}

#[tokio::test]
async fn master_search_answers_without_switching() {
    let mut h = Harness::start(vec![false], None, AgentSelection::Master).await;
    h.wait_connected().await;

    h.inject(TransportEvent::ToolCall {
        call_id: "c1".to_string(),
        name: "search_shops".to_string(),
        arguments: json!({ "query": "haircut" }),
    })
    .await;

    // The result goes back to the same transport; no switch happens
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.shared.connection_count().await, 1);
    let conn = h.shared.connection(0).await;
    let record = conn.lock().await;
    let (call_id, result) = &record.tool_results[0];
    assert_eq!(call_id, "c1");
    assert_eq!(result["success"], json!(true));
    assert!(result["count"].as_u64().unwrap() >= 1);
    drop(record);

    h.end().await;
}

#[tokio::test]
async fn routing_tool_switches_to_shop_agent() {
    let caller = owner();
    let mut h = Harness::start(vec![false, false], Some(caller.clone()), AgentSelection::Master).await;
    h.market.set_owner(caller.id, h.shop.id).await;
    let session_id = h.wait_connected().await;

    // Spoken name with "and" resolves to the "&" shop
    h.inject(TransportEvent::ToolCall {
        call_id: "c1".to_string(),
        name: "route_to_shop".to_string(),
        arguments: json!({ "shop_name": "Andy and Wendi" }),
    })
    .await;

    let frame = h.frame_of_type("agent_switch").await;
    assert_eq!(frame["from_agent"], "master");
    assert_eq!(frame["to_agent"], "shop");
    assert_eq!(frame["shop_name"], "Andy & Wendi");

    // The routing result never reached the first transport
    let first = h.shared.connection(0).await;
    assert!(first.lock().await.tool_results.is_empty());

    // The new session carries owner tools and the shop prompt
    assert_eq!(h.shared.connection_count().await, 2);
    let second = h.shared.connection(1).await;
    let record = second.lock().await;
    let config = record.config.as_ref().unwrap();
    assert!(config.instructions.contains("owner"));
    assert!(config.tools.iter().any(|t| t["name"] == "create_service"));
    // Greeting directive went to the new transport
    assert!(record.texts[0].contains("Welcome to Andy & Wendi!"));
    drop(record);

    // Owner can manage the shop through the new agent
    h.inject(TransportEvent::ToolCall {
        call_id: "c2".to_string(),
        name: "create_service".to_string(),
        arguments: json!({ "name": "Beard Trim", "price": 15.0 }),
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let record = second.lock().await;
    assert_eq!(record.tool_results[0].1["success"], json!(true));
    drop(record);

    h.end().await;

    // Same session row across the switch, now pointing at the shop
    let row = h.store.session(session_id).await.unwrap().unwrap();
    assert_eq!(row.agent_kind, "shop");
    assert_eq!(row.shop_id, Some(h.shop.id));
    let interactions = h.store.interactions(session_id).await.unwrap();
    assert!(interactions.iter().any(|i| i.kind == "agent_switch"));
}

#[tokio::test]
async fn unknown_shop_selection_falls_back_to_master() {
    let mut h = Harness::start(vec![false], None, AgentSelection::Shop(Uuid::new_v4())).await;
    h.wait_connected().await;

    let conn = h.shared.connection(0).await;
    let record = conn.lock().await;
    let config = record.config.as_ref().unwrap();
    assert!(config.instructions.contains("main assistant"));
    assert!(config.tools.iter().any(|t| t["name"] == "route_to_shop"));
    drop(record);

    h.end().await;
}

#[tokio::test]
async fn failed_shop_handshake_reverts_to_master() {
    // First connect (master) succeeds, the shop reconnect fails, the
    // recovery reconnect to master succeeds
    let mut h = Harness::start(vec![false, true, false], None, AgentSelection::Master).await;
    h.wait_connected().await;

    h.inject(TransportEvent::ToolCall {
        call_id: "c1".to_string(),
        name: "route_to_shop".to_string(),
        arguments: json!({ "shop_name": "Glow Studio" }),
    })
    .await;

    let frame = h.frame_of_type("agent_switch").await;
    assert_eq!(frame["to_agent"], "master");
    assert!(frame.get("shop_id").is_none());

    // The call keeps going on the recovered master connection
    assert_eq!(h.shared.connection_count().await, 2);
    h.inject(TransportEvent::ToolCall {
        call_id: "c2".to_string(),
        name: "search_shops".to_string(),
        arguments: json!({ "query": "" }),
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let conn = h.shared.connection(1).await;
    assert_eq!(conn.lock().await.tool_results[0].1["success"], json!(true));

    h.end().await;
}

#[tokio::test]
async fn denied_tool_returns_structured_failure() {
    let mut h = Harness::start(vec![false], None, AgentSelection::Master).await;
    let session_id = h.wait_connected().await;

    // Master may not book; the failure goes back to the model, not the user
    h.inject(TransportEvent::ToolCall {
        call_id: "c1".to_string(),
        name: "create_booking".to_string(),
        arguments: json!({ "service_name": "Signature Haircut" }),
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let conn = h.shared.connection(0).await;
    let record = conn.lock().await;
    let (_, result) = &record.tool_results[0];
    assert_eq!(result["success"], json!(false));
    assert!(result["error"].as_str().unwrap().contains("not available"));
    drop(record);

    h.end().await;

    let interactions = h.store.interactions(session_id).await.unwrap();
    let tool_row = interactions.iter().find(|i| i.kind == "tool_call").unwrap();
    assert_eq!(tool_row.tool_success, Some(false));
}

#[tokio::test]
async fn transcripts_are_relayed_and_logged() {
    let mut h = Harness::start(vec![false], None, AgentSelection::Master).await;
    let session_id = h.wait_connected().await;

    h.inject(TransportEvent::Transcript {
        role: SpeechRole::User,
        text: "find me a haircut".to_string(),
        tokens: None,
    })
    .await;
    let frame = h.frame_of_type("transcript").await;
    assert_eq!(frame["role"], "user");
    assert_eq!(frame["text"], "find me a haircut");

    h.inject(TransportEvent::Transcript {
        role: SpeechRole::Assistant,
        text: "I found two salons nearby.".to_string(),
        tokens: Some(120),
    })
    .await;
    let frame = h.frame_of_type("transcript").await;
    assert_eq!(frame["role"], "assistant");

    h.end().await;

    let row = h.store.session(session_id).await.unwrap().unwrap();
    assert_eq!(row.status, "ended");
    assert_eq!(row.total_tokens, 120);
    let interactions = h.store.interactions(session_id).await.unwrap();
    assert_eq!(interactions[0].kind, "user_speech");
    assert_eq!(interactions[1].kind, "assistant_speech");
}

#[tokio::test]
async fn remote_error_is_absorbed() {
    let mut h = Harness::start(vec![false], None, AgentSelection::Master).await;
    h.wait_connected().await;

    h.inject(TransportEvent::Error("rate limited".to_string())).await;
    let frame = h.frame_of_type("error").await;
    assert_eq!(frame["message"], "rate limited");

    // Session is still live afterwards
    h.inject(TransportEvent::Audio("AAAA".to_string())).await;
    let frame = h.frame_of_type("audio").await;
    assert_eq!(frame["data"], "AAAA");

    h.end().await;
}

#[tokio::test]
async fn client_audio_frames_reach_the_transport() {
    let mut h = Harness::start(vec![false], None, AgentSelection::Master).await;
    h.wait_connected().await;

    // "ABC" as base64, the JSON envelope a browser client sends
    h.in_tx
        .send(ClientFrame::Text(r#"{"type":"audio","data":"QUJD"}"#.to_string()))
        .await
        .unwrap();
    h.in_tx.send(ClientFrame::Binary(vec![0u8; 5])).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let conn = h.shared.connection(0).await;
    assert_eq!(conn.lock().await.audio_bytes, 8);

    h.end().await;
}

#[tokio::test]
async fn unreachable_shop_keeps_caller_with_current_agent() {
    let mut h = Harness::start(vec![false], None, AgentSelection::Master).await;
    h.wait_connected().await;

    // Glow Studio exists but its voice agent is switched off
    let glow = h
        .market
        .active_shops()
        .await
        .into_iter()
        .find(|s| s.name == "Glow Studio")
        .unwrap();
    let mut profile = h.market.agent_profile(glow.id).await.unwrap();
    profile.is_active = false;
    h.market.set_agent_profile(profile).await;

    h.inject(TransportEvent::ToolCall {
        call_id: "c1".to_string(),
        name: "route_to_shop".to_string(),
        arguments: json!({ "shop_name": "Glow Studio" }),
    })
    .await;

    // No switching notice went out; the caller hears they stay put
    let frame = h.next_frame().await;
    assert_eq!(frame["type"], "error");
    assert!(frame["message"].as_str().unwrap().contains("still with"));

    // The model got the structured failure on the original transport
    assert_eq!(h.shared.connection_count().await, 1);
    let conn = h.shared.connection(0).await;
    assert_eq!(conn.lock().await.tool_results[0].1["success"], json!(false));

    h.end().await;
}

#[tokio::test]
async fn round_trip_back_to_master_counts_no_shop_session() {
    let mut h = Harness::start(vec![false, false, false], None, AgentSelection::Master).await;
    h.wait_connected().await;

    h.inject(TransportEvent::ToolCall {
        call_id: "c1".to_string(),
        name: "route_to_shop".to_string(),
        arguments: json!({ "shop_name": "Glow Studio" }),
    })
    .await;
    h.frame_of_type("agent_switch").await;

    h.inject(TransportEvent::ToolCall {
        call_id: "c2".to_string(),
        name: "route_to_master".to_string(),
        arguments: json!({}),
    })
    .await;
    h.frame_of_type("agent_switch").await;
    h.end().await;

    // The session ended on the master agent; no shop gets credited
    for shop in h.market.active_shops().await {
        let profile = h.market.agent_profile(shop.id).await.unwrap();
        assert_eq!(profile.total_sessions, 0, "shop {}", shop.name);
    }
}

#[tokio::test]
async fn shop_session_bumps_profile_counter() {
    let mut h = Harness::start(vec![false, false], None, AgentSelection::Master).await;
    let shop_id = h.shop.id;
    h.wait_connected().await;
    h.inject(TransportEvent::ToolCall {
        call_id: "c1".to_string(),
        name: "route_to_shop".to_string(),
        arguments: json!({ "shop_name": "Glow Studio" }),
    })
    .await;
    h.frame_of_type("agent_switch").await;
    h.end().await;

    let glow = h
        .market
        .active_shops()
        .await
        .into_iter()
        .find(|s| s.name == "Glow Studio")
        .unwrap();
    let profile = h.market.agent_profile(glow.id).await.unwrap();
    assert_eq!(profile.total_sessions, 1);
    let untouched = h.market.agent_profile(shop_id).await.unwrap();
    assert_eq!(untouched.total_sessions, 0);
}
