//! Browser-facing WebSocket server
//!
//! Two upgrade endpoints feed the orchestrator: `/voice-ws` starts with the
//! master agent (or a shop via query hints), `/voice-ws/shop/{shop_id}` goes
//! straight to a shop agent. Each connection gets its own orchestrator; the
//! socket is split so outbound frames flow through a sender task while the
//! reader feeds the orchestrator's frame channel.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::marketplace::{KnowledgeIndex, Marketplace};
use crate::types::Caller;
use crate::voice::orchestrator::{
    AgentSelection, ClientFrame, Orchestrator, OutboundFrame, TransportFactory,
};
use crate::voice::session_log::SessionStore;
use crate::voice::tools::ToolRegistry;
use crate::voice::transport::{OpenAiRealtimeClient, RealtimeTransport};

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    pub market: Arc<dyn Marketplace>,
    pub knowledge: Arc<dyn KnowledgeIndex>,
    pub registry: Arc<ToolRegistry>,
    pub store: Arc<SessionStore>,
    pub factory: Arc<dyn TransportFactory>,
}

/// Default factory: one upstream realtime connection per agent session.
pub struct OpenAiTransportFactory {
    api_key: String,
    url: String,
    model: String,
}

impl OpenAiTransportFactory {
    pub fn new(api_key: String, url: String, model: String) -> Self {
        Self { api_key, url, model }
    }
}

impl TransportFactory for OpenAiTransportFactory {
    fn create(&self) -> Box<dyn RealtimeTransport> {
        Box::new(OpenAiRealtimeClient::new(
            self.api_key.clone(),
            self.url.clone(),
            self.model.clone(),
        ))
    }
}

/// Start the web server
pub async fn start(
    config: &Config,
    market: Arc<dyn Marketplace>,
    knowledge: Arc<dyn KnowledgeIndex>,
    store: Arc<SessionStore>,
) -> Result<()> {
    let api_key = config.openai.resolve_api_key()?;
    let registry = Arc::new(ToolRegistry::new(
        market.clone(),
        config.routing.token_match_ratio,
    ));
    let factory = Arc::new(OpenAiTransportFactory::new(
        api_key,
        config.openai.url.clone(),
        config.openai.model.clone(),
    ));
    let state = ServerState {
        market,
        knowledge,
        registry,
        store,
        factory,
    };

    let app = router(state);
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    info!("Voice server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind server address")?;
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/voice-ws", get(voice_ws_handler))
        .route("/voice-ws/shop/{shop_id}", get(shop_ws_handler))
        .route("/api/status", get(status_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct WsParams {
    /// "master" (default) or "shop"
    agent: Option<String>,
    shop_id: Option<Uuid>,
    caller_id: Option<Uuid>,
    caller_name: Option<String>,
    caller_email: Option<String>,
}

impl WsParams {
    fn caller(&self) -> Option<Caller> {
        self.caller_id.map(|id| Caller {
            id,
            name: self.caller_name.clone().unwrap_or_default(),
            email: self.caller_email.clone().unwrap_or_default(),
        })
    }

    fn selection(&self) -> AgentSelection {
        match (self.agent.as_deref(), self.shop_id) {
            (Some("shop"), Some(shop_id)) => AgentSelection::Shop(shop_id),
            _ => AgentSelection::Master,
        }
    }
}

async fn voice_ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<ServerState>,
) -> Response {
    let caller = params.caller();
    let selection = params.selection();
    ws.on_upgrade(move |socket| handle_voice_socket(socket, state, selection, caller))
}

async fn shop_ws_handler(
    ws: WebSocketUpgrade,
    Path(shop_id): Path<Uuid>,
    Query(params): Query<WsParams>,
    State(state): State<ServerState>,
) -> Response {
    let caller = params.caller();
    ws.on_upgrade(move |socket| {
        handle_voice_socket(socket, state, AgentSelection::Shop(shop_id), caller)
    })
}

async fn status_handler(State(state): State<ServerState>) -> Json<Value> {
    let active_shops = state.market.active_shops().await.len();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_shops": active_shops,
    }))
}

async fn handle_voice_socket(
    socket: WebSocket,
    state: ServerState,
    selection: AgentSelection,
    caller: Option<Caller>,
) {
    info!("Voice WebSocket connected");
    let (mut sink, mut stream) = socket.split();

    // Outbound frames serialize to JSON text on a dedicated sender task so
    // the orchestrator never blocks on the browser socket
    let (out_tx, mut out_rx) = mpsc::channel::<OutboundFrame>(64);
    let sender = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to serialize outbound frame: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let (in_tx, in_rx) = mpsc::channel::<ClientFrame>(64);
    let reader = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            let frame = match message {
                Ok(Message::Text(text)) => ClientFrame::Text(text.to_string()),
                Ok(Message::Binary(bytes)) => ClientFrame::Binary(bytes.to_vec()),
                Ok(Message::Close(_)) | Err(_) => ClientFrame::Closed,
                Ok(_) => continue,
            };
            let closed = matches!(frame, ClientFrame::Closed);
            if in_tx.send(frame).await.is_err() || closed {
                break;
            }
        }
        debug!("Client socket reader finished");
    });

    Orchestrator::run(
        state.market,
        state.knowledge,
        state.registry,
        state.store,
        state.factory,
        out_tx,
        caller,
        selection,
        in_rx,
    )
    .await;

    reader.abort();
    // Let queued frames drain before the sender task drops the sink
    let _ = sender.await;
    info!("Voice WebSocket closed");
}
