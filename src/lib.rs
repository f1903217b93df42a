//! Salon Voice - realtime voice agent backend for a salon marketplace
//!
//! Bridges a browser WebSocket to the OpenAI Realtime API and runs a
//! two-tier agent system on top of it:
//! - a marketplace-wide Master Agent for discovery and routing
//! - per-shop Shop Agents with role-gated tools for customers, owners,
//!   and staff
//!
//! Business data lives behind the [`marketplace::Marketplace`] trait; the
//! voice core orchestrates sessions, executes tools through it, and keeps an
//! append-only session log in SQLite.

pub mod types;
pub mod marketplace;
pub mod voice;
pub mod config;
pub mod server;
pub mod cli;

// Re-export the pieces most callers wire together
pub use marketplace::{KnowledgeIndex, Marketplace, NullKnowledge};
pub use voice::orchestrator::{AgentSelection, ClientFrame, Orchestrator, OutboundFrame, TransportFactory};
pub use voice::session_log::SessionStore;
pub use voice::tools::ToolRegistry;
