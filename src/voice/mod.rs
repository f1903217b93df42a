//! Voice core: realtime transport, agents, routing, and session logging
//!
//! The pipeline per connected client: the server hands the orchestrator a
//! frame stream, the orchestrator drives a [`transport::RealtimeTransport`]
//! configured by the active [`agents::VoiceAgent`], tool calls go through
//! [`tools::ToolRegistry`] into the marketplace, and everything that happened
//! lands append-only in [`session_log::SessionStore`].

pub mod agents;
pub mod orchestrator;
pub mod prompts;
pub mod routing;
pub mod session_log;
pub mod tools;
pub mod transport;
