//! Shared types used across modules
//!
//! This module contains types that are used by multiple modules
//! to avoid circular dependencies.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which agent is currently driving a session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Master,
    Shop,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Master => "master",
            AgentKind::Shop => "shop",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller's effective role relative to the active shop (or the platform)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Customer,
    /// Shop owner
    Client,
    Staff,
    Guest,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Customer => "customer",
            UserRole::Client => "client",
            UserRole::Staff => "staff",
            UserRole::Guest => "guest",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "customer" => Some(UserRole::Customer),
            "client" => Some(UserRole::Client),
            "staff" => Some(UserRole::Staff),
            "guest" => Some(UserRole::Guest),
            _ => None,
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a voice session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Ended,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
            SessionStatus::Error => "error",
        }
    }
}

/// Kind of a logged interaction within a session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    UserSpeech,
    AssistantSpeech,
    ToolCall,
    AgentSwitch,
    Error,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::UserSpeech => "user_speech",
            InteractionKind::AssistantSpeech => "assistant_speech",
            InteractionKind::ToolCall => "tool_call",
            InteractionKind::AgentSwitch => "agent_switch",
            InteractionKind::Error => "error",
        }
    }
}

/// Speech turn attribution on the transcript path
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpeechRole {
    User,
    Assistant,
}

impl SpeechRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeechRole::User => "user",
            SpeechRole::Assistant => "assistant",
        }
    }
}

/// Authenticated caller identity. Sessions from guests carry `None` instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Caller {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trip() {
        for role in [UserRole::Customer, UserRole::Client, UserRole::Staff, UserRole::Guest] {
            assert_eq!(UserRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(UserRole::parse("owner"), None);
    }

    #[test]
    fn agent_kind_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&AgentKind::Master).unwrap(), "\"master\"");
        assert_eq!(serde_json::to_string(&AgentKind::Shop).unwrap(), "\"shop\"");
    }
}
