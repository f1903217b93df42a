//! Master and shop voice agents
//!
//! An agent bundles everything a realtime session needs: the system prompt,
//! the role-gated tool schemas, the voice, the greeting, and tool execution.
//! The orchestrator treats both kinds uniformly through [`VoiceAgent`] and
//! swaps one for the other on a routing directive.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::marketplace::{AgentProfile, KnowledgeIndex, Marketplace, Shop};
use crate::types::{AgentKind, Caller, SpeechRole, UserRole};

use super::prompts;
use super::tools::ToolRegistry;

const HISTORY_KEEP: usize = 20;
const HISTORY_RENDER: usize = 10;

/// Bounded transcript history for the active agent. It is reset on an agent
/// switch; the interaction log is the durable record.
#[derive(Debug, Default)]
pub struct History {
    turns: VecDeque<(SpeechRole, String)>,
}

impl History {
    pub fn push(&mut self, role: SpeechRole, text: &str) {
        if self.turns.len() == HISTORY_KEEP {
            self.turns.pop_front();
        }
        self.turns.push_back((role, text.to_string()));
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Render the most recent turns as a prompt suffix.
    pub fn render(&self) -> String {
        if self.turns.is_empty() {
            return String::new();
        }
        let mut out = String::from("\n\nRecent conversation:\n");
        let skip = self.turns.len().saturating_sub(HISTORY_RENDER);
        for (role, text) in self.turns.iter().skip(skip) {
            let speaker = match role {
                SpeechRole::User => "Caller",
                SpeechRole::Assistant => "You",
            };
            out.push_str(speaker);
            out.push_str(": ");
            out.push_str(text);
            out.push('\n');
        }
        out
    }
}

#[async_trait]
pub trait VoiceAgent: Send + Sync {
    fn kind(&self) -> AgentKind;
    fn role(&self) -> UserRole;
    fn shop(&self) -> Option<&Shop>;
    fn voice(&self) -> &str;
    fn greeting(&self) -> &str;
    fn system_prompt(&self) -> &str;
    fn tool_schemas(&self) -> Vec<Value>;
    async fn execute_tool(&self, name: &str, args: Value) -> Value;
}

/// Marketplace-wide discovery agent. Read-only tools plus `route_to_shop`.
pub struct MasterAgent {
    registry: Arc<ToolRegistry>,
    caller: Option<Caller>,
    role: UserRole,
    prompt: String,
}

impl MasterAgent {
    pub async fn create(
        registry: Arc<ToolRegistry>,
        market: Arc<dyn Marketplace>,
        caller: Option<Caller>,
    ) -> Self {
        let shop_count = market.active_shops().await.len();
        let role = if caller.is_some() { UserRole::Customer } else { UserRole::Guest };
        let mut prompt = prompts::master_prompt(shop_count);
        if let Some(c) = &caller {
            let context = market.caller_context(c, role).await;
            if !context.is_null() {
                prompt.push_str("\n\nCaller context:\n");
                prompt.push_str(&context.to_string());
            }
        }
        Self { registry, caller, role, prompt }
    }
}

#[async_trait]
impl VoiceAgent for MasterAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Master
    }

    fn role(&self) -> UserRole {
        self.role
    }

    fn shop(&self) -> Option<&Shop> {
        None
    }

    fn voice(&self) -> &str {
        "alloy"
    }

    fn greeting(&self) -> &str {
        prompts::MASTER_GREETING
    }

    fn system_prompt(&self) -> &str {
        &self.prompt
    }

    fn tool_schemas(&self) -> Vec<Value> {
        self.registry.tools_for(AgentKind::Master, self.role)
    }

    async fn execute_tool(&self, name: &str, args: Value) -> Value {
        self.registry
            .execute(name, args, self.caller.as_ref(), self.role, AgentKind::Master, None)
            .await
    }
}

/// Per-shop agent. The caller's relationship to the shop decides the role and
/// therefore the tool set; the shop's agent profile decides voice, greeting,
/// and extra instructions.
pub struct ShopAgent {
    registry: Arc<ToolRegistry>,
    caller: Option<Caller>,
    role: UserRole,
    shop: Shop,
    profile: AgentProfile,
    prompt: String,
    greeting: String,
}

impl ShopAgent {
    pub async fn create(
        registry: Arc<ToolRegistry>,
        market: Arc<dyn Marketplace>,
        knowledge: Arc<dyn KnowledgeIndex>,
        shop_id: uuid::Uuid,
        caller: Option<Caller>,
    ) -> Result<Self> {
        let shop = market
            .shop(shop_id)
            .await
            .with_context(|| format!("shop {shop_id} not found"))?;
        if !shop.is_active {
            bail!("shop '{}' is not active", shop.name);
        }
        let profile = market
            .agent_profile(shop_id)
            .await
            .with_context(|| format!("shop '{}' has no agent profile", shop.name))?;
        if !profile.is_active {
            bail!("voice agent for '{}' is disabled", shop.name);
        }

        let role = match &caller {
            Some(c) => {
                let relations = market.relations(c).await;
                if relations.owned_shops.contains(&shop_id) {
                    UserRole::Client
                } else if relations.staff_shops.contains(&shop_id) {
                    UserRole::Staff
                } else {
                    UserRole::Customer
                }
            }
            None => UserRole::Guest,
        };
        debug!(shop = %shop.name, role = %role, "shop agent role resolved");

        let mut prompt = prompts::shop_prompt(&shop, role, profile.custom_instructions.as_deref());
        if let Some(c) = &caller {
            let context = market.caller_context(c, role).await;
            if !context.is_null() {
                prompt.push_str("\n\nCaller context:\n");
                prompt.push_str(&context.to_string());
            }
        }
        if let Some(snippet) = knowledge.query(&shop.name, 3).await {
            prompt.push_str("\n\nShop knowledge:\n");
            prompt.push_str(&snippet);
        }

        let greeting = profile
            .custom_greeting
            .clone()
            .filter(|g| !g.trim().is_empty())
            .unwrap_or_else(|| prompts::default_greeting(&shop.name));

        Ok(Self {
            registry,
            caller,
            role,
            shop,
            profile,
            prompt,
            greeting,
        })
    }
}

#[async_trait]
impl VoiceAgent for ShopAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Shop
    }

    fn role(&self) -> UserRole {
        self.role
    }

    fn shop(&self) -> Option<&Shop> {
        Some(&self.shop)
    }

    fn voice(&self) -> &str {
        &self.profile.voice
    }

    fn greeting(&self) -> &str {
        &self.greeting
    }

    fn system_prompt(&self) -> &str {
        &self.prompt
    }

    fn tool_schemas(&self) -> Vec<Value> {
        self.registry.tools_for(AgentKind::Shop, self.role)
    }

    async fn execute_tool(&self, name: &str, args: Value) -> Value {
        self.registry
            .execute(
                name,
                args,
                self.caller.as_ref(),
                self.role,
                AgentKind::Shop,
                Some(&self.shop),
            )
            .await
    }
}
