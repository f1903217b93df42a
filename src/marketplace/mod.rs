//! Marketplace collaborator boundary
//!
//! The voice core never implements business logic. Shops, services, staff,
//! bookings and the operations behind every tool live on the other side of
//! the [`Marketplace`] trait; the core only routes calls through it and logs
//! the results. [`memory::InMemoryMarketplace`] is the reference
//! implementation used by tests, the demo seeder, and default server wiring.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{Caller, UserRole};

/// A salon/shop record, read-only from the voice core's perspective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shop {
    pub id: Uuid,
    pub name: String,
    pub city: String,
    pub address: String,
    pub phone: String,
    pub average_rating: f32,
    pub total_reviews: u32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub shop_id: Uuid,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub duration_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: Uuid,
    pub shop_id: Uuid,
    /// Linked account, when the staff member can sign in
    pub user_id: Option<Uuid>,
    pub name: String,
    pub specialties: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub shop_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub service_id: Uuid,
    pub staff_id: Option<Uuid>,
    pub starts_at: DateTime<Utc>,
    /// pending | confirmed | completed | cancelled
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holiday {
    pub shop_id: Uuid,
    pub date: NaiveDate,
    pub name: String,
}

/// Per-shop voice agent configuration, authored in the shop-owner settings UI.
/// The voice core reads it when building a Shop Agent and never mutates it
/// (the session counter is bumped through [`Marketplace::record_shop_session`],
/// which the marketplace owns).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub shop_id: Uuid,
    pub is_active: bool,
    pub voice: String,
    pub custom_greeting: Option<String>,
    pub custom_instructions: Option<String>,
    pub total_sessions: u64,
}

impl AgentProfile {
    pub fn new(shop_id: Uuid) -> Self {
        Self {
            shop_id,
            is_active: true,
            voice: "alloy".to_string(),
            custom_greeting: None,
            custom_instructions: None,
            total_sessions: 0,
        }
    }
}

/// Shop relationships of an authenticated caller, used for role resolution.
#[derive(Debug, Clone, Default)]
pub struct CallerRelations {
    pub owned_shops: Vec<Uuid>,
    pub staff_shops: Vec<Uuid>,
}

/// Read access to marketplace records plus the business operations backing
/// every tool. Operations return a structured `{success, ...}` JSON value;
/// errors raised inside the marketplace are propagated and converted into
/// structured failures by the tool registry.
#[async_trait]
pub trait Marketplace: Send + Sync {
    async fn shop(&self, id: Uuid) -> Option<Shop>;

    async fn active_shops(&self) -> Vec<Shop>;

    async fn agent_profile(&self, shop_id: Uuid) -> Option<AgentProfile>;

    async fn relations(&self, caller: &Caller) -> CallerRelations;

    /// Role-specific caller context injected into prompts: upcoming bookings,
    /// pending-confirmation counts, today's schedule, depending on the role.
    async fn caller_context(&self, caller: &Caller, role: UserRole) -> Value;

    /// Execute a named business operation on behalf of the caller.
    async fn execute(
        &self,
        operation: &str,
        caller: Option<&Caller>,
        role: UserRole,
        args: Value,
    ) -> anyhow::Result<Value>;

    /// Bump the aggregate session counter on a shop's agent profile.
    async fn record_shop_session(&self, shop_id: Uuid);
}

/// Semantic-search lookup over shop/service content. Consumed by agents to
/// enrich prompts; specified only as a query/response contract.
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    async fn query(&self, text: &str, top_k: usize) -> Option<String>;
}

/// Default knowledge index that retrieves nothing.
pub struct NullKnowledge;

#[async_trait]
impl KnowledgeIndex for NullKnowledge {
    async fn query(&self, _text: &str, _top_k: usize) -> Option<String> {
        None
    }
}
