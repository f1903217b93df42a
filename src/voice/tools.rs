//! Role-gated tool registry for the voice agents
//!
//! The registry owns the catalogue of actions the remote model may invoke,
//! converts them to the Realtime wire format, enforces per-role visibility,
//! and routes execution to the marketplace boundary. It is constructed once
//! at startup and injected wherever needed; there is no global tool table.
//!
//! Two tools are special: `route_to_shop` and `route_to_master` only signal
//! switch intent. The orchestrator performs the actual transport swap.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::warn;

use crate::marketplace::{Marketplace, Shop};
use crate::types::{AgentKind, Caller, UserRole};

use super::routing;

/// A tool the remote model can call: name, model-facing description,
/// JSON-schema parameters.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

impl ToolSpec {
    /// Realtime API tool format: name/description/parameters at the top level,
    /// unlike Chat Completions which nests them under `function`.
    pub fn to_realtime_schema(&self) -> Value {
        json!({
            "type": "function",
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters,
        })
    }
}

/// Tools visible to the master agent: discovery plus routing, nothing mutating.
pub const MASTER_TOOLS: &[&str] = &[
    "search_shops",
    "get_shop_info",
    "get_shop_services",
    "get_shop_deals",
    "get_shop_staff",
    "get_shop_hours",
    "get_shop_holidays",
    "route_to_shop",
];

pub const SHOP_CUSTOMER_TOOLS: &[&str] = &[
    "get_shop_info",
    "get_shop_services",
    "get_shop_deals",
    "get_shop_staff",
    "get_shop_hours",
    "get_shop_holidays",
    "get_available_slots",
    "get_deal_slots",
    "create_booking",
    "create_deal_booking",
    "get_my_bookings",
    "cancel_booking",
    "reschedule_my_booking",
    "route_to_master",
];

pub const SHOP_CLIENT_TOOLS: &[&str] = &[
    "get_shop_info",
    "get_shop_services",
    "get_shop_deals",
    "get_shop_hours",
    "get_shop_holidays",
    "get_available_slots",
    "get_deal_slots",
    "get_my_shops",
    "get_my_staff",
    "get_shop_staff",
    "get_shop_bookings",
    "confirm_booking",
    "cancel_booking",
    "reschedule_booking",
    "create_service",
    "update_service",
    "create_staff",
    "update_staff",
    "assign_staff_to_service",
    "create_holiday",
    "delete_holiday",
    "update_shop_hours",
    "get_customer_history",
    "route_to_master",
];

pub const SHOP_STAFF_TOOLS: &[&str] = &[
    "get_shop_info",
    "get_shop_services",
    "get_shop_deals",
    "get_shop_hours",
    "get_my_schedule",
    "get_my_bookings",
    "get_my_services",
    "get_today_summary",
    "complete_booking",
    "get_customer_history",
    "route_to_master",
];

/// Tools that operate on the active shop; the registry injects `shop_id`
/// so the model never has to supply it.
const SHOP_SCOPED: &[&str] = &[
    "get_shop_info",
    "get_shop_services",
    "get_shop_deals",
    "get_shop_staff",
    "get_my_staff",
    "get_shop_hours",
    "get_shop_holidays",
    "get_available_slots",
    "get_deal_slots",
    "get_shop_bookings",
    "get_my_services",
    "create_booking",
    "create_deal_booking",
    "create_holiday",
    "delete_holiday",
    "update_shop_hours",
    "create_service",
    "update_service",
    "create_staff",
    "update_staff",
];

pub fn allowed_names(kind: AgentKind, role: UserRole) -> &'static [&'static str] {
    match kind {
        AgentKind::Master => MASTER_TOOLS,
        AgentKind::Shop => match role {
            UserRole::Client => SHOP_CLIENT_TOOLS,
            UserRole::Staff => SHOP_STAFF_TOOLS,
            UserRole::Customer | UserRole::Guest => SHOP_CUSTOMER_TOOLS,
        },
    }
}

pub struct ToolRegistry {
    market: Arc<dyn Marketplace>,
    specs: Vec<ToolSpec>,
    token_match_ratio: f64,
}

impl ToolRegistry {
    pub fn new(market: Arc<dyn Marketplace>, token_match_ratio: f64) -> Self {
        Self {
            market,
            specs: catalogue(),
            token_match_ratio,
        }
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Tool schemas visible to the given agent kind and role, in the
    /// Realtime wire format.
    pub fn tools_for(&self, kind: AgentKind, role: UserRole) -> Vec<Value> {
        allowed_names(kind, role)
            .iter()
            .filter_map(|name| self.spec(name))
            .map(ToolSpec::to_realtime_schema)
            .collect()
    }

    /// Execute a tool on behalf of the caller. Never returns an error: any
    /// failure, including a rejected role check or a panic-free marketplace
    /// error, comes back as `{success: false, error}`.
    pub async fn execute(
        &self,
        name: &str,
        mut args: Value,
        caller: Option<&Caller>,
        role: UserRole,
        kind: AgentKind,
        shop: Option<&Shop>,
    ) -> Value {
        if !allowed_names(kind, role).contains(&name) {
            return json!({
                "success": false,
                "error": format!("Tool '{}' not available for role '{}'", name, role),
            });
        }

        match name {
            "route_to_shop" => self.route_to_shop(&args).await,
            "route_to_master" => json!({
                "success": true,
                "action": "route_to_master",
                "message": "Connecting you back to the main assistant...",
            }),
            _ => {
                if let (Some(shop), Some(map)) = (shop, args.as_object_mut()) {
                    if SHOP_SCOPED.contains(&name) && !map.contains_key("shop_id") {
                        map.insert("shop_id".to_string(), json!(shop.id));
                    }
                }
                match self.market.execute(name, caller, role, args).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("Tool '{}' failed: {}", name, e);
                        json!({ "success": false, "error": e.to_string() })
                    }
                }
            }
        }
    }

    async fn route_to_shop(&self, args: &Value) -> Value {
        let shops = self.market.active_shops().await;

        // An explicit id short-circuits name matching
        if let Some(id) = args
            .get("shop_id")
            .and_then(|v| v.as_str())
            .and_then(|s| uuid::Uuid::parse_str(s).ok())
        {
            if let Some(shop) = shops.iter().find(|s| s.id == id) {
                return self.switch_directive(shop).await;
            }
        }

        let query = args.get("shop_name").and_then(|v| v.as_str()).unwrap_or("").trim();
        match routing::resolve_shop(query, &shops, self.token_match_ratio) {
            Some(shop) => self.switch_directive(shop).await,
            None => {
                let suggestions = routing::suggestions(&shops);
                let names: Vec<&str> = suggestions
                    .iter()
                    .take(3)
                    .filter_map(|s| s["name"].as_str())
                    .collect();
                json!({
                    "success": false,
                    "error": format!("No shop found matching '{query}'"),
                    "suggestions": suggestions,
                    "message": format!(
                        "I couldn't find a shop named '{}'. I can see shops like {}.",
                        query,
                        names.join(", ")
                    ),
                })
            }
        }
    }

    async fn switch_directive(&self, shop: &Shop) -> Value {
        let has_voice_agent = self
            .market
            .agent_profile(shop.id)
            .await
            .map(|p| p.is_active)
            .unwrap_or(false);
        json!({
            "success": true,
            "action": "route_to_shop",
            "shop_id": shop.id,
            "shop_name": shop.name,
            "shop_city": shop.city,
            "has_voice_agent": has_voice_agent,
            "message": format!("Connecting you to {}...", shop.name),
        })
    }
}

fn string_prop(description: &str) -> Value {
    json!({ "type": "string", "description": description })
}

fn catalogue() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "search_shops",
            description: "Search for salons by name, city, or service type. \
                Use whenever the caller asks to find salons or beauty shops.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": string_prop("Shop name, service type (e.g. 'haircut', 'nails'), or city"),
                    "city": string_prop("Optional city filter"),
                }
            }),
        },
        ToolSpec {
            name: "get_shop_info",
            description: "Get a shop's address, phone, rating, and review count.",
            parameters: json!({
                "type": "object",
                "properties": { "shop_id": string_prop("Shop UUID") }
            }),
        },
        ToolSpec {
            name: "get_shop_services",
            description: "List a shop's services with prices and durations.",
            parameters: json!({
                "type": "object",
                "properties": { "shop_id": string_prop("Shop UUID") }
            }),
        },
        ToolSpec {
            name: "get_shop_staff",
            description: "List a shop's staff members and their specialties.",
            parameters: json!({
                "type": "object",
                "properties": { "shop_id": string_prop("Shop UUID") }
            }),
        },
        ToolSpec {
            name: "get_shop_hours",
            description: "Get a shop's opening hours for each day of the week.",
            parameters: json!({
                "type": "object",
                "properties": { "shop_id": string_prop("Shop UUID") }
            }),
        },
        ToolSpec {
            name: "get_shop_holidays",
            description: "List upcoming holidays when the shop is closed.",
            parameters: json!({
                "type": "object",
                "properties": { "shop_id": string_prop("Shop UUID") }
            }),
        },
        ToolSpec {
            name: "get_shop_deals",
            description: "List a shop's current deals and discounts.",
            parameters: json!({
                "type": "object",
                "properties": { "shop_id": string_prop("Shop UUID") }
            }),
        },
        ToolSpec {
            name: "get_deal_slots",
            description: "List available time slots for a deal.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "deal_id": string_prop("Deal UUID"),
                }
            }),
        },
        ToolSpec {
            name: "get_available_slots",
            description: "Get available booking time slots for a service.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "service_name": string_prop("Service name"),
                    "date": string_prop("Preferred date, YYYY-MM-DD"),
                }
            }),
        },
        ToolSpec {
            name: "create_booking",
            description: "Create a booking for the caller at this shop. \
                Confirm service and time with the caller before booking.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "service_name": string_prop("Name of the service to book"),
                    "service_id": string_prop("Optional service UUID if known"),
                    "starts_at": string_prop("Start time, RFC3339"),
                },
                "required": ["service_name"]
            }),
        },
        ToolSpec {
            name: "create_deal_booking",
            description: "Book a deal for the caller at this shop.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "deal_id": string_prop("Deal UUID"),
                    "starts_at": string_prop("Start time, RFC3339"),
                },
                "required": ["deal_id"]
            }),
        },
        ToolSpec {
            name: "get_my_bookings",
            description: "List the caller's own bookings.",
            parameters: json!({ "type": "object", "properties": {} }),
        },
        ToolSpec {
            name: "cancel_booking",
            description: "Cancel a booking by id.",
            parameters: json!({
                "type": "object",
                "properties": { "booking_id": string_prop("Booking UUID") },
                "required": ["booking_id"]
            }),
        },
        ToolSpec {
            name: "reschedule_my_booking",
            description: "Move one of the caller's bookings to a new time.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "booking_id": string_prop("Booking UUID"),
                    "starts_at": string_prop("New start time, RFC3339"),
                },
                "required": ["booking_id", "starts_at"]
            }),
        },
        ToolSpec {
            name: "get_my_shops",
            description: "List the shops owned by the caller.",
            parameters: json!({ "type": "object", "properties": {} }),
        },
        ToolSpec {
            name: "get_my_staff",
            description: "List staff working at the caller's shop.",
            parameters: json!({
                "type": "object",
                "properties": { "shop_id": string_prop("Shop UUID") }
            }),
        },
        ToolSpec {
            name: "get_shop_bookings",
            description: "List all bookings at this shop, including pending ones.",
            parameters: json!({
                "type": "object",
                "properties": { "status": string_prop("Optional status filter") }
            }),
        },
        ToolSpec {
            name: "confirm_booking",
            description: "Confirm a pending booking.",
            parameters: json!({
                "type": "object",
                "properties": { "booking_id": string_prop("Booking UUID") },
                "required": ["booking_id"]
            }),
        },
        ToolSpec {
            name: "reschedule_booking",
            description: "Move any booking at this shop to a new time.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "booking_id": string_prop("Booking UUID"),
                    "starts_at": string_prop("New start time, RFC3339"),
                },
                "required": ["booking_id", "starts_at"]
            }),
        },
        ToolSpec {
            name: "create_service",
            description: "Add a new service to this shop.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "name": string_prop("Service name"),
                    "category": string_prop("Category, e.g. 'hair', 'nails'"),
                    "price": { "type": "number", "description": "Price" },
                    "duration_minutes": { "type": "integer", "description": "Duration in minutes" },
                },
                "required": ["name"]
            }),
        },
        ToolSpec {
            name: "update_service",
            description: "Update an existing service's name or price.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "service_id": string_prop("Service UUID"),
                    "name": string_prop("New name"),
                    "price": { "type": "number", "description": "New price" },
                },
                "required": ["service_id"]
            }),
        },
        ToolSpec {
            name: "create_staff",
            description: "Add a staff member to this shop.",
            parameters: json!({
                "type": "object",
                "properties": { "name": string_prop("Staff member's name") },
                "required": ["name"]
            }),
        },
        ToolSpec {
            name: "update_staff",
            description: "Update a staff member's details.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "staff_id": string_prop("Staff UUID"),
                    "name": string_prop("New name"),
                },
                "required": ["staff_id"]
            }),
        },
        ToolSpec {
            name: "assign_staff_to_service",
            description: "Assign a staff member to perform a service.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "staff_id": string_prop("Staff UUID"),
                    "service_id": string_prop("Service UUID"),
                },
                "required": ["staff_id", "service_id"]
            }),
        },
        ToolSpec {
            name: "create_holiday",
            description: "Close the shop for a holiday on a given date.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "date": string_prop("Date, YYYY-MM-DD"),
                    "name": string_prop("Holiday name"),
                },
                "required": ["date"]
            }),
        },
        ToolSpec {
            name: "delete_holiday",
            description: "Remove a previously created holiday.",
            parameters: json!({
                "type": "object",
                "properties": { "date": string_prop("Date, YYYY-MM-DD") },
                "required": ["date"]
            }),
        },
        ToolSpec {
            name: "update_shop_hours",
            description: "Change the shop's opening hours for a weekday.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "day": string_prop("Weekday name, e.g. 'monday'"),
                    "hours": string_prop("Hours like '09:00-18:00', or 'closed'"),
                },
                "required": ["day", "hours"]
            }),
        },
        ToolSpec {
            name: "get_customer_history",
            description: "Look up a customer's booking history at this shop.",
            parameters: json!({
                "type": "object",
                "properties": { "customer_id": string_prop("Customer UUID") },
                "required": ["customer_id"]
            }),
        },
        ToolSpec {
            name: "get_my_schedule",
            description: "Get the caller's upcoming work schedule.",
            parameters: json!({ "type": "object", "properties": {} }),
        },
        ToolSpec {
            name: "get_my_services",
            description: "List the services the caller performs.",
            parameters: json!({ "type": "object", "properties": {} }),
        },
        ToolSpec {
            name: "get_today_summary",
            description: "Summarize the caller's bookings for today.",
            parameters: json!({ "type": "object", "properties": {} }),
        },
        ToolSpec {
            name: "complete_booking",
            description: "Mark one of the caller's assigned bookings as completed.",
            parameters: json!({
                "type": "object",
                "properties": { "booking_id": string_prop("Booking UUID") },
                "required": ["booking_id"]
            }),
        },
        ToolSpec {
            name: "route_to_shop",
            description: "Transfer this call to a specific shop's voice agent. \
                Use when the caller wants to book, manage bookings, or get \
                personalized help from a shop. After routing, the shop's agent \
                handles the conversation with role-specific capabilities.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "shop_name": string_prop("Name of the shop to connect to (partial match supported)"),
                    "shop_id": string_prop("Optional shop UUID if known"),
                },
                "required": ["shop_name"]
            }),
        },
        ToolSpec {
            name: "route_to_master",
            description: "Transfer the call back to the main assistant. Use when \
                the caller wants to find a different shop, is done here, or \
                explicitly asks to go back.",
            parameters: json!({
                "type": "object",
                "properties": { "reason": string_prop("Optional reason for switching back") }
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marketplace::memory::InMemoryMarketplace;

    fn registry(market: InMemoryMarketplace) -> ToolRegistry {
        ToolRegistry::new(Arc::new(market), routing::DEFAULT_TOKEN_MATCH_RATIO)
    }

    #[test]
    fn every_allowed_name_has_a_spec() {
        let specs = catalogue();
        for set in [MASTER_TOOLS, SHOP_CUSTOMER_TOOLS, SHOP_CLIENT_TOOLS, SHOP_STAFF_TOOLS] {
            for name in set {
                assert!(specs.iter().any(|s| s.name == *name), "missing spec for {name}");
            }
        }
    }

    #[tokio::test]
    async fn tools_for_hides_out_of_role_tools() {
        let reg = registry(InMemoryMarketplace::new());
        let master = reg.tools_for(AgentKind::Master, UserRole::Guest);
        assert!(master.iter().any(|t| t["name"] == "route_to_shop"));
        assert!(!master.iter().any(|t| t["name"] == "create_booking"));
        assert!(!master.iter().any(|t| t["name"] == "create_service"));

        let customer = reg.tools_for(AgentKind::Shop, UserRole::Customer);
        assert!(customer.iter().any(|t| t["name"] == "create_booking"));
        assert!(!customer.iter().any(|t| t["name"] == "create_service"));

        let owner = reg.tools_for(AgentKind::Shop, UserRole::Client);
        assert!(owner.iter().any(|t| t["name"] == "create_service"));
    }

    #[tokio::test]
    async fn execute_rejects_out_of_role_invocation() {
        let market = InMemoryMarketplace::new();
        market.seed_demo().await;
        let reg = registry(market);
        let result = reg
            .execute(
                "create_service",
                json!({ "name": "Perm" }),
                None,
                UserRole::Customer,
                AgentKind::Shop,
                None,
            )
            .await;
        assert_eq!(result["success"], json!(false));
        let error = result["error"].as_str().unwrap();
        assert!(error.contains("not available for role"));
    }

    #[tokio::test]
    async fn execute_injects_shop_context() {
        let market = InMemoryMarketplace::new();
        let shop = market.seed_demo().await;
        let reg = registry(market);
        // No shop_id in args; the registry supplies it from the active shop
        let result = reg
            .execute(
                "get_shop_services",
                json!({}),
                None,
                UserRole::Customer,
                AgentKind::Shop,
                Some(&shop),
            )
            .await;
        assert_eq!(result["success"], json!(true));
        assert!(result["count"].as_u64().unwrap() >= 2);
    }

    #[tokio::test]
    async fn route_to_shop_resolves_separator_variants() {
        let market = InMemoryMarketplace::new();
        market.seed_demo().await;
        let reg = registry(market);
        let result = reg
            .execute(
                "route_to_shop",
                json!({ "shop_name": "Andy and Wendi" }),
                None,
                UserRole::Guest,
                AgentKind::Master,
                None,
            )
            .await;
        assert_eq!(result["success"], json!(true));
        assert_eq!(result["action"], json!("route_to_shop"));
        assert_eq!(result["shop_name"], json!("Andy & Wendi"));
    }

    #[tokio::test]
    async fn route_to_shop_unknown_name_returns_suggestions() {
        let market = InMemoryMarketplace::new();
        market.seed_demo().await;
        let reg = registry(market);
        let result = reg
            .execute(
                "route_to_shop",
                json!({ "shop_name": "Nonexistent Palace" }),
                None,
                UserRole::Guest,
                AgentKind::Master,
                None,
            )
            .await;
        assert_eq!(result["success"], json!(false));
        let suggestions = result["suggestions"].as_array().unwrap();
        assert!(!suggestions.is_empty() && suggestions.len() <= 5);
    }
}
