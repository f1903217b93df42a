//! In-memory marketplace implementation
//!
//! Reference implementation of the [`Marketplace`] boundary: plain tables
//! behind an `RwLock`, with just enough business behavior for the voice core's
//! tests, the demo seeder, and local development. Production deployments wire
//! the trait to the platform's REST/DB services instead.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::types::{Caller, UserRole};

use super::{AgentProfile, Booking, CallerRelations, Holiday, Marketplace, Service, Shop, StaffMember};

#[derive(Debug, Clone, Serialize)]
pub struct Deal {
    pub id: Uuid,
    pub shop_id: Uuid,
    pub title: String,
    pub service_id: Uuid,
    pub discount_percent: u32,
}

#[derive(Default)]
struct Tables {
    shops: Vec<Shop>,
    services: Vec<Service>,
    staff: Vec<StaffMember>,
    bookings: Vec<Booking>,
    holidays: Vec<Holiday>,
    deals: Vec<Deal>,
    /// weekday name -> "09:00-18:00" or "closed", per shop
    hours: HashMap<Uuid, Vec<(String, String)>>,
    profiles: HashMap<Uuid, AgentProfile>,
    /// caller id -> owned shop ids
    owners: HashMap<Uuid, Vec<Uuid>>,
}

#[derive(Clone, Default)]
pub struct InMemoryMarketplace {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryMarketplace {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_shop(&self, shop: Shop) {
        let mut t = self.tables.write().await;
        // Every shop gets an agent profile, like the auto-create signal upstream
        t.profiles.entry(shop.id).or_insert_with(|| AgentProfile::new(shop.id));
        t.hours.entry(shop.id).or_insert_with(default_hours);
        t.shops.push(shop);
    }

    pub async fn add_service(&self, service: Service) {
        self.tables.write().await.services.push(service);
    }

    pub async fn add_staff(&self, member: StaffMember) {
        self.tables.write().await.staff.push(member);
    }

    pub async fn add_booking(&self, booking: Booking) {
        self.tables.write().await.bookings.push(booking);
    }

    pub async fn add_deal(&self, deal: Deal) {
        self.tables.write().await.deals.push(deal);
    }

    pub async fn set_owner(&self, caller_id: Uuid, shop_id: Uuid) {
        self.tables.write().await.owners.entry(caller_id).or_default().push(shop_id);
    }

    pub async fn set_agent_profile(&self, profile: AgentProfile) {
        self.tables.write().await.profiles.insert(profile.shop_id, profile);
    }

    /// Seed a small demo marketplace: a few shops, services, staff and deals.
    pub async fn seed_demo(&self) -> Shop {
        let shop = Shop {
            id: Uuid::new_v4(),
            name: "Andy & Wendi".to_string(),
            city: "Lahore".to_string(),
            address: "12 Mall Road".to_string(),
            phone: "+92-300-0000000".to_string(),
            average_rating: 4.7,
            total_reviews: 182,
            is_active: true,
        };
        self.add_shop(shop.clone()).await;
        self.add_service(Service {
            id: Uuid::new_v4(),
            shop_id: shop.id,
            name: "Signature Haircut".to_string(),
            category: "hair".to_string(),
            price: 45.0,
            duration_minutes: 45,
        })
        .await;
        self.add_service(Service {
            id: Uuid::new_v4(),
            shop_id: shop.id,
            name: "Full Color".to_string(),
            category: "hair".to_string(),
            price: 90.0,
            duration_minutes: 120,
        })
        .await;
        self.add_staff(StaffMember {
            id: Uuid::new_v4(),
            shop_id: shop.id,
            user_id: None,
            name: "Wendi".to_string(),
            specialties: vec!["color".to_string()],
        })
        .await;

        let second = Shop {
            id: Uuid::new_v4(),
            name: "Glow Studio".to_string(),
            city: "Karachi".to_string(),
            address: "4 Clifton Block 5".to_string(),
            phone: "+92-300-1111111".to_string(),
            average_rating: 4.3,
            total_reviews: 64,
            is_active: true,
        };
        self.add_shop(second).await;
        shop
    }
}

fn default_hours() -> Vec<(String, String)> {
    let open = ["monday", "tuesday", "wednesday", "thursday", "friday", "saturday"];
    let mut hours: Vec<(String, String)> =
        open.iter().map(|d| (d.to_string(), "09:00-18:00".to_string())).collect();
    hours.push(("sunday".to_string(), "closed".to_string()));
    hours
}

fn arg_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn arg_uuid(args: &Value, key: &str) -> Option<Uuid> {
    arg_str(args, key).and_then(|s| Uuid::parse_str(&s).ok())
}

fn failure(msg: impl Into<String>) -> Value {
    json!({ "success": false, "error": msg.into() })
}

impl Tables {
    fn shop_or_err(&self, args: &Value) -> Result<&Shop, Value> {
        let id = arg_uuid(args, "shop_id").ok_or_else(|| failure("shop_id is required"))?;
        self.shops
            .iter()
            .find(|s| s.id == id && s.is_active)
            .ok_or_else(|| failure("Shop not found"))
    }

    fn shop_summary(&self, shop: &Shop) -> Value {
        json!({
            "id": shop.id,
            "name": shop.name,
            "city": shop.city,
            "address": shop.address,
            "phone": shop.phone,
            "rating": shop.average_rating,
            "reviews": shop.total_reviews,
        })
    }

    fn services_of(&self, shop_id: Uuid) -> Vec<&Service> {
        self.services.iter().filter(|s| s.shop_id == shop_id).collect()
    }
}

#[async_trait]
impl Marketplace for InMemoryMarketplace {
    async fn shop(&self, id: Uuid) -> Option<Shop> {
        self.tables.read().await.shops.iter().find(|s| s.id == id).cloned()
    }

    async fn active_shops(&self) -> Vec<Shop> {
        self.tables.read().await.shops.iter().filter(|s| s.is_active).cloned().collect()
    }

    async fn agent_profile(&self, shop_id: Uuid) -> Option<AgentProfile> {
        self.tables.read().await.profiles.get(&shop_id).cloned()
    }

    async fn relations(&self, caller: &Caller) -> CallerRelations {
        let t = self.tables.read().await;
        CallerRelations {
            owned_shops: t.owners.get(&caller.id).cloned().unwrap_or_default(),
            staff_shops: t
                .staff
                .iter()
                .filter(|m| m.user_id == Some(caller.id))
                .map(|m| m.shop_id)
                .collect(),
        }
    }

    async fn caller_context(&self, caller: &Caller, role: UserRole) -> Value {
        let t = self.tables.read().await;
        let now = Utc::now();
        match role {
            UserRole::Customer => {
                let upcoming: Vec<Value> = t
                    .bookings
                    .iter()
                    .filter(|b| b.customer_id == Some(caller.id) && b.starts_at > now && b.status != "cancelled")
                    .map(|b| json!({ "booking_id": b.id, "starts_at": b.starts_at, "status": b.status }))
                    .collect();
                json!({ "name": caller.name, "upcoming_bookings": upcoming })
            }
            UserRole::Client => {
                let owned = t.owners.get(&caller.id).cloned().unwrap_or_default();
                let pending = t
                    .bookings
                    .iter()
                    .filter(|b| owned.contains(&b.shop_id) && b.status == "pending")
                    .count();
                json!({ "name": caller.name, "owned_shops": owned.len(), "pending_confirmations": pending })
            }
            UserRole::Staff => {
                let today = t
                    .bookings
                    .iter()
                    .filter(|b| {
                        b.staff_id.is_some()
                            && b.starts_at.date_naive() == now.date_naive()
                            && b.status != "cancelled"
                    })
                    .count();
                json!({ "name": caller.name, "bookings_today": today })
            }
            UserRole::Guest => json!({ "name": "Guest" }),
        }
    }

    async fn execute(
        &self,
        operation: &str,
        caller: Option<&Caller>,
        role: UserRole,
        args: Value,
    ) -> anyhow::Result<Value> {
        match operation {
            "search_shops" => {
                let t = self.tables.read().await;
                let query = arg_str(&args, "query").unwrap_or_default().to_lowercase();
                let city = arg_str(&args, "city").unwrap_or_default().to_lowercase();
                let mut matches: Vec<&Shop> = t
                    .shops
                    .iter()
                    .filter(|s| s.is_active)
                    .filter(|s| {
                        query.is_empty()
                            || s.name.to_lowercase().contains(&query)
                            || s.city.to_lowercase().contains(&query)
                            || t.services_of(s.id).iter().any(|sv| {
                                sv.name.to_lowercase().contains(&query)
                                    || sv.category.to_lowercase().contains(&query)
                            })
                    })
                    .filter(|s| city.is_empty() || s.city.to_lowercase().contains(&city))
                    .collect();
                matches.sort_by(|a, b| b.average_rating.total_cmp(&a.average_rating));
                matches.truncate(10);
                let shops: Vec<Value> = matches.iter().map(|s| t.shop_summary(s)).collect();
                Ok(json!({ "success": true, "count": shops.len(), "shops": shops }))
            }
            "get_shop_info" => {
                let t = self.tables.read().await;
                match t.shop_or_err(&args) {
                    Ok(shop) => Ok(json!({ "success": true, "shop": t.shop_summary(shop) })),
                    Err(e) => Ok(e),
                }
            }
            "get_shop_services" | "get_my_services" => {
                let t = self.tables.read().await;
                match t.shop_or_err(&args) {
                    Ok(shop) => {
                        let services: Vec<Value> = t
                            .services_of(shop.id)
                            .iter()
                            .map(|s| {
                                json!({
                                    "id": s.id, "name": s.name, "category": s.category,
                                    "price": s.price, "duration_minutes": s.duration_minutes,
                                })
                            })
                            .collect();
                        Ok(json!({ "success": true, "count": services.len(), "services": services }))
                    }
                    Err(e) => Ok(e),
                }
            }
            "get_shop_staff" | "get_my_staff" => {
                let t = self.tables.read().await;
                match t.shop_or_err(&args) {
                    Ok(shop) => {
                        let staff: Vec<Value> = t
                            .staff
                            .iter()
                            .filter(|m| m.shop_id == shop.id)
                            .map(|m| json!({ "id": m.id, "name": m.name, "specialties": m.specialties }))
                            .collect();
                        Ok(json!({ "success": true, "count": staff.len(), "staff": staff }))
                    }
                    Err(e) => Ok(e),
                }
            }
            "get_shop_hours" => {
                let t = self.tables.read().await;
                match t.shop_or_err(&args) {
                    Ok(shop) => {
                        let hours = t.hours.get(&shop.id).cloned().unwrap_or_default();
                        let hours: Vec<Value> =
                            hours.iter().map(|(d, h)| json!({ "day": d, "hours": h })).collect();
                        Ok(json!({ "success": true, "hours": hours }))
                    }
                    Err(e) => Ok(e),
                }
            }
            "get_shop_holidays" => {
                let t = self.tables.read().await;
                match t.shop_or_err(&args) {
                    Ok(shop) => {
                        let holidays: Vec<Value> = t
                            .holidays
                            .iter()
                            .filter(|h| h.shop_id == shop.id)
                            .map(|h| json!({ "date": h.date, "name": h.name }))
                            .collect();
                        Ok(json!({ "success": true, "holidays": holidays }))
                    }
                    Err(e) => Ok(e),
                }
            }
            "get_shop_deals" | "get_deal_slots" => {
                let t = self.tables.read().await;
                match t.shop_or_err(&args) {
                    Ok(shop) => {
                        let deals: Vec<Value> = t
                            .deals
                            .iter()
                            .filter(|d| d.shop_id == shop.id)
                            .map(|d| json!({ "id": d.id, "title": d.title, "discount_percent": d.discount_percent }))
                            .collect();
                        Ok(json!({ "success": true, "count": deals.len(), "deals": deals }))
                    }
                    Err(e) => Ok(e),
                }
            }
            "get_available_slots" => {
                let t = self.tables.read().await;
                match t.shop_or_err(&args) {
                    Ok(_) => {
                        // Next-day hourly slots; real availability comes from the
                        // scheduling service behind this boundary.
                        let base = Utc::now() + Duration::days(1);
                        let slots: Vec<Value> = (9..17)
                            .map(|h| {
                                json!(base
                                    .date_naive()
                                    .and_hms_opt(h, 0, 0)
                                    .map(|dt| dt.and_utc().to_rfc3339()))
                            })
                            .collect();
                        Ok(json!({ "success": true, "slots": slots }))
                    }
                    Err(e) => Ok(e),
                }
            }
            "create_booking" | "create_deal_booking" => {
                let mut t = self.tables.write().await;
                let shop_id = match arg_uuid(&args, "shop_id") {
                    Some(id) => id,
                    None => return Ok(failure("shop_id is required")),
                };
                let service_id = arg_uuid(&args, "service_id").or_else(|| {
                    let name = arg_str(&args, "service_name")?.to_lowercase();
                    t.services
                        .iter()
                        .find(|s| s.shop_id == shop_id && s.name.to_lowercase().contains(&name))
                        .map(|s| s.id)
                });
                let Some(service_id) = service_id else {
                    return Ok(failure("Service not found for this shop"));
                };
                let starts_at = arg_str(&args, "starts_at")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| Utc::now() + Duration::days(1));
                let booking = Booking {
                    id: Uuid::new_v4(),
                    shop_id,
                    customer_id: caller.map(|c| c.id),
                    service_id,
                    staff_id: None,
                    starts_at,
                    status: "pending".to_string(),
                };
                let id = booking.id;
                t.bookings.push(booking);
                Ok(json!({
                    "success": true,
                    "booking_id": id,
                    "status": "pending",
                    "message": "Booking created and awaiting confirmation",
                }))
            }
            "get_my_bookings" => {
                let Some(caller) = caller else {
                    return Ok(failure("Sign in to view your bookings"));
                };
                let t = self.tables.read().await;
                let bookings: Vec<Value> = t
                    .bookings
                    .iter()
                    .filter(|b| match role {
                        UserRole::Staff => b.staff_id.is_some(),
                        _ => b.customer_id == Some(caller.id),
                    })
                    .map(|b| json!({ "id": b.id, "shop_id": b.shop_id, "starts_at": b.starts_at, "status": b.status }))
                    .collect();
                Ok(json!({ "success": true, "count": bookings.len(), "bookings": bookings }))
            }
            "get_shop_bookings" => {
                let t = self.tables.read().await;
                match t.shop_or_err(&args) {
                    Ok(shop) => {
                        let bookings: Vec<Value> = t
                            .bookings
                            .iter()
                            .filter(|b| b.shop_id == shop.id)
                            .map(|b| json!({ "id": b.id, "starts_at": b.starts_at, "status": b.status }))
                            .collect();
                        Ok(json!({ "success": true, "count": bookings.len(), "bookings": bookings }))
                    }
                    Err(e) => Ok(e),
                }
            }
            "cancel_booking" | "confirm_booking" | "complete_booking" => {
                let mut t = self.tables.write().await;
                let Some(id) = arg_uuid(&args, "booking_id") else {
                    return Ok(failure("booking_id is required"));
                };
                let Some(booking) = t.bookings.iter_mut().find(|b| b.id == id) else {
                    return Ok(failure("Booking not found"));
                };
                booking.status = match operation {
                    "cancel_booking" => "cancelled",
                    "confirm_booking" => "confirmed",
                    _ => "completed",
                }
                .to_string();
                Ok(json!({ "success": true, "booking_id": id, "status": booking.status }))
            }
            "reschedule_my_booking" | "reschedule_booking" => {
                let mut t = self.tables.write().await;
                let Some(id) = arg_uuid(&args, "booking_id") else {
                    return Ok(failure("booking_id is required"));
                };
                let Some(starts_at) = arg_str(&args, "starts_at").and_then(|s| s.parse().ok()) else {
                    return Ok(failure("starts_at must be an RFC3339 timestamp"));
                };
                let Some(booking) = t.bookings.iter_mut().find(|b| b.id == id) else {
                    return Ok(failure("Booking not found"));
                };
                booking.starts_at = starts_at;
                booking.status = "pending".to_string();
                Ok(json!({ "success": true, "booking_id": id, "starts_at": booking.starts_at }))
            }
            "get_my_shops" => {
                let Some(caller) = caller else {
                    return Ok(failure("Sign in to view your shops"));
                };
                let t = self.tables.read().await;
                let owned = t.owners.get(&caller.id).cloned().unwrap_or_default();
                let shops: Vec<Value> = t
                    .shops
                    .iter()
                    .filter(|s| owned.contains(&s.id))
                    .map(|s| t.shop_summary(s))
                    .collect();
                Ok(json!({ "success": true, "count": shops.len(), "shops": shops }))
            }
            "create_service" => {
                let mut t = self.tables.write().await;
                let Some(shop_id) = arg_uuid(&args, "shop_id") else {
                    return Ok(failure("shop_id is required"));
                };
                let Some(name) = arg_str(&args, "name") else {
                    return Ok(failure("name is required"));
                };
                let service = Service {
                    id: Uuid::new_v4(),
                    shop_id,
                    name,
                    category: arg_str(&args, "category").unwrap_or_else(|| "general".to_string()),
                    price: args.get("price").and_then(|v| v.as_f64()).unwrap_or(0.0),
                    duration_minutes: args
                        .get("duration_minutes")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(30) as u32,
                };
                let id = service.id;
                t.services.push(service);
                Ok(json!({ "success": true, "service_id": id }))
            }
            "update_service" => {
                let mut t = self.tables.write().await;
                let Some(id) = arg_uuid(&args, "service_id") else {
                    return Ok(failure("service_id is required"));
                };
                let Some(service) = t.services.iter_mut().find(|s| s.id == id) else {
                    return Ok(failure("Service not found"));
                };
                if let Some(name) = arg_str(&args, "name") {
                    service.name = name;
                }
                if let Some(price) = args.get("price").and_then(|v| v.as_f64()) {
                    service.price = price;
                }
                Ok(json!({ "success": true, "service_id": id }))
            }
            "create_staff" => {
                let mut t = self.tables.write().await;
                let Some(shop_id) = arg_uuid(&args, "shop_id") else {
                    return Ok(failure("shop_id is required"));
                };
                let Some(name) = arg_str(&args, "name") else {
                    return Ok(failure("name is required"));
                };
                let member = StaffMember { id: Uuid::new_v4(), shop_id, user_id: None, name, specialties: vec![] };
                let id = member.id;
                t.staff.push(member);
                Ok(json!({ "success": true, "staff_id": id }))
            }
            "update_staff" | "assign_staff_to_service" => {
                let t = self.tables.read().await;
                let Some(id) = arg_uuid(&args, "staff_id") else {
                    return Ok(failure("staff_id is required"));
                };
                if !t.staff.iter().any(|m| m.id == id) {
                    return Ok(failure("Staff member not found"));
                }
                Ok(json!({ "success": true, "staff_id": id }))
            }
            "create_holiday" => {
                let mut t = self.tables.write().await;
                let Some(shop_id) = arg_uuid(&args, "shop_id") else {
                    return Ok(failure("shop_id is required"));
                };
                let Some(date) = arg_str(&args, "date").and_then(|s| s.parse::<NaiveDate>().ok()) else {
                    return Ok(failure("date must be YYYY-MM-DD"));
                };
                t.holidays.push(Holiday {
                    shop_id,
                    date,
                    name: arg_str(&args, "name").unwrap_or_else(|| "Holiday".to_string()),
                });
                Ok(json!({ "success": true, "date": date }))
            }
            "delete_holiday" => {
                let mut t = self.tables.write().await;
                let Some(shop_id) = arg_uuid(&args, "shop_id") else {
                    return Ok(failure("shop_id is required"));
                };
                let Some(date) = arg_str(&args, "date").and_then(|s| s.parse::<NaiveDate>().ok()) else {
                    return Ok(failure("date must be YYYY-MM-DD"));
                };
                let before = t.holidays.len();
                t.holidays.retain(|h| !(h.shop_id == shop_id && h.date == date));
                Ok(json!({ "success": true, "removed": before - t.holidays.len() }))
            }
            "update_shop_hours" => {
                let mut t = self.tables.write().await;
                let Some(shop_id) = arg_uuid(&args, "shop_id") else {
                    return Ok(failure("shop_id is required"));
                };
                let Some(day) = arg_str(&args, "day") else {
                    return Ok(failure("day is required"));
                };
                let hours = arg_str(&args, "hours").unwrap_or_else(|| "closed".to_string());
                let entry = t.hours.entry(shop_id).or_insert_with(default_hours);
                if let Some(slot) = entry.iter_mut().find(|(d, _)| *d == day.to_lowercase()) {
                    slot.1 = hours.clone();
                }
                Ok(json!({ "success": true, "day": day, "hours": hours }))
            }
            "get_my_schedule" | "get_today_summary" => {
                let Some(caller) = caller else {
                    return Ok(failure("Sign in to view your schedule"));
                };
                let t = self.tables.read().await;
                let staff_ids: Vec<Uuid> = t
                    .staff
                    .iter()
                    .filter(|m| m.user_id == Some(caller.id))
                    .map(|m| m.id)
                    .collect();
                let today = Utc::now().date_naive();
                let bookings: Vec<Value> = t
                    .bookings
                    .iter()
                    .filter(|b| b.staff_id.map(|id| staff_ids.contains(&id)).unwrap_or(false))
                    .filter(|b| operation == "get_my_schedule" || b.starts_at.date_naive() == today)
                    .map(|b| json!({ "id": b.id, "starts_at": b.starts_at, "status": b.status }))
                    .collect();
                Ok(json!({ "success": true, "count": bookings.len(), "bookings": bookings }))
            }
            "get_customer_history" => {
                let t = self.tables.read().await;
                let Some(customer_id) = arg_uuid(&args, "customer_id") else {
                    return Ok(failure("customer_id is required"));
                };
                let bookings: Vec<Value> = t
                    .bookings
                    .iter()
                    .filter(|b| b.customer_id == Some(customer_id))
                    .map(|b| json!({ "id": b.id, "shop_id": b.shop_id, "starts_at": b.starts_at, "status": b.status }))
                    .collect();
                Ok(json!({ "success": true, "count": bookings.len(), "bookings": bookings }))
            }
            other => Ok(failure(format!("Unknown operation: {other}"))),
        }
    }

    async fn record_shop_session(&self, shop_id: Uuid) {
        let mut t = self.tables.write().await;
        if let Some(profile) = t.profiles.get_mut(&shop_id) {
            profile.total_sessions += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller() -> Caller {
        Caller { id: Uuid::new_v4(), name: "Ayesha".to_string(), email: "ayesha@example.com".to_string() }
    }

    #[tokio::test]
    async fn search_with_empty_query_lists_active_shops() {
        let market = InMemoryMarketplace::new();
        market.seed_demo().await;
        let result = market
            .execute("search_shops", None, UserRole::Guest, json!({ "query": "" }))
            .await
            .unwrap();
        assert_eq!(result["success"], json!(true));
        assert_eq!(result["count"], json!(2));
    }

    #[tokio::test]
    async fn create_booking_resolves_service_by_name() {
        let market = InMemoryMarketplace::new();
        let shop = market.seed_demo().await;
        let c = caller();
        let result = market
            .execute(
                "create_booking",
                Some(&c),
                UserRole::Customer,
                json!({ "shop_id": shop.id, "service_name": "haircut" }),
            )
            .await
            .unwrap();
        assert_eq!(result["success"], json!(true));
        assert_eq!(result["status"], json!("pending"));
    }

    #[tokio::test]
    async fn every_shop_gets_an_agent_profile() {
        let market = InMemoryMarketplace::new();
        let shop = market.seed_demo().await;
        let profile = market.agent_profile(shop.id).await.unwrap();
        assert!(profile.is_active);
        assert_eq!(profile.voice, "alloy");
    }

    #[tokio::test]
    async fn session_counter_increments() {
        let market = InMemoryMarketplace::new();
        let shop = market.seed_demo().await;
        market.record_shop_session(shop.id).await;
        market.record_shop_session(shop.id).await;
        assert_eq!(market.agent_profile(shop.id).await.unwrap().total_sessions, 2);
    }
}
