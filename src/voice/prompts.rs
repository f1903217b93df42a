//! System prompt assembly for the master and shop agents
//!
//! Prompts are built per session from static guideline text plus the
//! shop/caller context the agent resolves at connect time. Everything here is
//! plain string assembly; no model calls.

use crate::marketplace::Shop;
use crate::types::UserRole;

/// Shared speaking style for a voice channel: short answers, no markdown,
/// spell out prices and times.
const VOICE_STYLE: &str = "\
You are speaking with the caller over a live voice connection.
- Keep responses short and conversational, one to three sentences.
- Never use markdown, bullet lists, or emoji; you are being spoken aloud.
- Say prices and times in words a person would say, like 'forty-five dollars' \
and 'two thirty in the afternoon'.
- If you did not catch something, ask the caller to repeat it.
- Confirm important details like dates, times, and names before acting.";

pub fn master_prompt(shop_count: usize) -> String {
    format!(
        "You are the main assistant for a salon marketplace with {shop_count} \
active shops. You help callers discover salons, compare services and prices, \
and connect them to the right shop.\n\n\
{VOICE_STYLE}\n\n\
What you can do:\n\
- Search shops by name, city, or service and share their details, services, \
deals, staff, and hours.\n\
- Transfer the caller to a shop's own assistant with the route_to_shop tool.\n\n\
What you cannot do:\n\
- You cannot create, change, or cancel bookings yourself. When a caller wants \
to book or manage anything at a shop, use route_to_shop to hand them over, \
and tell them you are connecting them.\n\
- If you cannot find the shop the caller named, offer the closest matches \
instead of guessing."
    )
}

pub fn shop_prompt(shop: &Shop, role: UserRole, custom_instructions: Option<&str>) -> String {
    let role_section = match role {
        UserRole::Client => format!(
            "The caller is the owner of {}. Help them manage the business: \
review and confirm bookings, adjust services and prices, manage staff, \
set holidays and hours, and look up customer history. Confirm before any \
change that affects customers.",
            shop.name
        ),
        UserRole::Staff => format!(
            "The caller works at {}. Help them with their own day: their \
schedule, their assigned bookings and services, today's summary, and \
marking their bookings complete. They cannot change shop settings.",
            shop.name
        ),
        UserRole::Customer | UserRole::Guest => format!(
            "The caller is a customer of {}. Help them browse services and \
deals, check availability, and create, reschedule, or cancel their own \
bookings. Always confirm the service, date, and time before booking.",
            shop.name
        ),
    };

    let mut prompt = format!(
        "You are the voice assistant for {name}, a salon in {city}.\n\n\
{VOICE_STYLE}\n\n\
{role_section}\n\n\
If the caller asks about other salons or wants to leave, use route_to_master \
to hand them back to the main assistant.",
        name = shop.name,
        city = shop.city,
    );

    if let Some(extra) = custom_instructions {
        let extra = extra.trim();
        if !extra.is_empty() {
            prompt.push_str("\n\nShop-specific instructions:\n");
            prompt.push_str(extra);
        }
    }
    prompt
}

pub fn default_greeting(shop_name: &str) -> String {
    format!("Welcome to {shop_name}! How can I help you today?")
}

pub const MASTER_GREETING: &str =
    "Hi! I can help you find salons and connect you to them. What are you looking for?";

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn shop() -> Shop {
        Shop {
            id: Uuid::new_v4(),
            name: "Glow Studio".to_string(),
            city: "Karachi".to_string(),
            address: String::new(),
            phone: String::new(),
            average_rating: 4.5,
            total_reviews: 12,
            is_active: true,
        }
    }

    #[test]
    fn master_prompt_forbids_direct_booking() {
        let prompt = master_prompt(3);
        assert!(prompt.contains("cannot create, change, or cancel bookings"));
        assert!(prompt.contains("route_to_shop"));
    }

    #[test]
    fn shop_prompt_varies_by_role() {
        let s = shop();
        let owner = shop_prompt(&s, UserRole::Client, None);
        let staff = shop_prompt(&s, UserRole::Staff, None);
        let customer = shop_prompt(&s, UserRole::Customer, None);
        assert!(owner.contains("owner"));
        assert!(staff.contains("their own day"));
        assert!(customer.contains("customer"));
    }

    #[test]
    fn custom_instructions_are_appended() {
        let s = shop();
        let prompt = shop_prompt(&s, UserRole::Customer, Some("Always mention the loyalty card."));
        assert!(prompt.ends_with("Always mention the loyalty card."));
    }
}
