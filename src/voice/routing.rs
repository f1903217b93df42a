//! Shop-name resolution for the `route_to_shop` tool
//!
//! Callers say shop names loosely ("Andy and Wendi" for "Andy & Wendi",
//! "Glow" for "Glow Studio"), so resolution runs an explicit, ordered cascade
//! of match strategies: exact case-insensitive, "and"/"&" separator
//! normalization, substring, then tokenized partial-word scoring. The scoring
//! threshold is an approximate-match policy and comes from configuration.

use serde_json::{json, Value};

use crate::marketplace::Shop;

pub const DEFAULT_TOKEN_MATCH_RATIO: f64 = 0.7;
const MAX_SUGGESTIONS: usize = 5;

/// Resolve a spoken shop name against the active shops, trying each strategy
/// in order. Returns `None` when nothing plausible matches.
pub fn resolve_shop<'a>(query: &str, shops: &'a [Shop], token_ratio: f64) -> Option<&'a Shop> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }

    // 1. Exact case-insensitive match
    if let Some(shop) = shops.iter().find(|s| s.name.eq_ignore_ascii_case(query)) {
        return Some(shop);
    }

    // 2. "and" <-> "&" separator normalization
    let lower = query.to_lowercase();
    for normalized in [lower.replace(" and ", " & "), lower.replace(" & ", " and ")] {
        if let Some(shop) = shops.iter().find(|s| s.name.to_lowercase() == normalized) {
            return Some(shop);
        }
    }

    // 3. Substring match
    if let Some(shop) = shops.iter().find(|s| s.name.to_lowercase().contains(&lower)) {
        return Some(shop);
    }

    // 4. Tokenized partial-word scoring
    let clean: String = query
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    let words: Vec<&str> = clean.split_whitespace().collect();
    let first = words.iter().find(|w| w.len() > 2)?;
    let first_lower = first.to_lowercase();

    let candidates: Vec<&Shop> = shops
        .iter()
        .filter(|s| s.name.to_lowercase().contains(&first_lower))
        .collect();
    if candidates.is_empty() {
        return None;
    }

    if words.len() > 1 {
        for candidate in &candidates {
            let name_lower = candidate.name.to_lowercase();
            let matched = words.iter().filter(|w| name_lower.contains(&w.to_lowercase())).count();
            if matched as f64 >= words.len() as f64 * token_ratio {
                return Some(candidate);
            }
        }
    }

    // Word scoring inconclusive: fall back to the first candidate that
    // contained the leading word
    candidates.first().copied()
}

/// A few active shops to offer when resolution fails.
pub fn suggestions(shops: &[Shop]) -> Vec<Value> {
    shops
        .iter()
        .take(MAX_SUGGESTIONS)
        .map(|s| json!({ "id": s.id, "name": s.name, "city": s.city }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn shop(name: &str) -> Shop {
        Shop {
            id: Uuid::new_v4(),
            name: name.to_string(),
            city: "Lahore".to_string(),
            address: String::new(),
            phone: String::new(),
            average_rating: 4.0,
            total_reviews: 10,
            is_active: true,
        }
    }

    fn fixture() -> Vec<Shop> {
        vec![
            shop("Andy & Wendi"),
            shop("Glow Studio"),
            shop("Bella Nails and Spa"),
            shop("The Barber Room"),
        ]
    }

    #[test]
    fn exact_match_wins() {
        let shops = fixture();
        let found = resolve_shop("glow studio", &shops, DEFAULT_TOKEN_MATCH_RATIO).unwrap();
        assert_eq!(found.name, "Glow Studio");
    }

    #[test]
    fn and_ampersand_normalization() {
        let shops = fixture();
        let found = resolve_shop("Andy and Wendi", &shops, DEFAULT_TOKEN_MATCH_RATIO).unwrap();
        assert_eq!(found.name, "Andy & Wendi");

        let found = resolve_shop("bella nails & spa", &shops, DEFAULT_TOKEN_MATCH_RATIO).unwrap();
        assert_eq!(found.name, "Bella Nails and Spa");
    }

    #[test]
    fn substring_match() {
        let shops = fixture();
        let found = resolve_shop("barber", &shops, DEFAULT_TOKEN_MATCH_RATIO).unwrap();
        assert_eq!(found.name, "The Barber Room");
    }

    #[test]
    fn tokenized_partial_match_is_approximate() {
        let shops = fixture();
        // Majority of words present resolves even with noise words stripped
        let found = resolve_shop("Andy Wendi salon", &shops, DEFAULT_TOKEN_MATCH_RATIO).unwrap();
        assert_eq!(found.name, "Andy & Wendi");
    }

    #[test]
    fn leading_word_fallback() {
        let shops = fixture();
        let found = resolve_shop("Glow place downtown", &shops, DEFAULT_TOKEN_MATCH_RATIO).unwrap();
        assert_eq!(found.name, "Glow Studio");
    }

    #[test]
    fn no_match_returns_none() {
        let shops = fixture();
        assert!(resolve_shop("Completely Unknown", &shops, DEFAULT_TOKEN_MATCH_RATIO).is_none());
        assert!(resolve_shop("", &shops, DEFAULT_TOKEN_MATCH_RATIO).is_none());
    }

    #[test]
    fn suggestions_are_bounded() {
        let shops: Vec<Shop> = (0..10).map(|i| shop(&format!("Shop {i}"))).collect();
        assert_eq!(suggestions(&shops).len(), MAX_SUGGESTIONS);
    }
}
