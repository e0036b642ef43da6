//! Phone normalization for the messaging channel.
//!
//! The channel wants digits only with a country code and no `+`. Feed
//! submissions arrive in every format people type into a form.

/// Normalize a raw phone into channel-address form.
///
/// Strips every non-digit. A leading-zero 11-digit national number is
/// rewritten under the default country code (the zero dropped).
pub fn format_phone(raw: &str, default_country_code: &str) -> String {
    let cleaned: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if cleaned.starts_with('0') && cleaned.len() == 11 {
        return format!("{default_country_code}{}", &cleaned[1..]);
    }
    cleaned
}

/// A plausible channel address: 10 to 15 digits.
pub fn is_valid_phone(phone: &str) -> bool {
    (10..=15).contains(&phone.len()) && phone.chars().all(|c| c.is_ascii_digit())
}

/// Human-facing rendering of a channel address.
pub fn display_phone(phone: &str) -> String {
    format!("+{}", phone.trim_start_matches('+'))
}

/// ISO country code derived from the phone prefix, for the prefixes we
/// actually see in the feed.
pub fn country_from_phone(phone: &str) -> Option<&'static str> {
    const PREFIXES: &[(&str, &str)] = &[
        ("91", "IN"),
        ("971", "AE"),
        ("44", "GB"),
        ("61", "AU"),
        ("65", "SG"),
        ("1", "US"),
    ];
    // Longest prefix first so "971" beats "1" and "9".
    let mut matches: Vec<&(&str, &str)> =
        PREFIXES.iter().filter(|(p, _)| phone.starts_with(p)).collect();
    matches.sort_by_key(|(p, _)| std::cmp::Reverse(p.len()));
    matches.first().map(|(_, country)| *country)
}
