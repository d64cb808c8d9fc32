//! Masking for identifying fields that end up in logs.

/// Keep only the last four digits of a phone number.
pub fn mask_phone(raw: &str) -> String {
    let digits: Vec<char> = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 4 {
        return "(redacted)".to_string();
    }
    let tail: String = digits[digits.len() - 4..].iter().collect();
    format!("xxxxxx{tail}")
}

/// Keep a short prefix of an opaque identifier (user id, session id).
pub fn mask_identifier(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    if raw.chars().count() <= 8 {
        return "(redacted)".to_string();
    }
    let prefix: String = raw.chars().take(4).collect();
    format!("{prefix}…")
}
