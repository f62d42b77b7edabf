//! Field Pre-Extractor: deterministic email/phone pick-up before any model call.
//!
//! These two fields are cheap to find with patterns; asking the model for them
//! costs tokens on every document. The structured extractor uses them only as
//! fallbacks when the model omits its own values.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b").expect("email regex is valid")
});

// Digits with dash/dot/space/paren separators and an optional leading `+`.
// Single-line only so a date column next to a phone column cannot merge into it.
static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+?\(?\d[\d \t().-]{7,}\d").expect("phone regex is valid")
});

const MIN_PHONE_DIGITS: usize = 10;
const MAX_PHONE_DIGITS: usize = 15;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactFields {
    pub email: Option<String>,
    pub phone: Option<String>,
}

pub fn pre_extract(text: &str) -> ContactFields {
    ContactFields {
        email: extract_email(text),
        phone: extract_phone(text),
    }
}

/// First email in the text, lower-cased and trimmed.
pub fn extract_email(text: &str) -> Option<String> {
    EMAIL_RE
        .find(text)
        .map(|m| m.as_str().trim().to_lowercase())
}

/// First phone-shaped run with a plausible digit count (10–15), trimmed.
pub fn extract_phone(text: &str) -> Option<String> {
    PHONE_RE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .find(|candidate| {
            let digits = candidate.chars().filter(|c| c.is_ascii_digit()).count();
            (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digits)
        })
        .map(str::to_string)
}
