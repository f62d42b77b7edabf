//! Structured-Data Extractor: resume text → candidate profile via the extraction model.
//!
//! Flow: truncate → prompt → backoff-wrapped model call → strip fences → parse →
//!       merge with pre-extracted contact fields → validate → strip NUL bytes.
//!
//! Returns `Ok(None)` when the minimum viable fields (name, resolvable email)
//! cannot be determined. That is a skip, not an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::extraction::fields::ContactFields;
use crate::extraction::prompts::{RESUME_EXTRACT_PROMPT, RESUME_EXTRACT_SYSTEM};
use crate::llm_client::prompts::truncate_chars;
use crate::llm_client::retry::{with_backoff, RetryPolicy};
use crate::llm_client::{first_json_object, strip_json_fences, LlmError, TextModel};

/// Header, summary and skills sections fit comfortably in this many characters.
pub const MAX_RESUME_CHARS: usize = 3000;
const MAX_SKILLS: usize = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateProfile {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: String,
    pub experience: i32,
    pub skills: Vec<String>,
    pub summary: String,
    pub location: Option<String>,
    pub willing_to_relocate: Option<bool>,
}

/// Runs structured extraction over already-sanitized resume text.
pub async fn extract_profile(
    model: &dyn TextModel,
    retry: RetryPolicy,
    resume_text: &str,
    pre: &ContactFields,
) -> Result<Option<CandidateProfile>, LlmError> {
    let prompt =
        RESUME_EXTRACT_PROMPT.replace("{resume_text}", truncate_chars(resume_text, MAX_RESUME_CHARS));

    let response = with_backoff(retry, || model.complete(&prompt, RESUME_EXTRACT_SYSTEM)).await?;
    let parsed = parse_model_json(&response)?;

    let profile = build_profile(&parsed, pre);
    if profile.is_none() {
        warn!("Structured extraction lacked a name or resolvable email; skipping");
    } else {
        debug!("Structured extraction succeeded");
    }
    Ok(profile)
}

/// Parses the model's JSON, tolerating code fences and leading/trailing prose.
pub fn parse_model_json(response: &str) -> Result<Value, LlmError> {
    let text = strip_json_fences(response);
    match serde_json::from_str::<Value>(text) {
        Ok(value) => Ok(value),
        Err(e) => match first_json_object(text) {
            Some(object) => Ok(serde_json::from_str(object)?),
            None => Err(LlmError::Parse(e)),
        },
    }
}

/// Prefers a non-empty model value; falls back to the regex value otherwise.
/// Email is lower-cased, both are trimmed.
pub fn merge_fields(llm: &ContactFields, regex: &ContactFields) -> ContactFields {
    fn pick(primary: Option<&str>, fallback: Option<&str>) -> Option<String> {
        primary
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| fallback.map(str::trim).filter(|s| !s.is_empty()))
            .map(str::to_string)
    }

    ContactFields {
        email: pick(llm.email.as_deref(), regex.email.as_deref()).map(|e| e.to_lowercase()),
        phone: pick(llm.phone.as_deref(), regex.phone.as_deref()),
    }
}

/// Builds a validated profile from the model's JSON, or `None` if it lacks a
/// name or no email can be resolved.
pub fn build_profile(value: &Value, pre: &ContactFields) -> Option<CandidateProfile> {
    let name = text_field(value, "name").filter(|n| !n.is_empty())?;

    let merged = merge_fields(
        &ContactFields {
            email: text_field(value, "email"),
            phone: text_field(value, "phone"),
        },
        pre,
    );
    let email = merged.email.map(|e| strip_nul(&e)).filter(|e| !e.is_empty())?;

    Some(CandidateProfile {
        name: strip_nul(&name),
        email,
        phone: merged.phone.map(|p| strip_nul(&p)),
        role: text_field(value, "role")
            .map(|r| strip_nul(&r))
            .unwrap_or_default(),
        experience: years_field(value),
        skills: skills_field(value),
        summary: text_field(value, "summary")
            .map(|s| strip_nul(&s))
            .unwrap_or_default(),
        location: text_field(value, "location")
            .map(|l| strip_nul(&l))
            .filter(|l| !l.is_empty()),
        willing_to_relocate: bool_field(value, "willing_to_relocate")
            .or_else(|| bool_field(value, "relocation")),
    })
}

pub fn strip_nul(text: &str) -> String {
    text.replace('\0', "")
}

/// A trimmed, non-null string value. Numbers are stringified (phones often come back numeric).
fn text_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty() && s != "null"),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn bool_field(value: &Value, key: &str) -> Option<bool> {
    match value.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Non-negative whole years. Accepts `5`, `5.7`, `"5"`, `"5+ years"`; anything else is 0.
fn years_field(value: &Value) -> i32 {
    let raw = value
        .get("experience")
        .or_else(|| value.get("years_of_experience"));

    let years = match raw {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => {
            let digits: String = s
                .trim()
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            digits.parse::<f64>().unwrap_or(0.0)
        }
        _ => 0.0,
    };

    if years.is_finite() {
        years.floor().clamp(0.0, 80.0) as i32
    } else {
        0
    }
}

/// Always a well-formed list: arrays keep their string entries, a single
/// string is split on commas/semicolons, anything else is empty.
fn skills_field(value: &Value) -> Vec<String> {
    let items: Vec<String> = match value.get("skills") {
        Some(Value::Array(arr)) => arr
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s.split([',', ';']).map(str::to_string).collect(),
        _ => Vec::new(),
    };

    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .map(|s| strip_nul(s.trim()))
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_lowercase()))
        .take(MAX_SKILLS)
        .collect()
}
