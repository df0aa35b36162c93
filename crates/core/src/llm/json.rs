use crate::domain::contract::LlmInvestorProfile;
use crate::domain::profile::InvestorProfile;
use anyhow::Context;
use chrono::{DateTime, Utc};

pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        // Remove Markdown fences (```json ... ``` or ``` ... ```).
        let mut inner = trimmed;
        if let Some(after_first) = inner.splitn(2, '\n').nth(1) {
            inner = after_first;
        }
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
        return Some(inner.trim().to_string());
    }

    // Best-effort extraction: first '{' to last '}'.
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}

pub fn parse_profile(
    text: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<InvestorProfile> {
    let json_str = extract_json(text).unwrap_or_else(|| text.trim().to_string());
    let parsed = serde_json::from_str::<LlmInvestorProfile>(&json_str)
        .with_context(|| format!("LLM output is not valid JSON for profile schema: {json_str}"))?;
    parsed.validate_and_into_profile(user_id, now)
}
