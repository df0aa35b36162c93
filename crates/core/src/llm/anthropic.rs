use crate::config::Settings;
use crate::domain::contract::{LlmInvestorProfile, TickerClassification};
use crate::domain::metrics::PortfolioMetrics;
use crate::domain::plan::RebalancePlan;
use crate::domain::profile::InvestorProfile;
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::json;
use crate::llm::{LlmClient, Provider};
use anyhow::Context;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

const TOOL_NAME_EMIT_PROFILE: &str = "emit_profile";
const TOOL_NAME_EMIT_TICKER: &str = "emit_ticker";

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = std::env::var("ANTHROPIC_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let timeout_secs = std::env::var("ANTHROPIC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    async fn create_message(
        &self,
        req: CreateMessageRequest,
    ) -> anyhow::Result<(serde_json::Value, CreateMessageResponse)> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_str(&self.api_key)?);
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(&req)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Anthropic response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            return Err(LlmDiagnosticsError {
                provider: Provider::Anthropic,
                stage: "http",
                detail: format!("status={status}"),
                raw_output: Some(text),
                raw_response_json,
            }
            .into());
        }

        let raw_json = serde_json::from_str::<serde_json::Value>(&text)
            .with_context(|| format!("failed to parse Anthropic response JSON: {text}"))?;
        let parsed = serde_json::from_value::<CreateMessageResponse>(raw_json.clone())
            .context("failed to decode Anthropic response into CreateMessageResponse")?;
        Ok((raw_json, parsed))
    }

    fn tools() -> Vec<Tool> {
        // Minimal JSON schema for the exact profile contract.
        // Keep it strict and explicit to maximize compliance.
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["objective", "horizon_months"],
            "properties": {
                "objective": {"type": "string", "enum": ["growth", "income", "balanced"]},
                "horizon_months": {"type": "integer", "minimum": 1, "maximum": 600},
                "risk_score": {"type": "integer", "minimum": 0, "maximum": 100},
                "constraints": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "max_holdings": {"type": ["integer", "null"], "minimum": 1, "maximum": 100},
                        "max_position_pct": {"type": ["number", "null"], "minimum": 1, "maximum": 100},
                        "exclusions": {"type": "array", "items": {"type": "string"}},
                        "options_allowed": {"type": ["boolean", "null"]},
                        "leverage_allowed": {"type": ["boolean", "null"]}
                    }
                },
                "preferences": {
                    "type": "object",
                    "additionalProperties": false,
                    "properties": {
                        "sectors_like": {"type": "array", "items": {"type": "string"}},
                        "sectors_avoid": {"type": "array", "items": {"type": "string"}},
                        "regions_like": {"type": "array", "items": {"type": "string"}}
                    }
                },
                "rebalance_frequency": {
                    "type": ["string", "null"],
                    "enum": ["monthly", "quarterly", "annual", null]
                }
            }
        });

        vec![Tool {
            name: TOOL_NAME_EMIT_PROFILE,
            description: "Emit the extracted investor profile as structured JSON",
            input_schema: schema,
        }]
    }

    fn tool_choice() -> ToolChoice {
        ToolChoice::Tool {
            name: TOOL_NAME_EMIT_PROFILE,
        }
    }

    fn profile_system_prompt(sector_names: &[&str]) -> String {
        format!(
            "You are a profile extraction engine for an investment advisory service.\n\
Return ONLY valid JSON matching the profile schema. Do not wrap in markdown. \
Do not include any extra keys.\n\
Rules:\n\
- objective is one of: growth, income, balanced\n\
- horizon_months is an integer between 1 and 600\n\
- risk_score is an integer between 0 and 100 (omit if the text gives no signal)\n\
- exclusions are individual stock tickers, uppercase\n\
- sectors_like and sectors_avoid use ONLY these sector names: {}\n\
- Never invent constraints the user did not state",
            sector_names.join(", ")
        )
    }

    fn extract_prompt(message: &str) -> String {
        format!("Extract the investor profile from this onboarding message:\n\n{message}")
    }

    fn update_prompt(current: &InvestorProfile, message: &str) -> anyhow::Result<String> {
        let current_json =
            serde_json::to_string_pretty(current).context("failed to serialize current profile")?;
        Ok(format!(
            "Current profile JSON:\n{current_json}\n\n\
Apply this follow-up message to the profile and return the FULL updated \
profile. Keep every field the message does not change:\n\n{message}"
        ))
    }

    fn repair_prompt(previous_output: &str) -> String {
        format!(
            "Your previous message was NOT valid JSON for the profile schema.\n\n\
TASK: Output ONLY a single JSON object with the profile fields.\n\
- Do NOT include any markdown, prose, or code fences.\n\
- objective MUST be one of: growth, income, balanced.\n\
- horizon_months MUST be an integer in [1, 600].\n\
- risk_score (if present) MUST be an integer in [0, 100].\n\n\
INVALID OUTPUT (for reference only; DO NOT copy verbatim):\n{previous_output}"
        )
    }

    fn ticker_tools(sector_names: &[&str]) -> Vec<Tool> {
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["ticker", "name", "sector", "market_cap", "industry_risk"],
            "properties": {
                "ticker": {"type": "string"},
                "name": {"type": "string"},
                "sector": {"type": "string", "enum": sector_names},
                "market_cap": {"type": "string", "enum": ["large", "mid", "small"]},
                "industry_risk": {"type": "string", "enum": ["low", "medium", "high"]}
            }
        });

        vec![Tool {
            name: TOOL_NAME_EMIT_TICKER,
            description: "Emit the stock ticker classification as structured JSON",
            input_schema: schema,
        }]
    }

    fn ticker_system_prompt(sector_names: &[&str]) -> String {
        format!(
            "You are a financial data classifier for an investment advisory service.\n\
Classify the given stock ticker from your knowledge of public companies.\n\
Rules:\n\
- sector MUST be exactly one of: {}\n\
- market_cap is large (>$10B), mid ($2-10B) or small (<$2B)\n\
- industry_risk is low, medium or high\n\
- If the ticker is not a real security, answer in plain text instead of using the tool",
            sector_names.join(", ")
        )
    }

    fn response_tool_classification(
        res: &CreateMessageResponse,
    ) -> anyhow::Result<Option<TickerClassification>> {
        for block in &res.content {
            if let ContentBlock::ToolUse { name, input, .. } = block {
                if name == TOOL_NAME_EMIT_TICKER {
                    let parsed = serde_json::from_value::<TickerClassification>(input.clone())
                        .context("failed to decode tool_use.input into TickerClassification")?;
                    return Ok(Some(parsed));
                }
            }
        }
        Ok(None)
    }

    fn response_text(res: &CreateMessageResponse) -> String {
        let mut out = String::new();
        for block in &res.content {
            match block {
                ContentBlock::Text { text } => {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(text);
                }
                ContentBlock::ToolUse { .. } => {
                    // Prefer tool output parsing when tools are enabled.
                    continue;
                }
                ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => {
                    // Ignore.
                }
                ContentBlock::Unknown => {
                    // Ignore unknown blocks.
                }
            }
        }
        out
    }

    fn response_tool_profile(
        res: &CreateMessageResponse,
    ) -> anyhow::Result<Option<LlmInvestorProfile>> {
        for block in &res.content {
            if let ContentBlock::ToolUse { name, input, .. } = block {
                if name == TOOL_NAME_EMIT_PROFILE {
                    let parsed = serde_json::from_value::<LlmInvestorProfile>(input.clone())
                        .context("failed to decode tool_use.input into LlmInvestorProfile")?;
                    return Ok(Some(parsed));
                }
            }
        }
        Ok(None)
    }

    async fn request_profile(
        &self,
        user_id: &str,
        system: String,
        user_content: String,
    ) -> anyhow::Result<InvestorProfile> {
        let make_req = |content: String| CreateMessageRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: Some(system.clone()),
            messages: vec![Message {
                role: "user",
                content,
            }],
            tools: Some(Self::tools()),
            tool_choice: Some(Self::tool_choice()),
        };

        let (raw_json, res) = self.create_message(make_req(user_content)).await?;

        // Tool output path.
        if let Some(wire) = Self::response_tool_profile(&res)? {
            return wire.validate_and_into_profile(user_id, Utc::now());
        }

        // Fallback to text with repair attempts (should be rare).
        let mut last_text = Self::response_text(&res);
        let mut last_raw_json = raw_json;
        let mut last_err = match json::parse_profile(&last_text, user_id, Utc::now()) {
            Ok(profile) => return Ok(profile),
            Err(err) => err,
        };

        for attempt in 1..=2u32 {
            let (repair_raw_json, repair_res) = self
                .create_message(make_req(Self::repair_prompt(&last_text)))
                .await?;
            if let Some(wire) = Self::response_tool_profile(&repair_res)? {
                return wire.validate_and_into_profile(user_id, Utc::now());
            }
            let repair_text = Self::response_text(&repair_res);
            match json::parse_profile(&repair_text, user_id, Utc::now()) {
                Ok(profile) => return Ok(profile),
                Err(err) => {
                    last_err = err;
                    last_text = repair_text;
                    last_raw_json = repair_raw_json;
                    tracing::warn!(
                        attempt,
                        user_id,
                        error = %last_err,
                        "LLM output still invalid after repair attempt"
                    );
                }
            }
        }

        Err(LlmDiagnosticsError {
            provider: Provider::Anthropic,
            stage: "parse_after_repair",
            detail: format!("final_error={last_err}"),
            raw_output: Some(last_text),
            raw_response_json: Some(last_raw_json),
        }
        .into())
    }
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn extract_profile(
        &self,
        user_id: &str,
        message: &str,
        sector_names: &[&str],
    ) -> anyhow::Result<InvestorProfile> {
        self.request_profile(
            user_id,
            Self::profile_system_prompt(sector_names),
            Self::extract_prompt(message),
        )
        .await
    }

    async fn update_profile(
        &self,
        current: &InvestorProfile,
        message: &str,
        sector_names: &[&str],
    ) -> anyhow::Result<InvestorProfile> {
        self.request_profile(
            &current.user_id,
            Self::profile_system_prompt(sector_names),
            Self::update_prompt(current, message)?,
        )
        .await
    }

    async fn classify_ticker(
        &self,
        ticker: &str,
        sector_names: &[&str],
    ) -> anyhow::Result<TickerClassification> {
        let req = CreateMessageRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: Some(Self::ticker_system_prompt(sector_names)),
            messages: vec![Message {
                role: "user",
                content: format!("Classify stock ticker: {ticker}"),
            }],
            tools: Some(Self::ticker_tools(sector_names)),
            tool_choice: Some(ToolChoice::Tool {
                name: TOOL_NAME_EMIT_TICKER,
            }),
        };

        let (raw_json, res) = self.create_message(req).await?;

        if let Some(wire) = Self::response_tool_classification(&res)? {
            return wire.validate_and_canonicalize(sector_names);
        }

        // Text fallback: the model declined the tool or answered in prose.
        let text = Self::response_text(&res);
        if let Some(json_text) = json::extract_json(&text) {
            if let Ok(wire) = serde_json::from_str::<TickerClassification>(&json_text) {
                return wire.validate_and_canonicalize(sector_names);
            }
        }

        Err(LlmDiagnosticsError {
            provider: Provider::Anthropic,
            stage: "classify_ticker",
            detail: format!("no classification for {ticker}"),
            raw_output: Some(text),
            raw_response_json: Some(raw_json),
        }
        .into())
    }

    async fn explain_plan(
        &self,
        profile: &InvestorProfile,
        metrics: &PortfolioMetrics,
        plan: &RebalancePlan,
    ) -> anyhow::Result<String> {
        let context = serde_json::json!({
            "profile": profile,
            "metrics": metrics,
            "plan": plan,
        });
        let req = CreateMessageRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: Some(
                "You are an investment assistant. Explain the rebalance plan to the \
client in 2-4 plain sentences. Mention the main trades and any warnings. \
Do not output JSON, headings, or bullet lists."
                    .to_string(),
            ),
            messages: vec![Message {
                role: "user",
                content: format!("Plan context JSON:\n{context}"),
            }],
            tools: None,
            tool_choice: None,
        };

        let (raw_json, res) = self.create_message(req).await?;
        let text = Self::response_text(&res);
        if text.trim().is_empty() {
            return Err(LlmDiagnosticsError {
                provider: Provider::Anthropic,
                stage: "explain",
                detail: "empty explanation".to_string(),
                raw_output: None,
                raw_response_json: Some(raw_json),
            }
            .into());
        }
        Ok(text.trim().to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "tool")]
    Tool { name: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: String,
        #[serde(default)]
        signature: String,
    },

    #[serde(rename = "redacted_thinking")]
    RedactedThinking {
        #[serde(default)]
        data: String,
    },

    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::profile::Objective;
    use serde_json::json;

    #[test]
    fn parses_tool_use_profile_input() {
        let tool_input = json!({
            "objective": "income",
            "horizon_months": 36,
            "risk_score": 30,
            "constraints": {"exclusions": ["BA"]},
            "preferences": {"sectors_like": ["Utilities"]},
        });

        let res = CreateMessageResponse {
            content: vec![ContentBlock::ToolUse {
                id: "toolu_1".to_string(),
                name: TOOL_NAME_EMIT_PROFILE.to_string(),
                input: tool_input,
            }],
        };

        let wire = AnthropicClient::response_tool_profile(&res).unwrap().unwrap();
        let profile = wire.validate_and_into_profile("u1", Utc::now()).unwrap();
        assert_eq!(profile.objective, Objective::Income);
        assert_eq!(profile.risk_score, 30);
        assert_eq!(profile.constraints.exclusions, vec!["BA"]);
    }

    #[test]
    fn parses_tool_use_ticker_classification() {
        let res = CreateMessageResponse {
            content: vec![ContentBlock::ToolUse {
                id: "toolu_2".to_string(),
                name: TOOL_NAME_EMIT_TICKER.to_string(),
                input: json!({
                    "ticker": "shop",
                    "name": "Shopify Inc.",
                    "sector": "technology",
                    "market_cap": "large",
                    "industry_risk": "high"
                }),
            }],
        };

        let wire = AnthropicClient::response_tool_classification(&res)
            .unwrap()
            .unwrap();
        let c = wire
            .validate_and_canonicalize(&["Technology", "Energy"])
            .unwrap();
        assert_eq!(c.ticker, "SHOP");
        assert_eq!(c.sector, "Technology");
    }

    #[test]
    fn ticker_schema_constrains_sector_to_catalog() {
        let tools = AnthropicClient::ticker_tools(&["Technology", "Energy"]);
        let schema = serde_json::to_value(&tools[0].input_schema).unwrap();
        assert_eq!(
            schema["properties"]["sector"]["enum"],
            json!(["Technology", "Energy"])
        );
    }

    #[test]
    fn system_prompt_lists_catalog_sectors() {
        let prompt = AnthropicClient::profile_system_prompt(&["Technology", "Energy"]);
        assert!(prompt.contains("Technology, Energy"));
    }

    #[test]
    fn text_response_skips_tool_blocks() {
        let res = CreateMessageResponse {
            content: vec![
                ContentBlock::Text {
                    text: "hello".to_string(),
                },
                ContentBlock::ToolUse {
                    id: String::new(),
                    name: String::new(),
                    input: serde_json::Value::Null,
                },
            ],
        };
        assert_eq!(AnthropicClient::response_text(&res), "hello");
    }
}
