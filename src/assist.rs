//! Text-to-SQL assistance
//!
//! The model is untrusted: it only ever produces a *candidate* statement that
//! is returned to the caller for review. Nothing here executes SQL.
//!
//! - [`render_prompt`] builds the prompt from a schema description
//!   (see [`Schema::to_ddl`](crate::schema::Schema::to_ddl)) and the user's
//!   request.
//! - [`extract_sql`] strips the markdown fence models like to wrap code in.
//! - [`SqlGenerator`] is the seam to the model; the `assist` feature provides
//!   an OpenAI-compatible chat-completions client.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::{DatascopeError, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

const SYSTEM_PROMPT: &str = "You are an expert SQLite developer. \
Translate requests into a single SQLite query. \
Reply with the SQL only: no explanation and no commentary.";

/// Build the prompt sent to the model.
pub fn render_prompt(schema_description: &str, request: &str) -> String {
    format!(
        "Given the following SQLite database schema:\n\n\
         {}\n\n\
         Write a single SQLite query that answers this request:\n\
         {}\n\n\
         Use only the tables and columns above. Return only the SQL query.",
        schema_description.trim(),
        request.trim()
    )
}

fn fenced_block() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    // Optional language tag must be followed by a newline, so a one-line
    // ```SELECT ...``` keeps its first word.
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:[A-Za-z0-9_+-]*[ \t]*\r?\n)?(.*?)```").expect("valid fence regex")
    })
}

/// Strip an enclosing markdown code fence from a model response.
///
/// The first fenced block wins; text without a fence is returned trimmed.
pub fn extract_sql(response: &str) -> String {
    let trimmed = response.trim();
    match fenced_block().captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim().to_string(),
        None => trimmed.to_string(),
    }
}

/// A text-generation backend that turns a prompt into a response.
pub trait SqlGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String>;
}

impl<F> SqlGenerator for F
where
    F: Fn(&str) -> Result<String> + Send + Sync,
{
    fn generate(&self, prompt: &str) -> Result<String> {
        self(prompt)
    }
}

/// Ask a generator for SQL answering `request` against `schema_description`.
pub fn generate_sql(
    generator: &dyn SqlGenerator,
    schema_description: &str,
    request: &str,
) -> Result<String> {
    if request.trim().is_empty() {
        return Err(DatascopeError::QueryError(
            "Prompt cannot be empty".to_string(),
        ));
    }
    let prompt = render_prompt(schema_description, request);
    let response = generator.generate(&prompt)?;
    let sql = extract_sql(&response);
    if sql.is_empty() {
        return Err(DatascopeError::AssistError(
            "model returned an empty response".to_string(),
        ));
    }
    Ok(sql)
}

/// Connection settings for an OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub struct AssistConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for AssistConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Chat-completions client (`POST {base_url}/v1/chat/completions`)
#[cfg(feature = "assist")]
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleGenerator {
    base_url: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

#[cfg(feature = "assist")]
impl OpenAiCompatibleGenerator {
    /// Build a client, or `None` when no API key is configured.
    pub fn from_config(config: &AssistConfig) -> Option<Self> {
        let api_key = config.api_key.as_deref()?.trim();
        if api_key.is_empty() {
            return None;
        }
        Some(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.to_string(),
            timeout: config.timeout,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

#[cfg(feature = "assist")]
impl SqlGenerator for OpenAiCompatibleGenerator {
    fn generate(&self, prompt: &str) -> Result<String> {
        let url = self.endpoint();
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
        });

        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(self.timeout))
            .build()
            .into();

        tracing::info!("Requesting SQL from {} ({})", url, self.model);
        let mut response = agent
            .post(&url)
            .header("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(&body)
            .map_err(|e| DatascopeError::AssistError(format!("request to {} failed: {}", url, e)))?;

        let value: serde_json::Value = response
            .body_mut()
            .read_json()
            .map_err(|e| DatascopeError::AssistError(format!("invalid JSON response: {}", e)))?;

        chat_completion_text(&value).ok_or_else(|| {
            DatascopeError::AssistError("no message content in response".to_string())
        })
    }
}

/// Pull `choices[0].message.content` out of a chat-completions response.
pub fn chat_completion_text(value: &serde_json::Value) -> Option<String> {
    value
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}
