//! Configuration snapshot.
//!
//! A read-only snapshot loaded once at startup. Out-of-range values are
//! clamped rather than rejected — a misconfigured timer should degrade to a
//! sane default, not keep the daemon from starting.

use crate::error::{ParleyError, Result};
use crate::UserId;

use chrono::Duration;
use serde::Deserialize;

/// Bounds for the batch merge window. Anything outside is clamped.
const MERGE_WINDOW_MIN_SECS: u64 = 1;
const MERGE_WINDOW_MAX_SECS: u64 = 30;

/// Floor for forward-bundle text chunks; below this the bundle degenerates
/// into one message per sentence.
const FORWARD_CHUNK_MIN_CHARS: usize = 200;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The assistant's own platform id; mentions of it are what make a
    /// message urgent.
    pub assistant_id: u64,
    pub assistant_name: String,

    /// Cheap classifier model for the engage decision.
    pub triage_model: String,
    /// Full model for replies and reports.
    pub chat_model: String,
    pub max_tokens: u32,
    /// Let the reply model use web search, where the backend supports it.
    pub enable_search: bool,

    /// Assistant replies per session before a report is forced.
    pub max_turns: u32,
    /// Triage verdicts below this confidence do not engage.
    pub min_confidence: f32,

    pub merge_window_secs: u64,
    /// Hard cap on batched fragments per key; reaching it flushes early.
    pub batch_cap: usize,
    /// Recent room messages fetched for first-reply context.
    pub history_count: u32,

    pub session_timeout_secs: u64,
    pub cooldown_secs: u64,
    pub triage_timeout_secs: u64,
    pub context_timeout_secs: u64,
    pub reply_timeout_secs: u64,
    pub report_timeout_secs: u64,

    /// Code-point budget per forward-bundle text part.
    pub forward_chunk_chars: usize,

    /// Exact (trimmed, case-insensitive) matches that end a session with no
    /// report.
    pub interrupt_keywords: Vec<String>,
    /// Exact matches that end a session with an early report.
    pub report_keywords: Vec<String>,

    pub prompts: PromptSet,
    pub notices: NoticeSet,
    pub llm: LlmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            assistant_id: 0,
            assistant_name: "assistant".into(),
            triage_model: "qwen-turbo".into(),
            chat_model: "qwen-plus".into(),
            max_tokens: 1024,
            enable_search: false,
            max_turns: 6,
            min_confidence: 0.7,
            merge_window_secs: 5,
            batch_cap: 10,
            history_count: 20,
            session_timeout_secs: 300,
            cooldown_secs: 600,
            triage_timeout_secs: 20,
            context_timeout_secs: 10,
            reply_timeout_secs: 90,
            report_timeout_secs: 120,
            forward_chunk_chars: 3000,
            interrupt_keywords: vec!["stop".into(), "enough".into()],
            report_keywords: vec!["wrap up".into(), "summarize".into()],
            prompts: PromptSet::default(),
            notices: NoticeSet::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl Config {
    /// Load a TOML config file and clamp it into a usable snapshot.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            ParleyError::Config(format!("cannot read {}: {error}", path.display()))
        })?;
        let mut config: Config = toml::from_str(&raw)
            .map_err(|error| ParleyError::Config(format!("{}: {error}", path.display())))?;
        config.clamp();
        Ok(config)
    }

    /// Force every tunable into its sane range.
    pub fn clamp(&mut self) {
        self.merge_window_secs = self
            .merge_window_secs
            .clamp(MERGE_WINDOW_MIN_SECS, MERGE_WINDOW_MAX_SECS);
        self.max_turns = self.max_turns.max(1);
        self.batch_cap = self.batch_cap.max(1);
        self.min_confidence = self.min_confidence.clamp(0.0, 1.0);
        self.forward_chunk_chars = self.forward_chunk_chars.max(FORWARD_CHUNK_MIN_CHARS);
        self.session_timeout_secs = self.session_timeout_secs.max(1);
        self.cooldown_secs = self.cooldown_secs.max(1);
        self.triage_timeout_secs = self.triage_timeout_secs.max(1);
        self.context_timeout_secs = self.context_timeout_secs.max(1);
        self.reply_timeout_secs = self.reply_timeout_secs.max(1);
        self.report_timeout_secs = self.report_timeout_secs.max(1);
    }

    pub fn assistant(&self) -> UserId {
        UserId(self.assistant_id)
    }

    pub fn merge_window(&self) -> Duration {
        Duration::seconds(self.merge_window_secs as i64)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::seconds(self.session_timeout_secs as i64)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs as i64)
    }
}

/// Prompt templates with `{placeholder}` substitution.
///
/// Kept in config so operators can localize or re-voice the assistant
/// without a rebuild.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PromptSet {
    pub triage: String,
    pub reply_system: String,
    pub report_system: String,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            triage: "You decide whether the assistant \"{assistant_name}\" should join \
                     a conversation. Recent messages from one person:\n{evidence}\n\
                     Room context (may be empty):\n{context}\n\
                     Answer with exactly one line: a JSON object \
                     {\"decision\": \"yes\" or \"no\", \"confidence\": 0.0-1.0, \"reason\": \"...\"}. \
                     No other text."
                .into(),
            reply_system: "You are {assistant_name}, a helpful chat assistant. Keep replies \
                           short and conversational.\n{context}"
                .into(),
            report_system: "Write up the conversation you just had. Output a long-form \
                            rendition, then a line containing exactly {divider}, then a \
                            copy-paste-friendly action summary."
                .into(),
        }
    }
}

impl PromptSet {
    pub fn render_triage(&self, assistant_name: &str, evidence: &str, context: &str) -> String {
        self.triage
            .replace("{assistant_name}", assistant_name)
            .replace("{evidence}", evidence)
            .replace("{context}", context)
    }

    pub fn render_reply_system(&self, assistant_name: &str, context: &str) -> String {
        self.reply_system
            .replace("{assistant_name}", assistant_name)
            .replace("{context}", context)
    }

    pub fn render_report_system(&self, divider: &str) -> String {
        self.report_system.replace("{divider}", divider)
    }
}

/// User-visible notices. Short, non-technical, and localizable.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NoticeSet {
    pub interrupt_ack: String,
    pub nothing_to_report: String,
    pub reply_failed: String,
    pub reply_timed_out: String,
    pub report_failed: String,
    pub session_timed_out: String,
}

impl Default for NoticeSet {
    fn default() -> Self {
        Self {
            interrupt_ack: "Okay, ending our chat here.".into(),
            nothing_to_report: "Nothing substantial to write up — ending here.".into(),
            reply_failed: "Sorry, something went wrong on my end. Let's pick this up later."
                .into(),
            reply_timed_out: "Sorry, that reply timed out. Please send your message again."
                .into(),
            report_failed: "Sorry, I couldn't put the summary together.".into(),
            session_timed_out: "This chat has been idle for a while, so I'm wrapping it up."
                .into(),
        }
    }
}

/// Model backend connection settings for the bundled HTTP adapter.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions".into(),
            api_key: String::new(),
            request_timeout_secs: 120,
        }
    }
}
