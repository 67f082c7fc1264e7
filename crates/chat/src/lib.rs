//! HTTP client for the remote chat/indexing agent.
//!
//! Two operations: submit a document for indexing (fire-and-forget,
//! failures are swallowed) and ask a question against the configured
//! agent. Errors from `ask` are typed so the caller can turn them into a
//! synthetic assistant message instead of crashing the chat panel.

use std::time::Duration;

use marginalia_core::{Document, Settings};
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent request failed: {message}")]
    RequestFailed { message: String },
    #[error("agent returned status {status}")]
    BadStatus { status: u16 },
    #[error("{message}")]
    Agent { message: String },
    #[error("failed to parse agent response: {message}")]
    Parse { message: String },
}

/// Answer text plus the optional citations and follow-up suggestions the
/// agent attaches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentAnswer {
    pub answer: String,
    pub sources: Vec<String>,
    pub followups: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub base_url: String,
    pub agent_id: String,
    pub timeout_secs: u64,
}

impl AgentConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            base_url: settings.agent_base_url.clone(),
            agent_id: settings.agent_id.clone(),
            timeout_secs: 60,
        }
    }
}

pub struct AgentClient {
    config: AgentConfig,
    agent: ureq::Agent,
}

impl AgentClient {
    pub fn new(config: AgentConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self { config, agent }
    }

    /// Submit a document for indexing. Failures are logged and swallowed;
    /// the library works without the remote index.
    pub fn index_document(&self, document: &Document) {
        let url = format!("{}/api/documents", self.config.base_url);
        let body = json!({
            "id": document.id.as_str(),
            "title": document.title,
            "content": document.content,
            "agent_id": self.config.agent_id,
        });
        if let Err(err) = self.agent.post(&url).send_json(body) {
            tracing::debug!(error = %err, "document indexing submission failed; ignoring");
        }
    }

    /// Ask a free-text question against the configured agent.
    pub fn ask(&self, question: &str) -> Result<AgentAnswer, AgentError> {
        let url = format!("{}/api/ask", self.config.base_url);
        let body = json!({
            "question": question,
            "agent_id": self.config.agent_id,
        });

        let response = self
            .agent
            .post(&url)
            .send_json(body)
            .map_err(|err| match err {
                ureq::Error::Status(status, _) => AgentError::BadStatus { status },
                other => AgentError::RequestFailed {
                    message: other.to_string(),
                },
            })?;

        let value: Value = response.into_json().map_err(|err| AgentError::Parse {
            message: err.to_string(),
        })?;
        parse_answer(value)
    }
}

fn parse_answer(value: Value) -> Result<AgentAnswer, AgentError> {
    if let Some(message) = value.get("error").and_then(Value::as_str) {
        return Err(AgentError::Agent {
            message: message.to_string(),
        });
    }

    let answer = value
        .get("answer")
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::Parse {
            message: "response has no `answer` field".to_string(),
        })?
        .to_string();

    let sources = string_list(value.get("sources"));
    let followups = value
        .get("followups")
        .or_else(|| value.get("follow_up_questions"))
        .or_else(|| value.get("suggestions"))
        .map(|list| string_list(Some(list)))
        .unwrap_or_default();

    Ok(AgentAnswer {
        answer,
        sources,
        followups,
    })
}

/// Citations arrive either as plain strings or as objects carrying a
/// `title`/`text` field; anything else is skipped.
fn string_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(entries)) = value else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map
                .get("title")
                .or_else(|| map.get("text"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect()
}
