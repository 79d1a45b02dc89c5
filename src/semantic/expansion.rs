//! AI query expansion.
//!
//! A short query such as "car" is turned into related terms ("bmw",
//! "vehicle", ...) by an OpenAI-compatible chat endpoint so keyword scoring
//! can find pages that never mention the query word.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::QueryExpansionConfig;

/// Maximum number of expansion terms kept from a reply
const MAX_EXPANSIONS: usize = 8;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const EXPAND_PROMPT: &str = "You expand search queries over a personal browsing history. \
Reply with up to 8 short related search terms (synonyms, brands, concrete examples), \
comma separated, lowercase, with no numbering and no explanation.";

static LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s*").expect("valid list marker regex"));

pub type ExpansionFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<String>, ExpansionError>> + Send + 'a>>;

#[derive(thiserror::Error, Debug)]
pub enum ExpansionError {
    #[error("expansion request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("expansion endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// Turns a query into related search terms.
pub trait QueryExpander: Send + Sync {
    fn expand<'a>(&'a self, query: &'a str) -> ExpansionFuture<'a>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Expander backed by an OpenAI-compatible chat completions endpoint.
pub struct LlmExpander {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl LlmExpander {
    pub fn new(config: &QueryExpansionConfig) -> Result<Self, ExpansionError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        if api_key.is_none() {
            log::debug!("{} is not set, calling expansion endpoint without a key", config.api_key_env);
        }

        Ok(Self {
            client,
            url: config.url.clone(),
            model: config.model.clone(),
            api_key,
        })
    }

    async fn request(&self, query: &str) -> Result<Vec<String>, ExpansionError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: EXPAND_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: query,
                },
            ],
            temperature: 0.1,
        };

        let mut builder = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ExpansionError::Status { status, body });
        }

        let chat: ChatResponse = resp.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(parse_expansion(&content, query))
    }
}

impl QueryExpander for LlmExpander {
    fn expand<'a>(&'a self, query: &'a str) -> ExpansionFuture<'a> {
        Box::pin(self.request(query))
    }
}

/// Splits a model reply into de-duplicated lowercase terms, dropping the
/// query itself.
pub fn parse_expansion(raw: &str, query: &str) -> Vec<String> {
    let query = query.trim().to_lowercase();
    let mut terms: Vec<String> = Vec::new();

    for part in raw.split([',', '\n', ';']) {
        let term = LIST_MARKER.replace(part, "");
        let term = term.trim().trim_matches(['"', '\'', '.']).trim().to_lowercase();

        if term.is_empty() || term == query || terms.contains(&term) {
            continue;
        }
        terms.push(term);
        if terms.len() == MAX_EXPANSIONS {
            break;
        }
    }

    terms
}
