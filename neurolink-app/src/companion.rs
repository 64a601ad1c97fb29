//! Pet companion backed by a generative-text service.
//!
//! The companion never fails from the caller's point of view: any generation
//! error is logged and replaced by a fixed reply.

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

pub const CHAT_FALLBACK: &str =
    "Sorry, my pixel brain is a little busy right now. Could you say that again?";
pub const MISSION_FALLBACK: &str = "Let's go explore something new! No mission could be generated right now.";
pub const PUZZLE_HINT_FALLBACK: &str = "Keep trying, you almost have it! Think outside the box.";
pub const POST_FALLBACK: &str = "The post content could not be generated.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self { role: Role::Model, text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("no generative-text service configured")]
    NotConfigured,
    #[error("generation request failed: {0}")]
    Network(String),
    #[error("generation rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("generation returned no text")]
    Empty,
}

/// Generative-text collaborator.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Continue `turns`; the last turn is the prompt.
    async fn generate(&self, turns: &[Turn]) -> Result<String, GenerationError>;
}

/// Stand-in used when no API key is given.
pub struct Offline;

#[async_trait]
impl TextGenerator for Offline {
    async fn generate(&self, _turns: &[Turn]) -> Result<String, GenerationError> {
        Err(GenerationError::NotConfigured)
    }
}

// ─── Gemini REST ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    role: Role,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// `models/{model}:generateContent` client.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: Url,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(endpoint: &str, model: impl Into<String>, api_key: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()?,
            endpoint: Url::parse(endpoint)?,
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    pub fn generate_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("models")
                .push(&format!("{}:generateContent", self.model));
        }
        url.query_pairs_mut().append_pair("key", &self.api_key);
        url
    }
}

fn parse_generation(status: reqwest::StatusCode, body: &[u8]) -> Result<String, GenerationError> {
    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorEnvelope>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());
        return Err(GenerationError::Rejected {
            status: status.as_u16(),
            message,
        });
    }
    let response: GenerateResponse =
        serde_json::from_slice(body).map_err(|e| GenerationError::Network(e.to_string()))?;
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        Err(GenerationError::Empty)
    } else {
        Ok(text)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, turns: &[Turn]) -> Result<String, GenerationError> {
        let request = GenerateRequest {
            contents: turns
                .iter()
                .map(|turn| Content {
                    role: turn.role,
                    parts: [Part { text: &turn.text }],
                })
                .collect(),
        };
        let response = self
            .http
            .post(self.generate_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;
        parse_generation(status, &body)
    }
}

// ─── Companion ───────────────────────────────────────────────────────────────

/// Chat partner with a running conversation history.
pub struct Companion {
    generator: Box<dyn TextGenerator>,
    history: Vec<Turn>,
}

impl Companion {
    pub fn new(generator: Box<dyn TextGenerator>) -> Self {
        Self {
            generator,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Send a chat message. The exchange is kept in history only when it succeeds.
    pub async fn chat(&mut self, message: &str) -> String {
        let mut turns = self.history.clone();
        turns.push(Turn::user(message));
        match self.generator.generate(&turns).await {
            Ok(reply) => {
                turns.push(Turn::model(reply.clone()));
                self.history = turns;
                reply
            }
            Err(err) => {
                log::warn!("chat generation failed: {err}");
                CHAT_FALLBACK.to_string()
            }
        }
    }

    /// One-shot mission built from the user's idea; does not touch chat history.
    pub async fn mission(&self, idea: &str) -> String {
        self.one_shot("mission", mission_prompt(idea), MISSION_FALLBACK).await
    }

    /// Nudge toward a puzzle solution without giving it away.
    pub async fn puzzle_hint(&self, puzzle_state: &str, previous_attempts: &[String]) -> String {
        let prompt = puzzle_hint_prompt(puzzle_state, previous_attempts);
        self.one_shot("puzzle hint", prompt, PUZZLE_HINT_FALLBACK).await
    }

    /// Short social post about `topic`.
    pub async fn post_content(&self, topic: &str) -> String {
        self.one_shot("post", post_prompt(topic), POST_FALLBACK).await
    }

    async fn one_shot(&self, what: &str, prompt: String, fallback: &str) -> String {
        match self.generator.generate(&[Turn::user(prompt)]).await {
            Ok(text) => text,
            Err(err) => {
                log::warn!("{what} generation failed: {err}");
                fallback.to_string()
            }
        }
    }
}

fn mission_prompt(idea: &str) -> String {
    format!(
        "Create a small interactive mission for a 'Pixel Pet' (a virtual fox) \
         based on this idea from the user: '{idea}'. \
         The mission should be something the user can do with their phone \
         (take a photo, record a sound, find something in the real world). \
         Be creative and concise. \
         Example: 'Find something shiny and take a photo.' or 'Record the sound of a bird singing.'"
    )
}

fn puzzle_hint_prompt(puzzle_state: &str, previous_attempts: &[String]) -> String {
    let attempts = if previous_attempts.is_empty() {
        "none".to_string()
    } else {
        previous_attempts.join("; ")
    };
    format!(
        "A player is solving a logic puzzle. \
         Current state: {puzzle_state}. \
         Previous failed attempts: {attempts}. \
         Give a subtle hint that does not reveal the solution. \
         Focus on the logic or the pattern, and keep it brief."
    )
}

fn post_prompt(topic: &str) -> String {
    format!(
        "You are a social media expert. Write a short, attractive post for a digital \
         influencer about: '{topic}'. Include relevant hashtags, use a modern tone \
         and stay under 100 words."
    )
}
