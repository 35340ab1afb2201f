use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::models::{FoodAnalysisResult, LlmMetric, PipelineStage};

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: MessageContent::Text(text.to_string()),
        }
    }

    pub fn user_text(text: String) -> Self {
        Self {
            role: "user".to_string(),
            content: MessageContent::Text(text),
        }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: "user".to_string(),
            content: MessageContent::Parts(parts),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageData },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageData {
    pub url: String,
    pub detail: String,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    /// The API fetches the image itself; no bytes are uploaded.
    pub fn image_url(url: &str) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageData {
                url: url.to_string(),
                detail: "auto".to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// One completion call: the parsed analysis plus its telemetry.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub parsed: FoodAnalysisResult,
    pub metrics: LlmMetric,
    pub content: String,
}

const TEMPERATURE: f64 = 0.2;

pub struct CompletionClient {
    api_key: String,
    base_url: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl CompletionClient {
    pub fn new(api_key: String, base_url: String, max_tokens: u32) -> Self {
        Self {
            api_key,
            base_url,
            max_tokens,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Sends one chat completion and parses the reply as a food analysis.
    ///
    /// A non-success status is an error. Unparseable content is not: it comes
    /// back as an error-flagged result.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        model: &str,
        stage: PipelineStage,
    ) -> Result<CompletionOutcome> {
        let request = ChatRequest {
            model,
            messages,
            max_tokens: self.max_tokens,
            temperature: TEMPERATURE,
        };

        log::info!("🤖 Sending {:?} request with model: {}", stage, model);
        log::debug!("📤 Request payload size: {} bytes", serde_json::to_string(&request)?.len());

        let started = Instant::now();
        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;
        let latency_sec = started.elapsed().as_secs_f64();

        let status = response.status();
        log::debug!("📥 Completion response status: {}", status);

        if !status.is_success() {
            let error_text = response.text().await?;
            log::error!("❌ OpenAI API error response: {}", error_text);
            anyhow::bail!("OpenAI API error ({:?}, {}): {}", stage, status, error_text);
        }

        let chat_response: ChatResponse = response.json().await?;
        let usage = chat_response.usage.unwrap_or_default();

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_else(|| "{}".to_string());
        log::debug!("💬 {:?} response content: {}", stage, content);

        let metrics = LlmMetric {
            model: chat_response.model.unwrap_or_else(|| model.to_string()),
            response_id: chat_response.id.unwrap_or_default(),
            latency_sec,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            status: status.as_u16(),
        };

        let parsed = parse_analysis(&content).unwrap_or_else(|e| {
            log::warn!("⚠️ Failed to parse {:?} JSON ({}): {}", stage, e, content);
            FoodAnalysisResult::failed()
        });

        Ok(CompletionOutcome {
            parsed,
            metrics,
            content,
        })
    }
}

/// Strips markdown code fences from a model reply.
pub fn clean_json(text: &str) -> String {
    text.replace("```json", "").replace("```", "").trim().to_string()
}

/// Best-effort JSON extraction: fences first, then the outermost `{...}` span.
pub fn parse_analysis(content: &str) -> Result<FoodAnalysisResult> {
    let cleaned = clean_json(content);
    match serde_json::from_str(&cleaned) {
        Ok(result) => Ok(result),
        Err(err) => {
            let start = cleaned.find('{');
            let end = cleaned.rfind('}');
            match (start, end) {
                (Some(start), Some(end)) if start < end => {
                    Ok(serde_json::from_str(&cleaned[start..=end])?)
                }
                _ => Err(err.into()),
            }
        }
    }
}
