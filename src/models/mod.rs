use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::BotMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    pub amount_g: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MacroNutrients {
    pub calories: f64,
    pub protein: f64,
    pub fat: f64,
    pub carbs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NutritionData {
    pub per_100g: MacroNutrients,
    pub total: MacroNutrients,
}

/// Unified shape returned by both the Analyzer and the Validator prompts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FoodAnalysisResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dish: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingredients: Option<Vec<Ingredient>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_weight_g: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nutrition: Option<NutritionData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
}

impl FoodAnalysisResult {
    /// Result used when the model output cannot be parsed at all.
    pub fn failed() -> Self {
        Self {
            error: Some(true),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.unwrap_or(false)
    }

    /// A result the pipeline may continue with (or hand to the formatter).
    pub fn is_usable(&self) -> bool {
        !self.is_error() && self.nutrition.is_some()
    }

    /// Flags the result as failed. An error-flagged result never keeps nutrition.
    pub fn into_failed(mut self) -> Self {
        self.error = Some(true);
        self.nutrition = None;
        self
    }

    /// Fills fields the validator left out from the analyzer output.
    pub fn merged_over(self, base: &FoodAnalysisResult) -> Self {
        Self {
            dish: self.dish.or_else(|| base.dish.clone()),
            ingredients: self.ingredients.or_else(|| base.ingredients.clone()),
            estimated_weight_g: self.estimated_weight_g.or(base.estimated_weight_g),
            nutrition: self.nutrition.or(base.nutrition),
            error: self.error,
        }
    }

    pub fn ingredients_weight_g(&self) -> Option<f64> {
        match self.ingredients.as_deref() {
            Some(items) if !items.is_empty() => Some(items.iter().map(|i| i.amount_g).sum()),
            _ => None,
        }
    }

    /// Portion weight: the model's estimate, else the ingredient sum.
    pub fn portion_weight_g(&self) -> Option<f64> {
        self.estimated_weight_g
            .filter(|w| *w > 0.0)
            .or_else(|| self.ingredients_weight_g())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMetric {
    pub model: String,
    pub response_id: String,
    pub latency_sec: f64,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub status: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    Analyzer,
    Validator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dish: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingredients: Option<Vec<Ingredient>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_weight_g: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReference {
    pub database: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionResult {
    #[serde(flatten)]
    pub nutrition: NutritionData,
    pub source_reference: SourceReference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationDetails {
    pub was_corrected: bool,
    pub correction_details: BTreeMap<String, String>,
    pub validation_flags: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LlmInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<LlmMetric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validator: Option<LlmMetric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetadata {
    pub stage_order: Vec<PipelineStage>,
    pub timestamp_utc: DateTime<Utc>,
    pub error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishAnalysisPipeline {
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dish_result: Option<DishResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nutrition_result: Option<NutritionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationDetails>,
    pub llm_info: LlmInfo,
    pub pipeline_metadata: PipelineMetadata,
}

/// Audit record of one analysis run. Logged, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineLog {
    pub dish_analysis_pipeline: DishAnalysisPipeline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Success => "success",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BotStatus {
    Idle,
    Running,
    Error,
    Stopped,
}

/// Snapshot of the bot runner served by the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotState {
    pub status: BotStatus,
    pub mode: BotMode,
    pub bot_username: Option<String>,
    pub processed_count: u64,
    pub last_update: Option<DateTime<Utc>>,
}
