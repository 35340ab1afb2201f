use anyhow::Result;
use chrono::Utc;
use std::collections::BTreeMap;

use crate::config::{ModeHandle, ModelMapping};
use crate::models::{
    DishAnalysisPipeline, DishResult, FoodAnalysisResult, LlmInfo, NutritionResult,
    PipelineLog, PipelineMetadata, PipelineStage, SourceReference, ValidationDetails,
};
use crate::services::ai_service::FoodAnalyzer;
use crate::services::logger::LogSink;
use crate::services::openai::{ChatMessage, CompletionClient, ContentPart};
use crate::services::prompts::{
    PHOTO_COMMENT_PREFIX, PHOTO_SYSTEM_PROMPT, TEXT_SYSTEM_PROMPT, VALIDATOR_SYSTEM_PROMPT,
};

/// Allowed gap between the ingredient sum and the estimated portion weight.
const WEIGHT_TOLERANCE: f64 = 0.15;

/// Final result of one analysis together with its audit record.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub result: FoodAnalysisResult,
    pub log: PipelineLog,
}

/// Two-stage analysis: the Analyzer identifies the dish and does the first
/// nutrition estimate, the Validator audits and corrects the numbers.
pub struct AnalysisService {
    client: CompletionClient,
    models: ModelMapping,
    mode: ModeHandle,
    logger: LogSink,
}

impl AnalysisService {
    pub fn new(
        client: CompletionClient,
        models: ModelMapping,
        mode: ModeHandle,
        logger: LogSink,
    ) -> Self {
        Self {
            client,
            models,
            mode,
            logger,
        }
    }

    pub async fn run_pipeline(
        &self,
        image_url: Option<&str>,
        text_description: Option<&str>,
    ) -> Result<PipelineOutcome> {
        let image_url = image_url.map(str::trim).filter(|s| !s.is_empty());
        let text_description = text_description.map(str::trim).filter(|s| !s.is_empty());

        if image_url.is_none() && text_description.is_none() {
            anyhow::bail!("No input provided");
        }

        // Captured once: a mode switch mid-request does not affect this run.
        let mode = self.mode.current();
        let model = self.models.model_for(mode).to_string();

        let mut log = PipelineLog {
            dish_analysis_pipeline: DishAnalysisPipeline {
                image_url: image_url.map(str::to_string),
                dish_result: None,
                nutrition_result: None,
                validation: None,
                llm_info: LlmInfo::default(),
                pipeline_metadata: PipelineMetadata {
                    stage_order: Vec::new(),
                    timestamp_utc: Utc::now(),
                    error: false,
                },
            },
        };

        self.logger
            .info(format!("[Pipeline] Started using {} ({} mode)", model, mode));

        match self
            .execute(&mut log, image_url, text_description, &model)
            .await
        {
            Ok(result) => Ok(PipelineOutcome { result, log }),
            Err(e) => {
                self.logger.error(format!("Pipeline crashed: {}", e));
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        log: &mut PipelineLog,
        image_url: Option<&str>,
        text_description: Option<&str>,
        model: &str,
    ) -> Result<FoodAnalysisResult> {
        let pipeline = &mut log.dish_analysis_pipeline;

        pipeline.pipeline_metadata.stage_order.push(PipelineStage::Analyzer);
        let analyzer = self
            .client
            .complete(
                &analyzer_messages(image_url, text_description),
                model,
                PipelineStage::Analyzer,
            )
            .await?;
        pipeline.llm_info.analyzer = Some(analyzer.metrics);

        if !analyzer.parsed.is_usable() {
            pipeline.pipeline_metadata.error = true;
            self.logger
                .error(format!("[Pipeline Result]\n{}", render_log(log)));
            return Ok(analyzer.parsed.into_failed());
        }

        pipeline.pipeline_metadata.stage_order.push(PipelineStage::Validator);
        self.logger.info("[Pipeline] Sending to Validator...");

        let payload = serde_json::to_string(&analyzer.parsed)?;
        let validator = self
            .client
            .complete(&validator_messages(payload), model, PipelineStage::Validator)
            .await?;
        pipeline.llm_info.validator = Some(validator.metrics);

        let final_result = if validator.parsed.is_usable() {
            validator.parsed.merged_over(&analyzer.parsed)
        } else {
            self.logger
                .warn("[Pipeline] Validator returned no usable result, keeping Analyzer output");
            analyzer.parsed.clone()
        };

        pipeline.dish_result = Some(DishResult {
            dish: final_result.dish.clone(),
            ingredients: final_result.ingredients.clone(),
            estimated_weight_g: final_result.estimated_weight_g,
        });
        pipeline.nutrition_result = final_result.nutrition.map(|nutrition| NutritionResult {
            nutrition,
            source_reference: SourceReference {
                database: "OpenAI Knowledge Base".to_string(),
                version: model.to_string(),
            },
        });
        pipeline.validation = Some(compare_results(&analyzer.parsed, &final_result));

        self.logger
            .success(format!("[Pipeline Complete]\n{}", render_log(log)));

        Ok(final_result)
    }
}

#[async_trait::async_trait]
impl FoodAnalyzer for AnalysisService {
    async fn analyze(
        &self,
        image_url: Option<&str>,
        text_description: Option<&str>,
    ) -> Result<FoodAnalysisResult> {
        let outcome = self.run_pipeline(image_url, text_description).await?;
        Ok(outcome.result)
    }
}

fn analyzer_messages(image_url: Option<&str>, text_description: Option<&str>) -> Vec<ChatMessage> {
    let mut parts = Vec::new();

    let system_prompt = match image_url {
        Some(url) => {
            if let Some(text) = text_description {
                parts.push(ContentPart::text(format!("{}{}", PHOTO_COMMENT_PREFIX, text)));
            }
            parts.push(ContentPart::image_url(url));
            PHOTO_SYSTEM_PROMPT
        }
        None => {
            if let Some(text) = text_description {
                parts.push(ContentPart::text(text));
            }
            TEXT_SYSTEM_PROMPT
        }
    };

    vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user_parts(parts),
    ]
}

fn validator_messages(analyzer_json: String) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(VALIDATOR_SYSTEM_PROMPT),
        ChatMessage::user_text(analyzer_json),
    ]
}

/// Field-by-field diff of the analyzer totals against the final totals.
pub fn compare_results(
    analyzer: &FoodAnalysisResult,
    final_result: &FoodAnalysisResult,
) -> ValidationDetails {
    let mut correction_details = BTreeMap::new();

    if let (Some(before), Some(after)) = (&analyzer.nutrition, &final_result.nutrition) {
        let fields = [
            ("calories", before.total.calories, after.total.calories),
            ("protein", before.total.protein, after.total.protein),
            ("fat", before.total.fat, after.total.fat),
            ("carbs", before.total.carbs, after.total.carbs),
        ];
        for (name, old, new) in fields {
            let verdict = if old != new { "recalculated" } else { "verified" };
            correction_details.insert(name.to_string(), verdict.to_string());
        }
    }

    let weight_match = match (final_result.estimated_weight_g, final_result.ingredients_weight_g()) {
        (Some(estimated), Some(sum)) if estimated > 0.0 => {
            (sum - estimated).abs() <= estimated * WEIGHT_TOLERANCE
        }
        _ => true,
    };

    let mut validation_flags = BTreeMap::new();
    validation_flags.insert("weight_match".to_string(), weight_match);
    validation_flags.insert("logical_check_passed".to_string(), !final_result.is_error());

    ValidationDetails {
        was_corrected: analyzer.nutrition != final_result.nutrition,
        correction_details,
        validation_flags,
    }
}

fn render_log(log: &PipelineLog) -> String {
    serde_json::to_string_pretty(log)
        .unwrap_or_else(|e| format!("<pipeline log could not be serialized: {}>", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotMode;
    use crate::models::{LogEntry, LogLevel};
    use mockito::{Matcher, Server, ServerGuard};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::Arc;

    const ANALYZER_MARKER: &str = "food analyst";
    const VALIDATOR_MARKER: &str = "nutrition auditor";

    fn analysis_json(total_calories: f64) -> Value {
        json!({
            "dish": "Паста карбонара",
            "ingredients": [
                {"name": "спагетти", "amount_g": 200},
                {"name": "бекон", "amount_g": 80},
                {"name": "сливки", "amount_g": 70}
            ],
            "estimated_weight_g": 350,
            "nutrition": {
                "per_100g": {"calories": 143, "protein": 5.7, "fat": 4.3, "carbs": 17.1},
                "total": {"calories": total_calories, "protein": 20, "fat": 15, "carbs": 60}
            }
        })
    }

    fn completion_body(content: &str) -> String {
        json!({
            "id": "chatcmpl-test",
            "model": "gpt-4o-mini",
            "choices": [{"message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 900, "completion_tokens": 150, "total_tokens": 1050}
        })
        .to_string()
    }

    fn service(server: &ServerGuard, mode: ModeHandle) -> (AnalysisService, Arc<Mutex<Vec<LogEntry>>>) {
        let logger = LogSink::new();
        let entries = Arc::new(Mutex::new(Vec::new()));
        let store = entries.clone();
        logger.subscribe(move |entry| store.lock().push(entry));

        let client = CompletionClient::new("test-key".to_string(), server.url(), 6000);
        let service = AnalysisService::new(client, ModelMapping::default(), mode, logger);
        (service, entries)
    }

    #[tokio::test]
    async fn test_missing_input_is_rejected() {
        let server = Server::new_async().await;
        let (service, _) = service(&server, ModeHandle::new(BotMode::Test));

        let err = service.run_pipeline(None, Some("   ")).await.unwrap_err();
        assert!(err.to_string().contains("No input provided"));
    }

    #[tokio::test]
    async fn test_analyzer_error_skips_validator() {
        let mut server = Server::new_async().await;
        let analyzer = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex(ANALYZER_MARKER.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body("```json\n{\"error\": true}\n```"))
            .expect(1)
            .create_async()
            .await;
        let validator = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex(VALIDATOR_MARKER.to_string()))
            .expect(0)
            .create_async()
            .await;

        let (service, entries) = service(&server, ModeHandle::new(BotMode::Test));
        let outcome = service
            .run_pipeline(Some("https://api.telegram.org/file/botX/photos/1.jpg"), None)
            .await
            .unwrap();

        analyzer.assert_async().await;
        validator.assert_async().await;

        assert!(outcome.result.is_error());
        assert!(outcome.result.nutrition.is_none());

        let metadata = &outcome.log.dish_analysis_pipeline.pipeline_metadata;
        assert!(metadata.error);
        assert_eq!(metadata.stage_order, vec![PipelineStage::Analyzer]);

        let entries = entries.lock();
        let last = entries.last().unwrap();
        assert_eq!(last.level, LogLevel::Error);
        assert!(last.message.starts_with("[Pipeline Result]"));
    }

    #[tokio::test]
    async fn test_validator_correction_details() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(ANALYZER_MARKER.to_string()),
                Matcher::Regex("image_url".to_string()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body(&analysis_json(500.0).to_string()))
            .create_async()
            .await;
        server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex(VALIDATOR_MARKER.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body(&analysis_json(520.0).to_string()))
            .create_async()
            .await;

        let (service, entries) = service(&server, ModeHandle::new(BotMode::Test));
        let outcome = service
            .run_pipeline(Some("https://example.com/pasta.jpg"), Some("без сыра"))
            .await
            .unwrap();

        assert_eq!(outcome.result.nutrition.unwrap().total.calories, 520.0);

        let pipeline = &outcome.log.dish_analysis_pipeline;
        let validation = pipeline.validation.as_ref().unwrap();
        assert!(validation.was_corrected);
        assert_eq!(validation.correction_details["calories"], "recalculated");
        assert_eq!(validation.correction_details["protein"], "verified");
        assert_eq!(validation.correction_details["fat"], "verified");
        assert_eq!(validation.correction_details["carbs"], "verified");
        assert_eq!(validation.correction_details.len(), 4);
        assert_eq!(validation.validation_flags["weight_match"], true);

        assert_eq!(
            pipeline.pipeline_metadata.stage_order,
            vec![PipelineStage::Analyzer, PipelineStage::Validator]
        );
        assert_eq!(pipeline.llm_info.validator.as_ref().unwrap().total_tokens, 1050);
        assert_eq!(
            pipeline.nutrition_result.as_ref().unwrap().source_reference.version,
            "gpt-4o-mini"
        );

        let entries = entries.lock();
        let last = entries.last().unwrap();
        assert_eq!(last.level, LogLevel::Success);
        assert!(last.message.contains("\"dish_analysis_pipeline\""));
    }

    #[tokio::test]
    async fn test_validator_parse_failure_falls_back_to_analyzer() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex(ANALYZER_MARKER.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body(&analysis_json(500.0).to_string()))
            .create_async()
            .await;
        server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::Regex(VALIDATOR_MARKER.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body("Sorry, I cannot audit this."))
            .create_async()
            .await;

        let (service, _) = service(&server, ModeHandle::new(BotMode::Test));
        let result = service
            .analyze(None, Some("тарелка пасты карбонара"))
            .await
            .unwrap();

        let expected: FoodAnalysisResult = serde_json::from_value(analysis_json(500.0)).unwrap();
        assert_eq!(result, expected);
    }

    #[tokio::test]
    async fn test_mode_switch_changes_requested_model() {
        let mut server = Server::new_async().await;
        let test_model = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({"model": "gpt-4o-mini"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body(&analysis_json(500.0).to_string()))
            .expect(2)
            .create_async()
            .await;
        let deployment_model = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::PartialJson(json!({"model": "gpt-4o"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body(&analysis_json(500.0).to_string()))
            .expect(2)
            .create_async()
            .await;

        let mode = ModeHandle::new(BotMode::Test);
        let (service, _) = service(&server, mode.clone());

        service.analyze(None, Some("омлет из двух яиц")).await.unwrap();
        mode.set_mode(BotMode::Deployment);
        service.analyze(None, Some("омлет из двух яиц")).await.unwrap();

        test_model.assert_async().await;
        deployment_model.assert_async().await;
    }

    #[tokio::test]
    async fn test_mode_switch_mid_request_keeps_model() {
        let mut server = Server::new_async().await;
        let mode = ModeHandle::new(BotMode::Test);

        let switcher = mode.clone();
        let analyzer = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(ANALYZER_MARKER.to_string()),
                Matcher::PartialJson(json!({"model": "gpt-4o-mini"})),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body_from_request(move |_| {
                switcher.set_mode(BotMode::Deployment);
                completion_body(&analysis_json(500.0).to_string()).into_bytes()
            })
            .expect(1)
            .create_async()
            .await;
        let validator = server
            .mock("POST", "/chat/completions")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(VALIDATOR_MARKER.to_string()),
                Matcher::PartialJson(json!({"model": "gpt-4o-mini"})),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body(&analysis_json(520.0).to_string()))
            .expect(1)
            .create_async()
            .await;

        let (service, _) = service(&server, mode.clone());
        let outcome = service
            .run_pipeline(None, Some("омлет из двух яиц"))
            .await
            .unwrap();

        analyzer.assert_async().await;
        validator.assert_async().await;
        assert_eq!(mode.current(), BotMode::Deployment);
        assert_eq!(
            outcome.log.dish_analysis_pipeline.nutrition_result.unwrap().source_reference.version,
            "gpt-4o-mini"
        );
    }

    #[tokio::test]
    async fn test_upstream_error_is_propagated() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("upstream exploded")
            .create_async()
            .await;

        let (service, entries) = service(&server, ModeHandle::new(BotMode::Deployment));
        let err = service.analyze(None, Some("суп")).await.unwrap_err();

        assert!(err.to_string().contains("upstream exploded"));
        let entries = entries.lock();
        assert!(entries
            .iter()
            .any(|e| e.level == LogLevel::Error && e.message.starts_with("Pipeline crashed")));
    }

    #[test]
    fn test_compare_results_without_changes() {
        let analyzer: FoodAnalysisResult = serde_json::from_value(analysis_json(500.0)).unwrap();
        let details = compare_results(&analyzer, &analyzer.clone());

        assert!(!details.was_corrected);
        assert!(details.correction_details.values().all(|v| v == "verified"));
        assert_eq!(details.validation_flags["logical_check_passed"], true);
    }

    #[test]
    fn test_compare_results_flags_weight_mismatch() {
        let mut result: FoodAnalysisResult = serde_json::from_value(analysis_json(500.0)).unwrap();
        result.estimated_weight_g = Some(600.0);

        let details = compare_results(&result, &result);
        assert_eq!(details.validation_flags["weight_match"], false);
    }

    #[test]
    fn test_analyzer_messages_order() {
        let messages = analyzer_messages(Some("https://example.com/a.jpg"), Some("с соусом"));
        let value = serde_json::to_value(&messages).unwrap();

        assert_eq!(value[0]["role"], "system");
        assert!(value[0]["content"].as_str().unwrap().contains("photo"));
        let parts = value[1]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["type"], "text");
        assert!(parts[0]["text"].as_str().unwrap().ends_with("с соусом"));
        assert_eq!(parts[1]["image_url"]["url"], "https://example.com/a.jpg");

        let text_only = serde_json::to_value(analyzer_messages(None, Some("борщ"))).unwrap();
        assert_eq!(text_only[0]["content"], TEXT_SYSTEM_PROMPT);
        assert_eq!(text_only[1]["content"][0]["text"], "борщ");
    }
}
