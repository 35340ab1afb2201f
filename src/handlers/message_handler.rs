use anyhow::Result;
use std::sync::Arc;

use crate::models::{FoodAnalysisResult, MacroNutrients};
use crate::services::{FoodAnalyzer, LogSink, MessengerService};

/// Label of the menu button that starts a calculation.
pub const CALCULATE_BUTTON: &str = "🍽 Посчитать калории";

pub const WELCOME_MESSAGE: &str = "👋 Привет! Я CalorieBot.\n\n\
    Пришли фото блюда или опиши его словами, и я посчитаю калории, белки, жиры и углеводы.";
pub const WAITING_FOR_INPUT_MESSAGE: &str =
    "📸 Пришли фото блюда или текстовое описание (например: «тарелка борща со сметаной»).";
pub const ANALYZING_MESSAGE: &str = "⏳ Анализирую блюдо...";
pub const FILE_RESOLUTION_FAILED_MESSAGE: &str = "❌ Ошибка: не удалось получить ссылку на фото.";
pub const NOT_RECOGNIZED_MESSAGE: &str =
    "😕 Блюдо не распознано. Попробуйте еще раз (фото должно быть четким, или добавьте описание).";
pub const ANALYSIS_FAILED_MESSAGE: &str =
    "❌ Произошла ошибка при анализе. Попробуйте еще раз позже.";

/// One size variant of an incoming photo.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoVariant {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
}

/// Transport-independent view of an inbound message.
#[derive(Debug, Clone, Default)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub message_id: i32,
    pub sender: Option<String>,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub photos: Vec<PhotoVariant>,
}

impl IncomingMessage {
    /// Highest-resolution variant; ties go to the later entry.
    pub fn largest_photo(&self) -> Option<&PhotoVariant> {
        self.photos
            .iter()
            .max_by_key(|p| u64::from(p.width) * u64::from(p.height))
    }

    fn text_body(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    fn description(&self) -> Option<&str> {
        self.text_body().or_else(|| {
            self.caption
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
        })
    }
}

pub struct MessageHandler {
    analyzer: Arc<dyn FoodAnalyzer>,
    messenger: Arc<dyn MessengerService>,
    logger: LogSink,
}

impl MessageHandler {
    pub fn new(
        analyzer: Arc<dyn FoodAnalyzer>,
        messenger: Arc<dyn MessengerService>,
        logger: LogSink,
    ) -> Self {
        Self {
            analyzer,
            messenger,
            logger,
        }
    }

    pub async fn handle_start(&self, msg: &IncomingMessage) -> Result<()> {
        self.messenger
            .send_message_with_menu(msg.chat_id, WELCOME_MESSAGE, vec![CALCULATE_BUTTON.to_string()])
            .await
    }

    pub async fn handle_calculate(&self, msg: &IncomingMessage) -> Result<()> {
        self.logger.info(format!(
            "Processing /calculate command from {}",
            msg.sender.as_deref().unwrap_or("Unknown")
        ));
        self.messenger
            .send_message(msg.chat_id, WAITING_FOR_INPUT_MESSAGE)
            .await?;
        Ok(())
    }

    /// Analyzes a photo or a text description and replies with the macros.
    ///
    /// Failures after the placeholder is sent are reported by editing it; only
    /// a failure to send the placeholder itself is returned.
    pub async fn handle_message(&self, msg: &IncomingMessage) -> Result<()> {
        let text = msg.text_body();

        if msg.photos.is_empty() && text.is_none() {
            return Ok(());
        }

        // Menu button presses are routed to the calculate handler.
        if text == Some(CALCULATE_BUTTON) {
            return Ok(());
        }

        self.logger.info(format!(
            "Processing message from {}",
            msg.sender.as_deref().unwrap_or("Unknown")
        ));

        let placeholder = self
            .messenger
            .send_message(msg.chat_id, ANALYZING_MESSAGE)
            .await?;

        if let Err(e) = self.process(msg, placeholder).await {
            self.logger.error(format!("Pipeline Error: {:#}", e));
            if let Err(edit_err) = self
                .messenger
                .edit_message(msg.chat_id, placeholder, ANALYSIS_FAILED_MESSAGE)
                .await
            {
                log::error!("❌ Failed to report analysis error to chat {}: {}", msg.chat_id, edit_err);
            }
        }

        Ok(())
    }

    async fn process(&self, msg: &IncomingMessage, placeholder: i32) -> Result<()> {
        let image_url = match msg.largest_photo() {
            Some(photo) => match self.messenger.resolve_file_url(&photo.file_id).await {
                Ok(Some(url)) => {
                    self.logger
                        .info(format!("Generated image URL for analysis ({}x{})", photo.width, photo.height));
                    Some(url)
                }
                Ok(None) => {
                    self.logger.error("Could not retrieve file_path from Telegram API");
                    self.messenger
                        .edit_message(msg.chat_id, placeholder, FILE_RESOLUTION_FAILED_MESSAGE)
                        .await?;
                    return Ok(());
                }
                Err(e) => {
                    self.logger
                        .error(format!("Could not resolve photo {}: {}", photo.file_id, e));
                    self.messenger
                        .edit_message(msg.chat_id, placeholder, FILE_RESOLUTION_FAILED_MESSAGE)
                        .await?;
                    return Ok(());
                }
            },
            None => None,
        };

        let result = self
            .analyzer
            .analyze(image_url.as_deref(), msg.description())
            .await?;

        let Some(reply) = format_analysis_reply(&result) else {
            self.logger.warn("Dish not recognized");
            self.messenger
                .edit_message(msg.chat_id, placeholder, NOT_RECOGNIZED_MESSAGE)
                .await?;
            return Ok(());
        };

        self.messenger
            .send_reply(msg.chat_id, msg.message_id, &reply)
            .await?;

        if let Err(e) = self.messenger.delete_message(msg.chat_id, placeholder).await {
            log::warn!("⚠️ Failed to delete placeholder {} in chat {}: {}", placeholder, msg.chat_id, e);
        }

        self.logger.success(format!(
            "Replied with analysis of '{}'",
            result.dish.as_deref().unwrap_or_default()
        ));
        Ok(())
    }
}

/// Formats the final HTML reply. `None` when the result is error-flagged or
/// lacks a dish name, nutrition or a portion weight.
pub fn format_analysis_reply(result: &FoodAnalysisResult) -> Option<String> {
    if result.is_error() {
        return None;
    }

    let dish = result.dish.as_deref().map(str::trim).filter(|d| !d.is_empty())?;
    let nutrition = result.nutrition.as_ref()?;
    let weight = result.portion_weight_g()?;

    Some(format_reply(dish, weight, &nutrition.total, &nutrition.per_100g))
}

fn format_reply(dish: &str, weight: f64, total: &MacroNutrients, per_100g: &MacroNutrients) -> String {
    format!(
        "🍽 <b>{}</b> (~{}г)\n\n\
         <b>На всю порцию:</b>\n\
         🔥 Калории: <b>{} ккал</b>\n\
         🥩 Белки: {} г\n\
         🥑 Жиры: {} г\n\
         🥖 Углеводы: {} г\n\n\
         <b>На 100г:</b>\n\
         🔥 {} ккал | Б: {} | Ж: {} | У: {}",
        teloxide::utils::html::escape(dish),
        format_amount(weight),
        format_amount(total.calories),
        format_amount(total.protein),
        format_amount(total.fat),
        format_amount(total.carbs),
        format_amount(per_100g.calories),
        format_amount(per_100g.protein),
        format_amount(per_100g.fat),
        format_amount(per_100g.carbs),
    )
}

/// Whole numbers print without decimals, everything else with one.
fn format_amount(value: f64) -> String {
    let rounded = (value * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{:.0}", rounded)
    } else {
        format!("{:.1}", rounded)
    }
}
