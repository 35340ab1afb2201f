use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{
    FileId, KeyboardButton, KeyboardMarkup, MessageId, ParseMode, ReplyMarkup, ReplyParameters,
};

/// Outbound side of the bot, kept behind a trait so handlers can be tested
/// without Telegram.
#[async_trait::async_trait]
pub trait MessengerService: Send + Sync {
    /// Sends plain text and returns the new message id.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i32>;

    /// Sends HTML-formatted text as a reply to `reply_to`.
    async fn send_reply(&self, chat_id: i64, reply_to: i32, html: &str) -> Result<i32>;

    async fn edit_message(&self, chat_id: i64, message_id: i32, text: &str) -> Result<()>;

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()>;

    /// Resolves a file id to a direct download URL. `None` when Telegram
    /// returns no file path.
    async fn resolve_file_url(&self, file_id: &str) -> Result<Option<String>>;

    /// Send a message with a persistent reply keyboard (one button per label).
    /// Default implementation sends plain text (for clients without keyboards)
    async fn send_message_with_menu(
        &self,
        chat_id: i64,
        text: &str,
        _buttons: Vec<String>,
    ) -> Result<()> {
        self.send_message(chat_id, text).await?;
        Ok(())
    }
}

/// Telegram Bot API client built on teloxide.
#[derive(Clone)]
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn file_url(token: &str, file_path: &str) -> String {
        format!("https://api.telegram.org/file/bot{}/{}", token, file_path)
    }
}

#[async_trait::async_trait]
impl MessengerService for TelegramClient {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i32> {
        let sent = self.bot.send_message(ChatId(chat_id), text).await?;
        Ok(sent.id.0)
    }

    async fn send_reply(&self, chat_id: i64, reply_to: i32, html: &str) -> Result<i32> {
        let mut req = self.bot.send_message(ChatId(chat_id), html);
        req.parse_mode = Some(ParseMode::Html);
        req.reply_parameters = Some(ReplyParameters::new(MessageId(reply_to)));

        let sent = req.await?;
        Ok(sent.id.0)
    }

    async fn edit_message(&self, chat_id: i64, message_id: i32, text: &str) -> Result<()> {
        self.bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id), text)
            .await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id))
            .await?;
        Ok(())
    }

    async fn resolve_file_url(&self, file_id: &str) -> Result<Option<String>> {
        let file = self.bot.get_file(FileId(file_id.to_string())).await?;

        if file.path.is_empty() {
            return Ok(None);
        }

        Ok(Some(Self::file_url(self.bot.token(), &file.path)))
    }

    async fn send_message_with_menu(
        &self,
        chat_id: i64,
        text: &str,
        buttons: Vec<String>,
    ) -> Result<()> {
        let keyboard = KeyboardMarkup::new(
            buttons
                .into_iter()
                .map(|label| vec![KeyboardButton::new(label)])
                .collect::<Vec<_>>(),
        )
        .resize_keyboard();

        let mut req = self.bot.send_message(ChatId(chat_id), text);
        req.reply_markup = Some(ReplyMarkup::Keyboard(keyboard));
        req.await?;
        Ok(())
    }
}
