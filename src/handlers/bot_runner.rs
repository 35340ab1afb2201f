use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use teloxide::dispatching::ShutdownToken;
use teloxide::error_handlers::ErrorHandler;
use teloxide::prelude::*;
use teloxide::types::BotCommand;
use teloxide::update_listeners;
use tokio::task::JoinHandle;

use super::message_handler::{IncomingMessage, MessageHandler, PhotoVariant, CALCULATE_BUTTON};
use crate::config::ModeHandle;
use crate::models::{BotState, BotStatus};
use crate::services::LogSink;

/// Where an inbound message is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Start,
    Calculate,
    Analyze,
}

/// `/start` and `/calculate` (optionally addressed as `/cmd@botname`) plus
/// the menu button label; everything else goes to analysis.
pub fn route(text: Option<&str>) -> Route {
    let Some(text) = text.map(str::trim) else {
        return Route::Analyze;
    };

    if text == CALCULATE_BUTTON {
        return Route::Calculate;
    }

    let command = text
        .split_whitespace()
        .next()
        .and_then(|word| word.strip_prefix('/'))
        .map(|word| word.split('@').next().unwrap_or(word));

    match command {
        Some("start") => Route::Start,
        Some("calculate") => Route::Calculate,
        _ => Route::Analyze,
    }
}

pub fn to_incoming(msg: &Message) -> IncomingMessage {
    IncomingMessage {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
        sender: msg.from.as_ref().map(|user| user.first_name.clone()),
        text: msg.text().map(String::from),
        caption: msg.caption().map(String::from),
        photos: msg
            .photo()
            .unwrap_or_default()
            .iter()
            .map(|size| PhotoVariant {
                file_id: size.file.id.to_string(),
                width: size.width,
                height: size.height,
            })
            .collect(),
    }
}

struct RunningBot {
    shutdown: ShutdownToken,
    task: JoinHandle<()>,
}

/// Status and counters shared with the dispatcher task.
struct Activity {
    status: Mutex<BotStatus>,
    processed: AtomicU64,
    last_update: Mutex<Option<DateTime<Utc>>>,
}

impl Activity {
    fn new() -> Self {
        Self {
            status: Mutex::new(BotStatus::Idle),
            processed: AtomicU64::new(0),
            last_update: Mutex::new(None),
        }
    }

    fn set_status(&self, status: BotStatus) {
        *self.status.lock() = status;
    }

    /// A delivered update means polling works again after an error.
    fn record(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        *self.last_update.lock() = Some(Utc::now());

        let mut status = self.status.lock();
        if *status == BotStatus::Error {
            *status = BotStatus::Running;
        }
    }
}

/// Forwards long-polling failures (conflicts, revoked tokens, network errors)
/// to the dashboard log and flags the bot as failing.
struct PollingErrorReporter {
    logger: LogSink,
    activity: Arc<Activity>,
}

impl PollingErrorReporter {
    fn report(&self, error: &dyn Display) {
        self.logger.error(format!("Polling error: {}", error));
        self.activity.set_status(BotStatus::Error);
    }
}

impl<E> ErrorHandler<E> for PollingErrorReporter
where
    E: Display + Send + 'static,
{
    fn handle_error(self: Arc<Self>, error: E) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        self.report(&error);
        Box::pin(async {})
    }
}

/// Owns the long-polling dispatcher and tracks its lifecycle.
pub struct BotRunner {
    bot: Bot,
    handler: Arc<MessageHandler>,
    logger: LogSink,
    mode: ModeHandle,
    running: tokio::sync::Mutex<Option<RunningBot>>,
    username: Mutex<Option<String>>,
    activity: Arc<Activity>,
}

impl BotRunner {
    pub fn new(bot: Bot, handler: Arc<MessageHandler>, logger: LogSink, mode: ModeHandle) -> Self {
        Self {
            bot,
            handler,
            logger,
            mode,
            running: tokio::sync::Mutex::new(None),
            username: Mutex::new(None),
            activity: Arc::new(Activity::new()),
        }
    }

    pub fn state(&self) -> BotState {
        BotState {
            status: *self.activity.status.lock(),
            mode: self.mode.current(),
            bot_username: self.username.lock().clone(),
            processed_count: self.activity.processed.load(Ordering::Relaxed),
            last_update: *self.activity.last_update.lock(),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            self.logger.warn("Bot is already running");
            return Ok(());
        }

        self.logger.info("Initializing CalorieBot...");

        match self.launch().await {
            Ok(bot) => {
                *running = Some(bot);
                self.activity.set_status(BotStatus::Running);
                Ok(())
            }
            Err(e) => {
                self.logger.error(format!("Failed to start bot: {:#}", e));
                self.activity.set_status(BotStatus::Error);
                Err(e)
            }
        }
    }

    async fn launch(&self) -> Result<RunningBot> {
        self.logger.info("Setting up bot menu commands...");
        self.bot
            .set_my_commands(vec![
                BotCommand::new("start", "Запустить бота"),
                BotCommand::new("calculate", "Посчитать калории"),
            ])
            .await?;
        self.logger.success("Menu commands set.");

        let me = self.bot.get_me().await?;
        let username = me.username().to_string();
        self.logger.success(format!("Bot connected as @{}", username));
        *self.username.lock() = Some(username);

        let handler = Update::filter_message().endpoint({
            let handler = Arc::clone(&self.handler);
            let logger = self.logger.clone();
            let activity = Arc::clone(&self.activity);
            move |msg: Message| {
                let handler = Arc::clone(&handler);
                let logger = logger.clone();
                let activity = Arc::clone(&activity);
                async move { dispatch_message(msg, handler, logger, activity).await }
            }
        });

        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler).build();
        let shutdown = dispatcher.shutdown_token();
        let reporter = Arc::new(PollingErrorReporter {
            logger: self.logger.clone(),
            activity: Arc::clone(&self.activity),
        });
        let bot = self.bot.clone();
        let task = tokio::spawn(async move {
            let listener = update_listeners::polling_default(bot).await;
            dispatcher.dispatch_with_listener(listener, reporter).await;
        });

        Ok(RunningBot { shutdown, task })
    }

    pub async fn stop(&self) -> Result<()> {
        let Some(bot) = self.running.lock().await.take() else {
            return Ok(());
        };

        self.logger.info("Stopping bot...");

        match bot.shutdown.shutdown() {
            Ok(stopped) => {
                stopped.await;
                if let Err(e) = bot.task.await {
                    log::warn!("⚠️ Dispatcher task ended abnormally: {}", e);
                }
            }
            // The dispatcher has not started polling yet.
            Err(_) => bot.task.abort(),
        }

        self.activity.set_status(BotStatus::Stopped);
        self.logger.info("Bot stopped.");
        Ok(())
    }
}

async fn dispatch_message(
    msg: Message,
    handler: Arc<MessageHandler>,
    logger: LogSink,
    activity: Arc<Activity>,
) -> Result<()> {
    let incoming = to_incoming(&msg);

    logger.info(format!(
        "Received update from {} [ID: {}]",
        incoming.sender.as_deref().unwrap_or("Unknown"),
        msg.from.as_ref().map(|user| user.id.0).unwrap_or_default()
    ));
    activity.record();

    let outcome = match route(incoming.text.as_deref()) {
        Route::Start => handler.handle_start(&incoming).await,
        Route::Calculate => handler.handle_calculate(&incoming).await,
        Route::Analyze => handler.handle_message(&incoming).await,
    };

    if let Err(e) = outcome {
        logger.error(format!("Failed to handle message in chat {}: {:#}", incoming.chat_id, e));
    }

    Ok(())
}
