mod config;
#[cfg(feature = "dashboard")]
mod dashboard; // Control panel + log stream
mod handlers;
mod models;
mod services;

use anyhow::Result;
use dotenv::dotenv;
use std::sync::Arc;
use teloxide::Bot;

use config::{AppConfig, ModeHandle};
use handlers::{BotRunner, MessageHandler};
use services::{AnalysisService, CompletionClient, LogSink, MessengerService, TelegramClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("🚀 Starting CalorieBot...");

    let config = AppConfig::from_env()?;

    let logger = LogSink::new();
    let mode = ModeHandle::new(config.initial_mode);

    #[cfg(feature = "dashboard")]
    let feed = dashboard::LogFeed::attach(&logger);

    let client = CompletionClient::new(
        config.openai_api_key.clone(),
        config.openai_base_url.clone(),
        config.max_tokens,
    );
    let analyzer = Arc::new(AnalysisService::new(
        client,
        config.models.clone(),
        mode.clone(),
        logger.clone(),
    ));
    log::info!(
        "✅ Analysis pipeline initialized (TEST: {}, DEPLOYMENT: {}, mode: {})",
        config.models.test,
        config.models.deployment,
        mode.current()
    );

    let bot = Bot::new(config.telegram_token.clone());
    let telegram = Arc::new(TelegramClient::new(bot.clone())) as Arc<dyn MessengerService>;

    let message_handler = Arc::new(MessageHandler::new(analyzer, telegram, logger.clone()));
    log::info!("✅ Message handler initialized");

    let runner = Arc::new(BotRunner::new(
        bot,
        message_handler,
        logger.clone(),
        mode.clone(),
    ));

    #[cfg(feature = "dashboard")]
    {
        use dashboard::{create_dashboard_router, DashboardState};

        let app = create_dashboard_router(DashboardState {
            runner: runner.clone(),
            mode: mode.clone(),
            logger: logger.clone(),
            feed,
            admin_token: config.admin_token.clone(),
        });

        let listener = tokio::net::TcpListener::bind(&config.dashboard_addr).await?;
        log::info!("🌐 Dashboard starting on {}", config.dashboard_addr);
        log::info!("🔐 Dashboard: http://{}/?token=<ADMIN_TOKEN>", config.dashboard_addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("❌ Dashboard server failed: {}", e);
            }
        });
    }

    // Without the dashboard there is no other way to start the bot.
    let auto_start = config.auto_start || cfg!(not(feature = "dashboard"));
    if auto_start {
        if let Err(e) = runner.start().await {
            log::error!("❌ Auto-start failed: {:#}", e);
        }
    } else {
        log::info!("⏸ Bot idle, start it from the dashboard");
    }

    log::info!("🎉 CalorieBot is ready! Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;

    log::info!("🛑 Shutting down...");
    runner.stop().await?;

    Ok(())
}
