pub mod bot_runner;
pub mod message_handler;

pub use bot_runner::BotRunner;
pub use message_handler::MessageHandler;
