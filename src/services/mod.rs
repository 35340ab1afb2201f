pub mod ai_service;
pub mod analysis; // Two-stage Analyzer/Validator pipeline
pub mod logger;
pub mod openai; // OpenAI-compatible chat completions client
pub mod prompts;
pub mod telegram;

pub use ai_service::FoodAnalyzer;
pub use analysis::AnalysisService;
pub use logger::LogSink;
pub use openai::CompletionClient;
pub use telegram::{MessengerService, TelegramClient};
