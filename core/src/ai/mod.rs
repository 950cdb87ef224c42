/// Assistant flows over a generative-AI prompt service
pub mod flows;
pub mod gemini;
pub mod prompt;
pub mod stats;

pub use flows::{chat_assistant, generate_marketing_content, MarketingBrief, ASSISTANT_FALLBACK};
pub use gemini::GeminiClient;
pub use prompt::{PromptRequest, PromptService, UnconfiguredPrompt};
pub use stats::{FlowStats, FlowUsage};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AiError {
    #[error("Prompt service is not configured: {0}")]
    NotConfigured(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Model returned no text")]
    EmptyResponse,

    #[error("Malformed model output: {0}")]
    Malformed(String),
}
