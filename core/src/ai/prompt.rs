use super::AiError;
use async_trait::async_trait;

/// One text-in/text-out model call
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PromptRequest {
    pub system: Option<String>,
    pub prompt: String,
    /// Ask the model for a JSON document instead of prose
    pub json_output: bool,
}

impl PromptRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn json(mut self) -> Self {
        self.json_output = true;
        self
    }
}

#[async_trait]
pub trait PromptService: Send + Sync {
    async fn generate(&self, request: PromptRequest) -> Result<String, AiError>;

    /// Model name reported by diagnostics
    fn model(&self) -> &str;

    fn is_configured(&self) -> bool {
        true
    }
}

/// Stand-in used when no API key is set; every call fails
pub struct UnconfiguredPrompt {
    model: String,
}

impl UnconfiguredPrompt {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into() }
    }
}

#[async_trait]
impl PromptService for UnconfiguredPrompt {
    async fn generate(&self, _request: PromptRequest) -> Result<String, AiError> {
        Err(AiError::NotConfigured(
            "set GEMINI_API_KEY or GOOGLE_API_KEY".to_string(),
        ))
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_configured(&self) -> bool {
        false
    }
}
