/// Prompt flows: plain functions over a `PromptService` with fixed fallbacks
use super::{PromptRequest, PromptService};
use crate::models::MarketingContent;
use serde::Deserialize;
use tracing::{error, warn};

/// Reply used when the model fails or answers with nothing
pub const ASSISTANT_FALLBACK: &str =
    "I'm sorry, I couldn't process your request right now. Please try again in a moment.";

const ASSISTANT_SYSTEM: &str = "You are GoalLeader's assistant. You help team members plan \
goals, track tasks and time, and stay productive. Answer concisely and practically.";

const MARKETING_SYSTEM: &str = "You are a marketing copywriter for a productivity product. \
Reply with a single JSON object with the string fields blogTitle, blogOutline, \
socialMediaPost and emailSubject. Do not add any other text.";

/// Input of the marketing flow
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketingBrief {
    pub topic: String,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
}

impl MarketingBrief {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    fn prompt(&self) -> String {
        let mut prompt = format!("Write marketing content about: {}", self.topic.trim());
        if let Some(audience) = &self.audience {
            prompt.push_str(&format!("\nTarget audience: {}", audience));
        }
        if let Some(tone) = &self.tone {
            prompt.push_str(&format!("\nTone: {}", tone));
        }
        prompt
    }
}

impl MarketingContent {
    /// Placeholder bundle returned when generation fails
    pub fn fallback() -> Self {
        Self {
            blog_title: "Content generation unavailable".to_string(),
            blog_outline: "We could not generate an outline right now. Please try again later."
                .to_string(),
            social_media_post: String::new(),
            email_subject: String::new(),
        }
    }

    fn is_complete(&self) -> bool {
        !self.blog_title.trim().is_empty()
            && !self.blog_outline.trim().is_empty()
            && !self.social_media_post.trim().is_empty()
            && !self.email_subject.trim().is_empty()
    }
}

/// Answer a dashboard chat message. Never fails: model errors and empty
/// answers become `ASSISTANT_FALLBACK`.
pub async fn chat_assistant(service: &dyn PromptService, message: &str) -> String {
    let request = PromptRequest::new(message).with_system(ASSISTANT_SYSTEM);
    match service.generate(request).await {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => {
            warn!("Assistant returned an empty answer");
            ASSISTANT_FALLBACK.to_string()
        }
        Err(e) => {
            error!("Assistant flow failed: {}", e);
            ASSISTANT_FALLBACK.to_string()
        }
    }
}

/// Strip a surrounding Markdown code fence (```json ... ```), if any
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`) on the opening line
    let body = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Generate a marketing bundle. Malformed, incomplete or failed output
/// becomes `MarketingContent::fallback()`.
pub async fn generate_marketing_content(
    service: &dyn PromptService,
    brief: &MarketingBrief,
) -> MarketingContent {
    if brief.topic.trim().is_empty() {
        warn!("Marketing brief has no topic");
        return MarketingContent::fallback();
    }

    let request = PromptRequest::new(brief.prompt())
        .with_system(MARKETING_SYSTEM)
        .json();
    let raw = match service.generate(request).await {
        Ok(raw) => raw,
        Err(e) => {
            error!("Marketing flow failed: {}", e);
            return MarketingContent::fallback();
        }
    };

    match serde_json::from_str::<MarketingContent>(strip_code_fence(&raw)) {
        Ok(content) if content.is_complete() => content,
        Ok(_) => {
            warn!("Marketing output is missing fields");
            MarketingContent::fallback()
        }
        Err(e) => {
            warn!("Marketing output is not valid JSON: {}", e);
            MarketingContent::fallback()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AiError;
    use async_trait::async_trait;

    /// Replies with a fixed answer, or fails when given `None`
    struct CannedPrompt(Option<&'static str>);

    #[async_trait]
    impl PromptService for CannedPrompt {
        async fn generate(&self, _request: PromptRequest) -> Result<String, AiError> {
            self.0
                .map(|s| s.to_string())
                .ok_or_else(|| AiError::Malformed("offline".to_string()))
        }

        fn model(&self) -> &str {
            "canned"
        }
    }

    #[tokio::test]
    async fn test_chat_assistant_answers() {
        let reply = chat_assistant(&CannedPrompt(Some("  Focus on one goal.\n")), "help").await;
        assert_eq!(reply, "Focus on one goal.");
    }

    #[tokio::test]
    async fn test_chat_assistant_fallbacks() {
        assert_eq!(chat_assistant(&CannedPrompt(Some("   ")), "help").await, ASSISTANT_FALLBACK);
        assert_eq!(chat_assistant(&CannedPrompt(None), "help").await, ASSISTANT_FALLBACK);
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{}\n```  "), "{}");
        assert_eq!(strip_code_fence(" {\"a\":1} "), "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_marketing_parses_fenced_json() {
        let service = CannedPrompt(Some(
            "```json\n{\"blogTitle\":\"Ship weekly\",\"blogOutline\":\"1. Plan\",\"socialMediaPost\":\"We ship!\",\"emailSubject\":\"News\"}\n```",
        ));
        let content = generate_marketing_content(&service, &MarketingBrief::new("releases")).await;
        assert_eq!(content.blog_title, "Ship weekly");
        assert_eq!(content.email_subject, "News");
    }

    #[tokio::test]
    async fn test_marketing_fallbacks() {
        let brief = MarketingBrief::new("releases");
        let fallback = MarketingContent::fallback();
        assert_eq!(generate_marketing_content(&CannedPrompt(Some("not json")), &brief).await, fallback);
        assert_eq!(generate_marketing_content(&CannedPrompt(Some("")), &brief).await, fallback);
        assert_eq!(
            generate_marketing_content(&CannedPrompt(Some("{\"blogTitle\":\"x\"}")), &brief).await,
            fallback
        );
        assert_eq!(generate_marketing_content(&CannedPrompt(None), &brief).await, fallback);
        assert_eq!(
            generate_marketing_content(&CannedPrompt(Some("{}")), &MarketingBrief::new(" ")).await,
            fallback
        );
    }
}
