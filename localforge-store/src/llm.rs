//! Language-model collaborator
//!
//! The completion service is opaque: it takes a prompt and returns text.
//! Implementations live with the transport that reaches them.

use async_trait::async_trait;

use crate::error::Result;

/// A text completion service
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete a prompt; the response is passed through unmodified
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Human-readable name for logs
    fn name(&self) -> &str {
        "language-model"
    }
}

/// Assemble the grounding prompt for a question
pub fn compose_prompt(context: &str, question: &str) -> String {
    format!(
        "You are LocalForge, an offline-first coding assistant.\n\
         Use the context below to answer the user question.\n\n\
         Context:\n{}\n\n\
         Question: {}\nAnswer:",
        context, question
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_prompt_layout() {
        let prompt = compose_prompt("Source: a.md\nhello", "what is a?");
        assert!(prompt.starts_with("You are LocalForge"));
        assert!(prompt.contains("Context:\nSource: a.md\nhello\n\nQuestion: what is a?\nAnswer:"));
    }

    #[test]
    fn test_compose_prompt_empty_context() {
        let prompt = compose_prompt("", "anything?");
        assert!(prompt.contains("Context:\n\n\nQuestion: anything?"));
    }
}
