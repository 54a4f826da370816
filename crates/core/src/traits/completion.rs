//! Completion client trait

use async_trait::async_trait;

use crate::{CompletionError, Turn};

/// Stateless chat completion.
///
/// Implementations must send the system prompt first, then `history` in the
/// given order, then `user_text` last. No retries happen here; the caller
/// decides what a failure means for the call.
///
/// # Example
///
/// ```ignore
/// let client: Arc<dyn CompletionClient> = Arc::new(OpenAiCompletionClient::new(config)?);
/// let reply = client.complete(&[], "Hello", "You are a helpful butler").await?;
/// ```
#[async_trait]
pub trait CompletionClient: Send + Sync + 'static {
    /// Produce the next assistant utterance
    async fn complete(
        &self,
        history: &[Turn],
        user_text: &str,
        system_prompt: &str,
    ) -> Result<String, CompletionError>;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}
