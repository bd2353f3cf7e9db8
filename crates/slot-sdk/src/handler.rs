//! Handler seam for unsolicited `COMMAND` messages.
//!
//! In pull mode every command arrives as the answer to a `GET_COMMANDS`
//! request and never reaches a handler. Relays that still push commands hit
//! this path instead.

use std::future::Future;

use slot_protocol::Message;

/// Implement this trait to execute commands pushed by the relay.
///
/// An `Err` (or a panic) is reported back to the relay as a failed
/// `RESULT`; on success the handler is expected to report its own result.
///
/// # Example
///
/// ```rust,no_run
/// use slot_sdk::{CommandHandler, Message};
///
/// struct Echo;
///
/// #[async_trait::async_trait]
/// impl CommandHandler for Echo {
///     async fn handle(&self, message: Message) -> anyhow::Result<()> {
///         println!("{}", serde_json::Value::Object(message.payload));
///         Ok(())
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn handle(&self, message: Message) -> anyhow::Result<()>;
}

/// Default handler: logs the command and does nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait::async_trait]
impl CommandHandler for LoggingHandler {
    async fn handle(&self, message: Message) -> anyhow::Result<()> {
        tracing::info!(
            message_id = %message.id,
            command_id = ?message.payload.get("command_id"),
            "unsolicited command ignored (no handler installed)"
        );
        Ok(())
    }
}

/// Adapter turning an async closure into a [`CommandHandler`].
pub struct FnHandler<F>(F);

/// Wrap `f` as a [`CommandHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait::async_trait]
impl<F, Fut> CommandHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: Message) -> anyhow::Result<()> {
        (self.0)(message).await
    }
}
