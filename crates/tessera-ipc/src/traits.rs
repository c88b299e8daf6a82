use crate::envelope::RawMessage;
use crate::error::IpcError;
use async_trait::async_trait;

/// A bidirectional, already established pipe to one renderer process.
#[async_trait]
pub trait Transport: Send + Unpin {
    /// Closes the pipe. Further sends fail.
    async fn disconnect(&mut self) -> Result<(), IpcError>;

    async fn send(&mut self, message: RawMessage) -> Result<(), IpcError>;

    /// Waits for the next message.
    ///
    /// # Returns
    /// * `Some(Ok(message))` - A message arrived.
    /// * `Some(Err(error))` - The pipe failed.
    /// * `None` - The peer closed the pipe.
    async fn receive(&mut self) -> Option<Result<RawMessage, IpcError>>;
}
