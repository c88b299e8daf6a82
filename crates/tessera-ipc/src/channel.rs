//! In-process transport used for renderers hosted on threads and in tests.

use crate::envelope::RawMessage;
use crate::error::IpcError;
use crate::traits::Transport;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub struct ChannelTransport {
    tx: Option<mpsc::Sender<RawMessage>>,
    rx: mpsc::Receiver<RawMessage>,
}

impl ChannelTransport {
    /// Two connected ends; what one sends the other receives.
    pub fn pair(capacity: usize) -> (ChannelTransport, ChannelTransport) {
        let (a_tx, a_rx) = mpsc::channel(capacity.max(1));
        let (b_tx, b_rx) = mpsc::channel(capacity.max(1));
        (
            ChannelTransport {
                tx: Some(a_tx),
                rx: b_rx,
            },
            ChannelTransport {
                tx: Some(b_tx),
                rx: a_rx,
            },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn disconnect(&mut self) -> Result<(), IpcError> {
        self.tx.take();
        self.rx.close();
        Ok(())
    }

    async fn send(&mut self, message: RawMessage) -> Result<(), IpcError> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| IpcError::ChannelClosed("transport disconnected".into()))?;
        tx.send(message)
            .await
            .map_err(|_| IpcError::ChannelClosed("peer dropped its end".into()))
    }

    async fn receive(&mut self) -> Option<Result<RawMessage, IpcError>> {
        self.rx.recv().await.map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ends_see_each_others_messages() {
        let (mut browser, mut renderer) = ChannelTransport::pair(4);
        renderer.send(RawMessage::text("ping")).await.unwrap();
        let got = browser.receive().await.unwrap().unwrap();
        assert_eq!(got.payload, "ping");
    }

    #[tokio::test]
    async fn disconnect_closes_both_directions() {
        let (mut browser, mut renderer) = ChannelTransport::pair(4);
        browser.disconnect().await.unwrap();
        assert!(renderer.receive().await.is_none());
        assert!(matches!(
            browser.send(RawMessage::text("late")).await,
            Err(IpcError::ChannelClosed(_))
        ));
        assert!(renderer.send(RawMessage::text("late")).await.is_err());
    }
}
