//! Shutdown signaling for the capture session.
//!
//! Abstracts a tokio watch channel into a shutdown signal: the session holds
//! the transmitter, the consume loop holds a receiver and treats any change
//! notification as a request to stop at the next safe point. The signal
//! carries no data payload.

use tokio::sync::watch;

/// Transmitter side of the shutdown signal channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    /// Requests shutdown of every subscribed receiver.
    ///
    /// Fails only when no receiver is listening anymore, which means the
    /// consume loop has already terminated.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    /// Creates a new receiver subscribed to this transmitter.
    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Receiver side of the shutdown signal channel.
pub type ShutdownRx = watch::Receiver<()>;

/// Creates a new shutdown signal channel.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_notifies_subscribers() {
        let (tx, mut rx) = create_shutdown_channel();

        tx.shutdown().unwrap();
        assert!(rx.changed().await.is_ok());
    }

    #[tokio::test]
    async fn shutdown_without_receivers_fails() {
        let (tx, rx) = create_shutdown_channel();
        drop(rx);

        assert!(tx.shutdown().is_err());
    }
}
