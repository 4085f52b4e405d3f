use echo_types::ObjectId;
use tokio::sync::watch;

use crate::error::{ModelError, ModelResult};

/// Durability state of a submitted write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AckState {
    Pending,
    Durable,
    Failed(String),
}

/// Awaitable completion for one write.
///
/// The write is already visible locally when this is handed out; awaiting
/// it only waits for the backend to report durability.
#[derive(Clone, Debug)]
pub struct Acknowledgement {
    rx: watch::Receiver<AckState>,
}

/// Backend side of an [`Acknowledgement`].
#[derive(Debug)]
pub struct AckSender {
    tx: watch::Sender<AckState>,
}

impl Acknowledgement {
    /// An acknowledgement that is already durable.
    pub fn durable() -> Self {
        let (_tx, rx) = watch::channel(AckState::Durable);
        Self { rx }
    }

    pub fn pending() -> (AckSender, Self) {
        let (tx, rx) = watch::channel(AckState::Pending);
        (AckSender { tx }, Self { rx })
    }

    pub fn state(&self) -> AckState {
        self.rx.borrow().clone()
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self.state(), AckState::Pending)
    }

    /// Wait until the write is durable or has failed.
    pub async fn wait(mut self) -> ModelResult<()> {
        loop {
            let state = self.rx.borrow_and_update().clone();
            match state {
                AckState::Durable => return Ok(()),
                AckState::Failed(reason) => return Err(ModelError::Acknowledgement(reason)),
                AckState::Pending => {}
            }
            if self.rx.changed().await.is_err() {
                return Err(ModelError::Acknowledgement(
                    "backend dropped the write before confirming it".into(),
                ));
            }
        }
    }
}

impl AckSender {
    pub fn confirm(self) {
        self.tx.send_replace(AckState::Durable);
    }

    pub fn fail(self, reason: impl Into<String>) {
        self.tx.send_replace(AckState::Failed(reason.into()));
    }
}

/// Sequencing receipt returned by a bound mutation.
#[derive(Clone, Debug)]
pub struct MutationReceipt {
    /// Backend-wide write sequence number.
    pub seq: u64,
    pub object_id: ObjectId,
    /// Number of primitive operations in the write.
    pub op_count: usize,
    pub ack: Acknowledgement,
}

impl MutationReceipt {
    pub async fn wait(self) -> ModelResult<()> {
        self.ack.wait().await
    }
}
