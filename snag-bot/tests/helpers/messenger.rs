//! Messenger that records instead of delivering

use async_trait::async_trait;
use snag_bot::messaging::{MessageKind, Messenger, OutboundMessage};
use snag_common::{Error, Result};
use std::collections::HashSet;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<OutboundMessage>>,
    unreachable: HashSet<String>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliveries to any of `recipients` fail and are not recorded
    pub fn unreachable(recipients: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            unreachable: recipients.iter().map(|r| r.to_string()).collect(),
        }
    }

    pub async fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().await.clone()
    }

    /// Remove and return everything recorded so far
    pub async fn take(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.sent.lock().await)
    }

    pub async fn count(&self, kind: &MessageKind) -> usize {
        self.sent.lock().await.iter().filter(|m| &m.kind == kind).count()
    }

    pub async fn last_of(&self, kind: &MessageKind) -> Option<OutboundMessage> {
        self.sent
            .lock()
            .await
            .iter()
            .rev()
            .find(|m| &m.kind == kind)
            .cloned()
    }

    pub async fn kinds_for(&self, recipient: &str) -> Vec<MessageKind> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|m| m.recipient == recipient)
            .map(|m| m.kind.clone())
            .collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        if self.unreachable.contains(&message.recipient) {
            return Err(Error::Delivery(format!("{} unreachable", message.recipient)));
        }
        self.sent.lock().await.push(message);
        Ok(())
    }
}
