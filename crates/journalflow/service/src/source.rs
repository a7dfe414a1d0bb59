//! Event transport seam and the bundled in-process partitioned channel.

use crate::event::JournalEvent;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("event channel closed")]
    Closed,
    #[error("no partitions configured")]
    NoPartitions,
    #[error("transport error: {0}")]
    Transport(String),
}

/// One delivery of an event. `attempt` starts at 1 and grows with every redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub event: JournalEvent,
    pub partition: usize,
    pub attempt: u32,
}

/// Partitioned at-least-once transport, consumed by one worker per partition.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Next delivery, or `None` once the transport is closed and drained.
    async fn receive(&self) -> Option<Delivery>;

    /// Commits the delivery; it will not be seen again.
    async fn ack(&self, delivery: &Delivery) -> Result<(), SourceError>;

    /// Hands the delivery back for redelivery.
    async fn nack(&self, delivery: Delivery, reason: &str) -> Result<(), SourceError>;
}

/// Routes events to partitions by a stable hash of the entry id, so all
/// events for one entry land on the same partition.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    senders: Arc<Vec<mpsc::Sender<Delivery>>>,
}

impl EventPublisher {
    pub fn partitions(&self) -> usize {
        self.senders.len()
    }

    pub async fn publish(&self, event: JournalEvent) -> Result<usize, SourceError> {
        let partition = partition_for(&event.entry_id, self.senders.len())?;
        self.senders[partition]
            .send(Delivery {
                event,
                partition,
                attempt: 1,
            })
            .await
            .map_err(|_| SourceError::Closed)?;
        Ok(partition)
    }
}

pub fn partition_for(entry_id: &str, partitions: usize) -> Result<usize, SourceError> {
    if partitions == 0 {
        return Err(SourceError::NoPartitions);
    }
    let digest = blake3::hash(entry_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    Ok((u64::from_be_bytes(prefix) % partitions as u64) as usize)
}

/// In-process partition backed by a tokio channel. Nacked deliveries are
/// re-sent after `redelivery_delay` while a publisher is still alive.
pub struct ChannelEventSource {
    partition: usize,
    receiver: Mutex<mpsc::Receiver<Delivery>>,
    requeue: mpsc::WeakSender<Delivery>,
    redelivery_delay: Duration,
}

impl ChannelEventSource {
    pub fn partition(&self) -> usize {
        self.partition
    }
}

/// Builds a publisher and one source per partition.
pub fn channel_sources(
    partitions: usize,
    capacity: usize,
    redelivery_delay: Duration,
) -> (EventPublisher, Vec<ChannelEventSource>) {
    let (senders, sources) = (0..partitions.max(1))
        .map(|partition| {
            let (sender, receiver) = mpsc::channel(capacity.max(1));
            let source = ChannelEventSource {
                partition,
                receiver: Mutex::new(receiver),
                requeue: sender.downgrade(),
                redelivery_delay,
            };
            (sender, source)
        })
        .unzip::<_, _, Vec<_>, Vec<_>>();

    (
        EventPublisher {
            senders: Arc::new(senders),
        },
        sources,
    )
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn receive(&self) -> Option<Delivery> {
        self.receiver.lock().await.recv().await
    }

    async fn ack(&self, _delivery: &Delivery) -> Result<(), SourceError> {
        Ok(())
    }

    async fn nack(&self, mut delivery: Delivery, reason: &str) -> Result<(), SourceError> {
        let Some(sender) = self.requeue.upgrade() else {
            warn!(
                entry_id = %delivery.event.entry_id,
                reason,
                "event channel closed, dropping redelivery"
            );
            return Err(SourceError::Closed);
        };
        delivery.attempt += 1;
        let delay = self.redelivery_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if sender.send(delivery).await.is_err() {
                warn!("event channel closed before redelivery");
            }
        });
        Ok(())
    }
}
