use crate::event::{EventFilter, FilterDecision};
use crate::source::{Delivery, EventSource};
use journalflow_core::{Disposition, JournalOrchestrator};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Skipped,
    Processed(Disposition),
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Consumes one partition strictly in order: the workflow for an event
/// finishes before the event is acked and the next one is received.
pub struct PartitionWorker<S> {
    partition: usize,
    source: S,
    orchestrator: Arc<JournalOrchestrator>,
    filter: EventFilter,
    shutdown: watch::Receiver<bool>,
}

impl<S: EventSource> PartitionWorker<S> {
    pub fn new(
        partition: usize,
        source: S,
        orchestrator: Arc<JournalOrchestrator>,
        filter: EventFilter,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            partition,
            source,
            orchestrator,
            filter,
            shutdown,
        }
    }

    /// Runs until shutdown is signalled or the source is drained.
    pub async fn run(mut self) -> WorkerStats {
        let mut stats = WorkerStats::default();
        info!(partition = self.partition, "partition worker started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let delivery = tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                delivery = self.source.receive() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            match self.handle(delivery).await {
                DeliveryOutcome::Skipped => stats.skipped += 1,
                DeliveryOutcome::Processed(_) => stats.processed += 1,
                DeliveryOutcome::Failed => stats.failed += 1,
            }
        }

        info!(
            partition = self.partition,
            processed = stats.processed,
            skipped = stats.skipped,
            failed = stats.failed,
            "partition worker stopped"
        );
        stats
    }

    pub async fn handle(&self, delivery: Delivery) -> DeliveryOutcome {
        let event = &delivery.event;

        if let FilterDecision::Skip(reason) = self.filter.decide(event) {
            debug!(
                entry_id = %event.entry_id,
                change_type = %event.change_type,
                reason,
                "skipping event"
            );
            self.ack(&delivery).await;
            return DeliveryOutcome::Skipped;
        }

        info!(
            entry_id = %event.entry_id,
            change_type = %event.change_type,
            channel = ?event.channel,
            attempt = delivery.attempt,
            "journal event received"
        );

        match self
            .orchestrator
            .process(&event.entry_id, event.category_hint.as_deref())
            .await
        {
            Ok(report) => {
                self.ack(&delivery).await;
                DeliveryOutcome::Processed(report.disposition)
            }
            Err(err) => {
                if err.is_redeliverable() {
                    warn!(
                        entry_id = %event.entry_id,
                        attempt = delivery.attempt,
                        error = %err,
                        "journal event failed, scheduling redelivery"
                    );
                } else {
                    error!(
                        entry_id = %event.entry_id,
                        attempt = delivery.attempt,
                        error = %err,
                        "journal event failed and needs operator attention"
                    );
                }
                let reason = err.to_string();
                if let Err(nack_err) = self.source.nack(delivery, &reason).await {
                    error!(error = %nack_err, "failed to nack journal event");
                }
                DeliveryOutcome::Failed
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(err) = self.source.ack(delivery).await {
            error!(
                entry_id = %delivery.event.entry_id,
                error = %err,
                "failed to ack journal event"
            );
        }
    }
}
