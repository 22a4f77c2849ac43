//! # Unordered delivery queues.
//!
//! A [`DeliveryQueue`] is a bounded mpsc channel drained by one worker task.
//! The engine runs two: `fresh` for new publishes and `replay` for flushed
//! frozen events, so neither can starve the other.
//!
//! ## Rules
//! - `submit` never blocks: a full queue refuses the job with
//!   [`BrokerError::QueueFull`] and records `QueueOverflow`.
//! - Within one job, every target is attempted regardless of earlier failures.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::collab::Delivery;
use crate::error::BrokerError;
use crate::events::{BrokerEvent, BrokerEventKind};
use crate::freeze::FrozenDelivery;
use crate::model::CommonEvent;
use crate::registry::Subscriber;

use super::shared::{Admission, Shared};

/// One unit of unordered work.
pub(crate) enum Job {
    /// Deliver one event to every target, in order.
    Broadcast {
        event: Arc<CommonEvent>,
        delivery: Delivery,
        targets: Vec<Arc<Subscriber>>,
    },
    /// Deliver captured events to the subscribers they were captured for.
    Replay { entries: Vec<FrozenDelivery> },
}

pub(crate) struct DeliveryQueue {
    name: &'static str,
    tx: mpsc::Sender<Job>,
    shared: Arc<Shared>,
}

impl DeliveryQueue {
    /// Creates the queue and spawns its worker.
    pub fn spawn(
        name: &'static str,
        capacity: usize,
        shared: Arc<Shared>,
        token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run(name, rx, Arc::clone(&shared), token));
        (Self { name, tx, shared }, worker)
    }

    /// Submits a job; on refusal the job is handed back with the reason.
    pub fn submit(&self, job: Job) -> Result<(), (BrokerError, Job)> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.shared.publish(
                    BrokerEvent::new(BrokerEventKind::QueueOverflow).with_reason(self.name),
                );
                Err((BrokerError::QueueFull { queue: self.name }, job))
            }
            Err(mpsc::error::TrySendError::Closed(job)) => Err((BrokerError::Closed, job)),
        }
    }
}

async fn run(
    name: &'static str,
    mut rx: mpsc::Receiver<Job>,
    shared: Arc<Shared>,
    token: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        match job {
            Job::Broadcast {
                event,
                delivery,
                targets,
            } => {
                for target in &targets {
                    deliver(&shared, target, &event, delivery).await;
                }
            }
            Job::Replay { entries } => {
                debug!(queue = name, entries = entries.len(), "replaying frozen events");
                for entry in &entries {
                    deliver(&shared, &entry.subscriber, &entry.event, Delivery::UNORDERED).await;
                }
            }
        }
    }
    debug!(queue = name, "delivery worker stopped");
}

async fn deliver(shared: &Shared, target: &Subscriber, event: &CommonEvent, delivery: Delivery) {
    let sub = match shared.admit(target.id, event, None) {
        Admission::Ready(sub) => sub,
        Admission::Gone | Admission::Frozen => return,
    };
    if let Err(err) = shared.handoff(sub.receiver.as_ref(), event, delivery).await {
        shared.delivery_failed(&sub, event, None, &err);
    }
}
