//! # Example: ordered_chain
//!
//! Demonstrates an ordered publish across two receivers of different priority.
//!
//! Shows how to:
//! - Implement the [`Notify`] transport and acknowledge from another task.
//! - Change the result in the first receiver and let the second observe it.
//! - Receive the final result through [`DispatchEngine::publish_with_result`].
//! - Freeze a process, publish, then thaw it and watch the replay.
//!
//! ## Flow
//! ```text
//! publish_with_result(ordered)
//!     ├─► receiver "alarm" (priority 10) ──► finish(code=1, data="snoozed")
//!     ├─► receiver "clock" (priority 0)  ──► sees code=1 / "snoozed", finish
//!     └─► final receiver                  ──► prints the chain result
//! update_freeze(pid 812) ─► publish ─► held ─► thaw ─► replayed unordered
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=debug cargo run --example ordered_chain
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use commonevents::{
    CommonEvent, Delivery, DeliveryError, DispatchEngine, EngineBuilder, LogWriter, MatchSkills,
    Notify, Observe, OwnerInfo, ProcessSelector, PublishOptions, SubscribeRequest, SubscriberId,
    UserScope,
};
use tokio::sync::{OnceCell, mpsc};

const EVENT: &str = "usual.event.ALARM";

/// Transport that forwards deliveries to a task acting as the receiving process.
struct Inbox {
    label: &'static str,
    tx: mpsc::UnboundedSender<(CommonEvent, Delivery)>,
}

#[async_trait]
impl Notify for Inbox {
    async fn notify(&self, event: &CommonEvent, delivery: Delivery) -> Result<(), DeliveryError> {
        self.tx
            .send((event.clone(), delivery))
            .map_err(|_| DeliveryError::Closed)
    }

    fn name(&self) -> &'static str {
        self.label
    }
}

/// Final-result receiver.
struct Printer;

#[async_trait]
impl Notify for Printer {
    async fn notify(&self, event: &CommonEvent, _d: Delivery) -> Result<(), DeliveryError> {
        println!(
            "[final] event={} code={} data={:?}",
            event.name(),
            event.code(),
            event.data()
        );
        Ok(())
    }
}

/// Spawns the "process" behind one subscription.
fn spawn_receiver(
    engine: Arc<DispatchEngine>,
    label: &'static str,
    id: Arc<OnceCell<SubscriberId>>,
    mut rx: mpsc::UnboundedReceiver<(CommonEvent, Delivery)>,
    result: Option<(i32, &'static str)>,
) {
    tokio::spawn(async move {
        while let Some((event, delivery)) = rx.recv().await {
            println!(
                "[{label}] got {} code={} data={:?} ordered={}",
                event.name(),
                event.code(),
                event.data(),
                delivery.ordered
            );
            if !delivery.ordered {
                continue;
            }
            let (code, data) = result.unwrap_or((event.code(), "unchanged"));
            if let Some(id) = id.get() {
                let outcome = engine.finish_receiver(*id, code, data, false).await;
                println!("[{label}] finish → {outcome:?}");
            }
        }
    });
}

async fn subscribe(
    engine: &Arc<DispatchEngine>,
    label: &'static str,
    pid: u32,
    priority: i32,
    result: Option<(i32, &'static str)>,
) -> Result<SubscriberId, Box<dyn std::error::Error>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let cell = Arc::new(OnceCell::new());
    spawn_receiver(Arc::clone(engine), label, Arc::clone(&cell), rx, result);

    let id = engine.subscribe(
        SubscribeRequest::new(
            MatchSkills::new([EVENT]),
            OwnerInfo::new(pid, 20000 + pid, format!("com.example.{label}")),
            Arc::new(Inbox { label, tx }),
        )
        .with_priority(priority)
        .with_scope(UserScope::All),
    )?;
    let _ = cell.set(id);
    Ok(id)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let observers: Vec<Arc<dyn Observe>> = vec![Arc::new(LogWriter::new())];
    let engine = EngineBuilder::default().with_observers(observers).build();

    subscribe(&engine, "alarm", 812, 10, Some((1, "snoozed"))).await?;
    subscribe(&engine, "clock", 813, 0, None).await?;

    let system = OwnerInfo::new(1, 1000, "system");
    let receipt = engine.publish_with_result(
        CommonEvent::new(EVENT).with_data("ring"),
        &PublishOptions::ordered(),
        &system,
        Arc::new(Printer),
    )?;
    println!("[main] ordered publish: {receipt:?}");
    tokio::time::sleep(Duration::from_millis(100)).await;

    // the alarm process is suspended: its copy is held until it thaws
    engine.update_freeze(&ProcessSelector::pids([812]), true);
    engine.publish(
        CommonEvent::new(EVENT).with_data("while frozen"),
        &PublishOptions::unordered(),
        &system,
    )?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let replayed = engine.thaw(&ProcessSelector::pids([812]))?;
    println!("[main] replayed {replayed} held event(s)");
    tokio::time::sleep(Duration::from_millis(100)).await;

    engine.shutdown().await;
    Ok(())
}
