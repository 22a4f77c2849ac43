use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, timeout};

use super::*;
use crate::collab::{Delivery, Notify, PermissionOracle, ProcessKiller};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, DeliveryError};
use crate::events::{BrokerEvent, BrokerEventKind};
use crate::model::{
    AccessToken, CommonEvent, MatchSkills, OwnerInfo, ProcessSelector, PublishOptions, SubscriberId,
    TargetUser, UserScope,
};
use crate::observers::{LogWriter, Observe};
use crate::registry::SubscribeRequest;

const EV: &str = "usual.event.TEST";
const PATIENCE: Duration = Duration::from_secs(600);

type Seen = (&'static str, CommonEvent, Delivery);

struct Inbox {
    label: &'static str,
    tx: mpsc::UnboundedSender<Seen>,
}

impl Inbox {
    fn arc(label: &'static str, tx: &mpsc::UnboundedSender<Seen>) -> Arc<Self> {
        Arc::new(Self {
            label,
            tx: tx.clone(),
        })
    }
}

#[async_trait]
impl Notify for Inbox {
    async fn notify(&self, event: &CommonEvent, delivery: Delivery) -> Result<(), DeliveryError> {
        self.tx
            .send((self.label, event.clone(), delivery))
            .map_err(|_| DeliveryError::Closed)
    }

    fn name(&self) -> &'static str {
        self.label
    }
}

struct Refusing;

#[async_trait]
impl Notify for Refusing {
    async fn notify(&self, _e: &CommonEvent, _d: Delivery) -> Result<(), DeliveryError> {
        Err(DeliveryError::transport("refused"))
    }
}

struct Exploding;

#[async_trait]
impl Notify for Exploding {
    async fn notify(&self, _e: &CommonEvent, _d: Delivery) -> Result<(), DeliveryError> {
        panic!("receiver boom");
    }
}

#[derive(Default)]
struct RecordingKiller(Mutex<Vec<u32>>);

impl ProcessKiller for RecordingKiller {
    fn kill(&self, pid: u32, _reason: &str) {
        self.0.lock().unwrap().push(pid);
    }
}

/// Tokens below 10000 are privileged and hold every permission; other grants are listed.
struct Grants {
    grants: Vec<(u64, &'static str)>,
    protected: &'static str,
}

impl PermissionOracle for Grants {
    fn has_permission(&self, token: AccessToken, permission: &str) -> bool {
        self.is_privileged(token) || self.grants.iter().any(|(t, p)| *t == token.0 && *p == permission)
    }

    fn is_privileged(&self, token: AccessToken) -> bool {
        token.0 < 10_000
    }

    fn is_protected_event(&self, event: &str) -> bool {
        event == self.protected
    }
}

fn engine() -> Arc<DispatchEngine> {
    EngineBuilder::default().build()
}

fn engine_with(cfg: BrokerConfig) -> Arc<DispatchEngine> {
    EngineBuilder::new(cfg).build()
}

fn publisher() -> OwnerInfo {
    OwnerInfo::new(1, 1000, "com.example.publisher")
}

fn request(pid: u32, priority: i32, receiver: Arc<dyn Notify>) -> SubscribeRequest {
    SubscribeRequest::new(
        MatchSkills::new([EV]),
        OwnerInfo::new(pid, 20000 + pid, format!("bundle.{pid}")),
        receiver,
    )
    .with_priority(priority)
    .with_scope(UserScope::All)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    timeout(PATIENCE, rx.recv())
        .await
        .expect("delivery within patience")
        .expect("inbox channel open")
}

async fn wait_for(rx: &mut broadcast::Receiver<BrokerEvent>, kind: BrokerEventKind) -> BrokerEvent {
    timeout(PATIENCE, async {
        loop {
            let ev = rx.recv().await.expect("bus open");
            if ev.kind == kind {
                return ev;
            }
        }
    })
    .await
    .expect("record within patience")
}

#[tokio::test(start_paused = true)]
async fn ordered_abort_skips_later_receivers_and_notifies_final_once() {
    let engine = engine();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (ftx, mut frx) = mpsc::unbounded_channel();
    let a = engine.subscribe(request(10, 10, Inbox::arc("a", &tx))).unwrap();
    engine.subscribe(request(11, 5, Inbox::arc("b", &tx))).unwrap();

    let receipt = engine
        .publish_with_result(
            CommonEvent::new(EV).with_code(0).with_data("init"),
            &PublishOptions::unordered(),
            &publisher(),
            Inbox::arc("final", &ftx),
        )
        .unwrap();
    assert_eq!(receipt.matched, 2);
    assert!(receipt.chain.is_some());

    let (who, _, delivery) = next(&mut rx).await;
    assert_eq!(who, "a");
    assert!(delivery.ordered);
    assert_eq!(engine.finish_receiver(a, 1, "from-a", true).await, Outcome::Accepted);

    let (who, event, _) = next(&mut frx).await;
    assert_eq!(who, "final");
    assert_eq!((event.code(), event.data()), (1, "from-a"));
    assert!(rx.try_recv().is_err());
    assert!(frx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn later_receivers_see_earlier_results() {
    let engine = engine();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (ftx, mut frx) = mpsc::unbounded_channel();
    let a = engine.subscribe(request(10, 10, Inbox::arc("a", &tx))).unwrap();
    let b = engine.subscribe(request(11, 5, Inbox::arc("b", &tx))).unwrap();

    engine
        .publish_with_result(
            CommonEvent::new(EV),
            &PublishOptions::ordered(),
            &publisher(),
            Inbox::arc("final", &ftx),
        )
        .unwrap();

    assert_eq!(next(&mut rx).await.0, "a");
    engine.finish_receiver(a, 7, "seven", false).await;

    let (who, event, _) = next(&mut rx).await;
    assert_eq!(who, "b");
    assert_eq!((event.code(), event.data()), (7, "seven"));
    engine.finish_receiver(b, 8, "eight", false).await;

    let (_, event, _) = next(&mut frx).await;
    assert_eq!((event.code(), event.data()), (8, "eight"));
}

#[tokio::test(start_paused = true)]
async fn frozen_receiver_is_skipped_and_replayed_unordered() {
    let engine = engine();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let a = engine.subscribe(request(10, 10, Inbox::arc("a", &tx))).unwrap();
    let b = engine.subscribe(request(11, 5, Inbox::arc("b", &tx))).unwrap();
    assert_eq!(engine.update_freeze(&ProcessSelector::pids([10]), true), 1);

    let start = Instant::now();
    engine
        .publish(CommonEvent::new(EV), &PublishOptions::ordered(), &publisher())
        .unwrap();

    // B is handed the event without waiting on A
    let (who, _, _) = next(&mut rx).await;
    assert_eq!(who, "b");
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(engine.frozen_pending(a), 1);
    engine.finish_receiver(b, 0, "", false).await;

    assert_eq!(engine.thaw(&ProcessSelector::pids([10])), Ok(1));
    let (who, _, delivery) = next(&mut rx).await;
    assert_eq!(who, "a");
    assert!(!delivery.ordered);
    assert_eq!(engine.frozen_pending(a), 0);
}

#[tokio::test(start_paused = true)]
async fn receiver_frozen_mid_chain_is_skipped_and_captured() {
    let engine = engine();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let a = engine.subscribe(request(10, 10, Inbox::arc("a", &tx))).unwrap();
    let b = engine.subscribe(request(11, 5, Inbox::arc("b", &tx))).unwrap();
    let c = engine.subscribe(request(12, 0, Inbox::arc("c", &tx))).unwrap();

    engine
        .publish(CommonEvent::new(EV), &PublishOptions::ordered(), &publisher())
        .unwrap();
    assert_eq!(next(&mut rx).await.0, "a");
    let parked = engine.active_receiver_of(a).await.expect("parked on a");
    assert_eq!(parked.deliveries, vec![DeliveryState::Pending; 3]);

    // b freezes while a holds the chain; a newcomer does not join it
    assert_eq!(engine.update_freeze(&ProcessSelector::pids([11]), true), 1);
    engine.subscribe(request(13, 7, Inbox::arc("late", &tx))).unwrap();
    assert_eq!(engine.finish_receiver(a, 2, "from-a", false).await, Outcome::Accepted);

    let (who, event, _) = next(&mut rx).await;
    assert_eq!(who, "c");
    assert_eq!(event.data(), "from-a");
    let parked = engine.active_receiver_of(c).await.expect("parked on c");
    assert_eq!(parked.index, Some(2));
    assert_eq!(
        parked.deliveries,
        vec![DeliveryState::Delivered, DeliveryState::Skipped, DeliveryState::Pending]
    );
    assert_eq!(engine.frozen_pending(b), 1);

    engine.finish_receiver(c, 0, "", false).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(rx.try_recv().is_err());

    // the held copy carries the result b would have seen
    assert_eq!(engine.thaw(&ProcessSelector::pids([11])), Ok(1));
    let (who, event, delivery) = next(&mut rx).await;
    assert_eq!(who, "b");
    assert!(!delivery.ordered);
    assert_eq!((event.code(), event.data()), (2, "from-a"));
}

#[tokio::test(start_paused = true)]
async fn timed_out_receiver_is_force_advanced() {
    let engine = engine();
    let mut bus = engine.bus().subscribe();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let a = engine.subscribe(request(10, 10, Inbox::arc("a", &tx))).unwrap();
    engine.subscribe(request(11, 5, Inbox::arc("b", &tx))).unwrap();

    let start = Instant::now();
    engine
        .publish(
            CommonEvent::new(EV).with_data("init"),
            &PublishOptions::ordered(),
            &publisher(),
        )
        .unwrap();
    assert_eq!(next(&mut rx).await.0, "a");

    // A never finishes
    let (who, event, _) = next(&mut rx).await;
    assert_eq!(who, "b");
    assert_eq!(event.data(), "init");
    assert!(start.elapsed() >= Duration::from_secs(10));
    assert!(start.elapsed() < Duration::from_secs(11));

    let rec = wait_for(&mut bus, BrokerEventKind::ReceiverTimedOut).await;
    assert_eq!(rec.subscriber, Some(a));
    assert_eq!(rec.timeout_ms, Some(10_000));

    // too late
    assert_eq!(engine.finish_receiver(a, 1, "late", false).await, Outcome::Stale);
}

#[tokio::test(start_paused = true)]
async fn watchdog_bounds_a_chain() {
    let engine = engine_with(BrokerConfig {
        watchdog_factor: 1,
        ..BrokerConfig::default()
    });
    let mut bus = engine.bus().subscribe();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (ftx, mut frx) = mpsc::unbounded_channel();
    engine.subscribe(request(10, 10, Inbox::arc("a", &tx))).unwrap();
    engine.subscribe(request(11, 5, Inbox::arc("b", &tx))).unwrap();

    let start = Instant::now();
    let receipt = engine
        .publish_with_result(
            CommonEvent::new(EV),
            &PublishOptions::ordered(),
            &publisher(),
            Inbox::arc("final", &ftx),
        )
        .unwrap();

    assert_eq!(next(&mut rx).await.0, "a");
    assert_eq!(next(&mut rx).await.0, "b");
    assert_eq!(next(&mut frx).await.0, "final");

    // 1 × 10s × 2 receivers
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(20) && elapsed < Duration::from_secs(21));
    let rec = wait_for(&mut bus, BrokerEventKind::WatchdogFired).await;
    assert_eq!(rec.chain, receipt.chain);
    let rec = wait_for(&mut bus, BrokerEventKind::ChainFinished).await;
    assert_eq!(rec.reason.as_deref(), Some("watchdog"));
}

#[tokio::test(start_paused = true)]
async fn frozen_unordered_publish_is_replayed_exactly_once() {
    let engine = engine();
    let mut bus = engine.bus().subscribe();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let a = engine.subscribe(request(10, 0, Inbox::arc("a", &tx))).unwrap();
    engine.update_freeze(&ProcessSelector::Uid(20010), true);

    engine
        .publish(CommonEvent::new(EV), &PublishOptions::unordered(), &publisher())
        .unwrap();
    wait_for(&mut bus, BrokerEventKind::EventFrozen).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(engine.frozen_pending(a), 1);

    assert_eq!(engine.thaw(&ProcessSelector::Uid(20010)), Ok(1));
    assert_eq!(next(&mut rx).await.0, "a");

    // a second flush finds nothing
    assert_eq!(engine.flush_frozen(&ProcessSelector::Uid(20010)), Ok(0));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn failing_receivers_never_block_others() {
    let engine = engine();
    let mut bus = engine.bus().subscribe();
    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.subscribe(request(10, 30, Inbox::arc("a", &tx))).unwrap();
    let refusing = engine.subscribe(request(11, 20, Arc::new(Refusing))).unwrap();
    let exploding = engine.subscribe(request(12, 10, Arc::new(Exploding))).unwrap();
    engine.subscribe(request(13, 0, Inbox::arc("d", &tx))).unwrap();

    engine
        .publish(CommonEvent::new(EV), &PublishOptions::unordered(), &publisher())
        .unwrap();
    let mut got = vec![next(&mut rx).await.0, next(&mut rx).await.0];
    got.sort_unstable();
    assert_eq!(got, vec!["a", "d"]);

    let first = wait_for(&mut bus, BrokerEventKind::DeliveryFailed).await;
    let second = wait_for(&mut bus, BrokerEventKind::DeliveryFailed).await;
    assert_eq!(first.subscriber, Some(refusing));
    assert_eq!(second.subscriber, Some(exploding));
    assert!(second.reason.as_deref().unwrap_or("").contains("receiver boom"));

    // each healthy receiver got exactly one copy
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn unordered_publishes_arrive_exactly_once_each() {
    let engine = engine();
    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.subscribe(request(10, 0, Inbox::arc("a", &tx))).unwrap();
    engine.subscribe(request(11, 0, Inbox::arc("b", &tx))).unwrap();

    for data in ["one", "two"] {
        engine
            .publish(CommonEvent::new(EV).with_data(data), &PublishOptions::unordered(), &publisher())
            .unwrap();
    }

    let mut got = Vec::new();
    for _ in 0..4 {
        let (who, event, delivery) = next(&mut rx).await;
        assert!(!delivery.ordered);
        got.push((who, event.data().to_string()));
    }
    got.sort();
    assert_eq!(
        got,
        vec![
            ("a", "one".to_string()),
            ("a", "two".to_string()),
            ("b", "one".to_string()),
            ("b", "two".to_string()),
        ]
    );

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn target_user_limits_who_sees_a_publish() {
    let engine = EngineBuilder::default()
        .with_permissions(Arc::new(Grants {
            grants: vec![],
            protected: "usual.event.BOOT_COMPLETED",
        }))
        .build();
    let (tx, mut rx) = mpsc::unbounded_channel();
    engine
        .subscribe(request(10, 20, Inbox::arc("same", &tx)).with_scope(UserScope::User(100)))
        .unwrap();
    engine
        .subscribe(request(11, 10, Inbox::arc("other", &tx)).with_scope(UserScope::User(101)))
        .unwrap();
    engine
        .subscribe(request(12, 5, Inbox::arc("system", &tx)).with_scope(UserScope::User(5)))
        .unwrap();
    engine.subscribe(request(13, 0, Inbox::arc("any", &tx))).unwrap();

    // unprivileged app addressing user 100
    let app = OwnerInfo::new(30, 20030, "com.example.app");
    let receipt = engine
        .publish(
            CommonEvent::new(EV),
            &PublishOptions::unordered().with_target_user(TargetUser::User(100)),
            &app,
        )
        .unwrap();
    assert_eq!((receipt.matched, receipt.denied), (2, 0));
    let mut got = vec![next(&mut rx).await.0, next(&mut rx).await.0];
    got.sort_unstable();
    assert_eq!(got, vec!["any", "same"]);

    // privileged publisher addressing user 100 also reaches system users
    let receipt = engine
        .publish(
            CommonEvent::new(EV),
            &PublishOptions::unordered().with_target_user(TargetUser::User(100)),
            &publisher(),
        )
        .unwrap();
    assert_eq!(receipt.matched, 3);
    let mut got = vec![
        next(&mut rx).await.0,
        next(&mut rx).await.0,
        next(&mut rx).await.0,
    ];
    got.sort_unstable();
    assert_eq!(got, vec!["any", "same", "system"]);

    // privileged publisher with no target reaches everyone
    let receipt = engine
        .publish(CommonEvent::new(EV), &PublishOptions::unordered(), &publisher())
        .unwrap();
    assert_eq!(receipt.matched, 4);
    let matched: Vec<SubscriberId> = engine
        .matching(&CommonEvent::new(EV), &PublishOptions::unordered(), &app)
        .matched
        .iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(matched.len(), 1);
    engine.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_hand_off_skips_ordered_receiver() {
    let engine = engine();
    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.subscribe(request(10, 10, Arc::new(Refusing))).unwrap();
    engine.subscribe(request(11, 5, Inbox::arc("b", &tx))).unwrap();

    let start = Instant::now();
    engine
        .publish(CommonEvent::new(EV), &PublishOptions::ordered(), &publisher())
        .unwrap();
    assert_eq!(next(&mut rx).await.0, "b");
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn stale_and_duplicate_finishes_are_ignored() {
    let engine = engine();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let a = engine.subscribe(request(10, 10, Inbox::arc("a", &tx))).unwrap();
    let b = engine.subscribe(request(11, 5, Inbox::arc("b", &tx))).unwrap();

    engine
        .publish(CommonEvent::new(EV), &PublishOptions::ordered(), &publisher())
        .unwrap();
    assert_eq!(next(&mut rx).await.0, "a");

    let snapshot = engine.active_receiver_of(a).await.expect("parked on a");
    assert_eq!(snapshot.receiver, Some(a));
    assert_eq!(snapshot.state, ChainState::Received);
    assert!(engine.active_receiver_of(b).await.is_none());

    assert_eq!(engine.finish_receiver(b, 0, "", false).await, Outcome::Stale);
    assert_eq!(engine.finish_receiver(a, 0, "", false).await, Outcome::Accepted);
    assert_eq!(engine.finish_receiver(a, 0, "", false).await, Outcome::Stale);
    assert_eq!(next(&mut rx).await.0, "b");
}

#[tokio::test(start_paused = true)]
async fn unsubscribing_parked_receiver_releases_chain() {
    let engine = engine();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let a = engine.subscribe(request(10, 10, Inbox::arc("a", &tx))).unwrap();
    engine.subscribe(request(11, 5, Inbox::arc("b", &tx))).unwrap();

    let start = Instant::now();
    engine
        .publish(CommonEvent::new(EV), &PublishOptions::ordered(), &publisher())
        .unwrap();
    assert_eq!(next(&mut rx).await.0, "a");

    engine.unsubscribe(a).await.unwrap();
    assert_eq!(next(&mut rx).await.0, "b");
    assert!(start.elapsed() < Duration::from_secs(1));

    assert_eq!(
        engine.unsubscribe(a).await,
        Err(BrokerError::UnknownSubscriber { id: a })
    );
}

#[tokio::test(start_paused = true)]
async fn ordered_chains_run_one_at_a_time() {
    let engine = engine();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let a = engine.subscribe(request(10, 0, Inbox::arc("a", &tx))).unwrap();

    let first = engine
        .publish(CommonEvent::new(EV).with_data("first"), &PublishOptions::ordered(), &publisher())
        .unwrap();
    let second = engine
        .publish(CommonEvent::new(EV).with_data("second"), &PublishOptions::ordered(), &publisher())
        .unwrap();
    assert_ne!(first.chain, second.chain);

    assert_eq!(next(&mut rx).await.1.data(), "first");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(rx.try_recv().is_err());

    engine.finish_receiver(a, 0, "done", false).await;
    assert_eq!(next(&mut rx).await.1.data(), "second");
}

#[tokio::test]
async fn ceiling_evicts_other_owner_and_rejects_top_offender() {
    let killer = Arc::new(RecordingKiller::default());
    let engine = EngineBuilder::new(BrokerConfig {
        max_subscribers: 3,
        ..BrokerConfig::default()
    })
    .with_killer(Arc::clone(&killer) as Arc<dyn ProcessKiller>)
    .build();
    let mut bus = engine.bus().subscribe();
    let (tx, _rx) = mpsc::unbounded_channel();

    engine.subscribe(request(2, 0, Inbox::arc("x", &tx))).unwrap();
    engine.subscribe(request(2, 0, Inbox::arc("x", &tx))).unwrap();
    engine.subscribe(request(1, 0, Inbox::arc("x", &tx))).unwrap();

    // the top offender itself is refused
    let err = engine.subscribe(request(2, 0, Inbox::arc("x", &tx))).unwrap_err();
    assert_eq!(err, BrokerError::TooManySubscribers { pid: 2, count: 2 });
    assert!(killer.0.lock().unwrap().is_empty());

    // anyone else is admitted and the top offender is killed
    engine.subscribe(request(3, 0, Inbox::arc("x", &tx))).unwrap();
    assert_eq!(*killer.0.lock().unwrap(), vec![2]);
    assert_eq!(engine.subscriber_count(), 4);
    let rec = wait_for(&mut bus, BrokerEventKind::OwnerEvicted).await;
    assert_eq!(rec.pid, Some(2));

    // subscriptions go away when the lifecycle layer reports the death
    assert_eq!(engine.on_owner_died(2).await, 2);
    assert!(engine.subscriptions_of(2).is_empty());
    assert_eq!(engine.subscriber_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn sticky_value_reaches_late_subscriber() {
    let engine = engine();
    engine
        .publish(
            CommonEvent::new(EV).with_code(3),
            &PublishOptions::unordered().sticky(),
            &publisher(),
        )
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    engine.subscribe(request(10, 0, Inbox::arc("late", &tx))).unwrap();
    let (who, event, delivery) = next(&mut rx).await;
    assert_eq!(who, "late");
    assert_eq!(event.code(), 3);
    assert!(delivery.sticky);
}

#[tokio::test(start_paused = true)]
async fn sticky_replay_honours_subscriber_constraints() {
    let engine = EngineBuilder::default()
        .with_permissions(Arc::new(Grants {
            grants: vec![(20030, "permission.COMMONEVENT_STICKY")],
            protected: "usual.event.BOOT_COMPLETED",
        }))
        .build();
    let app = OwnerInfo::new(30, 20030, "com.example.app");
    engine
        .publish(
            CommonEvent::new(EV).with_data("held"),
            &PublishOptions::unordered()
                .sticky()
                .with_target_user(TargetUser::User(100)),
            &app,
        )
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    engine
        .subscribe(request(10, 0, Inbox::arc("pinned", &tx)).with_publisher_uid(30000))
        .unwrap();
    engine
        .subscribe(request(11, 0, Inbox::arc("guarded", &tx)).with_permission("perm.SEND"))
        .unwrap();
    engine
        .subscribe(request(12, 0, Inbox::arc("elsewhere", &tx)).with_scope(UserScope::User(101)))
        .unwrap();
    engine.subscribe(request(13, 0, Inbox::arc("open", &tx))).unwrap();

    let (who, event, delivery) = next(&mut rx).await;
    assert_eq!(who, "open");
    assert_eq!(event.data(), "held");
    assert!(delivery.sticky);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn publish_admission_rules() {
    let engine = EngineBuilder::default()
        .with_permissions(Arc::new(Grants {
            grants: vec![(20010, "perm.SEND")],
            protected: "usual.event.BOOT_COMPLETED",
        }))
        .build();
    let app = OwnerInfo::new(30, 20030, "com.example.app");

    let err = engine
        .publish(CommonEvent::new(""), &PublishOptions::unordered(), &app)
        .unwrap_err();
    assert_eq!(err, BrokerError::EmptyEventName);

    let err = engine
        .publish(
            CommonEvent::new("usual.event.BOOT_COMPLETED"),
            &PublishOptions::unordered(),
            &app,
        )
        .unwrap_err();
    assert!(matches!(err, BrokerError::NotPrivileged { .. }));
    assert!(
        engine
            .publish(
                CommonEvent::new("usual.event.BOOT_COMPLETED"),
                &PublishOptions::unordered(),
                &publisher(),
            )
            .is_ok()
    );

    let err = engine
        .publish(CommonEvent::new(EV), &PublishOptions::unordered().sticky(), &app)
        .unwrap_err();
    assert_eq!(
        err,
        BrokerError::PermissionDenied {
            permission: "permission.COMMONEVENT_STICKY".into()
        }
    );

    // subscriber demands a permission the app lacks: counted, not an error
    let (tx, _rx) = mpsc::unbounded_channel();
    engine
        .subscribe(request(10, 0, Inbox::arc("a", &tx)).with_permission("perm.SEND"))
        .unwrap();
    let receipt = engine
        .publish(CommonEvent::new(EV), &PublishOptions::unordered(), &app)
        .unwrap();
    assert_eq!((receipt.matched, receipt.denied), (0, 1));

    let granted = OwnerInfo::new(31, 20010, "com.example.granted");
    let receipt = engine
        .publish(CommonEvent::new(EV), &PublishOptions::unordered(), &granted)
        .unwrap();
    assert_eq!((receipt.matched, receipt.denied), (1, 0));
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_purges_held_events() {
    let engine = engine();
    let mut bus = engine.bus().subscribe();
    let (tx, _rx) = mpsc::unbounded_channel();
    let a = engine.subscribe(request(10, 0, Inbox::arc("a", &tx))).unwrap();
    engine.update_freeze(&ProcessSelector::All, true);

    engine
        .publish(CommonEvent::new(EV), &PublishOptions::unordered(), &publisher())
        .unwrap();
    wait_for(&mut bus, BrokerEventKind::EventFrozen).await;

    engine.unsubscribe(a).await.unwrap();
    assert_eq!(engine.frozen_pending(a), 0);
    assert_eq!(engine.flush_frozen(&ProcessSelector::All), Ok(0));
}

#[tokio::test(start_paused = true)]
async fn ordered_publish_without_receivers_still_reports_result() {
    let engine = engine();
    let (ftx, mut frx) = mpsc::unbounded_channel();
    let receipt = engine
        .publish_with_result(
            CommonEvent::new(EV).with_code(5),
            &PublishOptions::unordered(),
            &publisher(),
            Inbox::arc("final", &ftx),
        )
        .unwrap();
    assert_eq!(receipt.matched, 0);
    let (_, event, _) = next(&mut frx).await;
    assert_eq!(event.code(), 5);
}

struct KindRecorder(mpsc::UnboundedSender<BrokerEventKind>);

#[async_trait]
impl Observe for KindRecorder {
    async fn on_event(&self, event: &BrokerEvent) {
        let _ = self.0.send(event.kind);
    }

    fn name(&self) -> &'static str {
        "kind-recorder"
    }
}

#[tokio::test]
async fn observers_see_broker_records() {
    let (ktx, mut krx) = mpsc::unbounded_channel();
    let engine = EngineBuilder::default()
        .with_observers(vec![Arc::new(LogWriter::new()), Arc::new(KindRecorder(ktx))])
        .build();

    let (tx, _rx) = mpsc::unbounded_channel();
    engine.subscribe(request(10, 0, Inbox::arc("a", &tx))).unwrap();
    engine
        .publish(CommonEvent::new(EV), &PublishOptions::unordered(), &publisher())
        .unwrap();

    let seen = timeout(PATIENCE, async {
        let mut kinds = Vec::new();
        while let Some(kind) = krx.recv().await {
            kinds.push(kind);
            if kind == BrokerEventKind::EventPublished {
                break;
            }
        }
        kinds
    })
    .await
    .expect("records within patience");
    assert!(seen.contains(&BrokerEventKind::SubscriberAdded));
    engine.shutdown().await;
}

#[tokio::test]
async fn shut_down_engine_refuses_work() {
    let engine = engine();
    engine.shutdown().await;

    let err = engine
        .publish(CommonEvent::new(EV), &PublishOptions::unordered(), &publisher())
        .unwrap_err();
    assert_eq!(err, BrokerError::Closed);
    assert_eq!(
        engine.finish_receiver(SubscriberId(1), 0, "", false).await,
        Outcome::Stale
    );
}
