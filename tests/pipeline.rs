//! End-to-end pipeline tests: fusion through dispatch, escalation and
//! live fan-out, on a paused clock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use careconnect_core::dispatch::{ChannelDeliveryError, DeliveryErrorKind, NotificationChannel};
use careconnect_core::domain::{
    AlertStatus, AttemptStatus, ChannelKind, Contact, DecisionSource, DetectionSignal, GeoPoint,
    Modality, Responder, ResponderId, ResponderRole, UserId, UserProfile,
};
use careconnect_core::hub::{ClientRole, Envelope};
use careconnect_core::matcher::InMemoryResponderRegistry;
use careconnect_core::pipeline::CarePipeline;
use careconnect_core::store::InMemoryAlertStore;
use careconnect_core::CareConfig;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Test channel: records the (paused-clock) time of every send and
/// fails for addresses listed as unreachable.
struct ScriptedChannel {
    kind: ChannelKind,
    failing_addresses: Vec<String>,
    sends: Mutex<Vec<(String, tokio::time::Instant)>>,
}

impl ScriptedChannel {
    fn new(kind: ChannelKind, failing_addresses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            kind,
            failing_addresses: failing_addresses.iter().map(|a| a.to_string()).collect(),
            sends: Mutex::new(Vec::new()),
        })
    }

    fn send_times(&self, address: &str) -> Vec<tokio::time::Instant> {
        self.sends
            .lock()
            .iter()
            .filter(|(a, _)| a == address)
            .map(|(_, t)| *t)
            .collect()
    }
}

#[async_trait]
impl NotificationChannel for ScriptedChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, address: &str, _message: &str) -> Result<(), ChannelDeliveryError> {
        self.sends
            .lock()
            .push((address.to_string(), tokio::time::Instant::now()));
        if self.failing_addresses.iter().any(|a| a == address) {
            Err(ChannelDeliveryError {
                channel: self.kind,
                kind: DeliveryErrorKind::Unreachable,
                message: "scripted failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

struct TestBed {
    pipeline: Arc<CarePipeline>,
    store: Arc<InMemoryAlertStore>,
    channel: Arc<ScriptedChannel>,
    registry: Arc<InMemoryResponderRegistry>,
}

fn testbed(channel: Arc<ScriptedChannel>) -> TestBed {
    init_tracing();
    let store = Arc::new(InMemoryAlertStore::new());
    let registry = Arc::new(InMemoryResponderRegistry::new());
    let pipeline = CarePipeline::new(
        CareConfig::default(),
        vec![channel.clone() as Arc<dyn NotificationChannel>],
        registry.clone(),
        store.clone(),
    );
    TestBed {
        pipeline,
        store,
        channel,
        registry,
    }
}

fn caregiver_profile() -> UserProfile {
    UserProfile {
        location: None,
        caregivers: vec![Contact::new("Ana").with_address(ChannelKind::Sms, "caregiver-sms")],
        emergency: vec![],
    }
}

fn confirmed_signal(user: &str) -> DetectionSignal {
    DetectionSignal::new(UserId::from(user), Modality::Video, 0.95, Utc::now()).unwrap()
}

fn drain(rx: &mut mpsc::Receiver<Envelope>) -> Vec<Envelope> {
    let mut out = Vec::new();
    while let Ok(envelope) = rx.try_recv() {
        out.push(envelope);
    }
    out
}

/// Let spawned driver and delivery tasks run to quiescence.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Advance the paused clock in small steps, settling between steps so
/// timers registered along the way still fire.
async fn advance_stepped(total: Duration) {
    let step = Duration::from_millis(100);
    let mut elapsed = Duration::ZERO;
    while elapsed < total {
        tokio::time::advance(step).await;
        settle().await;
        elapsed += step;
    }
}

fn volunteer(name: &str, phone: &str, location: GeoPoint) -> Responder {
    Responder {
        id: ResponderId::new(),
        name: name.to_string(),
        role: ResponderRole::Volunteer,
        phone: phone.to_string(),
        location,
        available: true,
        last_response_at: None,
    }
}

fn location_only_profile(home: GeoPoint) -> UserProfile {
    UserProfile {
        location: Some(home),
        caregivers: vec![],
        emergency: vec![],
    }
}

fn has_offer(seen: &[Envelope]) -> bool {
    seen.iter().any(|e| {
        matches!(
            e,
            Envelope::StatusUpdate { status, .. } if status == "responder_offer"
        )
    })
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_fusion_opens_exactly_one_alert() {
    let bed = testbed(ScriptedChannel::new(ChannelKind::Sms, &[]));
    let user = UserId::from("u1");
    bed.pipeline.upsert_profile(user.clone(), caregiver_profile());

    let first = bed.pipeline.ingest_signal(confirmed_signal("u1")).unwrap();
    let alert_id = first.expect("confirmed signal should open an alert");

    // Per-frame confirmed signals keep arriving; debounce folds them in.
    for _ in 0..5 {
        let opened = bed.pipeline.ingest_signal(confirmed_signal("u1")).unwrap();
        assert!(opened.is_none());
    }

    tokio::time::advance(Duration::from_millis(100)).await;
    settle().await;
    assert_eq!(bed.store.alert_count(), 1);
    let record = bed.store.get_alert(&alert_id).unwrap();
    assert_eq!(record.decision_source, DecisionSource::Fused);
    assert_eq!(record.user_id, user);
}

#[tokio::test(start_paused = true)]
async fn test_suspected_signal_opens_nothing() {
    let bed = testbed(ScriptedChannel::new(ChannelKind::Sms, &[]));
    let signal =
        DetectionSignal::new(UserId::from("u1"), Modality::Video, 0.82, Utc::now()).unwrap();

    let opened = bed.pipeline.ingest_signal(signal).unwrap();
    assert!(opened.is_none());
    assert_eq!(bed.store.alert_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_manual_trigger_bypasses_fusion() {
    let bed = testbed(ScriptedChannel::new(ChannelKind::Sms, &[]));
    let user = UserId::from("u1");
    bed.pipeline.upsert_profile(user.clone(), caregiver_profile());

    let alert_id = bed
        .pipeline
        .trigger_manual(user, None, Some("pressed the button".to_string()))
        .unwrap();

    tokio::time::advance(Duration::from_millis(100)).await;
    settle().await;
    let record = bed.store.get_alert(&alert_id).unwrap();
    assert_eq!(record.decision_source, DecisionSource::Manual);
    assert_eq!(record.status(), AlertStatus::PartialSuccess);
}

#[tokio::test(start_paused = true)]
async fn test_retry_schedule_is_exponential_backoff() {
    let bed = testbed(ScriptedChannel::new(ChannelKind::Sms, &["caregiver-sms"]));
    let user = UserId::from("u1");
    bed.pipeline.upsert_profile(user.clone(), caregiver_profile());

    let start = tokio::time::Instant::now();
    bed.pipeline.trigger_manual(user, None, None).unwrap();
    advance_stepped(Duration::from_secs(10)).await;

    let times = bed.channel.send_times("caregiver-sms");
    assert_eq!(times.len(), 3);
    let offsets: Vec<u64> = times
        .iter()
        .map(|t| t.duration_since(start).as_secs())
        .collect();
    assert_eq!(offsets, vec![0, 1, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_escalation_walks_tiers_then_fails_without_ack() {
    let bed = testbed(ScriptedChannel::new(ChannelKind::Sms, &["caregiver-sms"]));
    let user = UserId::from("u1");
    bed.pipeline.upsert_profile(
        user.clone(),
        UserProfile {
            location: None,
            caregivers: vec![Contact::new("Ana").with_address(ChannelKind::Sms, "caregiver-sms")],
            emergency: vec![
                Contact::new("Emergency Services").with_address(ChannelKind::Sms, "emergency-sms"),
            ],
        },
    );

    let alert_id = bed.pipeline.trigger_manual(user, None, None).unwrap();

    // Caregiver tier: all retries fail; escalation at the 30s deadline.
    advance_stepped(Duration::from_secs(31)).await;
    assert_eq!(bed.channel.send_times("caregiver-sms").len(), 3);
    assert_eq!(bed.channel.send_times("emergency-sms").len(), 1);
    assert_eq!(
        bed.store.get_alert(&alert_id).unwrap().status(),
        AlertStatus::PartialSuccess
    );

    // No acknowledgment ever arrives; the emergency tier deadline
    // passes and the alert fails.
    advance_stepped(Duration::from_secs(60)).await;
    assert_eq!(
        bed.store.get_alert(&alert_id).unwrap().status(),
        AlertStatus::Failed
    );

    let attempts = bed.store.attempts_for(&alert_id);
    let failed = attempts
        .iter()
        .filter(|a| a.status == AttemptStatus::Failed)
        .count();
    let sent = attempts
        .iter()
        .filter(|a| a.status == AttemptStatus::Sent)
        .count();
    assert_eq!((failed, sent), (3, 1));
}

#[tokio::test(start_paused = true)]
async fn test_acknowledge_resolves_and_stops_retries() {
    let bed = testbed(ScriptedChannel::new(ChannelKind::Sms, &["caregiver-sms"]));
    let user = UserId::from("u1");
    bed.pipeline.upsert_profile(user.clone(), caregiver_profile());

    let alert_id = bed.pipeline.trigger_manual(user, None, None).unwrap();

    // First attempt fires, then the caregiver acknowledges by phone.
    tokio::time::advance(Duration::from_millis(100)).await;
    settle().await;
    bed.pipeline.acknowledge(alert_id, "caregiver-ana").await.unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;
    settle().await;

    let record = bed.store.get_alert(&alert_id).unwrap();
    assert_eq!(record.status(), AlertStatus::Resolved);
    assert_eq!(record.acknowledged_by(), Some("caregiver-ana"));
    // Retries stopped at acknowledgment.
    assert_eq!(bed.channel.send_times("caregiver-sms").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fall_broadcast_and_guidance_reach_clients() {
    let bed = testbed(ScriptedChannel::new(ChannelKind::Sms, &[]));
    let user = UserId::from("u1");
    bed.pipeline.upsert_profile(user.clone(), caregiver_profile());

    let hub = bed.pipeline.hub().clone();
    let (user_conn, mut user_rx) = hub.connect();
    hub.register(user_conn, "u1", Some(ClientRole::User));
    let (caregiver_conn, mut caregiver_rx) = hub.connect();
    hub.register(caregiver_conn, "caregiver-1", Some(ClientRole::Caregiver));

    let alert_id = bed.pipeline.trigger_manual(user, None, None).unwrap();
    tokio::time::advance(Duration::from_millis(100)).await;
    settle().await;

    let caregiver_seen = drain(&mut caregiver_rx);
    assert!(caregiver_seen.iter().any(|e| matches!(
        e,
        Envelope::FallDetected { alert_id: id, .. } if *id == alert_id
    )));
    assert!(caregiver_seen
        .iter()
        .any(|e| matches!(e, Envelope::AlertSent { delivered: true, .. })));

    // Guidance goes only to the user's own device.
    let user_seen = drain(&mut user_rx);
    assert!(user_seen
        .iter()
        .any(|e| matches!(e, Envelope::AiAssistant { step: 1, .. })));
    assert!(!caregiver_seen
        .iter()
        .any(|e| matches!(e, Envelope::AiAssistant { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_responder_offer_accept_flow() {
    let bed = testbed(ScriptedChannel::new(ChannelKind::Sms, &[]));
    let user = UserId::from("u1");
    let home = GeoPoint::new(40.4168, -3.7038);

    let responder_id = ResponderId::new();
    bed.registry.upsert(Responder {
        id: responder_id,
        name: "Luis".to_string(),
        role: ResponderRole::Volunteer,
        phone: "responder-sms".to_string(),
        location: GeoPoint::new(40.4170, -3.7040),
        available: true,
        last_response_at: None,
    });

    bed.pipeline.upsert_profile(
        user.clone(),
        UserProfile {
            location: Some(home),
            caregivers: vec![],
            emergency: vec![],
        },
    );

    let hub = bed.pipeline.hub().clone();
    let (responder_conn, mut responder_rx) = hub.connect();
    hub.register(
        responder_conn,
        &responder_id.to_string(),
        Some(ClientRole::Responder),
    );
    let (watcher_conn, mut watcher_rx) = hub.connect();
    hub.register(watcher_conn, "caregiver-1", Some(ClientRole::Caregiver));

    let alert_id = bed.pipeline.trigger_manual(user, Some(home), None).unwrap();
    tokio::time::advance(Duration::from_millis(100)).await;
    settle().await;

    // The nearest volunteer gets the offer on their device.
    let offers = drain(&mut responder_rx);
    assert!(offers.iter().any(|e| matches!(
        e,
        Envelope::StatusUpdate { status, .. } if status == "responder_offer"
    )));

    bed.pipeline
        .responder_reply(alert_id, responder_id, true)
        .await
        .unwrap();
    tokio::time::advance(Duration::from_millis(100)).await;
    settle().await;

    let seen = drain(&mut watcher_rx);
    assert!(seen.iter().any(|e| matches!(
        e,
        Envelope::StatusUpdate { status, detail, .. }
            if status == "responder_accepted"
                && detail.as_deref() == Some("Luis is on the way")
    )));

    // The responder tier also delivered an SMS to the volunteer.
    assert!(!bed.channel.send_times("responder-sms").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_declined_offer_advances_to_next_responder() {
    let bed = testbed(ScriptedChannel::new(ChannelKind::Sms, &[]));
    let user = UserId::from("u1");
    let home = GeoPoint::new(40.4168, -3.7038);

    let near = volunteer("Luis", "near-sms", GeoPoint::new(40.4170, -3.7040));
    let far = volunteer("Marta", "far-sms", GeoPoint::new(40.4200, -3.7100));
    let (near_id, far_id) = (near.id, far.id);
    bed.registry.upsert(near);
    bed.registry.upsert(far);
    bed.pipeline.upsert_profile(user.clone(), location_only_profile(home));

    let hub = bed.pipeline.hub().clone();
    let (near_conn, mut near_rx) = hub.connect();
    hub.register(near_conn, &near_id.to_string(), Some(ClientRole::Responder));
    let (far_conn, mut far_rx) = hub.connect();
    hub.register(far_conn, &far_id.to_string(), Some(ClientRole::Responder));

    let alert_id = bed.pipeline.trigger_manual(user, Some(home), None).unwrap();
    tokio::time::advance(Duration::from_millis(100)).await;
    settle().await;

    // Only the nearest volunteer is offered first.
    assert!(has_offer(&drain(&mut near_rx)));
    assert!(!has_offer(&drain(&mut far_rx)));

    bed.pipeline
        .responder_reply(alert_id, near_id, false)
        .await
        .unwrap();
    tokio::time::advance(Duration::from_millis(100)).await;
    settle().await;

    assert!(has_offer(&drain(&mut far_rx)));
}

#[tokio::test(start_paused = true)]
async fn test_offer_timeout_advances_to_next_responder() {
    let bed = testbed(ScriptedChannel::new(ChannelKind::Sms, &[]));
    let user = UserId::from("u1");
    let home = GeoPoint::new(40.4168, -3.7038);

    let near = volunteer("Luis", "near-sms", GeoPoint::new(40.4170, -3.7040));
    let far = volunteer("Marta", "far-sms", GeoPoint::new(40.4200, -3.7100));
    let (near_id, far_id) = (near.id, far.id);
    bed.registry.upsert(near);
    bed.registry.upsert(far);
    bed.pipeline.upsert_profile(user.clone(), location_only_profile(home));

    let hub = bed.pipeline.hub().clone();
    let (near_conn, mut near_rx) = hub.connect();
    hub.register(near_conn, &near_id.to_string(), Some(ClientRole::Responder));
    let (far_conn, mut far_rx) = hub.connect();
    hub.register(far_conn, &far_id.to_string(), Some(ClientRole::Responder));

    bed.pipeline.trigger_manual(user, Some(home), None).unwrap();
    tokio::time::advance(Duration::from_millis(100)).await;
    settle().await;
    assert!(has_offer(&drain(&mut near_rx)));
    assert!(!has_offer(&drain(&mut far_rx)));

    // The nearest volunteer never answers; the 15s offer window lapses.
    tokio::time::advance(Duration::from_secs(16)).await;
    settle().await;

    assert!(has_offer(&drain(&mut far_rx)));
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_does_not_extend_offer_window() {
    let bed = testbed(ScriptedChannel::new(ChannelKind::Sms, &[]));
    let user = UserId::from("u1");
    let home = GeoPoint::new(40.4168, -3.7038);

    let first = volunteer("Luis", "first-sms", GeoPoint::new(40.4170, -3.7040));
    let second = volunteer("Marta", "second-sms", GeoPoint::new(40.4200, -3.7100));
    let third = volunteer("Pau", "third-sms", GeoPoint::new(40.4250, -3.7150));
    let first_id = first.id;
    let third_id = third.id;
    bed.registry.upsert(first);
    bed.registry.upsert(second);
    bed.registry.upsert(third);
    // A caregiver tier keeps the alert driver busy well past the offer
    // windows under test.
    bed.pipeline.upsert_profile(
        user.clone(),
        UserProfile {
            location: Some(home),
            caregivers: vec![Contact::new("Ana").with_address(ChannelKind::Sms, "caregiver-sms")],
            emergency: vec![],
        },
    );

    let hub = bed.pipeline.hub().clone();
    let (third_conn, mut third_rx) = hub.connect();
    hub.register(third_conn, &third_id.to_string(), Some(ClientRole::Responder));

    let alert_id = bed.pipeline.trigger_manual(user, Some(home), None).unwrap();
    tokio::time::advance(Duration::from_millis(100)).await;
    settle().await;

    // First offer lapses at ~15s; the second volunteer's window then
    // runs until ~30s.
    tokio::time::advance(Duration::from_secs(16)).await;
    settle().await;

    // A stale decline from the first volunteer arrives mid-window; it
    // must not reset the second volunteer's deadline.
    bed.pipeline
        .responder_reply(alert_id, first_id, false)
        .await
        .unwrap();
    tokio::time::advance(Duration::from_millis(15_100)).await;
    settle().await;

    assert!(has_offer(&drain(&mut third_rx)));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_offer_queue_is_nonfatal() {
    let bed = testbed(ScriptedChannel::new(ChannelKind::Sms, &[]));
    let user = UserId::from("u1");
    let home = GeoPoint::new(40.4168, -3.7038);

    let only = volunteer("Luis", "responder-sms", GeoPoint::new(40.4170, -3.7040));
    let only_id = only.id;
    bed.registry.upsert(only);
    bed.pipeline.upsert_profile(user.clone(), location_only_profile(home));

    let alert_id = bed.pipeline.trigger_manual(user, Some(home), None).unwrap();
    tokio::time::advance(Duration::from_millis(100)).await;
    settle().await;

    bed.pipeline
        .responder_reply(alert_id, only_id, false)
        .await
        .unwrap();
    tokio::time::advance(Duration::from_millis(100)).await;
    settle().await;

    // No candidates left, but the alert itself keeps running and can
    // still be resolved.
    assert!(bed.pipeline.orchestrator().is_active(&alert_id));
    assert_eq!(
        bed.store.get_alert(&alert_id).unwrap().status(),
        AlertStatus::PartialSuccess
    );

    bed.pipeline.acknowledge(alert_id, "caregiver-ana").await.unwrap();
    tokio::time::advance(Duration::from_millis(100)).await;
    settle().await;
    assert_eq!(
        bed.store.get_alert(&alert_id).unwrap().status(),
        AlertStatus::Resolved
    );
}

#[tokio::test(start_paused = true)]
async fn test_silent_connection_reaped_without_traffic() {
    let bed = testbed(ScriptedChannel::new(ChannelKind::Sms, &[]));
    let hub = bed.pipeline.hub().clone();
    let (_quiet, _quiet_rx) = hub.connect();
    let (noisy, _noisy_rx) = hub.connect();
    assert_eq!(hub.connection_count(), 2);

    // Only one connection keeps heartbeating past the 60s timeout;
    // nothing is broadcast in the meantime.
    for _ in 0..8 {
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        hub.heartbeat(noisy);
    }

    assert_eq!(hub.connection_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_new_alert_allowed_after_cooldown() {
    let bed = testbed(ScriptedChannel::new(ChannelKind::Sms, &[]));
    let user = UserId::from("u1");
    bed.pipeline.upsert_profile(user.clone(), caregiver_profile());

    let first = bed
        .pipeline
        .ingest_signal(confirmed_signal("u1"))
        .unwrap()
        .expect("first alert");
    tokio::time::advance(Duration::from_millis(100)).await;
    settle().await;
    bed.pipeline.acknowledge(first, "caregiver-ana").await.unwrap();
    tokio::time::advance(Duration::from_millis(100)).await;
    settle().await;

    // Inside the cooldown the same user cannot re-alert through fusion.
    let suppressed = bed.pipeline.ingest_signal(confirmed_signal("u1")).unwrap();
    assert!(suppressed.is_none());
    assert_eq!(bed.store.alert_count(), 1);

    // The debounce window is wall-clock; a fresh signal stamped after
    // the cooldown opens a new alert.
    let later = Utc::now() + chrono::Duration::seconds(31);
    let signal = DetectionSignal::new(user, Modality::Video, 0.95, later).unwrap();
    let second = bed.pipeline.ingest_signal(signal).unwrap();
    assert!(second.is_some());
    tokio::time::advance(Duration::from_millis(100)).await;
    settle().await;
    assert_eq!(bed.store.alert_count(), 2);
}
