//! End-to-end scenarios driven through the public API with recording fakes

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use hidhostd::testing::{PlatformCall, RecordingPlatform, RecordingSink, RecordingTelemetry, ScriptedConsumer};
use hidhostd::{
    lock_cache, BondState, Config, ConnectionState, Device, DeviceAddress, DeviceStore, HidHostError,
    HostService, InputReport, MemoryDeviceStore, Notification, NotificationSink, SharedDeviceCache, SinkError,
    StoredHosts,
};

struct Harness {
    platform: Arc<RecordingPlatform>,
    sink: Arc<RecordingSink>,
    telemetry: Arc<RecordingTelemetry>,
    store: MemoryDeviceStore,
    service: HostService<RecordingPlatform>,
}

fn harness(store: MemoryDeviceStore, armed: bool) -> Harness {
    let mut config = Config::default();
    config.monitoring.armed = armed;

    let platform = Arc::new(RecordingPlatform::new());
    let sink = Arc::new(RecordingSink::new());
    let telemetry = Arc::new(RecordingTelemetry::new());
    let service = HostService::new(
        platform.clone(),
        Box::new(store.clone()),
        sink.clone(),
        telemetry.clone(),
        &config,
    );
    Harness {
        platform,
        sink,
        telemetry,
        store,
        service,
    }
}

fn started(store: MemoryDeviceStore, armed: bool) -> Harness {
    let h = harness(store, armed);
    h.service.start().unwrap();
    h.sink.clear();
    h
}

fn bonded(address: &str, name: &str) -> Device {
    Device::new(DeviceAddress::parse(address).unwrap(), name, BondState::Bonded)
}

fn with_default(device: &Device) -> MemoryDeviceStore {
    MemoryDeviceStore::with_hosts(StoredHosts {
        hosts: vec![device.clone()],
        default: Some(device.address.clone()),
    })
}

#[test]
fn test_armed_new_host_becomes_default() {
    let h = started(MemoryDeviceStore::new(), true);
    let a = bonded("0A:00:00:00:00:01", "Desktop");

    h.service.on_connection_state_changed(&a, ConnectionState::Connected);

    assert_eq!(h.service.known_hosts(), vec![a.clone()]);
    assert_eq!(h.service.default_host().map(|(d, _)| d), Some(a.clone()));
    assert_eq!(
        h.sink.count(|n| matches!(n, Notification::DefaultHostChanged { .. })),
        1
    );
    assert_eq!(
        h.sink.count(|n| matches!(n, Notification::AvailableHostsChanged { .. })),
        1
    );
    assert_eq!(h.telemetry.events().len(), 1);

    // Persisted through to the store
    let stored = h.store.load().unwrap();
    assert_eq!(stored.default, Some(a.address));
}

#[test]
fn test_default_disconnect_publishes_state_only() {
    let a = bonded("0A:00:00:00:00:01", "Desktop");
    let h = started(with_default(&a), false);
    let before = h.service.known_hosts();

    h.service.on_connection_state_changed(&a, ConnectionState::Disconnected);

    assert_eq!(
        h.sink.notifications(),
        vec![Notification::DefaultHostStateChanged {
            device: a.clone(),
            state: ConnectionState::Disconnected,
        }]
    );
    assert_eq!(h.service.known_hosts(), before);
    assert_eq!(h.service.default_host().map(|(d, _)| d), Some(a));
}

#[test]
fn test_every_default_transition_published_once() {
    let a = bonded("0A:00:00:00:00:01", "Desktop");
    let h = started(with_default(&a), true);

    let transitions = [
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Disconnecting,
        ConnectionState::Disconnected,
    ];
    for state in transitions {
        h.service.on_connection_state_changed(&a, state);
    }

    let published: Vec<ConnectionState> = h
        .sink
        .notifications()
        .into_iter()
        .filter_map(|n| match n {
            Notification::DefaultHostStateChanged { state, .. } => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(published, transitions.to_vec());
}

#[test]
fn test_disarmed_never_adopts() {
    let h = started(MemoryDeviceStore::new(), false);

    for i in 0..4u8 {
        let device = bonded(&format!("0A:00:00:00:00:{:02X}", i), "Host");
        h.service.on_connection_state_changed(&device, ConnectionState::Connected);
    }

    assert!(h.service.default_host().is_none());
    assert!(h.service.known_hosts().is_empty());
    assert!(h.sink.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_app_status_up_connects_default_once() {
    let b = bonded("0B:00:00:00:00:02", "Laptop");
    let h = started(with_default(&b), false);

    h.service.on_app_status_changed(true);

    assert_eq!(h.platform.connect_calls(), vec![b.address.clone()]);
    let pending = h.service.controller().pending_reconnect().unwrap();
    assert_eq!(pending.target, b);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_connect_is_not_retried() {
    let b = bonded("0B:00:00:00:00:02", "Laptop");
    let h = started(with_default(&b), false);

    h.service.on_app_status_changed(true);
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(h.platform.connect_calls().len(), 1);
    assert_eq!(
        h.sink.notifications(),
        vec![Notification::ConnectAttemptTimedOut { device: b }]
    );
    assert!(h.service.controller().pending_reconnect().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_connected_just_before_deadline_cancels_timeout() {
    let b = bonded("0B:00:00:00:00:02", "Laptop");
    let h = started(with_default(&b), false);

    h.service.on_app_status_changed(true);
    tokio::time::sleep(Duration::from_millis(7_999)).await;
    h.service.on_connection_state_changed(&b, ConnectionState::Connected);
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(
        h.sink.count(|n| matches!(n, Notification::ConnectAttemptTimedOut { .. })),
        0
    );
    assert_eq!(
        h.sink.count(|n| matches!(n, Notification::DefaultHostStateChanged { .. })),
        1
    );
}

#[test]
fn test_report_without_consumer_alerts_once() {
    let h = started(MemoryDeviceStore::new(), false);
    let c = DeviceAddress::parse("0C:00:00:00:00:03").unwrap();

    h.service.on_interrupt_data(InputReport::new(c.clone(), 1, vec![0x01, 0x02]));

    assert!(h.platform.sent_reports().is_empty());
    assert_eq!(
        h.sink.notifications(),
        vec![Notification::ActionRequired { source: c.clone() }]
    );

    // Attaching later does not replay the dropped report
    let consumer = Arc::new(ScriptedConsumer::new(vec![vec![0xFF]]));
    h.service.attach_consumer(consumer.clone());
    assert!(consumer.received().is_empty());
    assert!(h.platform.sent_reports().is_empty());
}

#[test]
fn test_consumer_replies_reach_origin() {
    let h = started(MemoryDeviceStore::new(), false);
    let c = DeviceAddress::parse("0C:00:00:00:00:03").unwrap();
    h.service
        .attach_consumer(Arc::new(ScriptedConsumer::new(vec![vec![1], vec![2, 2]])));

    h.service.on_interrupt_data(InputReport::new(c.clone(), 9, vec![0x42]));

    assert_eq!(
        h.platform.sent_reports(),
        vec![(c.clone(), 9, vec![1]), (c, 9, vec![2, 2])]
    );
    assert!(h.sink.notifications().is_empty());
}

#[test]
fn test_register_unregister_symmetry() {
    let h = harness(MemoryDeviceStore::new(), false);

    h.service.start().unwrap();
    assert!(matches!(h.service.start(), Err(HidHostError::AlreadyRegistered)));

    h.sink.clear();
    assert!(h.service.stop());
    assert!(!h.service.stop());
    assert_eq!(h.sink.notifications().len(), 1);
    assert_eq!(h.platform.count(&PlatformCall::Register), 1);
    assert_eq!(h.platform.count(&PlatformCall::Unregister), 1);

    // A fresh start after stop is allowed
    h.service.start().unwrap();
    assert_eq!(h.platform.count(&PlatformCall::Register), 2);
}

#[test]
fn test_promotion_implies_known_across_restart() {
    let store = MemoryDeviceStore::new();
    let a = bonded("0A:00:00:00:00:01", "Desktop");
    {
        let h = started(store.clone(), true);
        h.service.on_connection_state_changed(&a, ConnectionState::Connected);
        h.service.stop();
    }

    let h = harness(store, false);
    let cache = lock_cache(h.service.cache());
    assert!(cache.is_known_host(&a.address));
    assert!(cache.is_default(&a.address));
}

/// Sink that reads the cache from inside `publish`, recording whether the
/// cache lock was free at that moment
struct ReentrantSink {
    cache: OnceLock<SharedDeviceCache>,
    published: Mutex<Vec<(Notification, bool)>>,
}

impl NotificationSink for ReentrantSink {
    fn publish(&self, notification: Notification) -> Result<(), SinkError> {
        let free = match self.cache.get() {
            Some(cache) => match cache.try_lock() {
                Ok(cache) => {
                    cache.list_known_hosts();
                    true
                }
                Err(_) => false,
            },
            None => true,
        };
        self.published.lock().unwrap().push((notification, free));
        Ok(())
    }
}

#[test]
fn test_cache_lock_released_before_publishing() {
    let mut config = Config::default();
    config.monitoring.armed = true;
    let platform = Arc::new(RecordingPlatform::new());
    let sink = Arc::new(ReentrantSink {
        cache: OnceLock::new(),
        published: Mutex::new(Vec::new()),
    });
    let service = HostService::new(
        platform.clone(),
        Box::new(MemoryDeviceStore::new()),
        sink.clone(),
        Arc::new(RecordingTelemetry::new()),
        &config,
    );
    sink.cache.set(service.cache().clone()).ok();
    service.start().unwrap();

    let a = bonded("0A:00:00:00:00:01", "Desktop");
    let b = bonded("0B:00:00:00:00:02", "Laptop");

    // Adoption, then default-state sync
    service.on_connection_state_changed(&a, ConnectionState::Connected);
    service.on_connection_state_changed(&b, ConnectionState::Connected);
    service.on_connection_state_changed(&b, ConnectionState::Disconnected);

    // Operator changes and bonded-list reconciliation
    service.set_default_host(&a.address).unwrap();
    assert!(service.forget_host(&b.address));
    platform.set_bonded(Vec::new());
    assert!(service.available_hosts().unwrap().is_empty());
    service.stop();

    let published = sink.published.lock().unwrap();
    let kinds = |pred: fn(&Notification) -> bool| published.iter().filter(|(n, _)| pred(n)).count();
    assert_eq!(kinds(|n| matches!(n, Notification::DefaultHostChanged { .. })), 4);
    assert_eq!(kinds(|n| matches!(n, Notification::AvailableHostsChanged { .. })), 4);
    assert_eq!(kinds(|n| matches!(n, Notification::DefaultHostStateChanged { .. })), 3);

    let held: Vec<&Notification> = published.iter().filter(|(_, free)| !free).map(|(n, _)| n).collect();
    assert!(held.is_empty(), "published under the cache lock: {:?}", held);
}
