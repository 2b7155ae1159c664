//! Integration tests for the connection coordinator

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;

use bluelink::bluetooth::{ConnectionEvent, DeviceId, ScanEvent, SessionPhase, SERVICE_UUID};
use bluelink::error::{ScanError, TransportError};
use bluelink::CoordinatorConfig;

use common::{
    payload, settle, start_coordinator, ConnectBehavior, FakeAdapter, FakeFactory, FakeLink,
};

/// Scanning with a powered-off adapter yields exactly one error and nothing else
#[tokio::test]
async fn test_scan_with_disabled_adapter() {
    let adapter = FakeAdapter::new(false);
    let handle = start_coordinator(
        Some(adapter.clone()),
        FakeFactory::new(),
        CoordinatorConfig::default(),
    );
    assert!(handle.is_bluetooth_supported());

    let mut scan = handle.scan_for_devices().await.expect("Failed to request scan");
    adapter.emit(payload("dev-1", Some("Pixel"), None, -40));
    settle(&handle).await;

    assert_eq!(scan.next_event().await, Some(ScanEvent::Error(ScanError::Disabled)));
    assert_eq!(scan.next_event().await, None);
    assert_eq!(adapter.start_calls(), 0);
    assert_eq!(ScanError::Disabled.code(), "ERROR_BT_DISABLED");
}

/// Every listener receives each discovered device
#[tokio::test]
async fn test_discovery_fans_out_to_all_listeners() {
    let adapter = FakeAdapter::new(true);
    let handle = start_coordinator(
        Some(adapter.clone()),
        FakeFactory::new(),
        CoordinatorConfig::default(),
    );

    let mut first = handle.scan_for_devices().await.expect("Failed to request scan");
    let mut second = handle.scan_for_devices().await.expect("Failed to request scan");
    assert_ne!(first.id(), second.id());
    assert_eq!(adapter.start_calls(), 1);

    adapter.emit(payload("dev-1", Some("Pixel"), Some("AA:BB:CC:DD:EE:FF"), -40));
    adapter.emit(payload("dev-1", Some("Pixel"), Some("AA:BB:CC:DD:EE:FF"), -52));

    for scan in [&mut first, &mut second] {
        let a = scan.next_event().await.expect("missing first reading");
        let b = scan.next_event().await.expect("missing second reading");
        assert_eq!(a.device().map(|r| r.rssi()), Some(Some(-40)));
        assert_eq!(b.device().map(|r| r.rssi()), Some(Some(-52)));
        assert_ne!(a, b);
    }
}

/// Malformed payloads are dropped without ending the scan
#[tokio::test]
async fn test_malformed_payload_is_ignored() {
    let adapter = FakeAdapter::new(true);
    let handle = start_coordinator(
        Some(adapter.clone()),
        FakeFactory::new(),
        CoordinatorConfig::default(),
    );
    let mut scan = handle.scan_for_devices().await.expect("Failed to request scan");

    adapter.emit(Default::default());
    adapter.emit(payload("dev-2", None, None, -70));

    let event = scan.next_event().await.expect("scan ended");
    let record = event.device().expect("expected a device").clone();
    assert_eq!(record.device(), &DeviceId::new("dev-2"));
    assert_eq!(record.display_title(), "Unknown device");
}

/// A listener is unregistered once the idle window passes without another scan
#[tokio::test(start_paused = true)]
async fn test_idle_window_ends_scan() {
    let adapter = FakeAdapter::new(true);
    let handle = start_coordinator(
        Some(adapter.clone()),
        FakeFactory::new(),
        CoordinatorConfig::default(),
    );
    let mut scan = handle.scan_for_devices().await.expect("Failed to request scan");

    tokio::time::sleep(Duration::from_secs(21)).await;

    assert_eq!(scan.next_event().await, Some(ScanEvent::ScanCompleted));
    assert_eq!(scan.next_event().await, None);
    assert_eq!(adapter.stop_calls(), 1);

    let status = handle.status().await.expect("coordinator stopped");
    assert!(!status.discovering);
    assert_eq!(status.scan_listeners, 0);
}

/// A second scan at T+15 keeps the first listener registered past T+20
#[tokio::test(start_paused = true)]
async fn test_rescan_extends_idle_window() {
    let adapter = FakeAdapter::new(true);
    let handle = start_coordinator(
        Some(adapter.clone()),
        FakeFactory::new(),
        CoordinatorConfig::default(),
    );

    let mut first = handle.scan_for_devices().await.expect("Failed to request scan");
    tokio::time::sleep(Duration::from_secs(15)).await;
    let _second = handle.scan_for_devices().await.expect("Failed to request scan");
    tokio::time::sleep(Duration::from_secs(10)).await;

    adapter.emit(payload("dev-1", Some("Pixel"), None, -40));
    let event = first.next_event().await.expect("first listener was dropped");
    assert!(matches!(event, ScanEvent::DeviceDiscovered(_)));
    assert_eq!(adapter.stop_calls(), 0);

    // The debounced timer now fires 20 s after the second scan
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(first.next_event().await, Some(ScanEvent::ScanCompleted));
}

/// Unsubscribing removes only that listener
#[tokio::test]
async fn test_unsubscribe() {
    let adapter = FakeAdapter::new(true);
    let handle = start_coordinator(
        Some(adapter.clone()),
        FakeFactory::new(),
        CoordinatorConfig::default(),
    );

    let first = handle.scan_for_devices().await.expect("Failed to request scan");
    let mut second = handle.scan_for_devices().await.expect("Failed to request scan");
    first.unsubscribe();

    adapter.emit(payload("dev-1", None, Some("AA:BB:CC:DD:EE:FF"), -60));
    assert!(second.next_event().await.is_some());

    let status = handle.status().await.expect("coordinator stopped");
    assert_eq!(status.scan_listeners, 1);

    handle.unsubscribe(second.id()).expect("coordinator stopped");
    let status = handle.status().await.expect("coordinator stopped");
    assert_eq!(status.scan_listeners, 0);
}

/// The Pixel walk-through: discover, connect, disconnect
#[tokio::test]
async fn test_discover_connect_disconnect() {
    let adapter = FakeAdapter::new(true);
    let factory = FakeFactory::new();
    let link = FakeLink::new(ConnectBehavior::Succeed);
    factory.register("pixel", link.clone());
    let handle = start_coordinator(
        Some(adapter.clone()),
        factory.clone(),
        CoordinatorConfig::default(),
    );

    let mut scan = handle.scan_for_devices().await.expect("Failed to request scan");
    adapter.emit(payload("pixel", Some("Pixel"), Some("AA:BB:CC:DD:EE:FF"), -40));
    let record = match scan.next_event().await {
        Some(ScanEvent::DeviceDiscovered(record)) => record,
        other => panic!("expected a device, got {:?}", other),
    };
    assert_eq!(record.display_title(), "Pixel");
    assert_eq!(record.rssi(), Some(-40));

    let mut connection = handle
        .connect_to_device(record.device().clone())
        .await
        .expect("Failed to request connection");
    assert_eq!(connection.next_event().await, Some(ConnectionEvent::ConnectionSuccessful));
    assert_eq!(factory.requests(), vec![(DeviceId::new("pixel"), SERVICE_UUID)]);

    let status = handle.status().await.expect("coordinator stopped");
    assert_eq!(
        status.current_session,
        Some((connection.session_id(), SessionPhase::Connected))
    );
    assert!(!status.discovering);

    handle.disconnect_from_current_device().await.expect("coordinator stopped");
    assert_eq!(connection.next_event().await, Some(ConnectionEvent::ConnectionEnded));
    assert_eq!(connection.next_event().await, None);
    assert_eq!(link.closes(), 1);

    // Releasing an already released handle is harmless
    use bluelink::bluetooth::ConnectionHandle;
    assert!(link.close().await.is_ok());
}

/// A failed attempt reports one error, releases the handle and leaves nothing to disconnect
#[tokio::test]
async fn test_connect_failure() {
    let factory = FakeFactory::new();
    let refused = TransportError::ConnectFailed("refused".to_string());
    let link = FakeLink::new(ConnectBehavior::Fail(refused.clone()));
    factory.register("dev-1", link.clone());
    let handle =
        start_coordinator(Some(FakeAdapter::new(true)), factory, CoordinatorConfig::default());

    let mut connection = handle
        .connect_to_device(DeviceId::new("dev-1"))
        .await
        .expect("Failed to request connection");

    assert_eq!(
        connection.next_event().await,
        Some(ConnectionEvent::ConnectionError(refused))
    );
    assert_eq!(connection.next_event().await, None);
    assert_eq!(link.closes(), 1);

    handle.disconnect_from_current_device().await.expect("coordinator stopped");
    assert_eq!(handle.status().await.expect("coordinator stopped").current_session, None);
}

/// A device without a connection handle fails immediately
#[tokio::test]
async fn test_connect_to_unknown_device() {
    let handle = start_coordinator(
        Some(FakeAdapter::new(true)),
        FakeFactory::new(),
        CoordinatorConfig::default(),
    );

    let mut connection = handle
        .connect_to_device(DeviceId::new("ghost"))
        .await
        .expect("Failed to request connection");

    assert_eq!(
        connection.next_event().await,
        Some(ConnectionEvent::ConnectionError(TransportError::HandleUnavailable(
            "ghost".to_string()
        )))
    );
    assert_eq!(connection.next_event().await, None);
}

/// A new connection supersedes one that is still connecting
#[tokio::test]
async fn test_new_connection_supersedes_pending_one() {
    let factory = FakeFactory::new();
    let slow = FakeLink::new(ConnectBehavior::Hang);
    let fast = FakeLink::new(ConnectBehavior::Succeed);
    factory.register("slow", slow.clone());
    factory.register("fast", fast.clone());
    let handle =
        start_coordinator(Some(FakeAdapter::new(true)), factory, CoordinatorConfig::default());

    let mut first = handle
        .connect_to_device(DeviceId::new("slow"))
        .await
        .expect("Failed to request connection");
    settle(&handle).await;

    let mut second = handle
        .connect_to_device(DeviceId::new("fast"))
        .await
        .expect("Failed to request connection");

    assert_eq!(first.next_event().await, Some(ConnectionEvent::ConnectionEnded));
    assert_eq!(first.next_event().await, None);
    assert_eq!(second.next_event().await, Some(ConnectionEvent::ConnectionSuccessful));
    assert_eq!(slow.closes(), 1);
    assert_eq!(fast.closes(), 0);

    let status = handle.status().await.expect("coordinator stopped");
    assert_eq!(
        status.current_session,
        Some((second.session_id(), SessionPhase::Connected))
    );
    assert_eq!(status.retiring_sessions, 0);
}

/// Reconnecting while connected ends the old session exactly once
#[tokio::test]
async fn test_reconnect_ends_previous_connection() {
    let factory = FakeFactory::new();
    let link = FakeLink::new(ConnectBehavior::Succeed);
    factory.register("dev-1", link.clone());
    let handle =
        start_coordinator(Some(FakeAdapter::new(true)), factory, CoordinatorConfig::default());

    let mut first = handle
        .connect_to_device(DeviceId::new("dev-1"))
        .await
        .expect("Failed to request connection");
    assert_eq!(first.next_event().await, Some(ConnectionEvent::ConnectionSuccessful));

    let mut second = handle
        .connect_to_device(DeviceId::new("dev-1"))
        .await
        .expect("Failed to request connection");
    assert_eq!(first.next_event().await, Some(ConnectionEvent::ConnectionEnded));
    assert_eq!(first.next_event().await, None);
    assert_eq!(second.next_event().await, Some(ConnectionEvent::ConnectionSuccessful));
    assert_ne!(first.session_id(), second.session_id());
}

/// Connecting halts discovery and the idle timer but keeps scan listeners
#[tokio::test(start_paused = true)]
async fn test_connect_halts_discovery() {
    let adapter = FakeAdapter::new(true);
    let factory = FakeFactory::new();
    factory.register("dev-1", FakeLink::new(ConnectBehavior::Succeed));
    let handle = start_coordinator(Some(adapter.clone()), factory, CoordinatorConfig::default());

    let mut scan = handle.scan_for_devices().await.expect("Failed to request scan");
    let mut connection = handle
        .connect_to_device(DeviceId::new("dev-1"))
        .await
        .expect("Failed to request connection");
    assert_eq!(adapter.stop_calls(), 1);
    assert_eq!(connection.next_event().await, Some(ConnectionEvent::ConnectionSuccessful));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(scan.try_next_event(), None);

    let status = handle.status().await.expect("coordinator stopped");
    assert!(!status.discovering);
    assert_eq!(status.scan_listeners, 1);
}

/// A connect call that never completes fails after the configured timeout
#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    let factory = FakeFactory::new();
    let link = FakeLink::new(ConnectBehavior::Hang);
    factory.register("dev-1", link.clone());
    let config = CoordinatorConfig::default().with_connect_timeout(Some(Duration::from_secs(5)));
    let handle = start_coordinator(Some(FakeAdapter::new(true)), factory, config);

    let mut connection = handle
        .connect_to_device(DeviceId::new("dev-1"))
        .await
        .expect("Failed to request connection");

    assert_eq!(
        connection.next_event().await,
        Some(ConnectionEvent::ConnectionError(TransportError::Timeout(Duration::from_secs(5))))
    );
    assert_eq!(link.closes(), 1);
}

/// Shutdown completes scan listeners, releases the live connection and stops the loop
#[tokio::test]
async fn test_shutdown() {
    let adapter = FakeAdapter::new(true);
    let factory = FakeFactory::new();
    let link = FakeLink::new(ConnectBehavior::Succeed);
    factory.register("dev-1", link.clone());
    let handle = start_coordinator(Some(adapter.clone()), factory, CoordinatorConfig::default());

    let mut scan = handle.scan_for_devices().await.expect("Failed to request scan");
    let mut connection = handle
        .connect_to_device(DeviceId::new("dev-1"))
        .await
        .expect("Failed to request connection");
    assert_eq!(connection.next_event().await, Some(ConnectionEvent::ConnectionSuccessful));

    handle.shutdown().await.expect("coordinator stopped early");

    assert_eq!(scan.next_event().await, Some(ScanEvent::ScanCompleted));
    assert_eq!(scan.next_event().await, None);
    assert_eq!(connection.next_event().await, None);

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(link.closes(), 1);
    assert!(handle.status().await.is_err());
}

/// Dropping every handle tears the coordinator down like an explicit shutdown
#[tokio::test]
async fn test_dropping_handles_releases_connection() {
    let adapter = FakeAdapter::new(true);
    let factory = FakeFactory::new();
    let link = FakeLink::new(ConnectBehavior::Succeed);
    factory.register("dev-1", link.clone());
    let handle = start_coordinator(Some(adapter.clone()), factory, CoordinatorConfig::default());

    let mut scan = handle.scan_for_devices().await.expect("Failed to request scan");
    let mut connection = handle
        .connect_to_device(DeviceId::new("dev-1"))
        .await
        .expect("Failed to request connection");
    assert_eq!(connection.next_event().await, Some(ConnectionEvent::ConnectionSuccessful));

    // Subscriptions alone do not keep the coordinator running
    drop(handle);

    let ended = tokio::time::timeout(Duration::from_secs(1), connection.next_event())
        .await
        .expect("Connection subscription stayed open");
    assert_eq!(ended, None);
    assert_eq!(scan.next_event().await, Some(ScanEvent::ScanCompleted));
    assert_eq!(scan.next_event().await, None);

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(link.closes(), 1);
}

/// Without an adapter every scan reports the platform as unsupported
#[tokio::test]
async fn test_unsupported_platform() {
    let handle = start_coordinator(None, FakeFactory::new(), CoordinatorConfig::default());
    assert!(!handle.is_bluetooth_supported());

    let mut scan = handle.scan_for_devices().await.expect("Failed to request scan");
    match scan.next_event().await {
        Some(ScanEvent::Error(error)) => assert_eq!(error.code(), "ERROR_BT_UNSUPPORTED"),
        other => panic!("expected an error, got {:?}", other),
    }
}
