use std::sync::Arc;
use std::time::Duration;

use crate::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_node_discovers_itself() {
    let config = test_config(1);
    let Some((node, handle)) = start_node(&config, "catalog", "http://10.0.0.5:8080") else {
        return;
    };

    if !wait_for(DELIVERY_TIMEOUT, || !node.known_uris_of("catalog").is_empty()).await {
        eprintln!("SKIP: no multicast delivery on this host");
        handle.shutdown().await;
        return;
    }

    assert_eq!(uris(&node, "catalog"), ["http://10.0.0.5:8080"]);
    assert!(node.registry().last_seen("catalog").is_some());
    assert!(node.known_uris_of("unknown").is_empty());

    handle.shutdown().await;
}

/// Two catalog instances announce; an observer collects both.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_observer_collects_every_instance() {
    let config = test_config(2);
    let Some((observer, h_obs)) = start_node(&config, "observer", "http://10.0.0.1:9000") else {
        return;
    };
    let Some((_a, h_a)) = start_node(&config, "catalog", "http://10.0.0.5:8080") else {
        h_obs.shutdown().await;
        return;
    };

    if !wait_for(DELIVERY_TIMEOUT, || !observer.known_uris_of("catalog").is_empty()).await {
        eprintln!("SKIP: no multicast delivery on this host");
        h_a.shutdown().await;
        h_obs.shutdown().await;
        return;
    }
    assert_eq!(uris(&observer, "catalog"), ["http://10.0.0.5:8080"]);

    let Some((_b, h_b)) = start_node(&config, "catalog", "http://10.0.0.6:8080") else {
        h_a.shutdown().await;
        h_obs.shutdown().await;
        return;
    };

    let both = wait_for(DELIVERY_TIMEOUT, || observer.known_uris_of("catalog").len() == 2).await;
    assert!(both, "observer never saw the second instance");
    assert_eq!(
        uris(&observer, "catalog"),
        ["http://10.0.0.5:8080", "http://10.0.0.6:8080"]
    );

    // Same name from two endpoints stays a single registry entry.
    assert_eq!(
        observer
            .registry()
            .service_names()
            .iter()
            .filter(|n| n.as_str() == "catalog")
            .count(),
        1
    );

    h_b.shutdown().await;
    h_a.shutdown().await;
    h_obs.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_datagrams_are_ignored() {
    let config = test_config(3);
    let Some((node, handle)) = start_node(&config, "self", "http://10.0.0.1:1") else {
        return;
    };

    if !wait_for(DELIVERY_TIMEOUT, || !node.known_uris_of("self").is_empty()).await {
        eprintln!("SKIP: no multicast delivery on this host");
        handle.shutdown().await;
        return;
    }

    send_raw(&config, b"onlyonefield").unwrap();
    send_raw(&config, b"broken\tnot a uri").unwrap();
    send_raw(&config, b"a\tb\tc").unwrap();
    // Sent last: once it shows up the garbage before it has been processed.
    send_raw(&config, b"marker\thttp://10.0.0.9:1").unwrap();

    assert!(wait_for(DELIVERY_TIMEOUT, || !node.known_uris_of("marker").is_empty()).await);

    let mut names = node.registry().service_names();
    names.sort();
    assert_eq!(names, ["marker", "self"]);
    assert!(node.known_uris_of("broken").is_empty());

    handle.shutdown().await;
}

/// Many readers query while the listener keeps applying announcements.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_queries_during_updates() {
    let config = test_config(4);
    let Some((node, handle)) = start_node(&config, "self", "http://10.0.0.1:1") else {
        return;
    };
    if !wait_for(DELIVERY_TIMEOUT, || !node.known_uris_of("self").is_empty()).await {
        eprintln!("SKIP: no multicast delivery on this host");
        handle.shutdown().await;
        return;
    }

    let node = Arc::new(node);
    let readers: Vec<_> = (0..100)
        .map(|_| {
            let node = node.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    if let Some(entry) = node.registry().entry("catalog") {
                        assert!(!entry.endpoints.is_empty());
                    }
                    let uris = node.known_uris_of("catalog");
                    assert!(uris.iter().all(|ep| ep.as_str().starts_with("http://10.1.0.")));
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for i in 0..50 {
        send_raw(&config, format!("catalog\thttp://10.1.0.{i}:8080").as_bytes()).unwrap();
    }

    for r in readers {
        r.await.unwrap();
    }

    // Multicast loopback does not drop under this load in practice, but
    // the protocol is best effort: only require that something arrived.
    assert!(wait_for(DELIVERY_TIMEOUT, || !node.known_uris_of("catalog").is_empty()).await);
    assert!(node.known_uris_of("catalog").len() <= 50);

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_quiet_services_expire() {
    let mut config = test_config(5);
    config.entry_ttl_ms = 400;
    config.sweep_interval_ms = 50;

    let Some((node, handle)) = start_node(&config, "self", "http://10.0.0.1:1") else {
        return;
    };
    if !wait_for(DELIVERY_TIMEOUT, || !node.known_uris_of("self").is_empty()).await {
        eprintln!("SKIP: no multicast delivery on this host");
        handle.shutdown().await;
        return;
    }

    // One announcement, never repeated.
    send_raw(&config, b"oneshot\thttp://10.0.0.7:80").unwrap();
    assert!(wait_for(DELIVERY_TIMEOUT, || !node.known_uris_of("oneshot").is_empty()).await);

    let expired = wait_for(Duration::from_secs(3), || node.known_uris_of("oneshot").is_empty()).await;
    assert!(expired, "oneshot was never evicted");

    // This node keeps announcing every 100ms, well inside the TTL.
    assert!(!node.known_uris_of("self").is_empty());

    handle.shutdown().await;
}

/// Dropping the handle detaches the loops; they keep running.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_handle_keeps_discovering() {
    let config = test_config(6);
    let Some((node, handle)) = start_node(&config, "self", "http://10.0.0.1:1") else {
        return;
    };
    if !wait_for(DELIVERY_TIMEOUT, || !node.known_uris_of("self").is_empty()).await {
        eprintln!("SKIP: no multicast delivery on this host");
        handle.shutdown().await;
        return;
    }

    drop(handle);
    tokio::time::sleep(Duration::from_millis(50)).await;

    send_raw(&config, b"late\thttp://10.0.0.8:80").unwrap();
    assert!(
        wait_for(DELIVERY_TIMEOUT, || !node.known_uris_of("late").is_empty()).await,
        "announcement after the handle was dropped was not recorded"
    );

    // The announcer is still ticking too: last_seen for this node advances.
    let before = node.registry().last_seen("self").unwrap();
    assert!(
        wait_for(DELIVERY_TIMEOUT, || node.registry().last_seen("self").unwrap() > before).await,
        "own announcements stopped after the handle was dropped"
    );
}
