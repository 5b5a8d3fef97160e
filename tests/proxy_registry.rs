mod common;

use std::time::Duration;

use common::{
    assert_echoes, echo_server, hops, init_tracing, port_is_closed, socks_connect_ipv4, socks_greet,
    MockConnector,
};
use pivotsocks::{proxy::SessionStatus, ProxyError, ProxyRegistry};
use serde_json::json;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

const SUCCESS: [u8; 10] = [0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];

#[tokio::test]
async fn connect_through_a_single_hop_proxy() {
    let echo_port = echo_server().await;
    let registry = ProxyRegistry::new(MockConnector::default());

    let session = registry.open("lab", 0, hops(1)).await.unwrap();
    assert_eq!(session.status, SessionStatus::Started);
    assert_eq!(session.alias, "lab");
    assert_eq!(session.tunnel_count, 0);
    assert_ne!(session.listen_port, 0);

    let mut client = socks_greet(session.listen_port).await;
    assert_eq!(socks_connect_ipv4(&mut client, echo_port).await, SUCCESS);
    assert_echoes(&mut client, b"hello through the pivot").await;

    registry.shutdown().await;
}

#[tokio::test]
async fn connect_through_a_three_hop_proxy() {
    init_tracing();
    let echo_port = echo_server().await;
    let registry = ProxyRegistry::new(MockConnector::default());

    let session = registry.open("deep", 0, hops(3)).await.unwrap();
    assert_eq!(session.tunnel_count, 2);

    let mut client = socks_greet(session.listen_port).await;
    assert_eq!(socks_connect_ipv4(&mut client, echo_port).await, SUCCESS);
    assert_echoes(&mut client, b"three hops deep").await;

    registry.close("deep").await.unwrap();
    assert_eq!(
        registry.connector().closed_hosts(),
        ["bastion-2", "bastion-1", "bastion-0"]
    );
}

#[tokio::test]
async fn descriptor_serializes_like_the_cli_prints_it() {
    let registry = ProxyRegistry::new(MockConnector::default());
    let session = registry.open("lab", 0, hops(2)).await.unwrap();

    assert_eq!(
        serde_json::to_value(&session).unwrap(),
        json!({
            "status": "started",
            "listen_port": session.listen_port,
            "alias": "lab",
            "tunnel_count": 1,
        })
    );

    let report = registry.close("lab").await.unwrap();
    assert_eq!(
        serde_json::to_value(&report).unwrap(),
        json!({ "status": "closed", "alias": "lab" })
    );
}

#[tokio::test]
async fn hops_can_be_given_as_json() {
    let registry = ProxyRegistry::new(MockConnector::default());
    let config = r#"[
        {"ip": "bastion-0", "port": 2222, "username": "u0", "password": "p0"},
        {"host": "bastion-1", "username": "u1", "secret": "p1"}
    ]"#;

    let session = registry.open("json", 0, config).await.unwrap();
    assert_eq!(session.tunnel_count, 1);
    assert_eq!(
        registry.connector().connected_targets()[0],
        pivotsocks::Endpoint::new("bastion-0", 2222)
    );

    registry.shutdown().await;
}

#[tokio::test]
async fn invalid_config_fails_before_any_connect() {
    let registry = ProxyRegistry::new(MockConnector::default());

    for config in ["not json", "[]", r#"[{"host": "", "username": "u", "secret": "p"}]"#] {
        let err = registry.open("bad", 0, config).await.err().unwrap();
        assert!(matches!(err, ProxyError::Config(_)), "{err:?}");
    }
    assert!(registry.connector().events().is_empty());
    assert!(registry.aliases().is_empty());
}

#[tokio::test]
async fn bind_command_is_refused() {
    let registry = ProxyRegistry::new(MockConnector::default());
    let session = registry.open("lab", 0, hops(1)).await.unwrap();

    let mut client = socks_greet(session.listen_port).await;
    client
        .write_all(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0x1F, 0x90])
        .await
        .unwrap();
    let mut reply = [0; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[..2], [0x05, 0x07]);

    let mut rest = Vec::new();
    assert_eq!(client.read_to_end(&mut rest).await.unwrap(), 0);

    registry.shutdown().await;
}

#[tokio::test]
async fn ipv6_destination_is_refused() {
    let registry = ProxyRegistry::new(MockConnector::default());
    let session = registry.open("lab", 0, hops(1)).await.unwrap();

    let mut client = socks_greet(session.listen_port).await;
    let mut request = vec![0x05, 0x01, 0x00, 0x04];
    request.extend_from_slice(&[0; 16]);
    request.extend_from_slice(&80u16.to_be_bytes());
    client.write_all(&request).await.unwrap();
    let mut reply = [0; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[..2], [0x05, 0x08]);

    registry.shutdown().await;
}

#[tokio::test]
async fn unreachable_destination_gets_general_failure() {
    let registry = ProxyRegistry::new(MockConnector::default());
    let session = registry.open("lab", 0, hops(1)).await.unwrap();

    // Grab a free port and release it so nothing is listening there.
    let dead_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut client = socks_greet(session.listen_port).await;
    let reply = socks_connect_ipv4(&mut client, dead_port).await;
    assert_eq!(reply[..2], [0x05, 0x01]);

    // The proxy itself keeps serving.
    let echo_port = echo_server().await;
    let mut client = socks_greet(session.listen_port).await;
    assert_eq!(socks_connect_ipv4(&mut client, echo_port).await, SUCCESS);

    registry.shutdown().await;
}

#[tokio::test]
async fn closing_an_unknown_alias_changes_nothing() {
    let registry = ProxyRegistry::new(MockConnector::default());
    registry.open("lab", 0, hops(1)).await.unwrap();

    let err = registry.close("nope").await.err().unwrap();
    assert!(matches!(err, ProxyError::UnknownAlias(alias) if alias == "nope"));
    assert_eq!(registry.aliases(), ["lab"]);
    assert!(registry.is_running("lab"));
    assert!(registry.connector().closed_hosts().is_empty());

    registry.shutdown().await;
}

#[tokio::test]
async fn duplicate_alias_is_rejected_without_side_effects() {
    let echo_port = echo_server().await;
    let registry = ProxyRegistry::new(MockConnector::default());
    let first = registry.open("lab", 0, hops(1)).await.unwrap();
    let events_before = registry.connector().events();

    let err = registry.open("lab", 0, hops(2)).await.err().unwrap();
    assert!(matches!(err, ProxyError::DuplicateAlias(alias) if alias == "lab"));
    assert_eq!(registry.connector().events(), events_before);

    let mut client = socks_greet(first.listen_port).await;
    assert_eq!(socks_connect_ipv4(&mut client, echo_port).await, SUCCESS);
    assert_echoes(&mut client, b"still here").await;

    registry.shutdown().await;
}

#[tokio::test]
async fn close_releases_the_port_for_reuse() {
    let registry = ProxyRegistry::new(MockConnector::default());
    let session = registry.open("lab", 0, hops(2)).await.unwrap();
    let port = session.listen_port;

    let report = registry.close("lab").await.unwrap();
    assert_eq!(report.status, SessionStatus::Closed);
    assert_eq!(report.alias, "lab");
    assert!(!registry.contains("lab"));
    assert!(port_is_closed(port).await);

    let reopened = registry.open("lab", port, hops(2)).await.unwrap();
    assert_eq!(reopened.listen_port, port);
    registry.shutdown().await;
}

#[tokio::test]
async fn bind_failure_tears_the_chain_down() {
    init_tracing();
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = occupied.local_addr().unwrap().port();
    let registry = ProxyRegistry::new(MockConnector::default());

    let err = registry.open("lab", port, hops(3)).await.err().unwrap();
    assert!(matches!(err, ProxyError::Bind { port: p, .. } if p == port));
    assert_eq!(
        registry.connector().closed_hosts(),
        ["bastion-2", "bastion-1", "bastion-0"]
    );
    assert!(!registry.contains("lab"));

    // The alias was released with the failed attempt.
    drop(occupied);
    registry.open("lab", 0, hops(1)).await.unwrap();
    registry.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_every_session() {
    let registry = ProxyRegistry::new(MockConnector::default());
    let mut ports = Vec::new();
    for alias in ["a", "b", "c"] {
        ports.push(registry.open(alias, 0, hops(1)).await.unwrap().listen_port);
    }
    assert_eq!(registry.aliases(), ["a", "b", "c"]);

    registry.shutdown().await;

    assert!(registry.aliases().is_empty());
    for port in ports {
        assert!(port_is_closed(port).await);
    }
    assert_eq!(registry.connector().closed_hosts().len(), 3);
}

#[tokio::test]
async fn shutdown_discards_a_session_still_opening() {
    init_tracing();
    let registry = ProxyRegistry::new(MockConnector::slow(Duration::from_millis(100)));

    let (opened, ()) = tokio::join!(registry.open("late", 0, hops(1)), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.shutdown().await;
    });

    let err = opened.err().unwrap();
    assert!(matches!(err, ProxyError::ShutDown), "{err:?}");
    assert!(registry.aliases().is_empty());
    assert_eq!(registry.connector().closed_hosts(), ["bastion-0"]);
}

#[tokio::test]
async fn open_after_shutdown_is_refused() {
    let registry = ProxyRegistry::new(MockConnector::default());
    registry.shutdown().await;

    let err = registry.open("lab", 0, hops(1)).await.err().unwrap();
    assert!(matches!(err, ProxyError::ShutDown), "{err:?}");
    assert!(registry.connector().events().is_empty());
    assert!(registry.aliases().is_empty());
}
