//! Port forwarding and HTTP readiness against real loopback sockets.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use iwa_core::fakes::{FakeRuntime, ManualClock};
use iwa_core::{
    ForwardSet, OrchestrationError, PortForward, ReadinessPoller, ReadinessTarget, RetryPolicy,
    TokioClock,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

async fn spawn_echo() -> SocketAddr {
    let listener = TcpListener::bind((LOOPBACK, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (mut rd, mut wr) = stream.split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
    addr
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind((LOOPBACK, 0)).await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn spawn_app(app: Router) -> SocketAddr {
    let listener = TcpListener::bind((LOOPBACK, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn forward_relays_bytes_both_ways() {
    let echo = spawn_echo().await;
    let local = free_port().await;
    let forwards = vec![PortForward::new(local, "127.0.0.1", echo.port())];

    let set = ForwardSet::launch(&forwards, LOOPBACK, Duration::from_millis(200), &TokioClock)
        .await
        .unwrap();
    assert_eq!(set.len(), 1);
    assert!(set.all_alive());

    let mut client = TcpStream::connect((LOOPBACK, local)).await.unwrap();
    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    set.shutdown();
}

#[tokio::test]
async fn forward_on_taken_port_fails_startup() {
    let occupied = TcpListener::bind((LOOPBACK, 0)).await.unwrap();
    let port = occupied.local_addr().unwrap().port();
    let forwards = vec![PortForward::new(port, "autoppia-demo-web", 8000)];

    let err = ForwardSet::launch(&forwards, LOOPBACK, Duration::from_millis(200), &TokioClock)
        .await
        .unwrap_err();

    match err {
        OrchestrationError::ForwardStartup {
            local_port, target, ..
        } => {
            assert_eq!(local_port, port);
            assert_eq!(target, "autoppia-demo-web:8000");
        }
        other => panic!("expected ForwardStartup, got {:?}", other),
    }
    drop(occupied);
}

#[tokio::test]
async fn failed_forward_releases_the_others() {
    let occupied = TcpListener::bind((LOOPBACK, 0)).await.unwrap();
    let taken = occupied.local_addr().unwrap().port();
    let free = free_port().await;
    let forwards = vec![
        PortForward::new(free, "autoppia-demo-web", 8000),
        PortForward::new(taken, "autoppia-demo-web", 8090),
    ];

    let err = ForwardSet::launch(&forwards, LOOPBACK, Duration::from_millis(200), &TokioClock)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::ForwardStartup { local_port, .. } if local_port == taken
    ));

    let mut rebound = None;
    for _ in 0..20 {
        if let Ok(listener) = TcpListener::bind((LOOPBACK, free)).await {
            rebound = Some(listener);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(rebound.is_some(), "port {free} still held after a failed launch");
    drop(occupied);
}

#[tokio::test]
async fn duplicate_local_ports_are_rejected() {
    let forwards = vec![
        PortForward::new(18000, "web", 8000),
        PortForward::new(18000, "backend", 8080),
    ];
    let err = ForwardSet::launch(&forwards, LOOPBACK, Duration::ZERO, &TokioClock)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::Config(_)));
}

#[tokio::test]
async fn http_probe_succeeds_on_2xx() {
    let addr = spawn_app(Router::new().route("/health", get(|| async { "ok" }))).await;
    let poller = ReadinessPoller::new(Arc::new(FakeRuntime::new()), RetryPolicy::fixed(3, Duration::from_secs(1)))
        .with_clock(Arc::new(ManualClock::new()));

    let ready = poller
        .wait(&ReadinessTarget::http("env", format!("http://{addr}/health")))
        .await
        .unwrap();
    assert_eq!(ready.attempts, 1);
    assert_eq!(ready.waited, Duration::ZERO);
}

#[tokio::test]
async fn http_probe_times_out_on_5xx() {
    let addr = spawn_app(Router::new().route(
        "/health",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "warming up") }),
    ))
    .await;
    let clock = Arc::new(ManualClock::new());
    let poller = ReadinessPoller::new(Arc::new(FakeRuntime::new()), RetryPolicy::fixed(3, Duration::from_secs(1)))
        .with_clock(clock.clone());

    let err = poller
        .wait(&ReadinessTarget::http("env", format!("http://{addr}/health")))
        .await
        .unwrap_err();

    assert_eq!(clock.sleeps().len(), 2);
    let msg = err.to_string();
    assert!(msg.contains("3 attempt(s)"));
    assert!(msg.contains("503"));
}
