use std::sync::Arc;
use std::time::Duration;

use constellation_core::{Code, Metadata, Status};
use constellation_fabric::{
    serve_connection, transport::TcpTransportListener, Address, CallError, CallHandler,
    CallListener, ClientConnection, Registry, ServerCall, ServiceDefinition, TransportConfig,
};
use tokio::sync::{mpsc, watch};

/// Echoes the request back with the `x-echo` request header as a response header
struct Echo;

struct EchoCall {
    call: Option<ServerCall>,
    metadata: Metadata,
    request: Option<Vec<u8>>,
}

impl CallHandler for Echo {
    fn start_call(&self, call: ServerCall, metadata: Metadata) -> Box<dyn CallListener> {
        Box::new(EchoCall {
            call: Some(call),
            metadata,
            request: None,
        })
    }
}

impl CallListener for EchoCall {
    fn on_message(&mut self, payload: Vec<u8>) {
        self.request = Some(payload);
    }

    fn on_half_close(&mut self) {
        if let Some(mut call) = self.call.take() {
            let echoed = self.metadata.get_header("x-echo").unwrap_or("").to_string();
            call.send_headers(Metadata::new().with_header("x-echo", echoed));
            if let Err(e) = call.send_message(self.request.take().unwrap_or_default()) {
                call.close(Status::internal(e.to_string()), Metadata::new());
                return;
            }
            call.close(Status::ok(), Metadata::new());
        }
    }

    fn on_cancel(&mut self) {}
}

/// Never answers; reports cancellation on a channel
struct Stall {
    cancelled: mpsc::UnboundedSender<u64>,
}

struct StallCall {
    call: Option<ServerCall>,
    cancelled: mpsc::UnboundedSender<u64>,
}

impl CallHandler for Stall {
    fn start_call(&self, call: ServerCall, _metadata: Metadata) -> Box<dyn CallListener> {
        Box::new(StallCall {
            call: Some(call),
            cancelled: self.cancelled.clone(),
        })
    }
}

impl CallListener for StallCall {
    fn on_message(&mut self, _payload: Vec<u8>) {}
    fn on_half_close(&mut self) {}
    fn on_cancel(&mut self) {
        if let Some(call) = self.call.take() {
            let _ = self.cancelled.send(call.call_id());
        }
    }
}

async fn start(registry: Registry) -> (Address, watch::Sender<bool>) {
    let listener = TcpTransportListener::bind("127.0.0.1:0".parse().unwrap(), TransportConfig::default())
        .await
        .unwrap();
    let address = Address::Tcp(listener.local_addr().unwrap());
    let registry = Arc::new(registry);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        while let Ok((transport, _)) = listener.accept().await {
            tokio::spawn(serve_connection(transport, registry.clone(), shutdown_rx.clone()));
        }
    });

    (address, shutdown_tx)
}

fn echo_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .add_service(ServiceDefinition::new("test.Echo").add_method("test.Echo/Say", Arc::new(Echo)))
        .unwrap();
    registry
}

#[tokio::test]
async fn unary_call_round_trips_payload_and_headers() {
    let (address, _shutdown) = start(echo_registry()).await;
    let connection = ClientConnection::connect(&address, &TransportConfig::default())
        .await
        .unwrap();

    let response = connection
        .unary(
            "test.Echo/Say",
            Metadata::new().with_header("X-Echo", "abc"),
            b"ping".to_vec(),
        )
        .await
        .unwrap();

    assert_eq!(response.payload, b"ping");
    assert_eq!(response.headers.get_header("x-echo"), Some("abc"));
}

#[tokio::test]
async fn concurrent_calls_share_one_connection() {
    let (address, _shutdown) = start(echo_registry()).await;
    let connection = ClientConnection::connect(&address, &TransportConfig::default())
        .await
        .unwrap();

    let calls: Vec<_> = (0..16u8).map(|i| {
        let connection = connection.clone();
        tokio::spawn(async move {
            connection
                .unary("test.Echo/Say", Metadata::new(), vec![i])
                .await
                .map(|response| response.payload)
        })
    })
    .collect();

    for (i, call) in calls.into_iter().enumerate() {
        assert_eq!(call.await.unwrap().unwrap(), vec![i as u8]);
    }
}

#[tokio::test]
async fn unknown_method_is_unimplemented() {
    let (address, _shutdown) = start(echo_registry()).await;
    let connection = ClientConnection::connect(&address, &TransportConfig::default())
        .await
        .unwrap();

    match connection.unary("test.Echo/Missing", Metadata::new(), Vec::new()).await {
        Err(CallError::Status(status)) => assert_eq!(status.code(), Code::Unimplemented),
        other => panic!("expected UNIMPLEMENTED, got {:?}", other),
    }
}

#[tokio::test]
async fn dropping_the_call_future_cancels_on_the_server() {
    let (cancelled_tx, mut cancelled_rx) = mpsc::unbounded_channel();
    let mut registry = Registry::new();
    registry
        .add_service(
            ServiceDefinition::new("test.Stall")
                .add_method("test.Stall/Wait", Arc::new(Stall { cancelled: cancelled_tx })),
        )
        .unwrap();
    let (address, _shutdown) = start(registry).await;
    let connection = ClientConnection::connect(&address, &TransportConfig::default())
        .await
        .unwrap();

    let call = connection.unary("test.Stall/Wait", Metadata::new(), Vec::new());
    let timed_out = tokio::time::timeout(Duration::from_millis(100), call).await;
    assert!(timed_out.is_err());

    let cancelled = tokio::time::timeout(Duration::from_secs(2), cancelled_rx.recv())
        .await
        .unwrap();
    assert!(cancelled.is_some());
}

#[tokio::test]
async fn server_shutdown_cancels_open_calls_and_fails_the_client() {
    let (cancelled_tx, mut cancelled_rx) = mpsc::unbounded_channel();
    let mut registry = Registry::new();
    registry
        .add_service(
            ServiceDefinition::new("test.Stall")
                .add_method("test.Stall/Wait", Arc::new(Stall { cancelled: cancelled_tx })),
        )
        .unwrap();
    let (address, shutdown) = start(registry).await;
    let connection = ClientConnection::connect(&address, &TransportConfig::default())
        .await
        .unwrap();

    let call = tokio::spawn({
        let connection = connection.clone();
        async move { connection.unary("test.Stall/Wait", Metadata::new(), Vec::new()).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.send(true).unwrap();

    let cancelled = tokio::time::timeout(Duration::from_secs(2), cancelled_rx.recv())
        .await
        .unwrap();
    assert!(cancelled.is_some());

    // The listener took the call out without closing it, so dropping it closes with CANCELLED.
    match tokio::time::timeout(Duration::from_secs(2), call).await.unwrap().unwrap() {
        Err(CallError::Status(status)) => assert_eq!(status.code(), Code::Cancelled),
        Err(CallError::Transport(_)) => {}
        Ok(response) => panic!("expected failure, got {:?}", response),
    }
}

#[tokio::test]
async fn closed_connection_rejects_new_calls() {
    let (address, _shutdown) = start(echo_registry()).await;
    let connection = ClientConnection::connect(&address, &TransportConfig::default())
        .await
        .unwrap();

    connection.close();
    connection.close();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!connection.is_open());
    let result = connection.unary("test.Echo/Say", Metadata::new(), Vec::new()).await;
    assert!(matches!(result, Err(CallError::Transport(_))));
}
