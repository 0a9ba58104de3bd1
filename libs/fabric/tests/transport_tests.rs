use constellation_fabric::{
    error::Error,
    transport::{self, Address, TcpTransportListener, UnixTransportListener},
    TransportConfig,
};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Helper to get a free port
async fn get_listener() -> (TcpTransportListener, Address) {
    let listener = TcpTransportListener::bind("127.0.0.1:0".parse().unwrap(), TransportConfig::default())
        .await
        .unwrap();
    let addr = Address::Tcp(listener.local_addr().unwrap());
    (listener, addr)
}

#[tokio::test]
async fn tcp_send_receive_single_message() {
    let (listener, addr) = get_listener().await;

    tokio::spawn(async move {
        let (mut transport, _addr) = listener.accept().await.unwrap();
        let received = transport.receive().await.unwrap();
        transport.send(&received).await.unwrap(); // Echo back
    });

    let mut client = transport::connect(&addr, &TransportConfig::default())
        .await
        .unwrap();
    client.send(b"hello world").await.unwrap();
    let response = client.receive().await.unwrap();

    assert_eq!(response, b"hello world");
}

#[tokio::test]
async fn tcp_multiple_messages_preserve_boundaries() {
    let (listener, addr) = get_listener().await;

    tokio::spawn(async move {
        let (mut transport, _addr) = listener.accept().await.unwrap();
        for _ in 0..3 {
            let msg = transport.receive().await.unwrap();
            transport.send(&msg).await.unwrap();
        }
    });

    let mut client = transport::connect(&addr, &TransportConfig::default())
        .await
        .unwrap();
    let messages = vec![b"first".to_vec(), b"".to_vec(), b"third".to_vec()];

    for msg in &messages {
        client.send(msg).await.unwrap();
        let response = client.receive().await.unwrap();
        assert_eq!(&response, msg);
    }
}

#[tokio::test]
async fn tcp_receive_timeout_fires_on_a_stalled_frame() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = Address::Tcp(listener.local_addr().unwrap());

    // Server that starts a frame and never finishes it
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(&[0, 0]).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let config = TransportConfig::default().with_receive_timeout(Duration::from_millis(100));
    let mut client = transport::connect(&addr, &config).await.unwrap();

    match client.receive().await {
        Err(Error::Timeout(operation)) => assert_eq!(operation, "Receive"),
        other => panic!("Expected timeout error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn receive_timeout_ignores_idle_time_between_frames() {
    let (listener, addr) = get_listener().await;

    tokio::spawn(async move {
        let (mut transport, _addr) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        transport.send(b"late").await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    let config = TransportConfig::default().with_receive_timeout(Duration::from_millis(100));
    let mut client = transport::connect(&addr, &config).await.unwrap();

    assert_eq!(client.receive().await.unwrap(), b"late");
}

#[tokio::test]
async fn tcp_rejects_oversized_frame() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = Address::Tcp(listener.local_addr().unwrap());

    // Server that sends a frame header claiming more than the configured limit
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_u32(2048).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let config = TransportConfig::default().with_max_frame_size(1024);
    let mut client = transport::connect(&addr, &config).await.unwrap();

    match client.receive().await {
        Err(Error::InvalidFrame(msg)) => assert!(msg.contains("too large")),
        other => panic!("Expected InvalidFrame error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn send_refuses_frames_over_the_limit() {
    let (_listener, addr) = get_listener().await;
    let config = TransportConfig::default().with_max_frame_size(4);
    let mut client = transport::connect(&addr, &config).await.unwrap();

    let result = client.send(b"too long").await;
    assert!(matches!(result, Err(Error::InvalidFrame(_))));
}

#[tokio::test]
async fn connection_closed_error() {
    let (listener, addr) = get_listener().await;

    tokio::spawn(async move {
        let (mut transport, _addr) = listener.accept().await.unwrap();
        transport.close().await.unwrap();
    });

    let mut client = transport::connect(&addr, &TransportConfig::default())
        .await
        .unwrap();

    match client.receive().await {
        Err(Error::ConnectionClosed) => {}
        other => panic!("Expected ConnectionClosed, got {:?}", other.map(|_| ())),
    }
}

// Unix Socket Tests

#[tokio::test]
async fn unix_send_receive_single_message() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("single.sock");

    let listener = UnixTransportListener::bind(&socket_path, TransportConfig::default())
        .await
        .unwrap();

    tokio::spawn(async move {
        let mut transport = listener.accept().await.unwrap();
        let received = transport.receive().await.unwrap();
        transport.send(&received).await.unwrap();
    });

    let address = Address::Unix(socket_path.clone());
    let mut client = transport::connect(&address, &TransportConfig::default())
        .await
        .unwrap();
    client.send(b"hello unix").await.unwrap();
    let response = client.receive().await.unwrap();

    assert_eq!(response, b"hello unix");
}

#[tokio::test]
async fn unix_listener_cleans_up_socket() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("cleanup.sock");

    {
        let _listener = UnixTransportListener::bind(&socket_path, TransportConfig::default())
            .await
            .unwrap();
        assert!(socket_path.exists());
    }

    assert!(!socket_path.exists());
}

#[tokio::test]
async fn unix_bind_refuses_live_socket() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("live.sock");

    let _first = UnixTransportListener::bind(&socket_path, TransportConfig::default())
        .await
        .unwrap();
    let second = UnixTransportListener::bind(&socket_path, TransportConfig::default()).await;

    assert!(matches!(second, Err(Error::AddressInUse(_))));
}

#[tokio::test]
async fn unix_bind_replaces_stale_socket() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("stale.sock");

    // A bound std listener that is dropped leaves its socket file behind.
    drop(std::os::unix::net::UnixListener::bind(&socket_path).unwrap());
    assert!(socket_path.exists());

    let listener = UnixTransportListener::bind(&socket_path, TransportConfig::default()).await;
    assert!(listener.is_ok());
}
