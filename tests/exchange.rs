use chrono::Utc;
use p2p_share::core::{Config, Node, PeerStatus};
use p2p_share::storage::HashUtils;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

fn config_for(dir: &Path) -> Config {
    Config {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        shared_dir: dir.to_path_buf(),
        node_name: "exchange-test".into(),
        ping_timeout: Duration::from_secs(2),
        catalog_timeout: Duration::from_secs(2),
        pull_timeout: Duration::from_secs(2),
        ..Config::default()
    }
}

async fn started_node(dir: &Path) -> (Node, SocketAddr) {
    let mut node = Node::new(config_for(dir)).await.unwrap();
    let addr = node.start().await.unwrap();
    (node, addr)
}

/// Plain socket client that keeps unread bytes between replies.
struct RawClient {
    stream: TcpStream,
    pending: Vec<u8>,
}

impl RawClient {
    async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            pending: Vec::new(),
        }
    }

    async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    async fn reply(&mut self) -> Value {
        let mut buffer = [0u8; 4096];
        loop {
            let mut values =
                serde_json::Deserializer::from_slice(&self.pending).into_iter::<Value>();
            if let Some(Ok(value)) = values.next() {
                let used = values.byte_offset();
                self.pending.drain(..used);
                return value;
            }
            let n = self.stream.read(&mut buffer).await.unwrap();
            assert!(n > 0, "connection closed before a full response");
            self.pending.extend_from_slice(&buffer[..n]);
        }
    }
}

async fn wait_for_status(node: &Node, id: &str) -> PeerStatus {
    for _ in 0..150 {
        let status = node.registry().get(id).await.unwrap().status;
        if status != PeerStatus::Unknown {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    PeerStatus::Unknown
}

#[tokio::test]
async fn test_ping_marks_live_peer_online() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let (mut server, server_addr) = started_node(server_dir.path()).await;
    let client = Node::new(config_for(client_dir.path())).await.unwrap();

    let before = Utc::now();
    let id = client
        .add_peer("127.0.0.1", server_addr.port(), Some("server".into()))
        .await
        .unwrap();

    assert_eq!(wait_for_status(&client, &id).await, PeerStatus::Online);
    let peer = client.registry().get(&id).await.unwrap();
    assert!(peer.last_seen >= before);
    assert_eq!(client.active_peers().await.len(), 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_closed_port_is_offline() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::new(config_for(dir.path())).await.unwrap();

    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let id = node.add_peer("127.0.0.1", port, None).await.unwrap();

    assert_eq!(wait_for_status(&node, &id).await, PeerStatus::Offline);
    assert!(node.active_peers().await.is_empty());
}

#[tokio::test]
async fn test_error_reply_is_error_status() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::new(config_for(dir.path())).await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut buffer = [0u8; 256];
            let _ = stream.read(&mut buffer).await;
            let _ = stream
                .write_all(br#"{"status":"error","message":"maintenance"}"#)
                .await;
        }
    });

    let id = node.add_peer("127.0.0.1", port, None).await.unwrap();
    assert_eq!(wait_for_status(&node, &id).await, PeerStatus::Error);
}

#[tokio::test]
async fn test_connection_survives_malformed_command() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
    let (mut node, addr) = started_node(dir.path()).await;

    let mut client = RawClient::connect(addr).await;
    client.send(b"this is not json").await;
    let reply = client.reply().await;
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["message"], "Invalid JSON command");

    client.send(br#"{"type":"teleport"}"#).await;
    let reply = client.reply().await;
    assert_eq!(reply["message"], "Unknown command");

    client.send(br#"{"type":"list_files"}"#).await;
    let reply = client.reply().await;
    assert_eq!(reply["status"], "success");
    assert_eq!(reply["files"][0]["name"], "notes.txt");
    assert_eq!(reply["files"][0]["size"], 5);

    node.shutdown().await;
}

#[tokio::test]
async fn test_oversized_command_gets_one_error() {
    let dir = tempfile::tempdir().unwrap();
    let (mut node, addr) = started_node(dir.path()).await;

    let mut client = RawClient::connect(addr).await;
    let huge = json!({"type": "download_file", "filename": "x".repeat(100_000)});
    let mut payload = huge.to_string().into_bytes();
    payload.extend_from_slice(br#"{"type":"ping"}"#);
    client.send(&payload).await;

    let reply = client.reply().await;
    assert_eq!(reply["status"], "error");
    assert!(
        reply["message"]
            .as_str()
            .unwrap()
            .starts_with("Message too large")
    );

    let reply = timeout(Duration::from_secs(3), client.reply())
        .await
        .unwrap();
    assert_eq!(reply["message"], "pong");

    // Requests and responses are still paired one to one.
    client.send(br#"{"type":"ping"}"#).await;
    let reply = client.reply().await;
    assert_eq!(reply["message"], "pong");

    node.shutdown().await;
}

#[tokio::test]
async fn test_missing_download_has_no_bulk_phase() {
    let dir = tempfile::tempdir().unwrap();
    let (mut node, addr) = started_node(dir.path()).await;

    let mut client = RawClient::connect(addr).await;
    let request = json!({"type": "download_file", "filename": "ghost.bin"});
    client.send(request.to_string().as_bytes()).await;

    let reply = client.reply().await;
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["message"], "File not found");

    // Still in the command phase: a ping is answered normally.
    client.send(br#"{"type":"ping"}"#).await;
    let reply = client.reply().await;
    assert_eq!(reply["message"], "pong");

    node.shutdown().await;
}

#[tokio::test]
async fn test_pull_megabyte_file() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();

    let content: Vec<u8> = (0..1_048_576u32).map(|i| (i * 31 % 251) as u8).collect();
    std::fs::write(server_dir.path().join("report.pdf"), &content).unwrap();

    let (mut server, server_addr) = started_node(server_dir.path()).await;
    let client = Node::new(config_for(client_dir.path())).await.unwrap();
    let id = client
        .add_peer("127.0.0.1", server_addr.port(), None)
        .await
        .unwrap();

    let files = client.peer_files(&id).await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].mime_type, "application/pdf");
    assert_eq!(
        client.registry().get(&id).await.unwrap().known_files.len(),
        1
    );

    let outcome = client.download_from_peer(&id, "report.pdf").await;
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.bytes, 1_048_576);

    let received = std::fs::read(client_dir.path().join("report.pdf")).unwrap();
    assert_eq!(
        HashUtils::hash_data(&received),
        HashUtils::hash_data(&content)
    );
    assert!(client.active_transfers().await.is_empty());

    server.shutdown().await;
}

#[tokio::test]
async fn test_push_upload_lands_in_catalog() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    std::fs::write(client_dir.path().join("photo.jpg"), vec![7u8; 20_000]).unwrap();

    let (mut server, server_addr) = started_node(server_dir.path()).await;
    let client = Node::new(config_for(client_dir.path())).await.unwrap();
    let id = client
        .add_peer("127.0.0.1", server_addr.port(), None)
        .await
        .unwrap();

    let outcome = client.upload_to_peer(&id, "photo.jpg").await;
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.message, "File uploaded successfully");

    let names: Vec<_> = server
        .local_files()
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(names, vec!["photo.jpg"]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_short_upload_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (mut node, addr) = started_node(dir.path()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = json!({"type": "upload_file", "filename": "half.bin", "size": 10_000});
    stream
        .write_all(request.to_string().as_bytes())
        .await
        .unwrap();

    let mut ready = [0u8; 5];
    stream.read_exact(&mut ready).await.unwrap();
    assert_eq!(&ready, b"ready");

    stream.write_all(&[1u8; 4_000]).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut rest = Vec::new();
    let _ = stream.read_to_end(&mut rest).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(node.local_files().await.unwrap().is_empty());
    let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert!(leftovers.is_empty());

    node.shutdown().await;
}
