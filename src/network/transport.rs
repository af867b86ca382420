use log::{debug, info};
use serde::Serialize;
use serde_json::Value;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};

use crate::utils::{P2PError, Result};

const READ_BUFFER_SIZE: usize = 4096;

/// Byte stream carrying bare JSON messages, a literal ready token and raw bulk data.
///
/// Messages carry no length prefix, so reads may pull in bytes belonging to the
/// next phase. Those are kept in `pending` and served first by every later read.
pub struct Transport<S = TcpStream> {
    stream: S,
    pending: Vec<u8>,
    scan: FrameScan,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum ScanMode {
    /// Between messages.
    #[default]
    Idle,
    Value,
    /// Skipping bytes that cannot start a message.
    Garbage,
    /// Skipping the rest of a value that exceeded the size limit.
    Oversized,
}

/// Position of the message scanner inside `pending`.
#[derive(Debug, Default)]
struct FrameScan {
    mode: ScanMode,
    offset: usize,
    start: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl FrameScan {
    /// Feeds one byte of a value. Returns true once the top-level value closes.
    fn step(&mut self, byte: u8) -> bool {
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if byte == b'\\' {
                self.escaped = true;
            } else if byte == b'"' {
                self.in_string = false;
            }
            return false;
        }

        match byte {
            b'"' => self.in_string = true,
            b'{' | b'[' => self.depth += 1,
            b'}' | b']' => {
                self.depth = self.depth.saturating_sub(1);
                return self.depth == 0;
            }
            _ => {}
        }
        false
    }
}

impl Transport<TcpStream> {
    pub async fn connect(addr: SocketAddr, connect_timeout: Duration) -> Result<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| P2PError::Timeout(format!("Connecting to {}", addr)))?
            .map_err(|e| {
                P2PError::ConnectionFailed(format!("Failed to connect to {}: {}", addr, e))
            })?;

        stream
            .set_nodelay(true)
            .map_err(|e| P2PError::NetworkError(format!("Failed to set TCP_NODELAY: {}", e)))?;

        info!("Connected to {}", addr);
        Ok(Self::new(stream))
    }
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            pending: Vec::new(),
            scan: FrameScan::default(),
        }
    }

    /// Reads exactly one JSON value.
    ///
    /// Returns `Ok(None)` when the peer closes between messages. Every bad message
    /// yields exactly one error; the stream is then realigned on the next message.
    /// A value longer than `max_size` bytes is rejected and skipped as a whole.
    pub async fn read_json(&mut self, max_size: usize) -> Result<Option<Value>> {
        loop {
            match self.scan_pending(max_size) {
                Some(Ok((start, end))) => {
                    let frame: Vec<u8> = self.pending.drain(..end).collect();
                    self.scan = FrameScan::default();
                    return serde_json::from_slice(&frame[start..]).map(Some).map_err(|e| {
                        debug!("Discarding unparseable message: {}", e);
                        P2PError::MalformedCommand("Invalid JSON command".into())
                    });
                }
                Some(Err(e)) => return Err(e),
                None => {}
            }

            let mut buffer = [0u8; READ_BUFFER_SIZE];
            let n = self.stream.read(&mut buffer).await?;
            if n == 0 {
                let mode = self.scan.mode;
                self.pending.clear();
                self.scan = FrameScan::default();
                return match mode {
                    ScanMode::Value => Err(P2PError::MalformedCommand(
                        "Connection closed mid-message".into(),
                    )),
                    // Anything else was whitespace or has already been reported.
                    _ => Ok(None),
                };
            }
            self.pending.extend_from_slice(&buffer[..n]);
        }
    }

    /// Walks the unscanned tail of `pending` once.
    ///
    /// Yields the byte range of the first complete top-level value, or the error for
    /// a bad message. Bytes already known to be discarded are dropped as they go.
    fn scan_pending(&mut self, max_size: usize) -> Option<Result<(usize, usize)>> {
        let scan = &mut self.scan;

        while scan.offset < self.pending.len() {
            let byte = self.pending[scan.offset];
            scan.offset += 1;

            match scan.mode {
                ScanMode::Idle if byte.is_ascii_whitespace() => {}
                ScanMode::Idle if byte == b'{' || byte == b'[' => {
                    scan.mode = ScanMode::Value;
                    scan.start = scan.offset - 1;
                    scan.depth = 1;
                }
                ScanMode::Idle => {
                    // Not the start of a command. Skip up to the next opening bracket.
                    scan.mode = ScanMode::Garbage;
                    self.pending.drain(..scan.offset);
                    scan.offset = 0;
                    return Some(Err(P2PError::MalformedCommand(
                        "Invalid JSON command".into(),
                    )));
                }
                ScanMode::Garbage => {
                    if byte == b'{' || byte == b'[' {
                        self.pending.drain(..scan.offset - 1);
                        scan.offset = 0;
                        scan.mode = ScanMode::Idle;
                    }
                }
                ScanMode::Value => {
                    let closed = scan.step(byte);
                    if scan.offset - scan.start > max_size {
                        self.pending.drain(..scan.offset);
                        if closed {
                            *scan = FrameScan::default();
                        } else {
                            scan.mode = ScanMode::Oversized;
                            scan.offset = 0;
                        }
                        return Some(Err(P2PError::MessageTooLarge(max_size)));
                    }
                    if closed {
                        return Some(Ok((scan.start, scan.offset)));
                    }
                }
                ScanMode::Oversized => {
                    if scan.step(byte) {
                        self.pending.drain(..scan.offset);
                        *scan = FrameScan::default();
                    }
                }
            }
        }

        if scan.mode != ScanMode::Value {
            self.pending.clear();
            scan.offset = 0;
        }
        None
    }

    pub async fn send_json<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let serialized = serde_json::to_vec(message)
            .map_err(|e| P2PError::SerializationError(e.to_string()))?;
        self.send_raw(&serialized).await
    }

    pub async fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads `expected.len()` bytes and reports whether they match.
    ///
    /// On a mismatch the bytes go back in front of `pending`, so the caller can
    /// still parse whatever message the peer sent instead.
    pub async fn expect_signal(&mut self, expected: &[u8]) -> Result<bool> {
        self.scan = FrameScan::default();
        let mut received = vec![0u8; expected.len()];
        self.read_exact(&mut received).await.map_err(|_| {
            P2PError::ProtocolViolation("Connection closed before ready signal".into())
        })?;

        if received == expected {
            return Ok(true);
        }
        received.extend_from_slice(&self.pending);
        self.pending = received;
        Ok(false)
    }

    /// Bulk read of at most `buffer.len()` bytes. Zero means the peer closed.
    pub async fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize> {
        self.scan = FrameScan::default();
        if !self.pending.is_empty() {
            let n = buffer.len().min(self.pending.len());
            buffer[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            return Ok(n);
        }
        Ok(self.stream.read(buffer).await?)
    }

    async fn read_exact(&mut self, buffer: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buffer.len() {
            let n = self.read_chunk(&mut buffer[filled..]).await?;
            if n == 0 {
                return Err(P2PError::ConnectionFailed("Unexpected end of stream".into()));
            }
            filled += n;
        }
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_message_split_across_writes() {
        let (client, server) = duplex(1024);
        let mut reader = Transport::new(server);
        let mut writer = Transport::new(client);

        writer.send_raw(br#"{"type":"pi"#).await.unwrap();
        let read = tokio::spawn(async move { reader.read_json(1024).await });
        writer.send_raw(br#"ng"}"#).await.unwrap();

        let value = read.await.unwrap().unwrap().unwrap();
        assert_eq!(value, json!({"type": "ping"}));
    }

    #[tokio::test]
    async fn test_trailing_bytes_are_kept() {
        let (mut client, server) = duplex(1024);
        let mut reader = Transport::new(server);

        client
            .write_all(br#"{"status":"success","size":3}readyabc"#)
            .await
            .unwrap();
        drop(client);

        let value = reader.read_json(1024).await.unwrap().unwrap();
        assert_eq!(value["size"], 3);
        assert!(reader.expect_signal(b"ready").await.unwrap());

        let mut buffer = [0u8; 16];
        let n = reader.read_chunk(&mut buffer).await.unwrap();
        assert_eq!(&buffer[..n], b"abc");
        assert_eq!(reader.read_chunk(&mut buffer).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_garbage_is_malformed() {
        let (mut client, server) = duplex(1024);
        let mut reader = Transport::new(server);

        client.write_all(b"hello there").await.unwrap();
        assert!(matches!(
            reader.read_json(1024).await,
            Err(P2PError::MalformedCommand(_))
        ));

        client.write_all(br#"{"type":"ping"}"#).await.unwrap();
        let value = reader.read_json(1024).await.unwrap().unwrap();
        assert_eq!(value["type"], "ping");
    }

    #[tokio::test]
    async fn test_oversized_message_rejected() {
        let (mut client, server) = duplex(8192);
        let mut reader = Transport::new(server);

        let big = format!(r#"{{"type":"download_file","filename":"{}"}}"#, "x".repeat(500));
        client.write_all(big.as_bytes()).await.unwrap();

        assert!(matches!(
            reader.read_json(64).await,
            Err(P2PError::MessageTooLarge(64))
        ));
    }

    #[tokio::test]
    async fn test_oversized_message_then_ping() {
        let (mut client, server) = duplex(64 * 1024);
        let mut reader = Transport::new(server);

        let big = format!(
            r#"{{"type":"download_file","filename":"{}"}}"#,
            "{x}".repeat(3_000)
        );
        client.write_all(big.as_bytes()).await.unwrap();
        client.write_all(br#"{"type":"ping"}"#).await.unwrap();
        drop(client);

        assert!(matches!(
            reader.read_json(1024).await,
            Err(P2PError::MessageTooLarge(1024))
        ));
        let value = reader.read_json(1024).await.unwrap().unwrap();
        assert_eq!(value["type"], "ping");
        assert!(reader.read_json(1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_one_error_per_garbage_run() {
        let (mut client, server) = duplex(1024);
        let mut reader = Transport::new(server);

        client.write_all(b"not json at all, ").await.unwrap();
        client.write_all(b"still not json ").await.unwrap();
        client.write_all(br#"{"type":"ping"} 42 {"type":"list_files"}"#).await.unwrap();
        drop(client);

        assert!(matches!(
            reader.read_json(1024).await,
            Err(P2PError::MalformedCommand(_))
        ));
        assert_eq!(reader.read_json(1024).await.unwrap().unwrap()["type"], "ping");
        assert!(matches!(
            reader.read_json(1024).await,
            Err(P2PError::MalformedCommand(_))
        ));
        assert_eq!(
            reader.read_json(1024).await.unwrap().unwrap()["type"],
            "list_files"
        );
        assert!(reader.read_json(1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_brackets_and_escapes_inside_strings() {
        let (mut client, server) = duplex(1024);
        let mut reader = Transport::new(server);

        client
            .write_all(br#"{"message":"} ] " {[","n":1}{"n":2}"#)
            .await
            .unwrap();

        let first = reader.read_json(1024).await.unwrap().unwrap();
        assert_eq!(first["message"], r#"} ] " {["#);
        assert_eq!(reader.read_json(1024).await.unwrap().unwrap()["n"], 2);
    }

    #[tokio::test]
    async fn test_bad_syntax_drops_only_that_message() {
        let (mut client, server) = duplex(1024);
        let mut reader = Transport::new(server);

        client.write_all(br#"{"type" "ping"}{"type":"ping"}"#).await.unwrap();

        assert!(matches!(
            reader.read_json(1024).await,
            Err(P2PError::MalformedCommand(_))
        ));
        assert_eq!(reader.read_json(1024).await.unwrap().unwrap()["type"], "ping");
    }

    #[tokio::test]
    async fn test_large_message_in_many_reads() {
        let (mut client, server) = duplex(16 * 1024);
        let mut reader = Transport::new(server);

        let files: Vec<Value> = (0..40_000)
            .map(|i| json!({"name": format!("file-{}.bin", i), "size": i}))
            .collect();
        let message = serde_json::to_vec(&json!({"status": "success", "files": files})).unwrap();
        assert!(message.len() > 1_000_000);

        tokio::spawn(async move {
            client.write_all(&message).await.unwrap();
        });

        let value = tokio::time::timeout(
            Duration::from_secs(20),
            reader.read_json(16 * 1024 * 1024),
        )
        .await
        .unwrap()
        .unwrap()
        .unwrap();
        assert_eq!(value["files"].as_array().unwrap().len(), 40_000);
    }

    #[tokio::test]
    async fn test_clean_close() {
        let (client, server) = duplex(64);
        let mut reader = Transport::new(server);
        drop(client);

        assert!(reader.read_json(1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_signal() {
        let (mut client, server) = duplex(64);
        let mut reader = Transport::new(server);

        client
            .write_all(br#"{"status":"error","message":"Invalid filename"}"#)
            .await
            .unwrap();
        assert!(!reader.expect_signal(b"ready").await.unwrap());

        let value = reader.read_json(1024).await.unwrap().unwrap();
        assert_eq!(value["status"], "error");
    }
}
