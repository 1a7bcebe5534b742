//! Container runtime bridge
//!
//! A minimal client for a Docker-compatible REST API over a Unix-domain
//! socket, used for pod log tailing and rollout restarts. Requests are
//! written as HTTP/1.0 so the daemon streams responses unframed and closes
//! the connection when done.
//!
//! The bridge is strictly best-effort: a missing socket, a refused
//! connection or a non-2xx answer fails only the request at hand, and the
//! router downgrades those failures to 501.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Default deadline for unary runtime requests
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Buffered log frames in flight for a follow stream
const FOLLOW_CHANNEL_DEPTH: usize = 16;

/// Runtime bridge error
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The runtime socket is not present in the container
    #[error("runtime socket {} is not mounted", .0.display())]
    Unavailable(PathBuf),

    /// Socket I/O failed
    #[error("runtime socket error: {0}")]
    Io(#[from] std::io::Error),

    /// The daemon answered outside the 2xx range
    #[error("runtime returned status {status} for {path}")]
    Status {
        /// HTTP status from the daemon
        status: u16,
        /// Request path
        path: String,
    },

    /// The request exceeded its deadline
    #[error("runtime request timed out after {0:?}")]
    Timeout(Duration),

    /// The daemon's response could not be parsed
    #[error("malformed runtime response: {0}")]
    Malformed(String),
}

/// Client for the container runtime socket
#[derive(Debug, Clone)]
pub struct RuntimeClient {
    socket: PathBuf,
    timeout: Duration,
}

impl RuntimeClient {
    /// Client for the socket at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            socket: path.into(),
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// Whether the socket node exists right now.
    ///
    /// Re-checked per request rather than cached: the bridge never marks
    /// itself globally broken.
    pub fn available(&self) -> bool {
        self.socket.exists()
    }

    /// Resolve a compose service to a container ID.
    ///
    /// Tries the runtime's label index first (the compose project/service
    /// labels), then the conventional compose container names, since the
    /// host orchestrator's naming scheme varies.
    pub async fn find_container(
        &self,
        project: &str,
        service: &str,
    ) -> Result<Option<String>, BridgeError> {
        let filters = serde_json::json!({
            "label": [
                format!("com.docker.compose.project={}", project),
                format!("com.docker.compose.service={}", service),
            ],
        });
        let path = format!(
            "/containers/json?filters={}",
            percent_encode(&filters.to_string())
        );
        let (status, body) = self.request("GET", &path).await?;
        if status == 200 {
            let containers: Vec<serde_json::Value> = serde_json::from_slice(&body)
                .map_err(|e| BridgeError::Malformed(e.to_string()))?;
            if let Some(id) = containers
                .first()
                .and_then(|c| c.get("Id"))
                .and_then(|id| id.as_str())
            {
                return Ok(Some(id.to_string()));
            }
        }

        // Fall back to conventional names (compose v2 and v1 separators)
        for name in [
            format!("{}-{}-1", project, service),
            format!("{}_{}_1", project, service),
        ] {
            let (status, _) = self
                .request("GET", &format!("/containers/{}/json", name))
                .await?;
            if status == 200 {
                return Ok(Some(name));
            }
        }
        Ok(None)
    }

    /// Fetch the log tail of a container, demultiplexed to plain bytes
    pub async fn logs(
        &self,
        container: &str,
        tail: &str,
        timestamps: bool,
    ) -> Result<Vec<u8>, BridgeError> {
        let path = format!(
            "/containers/{}/logs?stdout=1&stderr=1&tail={}&timestamps={}",
            container,
            percent_encode(tail),
            timestamps as u8,
        );
        let (status, body) = self.request("GET", &path).await?;
        if status != 200 {
            return Err(BridgeError::Status { status, path });
        }
        let mut demuxer = LogDemuxer::default();
        Ok(demuxer.push(&body))
    }

    /// Follow a container's logs.
    ///
    /// Returns a channel of demultiplexed log chunks. The forwarding task
    /// stops (and the upstream socket is closed) as soon as the receiver is
    /// dropped, which is how client disconnects propagate.
    pub async fn follow_logs(
        &self,
        container: &str,
        tail: &str,
        timestamps: bool,
    ) -> Result<mpsc::Receiver<Result<Vec<u8>, std::io::Error>>, BridgeError> {
        let path = format!(
            "/containers/{}/logs?stdout=1&stderr=1&follow=1&tail={}&timestamps={}",
            container,
            percent_encode(tail),
            timestamps as u8,
        );

        if !self.available() {
            return Err(BridgeError::Unavailable(self.socket.clone()));
        }
        let mut stream = UnixStream::connect(&self.socket).await?;
        write_request(&mut stream, "GET", &path).await?;

        // Read up to the header terminator under the unary deadline; the
        // body then streams for as long as the container lives.
        let (status, mut leftover) = timeout(self.timeout, read_head(&mut stream))
            .await
            .map_err(|_| BridgeError::Timeout(self.timeout))??;
        if status != 200 {
            return Err(BridgeError::Status { status, path });
        }

        let (tx, rx) = mpsc::channel(FOLLOW_CHANNEL_DEPTH);
        tokio::spawn(async move {
            let mut demuxer = LogDemuxer::default();
            let mut buf = [0u8; 8192];
            loop {
                let chunk = if leftover.is_empty() {
                    match stream.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => buf[..n].to_vec(),
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            break;
                        }
                    }
                } else {
                    std::mem::take(&mut leftover)
                };

                let output = demuxer.push(&chunk);
                if !output.is_empty() && tx.send(Ok(output)).await.is_err() {
                    // Client went away; drop the upstream connection.
                    break;
                }
            }
        });
        Ok(rx)
    }

    /// Restart a container (stop + start via the daemon)
    pub async fn restart(&self, container: &str) -> Result<(), BridgeError> {
        let path = format!("/containers/{}/restart", container);
        let (status, _) = self.request("POST", &path).await?;
        if (200..300).contains(&status) {
            Ok(())
        } else {
            Err(BridgeError::Status { status, path })
        }
    }

    async fn request(&self, method: &str, path: &str) -> Result<(u16, Vec<u8>), BridgeError> {
        if !self.available() {
            return Err(BridgeError::Unavailable(self.socket.clone()));
        }
        timeout(self.timeout, async {
            let mut stream = UnixStream::connect(&self.socket).await?;
            write_request(&mut stream, method, path).await?;
            let (status, mut body) = read_head(&mut stream).await?;
            stream.read_to_end(&mut body).await?;
            Ok((status, body))
        })
        .await
        .map_err(|_| BridgeError::Timeout(self.timeout))?
    }
}

async fn write_request(
    stream: &mut UnixStream,
    method: &str,
    path: &str,
) -> Result<(), std::io::Error> {
    // HTTP/1.0 keeps the daemon from chunking the response; it streams the
    // body and closes the connection when it is done.
    let request = format!("{} {} HTTP/1.0\r\nHost: localhost\r\nAccept: */*\r\n\r\n", method, path);
    stream.write_all(request.as_bytes()).await
}

/// Read until the header terminator; returns the status code and whatever
/// body bytes arrived alongside the headers.
async fn read_head(stream: &mut UnixStream) -> Result<(u16, Vec<u8>), BridgeError> {
    let mut head = Vec::with_capacity(1024);
    let mut buf = [0u8; 1024];
    loop {
        if let Some(end) = find_header_end(&head) {
            let status = parse_status_line(&head[..end])?;
            return Ok((status, head.split_off(end + 4)));
        }
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(BridgeError::Malformed(
                "connection closed before headers".to_string(),
            ));
        }
        head.extend_from_slice(&buf[..n]);
    }
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_status_line(head: &[u8]) -> Result<u16, BridgeError> {
    let line = head.split(|&b| b == b'\r').next().unwrap_or_default();
    let text = std::str::from_utf8(line)
        .map_err(|_| BridgeError::Malformed("non-UTF-8 status line".to_string()))?;
    text.split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| BridgeError::Malformed(format!("bad status line \"{}\"", text)))
}

/// Percent-encode a query component
pub fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Incremental decoder for Docker's multiplexed log stream.
///
/// Frames are `[stream_type, 0, 0, 0, len_be_u32, payload]`. Containers
/// running with a TTY produce a raw byte stream instead; the first bytes
/// decide which mode applies for the rest of the stream.
#[derive(Debug, Default)]
pub struct LogDemuxer {
    buf: Vec<u8>,
    raw: Option<bool>,
}

impl LogDemuxer {
    /// Feed bytes in; get back whatever complete payload is available.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<u8> {
        self.buf.extend_from_slice(chunk);

        if self.raw.is_none() && self.buf.len() >= 8 {
            let framed = self.buf[0] <= 2 && self.buf[1..4] == [0, 0, 0];
            self.raw = Some(!framed);
        }

        match self.raw {
            Some(true) => std::mem::take(&mut self.buf),
            Some(false) => {
                let mut out = Vec::new();
                while self.buf.len() >= 8 {
                    let len = u32::from_be_bytes([
                        self.buf[4],
                        self.buf[5],
                        self.buf[6],
                        self.buf[7],
                    ]) as usize;
                    if self.buf.len() < 8 + len {
                        break;
                    }
                    out.extend_from_slice(&self.buf[8..8 + len]);
                    self.buf.drain(..8 + len);
                }
                out
            }
            None => Vec::new(),
        }
    }
}
