use anyhow::{Context, Result};
use async_trait::async_trait;
use bw_api_types::{InboundMessage, OutboundMessage};
use bw_bridge::Transport;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

pub const DEFAULT_HOST_ADDR: &str = "127.0.0.1:4100";

const INBOUND_BUFFER: usize = 256;

/// Host channel over TCP, one JSON message per line in each direction.
///
/// Reads `BW_HOST_ADDR` when no address is given
/// (default: `127.0.0.1:4100`).
pub struct TcpHostTransport {
    writer: Mutex<BufWriter<OwnedWriteHalf>>,
    peer: SocketAddr,
}

impl TcpHostTransport {
    pub fn resolve_endpoint(endpoint: Option<String>) -> String {
        endpoint
            .or_else(|| std::env::var("BW_HOST_ADDR").ok())
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_HOST_ADDR.to_owned())
    }

    /// Connect and start reading. Inbound messages arrive on the returned
    /// receiver, which closes when the host hangs up.
    pub async fn connect(addr: &str) -> Result<(Self, mpsc::Receiver<InboundMessage>)> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connect to host at {addr}"))?;
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> Result<(Self, mpsc::Receiver<InboundMessage>)> {
        let peer = stream.peer_addr().context("host peer address")?;
        stream.set_nodelay(true).context("set TCP_NODELAY")?;
        let (read, write) = stream.into_split();

        let (sink, inbound) = mpsc::channel(INBOUND_BUFFER);
        tokio::spawn(read_inbound(read, sink, peer));
        info!(%peer, "connected to host");

        Ok((
            Self {
                writer: Mutex::new(BufWriter::new(write)),
                peer,
            },
            inbound,
        ))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

async fn read_inbound(read: OwnedReadHalf, sink: mpsc::Sender<InboundMessage>, peer: SocketAddr) {
    let mut lines = BufReader::new(read).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<InboundMessage>(&line) {
                    Ok(message) => {
                        if sink.send(message).await.is_err() {
                            debug!(%peer, "inbound receiver dropped, stopping reader");
                            return;
                        }
                    }
                    Err(err) => warn!(%peer, "skipping malformed message from host: {err}"),
                }
            }
            Ok(None) => {
                info!(%peer, "host closed the channel");
                return;
            }
            Err(err) => {
                warn!(%peer, "reading from host failed: {err}");
                return;
            }
        }
    }
}

#[async_trait]
impl Transport for TcpHostTransport {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        let mut line = serde_json::to_vec(&message).context("encode request")?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .context("write request to host")?;
        writer.flush().await.context("flush request to host")?;
        Ok(())
    }
}
