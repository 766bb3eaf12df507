//! In-process transport, used where the host lives in the same process
//! (tests, embedding).

use anyhow::anyhow;
use async_trait::async_trait;
use bw_api_types::{InboundMessage, OutboundMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{RequestBridge, Transport};

pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<OutboundMessage>,
}

impl MemoryTransport {
    /// The receiver is the host's end of the channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        (Self { outbound }, receiver)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, message: OutboundMessage) -> anyhow::Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| anyhow!("host end of the memory channel is closed"))
    }
}

/// Answer every request arriving on `requests` with `respond`, feeding the
/// replies back into `bridge`. `None` leaves a request unanswered.
pub fn serve<F>(
    bridge: RequestBridge,
    mut requests: mpsc::UnboundedReceiver<OutboundMessage>,
    mut respond: F,
) -> JoinHandle<()>
where
    F: FnMut(OutboundMessage) -> Option<InboundMessage> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            if let Some(reply) = respond(request) {
                bridge.handle_inbound(reply);
            }
        }
    })
}
