//! Call/await over the single duplex message channel to the host process.
//!
//! Every outbound request carries a fresh [`CorrelationId`]; replies are
//! matched strictly by that id, never by arrival order, so any number of calls
//! may be in flight at once. Inbound messages that match no pending call are
//! dispatched as push events to the handlers registered for their category.

mod handlers;
pub mod memory;

pub use handlers::{HandlerId, PushHandler};

use async_trait::async_trait;
use bw_api_types::{
    CorrelationId, InboundMessage, OutboundMessage, PushCategory, PushEvent, RequestEnvelope,
    ResponseEnvelope, Scope,
};
use handlers::PushHandlers;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The host answered with an error payload, preserved as sent.
    #[error("remote error: {0}")]
    Remote(Value),
    #[error("call to '{operation}' timed out after {after:?}")]
    Timeout { operation: String, after: Duration },
    #[error("call was cancelled before a reply arrived")]
    Cancelled,
    #[error("failed to transmit request: {0:#}")]
    Transport(#[source] anyhow::Error),
    #[error("failed to decode reply: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Outbound half of the host channel.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// `None` waits for a reply forever.
    pub call_timeout: Option<Duration>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            call_timeout: Some(DEFAULT_CALL_TIMEOUT),
        }
    }
}

impl BridgeConfig {
    /// Reads `BW_CALL_TIMEOUT_MS`; `0` disables the timeout.
    pub fn from_env() -> Self {
        match std::env::var("BW_CALL_TIMEOUT_MS") {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(0) => Self { call_timeout: None },
                Ok(ms) => Self {
                    call_timeout: Some(Duration::from_millis(ms)),
                },
                Err(_) => {
                    warn!("invalid BW_CALL_TIMEOUT_MS '{raw}', using default");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

/// What [`RequestBridge::handle_inbound`] did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    Resolved(CorrelationId),
    Pushed { category: PushCategory, handlers: usize },
    Dropped,
}

type Reply = Result<ResponseEnvelope, BridgeError>;

struct Shared {
    pending: Mutex<HashMap<CorrelationId, oneshot::Sender<Reply>>>,
    handlers: PushHandlers,
    activity: watch::Sender<bool>,
    /// Set once by `close`; written and read under the `pending` lock.
    closed: AtomicBool,
}

impl Shared {
    fn take(&self, id: &CorrelationId) -> Option<oneshot::Sender<Reply>> {
        let mut pending = lock(&self.pending);
        let waiter = pending.remove(id);
        self.refresh_activity(&pending);
        waiter
    }

    fn refresh_activity(&self, pending: &HashMap<CorrelationId, oneshot::Sender<Reply>>) {
        let busy = !pending.is_empty();
        self.activity.send_if_modified(|current| {
            let changed = *current != busy;
            *current = busy;
            changed
        });
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct RequestBridge {
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    config: BridgeConfig,
}

impl RequestBridge {
    pub fn new(transport: Arc<dyn Transport>, config: BridgeConfig) -> Self {
        let (activity, _) = watch::channel(false);
        Self {
            transport,
            shared: Arc::new(Shared {
                pending: Mutex::new(HashMap::new()),
                handlers: PushHandlers::default(),
                activity,
                closed: AtomicBool::new(false),
            }),
            config,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Send a request and wait for its reply, bounded by the configured
    /// timeout.
    pub async fn call(
        &self,
        scope: Scope,
        operation: &str,
        args: Vec<Value>,
    ) -> Result<ResponseEnvelope, BridgeError> {
        self.call_with_timeout(scope, operation, args, self.config.call_timeout)
            .await
    }

    pub async fn call_with_timeout(
        &self,
        scope: Scope,
        operation: &str,
        args: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<ResponseEnvelope, BridgeError> {
        self.start(scope, operation, args)
            .await?
            .with_timeout(timeout)
            .wait()
            .await
    }

    /// Register and transmit a request without waiting for the reply.
    ///
    /// The returned [`PendingCall`] exposes the correlation id for
    /// [`cancel`](Self::cancel). Dropping it abandons the call.
    pub async fn start(
        &self,
        scope: Scope,
        operation: &str,
        args: Vec<Value>,
    ) -> Result<PendingCall, BridgeError> {
        let id = CorrelationId::new();
        let (sender, receiver) = oneshot::channel();
        {
            let mut pending = lock(&self.shared.pending);
            if self.shared.closed.load(Ordering::SeqCst) {
                debug!(%scope, operation, "bridge is closed, refusing request");
                return Err(BridgeError::Cancelled);
            }
            pending.insert(id, sender);
            self.shared.refresh_activity(&pending);
        }
        let call = PendingCall {
            id,
            operation: operation.to_owned(),
            receiver,
            timeout: self.config.call_timeout,
            shared: self.shared.clone(),
        };

        debug!(%id, %scope, operation, "sending request");
        let message = RequestEnvelope::new(scope, operation, args).into_outbound(id);
        self.transport
            .send(message)
            .await
            .map_err(BridgeError::Transport)?;

        Ok(call)
    }

    /// Route one inbound message to its pending call or to push handlers.
    pub fn handle_inbound(&self, message: InboundMessage) -> InboundOutcome {
        if let Some(id) = message.id {
            if let Some(waiter) = self.shared.take(&id) {
                let reply = match message.error {
                    Some(error) => Err(BridgeError::Remote(error)),
                    None => Ok(ResponseEnvelope {
                        id,
                        payload: message.payload,
                    }),
                };
                if waiter.send(reply).is_err() {
                    debug!(%id, "caller stopped waiting before the reply arrived");
                }
                return InboundOutcome::Resolved(id);
            }
            if message.name.is_none() {
                debug!(%id, "dropping reply for an unknown or abandoned call");
                return InboundOutcome::Dropped;
            }
        }

        let Some(tag) = message.name.as_deref() else {
            debug!("dropping inbound message without id or name");
            return InboundOutcome::Dropped;
        };
        let Some(category) = PushCategory::from_tag(tag) else {
            debug!(tag, "ignoring push event of unknown category");
            return InboundOutcome::Dropped;
        };

        let event = PushEvent {
            category,
            payload: message.payload,
        };
        let handlers = self.shared.handlers.dispatch(&event);
        InboundOutcome::Pushed { category, handlers }
    }

    /// Consume inbound messages until the channel closes, then fail whatever
    /// is still pending with [`BridgeError::Cancelled`].
    pub async fn run(&self, mut inbound: mpsc::Receiver<InboundMessage>) {
        while let Some(message) = inbound.recv().await {
            self.handle_inbound(message);
        }
        let abandoned = self.close();
        info!(abandoned, "host channel closed");
    }

    pub fn on_push<F>(&self, category: PushCategory, handler: F) -> HandlerId
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.handlers.register(category, handler)
    }

    pub fn remove_push_handler(&self, id: HandlerId) -> bool {
        self.shared.handlers.remove(id)
    }

    /// Forget a pending call; its waiter fails with `Cancelled` and a late
    /// reply is dropped.
    pub fn cancel(&self, id: CorrelationId) -> bool {
        self.shared.take(&id).is_some()
    }

    /// Cancel every pending call and refuse new ones with
    /// [`BridgeError::Cancelled`]. Returns how many were cancelled.
    pub fn close(&self) -> usize {
        let mut pending = lock(&self.shared.pending);
        self.shared.closed.store(true, Ordering::SeqCst);
        let count = pending.len();
        pending.clear();
        self.shared.refresh_activity(&pending);
        count
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn pending_calls(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    /// `true` while at least one call is in flight.
    pub fn subscribe_activity(&self) -> watch::Receiver<bool> {
        self.shared.activity.subscribe()
    }
}

/// A transmitted request awaiting its reply.
pub struct PendingCall {
    id: CorrelationId,
    operation: String,
    receiver: oneshot::Receiver<Reply>,
    timeout: Option<Duration>,
    shared: Arc<Shared>,
}

impl PendingCall {
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn wait(mut self) -> Result<ResponseEnvelope, BridgeError> {
        let received = match self.timeout {
            Some(after) => match tokio::time::timeout(after, &mut self.receiver).await {
                Ok(received) => received,
                Err(_) => {
                    warn!(id = %self.id, operation = %self.operation, ?after, "call timed out");
                    return Err(BridgeError::Timeout {
                        operation: self.operation.clone(),
                        after,
                    });
                }
            },
            None => (&mut self.receiver).await,
        };
        received.unwrap_or(Err(BridgeError::Cancelled))
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.shared.take(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bridge() -> (RequestBridge, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (transport, outbound) = MemoryTransport::new();
        let bridge = RequestBridge::new(Arc::new(transport), BridgeConfig::default());
        (bridge, outbound)
    }

    #[tokio::test]
    async fn out_of_order_replies_reach_their_own_callers() -> anyhow::Result<()> {
        let (bridge, mut outbound) = bridge();

        let balance = tokio::spawn({
            let bridge = bridge.clone();
            async move {
                bridge
                    .call(Scope::CallApi, "berith_getBalance", vec![json!("0xabc"), json!("latest")])
                    .await
            }
        });
        let first = outbound.recv().await.ok_or_else(|| anyhow::anyhow!("no request"))?;

        let block = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.call(Scope::CallApi, "berith_blockNumber", vec![]).await }
        });
        let second = outbound.recv().await.ok_or_else(|| anyhow::anyhow!("no request"))?;

        assert_eq!(first.payload.api, "berith_getBalance");
        assert_eq!(second.payload.api, "berith_blockNumber");
        assert_ne!(first.id, second.id);
        assert_eq!(bridge.pending_calls(), 2);

        // Answer the later request first.
        assert_eq!(
            bridge.handle_inbound(InboundMessage::reply(second.id, json!("\"0x1b4\""))),
            InboundOutcome::Resolved(second.id)
        );
        assert_eq!(
            bridge.handle_inbound(InboundMessage::reply(first.id, json!("\"0x7f\""))),
            InboundOutcome::Resolved(first.id)
        );

        assert_eq!(block.await??.decode::<String>()?, "0x1b4");
        assert_eq!(balance.await??.decode::<String>()?, "0x7f");
        assert_eq!(bridge.pending_calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn remote_error_payload_is_delivered_verbatim() -> anyhow::Result<()> {
        let (bridge, mut outbound) = bridge();
        let call = bridge.start(Scope::CallApi, "personal_unlockAccount", vec![]).await?;
        let request = outbound.recv().await.ok_or_else(|| anyhow::anyhow!("no request"))?;

        let error = json!({ "code": -32000, "message": "could not decrypt key with given passphrase" });
        bridge.handle_inbound(InboundMessage::failure(request.id, error.clone()));

        match call.wait().await {
            Err(BridgeError::Remote(payload)) => assert_eq!(payload, error),
            other => panic!("expected remote error, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn unknown_push_category_reaches_no_handler() -> anyhow::Result<()> {
        let (bridge, _outbound) = bridge();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        bridge.on_push(PushCategory::SyncProgress, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let message = InboundMessage {
            name: Some("window.event.closed".to_owned()),
            payload: json!(null),
            ..InboundMessage::default()
        };
        assert_eq!(bridge.handle_inbound(message), InboundOutcome::Dropped);

        let unhandled = InboundMessage::push(PushCategory::BlockInfo, json!({ "number": "0x1" }));
        assert_eq!(
            bridge.handle_inbound(unhandled),
            InboundOutcome::Pushed {
                category: PushCategory::BlockInfo,
                handlers: 0
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn push_events_never_resolve_pending_calls() -> anyhow::Result<()> {
        let (bridge, mut outbound) = bridge();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bridge.on_push(PushCategory::SyncProgress, move |payload| {
            lock(&sink).push(payload.clone());
            Ok(())
        });

        let call = bridge.start(Scope::CallApi, "berith_syncing", vec![]).await?;
        let request = outbound.recv().await.ok_or_else(|| anyhow::anyhow!("no request"))?;

        let outcome = bridge.handle_inbound(InboundMessage::push(PushCategory::SyncProgress, json!("false")));
        assert_eq!(
            outcome,
            InboundOutcome::Pushed {
                category: PushCategory::SyncProgress,
                handlers: 1
            }
        );
        assert_eq!(bridge.pending_calls(), 1);

        bridge.handle_inbound(InboundMessage::reply(request.id, json!("false")));
        assert_eq!(call.wait().await?.payload, json!("false"));
        assert_eq!(*lock(&seen), vec![json!("false")]);
        Ok(())
    }

    #[tokio::test]
    async fn timed_out_call_drops_its_late_reply() -> anyhow::Result<()> {
        let (bridge, mut outbound) = bridge();
        let result = bridge
            .call_with_timeout(Scope::CallApi, "berith_mining", vec![], Some(Duration::from_millis(20)))
            .await;
        assert!(matches!(result, Err(BridgeError::Timeout { ref operation, .. }) if operation == "berith_mining"));
        assert_eq!(bridge.pending_calls(), 0);

        let request = outbound.recv().await.ok_or_else(|| anyhow::anyhow!("no request"))?;
        assert_eq!(
            bridge.handle_inbound(InboundMessage::reply(request.id, json!("true"))),
            InboundOutcome::Dropped
        );
        Ok(())
    }

    #[tokio::test]
    async fn cancel_and_close_release_waiters() -> anyhow::Result<()> {
        let (bridge, _outbound) = bridge();

        let first = bridge.start(Scope::CallApi, "miner_start", vec![]).await?;
        assert!(bridge.cancel(first.id()));
        assert!(matches!(first.wait().await, Err(BridgeError::Cancelled)));

        let second = bridge.start(Scope::CallApi, "miner_stop", vec![]).await?;
        let third = bridge.start(Scope::CallDb, "selectContact", vec![]).await?;
        assert_eq!(bridge.close(), 2);
        assert!(matches!(second.wait().await, Err(BridgeError::Cancelled)));
        assert!(matches!(third.wait().await, Err(BridgeError::Cancelled)));
        Ok(())
    }

    #[tokio::test]
    async fn dropped_call_is_unregistered() -> anyhow::Result<()> {
        let (bridge, _outbound) = bridge();
        let call = bridge.start(Scope::Init, "", vec![]).await?;
        assert_eq!(bridge.pending_calls(), 1);
        drop(call);
        assert_eq!(bridge.pending_calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn activity_is_busy_only_while_calls_are_pending() -> anyhow::Result<()> {
        let (bridge, mut outbound) = bridge();
        let activity = bridge.subscribe_activity();
        assert!(!*activity.borrow());

        let call = bridge.start(Scope::CallApi, "berith_accounts", vec![]).await?;
        assert!(*activity.borrow());

        let request = outbound.recv().await.ok_or_else(|| anyhow::anyhow!("no request"))?;
        bridge.handle_inbound(InboundMessage::reply(request.id, json!("[]")));
        assert!(!*activity.borrow());
        call.wait().await?;
        Ok(())
    }

    #[tokio::test]
    async fn failed_transmission_leaves_nothing_pending() {
        let (transport, outbound) = MemoryTransport::new();
        drop(outbound);
        let bridge = RequestBridge::new(Arc::new(transport), BridgeConfig::default());

        let result = bridge.call(Scope::CallApi, "berith_coinbase", vec![]).await;
        assert!(matches!(result, Err(BridgeError::Transport(_))));
        assert_eq!(bridge.pending_calls(), 0);
    }

    #[tokio::test]
    async fn run_cancels_pending_calls_when_channel_closes() -> anyhow::Result<()> {
        let (bridge, mut outbound) = bridge();
        let (inbound_tx, inbound_rx) = mpsc::channel(8);
        let runner = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.run(inbound_rx).await }
        });

        let answered = bridge.start(Scope::CallApi, "berith_blockNumber", vec![]).await?;
        let request = outbound.recv().await.ok_or_else(|| anyhow::anyhow!("no request"))?;
        inbound_tx.send(InboundMessage::reply(request.id, json!("\"0x10\""))).await?;
        assert_eq!(answered.wait().await?.decode::<String>()?, "0x10");

        let orphan = bridge.start(Scope::CallApi, "berith_blockNumber", vec![]).await?;
        drop(inbound_tx);
        runner.await?;
        assert!(matches!(orphan.wait().await, Err(BridgeError::Cancelled)));
        Ok(())
    }

    #[tokio::test]
    async fn calls_after_the_channel_ends_fail_immediately() -> anyhow::Result<()> {
        let (transport, mut outbound) = MemoryTransport::new();
        let bridge = RequestBridge::new(
            Arc::new(transport),
            BridgeConfig { call_timeout: None },
        );
        let (inbound_tx, inbound_rx) = mpsc::channel(8);
        drop(inbound_tx);
        bridge.run(inbound_rx).await;
        assert!(bridge.is_closed());

        let late = bridge.call(Scope::CallApi, "berith_syncing", vec![]).await;
        assert!(matches!(late, Err(BridgeError::Cancelled)));
        assert_eq!(bridge.pending_calls(), 0);
        assert!(outbound.try_recv().is_err());
        Ok(())
    }
}
