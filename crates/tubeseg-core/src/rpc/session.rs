//! The backend session.
//!
//! Calls are queued the moment they are issued. The queue is drained by the
//! driver task, which only exists once the handshake succeeded, so calls issued
//! before `Ready` reach the transport in issuance order.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::rpc::messages::{Frame, HELLO_ID, HelloResult, RequestFrame, request_id};
use crate::rpc::subscription::{PendingRegistration, Subscription, SubscriptionTable};
use crate::rpc::{Connection, Connector, Result, RpcError, SessionConfig, SessionState};

type Reply = oneshot::Sender<Result<Value>>;

struct QueuedCall {
    seq: u64,
    method: String,
    args: Vec<Value>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    state: watch::Sender<SessionState>,
    connect_claimed: AtomicBool,
    next_seq: AtomicU64,
    queue_tx: mpsc::UnboundedSender<QueuedCall>,
    /// Taken by `connect` once ready, or by `fail`.
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<QueuedCall>>>,
    pending: Mutex<HashMap<u64, Reply>>,
    /// Request id of every dispatched call still awaiting its reply.
    in_flight: Mutex<HashMap<String, u64>>,
    subscriptions: Arc<Mutex<SubscriptionTable>>,
    shutdown: Notify,
}

impl Inner {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Move to `next` unless the session already failed.
    fn set_state(&self, next: SessionState) {
        self.state.send_if_modified(|state| {
            if *state == next || *state == SessionState::Failed {
                return false;
            }
            debug!(from = %state, to = %next, "Session state changed");
            *state = next;
            true
        });
    }

    fn enqueue(&self, method: &str, args: Vec<Value>) -> Result<(u64, oneshot::Receiver<Result<Value>>)> {
        if self.state() == SessionState::Failed {
            return Err(RpcError::Connection("Session has failed".to_string()));
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let (reply_tx, reply_rx) = oneshot::channel();
        lock(&self.pending).insert(seq, reply_tx);

        let queued = QueuedCall { seq, method: method.to_string(), args };
        if self.queue_tx.send(queued).is_err() {
            lock(&self.pending).remove(&seq);
            return Err(RpcError::Connection("Session has failed".to_string()));
        }

        debug!(seq, method, "Call queued");
        Ok((seq, reply_rx))
    }

    fn is_pending(&self, seq: u64) -> bool {
        lock(&self.pending).contains_key(&seq)
    }

    fn forget(&self, seq: u64) {
        lock(&self.pending).remove(&seq);
        lock(&self.in_flight).retain(|_, in_flight| *in_flight != seq);
    }

    /// Record a dispatched call. A call that timed out meanwhile is not kept.
    fn track(&self, id: String, seq: u64) {
        let mut in_flight = lock(&self.in_flight);
        if self.is_pending(seq) {
            in_flight.insert(id, seq);
        }
    }

    /// Terminal transition. Rejects every queued and in-flight call.
    fn fail(&self, reason: &str, queue: Option<mpsc::UnboundedReceiver<QueuedCall>>) {
        self.state.send_if_modified(|state| {
            let changed = *state != SessionState::Failed;
            *state = SessionState::Failed;
            changed
        });

        // Close the queue before draining `pending` so a concurrent enqueue either
        // lands in the drain below or sees its send fail.
        if let Some(mut queue) = queue {
            queue.close();
            while queue.try_recv().is_ok() {}
        }

        lock(&self.in_flight).clear();
        let rejected: Vec<Reply> = lock(&self.pending).drain().map(|(_, reply)| reply).collect();
        if !rejected.is_empty() {
            debug!(count = rejected.len(), "Rejecting outstanding calls");
        }
        for reply in rejected {
            let _ = reply.send(Err(RpcError::Connection(reason.to_string())));
        }
    }

    fn dispatch(&self, text: &str) {
        match Frame::parse(text) {
            Ok(Frame::Response { id, outcome }) => {
                let seq = lock(&self.in_flight).remove(&id);
                let Some(seq) = seq else {
                    warn!(id = %id, "Reply for an unknown request");
                    return;
                };
                let reply = lock(&self.pending).remove(&seq);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(outcome.map_err(RpcError::Remote));
                    }
                    None => debug!(id = %id, "Dropping reply for a call that timed out"),
                }
            }
            Ok(Frame::Publication { topic, payload }) => {
                let callbacks = lock(&self.subscriptions).callbacks(&topic);
                if callbacks.is_empty() {
                    debug!(topic = %topic, "Publication without subscribers");
                }
                for callback in callbacks {
                    callback(&payload);
                }
            }
            Err(err) => warn!(error = %err, "Ignoring malformed frame"),
        }
    }
}

/// Handle to the single backend session. Clones share the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Create a disconnected session.
    pub fn new(config: SessionConfig, connector: impl Connector + 'static) -> Self {
        Self::with_connector(config, Arc::new(connector))
    }

    /// Create a disconnected session from a shared connector.
    pub fn with_connector(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let inner = Inner {
            config,
            connector,
            state,
            connect_claimed: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            pending: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            subscriptions: Arc::new(Mutex::new(SubscriptionTable::default())),
            shutdown: Notify::new(),
        };
        Self { inner: Arc::new(inner) }
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Calls issued and not yet resolved.
    pub fn pending_calls(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Live registrations on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        lock(&self.inner.subscriptions).count(topic)
    }

    /// Wait until the session is ready, or fail if it never will be.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut state = self.inner.state.subscribe();
        let reached = state
            .wait_for(|s| matches!(s, SessionState::Ready | SessionState::Failed))
            .await
            .map(|s| *s);
        match reached {
            Ok(SessionState::Ready) => Ok(()),
            _ => Err(RpcError::Connection("Session failed".to_string())),
        }
    }

    /// Establish the session.
    ///
    /// Only the first call does anything; later calls fail immediately. The
    /// handshake is attempted up to `retry.max_attempts` times with a fixed
    /// delay between attempts. Exhausting the attempts leaves the session
    /// permanently `Failed`.
    pub async fn connect(&self) -> Result<()> {
        if self.inner.connect_claimed.swap(true, Ordering::SeqCst) {
            return Err(RpcError::Connection("Connection exists".to_string()));
        }

        let retry = self.inner.config.retry;
        let max_attempts = retry.max_attempts.max(1);
        let url = self.inner.config.endpoint.url();
        self.inner.set_state(SessionState::Connecting);
        info!(url = %url, max_attempts, "Connecting to backend");

        let mut attempt = 0;
        let (connection, client_id) = loop {
            if self.inner.state() == SessionState::Failed {
                return Err(RpcError::Connection("Session closed".to_string()));
            }
            attempt += 1;
            match self.handshake().await {
                Ok(established) => break established,
                Err(err) if attempt >= max_attempts => {
                    warn!(attempt, error = %err, "Giving up on backend connection");
                    let reason = format!("Failed to connect to {} after {} attempts", url, attempt);
                    let queue = lock(&self.inner.queue_rx).take();
                    self.inner.fail(&reason, queue);
                    return Err(RpcError::Connection(reason));
                }
                Err(err) => {
                    debug!(attempt, error = %err, "Handshake failed, retrying");
                    sleep(retry.interval).await;
                }
            }
        };

        let queue = lock(&self.inner.queue_rx).take();
        let Some(queue) = queue else {
            return Err(RpcError::Connection("Session closed".to_string()));
        };

        self.inner.set_state(SessionState::Ready);
        info!(url = %url, client_id = %client_id, attempts = attempt, "Backend session ready");
        tokio::spawn(drive(Arc::clone(&self.inner), connection, queue, client_id));
        Ok(())
    }

    /// One transport connection plus the `wslink.hello` exchange.
    async fn handshake(&self) -> Result<(Connection, String)> {
        let endpoint = &self.inner.config.endpoint;
        let attempt = async {
            let mut connection = self.inner.connector.connect(endpoint).await?;
            let hello = RequestFrame::hello(&endpoint.secret, &endpoint.application);
            connection.sink.send(hello.to_text()?).await?;

            loop {
                let Some(text) = connection.stream.next().await else {
                    return Err(RpcError::Connection("Connection closed during handshake".to_string()));
                };
                if let Frame::Response { id, outcome } = Frame::parse(&text?)? {
                    if id != HELLO_ID {
                        continue;
                    }
                    let result = outcome
                        .map_err(|e| RpcError::Connection(format!("Handshake rejected: {}", e)))?;
                    let hello: HelloResult = serde_json::from_value(result)?;
                    return Ok((connection, hello.client_id));
                }
            }
        };

        timeout(self.inner.config.retry.handshake_timeout, attempt)
            .await
            .map_err(|_| RpcError::Connection("Handshake timed out".to_string()))?
    }

    /// Invoke `method` with positional `args`.
    ///
    /// The call is queued before this returns. The future resolves with the
    /// backend's reply, or rejects with a remote error, a timeout, or a
    /// connection error if the session failed first.
    pub fn call(&self, method: &str, args: Vec<Value>) -> impl Future<Output = Result<Value>> + Send + 'static {
        let inner = Arc::clone(&self.inner);
        let method = method.to_string();
        let enqueued = inner.enqueue(&method, args);

        async move {
            let (seq, reply) = enqueued?;
            let outcome = match inner.config.call_timeout {
                Some(after) => match timeout(after, reply).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        inner.forget(seq);
                        warn!(method = %method, ?after, "Call timed out");
                        return Err(RpcError::Timeout { method, after });
                    }
                },
                None => reply.await,
            };
            outcome.unwrap_or_else(|_| Err(RpcError::Connection("Session dropped the call".to_string())))
        }
    }

    /// Register `callback` for publications on `topic`.
    ///
    /// Resolves once the session is ready. Every call registers independently.
    /// Dropping the future before it resolves removes the registration.
    pub fn subscribe<F>(&self, topic: &str, callback: F) -> impl Future<Output = Result<Subscription>> + Send + 'static
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let table = Arc::clone(&self.inner.subscriptions);
        let id = lock(&table).register(topic, Arc::new(callback));
        let registration = PendingRegistration::new(topic.to_string(), id, table);
        let mut state = self.inner.state.subscribe();

        async move {
            let reached = state
                .wait_for(|s| matches!(s, SessionState::Ready | SessionState::Failed))
                .await
                .map(|s| *s);
            if matches!(reached, Ok(SessionState::Ready)) {
                Ok(registration.claim())
            } else {
                Err(RpcError::Connection("Session failed before the subscription was ready".to_string()))
            }
        }
    }

    /// Named handle for calling `method`.
    pub fn call_handle(&self, method: &'static str) -> CallHandle {
        CallHandle { session: self.clone(), method }
    }

    /// Named handle for subscribing to `topic`.
    pub fn subscription_handle(&self, topic: &'static str) -> SubscriptionHandle {
        SubscriptionHandle { session: self.clone(), topic }
    }

    /// Tear the session down. Outstanding calls are rejected.
    pub fn close(&self) {
        info!("Closing backend session");
        self.inner.shutdown.notify_one();
        let queue = lock(&self.inner.queue_rx).take();
        if queue.is_some() {
            self.inner.fail("Session closed", queue);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.inner.config.endpoint.url())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Owns the transport once ready: writes queued calls, routes frames.
async fn drive(
    inner: Arc<Inner>,
    connection: Connection,
    mut queue: mpsc::UnboundedReceiver<QueuedCall>,
    client_id: String,
) {
    let Connection { mut sink, mut stream } = connection;

    let reason = loop {
        tokio::select! {
            () = inner.shutdown.notified() => break "Session closed".to_string(),
            Some(call) = queue.recv() => {
                if !inner.is_pending(call.seq) {
                    debug!(seq = call.seq, method = %call.method, "Skipping call that timed out before dispatch");
                    continue;
                }
                let id = request_id(&client_id, call.seq);
                let text = match RequestFrame::new(id.clone(), call.method.as_str(), call.args).to_text() {
                    Ok(text) => text,
                    Err(err) => {
                        if let Some(reply) = lock(&inner.pending).remove(&call.seq) {
                            let _ = reply.send(Err(err));
                        }
                        continue;
                    }
                };
                if let Err(err) = sink.send(text).await {
                    break err.to_string();
                }
                debug!(id = %id, method = %call.method, "Request dispatched");
                inner.track(id, call.seq);
            }
            frame = stream.next() => match frame {
                Some(Ok(text)) => inner.dispatch(&text),
                Some(Err(err)) => break err.to_string(),
                None => break "Backend closed the connection".to_string(),
            },
        }
    };

    warn!(reason = %reason, "Backend session ended");
    let _ = sink.close().await;
    inner.fail(&reason, Some(queue));
}

/// A fixed remote method bound to a session.
#[derive(Debug, Clone)]
pub struct CallHandle {
    session: Session,
    method: &'static str,
}

impl CallHandle {
    /// Remote method name.
    pub fn method(&self) -> &'static str {
        self.method
    }

    /// Invoke the method. Queued before this returns, like [`Session::call`].
    pub fn invoke(&self, args: Vec<Value>) -> impl Future<Output = Result<Value>> + Send + 'static {
        self.session.call(self.method, args)
    }
}

/// A fixed publication topic bound to a session.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    session: Session,
    topic: &'static str,
}

impl SubscriptionHandle {
    /// Topic name.
    pub fn topic(&self) -> &'static str {
        self.topic
    }

    /// Register `callback` on the topic.
    pub fn subscribe<F>(&self, callback: F) -> impl Future<Output = Result<Subscription>> + Send + 'static
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.session.subscribe(self.topic, callback)
    }
}
