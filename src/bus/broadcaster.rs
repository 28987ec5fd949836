//! Multicast of inbound requests to route subscriptions.

use std::fmt;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::{broadcast, mpsc, watch};

use crate::config::ServerConfig;
use crate::http::server::HttpServer;
use crate::net::{Listener, ListenerError};
use crate::pipeline::DispatchContext;

/// Identifies one subscriber of an [`EventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Subscriber {
    id: SubscriberId,
    tx: mpsc::UnboundedSender<DispatchContext>,
}

/// Turns one listener's requests into contexts and hands a copy of each to
/// every subscriber.
///
/// Each subscriber has its own unbounded queue, so publishing never waits
/// on a slow consumer. Subscribers whose receiving side was dropped are
/// pruned on the next publish.
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    started: AtomicBool,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            started: AtomicBool::new(false),
        }
    }

    /// Register a new subscriber. It sees every context published from now on.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Subscriber { id, tx });
        tracing::debug!(subscriber = %id, "Subscriber added");
        Subscription { id, rx }
    }

    /// Deliver `ctx` to every live subscriber; returns how many got it.
    pub fn publish(&self, ctx: DispatchContext) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|sub| {
            let live = sub.tx.send(ctx.clone()).is_ok();
            if !live {
                tracing::debug!(subscriber = %sub.id, "Dropped closed subscriber");
            }
            live
        });
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    /// Drop every subscriber; their streams end once drained.
    pub fn close(&self) {
        let closed = std::mem::take(&mut *self.lock());
        tracing::debug!(subscribers = closed.len(), "Event bus closed");
    }

    /// Bind the listener and start serving requests into the bus.
    ///
    /// A bus owns at most one listener: a second call fails with
    /// [`ListenerError::AlreadyStarted`]. A failed bind leaves the bus
    /// unstarted.
    pub async fn start(
        self: &Arc<Self>,
        config: &ServerConfig,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<BusHandle, ListenerError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ListenerError::AlreadyStarted);
        }

        let listener = match Listener::bind(&config.listener).await {
            Ok(listener) => listener,
            Err(e) => {
                self.started.store(false, Ordering::Release);
                return Err(e);
            }
        };
        let local_addr = listener.local_addr();

        let (stopped_tx, stopped_rx) = watch::channel(false);
        let server = HttpServer::new(Arc::clone(self), config.clone());
        tokio::spawn(async move {
            server.run(listener, shutdown).await;
            let _ = stopped_tx.send(true);
        });

        Ok(BusHandle {
            local_addr,
            stopped: stopped_rx,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish()
    }
}

/// A running listener attached to a bus.
#[derive(Debug, Clone)]
pub struct BusHandle {
    local_addr: SocketAddr,
    stopped: watch::Receiver<bool>,
}

impl BusHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Resolve once the listener stopped and its connections drained.
    pub async fn closed(&self) {
        let mut stopped = self.stopped.clone();
        // An error means the serving task is gone, which is stopped too.
        let _ = stopped.wait_for(|stopped| *stopped).await;
    }
}

/// One subscriber's view of the bus.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<DispatchContext>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

impl Stream for Subscription {
    type Item = DispatchContext;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
