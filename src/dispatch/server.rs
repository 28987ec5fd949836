//! The public entry point: bind a server, register routes.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;

use crate::bus::{BusHandle, EventBus};
use crate::config::{validate_config, ConfigError, ServerConfig};
use crate::dispatch::route::{RouteId, RouteRegistration, RouteStream};
use crate::error::DispatchError;
use crate::lifecycle::Shutdown;
use crate::pipeline::{standard_pipeline, ContextStream, RouteOptions, TransformChain};
use crate::routing::PathMatcher;

/// Builds the transform chain for each registered route.
pub type PreFactory = Arc<dyn Fn(&RouteOptions) -> TransformChain + Send + Sync>;

/// Configures a [`Server`] before binding.
pub struct ServerBuilder {
    config: ServerConfig,
    pre: PreFactory,
    shutdown: Shutdown,
}

impl ServerBuilder {
    fn new(config: ServerConfig) -> Self {
        Self {
            config,
            pre: Arc::new(standard_pipeline),
            shutdown: Shutdown::new(),
        }
    }

    /// Replace the per-route chain factory. Defaults to
    /// [`standard_pipeline`].
    pub fn pre<F>(mut self, factory: F) -> Self
    where
        F: Fn(&RouteOptions) -> TransformChain + Send + Sync + 'static,
    {
        self.pre = Arc::new(factory);
        self
    }

    /// Use an existing shutdown coordinator, e.g. one wired to OS signals.
    pub fn shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Validate the config, bind the listener and start accepting.
    pub async fn bind(self) -> Result<Server, DispatchError> {
        validate_config(&self.config).map_err(ConfigError::Validation)?;

        let bus = Arc::new(EventBus::new());
        let handle = bus.start(&self.config, self.shutdown.subscribe()).await?;
        tracing::info!(address = %handle.local_addr(), "Dispatch server listening");

        Ok(Server {
            bus,
            handle,
            pre: self.pre,
            shutdown: self.shutdown,
            routes: Mutex::new(Vec::new()),
            next_route: AtomicU64::new(1),
            config: self.config,
        })
    }
}

/// A bound server. Routes are added with [`Server::on`].
pub struct Server {
    bus: Arc<EventBus>,
    handle: BusHandle,
    pre: PreFactory,
    shutdown: Shutdown,
    routes: Mutex<Vec<Arc<RouteRegistration>>>,
    next_route: AtomicU64,
    config: ServerConfig,
}

/// Bind a server with the standard pipeline.
pub async fn create_server(config: ServerConfig) -> Result<Server, DispatchError> {
    Server::builder(config).bind().await
}

impl Server {
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder::new(config)
    }

    /// Register a route and return the stream of requests that reach it.
    ///
    /// Every route whose pipeline lets a request through receives it; there
    /// is no precedence between overlapping patterns. Only requests
    /// arriving after registration are seen.
    pub fn on(&self, options: RouteOptions) -> Result<RouteStream, DispatchError> {
        let matcher = Arc::new(PathMatcher::compile(&options.url)?);
        let chain = (self.pre)(&options);
        let subscription = self.bus.subscribe();

        let id = RouteId(self.next_route.fetch_add(1, Ordering::Relaxed));
        let registration = Arc::new(RouteRegistration {
            id,
            options,
            matcher,
            stages: chain.stage_names(),
            subscriber: subscription.id(),
        });

        tracing::info!(
            route = %id,
            url = %registration.options.url,
            method = %registration.options.method,
            parse_type = %registration.options.parse_type,
            stages = ?registration.stages,
            "Route registered"
        );

        let input: ContextStream = subscription.map(Ok).boxed();
        let stream = RouteStream::new(id, registration.options.url.clone(), chain.apply(input));
        self.lock_routes().push(registration);
        Ok(stream)
    }

    /// Every registration so far, in registration order.
    pub fn routes(&self) -> Vec<Arc<RouteRegistration>> {
        self.lock_routes().clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Stop accepting and drain. Route streams end once the drain is done.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Resolve once the listener has stopped.
    pub async fn closed(&self) {
        self.handle.closed().await;
    }

    fn lock_routes(&self) -> std::sync::MutexGuard<'_, Vec<Arc<RouteRegistration>>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr())
            .field("routes", &self.lock_routes().len())
            .field("bus", &self.bus)
            .finish()
    }
}
