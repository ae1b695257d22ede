//! Event dispatcher (C6): a type-keyed pub/sub with a worker pool,
//! middleware chain, per-handler timeout, retry, and circuit-breaking.
//!
//! Grounded on the teacher's `event.rs` (`tokio::sync::broadcast`
//! pub/sub) generalized from the fixed `DataEvent` enum to a closed
//! `MonitorEvent` enum, with a per-variant handler-list registry
//! instead of the teacher's single broadcast channel, so slow or
//! panicking handlers for one event kind cannot starve another.

use crate::aggregator::BatchEvent;
use crate::error::CircuitBreaker;
use crate::models::{RealtimeMetrics, SessionBlock};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// The closed set of events the pipeline can publish downstream.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    BatchReady(Arc<BatchEvent>),
    SessionRolledOver(Arc<SessionBlock>),
    MetricsUpdated(Arc<RealtimeMetrics>),
    LimitWarning { level: String, percentage: f64 },
    PipelineError(String),
}

impl MonitorEvent {
    fn variant_key(&self) -> &'static str {
        match self {
            MonitorEvent::BatchReady(_) => "batch_ready",
            MonitorEvent::SessionRolledOver(_) => "session_rolled_over",
            MonitorEvent::MetricsUpdated(_) => "metrics_updated",
            MonitorEvent::LimitWarning { .. } => "limit_warning",
            MonitorEvent::PipelineError(_) => "pipeline_error",
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &MonitorEvent) -> Result<(), String>;
}

/// Wraps handler invocation; middlewares compose in registration order
/// as `m1(m2(... handler))`.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn around(&self, event: &MonitorEvent, next: NextHandler<'_>) -> Result<(), String>;
}

pub struct NextHandler<'a> {
    handler: &'a dyn EventHandler,
}

impl<'a> NextHandler<'a> {
    pub async fn call(&self, event: &MonitorEvent) -> Result<(), String> {
        self.handler.handle(event).await
    }
}

/// Logs every dispatch; the dispatcher's default middleware, mirroring
/// the `tracing` calls sprinkled through the teacher's watcher/store.
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn around(&self, event: &MonitorEvent, next: NextHandler<'_>) -> Result<(), String> {
        let key = event.variant_key();
        let result = next.call(event).await;
        if let Err(ref e) = result {
            warn!(event = key, error = %e, "handler failed");
        } else {
            debug!(event = key, "handler dispatched");
        }
        result
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub worker_count: usize,
    pub handler_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub queue_capacity: usize,
    pub queue_high_water_mark: usize,
    pub breaker_failure_threshold: u32,
    pub breaker_recovery_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            worker_count: 8,
            handler_timeout: Duration::from_secs(2),
            max_retries: 1,
            retry_delay: Duration::from_millis(50),
            queue_capacity: 1024,
            queue_high_water_mark: 800,
            breaker_failure_threshold: 5,
            breaker_recovery_timeout: Duration::from_secs(30),
        }
    }
}

struct Registration {
    handlers: Vec<Arc<dyn EventHandler>>,
    breaker: CircuitBreaker,
}

/// Owns the handler registry and drains a bounded queue with a worker
/// pool. `dispatch` never blocks the caller beyond the channel's own
/// backpressure; actual handler execution happens on spawned tasks.
pub struct EventDispatcher {
    config: DispatcherConfig,
    registry: Mutex<HashMap<&'static str, Registration>>,
    middleware: Vec<Arc<dyn Middleware>>,
    tx: mpsc::Sender<MonitorEvent>,
}

impl EventDispatcher {
    pub fn new(config: DispatcherConfig) -> (Arc<Self>, mpsc::Receiver<MonitorEvent>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let dispatcher = Arc::new(Self {
            config,
            registry: Mutex::new(HashMap::new()),
            middleware: vec![Arc::new(LoggingMiddleware)],
            tx,
        });
        (dispatcher, rx)
    }

    pub async fn register(&self, variant_key: &'static str, handler: Arc<dyn EventHandler>) {
        let mut registry = self.registry.lock().await;
        let entry = registry.entry(variant_key).or_insert_with(|| Registration {
            handlers: Vec::new(),
            breaker: CircuitBreaker::new(
                variant_key,
                self.config.breaker_failure_threshold,
                self.config.breaker_recovery_timeout,
            ),
        });
        entry.handlers.push(handler);
    }

    /// Submit an event onto the bounded queue. Returns an error if the
    /// queue is full (this repo's backpressure policy for C6 is
    /// return-error, per the design notes).
    pub async fn submit(&self, event: MonitorEvent) -> Result<(), MonitorEvent> {
        if self.tx.capacity() <= self.config.queue_capacity - self.config.queue_high_water_mark {
            warn!(pending = self.config.queue_capacity - self.tx.capacity(), "dispatcher queue high-water mark exceeded");
        }
        self.tx.clone().try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(event) | mpsc::error::TrySendError::Closed(event) => event,
        })
    }

    /// Drain loop: spawn this once per dispatcher and feed it the
    /// receiver returned from `new`. Runs `worker_count` concurrent
    /// dispatch tasks pulled from the single queue.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<MonitorEvent>) {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.worker_count));
        while let Some(event) = rx.recv().await {
            let permit = semaphore.clone().acquire_owned().await.unwrap();
            let this = self.clone();
            tokio::spawn(async move {
                this.dispatch_one(event).await;
                drop(permit);
            });
        }
    }

    async fn dispatch_one(self: Arc<Self>, event: MonitorEvent) {
        let key = event.variant_key();
        let handlers = {
            let mut registry = self.registry.lock().await;
            let Some(entry) = registry.get_mut(key) else { return };
            if entry.breaker.before_call().is_err() {
                warn!(event = key, "circuit open, skipping handlers");
                return;
            }
            entry.handlers.clone()
        };

        for handler in handlers {
            let result = self.clone().invoke_with_retry_guarded(handler, event.clone()).await;
            let mut registry = self.registry.lock().await;
            if let Some(entry) = registry.get_mut(key) {
                match result {
                    Ok(()) => entry.breaker.on_success(),
                    Err(_) => entry.breaker.on_failure(),
                }
            }
        }
    }

    /// Runs `invoke_with_retry` on its own task so a handler panic
    /// unwinds only that task instead of aborting the worker draining
    /// the dispatch queue. `JoinError::is_panic` becomes a counted
    /// failure reaching the circuit breaker like any other handler error.
    async fn invoke_with_retry_guarded(self: Arc<Self>, handler: Arc<dyn EventHandler>, event: MonitorEvent) -> Result<(), String> {
        let this = self.clone();
        let key = event.variant_key();
        let join = tokio::spawn(async move { this.invoke_with_retry(handler.as_ref(), &event).await });
        match join.await {
            Ok(result) => result,
            Err(join_err) => {
                warn!(event = key, error = %join_err, "handler panicked");
                Err(format!("handler panicked: {join_err}"))
            }
        }
    }

    async fn invoke_with_retry(&self, handler: &dyn EventHandler, event: &MonitorEvent) -> Result<(), String> {
        let mut attempt = 0;
        loop {
            let call = self.invoke_through_middleware(handler, event, 0);
            let outcome = tokio::time::timeout(self.config.handler_timeout, call).await;
            match outcome {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) | Err(_) => {
                    let message = match outcome {
                        Err(_) => "handler timed out".to_string(),
                        Ok(Err(e)) => e,
                        Ok(Ok(())) => unreachable!(),
                    };
                    if attempt >= self.config.max_retries {
                        return Err(message);
                    }
                    attempt += 1;
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    fn invoke_through_middleware<'a>(
        &'a self,
        handler: &'a dyn EventHandler,
        event: &'a MonitorEvent,
        index: usize,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), String>> + Send + 'a>> {
        Box::pin(async move {
            if index >= self.middleware.len() {
                return handler.handle(event).await;
            }
            let next = NextHandler { handler };
            self.middleware[index].around(event, next).await
        })
    }
}
