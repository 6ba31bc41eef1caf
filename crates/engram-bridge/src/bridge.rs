// SPDX-FileCopyrightText: 2026 Engram Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The execution bridge: an owned runtime plus per-thread write ordering.

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use engram_core::{EngramError, ThreadId};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use crate::lane::WriteLanes;

/// Runs asynchronous backend work on behalf of a synchronous caller.
///
/// The blocking entry points ([`run`](Self::run), [`query`](Self::query),
/// [`write`](Self::write), [`clear`](Self::clear)) must be called from
/// outside any tokio runtime; from inside one they return
/// [`EngramError::Internal`]. Callers already on a runtime use the `_async`
/// variants.
///
/// Ordering contract:
/// - writes and clears on one thread execute one at a time, in submission order;
/// - a query waits for every write already submitted on its thread;
/// - operations on distinct threads never wait on each other.
///
/// On timeout a query is aborted, while a write or clear keeps running in the
/// background and keeps its place in the lane. The bridge never retries. If
/// such a detached write fails, the next write on the thread returns that
/// failure; a clear discards it.
pub struct ExecutionBridge {
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    lanes: WriteLanes,
    in_flight: Arc<AtomicUsize>,
    closed: AtomicBool,
}

/// Decrements the in-flight counter when a write finishes or unwinds.
struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ExecutionBridge {
    /// Starts the bridge runtime with `worker_threads` workers (at least one).
    pub fn new(worker_threads: usize) -> Result<Self, EngramError> {
        let worker_threads = worker_threads.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name("engram-bridge")
            .enable_all()
            .build()
            .map_err(|e| EngramError::Internal(format!("failed to start bridge runtime: {e}")))?;
        let handle = runtime.handle().clone();

        info!(worker_threads, "execution bridge started");
        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            handle,
            lanes: WriteLanes::default(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        })
    }

    /// Handle to the bridge runtime, for spawning background work.
    pub fn handle(&self) -> Result<Handle, EngramError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngramError::Internal(
                "execution bridge is shut down".to_string(),
            ));
        }
        Ok(self.handle.clone())
    }

    /// Number of writes or clears currently executing.
    pub fn in_flight_writes(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Runs `future` to completion, or fails with [`EngramError::BridgeTimeout`].
    pub fn run<F, T>(
        &self,
        operation: &'static str,
        future: F,
        timeout: Duration,
    ) -> Result<T, EngramError>
    where
        F: Future<Output = Result<T, EngramError>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.blocking_handle(operation)?;
        handle.block_on(self.run_async(operation, future, timeout))
    }

    /// Async form of [`run`](Self::run). The task is aborted on timeout.
    pub async fn run_async<F, T>(
        &self,
        operation: &'static str,
        future: F,
        timeout: Duration,
    ) -> Result<T, EngramError>
    where
        F: Future<Output = Result<T, EngramError>> + Send + 'static,
        T: Send + 'static,
    {
        let task = self.handle()?.spawn(future);
        await_abortable(operation, task, timeout).await
    }

    /// Runs a read after any in-flight write on the same thread.
    pub fn query<F, T>(
        &self,
        thread_id: &ThreadId,
        future: F,
        timeout: Duration,
    ) -> Result<T, EngramError>
    where
        F: Future<Output = Result<T, EngramError>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.blocking_handle("query")?;
        handle.block_on(self.query_async(thread_id, future, timeout))
    }

    /// Async form of [`query`](Self::query).
    ///
    /// Waiting for prior writes counts against `timeout`.
    pub async fn query_async<F, T>(
        &self,
        thread_id: &ThreadId,
        future: F,
        timeout: Duration,
    ) -> Result<T, EngramError>
    where
        F: Future<Output = Result<T, EngramError>> + Send + 'static,
        T: Send + 'static,
    {
        let pending = self.lanes.drained(thread_id);
        let task = self.handle()?.spawn(async move {
            if let Some(pending) = pending {
                pending.await;
            }
            future.await
        });
        await_abortable("query", task, timeout).await
    }

    /// Persists through the thread's write lane.
    pub fn write<F, T>(
        &self,
        thread_id: &ThreadId,
        future: F,
        timeout: Duration,
    ) -> Result<T, EngramError>
    where
        F: Future<Output = Result<T, EngramError>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.blocking_handle("write")?;
        handle.block_on(self.write_async(thread_id, future, timeout))
    }

    /// Async form of [`write`](Self::write).
    ///
    /// The write takes its place in the lane when first polled.
    pub async fn write_async<F, T>(
        &self,
        thread_id: &ThreadId,
        future: F,
        timeout: Duration,
    ) -> Result<T, EngramError>
    where
        F: Future<Output = Result<T, EngramError>> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_ordered("write", thread_id, future, timeout).await
    }

    /// Runs a backend purge through the thread's write lane.
    ///
    /// The purge starts only after every earlier write on the thread has
    /// finished, so a late write cannot land after the clear.
    pub fn clear<F, T>(
        &self,
        thread_id: &ThreadId,
        future: F,
        timeout: Duration,
    ) -> Result<T, EngramError>
    where
        F: Future<Output = Result<T, EngramError>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.blocking_handle("clear")?;
        handle.block_on(self.submit_ordered("clear", thread_id, future, timeout))
    }

    /// Async form of [`clear`](Self::clear).
    pub async fn clear_async<F, T>(
        &self,
        thread_id: &ThreadId,
        future: F,
        timeout: Duration,
    ) -> Result<T, EngramError>
    where
        F: Future<Output = Result<T, EngramError>> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_ordered("clear", thread_id, future, timeout).await
    }

    /// Stops accepting work and shuts the runtime down, waiting up to `grace`
    /// for running tasks.
    pub fn shutdown(&self, grace: Duration) -> Result<(), EngramError> {
        ensure_blocking_allowed("shutdown")?;
        self.closed.store(true, Ordering::SeqCst);
        let runtime = self
            .runtime
            .lock()
            .map_err(|_| EngramError::Internal("bridge runtime lock poisoned".to_string()))?
            .take();
        if let Some(runtime) = runtime {
            runtime.shutdown_timeout(grace);
            info!("execution bridge shut down");
        }
        Ok(())
    }

    fn blocking_handle(&self, operation: &'static str) -> Result<Handle, EngramError> {
        ensure_blocking_allowed(operation)?;
        self.handle()
    }

    async fn submit_ordered<F, T>(
        &self,
        operation: &'static str,
        thread_id: &ThreadId,
        future: F,
        timeout: Duration,
    ) -> Result<T, EngramError>
    where
        F: Future<Output = Result<T, EngramError>> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.handle()?;
        let earlier = self.lanes.take_failure(thread_id);
        if let (Some(superseded), "clear") = (&earlier, operation) {
            debug!(thread_id = %thread_id, error = %superseded, "clear supersedes failed write");
        }
        let earlier = earlier.filter(|_| operation != "clear");

        let mut ticket = self.lanes.enqueue(thread_id);
        let sink = self.lanes.sink(thread_id);
        let in_flight = Arc::clone(&self.in_flight);
        let thread = thread_id.clone();
        let (tx, mut rx) = oneshot::channel::<Result<T, EngramError>>();

        let _task = handle.spawn(async move {
            if let Some(previous) = ticket.previous.take() {
                previous.await;
            }
            let guard = InFlightGuard::enter(&in_flight);
            debug!(thread_id = %thread, operation, "lane slot acquired");
            let result = future.await;
            drop(guard);
            // The caller has gone away; keep the failure for the next write.
            if let Err(Err(e)) = tx.send(result) {
                warn!(thread_id = %thread, operation, error = %e, "detached operation failed");
                sink.park(e);
            }
            ticket.finish();
        });

        let waited = tokio::time::timeout(timeout, &mut rx).await;
        let outcome = match waited {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EngramError::Internal(format!(
                "bridged operation `{operation}` panicked or was cancelled"
            ))),
            Err(_) => {
                rx.close();
                match rx.try_recv() {
                    // Finished between the deadline and the close.
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            thread_id = %thread_id,
                            operation,
                            timeout_ms = timeout.as_millis() as u64,
                            "bridged operation timed out, continuing in background"
                        );
                        Err(timed_out(operation, timeout))
                    }
                }
            }
        };

        match (earlier, outcome) {
            (None, outcome) => outcome,
            (Some(earlier), Ok(_)) => Err(earlier),
            (Some(earlier), Err(EngramError::BridgeTimeout { .. })) => Err(earlier),
            (Some(earlier), Err(current)) => {
                warn!(thread_id = %thread_id, earlier = %earlier, "earlier write failure superseded");
                Err(current)
            }
        }
    }

    /// Whether a write that outlived its caller has failed and not yet been reported.
    pub fn has_pending_failure(&self, thread_id: &ThreadId) -> bool {
        self.lanes.has_failure(thread_id)
    }

    /// Takes the failure of a write that outlived its caller, if any.
    pub fn take_pending_failure(&self, thread_id: &ThreadId) -> Option<EngramError> {
        self.lanes.take_failure(thread_id)
    }
}

impl Drop for ExecutionBridge {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.runtime.lock() {
            if let Some(runtime) = guard.take() {
                runtime.shutdown_background();
            }
        }
    }
}

fn ensure_blocking_allowed(operation: &'static str) -> Result<(), EngramError> {
    if Handle::try_current().is_ok() {
        return Err(EngramError::Internal(format!(
            "blocking bridge operation `{operation}` called from inside an async context; \
             use the async variant"
        )));
    }
    Ok(())
}

async fn await_abortable<T>(
    operation: &'static str,
    mut task: JoinHandle<Result<T, EngramError>>,
    timeout: Duration,
) -> Result<T, EngramError> {
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(joined) => flatten(operation, joined),
        Err(_) => {
            task.abort();
            warn!(
                operation,
                timeout_ms = timeout.as_millis() as u64,
                "bridged operation timed out, aborted"
            );
            Err(timed_out(operation, timeout))
        }
    }
}

fn flatten<T>(
    operation: &'static str,
    joined: Result<Result<T, EngramError>, JoinError>,
) -> Result<T, EngramError> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Err(EngramError::Internal(format!(
            "bridged operation `{operation}` was cancelled"
        ))),
        Err(e) => Err(EngramError::Internal(format!(
            "bridged operation `{operation}` panicked: {e}"
        ))),
    }
}

fn timed_out(operation: &'static str, duration: Duration) -> EngramError {
    engram_core::metrics::record_bridge_timeout(operation);
    EngramError::BridgeTimeout {
        operation,
        duration,
    }
}
