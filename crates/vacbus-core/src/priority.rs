// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Execute/query scheduling per device.
//!
//! The [`PriorityManager`] sits above the adapters and distinguishes two
//! classes of work:
//!
//! - **Execute**: control actions. Always run, served before any query
//!   of the same device, and wait as long as needed for the port gate.
//! - **Query**: status reads. Rejected outright while an execute is
//!   outstanding for the device, and give up when they cannot start
//!   (device queue plus port gate) within a short budget. A rejected
//!   or abandoned query yields `T::default()`.
//!
//! Each device gets one dispatcher task that runs its jobs one at a
//! time. Devices on the same port share a gate (`tokio::sync::Mutex`),
//! so control actions and status reads of different devices never
//! interleave on one line.
//!
//! While any execute is outstanding anywhere, a registered
//! [`PollerControl`] is paused, and resumed once none remain.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify};
use tokio::time::Instant;

use crate::adapter::CommunicationAdapter;
use crate::command::priority;
use crate::error::{BusError, BusResult};

// =============================================================================
// PollerControl
// =============================================================================

/// Background poller that yields the bus to control actions.
#[async_trait]
pub trait PollerControl: Send + Sync {
    /// Stops issuing status reads.
    async fn pause(&self);

    /// Resumes issuing status reads.
    async fn resume(&self);
}

// =============================================================================
// PriorityConfig
// =============================================================================

/// Priority manager settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityConfig {
    /// How long a query waits for the port gate before giving up.
    #[serde(with = "humantime_serde")]
    pub query_lock_budget: Duration,
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            query_lock_budget: Duration::from_millis(50),
        }
    }
}

// =============================================================================
// Internal Types
// =============================================================================

/// Queue depths of one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingCounts {
    /// Execute jobs queued or running.
    pub execute: usize,
    /// Query jobs queued.
    pub query: usize,
}

type Job = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Next unit of work for a dispatcher.
enum Scheduled {
    Execute(Job),
    /// Query that must hold the port gate before `deadline`.
    Query { deadline: Instant, job: Job },
}

#[derive(Default)]
struct Queues {
    executes: Vec<Job>,
    queries: VecDeque<(Instant, Job)>,
    /// Executes queued or running.
    execute_outstanding: usize,
    closed: bool,
}

impl Queues {
    fn next(&mut self) -> Option<Scheduled> {
        if !self.executes.is_empty() {
            return Some(Scheduled::Execute(self.executes.remove(0)));
        }
        self.queries
            .pop_front()
            .map(|(deadline, job)| Scheduled::Query { deadline, job })
    }
}

struct DevicePool {
    device: String,
    queues: Mutex<Queues>,
    wake: Notify,
    gate: Arc<AsyncMutex<()>>,
}

struct Inner {
    config: PriorityConfig,
    pools: DashMap<String, Arc<DevicePool>>,
    gates: DashMap<String, Arc<AsyncMutex<()>>>,
    device_ports: DashMap<String, String>,
    executes_outstanding: AtomicUsize,
    poller: RwLock<Option<Arc<dyn PollerControl>>>,
    poller_paused: AsyncMutex<bool>,
    shutdown: AtomicBool,
}

impl Inner {
    fn gate_for(&self, device: &str) -> Arc<AsyncMutex<()>> {
        let key = self
            .device_ports
            .get(device)
            .map(|port| port.value().clone())
            .unwrap_or_else(|| device.to_string());
        Arc::clone(
            self.gates
                .entry(key)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .value(),
        )
    }

    /// Brings the poller in line with the outstanding execute count.
    async fn sync_poller(&self) {
        let mut paused = self.poller_paused.lock().await;
        let want_paused = self.executes_outstanding.load(Ordering::Acquire) > 0;
        if want_paused == *paused {
            return;
        }

        let poller = self.poller.read().clone();
        if let Some(poller) = poller {
            if want_paused {
                tracing::debug!("Pausing background poller");
                poller.pause().await;
            } else {
                tracing::debug!("Resuming background poller");
                poller.resume().await;
            }
        }
        *paused = want_paused;
    }

    fn finish_execute(&self, pool: &DevicePool) {
        {
            let mut queues = pool.queues.lock();
            queues.execute_outstanding = queues.execute_outstanding.saturating_sub(1);
        }
        self.executes_outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

// =============================================================================
// PriorityManager
// =============================================================================

/// Per-device execute/query scheduler.
///
/// Must be used from within a Tokio runtime; each device's dispatcher is
/// spawned on first use.
pub struct PriorityManager {
    inner: Arc<Inner>,
}

impl PriorityManager {
    /// Creates a manager.
    pub fn new(config: PriorityConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                pools: DashMap::new(),
                gates: DashMap::new(),
                device_ports: DashMap::new(),
                executes_outstanding: AtomicUsize::new(0),
                poller: RwLock::new(None),
                poller_paused: AsyncMutex::new(false),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Registers the poller to pause while control actions are pending.
    pub fn set_poller(&self, poller: Arc<dyn PollerControl>) {
        *self.inner.poller.write() = Some(poller);
    }

    /// Declares that `device` sits on `port`.
    ///
    /// Devices sharing a port share one gate. Must be called before the
    /// device's first job; unregistered devices get a gate of their own.
    pub fn register_device(&self, device: &str, port: &str) {
        if self.inner.pools.contains_key(device) {
            tracing::warn!(device = %device, port = %port, "Device already active; gate unchanged");
            return;
        }
        self.inner
            .device_ports
            .insert(device.to_string(), port.to_string());
    }

    /// Runs `operation` as a control action for `device`.
    ///
    /// # Errors
    ///
    /// [`BusError::Shutdown`] if the manager shut down before the job ran.
    pub async fn execute<T, F, Fut>(&self, device: &str, operation: F) -> BusResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        if self.is_shutdown() {
            return Err(BusError::Shutdown);
        }

        let pool = self.pool(device);
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            Box::pin(async move {
                let _ = tx.send(operation().await);
            })
        });

        {
            let mut queues = pool.queues.lock();
            if queues.closed {
                return Err(BusError::Shutdown);
            }
            queues.execute_outstanding += 1;
            queues.executes.push(job);
        }
        self.inner.executes_outstanding.fetch_add(1, Ordering::AcqRel);
        pool.wake.notify_one();
        tracing::debug!(device = %device, "Execute queued");

        self.inner.sync_poller().await;

        rx.await.map_err(|_| BusError::Shutdown)
    }

    /// Runs `operation` as a status read for `device`.
    ///
    /// Returns `T::default()` when an execute is outstanding for the
    /// device, when the query cannot start within the query budget
    /// (counted from this call, covering both the device queue and the
    /// port gate), or after shutdown.
    pub async fn query<T, F, Fut>(&self, device: &str, operation: F) -> T
    where
        T: Default + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        if self.is_shutdown() {
            return T::default();
        }

        let pool = self.pool(device);
        let deadline = Instant::now() + self.inner.config.query_lock_budget;
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (tx, rx) = oneshot::channel();

        {
            let mut queues = pool.queues.lock();
            if queues.closed {
                return T::default();
            }
            if queues.execute_outstanding > 0 {
                tracing::debug!(device = %device, "Query rejected; execute pending");
                return T::default();
            }
            let job: Job = Box::new(move || {
                Box::pin(async move {
                    // The caller stopped waiting; skip the transaction.
                    if started_tx.send(()).is_err() {
                        return;
                    }
                    let _ = tx.send(operation().await);
                })
            });
            queues.queries.push_back((deadline, job));
        }
        pool.wake.notify_one();

        match tokio::time::timeout_at(deadline, started_rx).await {
            Ok(Ok(())) => rx.await.unwrap_or_default(),
            Ok(Err(_)) => T::default(),
            Err(_) => {
                tracing::debug!(device = %device, "Query abandoned; device busy");
                T::default()
            }
        }
    }

    /// Sends `request` through `adapter` as a control action.
    pub async fn execute_command(
        &self,
        device: &str,
        adapter: Arc<CommunicationAdapter>,
        request: Vec<u8>,
        expected_len: usize,
    ) -> BusResult<Option<Vec<u8>>> {
        self.execute(device, move || async move {
            adapter
                .send_priority_async(&request, expected_len, priority::CONTROL)
                .await
        })
        .await?
    }

    /// Sends `request` through `adapter` as a status read.
    ///
    /// Bus errors are logged and reported as no response.
    pub async fn query_command(
        &self,
        device: &str,
        adapter: Arc<CommunicationAdapter>,
        request: Vec<u8>,
        expected_len: usize,
    ) -> Option<Vec<u8>> {
        let name = device.to_string();
        self.query(device, move || async move {
            match adapter
                .send_priority_async(&request, expected_len, priority::BACKGROUND)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(device = %name, error = %e, "Query failed");
                    None
                }
            }
        })
        .await
    }

    /// Queue depths of `device`.
    pub fn pending(&self, device: &str) -> PendingCounts {
        self.inner
            .pools
            .get(device)
            .map(|pool| {
                let queues = pool.queues.lock();
                PendingCounts {
                    execute: queues.execute_outstanding,
                    query: queues.queries.len(),
                }
            })
            .unwrap_or_default()
    }

    /// Number of executes outstanding across all devices.
    pub fn executes_outstanding(&self) -> usize {
        self.inner.executes_outstanding.load(Ordering::Acquire)
    }

    /// Returns `true` after [`shutdown`](Self::shutdown).
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Stops all dispatchers. Queued executes fail with
    /// [`BusError::Shutdown`], queued queries yield their default.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        for entry in self.inner.pools.iter() {
            entry.value().queues.lock().closed = true;
            entry.value().wake.notify_one();
        }
        tracing::info!(devices = self.inner.pools.len(), "Priority manager shut down");
    }

    fn pool(&self, device: &str) -> Arc<DevicePool> {
        if let Some(pool) = self.inner.pools.get(device) {
            return Arc::clone(pool.value());
        }

        let entry = self.inner.pools.entry(device.to_string()).or_insert_with(|| {
            let pool = Arc::new(DevicePool {
                device: device.to_string(),
                queues: Mutex::new(Queues::default()),
                wake: Notify::new(),
                gate: self.inner.gate_for(device),
            });
            tokio::spawn(dispatch(Arc::clone(&self.inner), Arc::clone(&pool)));
            tracing::debug!(device = %device, "Started dispatcher");
            pool
        });
        Arc::clone(entry.value())
    }
}

impl Default for PriorityManager {
    fn default() -> Self {
        Self::new(PriorityConfig::default())
    }
}

impl Drop for PriorityManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for PriorityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityManager")
            .field("config", &self.inner.config)
            .field("devices", &self.inner.pools.len())
            .field("executes_outstanding", &self.executes_outstanding())
            .finish()
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

async fn dispatch(inner: Arc<Inner>, pool: Arc<DevicePool>) {
    loop {
        let next = {
            let mut queues = pool.queues.lock();
            if queues.closed {
                let dropped = queues.executes.len();
                queues.executes.clear();
                queues.queries.clear();
                queues.execute_outstanding = queues.execute_outstanding.saturating_sub(dropped);
                inner.executes_outstanding.fetch_sub(dropped, Ordering::AcqRel);
                None
            } else {
                Some(queues.next())
            }
        };

        let work = match next {
            None => break,
            Some(None) => {
                pool.wake.notified().await;
                continue;
            }
            Some(Some(work)) => work,
        };

        match work {
            Scheduled::Execute(job) => {
                {
                    let _gate = pool.gate.lock().await;
                    job().await;
                }
                inner.finish_execute(&pool);
                inner.sync_poller().await;
            }
            Scheduled::Query { deadline, job } => {
                if Instant::now() >= deadline {
                    tracing::debug!(device = %pool.device, "Query expired in queue");
                    continue;
                }
                match tokio::time::timeout_at(deadline, pool.gate.lock()).await {
                    Ok(_gate) => job().await,
                    Err(_) => {
                        tracing::debug!(device = %pool.device, "Query abandoned; port busy");
                    }
                }
            }
        }
    }

    inner.sync_poller().await;
    tracing::debug!(device = %pool.device, "Dispatcher stopped");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Default)]
    struct CountingPoller {
        pauses: AtomicU32,
        resumes: AtomicU32,
    }

    #[async_trait]
    impl PollerControl for CountingPoller {
        async fn pause(&self) {
            self.pauses.fetch_add(1, Ordering::SeqCst);
        }
        async fn resume(&self) {
            self.resumes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_execute_returns_value() {
        let manager = PriorityManager::default();
        let value = manager.execute("Pump", || async { 42u32 }).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(manager.executes_outstanding(), 0);
    }

    #[tokio::test]
    async fn test_query_rejected_while_execute_pending() {
        let manager = Arc::new(PriorityManager::default());
        let release = Arc::new(Notify::new());

        let blocker = {
            let manager = Arc::clone(&manager);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                manager
                    .execute("Pump", move || async move {
                        release.notified().await;
                        1u8
                    })
                    .await
            })
        };

        while manager.pending("Pump").execute == 0 {
            tokio::task::yield_now().await;
        }

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let result: Option<u8> = manager
            .query("Pump", move || async move {
                flag.store(true, Ordering::SeqCst);
                Some(7)
            })
            .await;

        assert_eq!(result, None);
        assert!(!ran.load(Ordering::SeqCst));

        release.notify_one();
        assert_eq!(blocker.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_executes_served_before_queries() {
        let manager = Arc::new(PriorityManager::new(PriorityConfig {
            query_lock_budget: Duration::from_secs(1),
        }));
        let order = Arc::new(TokioMutex::new(Vec::new()));
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        // A running query keeps the dispatcher busy while work queues up.
        let first = {
            let manager = Arc::clone(&manager);
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                manager
                    .query("A", move || async move {
                        started.notify_one();
                        release.notified().await;
                        Some(())
                    })
                    .await
            })
        };
        started.notified().await;

        let query = {
            let manager = Arc::clone(&manager);
            let order = Arc::clone(&order);
            tokio::spawn(async move {
                manager
                    .query("A", move || async move {
                        order.lock().await.push("query");
                        Some(())
                    })
                    .await
            })
        };
        while manager.pending("A").query == 0 {
            tokio::task::yield_now().await;
        }

        let execute = {
            let manager = Arc::clone(&manager);
            let order = Arc::clone(&order);
            tokio::spawn(async move {
                manager
                    .execute("A", move || async move {
                        order.lock().await.push("execute");
                    })
                    .await
            })
        };
        while manager.pending("A").execute == 0 {
            tokio::task::yield_now().await;
        }

        release.notify_one();
        assert_eq!(first.await.unwrap(), Some(()));
        execute.await.unwrap().unwrap();
        assert_eq!(query.await.unwrap(), Some(()));

        assert_eq!(*order.lock().await, vec!["execute", "query"]);
    }

    #[tokio::test]
    async fn test_query_gives_up_when_gate_busy() {
        let manager = Arc::new(PriorityManager::new(PriorityConfig {
            query_lock_budget: Duration::from_millis(20),
        }));
        manager.register_device("Ctrl", "COM7");
        manager.register_device("Io", "COM7");
        let release = Arc::new(Notify::new());

        let holder = {
            let manager = Arc::clone(&manager);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                manager
                    .execute("Ctrl", move || async move {
                        release.notified().await;
                    })
                    .await
            })
        };
        while manager.pending("Ctrl").execute == 0 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;

        let result: Option<u8> = manager.query("Io", || async { Some(1) }).await;
        assert_eq!(result, None);

        release.notify_one();
        holder.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_query_gives_up_behind_running_query() {
        let manager = Arc::new(PriorityManager::new(PriorityConfig {
            query_lock_budget: Duration::from_millis(50),
        }));
        let started = Arc::new(Notify::new());

        let first = {
            let manager = Arc::clone(&manager);
            let started = Arc::clone(&started);
            tokio::spawn(async move {
                manager
                    .query("Pump", move || async move {
                        started.notify_one();
                        tokio::time::sleep(Duration::from_millis(400)).await;
                        Some(1u8)
                    })
                    .await
            })
        };
        started.notified().await;

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let begin = std::time::Instant::now();
        let second: Option<u8> = manager
            .query("Pump", move || async move {
                flag.store(true, Ordering::SeqCst);
                Some(2)
            })
            .await;

        assert_eq!(second, None);
        assert!(begin.elapsed() < Duration::from_millis(300), "{:?}", begin.elapsed());
        assert_eq!(first.await.unwrap(), Some(1));

        // Queued after the expired query, so it is handled by now.
        let third: Option<u8> = manager.query("Pump", || async { Some(3) }).await;
        assert_eq!(third, Some(3));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_poller_paused_and_resumed() {
        let manager = PriorityManager::default();
        let poller = Arc::new(CountingPoller::default());
        manager.set_poller(poller.clone());

        manager.execute("Pump", || async {}).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(poller.pauses.load(Ordering::SeqCst), 1);
        assert_eq!(poller.resumes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown() {
        let manager = PriorityManager::default();
        manager.execute("Pump", || async {}).await.unwrap();
        manager.shutdown();

        assert!(matches!(
            manager.execute("Pump", || async {}).await,
            Err(BusError::Shutdown)
        ));
        let value: u32 = manager.query("Pump", || async { 5 }).await;
        assert_eq!(value, 0);
    }
}
