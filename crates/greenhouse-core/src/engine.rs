//! Per-node sampling engine.
//!
//! [`SensorEngine`] owns one periodic ticker task per scheduled node. Each
//! tick steps the node's simulation by the ticker period and hands the
//! resulting [`SensorUpdate`] to an [`UpdateSink`].
//!
//! # Invariants
//!
//! - At most one ticker is registered per node id. Scheduling an already
//!   scheduled node aborts the old task before the new one is spawned,
//!   under the same lock.
//! - The engine never decides whether a node exists. Tickers look the
//!   runtime up through [`NodeManager`] on every tick and stop themselves
//!   once the node is gone.
//! - A failed step is logged and skipped; the ticker keeps running and
//!   other nodes are unaffected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use greenhouse_types::{NodeId, SensorUpdate};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::nodes::NodeManager;

/// Destination for the updates produced by ticks.
///
/// Delivery must not block: a tick hands its update over and moves on.
pub trait UpdateSink: Send + Sync + 'static {
    /// Accept one update.
    fn deliver(&self, update: SensorUpdate);
}

impl UpdateSink for mpsc::Sender<SensorUpdate> {
    fn deliver(&self, update: SensorUpdate) {
        match self.try_send(update) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(update)) => {
                warn!(node_id = %update.node_id, "Update queue full, dropping sensor update");
            }
            Err(mpsc::error::TrySendError::Closed(update)) => {
                debug!(node_id = %update.node_id, "Update queue closed");
            }
        }
    }
}

#[derive(Debug)]
struct Ticker {
    generation: u64,
    handle: JoinHandle<()>,
}

type TickerMap = Arc<Mutex<HashMap<NodeId, Ticker>>>;

/// Owns one reschedulable ticker per node.
pub struct SensorEngine {
    nodes: Arc<NodeManager>,
    sink: Arc<dyn UpdateSink>,
    tickers: TickerMap,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for SensorEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorEngine")
            .field("scheduled", &self.scheduled_count())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl SensorEngine {
    /// Create an engine reading runtimes from `nodes` and emitting into
    /// `sink`.
    pub fn new(nodes: Arc<NodeManager>, sink: impl UpdateSink) -> Self {
        Self {
            nodes,
            sink: Arc::new(sink),
            tickers: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Start ticking a node at its current sampling interval.
    ///
    /// Replaces any ticker already running for the node. The new ticker
    /// reads the interval when it starts, so the last registered ticker
    /// always runs at the latest stored value. Returns `false` when the
    /// node is unknown or the engine has been closed.
    pub async fn schedule_node(&self, id: &NodeId) -> bool {
        if self.closed.load(Ordering::Acquire) {
            debug!(node_id = %id, "Engine closed, not scheduling");
            return false;
        }
        if !self.nodes.contains(id).await {
            warn!(node_id = %id, "schedule_node: unknown node");
            return false;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut tickers = lock(&self.tickers);
        if let Some(previous) = tickers.remove(id) {
            previous.handle.abort();
        }
        let handle = tokio::spawn(run_ticker(
            id.clone(),
            generation,
            Arc::clone(&self.nodes),
            Arc::clone(&self.sink),
            Arc::clone(&self.tickers),
        ));
        tickers.insert(id.clone(), Ticker { generation, handle });
        drop(tickers);

        info!(node_id = %id, "Node scheduled");
        true
    }

    /// Cancel the node's ticker and start a new one honoring its current
    /// sampling interval.
    pub async fn reschedule_node(&self, id: &NodeId) -> bool {
        self.schedule_node(id).await
    }

    /// Cancel and forget the node's ticker. Safe to call for nodes that
    /// were never scheduled.
    pub fn on_node_removed(&self, id: &NodeId) {
        let removed = lock(&self.tickers).remove(id);
        if let Some(ticker) = removed {
            ticker.handle.abort();
            debug!(node_id = %id, "Ticker cancelled");
        }
    }

    /// Whether a ticker is registered for the node.
    pub fn is_scheduled(&self, id: &NodeId) -> bool {
        lock(&self.tickers).contains_key(id)
    }

    /// Number of registered tickers.
    pub fn scheduled_count(&self) -> usize {
        lock(&self.tickers).len()
    }

    /// Cancel every ticker and refuse further scheduling.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<Ticker> = lock(&self.tickers).drain().map(|(_, t)| t).collect();
        let count = drained.len();
        for ticker in drained {
            ticker.handle.abort();
        }
        info!(cancelled = count, "Sensor engine closed");
    }
}

impl Drop for SensorEngine {
    fn drop(&mut self) {
        for (_, ticker) in lock(&self.tickers).drain() {
            ticker.handle.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn forget_ticker(tickers: &TickerMap, id: &NodeId, generation: u64) {
    let mut map = lock(tickers);
    if map.get(id).is_some_and(|t| t.generation == generation) {
        map.remove(id);
    }
}

async fn run_ticker(
    id: NodeId,
    generation: u64,
    nodes: Arc<NodeManager>,
    sink: Arc<dyn UpdateSink>,
    tickers: TickerMap,
) {
    let Some(runtime) = nodes.runtime(&id).await else {
        forget_ticker(&tickers, &id, generation);
        debug!(node_id = %id, "Node gone before first tick");
        return;
    };
    let period = runtime.lock().await.tick_period();
    let interval_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
    debug!(node_id = %id, interval_ms, "Ticker started");

    let dt_seconds = period.as_secs_f64();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        interval.tick().await;

        let Some(runtime) = nodes.runtime(&id).await else {
            forget_ticker(&tickers, &id, generation);
            debug!(node_id = %id, "Node gone, ticker stopping");
            return;
        };

        let update = {
            let mut runtime = runtime.lock().await;
            match runtime.step(dt_seconds) {
                Ok(()) => Some(SensorUpdate::now(id.clone(), runtime.snapshot())),
                Err(err) => {
                    warn!(node_id = %id, error = %err, "Tick failed");
                    None
                }
            }
        };
        if let Some(update) = update {
            sink.deliver(update);
        }
    }
}
