// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The thread-pool executor.
//!
//! Runs compiled DAGs on a dedicated worker pool. Each network owns a
//! pool of reusable execution states sized to the host's concurrency
//! bound, so a run never allocates staging structures on the hot path.
//! Completion callbacks fire on worker threads; callers must not assume
//! submission-thread affinity.

use crate::HostError;
use device_manager::{DeviceId, DeviceManager};
use graph_ir::{Bindings, ExecutionContext};
use parking_lot::{Condvar, Mutex};
use partition_planner::CompiledDag;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Identifies one accepted run.
pub type RunId = u64;

/// Completion callback: exactly one invocation per accepted run, with the
/// context handed back to the caller.
pub type RunCallback = Box<dyn FnOnce(RunId, Result<(), HostError>, ExecutionContext) + Send>;

/// Reusable per-run staging state.
///
/// Runs execute against the state's bindings so device-to-device
/// intermediates never allocate fresh maps; the state returns to its pool
/// cleared.
#[derive(Debug, Default)]
struct ExecutionState {
    scratch: Bindings,
}

struct StatePool {
    available: Vec<ExecutionState>,
    total: usize,
    p2p: bool,
    drt: bool,
}

/// State shared between the executor handle and its worker tasks.
struct ExecutorShared {
    devices: BTreeMap<DeviceId, Arc<dyn DeviceManager>>,
    pools: Mutex<HashMap<String, StatePool>>,
    inflight: Mutex<usize>,
    drained: Condvar,
    shutting_down: AtomicBool,
}

impl ExecutorShared {
    /// Walks the DAG in topological order, running each node on its
    /// device against the staged bindings.
    fn run_nodes(
        &self,
        dag: &CompiledDag,
        context: &ExecutionContext,
        state: &mut ExecutionState,
    ) -> Result<(), HostError> {
        for idx in dag.topo_order() {
            let node = &dag.nodes()[idx];
            let device_id = node.primary_device().ok_or_else(|| {
                HostError::Runtime(format!("node '{}' has no device assignment", node.name))
            })?;
            let device = self.devices.get(&device_id).ok_or_else(|| {
                HostError::Runtime(format!(
                    "node '{}' is assigned to unknown device {device_id}",
                    node.name
                ))
            })?;
            if let Some(trace) = context.trace() {
                trace.record(format!("run {}", node.name), device.backend_name().to_string());
            }
            device.run_function(&node.name, &mut state.scratch)?;
        }
        Ok(())
    }

    fn retire_run(&self) {
        let mut inflight = self.inflight.lock();
        *inflight -= 1;
        if *inflight == 0 {
            self.drained.notify_all();
        }
    }
}

/// Executes compiled DAGs on an owned worker pool.
pub struct ThreadPoolExecutor {
    pool: rayon::ThreadPool,
    shared: Arc<ExecutorShared>,
}

impl ThreadPoolExecutor {
    /// Creates an executor over `devices` with `threads` workers.
    pub fn new(
        devices: BTreeMap<DeviceId, Arc<dyn DeviceManager>>,
        threads: usize,
    ) -> Result<Self, HostError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("executor-{i}"))
            .build()
            .map_err(|e| HostError::Runtime(format!("cannot build executor pool: {e}")))?;
        Ok(Self {
            pool,
            shared: Arc::new(ExecutorShared {
                devices,
                pools: Mutex::new(HashMap::new()),
                inflight: Mutex::new(0),
                drained: Condvar::new(),
                shutting_down: AtomicBool::new(false),
            }),
        })
    }

    /// Creates the execution-state pool for one network.
    ///
    /// `size` must cover the host's concurrency bound: a run claims one
    /// state for its whole duration.
    pub fn create_pool(&self, root_name: &str, size: usize, p2p: bool, drt: bool) {
        let states = (0..size.max(1)).map(|_| ExecutionState::default()).collect();
        self.shared.pools.lock().insert(
            root_name.to_string(),
            StatePool {
                available: states,
                total: size.max(1),
                p2p,
                drt,
            },
        );
        tracing::debug!(
            "created execution-state pool for '{root_name}' (size {size}, p2p={p2p}, drt={drt})"
        );
    }

    /// Frees a network's execution-state pool.
    pub fn free_pool(&self, root_name: &str) {
        if self.shared.pools.lock().remove(root_name).is_some() {
            tracing::debug!("freed execution-state pool for '{root_name}'");
        }
    }

    /// Enqueues a task on the worker pool.
    pub fn spawn(&self, task: impl FnOnce() + Send + 'static) {
        self.pool.spawn(task);
    }

    /// Number of runs currently executing.
    pub fn inflight(&self) -> usize {
        *self.shared.inflight.lock()
    }

    /// Runs `dag` against `context`, invoking `done` exactly once.
    ///
    /// Rejected runs (shutdown, missing state pool) report through `done`
    /// on the calling thread.
    pub fn run(
        &self,
        dag: Arc<CompiledDag>,
        context: ExecutionContext,
        run_id: RunId,
        done: RunCallback,
    ) {
        if self.shared.shutting_down.load(Ordering::Acquire) {
            done(
                run_id,
                Err(HostError::Runtime("executor is shut down".into())),
                context,
            );
            return;
        }
        let state = self
            .shared
            .pools
            .lock()
            .get_mut(dag.root_name())
            .and_then(|pool| pool.available.pop());
        let Some(mut state) = state else {
            done(
                run_id,
                Err(HostError::Runtime(format!(
                    "no execution state available for '{}'",
                    dag.root_name()
                ))),
                context,
            );
            return;
        };

        *self.shared.inflight.lock() += 1;
        let shared = Arc::clone(&self.shared);
        self.pool.spawn(move || {
            let mut context = context;

            // Stage the caller's bindings into the state, run, and hand
            // everything (intermediates included) back.
            std::mem::swap(context.bindings_mut(), &mut state.scratch);
            let result = shared.run_nodes(&dag, &context, &mut state);
            std::mem::swap(context.bindings_mut(), &mut state.scratch);

            state.scratch.clear();
            if let Some(pool) = shared.pools.lock().get_mut(dag.root_name()) {
                pool.available.push(state);
            }
            done(run_id, result, context);
            shared.retire_run();
        });
    }

    /// Stops accepting runs and blocks until every in-flight run has
    /// completed and reported.
    pub fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::Release);
        let mut inflight = self.shared.inflight.lock();
        while *inflight > 0 {
            self.shared.drained.wait(&mut inflight);
        }
        tracing::info!("executor drained and shut down");
    }

    /// Returns a pool's recorded P2P/DRT flags, if the pool exists.
    pub fn pool_flags(&self, root_name: &str) -> Option<(bool, bool)> {
        self.shared.pools.lock().get(root_name).map(|p| (p.p2p, p.drt))
    }

    /// Returns (available, total) states of a pool.
    pub fn pool_occupancy(&self, root_name: &str) -> Option<(usize, usize)> {
        self.shared
            .pools
            .lock()
            .get(root_name)
            .map(|p| (p.available.len(), p.total))
    }
}
