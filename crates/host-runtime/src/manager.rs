// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The host manager: owns the lifecycle of networks on devices, admits
//! and schedules inference requests against bounded resources, and
//! composes the partitioner, provisioner, and executor with consistent
//! rollback.
//!
//! # Dispatch
//!
//! Admission takes the network refcount and pushes into the bounded
//! priority queue under one exclusive acquisition, then tries to claim a
//! dispatch slot: an atomic fetch-add against `max_active_requests`. Each
//! slot drains the queue one request at a time; when a run completes, its
//! callback re-enqueues the next drain on the executor pool, so fast
//! completions never grow the stack.
//!
//! # Locking
//!
//! The registry lock is acquired before the queue lock, never the other
//! way around. The services lock (devices/provisioner/executor) is only
//! written during construction and profiling rebuilds.

use crate::config::{resolve_backend_specific_opts, CompilationContext, HostConfig};
use crate::executor::{RunCallback, RunId, ThreadPoolExecutor};
use crate::export::{DagExporter, DagOptimizer, JsonDagExporter};
use crate::provisioner::Provisioner;
use crate::queue::{InferQueue, InferRequest};
use crate::registry::NetworkRegistry;
use crate::stats::{keys, InMemoryStats, StatsExporter};
use crate::{FirstErr, HostError};
use backend_core::{Backend, QuantizationMode, PROFILING_BACKEND};
use device_manager::{
    create_device_manager, DeviceConfig, DeviceId, DeviceInfo, DeviceManager,
};
use graph_ir::{
    constant_fold_function, optimize_function, Bindings, ExecutionContext, FoldRecord, Module,
    TraceContext,
};
use parking_lot::RwLock;
use partition_planner::{CompiledDag, Partitioner};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Instant;

/// Injected collaborators of the host manager.
pub struct HostCollaborators {
    pub stats: Arc<dyn StatsExporter>,
    pub dag_exporter: Box<dyn DagExporter>,
    pub dag_optimizer: Option<Box<dyn DagOptimizer>>,
}

impl Default for HostCollaborators {
    fn default() -> Self {
        Self {
            stats: Arc::new(InMemoryStats::new()),
            dag_exporter: Box::new(JsonDagExporter::default()),
            dag_optimizer: None,
        }
    }
}

/// The services rebuilt together during a profiling add.
struct Services {
    devices: BTreeMap<DeviceId, Arc<dyn DeviceManager>>,
    provisioner: Provisioner,
    executor: Arc<ThreadPoolExecutor>,
}

struct HostInner {
    config: HostConfig,
    registry: NetworkRegistry,
    queue: InferQueue,
    services: RwLock<Services>,
    active_requests: AtomicUsize,
    total_requests: AtomicU64,
    stats: Arc<dyn StatsExporter>,
    dag_exporter: Box<dyn DagExporter>,
    dag_optimizer: Option<Box<dyn DagOptimizer>>,
    trace: TraceContext,
    /// Original device configs, kept for profiling rebuilds.
    device_configs: Vec<DeviceConfig>,
}

/// The host-side runtime: network lifecycle, admission, and dispatch.
pub struct HostManager {
    inner: Arc<HostInner>,
}

impl HostManager {
    /// Initializes devices from `device_configs` and brings up the
    /// provisioner and executor.
    pub fn new(
        device_configs: Vec<DeviceConfig>,
        config: HostConfig,
    ) -> Result<Self, HostError> {
        Self::with_collaborators(device_configs, config, HostCollaborators::default())
    }

    /// Like [`HostManager::new`], with explicit collaborators.
    pub fn with_collaborators(
        device_configs: Vec<DeviceConfig>,
        config: HostConfig,
        collaborators: HostCollaborators,
    ) -> Result<Self, HostError> {
        let mut devices = Vec::with_capacity(device_configs.len());
        for (i, mut device_config) in device_configs.into_iter().enumerate() {
            if !device_config.has_name() {
                device_config.name = Some(format!("config{i}"));
            }
            device_config.device_id = i;
            let device = create_device_manager(device_config)?;
            device.init()?;
            devices.push(device);
        }
        Self::from_device_managers(devices, config, collaborators)
    }

    /// Builds a host over already-initialized device managers. This is the
    /// seam embedders and tests use to supply their own devices.
    pub fn from_device_managers(
        devices: Vec<Arc<dyn DeviceManager>>,
        config: HostConfig,
        collaborators: HostCollaborators,
    ) -> Result<Self, HostError> {
        let device_configs: Vec<DeviceConfig> =
            devices.iter().map(|d| d.config().clone()).collect();
        let device_map: BTreeMap<DeviceId, Arc<dyn DeviceManager>> = devices
            .into_iter()
            .map(|d| (d.device_id(), d))
            .collect();

        let provisioner = Provisioner::new(device_map.clone())?;
        let executor = Arc::new(ThreadPoolExecutor::new(
            device_map.clone(),
            config.executor_threads,
        )?);

        let inner = Arc::new(HostInner {
            queue: InferQueue::new(config.max_queue_size),
            config,
            registry: NetworkRegistry::new(),
            services: RwLock::new(Services {
                devices: device_map,
                provisioner,
                executor,
            }),
            active_requests: AtomicUsize::new(0),
            total_requests: AtomicU64::new(0),
            stats: collaborators.stats,
            dag_exporter: collaborators.dag_exporter,
            dag_optimizer: collaborators.dag_optimizer,
            trace: TraceContext::new(),
            device_configs,
        });
        inner.export_memory_counters();
        Ok(Self { inner })
    }

    /// Partitions, compiles, provisions, and publishes every function of
    /// `module`. On failure the registry and processing set are exactly as
    /// they were on entry.
    pub fn add_network(
        &self,
        module: Module,
        cctx: &mut CompilationContext,
    ) -> Result<(), HostError> {
        let mut module = module;
        let names: Vec<String> = module
            .functions()
            .iter()
            .map(|f| f.name().to_string())
            .collect();
        if names.is_empty() {
            return Err(HostError::Runtime("module contains no functions".into()));
        }
        self.inner.registry.reserve(&names)?;

        if let Err(err) = resolve_backend_specific_opts(cctx) {
            return Err(self.fail_add(&names, &module, cctx, err));
        }

        let mut frozen = if cctx
            .optimization_opts
            .delay_and_record_constant_modification
        {
            Some(module.freeze_constants())
        } else {
            None
        };

        let device_info: Vec<DeviceInfo> = {
            let services = self.inner.services.read();
            services.devices.values().map(|d| d.device_info()).collect()
        };

        // Skip the pre-partition pass when per-node backend hints are
        // present: those functions were already optimized and the hints
        // are keyed to their current nodes.
        let skip_optimizations = !cctx.backend_opts.backend_specific_node_info.is_empty();
        if !skip_optimizations {
            for function in module.functions_mut() {
                if let Err(err) = optimize_function(function) {
                    return Err(self.fail_add(&names, &module, cctx, err.into()));
                }
            }
        }

        let p2p = cctx.enable_p2p || self.inner.config.enable_p2p;
        let drt = cctx.enable_drt || self.inner.config.enable_drt;
        let partition_result = {
            let backends = self.inner.services.read().provisioner.backends().clone();
            let mut partitioner = Partitioner::new(&module, device_info, backends);
            partitioner.set_context_count(if p2p || drt {
                self.inner.config.max_active_requests
            } else {
                2
            });
            partitioner.partition()
        };
        let mut dags = match partition_result {
            Ok(dags) => dags,
            Err(err) => return Err(self.fail_add(&names, &module, cctx, err.into())),
        };

        if cctx.precision_config.quant_mode == QuantizationMode::Profile {
            // The provisioner is reset for profiling, so only one network
            // may ever exist on this host.
            if !self.inner.registry.is_empty() {
                let err = HostError::Runtime(
                    "for the quantization profiling flow, there can't be other registered \
                     networks before this one"
                        .into(),
                );
                return Err(self.fail_add(&names, &module, cctx, err));
            }
            if let Err(err) = self.rebuild_for_profiling() {
                return Err(self.fail_add(&names, &module, cctx, err));
            }
        }

        let mut fold = FoldRecord::default();
        if let Some(payloads) = frozen.take() {
            module.unfreeze_constants(payloads);
            if dags.len() != 1 {
                let err = HostError::Runtime(
                    "delayed constant folding expects a single DAG".into(),
                );
                return Err(self.fail_add(&names, &module, cctx, err));
            }
            let fold_result = (|| -> Result<(), HostError> {
                let services = self.inner.services.read();
                for node in dags[0].nodes_mut() {
                    fold.merge(constant_fold_function(&mut node.function, &mut module)?);
                    optimize_function(&mut node.function)?;
                    let backend = services.provisioner.get_backend(&node.backend_name)?;
                    backend.verify(&node.function, &module, cctx.verbose_compile)?;
                }
                Ok(())
            })();
            if let Err(err) = fold_result {
                return Err(self.fail_add(&names, &module, cctx, err));
            }
        }

        if cctx.call_dag_optimizer {
            match &self.inner.dag_optimizer {
                Some(optimizer) => {
                    if let Err(err) = optimizer.optimize(&mut dags, &module) {
                        return Err(self.fail_add(&names, &module, cctx, err));
                    }
                }
                None => tracing::debug!("DAG optimizer requested but none is registered"),
            }
        }

        if cctx.serialize_compiled_dag {
            for dag in &dags {
                if let Err(err) = self.inner.dag_exporter.export(dag, &fold) {
                    return Err(self.fail_add(&names, &module, cctx, err));
                }
            }
        }

        // Drop constant payloads so the shared module stays cheap.
        if !cctx.skip_module_strip {
            module.strip();
        }

        {
            let services = self.inner.services.read();
            let provision_result = services.provisioner.provision(
                &dags,
                &module,
                &cctx.backend_opts.backend_specific_opts,
                cctx.verbose_compile,
            );
            if let Err(err) = provision_result {
                return Err(self.fail_add(&names, &module, cctx, err));
            }
            for dag in &dags {
                services.executor.create_pool(
                    dag.root_name(),
                    self.inner.config.max_active_requests,
                    p2p,
                    drt,
                );
            }
        }

        let module = Arc::new(module);
        for dag in dags {
            let name = dag.root_name().to_string();
            self.inner
                .registry
                .publish(&name, Arc::new(dag), Arc::clone(&module));
        }
        self.inner.registry.cancel_reservation(&names);
        self.inner.export_memory_counters();
        Ok(())
    }

    /// Rollback of a failed add: drop reservations, dump graphs when
    /// requested, refresh counters, and hand the error back.
    fn fail_add(
        &self,
        names: &[String],
        module: &Module,
        cctx: &CompilationContext,
        err: HostError,
    ) -> HostError {
        self.inner.registry.cancel_reservation(names);
        if cctx.dump_final_graph {
            for function in module.functions() {
                let file = format!("final_graph_dbg_err_{}.dot", function.name());
                tracing::info!("dumping final graph due to error to {file}");
                if let Err(write_err) = std::fs::write(&file, function.to_dot()) {
                    tracing::warn!("failed to write '{file}': {write_err}");
                }
            }
        }
        self.inner.export_memory_counters();
        err
    }

    /// Recreates devices on the profiling backend and rebuilds the
    /// provisioner and executor over them.
    ///
    /// Prior device state is discarded on purpose: profiling is a
    /// one-shot compilation flow and the caller has already checked the
    /// registry is empty.
    fn rebuild_for_profiling(&self) -> Result<(), HostError> {
        let mut services = self.inner.services.write();
        services.executor.shutdown();

        let mut devices: BTreeMap<DeviceId, Arc<dyn DeviceManager>> = BTreeMap::new();
        for config in &self.inner.device_configs {
            let mut config = config.clone();
            config.backend_name = PROFILING_BACKEND.to_string();
            let device = create_device_manager(config)?;
            device.init()?;
            devices.insert(device.device_id(), device);
        }
        services.provisioner = Provisioner::new(devices.clone())?;
        services.executor = Arc::new(ThreadPoolExecutor::new(
            devices.clone(),
            self.inner.config.executor_threads,
        )?);
        services.devices = devices;
        tracing::info!("devices rebuilt on '{PROFILING_BACKEND}' for profiling");
        Ok(())
    }

    /// Removes a network.
    ///
    /// Unknown names succeed silently. Returns [`HostError::NetBusy`]
    /// while the network is being added or has outstanding runs.
    pub fn remove_network(&self, name: &str) -> Result<(), HostError> {
        let Some(entry) = self.inner.registry.remove(name)? else {
            return Ok(());
        };
        let mut first = FirstErr::default();
        {
            let services = self.inner.services.read();
            services.executor.free_pool(name);
            for node in entry.dag.nodes() {
                for &device_id in node.device_runtime_infos.keys() {
                    first.set(services.provisioner.evict_function(&node.name, device_id));
                }
                first.set(services.provisioner.remove_function(&node.name));
            }
        }
        self.inner.export_memory_counters();
        first.into_result()
    }

    /// Returns `true` if `name` is published.
    pub fn network_added(&self, name: &str) -> bool {
        self.inner.registry.contains(name)
    }

    /// Returns the compiled DAG of a published network.
    pub fn get_network_dag(&self, name: &str) -> Result<Arc<CompiledDag>, HostError> {
        self.inner
            .registry
            .dag(name)
            .ok_or_else(|| HostError::Runtime(format!("network '{name}' not found")))
    }

    /// Returns the backend registered under `name`.
    pub fn get_backend(&self, name: &str) -> Result<Arc<dyn Backend>, HostError> {
        self.inner.services.read().provisioner.get_backend(name)
    }

    /// Submits a run. Never fails hard: the outcome, including admission
    /// errors, is delivered through `callback` exactly once, and the
    /// returned id identifies the request in either case.
    pub fn run_network(
        &self,
        name: &str,
        context: ExecutionContext,
        callback: RunCallback,
        priority: u64,
    ) -> RunId {
        let run_id = self.inner.total_requests.fetch_add(1, Ordering::SeqCst);

        if self.inner.registry.acquire(name).is_none() {
            callback(
                run_id,
                Err(HostError::NetNotFound(format!("function '{name}' not found"))),
                context,
            );
            return run_id;
        }

        let request = InferRequest {
            network_name: name.to_string(),
            context,
            callback,
            priority,
            request_id: run_id,
            received: Instant::now(),
        };
        if let Err(request) = self.inner.queue.push(request) {
            self.inner.registry.release(name);
            let message = format!(
                "the number of allowed queued requests has been exceeded. queued requests: {} \
                 allowed requests: {}",
                self.inner.queue.len(),
                self.inner.queue.capacity(),
            );
            (request.callback)(
                run_id,
                Err(HostError::RequestRefused(message)),
                request.context,
            );
            return run_id;
        }

        // Claim a dispatch slot if one is free; otherwise some running
        // request's completion will drain the queue.
        let previous = self.inner.active_requests.fetch_add(1, Ordering::SeqCst);
        if previous < self.inner.config.max_active_requests {
            HostInner::dispatch_next(&self.inner);
        } else {
            self.inner.active_requests.fetch_sub(1, Ordering::SeqCst);
        }
        run_id
    }

    /// Runs a network synchronously against the caller's bindings.
    ///
    /// The bindings are taken from `bindings` for the duration of the run
    /// and restored before this returns, on success and failure alike;
    /// the reference never changes ownership.
    pub fn run_network_blocking(
        &self,
        name: &str,
        bindings: &mut Bindings,
    ) -> Result<(), HostError> {
        let context = ExecutionContext::with_bindings(std::mem::take(bindings));
        let (tx, rx) = mpsc::sync_channel(1);
        self.run_network(
            name,
            context,
            Box::new(move |_, result, mut ctx| {
                let _ = tx.send((result, ctx.take_bindings()));
            }),
            0,
        );
        match rx.recv() {
            Ok((result, returned)) => {
                *bindings = returned;
                result
            }
            Err(_) => Err(HostError::Runtime(
                "completion channel closed before the run finished".into(),
            )),
        }
    }

    /// Starts routing device trace events into the host trace context.
    pub fn start_device_trace(&self) -> Result<(), HostError> {
        let services = self.inner.services.read();
        for device in services.devices.values() {
            device.start_trace(&self.inner.trace)?;
        }
        Ok(())
    }

    /// Stops device tracing.
    pub fn stop_device_trace(&self) -> Result<(), HostError> {
        let services = self.inner.services.read();
        for device in services.devices.values() {
            device.stop_trace(&self.inner.trace)?;
        }
        Ok(())
    }

    /// The host trace context.
    pub fn trace_context(&self) -> &TraceContext {
        &self.inner.trace
    }

    /// Number of runs currently holding dispatch slots.
    pub fn active_request_count(&self) -> usize {
        self.inner.active_requests.load(Ordering::Acquire)
    }

    /// Number of requests waiting in the queue.
    pub fn queue_size(&self) -> usize {
        self.inner.queue.len()
    }

    /// Drains all traffic and tears the host down: no new runs are
    /// serviced, in-flight runs complete, queued requests fail through
    /// their callbacks, every network is removed, and devices stop.
    pub fn clear_host(&self) -> Result<(), HostError> {
        let executor = self.inner.services.read().executor.clone();
        executor.shutdown();

        // Fail whatever is still queued; the dispatch chains observe the
        // empty queue and retire their slots.
        while let Some(request) = self.inner.queue.pop() {
            self.inner.registry.release(&request.network_name);
            (request.callback)(
                request.request_id,
                Err(HostError::Runtime("host is shutting down".into())),
                request.context,
            );
        }
        while self.inner.active_requests.load(Ordering::Acquire) != 0 {
            std::thread::yield_now();
        }
        debug_assert_eq!(
            self.inner.active_requests.load(Ordering::Acquire),
            0,
            "all requests should be finished when clearing the host"
        );

        for name in self.inner.registry.names() {
            self.remove_network(&name)?;
        }

        let mut first = FirstErr::default();
        {
            let services = self.inner.services.read();
            for device in services.devices.values() {
                first.set(device.stop());
            }
        }
        self.inner.stats.set_counter(keys::DEVICE_MEMORY_USED, 0);
        self.inner
            .stats
            .set_counter(keys::DEVICE_MEMORY_AVAILABLE, 0);
        self.inner.stats.set_counter(keys::DEVICE_MEMORY_MAX, 0);
        first.into_result()
    }
}

impl Drop for HostManager {
    fn drop(&mut self) {
        if let Err(err) = self.clear_host() {
            tracing::warn!("clearing host on drop failed: {err}");
        }
    }
}

impl HostInner {
    /// Pops and executes the next request for the slot held by the
    /// caller. Retires the slot when the queue is empty.
    fn dispatch_next(inner: &Arc<HostInner>) {
        let Some(request) = inner.queue.pop() else {
            inner.active_requests.fetch_sub(1, Ordering::SeqCst);
            return;
        };

        let InferRequest {
            network_name,
            context,
            callback,
            request_id,
            ..
        } = request;

        let executor = inner.services.read().executor.clone();
        let Some(dag) = inner.registry.dag(&network_name) else {
            // The admission refcount should make this unreachable; report
            // and keep the slot draining.
            inner.registry.release(&network_name);
            callback(
                request_id,
                Err(HostError::Runtime(format!(
                    "network '{network_name}' disappeared while queued"
                ))),
                context,
            );
            let next = Arc::clone(inner);
            executor.spawn(move || HostInner::dispatch_next(&next));
            return;
        };

        let started = Instant::now();
        let completion_inner = Arc::clone(inner);
        executor.run(
            dag,
            context,
            request_id,
            Box::new(move |run_id, result, ctx| {
                completion_inner.registry.release(&network_name);
                completion_inner.update_execution_stats(&network_name, started, &result);
                callback(run_id, result, ctx);

                // Keep the slot filled without recursing on the
                // completion thread.
                let next = Arc::clone(&completion_inner);
                let executor = completion_inner.services.read().executor.clone();
                executor.spawn(move || HostInner::dispatch_next(&next));
            }),
        );
    }

    fn update_execution_stats(
        &self,
        network_name: &str,
        started: Instant,
        result: &Result<(), HostError>,
    ) {
        let duration_us = started.elapsed().as_micros() as u64;
        for scope in [network_name, "global"] {
            self.stats
                .add_time_series_value(&keys::execution_duration(scope), duration_us);
            self.stats.increment_counter(&keys::requests_processed(scope));
            if result.is_ok() {
                self.stats.increment_counter(&keys::requests_succeeded(scope));
            } else {
                self.stats.increment_counter(&keys::requests_failed(scope));
            }
        }
    }

    fn export_memory_counters(&self) {
        let (mut max, mut available) = (0u64, 0u64);
        {
            let services = self.services.read();
            for device in services.devices.values() {
                max += device.maximum_memory();
                available += device.available_memory();
            }
        }
        self.stats.set_counter(keys::DEVICE_MEMORY_MAX, max);
        self.stats
            .set_counter(keys::DEVICE_MEMORY_AVAILABLE, available);
        self.stats
            .set_counter(keys::DEVICE_MEMORY_USED, max - available);
    }
}
