// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: the full host lifecycle end-to-end.
//!
//! These tests exercise add → admit → dispatch → complete → remove across
//! all five crates, using latched device managers to hold runs in flight
//! where a scenario depends on it.

use backend_core::{CompiledFunction, QuantizationMode};
use device_manager::{
    create_device_manager, CpuDeviceManager, DeviceConfig, DeviceError, DeviceInfo, DeviceManager,
};
use graph_ir::{
    Bindings, ElemKind, ExecutionContext, Function, Module, NodeDef, NodeInfo, OpKind, Shape,
    Tensor, TensorTy, TraceContext,
};
use host_runtime::{
    CompilationContext, HostCollaborators, HostConfig, HostError, HostManager, InMemoryStats,
    JsonDagExporter, keys,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::time::Duration;

// ── Helpers ────────────────────────────────────────────────────

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

fn fty(n: usize) -> TensorTy {
    TensorTy::new(ElemKind::Float, Shape::vector(n))
}

/// A module whose every function is `in -> tanh -> save out`.
fn tanh_module(names: &[&str]) -> Module {
    let mut module = Module::new();
    for name in names {
        let mut f = Function::new(*name);
        f.add_input("in", fty(8));
        f.add_node(NodeDef::new(
            "t",
            OpKind::Tanh,
            vec!["in".into()],
            vec![fty(8)],
            vec![fty(8)],
        ));
        f.add_node(NodeDef::new(
            "out",
            OpKind::Save,
            vec!["t".into()],
            vec![fty(8)],
            vec![fty(8)],
        ));
        f.add_output("out", fty(8));
        module.add_function(f).unwrap();
    }
    module
}

/// A pure passthrough module: `in -> save out`.
fn passthrough_module(name: &str) -> Module {
    let mut module = Module::new();
    let mut f = Function::new(name);
    f.add_input("in", fty(8));
    f.add_node(NodeDef::new(
        "out",
        OpKind::Save,
        vec!["in".into()],
        vec![fty(8)],
        vec![fty(8)],
    ));
    f.add_output("out", fty(8));
    module.add_function(f).unwrap();
    module
}

fn input_context() -> ExecutionContext {
    let mut ctx = ExecutionContext::new();
    let mut tensor = Tensor::zeroed(fty(8));
    tensor.as_bytes_mut()[0] = 0x2a;
    ctx.bindings_mut().insert("in", tensor);
    ctx
}

fn host(max_active: usize, max_queue: usize) -> HostManager {
    HostManager::new(
        vec![DeviceConfig::new("cpu", 64 << 20)],
        HostConfig {
            executor_threads: 3,
            max_active_requests: max_active,
            max_queue_size: max_queue,
            ..Default::default()
        },
    )
    .unwrap()
}

// ── Latched device: holds every run until released ─────────────

struct Latch {
    released: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            released: Mutex::new(false),
            cv: Condvar::new(),
        })
    }

    fn release(&self) {
        *self.released.lock().unwrap() = true;
        self.cv.notify_all();
    }

    fn wait(&self) {
        let mut released = self.released.lock().unwrap();
        while !*released {
            released = self.cv.wait(released).unwrap();
        }
    }
}

/// A CPU device whose runs block on a latch.
struct LatchedDevice {
    inner: CpuDeviceManager,
    latch: Arc<Latch>,
}

impl LatchedDevice {
    fn create(latch: Arc<Latch>) -> Arc<dyn DeviceManager> {
        let inner = CpuDeviceManager::new(DeviceConfig::new("cpu", 64 << 20).with_name("latched0"));
        inner.init().unwrap();
        Arc::new(Self { inner, latch })
    }
}

impl DeviceManager for LatchedDevice {
    fn init(&self) -> Result<(), DeviceError> {
        self.inner.init()
    }
    fn stop(&self) -> Result<(), DeviceError> {
        self.inner.stop()
    }
    fn config(&self) -> &DeviceConfig {
        self.inner.config()
    }
    fn maximum_memory(&self) -> u64 {
        self.inner.maximum_memory()
    }
    fn available_memory(&self) -> u64 {
        self.inner.available_memory()
    }
    fn device_info(&self) -> DeviceInfo {
        self.inner.device_info()
    }
    fn load_function(
        &self,
        name: &str,
        artifact: Arc<dyn CompiledFunction>,
    ) -> Result<(), DeviceError> {
        self.inner.load_function(name, artifact)
    }
    fn evict_function(&self, name: &str) -> Result<(), DeviceError> {
        self.inner.evict_function(name)
    }
    fn run_function(&self, name: &str, bindings: &mut Bindings) -> Result<(), DeviceError> {
        self.latch.wait();
        self.inner.run_function(name, bindings)
    }
    fn start_trace(&self, trace: &TraceContext) -> Result<(), DeviceError> {
        self.inner.start_trace(trace)
    }
    fn stop_trace(&self, trace: &TraceContext) -> Result<(), DeviceError> {
        self.inner.stop_trace(trace)
    }
}

fn latched_host(max_active: usize, max_queue: usize) -> (HostManager, Arc<Latch>) {
    let latch = Latch::new();
    let host = HostManager::from_device_managers(
        vec![LatchedDevice::create(Arc::clone(&latch))],
        HostConfig {
            executor_threads: 3,
            max_active_requests: max_active,
            max_queue_size: max_queue,
            ..Default::default()
        },
        HostCollaborators::default(),
    )
    .unwrap();
    (host, latch)
}

// ── S1: happy path ─────────────────────────────────────────────

#[test]
fn test_happy_path() {
    let host = host(4, 16);
    host.add_network(passthrough_module("f"), &mut CompilationContext::default())
        .unwrap();
    assert!(host.network_added("f"));
    assert_eq!(host.get_network_dag("f").unwrap().root_name(), "f");

    let (tx, rx) = mpsc::sync_channel(1);
    let id = host.run_network(
        "f",
        input_context(),
        Box::new(move |run_id, result, ctx| {
            let out = ctx.bindings().get("out").map(|t| t.as_bytes().to_vec());
            tx.send((run_id, result.is_ok(), out)).unwrap();
        }),
        0,
    );

    let (run_id, ok, out) = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(run_id, id);
    assert!(ok);
    // Save forwards the input straight to the output tensor.
    assert_eq!(out.unwrap()[0], 0x2a);

    host.remove_network("f").unwrap();
    assert!(!host.network_added("f"));
    assert!(host.get_network_dag("f").is_err());
}

#[test]
fn test_run_network_blocking_roundtrip() {
    let host = host(2, 8);
    host.add_network(passthrough_module("f"), &mut CompilationContext::default())
        .unwrap();

    let mut bindings = Bindings::new();
    let mut tensor = Tensor::zeroed(fty(8));
    tensor.as_bytes_mut()[3] = 9;
    bindings.insert("in", tensor);

    host.run_network_blocking("f", &mut bindings).unwrap();
    // Caller keeps its bindings: input preserved, output added.
    assert_eq!(bindings.get("in").unwrap().as_bytes()[3], 9);
    assert_eq!(bindings.get("out").unwrap().as_bytes()[3], 9);
}

#[test]
fn test_blocking_run_unknown_network() {
    let host = host(2, 8);
    let mut bindings = Bindings::new();
    bindings.insert("in", Tensor::zeroed(fty(8)));
    let err = host.run_network_blocking("ghost", &mut bindings).unwrap_err();
    assert!(matches!(err, HostError::NetNotFound(_)));
    // Bindings come back even on failure.
    assert!(bindings.contains("in"));
}

#[test]
fn test_run_unknown_network_calls_back_immediately() {
    let host = host(2, 8);
    let (tx, rx) = mpsc::sync_channel(1);
    host.run_network(
        "ghost",
        ExecutionContext::new(),
        Box::new(move |_, result, _| {
            tx.send(matches!(result, Err(HostError::NetNotFound(_)))).unwrap();
        }),
        0,
    );
    assert!(rx.recv_timeout(RECV_TIMEOUT).unwrap());
}

// ── S2: queue overflow ─────────────────────────────────────────

#[test]
fn test_queue_overflow_and_drain_order() {
    let (host, latch) = latched_host(1, 2);
    host.add_network(passthrough_module("f"), &mut CompilationContext::default())
        .unwrap();

    let completions: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    let refused = Arc::new(AtomicUsize::new(0));
    let (done_tx, done_rx) = mpsc::channel();

    let mut ids = Vec::new();
    for _ in 0..4 {
        let completions = Arc::clone(&completions);
        let refused = Arc::clone(&refused);
        let done_tx = done_tx.clone();
        let id = host.run_network(
            "f",
            input_context(),
            Box::new(move |run_id, result, _| {
                match result {
                    Ok(()) => completions.lock().unwrap().push(run_id),
                    Err(HostError::RequestRefused(_)) => {
                        refused.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(other) => panic!("unexpected outcome: {other}"),
                }
                done_tx.send(()).unwrap();
            }),
            0,
        );
        ids.push(id);
    }

    // The fourth request is refused synchronously: one is running, two
    // are queued, and the queue holds only two.
    assert_eq!(refused.load(Ordering::SeqCst), 1);

    latch.release();
    for _ in 0..4 {
        done_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    }

    // The three accepted requests complete in submission order.
    assert_eq!(*completions.lock().unwrap(), ids[..3].to_vec());
}

#[test]
fn test_overflow_boundary_counts() {
    // max_active + max_queue accepted, the rest refused.
    let (host, latch) = latched_host(2, 3);
    host.add_network(passthrough_module("f"), &mut CompilationContext::default())
        .unwrap();

    let refused = Arc::new(AtomicUsize::new(0));
    let (done_tx, done_rx) = mpsc::channel();
    for _ in 0..8 {
        let refused = Arc::clone(&refused);
        let done_tx = done_tx.clone();
        host.run_network(
            "f",
            input_context(),
            Box::new(move |_, result, _| {
                if matches!(result, Err(HostError::RequestRefused(_))) {
                    refused.fetch_add(1, Ordering::SeqCst);
                }
                done_tx.send(()).unwrap();
            }),
            0,
        );
    }
    assert_eq!(refused.load(Ordering::SeqCst), 3);

    latch.release();
    for _ in 0..8 {
        done_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    }
}

// ── S3: priority ordering ──────────────────────────────────────

#[test]
fn test_priority_dispatch_order() {
    let (host, latch) = latched_host(1, 8);
    host.add_network(passthrough_module("f"), &mut CompilationContext::default())
        .unwrap();

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = mpsc::channel();

    for (label, priority) in [("a", 0u64), ("b", 10), ("c", 5)] {
        let order = Arc::clone(&order);
        let done_tx = done_tx.clone();
        host.run_network(
            "f",
            input_context(),
            Box::new(move |_, result, _| {
                result.unwrap();
                order.lock().unwrap().push(label);
                done_tx.send(()).unwrap();
            }),
            priority,
        );
    }

    latch.release();
    for _ in 0..3 {
        done_rx.recv_timeout(RECV_TIMEOUT).unwrap();
    }
    // A was popped immediately; B outranks C in the queue.
    assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
}

// ── S4: remove while busy ──────────────────────────────────────

#[test]
fn test_remove_while_busy() {
    let (host, latch) = latched_host(1, 8);
    host.add_network(passthrough_module("f"), &mut CompilationContext::default())
        .unwrap();

    let (done_tx, done_rx) = mpsc::sync_channel(1);
    host.run_network(
        "f",
        input_context(),
        Box::new(move |_, result, _| {
            done_tx.send(result.is_ok()).unwrap();
        }),
        0,
    );

    // The run holds the refcount, so removal is refused.
    assert!(matches!(
        host.remove_network("f"),
        Err(HostError::NetBusy(_))
    ));

    latch.release();
    assert!(done_rx.recv_timeout(RECV_TIMEOUT).unwrap());

    host.remove_network("f").unwrap();
    assert!(!host.network_added("f"));
}

#[test]
fn test_remove_unknown_is_silent_success() {
    let host = host(1, 4);
    host.remove_network("never-added").unwrap();
}

// ── S5: name collision on add ──────────────────────────────────

#[test]
fn test_add_name_collision_is_atomic() {
    let host = host(2, 8);
    host.add_network(passthrough_module("f"), &mut CompilationContext::default())
        .unwrap();

    // Module with both a colliding and a fresh function: nothing lands.
    let err = host
        .add_network(tanh_module(&["f", "g"]), &mut CompilationContext::default())
        .unwrap_err();
    assert!(matches!(err, HostError::Runtime(_)));
    assert!(host.network_added("f"));
    assert!(!host.network_added("g"));

    // The reservation for g was rolled back, so g can be added now.
    host.add_network(tanh_module(&["g"]), &mut CompilationContext::default())
        .unwrap();
    assert!(host.network_added("g"));
}

#[test]
fn test_add_then_remove_is_noop_on_registry() {
    let host = host(2, 8);
    host.add_network(tanh_module(&["f"]), &mut CompilationContext::default())
        .unwrap();
    host.remove_network("f").unwrap();
    assert!(!host.network_added("f"));
    // The same module can be added again from scratch.
    host.add_network(tanh_module(&["f"]), &mut CompilationContext::default())
        .unwrap();
    assert!(host.network_added("f"));
}

// ── S6: operator-support gate via the host's backend ───────────

#[test]
fn test_cpu_gate_scenarios() {
    let host = host(1, 4);
    let backend = host.get_backend("cpu").unwrap();

    let conv = |elem: ElemKind| {
        let ins = vec![
            TensorTy::new(elem, Shape::new(vec![1, 8, 8, 2])),
            TensorTy::new(elem, Shape::new(vec![4, 3, 3, 2])),
            TensorTy::new(elem, Shape::vector(4)),
        ];
        let outs = vec![TensorTy::new(elem, Shape::new(vec![1, 6, 6, 4]))];
        (ins, outs)
    };
    let (ins, outs) = conv(ElemKind::Int16Q);
    assert!(!backend.is_op_supported(&NodeInfo::new(OpKind::Conv, &ins, &outs)));
    let (ins, outs) = conv(ElemKind::Float);
    assert!(backend.is_op_supported(&NodeInfo::new(OpKind::Conv, &ins, &outs)));

    let sls = |lengths: ElemKind| {
        let ins = vec![
            fty(32),
            TensorTy::new(ElemKind::Int64I, Shape::vector(6)),
            TensorTy::new(lengths, Shape::vector(3)),
        ];
        let outs = vec![fty(12)];
        (ins, outs)
    };
    let (ins, outs) = sls(ElemKind::Int32I);
    assert!(backend.is_op_supported(&NodeInfo::new(OpKind::SparseLengthsSum, &ins, &outs)));
    let (ins, outs) = sls(ElemKind::Int16Q);
    assert!(!backend.is_op_supported(&NodeInfo::new(OpKind::SparseLengthsSum, &ins, &outs)));
}

#[test]
fn test_unsupported_network_fails_add() {
    let host = host(1, 4);
    let mut module = Module::new();
    let mut f = Function::new("f");
    f.add_input("in", fty(8));
    // FullyConnected has no arm in the CPU gate, so partitioning fails.
    f.add_node(NodeDef::new(
        "fc",
        OpKind::FullyConnected,
        vec!["in".into()],
        vec![fty(8)],
        vec![fty(8)],
    ));
    f.add_output("fc", fty(8));
    module.add_function(f).unwrap();

    let err = host
        .add_network(module, &mut CompilationContext::default())
        .unwrap_err();
    assert!(matches!(err, HostError::Planner(_)));
    assert!(!host.network_added("f"));
}

// ── Multi-device partitioning end-to-end ───────────────────────

#[test]
fn test_split_network_runs_across_devices() {
    // Each tanh node of 256 floats costs 2 KiB with context count 2; a
    // 6 KiB device cannot hold the whole 8-node chain.
    let mut module = Module::new();
    let mut f = Function::new("f");
    f.add_input("in", fty(256));
    let mut prev = "in".to_string();
    for i in 0..8 {
        let name = format!("t{i}");
        f.add_node(NodeDef::new(
            &name,
            OpKind::Tanh,
            vec![prev.clone()],
            vec![fty(256)],
            vec![fty(256)],
        ));
        prev = name;
    }
    f.add_node(NodeDef::new(
        "out",
        OpKind::Save,
        vec![prev],
        vec![fty(256)],
        vec![fty(256)],
    ));
    f.add_output("out", fty(256));
    module.add_function(f).unwrap();

    let host = HostManager::new(
        vec![
            DeviceConfig::new("cpu", 6 << 10),
            DeviceConfig::new("cpu", 6 << 10),
            DeviceConfig::new("cpu", 6 << 10),
            DeviceConfig::new("cpu", 6 << 10),
        ],
        HostConfig {
            max_active_requests: 2,
            ..Default::default()
        },
    )
    .unwrap();

    host.add_network(module, &mut CompilationContext::default())
        .unwrap();
    let dag = host.get_network_dag("f").unwrap();
    assert!(dag.num_nodes() > 1, "expected a multi-device split");

    let mut bindings = Bindings::new();
    bindings.insert("in", Tensor::zeroed(fty(256)));
    host.run_network_blocking("f", &mut bindings).unwrap();
    assert!(bindings.contains("out"));
}

// ── Lifecycle: clear, stats, tracing, export, profiling ────────

#[test]
fn test_clear_host_drains_and_resets() {
    let (host, latch) = latched_host(1, 4);
    host.add_network(passthrough_module("f"), &mut CompilationContext::default())
        .unwrap();

    let callbacks = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let callbacks = Arc::clone(&callbacks);
        host.run_network(
            "f",
            input_context(),
            Box::new(move |_, _, _| {
                callbacks.fetch_add(1, Ordering::SeqCst);
            }),
            0,
        );
    }

    // Unblock the in-flight run so the drain can complete.
    latch.release();
    host.clear_host().unwrap();

    // Every accepted request got exactly one callback.
    assert_eq!(callbacks.load(Ordering::SeqCst), 3);
    assert_eq!(host.active_request_count(), 0);
    assert_eq!(host.queue_size(), 0);
    assert!(!host.network_added("f"));
}

#[test]
fn test_stats_counters() {
    let stats = Arc::new(InMemoryStats::new());
    let host = HostManager::with_collaborators(
        vec![DeviceConfig::new("cpu", 64 << 20)],
        HostConfig::default(),
        HostCollaborators {
            stats: Arc::clone(&stats) as _,
            dag_exporter: Box::new(JsonDagExporter::default()),
            dag_optimizer: None,
        },
    )
    .unwrap();

    assert_eq!(stats.counter(keys::DEVICE_MEMORY_MAX), 64 << 20);

    host.add_network(passthrough_module("f"), &mut CompilationContext::default())
        .unwrap();
    // Provisioned artifacts claim device memory.
    assert!(stats.counter(keys::DEVICE_MEMORY_USED) > 0);

    let mut bindings = Bindings::new();
    bindings.insert("in", Tensor::zeroed(fty(8)));
    host.run_network_blocking("f", &mut bindings).unwrap();

    assert_eq!(stats.counter(&keys::requests_processed("global")), 1);
    assert_eq!(stats.counter(&keys::requests_succeeded("f")), 1);
    assert_eq!(stats.counter(&keys::requests_failed("f")), 0);
    assert_eq!(stats.series(&keys::execution_duration("f")).len(), 1);

    host.remove_network("f").unwrap();
    assert_eq!(stats.counter(keys::DEVICE_MEMORY_USED), 0);

    host.clear_host().unwrap();
    assert_eq!(stats.counter(keys::DEVICE_MEMORY_MAX), 0);
}

#[test]
fn test_device_tracing() {
    let host = host(1, 4);
    host.start_device_trace().unwrap();
    host.stop_device_trace().unwrap();
    let events = host.trace_context().events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].name, "trace start");
}

#[test]
fn test_serialize_compiled_dag() {
    let dir = tempfile::tempdir().unwrap();
    let host = HostManager::with_collaborators(
        vec![DeviceConfig::new("cpu", 64 << 20)],
        HostConfig::default(),
        HostCollaborators {
            stats: Arc::new(InMemoryStats::new()),
            dag_exporter: Box::new(JsonDagExporter::new(dir.path())),
            dag_optimizer: None,
        },
    )
    .unwrap();

    let mut cctx = CompilationContext {
        serialize_compiled_dag: true,
        ..Default::default()
    };
    host.add_network(passthrough_module("f"), &mut cctx).unwrap();
    assert!(dir.path().join("f.onnx").exists());
}

#[test]
fn test_profiling_mode_requires_empty_host() {
    let host = host(1, 4);
    host.add_network(passthrough_module("f"), &mut CompilationContext::default())
        .unwrap();

    let mut cctx = CompilationContext::default();
    cctx.precision_config.quant_mode = QuantizationMode::Profile;
    let err = host
        .add_network(passthrough_module("g"), &mut cctx)
        .unwrap_err();
    assert!(matches!(err, HostError::Runtime(_)));
    assert!(!host.network_added("g"));
}

#[test]
fn test_profiling_mode_rebuilds_and_runs() {
    let host = host(1, 4);
    let mut cctx = CompilationContext::default();
    cctx.precision_config.quant_mode = QuantizationMode::Profile;
    host.add_network(passthrough_module("f"), &mut cctx).unwrap();
    assert!(host.network_added("f"));

    let mut bindings = Bindings::new();
    bindings.insert("in", Tensor::zeroed(fty(8)));
    host.run_network_blocking("f", &mut bindings).unwrap();
    assert!(bindings.contains("out"));
}

#[test]
fn test_delayed_constant_folding_add() {
    // A splat constant is folded only after partitioning when delayed
    // modification is requested.
    let mut module = Module::new();
    let mut f = Function::new("f");
    f.add_input("in", fty(8));
    f.add_node(NodeDef::new(
        "ones",
        OpKind::Splat,
        vec![],
        vec![],
        vec![fty(8)],
    ));
    f.add_node(NodeDef::new(
        "sum",
        OpKind::Add,
        vec!["in".into(), "ones".into()],
        vec![fty(8), fty(8)],
        vec![fty(8)],
    ));
    f.add_node(NodeDef::new(
        "out",
        OpKind::Save,
        vec!["sum".into()],
        vec![fty(8)],
        vec![fty(8)],
    ));
    f.add_output("out", fty(8));
    module.add_function(f).unwrap();

    let host = host(1, 4);
    let mut cctx = CompilationContext::default();
    cctx.optimization_opts.delay_and_record_constant_modification = true;
    host.add_network(module, &mut cctx).unwrap();
    assert!(host.network_added("f"));

    let mut bindings = Bindings::new();
    bindings.insert("in", Tensor::zeroed(fty(8)));
    host.run_network_blocking("f", &mut bindings).unwrap();
}

#[test]
fn test_device_config_factory_path() {
    // End-to-end through the config-file device path.
    let device = create_device_manager(DeviceConfig::new("cpu", 1 << 20)).unwrap();
    device.init().unwrap();
    assert_eq!(device.backend_name(), "cpu");
}
