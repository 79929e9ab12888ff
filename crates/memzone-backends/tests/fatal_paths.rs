//! Native backend failures end the process
//!
//! A fatal failure aborts, so each case re-runs this test binary filtered to itself with
//! `MEMZONE_FATAL_CASE` set. The child drives the failure and the parent checks how it died.

use memzone_backends::backends::{SimulatedBackend, SimulatedDevice};
use memzone_backends::{DeviceBackend, DeviceWorker, NativeCall, StreamOp, WorkerConfig};
use memzone_core::DeviceKind;
use std::env;
use std::process::{Command, Output};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const CASE_VAR: &str = "MEMZONE_FATAL_CASE";

/// Run `scenario` when this process is the child for `case`, otherwise spawn that child.
fn run_case(case: &str, scenario: impl FnOnce()) -> Option<Output> {
    if env::var(CASE_VAR).as_deref() == Ok(case) {
        scenario();
        return None;
    }
    let output = Command::new(env::current_exe().unwrap())
        .args([case, "--exact", "--nocapture", "--test-threads=1"])
        .env(CASE_VAR, case)
        .output()
        .unwrap();
    Some(output)
}

fn assert_aborted(output: Option<Output>, diagnostic: &str) {
    let Some(output) = output else {
        return;
    };
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success(), "child process survived:\n{stderr}");
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        // SIGABRT
        assert_eq!(output.status.signal(), Some(6), "child was not aborted:\n{stderr}");
    }
    assert!(stderr.contains("fatal backend failure"), "missing diagnostic:\n{stderr}");
    assert!(stderr.contains(diagnostic), "diagnostic does not name `{diagnostic}`:\n{stderr}");
}

fn gpu_worker() -> (DeviceWorker, Arc<SimulatedDevice>) {
    let backend = SimulatedBackend::new(DeviceKind::Gpu, 1);
    let worker = backend.create_worker(0, &WorkerConfig::default()).unwrap();
    let device = backend.device(0).unwrap();
    (worker, device)
}

#[test]
fn test_fence_wait_failure_aborts_before_callbacks_run() {
    let output = run_case("test_fence_wait_failure_aborts_before_callbacks_run", || {
        let (worker, device) = gpu_worker();
        device.fail_on(NativeCall::WaitFence);
        let invoked = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&invoked);
        worker
            .execute("launch_and_notify", move |context| {
                context.launch(StreamOp::new("work", || {}));
                for _ in 0..3 {
                    let counter = Arc::clone(&counter);
                    context.add_callback(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    });
                }
            })
            .unwrap();
        worker.shutdown();
        eprintln!("callbacks invoked: {}", invoked.load(Ordering::SeqCst));
    });
    assert_aborted(output, "wait_fence");
}

#[test]
fn test_synchronize_failure_aborts() {
    let output = run_case("test_synchronize_failure_aborts", || {
        let (worker, device) = gpu_worker();
        let context = worker.context();
        context.native_stream();
        device.fail_on(NativeCall::Synchronize);
        context.sync_device();
    });
    assert_aborted(output, "synchronize");
}

#[test]
fn test_panicking_stream_op_aborts_on_sync() {
    let output = run_case("test_panicking_stream_op_aborts_on_sync", || {
        let (worker, _device) = gpu_worker();
        let context = worker.context();
        context.launch(StreamOp::new("explode", || panic!("stream op exploded")));
        context.sync_device();
    });
    assert_aborted(output, "synchronize");
}

#[test]
fn test_stream_destroy_failure_aborts() {
    let output = run_case("test_stream_destroy_failure_aborts", || {
        let (worker, device) = gpu_worker();
        worker
            .execute("open_stream", |context| {
                context.native_stream();
            })
            .unwrap();
        worker.shutdown();
        device.fail_on(NativeCall::DestroyStream);
        drop(worker);
    });
    assert_aborted(output, "destroy_stream");
}

#[test]
fn test_context_destroy_failure_aborts() {
    let output = run_case("test_context_destroy_failure_aborts", || {
        let (worker, device) = gpu_worker();
        device.fail_on(NativeCall::DestroyContext);
        drop(worker);
    });
    assert_aborted(output, "destroy_context");
}

#[test]
fn test_stream_creation_failure_aborts() {
    let output = run_case("test_stream_creation_failure_aborts", || {
        let (worker, device) = gpu_worker();
        device.fail_on(NativeCall::CreateStream);
        worker.context().native_stream();
    });
    assert_aborted(output, "create_stream");
}

#[test]
fn test_context_creation_failure_aborts() {
    let output = run_case("test_context_creation_failure_aborts", || {
        let backend = SimulatedBackend::new(DeviceKind::Gpu, 1);
        backend.device(0).unwrap().fail_on(NativeCall::CreateContext);
        let _ = backend.create_worker(0, &WorkerConfig::default());
    });
    assert_aborted(output, "create_context");
}

#[test]
fn test_callback_after_shutdown_aborts() {
    let output = run_case("test_callback_after_shutdown_aborts", || {
        let (worker, _device) = gpu_worker();
        let context = worker.context();
        worker.shutdown();
        context.add_callback(|| {});
    });
    assert_aborted(output, "channel is closed");
}
