//! Process lifecycle tests. Ordinary POSIX utilities stand in for `adb`.

#![cfg(unix)]

use std::path::Path;
use std::time::Duration;

use droidcast_capture::CaptureProcess;
use droidcast_core::{CaptureCommand, StreamError};

fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn sh(script: &str) -> CaptureCommand {
    CaptureCommand::new("sh", ["-c", script])
}

async fn read_all(process: &mut CaptureProcess, chunk: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; chunk];
    loop {
        let n = process.read_chunk(&mut buf).await.expect("read stdout");
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..n]);
    }
}

#[tokio::test]
async fn missing_program_is_a_launch_error() {
    init_test_tracing();

    let cmd = CaptureCommand::new("droidcast-definitely-not-installed", ["exec-out"]);
    let err = CaptureProcess::start(&cmd).err().expect("spawn must fail");
    match err {
        StreamError::Launch { program, source } => {
            assert_eq!(program, "droidcast-definitely-not-installed");
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        }
        other => panic!("expected launch error, got {other:?}"),
    }
}

#[tokio::test]
async fn reads_stdout_in_small_chunks_then_finishes_cleanly() {
    init_test_tracing();

    let mut process = CaptureProcess::start(&sh("head -c 100000 /dev/zero")).expect("spawn sh");
    let out = read_all(&mut process, 4096).await;

    assert_eq!(out.len(), 100_000);
    assert!(out.iter().all(|&b| b == 0));
    process.finish().await.expect("clean exit");
}

#[tokio::test]
async fn non_zero_exit_reports_captured_stderr() {
    init_test_tracing();

    let mut process =
        CaptureProcess::start(&sh("echo 'error: no devices/emulators found' >&2; exit 1"))
            .expect("spawn sh");
    assert!(read_all(&mut process, 64).await.is_empty());

    match process.finish().await {
        Err(StreamError::Process { code, stderr }) => {
            assert_eq!(code, Some(1));
            assert_eq!(stderr, "error: no devices/emulators found");
        }
        other => panic!("expected process error, got {other:?}"),
    }
}

#[tokio::test]
async fn stderr_output_fails_even_with_zero_exit() {
    init_test_tracing();

    let mut process = CaptureProcess::start(&sh("echo warning >&2")).expect("spawn sh");
    read_all(&mut process, 64).await;

    let err = process.finish().await.expect_err("stderr text is a failure");
    assert!(matches!(err, StreamError::Process { code: Some(0), .. }));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn release_kills_a_running_process() {
    init_test_tracing();

    let process = CaptureProcess::start(&CaptureCommand::new("sleep", ["30"])).expect("spawn sleep");
    let pid = process.id().expect("running process has a pid");
    let proc_dir = format!("/proc/{pid}");
    assert!(Path::new(&proc_dir).exists());

    tokio::time::timeout(Duration::from_secs(5), process.release())
        .await
        .expect("release must not hang");

    assert!(!Path::new(&proc_dir).exists(), "process {pid} still present after release");
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn abandoned_finish_leaves_the_process_releasable() {
    init_test_tracing();

    // Closes both pipes, then keeps running
    let mut process = CaptureProcess::start(&sh("exec 1>&-; exec 2>&-; sleep 30")).expect("spawn sh");
    assert!(read_all(&mut process, 64).await.is_empty());

    let waited = tokio::time::timeout(Duration::from_millis(200), process.finish()).await;
    assert!(waited.is_err(), "process exited on its own");

    let pid = process.id().expect("still owned after abandoned finish");
    tokio::time::timeout(Duration::from_secs(5), process.release())
        .await
        .expect("release must not hang");
    assert!(!Path::new(&format!("/proc/{pid}")).exists(), "process {pid} still present after release");
}
