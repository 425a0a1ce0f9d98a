//! End-to-end scenarios for the DAP client runtime: breakpoint diffing
//! and adapter-initiated reverse requests driven against an in-memory
//! duplex stream standing in for an adapter subprocess.

use std::sync::Arc;

use async_trait::async_trait;
use dap_runtime::breakpoints::ConditionalBreakpoint;
use dap_runtime::host_delegate::HostDelegate;
use dap_runtime::manifest::ManifestDescriptor;
use dap_runtime::message::{Event, Request as WireRequest, Response as WireResponse};
use dap_runtime::protocol::{RunInTerminalRequest, RunInTerminalResult, StartDebuggingRequest, StartDebuggingResult};
use dap_runtime::session::Session;
use dap_runtime::{Error, Result};
use serde_json::Value;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

fn init_logging() {
    let _ = env_logger::try_init();
}

fn test_manifest() -> ManifestDescriptor {
    ManifestDescriptor {
        identifier: "mock".into(),
        executable: "mock-adapter".into(),
        arguments: Vec::new(),
        working_directory: None,
        environment: Default::default(),
    }
}

fn encode(message: &dap_runtime::Message) -> Vec<u8> {
    let body = serde_json::to_vec(message).unwrap();
    let mut out = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    out.extend_from_slice(&body);
    out
}

async fn read_message(stream: &mut (impl tokio::io::AsyncRead + Unpin)) -> dap_runtime::Message {
    let mut buf = vec![0u8; 8192];
    let n = stream.read(&mut buf).await.unwrap();
    let text = String::from_utf8_lossy(&buf[..n]);
    let body_start = text.find("\r\n\r\n").unwrap() + 4;
    serde_json::from_str(&text[body_start..]).unwrap()
}

async fn drive_handshake(adapter: &mut (impl tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin)) {
    let init = read_message(adapter).await;
    adapter
        .write_all(&encode(&dap_runtime::Message::Response(WireResponse::success(
            100,
            init.seq(),
            "initialize",
            Some(serde_json::json!({
                "capabilities": {"supportsRunInTerminalRequest": true}
            })),
        ))))
        .await
        .unwrap();
    adapter
        .write_all(&encode(&dap_runtime::Message::Event(Event {
            seq: 101,
            event: "initialized".into(),
            body: None,
        })))
        .await
        .unwrap();

    let config_done = read_message(adapter).await;
    adapter
        .write_all(&encode(&dap_runtime::Message::Response(WireResponse::success(
            102,
            config_done.seq(),
            "configurationDone",
            None,
        ))))
        .await
        .unwrap();

    let launch = read_message(adapter).await;
    adapter
        .write_all(&encode(&dap_runtime::Message::Response(WireResponse::success(
            103,
            launch.seq(),
            "launch",
            None,
        ))))
        .await
        .unwrap();

    let exception_bp = read_message(adapter).await;
    adapter
        .write_all(&encode(&dap_runtime::Message::Response(WireResponse::success(
            104,
            exception_bp.seq(),
            "setExceptionBreakpoints",
            None,
        ))))
        .await
        .unwrap();
}

/// Breakpoint diff: desired = {A: [line 4]} produces one `setBreakpoints`
/// for A; updating to {B: [line 10]} produces two concurrent
/// `setBreakpoints` (A cleared, B set); a no-op third flush sends nothing.
#[tokio::test]
async fn breakpoint_diff_clears_dropped_files_and_is_idempotent() {
    init_logging();
    let (mut adapter, client) = duplex(32768);
    let (read_half, write_half) = tokio::io::split(client);
    let session = Session::new(test_manifest(), None, read_half, write_half);

    let session_for_start = session.clone();
    let handshake = tokio::spawn(async move {
        drive_handshake(&mut adapter).await;
        adapter
    });
    session_for_start.start(serde_json::Map::new()).await.unwrap();
    let mut adapter = handshake.await.unwrap();

    session.set_desired_source_breakpoints(
        "A",
        vec![ConditionalBreakpoint {
            file_path: "A".into(),
            line: 4,
            condition: "x>1".into(),
            hit_condition: None,
            log_message: None,
        }],
    );

    let flush_a = tokio::spawn({
        let session = session.clone();
        async move { session.flush_source_breakpoints().await }
    });
    let request_a = read_message(&mut adapter).await;
    match &request_a {
        dap_runtime::Message::Request(r) => {
            assert_eq!(r.command, "setBreakpoints");
            let args = r.arguments.as_ref().unwrap();
            assert_eq!(args["source"]["path"], "A");
            assert_eq!(args["breakpoints"].as_array().unwrap().len(), 1);
        }
        _ => panic!("expected setBreakpoints"),
    }
    adapter
        .write_all(&encode(&dap_runtime::Message::Response(WireResponse::success(
            200,
            request_a.seq(),
            "setBreakpoints",
            Some(serde_json::json!({"breakpoints": [{"verified": true}]})),
        ))))
        .await
        .unwrap();
    flush_a.await.unwrap().unwrap();

    session.set_desired_source_breakpoints(
        "B",
        vec![ConditionalBreakpoint {
            file_path: "B".into(),
            line: 10,
            condition: String::new(),
            hit_condition: None,
            log_message: None,
        }],
    );
    session.set_desired_source_breakpoints("A", vec![]);

    let flush_b = tokio::spawn({
        let session = session.clone();
        async move { session.flush_source_breakpoints().await }
    });

    let mut seen_paths = Vec::new();
    for _ in 0..2 {
        let request = read_message(&mut adapter).await;
        match &request {
            dap_runtime::Message::Request(r) => {
                assert_eq!(r.command, "setBreakpoints");
                let args = r.arguments.as_ref().unwrap();
                let path = args["source"]["path"].as_str().unwrap().to_string();
                if path == "A" {
                    assert_eq!(args["breakpoints"].as_array().unwrap().len(), 0);
                } else {
                    assert_eq!(args["breakpoints"].as_array().unwrap().len(), 1);
                }
                seen_paths.push(path);
                adapter
                    .write_all(&encode(&dap_runtime::Message::Response(WireResponse::success(
                        300 + request.seq(),
                        request.seq(),
                        "setBreakpoints",
                        Some(serde_json::json!({"breakpoints": []})),
                    ))))
                    .await
                    .unwrap();
            }
            _ => panic!("expected setBreakpoints"),
        }
    }
    seen_paths.sort();
    assert_eq!(seen_paths, vec!["A".to_string(), "B".to_string()]);
    flush_b.await.unwrap().unwrap();

    // Third flush with unchanged desired state sends nothing.
    session.flush_source_breakpoints().await.unwrap();
    let mut probe = [0u8; 1];
    let result = tokio::time::timeout(std::time::Duration::from_millis(30), adapter.read(&mut probe)).await;
    assert!(result.is_err(), "idempotent flush must not send further requests");
}

struct RecordingDelegate;

#[async_trait]
impl HostDelegate for RecordingDelegate {
    async fn run_in_terminal(&self, request: RunInTerminalRequest) -> Result<RunInTerminalResult> {
        assert_eq!(request.args, vec!["echo".to_string(), "hi".to_string()]);
        assert_eq!(request.cwd, "/tmp");
        Ok(RunInTerminalResult {
            process_id: Some(1234),
            shell_process_id: None,
        })
    }

    async fn start_debugging(&self, _request: StartDebuggingRequest) -> Result<StartDebuggingResult> {
        Err(Error::UnsupportedFeature("not exercised in this scenario".into()))
    }
}

/// Reverse request success: the adapter asks the host to spawn a
/// terminal; the delegate's result comes back as a successful Response
/// correlated to the adapter's own `seq`.
#[tokio::test]
async fn reverse_request_success_round_trips_through_host_delegate() {
    let (mut adapter, client) = duplex(32768);
    let (read_half, write_half) = tokio::io::split(client);
    let _session = Session::new(test_manifest(), Some(Arc::new(RecordingDelegate)), read_half, write_half);

    let request = dap_runtime::Message::Request(WireRequest {
        seq: 7,
        command: "runInTerminal".into(),
        arguments: Some(serde_json::json!({
            "args": ["echo", "hi"],
            "cwd": "/tmp",
        })),
    });
    adapter.write_all(&encode(&request)).await.unwrap();

    let reply = read_message(&mut adapter).await;
    match reply {
        dap_runtime::Message::Response(r) => {
            assert!(r.success);
            assert_eq!(r.request_seq, 7);
            assert_eq!(r.body.unwrap()["processId"], Value::from(1234));
        }
        _ => panic!("expected a response"),
    }
}

/// Sequence monotonicity: every outbound request during the handshake
/// carries a strictly increasing `seq`.
#[tokio::test]
async fn outbound_sequence_numbers_strictly_increase() {
    let (mut adapter, client) = duplex(32768);
    let (read_half, write_half) = tokio::io::split(client);
    let session = Session::new(test_manifest(), None, read_half, write_half);

    let handshake = tokio::spawn(async move {
        let mut seqs = Vec::new();
        let init = read_message(&mut adapter).await;
        seqs.push(init.seq());
        adapter
            .write_all(&encode(&dap_runtime::Message::Response(WireResponse::success(
                100,
                init.seq(),
                "initialize",
                Some(serde_json::json!({"capabilities": {}})),
            ))))
            .await
            .unwrap();
        adapter
            .write_all(&encode(&dap_runtime::Message::Event(Event {
                seq: 101,
                event: "initialized".into(),
                body: None,
            })))
            .await
            .unwrap();

        let config_done = read_message(&mut adapter).await;
        seqs.push(config_done.seq());
        adapter
            .write_all(&encode(&dap_runtime::Message::Response(WireResponse::success(
                102,
                config_done.seq(),
                "configurationDone",
                None,
            ))))
            .await
            .unwrap();

        let launch = read_message(&mut adapter).await;
        seqs.push(launch.seq());
        adapter
            .write_all(&encode(&dap_runtime::Message::Response(WireResponse::success(
                103,
                launch.seq(),
                "launch",
                None,
            ))))
            .await
            .unwrap();

        let exception_bp = read_message(&mut adapter).await;
        seqs.push(exception_bp.seq());
        adapter
            .write_all(&encode(&dap_runtime::Message::Response(WireResponse::success(
                104,
                exception_bp.seq(),
                "setExceptionBreakpoints",
                None,
            ))))
            .await
            .unwrap();

        seqs
    });

    session.start(serde_json::Map::new()).await.unwrap();
    let seqs = handshake.await.unwrap();
    assert_eq!(seqs, vec![1, 2, 3, 4]);
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
}
