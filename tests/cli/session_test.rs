//! Tests for spawning and driving a session process.
//!
//! These use small shell utilities in place of the Claude CLI.

use std::time::Duration;

use claude_bridge::cli::{
    ProcessStatus, SessionError, SessionEvent, SessionEventKind, SessionProcess, StopSignal,
    MAX_INPUT_BYTES, MAX_LINE_BUFFER_BYTES,
};
use tokio::sync::mpsc;

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

fn session(binary: &str, args: &[&str]) -> SessionProcess {
    SessionProcess::new(
        "test-session",
        std::env::temp_dir(),
        args.iter().map(ToString::to_string).collect(),
    )
    .with_binary(binary)
}

fn shell(script: &str) -> SessionProcess {
    session("sh", &["-c", script])
}

fn subscribe(session: &SessionProcess, kind: SessionEventKind) -> mpsc::UnboundedReceiver<SessionEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    session.on(kind, move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn wait_exit(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> (Option<i32>, Option<String>) {
    match next_event(rx).await {
        SessionEvent::Exit { code, signal } => (code, signal),
        other => panic!("expected exit event, got {other:?}"),
    }
}

#[tokio::test]
async fn input_is_written_as_one_stream_json_line() {
    let mut process = session("cat", &[]);
    let mut stdout = subscribe(&process, SessionEventKind::Stdout);
    let mut exit = subscribe(&process, SessionEventKind::Exit);

    process.start().await.unwrap();
    assert!(process.is_running());
    assert!(process.pid().is_some());

    process.send_input("  hello  ").await.unwrap();
    match next_event(&mut stdout).await {
        SessionEvent::Stdout(line) => assert_eq!(
            line,
            r#"{"type":"user","message":{"role":"user","content":"hello"}}"#
        ),
        other => panic!("expected stdout, got {other:?}"),
    }

    process.close_stdin();
    assert_eq!(wait_exit(&mut exit).await, (Some(0), None));

    let info = process.info();
    assert_eq!(info.status, ProcessStatus::Stopped);
    assert_eq!(info.exit_code, Some(0));
    assert!(info.started_at.is_some());
    assert!(info.ended_at.is_some());
}

#[tokio::test]
async fn decoded_messages_precede_their_fragments() {
    let mut process = shell(
        r#"printf '%s\n' '{"type":"assistant","message":{"role":"assistant","content":"Hi"}}' '{"type":"error","error":"boom"}'"#,
    );
    let (tx, mut rx) = mpsc::unbounded_channel();
    for kind in [SessionEventKind::Message, SessionEventKind::Stdout] {
        let tx = tx.clone();
        process.on(kind, move |event| {
            let _ = tx.send(event.clone());
        });
    }
    drop(tx);

    process.start().await.unwrap();

    let mut order = Vec::new();
    for _ in 0..4 {
        order.push(match next_event(&mut rx).await {
            SessionEvent::Message(_) => "message".to_string(),
            SessionEvent::Stdout(text) => text,
            other => panic!("unexpected event {other:?}"),
        });
    }
    assert_eq!(order, ["message", "Hi", "message", "[ERROR] boom"]);
}

#[tokio::test]
async fn missing_binary_reports_spawn_error() {
    let mut process = session("/nonexistent/claude-bridge-test-binary", &[]);
    let mut errors = subscribe(&process, SessionEventKind::Error);

    let err = process.start().await.unwrap_err();
    match err {
        SessionError::Spawn(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
        other => panic!("expected spawn error, got {other:?}"),
    }
    assert!(matches!(next_event(&mut errors).await, SessionEvent::Error(_)));
    assert_eq!(process.info().status, ProcessStatus::Error);
    assert!(!process.is_running());
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let mut process = session("sleep", &["30"]);
    process.start().await.unwrap();
    assert!(matches!(
        process.start().await,
        Err(SessionError::AlreadyStarted)
    ));
    process.stop(StopSignal::Kill).unwrap();
}

#[tokio::test]
async fn stop_marks_stopped_and_reports_signal() {
    let mut process = session("sleep", &["30"]);
    let mut exit = subscribe(&process, SessionEventKind::Exit);
    process.start().await.unwrap();

    process.stop(StopSignal::Terminate).unwrap();
    assert!(!process.is_running());
    assert_eq!(process.info().status, ProcessStatus::Stopped);
    assert!(matches!(
        process.send_input("hello").await,
        Err(SessionError::NotRunning)
    ));

    let (code, signal) = wait_exit(&mut exit).await;
    assert_eq!(code, None);
    assert_eq!(signal.as_deref(), Some("SIGTERM"));
    assert_eq!(process.info().exit_signal.as_deref(), Some("SIGTERM"));
    assert!(matches!(
        process.stop(StopSignal::Terminate),
        Err(SessionError::NotRunning)
    ));
}

#[tokio::test]
async fn ignored_signal_can_be_escalated() {
    let mut process = shell("trap '' INT; echo ready; exec sleep 30");
    let mut stdout = subscribe(&process, SessionEventKind::Stdout);
    let mut exit = subscribe(&process, SessionEventKind::Exit);
    process.start().await.unwrap();
    assert!(matches!(next_event(&mut stdout).await, SessionEvent::Stdout(line) if line == "ready"));

    process.stop(StopSignal::Interrupt).unwrap();
    assert_eq!(process.info().status, ProcessStatus::Stopped);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(exit.try_recv().is_err(), "SIGINT should have been ignored");

    process.stop(StopSignal::Kill).unwrap();
    let (code, signal) = wait_exit(&mut exit).await;
    assert_eq!(code, None);
    assert_eq!(signal.as_deref(), Some("SIGKILL"));
    assert!(matches!(
        process.stop(StopSignal::Kill),
        Err(SessionError::NotRunning)
    ));
}

#[tokio::test]
async fn oversized_line_reports_overflow_without_output() {
    let mut process = shell(
        r#"head -c 1100000 /dev/zero | tr '\0' x; printf '\n{"type":"result","result":"ok"}\n'"#,
    );
    let mut overflow = subscribe(&process, SessionEventKind::BufferOverflow);
    let mut stdout = subscribe(&process, SessionEventKind::Stdout);
    let mut exit = subscribe(&process, SessionEventKind::Exit);
    process.start().await.unwrap();

    wait_exit(&mut exit).await;
    match overflow.try_recv() {
        Ok(SessionEvent::BufferOverflow { discarded_bytes }) => {
            assert!(discarded_bytes > MAX_LINE_BUFFER_BYTES);
        }
        other => panic!("expected buffer overflow, got {other:?}"),
    }
    assert!(overflow.try_recv().is_err());

    let mut fragments = Vec::new();
    while let Ok(SessionEvent::Stdout(text)) = stdout.try_recv() {
        fragments.push(text);
    }
    assert_eq!(fragments, ["ok"]);
}

#[tokio::test]
async fn metadata_survives_the_lifecycle() {
    let mut metadata = serde_json::Map::new();
    metadata.insert("role".to_string(), serde_json::json!("reviewer"));
    let mut process = session("cat", &[]).with_metadata(metadata);
    let mut exit = subscribe(&process, SessionEventKind::Exit);
    process.start().await.unwrap();

    process.close_stdin();
    wait_exit(&mut exit).await;
    assert_eq!(process.info().metadata["role"], "reviewer");
}

#[tokio::test]
async fn nonzero_exit_code_is_recorded() {
    let mut process = shell("exit 3");
    let mut exit = subscribe(&process, SessionEventKind::Exit);
    process.start().await.unwrap();

    assert_eq!(wait_exit(&mut exit).await, (Some(3), None));
    let info = process.info();
    assert_eq!(info.exit_code, Some(3));
    assert_eq!(info.status, ProcessStatus::Stopped);
}

#[tokio::test]
async fn stderr_is_forwarded_raw() {
    let mut process = shell("echo oops >&2");
    let mut stderr = subscribe(&process, SessionEventKind::Stderr);
    let mut exit = subscribe(&process, SessionEventKind::Exit);
    process.start().await.unwrap();

    match next_event(&mut stderr).await {
        SessionEvent::Stderr(text) => assert_eq!(text, "oops\n"),
        other => panic!("expected stderr, got {other:?}"),
    }
    wait_exit(&mut exit).await;
}

#[tokio::test]
async fn unterminated_line_at_exit_is_dropped() {
    let mut process = shell("printf 'no newline'");
    let mut stdout = subscribe(&process, SessionEventKind::Stdout);
    let mut exit = subscribe(&process, SessionEventKind::Exit);
    process.start().await.unwrap();

    wait_exit(&mut exit).await;
    assert!(stdout.try_recv().is_err());
}

#[tokio::test]
async fn input_limits_are_enforced() {
    let mut process = session("cat", &[]);
    process.start().await.unwrap();

    process
        .send_input(&"a".repeat(MAX_INPUT_BYTES))
        .await
        .unwrap();

    match process.send_input(&"a".repeat(MAX_INPUT_BYTES + 1)).await {
        Err(SessionError::InputTooLarge { len, max }) => {
            assert_eq!(len, MAX_INPUT_BYTES + 1);
            assert_eq!(max, MAX_INPUT_BYTES);
        }
        other => panic!("expected InputTooLarge, got {other:?}"),
    }

    let err = process.send_input("a\0b").await.unwrap_err();
    assert!(matches!(err, SessionError::NullByte));
    assert_eq!(err.to_string(), "Input contains null bytes");

    process.stop(StopSignal::Kill).unwrap();
}

#[tokio::test]
async fn closed_stdin_is_not_writable() {
    let mut process = session("sleep", &["30"]);
    process.start().await.unwrap();

    process.close_stdin();
    assert!(matches!(
        process.send_input("hello").await,
        Err(SessionError::StdinNotWritable)
    ));
    process.stop(StopSignal::Kill).unwrap();
}
