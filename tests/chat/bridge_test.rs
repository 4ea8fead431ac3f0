//! End-to-end tests: a scripted process feeding the aggregator through the bridge.

use std::time::Duration;

use claude_bridge::chat::{ChatMessage, MessageAggregator, MessageType, StreamBridge};
use claude_bridge::cli::{SessionEvent, SessionEventKind, SessionProcess};
use tokio::sync::mpsc;

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// A session that prints `lines` to stdout and exits.
fn scripted(lines: &[&str]) -> SessionProcess {
    let mut script = String::from("printf '%s\\n'");
    for line in lines {
        script.push_str(" '");
        script.push_str(line);
        script.push('\'');
    }
    SessionProcess::new("bridge-test", std::env::temp_dir(), vec!["-c".to_string(), script])
        .with_binary("sh")
}

fn wire(
    session: &SessionProcess,
) -> (
    StreamBridge,
    mpsc::UnboundedReceiver<ChatMessage>,
    mpsc::UnboundedReceiver<SessionEvent>,
) {
    // Long enough that only explicit boundaries or exit finalize.
    let aggregator = MessageAggregator::with_timeout("bridge-test", Duration::from_secs(60));
    let (tx, messages) = mpsc::unbounded_channel();
    aggregator.set_message_callback(move |message| {
        let _ = tx.send(message);
    });
    let bridge = StreamBridge::attach(session, &aggregator);

    let (exit_tx, exits) = mpsc::unbounded_channel();
    session.on(SessionEventKind::Exit, move |event| {
        let _ = exit_tx.send(event.clone());
    });
    (bridge, messages, exits)
}

async fn wait<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Option<T> {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out")
}

#[tokio::test]
async fn result_line_finalizes_the_turn() {
    let mut session = scripted(&[
        r#"{"type":"assistant","message":{"role":"assistant","content":"Hi ","model":"claude-test"}}"#,
        r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"there"}]}}"#,
        r#"{"type":"result","subtype":"success","cost_usd":0.01,"duration_ms":42}"#,
    ]);
    let (_bridge, mut messages, mut exits) = wire(&session);
    session.start().await.unwrap();

    let message = wait(&mut messages).await.unwrap();
    assert_eq!(message.content, "Hi there");
    let metadata = message.metadata.unwrap();
    assert_eq!(metadata["model"], "claude-test");
    assert_eq!(metadata["costUsd"], 0.01);
    assert_eq!(metadata["durationMs"], 42);

    assert!(matches!(wait(&mut exits).await, Some(SessionEvent::Exit { .. })));
    assert!(messages.try_recv().is_err());
}

#[tokio::test]
async fn error_line_becomes_an_error_message() {
    let mut session = scripted(&[
        r#"{"type":"assistant","message":{"content":"Working"}}"#,
        r#"{"type":"error","error":"Overloaded"}"#,
    ]);
    let (_bridge, mut messages, _exits) = wire(&session);
    session.start().await.unwrap();

    let first = wait(&mut messages).await.unwrap();
    let second = wait(&mut messages).await.unwrap();
    assert_eq!(first.content, "Working");
    assert_eq!(first.message_type, MessageType::Text);
    assert_eq!(second.content, "Overloaded");
    assert_eq!(second.message_type, MessageType::Error);
}

#[tokio::test]
async fn exit_flushes_unfinished_output() {
    let mut session = scripted(&[r#"{"type":"assistant","message":{"content":"partial"}}"#]);
    let (_bridge, mut messages, mut exits) = wire(&session);
    session.start().await.unwrap();

    wait(&mut exits).await;
    assert_eq!(messages.try_recv().unwrap().content, "partial");
}

#[tokio::test]
async fn detached_bridge_delivers_nothing() {
    let mut session = scripted(&[
        r#"{"type":"assistant","message":{"content":"ignored"}}"#,
        r#"{"type":"result","result":""}"#,
    ]);
    let (bridge, mut messages, mut exits) = wire(&session);
    bridge.detach(&session);
    session.start().await.unwrap();

    wait(&mut exits).await;
    assert!(messages.try_recv().is_err());
}
