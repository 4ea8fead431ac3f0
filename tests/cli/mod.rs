//! CLI bridge tests.

#[cfg(unix)]
mod session_test;

/// Verify the public CLI types are exported from the library.
#[test]
fn test_all_cli_types_exported() {
    use claude_bridge::cli::{
        encode_user_input, parse_line, FlagPolicy, ProcessStatus, SessionArgs, SessionError,
        SessionEventKind, SessionProcess, StopSignal, StreamParser, MAX_INPUT_BYTES,
        MAX_LINE_BUFFER_BYTES,
    };

    let _ = StreamParser::new();
    let _ = FlagPolicy::default();
    let _ = SessionArgs::new().build_args();
    let _ = SessionProcess::new("s", ".", Vec::new());
    let _ = parse_line("{}");
    let _ = encode_user_input("hi");
    let _: fn() -> SessionError = || SessionError::NotRunning;
    let _ = (ProcessStatus::Starting, StopSignal::Kill, SessionEventKind::Message);
    assert_eq!(MAX_INPUT_BYTES, 100_000);
    assert_eq!(MAX_LINE_BUFFER_BYTES, 1_048_576);
}
