//! Claude Bridge - drive the Claude Code CLI over stream-json.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use claude_bridge::chat::{MessageAggregator, StreamBridge};
use claude_bridge::cli::{
    default_cwd, FlagError, SessionError, SessionEvent, SessionEventKind,
    SessionProcess, StopSignal,
};
use claude_bridge::config::{ConfigError, ConfigLoader};
use claude_bridge::display;

#[derive(Parser)]
#[command(
    name = "claude-bridge",
    about = "Drive the Claude Code CLI over stream-json",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with Claude Code interactively.
    Chat {
        /// Working directory for the CLI (defaults to the current directory).
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Config file to use instead of the default search paths.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// First message to send once the session starts.
        #[arg(short, long)]
        prompt: Option<String>,
        /// Extra CLI flag to pass through (repeatable).
        #[arg(long = "flag", allow_hyphen_values = true)]
        flags: Vec<String>,
        /// Session identifier (generated when omitted).
        #[arg(long)]
        id: Option<String>,
    },
}

#[derive(Debug, thiserror::Error)]
enum ChatError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Flag(#[from] FlagError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Failed to read terminal input: {0}")]
    Terminal(#[from] std::io::Error),
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

struct ChatOptions {
    cwd: Option<PathBuf>,
    config: Option<PathBuf>,
    prompt: Option<String>,
    flags: Vec<String>,
    id: Option<String>,
}

async fn run_chat(opts: ChatOptions) -> Result<Option<i32>, ChatError> {
    let loader = opts
        .config
        .map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let config = loader.load()?;
    let args = config
        .session_args(&opts.flags, &config.flag_policy()?)?
        .build_args();

    let session_id = opts
        .id
        .unwrap_or_else(|| format!("chat-{}", uuid::Uuid::new_v4().simple()));
    let cwd = opts.cwd.unwrap_or_else(default_cwd);
    let mut session = SessionProcess::new(session_id.clone(), cwd, args)
        .with_binary(config.binary.clone())
        .with_envs(&config.env);

    let aggregator = MessageAggregator::with_timeout(session_id, config.finalize_timeout());
    aggregator.set_message_callback(|message| display::print_chat_message(&message));
    // Registered before the exit handler below so buffered output prints first.
    let bridge = StreamBridge::attach(&session, &aggregator);

    session.on(SessionEventKind::Stderr, |event| {
        if let SessionEvent::Stderr(chunk) = event {
            display::print_stderr(chunk);
        }
    });
    let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
    session.on(SessionEventKind::Exit, move |event| {
        if let SessionEvent::Exit { code, signal } = event {
            let _ = exit_tx.send((*code, signal.clone()));
        }
    });

    session.start().await?;
    display::print_session_start(&session.info());
    // Spawn failures are reported by the caller.
    session.on(SessionEventKind::Error, |event| {
        if let SessionEvent::Error(err) = event {
            display::print_error(&err.to_string());
        }
    });

    if let Some(prompt) = opts.prompt {
        aggregator.create_user_message(prompt.trim());
        session.send_input(&prompt).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut terminal_open = true;
    let (code, signal) = loop {
        tokio::select! {
            exit = exit_rx.recv() => break exit.unwrap_or((None, None)),
            line = lines.next_line(), if terminal_open => match line? {
                None => {
                    session.close_stdin();
                    terminal_open = false;
                }
                Some(line) if line.trim() == "/quit" => {
                    session.close_stdin();
                    terminal_open = false;
                }
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    if let Err(e) = session.send_input(&line).await {
                        display::print_error(&e.to_string());
                    }
                }
            },
            _ = tokio::signal::ctrl_c() => {
                if let Err(e) = session.stop(StopSignal::default()) {
                    display::print_error(&e.to_string());
                }
            }
        }
    };

    bridge.detach(&session);
    aggregator.dispose();
    display::print_exit(code, signal.as_deref());
    Ok(code)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Chat {
            cwd,
            config,
            prompt,
            flags,
            id,
        } => {
            let opts = ChatOptions {
                cwd,
                config,
                prompt,
                flags,
                id,
            };
            match run_chat(opts).await {
                Ok(Some(code)) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
                Ok(None) => ExitCode::FAILURE,
                Err(e) => {
                    display::print_error(&e.to_string());
                    ExitCode::FAILURE
                }
            }
        }
    }
}
