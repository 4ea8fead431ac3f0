//! Claude Code CLI process bridge: spawning, stream-json framing, events.

mod args;
mod error;
mod events;
mod parser;
mod protocol;
mod session;

pub use args::*;
pub use error::*;
pub use events::*;
pub use parser::*;
pub use protocol::*;
pub use session::*;
