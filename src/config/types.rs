//! Configuration types.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chat::DEFAULT_FINALIZE_TIMEOUT;
use crate::cli::{FlagError, FlagPolicy, SessionArgs, DEFAULT_BINARY};

/// Settings for spawning a bridged Claude session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Executable to launch.
    pub binary: String,
    /// MCP configuration passed as `--mcp-config`: a path or inline JSON.
    pub mcp_config: Option<String>,
    /// Pass `--dangerously-skip-permissions`.
    pub skip_permissions: bool,
    /// Extra CLI flags, validated against the flag allow list.
    pub flags: Vec<String>,
    /// Regexes rejecting flags that the allow list would otherwise accept.
    pub blocked_flag_patterns: Vec<String>,
    /// Extra environment variables for the child.
    pub env: HashMap<String, String>,
    /// Inactivity period before buffered output becomes a message.
    pub finalize_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
            mcp_config: None,
            skip_permissions: true,
            flags: Vec::new(),
            blocked_flag_patterns: Vec::new(),
            env: HashMap::new(),
            finalize_timeout_ms: u64::try_from(DEFAULT_FINALIZE_TIMEOUT.as_millis())
                .unwrap_or(u64::MAX),
        }
    }
}

impl BridgeConfig {
    /// Aggregator inactivity timeout.
    #[must_use]
    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_millis(self.finalize_timeout_ms)
    }

    /// Default flag policy plus the configured blocked patterns.
    ///
    /// # Errors
    ///
    /// Returns `FlagError::InvalidPattern` if a pattern is not a valid regex.
    pub fn flag_policy(&self) -> Result<FlagPolicy, FlagError> {
        self.blocked_flag_patterns
            .iter()
            .try_fold(FlagPolicy::default(), |policy, pattern| {
                policy.block_pattern(pattern)
            })
    }

    /// Build session arguments from this config plus `extra_flags`.
    ///
    /// # Errors
    ///
    /// Returns `FlagError` if any configured or extra flag is rejected.
    pub fn session_args(
        &self,
        extra_flags: &[String],
        policy: &FlagPolicy,
    ) -> Result<SessionArgs, FlagError> {
        let mut args = SessionArgs::new().skip_permissions(self.skip_permissions);
        if let Some(mcp) = &self.mcp_config {
            args = args.mcp_config(mcp.clone());
        }
        args.flags(&self.flags, policy)?.flags(extra_flags, policy)
    }
}
