//! Command-line arguments for a stream-json Claude Code session.
//!
//! The CLI runs in `--print` mode with stream-json on both stdin and stdout.
//! The initial prompt is never passed as an argument: `--print` with a prompt
//! argument is one-shot and rejects follow-up input, so the prompt is sent
//! as the first stdin message instead.

use regex::Regex;

/// Characters that are never allowed in a user-supplied flag.
const FORBIDDEN_FLAG_CHARS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '{', '}', '[', ']', '<', '>', '\\',
];

/// Flag prefixes users may pass through by default.
pub const DEFAULT_ALLOWED_FLAG_PREFIXES: &[&str] = &[
    "--debug",
    "--no-session-persistence",
    "--print",
    "--mcp-config",
    "--fast",
    "--help",
    "--version",
];

/// Error type for flag validation.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum FlagError {
    /// The flag does not start with a dash.
    #[error("Invalid flag format: {0}")]
    InvalidFormat(String),
    /// The flag contains shell metacharacters.
    #[error("Invalid characters in flag: {0}")]
    ForbiddenCharacters(String),
    /// The flag is not in the allow list.
    #[error("Disallowed flag: {0}")]
    Disallowed(String),
    /// The flag matches a configured blocked pattern.
    #[error("Flag {flag} matches blocked pattern {pattern}")]
    Blocked { flag: String, pattern: String },
    /// A blocked pattern failed to compile.
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Allow list for user-supplied flags.
#[derive(Debug, Clone)]
pub struct FlagPolicy {
    allowed_prefixes: Vec<String>,
    blocked: Vec<Regex>,
}

impl Default for FlagPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_FLAG_PREFIXES.iter().copied())
    }
}

impl FlagPolicy {
    /// Create a policy allowing the given prefixes.
    #[must_use]
    pub fn new<I, S>(allowed_prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_prefixes: allowed_prefixes.into_iter().map(Into::into).collect(),
            blocked: Vec::new(),
        }
    }

    /// Reject flags matching `pattern` even when their prefix is allowed.
    ///
    /// # Errors
    ///
    /// Returns `FlagError::InvalidPattern` if the regex is invalid.
    pub fn block_pattern(mut self, pattern: &str) -> Result<Self, FlagError> {
        self.blocked.push(Regex::new(pattern)?);
        Ok(self)
    }

    /// Validate a single flag.
    ///
    /// # Errors
    ///
    /// Returns the first rule the flag violates.
    pub fn validate(&self, flag: &str) -> Result<(), FlagError> {
        if !flag.starts_with('-') {
            return Err(FlagError::InvalidFormat(flag.to_string()));
        }
        if flag.contains(FORBIDDEN_FLAG_CHARS) {
            return Err(FlagError::ForbiddenCharacters(flag.to_string()));
        }
        if !self
            .allowed_prefixes
            .iter()
            .any(|prefix| flag.starts_with(prefix.as_str()))
        {
            return Err(FlagError::Disallowed(flag.to_string()));
        }
        if let Some(rule) = self.blocked.iter().find(|rule| rule.is_match(flag)) {
            return Err(FlagError::Blocked {
                flag: flag.to_string(),
                pattern: rule.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// Validate every flag in order.
    ///
    /// # Errors
    ///
    /// Returns the error for the first invalid flag.
    pub fn validate_all<S: AsRef<str>>(&self, flags: &[S]) -> Result<(), FlagError> {
        flags.iter().try_for_each(|flag| self.validate(flag.as_ref()))
    }
}

/// Builder for session arguments.
#[derive(Debug, Clone)]
pub struct SessionArgs {
    skip_permissions: bool,
    no_session_persistence: bool,
    mcp_config: Option<String>,
    flags: Vec<String>,
}

impl Default for SessionArgs {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionArgs {
    /// Create a builder with the dashboard defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            skip_permissions: true,
            no_session_persistence: true,
            mcp_config: None,
            flags: Vec::new(),
        }
    }

    /// Whether to pass `--dangerously-skip-permissions`.
    #[must_use]
    pub fn skip_permissions(mut self, skip: bool) -> Self {
        self.skip_permissions = skip;
        self
    }

    /// Whether to pass `--no-session-persistence`.
    #[must_use]
    pub fn no_session_persistence(mut self, enabled: bool) -> Self {
        self.no_session_persistence = enabled;
        self
    }

    /// MCP configuration: a file path or inline JSON.
    #[must_use]
    pub fn mcp_config(mut self, config: impl Into<String>) -> Self {
        self.mcp_config = Some(config.into());
        self
    }

    /// Append user flags after validating them against `policy`.
    ///
    /// # Errors
    ///
    /// Returns `FlagError` for the first flag the policy rejects; no flags
    /// are added in that case.
    pub fn flags<S: AsRef<str>>(mut self, flags: &[S], policy: &FlagPolicy) -> Result<Self, FlagError> {
        policy.validate_all(flags)?;
        self.flags
            .extend(flags.iter().map(|flag| flag.as_ref().to_string()));
        Ok(self)
    }

    /// Build the command-line arguments.
    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "--print",
            "--input-format",
            "stream-json",
            "--output-format",
            "stream-json",
            "--include-partial-messages",
            "--verbose",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        if self.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }

        if self.no_session_persistence {
            args.push("--no-session-persistence".to_string());
        }

        if let Some(config) = &self.mcp_config {
            args.push("--mcp-config".to_string());
            args.push(config.clone());
        }

        args.extend(self.flags.iter().cloned());
        args
    }
}
