// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use std::path::PathBuf;
use vantage_config::AgentMode;

// ── Auth subcommand ───────────────────────────────────────────────────────────

/// `vantage auth` subcommands.
#[derive(Subcommand, Debug)]
pub enum AuthCommands {
    /// Store credentials for a provider (API key, or OAuth for Anthropic).
    Login {
        /// Provider id, e.g. "openai", "anthropic".
        provider: String,
        /// API key (prompted for if omitted and stdin is a TTY).
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Remove stored credentials for a provider.
    Logout {
        /// Provider id.
        provider: String,
    },
    /// List providers with stored credentials.
    List,
    /// Show whether a provider has credentials configured.
    Status {
        /// Provider id.
        provider: String,
    },
}

// ── MCP subcommand ─────────────────────────────────────────────────────────────

/// `vantage mcp` subcommands.
#[derive(Subcommand, Debug)]
pub enum McpCommands {
    /// Serve the built-in tool registry over MCP stdio transport.
    ///
    /// Lets another MCP-capable client (Claude Desktop, an IDE) drive this
    /// agent's tools (`read_file`, `edit_file`, `run_terminal_command`, …)
    /// as MCP tool calls.
    Serve,
}

/// Output format for headless / CI runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormatArg {
    /// Full conversation format (## User / ## Vantage / ## Tool / ## Tool Result).
    /// Output is valid vantage conversation markdown and fully pipeable.
    #[default]
    Conversation,
    /// Structured JSON: title + array of steps with metadata.
    Json,
    /// Compact plain text: only the final agent response for each step.
    Compact,
}

/// Output event naming convention for `--server` / structured runs (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum JsonStandardArg {
    /// camelCase fields, Unix-millisecond timestamps.
    #[default]
    Opencode,
    /// snake_case fields, ISO-8601 timestamps (Claude-compatible NDJSON).
    Claude,
}

#[derive(Parser, Debug)]
#[command(
    name = "vantage",
    about = "An efficient AI coding agent for CLI and CI",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Prompt / task description. May also be given as `--prompt`/`-p`.
    #[arg(index = 1, long = "prompt", short = 'p', value_name = "PROMPT")]
    pub prompt: Option<String>,

    /// Run headless (no interactive loop); outputs clean text to stdout.
    #[arg(long, short = 'H')]
    pub headless: bool,

    /// Agent mode
    #[arg(long, short = 'm', value_enum, default_value = "agent")]
    pub mode: AgentMode,

    /// Model to use, e.g. "gpt-4o" or "anthropic/claude-opus-4-5"
    #[arg(long, short = 'M', env = "VANTAGE_MODEL")]
    pub model: Option<String>,

    /// Path to a markdown workflow file to use as input.
    #[arg(long, short = 'f')]
    pub file: Option<PathBuf>,

    /// Resume a saved conversation.
    /// Supply an ID (or unique prefix / file path) to resume directly.
    /// Omit the ID to pick interactively with fzf.
    /// In headless mode an explicit ID is required.
    /// Use 'vantage chats' to list available conversations.
    #[arg(long, short = 'r', value_name = "ID", num_args = 0..=1, default_missing_value = "")]
    pub resume: Option<String>,

    /// Resume the most recently saved conversation.
    #[arg(long = "continue", short = 'c', conflicts_with = "resume")]
    pub r#continue: bool,

    /// Do not fork a new session id on resume; keep appending to the resumed
    /// session in place (default is to fork, preserving the parent session).
    #[arg(long)]
    pub no_fork: bool,

    /// Keep the process alive after the first session, reading one request
    /// per stdin line and running each as its own session (spec §6).
    #[arg(long)]
    pub server: bool,

    /// Path to config file (overrides auto-discovery)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output format for headless runs (conversation | json | compact)
    #[arg(long, value_enum, default_value = "conversation")]
    pub output_format: OutputFormatArg,

    /// Directory to write run artifacts (full conversation, per-step files).
    /// Created if it does not exist.
    #[arg(long)]
    pub artifacts_dir: Option<PathBuf>,

    /// Template variable in KEY=VALUE form, substituted as {{KEY}} in workflow steps.
    /// May be repeated: --var branch=main --var pr=42
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    /// Per-step timeout in seconds (0 = no limit). Overrides config and frontmatter.
    #[arg(long, value_name = "SECS")]
    pub step_timeout: Option<u64>,

    /// Total run timeout in seconds (0 = no limit). Overrides config and frontmatter.
    #[arg(long, value_name = "SECS")]
    pub run_timeout: Option<u64>,

    /// Parse and validate the workflow file, then exit without calling the model.
    #[arg(long)]
    pub dry_run: bool,

    /// Override the system message verbatim (not read from a file).
    #[arg(long, value_name = "TEXT", conflicts_with = "system_message_file")]
    pub system_message: Option<String>,

    /// Override the system message by reading from a file.
    #[arg(long, value_name = "PATH")]
    pub system_message_file: Option<PathBuf>,

    /// Append text to the default system prompt (after the Guidelines section).
    #[arg(long, value_name = "TEXT", conflicts_with = "append_system_message_file")]
    pub append_system_message: Option<String>,

    /// Append the contents of a file to the default system prompt.
    #[arg(long, value_name = "PATH")]
    pub append_system_message_file: Option<PathBuf>,

    /// Write the final agent response to a file after the run completes.
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output_last_message: Option<PathBuf>,

    /// Emit one compact JSON object per line (no whitespace) instead of
    /// pretty-printed output; only meaningful with --output-format json.
    #[arg(long)]
    pub compact_json: bool,

    /// Event envelope naming convention for structured output.
    #[arg(long, value_enum, default_value = "opencode")]
    pub json_standard: JsonStandardArg,

    /// When reading stdin, queue additional lines that arrive after a turn
    /// has started instead of rejecting them.
    #[arg(long)]
    pub always_accept_stdin: bool,

    /// Concatenate stdin lines that arrive within a short debounce window
    /// into a single message instead of running them as separate turns.
    #[arg(long)]
    pub auto_merge_queued_messages: bool,

    /// Treat a non-JSON stdin line as a plain-text message instead of a parse error.
    #[arg(long)]
    pub interactive: bool,

    /// Generate and store a short title for the session from its first turn.
    #[arg(long)]
    pub generate_title: bool,

    /// Summarize the session into the history store when it goes idle.
    #[arg(long)]
    pub summarize_session: bool,

    /// Include the resolved providerID/modelID in the output envelope.
    #[arg(long)]
    pub output_response_model: bool,

    /// Override the global retry budget (seconds) used by outbound model calls.
    #[arg(long, value_name = "SECS", env = "VANTAGE_RETRY_TIMEOUT")]
    pub retry_timeout: Option<u64>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage stored provider credentials.
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
    /// Serve or inspect the Model Context Protocol integration.
    Mcp {
        #[command(subcommand)]
        command: McpCommands,
    },
    /// Generate shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Print the effective configuration and exit
    ShowConfig,
    /// List saved conversations
    Chats {
        /// Maximum number of conversations to show (default: 20)
        #[arg(long, short = 'n', default_value = "20")]
        limit: usize,
    },
    /// Validate a workflow file: parse frontmatter, count steps, check syntax.
    /// Exits 0 if valid, non-zero with an error description otherwise.
    Validate {
        /// Path to the workflow markdown file to validate
        #[arg(long, short = 'f', required = true)]
        file: PathBuf,
    },
    /// List available models for the configured provider(s).
    ///
    /// By default the static built-in catalog is shown.
    /// With --refresh the configured provider API is queried for live data.
    ListModels {
        /// Filter by provider name (e.g. "openai", "anthropic", "groq")
        #[arg(long, short = 'p')]
        provider: Option<String>,
        /// Query the provider API for the live list of available models
        #[arg(long)]
        refresh: bool,
        /// Output as JSON instead of a formatted table
        #[arg(long)]
        json: bool,
    },

    /// List all supported model providers.
    ///
    /// Shows each provider's id, name, description, and default API key
    /// environment variable.  Use the provider id in your config file under
    /// `model.provider`.
    ListProviders {
        /// Show detailed information for each provider
        #[arg(long, short = 'v')]
        verbose: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Returns true if the run should be headless.
    ///
    /// This crate is headless-only; kept for callers that special-case
    /// piped-vs-interactive framing of stdin.
    pub fn is_headless(&self) -> bool {
        self.headless || !std::io::stdin().is_terminal() || !std::io::stdout().is_terminal()
    }

    /// Resolve the effective system message override: inline text takes
    /// priority over a file path.
    pub fn effective_system_message(&self) -> anyhow::Result<Option<String>> {
        if let Some(text) = &self.system_message {
            return Ok(Some(text.clone()));
        }
        if let Some(path) = &self.system_message_file {
            return Ok(Some(std::fs::read_to_string(path)?));
        }
        Ok(None)
    }

    /// Resolve the effective append-system-message override.
    pub fn effective_append_system_message(&self) -> anyhow::Result<Option<String>> {
        if let Some(text) = &self.append_system_message {
            return Ok(Some(text.clone()));
        }
        if let Some(path) = &self.append_system_message_file {
            return Ok(Some(std::fs::read_to_string(path)?));
        }
        Ok(None)
    }
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "vantage", &mut std::io::stdout());
}

// TTY detection for stdin and stdout.
trait IsTerminal {
    fn is_terminal(&self) -> bool;
}

impl IsTerminal for std::io::Stdin {
    fn is_terminal(&self) -> bool {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe { libc::isatty(self.as_raw_fd()) != 0 }
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}

impl IsTerminal for std::io::Stdout {
    fn is_terminal(&self) -> bool {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe { libc::isatty(self.as_raw_fd()) != 0 }
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}
