// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::collections::HashMap;
use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use clap::Parser;
use cli::{AuthCommands, Cli, Commands, JsonStandardArg, McpCommands, OutputFormatArg};
use vantage_ci::{find_project_root, CiOptions, CiRunner, JsonStandard, OutputFormat};
use vantage_config::{AuthRecord, AuthStore};
use vantage_input::{history, parse_frontmatter, parse_workflow};
use vantage_model::catalog::ModelCatalogEntry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    // Handle subcommands first (before loading config)
    if let Some(cmd) = &cli.command {
        match cmd {
            Commands::Auth { command } => {
                return run_auth_command(command);
            }
            Commands::Mcp { command } => {
                let config = Arc::new(vantage_config::load(cli.config.as_deref())?);
                return run_mcp_command(command, &config).await;
            }
            Commands::Completions { shell } => {
                cli::print_completions(*shell);
                return Ok(());
            }
            Commands::ShowConfig => {
                let config = vantage_config::load(cli.config.as_deref())?;
                println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
                return Ok(());
            }
            Commands::Chats { limit } => {
                print_chats(*limit);
                return Ok(());
            }
            Commands::Validate { file } => {
                return validate_workflow(file);
            }
            Commands::ListModels {
                provider,
                refresh,
                json,
            } => {
                let config = vantage_config::load(cli.config.as_deref())?;
                return list_models_cmd(&config, provider.as_deref(), *refresh, *json).await;
            }
            Commands::ListProviders { verbose, json } => {
                return list_providers_cmd(*verbose, *json);
            }
        }
    }

    if let Some(secs) = cli.retry_timeout {
        // C5's global retry budget reads this at construction time; setting
        // it here means the flag wins over any pre-existing env value.
        std::env::set_var("VANTAGE_RETRY_TIMEOUT", secs.to_string());
    }

    let config = Arc::new(vantage_config::load(cli.config.as_deref())?);

    if cli.server {
        run_server(cli, config).await
    } else {
        run_ci(cli, config).await
    }
}

// ── Auth command handler ──────────────────────────────────────────────────────

fn run_auth_command(cmd: &AuthCommands) -> anyhow::Result<()> {
    let store = AuthStore::open();
    match cmd {
        AuthCommands::Login { provider, api_key } => {
            let key = match api_key {
                Some(k) => k.clone(),
                None => {
                    eprint!("API key for {provider}: ");
                    io::stderr().flush().ok();
                    let mut line = String::new();
                    io::stdin().read_line(&mut line)?;
                    line.trim().to_string()
                }
            };
            if key.is_empty() {
                anyhow::bail!("no API key provided");
            }
            store.set(provider, AuthRecord::ApiKey { key })?;
            println!("Stored credentials for {provider}.");
            Ok(())
        }
        AuthCommands::Logout { provider } => {
            if store.remove(provider)? {
                println!("Removed credentials for {provider}.");
            } else {
                println!("No stored credentials for {provider}.");
            }
            Ok(())
        }
        AuthCommands::List => {
            let all = store.all()?;
            if all.is_empty() {
                println!("No stored credentials.");
                return Ok(());
            }
            for (provider, record) in all {
                let kind = match record {
                    AuthRecord::ApiKey { .. } => "api_key",
                    AuthRecord::OAuth { .. } => "oauth",
                };
                println!("{provider:<20} {kind}");
            }
            Ok(())
        }
        AuthCommands::Status { provider } => {
            match store.get(provider)? {
                Some(_) => println!("{provider}: configured"),
                None => println!("{provider}: not configured"),
            }
            Ok(())
        }
    }
}

// ── MCP command handler ───────────────────────────────────────────────────────

async fn run_mcp_command(
    cmd: &McpCommands,
    config: &Arc<vantage_config::Config>,
) -> anyhow::Result<()> {
    match cmd {
        McpCommands::Serve => {
            let registry = Arc::new(build_headless_registry(config).await?);
            vantage_mcp::serve_stdio(registry).await
        }
    }
}

/// Build a bare tool registry, no agent loop attached — used to expose tools
/// over MCP stdio without needing a model provider to drive them.
async fn build_headless_registry(
    config: &Arc<vantage_config::Config>,
) -> anyhow::Result<vantage_tools::ToolRegistry> {
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::{mpsc, Mutex};
    use vantage_bootstrap::{build_tool_registry, ToolSetProfile};
    use vantage_tools::events::TodoItem;

    let model: Arc<dyn vantage_model::ModelProvider> =
        Arc::from(vantage_model::from_config(&config.model)?);
    let mode_lock = Arc::new(Mutex::new(config.agent.default_mode));
    let (tool_tx, _tool_rx) = mpsc::channel::<vantage_tools::events::ToolEvent>(64);
    let todos: Arc<Mutex<Vec<TodoItem>>> = Arc::new(Mutex::new(Vec::new()));

    Ok(build_tool_registry(
        config,
        model,
        ToolSetProfile::Full {
            question_tx: None,
            todos,
            task_depth: Arc::new(AtomicUsize::new(0)),
        },
        mode_lock,
        tool_tx,
        vantage_core::AgentRuntimeContext::default(),
    ))
}

/// Validate a workflow file: parse frontmatter, count steps, report to stdout.
fn validate_workflow(file: &std::path::Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("reading workflow file {}", file.display()))?;

    let (frontmatter, markdown_body) = parse_frontmatter(&content);

    let workflow = parse_workflow(markdown_body);

    // Title: frontmatter overrides H1
    let title = frontmatter
        .as_ref()
        .and_then(|fm| fm.title.as_deref())
        .or(workflow.title.as_deref());
    if let Some(t) = title {
        println!("Title: {t}");
    }

    if let Some(fm) = &frontmatter {
        println!("Frontmatter: OK");
        if let Some(models) = &fm.models {
            println!("  models ({}):", models.len());
            let mut pairs: Vec<_> = models.iter().collect();
            pairs.sort_by_key(|(k, _)| k.as_str());
            for (mode, model) in pairs {
                println!("    {mode}: {model}");
            }
        }
        if let Some(vars) = &fm.vars {
            println!("  vars ({}):", vars.len());
            let mut pairs: Vec<_> = vars.iter().collect();
            pairs.sort_by_key(|(k, _)| k.as_str());
            for (k, v) in pairs {
                println!("    {k} = {v}");
            }
        }
    } else {
        println!("Frontmatter: (none)");
    }

    if let Some(preamble) = &workflow.system_prompt_append {
        println!(
            "Preamble: {} chars (appended to system prompt)",
            preamble.chars().count()
        );
    }

    let mut queue = workflow.steps;
    let total = queue.len();
    println!("Steps: {total}");

    let mut i = 0;
    while let Some(step) = queue.pop() {
        i += 1;
        let label = step.label.as_deref().unwrap_or("(unlabelled)");
        let mode = step.options.mode.as_deref().unwrap_or("(inherit)");
        let provider = step.options.provider.as_deref().unwrap_or("(inherit)");
        let model = step.options.model.as_deref().unwrap_or("(inherit)");
        let timeout = step
            .options
            .timeout_secs
            .map(|t| format!("{t}s"))
            .unwrap_or_else(|| "(inherit)".to_string());
        println!("  Step {i}/{total}: {label:?}  mode={mode}  provider={provider}  model={model}  timeout={timeout}");
        if !step.content.is_empty() {
            let preview = step.content.chars().take(80).collect::<String>();
            let ellipsis = if step.content.chars().count() > 80 {
                "…"
            } else {
                ""
            };
            println!("    {preview}{ellipsis}");
        }
    }

    println!("\nWorkflow is valid.");
    Ok(())
}

/// List available models, optionally querying the provider API for live data.
async fn list_models_cmd(
    config: &vantage_config::Config,
    provider_filter: Option<&str>,
    refresh: bool,
    as_json: bool,
) -> anyhow::Result<()> {
    // Validate provider filter against the registry.
    if let Some(prov) = provider_filter {
        if vantage_model::get_driver(prov).is_none() {
            eprintln!("Unknown provider: {prov:?}");
            eprintln!("\nAvailable providers (run `vantage list-providers` for details):");
            for d in vantage_model::list_drivers() {
                eprintln!("  {:20} {}", d.id, d.name);
            }
            anyhow::bail!("Invalid provider: {prov}");
        }
    }

    let entries: Vec<ModelCatalogEntry> = if refresh {
        // Query the configured (or filtered) provider's live API.
        let model_cfg = if let Some(prov) = provider_filter {
            let mut c = config.model.clone();
            c.provider = prov.to_string();
            c
        } else {
            config.model.clone()
        };
        let model = vantage_model::from_config(&model_cfg)?;
        let mut live = model.list_models().await?;
        if let Some(prov) = provider_filter {
            live.retain(|e| e.provider == prov);
        }
        live
    } else {
        // Use static catalog only.
        let mut all = vantage_model::catalog::static_catalog();
        if let Some(prov) = provider_filter {
            all.retain(|e| e.provider == prov);
        }
        all.sort_by(|a, b| a.provider.cmp(&b.provider).then(a.id.cmp(&b.id)));
        all
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No models found.");
        return Ok(());
    }

    // Determine column widths.
    let id_w = entries
        .iter()
        .map(|e| e.id.len())
        .max()
        .unwrap_or(10)
        .max(10);
    let prov_w = entries
        .iter()
        .map(|e| e.provider.len())
        .max()
        .unwrap_or(8)
        .max(8);

    println!(
        "{:<id_w$}  {:<prov_w$}  {:>12}  {:>16}  DESCRIPTION",
        "ID",
        "PROVIDER",
        "CTX WINDOW",
        "MAX OUT TOKENS",
        id_w = id_w,
        prov_w = prov_w,
    );
    println!("{}", "-".repeat(id_w + prov_w + 50));

    for e in &entries {
        let ctx = if e.context_window == 0 {
            "  -".to_string()
        } else {
            format!("{:>12}", e.context_window)
        };
        let max_out = if e.max_output_tokens == 0 {
            "  -".to_string()
        } else {
            format!("{:>16}", e.max_output_tokens)
        };
        println!(
            "{:<id_w$}  {:<prov_w$}  {}  {}  {}",
            e.id,
            e.provider,
            ctx,
            max_out,
            e.description,
            id_w = id_w,
            prov_w = prov_w,
        );
    }
    println!("\nTotal: {} model(s)", entries.len());
    Ok(())
}

/// List all registered model providers.
fn list_providers_cmd(verbose: bool, as_json: bool) -> anyhow::Result<()> {
    let drivers = vantage_model::list_drivers();

    if as_json {
        #[derive(serde::Serialize)]
        struct ProviderJson {
            id: &'static str,
            name: &'static str,
            description: &'static str,
            default_api_key_env: Option<&'static str>,
            default_base_url: Option<&'static str>,
            requires_api_key: bool,
        }
        let rows: Vec<ProviderJson> = drivers
            .iter()
            .map(|d| ProviderJson {
                id: d.id,
                name: d.name,
                description: d.description,
                default_api_key_env: d.default_api_key_env,
                default_base_url: d.default_base_url,
                requires_api_key: d.requires_api_key,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("Supported Model Providers ({} total)\n", drivers.len());

    if verbose {
        for d in drivers {
            println!("  {} — {}", d.id, d.name);
            println!("    {}", d.description);
            if let Some(env) = d.default_api_key_env {
                println!("    API key env : {env}");
            }
            if let Some(url) = d.default_base_url {
                println!("    Default URL : {url}");
            }
            if !d.requires_api_key {
                println!("    Auth        : none required");
            }
            println!();
        }
    } else {
        let id_w = drivers
            .iter()
            .map(|d| d.id.len())
            .max()
            .unwrap_or(10)
            .max(10);
        let name_w = drivers
            .iter()
            .map(|d| d.name.len())
            .max()
            .unwrap_or(8)
            .max(8);
        println!("{:<id_w$}  {:<name_w$}  DESCRIPTION", "ID", "NAME");
        println!("{}", "-".repeat(id_w + name_w + 40));
        for d in drivers {
            println!("{:<id_w$}  {:<name_w$}  {}", d.id, d.name, d.description);
        }
        println!("\nUse `vantage list-providers --verbose` for API key and URL details.");
        println!("Use `vantage list-models --provider <ID>` to see models for a specific provider.");
    }
    Ok(())
}

/// Print the list of saved conversations to stdout.
fn print_chats(limit: usize) {
    match history::list(Some(limit)) {
        Ok(entries) if entries.is_empty() => {
            println!("No saved conversations found.");
            println!(
                "Conversations are stored in: {}",
                history::history_dir().display()
            );
        }
        Ok(entries) => {
            println!(
                "{:<45}  {:<16}  {:<5}  TITLE",
                "ID (use with --resume)", "DATE", "TURNS"
            );
            println!("{}", "-".repeat(95));
            for e in &entries {
                let display_id = if e.id.len() > 44 {
                    format!("{}…", &e.id[..43])
                } else {
                    e.id.clone()
                };
                let date = e.timestamp.replace('T', " ");
                let date = &date[..16.min(date.len())];
                let title = if e.title.chars().count() > 50 {
                    format!("{}…", e.title.chars().take(49).collect::<String>())
                } else {
                    e.title.clone()
                };
                println!(
                    "{:<45}  {:<16}  {:<5}  {}",
                    display_id, date, e.turns, title
                );
            }
            println!("\nTotal: {} conversation(s)", entries.len());
            println!("History dir: {}", history::history_dir().display());
        }
        Err(e) => {
            eprintln!("Error listing conversations: {e}");
            std::process::exit(1);
        }
    }
}

/// Resolve the conversation id to resume: explicit `--resume ID`, empty
/// `--resume` (pick interactively), or `--continue` (most recent, no picker).
fn resolve_resume_id(cli: &Cli) -> anyhow::Result<Option<String>> {
    if cli.r#continue {
        let entries = history::list(Some(1)).context("listing saved conversations")?;
        return Ok(entries.into_iter().next().map(|e| e.id));
    }
    match &cli.resume {
        None => Ok(None),
        Some(id) if !id.is_empty() => Ok(Some(id.clone())),
        Some(_) => pick_chat_with_fzf(),
    }
}

/// Launch `fzf` and let the user pick a conversation to resume.
fn pick_chat_with_fzf() -> anyhow::Result<Option<String>> {
    let entries = history::list(None).context("listing saved conversations")?;
    if entries.is_empty() {
        anyhow::bail!(
            "No saved conversations found.\n\
             Start a conversation with vantage first, then use --resume to continue it."
        );
    }

    let lines: String = entries
        .iter()
        .map(|e| {
            let date = e.timestamp.replace('T', " ");
            let date = &date[..16.min(date.len())];
            let turns_label = if e.turns == 1 {
                "1 turn".to_string()
            } else {
                format!("{} turns", e.turns)
            };
            format!("{}\t{}\t{}\t{}", e.id, date, e.title, turns_label)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut child = std::process::Command::new("fzf")
        .args([
            "--delimiter=\t",
            "--with-nth=3,2,4",
            "--tabstop=1",
            "--header=Resume conversation  (Enter: open · Esc: cancel)",
            "--header-first",
            "--height=50%",
            "--min-height=10",
            "--reverse",
            "--no-sort",
            "--bind=ctrl-/:toggle-preview",
            "--preview=echo {}",
            "--preview-window=down:2:wrap:hidden",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .context(
            "failed to launch fzf — make sure fzf is installed\n\
             (https://github.com/junegunn/fzf or `apt install fzf`)",
        )?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(lines.as_bytes());
    }

    let output = child.wait_with_output()?;

    if !output.status.success() {
        return Ok(None);
    }

    let selected = String::from_utf8_lossy(&output.stdout);
    let selected = selected.trim();
    if selected.is_empty() {
        return Ok(None);
    }

    let id = selected.split('\t').next().unwrap_or("").trim().to_string();
    if id.is_empty() {
        anyhow::bail!("fzf returned an unexpected selection: {selected:?}");
    }
    Ok(Some(id))
}

async fn run_ci(cli: Cli, config: Arc<vantage_config::Config>) -> anyhow::Result<()> {
    // ── Detect project root ──────────────────────────────────────────────────
    let project_root = find_project_root().ok();

    // ── --resume / --continue ────────────────────────────────────────────────
    // `--no-fork` keeps the resumed session id in place; by default a new id
    // is assigned and history copied under it, so the original is preserved
    // as the parent session.
    if let Some(id) = resolve_resume_id(&cli)? {
        let file_path =
            history::resolve(&id).with_context(|| format!("resolving conversation id '{id}'"))?;

        let file_path = if cli.no_fork {
            file_path
        } else {
            history::fork(&file_path).with_context(|| {
                format!("forking conversation '{id}' to a new session id")
            })?
        };

        if let Some(prompt) = &cli.prompt {
            use std::fmt::Write as _;
            let current = std::fs::read_to_string(&file_path)
                .with_context(|| format!("reading {}", file_path.display()))?;
            let mut updated = current.trim_end().to_string();
            let _ = write!(updated, "\n\n## User\n\n{}\n", prompt.trim());
            std::fs::write(&file_path, &updated)
                .with_context(|| format!("appending user message to {}", file_path.display()))?;
        }

        // Resume via ConversationRunner for markdown conversation files.
        use vantage_ci::{ConversationOptions, ConversationRunner};
        let content = std::fs::read_to_string(&file_path)
            .with_context(|| format!("reading {}", file_path.display()))?;
        let opts = ConversationOptions {
            mode: cli.mode,
            model_override: cli.model,
            file_path,
            content,
        };
        return ConversationRunner::new(config).run(opts).await;
    }

    // ── Read workflow input ──────────────────────────────────────────────────
    let input = if let Some(path) = &cli.file {
        std::fs::read_to_string(path)
            .with_context(|| format!("reading input file {}", path.display()))?
    } else if !is_stdin_tty() {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("reading stdin")?;
        buf
    } else {
        String::new()
    };

    // ── Parse template variables ──────────────────────────────────────────────
    let mut vars: HashMap<String, String> = HashMap::new();
    for spec in &cli.vars {
        if let Some((k, v)) = vantage_ci::template::parse_var(spec) {
            vars.insert(k, v);
        } else {
            eprintln!(
                "[vantage:warn] Ignoring invalid --var argument: {spec:?}  (expected KEY=VALUE)"
            );
        }
    }

    // ── Map CLI output format ─────────────────────────────────────────────────
    let output_format = match cli.output_format {
        OutputFormatArg::Conversation => OutputFormat::Conversation,
        OutputFormatArg::Json => OutputFormat::Json,
        OutputFormatArg::Compact => OutputFormat::Compact,
    };

    let system_message = cli.effective_system_message()?;
    let append_system_prompt = cli.effective_append_system_message()?;

    let opts = CiOptions {
        mode: cli.mode,
        model_override: cli.model,
        input,
        extra_prompt: cli.prompt,
        project_root,
        output_format,
        artifacts_dir: cli.artifacts_dir,
        vars,
        step_timeout_secs: cli.step_timeout,
        run_timeout_secs: cli.run_timeout,
        dry_run: cli.dry_run,
        output_last_message: cli.output_last_message,
        system_prompt_file: None,
        append_system_prompt,
        trace_level: cli.verbose,
        json_standard: map_json_standard(cli.json_standard),
        compact_json: cli.compact_json,
    };

    run_with_inline_system_message(config, opts, system_message).await
}

/// `CiOptions::system_prompt_file` expects a path; `--system-message` instead
/// supplies the text inline. Spill it to a scratch file so the runner's
/// existing file-based override path handles both uniformly.
async fn run_with_inline_system_message(
    config: Arc<vantage_config::Config>,
    mut opts: CiOptions,
    inline_system_message: Option<String>,
) -> anyhow::Result<()> {
    let _scratch;
    if let Some(text) = inline_system_message {
        let mut f =
            tempfile::NamedTempFile::new().context("creating scratch system prompt file")?;
        f.write_all(text.as_bytes())
            .context("writing scratch system prompt file")?;
        opts.system_prompt_file = Some(f.path().to_path_buf());
        _scratch = Some(f);
    }
    CiRunner::new(config).run(opts).await
}

/// Parse one stdin line into a message string per spec §6: JSON object with
/// a `message` field first, falling back to the raw line when `--interactive`
/// is set. Returns `None` (after printing a `StdinParseError` envelope) for a
/// non-JSON line without `--interactive`, or for a blank line.
fn parse_stdin_line(line: &str, interactive: bool) -> Option<String> {
    if line.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(serde_json::Value::Object(obj)) => Some(
            obj.get("message")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_else(|| line.to_string()),
        ),
        _ if interactive => Some(line.to_string()),
        _ => {
            eprintln!(
                "{}",
                serde_json::json!({
                    "type": "error",
                    "errorType": "StdinParseError",
                    "message": "line is not valid JSON; pass --interactive to accept plain text",
                })
            );
            None
        }
    }
}

fn build_server_opts(
    cli: &Cli,
    project_root: Option<PathBuf>,
    message: String,
) -> anyhow::Result<CiOptions> {
    let output_format = match cli.output_format {
        OutputFormatArg::Conversation => OutputFormat::Conversation,
        OutputFormatArg::Json => OutputFormat::Json,
        OutputFormatArg::Compact => OutputFormat::Compact,
    };

    Ok(CiOptions {
        mode: cli.mode,
        model_override: cli.model.clone(),
        input: String::new(),
        extra_prompt: Some(message),
        project_root,
        output_format,
        artifacts_dir: cli.artifacts_dir.clone(),
        vars: HashMap::new(),
        step_timeout_secs: cli.step_timeout,
        run_timeout_secs: cli.run_timeout,
        dry_run: cli.dry_run,
        output_last_message: None,
        system_prompt_file: None,
        append_system_prompt: cli.effective_append_system_message()?,
        trace_level: cli.verbose,
        json_standard: map_json_standard(cli.json_standard),
        compact_json: cli.compact_json,
    })
}

async fn run_one_server_turn(
    cli: &Cli,
    config: &Arc<vantage_config::Config>,
    project_root: &Option<PathBuf>,
    message: String,
) {
    let opts = match build_server_opts(cli, project_root.clone(), message) {
        Ok(o) => o,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::json!({
                    "type": "error",
                    "errorType": "SessionError",
                    "message": e.to_string(),
                })
            );
            return;
        }
    };
    if let Err(e) = CiRunner::new(config.clone()).run(opts).await {
        eprintln!(
            "{}",
            serde_json::json!({
                "type": "error",
                "errorType": "SessionError",
                "message": e.to_string(),
            })
        );
    }
}

/// `--server`: read one request per stdin line and run each as its own
/// headless session (spec §6). Each line is parsed as JSON first; on parse
/// failure, `--interactive` wraps it as a plain message instead of an error.
///
/// By default this is strictly synchronous — one line in, one turn out,
/// nothing read from stdin while a turn is in flight — since that is the
/// simplest contract a caller can rely on. `--always-accept-stdin` switches
/// to an async reader so lines arriving mid-turn are queued instead of never
/// being read; `--auto-merge-queued-messages` additionally coalesces lines
/// that arrive within a short debounce window into one message.
async fn run_server(cli: Cli, config: Arc<vantage_config::Config>) -> anyhow::Result<()> {
    let project_root = find_project_root().ok();

    if !cli.always_accept_stdin {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = line.context("reading stdin")?;
            let Some(message) = parse_stdin_line(&line, cli.interactive) else {
                continue;
            };
            run_one_server_turn(&cli, &config, &project_root, message).await;
        }
        return Ok(());
    }

    run_server_queued(cli, config, project_root).await
}

/// Debounce window for `--auto-merge-queued-messages`: lines arriving within
/// this long of each other after the first are folded into the same message.
const QUEUE_MERGE_DEBOUNCE: std::time::Duration = std::time::Duration::from_millis(200);

async fn run_server_queued(
    cli: Cli,
    config: Arc<vantage_config::Config>,
    project_root: Option<PathBuf>,
) -> anyhow::Result<()> {
    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    tokio::task::spawn_blocking(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines().map_while(Result::ok) {
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut queue: std::collections::VecDeque<String> = std::collections::VecDeque::new();
    let mut stdin_open = true;

    loop {
        if queue.is_empty() {
            if !stdin_open {
                break;
            }
            match line_rx.recv().await {
                Some(raw) => {
                    if let Some(msg) = parse_stdin_line(&raw, cli.interactive) {
                        queue.push_back(msg);
                    }
                    continue;
                }
                None => break,
            }
        }

        let message = if cli.auto_merge_queued_messages {
            let mut merged = queue.pop_front().expect("queue checked non-empty above");
            loop {
                tokio::select! {
                    biased;
                    _ = tokio::time::sleep(QUEUE_MERGE_DEBOUNCE) => break,
                    maybe = line_rx.recv() => {
                        match maybe {
                            Some(raw) => {
                                if let Some(msg) = parse_stdin_line(&raw, cli.interactive) {
                                    merged.push('\n');
                                    merged.push_str(&msg);
                                }
                            }
                            None => { stdin_open = false; break; }
                        }
                    }
                }
            }
            merged
        } else {
            queue.pop_front().expect("queue checked non-empty above")
        };

        let run_fut = run_one_server_turn(&cli, &config, &project_root, message);
        tokio::pin!(run_fut);
        loop {
            tokio::select! {
                biased;
                _ = &mut run_fut => break,
                maybe = line_rx.recv(), if stdin_open => {
                    match maybe {
                        Some(raw) => {
                            if let Some(msg) = parse_stdin_line(&raw, cli.interactive) {
                                queue.push_back(msg);
                            }
                        }
                        None => stdin_open = false,
                    }
                }
            }
        }
    }

    Ok(())
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

fn map_json_standard(arg: JsonStandardArg) -> JsonStandard {
    match arg {
        JsonStandardArg::Opencode => JsonStandard::Opencode,
        JsonStandardArg::Claude => JsonStandard::Claude,
    }
}

fn is_stdin_tty() -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        unsafe { libc::isatty(io::stdin().as_raw_fd()) != 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}
