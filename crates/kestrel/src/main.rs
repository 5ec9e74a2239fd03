//! Run the kestrel agent loop against OpenRouter.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable. Logs go
//! to stderr and are filtered by `RUST_LOG` (default `kestrel=info`).
//!
//! # Examples
//!
//! ```sh
//! # One-shot
//! kestrel --prompt "Summarize Cargo.toml" --tools tools.json
//!
//! # Interactive session, saved on exit
//! kestrel --system "You are terse." --save session.json
//!
//! # Resume it with streamed output
//! kestrel --resume session.json --stream
//! ```
//!
//! A tools file is a JSON array of tool descriptions, each with a shell
//! command template. `{{param}}` placeholders are replaced by the shell-quoted
//! argument value:
//!
//! ```json
//! [{
//!   "name": "list_dir",
//!   "description": "List a directory",
//!   "parameters": [{"name": "path", "type": "string", "required": true}],
//!   "execute": "ls -la {{path}}"
//! }]
//! ```

use clap::Parser;
use kestrel::agent::{
    Agent, AgentConfig, AgentEvent, AgentResponse, CompositeEventHandler, EventHandler,
    EventResponse, LoggingHandler, transcript,
};
use kestrel::context::TokenOptimizationConfig;
use kestrel::provider::{OpenRouterProvider, RetryConfig};
use kestrel::tools::{Tool, ToolArgs, ToolDescription, ToolError, ToolFuture, ToolRegistry};
use serde::Deserialize;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "kestrel", version)]
struct Cli {
    // ── Conversation ───────────────────────────────────────────
    /// Run a single turn with this message and exit (otherwise start a REPL)
    #[arg(long, short)]
    prompt: Option<String>,

    /// System prompt
    #[arg(long)]
    system: Option<String>,

    /// Resume from a saved transcript
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Save the transcript here on exit
    #[arg(long)]
    save: Option<PathBuf>,

    /// Stream the reply token by token (single request, no tools)
    #[arg(long)]
    stream: bool,

    // ── Model ──────────────────────────────────────────────────
    #[arg(long, default_value = "anthropic/claude-sonnet-4")]
    model: String,

    #[arg(long, default_value_t = 4096)]
    max_tokens: u32,

    #[arg(long, default_value_t = 0.7)]
    temperature: f32,

    /// Transport-level retries for 429/5xx/network errors
    #[arg(long, default_value_t = 2)]
    retries: u32,

    // ── Loop ───────────────────────────────────────────────────
    /// Provider round-trips per user turn
    #[arg(long, default_value_t = 10)]
    max_iterations: u32,

    /// JSON file of shell-command tools
    #[arg(long)]
    tools: Option<PathBuf>,

    /// Run the tool calls of one round concurrently
    #[arg(long)]
    parallel_tools: bool,

    /// Per-tool wall-clock limit in seconds
    #[arg(long, default_value_t = 120)]
    tool_timeout: u64,

    /// Ask before running each tool
    #[arg(long)]
    confirm_tools: bool,

    // ── Token management ───────────────────────────────────────
    /// JSON file with token optimization settings (flags below override it)
    #[arg(long)]
    optimization: Option<PathBuf>,

    /// Total token budget for the session
    #[arg(long)]
    target_budget: Option<usize>,

    /// Estimated history tokens above which compression starts
    #[arg(long)]
    compression_threshold: Option<usize>,

    /// Never compress history
    #[arg(long)]
    no_compression: bool,
}

// ── Shell-command tools ────────────────────────────────────────────

#[derive(Deserialize)]
struct ToolFileEntry {
    #[serde(flatten)]
    description: ToolDescription,
    /// Command template; `{{param}}` is replaced by the quoted argument.
    execute: String,
}

/// A tool defined in the tools file, run through `sh -c`.
struct ShellCommandTool {
    description: ToolDescription,
    template: String,
}

impl Tool for ShellCommandTool {
    fn description(&self) -> ToolDescription {
        self.description.clone()
    }

    fn execute(&self, args: ToolArgs) -> ToolFuture<'_, Result<String, ToolError>> {
        Box::pin(async move {
            let cmd = render_command(&self.template, &args);
            tracing::debug!("{}: {cmd}", self.description.name);

            let output = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(&cmd)
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| ToolError::failed(format!("failed to spawn `{cmd}`: {e}")))?;

            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !output.status.success() {
                return Err(ToolError::failed(format!(
                    "exited with {}\nstdout:\n{stdout}\nstderr:\n{stderr}",
                    output.status
                )));
            }
            if stderr.is_empty() {
                Ok(stdout.into_owned())
            } else {
                Ok(format!("{stdout}\n\n[stderr]\n{stderr}"))
            }
        })
    }
}

fn load_tools(path: &PathBuf, timeout: Duration) -> Result<ToolRegistry, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read tools file '{}': {e}", path.display()))?;
    let entries: Vec<ToolFileEntry> = serde_json::from_str(&content)
        .map_err(|e| format!("failed to parse tools file '{}': {e}", path.display()))?;

    let mut registry = ToolRegistry::new()
        .with_arg_validation(true)
        .with_default_timeout(Some(timeout));
    for entry in entries {
        registry.register(ShellCommandTool {
            description: entry.description,
            template: entry.execute,
        });
    }
    Ok(registry)
}

/// Replace `{{key}}` with the shell-quoted argument. Unknown placeholders
/// become empty strings.
fn render_command(template: &str, args: &ToolArgs) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some((head, tail)) = rest.split_once("{{") {
        let Some((key, after)) = tail.split_once("}}") else {
            break;
        };
        out.push_str(head);
        if let Some(value) = args.get(key.trim()) {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.push_str(&shell_quote(&text));
        }
        rest = after;
    }
    out.push_str(rest);
    out
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

// ── Event handling ─────────────────────────────────────────────────

/// Prints tool activity to stderr and optionally asks before each call.
struct CliEventHandler {
    confirm: bool,
}

impl EventHandler for CliEventHandler {
    fn on_event(&self, event: &AgentEvent<'_>) -> Option<EventResponse> {
        match event {
            AgentEvent::ToolExecuting {
                name, arguments, ..
            } => {
                eprintln!("  [tool] {name}({arguments})");
                if self.confirm && !confirm("  run it? [y/N] ") {
                    return Some(EventResponse::Deny("declined by the user".into()));
                }
            }
            AgentEvent::ToolResult {
                name,
                success: false,
                result,
                ..
            } => {
                eprintln!("  [tool] {name} failed: {result}");
            }
            _ => {}
        }
        None
    }
}

fn confirm(question: &str) -> bool {
    eprint!("{question}");
    let _ = io::stderr().flush();
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer).is_ok()
        && matches!(answer.trim(), "y" | "Y" | "yes")
}

// ── Setup ──────────────────────────────────────────────────────────

fn optimization_config(cli: &Cli) -> Result<TokenOptimizationConfig, String> {
    let mut config = match &cli.optimization {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read '{}': {e}", path.display()))?;
            serde_json::from_str(&content)
                .map_err(|e| format!("failed to parse '{}': {e}", path.display()))?
        }
        None => TokenOptimizationConfig::default(),
    };
    if let Some(budget) = cli.target_budget {
        config = config.with_target_budget(budget);
    }
    if let Some(threshold) = cli.compression_threshold {
        config = config.with_compression_threshold(threshold);
    }
    if cli.no_compression {
        config = config.with_compression(false);
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kestrel=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

// ── Running turns ──────────────────────────────────────────────────

async fn run_turn(agent: &mut Agent<'_>, input: &str, stream: bool) -> AgentResponse {
    if stream {
        let response = agent
            .process_stream(
                input,
                |delta| {
                    print!("{delta}");
                    let _ = io::stdout().flush();
                },
                |_| println!(),
            )
            .await;
        return response;
    }
    let response = agent.process(input).await;
    if !response.content.is_empty() {
        println!("{}", response.content);
    }
    response
}

fn report(response: &AgentResponse) {
    if !response.success() {
        eprintln!(
            "  [{}] {}",
            response.status,
            response.error.as_deref().unwrap_or_default()
        );
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let api_key = std::env::var("OPENROUTER_KEY")
        .map_err(|_| "OPENROUTER_KEY environment variable is not set".to_string())?;

    let provider = OpenRouterProvider::new(api_key, &cli.model)
        .map_err(|e| e.to_string())?
        .with_headers("https://crates.io/crates/kestrel", "kestrel")
        .with_max_tokens(cli.max_tokens)
        .with_temperature(cli.temperature)
        .with_retry(RetryConfig::with_retries(cli.retries));

    let tools = match &cli.tools {
        Some(path) => {
            let registry = load_tools(path, Duration::from_secs(cli.tool_timeout))?;
            eprintln!("  Loaded {} tool(s) from {}", registry.len(), path.display());
            registry
        }
        None => ToolRegistry::new(),
    };

    let mut config = AgentConfig::new()
        .with_max_iterations(cli.max_iterations)
        .with_optimization(optimization_config(&cli)?)
        .with_parallel_tools(cli.parallel_tools);
    if let Some(system) = &cli.system {
        config = config.with_system_prompt(system.clone());
    }
    config.validate().map_err(|e| e.to_string())?;

    let history = match &cli.resume {
        Some(path) => transcript::load(path).map_err(|e| e.to_string())?,
        None => Vec::new(),
    };

    let cancel = CancellationToken::new();
    tokio::spawn(watch_interrupts(cancel.clone()));

    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with(CliEventHandler {
            confirm: cli.confirm_tools,
        });
    let mut agent = Agent::new(&provider, &tools, config)
        .with_event_handler(&handler)
        .with_cancellation(cancel.clone())
        .with_history(history);

    let mut failed = false;
    if let Some(prompt) = &cli.prompt {
        let response = run_turn(&mut agent, prompt, cli.stream).await;
        report(&response);
        failed = !response.success();
    } else {
        repl(&mut agent, cli.stream, &cancel).await;
    }

    if let Some(path) = &cli.save {
        transcript::save(path, agent.history()).map_err(|e| e.to_string())?;
        eprintln!("  Saved transcript to {}", path.display());
    }
    if failed {
        return Err("turn did not complete".into());
    }
    Ok(())
}

/// First Ctrl-C cancels the running turn and ends the session. A second one
/// exits immediately, which also gets out of a blocking confirmation prompt.
async fn watch_interrupts(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    cancel.cancel();
    eprintln!("\n  Interrupted. Press Ctrl-C again to exit immediately.");
    if tokio::signal::ctrl_c().await.is_ok() {
        process::exit(130);
    }
}

/// Next input line, or `None` on end of input, a read error, or cancellation.
async fn next_input<R>(lines: &mut Lines<R>, cancel: &CancellationToken) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        line = lines.next_line() => line.ok().flatten(),
    }
}

/// Line-oriented session. `/reset`, `/usage`, and `/quit` are handled
/// locally; everything else is a user turn.
async fn repl(agent: &mut Agent<'_>, stream: bool, cancel: &CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        let Some(line) = next_input(&mut lines, cancel).await else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                agent.reset();
                eprintln!("  History cleared.");
                continue;
            }
            "/usage" => {
                eprintln!("  {}", agent.budget().usage().to_log_string());
                continue;
            }
            _ => {}
        }
        let response = run_turn(agent, input, stream).await;
        report(&response);
        if cancel.is_cancelled() {
            break;
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };
    // A cancelled stdin read stays parked on a blocking thread; exiting here
    // keeps runtime shutdown from waiting on it.
    process::exit(code);
}
