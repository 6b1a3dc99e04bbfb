use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use secrecy::SecretString;

use wisp_core::events::AgentSignal;
use wisp_core::messages::FinishReason;
use wisp_engine::tools::builtin_registry;
use wisp_engine::{AgentConfig, ConversationOrchestrator, TurnOptions};
use wisp_llm::ProviderKind;
use wisp_store::{ChatHistoryStore, EventLog, FileBackend, StorageBackend, TaskLedger};
use wisp_telemetry::{init_telemetry, TelemetryConfig};

/// Chat with a tool-using agent from the terminal.
#[derive(Parser, Debug)]
#[command(name = "wisp")]
struct Args {
    /// Provider family: openai-compatible, anthropic, gemini, or custom.
    #[arg(long, default_value = "openai-compatible")]
    provider: String,

    /// Chat-completions endpoint base URL, e.g. https://api.openai.com/v1
    #[arg(long, env = "WISP_ENDPOINT")]
    endpoint: String,

    /// Model name.
    #[arg(long, env = "WISP_MODEL")]
    model: String,

    /// API credential.
    #[arg(long, env = "WISP_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Directory for durable state (defaults to ~/.wisp).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Parse responses wholesale instead of streaming tokens.
    #[arg(long)]
    no_stream: bool,

    /// Tool round ceiling per turn.
    #[arg(long, default_value_t = 10)]
    max_tool_rounds: u32,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_telemetry(TelemetryConfig {
        json_output: args.json_logs,
        ..TelemetryConfig::default()
    });

    let provider_kind: ProviderKind = args.provider.parse().map_err(anyhow::Error::msg)?;
    let streaming = !args.no_stream;

    let config = AgentConfig {
        provider: provider_kind,
        endpoint: args.endpoint,
        api_key: SecretString::from(args.api_key),
        model: args.model,
        stream: streaming,
        max_tool_rounds: args.max_tool_rounds,
        ..AgentConfig::default()
    };
    config.validate()?;

    let data_dir = args.data_dir.unwrap_or_else(|| home().join(".wisp"));
    let backend: Arc<dyn StorageBackend> = Arc::new(FileBackend::open(&data_dir)?);
    let tasks = Arc::new(TaskLedger::open(backend.clone())?);
    let events = Arc::new(EventLog::open(backend.clone())?);
    let history = Arc::new(ChatHistoryStore::open(backend)?);

    let provider = Arc::new(config.resolve_provider());
    let tools = Arc::new(builtin_registry());
    let orchestrator = Arc::new(ConversationOrchestrator::new(
        config, provider, tools, tasks, events, history,
    ));

    // Print streamed tokens and tool activity as they happen.
    let mut signals = orchestrator.subscribe_signals();
    tokio::spawn(async move {
        while let Ok(signal) = signals.recv().await {
            match signal {
                AgentSignal::TokenDelta { delta, .. } => {
                    print!("{delta}");
                    let _ = std::io::stdout().flush();
                }
                AgentSignal::ToolStarted { tool_name, .. } => {
                    println!("\n[running {tool_name}]");
                }
                _ => {}
            }
        }
    });

    tracing::info!(data_dir = %data_dir.display(), "wisp ready; type a message, ctrl-d to exit");

    let stdin = std::io::stdin();
    let mut chat_id = None;
    let mut line = String::new();
    loop {
        print!("\n> ");
        let _ = std::io::stdout().flush();

        line.clear();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }

        let result = orchestrator
            .turn(
                text,
                TurnOptions {
                    chat_id: chat_id.clone(),
                    ..TurnOptions::default()
                },
            )
            .await?;
        chat_id = Some(result.chat_id.clone());

        if streaming && result.finish_reason == FinishReason::Stop {
            // Tokens already printed; just terminate the line.
            println!();
        } else {
            println!("{}", result.content);
        }
    }

    Ok(())
}

fn home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}
