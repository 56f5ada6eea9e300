use clap::{Parser, Subcommand};
use lib::config::{default_config_dir, ConfigStore, PartialConfig};
use lib::gateway::{GatewayClient, ToolRequest};
use lib::{ChatSession, ConnectionManager, SessionOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "dashai")]
#[command(about = "Dashboard AI gateway CLI", long_about = None)]
struct Cli {
    /// Config directory (default: DASHAI_CONFIG_DIR or ~/.dashai)
    #[arg(long, short, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Show, update, or clear the stored gateway settings.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Check the gateway once and report status and latency.
    Health,

    /// Chat with the configured agent (interactive). `/clear` resets the log, `/exit` quits,
    /// Ctrl-C stops the reply being streamed.
    Chat {
        /// Override the system prompt for this session.
        #[arg(long)]
        system: Option<String>,
    },

    /// Invoke a gateway tool.
    Tool {
        /// Tool name
        name: String,
        #[arg(long)]
        action: Option<String>,
        /// Arguments as a JSON object
        #[arg(long, value_name = "JSON")]
        args: Option<String>,
        #[arg(long)]
        session_key: Option<String>,
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective config (token masked).
    Show,
    /// Merge the given fields into the stored config.
    Set {
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        agent: Option<String>,
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        streaming: Option<bool>,
        #[arg(long)]
        user: Option<String>,
    },
    /// Remove the stored config.
    Clear,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let store = ConfigStore::file(cli.config_dir.unwrap_or_else(default_config_dir));

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("dashai {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Config { action }) => run_config(&store, action),
        Some(Commands::Health) => run_health(store).await,
        Some(Commands::Chat { system }) => run_chat(store, system).await,
        Some(Commands::Tool {
            name,
            action,
            args,
            session_key,
            dry_run,
        }) => run_tool(store, name, action, args, session_key, dry_run).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_config(store: &ConfigStore, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => print_config(&store.load()),
        ConfigAction::Set {
            url,
            token,
            agent,
            enabled,
            streaming,
            user,
        } => {
            let config = store.save(&PartialConfig {
                gateway_url: url,
                token,
                agent_id: agent,
                enabled,
                streaming,
                session_user: user,
            })?;
            if !lib::is_valid(&config) {
                log::warn!("gateway url {:?} is not a valid http(s) url", config.gateway_url);
            }
            print_config(&config)
        }
        ConfigAction::Clear => {
            store.clear()?;
            println!("cleared stored gateway config");
            Ok(())
        }
    }
}

fn print_config(config: &lib::GatewayConfig) -> anyhow::Result<()> {
    let mut shown = config.clone();
    if !shown.token.is_empty() {
        shown.token = "****".to_string();
    }
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}

fn connect(store: ConfigStore) -> ConnectionManager {
    let client = Arc::new(GatewayClient::new(store.load()));
    ConnectionManager::new(client, store)
}

async fn run_health(store: ConfigStore) -> anyhow::Result<()> {
    let manager = connect(store);
    let health = manager.check_connection().await;
    let state = manager.state();
    match health.error {
        None => println!(
            "{}: {:?} ({}ms)",
            manager.config().base_url(),
            state.status,
            health.latency_ms
        ),
        Some(e) => {
            println!(
                "{}: {:?} ({}ms): {}",
                manager.config().base_url(),
                state.status,
                health.latency_ms,
                e
            );
            std::process::exit(2);
        }
    }
    if !manager.config().enabled {
        println!("note: gateway is disabled in config; features will use local fallbacks");
    }
    Ok(())
}

async fn run_chat(store: ConfigStore, system: Option<String>) -> anyhow::Result<()> {
    let manager = connect(store);
    let mut options = SessionOptions::default();
    if let Some(s) = system {
        options.system_prompt = s;
    }
    let session = ChatSession::new(manager.client().clone(), options);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        eprint!("> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }
        if input.eq_ignore_ascii_case("/clear") {
            session.clear_messages();
            continue;
        }
        run_turn(&session, input).await;
    }
    Ok(())
}

/// Send one message and echo the assistant reply as it streams in.
async fn run_turn(session: &ChatSession, input: &str) {
    let mut updates = session.subscribe();
    let mut printed = String::new();
    let send = session.send_message(input);
    tokio::pin!(send);
    loop {
        tokio::select! {
            _ = &mut send => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let reply = last_reply(&updates.borrow_and_update());
                print_progress(&mut printed, &reply);
            }
            _ = tokio::signal::ctrl_c() => {
                session.stop_streaming();
            }
        }
    }
    print_progress(&mut printed, &last_reply(&session.messages()));
    println!();
}

fn last_reply(messages: &[lib::SessionMessage]) -> String {
    messages
        .last()
        .filter(|m| m.role == lib::Role::Assistant)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

fn print_progress(printed: &mut String, reply: &str) {
    use std::io::Write;
    match reply.strip_prefix(printed.as_str()) {
        Some(rest) => print!("{}", rest),
        None => print!("\n{}", reply),
    }
    let _ = std::io::stdout().flush();
    *printed = reply.to_string();
}

async fn run_tool(
    store: ConfigStore,
    name: String,
    action: Option<String>,
    args: Option<String>,
    session_key: Option<String>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let client = GatewayClient::new(store.load());
    let args = match args {
        Some(raw) => Some(serde_json::from_str(&raw)?),
        None => None,
    };
    let request = ToolRequest {
        tool: name,
        action,
        args,
        session_key,
        dry_run: dry_run.then_some(true),
    };
    let res = client.invoke_tool(&request).await?;
    match (res.ok, res.error) {
        (true, _) => println!(
            "{}",
            serde_json::to_string_pretty(&res.result.unwrap_or(serde_json::Value::Null))?
        ),
        (false, Some(e)) => anyhow::bail!("tool failed ({}): {}", e.typ, e.message),
        (false, None) => anyhow::bail!("tool failed"),
    }
    Ok(())
}
