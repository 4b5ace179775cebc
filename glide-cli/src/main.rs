use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use colored::Colorize;
use glide_core::{
    ClientConfig, ClusterScanCursor, ClusterValue, GlideClient, GlideClusterClient, NodeAddress,
    ReadFrom, ScanOptions, Value,
};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "glide-cli")]
#[command(about = "Glide CLI - command-line client for Valkey/Redis clusters", long_about = None)]
#[command(disable_help_flag = true)]
struct Args {
    /// Server host
    #[arg(short = 'h', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short = 'p', long, default_value = "6379")]
    port: u16,

    /// Connect in cluster mode
    #[arg(long)]
    cluster: bool,

    /// Use TLS
    #[arg(long)]
    tls: bool,

    /// Read policy (PRIMARY, PREFER_REPLICA, AZ_AFFINITY, ...)
    #[arg(long)]
    read_from: Option<ReadFrom>,

    /// YAML client configuration; overrides host, port and TLS flags
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,

    /// Command to execute (if not in interactive mode)
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

impl Args {
    fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_file(path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => ClientConfig::new(vec![NodeAddress::new(self.host.clone(), self.port)])
                .with_tls(self.tls),
        };
        if let Some(read_from) = self.read_from {
            config = config.with_read_from(read_from);
        }
        Ok(config)
    }

    fn target(&self) -> String {
        match &self.config {
            Some(path) => path.display().to_string(),
            None => format!("{}:{}", self.host, self.port),
        }
    }
}

enum Client {
    Cluster(GlideClusterClient),
    Standalone(GlideClient),
}

impl Client {
    async fn connect(args: &Args) -> Result<Self> {
        let config = args.client_config()?;
        let client = if args.cluster {
            Client::Cluster(GlideClusterClient::new(config).await?)
        } else {
            Client::Standalone(GlideClient::new(config).await?)
        };
        Ok(client)
    }

    async fn execute_command(&self, parts: &[String]) -> Result<String> {
        let start = Instant::now();

        let response = match parts[0].to_uppercase().as_str() {
            "HELP" => help_text(),
            "SCAN" => self.cmd_scan(&parts[1..]).await?,
            "NODES" => self.cmd_nodes(),
            "REFRESH" => self.cmd_refresh().await?,
            _ => {
                let args: Vec<&str> = parts.iter().map(String::as_str).collect();
                match self {
                    Client::Cluster(client) => {
                        format_cluster_value(client.custom_command(&args, None).await?)
                    }
                    Client::Standalone(client) => {
                        format_value(&client.custom_command(&args).await?, 0)
                    }
                }
            }
        };

        let elapsed = start.elapsed();
        Ok(format!(
            "{}\n{}",
            response,
            format!("({:.2?})", elapsed).dimmed()
        ))
    }

    /// `SCAN [MATCH pattern] [COUNT n]`, looping until the keyspace is covered
    async fn cmd_scan(&self, args: &[String]) -> Result<String> {
        let options = parse_scan_options(args)?;
        let mut keys = Vec::new();

        match self {
            Client::Cluster(client) => {
                let mut cursor = ClusterScanCursor::initial();
                loop {
                    let (used, batch) = client.scan(&cursor, &options).await?;
                    keys.extend(batch);
                    cursor = used.advance();
                    if cursor.is_finished() {
                        break;
                    }
                }
            }
            Client::Standalone(client) => {
                let mut cursor = 0;
                loop {
                    let (next, batch) = client.scan(cursor, &options).await?;
                    keys.extend(batch);
                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }
            }
        }

        if keys.is_empty() {
            return Ok("(empty array)".dimmed().to_string());
        }
        keys.sort();
        Ok(keys
            .iter()
            .enumerate()
            .map(|(i, key)| format!("{}) \"{}\"", i + 1, String::from_utf8_lossy(key)))
            .collect::<Vec<_>>()
            .join("\n"))
    }

    fn cmd_nodes(&self) -> String {
        let nodes = match self {
            Client::Cluster(client) => client.nodes(),
            Client::Standalone(client) => client.nodes(),
        };
        nodes
            .iter()
            .map(|node| {
                let zone = node.availability_zone.as_deref().unwrap_or("-");
                format!(
                    "{:<24} {:<8} {:<8} {}",
                    node.address.to_string(),
                    format!("{:?}", node.role).to_lowercase(),
                    format!("{:?}", node.health).to_lowercase(),
                    zone
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    async fn cmd_refresh(&self) -> Result<String> {
        match self {
            Client::Cluster(client) => {
                client.refresh_topology().await?;
                Ok(format!(
                    "{} (topology version {})",
                    "OK".green(),
                    client.topology_version()
                ))
            }
            Client::Standalone(_) => Err(anyhow::anyhow!("REFRESH requires --cluster")),
        }
    }

    async fn close(&self) {
        match self {
            Client::Cluster(client) => client.close().await,
            Client::Standalone(client) => client.close().await,
        }
    }
}

fn parse_scan_options(args: &[String]) -> Result<ScanOptions> {
    let mut options = ScanOptions::new();
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let value = iter
            .next()
            .ok_or_else(|| anyhow::anyhow!("Usage: SCAN [MATCH pattern] [COUNT n]"))?;
        match flag.to_uppercase().as_str() {
            "MATCH" => options = options.with_pattern(value.as_str()),
            "COUNT" => {
                let count = value.parse::<u32>().context("COUNT must be a positive integer")?;
                options = options.with_count(count);
            }
            other => return Err(anyhow::anyhow!("Unknown SCAN option: {}", other)),
        }
    }
    Ok(options)
}

fn format_cluster_value(value: ClusterValue<Value>) -> String {
    match value {
        ClusterValue::Single(value) => format_value(&value, 0),
        ClusterValue::MultiNode(results) => results
            .into_iter()
            .map(|(address, result)| {
                let body = match result {
                    Ok(value) => format_value(&value, 1),
                    Err(e) => format!("  {}", format!("(error) {}", e).red()),
                };
                format!("{}\n{}", address.to_string().bold(), body)
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn format_value(value: &Value, indent: usize) -> String {
    let pad = "  ".repeat(indent);
    match value {
        Value::Nil => format!("{}{}", pad, "(nil)".dimmed()),
        Value::Int(i) => format!("{}(integer) {}", pad, i),
        Value::Status(s) => format!("{}{}", pad, s.green()),
        Value::Error(e) => format!("{}{}", pad, format!("(error) {}", e).red()),
        Value::BulkString(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            if text.contains('\n') {
                text.lines()
                    .map(|line| format!("{}{}", pad, line))
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                format!("{}\"{}\"", pad, text)
            }
        }
        Value::Array(items) if items.is_empty() => format!("{}{}", pad, "(empty array)".dimmed()),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let inner = format_value(item, 0);
                format!("{}{}) {}", pad, i + 1, inner)
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn help_text() -> String {
    format!(
        r#"{}

{}
  SCAN [MATCH pattern] [COUNT n]   Iterate the whole keyspace (every primary in cluster mode)
  NODES                            List known nodes with role, health and zone
  REFRESH                          Reload the cluster slot map

{}
  Any other input is sent as a raw command and routed by its keys,
  e.g. SET key value, GET key, MGET {{tag}}a {{tag}}b, INFO server

{}
  HELP                             Show this help message
  QUIT                             Exit the CLI
"#,
        "Glide CLI - Available Commands".bold().cyan(),
        "Client Commands:".bold(),
        "Server Commands:".bold(),
        "Session:".bold(),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_str()));
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let client = Client::connect(&args)
        .await
        .with_context(|| format!("failed to connect to {}", args.target()))?;

    // Check if running in command mode or interactive mode
    let status = if !args.command.is_empty() {
        match client.execute_command(&args.command).await {
            Ok(output) => {
                info!("{}", output);
                0
            }
            Err(e) => {
                error!(error = %e, "{}", format!("Error: {}", e).red());
                1
            }
        }
    } else {
        run_interactive(&client, &args).await?;
        0
    };

    client.close().await;
    if status != 0 {
        std::process::exit(status);
    }
    Ok(())
}

async fn run_interactive(client: &Client, args: &Args) -> Result<()> {
    info!(
        "{}",
        format!("Glide CLI v{}", env!("CARGO_PKG_VERSION"))
            .bold()
            .cyan()
    );
    let mode = if args.cluster { "cluster" } else { "standalone" };
    info!("Connected to {} ({})", args.target(), mode);
    info!("Type {} for available commands\n", "HELP".bold());

    let mut rl = DefaultEditor::new()?;
    let prompt = format!("{}> ", format!("glide {}", args.target()).green());

    loop {
        match rl.readline(&prompt) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }

                rl.add_history_entry(&line)?;

                let parts: Vec<String> = line.split_whitespace().map(String::from).collect();
                let cmd = parts[0].to_uppercase();
                if cmd == "QUIT" || cmd == "EXIT" {
                    info!("Goodbye!");
                    break;
                }

                match client.execute_command(&parts).await {
                    Ok(output) => info!("{}", output),
                    Err(e) => {
                        error!(error = %e, "{}", format!("Error: {}", e).red());
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                info!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                info!("Goodbye!");
                break;
            }
            Err(err) => {
                error!(error = ?err, "Readline error: {:?}", err);
                break;
            }
        }
    }

    Ok(())
}
