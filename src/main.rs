//! Web3 Funnel CLI
//!
//! Batched event tracking for decentralized applications.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use web3_funnel::{
    collector::{BrowserContext, CustomData, EventRecord, EventType, TransactionInfo, UiElement},
    config::Config,
    core::{Tracker, TrackerConfig, Visibility},
    delivery::create_shared_log_with_persistence,
    logging,
    transport::{register_website, HttpTransport, RegisterRequest, Transport, TransportConfig},
    EnvironmentProbe, WalletType, VERSION,
};

#[derive(Parser)]
#[command(name = "web3-funnel")]
#[command(version = VERSION)]
#[command(about = "Batched event tracking for decentralized applications", long_about = None)]
struct Cli {
    /// API base URL (overrides the config file)
    #[arg(long, global = true)]
    api: Option<String>,

    /// Website API key (overrides the config file)
    #[arg(long, global = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reference ingest and aggregation API
    #[cfg(feature = "server")]
    Serve {
        /// Port to listen on (defaults to the configured port)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: std::net::IpAddr,
    },

    /// Register a website and print its credentials
    Register {
        #[arg(long)]
        name: String,

        #[arg(long)]
        domain: String,

        #[arg(long)]
        description: Option<String>,

        /// Store the issued website id and API key in the config file
        #[arg(long)]
        save: bool,
    },

    /// Send a single event
    Track {
        /// Event type (page_view, wallet_connect, custom_event, ...)
        #[arg(long)]
        event_type: String,

        #[arg(long, default_value = "cli-user")]
        user_id: String,

        #[arg(long, default_value = "cli-session")]
        session_id: String,

        /// Custom data as a JSON object
        #[arg(long)]
        data: Option<String>,
    },

    /// Replay JSON-lines tracking calls through a tracker
    Replay {
        /// File with one tracking call per line
        file: PathBuf,
    },

    /// Show the device info derived from a user agent
    Probe {
        #[arg(long)]
        user_agent: String,

        #[arg(long)]
        url: Option<String>,
    },

    /// Show configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(api) = cli.api {
        config.api_base_url = api;
    }
    if let Some(key) = cli.api_key {
        config.api_key = Some(key);
    }
    logging::init(&config.log_level);

    match cli.command {
        #[cfg(feature = "server")]
        Commands::Serve { port, host } => cmd_serve(&config, host, port).await,
        Commands::Register {
            name,
            domain,
            description,
            save,
        } => cmd_register(config, name, domain, description, save).await,
        Commands::Track {
            event_type,
            user_id,
            session_id,
            data,
        } => cmd_track(&config, &event_type, user_id, session_id, data.as_deref()).await,
        Commands::Replay { file } => cmd_replay(&config, &file).await,
        Commands::Probe { user_agent, url } => {
            cmd_probe(&config, user_agent, url);
            Ok(())
        }
        Commands::Config => {
            cmd_config(&config);
            Ok(())
        }
    }
}

#[cfg(feature = "server")]
async fn cmd_serve(config: &Config, host: std::net::IpAddr, port: Option<u16>) -> anyhow::Result<()> {
    use web3_funnel::server::{run, ServerConfig};

    let server_config = ServerConfig::new(port.unwrap_or(config.server_port)).with_host(host);
    let (addr, shutdown_tx) = run(server_config).await?;

    println!("Web3 Funnel API v{VERSION}");
    println!("  Listening on http://{addr}/api/v1");
    println!();
    println!("Press Ctrl+C to stop");

    let stop = Arc::new(tokio::sync::Notify::new());
    ctrlc_handler(Arc::clone(&stop))?;
    stop.notified().await;

    let _ = shutdown_tx.send(());
    println!();
    println!("Stopped.");
    Ok(())
}

async fn cmd_register(
    mut config: Config,
    name: String,
    domain: String,
    description: Option<String>,
    save: bool,
) -> anyhow::Result<()> {
    let registration = register_website(
        &config.api_base_url,
        &RegisterRequest {
            name,
            domain,
            description,
        },
    )
    .await?;

    println!("Website registered");
    println!("  Website ID: {}", registration.website_id);
    println!("  Domain:     {}", registration.domain);
    println!("  API key:    {}", registration.api_key);
    println!("  Status:     {}", registration.status);

    if save {
        config.website_id = Some(registration.website_id);
        config.api_key = Some(registration.api_key);
        config.save()?;
        println!();
        println!("Saved to {:?}", Config::config_path());
    }
    Ok(())
}

fn transport(config: &Config) -> anyhow::Result<HttpTransport> {
    let Some(api_key) = config.api_key.clone() else {
        bail!("no API key configured; pass --api-key or run `register --save`");
    };
    let transport = HttpTransport::new(
        TransportConfig::new(&config.api_base_url, api_key).with_timeout(config.request_timeout),
    )?;
    Ok(transport)
}

async fn cmd_track(
    config: &Config,
    event_type: &str,
    user_id: String,
    session_id: String,
    data: Option<&str>,
) -> anyhow::Result<()> {
    let Some(event_type) = EventType::parse(event_type) else {
        bail!(
            "unknown event type {event_type:?}; expected one of: {}",
            EventType::ALL.map(|t| t.as_str()).join(", ")
        );
    };

    let mut record = EventRecord::new(event_type, user_id, session_id);
    if let Some(data) = data {
        let custom: CustomData =
            serde_json::from_str(data).context("--data must be a JSON object")?;
        record = record.with_custom_data(custom);
    }

    let response = transport(config)?.submit_one(&record).await?;
    match response.data {
        Some(receipt) => println!("Tracked {} ({})", receipt.event_id, receipt.timestamp),
        None => println!("Tracked"),
    }
    Ok(())
}

/// One line of a replay file.
#[derive(Debug, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
enum ReplayCall {
    PageView {
        #[serde(default)]
        context: BrowserContext,
    },
    WalletConnect {
        address: String,
        #[serde(default)]
        wallet_type: Option<WalletType>,
    },
    WalletDisconnect {
        #[serde(default)]
        address: Option<String>,
    },
    TransactionStart {
        transaction: TransactionInfo,
    },
    TransactionComplete {
        transaction: TransactionInfo,
    },
    TransactionFailed {
        transaction: TransactionInfo,
        #[serde(default)]
        error: Option<String>,
    },
    ButtonClick {
        #[serde(default)]
        element: Option<UiElement>,
        #[serde(default)]
        data: CustomData,
    },
    FormSubmit {
        #[serde(default)]
        element: Option<UiElement>,
        #[serde(default)]
        data: CustomData,
    },
    CustomEvent {
        name: String,
        #[serde(default)]
        data: CustomData,
    },
    AccountsChanged {
        accounts: Vec<String>,
    },
    Hidden,
    Wait {
        ms: u64,
    },
}

fn apply<T: Transport>(tracker: &Tracker<T>, call: ReplayCall) -> Option<Duration> {
    match call {
        ReplayCall::PageView { context } => {
            tracker.update_context(context);
            tracker.track_page_view();
        }
        ReplayCall::WalletConnect {
            address,
            wallet_type,
        } => tracker.track_wallet_connect(&address, wallet_type),
        ReplayCall::WalletDisconnect { address } => {
            tracker.track_wallet_disconnect(address.as_deref())
        }
        ReplayCall::TransactionStart { transaction } => {
            tracker.track_transaction_start(transaction)
        }
        ReplayCall::TransactionComplete { transaction } => {
            tracker.track_transaction_complete(transaction)
        }
        ReplayCall::TransactionFailed { transaction, error } => {
            tracker.track_transaction_failed(transaction, error.as_deref())
        }
        ReplayCall::ButtonClick { element, data } => {
            tracker.track_button_click(element.as_ref(), data)
        }
        ReplayCall::FormSubmit { element, data } => {
            tracker.track_form_submit(element.as_ref(), data)
        }
        ReplayCall::CustomEvent { name, data } => tracker.track_custom_event(&name, data),
        ReplayCall::AccountsChanged { accounts } => tracker.on_accounts_changed(&accounts),
        ReplayCall::Hidden => tracker.on_visibility_change(Visibility::Hidden),
        ReplayCall::Wait { ms } => return Some(Duration::from_millis(ms)),
    }
    None
}

async fn cmd_replay(config: &Config, file: &PathBuf) -> anyhow::Result<()> {
    let reader = std::io::BufReader::new(
        std::fs::File::open(file).with_context(|| format!("failed to open {}", file.display()))?,
    );

    let tracker_config = TrackerConfig {
        batch: config.batch.clone(),
        user_agents: config.user_agent_table(),
        ..TrackerConfig::new(
            config.website_id.clone().unwrap_or_default(),
            config.api_key.clone().unwrap_or_default(),
        )
    }
    .without_initial_page_view();

    let log = create_shared_log_with_persistence(config.stats_path());
    let tracker = Tracker::with_log(tracker_config, transport(config)?, log.clone());
    tracker.init()?;

    let mut calls = 0;
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let call: ReplayCall = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid tracking call", file.display(), number + 1))?;
        if let Some(pause) = apply(&tracker, call) {
            tokio::time::sleep(pause).await;
        }
        calls += 1;
    }

    println!("Replayed {calls} calls; flushing...");
    tracker.close().await;

    if let Err(e) = log.save() {
        eprintln!("Warning: Could not save delivery stats: {e}");
    }
    println!();
    println!("{}", log.stats());
    Ok(())
}

fn cmd_probe(config: &Config, user_agent: String, url: Option<String>) {
    let probe = EnvironmentProbe::new(config.user_agent_table());
    let context = BrowserContext {
        url,
        user_agent: Some(user_agent),
        ..BrowserContext::default()
    };

    let device = probe.device_info(&context);
    println!("Browser:         {}", device.browser);
    println!("Browser version: {}", device.browser_version);
    println!("OS:              {}", device.os);
    println!("Device type:     {}", device.device_type);
    if context.url.is_some() {
        println!("Path:            {}", probe.page_info(&context).path);
    }
}

fn cmd_config(config: &Config) {
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(config).unwrap_or_else(|_| "Error".to_string())
    );
}

/// Set up Ctrl+C handler.
#[cfg(feature = "server")]
fn ctrlc_handler(stop: Arc<tokio::sync::Notify>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        stop.notify_one();
    })
    .context("Error setting Ctrl+C handler")
}
