//! shelly-ws CLI - watch, call and probe a Shelly Gen3 device.
//!
//! See the `shelly_ws` library for the client itself.

// Rust guideline compliant 2026-02

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use serde_json::Value;
use shelly_ws::constants::DEFAULT_PORT;
use shelly_ws::{
    probe_device, ChannelObserver, ClientConfig, DeviceEvent, Endpoint, ProbeOutcome, ShellyClient,
};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser)]
#[command(name = "shelly-ws")]
#[command(version)]
#[command(about = "WebSocket RPC client for Shelly Gen3 dimmers")]
struct Cli {
    /// Device hostname or IP (overridden by SHELLY_HOST)
    #[arg(long, default_value = "shelly.local")]
    host: String,
    /// Device port (overridden by SHELLY_PORT)
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Username for digest auth (overridden by SHELLY_USERNAME)
    #[arg(long)]
    username: Option<String>,
    /// Password for digest auth (overridden by SHELLY_PASSWORD)
    #[arg(long)]
    password: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stay connected and print every notification until Ctrl-C
    Watch,
    /// Invoke one RPC method and print its result
    Call {
        /// Method name, e.g. "Light.Set"
        method: String,
        /// Parameters as a JSON object
        #[arg(long)]
        params: Option<String>,
    },
    /// Check whether the device is reachable and needs credentials
    Probe,
}

impl Cli {
    fn client_config(&self) -> ClientConfig {
        let endpoint = Endpoint::new(self.host.clone(), self.port).with_credentials(
            self.username.clone().unwrap_or_default(),
            self.password.clone().unwrap_or_default(),
        );
        let mut config = ClientConfig::new(endpoint);
        config.apply_env_overrides();
        config
    }
}

async fn watch(config: ClientConfig) -> Result<()> {
    let (observer, mut events) = ChannelObserver::channel();
    let client = ShellyClient::new(config, Arc::new(observer));
    client.start();

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
            Some(event) = events.recv() => match event {
                DeviceEvent::Update(payload) => println!("{}", payload),
                DeviceEvent::Connected => log::info!("[Shelly] Device connected"),
                DeviceEvent::Disconnected => log::warn!("[Shelly] Device disconnected"),
            },
        }
    }

    println!("Shutting down...");
    client.stop().await;
    Ok(())
}

async fn call(config: ClientConfig, method: &str, params: Option<&str>) -> Result<()> {
    let params: Option<Value> = params
        .map(serde_json::from_str)
        .transpose()
        .context("--params is not valid JSON")?;
    let connect_wait = config.timing.call_timeout;

    let (observer, mut events) = ChannelObserver::channel();
    let client = ShellyClient::new(config, Arc::new(observer));
    client.start();

    let connected = tokio::time::timeout(connect_wait, async {
        while let Some(event) = events.recv().await {
            if event == DeviceEvent::Connected {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    let result = if connected {
        client.call(method, params).await.map_err(anyhow::Error::from)
    } else {
        Err(anyhow::anyhow!("Device did not connect within {}s", connect_wait.as_secs()))
    };
    client.stop().await;

    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

async fn probe(config: &ClientConfig) -> Result<()> {
    match probe_device(&config.endpoint).await? {
        ProbeOutcome::Reachable { device_id } => println!("reachable: {}", device_id),
        ProbeOutcome::AuthRequired => println!("authentication required"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let config = cli.client_config();

    match cli.command {
        Commands::Watch => watch(config).await?,
        Commands::Call { method, params } => call(config, &method, params.as_deref()).await?,
        Commands::Probe => probe(&config).await?,
    }

    Ok(())
}
