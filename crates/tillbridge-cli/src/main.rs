//! `tillbridge`: talk to a peripheral bridge from the terminal.
//!
//! ```text
//! tillbridge --bridge 10.0.0.5:9100 watch
//! tillbridge scanner enable
//! tillbridge pay --amount 4750 --currency USD --timeout-ms 60000
//! ```
//!
//! Logging goes to stderr and follows `RUST_LOG` (default `info`).

use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tillbridge_client::{ClientConfig, ConnectionEvent, ConnectionState, PeripheralClient};
use tillbridge_core::constants::{
    CONTENT_TYPE_JSON, DEFAULT_BRIDGE_ADDR, DEST_SCANNER_DISABLE, DEST_SCANNER_ENABLE,
    HEADER_CONTENT_TYPE,
};
use tillbridge_core::{PaymentRequest, ScannerAction, ScannerCommand};
use tillbridge_protocol::Frame;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tillbridge", about = "Point-of-sale peripheral bridge client", version)]
struct Cli {
    /// Bridge address as host:port.
    #[arg(long, default_value = DEFAULT_BRIDGE_ADDR, env = "TILLBRIDGE_ADDR")]
    bridge: String,

    /// Virtual host sent in CONNECT.
    #[arg(long, env = "TILLBRIDGE_HOST")]
    host: Option<String>,

    #[arg(long, default_value_t = 10_000, env = "TILLBRIDGE_CONNECT_TIMEOUT_MS")]
    connect_timeout_ms: u64,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Print capabilities, scans and payment states until interrupted.
    Watch,

    /// Turn the barcode scanner on or off.
    Scanner {
        #[arg(value_enum)]
        action: ScannerArg,
    },

    /// Collect a card payment and print the result as JSON.
    Pay {
        /// Amount in minor units (4750 = 47.50).
        #[arg(long)]
        amount: u64,

        #[arg(long, default_value = "USD")]
        currency: String,

        /// Collection deadline; 0 uses the client default.
        #[arg(long, default_value_t = 0)]
        timeout_ms: u64,

        #[arg(long)]
        cashback: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ScannerArg {
    Enable,
    Disable,
}

impl Cli {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.bridge.clone())
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms));
        if let Some(host) = &self.host {
            config = config.with_host(host.clone());
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let client = PeripheralClient::new(cli.client_config());

    client
        .connect()
        .await
        .with_context(|| format!("failed to connect to bridge at {}", cli.bridge))?;

    let outcome = match cli.command {
        Cmd::Watch => watch(&client).await,
        Cmd::Scanner { action } => scanner(&client, action).await,
        Cmd::Pay {
            amount,
            currency,
            timeout_ms,
            cashback,
        } => {
            let request = PaymentRequest::new(amount, currency)
                .with_cashback(cashback)
                .with_timeout_ms(timeout_ms);
            pay(&client, request).await
        }
    };

    client.disconnect().await;
    outcome
}

async fn watch(client: &PeripheralClient) -> anyhow::Result<()> {
    let _caps = client.on_capabilities(|caps| match serde_json::to_string(caps) {
        Ok(json) => println!("capabilities {json}"),
        Err(e) => warn!("Unprintable capabilities: {}", e),
    });
    let _scans = client
        .scanner()
        .on_scan(|scan| println!("scan {} {}", scan.symbology, scan.barcode));
    let _payments = client
        .payment()
        .on_state_change(|state| println!("payment {state}"));
    let _connection = client.on_connection_change(|event| {
        if let ConnectionEvent::Error { message, .. } = event {
            warn!("Bridge error: {}", message);
        }
    });

    let mut state = client.transport().watch_state();
    info!("Watching bridge events, Ctrl+C to stop");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            info!("Interrupted");
            Ok(())
        }
        _ = state.wait_for(|s| *s == ConnectionState::Disconnected) => {
            bail!("connection to bridge lost")
        }
    }
}

async fn scanner(client: &PeripheralClient, action: ScannerArg) -> anyhow::Result<()> {
    let (action, destination) = match action {
        ScannerArg::Enable => (ScannerAction::Enable, DEST_SCANNER_ENABLE),
        ScannerArg::Disable => (ScannerAction::Disable, DEST_SCANNER_DISABLE),
    };
    let body = serde_json::to_vec(&ScannerCommand { action })?;
    let frame = Frame::send(destination, body).with_header(HEADER_CONTENT_TYPE, CONTENT_TYPE_JSON);

    client
        .send_with_receipt(frame)
        .await
        .context("bridge did not confirm the scanner command")?;
    println!("scanner {}", if action == ScannerAction::Enable { "enabled" } else { "disabled" });
    Ok(())
}

async fn pay(client: &PeripheralClient, request: PaymentRequest) -> anyhow::Result<()> {
    let _states = client
        .payment()
        .on_state_change(|state| info!(state = %state, "Payment state"));

    let mut collection = client.payment().collect(request)?;

    let result = tokio::select! {
        outcome = &mut collection => outcome?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, cancelling payment");
            client.payment().cancel()?;
            collection.await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.approved {
        bail!(
            "payment not approved: {}",
            result
                .error
                .or(result.decline_reason)
                .unwrap_or_else(|| "declined".to_string())
        );
    }
    Ok(())
}
