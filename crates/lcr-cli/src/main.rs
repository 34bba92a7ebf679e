//! LCR 600 poller
//!
//! Opens a register on a serial port, reads its product id and a few
//! identifying attributes, then polls a set of fields at a fixed interval.
//! Every driver event (readings, finished deliveries, switch movements,
//! failures) is printed as one JSON line on stdout; logs go to stderr.
//!
//! ```text
//! lcr --port /dev/ttyUSB0 --field GrossQty_NE --field FlowRate_NE
//! lcr --port COM3 --attribute MeterID_WM --attribute Decimals_WM
//! lcr --config register.json --interval-ms 500
//! lcr --list-ports
//! ```
//!
//! The log level follows `RUST_LOG` and defaults to `info`.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lcr_core::prelude::*;
use lcr_core::protocol::list_ports;

/// LCR 600 register poller.
#[derive(Debug, Parser)]
#[command(name = "lcr", about = "Poll an LCR 600 meter register over serial", version)]
struct Cli {
    /// JSON connection config; flags given on the command line override it
    #[arg(long, env = "LCR_CONFIG")]
    config: Option<PathBuf>,

    /// Serial port, e.g. /dev/ttyUSB0 or COM3
    #[arg(long, env = "LCR_PORT")]
    port: Option<String>,

    /// Line speed in bps
    #[arg(long, env = "LCR_BAUD")]
    baud: Option<u32>,

    /// Node address of the register (decimal or 0x-prefixed hex)
    #[arg(long, value_parser = parse_byte)]
    node: Option<u8>,

    /// Host address used as the frame source (decimal or 0x-prefixed hex)
    #[arg(long, value_parser = parse_byte)]
    host: Option<u8>,

    /// Field to poll; repeat for several
    #[arg(long = "field", default_value = "GrossQty_NE")]
    fields: Vec<String>,

    /// Attribute read once after the product id; repeat for several
    #[arg(
        long = "attribute",
        default_values = ["QtyUnits_WM", "UnitID_UL", "MeterID_WM"]
    )]
    attributes: Vec<String>,

    /// Delay between polling rounds
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Time a volume must hold before a delivery is reported
    #[arg(long)]
    settle_ms: Option<u64>,

    /// Optional field catalog (JSON) replacing the built-in one
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

impl Cli {
    fn to_config(&self) -> anyhow::Result<ConnectionConfig> {
        let mut config = match &self.config {
            Some(path) => ConnectionConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => ConnectionConfig::default(),
        };

        if let Some(port) = &self.port {
            config.port_name = port.clone();
        }
        if let Some(baud) = self.baud {
            config.baud_rate = baud;
        }
        if let Some(node) = self.node {
            config.node_address = node;
        }
        if let Some(host) = self.host {
            config.host_address = host;
        }
        if let Some(settle) = self.settle_ms {
            config.settle_time_ms = settle;
        }

        if config.port_name.is_empty() {
            bail!("no serial port given; use --port or set port_name in the config");
        }
        Ok(config)
    }

    /// First polled field or attribute the catalog does not know
    fn unknown_name<'a>(&'a self, catalog: &FieldCatalog) -> Option<&'a str> {
        self.fields
            .iter()
            .chain(&self.attributes)
            .map(String::as_str)
            .find(|name| catalog.field(name).is_none())
    }
}

fn parse_byte(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    };
    parsed.map_err(|e| format!("{:?} is not a byte: {}", s, e))
}

fn print_ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for port in ports {
        match (port.usb_id, &port.product) {
            (Some((vid, pid)), Some(product)) => {
                println!("{}\t{:04x}:{:04x}\t{}", port.name, vid, pid, product)
            }
            (Some((vid, pid)), None) => println!("{}\t{:04x}:{:04x}", port.name, vid, pid),
            _ => println!("{}", port.name),
        }
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
    if cli.list_ports {
        print_ports();
        return Ok(());
    }

    let config = cli.to_config()?;
    info!(
        "polling {} at {}bps, node {:#04x}",
        config.port_name, config.baud_rate, config.node_address
    );

    let mut driver = match &cli.catalog {
        Some(path) => {
            let catalog = FieldCatalog::load(path)
                .with_context(|| format!("loading catalog {}", path.display()))?;
            let transport = SerialTransport::new(config.port_name.clone(), config.baud_rate)
                .with_inter_byte_timeout(Duration::from_millis(config.inter_byte_timeout_ms));
            Driver::with_catalog(config, Box::new(transport), catalog)
        }
        None => Driver::serial(config),
    };

    if let Some(name) = cli.unknown_name(driver.catalog()) {
        bail!("unknown field {:?}", name);
    }

    let mut events = driver.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("event not serialized: {}", e),
                },
                Err(RecvError::Lagged(n)) => warn!("dropped {} events", n),
                Err(RecvError::Closed) => break,
            }
        }
    });

    driver.open().context("opening serial port")?;
    driver
        .get_product_id(true)
        .await
        .context("reading product id")?;

    for name in &cli.attributes {
        match driver.request_attribute(name).await {
            Ok(Some(value)) => info!("{}: {}", name, value),
            Ok(None) => warn!("{}: no value", name),
            Err(e) => warn!("{}: {}", name, e),
        }
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(Duration::from_millis(cli.interval_ms));

    loop {
        tokio::select! {
            res = &mut shutdown => {
                if let Err(e) = res {
                    error!("failed to listen for Ctrl+C: {}", e);
                }
                info!("shutting down");
                break;
            }
            _ = ticker.tick() => {
                driver.poll_events();
                for field in &cli.fields {
                    match driver.get_data(field, false).await {
                        Ok(_) => {}
                        Err(ProtocolError::ChannelClosed | ProtocolError::NotConnected) => {
                            bail!("connection to {} lost", driver.connection().config().port_name);
                        }
                        Err(e) => warn!("{}: {}", field, e),
                    }
                }
            }
        }
    }

    driver.close();
    Ok(())
}
