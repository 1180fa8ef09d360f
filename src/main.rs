//! Remote configuration runtime.
//!
//! # Architecture Overview
//!
//! ```text
//!     descriptor ──▶ ┌──────────┐    ┌────────────┐    ┌──────────────┐
//!     (--xcfg)       │ registry │───▶│ DataSource │───▶│   Snapshot   │
//!                    └──────────┘    │ file/remote│    │ name → opts  │
//!                                    └─────┬──────┘    └──────┬───────┘
//!                                          │ watch            │ load_all
//!                                          ▼                  ▼
//!                                    ┌────────────┐    ┌──────────────┐
//!                                    │ChangeStream│───▶│NamedResource │
//!                                    └────────────┘    │    Pool      │
//!                                      reconciler      └──────────────┘
//! ```

use std::path::PathBuf;
use clap::Parser;

use remote_config::config::loader::{load_settings, ConfigError};
use remote_config::config::schema::{LogFormat, RuntimeConfig};
use remote_config::config::validation::validate_settings;
use remote_config::lifecycle::start;
use remote_config::observability::{logging, metrics};
use remote_config::pool::DatabaseBuilder;
use remote_config::source::descriptor::redact;
use remote_config::source::SourceRegistry;

#[derive(Parser)]
#[command(name = "remote-config")]
#[command(about = "Load named database pools from a configuration source and keep them in sync", long_about = None)]
struct Cli {
    /// Configuration source descriptor, e.g. `file:///etc/app/db.toml`
    #[arg(long, env = "XCFG")]
    xcfg: Option<String>,

    /// Watch the source and reconcile pools on change. Only sources with a
    /// change feed can be watched; the built-in `file` scheme is static and
    /// is read once at startup
    #[arg(long, env = "XCFG_WATCH")]
    watch: bool,

    /// Dotted path of the table holding the named entries
    #[arg(long)]
    prefix: Option<String>,

    /// Runtime settings file (TOML)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Enable the Prometheus endpoint on this address
    #[arg(long)]
    metrics_address: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut RuntimeConfig) {
        if let Some(descriptor) = self.xcfg {
            config.source.descriptor = descriptor;
        }
        if self.watch {
            config.source.watch = true;
        }
        if let Some(prefix) = self.prefix {
            config.source.prefix = prefix;
        }
        if let Some(format) = self.log_format {
            config.observability.log_format = format;
        }
        if let Some(address) = self.metrics_address {
            config.observability.metrics_enabled = true;
            config.observability.metrics_address = address;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.settings {
        Some(path) => load_settings(path)?,
        None => RuntimeConfig::default(),
    };
    cli.apply(&mut config);
    validate_settings(&config).map_err(ConfigError::Validation)?;

    logging::init(config.observability.log_format)?;
    tracing::info!(
        descriptor = %redact(&config.source.descriptor),
        watch = config.source.watch,
        prefix = %config.source.prefix,
        "remote-config v0.1.0 starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = SourceRegistry::with_defaults();
    let runtime = start(&registry, &config, DatabaseBuilder::new()).await?;

    for (name, pool) in runtime.pool().resources() {
        tracing::info!(name = %name, driver = pool.driver(), endpoint = pool.endpoint(), "Database available");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received");
    if let Some(exit) = runtime.shutdown().await {
        tracing::info!(?exit, "Reconciler stopped");
    }
    Ok(())
}
