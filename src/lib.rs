#![warn(missing_docs)]
//! Smartprobe main components and helper functions used by `main`
use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::debug;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub mod command;
pub mod config;
pub mod smartctl;
pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use config::{AppConfig, Args, Query};
pub use smartctl::{CommandResult, Document, Smartctl, SmartctlError, Sudo};

/// Log filter for the verbosity in `args`.
///
/// `args` shall already be merged with the configuration file for its
/// `verbose` key to be taken into account.
pub fn log_filter(args: &Args) -> Result<EnvFilter> {
    EnvFilter::try_new(args.verbose.get_level_filter()).context("Initializing log filter")
}

/// Setup logging to stderr
/// (stdout is kept for the JSON report)
pub fn setup_tracing(args: &Args) -> Result<()> {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    let filter_layer = log_filter(args)?;

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
    Ok(())
}

/// Run `query` with `smartctl` and return the JSON value to print.
pub async fn execute(smartctl: &Smartctl, query: &Query) -> Result<Value> {
    debug!("Running {:?} with {:?}", query, smartctl);
    let res = match query {
        Query::Scan => Value::Object(smartctl.scan().await.context("Scanning devices")?),
        Query::Health { interface, disk } => Value::Object(
            smartctl
                .health(disk, interface.as_deref())
                .await
                .with_context(|| format!("Getting health of {disk}"))?,
        ),
        Query::Info { interface, disk } => Value::Object(
            smartctl
                .info(disk, interface.as_deref())
                .await
                .with_context(|| format!("Getting info of {disk}"))?,
        ),
        Query::All { interface, disk } => Value::Object(
            smartctl
                .all(disk, interface.as_deref())
                .await
                .with_context(|| format!("Getting full report of {disk}"))?,
        ),
        Query::TestStart {
            disk_type,
            test_type,
            disk,
        } => serde_json::to_value(
            smartctl
                .test_start(disk_type, test_type, disk)
                .await
                .with_context(|| format!("Starting {test_type} test on {disk}"))?,
        )?,
        Query::TestStop { disk_type, disk } => {
            let status = smartctl
                .test_stop(disk_type, disk)
                .await
                .with_context(|| format!("Stopping test on {disk}"))?;
            json!({ "status": status })
        }
        Query::Raw {
            pass_options,
            lenient: true,
            params,
        } => serde_json::to_value(smartctl.try_invoke(params.as_slice(), *pass_options).await)?,
        Query::Raw {
            pass_options,
            lenient: false,
            params,
        } => serde_json::to_value(
            smartctl
                .invoke(params.as_slice(), *pass_options)
                .await
                .with_context(|| format!("Running smartctl {}", params.join(" ")))?,
        )?,
    };
    Ok(res)
}
