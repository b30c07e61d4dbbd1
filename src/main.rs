#![doc = include_str!("../README.md")]
use ::lib::config::Args;
use ::lib::{execute, setup_tracing};
use anyhow::{bail, Context, Result};
use structopt::StructOpt;
use tracing::{debug, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Merge config Default → Config File → command line args
    let args = Args::from_args().merge_config_file()?;
    setup_tracing(&args)?;
    debug!("Merged config and parameters : {:#?}", args);
    let query = match args.query.clone() {
        Some(query) => query,
        None => bail!("No query given, see --help"),
    };
    let config = args.validate()?;
    debug!("Using configuration {:?}", config);
    if !config.has_smartctl() {
        warn!("smartctl executable not found, use --smartctl-path");
    }

    let smartctl = config.smartctl();
    let report = execute(&smartctl, &query).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Serializing report")?
    );
    Ok(())
}
