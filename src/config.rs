//! This module holds structs and helpers for parameters and configuration
use ::structopt::clap::AppSettings;
use anyhow::{Context, Result};
use directories_next::ProjectDirs;
use figment::providers::{Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;
use structopt::StructOpt;
use tracing::debug;

use crate::smartctl::{find_smartctl, Smartctl, Sudo};

/// Verbosity flags, serialized as a log level name.
#[derive(StructOpt, Debug, Clone, PartialEq, Eq, Default)]
pub struct QuietVerbose {
    /// Increase the output's verbosity level
    ///
    /// Pass many times to increase verbosity level, up to 3.
    #[structopt(
        name = "quietverbose",
        long = "verbose",
        short = "v",
        parse(from_occurrences),
        conflicts_with = "quietquiet",
        global = true
    )]
    verbosity_level: u8,

    /// Decrease the output's verbosity level.
    ///
    /// Used once, it will set error log level.
    /// Used twice, will silent the log completely
    #[structopt(
        name = "quietquiet",
        long = "quiet",
        short = "q",
        parse(from_occurrences),
        conflicts_with = "quietverbose",
        global = true
    )]
    quiet_level: u8,
}

impl Serialize for QuietVerbose {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.get_level_filter())
    }
}

fn de_from_str<'de, D>(deserializer: D) -> Result<QuietVerbose, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let (verbosity_level, quiet_level) = match s.to_ascii_lowercase().as_ref() {
        "off" => (0, 2),
        "error" => (0, 1),
        "warn" => (0, 0),
        "info" => (1, 0),
        "debug" => (2, 0),
        _ => (3, 0),
    };
    Ok(QuietVerbose {
        verbosity_level,
        quiet_level,
    })
}

impl QuietVerbose {
    fn is_default(&self) -> bool {
        *self == QuietVerbose::default()
    }

    /// Level name usable as an `EnvFilter` directive.
    pub fn get_level_filter(&self) -> &'static str {
        let quiet = self.quiet_level.min(2) as i8;
        let verbose = self.verbosity_level.min(3) as i8;
        match verbose - quiet {
            -2 => "off",
            -1 => "error",
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// Query sent to smartctl
#[derive(StructOpt, Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// List the devices smartctl can open
    Scan,
    /// Overall health self-assessment of a disk
    Health {
        /// Device type (ata, scsi, nvme, sat, ...)
        #[structopt(short = "d", long)]
        interface: Option<String>,
        /// Device path, e.g. /dev/sda
        disk: String,
    },
    /// Identity of a disk (uses the extra options)
    Info {
        /// Device type (ata, scsi, nvme, sat, ...)
        #[structopt(short = "d", long)]
        interface: Option<String>,
        /// Device path, e.g. /dev/sda
        disk: String,
    },
    /// Full report of a disk (uses the extra options)
    All {
        /// Device type (ata, scsi, nvme, sat, ...)
        #[structopt(short = "d", long)]
        interface: Option<String>,
        /// Device path, e.g. /dev/sda
        disk: String,
    },
    /// Start a self-test
    TestStart {
        /// Device type (ata, scsi, nvme, sat, ...)
        #[structopt(short = "d", long)]
        disk_type: String,
        /// Test to run (offline, short, long, conveyance, ...)
        #[structopt(short = "t", long)]
        test_type: String,
        /// Device path, e.g. /dev/sda
        disk: String,
    },
    /// Abort the running self-test
    TestStop {
        /// Device type (ata, scsi, nvme, sat, ...)
        #[structopt(short = "d", long)]
        disk_type: String,
        /// Device path, e.g. /dev/sda
        disk: String,
    },
    /// Run smartctl with arbitrary parameters (given after `--`)
    Raw {
        /// Insert the extra options before the parameters
        #[structopt(long)]
        pass_options: bool,
        /// Print an empty report with status 1 instead of failing
        #[structopt(long)]
        lenient: bool,
        /// smartctl parameters
        params: Vec<String>,
    },
}

#[derive(StructOpt, Serialize, Deserialize, Debug, Default)]
/// Query smartctl and print its JSON report
///
/// Parameters may also be set in a TOML configuration file; command line
/// values take precedence.
#[structopt(global_settings(&[AppSettings::ColoredHelp, AppSettings::ColorAuto]))]
pub struct Args {
    /// path to the smartctl executable
    ///
    /// Looked up in PATH and sbin directories if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[structopt(long)]
    pub smartctl_path: Option<String>,

    /// extra smartctl options used by `info` and `all` (shell quoted)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[structopt(short, long, allow_hyphen_values = true)]
    pub options: Option<String>,

    /// run smartctl through `sudo -E`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    #[structopt(long)]
    pub sudo: bool,

    /// arguments given to sudo instead of `-E` (shell quoted, implies --sudo)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[structopt(long, allow_hyphen_values = true)]
    pub sudo_args: Option<String>,

    /// configuration file
    ///
    /// Defaults to config.toml in the user configuration directory.
    #[serde(skip)]
    #[structopt(short, long, parse(from_os_str))]
    pub config: Option<PathBuf>,

    /// log verbosity
    #[structopt(flatten)]
    #[serde(
        default,
        skip_serializing_if = "QuietVerbose::is_default",
        deserialize_with = "de_from_str"
    )]
    pub verbose: QuietVerbose,

    /// query to run
    #[serde(skip)]
    #[structopt(subcommand)]
    pub query: Option<Query>,
}

/// Validated configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// smartctl executable (None if it could not be found)
    pub smartctl_path: Option<String>,
    /// persistent smartctl options
    pub options: Vec<String>,
    /// privilege escalation mode
    pub sudo: Sudo,
}

impl AppConfig {
    /// Is a smartctl executable configured ? (an empty path is not one)
    pub fn has_smartctl(&self) -> bool {
        !self.smartctl_path.as_deref().map_or(true, str::is_empty)
    }

    /// Build the [`Smartctl`] handle described by this configuration.
    pub fn smartctl(&self) -> Smartctl {
        Smartctl::new(
            self.smartctl_path.clone(),
            self.options.clone(),
            self.sudo.clone(),
        )
    }
}

/// Default location of the configuration file.
pub fn default_config_file() -> Option<PathBuf> {
    ProjectDirs::from("net", "smartprobe", "smartprobe")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

impl Args {
    /// Merge `self` over the configuration file and the defaults.
    ///
    /// The subcommand and the config path come from the command line only.
    pub fn merge_config_file(self) -> Result<Args> {
        let file = self.config.clone().or_else(default_config_file);
        let query = self.query.clone();
        let config = self.config.clone();
        let mut figment = Figment::from(Serialized::defaults(Args::default()));
        if let Some(ref file) = file {
            debug!("Reading configuration from {:?}", file);
            figment = figment.merge(Toml::file(file));
        }
        let mut args: Args = figment
            .merge(Serialized::defaults(self))
            .extract()
            .context("Merging configuration file and command line")?;
        args.query = query;
        args.config = config;
        debug!("Merged config and parameters : {:#?}", args);
        Ok(args)
    }

    /// Check the parameters and turn them into an [`AppConfig`].
    pub fn validate(self) -> Result<AppConfig> {
        let options = match self.options {
            Some(ref s) => shell_words::split(s).with_context(|| format!("Parsing options '{s}'"))?,
            None => Vec::new(),
        };
        let sudo = match self.sudo_args {
            Some(ref s) => Sudo::Custom(
                shell_words::split(s).with_context(|| format!("Parsing sudo args '{s}'"))?,
            ),
            None if self.sudo => Sudo::DefaultFlag,
            None => Sudo::Disabled,
        };
        let smartctl_path = self.smartctl_path.or_else(find_smartctl);
        Ok(AppConfig {
            smartctl_path,
            options,
            sudo,
        })
    }
}
