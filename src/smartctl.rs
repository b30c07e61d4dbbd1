//! Asynchronous wrapper around the `smartctl` executable.
//!
//! [`Smartctl`] builds the command line of each query, runs it through a
//! [`CommandRunner`] and decodes the JSON report:
//! ```
//! use lib::smartctl::{Smartctl, Sudo};
//! let mut smartctl = Smartctl::new(Some("/usr/sbin/smartctl"), vec![], Sudo::Disabled);
//! smartctl.add_options(["-T", "permissive"]);
//! assert_eq!(
//!     smartctl.command_line(&["--info", "/dev/sda"], true)?,
//!     ["/usr/sbin/smartctl", "-T", "permissive", "--info", "/dev/sda", "-j"]
//! );
//! # Ok::<(), lib::smartctl::SmartctlError>(())
//! ```
//!
//! Every query spawns exactly one process and awaits it without blocking the
//! runtime; no handle is kept once the query returns.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::command::{CommandRunner, SystemCommandRunner};

/// JSON report of smartctl, passed through without schema.
pub type Document = Map<String, Value>;

/// Spellings of the smartctl option asking for JSON output.
const JSON_FLAGS: [&str; 2] = ["-j", "--json"];

#[cfg(windows)]
const SMARTCTL_NAME: &str = "smartctl.exe";
#[cfg(not(windows))]
const SMARTCTL_NAME: &str = "smartctl";

/// Places where smartctl usually lives but which are often missing from a
/// regular user `PATH`.
#[cfg(unix)]
const SBIN_DIRS: [&str; 3] = ["/usr/sbin", "/usr/local/sbin", "/sbin"];

/// Errors raised while querying smartctl.
#[derive(Debug, Error)]
pub enum SmartctlError {
    /// No smartctl executable is configured.
    #[error("Command smartctl doesn't exist!")]
    ToolNotFound,
    /// The operating system could not start the process.
    #[error("Unable to launch `{program}`")]
    ProcessLaunchError {
        /// First element of the command line
        program: String,
        #[allow(missing_docs)]
        #[source]
        source: io::Error,
    },
    /// Standard output is not a JSON object.
    #[error("smartctl output is not valid JSON (exit status {status})")]
    OutputDecodeError {
        /// Exit status of the process
        status: i32,
        #[allow(missing_docs)]
        #[source]
        source: serde_json::Error,
    },
}

impl SmartctlError {
    /// Exit status of the process, when one actually ran.
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            SmartctlError::OutputDecodeError { status, .. } => Some(*status),
            SmartctlError::ToolNotFound | SmartctlError::ProcessLaunchError { .. } => None,
        }
    }
}

/// Decoded output of one smartctl run paired with its exit status.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct CommandResult {
    /// JSON report
    pub data: Document,
    /// Process exit status (smartctl uses it as a bit mask)
    pub status: i32,
}

impl CommandResult {
    /// Sentinel returned by [`Smartctl::try_invoke`] on any failure.
    pub fn failed() -> Self {
        CommandResult {
            data: Document::new(),
            status: 1,
        }
    }

    /// Split into `(data, status)`.
    pub fn into_parts(self) -> (Document, i32) {
        (self.data, self.status)
    }
}

/// Privilege escalation applied to smartctl on unix systems.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Sudo {
    /// Run smartctl directly.
    #[default]
    Disabled,
    /// Run `sudo -E smartctl ...`.
    DefaultFlag,
    /// Run `sudo <args> smartctl ...`, e.g. `["-u", "foo"]`.
    Custom(Vec<String>),
}

impl Sudo {
    /// Arguments passed to `sudo`, or `None` if disabled.
    pub fn args(&self) -> Option<Vec<String>> {
        match self {
            Sudo::Disabled => None,
            Sudo::DefaultFlag => Some(vec!["-E".to_string()]),
            Sudo::Custom(args) => Some(args.clone()),
        }
    }

    /// Is escalation requested at all ?
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Sudo::Disabled)
    }
}

/// Handle on a smartctl executable.
pub struct Smartctl {
    smartctl_path: Option<String>,
    options: Vec<String>,
    sudo: Sudo,
    runner: Box<dyn CommandRunner>,
}

impl fmt::Debug for Smartctl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Smartctl")
            .field("smartctl_path", &self.smartctl_path)
            .field("options", &self.options)
            .field("sudo", &self.sudo)
            .finish()
    }
}

impl Default for Smartctl {
    /// Use the smartctl found on the system, without option nor sudo.
    fn default() -> Self {
        Smartctl::new(find_smartctl(), Vec::new(), Sudo::Disabled)
    }
}

impl Smartctl {
    /// Create a wrapper around the executable at `smartctl_path`.
    ///
    /// A `None` or empty path is accepted, but every query will then fail with
    /// [`SmartctlError::ToolNotFound`]. `options` are the extra options used
    /// by the queries passing them (see [`Smartctl::info`]).
    pub fn new(smartctl_path: Option<impl Into<String>>, options: Vec<String>, sudo: Sudo) -> Self {
        Self::with_runner(
            smartctl_path,
            options,
            sudo,
            Box::new(SystemCommandRunner),
        )
    }

    /// Create a wrapper with a custom command runner.
    pub fn with_runner(
        smartctl_path: Option<impl Into<String>>,
        options: Vec<String>,
        sudo: Sudo,
        runner: Box<dyn CommandRunner>,
    ) -> Self {
        let mut res = Smartctl {
            smartctl_path: smartctl_path.map(Into::into),
            options,
            sudo: Sudo::Disabled,
            runner,
        };
        res.set_sudo(sudo);
        res
    }

    /// Path of the wrapped executable.
    pub fn smartctl_path(&self) -> Option<&str> {
        self.smartctl_path.as_deref()
    }

    /// Current privilege escalation mode.
    pub fn sudo(&self) -> &Sudo {
        &self.sudo
    }

    /// Change the privilege escalation mode.
    ///
    /// On non unix systems the value is kept but never applied.
    pub fn set_sudo(&mut self, sudo: Sudo) {
        if sudo.is_enabled() && !cfg!(unix) {
            warn!("Setting sudo is ignored on non-unix systems");
        }
        self.sudo = sudo;
    }

    /// Persistent options passed on some queries.
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Append options in raw smartctl format to the persistent ones.
    pub fn add_options<I, S>(&mut self, new_options: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.extend(new_options.into_iter().map(Into::into));
    }

    /// Build the full command line for `params` without running it.
    pub fn command_line<S: AsRef<str>>(
        &self,
        params: &[S],
        pass_options: bool,
    ) -> Result<Vec<String>, SmartctlError> {
        let path = match self.smartctl_path.as_deref() {
            Some(p) if !p.is_empty() => p,
            _ => return Err(SmartctlError::ToolNotFound),
        };

        let mut cmd = Vec::new();
        if cfg!(unix) {
            if let Some(args) = self.sudo.args() {
                cmd.push("sudo".to_string());
                cmd.extend(args);
            }
        }
        cmd.push(path.to_string());
        if pass_options {
            cmd.extend(self.options.iter().cloned());
        }
        cmd.extend(params.iter().map(|p| p.as_ref().to_string()));
        if !requests_json(params) {
            cmd.push(JSON_FLAGS[0].to_string());
        }
        Ok(cmd)
    }

    /// Run smartctl with `params` and decode its JSON report.
    ///
    /// If `pass_options` is true, the persistent options are inserted before
    /// `params`. A non zero exit status is not an error as long as the
    /// output is valid JSON.
    pub async fn invoke<S: AsRef<str>>(
        &self,
        params: &[S],
        pass_options: bool,
    ) -> Result<CommandResult, SmartctlError> {
        let mut cmd = self.command_line(params, pass_options)?;
        trace!("Executing the following cmd: {:?}", cmd);
        let program = cmd.remove(0);
        let output = self
            .runner
            .run(&program, cmd)
            .await
            .map_err(|source| SmartctlError::ProcessLaunchError {
                program: program.clone(),
                source,
            })?;
        if !output.stderr.is_empty() {
            debug!(
                "{} stderr: {}",
                program,
                String::from_utf8_lossy(&output.stderr).trim_end()
            );
        }
        let data: Document = serde_json::from_slice(&output.stdout).map_err(|source| {
            SmartctlError::OutputDecodeError {
                status: output.status,
                source,
            }
        })?;
        Ok(CommandResult {
            data,
            status: output.status,
        })
    }

    /// Same as [`Smartctl::invoke`] but never fails.
    ///
    /// Any error is logged and replaced by an empty report with status 1, so
    /// the caller cannot tell a missing tool from a garbled output.
    pub async fn try_invoke<S: AsRef<str>>(&self, params: &[S], pass_options: bool) -> CommandResult {
        match self.invoke(params, pass_options).await {
            Ok(res) => res,
            Err(
                e @ (SmartctlError::ToolNotFound
                | SmartctlError::ProcessLaunchError { .. }
                | SmartctlError::OutputDecodeError { .. }),
            ) => {
                debug!("Exception while executing smartctl: {}", e);
                CommandResult::failed()
            }
        }
    }

    /// List devices with `--scan-open`.
    pub async fn scan(&self) -> Result<Document, SmartctlError> {
        Ok(self.invoke(&["--scan-open"], false).await?.data)
    }

    /// Overall health of `disk` (`--health`).
    ///
    /// `interface` is the device type (ata, scsi, nvme, ...) given to `-d`.
    pub async fn health(&self, disk: &str, interface: Option<&str>) -> Result<Document, SmartctlError> {
        let params = with_interface(interface, ["--health", disk]);
        Ok(self.invoke(params.as_slice(), false).await?.data)
    }

    /// Identity of `disk` (`--info`), with the persistent options.
    pub async fn info(&self, disk: &str, interface: Option<&str>) -> Result<Document, SmartctlError> {
        let params = with_interface(interface, ["--info", disk]);
        Ok(self.invoke(params.as_slice(), true).await?.data)
    }

    /// Full report of `disk` (`--all`), with the persistent options.
    pub async fn all(&self, disk: &str, interface: Option<&str>) -> Result<Document, SmartctlError> {
        let params = with_interface(interface, ["--all", disk]);
        Ok(self.invoke(params.as_slice(), true).await?.data)
    }

    /// Abort the running self-test of `disk` (`-X`) and return the exit status.
    pub async fn test_stop(&self, disk_type: &str, disk: &str) -> Result<i32, SmartctlError> {
        Ok(self
            .invoke(&["-d", disk_type, "-X", disk], false)
            .await?
            .status)
    }

    /// Start a `test_type` self-test (short, long, conveyance, ...) on `disk`.
    pub async fn test_start(
        &self,
        disk_type: &str,
        test_type: &str,
        disk: &str,
    ) -> Result<CommandResult, SmartctlError> {
        self.invoke(&["-d", disk_type, "-t", test_type, disk], false)
            .await
    }
}

/// Does `params` already ask smartctl for JSON output ?
fn requests_json<S: AsRef<str>>(params: &[S]) -> bool {
    params.iter().any(|p| {
        let p = p.as_ref();
        JSON_FLAGS.contains(&p) || p.starts_with("--json=")
    })
}

/// Prefix `params` with `-d <interface>` when an interface is given.
fn with_interface<'a, const N: usize>(interface: Option<&'a str>, params: [&'a str; N]) -> Vec<&'a str> {
    let mut res = Vec::with_capacity(N + 2);
    if let Some(iface) = interface.filter(|i| !i.is_empty()) {
        res.extend(["-d", iface]);
    }
    res.extend(params);
    res
}

/// Look for the smartctl executable in `PATH` and in the usual sbin directories.
pub fn find_smartctl() -> Option<String> {
    let mut dirs: Vec<PathBuf> = std::env::var_os("PATH")
        .map(|p| std::env::split_paths(&p).collect())
        .unwrap_or_default();
    #[cfg(unix)]
    dirs.extend(SBIN_DIRS.iter().map(PathBuf::from));
    let found = find_smartctl_in(dirs);
    debug!("smartctl found at {:?}", found);
    found
}

/// First smartctl executable found in `dirs`, in order.
fn find_smartctl_in<I>(dirs: I) -> Option<String>
where
    I: IntoIterator,
    I::Item: Into<PathBuf>,
{
    dirs.into_iter()
        .map(|d| d.into().join(SMARTCTL_NAME))
        .find(|p| p.is_file())
        .map(|p| p.to_string_lossy().into_owned())
}
