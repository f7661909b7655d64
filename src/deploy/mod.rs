//! Remote configuration of freshly provisioned proxy hosts.
//!
//! [`RemoteConfigurator`] is the seam the provisioning pipeline calls once a
//! host accepts SSH connections. [`AnsibleConfigurator`] renders an inventory
//! and a Shadowsocks playbook into a private temporary directory and runs
//! `ansible-playbook` against the host through a [`CommandRunner`].

use std::ffi::OsString;
use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tracing::info;

mod playbook;
mod runner;
mod util;

pub use playbook::{
    INVENTORY_GROUP, SHADOWSOCKS_CONFIG_PATH, render_inventory, render_playbook,
    render_server_config,
};
pub use runner::{CommandFuture, CommandOutput, CommandRunner, StreamingCommandRunner};
pub use util::expand_tilde;

const INVENTORY_FILE: &str = "inventory.ini";
const PLAYBOOK_FILE: &str = "playbook.yml";
const SSH_COMMON_ARGS: &str =
    "ansible_ssh_common_args='-o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null'";

/// Future returned by [`RemoteConfigurator::deploy`].
pub type ConfigureFuture<'a, E> = Pin<Box<dyn Future<Output = Result<(), E>> + Send + 'a>>;

/// Pushes and applies proxy configuration to a reachable host.
pub trait RemoteConfigurator: Send + Sync {
    /// Error surfaced when configuration fails.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Configures the host at `address`, returning once the remote run has
    /// finished.
    fn deploy(&self, address: IpAddr) -> ConfigureFuture<'_, Self::Error>;
}

/// Errors raised while configuring a host.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DeployError {
    /// Raised when configurator settings are unusable.
    #[error("invalid deploy setting: {field}")]
    InvalidSettings {
        /// Offending field.
        field: String,
    },
    /// Raised when the working directory or its files cannot be prepared.
    #[error("failed to prepare deploy workspace: {message}")]
    Workspace {
        /// Human-readable error message.
        message: String,
    },
    /// Raised when a command cannot be started or its output read.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the configuration run exits unsuccessfully.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program that failed.
        program: String,
        /// Exit status code reported by the process, if any.
        status: Option<i32>,
        /// Human-readable exit status.
        status_text: String,
        /// Captured standard error output.
        stderr: String,
    },
}

/// Shadowsocks settings written to the host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProxySettings {
    /// Port the proxy listens on.
    pub port: u16,
    /// Shared secret.
    pub password: String,
    /// AEAD cipher name (for example `aes-256-gcm`).
    pub method: String,
    /// Idle connection timeout in seconds.
    pub timeout_secs: u64,
}

impl ProxySettings {
    /// Endpoint summary for a proxy configured with these settings.
    #[must_use]
    pub fn endpoint(&self, address: IpAddr) -> ProxyEndpoint {
        ProxyEndpoint {
            address,
            port: self.port,
            password: self.password.clone(),
            method: self.method.clone(),
        }
    }
}

/// Connection details shown to the user once a proxy is live.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProxyEndpoint {
    /// Public address of the proxy.
    pub address: IpAddr,
    /// Listening port.
    pub port: u16,
    /// Shared secret.
    pub password: String,
    /// Cipher name.
    pub method: String,
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Shadowsocks proxy created at: {}:{}", self.address, self.port)?;
        writeln!(f, " - Protocol: Shadowsocks")?;
        writeln!(f, " - Password: {}", self.password)?;
        write!(f, " - Encryption: {}", self.method)
    }
}

/// Connection settings for the `ansible-playbook` run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AnsibleSettings {
    /// Path to the `ansible-playbook` executable.
    pub ansible_bin: String,
    /// Remote user to connect as.
    pub ssh_user: String,
    /// Private key used for the connection; `~/` is expanded.
    pub ssh_identity_file: Option<String>,
}

impl AnsibleSettings {
    fn validate(&self) -> Result<(), DeployError> {
        for (field, value) in [
            ("ansible_bin", Some(self.ansible_bin.as_str())),
            ("ssh_user", Some(self.ssh_user.as_str())),
            ("ssh_identity_file", self.ssh_identity_file.as_deref()),
        ] {
            if value.is_some_and(|v| v.trim().is_empty()) {
                return Err(DeployError::InvalidSettings {
                    field: field.to_owned(),
                });
            }
        }
        Ok(())
    }
}

/// [`RemoteConfigurator`] that applies a Shadowsocks playbook with Ansible.
#[derive(Clone, Debug)]
pub struct AnsibleConfigurator<R: CommandRunner> {
    settings: AnsibleSettings,
    proxy: ProxySettings,
    runner: R,
}

impl AnsibleConfigurator<StreamingCommandRunner> {
    /// Convenience constructor that streams the real process output.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::InvalidSettings`] when validation fails.
    pub fn with_streaming_runner(
        settings: AnsibleSettings,
        proxy: ProxySettings,
    ) -> Result<Self, DeployError> {
        Self::new(settings, proxy, StreamingCommandRunner)
    }
}

impl<R: CommandRunner> AnsibleConfigurator<R> {
    /// Creates a configurator using `runner` to execute Ansible.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::InvalidSettings`] when a required setting is
    /// blank or the proxy password is empty.
    pub fn new(settings: AnsibleSettings, proxy: ProxySettings, runner: R) -> Result<Self, DeployError> {
        settings.validate()?;
        if proxy.password.is_empty() {
            return Err(DeployError::InvalidSettings {
                field: String::from("proxy_password"),
            });
        }
        Ok(Self {
            settings,
            proxy,
            runner,
        })
    }

    /// Proxy settings applied to every host.
    #[must_use]
    pub const fn proxy(&self) -> &ProxySettings {
        &self.proxy
    }

    /// Arguments passed to `ansible-playbook` for files inside `workdir`.
    #[must_use]
    pub fn playbook_args(workdir: &Utf8Path) -> Vec<OsString> {
        vec![
            OsString::from("-i"),
            OsString::from(workdir.join(INVENTORY_FILE).as_str()),
            OsString::from(workdir.join(PLAYBOOK_FILE).as_str()),
            OsString::from("-v"),
            OsString::from("-e"),
            OsString::from(SSH_COMMON_ARGS),
        ]
    }

    fn write_workspace(&self, workdir: &Utf8Path, address: IpAddr) -> Result<(), DeployError> {
        let workspace_error = |message: String| DeployError::Workspace { message };
        let identity = self.settings.ssh_identity_file.as_deref().map(expand_tilde);
        let inventory = render_inventory(address, &self.settings.ssh_user, identity.as_deref());
        let playbook = render_playbook(&self.proxy).map_err(|err| workspace_error(err.to_string()))?;

        let dir = Dir::open_ambient_dir(workdir, ambient_authority())
            .map_err(|err| workspace_error(format!("{workdir}: {err}")))?;
        dir.write(INVENTORY_FILE, inventory)
            .map_err(|err| workspace_error(format!("{INVENTORY_FILE}: {err}")))?;
        dir.write(PLAYBOOK_FILE, playbook)
            .map_err(|err| workspace_error(format!("{PLAYBOOK_FILE}: {err}")))
    }

    async fn run_playbook(&self, address: IpAddr) -> Result<(), DeployError> {
        let tmp = tempfile::Builder::new()
            .prefix("autoproxy-deploy-")
            .tempdir()
            .map_err(|err| DeployError::Workspace {
                message: err.to_string(),
            })?;
        let workdir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).map_err(|path| {
            DeployError::Workspace {
                message: format!("non UTF-8 temp path {}", path.display()),
            }
        })?;

        self.write_workspace(&workdir, address)?;

        let program = self.settings.ansible_bin.as_str();
        let args = Self::playbook_args(&workdir);
        info!(%address, program, "starting configuration run");
        let output = self.runner.run(program, &args).await?;
        if output.is_success() {
            info!(%address, "configuration run completed");
            return Ok(());
        }

        let status_text = output
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        Err(DeployError::CommandFailure {
            program: program.to_owned(),
            status: output.code,
            status_text,
            stderr: output.stderr,
        })
    }
}

impl<R: CommandRunner> RemoteConfigurator for AnsibleConfigurator<R> {
    type Error = DeployError;

    fn deploy(&self, address: IpAddr) -> ConfigureFuture<'_, Self::Error> {
        Box::pin(self.run_playbook(address))
    }
}
