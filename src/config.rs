//! Configuration loading via `ortho-config`.
//!
//! Two layers are read: [`ScalewayConfig`] carries cloud credentials under
//! the `SCW_` prefix and [`ProxyConfig`] carries everything else under
//! `AUTOPROXY_`. Both merge defaults, `autoproxy.toml`, and environment
//! variables.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::deploy::{AnsibleSettings, ProxySettings};

/// Scaleway specific configuration derived from environment variables and
/// configuration files.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SCW",
    discovery(
        app_name = "autoproxy",
        env_var = "AUTOPROXY_CONFIG_PATH",
        config_file_name = "autoproxy.toml",
        dotfile_name = ".autoproxy.toml",
        project_file_name = "autoproxy.toml"
    )
)]
pub struct ScalewayConfig {
    /// Secret key used for authentication. This value is required.
    pub secret_key: String,
    /// Organisation identifier used by some Scaleway endpoints.
    pub default_organization_id: Option<String>,
    /// Project identifier used for billing and resource scoping.
    pub default_project_id: String,
    /// Human-friendly image label (for example `Ubuntu 22.04 Jammy Jellyfish`).
    #[ortho_config(default = "Ubuntu 22.04 Jammy Jellyfish".to_owned())]
    pub default_image: String,
    /// CPU architecture used to select the correct image variant.
    #[ortho_config(default = "x86_64".to_owned())]
    pub default_architecture: String,
    /// Commercial type offered as the default during interactive creation.
    #[ortho_config(default = "DEV1-S".to_owned())]
    pub recommended_instance_type: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }

    fn require(&self, value: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to [{}] in autoproxy.toml",
                self.description, self.env_var, self.toml_key, self.section
            )));
        }
        Ok(())
    }
}

impl ScalewayConfig {
    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("autoproxy")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        FieldMetadata::new(
            "Scaleway API secret key",
            "SCW_SECRET_KEY",
            "secret_key",
            "scaleway",
        )
        .require(&self.secret_key)?;
        FieldMetadata::new(
            "Scaleway project ID",
            "SCW_DEFAULT_PROJECT_ID",
            "default_project_id",
            "scaleway",
        )
        .require(&self.default_project_id)?;
        FieldMetadata::new("VM image", "SCW_DEFAULT_IMAGE", "default_image", "scaleway")
            .require(&self.default_image)?;
        FieldMetadata::new(
            "CPU architecture",
            "SCW_DEFAULT_ARCHITECTURE",
            "default_architecture",
            "scaleway",
        )
        .require(&self.default_architecture)?;
        FieldMetadata::new(
            "recommended instance type",
            "SCW_RECOMMENDED_INSTANCE_TYPE",
            "recommended_instance_type",
            "scaleway",
        )
        .require(&self.recommended_instance_type)?;
        Ok(())
    }
}

/// Record keeping, deployment, and timing settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "AUTOPROXY",
    discovery(
        app_name = "autoproxy",
        env_var = "AUTOPROXY_CONFIG_PATH",
        config_file_name = "autoproxy.toml",
        dotfile_name = ".autoproxy.toml",
        project_file_name = "autoproxy.toml"
    )
)]
pub struct ProxyConfig {
    /// JSON file holding the proxy records.
    #[ortho_config(default = "proxy_records.json".to_owned())]
    pub records_path: String,
    /// JSON object mapping region identifiers to display labels.
    #[ortho_config(default = "region_map.json".to_owned())]
    pub region_map_path: String,
    /// Remote user Ansible connects as.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
    /// Private key handed to Ansible. Supports tilde expansion.
    pub ssh_identity_file: Option<String>,
    /// Path to the `ansible-playbook` executable.
    #[ortho_config(default = "ansible-playbook".to_owned())]
    pub ansible_bin: String,
    /// Port the Shadowsocks server listens on.
    #[ortho_config(default = 8388)]
    pub proxy_port: u16,
    /// Shadowsocks password. Required for `create`.
    #[ortho_config(default = String::new())]
    pub proxy_password: String,
    /// Shadowsocks cipher.
    #[ortho_config(default = "aes-256-gcm".to_owned())]
    pub proxy_method: String,
    /// Idle timeout written to the Shadowsocks server config.
    #[ortho_config(default = 300)]
    pub proxy_timeout_secs: u64,
    /// How long to wait for SSH to accept connections after creation.
    #[ortho_config(default = 60)]
    pub readiness_timeout_secs: u64,
    /// Upper bound on each provider operation wait; `0` waits indefinitely.
    #[ortho_config(default = 0)]
    pub operation_timeout_secs: u64,
}

impl ProxyConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("autoproxy")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Records file location.
    #[must_use]
    pub fn records_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.records_path)
    }

    /// Region label map location.
    #[must_use]
    pub fn region_map_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.region_map_path)
    }

    /// Shadowsocks settings for the configurator.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when no password is configured.
    pub fn proxy_settings(&self) -> Result<ProxySettings, ConfigError> {
        FieldMetadata::new(
            "proxy password",
            "AUTOPROXY_PROXY_PASSWORD",
            "proxy_password",
            "autoproxy",
        )
        .require(&self.proxy_password)?;
        FieldMetadata::new(
            "proxy cipher",
            "AUTOPROXY_PROXY_METHOD",
            "proxy_method",
            "autoproxy",
        )
        .require(&self.proxy_method)?;
        Ok(ProxySettings {
            port: self.proxy_port,
            password: self.proxy_password.clone(),
            method: self.proxy_method.clone(),
            timeout_secs: self.proxy_timeout_secs,
        })
    }

    /// Ansible invocation settings for the configurator.
    #[must_use]
    pub fn ansible_settings(&self) -> AnsibleSettings {
        AnsibleSettings {
            ansible_bin: self.ansible_bin.clone(),
            ssh_user: self.ssh_user.clone(),
            ssh_identity_file: self.ssh_identity_file.clone(),
        }
    }

    /// Readiness probe limit.
    #[must_use]
    pub const fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    /// Operation wait limit, `None` when waits are unbounded.
    #[must_use]
    pub const fn operation_timeout(&self) -> Option<Duration> {
        match self.operation_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
