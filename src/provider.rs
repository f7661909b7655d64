//! Capability interface for cloud providers that host proxy instances.
//!
//! The orchestrator only ever talks to a provider through [`CloudProvider`].
//! Mutating calls return a [`Submission`]; when the provider completes the
//! action asynchronously the submission carries an [`OperationHandle`] that
//! the [`crate::operation::OperationWaiter`] polls until it is terminal.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use thiserror::Error;

/// Lowest provider status code treated as a transient, server-side failure.
pub const SERVER_ERROR_THRESHOLD: u16 = 500;

/// Parameters for a new proxy instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSpec {
    /// Logical proxy name, also used as the provider-side instance name.
    pub name: String,
    /// Availability zone (for example `fr-par-1`).
    pub zone: String,
    /// Machine profile / commercial type (for example `DEV1-S`).
    pub machine_type: String,
}

impl InstanceSpec {
    /// Builds a spec, trimming every field.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] without a status when any field is blank.
    pub fn new(
        name: impl Into<String>,
        zone: impl Into<String>,
        machine_type: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let spec = Self {
            name: name.into().trim().to_owned(),
            zone: zone.into().trim().to_owned(),
            machine_type: machine_type.into().trim().to_owned(),
        };
        for (field, value) in [
            ("name", &spec.name),
            ("zone", &spec.zone),
            ("machine_type", &spec.machine_type),
        ] {
            if value.is_empty() {
                return Err(ProviderError::fatal(format!("missing or empty field: {field}")));
            }
        }
        Ok(spec)
    }
}

/// Provider-side token for an in-flight create or delete action.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OperationHandle {
    /// Zone the operation runs in.
    pub zone: String,
    /// Provider operation identifier.
    pub token: String,
}

/// Result of submitting a mutating call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Submission {
    /// Identifier of the resource the call acted on.
    pub resource_id: String,
    /// Handle to poll, or `None` when the provider completed synchronously.
    pub operation: Option<OperationHandle>,
}

impl Submission {
    /// Submission that the provider finished before returning.
    #[must_use]
    pub fn completed(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            operation: None,
        }
    }

    /// Submission that must be awaited through `operation`.
    #[must_use]
    pub fn pending(resource_id: impl Into<String>, operation: OperationHandle) -> Self {
        Self {
            resource_id: resource_id.into(),
            operation: Some(operation),
        }
    }
}

/// Status reported for an [`OperationHandle`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OperationStatus {
    /// The operation is still running.
    Pending {
        /// Provider state string, kept for logging.
        state: String,
    },
    /// The operation finished without an embedded error.
    Done,
    /// The operation finished and reported an error.
    Failed {
        /// Error text embedded in the operation.
        message: String,
    },
}

impl OperationStatus {
    /// Returns `true` once the provider reports a final outcome.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending { .. })
    }
}

/// Snapshot of an instance fetched on demand.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceInfo {
    /// Public address, once the provider has assigned one.
    pub address: Option<IpAddr>,
    /// Identifier of the boot disk, when the provider exposes one.
    pub boot_disk_id: Option<String>,
}

/// Error returned by every capability call.
///
/// A status code of [`SERVER_ERROR_THRESHOLD`] or above marks the failure as
/// transient; anything else, including transport failures without a status,
/// is fatal.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{}", render_provider_error(*status, message))]
pub struct ProviderError {
    /// HTTP-style status code reported by the provider, if any.
    pub status: Option<u16>,
    /// Provider error text.
    pub message: String,
}

fn render_provider_error(status: Option<u16>, message: &str) -> String {
    status.map_or_else(
        || format!("provider error: {message}"),
        |code| format!("provider error (status {code}): {message}"),
    )
}

impl ProviderError {
    /// Error carrying a provider status code.
    #[must_use]
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Error without a status code; never retried.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Returns `true` for server-side failures eligible for backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.status
            .is_some_and(|code| code >= SERVER_ERROR_THRESHOLD)
    }
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Contract the pipelines use to manage provider resources.
pub trait CloudProvider: Send + Sync {
    /// Short identifier persisted in records (for example `scaleway`).
    fn provider_id(&self) -> &'static str;

    /// Lists the regions available to the account.
    fn list_regions(&self) -> ProviderFuture<'_, Vec<String>>;

    /// Lists the zones inside `region`.
    fn list_zones<'a>(&'a self, region: &'a str) -> ProviderFuture<'a, Vec<String>>;

    /// Lists machine profiles offered in `zone`.
    fn list_machine_types<'a>(&'a self, zone: &'a str) -> ProviderFuture<'a, Vec<String>>;

    /// Machine profile suggested as the default choice.
    fn recommended_machine_type(&self) -> &str;

    /// Submits instance creation.
    fn create_instance<'a>(&'a self, spec: &'a InstanceSpec) -> ProviderFuture<'a, Submission>;

    /// Submits instance deletion.
    fn delete_instance<'a>(
        &'a self,
        zone: &'a str,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, Submission>;

    /// Submits disk deletion.
    fn delete_disk<'a>(&'a self, zone: &'a str, disk_id: &'a str)
    -> ProviderFuture<'a, Submission>;

    /// Fetches the current address and boot disk of an instance.
    fn instance_info<'a>(
        &'a self,
        zone: &'a str,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, InstanceInfo>;

    /// Fetches the status of an asynchronous operation.
    fn operation_status<'a>(
        &'a self,
        operation: &'a OperationHandle,
    ) -> ProviderFuture<'a, OperationStatus>;
}
