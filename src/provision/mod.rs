//! Provisioning pipeline: create, wait, probe, configure, record.
//!
//! Steps run strictly in order and each one depends on the previous
//! succeeding. Nothing is rolled back: when a step after creation fails the
//! instance is left running and the failure is logged with its identifier so
//! an operator can reconcile it. A record is only written once the host has
//! been configured, so the record store never points at an unconfigured
//! proxy.

use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info};

use crate::deploy::RemoteConfigurator;
use crate::operation::{OperationError, OperationWaiter};
use crate::provider::{CloudProvider, InstanceSpec, ProviderError, Submission};
use crate::readiness::{ReadinessError, ReadinessProber};
use crate::records::{ProxyRecord, RecordStore, RecordStoreError, ResourceKind, find_instance};
use crate::retry::{RetryError, RetryPolicy};

/// Default time allowed for a new host to accept SSH connections.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(60);

/// What to provision.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionRequest {
    /// Logical proxy name; also the provider-side instance name.
    pub name: String,
    /// Region the zone belongs to.
    pub region: String,
    /// Target zone.
    pub zone: String,
    /// Machine profile.
    pub machine_type: String,
    /// Human-readable location label stored with the record.
    pub location: String,
}

/// A configured and recorded proxy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Provisioned {
    /// Record appended to the store.
    pub record: ProxyRecord,
    /// Public address of the host.
    pub address: IpAddr,
}

/// Errors raised by [`ProvisionPipeline::provision`].
///
/// Variants from [`ProvisionError::Operation`] onwards mean an instance may
/// exist without a record.
#[derive(Debug, Error)]
pub enum ProvisionError<C>
where
    C: std::error::Error + 'static,
{
    /// The request is missing a name, zone, or machine type.
    #[error("invalid provisioning request: {0}")]
    InvalidRequest(#[source] ProviderError),
    /// A live instance record already uses the name.
    #[error("proxy {name} already exists")]
    AlreadyExists {
        /// Conflicting proxy name.
        name: String,
    },
    /// Existing records could not be read.
    #[error("failed to load proxy records: {0}")]
    Records(#[source] RecordStoreError),
    /// The creation request was rejected or retries ran out.
    #[error("failed to submit instance creation: {0}")]
    Submit(#[source] RetryError),
    /// The creation operation failed or could not be observed.
    #[error("instance {instance_id} creation did not complete: {source}")]
    Operation {
        /// Provider identifier of the unconfirmed instance.
        instance_id: String,
        /// Waiter failure.
        #[source]
        source: OperationError,
    },
    /// The instance details could not be fetched.
    #[error("failed to fetch details of instance {instance_id}: {source}")]
    InstanceInfo {
        /// Provider identifier of the instance.
        instance_id: String,
        /// Provider failure.
        #[source]
        source: ProviderError,
    },
    /// The instance has no public address.
    #[error("instance {instance_id} has no public address")]
    MissingAddress {
        /// Provider identifier of the instance.
        instance_id: String,
    },
    /// The host never accepted a connection.
    #[error("instance {instance_id} is not reachable: {source}")]
    NotReady {
        /// Provider identifier of the instance.
        instance_id: String,
        /// Probe failure.
        #[source]
        source: ReadinessError,
    },
    /// Remote configuration failed.
    #[error("failed to configure instance {instance_id}: {source}")]
    Configure {
        /// Provider identifier of the instance.
        instance_id: String,
        /// Configurator failure.
        #[source]
        source: C,
    },
    /// The configured proxy could not be recorded.
    #[error("instance {instance_id} is configured but could not be recorded: {source}")]
    Persist {
        /// Provider identifier of the instance.
        instance_id: String,
        /// Store failure.
        #[source]
        source: RecordStoreError,
    },
}

impl<C> ProvisionError<C>
where
    C: std::error::Error + 'static,
{
    /// Identifier of an instance left behind without a record, if any.
    #[must_use]
    pub fn unrecorded_instance(&self) -> Option<&str> {
        match self {
            Self::Operation { instance_id, .. }
            | Self::InstanceInfo { instance_id, .. }
            | Self::MissingAddress { instance_id }
            | Self::NotReady { instance_id, .. }
            | Self::Configure { instance_id, .. }
            | Self::Persist { instance_id, .. } => Some(instance_id),
            Self::InvalidRequest(_)
            | Self::AlreadyExists { .. }
            | Self::Records(_)
            | Self::Submit(_) => None,
        }
    }
}

/// Drives a [`ProvisionRequest`] through every step.
#[derive(Debug)]
pub struct ProvisionPipeline<P, C, S> {
    provider: P,
    configurator: C,
    store: S,
    retry: RetryPolicy,
    waiter: OperationWaiter,
    prober: ReadinessProber,
    readiness_timeout: Duration,
}

impl<P, C, S> ProvisionPipeline<P, C, S>
where
    P: CloudProvider,
    C: RemoteConfigurator,
    S: RecordStore,
{
    /// Creates a pipeline with default retry, wait, and probe settings.
    #[must_use]
    pub fn new(provider: P, configurator: C, store: S) -> Self {
        Self {
            provider,
            configurator,
            store,
            retry: RetryPolicy::default(),
            waiter: OperationWaiter::default(),
            prober: ReadinessProber::default(),
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
        }
    }

    /// Overrides the submission retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides the operation waiter.
    #[must_use]
    pub const fn with_waiter(mut self, waiter: OperationWaiter) -> Self {
        self.waiter = waiter;
        self
    }

    /// Overrides the readiness prober.
    #[must_use]
    pub const fn with_prober(mut self, prober: ReadinessProber) -> Self {
        self.prober = prober;
        self
    }

    /// Overrides the total readiness timeout.
    #[must_use]
    pub const fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    /// Creates, configures, and records a proxy.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] naming the failed step. See
    /// [`ProvisionError::unrecorded_instance`] for failures that leave an
    /// instance behind.
    pub async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<Provisioned, ProvisionError<C::Error>> {
        let spec = InstanceSpec::new(&request.name, &request.zone, &request.machine_type)
            .map_err(ProvisionError::InvalidRequest)?;

        let existing = self.store.load().map_err(ProvisionError::Records)?;
        if find_instance(&existing, &spec.name).is_some() {
            return Err(ProvisionError::AlreadyExists { name: spec.name });
        }

        info!(name = %spec.name, zone = %spec.zone, machine_type = %spec.machine_type, "creating instance");
        let submission = self
            .retry
            .submit("create instance", || self.provider.create_instance(&spec))
            .await
            .map_err(ProvisionError::Submit)?;
        let instance_id = submission.resource_id.clone();

        let result = self.finish(request, &spec, &instance_id, &submission).await;
        if let Err(err) = &result {
            error!(
                instance_id = %instance_id,
                zone = %spec.zone,
                error = %err,
                "instance left without a record; reconcile manually"
            );
        }
        result
    }

    async fn finish(
        &self,
        request: &ProvisionRequest,
        spec: &InstanceSpec,
        instance_id: &str,
        submission: &Submission,
    ) -> Result<Provisioned, ProvisionError<C::Error>> {
        self.waiter
            .await_submission(&self.provider, submission)
            .await
            .map_err(|source| ProvisionError::Operation {
                instance_id: instance_id.to_owned(),
                source,
            })?;

        let info = self
            .provider
            .instance_info(&spec.zone, instance_id)
            .await
            .map_err(|source| ProvisionError::InstanceInfo {
                instance_id: instance_id.to_owned(),
                source,
            })?;
        let address = info.address.ok_or_else(|| ProvisionError::MissingAddress {
            instance_id: instance_id.to_owned(),
        })?;
        info!(%instance_id, %address, "instance created");

        self.prober
            .wait_until_ready(address, self.readiness_timeout)
            .await
            .map_err(|source| ProvisionError::NotReady {
                instance_id: instance_id.to_owned(),
                source,
            })?;

        self.configurator
            .deploy(address)
            .await
            .map_err(|source| ProvisionError::Configure {
                instance_id: instance_id.to_owned(),
                source,
            })?;

        let record = ProxyRecord {
            name: spec.name.clone(),
            provider: self.provider.provider_id().to_owned(),
            region: request.region.clone(),
            zone: spec.zone.clone(),
            instance_id: instance_id.to_owned(),
            ip: address.to_string(),
            kind: ResourceKind::Instance,
            location: request.location.clone(),
        };
        let persist_error = |source: RecordStoreError| ProvisionError::Persist {
            instance_id: instance_id.to_owned(),
            source,
        };
        let mut records = self.store.load().map_err(persist_error)?;
        records.push(record.clone());
        self.store.save(&records).map_err(persist_error)?;
        info!(name = %record.name, %address, "proxy recorded");

        Ok(Provisioned { record, address })
    }
}
