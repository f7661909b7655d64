//! Core library for the autoproxy provisioning tool.
//!
//! The crate orchestrates the lifecycle of single-host Shadowsocks proxies:
//! create a cloud instance, wait for the provider operation, wait for SSH,
//! configure the proxy over Ansible, and record it (create → wait → probe →
//! configure → record). Teardown mirrors the flow and keeps track of boot
//! disks that could not be deleted.
//!
//! Providers, configurators, and record stores are reached through the
//! [`CloudProvider`], [`RemoteConfigurator`], and [`RecordStore`] traits so
//! the pipelines can be driven by the doubles in [`test_support`].

pub mod config;
pub mod create_flow;
pub mod deploy;
pub mod operation;
pub mod provider;
pub mod provision;
pub mod readiness;
pub mod records;
pub mod regions;
pub mod retry;
pub mod scaleway;
pub mod teardown;
pub mod test_support;

pub use config::{ConfigError, ProxyConfig, ScalewayConfig};
pub use deploy::{
    AnsibleConfigurator, AnsibleSettings, DeployError, ProxyEndpoint, ProxySettings,
    RemoteConfigurator, StreamingCommandRunner,
};
pub use operation::{OperationError, OperationWaiter};
pub use provider::{
    CloudProvider, InstanceInfo, InstanceSpec, OperationHandle, OperationStatus, ProviderError,
    Submission,
};
pub use provision::{ProvisionError, ProvisionPipeline, ProvisionRequest, Provisioned};
pub use readiness::{ReadinessError, ReadinessProber};
pub use records::{JsonRecordStore, ProxyRecord, RecordStore, RecordStoreError, ResourceKind};
pub use regions::RegionLabels;
pub use retry::{RetryError, RetryPolicy};
pub use scaleway::ScalewayProvider;
pub use teardown::{ReclaimSummary, TeardownError, TeardownOutcome, TeardownPipeline};
