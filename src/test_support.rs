//! Test support utilities shared across unit and integration tests.
//!
//! Every double records what it was asked to do and replays pre-seeded
//! responses in FIFO order, so pipeline tests can assert on exact call
//! sequences without touching a real provider, host, or file system.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::deploy::{
    CommandFuture, CommandOutput, CommandRunner, ConfigureFuture, DeployError, RemoteConfigurator,
};
use crate::provider::{
    CloudProvider, InstanceInfo, InstanceSpec, OperationHandle, OperationStatus, ProviderError,
    ProviderFuture, Submission,
};
use crate::records::{ProxyRecord, RecordStore, RecordStoreError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> CommandFuture<'a> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        let response = lock(&self.responses).pop_front();
        Box::pin(async move {
            response.ok_or_else(|| DeployError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
        })
    }
}

/// Capability call observed by [`ScriptedProvider`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProviderCall {
    /// `list_regions`.
    ListRegions,
    /// `list_zones(region)`.
    ListZones(String),
    /// `list_machine_types(zone)`.
    ListMachineTypes(String),
    /// `create_instance(spec)`.
    CreateInstance(InstanceSpec),
    /// `delete_instance(zone, id)`.
    DeleteInstance {
        /// Zone passed by the caller.
        zone: String,
        /// Instance identifier.
        instance_id: String,
    },
    /// `delete_disk(zone, id)`.
    DeleteDisk {
        /// Zone passed by the caller.
        zone: String,
        /// Disk identifier.
        disk_id: String,
    },
    /// `instance_info(zone, id)`.
    InstanceInfo {
        /// Zone passed by the caller.
        zone: String,
        /// Instance identifier.
        instance_id: String,
    },
    /// `operation_status(handle)`.
    OperationStatus(String),
}

#[derive(Debug, Default)]
struct ProviderScript {
    calls: Vec<ProviderCall>,
    regions: Vec<String>,
    zones: BTreeMap<String, Vec<String>>,
    machine_types: BTreeMap<String, Vec<String>>,
    creates: VecDeque<Result<Submission, ProviderError>>,
    deletes: VecDeque<Result<Submission, ProviderError>>,
    disk_deletes: VecDeque<Result<Submission, ProviderError>>,
    infos: VecDeque<Result<InstanceInfo, ProviderError>>,
    statuses: VecDeque<Result<OperationStatus, ProviderError>>,
}

/// In-memory [`CloudProvider`] replaying scripted responses.
///
/// Unscripted mutating calls fail with a status-less [`ProviderError`];
/// unscripted status checks report [`OperationStatus::Done`].
#[derive(Clone, Debug, Default)]
pub struct ScriptedProvider {
    script: Arc<Mutex<ProviderScript>>,
}

/// Recommended machine type reported by [`ScriptedProvider`].
pub const SCRIPTED_RECOMMENDED_TYPE: &str = "m-small";

impl ScriptedProvider {
    /// Creates a provider with nothing scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the regions returned by `list_regions`.
    #[must_use]
    pub fn with_regions(self, regions: &[&str]) -> Self {
        lock(&self.script).regions = regions.iter().map(|r| (*r).to_owned()).collect();
        self
    }

    /// Sets the zones returned for `region`.
    #[must_use]
    pub fn with_zones(self, region: &str, zones: &[&str]) -> Self {
        lock(&self.script).zones.insert(
            region.to_owned(),
            zones.iter().map(|z| (*z).to_owned()).collect(),
        );
        self
    }

    /// Sets the machine types returned for `zone`.
    #[must_use]
    pub fn with_machine_types(self, zone: &str, types: &[&str]) -> Self {
        lock(&self.script).machine_types.insert(
            zone.to_owned(),
            types.iter().map(|t| (*t).to_owned()).collect(),
        );
        self
    }

    /// Queues a `create_instance` response.
    pub fn push_create(&self, response: Result<Submission, ProviderError>) {
        lock(&self.script).creates.push_back(response);
    }

    /// Queues a `delete_instance` response.
    pub fn push_delete(&self, response: Result<Submission, ProviderError>) {
        lock(&self.script).deletes.push_back(response);
    }

    /// Queues a `delete_disk` response.
    pub fn push_disk_delete(&self, response: Result<Submission, ProviderError>) {
        lock(&self.script).disk_deletes.push_back(response);
    }

    /// Queues an `instance_info` response.
    pub fn push_info(&self, response: Result<InstanceInfo, ProviderError>) {
        lock(&self.script).infos.push_back(response);
    }

    /// Queues an `operation_status` response.
    pub fn push_status(&self, response: Result<OperationStatus, ProviderError>) {
        lock(&self.script).statuses.push_back(response);
    }

    /// Every call observed so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        lock(&self.script).calls.clone()
    }

    /// Number of `operation_status` calls observed.
    #[must_use]
    pub fn status_polls(&self) -> usize {
        self.count(|call| matches!(call, ProviderCall::OperationStatus(_)))
    }

    /// Number of `create_instance` calls observed.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.count(|call| matches!(call, ProviderCall::CreateInstance(_)))
    }

    /// Number of `delete_instance` calls observed.
    #[must_use]
    pub fn delete_calls(&self) -> usize {
        self.count(|call| matches!(call, ProviderCall::DeleteInstance { .. }))
    }

    /// Number of `delete_disk` calls observed.
    #[must_use]
    pub fn disk_delete_calls(&self) -> usize {
        self.count(|call| matches!(call, ProviderCall::DeleteDisk { .. }))
    }

    fn count(&self, predicate: impl Fn(&ProviderCall) -> bool) -> usize {
        lock(&self.script).calls.iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: ProviderCall) -> MutexGuard<'_, ProviderScript> {
        let mut script = lock(&self.script);
        script.calls.push(call);
        script
    }
}

fn unscripted<T>(call: &str) -> Result<T, ProviderError> {
    Err(ProviderError::fatal(format!("no scripted response for {call}")))
}

impl CloudProvider for ScriptedProvider {
    fn provider_id(&self) -> &'static str {
        "scripted"
    }

    fn list_regions(&self) -> ProviderFuture<'_, Vec<String>> {
        let regions = self.record(ProviderCall::ListRegions).regions.clone();
        Box::pin(async move { Ok(regions) })
    }

    fn list_zones<'a>(&'a self, region: &'a str) -> ProviderFuture<'a, Vec<String>> {
        let zones = self
            .record(ProviderCall::ListZones(region.to_owned()))
            .zones
            .get(region)
            .cloned()
            .unwrap_or_default();
        Box::pin(async move { Ok(zones) })
    }

    fn list_machine_types<'a>(&'a self, zone: &'a str) -> ProviderFuture<'a, Vec<String>> {
        let types = self
            .record(ProviderCall::ListMachineTypes(zone.to_owned()))
            .machine_types
            .get(zone)
            .cloned()
            .unwrap_or_default();
        Box::pin(async move { Ok(types) })
    }

    fn recommended_machine_type(&self) -> &str {
        SCRIPTED_RECOMMENDED_TYPE
    }

    fn create_instance<'a>(&'a self, spec: &'a InstanceSpec) -> ProviderFuture<'a, Submission> {
        let response = self
            .record(ProviderCall::CreateInstance(spec.clone()))
            .creates
            .pop_front()
            .unwrap_or_else(|| unscripted("create_instance"));
        Box::pin(async move { response })
    }

    fn delete_instance<'a>(
        &'a self,
        zone: &'a str,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, Submission> {
        let response = self
            .record(ProviderCall::DeleteInstance {
                zone: zone.to_owned(),
                instance_id: instance_id.to_owned(),
            })
            .deletes
            .pop_front()
            .unwrap_or_else(|| unscripted("delete_instance"));
        Box::pin(async move { response })
    }

    fn delete_disk<'a>(
        &'a self,
        zone: &'a str,
        disk_id: &'a str,
    ) -> ProviderFuture<'a, Submission> {
        let response = self
            .record(ProviderCall::DeleteDisk {
                zone: zone.to_owned(),
                disk_id: disk_id.to_owned(),
            })
            .disk_deletes
            .pop_front()
            .unwrap_or_else(|| unscripted("delete_disk"));
        Box::pin(async move { response })
    }

    fn instance_info<'a>(
        &'a self,
        zone: &'a str,
        instance_id: &'a str,
    ) -> ProviderFuture<'a, InstanceInfo> {
        let response = self
            .record(ProviderCall::InstanceInfo {
                zone: zone.to_owned(),
                instance_id: instance_id.to_owned(),
            })
            .infos
            .pop_front()
            .unwrap_or_else(|| unscripted("instance_info"));
        Box::pin(async move { response })
    }

    fn operation_status<'a>(
        &'a self,
        operation: &'a OperationHandle,
    ) -> ProviderFuture<'a, OperationStatus> {
        let response = self
            .record(ProviderCall::OperationStatus(operation.token.clone()))
            .statuses
            .pop_front()
            .unwrap_or(Ok(OperationStatus::Done));
        Box::pin(async move { response })
    }
}

/// [`RemoteConfigurator`] that records target addresses and replays
/// scripted outcomes; unscripted runs succeed.
#[derive(Clone, Debug, Default)]
pub struct RecordingConfigurator {
    targets: Arc<Mutex<Vec<IpAddr>>>,
    outcomes: Arc<Mutex<VecDeque<Result<(), DeployError>>>>,
}

impl RecordingConfigurator {
    /// Creates a configurator whose runs all succeed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next run fail with `err`.
    pub fn fail_next(&self, err: DeployError) {
        lock(&self.outcomes).push_back(Err(err));
    }

    /// Addresses configured so far.
    #[must_use]
    pub fn targets(&self) -> Vec<IpAddr> {
        lock(&self.targets).clone()
    }
}

impl RemoteConfigurator for RecordingConfigurator {
    type Error = DeployError;

    fn deploy(&self, address: IpAddr) -> ConfigureFuture<'_, Self::Error> {
        lock(&self.targets).push(address);
        let outcome = lock(&self.outcomes).pop_front().unwrap_or(Ok(()));
        Box::pin(async move { outcome })
    }
}

/// [`RecordStore`] holding records in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryRecordStore {
    records: Arc<Mutex<Vec<ProxyRecord>>>,
    saves: Arc<Mutex<usize>>,
    fail_saves: Arc<Mutex<bool>>,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with `records`.
    #[must_use]
    pub fn with_records(records: Vec<ProxyRecord>) -> Self {
        let store = Self::default();
        *lock(&store.records) = records;
        store
    }

    /// Current persisted records.
    #[must_use]
    pub fn records(&self) -> Vec<ProxyRecord> {
        lock(&self.records).clone()
    }

    /// Number of successful saves.
    #[must_use]
    pub fn saves(&self) -> usize {
        *lock(&self.saves)
    }

    /// Makes every subsequent save fail.
    pub fn fail_saves(&self) {
        *lock(&self.fail_saves) = true;
    }
}

impl RecordStore for MemoryRecordStore {
    fn load(&self) -> Result<Vec<ProxyRecord>, RecordStoreError> {
        Ok(self.records())
    }

    fn save(&self, records: &[ProxyRecord]) -> Result<(), RecordStoreError> {
        if *lock(&self.fail_saves) {
            return Err(RecordStoreError::Io {
                path: camino::Utf8PathBuf::from("memory"),
                message: String::from("simulated write failure"),
            });
        }
        *lock(&self.records) = records.to_vec();
        *lock(&self.saves) += 1;
        Ok(())
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets a single environment variable while holding the global mutex.
    pub async fn set_var(key: &str, value: &str) -> Self {
        Self::set_vars(&[(key, value)]).await
    }

    /// Sets multiple environment variables while holding the global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
