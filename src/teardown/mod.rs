//! Teardown pipeline: delete an instance and its boot disk, then reconcile
//! records.
//!
//! Instance deletion must succeed for the record to change. Disk deletion is
//! allowed to fail: the disk is then remembered as a `disk` record so a later
//! [`TeardownPipeline::reclaim_orphans`] run can retry it.

use thiserror::Error;
use tracing::{info, warn};

use crate::operation::{OperationError, OperationWaiter};
use crate::provider::CloudProvider;
use crate::records::{ProxyRecord, RecordStore, RecordStoreError, ResourceKind};
use crate::retry::{RetryError, RetryPolicy};

/// Result of a teardown that did not fail.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TeardownOutcome {
    /// No instance record carries the name; nothing was touched.
    NotFound,
    /// The instance is gone and its record removed.
    Deleted {
        /// Boot disk that could not be deleted and is now tracked as an
        /// orphan record.
        orphaned_disk: Option<String>,
    },
}

/// Errors raised by [`TeardownPipeline`].
#[derive(Debug, Error)]
pub enum TeardownError {
    /// Existing records could not be read.
    #[error("failed to load proxy records: {0}")]
    Records(#[source] RecordStoreError),
    /// The deletion request was rejected or retries ran out.
    #[error("failed to submit deletion of instance {instance_id}: {source}")]
    Submit {
        /// Provider identifier of the instance.
        instance_id: String,
        /// Retry failure.
        #[source]
        source: RetryError,
    },
    /// The deletion operation failed or could not be observed.
    #[error("deletion of instance {instance_id} did not complete: {source}")]
    Operation {
        /// Provider identifier of the instance.
        instance_id: String,
        /// Waiter failure.
        #[source]
        source: OperationError,
    },
    /// Provider resources changed but the records could not be saved.
    #[error("resources deleted but records could not be saved: {0}")]
    Persist(#[source] RecordStoreError),
}

/// Result of [`TeardownPipeline::reclaim_orphans`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReclaimSummary {
    /// Disk identifiers deleted and dropped from the records.
    pub reclaimed: Vec<String>,
    /// Disk identifiers that still failed and stay recorded.
    pub remaining: Vec<String>,
}

/// Deletes recorded proxies.
#[derive(Debug)]
pub struct TeardownPipeline<P, S> {
    provider: P,
    store: S,
    retry: RetryPolicy,
    waiter: OperationWaiter,
}

impl<P, S> TeardownPipeline<P, S>
where
    P: CloudProvider,
    S: RecordStore,
{
    /// Creates a pipeline with default retry and wait settings.
    #[must_use]
    pub fn new(provider: P, store: S) -> Self {
        Self {
            provider,
            store,
            retry: RetryPolicy::default(),
            waiter: OperationWaiter::default(),
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

    /// Deletes the proxy called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`TeardownError`] when records cannot be read, when the
    /// instance cannot be deleted (records are then left untouched), or when
    /// the final save fails.
    pub async fn teardown(&self, name: &str) -> Result<TeardownOutcome, TeardownError> {
        let mut records = self.store.load().map_err(TeardownError::Records)?;
        let Some((index, target)) = records
            .iter()
            .enumerate()
            .find(|(_, record)| record.is_instance_named(name))
            .map(|(index, record)| (index, record.clone()))
        else {
            info!(name, "no instance record; nothing to delete");
            return Ok(TeardownOutcome::NotFound);
        };

        let boot_disk = match self
            .provider
            .instance_info(&target.zone, &target.instance_id)
            .await
        {
            Ok(info) => info.boot_disk_id,
            Err(err) => {
                warn!(
                    instance_id = %target.instance_id,
                    error = %err,
                    "could not look up boot disk; it will not be deleted"
                );
                None
            }
        };

        self.delete_instance(&target).await?;
        records.remove(index);

        let mut orphaned_disk = None;
        if let Some(disk_id) = boot_disk
            && !self.delete_disk(&target.zone, &disk_id).await
        {
            records.push(ProxyRecord {
                instance_id: disk_id.clone(),
                kind: ResourceKind::Disk,
                ..target
            });
            orphaned_disk = Some(disk_id);
        }

        self.store.save(&records).map_err(TeardownError::Persist)?;
        info!(name, orphaned_disk = ?orphaned_disk, "proxy deleted");
        Ok(TeardownOutcome::Deleted { orphaned_disk })
    }

    /// Retries deletion of every orphaned disk record.
    ///
    /// Records are saved once, and only when at least one disk was reclaimed.
    ///
    /// # Errors
    ///
    /// Returns [`TeardownError::Records`] or [`TeardownError::Persist`] when
    /// the store fails.
    pub async fn reclaim_orphans(&self) -> Result<ReclaimSummary, TeardownError> {
        let records = self.store.load().map_err(TeardownError::Records)?;
        let mut summary = ReclaimSummary::default();
        let mut kept = Vec::with_capacity(records.len());

        for record in records {
            if record.kind != ResourceKind::Disk {
                kept.push(record);
                continue;
            }
            if self.delete_disk(&record.zone, &record.instance_id).await {
                summary.reclaimed.push(record.instance_id);
            } else {
                summary.remaining.push(record.instance_id.clone());
                kept.push(record);
            }
        }

        if !summary.reclaimed.is_empty() {
            self.store.save(&kept).map_err(TeardownError::Persist)?;
        }
        info!(
            reclaimed = summary.reclaimed.len(),
            remaining = summary.remaining.len(),
            "orphan reclaim finished"
        );
        Ok(summary)
    }

    async fn delete_instance(&self, target: &ProxyRecord) -> Result<(), TeardownError> {
        info!(name = %target.name, instance_id = %target.instance_id, zone = %target.zone, "deleting instance");
        let submission = self
            .retry
            .submit("delete instance", || {
                self.provider
                    .delete_instance(&target.zone, &target.instance_id)
            })
            .await
            .map_err(|source| TeardownError::Submit {
                instance_id: target.instance_id.clone(),
                source,
            })?;

        self.waiter
            .await_submission(&self.provider, &submission)
            .await
            .map_err(|source| TeardownError::Operation {
                instance_id: target.instance_id.clone(),
                source,
            })
    }

    /// Returns `false` when the disk could not be deleted.
    async fn delete_disk(&self, zone: &str, disk_id: &str) -> bool {
        info!(disk_id, zone, "deleting disk");
        let submission = match self
            .retry
            .submit("delete disk", || self.provider.delete_disk(zone, disk_id))
            .await
        {
            Ok(submission) => submission,
            Err(err) => {
                warn!(disk_id, zone, error = %err, "disk deletion failed; keeping orphan record");
                return false;
            }
        };

        match self.waiter.await_submission(&self.provider, &submission).await {
            Ok(()) => true,
            Err(err) => {
                warn!(disk_id, zone, error = %err, "disk deletion failed; keeping orphan record");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests;
