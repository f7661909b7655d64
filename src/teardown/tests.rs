//! Tests for the teardown pipeline and orphan reclaim.

use std::time::Duration;

use super::*;
use crate::provider::{InstanceInfo, OperationHandle, OperationStatus, ProviderError, Submission};
use crate::test_support::{MemoryRecordStore, ProviderCall, ScriptedProvider};
use rstest::{fixture, rstest};

fn record(name: &str, id: &str, kind: ResourceKind) -> ProxyRecord {
    ProxyRecord {
        name: name.to_owned(),
        provider: String::from("scripted"),
        region: String::from("r1"),
        zone: String::from("z1"),
        instance_id: id.to_owned(),
        ip: String::from("198.51.100.4"),
        kind,
        location: String::from("Region One"),
    }
}

fn pending(token: &str) -> Submission {
    Submission::pending(
        "ignored",
        OperationHandle {
            zone: String::from("z1"),
            token: token.to_owned(),
        },
    )
}

#[fixture]
fn provider() -> ScriptedProvider {
    ScriptedProvider::new()
}

#[fixture]
fn store() -> MemoryRecordStore {
    MemoryRecordStore::with_records(vec![
        record("p0", "i-0", ResourceKind::Instance),
        record("p1", "i-1", ResourceKind::Instance),
    ])
}

fn pipeline(
    provider: &ScriptedProvider,
    store: &MemoryRecordStore,
) -> TeardownPipeline<ScriptedProvider, MemoryRecordStore> {
    TeardownPipeline::new(provider.clone(), store.clone())
        .with_retry_policy(RetryPolicy::new(Duration::from_millis(1), 5))
        .with_waiter(OperationWaiter::new(Duration::from_millis(1)))
}

fn script_boot_disk(provider: &ScriptedProvider) {
    provider.push_info(Ok(InstanceInfo {
        address: None,
        boot_disk_id: Some(String::from("d-1")),
    }));
}

#[rstest]
#[tokio::test]
async fn deletes_instance_disk_and_record(provider: ScriptedProvider, store: MemoryRecordStore) {
    script_boot_disk(&provider);
    provider.push_delete(Ok(pending("op-delete")));
    provider.push_disk_delete(Ok(Submission::completed("d-1")));

    let outcome = pipeline(&provider, &store)
        .teardown("p1")
        .await
        .unwrap_or_else(|err| panic!("teardown: {err}"));

    assert_eq!(outcome, TeardownOutcome::Deleted { orphaned_disk: None });
    assert_eq!(store.records(), vec![record("p0", "i-0", ResourceKind::Instance)]);
    assert_eq!(store.saves(), 1);
    assert_eq!(
        provider.calls(),
        vec![
            ProviderCall::InstanceInfo {
                zone: String::from("z1"),
                instance_id: String::from("i-1"),
            },
            ProviderCall::DeleteInstance {
                zone: String::from("z1"),
                instance_id: String::from("i-1"),
            },
            ProviderCall::OperationStatus(String::from("op-delete")),
            ProviderCall::DeleteDisk {
                zone: String::from("z1"),
                disk_id: String::from("d-1"),
            },
        ]
    );
}

#[rstest]
#[tokio::test]
async fn unknown_name_makes_no_provider_calls(provider: ScriptedProvider, store: MemoryRecordStore) {
    let outcome = pipeline(&provider, &store)
        .teardown("missing")
        .await
        .unwrap_or_else(|err| panic!("teardown: {err}"));

    assert_eq!(outcome, TeardownOutcome::NotFound);
    assert!(provider.calls().is_empty());
    assert_eq!(store.saves(), 0);
}

#[rstest]
#[tokio::test]
async fn disk_records_do_not_match_by_name(provider: ScriptedProvider) {
    let store = MemoryRecordStore::with_records(vec![record("p1", "d-9", ResourceKind::Disk)]);

    let outcome = pipeline(&provider, &store)
        .teardown("p1")
        .await
        .unwrap_or_else(|err| panic!("teardown: {err}"));

    assert_eq!(outcome, TeardownOutcome::NotFound);
    assert!(provider.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn failed_disk_delete_leaves_orphan_record(provider: ScriptedProvider, store: MemoryRecordStore) {
    script_boot_disk(&provider);
    provider.push_delete(Ok(pending("op-delete")));
    provider.push_disk_delete(Ok(pending("op-disk")));
    provider.push_status(Ok(OperationStatus::Done));
    provider.push_status(Ok(OperationStatus::Failed {
        message: String::from("disk in use"),
    }));

    let outcome = pipeline(&provider, &store)
        .teardown("p1")
        .await
        .unwrap_or_else(|err| panic!("teardown: {err}"));

    assert_eq!(
        outcome,
        TeardownOutcome::Deleted {
            orphaned_disk: Some(String::from("d-1"))
        }
    );
    let records = store.records();
    assert!(!records.iter().any(|r| r.is_instance_named("p1")));
    let disks: Vec<_> = records
        .iter()
        .filter(|r| r.kind == ResourceKind::Disk)
        .collect();
    let [disk] = disks.as_slice() else {
        panic!("expected one disk record, found {disks:?}");
    };
    assert_eq!(disk.instance_id, "d-1");
    assert_eq!(disk.name, "p1");
    assert_eq!(store.saves(), 1);
}

#[rstest]
#[tokio::test]
async fn rejected_disk_delete_is_also_orphaned(provider: ScriptedProvider, store: MemoryRecordStore) {
    script_boot_disk(&provider);
    provider.push_delete(Ok(Submission::completed("i-1")));
    provider.push_disk_delete(Err(ProviderError::with_status(412, "attached")));

    let outcome = pipeline(&provider, &store)
        .teardown("p1")
        .await
        .unwrap_or_else(|err| panic!("teardown: {err}"));

    assert_eq!(
        outcome,
        TeardownOutcome::Deleted {
            orphaned_disk: Some(String::from("d-1"))
        }
    );
    assert_eq!(provider.disk_delete_calls(), 1);
}

#[rstest]
#[tokio::test]
async fn info_failure_still_deletes_instance(provider: ScriptedProvider, store: MemoryRecordStore) {
    provider.push_info(Err(ProviderError::with_status(404, "gone")));
    provider.push_delete(Ok(Submission::completed("i-1")));

    let outcome = pipeline(&provider, &store)
        .teardown("p1")
        .await
        .unwrap_or_else(|err| panic!("teardown: {err}"));

    assert_eq!(outcome, TeardownOutcome::Deleted { orphaned_disk: None });
    assert_eq!(provider.disk_delete_calls(), 0);
    assert_eq!(store.records().len(), 1);
}

#[rstest]
#[tokio::test]
async fn instance_delete_failure_keeps_record(provider: ScriptedProvider, store: MemoryRecordStore) {
    script_boot_disk(&provider);
    provider.push_delete(Err(ProviderError::with_status(403, "locked")));

    let err = pipeline(&provider, &store)
        .teardown("p1")
        .await
        .expect_err("fatal delete should abort");

    assert!(matches!(err, TeardownError::Submit { source: RetryError::Fatal { .. }, .. }));
    assert_eq!(provider.disk_delete_calls(), 0);
    assert_eq!(store.saves(), 0);
    assert_eq!(store.records().len(), 2);
}

#[rstest]
#[tokio::test]
async fn transient_instance_delete_failures_are_retried(
    provider: ScriptedProvider,
    store: MemoryRecordStore,
) {
    provider.push_info(Ok(InstanceInfo::default()));
    provider.push_delete(Err(ProviderError::with_status(502, "gateway")));
    provider.push_delete(Ok(Submission::completed("i-1")));

    pipeline(&provider, &store)
        .teardown("p1")
        .await
        .unwrap_or_else(|err| panic!("teardown: {err}"));

    assert_eq!(provider.delete_calls(), 2);
}

#[rstest]
#[tokio::test]
async fn failed_delete_operation_keeps_record(provider: ScriptedProvider, store: MemoryRecordStore) {
    script_boot_disk(&provider);
    provider.push_delete(Ok(pending("op-delete")));
    provider.push_status(Ok(OperationStatus::Failed {
        message: String::from("instance locked"),
    }));

    let err = pipeline(&provider, &store)
        .teardown("p1")
        .await
        .expect_err("failed operation should abort");

    assert!(matches!(err, TeardownError::Operation { ref instance_id, .. } if instance_id == "i-1"));
    assert_eq!(store.records().len(), 2);
    assert_eq!(store.saves(), 0);
}

#[rstest]
#[tokio::test]
async fn reclaim_drops_deleted_disks_only(provider: ScriptedProvider) {
    let store = MemoryRecordStore::with_records(vec![
        record("p0", "i-0", ResourceKind::Instance),
        record("p1", "d-1", ResourceKind::Disk),
        record("p2", "d-2", ResourceKind::Disk),
    ]);
    provider.push_disk_delete(Ok(Submission::completed("d-1")));
    provider.push_disk_delete(Err(ProviderError::with_status(409, "busy")));

    let summary = pipeline(&provider, &store)
        .reclaim_orphans()
        .await
        .unwrap_or_else(|err| panic!("reclaim: {err}"));

    assert_eq!(summary.reclaimed, vec![String::from("d-1")]);
    assert_eq!(summary.remaining, vec![String::from("d-2")]);
    assert_eq!(
        store.records(),
        vec![
            record("p0", "i-0", ResourceKind::Instance),
            record("p2", "d-2", ResourceKind::Disk),
        ]
    );
    assert_eq!(store.saves(), 1);
}

#[rstest]
#[tokio::test]
async fn reclaim_without_orphans_does_not_save(provider: ScriptedProvider, store: MemoryRecordStore) {
    let summary = pipeline(&provider, &store)
        .reclaim_orphans()
        .await
        .unwrap_or_else(|err| panic!("reclaim: {err}"));

    assert_eq!(summary, ReclaimSummary::default());
    assert!(provider.calls().is_empty());
    assert_eq!(store.saves(), 0);
}
