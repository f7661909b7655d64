//! End-to-end provisioning and teardown against scripted doubles and a
//! JSON record file on disk.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use autoproxy::deploy::DeployError;
use autoproxy::test_support::{ProviderCall, RecordingConfigurator, ScriptedProvider};
use autoproxy::{
    InstanceInfo, JsonRecordStore, OperationHandle, OperationStatus, OperationWaiter,
    ProvisionError, ProvisionPipeline, ProvisionRequest, ReadinessProber, RecordStore,
    ResourceKind, RetryPolicy, Submission, TeardownOutcome, TeardownPipeline,
};
use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;
use tokio::net::TcpListener;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

struct World {
    _dir: TempDir,
    path: Utf8PathBuf,
    provider: ScriptedProvider,
    configurator: RecordingConfigurator,
    ssh: SocketAddr,
}

impl World {
    fn store(&self) -> JsonRecordStore {
        JsonRecordStore::new(self.path.clone())
    }

    fn provisioner(
        &self,
    ) -> ProvisionPipeline<ScriptedProvider, RecordingConfigurator, JsonRecordStore> {
        ProvisionPipeline::new(
            self.provider.clone(),
            self.configurator.clone(),
            self.store(),
        )
        .with_retry_policy(RetryPolicy::new(Duration::from_millis(1), 5))
        .with_waiter(OperationWaiter::new(Duration::from_millis(1)))
        .with_prober(
            ReadinessProber::default()
                .with_port(self.ssh.port())
                .with_poll_interval(Duration::from_millis(10))
                .with_connect_timeout(Duration::from_millis(50)),
        )
        .with_readiness_timeout(Duration::from_secs(2))
    }

    fn teardown(&self) -> TeardownPipeline<ScriptedProvider, JsonRecordStore> {
        TeardownPipeline::new(self.provider.clone(), self.store())
            .with_retry_policy(RetryPolicy::new(Duration::from_millis(1), 5))
            .with_waiter(OperationWaiter::new(Duration::from_millis(1)))
    }

    fn script_creation(&self, instance_id: &str) {
        self.provider.push_create(Ok(Submission::pending(
            instance_id,
            handle("op-create"),
        )));
        self.provider.push_status(Ok(OperationStatus::Done));
        self.provider.push_info(Ok(InstanceInfo {
            address: Some(LOCALHOST),
            boot_disk_id: Some(String::from("d-1")),
        }));
    }

    fn records(&self) -> Vec<autoproxy::ProxyRecord> {
        self.store()
            .load()
            .unwrap_or_else(|err| panic!("load records: {err}"))
    }
}

fn handle(token: &str) -> OperationHandle {
    OperationHandle {
        zone: String::from("z1"),
        token: token.to_owned(),
    }
}

fn request(name: &str) -> ProvisionRequest {
    ProvisionRequest {
        name: name.to_owned(),
        region: String::from("r1"),
        zone: String::from("z1"),
        machine_type: String::from("m-small"),
        location: String::from("Region One"),
    }
}

#[fixture]
async fn world() -> World {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("temp dir: {err}"));
    let path = Utf8PathBuf::from_path_buf(dir.path().join("proxy_records.json"))
        .unwrap_or_else(|path| panic!("non-utf8 temp path: {}", path.display()));
    let listener = TcpListener::bind((LOCALHOST, 0))
        .await
        .unwrap_or_else(|err| panic!("bind listener: {err}"));
    let ssh = listener
        .local_addr()
        .unwrap_or_else(|err| panic!("listener addr: {err}"));
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });
    World {
        _dir: dir,
        path,
        provider: ScriptedProvider::new(),
        configurator: RecordingConfigurator::new(),
        ssh,
    }
}

#[rstest]
#[tokio::test]
async fn create_then_delete_leaves_empty_store(#[future] world: World) {
    let world = world.await;
    world.script_creation("i-1");

    let provisioned = world
        .provisioner()
        .provision(&request("p1"))
        .await
        .unwrap_or_else(|err| panic!("provision: {err}"));

    assert_eq!(provisioned.address, LOCALHOST);
    assert_eq!(world.configurator.targets(), vec![LOCALHOST]);
    let records = world.records();
    let [record] = records.as_slice() else {
        panic!("expected one record, found {records:?}");
    };
    assert_eq!(record.name, "p1");
    assert_eq!(record.instance_id, "i-1");
    assert_eq!(record.ip, "127.0.0.1");
    assert_eq!(record.kind, ResourceKind::Instance);

    world.provider.push_info(Ok(InstanceInfo {
        address: Some(LOCALHOST),
        boot_disk_id: Some(String::from("d-1")),
    }));
    world
        .provider
        .push_delete(Ok(Submission::pending("i-1", handle("op-delete"))));
    world.provider.push_disk_delete(Ok(Submission::completed("d-1")));

    let outcome = world
        .teardown()
        .teardown("p1")
        .await
        .unwrap_or_else(|err| panic!("teardown: {err}"));

    assert_eq!(outcome, TeardownOutcome::Deleted { orphaned_disk: None });
    assert!(world.records().is_empty());
}

#[rstest]
#[tokio::test]
async fn failed_disk_deletion_is_tracked_and_reclaimed(#[future] world: World) {
    let world = world.await;
    world.script_creation("i-1");
    world
        .provisioner()
        .provision(&request("p1"))
        .await
        .unwrap_or_else(|err| panic!("provision: {err}"));

    world.provider.push_info(Ok(InstanceInfo {
        address: Some(LOCALHOST),
        boot_disk_id: Some(String::from("d-1")),
    }));
    world
        .provider
        .push_delete(Ok(Submission::completed("i-1")));
    world
        .provider
        .push_disk_delete(Ok(Submission::pending("d-1", handle("op-disk"))));
    world.provider.push_status(Ok(OperationStatus::Failed {
        message: String::from("volume busy"),
    }));

    let outcome = world
        .teardown()
        .teardown("p1")
        .await
        .unwrap_or_else(|err| panic!("teardown: {err}"));

    assert_eq!(
        outcome,
        TeardownOutcome::Deleted {
            orphaned_disk: Some(String::from("d-1"))
        }
    );
    let records = world.records();
    let [orphan] = records.as_slice() else {
        panic!("expected one orphan record, found {records:?}");
    };
    assert_eq!(orphan.kind, ResourceKind::Disk);
    assert_eq!(orphan.instance_id, "d-1");

    world.provider.push_disk_delete(Ok(Submission::completed("d-1")));
    let summary = world
        .teardown()
        .reclaim_orphans()
        .await
        .unwrap_or_else(|err| panic!("reclaim: {err}"));

    assert_eq!(summary.reclaimed, vec![String::from("d-1")]);
    assert!(world.records().is_empty());
}

#[rstest]
#[tokio::test]
async fn deleting_unknown_name_touches_nothing(#[future] world: World) {
    let world = world.await;

    let outcome = world
        .teardown()
        .teardown("ghost")
        .await
        .unwrap_or_else(|err| panic!("teardown: {err}"));

    assert_eq!(outcome, TeardownOutcome::NotFound);
    assert!(world.provider.calls().is_empty());
    assert!(!world.path.exists(), "no records file should be written");
}

#[rstest]
#[tokio::test]
async fn configure_failure_leaves_records_unchanged(#[future] world: World) {
    let world = world.await;
    world.script_creation("i-1");
    world.configurator.fail_next(DeployError::CommandFailure {
        program: String::from("ansible-playbook"),
        status: Some(2),
        status_text: String::from("exit status: 2"),
        stderr: String::from("unreachable"),
    });

    let err = world
        .provisioner()
        .provision(&request("p1"))
        .await
        .expect_err("configure failure should abort");

    assert!(matches!(err, ProvisionError::Configure { .. }));
    assert_eq!(err.unrecorded_instance(), Some("i-1"));
    assert!(world.records().is_empty());
}

#[rstest]
#[tokio::test]
async fn failed_create_operation_skips_configure_and_record(#[future] world: World) {
    let world = world.await;
    world.provider.push_create(Ok(Submission::pending(
        "i-1",
        handle("op-create"),
    )));
    world.provider.push_status(Ok(OperationStatus::Failed {
        message: String::from("quota exceeded"),
    }));

    let err = world
        .provisioner()
        .provision(&request("p1"))
        .await
        .expect_err("failed operation should abort");

    assert!(matches!(err, ProvisionError::Operation { .. }));
    assert!(world.configurator.targets().is_empty());
    assert!(world.records().is_empty());
    assert!(
        !world
            .provider
            .calls()
            .iter()
            .any(|call| matches!(call, ProviderCall::InstanceInfo { .. }))
    );
}
