#[path = "helpers/mod.rs"]
mod helpers;

use async_trait::async_trait;
use citrinekv::CitrineError;
use citrinekv::core::migration::{
    AdminTopologyAuthority, GroupLockTable, MigrationCoordinator, MigrationEnd, MigrationPlan,
    MigrationRecord, MigrationState, MigrationStateReport, NodeShardRpc, RetryDelays, ShardRpc,
    TopologyAuthority,
};
use citrinekv::core::request::{DispatcherId, OpResult, Response};
use citrinekv::core::topology::{
    GroupId, NodeId, PartitionId, TopologyManager, TopologyPropagator, TopologyStore,
};
use helpers::{MockTransport, build_topology};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PARTITION: PartitionId = PartitionId(11);
const SOURCE: GroupId = GroupId(3);
const TARGET: GroupId = GroupId(7);

fn topology() -> Arc<TopologyManager> {
    let manager = Arc::new(TopologyManager::new());
    manager.publish(Arc::new(build_topology(
        1,
        &[(11, 3)],
        &[
            (3, vec![(9030, 0), (9031, 1)], 0),
            (7, vec![(9070, 0), (9071, 1)], 0),
        ],
    )));
    manager
}

fn fast_delays() -> RetryDelays {
    RetryDelays {
        rn_failover: Duration::from_millis(1),
        service_unreachable: Duration::from_millis(1),
        check_migration: Duration::from_millis(1),
        admin_failover: Duration::from_millis(1),
        cleanup: Duration::from_millis(1),
    }
}

/// Scripted shard RPCs, keyed by the node each call was aimed at.
#[derive(Default)]
struct MockRpc {
    start: Mutex<HashMap<NodeId, VecDeque<Result<MigrationStateReport, CitrineError>>>>,
    status: Mutex<HashMap<NodeId, VecDeque<Result<MigrationStateReport, CitrineError>>>>,
    cancel: Mutex<HashMap<NodeId, VecDeque<Result<bool, CitrineError>>>>,
    can_cancel: Mutex<HashMap<NodeId, VecDeque<Result<MigrationStateReport, CitrineError>>>>,
    start_calls: AtomicUsize,
    status_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
}

fn node(group: GroupId, index: u8) -> NodeId {
    NodeId { group, index }
}

impl MockRpc {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn program_start(&self, to: NodeId, report: MigrationStateReport) {
        self.start.lock().unwrap().entry(to).or_default().push_back(Ok(report));
    }

    fn program_status(&self, to: NodeId, report: MigrationStateReport) {
        self.status.lock().unwrap().entry(to).or_default().push_back(Ok(report));
    }

    fn program_cancel(&self, to: NodeId, confirmed: bool) {
        self.cancel.lock().unwrap().entry(to).or_default().push_back(Ok(confirmed));
    }

    fn program_can_cancel(&self, to: NodeId, report: MigrationStateReport) {
        self.can_cancel.lock().unwrap().entry(to).or_default().push_back(Ok(report));
    }

    fn pop<T>(
        map: &Mutex<HashMap<NodeId, VecDeque<Result<T, CitrineError>>>>,
        node: NodeId,
        what: &str,
    ) -> Result<T, CitrineError> {
        map.lock()
            .unwrap()
            .get_mut(&node)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Err(CitrineError::Unreachable(format!(
                    "no scripted {what} reply for {node}"
                )))
            })
    }
}

#[async_trait]
impl ShardRpc for MockRpc {
    async fn start_migration(
        &self,
        master: NodeId,
        _partition: PartitionId,
        _source: GroupId,
    ) -> Result<MigrationStateReport, CitrineError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        Self::pop(&self.start, master, "start")
    }

    async fn migration_status(
        &self,
        master: NodeId,
        _partition: PartitionId,
    ) -> Result<MigrationStateReport, CitrineError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Self::pop(&self.status, master, "status")
    }

    async fn cancel_migration(
        &self,
        source_master: NodeId,
        _partition: PartitionId,
        _target: GroupId,
    ) -> Result<bool, CitrineError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Self::pop(&self.cancel, source_master, "cancel")
    }

    async fn can_cancel(
        &self,
        master: NodeId,
        _partition: PartitionId,
    ) -> Result<MigrationStateReport, CitrineError> {
        Self::pop(&self.can_cancel, master, "can-cancel")
    }
}

/// A scripted authority recording reassignments and broadcasts.
#[derive(Default)]
struct MockAuthority {
    reassign_script: Mutex<VecDeque<Result<bool, CitrineError>>>,
    broadcast_script: Mutex<VecDeque<Result<(), CitrineError>>>,
    reassignments: Mutex<Vec<(PartitionId, GroupId)>>,
    broadcasts: AtomicUsize,
}

impl MockAuthority {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn program_reassign(&self, result: Result<bool, CitrineError>) {
        self.reassign_script.lock().unwrap().push_back(result);
    }

    fn program_broadcast(&self, result: Result<(), CitrineError>) {
        self.broadcast_script.lock().unwrap().push_back(result);
    }
}

#[async_trait]
impl TopologyAuthority for MockAuthority {
    async fn reassign_partition(
        &self,
        partition: PartitionId,
        target: GroupId,
    ) -> Result<bool, CitrineError> {
        let result = self
            .reassign_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(true));
        if matches!(result, Ok(true)) {
            self.reassignments.lock().unwrap().push((partition, target));
        }
        result
    }

    async fn broadcast(&self) -> Result<(), CitrineError> {
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
        self.broadcast_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }
}

struct Harness {
    rpc: Arc<MockRpc>,
    authority: Arc<MockAuthority>,
    locks: Arc<GroupLockTable>,
    coordinator: MigrationCoordinator,
}

fn harness(record: MigrationRecord) -> Harness {
    let rpc = MockRpc::new();
    let authority = MockAuthority::new();
    let locks = Arc::new(GroupLockTable::new());
    let coordinator = MigrationCoordinator::new(
        record,
        topology(),
        rpc.clone(),
        authority.clone(),
        locks.clone(),
        fast_delays(),
    );
    Harness {
        rpc,
        authority,
        locks,
        coordinator,
    }
}

#[tokio::test]
async fn test_happy_path_moves_the_partition() {
    let h = harness(MigrationRecord::new(PARTITION, SOURCE, TARGET));
    let target_master = node(TARGET, 0);
    let source_master = node(SOURCE, 0);

    h.rpc
        .program_start(target_master, MigrationStateReport::of(MigrationState::Running));
    for _ in 0..3 {
        h.rpc.program_status(
            target_master,
            MigrationStateReport::of(MigrationState::Running),
        );
        // The detail fetch against the source while the pull runs.
        h.rpc.program_status(
            source_master,
            MigrationStateReport::of(MigrationState::Running),
        );
    }
    h.rpc.program_status(
        target_master,
        MigrationStateReport::of(MigrationState::Succeeded),
    );
    h.rpc.program_status(
        source_master,
        MigrationStateReport::of(MigrationState::Succeeded),
    );

    let plan = MigrationPlan::new();
    let outcome = h.coordinator.run(&plan).await;

    assert_eq!(outcome.end, MigrationEnd::Succeeded);
    assert_eq!(
        h.authority.reassignments.lock().unwrap().as_slice(),
        &[(PARTITION, TARGET)]
    );
    assert_eq!(h.authority.broadcasts.load(Ordering::SeqCst), 1);
    assert_eq!(
        outcome.record.observed_target_status.as_deref(),
        Some("SUCCEEDED")
    );
    assert_eq!(
        outcome.record.observed_source_status.as_deref(),
        Some("SUCCEEDED")
    );
    // Both group locks are free again.
    assert!(!h.locks.is_locked(SOURCE));
    assert!(!h.locks.is_locked(TARGET));
}

#[tokio::test]
async fn test_target_error_cancels_on_source() {
    let h = harness(MigrationRecord::new(PARTITION, SOURCE, TARGET));
    h.rpc
        .program_start(node(TARGET, 0), MigrationStateReport::error("disk full"));
    h.rpc.program_cancel(node(SOURCE, 0), true);

    let plan = MigrationPlan::new();
    let outcome = h.coordinator.run(&plan).await;

    assert_eq!(outcome.end, MigrationEnd::Errored);
    assert_eq!(outcome.record.cause.as_deref(), Some("disk full"));
    // The authoritative map is untouched.
    assert!(h.authority.reassignments.lock().unwrap().is_empty());
    assert_eq!(h.authority.broadcasts.load(Ordering::SeqCst), 0);
    assert!(!h.locks.is_locked(SOURCE));
    assert!(!h.locks.is_locked(TARGET));
}

#[tokio::test]
async fn test_cancel_retries_until_the_source_confirms() {
    let h = harness(MigrationRecord::new(PARTITION, SOURCE, TARGET));
    h.rpc
        .program_start(node(TARGET, 0), MigrationStateReport::error("pull failed"));
    h.rpc.program_cancel(node(SOURCE, 0), false);
    h.rpc.program_cancel(node(SOURCE, 0), false);
    h.rpc.program_cancel(node(SOURCE, 0), true);

    let outcome = h.coordinator.run(&MigrationPlan::new()).await;
    assert_eq!(outcome.end, MigrationEnd::Errored);
    assert_eq!(h.rpc.cancel_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_replayed_topology_update_skips_the_broadcast() {
    let h = harness(MigrationRecord::new(PARTITION, SOURCE, TARGET));
    h.rpc.program_start(
        node(TARGET, 0),
        MigrationStateReport::of(MigrationState::Succeeded),
    );
    // The admin record already names the target.
    h.authority.program_reassign(Ok(false));

    let outcome = h.coordinator.run(&MigrationPlan::new()).await;
    assert_eq!(outcome.end, MigrationEnd::Succeeded);
    assert_eq!(h.authority.broadcasts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_source_goes_straight_to_topology_update() {
    let h = harness(MigrationRecord::for_failed_source(PARTITION, SOURCE, TARGET));

    let outcome = h.coordinator.run(&MigrationPlan::new()).await;
    assert_eq!(outcome.end, MigrationEnd::Succeeded);
    // Nothing was asked of the shards; ownership moved administratively.
    assert_eq!(h.rpc.start_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.rpc.status_calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.authority.reassignments.lock().unwrap().as_slice(),
        &[(PARTITION, TARGET)]
    );
}

#[tokio::test]
async fn test_unknown_answer_re_sends_the_request() {
    let h = harness(MigrationRecord::new(PARTITION, SOURCE, TARGET));
    let target_master = node(TARGET, 0);
    // A replica may have answered; the coordinator must ask again.
    h.rpc
        .program_start(target_master, MigrationStateReport::of(MigrationState::Unknown));
    h.rpc.program_start(
        target_master,
        MigrationStateReport::of(MigrationState::Succeeded),
    );

    let outcome = h.coordinator.run(&MigrationPlan::new()).await;
    assert_eq!(outcome.end, MigrationEnd::Succeeded);
    assert_eq!(h.rpc.start_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_broadcast_is_retried_until_quorum() {
    let h = harness(MigrationRecord::new(PARTITION, SOURCE, TARGET));
    h.rpc.program_start(
        node(TARGET, 0),
        MigrationStateReport::of(MigrationState::Succeeded),
    );
    h.authority
        .program_broadcast(Err(CitrineError::Unreachable("no quorum".to_string())));
    h.authority.program_broadcast(Ok(()));

    let outcome = h.coordinator.run(&MigrationPlan::new()).await;
    assert_eq!(outcome.end, MigrationEnd::Succeeded);
    assert_eq!(h.authority.broadcasts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_interrupted_plan_cleans_up_an_errored_target() {
    let h = harness(MigrationRecord::new(PARTITION, SOURCE, TARGET));
    h.rpc.program_can_cancel(
        node(TARGET, 0),
        MigrationStateReport::error("target failed"),
    );
    h.rpc.program_cancel(node(SOURCE, 0), true);

    let plan = MigrationPlan::new();
    plan.interrupt();
    let outcome = h.coordinator.run(&plan).await;

    assert_eq!(outcome.end, MigrationEnd::Errored);
    assert_eq!(outcome.record.cause.as_deref(), Some("target failed"));
}

#[tokio::test]
async fn test_interrupted_plan_finishes_a_completed_migration() {
    let h = harness(MigrationRecord::new(PARTITION, SOURCE, TARGET));
    h.rpc.program_can_cancel(
        node(TARGET, 0),
        MigrationStateReport::of(MigrationState::Succeeded),
    );

    let plan = MigrationPlan::new();
    plan.interrupt();
    let outcome = h.coordinator.run(&plan).await;

    // The pull had already finished: commit and announce it.
    assert_eq!(outcome.end, MigrationEnd::Succeeded);
    assert_eq!(
        h.authority.reassignments.lock().unwrap().as_slice(),
        &[(PARTITION, TARGET)]
    );
    assert_eq!(h.authority.broadcasts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_migration_over_the_wire_adapters() {
    // The same state machine, driven through the production seams: shard
    // RPCs over the node transport, and the file-backed admin topology.
    let manager = Arc::new(TopologyManager::new());
    let cluster = build_topology(
        1,
        &[(11, 3)],
        &[(3, vec![(9330, 0)], 0), (7, vec![(9370, 0)], 0)],
    );
    manager.publish(Arc::new(cluster.clone()));

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(TopologyStore::open(dir.path().join("topology.json")).unwrap());
    store.install(cluster).unwrap();

    let transport = MockTransport::new();
    // The target master answers start-migration, then acks the broadcast.
    transport.program(
        9370,
        Ok(Response::ok(OpResult::Migration(MigrationStateReport::of(
            MigrationState::Succeeded,
        )))),
    );
    transport.program(9370, Ok(Response::ok(OpResult::Accepted)));
    // The source master only sees the broadcast.
    transport.program(9330, Ok(Response::ok(OpResult::Accepted)));

    let admin_id = DispatcherId("admin".to_string());
    let rpc = Arc::new(NodeShardRpc::new(
        transport.clone(),
        manager.clone(),
        admin_id.clone(),
    ));
    let authority = Arc::new(AdminTopologyAuthority::new(
        store.clone(),
        manager.clone(),
        TopologyPropagator::new(transport.clone(), admin_id),
    ));

    let coordinator = MigrationCoordinator::new(
        MigrationRecord::new(PARTITION, SOURCE, TARGET),
        manager.clone(),
        rpc,
        authority,
        Arc::new(GroupLockTable::new()),
        fast_delays(),
    );
    let outcome = coordinator.run(&MigrationPlan::new()).await;

    assert_eq!(outcome.end, MigrationEnd::Succeeded);
    let authoritative = store.current().unwrap();
    assert_eq!(
        authoritative.group_for_partition(PARTITION).unwrap(),
        TARGET
    );
    assert_eq!(authoritative.sequence, 2);
    // The local manager observed the updated snapshot too.
    assert_eq!(manager.sequence(), Some(2));
    assert_eq!(transport.calls(), vec![9370, 9330, 9370]);
}

#[tokio::test]
async fn test_group_locks_serialize_overlapping_migrations() {
    let locks = Arc::new(GroupLockTable::new());
    let guard = locks.lock_pair(GroupId(1), GroupId(2)).await;
    assert!(locks.is_locked(GroupId(1)));
    assert!(locks.is_locked(GroupId(2)));

    // A migration touching group 2 must wait for the first to finish.
    let locks_clone = locks.clone();
    let contender =
        tokio::spawn(async move { locks_clone.lock_pair(GroupId(2), GroupId(3)).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!contender.is_finished());

    drop(guard);
    let _second = contender.await.unwrap();
    assert!(locks.is_locked(GroupId(2)));
    assert!(locks.is_locked(GroupId(3)));
    assert!(!locks.is_locked(GroupId(1)));
}

#[tokio::test]
async fn test_lock_order_is_deterministic_across_callers() {
    // Two migrations naming the same pair in opposite orders must not
    // deadlock; both acquire in ascending group order.
    let locks = Arc::new(GroupLockTable::new());
    let a = locks.clone();
    let b = locks.clone();
    let first = tokio::spawn(async move {
        for _ in 0..50 {
            let _g = a.lock_pair(GroupId(4), GroupId(9)).await;
        }
    });
    let second = tokio::spawn(async move {
        for _ in 0..50 {
            let _g = b.lock_pair(GroupId(9), GroupId(4)).await;
        }
    });
    tokio::time::timeout(Duration::from_secs(5), async {
        first.await.unwrap();
        second.await.unwrap();
    })
    .await
    .expect("lock ordering must prevent deadlock");
}

#[tokio::test]
async fn test_same_group_pair_is_a_single_lock() {
    let locks = GroupLockTable::new();
    let _guard = locks.lock_pair(GroupId(5), GroupId(5)).await;
    assert!(locks.is_locked(GroupId(5)));
}
