#[path = "helpers/mod.rs"]
mod helpers;

use bytes::Bytes;
use citrinekv::CitrineError;
use citrinekv::core::dispatch::{Dispatcher, DispatcherConfig};
use citrinekv::core::env::CommitToken;
use citrinekv::core::login::LoginManager;
use citrinekv::core::request::{
    Consistency, DispatcherId, Durability, Failure, FailureKind, OpResult, Operation, Request,
    RequestOptions, RequestTarget, Response,
};
use citrinekv::core::topology::{PartitionId, Topology, TopologyManager, ZoneId};
use helpers::{MockTransport, build_topology};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Partition 7 lives in group 2 (ports 9020/9021/9022, zones 0/1/2);
/// partition 42 lives in group 5 (ports 9050/9051).
fn topology_a(sequence: u32) -> Topology {
    build_topology(
        sequence,
        &[(7, 2), (42, 5), (13, 8)],
        &[
            (2, vec![(9020, 0), (9021, 1), (9022, 2)], 0),
            (5, vec![(9050, 0), (9051, 1)], 0),
            (8, vec![(9080, 0)], 0),
            (6, vec![(9060, 0), (9061, 1)], 0),
        ],
    )
}

/// The authoritative successor: partition 42 has moved to group 6.
fn topology_b(sequence: u32) -> Topology {
    build_topology(
        sequence,
        &[(7, 2), (42, 6), (13, 8)],
        &[
            (2, vec![(9020, 0), (9021, 1), (9022, 2)], 0),
            (5, vec![(9050, 0), (9051, 1)], 0),
            (8, vec![(9080, 0)], 0),
            (6, vec![(9060, 0), (9061, 1)], 0),
        ],
    )
}

fn dispatcher(transport: Arc<MockTransport>, sequence: u32) -> Dispatcher {
    let topology = Arc::new(TopologyManager::new());
    topology.publish(Arc::new(topology_a(sequence)));
    Dispatcher::new(
        DispatcherId("test-client".to_string()),
        topology,
        transport,
        Arc::new(LoginManager::new(None)),
        DispatcherConfig {
            default_ttl: 3,
            request_timeout: Duration::from_secs(2),
            retry_backoff: Duration::from_millis(10),
        },
    )
}

fn put_request(partition: u32, timeout_ms: u32) -> Request {
    let mut opts = RequestOptions::new(DispatcherId("test-client".to_string()));
    opts.ttl = 3;
    opts.timeout_ms = timeout_ms;
    Request::write(
        RequestTarget::Partition(PartitionId(partition)),
        Durability::default(),
        Bytes::from(
            Operation::Put {
                key: b"k".to_vec(),
                value: b"v".to_vec(),
            }
            .encode()
            .unwrap(),
        ),
        opts,
    )
    .unwrap()
}

fn read_request(partition: u32, consistency: Consistency, zones: Vec<ZoneId>) -> Request {
    let mut opts = RequestOptions::new(DispatcherId("test-client".to_string()));
    opts.read_zones = zones;
    opts.timeout_ms = 2000;
    Request::read(
        RequestTarget::Partition(PartitionId(partition)),
        consistency,
        Bytes::from(Operation::Get { key: b"k".to_vec() }.encode().unwrap()),
        opts,
    )
    .unwrap()
}

#[tokio::test]
async fn test_simple_write_routes_to_owning_master() {
    let transport = MockTransport::new();
    let env = Uuid::new_v4();
    transport.program(
        9020,
        Ok(Response::ok(OpResult::Committed(CommitToken::new(env, 1001)))),
    );

    let dispatcher = dispatcher(transport.clone(), 10);
    let result = dispatcher.dispatch(put_request(7, 5000)).await.unwrap();

    let OpResult::Committed(token) = result else {
        panic!("expected a commit token, got {result:?}");
    };
    assert_eq!(token.vlsn(), 1001);
    assert_eq!(transport.calls(), vec![9020]);

    // The token orders after anything the environment returned earlier.
    let earlier = CommitToken::new(env, 1000);
    assert_eq!(
        token.try_compare(&earlier).unwrap(),
        std::cmp::Ordering::Greater
    );
}

#[tokio::test]
async fn test_stale_topology_is_absorbed_and_retried() {
    let transport = MockTransport::new();
    // The stale owner declines and hands over the authoritative snapshot.
    transport.program(
        9050,
        Ok(Response::failure(Failure::new(
            FailureKind::WrongShard,
            "partition 42 is owned by rg6",
        ))
        .with_topology(topology_b(11))),
    );
    // The true owner commits exactly once.
    transport.program(
        9060,
        Ok(Response::ok(OpResult::Committed(CommitToken::new(
            Uuid::new_v4(),
            7,
        )))),
    );

    let dispatcher = dispatcher(transport.clone(), 10);
    let result = dispatcher.dispatch(put_request(42, 5000)).await.unwrap();

    assert!(matches!(result, OpResult::Committed(_)));
    assert_eq!(transport.calls(), vec![9050, 9060]);
    assert!(dispatcher.observed_sequence() >= 11);
}

#[tokio::test]
async fn test_not_master_hint_redirects_the_retry() {
    let transport = MockTransport::new();
    transport.program(
        9020,
        Ok(Response::failure(
            Failure::new(FailureKind::NotMaster, "rg2 master moved").with_master_hint(1),
        )),
    );
    transport.program(9021, Ok(Response::ok(OpResult::Value(Some(b"v".to_vec())))));

    let dispatcher = dispatcher(transport.clone(), 10);
    let result = dispatcher
        .dispatch(read_request(7, Consistency::Absolute, vec![]))
        .await
        .unwrap();

    assert!(matches!(result, OpResult::Value(Some(_))));
    assert_eq!(transport.calls(), vec![9020, 9021]);
}

#[tokio::test]
async fn test_read_zone_filter_narrows_the_candidates() {
    let transport = MockTransport::new();
    transport.program(9022, Ok(Response::ok(OpResult::Value(None))));

    let dispatcher = dispatcher(transport.clone(), 10);
    let result = dispatcher
        .dispatch(read_request(
            7,
            Consistency::NoneRequired,
            vec![ZoneId(2)],
        ))
        .await
        .unwrap();

    assert!(matches!(result, OpResult::Value(None)));
    // Only the zone-2 member was eligible.
    assert_eq!(transport.calls(), vec![9022]);
}

#[tokio::test]
async fn test_no_master_consistency_needs_a_replica() {
    let transport = MockTransport::new();
    let dispatcher = dispatcher(transport, 10);
    // Partition 13 lives in the single-member group 8: nothing but the
    // master exists, so the contract cannot be met.
    let err = dispatcher
        .dispatch(read_request(13, Consistency::NoneRequiredNoMaster, vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, CitrineError::ConsistencyUnavailable(_)));
}

#[tokio::test]
async fn test_auth_required_reauthenticates_once() {
    let transport = MockTransport::new();
    transport.program(
        9020,
        Ok(Response::failure(Failure::new(
            FailureKind::AuthRequired,
            "session expired",
        ))),
    );
    transport.program(
        9020,
        Ok(Response::ok(OpResult::Committed(CommitToken::new(
            Uuid::new_v4(),
            1,
        )))),
    );

    let dispatcher = dispatcher(transport.clone(), 10);
    let result = dispatcher.dispatch(put_request(7, 5000)).await.unwrap();
    assert!(matches!(result, OpResult::Committed(_)));
    assert_eq!(transport.calls(), vec![9020, 9020]);
}

#[tokio::test]
async fn test_auth_required_twice_surfaces() {
    let transport = MockTransport::new();
    for _ in 0..2 {
        transport.program(
            9020,
            Ok(Response::failure(Failure::new(
                FailureKind::AuthRequired,
                "session expired",
            ))),
        );
    }

    let dispatcher = dispatcher(transport.clone(), 10);
    let err = dispatcher.dispatch(put_request(7, 5000)).await.unwrap_err();
    assert!(matches!(err, CitrineError::AuthRequired));
}

#[tokio::test]
async fn test_unresponsive_cluster_times_out() {
    let transport = MockTransport::new();
    // Nothing is scripted: every attempt reports Unreachable.
    let dispatcher = dispatcher(transport.clone(), 10);
    let err = dispatcher.dispatch(put_request(7, 300)).await.unwrap_err();
    assert!(matches!(err, CitrineError::Timeout(300)));
    assert!(!transport.calls().is_empty());
}

#[tokio::test]
async fn test_domain_failures_surface_immediately() {
    let transport = MockTransport::new();
    transport.program(
        9020,
        Ok(Response::failure(Failure::new(
            FailureKind::MigrationError,
            "partition is sealed",
        ))),
    );

    let dispatcher = dispatcher(transport.clone(), 10);
    let err = dispatcher.dispatch(put_request(7, 5000)).await.unwrap_err();
    assert!(matches!(err, CitrineError::MigrationError(_)));
    assert_eq!(transport.calls(), vec![9020]);
}

#[tokio::test]
async fn test_observed_sequence_is_monotonic() {
    let transport = MockTransport::new();
    transport.program(
        9020,
        Ok(Response::ok(OpResult::Value(None)).with_topology(topology_a(20))),
    );
    // A later response carrying an older snapshot must not move the
    // dispatcher's observation backwards.
    transport.program(
        9020,
        Ok(Response::ok(OpResult::Value(None)).with_topology(topology_a(15))),
    );

    let dispatcher = dispatcher(transport.clone(), 10);
    dispatcher
        .dispatch(read_request(7, Consistency::Absolute, vec![]))
        .await
        .unwrap();
    assert_eq!(dispatcher.observed_sequence(), 20);

    dispatcher
        .dispatch(read_request(7, Consistency::Absolute, vec![]))
        .await
        .unwrap();
    assert_eq!(dispatcher.observed_sequence(), 20);
}
