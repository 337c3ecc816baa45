use citrinekv::core::topology::{
    GroupId, GroupInfo, NodeEndpoint, NodeId, PartitionId, Topology, TopologyManager,
    TopologyStore, ZoneId,
};
use std::collections::BTreeMap;
use std::sync::Arc;

fn endpoint(port: u16, zone: u32) -> NodeEndpoint {
    NodeEndpoint {
        host: "127.0.0.1".to_string(),
        port,
        zone: ZoneId(zone),
    }
}

fn small_topology(sequence: u32) -> Topology {
    let mut partition_map = BTreeMap::new();
    for p in 0..8 {
        let group = if p < 4 { GroupId(1) } else { GroupId(2) };
        partition_map.insert(PartitionId(p), group);
    }
    let mut group_map = BTreeMap::new();
    group_map.insert(
        GroupId(1),
        GroupInfo {
            members: vec![endpoint(9001, 0), endpoint(9002, 1)],
            master: 0,
        },
    );
    group_map.insert(
        GroupId(2),
        GroupInfo {
            members: vec![endpoint(9003, 0), endpoint(9004, 1)],
            master: 1,
        },
    );
    let mut zone_map = BTreeMap::new();
    zone_map.insert("east".to_string(), ZoneId(0));
    zone_map.insert("west".to_string(), ZoneId(1));
    Topology {
        sequence,
        partition_map,
        group_map,
        zone_map,
        migrating: BTreeMap::new(),
    }
}

#[tokio::test]
async fn test_every_partition_has_exactly_one_owner() {
    let topology = small_topology(1);
    topology.validate().unwrap();
    for p in 0..8 {
        topology.group_for_partition(PartitionId(p)).unwrap();
    }
    assert!(topology.group_for_partition(PartitionId(99)).is_err());
}

#[tokio::test]
async fn test_validate_rejects_unknown_group_and_bad_master() {
    let mut topology = small_topology(1);
    topology
        .partition_map
        .insert(PartitionId(0), GroupId(42));
    assert!(topology.validate().is_err());

    let mut topology = small_topology(1);
    topology.group_map.get_mut(&GroupId(1)).unwrap().master = 7;
    assert!(topology.validate().is_err());

    let mut topology = small_topology(1);
    topology.group_map.get_mut(&GroupId(1)).unwrap().members.clear();
    assert!(topology.validate().is_err());
}

#[tokio::test]
async fn test_key_hashing_is_deterministic_and_in_range() {
    let topology = small_topology(1);
    let p1 = topology.partition_for_key(b"user:1001").unwrap();
    let p2 = topology.partition_for_key(b"user:1001").unwrap();
    assert_eq!(p1, p2);
    assert!((p1.0 as usize) < topology.partition_count());
}

#[tokio::test]
async fn test_master_and_endpoint_resolution() {
    let topology = small_topology(1);
    let master = topology.master_of(GroupId(2)).unwrap();
    assert_eq!(
        master,
        NodeId {
            group: GroupId(2),
            index: 1
        }
    );
    assert_eq!(topology.endpoint(master).unwrap().port, 9004);
    assert_eq!(topology.group_size(GroupId(1)), 2);
}

#[tokio::test]
async fn test_manager_publishes_monotonically() {
    let manager = TopologyManager::new();
    assert!(manager.current().is_none());

    assert!(manager.publish(Arc::new(small_topology(5))));
    assert_eq!(manager.sequence(), Some(5));

    // Re-publishing the same or an older sequence is ignored.
    assert!(!manager.publish(Arc::new(small_topology(5))));
    assert!(!manager.publish(Arc::new(small_topology(3))));
    assert_eq!(manager.sequence(), Some(5));

    assert!(manager.publish(Arc::new(small_topology(6))));
    assert_eq!(manager.sequence(), Some(6));
}

#[tokio::test]
async fn test_group_state_overlay_yields_to_newer_snapshot() {
    let manager = TopologyManager::new();
    manager.publish(Arc::new(small_topology(1)));
    assert_eq!(manager.master_index(GroupId(1)), Some(0));

    manager.absorb_group_state(citrinekv::core::topology::GroupStateDelta {
        group: GroupId(1),
        master: 1,
        size: 2,
    });
    assert_eq!(manager.master_index(GroupId(1)), Some(1));

    // A newer snapshot clears the overlay.
    manager.publish(Arc::new(small_topology(2)));
    assert_eq!(manager.master_index(GroupId(1)), Some(0));
}

#[tokio::test]
async fn test_store_reassignment_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("topology.json");
    let store = TopologyStore::open(&path).unwrap();
    store.install(small_topology(1)).unwrap();

    // First reassignment changes the record and bumps the sequence.
    let updated = store
        .reassign_partition(PartitionId(0), GroupId(2))
        .unwrap()
        .expect("first reassignment changes the record");
    assert_eq!(updated.sequence, 2);
    assert_eq!(
        updated.group_for_partition(PartitionId(0)).unwrap(),
        GroupId(2)
    );

    // Replaying it is a no-op: no new topology, no sequence bump.
    assert!(
        store
            .reassign_partition(PartitionId(0), GroupId(2))
            .unwrap()
            .is_none()
    );
    assert_eq!(store.current().unwrap().sequence, 2);
}

#[tokio::test]
async fn test_store_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("topology.json");
    {
        let store = TopologyStore::open(&path).unwrap();
        store.install(small_topology(1)).unwrap();
        store
            .reassign_partition(PartitionId(7), GroupId(1))
            .unwrap();
    }
    let reloaded = TopologyStore::open(&path).unwrap();
    let topology = reloaded.current().unwrap();
    assert_eq!(topology.sequence, 2);
    assert_eq!(
        topology.group_for_partition(PartitionId(7)).unwrap(),
        GroupId(1)
    );
}

#[tokio::test]
async fn test_store_refuses_stale_install() {
    let dir = tempfile::tempdir().unwrap();
    let store = TopologyStore::open(dir.path().join("topology.json")).unwrap();
    store.install(small_topology(4)).unwrap();
    assert!(store.install(small_topology(4)).is_err());
    assert!(store.install(small_topology(2)).is_err());
    store.install(small_topology(5)).unwrap();
}

#[tokio::test]
async fn test_migrating_marker_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = TopologyStore::open(dir.path().join("topology.json")).unwrap();
    store.install(small_topology(1)).unwrap();

    let marked = store
        .set_migrating(PartitionId(3), Some(GroupId(2)))
        .unwrap();
    assert!(marked.is_migrating(PartitionId(3)));

    // The reassignment clears the marker along with the move.
    let updated = store
        .reassign_partition(PartitionId(3), GroupId(2))
        .unwrap()
        .unwrap();
    assert!(!updated.is_migrating(PartitionId(3)));
}
