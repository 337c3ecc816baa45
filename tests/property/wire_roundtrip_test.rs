// tests/property/wire_roundtrip_test.rs

//! Serialize ∘ deserialize is the identity on freshly constructed
//! requests, across targets, modes, consistencies, and optional contexts.

use bytes::{Bytes, BytesMut};
use citrinekv::core::request::{
    AuthContext, Consistency, DispatcherId, Durability, ReplicaAckPolicy, Request, RequestCodec,
    RequestOptions, RequestTarget, SyncPolicy, TraceContext,
};
use citrinekv::core::topology::{GroupId, PartitionId, ZoneId};
use proptest::prelude::*;

fn targets() -> impl Strategy<Value = RequestTarget> {
    prop_oneof![
        (0u32..10_000).prop_map(|p| RequestTarget::Partition(PartitionId(p))),
        (0u32..10_000).prop_map(|g| RequestTarget::Group(GroupId(g))),
    ]
}

fn durabilities() -> impl Strategy<Value = Durability> {
    (
        prop::sample::select(vec![
            SyncPolicy::NoSync,
            SyncPolicy::WriteNoSync,
            SyncPolicy::Sync,
        ]),
        prop::sample::select(vec![
            ReplicaAckPolicy::All,
            ReplicaAckPolicy::None,
            ReplicaAckPolicy::SimpleMajority,
        ]),
        prop::sample::select(vec![
            SyncPolicy::NoSync,
            SyncPolicy::WriteNoSync,
            SyncPolicy::Sync,
        ]),
    )
        .prop_map(|(master_sync, replica_ack, replica_sync)| Durability {
            master_sync,
            replica_ack,
            replica_sync,
        })
}

fn consistencies() -> impl Strategy<Value = Consistency> {
    prop_oneof![
        Just(Consistency::Absolute),
        Just(Consistency::NoneRequired),
        Just(Consistency::NoneRequiredNoMaster),
        (any::<u32>(), any::<u32>()).prop_map(|(permitted_lag_ms, timeout_ms)| {
            Consistency::Time {
                permitted_lag_ms,
                timeout_ms,
            }
        }),
    ]
}

fn options() -> impl Strategy<Value = RequestOptions> {
    (
        0i32..128,
        0u32..120_000,
        prop::option::of(0u32..=i32::MAX as u32),
        "[a-zA-Z0-9:.@-]{1,40}",
        prop::collection::vec(0u32..64, 0..4),
        prop::option::of((any::<[u8; 16]>(), any::<[u8; 32]>())),
        prop::option::of(("[a-z0-9-]{1,20}", "[a-z0-9-]{1,20}")),
        any::<bool>(),
    )
        .prop_map(
            |(ttl, timeout_ms, seq, dispatcher, zones, auth, trace, no_charge)| {
                let mut opts = RequestOptions::new(DispatcherId(dispatcher));
                opts.ttl = ttl;
                opts.timeout_ms = timeout_ms;
                opts.topo_seq_basis = seq;
                opts.read_zones = zones.into_iter().map(ZoneId).collect();
                opts.auth = auth.map(|(nonce, signature)| AuthContext { nonce, signature });
                opts.trace = trace.map(|(correlation_id, origin)| TraceContext {
                    correlation_id,
                    origin,
                });
                opts.no_charge = no_charge;
                opts
            },
        )
}

fn roundtrip(request: &Request) -> Request {
    let codec = RequestCodec::default();
    let mut buf = BytesMut::new();
    codec.encode_request(request, &mut buf);
    codec.decode_request(&mut buf.freeze()).unwrap()
}

proptest! {
    #[test]
    fn read_requests_roundtrip(
        target in targets(),
        consistency in consistencies(),
        payload in prop::collection::vec(any::<u8>(), 0..256),
        opts in options(),
    ) {
        let request = Request::read(target, consistency, Bytes::from(payload), opts).unwrap();
        prop_assert_eq!(roundtrip(&request), request);
    }

    #[test]
    fn write_requests_roundtrip(
        target in targets(),
        durability in durabilities(),
        payload in prop::collection::vec(any::<u8>(), 0..256),
        mut opts in options(),
    ) {
        // A write never carries a zone filter; the constructor enforces it.
        opts.read_zones.clear();
        let request = Request::write(target, durability, Bytes::from(payload), opts).unwrap();
        prop_assert_eq!(roundtrip(&request), request);
    }
}
