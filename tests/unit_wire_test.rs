use bytes::{Bytes, BytesMut};
use citrinekv::CitrineError;
use citrinekv::core::env::CommitToken;
use citrinekv::core::request::{
    AuthContext, Consistency, DispatcherId, Durability, Request, RequestCodec, RequestOptions,
    RequestTarget, TraceContext, SERIAL_VERSION, SERIAL_VERSION_MIN,
};
use citrinekv::core::topology::{GroupId, PartitionId, ZoneId};
use uuid::Uuid;

fn opts() -> RequestOptions {
    RequestOptions::new(DispatcherId("dispatcher-9".to_string()))
}

fn roundtrip(request: &Request) -> Request {
    let codec = RequestCodec::default();
    let mut buf = BytesMut::new();
    codec.encode_request(request, &mut buf);
    let mut bytes = buf.freeze();
    let decoded = codec.decode_request(&mut bytes).unwrap();
    assert_eq!(bytes.len(), 0, "decoder must consume the whole body");
    decoded
}

#[tokio::test]
async fn test_write_request_roundtrip() {
    let mut options = opts();
    options.ttl = 3;
    options.timeout_ms = 5000;
    options.topo_seq_basis = Some(17);
    options.no_charge = true;
    let request = Request::write(
        RequestTarget::Partition(PartitionId(7)),
        Durability::default(),
        Bytes::from_static(b"op-bytes"),
        options,
    )
    .unwrap();
    assert_eq!(roundtrip(&request), request);
}

#[tokio::test]
async fn test_read_request_roundtrip_with_zones_auth_and_trace() {
    let mut options = opts();
    options.read_zones = vec![ZoneId(1), ZoneId(4)];
    options.auth = Some(AuthContext {
        nonce: [7u8; 16],
        signature: [9u8; 32],
    });
    options.trace = Some(TraceContext {
        correlation_id: "c-123".to_string(),
        origin: "client-app".to_string(),
    });
    let request = Request::read(
        RequestTarget::Group(GroupId(6)),
        Consistency::Time {
            permitted_lag_ms: 250,
            timeout_ms: 1000,
        },
        Bytes::from_static(b"read-op"),
        options,
    )
    .unwrap();
    assert_eq!(roundtrip(&request), request);
}

#[tokio::test]
async fn test_token_consistency_roundtrip() {
    let token = CommitToken::new(Uuid::new_v4(), 42);
    let request = Request::read(
        RequestTarget::Partition(PartitionId(0)),
        Consistency::Token {
            token,
            timeout_ms: 700,
        },
        Bytes::new(),
        opts(),
    )
    .unwrap();
    let decoded = roundtrip(&request);
    assert_eq!(decoded.consistency, request.consistency);
}

#[tokio::test]
async fn test_forwarding_chain_survives_the_wire() {
    let mut request = Request::read(
        RequestTarget::Partition(PartitionId(3)),
        Consistency::NoneRequired,
        Bytes::new(),
        opts(),
    )
    .unwrap();
    request.update_forwarding_chain(2, GroupId(5), 4).unwrap();
    request.update_forwarding_chain(0, GroupId(5), 4).unwrap();
    let decoded = roundtrip(&request);
    assert_eq!(decoded.forwarding_chain().hops(), &[2, 0]);
    assert_eq!(decoded.ttl(), request.ttl());
}

#[tokio::test]
async fn test_receiver_rejects_newer_serial_version() {
    let codec = RequestCodec::default();
    let mut request = Request::read(
        RequestTarget::Partition(PartitionId(0)),
        Consistency::NoneRequired,
        Bytes::new(),
        opts(),
    )
    .unwrap();
    request.serial_version = SERIAL_VERSION + 1;

    let mut buf = BytesMut::new();
    codec.encode_request(&request, &mut buf);
    let err = codec.decode_request(&mut buf.freeze()).unwrap_err();
    assert!(matches!(err, CitrineError::UnsupportedVersion { .. }));
}

#[tokio::test]
async fn test_receiver_rejects_version_below_floor() {
    let codec = RequestCodec::default();
    let mut request = Request::read(
        RequestTarget::Partition(PartitionId(0)),
        Consistency::NoneRequired,
        Bytes::new(),
        opts(),
    )
    .unwrap();
    request.serial_version = SERIAL_VERSION_MIN - 1;

    let mut buf = BytesMut::new();
    codec.encode_request(&request, &mut buf);
    let err = codec.decode_request(&mut buf.freeze()).unwrap_err();
    assert!(matches!(err, CitrineError::UnsupportedVersion { .. }));
}

#[tokio::test]
async fn test_version_bounds_are_constructor_parameters() {
    // A test build can widen the accepted window without any global state.
    let codec = RequestCodec::with_versions(1, SERIAL_VERSION + 5);
    let mut request = Request::read(
        RequestTarget::Partition(PartitionId(0)),
        Consistency::NoneRequired,
        Bytes::new(),
        opts(),
    )
    .unwrap();
    request.serial_version = SERIAL_VERSION + 4;

    let mut buf = BytesMut::new();
    codec.encode_request(&request, &mut buf);
    let decoded = codec.decode_request(&mut buf.freeze()).unwrap();
    assert_eq!(decoded.serial_version, SERIAL_VERSION + 4);
}

#[tokio::test]
async fn test_truncated_body_is_rejected() {
    let codec = RequestCodec::default();
    let request = Request::write(
        RequestTarget::Partition(PartitionId(1)),
        Durability::default(),
        Bytes::from_static(b"payload"),
        opts(),
    )
    .unwrap();
    let mut buf = BytesMut::new();
    codec.encode_request(&request, &mut buf);
    let full = buf.freeze();
    let mut truncated = full.slice(..full.len() - 3);
    let err = codec.decode_request(&mut truncated).unwrap_err();
    assert!(matches!(err, CitrineError::IncompleteData));
}
