// src/core/request/wire.rs

//! The client wire format. Requests are laid out field by field in
//! big-endian order; responses travel as a bincode envelope. Both ride
//! inside a length-prefixed frame handled by `WireCodec`.

use super::request::{
    AuthContext, Consistency, DispatcherId, Durability, ForwardingChain, ReplicaAckPolicy,
    Request, RequestOptions, RequestTarget, SyncPolicy, TraceContext, MAX_CHAIN_LEN,
};
use super::response::Response;
use crate::core::CitrineError;
use crate::core::env::CommitToken;
use crate::core::topology::{GroupId, PartitionId, ZoneId};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The serial version this build emits.
pub const SERIAL_VERSION: u16 = 3;
/// The oldest serial version this build still accepts.
pub const SERIAL_VERSION_MIN: u16 = 2;

/// Frames larger than this are rejected outright.
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const FRAME_REQUEST: u8 = 0x01;
const FRAME_RESPONSE: u8 = 0x02;

const NULL_ID: i32 = -1;

/// One message on a node-to-node connection.
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    Request(Request),
    Response(Response),
}

/// Encodes and decodes the request body. The version bounds are
/// constructor parameters so tests can exercise the rejection paths
/// without any global override.
#[derive(Debug, Clone)]
pub struct RequestCodec {
    pub floor: u16,
    pub ceiling: u16,
}

impl Default for RequestCodec {
    fn default() -> Self {
        Self {
            floor: SERIAL_VERSION_MIN,
            ceiling: SERIAL_VERSION,
        }
    }
}

impl RequestCodec {
    pub fn with_versions(floor: u16, ceiling: u16) -> Self {
        Self { floor, ceiling }
    }

    /// Writes the request body in the §-by-§ wire order.
    pub fn encode_request(&self, request: &Request, dst: &mut BytesMut) {
        dst.put_u16(request.serial_version);
        match request.target {
            RequestTarget::Partition(p) => {
                dst.put_i32(p.0 as i32);
                dst.put_i32(NULL_ID);
            }
            RequestTarget::Group(g) => {
                dst.put_i32(NULL_ID);
                dst.put_i32(g.0 as i32);
            }
        }
        dst.put_u8(u8::from(request.write));
        if request.write {
            let durability = request.durability.unwrap_or_default();
            dst.put_u8(durability.master_sync as u8);
            dst.put_u8(durability.replica_ack as u8);
            dst.put_u8(durability.replica_sync as u8);
        } else {
            match request.consistency.expect("read request carries consistency") {
                Consistency::Absolute => dst.put_u8(0),
                Consistency::NoneRequired => dst.put_u8(1),
                Consistency::NoneRequiredNoMaster => dst.put_u8(2),
                Consistency::Time {
                    permitted_lag_ms,
                    timeout_ms,
                } => {
                    dst.put_u8(3);
                    dst.put_u32(permitted_lag_ms);
                    dst.put_u32(timeout_ms);
                }
                Consistency::Token { token, timeout_ms } => {
                    dst.put_u8(4);
                    dst.put_slice(&token.to_bytes());
                    dst.put_u32(timeout_ms);
                }
            }
        }
        dst.put_i32(request.ttl());
        let chain = request.forwarding_chain();
        dst.put_u8(chain.len() as u8);
        dst.put_slice(chain.hops());
        dst.put_i32(request.timeout_ms as i32);
        dst.put_i32(
            request
                .topo_seq_basis
                .map_or(NULL_ID, |seq| seq as i32),
        );
        put_short_string(dst, &request.dispatcher_id.0);
        dst.put_u32(request.payload.len() as u32);
        dst.put_slice(&request.payload);
        dst.put_i32(request.read_zones.len() as i32);
        for zone in &request.read_zones {
            dst.put_i32(zone.0 as i32);
        }
        match &request.auth {
            Some(auth) => {
                dst.put_u8(1);
                dst.put_slice(&auth.nonce);
                dst.put_slice(&auth.signature);
            }
            None => dst.put_u8(0),
        }
        match &request.trace {
            Some(trace) => {
                dst.put_u8(1);
                put_short_string(dst, &trace.correlation_id);
                put_short_string(dst, &trace.origin);
            }
            None => dst.put_u8(0),
        }
        dst.put_u8(u8::from(request.no_charge));
    }

    /// Parses a request body, gating on the serial version before anything
    /// else is touched.
    pub fn decode_request(&self, src: &mut Bytes) -> Result<Request, CitrineError> {
        let serial_version = get_u16(src)?;
        if serial_version < self.floor || serial_version > self.ceiling {
            return Err(CitrineError::UnsupportedVersion {
                received: serial_version,
                floor: self.floor,
                ceiling: self.ceiling,
            });
        }

        let partition = get_optional_id(src)?;
        let group = get_optional_id(src)?;
        let target = match (partition, group) {
            (Some(p), None) => RequestTarget::Partition(PartitionId(p)),
            (None, Some(g)) => RequestTarget::Group(GroupId(g)),
            (Some(_), Some(_)) => {
                return Err(CitrineError::InvalidRequest(
                    "request names both a partition and a group".to_string(),
                ));
            }
            (None, None) => {
                return Err(CitrineError::InvalidRequest(
                    "request names neither a partition nor a group".to_string(),
                ));
            }
        };

        let write = get_u8(src)? != 0;
        let mut durability = None;
        let mut consistency = None;
        if write {
            durability = Some(Durability {
                master_sync: SyncPolicy::from_u8(get_u8(src)?)?,
                replica_ack: ReplicaAckPolicy::from_u8(get_u8(src)?)?,
                replica_sync: SyncPolicy::from_u8(get_u8(src)?)?,
            });
        } else {
            consistency = Some(match get_u8(src)? {
                0 => Consistency::Absolute,
                1 => Consistency::NoneRequired,
                2 => Consistency::NoneRequiredNoMaster,
                3 => Consistency::Time {
                    permitted_lag_ms: get_u32(src)?,
                    timeout_ms: get_u32(src)?,
                },
                4 => {
                    let mut token = [0u8; 24];
                    get_exact(src, &mut token)?;
                    Consistency::Token {
                        token: CommitToken::from_bytes(&token),
                        timeout_ms: get_u32(src)?,
                    }
                }
                other => {
                    return Err(CitrineError::InvalidRequest(format!(
                        "unknown consistency tag {other}"
                    )));
                }
            });
        }

        let ttl = get_i32(src)?;
        if ttl < 0 {
            return Err(CitrineError::InvalidRequest(
                "negative hop budget".to_string(),
            ));
        }

        let chain_len = usize::from(get_u8(src)?);
        if chain_len > MAX_CHAIN_LEN {
            return Err(CitrineError::InvalidRequest(format!(
                "forwarding chain of {chain_len} exceeds {MAX_CHAIN_LEN}"
            )));
        }
        let mut hops = vec![0u8; chain_len];
        get_exact(src, &mut hops)?;

        let timeout_ms = get_i32(src)?;
        if timeout_ms < 0 {
            return Err(CitrineError::InvalidRequest(
                "negative timeout".to_string(),
            ));
        }
        let topo_seq_basis = get_optional_id(src)?;
        let dispatcher_id = DispatcherId(get_short_string(src)?);

        let payload_len = get_u32(src)? as usize;
        if payload_len > src.remaining() {
            return Err(CitrineError::IncompleteData);
        }
        let payload = src.split_to(payload_len);

        let zone_count = get_i32(src)?;
        let mut read_zones = Vec::new();
        if zone_count > 0 {
            for _ in 0..zone_count {
                let id = get_i32(src)?;
                if id < 0 {
                    return Err(CitrineError::InvalidRequest(
                        "negative read-zone id".to_string(),
                    ));
                }
                read_zones.push(ZoneId(id as u32));
            }
        }
        if write && !read_zones.is_empty() {
            return Err(CitrineError::InvalidRequest(
                "a write request cannot carry a read-zone filter".to_string(),
            ));
        }

        let auth = if get_u8(src)? != 0 {
            let mut nonce = [0u8; 16];
            get_exact(src, &mut nonce)?;
            let mut signature = [0u8; 32];
            get_exact(src, &mut signature)?;
            Some(AuthContext { nonce, signature })
        } else {
            None
        };

        let trace = if get_u8(src)? != 0 {
            Some(TraceContext {
                correlation_id: get_short_string(src)?,
                origin: get_short_string(src)?,
            })
        } else {
            None
        };

        let no_charge = get_u8(src)? != 0;

        let opts = RequestOptions {
            ttl,
            timeout_ms: timeout_ms as u32,
            topo_seq_basis,
            dispatcher_id,
            read_zones,
            auth,
            trace,
            no_charge,
        };
        let mut request = if write {
            Request::write(
                target,
                durability.expect("write request carries durability"),
                payload,
                opts,
            )?
        } else {
            Request::read(
                target,
                consistency.expect("read request carries consistency"),
                payload,
                opts,
            )?
        };
        request.serial_version = serial_version;
        request.restore_wire_state(ttl, ForwardingChain::from_hops(hops));
        request.validate()?;
        Ok(request)
    }
}

/// Length-prefixed framing over a node-to-node stream. One frame carries
/// one request or one response.
#[derive(Debug, Clone, Default)]
pub struct WireCodec {
    pub requests: RequestCodec,
}

impl WireCodec {
    pub fn new(requests: RequestCodec) -> Self {
        Self { requests }
    }
}

impl Encoder<WireFrame> for WireCodec {
    type Error = CitrineError;

    fn encode(&mut self, frame: WireFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut body = BytesMut::new();
        match &frame {
            WireFrame::Request(request) => {
                body.put_u8(FRAME_REQUEST);
                self.requests.encode_request(request, &mut body);
            }
            WireFrame::Response(response) => {
                body.put_u8(FRAME_RESPONSE);
                let encoded =
                    bincode::encode_to_vec(response, bincode::config::standard())?;
                body.put_slice(&encoded);
            }
        }
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}

impl Decoder for WireCodec {
    type Item = WireFrame;
    type Error = CitrineError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let frame_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if frame_len > MAX_FRAME_SIZE {
            return Err(CitrineError::InvalidRequest(format!(
                "frame of {frame_len} bytes exceeds the {MAX_FRAME_SIZE} byte limit"
            )));
        }
        if src.len() < 4 + frame_len {
            src.reserve(4 + frame_len - src.len());
            return Ok(None);
        }
        src.advance(4);
        let mut body = src.split_to(frame_len).freeze();
        match get_u8(&mut body)? {
            FRAME_REQUEST => Ok(Some(WireFrame::Request(
                self.requests.decode_request(&mut body)?,
            ))),
            FRAME_RESPONSE => {
                let (response, _) =
                    bincode::decode_from_slice(&body, bincode::config::standard())?;
                Ok(Some(WireFrame::Response(response)))
            }
            other => Err(CitrineError::InvalidRequest(format!(
                "unknown frame kind {other:#x}"
            ))),
        }
    }
}

// --- Buffer helpers with explicit truncation checks ---

fn get_u8(src: &mut Bytes) -> Result<u8, CitrineError> {
    if src.remaining() < 1 {
        return Err(CitrineError::IncompleteData);
    }
    Ok(src.get_u8())
}

fn get_u16(src: &mut Bytes) -> Result<u16, CitrineError> {
    if src.remaining() < 2 {
        return Err(CitrineError::IncompleteData);
    }
    Ok(src.get_u16())
}

fn get_u32(src: &mut Bytes) -> Result<u32, CitrineError> {
    if src.remaining() < 4 {
        return Err(CitrineError::IncompleteData);
    }
    Ok(src.get_u32())
}

fn get_i32(src: &mut Bytes) -> Result<i32, CitrineError> {
    if src.remaining() < 4 {
        return Err(CitrineError::IncompleteData);
    }
    Ok(src.get_i32())
}

fn get_exact(src: &mut Bytes, out: &mut [u8]) -> Result<(), CitrineError> {
    if src.remaining() < out.len() {
        return Err(CitrineError::IncompleteData);
    }
    src.copy_to_slice(out);
    Ok(())
}

/// A `-1` sentinel decodes to `None`; other negatives are malformed.
fn get_optional_id(src: &mut Bytes) -> Result<Option<u32>, CitrineError> {
    match get_i32(src)? {
        NULL_ID => Ok(None),
        id if id >= 0 => Ok(Some(id as u32)),
        other => Err(CitrineError::InvalidRequest(format!(
            "negative identifier {other}"
        ))),
    }
}

fn put_short_string(dst: &mut BytesMut, value: &str) {
    dst.put_u16(value.len() as u16);
    dst.put_slice(value.as_bytes());
}

fn get_short_string(src: &mut Bytes) -> Result<String, CitrineError> {
    let len = usize::from(get_u16(src)?);
    if src.remaining() < len {
        return Err(CitrineError::IncompleteData);
    }
    let bytes = src.split_to(len);
    String::from_utf8(bytes.to_vec())
        .map_err(|_| CitrineError::InvalidRequest("non-UTF-8 string field".to_string()))
}
