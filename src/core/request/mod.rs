// src/core/request/mod.rs

//! The wire-serializable unit of work and its response.

pub mod operation;
pub mod request;
pub mod response;
pub mod wire;

pub use operation::{OpResult, Operation};
pub use request::{
    AuthContext, Consistency, DispatcherId, Durability, ForwardingChain, ReplicaAckPolicy,
    Request, RequestOptions, RequestTarget, SyncPolicy, TraceContext,
};
pub use response::{Failure, FailureKind, Response, ResponseBody};
pub use wire::{RequestCodec, WireCodec, WireFrame, SERIAL_VERSION, SERIAL_VERSION_MIN};
