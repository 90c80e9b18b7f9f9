//! Bounded work queue feeding the detection workers.

pub mod admission;
pub mod breaker;
pub mod codec;
pub mod payload;

pub use admission::QueueAdmissionClient;
pub use breaker::{CircuitBreaker, CircuitState};
pub use codec::{COMPRESSION_MARKER, decode_payload, encode_payload};
pub use payload::{QueueAdmissionResult, QueuePayload};
