//! # spool-protocol
//!
//! The wire contract of the spool stack. Defines the job lifecycle
//! ([`JobStatus`]), the request/response envelopes spoken between the client
//! and the queue endpoints, and the typed [`GenerationSettings`] with the
//! override resolver that both sides of the wire agree on.
//!
//! Everything here is plain serde data; the client, worker, and queue
//! emulator all depend on this crate and nothing in it depends on them.

pub mod settings;
pub mod status;
pub mod wire;

pub use settings::{is_setting_field, resolve, GenerationSettings, SETTING_FIELDS};
pub use status::JobStatus;
pub use wire::{PollResponse, StatusResponse, StreamEntry, SubmitRequest, SubmitResponse};

/// Token ID type (i32 for FFI compat; logically non-negative).
pub type TokenId = i32;
