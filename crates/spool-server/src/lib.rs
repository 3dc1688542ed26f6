//! # spool-server
//!
//! In-process emulation of the hosted serverless queue API.
//!
//! Exposes the same endpoint family the hosted queue offers (`/run`,
//! `/stream/{id}`, `/status/{id}`, `/cancel/{id}`, `/health`) backed by a
//! single worker loop running jobs through [`spool_worker`]. Used for
//! local development and as the server half of the client's integration
//! tests.

pub mod error;
pub mod handlers;
pub mod runner;
pub mod server;
pub mod state;

pub use error::ServerError;
pub use runner::run_jobs;
pub use server::{create_router, run_server, serve};
pub use state::AppState;

/// Convenience result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
