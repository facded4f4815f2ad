//! HTTP API: health check, calculator and birthday registry.

pub mod birth;
pub mod calc;
pub mod server;


pub use server::{build_router, start_server, ApiError, ApiReply, AppState, Envelope};
