//! HTTP transport adapter

pub mod routes;

pub use routes::{build_router, AppError};
