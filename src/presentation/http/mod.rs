//! HTTP Layer
//!
//! Dashboard endpoints projecting the connection registry.

pub mod handlers;
pub mod routes;
