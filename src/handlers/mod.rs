//! HTTP handlers: the thin boundary between the router and the stores.

pub mod admin_handlers;
pub mod auth;
pub mod file_handlers;
pub mod health_handlers;
pub mod transfer_handlers;
