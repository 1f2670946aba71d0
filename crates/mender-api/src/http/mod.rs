//! HTTP/REST API layer for Mender.
//!
//! Axum-based API exposing workflow create/list/get/cancel plus engine stats
//! and a health check. Success bodies are the plain resource JSON; failures
//! use the `{"errors": [...]}` shape from [`error::AppError`].

pub mod error;
pub mod handlers;
pub mod router;
