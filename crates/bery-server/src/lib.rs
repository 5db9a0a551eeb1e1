//! # bery-server
//!
//! Realtime chat relay for the Bery storefront and wallet apps.
//!
//! - **Connection registry** binding WebSocket connections to logical user ids
//! - **Message router** for direct messages, typing hints and delivery receipts
//! - **Assistant** answering messages sent to the reserved `bery-ai` identity
//! - **HTTP API** (axum) for health checks and instance info
//! - **Per-IP rate limiting** on every request, including WebSocket upgrades

pub mod api;
pub mod assistant;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod status;
pub mod ws;
