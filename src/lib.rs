//! Aviator - server-authoritative crash game engine
//!
//! A single round timeline with provably fair crash points, race-free bet
//! placement and cash-out, exactly-once settlement, and an axum HTTP and
//! WebSocket transport.

pub mod api;
pub mod clock;
pub mod config;
pub mod errors;
pub mod games;
pub mod metrics;
pub mod services;

pub use config::{AviatorConfig, ConfigLoader};
pub use errors::{AviatorError, AviatorResult, GameError};
pub use services::{ServiceBuilder, ServiceContainer};
