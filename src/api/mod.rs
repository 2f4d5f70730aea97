//! HTTP and WebSocket transport for the game server
//!
//! Handlers only translate between wire formats and the round scheduler;
//! all timing and settlement decisions stay in the engine.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::{create_app, ApiServer};
