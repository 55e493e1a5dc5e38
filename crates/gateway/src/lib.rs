//! The relay gateway process: wires the Connection Manager (C3), Cross-
//! Instance Router (C4), Web Client Hub (C6), and Event Pipe (C7) together
//! behind an axum HTTP/WS surface (§6.5).

pub mod connection;
pub mod error;
pub mod http;
pub mod server;
pub mod state;
pub mod web_clients;
pub mod ws_agent;
pub mod ws_web;

pub use server::{build_app, claim_slot, run};
pub use state::GatewayState;
