//! # gateway-server
//!
//! HTTP and WebSocket front end for the gateway hub.
//!
//! - [`config`] - file and environment configuration
//! - [`handlers`] - upgrade and health routes, server startup
//! - [`metrics`] - Prometheus export of connection and hub counters

pub mod config;
pub mod handlers;
pub mod metrics;
