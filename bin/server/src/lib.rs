//! Taskloom server.
//!
//! This crate provides:
//!
//! - **Configuration**: environment-driven settings for every component
//! - **State**: bootstrap wiring of the engine, trigger managers and queues
//! - **WebSocket**: interactive runs and trigger registration over `/ws`
//! - **Routes**: webhook and Telegram intake, schedules, events and health
//! - **Collaborators**: HTTP forwarding to a workflow evaluator and tool bridge

pub mod app;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod inbound;
pub mod routes;
pub mod state;
pub mod ws;
