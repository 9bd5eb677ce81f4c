//! # pulse-server
//!
//! Hosting layer for the Pulse state engine.
//!
//! A transport embeds [`app::Application`] and forwards its connection events
//! (subscribe, publish, presence, disconnect) to it. The `pulse` binary wires
//! the same pieces together with configuration, metrics and a status
//! endpoint.
//!
//! - **config** - TOML and environment configuration
//! - **app** - Routes client events into the engine
//! - **message** - The envelope stored in history
//! - **handlers** - Engine construction, presence sweeping, `/health`
//! - **metrics** - Prometheus instrumentation

pub mod app;
pub mod config;
pub mod handlers;
pub mod message;
pub mod metrics;

pub use self::app::{AppError, Application, NamespaceOptions, Publication};
pub use self::config::Config;
pub use self::message::Message;
