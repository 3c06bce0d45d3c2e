//! Deploy client library
//!
//! Configuration, server API client and command implementations behind the
//! `deploy-cli` binary.

pub mod client;
pub mod commands;
pub mod config;
pub mod progress;
