//! Core engine for the storefront bot: ingests Telegram updates from two long-poll
//! channels, parses the command grammar and applies shop mutations.
//!
//! The crate is framework-agnostic. The Bot API lives behind ports (traits)
//! implemented in adapter crates.

pub mod activity;
pub mod catalog;
pub mod chat;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod display;
pub mod domain;
pub mod errors;
pub mod fetcher;
pub mod logging;
pub mod poller;
pub mod ports;
pub mod service;
pub mod shop;
pub mod storage;

pub use errors::{Error, Result};
