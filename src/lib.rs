//! course-pilot: concurrent study engine for remote course platforms.

pub mod bootstrap;
pub mod cancel;
pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod progress;
pub mod study;
