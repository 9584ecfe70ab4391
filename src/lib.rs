//! WiFi clock for ESP32: joins a network, syncs time over SNTP, shows
//! `HH:MM` on a TM1637 display and serves a small echo page.
//!
//! Everything except the ESP-IDF bindings builds and tests on the host.

pub mod clock;
pub mod config;
pub mod console;
pub mod debug_flags;
pub mod display;
pub mod echo;
pub mod error;
pub mod retry;
pub mod time_sync;
pub mod tm1637;
pub mod wifi;

#[cfg(target_os = "espidf")]
pub mod power;
#[cfg(target_os = "espidf")]
pub mod sntp;
#[cfg(target_os = "espidf")]
pub mod station;
#[cfg(target_os = "espidf")]
pub mod web;

pub use error::{ClockError, Result};
