//! The pieces behind the `quipucords` command line.
//!
//! A command line run is a single [`instance::Instance`]: an in-memory store and job executor
//! configured from [`config::Pipeline`], loaded from an [`inventory::Inventory`] or from uploaded details reports,
//! and discarded when the command exits. Logging is configured by [`trace::TracingConfig`].

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod instance;
pub mod inventory;
pub mod trace;
