//! Runs scan jobs against heterogeneous sources.
//!
//! A scan job is a small DAG of tasks over the job's sources:
//!
//! 1. One connect task per source checks which targets accept a credential.
//!    Network sources are checked through Ansible; API sources check a single server.
//! 2. One inspect task per source collects raw facts from the targets its connect task reached.
//! 3. A single fingerprint task turns every inspected group into a report and its deployments.
//!
//! [`JobExecutor`] queues jobs and runs them one at a time with [`JobRunner`],
//! which starts each task once its prerequisites are terminal. [`TaskRunner`] drives a task through
//! its statuses and records every host it handles, so that a terminal task's stats always balance.
//!
//! Cancellation is cooperative: the job's token is checked when a task starts,
//! before each batch of hosts, for every Ansible event, and for every page of API results.
//! Work already recorded when the token is observed is kept.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(clippy::unwrap_used)]

pub mod ansible;
pub mod collect;
mod deployments;
mod error;
mod http;
mod job;
mod joblog;
mod settings;
mod task;
pub mod xml;

pub use error::*;
pub use http::HttpClient;
pub use job::{JobExecutor, JobRunner};
pub use joblog::{JobLogs, Stream};
pub use settings::{Features, Settings};
pub use task::{TaskContext, TaskRunner};
