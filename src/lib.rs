//! Task tracking for long-running operations.
//!
//! A [`tasks::TaskJob`] wraps one unit of work, creates a registry-visible
//! [`tasks::TaskRecord`] for it, publishes progress while it runs and records
//! a [`status::Status`] as its terminal result. Clients poll the registry.

pub mod config;
pub mod error;
pub mod status;
pub mod tasks;
