//! Floodgate - In-Process Admission Control
//!
//! This crate implements a concurrent, per-key rate limiter with
//! interchangeable token-bucket and leaky-bucket strategies. A background
//! maintenance task refills or drains every key on a fixed interval and
//! evicts keys that have been idle longer than a configured ttl.

pub mod config;
pub mod error;
pub mod ratelimit;
