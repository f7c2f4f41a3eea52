//! End-to-end harness: a live signal-rs server on a scratch database,
//! driven over real HTTP. Each test binary uses a different subset.
#![allow(dead_code)]

pub mod client;
pub mod helpers;
