#![forbid(unsafe_code)]

pub mod api;
pub mod changelog;
pub mod cli;
pub mod config;
pub mod expansion;
pub mod logging;
pub mod model;
pub mod outline;
pub mod sse;
pub mod store;
pub mod structure;
