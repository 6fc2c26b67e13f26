//! # siptrackd
//!
//! Library side of the server binary: configuration layering and the
//! operator CLI. Everything tree- and storage-related lives in
//! `siptrack-core`.

pub mod cli;
pub mod config;
