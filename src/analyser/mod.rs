//! The core of SYN scan detection.
//! Decode TCP control flags per segment and keep a running SYN to SYN-ACK ratio per address.
pub mod containers;
pub mod core;
pub mod flags;
pub mod tracker;
pub mod utils;
