//! CLI command modules.

pub mod bans;
pub mod http;
pub mod peers;
pub mod stats;
pub mod status;
