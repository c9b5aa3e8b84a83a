//! Record and job models

pub mod fleet;
pub mod secret;
pub mod server;
