//! API models shared by the clusterctl HTTP server and its clients.

pub mod models;

pub use models::*;
