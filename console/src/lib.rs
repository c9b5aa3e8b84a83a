//! clusterctl library
//!
//! Provisioning procedures for cache clusters, log shipping and directory
//! replication, the collaborators they drive, and the job runner and HTTP API
//! around them.

pub mod app;
pub mod directory;
pub mod errors;
pub mod filesys;
pub mod jobs;
pub mod logs;
pub mod models;
pub mod orchestrator;
pub mod remote;
pub mod server;
pub mod sink;
pub mod storage;
pub mod utils;
pub mod workers;
