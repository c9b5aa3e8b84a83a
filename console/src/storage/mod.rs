//! Durable configuration and on-disk layout

pub mod layout;
pub mod settings;
pub mod store;
