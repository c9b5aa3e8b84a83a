//! Background workers

pub mod collector;
