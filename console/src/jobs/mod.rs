//! Background jobs: lifecycle, progress log and the worker pool

pub mod fsm;
pub mod log;
pub mod runner;
