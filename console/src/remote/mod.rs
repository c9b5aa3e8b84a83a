//! Remote execution: the channel abstraction, its ssh implementation, and the
//! package/service layer built on top of it

pub mod channel;
pub mod session;
pub mod ssh;
