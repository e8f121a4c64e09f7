//! Application Performance Management resources

pub mod aksk;
