//! Math aliases and logging setup used by every other module

pub mod math;
pub mod logging;
