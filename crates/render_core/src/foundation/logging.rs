//! Logging utilities and structured logging support

pub use log::{debug, info, warn, error, trace};

/// Initialize the logging system
pub fn init() {
    env_logger::init();
}

/// Initialize the logging system, ignoring repeated initialization
///
/// Tests and tools call this freely; only the first call installs the logger.
pub fn try_init() {
    let _ = env_logger::builder().is_test(cfg!(test)).try_init();
}
