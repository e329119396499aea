//! Scheduled database backups and restores driven by the native dump tools.

pub mod backup;
pub mod config;
pub mod errors;
pub mod restore;
pub mod scheduler;
pub mod utils;
