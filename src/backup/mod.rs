pub mod archive;
pub mod db_dump;
mod logic;
pub mod retention;

pub use logic::{BackupExecutor, backup_timestamp};
pub use retention::{SweepReport, sweep};
