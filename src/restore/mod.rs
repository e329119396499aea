pub mod db_restore;
mod logic;
pub mod sql_import;

pub use db_restore::RestoreOutcome;
pub use logic::{RestoreExecutor, RestoreReport, select_extracted_entry};
pub use sql_import::ImportReport;
