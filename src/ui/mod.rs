pub mod icons;
pub mod output;
pub mod progress;
pub mod progress_message;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{dim, header, info, reference, section, status, success, summary_row, task_failed};
pub use progress::{ProgressManager, Spinner};
pub use progress_message::{ProgressMessage, ProgressPhase};
pub use table::{references_table, stats_table, TableBuilder};
pub use theme::{theme, Theme};
