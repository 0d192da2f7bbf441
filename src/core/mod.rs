pub mod classifier;
pub mod drives;
pub mod error;
pub mod exporter;
pub mod filter;
pub mod models;
pub mod scanner;

pub use classifier::{classify, Classification};
pub use drives::list_drives;
pub use error::{ExportError, ScanError};
pub use exporter::{ExportConfig, ExportTask, Exporter};
pub use filter::{filter, filter_files};
pub use models::*;
pub use scanner::{ExcludeRules, FileScanner, ScanConfig};
