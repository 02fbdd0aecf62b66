pub mod hash;
pub mod processed;
pub mod uploads;

pub use processed::ProcessedFilesTracker;
pub use uploads::UploadHistory;
