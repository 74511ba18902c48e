pub mod manifest;
pub mod project;
pub mod report;

pub use manifest::{DependencySet, DependencyStatus, PackageManifest, PendingInstall};
pub use project::{ProjectInfo, ProjectKind};
pub use report::{
    BatchItemResult, BatchReport, BatchTimings, ComparisonResult, ItemStatus, PageReport,
    StageTimings,
};
