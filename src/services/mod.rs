pub mod image_comparator;
pub mod master_store;
pub mod project_resolver;
pub mod screenshot;
pub mod server_launcher;

pub use image_comparator::ImageComparator;
pub use master_store::{MasterStore, ReconcileOutcome};
pub use project_resolver::resolve_project_root;
pub use screenshot::{route_display_name, route_file_name, CaptureSettings, RouteCapture, ScreenshotCapturer};
pub use server_launcher::{allocate_port, LaunchSettings, RunningServer, ServerLauncher};
