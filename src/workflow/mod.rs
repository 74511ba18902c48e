pub mod project_flow;
pub mod run_ctx;

pub use project_flow::{overall_score, ProjectFlow, SolutionRun};
pub use run_ctx::{generate_run_id, label_from_file_name, Role, RunContext, SubmissionCtx};
