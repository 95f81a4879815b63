//! Business logic services.

pub mod submission;
pub mod sweeper;

pub use submission::{JobStatus, SubmissionError, SubmissionResult, SubmissionService};
pub use sweeper::{JobSweeper, SweepConfig, SweepReport};
