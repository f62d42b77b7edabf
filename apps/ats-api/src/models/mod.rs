pub mod candidate;
pub mod ranking_job;
