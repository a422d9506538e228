pub mod balance;
pub mod credential;
pub mod execution;
pub mod execution_log;
pub mod execution_phase;
pub mod user;
pub mod workflow;
pub mod workflow_version;
