//! Side-effecting collaborators: configuration files, site discovery, git,
//! the review service and the supervised worker process.

pub mod config;
pub mod discovery;
pub mod git;
pub mod review;
pub mod supervisor;
