//! Build service capability: runs the project's test suite for TESTING and
//! the post-rebase re-check. The implementation (container build, CI hook)
//! lives outside this crate.

use std::path::Path;

use async_trait::async_trait;

/// Outcome of one test run.
#[derive(Clone, Debug)]
pub struct BuildReport {
    pub passed: bool,
    /// Combined build/test output, fed back to the coder on failure.
    pub output: String,
}

#[async_trait]
pub trait BuildService: Send + Sync {
    /// Runs the story's test suite in the given working copy.
    async fn run_tests(&self, work_dir: &Path) -> Result<BuildReport, String>;
}
