//! Workspace manager: per-agent clone lifecycle over the shared mirror.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use config::GitConfig;

use crate::clone;
use crate::git::GitRunner;
use crate::mirror::MirrorManager;
use crate::WorkspaceError;

/// Result of a successful workspace setup.
#[derive(Clone, Debug)]
pub struct WorkspaceSetup {
    pub work_dir: PathBuf,
    /// Story branch checked out in the work dir; unique across local
    /// branches and remote heads at creation time.
    pub branch_name: String,
}

/// Container runtime capability used during agent teardown.
///
/// The runtime itself (docker, podman, …) lives outside this crate; tests
/// use a recording double.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn stop_container(&self, name: &str) -> Result<(), String>;
    async fn shutdown(&self) -> Result<(), String>;
}

/// Provisions and tears down per-agent working copies.
pub struct WorkspaceManager {
    git: GitRunner,
    mirror: MirrorManager,
    project_work_dir: PathBuf,
    git_cfg: GitConfig,
}

impl WorkspaceManager {
    pub fn new(project_work_dir: impl Into<PathBuf>, git_cfg: GitConfig) -> Self {
        let git = GitRunner::new();
        Self {
            git,
            mirror: MirrorManager::new(git),
            project_work_dir: project_work_dir.into(),
            git_cfg,
        }
    }

    /// Guarantees a fresh working copy of the base branch in
    /// `agent_work_dir`, with `origin` pointing at the configured remote and
    /// a newly created story branch checked out.
    ///
    /// Mirror failures are fatal; see [`clone::fresh_clone`] for which later
    /// steps degrade to warnings.
    pub async fn setup_workspace(
        &self,
        agent_id: &str,
        story_id: &str,
        agent_work_dir: &Path,
    ) -> Result<WorkspaceSetup, WorkspaceError> {
        tracing::info!(agent_id, story_id, work_dir = %agent_work_dir.display(), "workspace setup");
        let mirror = self
            .mirror
            .ensure_fresh(
                &self.project_work_dir,
                &self.git_cfg.mirror_dir,
                &self.git_cfg.repo_url,
            )
            .await?;
        clone::fresh_clone(&self.git, agent_work_dir, &mirror, &self.git_cfg, agent_id).await?;
        let branch_name =
            clone::create_story_branch(&self.git, agent_work_dir, &self.git_cfg, story_id).await?;
        Ok(WorkspaceSetup {
            work_dir: agent_work_dir.to_path_buf(),
            branch_name,
        })
    }

    /// Empties the work dir while preserving its inode, so an existing
    /// container bind mount stays valid. Never removes the directory.
    pub async fn cleanup_workspace(
        &self,
        agent_id: &str,
        story_id: &str,
        agent_work_dir: &Path,
    ) -> Result<(), WorkspaceError> {
        tracing::info!(agent_id, story_id, work_dir = %agent_work_dir.display(), "workspace cleanup");
        if !agent_work_dir.is_dir() {
            return Ok(());
        }
        clone::empty_dir_contents(agent_work_dir)
            .map_err(|e| WorkspaceError::Cleanup(e.to_string()))
    }

    /// Full agent teardown: stop the container, empty the work dir, remove
    /// the state dir, shut the runtime down. Errors accumulate; the combined
    /// error is returned after every step ran.
    pub async fn cleanup_agent_resources(
        &self,
        agent_id: &str,
        container_name: &str,
        agent_work_dir: &Path,
        state_dir: &Path,
        runtime: &dyn ContainerRuntime,
    ) -> Result<(), WorkspaceError> {
        let mut failures: Vec<String> = Vec::new();

        if let Err(e) = runtime.stop_container(container_name).await {
            failures.push(format!("stop container {container_name}: {e}"));
        }
        if agent_work_dir.is_dir() {
            if let Err(e) = clone::empty_dir_contents(agent_work_dir) {
                failures.push(format!("empty work dir: {e}"));
            }
        }
        if state_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(state_dir) {
                failures.push(format!("remove state dir: {e}"));
            }
        }
        if let Err(e) = runtime.shutdown().await {
            failures.push(format!("runtime shutdown: {e}"));
        }

        if failures.is_empty() {
            tracing::info!(agent_id, "agent resources cleaned up");
            Ok(())
        } else {
            Err(WorkspaceError::Cleanup(failures.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct RecordingRuntime {
        stopped: AtomicBool,
        shut_down: AtomicBool,
        fail_stop: bool,
    }

    impl RecordingRuntime {
        fn new(fail_stop: bool) -> Self {
            Self {
                stopped: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
                fail_stop,
            }
        }
    }

    #[async_trait]
    impl ContainerRuntime for RecordingRuntime {
        async fn stop_container(&self, _name: &str) -> Result<(), String> {
            self.stopped.store(true, Ordering::SeqCst);
            if self.fail_stop {
                Err("no such container".into())
            } else {
                Ok(())
            }
        }

        async fn shutdown(&self) -> Result<(), String> {
            self.shut_down.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manager(root: &Path) -> WorkspaceManager {
        WorkspaceManager::new(root, GitConfig::default())
    }

    #[tokio::test]
    async fn cleanup_agent_resources_runs_all_steps_and_combines_errors() {
        let root = tempfile::tempdir().unwrap();
        let work = root.path().join("work");
        let state = root.path().join("state");
        std::fs::create_dir_all(&work).unwrap();
        std::fs::write(work.join("f"), "x").unwrap();
        std::fs::create_dir_all(&state).unwrap();

        let rt = RecordingRuntime::new(true);
        let err = manager(root.path())
            .cleanup_agent_resources("a1", "c1", &work, &state, &rt)
            .await
            .unwrap_err();

        // The stop failure is reported, but later steps still ran.
        assert!(err.to_string().contains("no such container"));
        assert!(rt.shut_down.load(Ordering::SeqCst));
        assert_eq!(std::fs::read_dir(&work).unwrap().count(), 0);
        assert!(!state.exists());
    }

    #[tokio::test]
    async fn cleanup_agent_resources_ok_when_all_steps_pass() {
        let root = tempfile::tempdir().unwrap();
        let work = root.path().join("work");
        std::fs::create_dir_all(&work).unwrap();

        let rt = RecordingRuntime::new(false);
        manager(root.path())
            .cleanup_agent_resources("a1", "c1", &work, &root.path().join("missing-state"), &rt)
            .await
            .unwrap();
        assert!(rt.stopped.load(Ordering::SeqCst));
        assert!(rt.shut_down.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cleanup_workspace_on_missing_dir_is_noop() {
        let root = tempfile::tempdir().unwrap();
        manager(root.path())
            .cleanup_workspace("a1", "s1", &root.path().join("never-created"))
            .await
            .unwrap();
    }
}
