//! Integration tests against the real git CLI: mirror provisioning, fresh
//! clones, story branch collision retry, inode-stable cleanup.

use std::path::{Path, PathBuf};

use config::GitConfig;
use weft_workspace::{GitRunner, WorkspaceManager};

async fn git(dir: &Path, args: &[&str]) -> String {
    GitRunner::new().run_quiet(dir, args).await.unwrap()
}

/// Creates an "upstream" repo with one commit on `main`, returned as a
/// file:// URL usable as both clone source and push target.
async fn make_upstream(root: &Path) -> (PathBuf, String) {
    let upstream = root.join("upstream.git");
    std::fs::create_dir_all(&upstream).unwrap();
    git(&upstream, &["init", "--bare", "-b", "main"]).await;

    let seed = root.join("seed");
    std::fs::create_dir_all(&seed).unwrap();
    git(&seed, &["init", "-b", "main"]).await;
    git(&seed, &["config", "user.name", "seed"]).await;
    git(&seed, &["config", "user.email", "seed@test"]).await;
    std::fs::write(seed.join("README.md"), "# seed\n").unwrap();
    git(&seed, &["add", "."]).await;
    git(&seed, &["commit", "-m", "initial"]).await;
    let url = format!("file://{}", upstream.display());
    git(&seed, &["push", &url, "main:main"]).await;

    (upstream, url)
}

fn git_cfg(url: &str) -> GitConfig {
    GitConfig {
        repo_url: url.to_string(),
        target_branch: "main".to_string(),
        mirror_dir: ".mirrors".to_string(),
        branch_pattern: "story-{STORY_ID}".to_string(),
        git_user_name: "weft-{AGENT_ID}".to_string(),
        git_user_email: "weft-{AGENT_ID}@test".to_string(),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn setup_workspace_creates_clone_and_story_branch() {
    let root = tempfile::tempdir().unwrap();
    let (_upstream, url) = make_upstream(root.path()).await;

    let mgr = WorkspaceManager::new(root.path(), git_cfg(&url));
    let work = root.path().join("agents/a1");
    let setup = mgr.setup_workspace("a1", "050", &work).await.unwrap();

    assert_eq!(setup.branch_name, "story-050");
    assert!(work.join("README.md").is_file());

    // origin points at the upstream, not the mirror.
    let remotes = git(&work, &["remote", "get-url", "origin"]).await;
    assert!(remotes.trim().ends_with("upstream.git"));

    // The story branch is checked out.
    let head = git(&work, &["rev-parse", "--abbrev-ref", "HEAD"]).await;
    assert_eq!(head.trim(), "story-050");

    // Identity was substituted.
    let name = git(&work, &["config", "user.name"]).await;
    assert_eq!(name.trim(), "weft-a1");
}

#[tokio::test(flavor = "multi_thread")]
async fn branch_collision_takes_next_free_suffix() {
    let root = tempfile::tempdir().unwrap();
    let (upstream, url) = make_upstream(root.path()).await;

    // Occupy story-050 and story-050-2 on the remote.
    let seed = root.path().join("seed");
    git(&seed, &["push", &url, "main:story-050"]).await;
    git(&seed, &["push", &url, "main:story-050-2"]).await;
    let heads = git(&upstream, &["branch"]).await;
    assert!(heads.contains("story-050-2"));

    let mgr = WorkspaceManager::new(root.path(), git_cfg(&url));
    let work = root.path().join("agents/a1");
    let setup = mgr.setup_workspace("a1", "050", &work).await.unwrap();
    assert_eq!(setup.branch_name, "story-050-3");
}

#[tokio::test(flavor = "multi_thread")]
async fn second_story_reuses_work_dir_inode_with_fresh_contents() {
    let root = tempfile::tempdir().unwrap();
    let (_upstream, url) = make_upstream(root.path()).await;

    let mgr = WorkspaceManager::new(root.path(), git_cfg(&url));
    let work = root.path().join("agents/a1");
    mgr.setup_workspace("a1", "050", &work).await.unwrap();

    // Leave debris from the first story.
    std::fs::write(work.join("scratch.txt"), "leftover").unwrap();

    #[cfg(unix)]
    let inode_before = {
        use std::os::unix::fs::MetadataExt;
        std::fs::metadata(&work).unwrap().ino()
    };

    mgr.cleanup_workspace("a1", "050", &work).await.unwrap();
    assert_eq!(std::fs::read_dir(&work).unwrap().count(), 0);

    let setup = mgr.setup_workspace("a1", "051", &work).await.unwrap();
    assert_eq!(setup.branch_name, "story-051");
    assert!(!work.join("scratch.txt").exists());
    assert!(work.join("README.md").is_file());

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        assert_eq!(std::fs::metadata(&work).unwrap().ino(), inode_before);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn mirror_is_shared_between_agents() {
    let root = tempfile::tempdir().unwrap();
    let (_upstream, url) = make_upstream(root.path()).await;

    let mgr = WorkspaceManager::new(root.path(), git_cfg(&url));
    mgr.setup_workspace("a1", "050", &root.path().join("agents/a1"))
        .await
        .unwrap();
    mgr.setup_workspace("a2", "051", &root.path().join("agents/a2"))
        .await
        .unwrap();

    let mirrors: Vec<_> = std::fs::read_dir(root.path().join(".mirrors"))
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(mirrors, vec![std::ffi::OsString::from("upstream.git")]);
}
