//! Per-story fresh clone from the shared mirror, and story branch creation.
//!
//! The agent work dir keeps its inode across stories (container bind mounts
//! identify it by inode), so cleanup empties the directory in place instead
//! of recreating it.

use std::collections::HashSet;
use std::path::Path;

use config::GitConfig;

use crate::git::GitRunner;
use crate::WorkspaceError;

/// Upper bound on `-2`, `-3`, … collision suffixes.
const MAX_BRANCH_ATTEMPTS: u32 = 10;

/// Empties a directory's contents without touching the directory itself.
pub fn empty_dir_contents(dir: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Builds a fresh working copy of the configured base branch in `work_dir`.
///
/// The directory is emptied (or created), seeded from the bare mirror, then
/// re-pointed at the real remote:
///
/// 1. `git init`
/// 2. fetch everything from the mirror via a temporary `mirror` remote
/// 3. `checkout -b <base> mirror/<base>`
/// 4. drop `mirror`, add `origin` = the real repo URL
/// 5. `fetch origin` and `reset --hard origin/<base>` (both non-fatal)
/// 6. set the local git identity from config with `{AGENT_ID}` substituted
pub async fn fresh_clone(
    git: &GitRunner,
    work_dir: &Path,
    mirror: &Path,
    cfg: &GitConfig,
    agent_id: &str,
) -> Result<(), WorkspaceError> {
    if work_dir.is_dir() {
        empty_dir_contents(work_dir).map_err(|e| WorkspaceError::Clone(e.to_string()))?;
    } else {
        std::fs::create_dir_all(work_dir).map_err(|e| WorkspaceError::Clone(e.to_string()))?;
    }

    let base = cfg.target_branch.as_str();
    let mirror_str = mirror.to_string_lossy().into_owned();

    git.run_quiet(work_dir, &["init"])
        .await
        .map_err(|e| WorkspaceError::Clone(e.to_string()))?;
    git.run_quiet(work_dir, &["remote", "add", "mirror", &mirror_str])
        .await
        .map_err(|e| WorkspaceError::Clone(e.to_string()))?;
    git.run_quiet(work_dir, &["fetch", "mirror", "--tags"])
        .await
        .map_err(|e| WorkspaceError::Clone(e.to_string()))?;
    git.run_quiet(
        work_dir,
        &["checkout", "-b", base, &format!("mirror/{base}")],
    )
    .await
    .map_err(|e| WorkspaceError::Clone(e.to_string()))?;
    git.run_quiet(work_dir, &["remote", "remove", "mirror"])
        .await
        .map_err(|e| WorkspaceError::Clone(e.to_string()))?;
    git.run_quiet(work_dir, &["remote", "add", "origin", &cfg.repo_url])
        .await
        .map_err(|e| WorkspaceError::Clone(e.to_string()))?;

    // Best effort: bring the tip up to date against the real remote. The
    // mirror may lag; a failure here is logged and the flow continues.
    if let Err(e) = git
        .run_with_timeout(
            work_dir,
            &["fetch", "origin"],
            std::time::Duration::from_secs(120),
            false,
        )
        .await
    {
        tracing::warn!(error = %e, "fetch origin after clone failed; continuing from mirror tip");
    } else if let Err(e) = git
        .run_quiet(work_dir, &["reset", "--hard", &format!("origin/{base}")])
        .await
    {
        tracing::warn!(error = %e, "reset to origin tip failed; continuing from mirror tip");
    }

    let user_name = config::substitute_agent_id(&cfg.git_user_name, agent_id);
    let user_email = config::substitute_agent_id(&cfg.git_user_email, agent_id);
    git.run_quiet(work_dir, &["config", "user.name", &user_name])
        .await
        .map_err(|e| WorkspaceError::Identity(e.to_string()))?;
    git.run_quiet(work_dir, &["config", "user.email", &user_email])
        .await
        .map_err(|e| WorkspaceError::Identity(e.to_string()))?;

    Ok(())
}

/// Creates a story branch whose name is unique across local branches and
/// remote heads, retrying with `-2` … `-10` suffixes on collision.
///
/// When listing branches itself fails, falls back to trial-and-error
/// `switch -c` over the same candidate sequence.
pub async fn create_story_branch(
    git: &GitRunner,
    work_dir: &Path,
    cfg: &GitConfig,
    story_id: &str,
) -> Result<String, WorkspaceError> {
    let desired = config::substitute_story_id(&cfg.branch_pattern, story_id);

    let taken = match list_taken_branches(git, work_dir).await {
        Ok(taken) => taken,
        Err(e) => {
            tracing::warn!(error = %e, "listing branches failed; falling back to trial and error");
            return create_branch_trial_and_error(git, work_dir, &desired).await;
        }
    };

    for candidate in candidates(&desired) {
        if taken.contains(&candidate) {
            continue;
        }
        git.run_quiet(work_dir, &["switch", "-c", &candidate])
            .await
            .map_err(|e| WorkspaceError::Branch(e.to_string()))?;
        tracing::info!(branch = %candidate, "created story branch");
        return Ok(candidate);
    }
    Err(WorkspaceError::Branch(format!(
        "no free branch name for {desired} after {MAX_BRANCH_ATTEMPTS} attempts"
    )))
}

fn candidates(desired: &str) -> impl Iterator<Item = String> + '_ {
    (1..=MAX_BRANCH_ATTEMPTS).map(move |n| {
        if n == 1 {
            desired.to_string()
        } else {
            format!("{desired}-{n}")
        }
    })
}

/// Union of local branch names and remote head names.
async fn list_taken_branches(
    git: &GitRunner,
    work_dir: &Path,
) -> Result<HashSet<String>, WorkspaceError> {
    let mut taken = HashSet::new();

    let local = git
        .run_quiet(work_dir, &["branch", "--format=%(refname:short)"])
        .await
        .map_err(|e| WorkspaceError::Branch(e.to_string()))?;
    taken.extend(local.lines().map(|l| l.trim().to_string()));

    let remote = git
        .run_with_timeout(
            work_dir,
            &["ls-remote", "--heads", "origin"],
            std::time::Duration::from_secs(120),
            false,
        )
        .await
        .map_err(|e| WorkspaceError::Branch(e.to_string()))?;
    for line in remote.lines() {
        if let Some(name) = line.split_whitespace().nth(1) {
            if let Some(short) = name.strip_prefix("refs/heads/") {
                taken.insert(short.to_string());
            }
        }
    }
    taken.remove("");
    Ok(taken)
}

async fn create_branch_trial_and_error(
    git: &GitRunner,
    work_dir: &Path,
    desired: &str,
) -> Result<String, WorkspaceError> {
    for candidate in candidates(desired) {
        match git.run_quiet(work_dir, &["switch", "-c", &candidate]).await {
            Ok(_) => {
                tracing::info!(branch = %candidate, "created story branch (fallback path)");
                return Ok(candidate);
            }
            Err(e) if e.output().contains("already exists") => continue,
            Err(e) => return Err(WorkspaceError::Branch(e.to_string())),
        }
    }
    Err(WorkspaceError::Branch(format!(
        "no free branch name for {desired} after {MAX_BRANCH_ATTEMPTS} attempts"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_sequence_is_plain_then_suffixed() {
        let all: Vec<String> = candidates("story-050").collect();
        assert_eq!(all.len(), 10);
        assert_eq!(all[0], "story-050");
        assert_eq!(all[1], "story-050-2");
        assert_eq!(all[9], "story-050-10");
    }

    #[test]
    fn empty_dir_contents_preserves_inode() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), "y").unwrap();

        #[cfg(unix)]
        let inode_before = {
            use std::os::unix::fs::MetadataExt;
            std::fs::metadata(dir.path()).unwrap().ino()
        };

        empty_dir_contents(dir.path()).unwrap();

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            assert_eq!(std::fs::metadata(dir.path()).unwrap().ino(), inode_before);
        }
    }
}
