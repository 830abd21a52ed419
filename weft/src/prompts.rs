//! Prompt templates for each phase.
//!
//! Rendering is a capability ([`PromptRenderer`]) so deployments can swap
//! template engines; the shipped [`TemplateSet`] holds embedded templates
//! with literal placeholder substitution.

use std::collections::HashMap;

/// Template names used by the orchestrator.
pub mod names {
    pub const PLANNING_SYSTEM: &str = "planning_system";
    pub const PLANNING_TASK: &str = "planning_task";
    pub const TODO_SYSTEM: &str = "todo_system";
    pub const TODO_TASK: &str = "todo_task";
    pub const CODING_SYSTEM: &str = "coding_system";
    pub const CODING_TASK: &str = "coding_task";
    pub const MERGE_CONFLICT_GUIDANCE: &str = "merge_conflict_guidance";
}

/// Renders a named template with `{PLACEHOLDER}` variables.
pub trait PromptRenderer: Send + Sync {
    fn render(&self, name: &str, vars: &HashMap<&str, String>) -> String;
}

const PLANNING_SYSTEM: &str = "You are a software engineering agent planning one story. \
Explore the repository with the available tools, then call submit_plan exactly once \
with your implementation plan, confidence, exploration summary and risks.";

const PLANNING_TASK: &str = "Story {STORY_ID} ({STORY_TYPE}):\n\n{TASK_CONTENT}\n\n\
Produce an implementation plan for this story.";

const TODO_SYSTEM: &str = "Break the approved plan into an ordered todo list. \
Call todos_add exactly once with the full list.";

const TODO_TASK: &str = "Approved plan:\n\n{PLAN}\n\nRecord the todo list now.";

const CODING_SYSTEM: &str = "You are a software engineering agent implementing one story. \
Work through the todo list with the available tools. Ask a question only when blocked. \
Call done when the implementation is complete and committed.";

const CODING_TASK: &str = "Story {STORY_ID}:\n\n{TASK_CONTENT}\n\nPlan:\n{PLAN}\n\n\
Todos:\n{TODO_LIST}\n\nImplement the story.";

const MERGE_CONFLICT_GUIDANCE: &str = "The merge pipeline hit a {KIND} while preparing the \
pull request (attempt {ATTEMPT} of {MAX_ATTEMPTS}).\n\nConflicting files:\n{CONFLICT_FILES}\n\n\
git status:\n{GIT_STATUS}\n\nResolve the conflicts in the working tree, stage the files, then \
run `git rebase --continue`. Call done when the branch is clean again.";

/// Embedded template set.
#[derive(Default)]
pub struct TemplateSet;

impl TemplateSet {
    pub fn new() -> Self {
        Self
    }

    fn template(name: &str) -> &'static str {
        match name {
            names::PLANNING_SYSTEM => PLANNING_SYSTEM,
            names::PLANNING_TASK => PLANNING_TASK,
            names::TODO_SYSTEM => TODO_SYSTEM,
            names::TODO_TASK => TODO_TASK,
            names::CODING_SYSTEM => CODING_SYSTEM,
            names::CODING_TASK => CODING_TASK,
            names::MERGE_CONFLICT_GUIDANCE => MERGE_CONFLICT_GUIDANCE,
            _ => "",
        }
    }
}

impl PromptRenderer for TemplateSet {
    fn render(&self, name: &str, vars: &HashMap<&str, String>) -> String {
        let mut out = Self::template(name).to_string();
        for (key, value) in vars {
            out = out.replace(&format!("{{{key}}}"), value);
        }
        out
    }
}
