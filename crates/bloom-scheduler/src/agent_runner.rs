//! Bridges the Git Pipeline's narrow [`bloom_git::AgentRunner`] seam onto
//! the Session Manager, so `bloom-git` never depends on `bloom-session`
//! directly (see bloom-git's own module docs).

use async_trait::async_trait;
use bloom_core::{CliType, Task};
use bloom_git::AgentRunner;
use bloom_session::SessionManager;
use std::path::PathBuf;
use std::sync::Arc;

pub struct SchedulerAgentRunner {
    pub session: Arc<SessionManager>,
    pub cli_type: CliType,
    pub working_dir: PathBuf,
}

#[async_trait]
impl AgentRunner for SchedulerAgentRunner {
    async fn resume_for_commit(&self, task: &Task, attempt: u32) -> Result<(), String> {
        let prompt = format!(
            "You have uncommitted changes after completing \"{}\". Please commit them with a \
             descriptive message before continuing. (attempt {attempt})",
            task.title
        );
        self.run(task, &prompt).await
    }

    async fn resume_for_conflict(
        &self,
        task: &Task,
        conflicted_files: &[String],
        attempt: u32,
    ) -> Result<(), String> {
        let prompt = format!(
            "Merging \"{}\" produced conflicts in: {}. Resolve them and commit the result. \
             (attempt {attempt})",
            task.title,
            conflicted_files.join(", ")
        );
        self.run(task, &prompt).await
    }
}

impl SchedulerAgentRunner {
    async fn run(&self, task: &Task, prompt: &str) -> Result<(), String> {
        let agent_name = task.agent_name.clone().unwrap_or_default();
        self.session
            .run(
                &agent_name,
                &task.id,
                &self.working_dir,
                self.cli_type,
                "",
                prompt,
                task.session_id.clone(),
                |_event| {},
            )
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
