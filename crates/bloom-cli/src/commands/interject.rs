//! `bloom interject <agentName> <message>`, `bloom interjections`,
//! `bloom interject resume <id>`, `bloom interject dismiss <id>` (C7).
//!
//! The CLI process and the running `bloom run` daemon are separate OS
//! processes with no IPC channel — see DESIGN.md's Open Question decisions
//! for why this command only writes a record for the daemon's work loop to
//! pick up at the top of its next step via `next_unresumed`, rather than
//! signalling the subprocess directly.

use std::path::Path;

use bloom_core::Interjection;
use bloom_queue::interjections;
use uuid::Uuid;

pub fn interject(
    workspace_dir: &Path,
    agent_name: &str,
    message: &str,
    task_id: Option<&str>,
) -> anyhow::Result<()> {
    let dir = interjections::interjections_dir(workspace_dir);
    let record = Interjection {
        id: Uuid::new_v4().to_string(),
        agent_name: agent_name.to_string(),
        message: message.to_string(),
        task_id: task_id.map(str::to_string),
        session_id: None,
        created_at: chrono::Utc::now(),
        resumed: false,
    };
    interjections::create(&dir, &record)?;
    println!("{}", record.id);
    Ok(())
}

pub fn list(workspace_dir: &Path) -> anyhow::Result<()> {
    let dir = interjections::interjections_dir(workspace_dir);
    for i in interjections::list(&dir)? {
        println!(
            "{}\t{}\t{}\t{}",
            i.id,
            i.agent_name,
            if i.resumed { "resumed" } else { "pending" },
            i.message
        );
    }
    Ok(())
}

pub fn resume(workspace_dir: &Path, id: &str) -> anyhow::Result<()> {
    let dir = interjections::interjections_dir(workspace_dir);
    interjections::mark_resumed(&dir, id)?;
    println!("interjection {id} marked resumed");
    Ok(())
}

pub fn dismiss(workspace_dir: &Path, id: &str) -> anyhow::Result<()> {
    let dir = interjections::interjections_dir(workspace_dir);
    interjections::mark_resumed(&dir, id)?;
    println!("interjection {id} dismissed");
    Ok(())
}
