//! Interjection records (C7): one JSON file per interjection under
//! `<workspace>/.interjections/<id>.json`. Created by the CLI (`bloom
//! interject`) once the Session Manager confirms the subprocess was
//! stopped; consumed by the Scheduler to fold the message into the next
//! prompt it builds for the same task.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bloom_core::Interjection;
use tracing::info;

use crate::error::QueueError;

pub fn interjections_dir(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join(".interjections")
}

fn record_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.json"))
}

pub fn list(dir: &Path) -> Result<Vec<Interjection>, QueueError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        out.push(read(&path)?);
    }
    out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(out)
}

pub fn get(dir: &Path, id: &str) -> Result<Interjection, QueueError> {
    let path = record_path(dir, id);
    if !path.exists() {
        return Err(QueueError::NotFound(id.to_string()));
    }
    read(&path)
}

fn read(path: &Path) -> Result<Interjection, QueueError> {
    let text = fs::read_to_string(path).map_err(|source| QueueError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| QueueError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub fn create(dir: &Path, interjection: &Interjection) -> Result<(), QueueError> {
    fs::create_dir_all(dir)?;
    write(&record_path(dir, &interjection.id), interjection)?;
    info!(id = %interjection.id, agent = %interjection.agent_name, "interjection recorded");
    Ok(())
}

fn write(path: &Path, interjection: &Interjection) -> Result<(), QueueError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);

    let json = serde_json::to_string_pretty(interjection).map_err(|source| QueueError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    {
        let mut file = fs::File::create(&tmp_path).map_err(|source| QueueError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        file.write_all(json.as_bytes()).map_err(|source| QueueError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        file.sync_all().map_err(|source| QueueError::Io {
            path: tmp_path.clone(),
            source,
        })?;
    }
    fs::rename(&tmp_path, path).map_err(|source| QueueError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

pub fn mark_resumed(dir: &Path, id: &str) -> Result<Interjection, QueueError> {
    let mut interjection = get(dir, id)?;
    interjection.resumed = true;
    write(&record_path(dir, id), &interjection)?;
    Ok(interjection)
}

/// The oldest un-resumed interjection addressed to `agent_name`, optionally
/// narrowed to a specific task. The Scheduler calls this at the top of each
/// step to decide whether to fold a pending message into the next prompt.
pub fn next_unresumed(
    dir: &Path,
    agent_name: &str,
    task_id: Option<&str>,
) -> Result<Option<Interjection>, QueueError> {
    let mut matching: Vec<Interjection> = list(dir)?
        .into_iter()
        .filter(|i| !i.resumed && i.agent_name == agent_name)
        .filter(|i| task_id.map(|t| i.task_id.as_deref() == Some(t)).unwrap_or(true))
        .collect();
    matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(matching.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn interjection(id: &str, agent: &str, task_id: Option<&str>) -> Interjection {
        Interjection {
            id: id.to_string(),
            agent_name: agent.to_string(),
            message: "use tabs".into(),
            task_id: task_id.map(str::to_string),
            session_id: Some("sess-1".into()),
            created_at: Utc::now(),
            resumed: false,
        }
    }

    #[test]
    fn mark_resumed_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let base = interjections_dir(dir.path());
        create(&base, &interjection("i1", "frontend", Some("t1"))).unwrap();

        let resumed = mark_resumed(&base, "i1").unwrap();
        assert!(resumed.resumed);
        assert!(get(&base, "i1").unwrap().resumed);
    }

    #[test]
    fn next_unresumed_filters_by_agent_and_task() {
        let dir = tempfile::tempdir().unwrap();
        let base = interjections_dir(dir.path());
        create(&base, &interjection("i1", "frontend", Some("t1"))).unwrap();
        create(&base, &interjection("i2", "backend", Some("t1"))).unwrap();

        let picked = next_unresumed(&base, "frontend", Some("t1")).unwrap().unwrap();
        assert_eq!(picked.id, "i1");
        assert!(next_unresumed(&base, "frontend", Some("t2")).unwrap().is_none());
    }
}
