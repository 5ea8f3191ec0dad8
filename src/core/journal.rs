//! Append-only, in-memory run journal.
//!
//! The engine keeps runs in memory only; callers that want a durable record
//! can export the journal as newline-delimited JSON (JSONL) once the run is
//! over and read it back for inspection.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::domain::{EntryType, JournalEntry};

/// Journal of a single run
#[derive(Debug)]
pub struct RunJournal {
    run_id: Uuid,
    entries: Mutex<Vec<JournalEntry>>,
    sequence: AtomicU64,
}

impl RunJournal {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            entries: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Allocate the key for the next step invocation
    pub fn next_step_key(&self, step: &str) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        step_key(self.run_id, step, sequence)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<JournalEntry>> {
        // Entries are only ever pushed, so a poisoned vector is still consistent
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an entry
    pub fn append(&self, entry: JournalEntry) {
        self.lock().push(entry);
    }

    /// All entries in append order
    pub fn replay(&self) -> Vec<JournalEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Check whether the step invocation with this key has completed
    pub fn is_step_completed(&self, key: &str) -> bool {
        self.lock()
            .iter()
            .any(|e| e.key == key && e.entry_type == EntryType::StepCompleted)
    }

    /// Keys of completed step invocations, in completion order
    pub fn completed_step_keys(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|e| e.entry_type == EntryType::StepCompleted)
            .map(|e| e.key.clone())
            .collect()
    }

    /// Find entries matching a predicate
    pub fn find<F>(&self, predicate: F) -> Vec<JournalEntry>
    where
        F: Fn(&JournalEntry) -> bool,
    {
        self.lock().iter().filter(|e| predicate(e)).cloned().collect()
    }

    /// Get the last entry of a specific type
    pub fn last_of_type(&self, entry_type: EntryType) -> Option<JournalEntry> {
        self.lock()
            .iter()
            .rev()
            .find(|e| e.entry_type == entry_type)
            .cloned()
    }

    /// Serialize all entries as JSONL
    pub fn to_jsonl(&self) -> Result<String> {
        let mut out = String::new();
        for entry in self.lock().iter() {
            let json = serde_json::to_string(entry).context("Failed to serialize journal entry")?;
            out.push_str(&json);
            out.push('\n');
        }
        Ok(out)
    }

    /// Write all entries to a JSONL file, replacing it
    pub async fn write_jsonl(&self, path: &Path) -> Result<()> {
        let content = self.to_jsonl()?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut file = File::create(path)
            .await
            .with_context(|| format!("Failed to create journal file: {}", path.display()))?;
        file.write_all(content.as_bytes())
            .await
            .context("Failed to write journal")?;
        file.flush().await.context("Failed to flush journal")?;

        Ok(())
    }
}

/// Read journal entries back from a JSONL file
pub async fn read_jsonl(path: &Path) -> Result<Vec<JournalEntry>> {
    let file = File::open(path)
        .await
        .with_context(|| format!("Failed to open journal file: {}", path.display()))?;

    let reader = BufReader::new(file);
    let mut lines = reader.lines();
    let mut entries = Vec::new();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let entry: JournalEntry = serde_json::from_str(&line)
            .with_context(|| format!("Failed to parse journal entry: {}", line))?;
        entries.push(entry);
    }

    Ok(entries)
}

/// Key of one step invocation: "{run_id}:{step}:{sequence}"
pub fn step_key(run_id: Uuid, step: &str, sequence: u64) -> String {
    format!("{}:{}:{}", run_id, step, sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StepStatus;
    use tempfile::TempDir;

    fn entry(run_id: Uuid, step: &str, entry_type: EntryType, key: &str) -> JournalEntry {
        JournalEntry::new(
            run_id,
            Some(step.to_string()),
            entry_type,
            key.to_string(),
            format!("{} {:?}", step, entry_type),
            StepStatus::Running,
        )
    }

    #[test]
    fn test_append_and_replay_order() {
        let run_id = Uuid::new_v4();
        let journal = RunJournal::new(run_id);

        for i in 0..5 {
            let key = journal.next_step_key("match_skills");
            journal.append(entry(run_id, &format!("step{}", i), EntryType::StepStarted, &key));
        }

        let entries = journal.replay();
        assert_eq!(entries.len(), 5);
        for (i, e) in entries.iter().enumerate() {
            assert_eq!(e.step, Some(format!("step{}", i)));
            assert!(e.key.ends_with(&format!(":{}", i)));
        }
    }

    #[test]
    fn test_completed_step_keys() {
        let run_id = Uuid::new_v4();
        let journal = RunJournal::new(run_id);
        let key = journal.next_step_key("start");

        journal.append(entry(run_id, "start", EntryType::StepStarted, &key));
        assert!(!journal.is_step_completed(&key));

        journal.append(entry(run_id, "start", EntryType::StepCompleted, &key));
        assert!(journal.is_step_completed(&key));
        assert_eq!(journal.completed_step_keys(), vec![key]);
        assert!(journal.last_of_type(EntryType::StepCompleted).is_some());
    }

    #[test]
    fn test_step_key_format() {
        let run_id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(
            step_key(run_id, "finalize", 7),
            "550e8400-e29b-41d4-a716-446655440000:finalize:7"
        );
    }

    #[tokio::test]
    async fn test_jsonl_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("runs").join("journal.jsonl");

        let run_id = Uuid::new_v4();
        let journal = RunJournal::new(run_id);
        journal.append(entry(run_id, "start", EntryType::StepStarted, "k0"));
        journal.append(entry(run_id, "start", EntryType::StepCompleted, "k0"));

        journal.write_jsonl(&path).await.unwrap();
        let entries = read_jsonl(&path).await.unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].entry_type, EntryType::StepCompleted);
        assert!(entries.iter().all(|e| e.run_id == run_id));
    }
}
