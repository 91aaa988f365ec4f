use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::event::PushEvent;

/// Represents the status of a dispatch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Running,
    Success,
    Failed,
}

impl DispatchStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "running" => Some(DispatchStatus::Running),
            "success" => Some(DispatchStatus::Success),
            "failed" => Some(DispatchStatus::Failed),
            _ => None,
        }
    }
}

/// One accepted push and what became of it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRecord {
    pub id: String,
    pub owner: String,
    pub repo: String,
    pub before: String,
    pub after: String,
    pub committer: Option<String>,
    pub status: DispatchStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl DispatchRecord {
    /// Create a new record in Running status
    pub fn new(event: &PushEvent) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            owner: event.owner.clone(),
            repo: event.repo_name.clone(),
            before: event.before.clone(),
            after: event.after.clone(),
            committer: event.committer_email.clone(),
            status: DispatchStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    /// `owner/repo`
    pub fn repo_id(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    pub fn mark_success(&mut self) {
        self.status = DispatchStatus::Success;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = DispatchStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error);
    }
}

/// Most recent dispatches, oldest evicted first
pub struct DispatchHistory {
    records: VecDeque<DispatchRecord>,
    max_records: usize,
}

impl DispatchHistory {
    pub fn new(max_records: usize) -> Self {
        Self {
            records: VecDeque::new(),
            max_records,
        }
    }

    pub fn set_capacity(&mut self, max_records: usize) {
        self.max_records = max_records;
        self.evict();
    }

    pub fn add(&mut self, record: DispatchRecord) {
        self.records.push_back(record);
        self.evict();
    }

    fn evict(&mut self) {
        while self.records.len() > self.max_records {
            self.records.pop_front();
        }
    }

    /// Apply `f` to the record with `id`. Returns false if it was evicted.
    pub fn update(&mut self, id: &str, f: impl FnOnce(&mut DispatchRecord)) -> bool {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&DispatchRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Newest first, restricted to `repo` (`owner/name`) and `status` when given
    pub fn filtered(
        &self,
        repo: Option<&str>,
        status: Option<DispatchStatus>,
        limit: usize,
    ) -> Vec<DispatchRecord> {
        self.records
            .iter()
            .rev()
            .filter(|r| repo.is_none_or(|repo| r.repo_id() == repo))
            .filter(|r| status.is_none_or(|status| r.status == status))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == DispatchStatus::Running)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(repo: &str) -> PushEvent {
        PushEvent {
            owner: "acme".to_string(),
            repo_name: repo.to_string(),
            before: "1111111111111111111111111111111111111111".to_string(),
            after: "2222222222222222222222222222222222222222".to_string(),
            repository_url: format!("https://example.test/acme/{}", repo),
            compare_url: String::new(),
            committer_email: None,
            pusher_email: None,
        }
    }

    #[test]
    fn oldest_records_are_evicted() {
        let mut history = DispatchHistory::new(2);
        let first = DispatchRecord::new(&event("a"));
        let first_id = first.id.clone();
        history.add(first);
        history.add(DispatchRecord::new(&event("b")));
        history.add(DispatchRecord::new(&event("c")));

        assert_eq!(history.len(), 2);
        assert!(history.get(&first_id).is_none());
        let repos: Vec<String> = history.filtered(None, None, 10).into_iter().map(|r| r.repo).collect();
        assert_eq!(repos, vec!["c", "b"]);
    }

    #[test]
    fn update_marks_outcome() {
        let mut history = DispatchHistory::new(10);
        let record = DispatchRecord::new(&event("a"));
        let id = record.id.clone();
        history.add(record);
        assert_eq!(history.running_count(), 1);

        assert!(history.update(&id, |r| r.mark_failed("boom".to_string())));

        let record = history.get(&id).unwrap();
        assert_eq!(record.status, DispatchStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("boom"));
        assert!(record.completed_at.is_some());
        assert_eq!(
            history.filtered(None, Some(DispatchStatus::Failed), 10).len(),
            1
        );
        assert!(!history.update("unknown", |r| r.mark_success()));
    }

    #[test]
    fn filters_by_repo() {
        let mut history = DispatchHistory::new(10);
        history.add(DispatchRecord::new(&event("a")));
        history.add(DispatchRecord::new(&event("b")));
        history.add(DispatchRecord::new(&event("a")));
        assert_eq!(history.filtered(Some("acme/a"), None, 10).len(), 2);
        assert_eq!(history.filtered(Some("acme/a"), None, 1).len(), 1);
        assert!(history.filtered(Some("acme"), None, 10).is_empty());
    }

    #[test]
    fn repo_and_status_filters_combine() {
        let mut history = DispatchHistory::new(10);
        let mut ids = Vec::new();
        for repo in ["a", "b", "a"] {
            let record = DispatchRecord::new(&event(repo));
            ids.push(record.id.clone());
            history.add(record);
        }
        history.update(&ids[0], |r| r.mark_failed("boom".to_string()));
        history.update(&ids[1], |r| r.mark_failed("boom".to_string()));

        let failed_a = history.filtered(Some("acme/a"), Some(DispatchStatus::Failed), 10);
        assert_eq!(failed_a.len(), 1);
        assert_eq!(failed_a[0].id, ids[0]);
        assert!(
            history
                .filtered(Some("acme/b"), Some(DispatchStatus::Running), 10)
                .is_empty()
        );
    }

    #[test]
    fn record_keeps_owner_and_repo_apart() {
        let record = DispatchRecord::new(&event("widgets"));
        assert_eq!(record.owner, "acme");
        assert_eq!(record.repo, "widgets");
        assert_eq!(record.repo_id(), "acme/widgets");
    }

    #[test]
    fn shrinking_capacity_evicts() {
        let mut history = DispatchHistory::new(5);
        for repo in ["a", "b", "c"] {
            history.add(DispatchRecord::new(&event(repo)));
        }
        history.set_capacity(1);
        assert_eq!(history.filtered(None, None, 10)[0].repo, "c");
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn status_parsing_is_case_insensitive() {
        assert_eq!(DispatchStatus::parse("FAILED"), Some(DispatchStatus::Failed));
        assert_eq!(DispatchStatus::parse("queued"), None);
    }
}
