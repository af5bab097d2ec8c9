//! In-process job registry. One lock guards the whole map; it is never held
//! across an await point.

use super::ExportError;
use crate::model::{ExportJob, ExportOptions, ExportProgress};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<String, ExportJob>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ExportJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new `Queued` job unless the owner already has one queued or
    /// running. The scan and the insert happen under the same lock.
    pub fn try_register(&self, options: ExportOptions) -> Result<ExportJob, ExportError> {
        let mut jobs = self.lock();
        if let Some(active) = jobs
            .values()
            .find(|j| j.options.owner == options.owner && j.progress.status.is_active())
        {
            return Err(ExportError::Conflict {
                owner: options.owner.clone(),
                job_id: active.id.clone(),
            });
        }
        let job = ExportJob {
            id: Uuid::new_v4().to_string(),
            options,
            created_at: Utc::now(),
            completed_at: None,
            progress: ExportProgress::default(),
            export_dir: None,
        };
        jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    pub fn get(&self, job_id: &str) -> Option<ExportJob> {
        self.lock().get(job_id).cloned()
    }

    /// Apply `f` to the job; returns false when the id is unknown.
    pub fn update<F>(&self, job_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut ExportJob),
    {
        match self.lock().get_mut(job_id) {
            Some(job) => {
                f(job);
                true
            }
            None => false,
        }
    }

    /// Every job the owner has submitted since startup, newest first.
    pub fn jobs_for_owner(&self, owner: &str) -> Vec<ExportJob> {
        let mut jobs: Vec<_> = self
            .lock()
            .values()
            .filter(|j| j.options.owner == owner)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }
}
