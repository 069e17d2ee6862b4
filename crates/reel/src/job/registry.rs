use dashmap::DashMap;

use super::model::{Job, JobId};

/// Concurrent store of job records.
///
/// Every mutation goes through a single map entry, so one job's update never
/// tears another job's record.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<JobId, Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: Job) {
        self.jobs.insert(job.id, job);
    }

    /// Applies `f` to the job in place and returns the updated snapshot.
    pub fn update<F>(&self, id: &JobId, f: F) -> Option<Job>
    where
        F: FnOnce(&mut Job),
    {
        let mut entry = self.jobs.get_mut(id)?;
        f(entry.value_mut());
        Some(entry.value().clone())
    }

    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &JobId) -> Option<Job> {
        self.jobs.remove(id).map(|(_, job)| job)
    }

    /// All jobs, oldest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.iter().map(|entry| entry.value().clone()).collect();
        jobs.sort_by_key(|job| job.started_at);
        jobs
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
