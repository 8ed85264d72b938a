//! In-memory staging store and job queue for tests
//!
//! Mirrors the observable behaviour of `PgStore`: same resolution rules,
//! same claim predicate, same lease-token checks. A single mutex stands in
//! for row locks.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use super::store::{JobQueue, StagedUpload, StagingStore};
use crate::types::{
    BatchSummary, BranchUploadConfig, Classifier, DateSpan, JobStatus, MappingErrorReason,
    MappingLookup, NewStagedRow, ProcessingJob, ReasonCount, UploadBatch, YesNo,
};

/// The four independently mapped dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Branch,
    Salesman,
    Customer,
    Product,
}

/// One row of a `mapping_*` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub distributor_code: String,
    pub internal_code: String,
    /// Distributor branch the entry is restricted to; `None` applies everywhere
    pub branch_scope: Option<String>,
}

impl MappingEntry {
    pub fn new(distributor_code: &str, internal_code: &str) -> Self {
        Self {
            distributor_code: distributor_code.to_string(),
            internal_code: internal_code.to_string(),
            branch_scope: None,
        }
    }

    pub fn scoped(mut self, branch: &str) -> Self {
        self.branch_scope = Some(branch.to_string());
        self
    }

    /// Whether this entry resolves `code` for a row carrying `row_branch`
    pub fn matches(&self, code: Option<&str>, row_branch: Option<&str>) -> bool {
        let Some(code) = code else {
            return false;
        };
        if self.distributor_code != code {
            return false;
        }
        match &self.branch_scope {
            None => true,
            Some(scope) => row_branch == Some(scope.as_str()),
        }
    }
}

/// A row of `sellout_temp`
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRow {
    pub id: i64,
    pub row: NewStagedRow,
}

impl StagedRow {
    pub fn is_moved(&self) -> bool {
        self.row.flag_move == YesNo::Y
    }
}

/// Fact row as recorded by the memory store
#[derive(Debug, Clone, PartialEq)]
pub struct FactRecord {
    pub upload_batch_id: Uuid,
    pub sellout_temp_id: i64,
    pub branch_code: String,
    pub salesman_code: String,
    pub custcode_prc: String,
    pub custcode_dist: Option<String>,
    pub pcode: String,
    pub qty3: Option<f64>,
    pub grossamount: f64,
    pub createby: String,
}

/// Error row as recorded by the memory store
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub upload_batch_id: Uuid,
    pub sellout_temp_id: i64,
    pub status: MappingErrorReason,
    pub modified_by: String,
}

#[derive(Default)]
struct State {
    configs: Vec<BranchUploadConfig>,
    mappings: HashMap<Dimension, Vec<MappingEntry>>,
    branches: HashSet<String>,
    customers: HashSet<String>,
    product_groups: HashSet<String>,
    batches: Vec<UploadBatch>,
    staged: Vec<StagedRow>,
    facts: Vec<FactRecord>,
    errors: Vec<ErrorRecord>,
    jobs: Vec<ProcessingJob>,
    next_row_id: i64,
    next_job_id: i64,
    failing_moves: bool,
}

/// Codes a row resolves to, per dimension
struct Resolution {
    branch: Option<String>,
    salesman: Option<String>,
    customer: Option<String>,
    product: Option<String>,
}

impl State {
    /// Scoped entries win over global ones, then insertion order
    fn lookup(&self, dimension: Dimension, code: Option<&str>, row_branch: Option<&str>) -> Option<String> {
        self.mappings
            .get(&dimension)?
            .iter()
            .filter(|e| e.matches(code, row_branch))
            .min_by_key(|e| e.branch_scope.is_none())
            .map(|e| e.internal_code.clone())
    }

    fn resolve(&self, row: &NewStagedRow) -> Resolution {
        let branch = row.kodebranch.as_deref();
        Resolution {
            branch: self.lookup(Dimension::Branch, branch, None),
            salesman: self.lookup(Dimension::Salesman, row.id_salesman.as_deref(), branch),
            customer: self.lookup(Dimension::Customer, row.id_customer.as_deref(), branch),
            product: self.lookup(Dimension::Product, row.id_product.as_deref(), branch),
        }
    }

    fn mapping_lookup(&self, resolution: &Resolution) -> MappingLookup {
        let in_set = |set: &HashSet<String>, code: &Option<String>| {
            code.as_ref().is_some_and(|c| set.contains(c))
        };
        MappingLookup {
            branch_mapped: resolution.branch.is_some(),
            salesman_mapped: resolution.salesman.is_some(),
            customer_mapped: resolution.customer.is_some(),
            product_mapped: resolution.product.is_some(),
            customer_in_master: in_set(&self.customers, &resolution.customer),
            product_in_group: in_set(&self.product_groups, &resolution.product),
            branch_in_master: in_set(&self.branches, &resolution.branch),
        }
    }

    fn unmoved(&self, upload_batch_id: Uuid) -> Vec<usize> {
        let mut idx: Vec<usize> = self
            .staged
            .iter()
            .enumerate()
            .filter(|(_, r)| r.row.upload_batch_id == upload_batch_id && !r.is_moved())
            .map(|(i, _)| i)
            .collect();
        idx.sort_by_key(|&i| self.staged[i].id);
        idx
    }

    fn batch_branch(&self, upload_batch_id: Uuid) -> Option<&str> {
        self.batches
            .iter()
            .find(|b| b.id == upload_batch_id)
            .map(|b| b.branch.as_str())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_config(&self, config: BranchUploadConfig) {
        self.state.lock().configs.push(config);
    }

    pub fn map(&self, dimension: Dimension, entry: MappingEntry) {
        self.state.lock().mappings.entry(dimension).or_default().push(entry);
    }

    pub fn add_branch(&self, kodebranch: &str) {
        self.state.lock().branches.insert(kodebranch.to_string());
    }

    pub fn add_customer(&self, custno: &str) {
        self.state.lock().customers.insert(custno.to_string());
    }

    pub fn add_product_group(&self, pcode: &str) {
        self.state.lock().product_groups.insert(pcode.to_string());
    }

    /// Make every following `move_resolvable` call fail
    pub fn fail_moves(&self, failing: bool) {
        self.state.lock().failing_moves = failing;
    }

    /// Push a job's lease into the past
    pub fn backdate_job(&self, job_id: i64, by: chrono::Duration) {
        let mut state = self.state.lock();
        if let Some(job) = state.jobs.iter_mut().find(|j| j.id == job_id) {
            job.started_at = job.started_at.map(|t| t - by);
        }
    }

    pub fn job(&self, job_id: i64) -> Option<ProcessingJob> {
        self.state.lock().jobs.iter().find(|j| j.id == job_id).cloned()
    }

    pub fn staged_rows(&self, upload_batch_id: Uuid) -> Vec<StagedRow> {
        self.state
            .lock()
            .staged
            .iter()
            .filter(|r| r.row.upload_batch_id == upload_batch_id)
            .cloned()
            .collect()
    }

    pub fn all_staged_rows(&self) -> Vec<StagedRow> {
        self.state.lock().staged.clone()
    }

    pub fn facts(&self, upload_batch_id: Uuid) -> Vec<FactRecord> {
        self.state
            .lock()
            .facts
            .iter()
            .filter(|f| f.upload_batch_id == upload_batch_id)
            .cloned()
            .collect()
    }

    pub fn errors(&self, upload_batch_id: Uuid) -> Vec<ErrorRecord> {
        self.state
            .lock()
            .errors
            .iter()
            .filter(|e| e.upload_batch_id == upload_batch_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StagingStore for MemoryStore {
    async fn branch_config(&self, branch: &str) -> Result<Option<BranchUploadConfig>> {
        Ok(self
            .state
            .lock()
            .configs
            .iter()
            .filter(|c| c.branch == branch)
            .max_by_key(|c| c.id)
            .cloned())
    }

    async fn stage_upload(
        &self,
        batch: &UploadBatch,
        rows: &[NewStagedRow],
        span: DateSpan,
    ) -> Result<StagedUpload> {
        let mut state = self.state.lock();

        let replaced: HashSet<Uuid> = state
            .batches
            .iter()
            .filter(|b| b.branch == batch.branch)
            .map(|b| b.id)
            .collect();
        let before = state.staged.len();
        state.staged.retain(|r| {
            !(replaced.contains(&r.row.upload_batch_id)
                && r.row.invoice_date.is_some_and(|d| span.contains(d)))
        });
        let deleted_rows = (before - state.staged.len()) as u64;

        state.batches.push(batch.clone());
        for row in rows {
            state.next_row_id += 1;
            let id = state.next_row_id;
            state.staged.push(StagedRow { id, row: row.clone() });
        }

        state.next_job_id += 1;
        let job_id = state.next_job_id;
        state
            .jobs
            .push(ProcessingJob::pending(job_id, batch.id, Utc::now()));

        Ok(StagedUpload { deleted_rows, job_id })
    }

    async fn move_resolvable(&self, upload_batch_id: Uuid, limit: i64, actor: &str) -> Result<u64> {
        let mut state = self.state.lock();
        if state.failing_moves {
            bail!("connection reset while moving batch {}", upload_batch_id);
        }

        let mut claimed = Vec::new();
        for i in state.unmoved(upload_batch_id) {
            if claimed.len() as i64 >= limit {
                break;
            }
            let resolution = state.resolve(&state.staged[i].row);
            if state.mapping_lookup(&resolution).is_resolvable() {
                claimed.push((i, resolution));
            }
        }

        for (i, resolution) in &claimed {
            let staged = &state.staged[*i];
            let fact = FactRecord {
                upload_batch_id,
                sellout_temp_id: staged.id,
                branch_code: resolution.branch.clone().unwrap_or_default(),
                salesman_code: resolution.salesman.clone().unwrap_or_default(),
                custcode_prc: resolution.customer.clone().unwrap_or_default(),
                custcode_dist: staged.row.id_customer.clone(),
                pcode: resolution.product.clone().unwrap_or_default(),
                qty3: staged.row.qty3,
                grossamount: staged.row.grossamount,
                createby: actor.to_string(),
            };
            state.facts.push(fact);
            state.staged[*i].row.flag_move = YesNo::Y;
        }

        Ok(claimed.len() as u64)
    }

    async fn drain_unresolved(
        &self,
        upload_batch_id: Uuid,
        limit: i64,
        classify: Classifier,
        actor: &str,
    ) -> Result<Vec<MappingErrorReason>> {
        let mut state = self.state.lock();

        let mut reasons = Vec::new();
        for i in state.unmoved(upload_batch_id).into_iter().take(limit.max(0) as usize) {
            let resolution = state.resolve(&state.staged[i].row);
            let reason = classify(&state.mapping_lookup(&resolution));
            let error = ErrorRecord {
                upload_batch_id,
                sellout_temp_id: state.staged[i].id,
                status: reason,
                modified_by: actor.to_string(),
            };
            state.errors.push(error);
            state.staged[i].row.flag_move = YesNo::Y;
            reasons.push(reason);
        }

        Ok(reasons)
    }

    async fn batch_summary(&self, upload_batch_id: Uuid) -> Result<Option<BatchSummary>> {
        let state = self.state.lock();
        if state.batch_branch(upload_batch_id).is_none() {
            return Ok(None);
        }

        let staged: Vec<&StagedRow> = state
            .staged
            .iter()
            .filter(|r| r.row.upload_batch_id == upload_batch_id)
            .collect();
        let errors: Vec<&ErrorRecord> = state
            .errors
            .iter()
            .filter(|e| e.upload_batch_id == upload_batch_id)
            .collect();

        let mut counts: HashMap<MappingErrorReason, i64> = HashMap::new();
        for e in &errors {
            *counts.entry(e.status).or_default() += 1;
        }
        let mut errors_by_reason: Vec<ReasonCount> = counts
            .into_iter()
            .map(|(status, count)| ReasonCount { status, count })
            .collect();
        errors_by_reason.sort_by_key(|r| r.status);

        let job_status = state
            .jobs
            .iter()
            .filter(|j| j.upload_batch_id == upload_batch_id)
            .max_by_key(|j| (j.created_at, j.id))
            .map(|j| j.status);

        Ok(Some(BatchSummary {
            upload_batch_id,
            job_status,
            staged_rows: staged.len() as i64,
            pending_rows: staged.iter().filter(|r| !r.is_moved()).count() as i64,
            fact_rows: state
                .facts
                .iter()
                .filter(|f| f.upload_batch_id == upload_batch_id)
                .count() as i64,
            error_rows: errors.len() as i64,
            errors_by_reason,
        }))
    }
}

#[async_trait]
impl JobQueue for MemoryStore {
    async fn claim_next(&self, lease_timeout: Duration) -> Result<Option<ProcessingJob>> {
        let mut state = self.state.lock();
        let now = Utc::now();
        let lease = chrono::Duration::from_std(lease_timeout)?;

        let next = state
            .jobs
            .iter_mut()
            .filter(|j| j.is_claimable(now, lease))
            .min_by_key(|j| (j.created_at, j.id));

        Ok(next.map(|job| {
            job.status = JobStatus::Processing;
            job.started_at = Some(now);
            job.attempts += 1;
            job.clone()
        }))
    }

    async fn mark_done(&self, job: &ProcessingJob) -> Result<bool> {
        self.finish(job, JobStatus::Done, None)
    }

    async fn mark_failed(&self, job: &ProcessingJob, error: &str) -> Result<bool> {
        self.finish(job, JobStatus::Failed, Some(error))
    }

    async fn retry_failed(&self, job_id: i64) -> Result<Option<ProcessingJob>> {
        let mut state = self.state.lock();
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id && j.status == JobStatus::Failed);

        Ok(job.map(|job| {
            job.status = JobStatus::Pending;
            job.started_at = None;
            job.finished_at = None;
            job.error_message = None;
            job.clone()
        }))
    }

    async fn find_by_batch(&self, upload_batch_id: Uuid) -> Result<Option<ProcessingJob>> {
        Ok(self
            .state
            .lock()
            .jobs
            .iter()
            .filter(|j| j.upload_batch_id == upload_batch_id)
            .max_by_key(|j| (j.created_at, j.id))
            .cloned())
    }
}

impl MemoryStore {
    fn finish(&self, job: &ProcessingJob, status: JobStatus, error: Option<&str>) -> Result<bool> {
        let mut state = self.state.lock();
        let owned = state.jobs.iter_mut().find(|j| {
            j.id == job.id && j.status == JobStatus::Processing && j.started_at == job.started_at
        });

        Ok(match owned {
            Some(j) => {
                j.status = status;
                j.finished_at = Some(Utc::now());
                j.error_message = error.map(str::to_string);
                true
            }
            None => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_entry_scope() {
        let global = MappingEntry::new("S1", "SLS-001");
        let scoped = MappingEntry::new("S1", "SLS-002").scoped("B01");

        assert!(global.matches(Some("S1"), Some("B99")));
        assert!(scoped.matches(Some("S1"), Some("B01")));
        assert!(!scoped.matches(Some("S1"), Some("B02")));
        assert!(!global.matches(None, Some("B01")));
        assert!(!global.matches(Some("S2"), Some("B01")));
    }

    #[test]
    fn test_scoped_entry_wins_over_global() {
        let store = MemoryStore::new();
        store.map(Dimension::Salesman, MappingEntry::new("S1", "SLS-GLOBAL"));
        store.map(Dimension::Salesman, MappingEntry::new("S1", "SLS-B01").scoped("B01"));

        let state = store.state.lock();
        assert_eq!(
            state.lookup(Dimension::Salesman, Some("S1"), Some("B01")).as_deref(),
            Some("SLS-B01")
        );
        assert_eq!(
            state.lookup(Dimension::Salesman, Some("S1"), Some("B02")).as_deref(),
            Some("SLS-GLOBAL")
        );
    }
}
