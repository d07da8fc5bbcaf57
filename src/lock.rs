//! Month-wide administrative locking.
//!
//! Locking a month is a hard cutoff, not a workflow step: every cell in the
//! selected scope is locked regardless of its current status, Draft rows
//! included. The operation is idempotent — re-running with the same
//! arguments converges to `locked_count = 0` without touching already-locked
//! rows — and carries no rollback; an interrupted run simply locks fewer
//! cells until the next invocation.

use std::sync::Arc;

use tracing::{info, warn};

use super::collab::AssignmentDirectory;
use super::error::EngineError;
use super::forecast::{Forecast, ForecastStatus};
use super::store::{EngineDb, check_id, decode, month_prefix};
use super::utils::{CancelToken, cancelled};

pub struct LockEngine {
    db: EngineDb,
    assignments: Arc<dyn AssignmentDirectory>,
}

#[derive(Debug)]
pub struct LockOutcome {
    pub year: i32,
    pub month: u32,
    /// Cells in scope, including ones that were already locked.
    pub matched_count: usize,
    /// Cells actually transitioned by this invocation.
    pub locked_count: usize,
}

impl LockEngine {
    pub fn new(db: EngineDb, assignments: Arc<dyn AssignmentDirectory>) -> Self {
        Self { db, assignments }
    }

    /// Lock every forecast in the given version and month, optionally
    /// narrowed to one project via the assignment directory. Cells that do
    /// not exist are not materialized; locking freezes what has been
    /// edited, nothing more.
    pub fn lock_month(
        &self,
        tenant_id: &str,
        version_id: &str,
        year: i32,
        month: u32,
        project_id: Option<&str>,
        cancel: Option<&CancelToken>,
    ) -> Result<LockOutcome, EngineError> {
        check_id(tenant_id, "tenant id")?;
        check_id(version_id, "version id")?;
        if !(1..=12).contains(&month) {
            return Err(EngineError::Validation(format!(
                "month must be between 1 and 12, got {month}"
            )));
        }

        // structural: version must exist and belong to the caller's tenant
        self.db.load_version(tenant_id, version_id)?;

        let mut outcome = LockOutcome {
            year,
            month,
            matched_count: 0,
            locked_count: 0,
        };

        for item in self.db.cells.scan_prefix(month_prefix(version_id, year, month)) {
            if cancelled(cancel) {
                break;
            }

            let (key, raw) = item?;
            let cell: Forecast = decode(&raw)?;

            if let Some(project) = project_id {
                match self.assignments.project_of(&cell.assignment_id) {
                    Some(owner) if owner == project => {}
                    _ => continue,
                }
            }

            outcome.matched_count += 1;
            if cell.status == ForecastStatus::Locked {
                continue;
            }

            let forecast_id = cell.id.clone();
            if self.db.cas_cell(&key, &raw, &cell.lock())? {
                outcome.locked_count += 1;
                continue;
            }

            // lost a race; retry once against fresh state, then leave the
            // cell for the next invocation (re-running converges)
            if let Some(fresh_raw) = self.db.cells.get(&key)? {
                let fresh: Forecast = decode(&fresh_raw)?;
                if fresh.status == ForecastStatus::Locked {
                    continue;
                }
                if self.db.cas_cell(&key, &fresh_raw, &fresh.lock())? {
                    outcome.locked_count += 1;
                } else {
                    warn!(forecast = %forecast_id, "cell kept changing during lock-month, skipping");
                }
            }
        }

        info!(
            tenant = %tenant_id,
            version = %version_id,
            year,
            month,
            matched = outcome.matched_count,
            locked = outcome.locked_count,
            "month locked"
        );
        Ok(outcome)
    }
}
