//! Roll-up aggregation over a version's forecast cells.

use std::sync::Arc;

use super::collab::AssignmentDirectory;
use super::error::EngineError;
use super::forecast::{Forecast, ForecastStatus};
use super::store::{EngineDb, check_id, decode, version_cells_prefix};

/// Count and hour total for one status bucket.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct StatusBucket {
    pub count: usize,
    pub hours: f64,
}

impl StatusBucket {
    fn add(&mut self, hours: f64) {
        self.count += 1;
        self.hours += hours;
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct VersionSummary {
    pub total_forecasts: usize,
    pub total_hours: f64,
    pub draft: StatusBucket,
    pub submitted: StatusBucket,
    pub approved: StatusBucket,
    pub rejected: StatusBucket,
    pub locked: StatusBucket,
    pub override_count: usize,
}

pub struct SummaryAggregator {
    db: EngineDb,
    assignments: Arc<dyn AssignmentDirectory>,
}

impl SummaryAggregator {
    pub fn new(db: EngineDb, assignments: Arc<dyn AssignmentDirectory>) -> Self {
        Self { db, assignments }
    }

    /// Single pass over the version's cells, optionally narrowed to one
    /// project. Cells of other versions are never touched. The scan is not
    /// a point-in-time snapshot; concurrent writers may move hours between
    /// buckets mid-scan, which is acceptable for reporting.
    pub fn summarize(
        &self,
        tenant_id: &str,
        version_id: &str,
        project_id: Option<&str>,
    ) -> Result<VersionSummary, EngineError> {
        check_id(tenant_id, "tenant id")?;
        check_id(version_id, "version id")?;

        // structural: version must exist and belong to the caller's tenant
        self.db.load_version(tenant_id, version_id)?;

        let mut summary = VersionSummary::default();
        for item in self.db.cells.scan_prefix(version_cells_prefix(version_id)) {
            let (_, raw) = item?;
            let cell: Forecast = decode(&raw)?;

            if let Some(project) = project_id {
                match self.assignments.project_of(&cell.assignment_id) {
                    Some(owner) if owner == project => {}
                    _ => continue,
                }
            }

            summary.total_forecasts += 1;
            summary.total_hours += cell.forecasted_hours;
            if cell.is_override {
                summary.override_count += 1;
            }

            match cell.status {
                ForecastStatus::Draft => summary.draft.add(cell.forecasted_hours),
                ForecastStatus::Submitted => summary.submitted.add(cell.forecasted_hours),
                ForecastStatus::Approved => summary.approved.add(cell.forecasted_hours),
                ForecastStatus::Rejected => summary.rejected.add(cell.forecasted_hours),
                ForecastStatus::Locked => summary.locked.add(cell.forecasted_hours),
                // counted in the totals only
                ForecastStatus::Reviewed => {}
            }
        }

        Ok(summary)
    }

    /// Whether any forecast in any of the tenant's versions still references
    /// an assignment of the given project. The assignment subsystem calls
    /// this before allowing a project deletion.
    pub fn project_in_use(&self, tenant_id: &str, project_id: &str) -> Result<bool, EngineError> {
        check_id(tenant_id, "tenant id")?;
        check_id(project_id, "project id")?;

        for item in self.db.cells.iter() {
            let (_, raw) = item?;
            let cell: Forecast = decode(&raw)?;
            if cell.tenant_id != tenant_id {
                continue;
            }
            if self.assignments.project_of(&cell.assignment_id).as_deref() == Some(project_id) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
