//! Service layer API for per-cell forecast workflow operations.
//!
//! Each single-cell operation loads the cell, applies the pure state
//! machine, and persists through a compare-and-swap with one automatic
//! retry against fresh state; a repeated race surfaces as `Conflict`.
//! `bulk_approve` is best-effort: every id is attempted independently and
//! per-id failures are reported, never thrown.

use sled::Transactional;
use tracing::{info, warn};

use super::error::EngineError;
use super::forecast::{Forecast, validate_hours};
use super::store::{
    EngineDb, abort, cell_key, check_id, decode, encode, flatten_tx, version_cells_prefix,
};
use super::utils::{self, CancelToken, cancelled};

pub struct ApprovalEngine {
    db: EngineDb,
}

#[derive(Debug)]
pub struct BulkFailure {
    pub forecast_id: String,
    pub error: EngineError,
}

/// Outcome of a best-effort batch approval.
#[derive(Debug, Default)]
pub struct BulkApproveOutcome {
    pub processed_count: usize,
    pub failures: Vec<BulkFailure>,
}

impl ApprovalEngine {
    pub fn new(db: EngineDb) -> Self {
        Self { db }
    }

    /// Materialize a cell on first edit. Coordinates must be unique within
    /// the version and fall inside its month span.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        tenant_id: &str,
        version_id: &str,
        assignment_id: &str,
        year: i32,
        month: u32,
        forecasted_hours: f64,
        notes: Option<String>,
        recommended_hours: Option<f64>,
    ) -> Result<Forecast, EngineError> {
        check_id(tenant_id, "tenant id")?;
        check_id(version_id, "version id")?;
        check_id(assignment_id, "assignment id")?;
        validate_hours(forecasted_hours)?;

        let version = self.db.load_version(tenant_id, version_id)?;
        if !version.span.contains(year, month) {
            return Err(EngineError::Validation(format!(
                "{year}-{month:02} is outside the version's month range"
            )));
        }

        let cell = Forecast::new(
            utils::new_forecast_id(),
            tenant_id.to_string(),
            version_id.to_string(),
            assignment_id.to_string(),
            year,
            month,
            forecasted_hours,
            notes,
            recommended_hours,
        )?;
        let key = cell_key(version_id, year, month, assignment_id);
        let bytes = encode(&cell)?;

        let result = (&self.db.cells, &self.db.cell_ids).transaction(|(cells, ids)| {
            if cells.get(&key)?.is_some() {
                return abort(EngineError::Validation(format!(
                    "a forecast already exists for {assignment_id} in {year}-{month:02}; edit it instead"
                )));
            }
            cells.insert(key.clone(), bytes.clone())?;
            ids.insert(cell.id.as_bytes(), key.clone())?;
            Ok(())
        });
        flatten_tx(result)?;

        info!(forecast = %cell.id, assignment = %assignment_id, year, month, "forecast cell created");
        Ok(cell)
    }

    pub fn get(&self, tenant_id: &str, forecast_id: &str) -> Result<Forecast, EngineError> {
        check_id(tenant_id, "tenant id")?;
        let (_, _, cell) = self.db.load_cell_by_id(forecast_id)?;
        if cell.tenant_id != tenant_id {
            return Err(EngineError::NotFound(format!("forecast {forecast_id}")));
        }
        Ok(cell)
    }

    /// All cells of a version in chronological key order (year, month,
    /// assignment).
    pub fn list(&self, tenant_id: &str, version_id: &str) -> Result<Vec<Forecast>, EngineError> {
        check_id(tenant_id, "tenant id")?;
        check_id(version_id, "version id")?;

        self.db.load_version(tenant_id, version_id)?;

        let mut cells = Vec::new();
        for item in self.db.cells.scan_prefix(version_cells_prefix(version_id)) {
            let (_, raw) = item?;
            cells.push(decode(&raw)?);
        }
        Ok(cells)
    }

    pub fn edit_hours(
        &self,
        tenant_id: &str,
        forecast_id: &str,
        new_hours: f64,
    ) -> Result<Forecast, EngineError> {
        let cell = self.mutate_cell(tenant_id, forecast_id, |cell| cell.edit_hours(new_hours))?;
        info!(forecast = %forecast_id, hours = new_hours, status = ?cell.status, "forecast hours edited");
        Ok(cell)
    }

    pub fn submit_one(&self, tenant_id: &str, forecast_id: &str) -> Result<Forecast, EngineError> {
        let cell = self.mutate_cell(tenant_id, forecast_id, Forecast::submit)?;
        info!(forecast = %forecast_id, "forecast submitted");
        Ok(cell)
    }

    pub fn approve_one(&self, tenant_id: &str, forecast_id: &str) -> Result<Forecast, EngineError> {
        let cell = self.mutate_cell(tenant_id, forecast_id, Forecast::approve)?;
        info!(forecast = %forecast_id, "forecast approved");
        Ok(cell)
    }

    pub fn reject_one(
        &self,
        tenant_id: &str,
        forecast_id: &str,
        reason: &str,
    ) -> Result<Forecast, EngineError> {
        let cell = self.mutate_cell(tenant_id, forecast_id, |cell| cell.reject(reason))?;
        info!(forecast = %forecast_id, reason = %reason, "forecast rejected");
        Ok(cell)
    }

    pub fn override_one(
        &self,
        tenant_id: &str,
        forecast_id: &str,
        new_hours: f64,
        reason: &str,
    ) -> Result<Forecast, EngineError> {
        let cell = self.mutate_cell(tenant_id, forecast_id, |cell| {
            cell.override_hours(new_hours, reason)
        })?;
        info!(forecast = %forecast_id, hours = new_hours, reason = %reason, "forecast overridden");
        Ok(cell)
    }

    /// Best-effort batch approval. Ids that are not in Submitted status,
    /// not found, or owned by another tenant are recorded as failures and
    /// do not abort the batch. Storage failures are structural and raise.
    pub fn bulk_approve(
        &self,
        tenant_id: &str,
        forecast_ids: &[String],
        cancel: Option<&CancelToken>,
    ) -> Result<BulkApproveOutcome, EngineError> {
        check_id(tenant_id, "tenant id")?;

        let mut outcome = BulkApproveOutcome::default();
        for forecast_id in forecast_ids {
            if cancelled(cancel) {
                break;
            }
            match self.mutate_cell(tenant_id, forecast_id, Forecast::approve) {
                Ok(_) => outcome.processed_count += 1,
                Err(
                    error @ (EngineError::Validation(_)
                    | EngineError::NotFound(_)
                    | EngineError::InvalidTransition(_)
                    | EngineError::Forbidden(_)
                    | EngineError::Conflict(_)),
                ) => outcome.failures.push(BulkFailure {
                    forecast_id: forecast_id.clone(),
                    error,
                }),
                Err(structural) => return Err(structural),
            }
        }

        info!(
            tenant = %tenant_id,
            requested = forecast_ids.len(),
            processed = outcome.processed_count,
            failed = outcome.failures.len(),
            "bulk approval finished"
        );
        Ok(outcome)
    }

    /// Read-modify-write under optimistic concurrency, retrying once with
    /// fresh state before surfacing `Conflict`.
    fn mutate_cell<F>(
        &self,
        tenant_id: &str,
        forecast_id: &str,
        op: F,
    ) -> Result<Forecast, EngineError>
    where
        F: Fn(Forecast) -> Result<Forecast, EngineError>,
    {
        check_id(tenant_id, "tenant id")?;

        for attempt in 0..2 {
            let (key, raw, cell) = self.db.load_cell_by_id(forecast_id)?;
            if cell.tenant_id != tenant_id {
                return Err(EngineError::NotFound(format!("forecast {forecast_id}")));
            }

            let updated = op(cell)?;
            if self.db.cas_cell(&key, &raw, &updated)? {
                return Ok(updated);
            }
            if attempt == 0 {
                warn!(forecast = %forecast_id, "lost concurrent update race, retrying once");
            }
        }

        Err(EngineError::Conflict(format!(
            "forecast {forecast_id} was modified concurrently"
        )))
    }
}
