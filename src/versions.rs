//! Version lifecycle operations: create, clone, promote, archive, read.
//!
//! Promotion and archival run inside a single sled transaction spanning the
//! `versions` tree and the tenant-to-current index, so a reader can never
//! observe zero or two current versions for a tenant mid-flight. Versions
//! are archived, never physically deleted.

use sled::Transactional;
use sled::transaction::ConflictableTransactionError;
use tracing::info;

use super::error::EngineError;
use super::forecast::Forecast;
use super::store::{
    EngineDb, abort, cell_key, check_id, decode, encode, flatten_tx, tenant_versions_prefix,
    version_cells_prefix, version_key,
};
use super::utils;
use super::version::{ForecastVersion, MonthSpan, VersionType};

pub struct VersionManager {
    db: EngineDb,
}

impl VersionManager {
    pub fn new(db: EngineDb) -> Self {
        Self { db }
    }

    /// Create a fresh, non-current version. Promotion is a separate step.
    pub fn create(
        &self,
        tenant_id: &str,
        name: &str,
        description: Option<String>,
        version_type: VersionType,
        span: MonthSpan,
    ) -> Result<ForecastVersion, EngineError> {
        check_id(tenant_id, "tenant id")?;

        let version = ForecastVersion::new(
            utils::new_version_id(),
            tenant_id.to_string(),
            name,
            description,
            version_type,
            span,
        )?;
        self.db.save_version(&version)?;

        info!(version = %version.id, tenant = %tenant_id, name = %version.name, "forecast version created");
        Ok(version)
    }

    /// Duplicate a version under a new name, keeping the source's month
    /// span. With `copy_forecasts` every cell is duplicated with its
    /// workflow state reset to Draft; override history does not carry over.
    pub fn clone_version(
        &self,
        tenant_id: &str,
        source_id: &str,
        new_name: &str,
        new_type: VersionType,
        copy_forecasts: bool,
    ) -> Result<ForecastVersion, EngineError> {
        check_id(tenant_id, "tenant id")?;
        check_id(source_id, "version id")?;

        let source = self.db.load_version(tenant_id, source_id)?;
        let new_version = ForecastVersion::new(
            utils::new_version_id(),
            tenant_id.to_string(),
            new_name,
            source.description.clone(),
            new_type,
            source.span,
        )?;

        let mut copied = 0usize;
        if copy_forecasts {
            let mut cells = sled::Batch::default();
            let mut ids = sled::Batch::default();
            for item in self.db.cells.scan_prefix(version_cells_prefix(source_id)) {
                let (_, raw) = item?;
                let cell: Forecast = decode(&raw)?;
                let duplicate = cell.clone_into(utils::new_forecast_id(), new_version.id.clone())?;
                let key = cell_key(
                    &new_version.id,
                    duplicate.year,
                    duplicate.month,
                    &duplicate.assignment_id,
                );
                ids.insert(duplicate.id.as_bytes(), key.clone());
                cells.insert(key, encode(&duplicate)?);
                copied += 1;
            }
            // cells land before the version record so a half-finished clone
            // never shows up in version listings
            self.db.cells.apply_batch(cells)?;
            self.db.cell_ids.apply_batch(ids)?;
        }

        self.db.save_version(&new_version)?;

        info!(version = %new_version.id, source = %source_id, copied, "forecast version cloned");
        Ok(new_version)
    }

    /// Make the target the tenant's single current version, archiving the
    /// previous current one in the same transaction. Idempotent when the
    /// target is already current.
    pub fn promote(&self, tenant_id: &str, version_id: &str) -> Result<ForecastVersion, EngineError> {
        check_id(tenant_id, "tenant id")?;
        check_id(version_id, "version id")?;

        let result = (&self.db.versions, &self.db.current).transaction(|(versions, current)| {
            let target_key = version_key(tenant_id, version_id);
            let raw = match versions.get(&target_key)? {
                Some(raw) => raw,
                None => {
                    return abort(EngineError::NotFound(format!(
                        "forecast version {version_id}"
                    )));
                }
            };
            let mut target: ForecastVersion =
                decode(&raw).map_err(ConflictableTransactionError::Abort)?;

            if target.is_current && !target.is_archived {
                return Ok(target);
            }

            if let Some(current_id) = current.get(tenant_id.as_bytes())? {
                let current_id = String::from_utf8_lossy(&current_id).into_owned();
                if current_id != version_id {
                    let old_key = version_key(tenant_id, &current_id);
                    if let Some(old_raw) = versions.get(&old_key)? {
                        let mut old: ForecastVersion =
                            decode(&old_raw).map_err(ConflictableTransactionError::Abort)?;
                        old.mark_archived("superseded by promotion");
                        versions.insert(
                            old_key,
                            encode(&old).map_err(ConflictableTransactionError::Abort)?,
                        )?;
                    }
                }
            }

            target.mark_current();
            versions.insert(
                target_key,
                encode(&target).map_err(ConflictableTransactionError::Abort)?,
            )?;
            current.insert(tenant_id.as_bytes(), version_id.as_bytes())?;
            Ok(target)
        });

        let promoted = flatten_tx(result)?;
        info!(version = %promoted.id, tenant = %tenant_id, "forecast version promoted to current");
        Ok(promoted)
    }

    /// Archive a version. If it was current the tenant is left without a
    /// current version; no replacement is auto-selected. Idempotent on an
    /// already-archived version.
    pub fn archive(
        &self,
        tenant_id: &str,
        version_id: &str,
        reason: Option<&str>,
    ) -> Result<ForecastVersion, EngineError> {
        check_id(tenant_id, "tenant id")?;
        check_id(version_id, "version id")?;

        let reason = reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .unwrap_or("manually archived")
            .to_string();

        let result = (&self.db.versions, &self.db.current).transaction(|(versions, current)| {
            let key = version_key(tenant_id, version_id);
            let raw = match versions.get(&key)? {
                Some(raw) => raw,
                None => {
                    return abort(EngineError::NotFound(format!(
                        "forecast version {version_id}"
                    )));
                }
            };
            let mut version: ForecastVersion =
                decode(&raw).map_err(ConflictableTransactionError::Abort)?;

            if version.is_archived {
                return Ok(version);
            }

            let was_current = version.is_current;
            version.mark_archived(&reason);
            versions.insert(
                key,
                encode(&version).map_err(ConflictableTransactionError::Abort)?,
            )?;
            if was_current {
                current.remove(tenant_id.as_bytes())?;
            }
            Ok(version)
        });

        let archived = flatten_tx(result)?;
        info!(version = %archived.id, tenant = %tenant_id, reason = %reason, "forecast version archived");
        Ok(archived)
    }

    /// The tenant's current version, or NotFound when none exists. Callers
    /// must handle the no-current case (e.g. right after archiving).
    pub fn get_current(&self, tenant_id: &str) -> Result<ForecastVersion, EngineError> {
        check_id(tenant_id, "tenant id")?;

        let no_current =
            || EngineError::NotFound(format!("no current forecast version for tenant {tenant_id}"));

        let current_id = self
            .db
            .current
            .get(tenant_id.as_bytes())?
            .ok_or_else(no_current)?;
        let current_id = String::from_utf8_lossy(&current_id).into_owned();

        let version = self.db.load_version(tenant_id, &current_id)?;
        if !version.is_current || version.is_archived {
            return Err(no_current());
        }
        Ok(version)
    }

    pub fn get(&self, tenant_id: &str, version_id: &str) -> Result<ForecastVersion, EngineError> {
        check_id(tenant_id, "tenant id")?;
        check_id(version_id, "version id")?;
        self.db.load_version(tenant_id, version_id)
    }

    /// All of a tenant's versions, current first, then newest.
    pub fn list(
        &self,
        tenant_id: &str,
        include_archived: bool,
    ) -> Result<Vec<ForecastVersion>, EngineError> {
        check_id(tenant_id, "tenant id")?;

        let mut versions = Vec::new();
        for item in self.db.versions.scan_prefix(tenant_versions_prefix(tenant_id)) {
            let (_, raw) = item?;
            let version: ForecastVersion = decode(&raw)?;
            if include_archived || !version.is_archived {
                versions.push(version);
            }
        }
        versions.sort_by(|a, b| {
            b.is_current
                .cmp(&a.is_current)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(versions)
    }
}
