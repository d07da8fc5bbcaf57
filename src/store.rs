//! Shared sled-backed data access.
//!
//! Four trees hold the engine's state:
//!
//! - `versions`:  `{tenant_id}/{version_id}` -> CBOR `ForecastVersion`
//! - `current`:   `{tenant_id}` -> `{version_id}` (the transactional
//!   tenant-to-current-version index; only ever written in the same
//!   transaction that flips `is_current` flags)
//! - `cells`:     `{version_id}/{yyyy}-{mm}/{assignment_id}` -> CBOR
//!   `Forecast` (prefix scans enumerate a version or a single month;
//!   composite uniqueness falls out of the key)
//! - `cell_ids`:  `{forecast_id}` -> cells key (write-once; coordinates
//!   never change after creation)

use std::sync::Arc;

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, IVec, Tree};

use super::error::EngineError;
use super::forecast::Forecast;
use super::version::ForecastVersion;

#[derive(Clone)]
pub struct EngineDb {
    db: Arc<Db>,
    pub(crate) versions: Tree,
    pub(crate) current: Tree,
    pub(crate) cells: Tree,
    pub(crate) cell_ids: Tree,
}

impl EngineDb {
    pub fn open(db: Arc<Db>) -> Result<Self, EngineError> {
        Ok(Self {
            versions: db.open_tree("versions")?,
            current: db.open_tree("current")?,
            cells: db.open_tree("cells")?,
            cell_ids: db.open_tree("cell_ids")?,
            db,
        })
    }

    pub fn flush(&self) -> Result<(), EngineError> {
        self.db.flush()?;
        Ok(())
    }

    pub(crate) fn load_version(
        &self,
        tenant_id: &str,
        version_id: &str,
    ) -> Result<ForecastVersion, EngineError> {
        let raw = self
            .versions
            .get(version_key(tenant_id, version_id))?
            .ok_or_else(|| EngineError::NotFound(format!("forecast version {version_id}")))?;
        decode(&raw)
    }

    pub(crate) fn save_version(&self, version: &ForecastVersion) -> Result<(), EngineError> {
        self.versions.insert(
            version_key(&version.tenant_id, &version.id),
            encode(version)?,
        )?;
        Ok(())
    }

    /// Resolve a cell by forecast id, returning its cells-tree key and the
    /// raw bytes the caller must compare-and-swap against.
    pub(crate) fn load_cell_by_id(
        &self,
        forecast_id: &str,
    ) -> Result<(IVec, IVec, Forecast), EngineError> {
        let missing = || EngineError::NotFound(format!("forecast {forecast_id}"));

        let key = self
            .cell_ids
            .get(forecast_id.as_bytes())?
            .ok_or_else(missing)?;
        let raw = self.cells.get(&key)?.ok_or_else(missing)?;
        let cell = decode(&raw)?;
        Ok((key, raw, cell))
    }

    /// Swap a cell's bytes if nobody wrote in between. `Ok(false)` means a
    /// concurrent writer won the race.
    pub(crate) fn cas_cell(
        &self,
        key: &[u8],
        old: &IVec,
        updated: &Forecast,
    ) -> Result<bool, EngineError> {
        let new_bytes = encode(updated)?;
        match self
            .cells
            .compare_and_swap(key, Some(old.as_ref()), Some(new_bytes))?
        {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}

pub(crate) fn version_key(tenant_id: &str, version_id: &str) -> Vec<u8> {
    format!("{tenant_id}/{version_id}").into_bytes()
}

pub(crate) fn tenant_versions_prefix(tenant_id: &str) -> Vec<u8> {
    format!("{tenant_id}/").into_bytes()
}

pub(crate) fn cell_key(version_id: &str, year: i32, month: u32, assignment_id: &str) -> Vec<u8> {
    format!("{version_id}/{year:04}-{month:02}/{assignment_id}").into_bytes()
}

pub(crate) fn month_prefix(version_id: &str, year: i32, month: u32) -> Vec<u8> {
    format!("{version_id}/{year:04}-{month:02}/").into_bytes()
}

pub(crate) fn version_cells_prefix(version_id: &str) -> Vec<u8> {
    format!("{version_id}/").into_bytes()
}

/// Identifiers take part in key layout, so they must be non-empty and free
/// of the key separator.
pub(crate) fn check_id(id: &str, what: &str) -> Result<(), EngineError> {
    if id.trim().is_empty() {
        return Err(EngineError::Validation(format!("{what} must not be empty")));
    }
    if id.contains('/') {
        return Err(EngineError::Validation(format!(
            "{what} must not contain '/'"
        )));
    }
    Ok(())
}

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, EngineError> {
    minicbor::to_vec(value).map_err(EngineError::from)
}

pub(crate) fn decode<T: for<'b> minicbor::Decode<'b, ()>>(bytes: &[u8]) -> Result<T, EngineError> {
    minicbor::decode(bytes).map_err(EngineError::from)
}

pub(crate) fn abort<T>(
    err: EngineError,
) -> Result<T, ConflictableTransactionError<EngineError>> {
    Err(ConflictableTransactionError::Abort(err))
}

pub(crate) fn flatten_tx<T>(res: Result<T, TransactionError<EngineError>>) -> Result<T, EngineError> {
    match res {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(err)) => Err(err),
        Err(TransactionError::Storage(err)) => Err(EngineError::Storage(err)),
    }
}
