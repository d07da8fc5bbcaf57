//! Forecast version records.
//!
//! A version is a named, time-scoped snapshot of forecast data. For a given
//! tenant at most one non-archived version is current at any time; that
//! invariant is enforced transactionally by the version manager, never by a
//! cached flag.

use chrono::Utc;

use super::error::EngineError;
use super::forecast::TimeStamp;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionType {
    #[n(0)]
    WhatIf,
    #[n(1)]
    Import,
}

/// Inclusive month range covered by a version.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthSpan {
    #[n(0)]
    pub start_year: i32,
    #[n(1)]
    pub start_month: u32,
    #[n(2)]
    pub end_year: i32,
    #[n(3)]
    pub end_month: u32,
}

impl MonthSpan {
    pub fn new(
        start_year: i32,
        start_month: u32,
        end_year: i32,
        end_month: u32,
    ) -> Result<Self, EngineError> {
        for month in [start_month, end_month] {
            if !(1..=12).contains(&month) {
                return Err(EngineError::Validation(format!(
                    "month must be between 1 and 12, got {month}"
                )));
            }
        }
        if (start_year, start_month) > (end_year, end_month) {
            return Err(EngineError::Validation(format!(
                "inverted month range: {start_year}-{start_month:02} is after {end_year}-{end_month:02}"
            )));
        }
        Ok(Self {
            start_year,
            start_month,
            end_year,
            end_month,
        })
    }

    pub fn contains(&self, year: i32, month: u32) -> bool {
        (self.start_year, self.start_month) <= (year, month)
            && (year, month) <= (self.end_year, self.end_month)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct ForecastVersion {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub tenant_id: String,
    #[n(2)]
    pub name: String,
    #[n(3)]
    pub description: Option<String>,
    #[n(4)]
    pub version_type: VersionType,
    #[n(5)]
    pub span: MonthSpan,
    #[n(6)]
    pub is_current: bool,
    #[n(7)]
    pub is_archived: bool,
    #[n(8)]
    pub archived_reason: Option<String>,
    #[n(9)]
    pub archived_at: Option<TimeStamp<Utc>>,
    #[n(10)]
    pub created_at: TimeStamp<Utc>,
}

impl ForecastVersion {
    /// New versions always start as non-current; promotion is a separate,
    /// transactional step.
    pub fn new(
        id: String,
        tenant_id: String,
        name: &str,
        description: Option<String>,
        version_type: VersionType,
        span: MonthSpan,
    ) -> Result<Self, EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::Validation(
                "version name must not be empty".into(),
            ));
        }

        Ok(Self {
            id,
            tenant_id,
            name: name.to_string(),
            description,
            version_type,
            span,
            is_current: false,
            is_archived: false,
            archived_reason: None,
            archived_at: None,
            created_at: TimeStamp::now(),
        })
    }

    pub(crate) fn mark_archived(&mut self, reason: &str) {
        self.is_current = false;
        self.is_archived = true;
        self.archived_reason = Some(reason.to_string());
        self.archived_at = Some(TimeStamp::now());
    }

    /// Promotion of an archived what-if revives it; the current version is
    /// always non-archived.
    pub(crate) fn mark_current(&mut self) {
        self.is_current = true;
        self.is_archived = false;
        self.archived_reason = None;
        self.archived_at = None;
    }
}
