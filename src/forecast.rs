//! Core forecast cell record and its status state machine.
//!
//! A `Forecast` is one assignment's forecasted hours for one calendar month
//! within one version. Transitions are pure: each consumes the record and
//! returns the updated record or a typed error, with no I/O. Persistence and
//! concurrency control live in the service layer.

use chrono::{DateTime, TimeZone, Utc};

use super::error::EngineError;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn now() -> Self {
        Self(Utc::now())
    }
    pub fn from_ymd_hms(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForecastStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    Submitted,
    #[n(2)]
    Reviewed,
    #[n(3)]
    Approved,
    #[n(4)]
    Rejected,
    #[n(5)]
    Locked,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    #[n(0)]
    Created,
    #[n(1)]
    HoursUpdated,
    #[n(2)]
    Submitted,
    #[n(3)]
    Approved,
    #[n(4)]
    Rejected,
    #[n(5)]
    Overridden,
    #[n(6)]
    Locked,
}

/// One entry in a cell's append-only change history.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    #[n(0)]
    pub at: TimeStamp<Utc>,
    #[n(1)]
    pub kind: ChangeKind,
    #[n(2)]
    pub old_hours: Option<f64>,
    #[n(3)]
    pub new_hours: Option<f64>,
    #[n(4)]
    pub old_status: Option<ForecastStatus>,
    #[n(5)]
    pub new_status: ForecastStatus,
    #[n(6)]
    pub reason: Option<String>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct Forecast {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub tenant_id: String,
    #[n(2)]
    pub version_id: String,
    #[n(3)]
    pub assignment_id: String,
    #[n(4)]
    pub year: i32,
    #[n(5)]
    pub month: u32,
    #[n(6)]
    pub forecasted_hours: f64,
    // captured once, on the first override only
    #[n(7)]
    pub original_forecasted_hours: Option<f64>,
    // advisory, supplied by the host
    #[n(8)]
    pub recommended_hours: Option<f64>,
    #[n(9)]
    pub status: ForecastStatus,
    #[n(10)]
    pub is_override: bool,
    #[n(11)]
    pub override_reason: Option<String>,
    #[n(12)]
    pub rejection_reason: Option<String>,
    #[n(13)]
    pub notes: Option<String>,
    // optimistic-concurrency token, bumped on every successful write
    #[n(14)]
    pub revision: u64,
    #[n(15)]
    pub created_at: TimeStamp<Utc>,
    #[n(16)]
    pub updated_at: TimeStamp<Utc>,
    #[n(17)]
    pub history: Vec<ChangeRecord>,
}

pub(crate) fn validate_hours(hours: f64) -> Result<(), EngineError> {
    if !hours.is_finite() || hours < 0.0 {
        return Err(EngineError::Validation(format!(
            "forecasted hours must be a finite non-negative number, got {hours}"
        )));
    }
    Ok(())
}

fn require_reason(reason: &str, action: &str) -> Result<(), EngineError> {
    if reason.trim().is_empty() {
        return Err(EngineError::Validation(format!(
            "a reason is required to {action} a forecast"
        )));
    }
    Ok(())
}

impl Forecast {
    /// Materialize a new Draft cell. Cells exist only from first edit.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        tenant_id: String,
        version_id: String,
        assignment_id: String,
        year: i32,
        month: u32,
        forecasted_hours: f64,
        notes: Option<String>,
        recommended_hours: Option<f64>,
    ) -> Result<Self, EngineError> {
        validate_hours(forecasted_hours)?;

        let now = TimeStamp::now();
        Ok(Self {
            id,
            tenant_id,
            version_id,
            assignment_id,
            year,
            month,
            forecasted_hours,
            original_forecasted_hours: None,
            recommended_hours,
            status: ForecastStatus::Draft,
            is_override: false,
            override_reason: None,
            rejection_reason: None,
            notes,
            revision: 0,
            created_at: now.clone(),
            updated_at: now.clone(),
            history: vec![ChangeRecord {
                at: now,
                kind: ChangeKind::Created,
                old_hours: None,
                new_hours: Some(forecasted_hours),
                old_status: None,
                new_status: ForecastStatus::Draft,
                reason: None,
            }],
        })
    }

    /// Duplicate this cell into another version: current hours carry over,
    /// workflow state does not. Override history never crosses a clone.
    pub fn clone_into(&self, new_id: String, target_version_id: String) -> Result<Self, EngineError> {
        Self::new(
            new_id,
            self.tenant_id.clone(),
            target_version_id,
            self.assignment_id.clone(),
            self.year,
            self.month,
            self.forecasted_hours,
            self.notes.clone(),
            self.recommended_hours,
        )
    }

    fn forbid_locked(&self, action: &str) -> Result<(), EngineError> {
        if self.status == ForecastStatus::Locked {
            return Err(EngineError::Forbidden(format!(
                "forecast {} is locked and cannot be {action}",
                self.id
            )));
        }
        Ok(())
    }

    fn touch(&mut self) -> TimeStamp<Utc> {
        self.revision += 1;
        self.updated_at = TimeStamp::now();
        self.updated_at.clone()
    }

    fn record(
        &mut self,
        at: TimeStamp<Utc>,
        kind: ChangeKind,
        old_hours: Option<f64>,
        old_status: ForecastStatus,
        reason: Option<String>,
    ) {
        self.history.push(ChangeRecord {
            at,
            kind,
            old_hours,
            new_hours: old_hours.map(|_| self.forecasted_hours),
            old_status: Some(old_status),
            new_status: self.status,
            reason,
        });
    }

    /// Draft -> Submitted.
    pub fn submit(mut self) -> Result<Self, EngineError> {
        self.forbid_locked("submitted")?;

        if self.status != ForecastStatus::Draft {
            return Err(EngineError::InvalidTransition(format!(
                "only Draft forecasts can be submitted, found {:?}",
                self.status
            )));
        }

        let old = self.status;
        self.status = ForecastStatus::Submitted;
        let at = self.touch();
        self.record(at, ChangeKind::Submitted, None, old, None);
        Ok(self)
    }

    /// Submitted -> Approved. Clears any lingering rejection reason.
    pub fn approve(mut self) -> Result<Self, EngineError> {
        self.forbid_locked("approved")?;

        if self.status != ForecastStatus::Submitted {
            return Err(EngineError::InvalidTransition(format!(
                "only Submitted forecasts can be approved, found {:?}",
                self.status
            )));
        }

        let old = self.status;
        self.status = ForecastStatus::Approved;
        self.rejection_reason = None;
        let at = self.touch();
        self.record(at, ChangeKind::Approved, None, old, None);
        Ok(self)
    }

    /// Submitted -> Rejected, with a mandatory reason.
    pub fn reject(mut self, reason: &str) -> Result<Self, EngineError> {
        self.forbid_locked("rejected")?;
        require_reason(reason, "reject")?;

        if self.status != ForecastStatus::Submitted {
            return Err(EngineError::InvalidTransition(format!(
                "only Submitted forecasts can be rejected, found {:?}",
                self.status
            )));
        }

        let old = self.status;
        self.status = ForecastStatus::Rejected;
        self.rejection_reason = Some(reason.trim().to_string());
        let at = self.touch();
        self.record(at, ChangeKind::Rejected, None, old, Some(reason.trim().to_string()));
        Ok(self)
    }

    /// Out-of-band hour change on a Submitted or Approved forecast. Status
    /// is unchanged; the pre-override value is captured once, on the first
    /// override only.
    pub fn override_hours(mut self, new_hours: f64, reason: &str) -> Result<Self, EngineError> {
        self.forbid_locked("overridden")?;
        validate_hours(new_hours)?;
        require_reason(reason, "override")?;

        match self.status {
            ForecastStatus::Submitted | ForecastStatus::Approved => {}
            other => {
                return Err(EngineError::InvalidTransition(format!(
                    "only Submitted or Approved forecasts can be overridden, found {other:?}"
                )));
            }
        }

        let old_hours = self.forecasted_hours;
        if !self.is_override {
            self.original_forecasted_hours = Some(old_hours);
        }
        self.is_override = true;
        self.override_reason = Some(reason.trim().to_string());
        self.forecasted_hours = new_hours;

        let old = self.status;
        let at = self.touch();
        self.record(
            at,
            ChangeKind::Overridden,
            Some(old_hours),
            old,
            Some(reason.trim().to_string()),
        );
        Ok(self)
    }

    /// Administrative cutoff: locks from any status, bypassing workflow
    /// preconditions. Idempotent on an already-locked forecast.
    pub fn lock(mut self) -> Self {
        if self.status == ForecastStatus::Locked {
            return self;
        }

        let old = self.status;
        self.status = ForecastStatus::Locked;
        let at = self.touch();
        self.record(at, ChangeKind::Locked, None, old, None);
        self
    }

    /// Hour edit. On Draft/Submitted the hours change in place; on
    /// Approved/Rejected/Reviewed the cell drops back to Draft and any
    /// override or rejection state is cleared. Locked cells reject the edit.
    pub fn edit_hours(mut self, new_hours: f64) -> Result<Self, EngineError> {
        self.forbid_locked("edited")?;
        validate_hours(new_hours)?;

        let old_hours = self.forecasted_hours;
        let old = self.status;

        match self.status {
            ForecastStatus::Draft | ForecastStatus::Submitted => {
                self.forecasted_hours = new_hours;
            }
            ForecastStatus::Approved | ForecastStatus::Rejected | ForecastStatus::Reviewed => {
                // a fresh edit supersedes prior workflow state
                self.forecasted_hours = new_hours;
                self.status = ForecastStatus::Draft;
                self.is_override = false;
                self.clear_override_state();
            }
            ForecastStatus::Locked => unreachable!("locked handled above"),
        }

        let at = self.touch();
        self.record(at, ChangeKind::HoursUpdated, Some(old_hours), old, None);
        Ok(self)
    }

    fn clear_override_state(&mut self) {
        self.original_forecasted_hours = None;
        self.override_reason = None;
        self.rejection_reason = None;
    }
}
