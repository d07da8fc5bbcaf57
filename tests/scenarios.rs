//! End-to-end workflow scenarios against a real sled database.

use std::sync::Arc;

use anyhow::Context;
use tempfile::{TempDir, tempdir};

use forecast_approval::{
    collab::InMemoryAssignmentDirectory,
    error::EngineError,
    forecast::ForecastStatus,
    lock::LockEngine,
    service::ApprovalEngine,
    store::EngineDb,
    summary::SummaryAggregator,
    utils,
    version::{MonthSpan, VersionType},
    versions::VersionManager,
};

// Sled uses file-based locking to prevent concurrent access, so each test
// opens its own database on temp storage for simplified cleanup.
fn open_db(name: &str) -> anyhow::Result<(TempDir, EngineDb)> {
    let temp_dir = tempdir()?;
    let db = sled::open(temp_dir.path().join(name))?;
    let db = EngineDb::open(Arc::new(db))?;
    Ok((temp_dir, db))
}

fn full_year_2025() -> anyhow::Result<MonthSpan> {
    Ok(MonthSpan::new(2025, 1, 2025, 12)?)
}

#[test]
fn end_to_end_approval_override_and_lock() -> anyhow::Result<()> {
    let (_tmp, db) = open_db("end_to_end.db")?;
    let manager = VersionManager::new(db.clone());
    let engine = ApprovalEngine::new(db.clone());
    let locker = LockEngine::new(db, Arc::new(InMemoryAssignmentDirectory::new()));

    let tenant = utils::new_tenant_id();
    let assignment = utils::new_assignment_id();

    let v1 = manager.create(&tenant, "V1", None, VersionType::WhatIf, full_year_2025()?)?;

    let cell = engine
        .create(&tenant, &v1.id, &assignment, 2025, 1, 40.0, None, None)
        .context("cell creation failed: ")?;
    assert_eq!(cell.status, ForecastStatus::Draft);

    let cell = engine.submit_one(&tenant, &cell.id)?;
    assert_eq!(cell.status, ForecastStatus::Submitted);

    let cell = engine.approve_one(&tenant, &cell.id)?;
    assert_eq!(cell.status, ForecastStatus::Approved);

    let cell = engine.override_one(&tenant, &cell.id, 32.0, "scope change")?;
    assert_eq!(cell.status, ForecastStatus::Approved);
    assert!(cell.is_override);
    assert_eq!(cell.original_forecasted_hours, Some(40.0));
    assert_eq!(cell.forecasted_hours, 32.0);

    let outcome = locker.lock_month(&tenant, &v1.id, 2025, 1, None, None)?;
    assert_eq!(outcome.locked_count, 1);

    let cell = engine.get(&tenant, &cell.id)?;
    assert_eq!(cell.status, ForecastStatus::Locked);

    let err = engine.edit_hours(&tenant, &cell.id, 8.0).unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    Ok(())
}

#[test]
fn clone_with_copy_resets_workflow_state() -> anyhow::Result<()> {
    let (_tmp, db) = open_db("clone_with_copy.db")?;
    let manager = VersionManager::new(db.clone());
    let engine = ApprovalEngine::new(db);

    let tenant = utils::new_tenant_id();
    let assignment = utils::new_assignment_id();

    let v1 = manager.create(&tenant, "V1", None, VersionType::WhatIf, full_year_2025()?)?;
    let cell = engine.create(&tenant, &v1.id, &assignment, 2025, 1, 40.0, None, None)?;
    let cell = engine.submit_one(&tenant, &cell.id)?;
    let cell = engine.approve_one(&tenant, &cell.id)?;
    engine.override_one(&tenant, &cell.id, 32.0, "scope change")?;

    let v2 = manager.clone_version(&tenant, &v1.id, "V2", VersionType::WhatIf, true)?;
    assert_eq!(v2.span, v1.span);

    let cloned = engine.list(&tenant, &v2.id)?;
    assert_eq!(cloned.len(), 1);
    let cloned = &cloned[0];

    // the overridden value carries, the override history does not
    assert_eq!(cloned.forecasted_hours, 32.0);
    assert_eq!(cloned.status, ForecastStatus::Draft);
    assert!(!cloned.is_override);
    assert_eq!(cloned.original_forecasted_hours, None);
    assert_eq!(cloned.assignment_id, assignment);
    assert_ne!(cloned.id, cell.id);

    // cloning without forecasts produces an empty version
    let v3 = manager.clone_version(&tenant, &v1.id, "V3", VersionType::WhatIf, false)?;
    assert!(engine.list(&tenant, &v3.id)?.is_empty());

    Ok(())
}

#[test]
fn promotion_archives_the_previous_current() -> anyhow::Result<()> {
    let (_tmp, db) = open_db("promotion.db")?;
    let manager = VersionManager::new(db);

    let tenant = utils::new_tenant_id();
    let span = full_year_2025()?;
    let a = manager.create(&tenant, "A", None, VersionType::WhatIf, span)?;
    let b = manager.create(&tenant, "B", None, VersionType::Import, span)?;

    assert!(matches!(
        manager.get_current(&tenant),
        Err(EngineError::NotFound(_))
    ));

    manager.promote(&tenant, &a.id)?;
    assert_eq!(manager.get_current(&tenant)?.id, a.id);

    manager.promote(&tenant, &b.id)?;
    assert_eq!(manager.get_current(&tenant)?.id, b.id);

    let old = manager.get(&tenant, &a.id)?;
    assert!(old.is_archived);
    assert!(!old.is_current);
    assert_eq!(old.archived_reason.as_deref(), Some("superseded by promotion"));

    // promoting the current version again is a no-op
    manager.promote(&tenant, &b.id)?;
    assert_eq!(manager.get_current(&tenant)?.id, b.id);

    let all = manager.list(&tenant, true)?;
    assert_eq!(all.len(), 2);
    assert_eq!(all.iter().filter(|v| v.is_current).count(), 1);

    Ok(())
}

#[test]
fn concurrent_promotions_settle_on_exactly_one_current() -> anyhow::Result<()> {
    let (_tmp, db) = open_db("concurrent_promotions.db")?;
    let manager = VersionManager::new(db.clone());

    let tenant = utils::new_tenant_id();
    let span = full_year_2025()?;
    let a = manager.create(&tenant, "A", None, VersionType::WhatIf, span)?;
    let b = manager.create(&tenant, "B", None, VersionType::WhatIf, span)?;

    std::thread::scope(|scope| {
        let first = scope.spawn({
            let manager = VersionManager::new(db.clone());
            let tenant = tenant.clone();
            let id = a.id.clone();
            move || manager.promote(&tenant, &id)
        });
        let second = scope.spawn({
            let manager = VersionManager::new(db.clone());
            let tenant = tenant.clone();
            let id = b.id.clone();
            move || manager.promote(&tenant, &id)
        });
        first.join().expect("promotion thread panicked").unwrap();
        second.join().expect("promotion thread panicked").unwrap();
    });

    // never zero, never two
    let current = manager.get_current(&tenant)?;
    assert!(current.id == a.id || current.id == b.id);

    let all = manager.list(&tenant, true)?;
    let current_count = all.iter().filter(|v| v.is_current && !v.is_archived).count();
    assert_eq!(current_count, 1);

    Ok(())
}

#[test]
fn archiving_the_current_version_leaves_none() -> anyhow::Result<()> {
    let (_tmp, db) = open_db("archive_current.db")?;
    let manager = VersionManager::new(db);

    let tenant = utils::new_tenant_id();
    let a = manager.create(&tenant, "A", None, VersionType::WhatIf, full_year_2025()?)?;
    manager.promote(&tenant, &a.id)?;

    let archived = manager.archive(&tenant, &a.id, Some("quarter closed"))?;
    assert!(archived.is_archived);
    assert_eq!(archived.archived_reason.as_deref(), Some("quarter closed"));

    // no replacement is auto-selected
    assert!(matches!(
        manager.get_current(&tenant),
        Err(EngineError::NotFound(_))
    ));

    // archived versions stay queryable for history
    assert_eq!(manager.list(&tenant, true)?.len(), 1);
    assert!(manager.list(&tenant, false)?.is_empty());

    Ok(())
}

#[test]
fn lock_month_is_idempotent() -> anyhow::Result<()> {
    let (_tmp, db) = open_db("lock_idempotent.db")?;
    let manager = VersionManager::new(db.clone());
    let engine = ApprovalEngine::new(db.clone());
    let locker = LockEngine::new(db, Arc::new(InMemoryAssignmentDirectory::new()));

    let tenant = utils::new_tenant_id();
    let v1 = manager.create(&tenant, "V1", None, VersionType::WhatIf, full_year_2025()?)?;

    for hours in [40.0, 20.0, 0.0] {
        let assignment = utils::new_assignment_id();
        engine.create(&tenant, &v1.id, &assignment, 2025, 3, hours, None, None)?;
    }
    // a cell in another month stays untouched
    let other = utils::new_assignment_id();
    engine.create(&tenant, &v1.id, &other, 2025, 4, 10.0, None, None)?;

    let first = locker.lock_month(&tenant, &v1.id, 2025, 3, None, None)?;
    assert_eq!(first.locked_count, 3);

    let second = locker.lock_month(&tenant, &v1.id, 2025, 3, None, None)?;
    assert_eq!(second.locked_count, 0);
    assert_eq!(second.matched_count, 3);

    for cell in engine.list(&tenant, &v1.id)? {
        if cell.month == 3 {
            assert_eq!(cell.status, ForecastStatus::Locked);
        } else {
            assert_eq!(cell.status, ForecastStatus::Draft);
        }
    }

    Ok(())
}

#[test]
fn lock_month_honors_the_project_filter() -> anyhow::Result<()> {
    let (_tmp, db) = open_db("lock_project_filter.db")?;
    let manager = VersionManager::new(db.clone());
    let engine = ApprovalEngine::new(db.clone());

    let tenant = utils::new_tenant_id();
    let v1 = manager.create(&tenant, "V1", None, VersionType::WhatIf, full_year_2025()?)?;

    let project_a = utils::new_project_id();
    let project_b = utils::new_project_id();
    let asgn_a = utils::new_assignment_id();
    let asgn_b = utils::new_assignment_id();

    let directory = InMemoryAssignmentDirectory::new()
        .assign(&asgn_a, &project_a)
        .assign(&asgn_b, &project_b);
    let locker = LockEngine::new(db, Arc::new(directory));

    let cell_a = engine.create(&tenant, &v1.id, &asgn_a, 2025, 6, 80.0, None, None)?;
    let cell_b = engine.create(&tenant, &v1.id, &asgn_b, 2025, 6, 60.0, None, None)?;

    let outcome = locker.lock_month(&tenant, &v1.id, 2025, 6, Some(project_a.as_str()), None)?;
    assert_eq!(outcome.locked_count, 1);

    assert_eq!(engine.get(&tenant, &cell_a.id)?.status, ForecastStatus::Locked);
    assert_eq!(engine.get(&tenant, &cell_b.id)?.status, ForecastStatus::Draft);

    Ok(())
}

#[test]
fn bulk_approve_processes_only_submitted_cells() -> anyhow::Result<()> {
    let (_tmp, db) = open_db("bulk_approve.db")?;
    let manager = VersionManager::new(db.clone());
    let engine = ApprovalEngine::new(db);

    let tenant = utils::new_tenant_id();
    let v1 = manager.create(&tenant, "V1", None, VersionType::WhatIf, full_year_2025()?)?;

    let mut ids = Vec::new();
    for month in [1, 2] {
        let assignment = utils::new_assignment_id();
        let cell = engine.create(&tenant, &v1.id, &assignment, 2025, month, 40.0, None, None)?;
        ids.push(engine.submit_one(&tenant, &cell.id)?.id);
    }

    // still Draft: must be skipped
    let draft_assignment = utils::new_assignment_id();
    let draft = engine.create(&tenant, &v1.id, &draft_assignment, 2025, 3, 40.0, None, None)?;
    ids.push(draft.id.clone());

    // another tenant's cell: reads as not-found
    let other_tenant = utils::new_tenant_id();
    let other_version =
        manager.create(&other_tenant, "Other", None, VersionType::WhatIf, full_year_2025()?)?;
    let foreign_assignment = utils::new_assignment_id();
    let foreign = engine.create(
        &other_tenant,
        &other_version.id,
        &foreign_assignment,
        2025,
        1,
        8.0,
        None,
        None,
    )?;
    ids.push(foreign.id.clone());

    // unknown id
    ids.push(utils::new_forecast_id());

    let outcome = engine.bulk_approve(&tenant, &ids, None)?;
    assert_eq!(outcome.processed_count, 2);
    assert_eq!(outcome.failures.len(), 3);

    let failed_ids: Vec<&str> = outcome
        .failures
        .iter()
        .map(|f| f.forecast_id.as_str())
        .collect();
    assert!(failed_ids.contains(&draft.id.as_str()));
    assert!(failed_ids.contains(&foreign.id.as_str()));

    // the draft cell failed with a transition error, the foreign one reads
    // as not-found
    for failure in &outcome.failures {
        if failure.forecast_id == draft.id {
            assert!(matches!(failure.error, EngineError::InvalidTransition(_)));
        }
        if failure.forecast_id == foreign.id {
            assert!(matches!(failure.error, EngineError::NotFound(_)));
        }
    }

    // the foreign cell is untouched
    assert_eq!(
        engine.get(&other_tenant, &foreign.id)?.status,
        ForecastStatus::Draft
    );

    Ok(())
}

#[test]
fn cancelled_bulk_approve_processes_nothing() -> anyhow::Result<()> {
    let (_tmp, db) = open_db("bulk_cancel.db")?;
    let manager = VersionManager::new(db.clone());
    let engine = ApprovalEngine::new(db);

    let tenant = utils::new_tenant_id();
    let v1 = manager.create(&tenant, "V1", None, VersionType::WhatIf, full_year_2025()?)?;
    let assignment = utils::new_assignment_id();
    let cell = engine.create(&tenant, &v1.id, &assignment, 2025, 1, 40.0, None, None)?;
    let cell = engine.submit_one(&tenant, &cell.id)?;

    let token = utils::CancelToken::new();
    token.cancel();

    let outcome = engine.bulk_approve(&tenant, &[cell.id.clone()], Some(&token))?;
    assert_eq!(outcome.processed_count, 0);
    assert!(outcome.failures.is_empty());
    assert_eq!(engine.get(&tenant, &cell.id)?.status, ForecastStatus::Submitted);

    Ok(())
}

#[test]
fn summary_buckets_by_status_and_project() -> anyhow::Result<()> {
    let (_tmp, db) = open_db("summary.db")?;
    let manager = VersionManager::new(db.clone());
    let engine = ApprovalEngine::new(db.clone());

    let tenant = utils::new_tenant_id();
    let v1 = manager.create(&tenant, "V1", None, VersionType::WhatIf, full_year_2025()?)?;

    let project_a = utils::new_project_id();
    let project_b = utils::new_project_id();
    let asgn_a = utils::new_assignment_id();
    let asgn_b = utils::new_assignment_id();
    let directory = InMemoryAssignmentDirectory::new()
        .assign(&asgn_a, &project_a)
        .assign(&asgn_b, &project_b);
    let aggregator = SummaryAggregator::new(db, Arc::new(directory));

    // project A: one approved-and-overridden cell, one draft cell
    let approved = engine.create(&tenant, &v1.id, &asgn_a, 2025, 1, 100.0, None, None)?;
    let approved = engine.submit_one(&tenant, &approved.id)?;
    let approved = engine.approve_one(&tenant, &approved.id)?;
    engine.override_one(&tenant, &approved.id, 90.0, "descoped")?;
    engine.create(&tenant, &v1.id, &asgn_a, 2025, 2, 50.0, None, None)?;

    // project B: one submitted cell
    let submitted = engine.create(&tenant, &v1.id, &asgn_b, 2025, 1, 60.0, None, None)?;
    engine.submit_one(&tenant, &submitted.id)?;

    let summary = aggregator.summarize(&tenant, &v1.id, None)?;
    assert_eq!(summary.total_forecasts, 3);
    assert_eq!(summary.total_hours, 200.0);
    assert_eq!(summary.draft.count, 1);
    assert_eq!(summary.draft.hours, 50.0);
    assert_eq!(summary.submitted.count, 1);
    assert_eq!(summary.submitted.hours, 60.0);
    assert_eq!(summary.approved.count, 1);
    assert_eq!(summary.approved.hours, 90.0);
    assert_eq!(summary.rejected.count, 0);
    assert_eq!(summary.locked.count, 0);
    assert_eq!(summary.override_count, 1);

    let project_summary = aggregator.summarize(&tenant, &v1.id, Some(project_a.as_str()))?;
    assert_eq!(project_summary.total_forecasts, 2);
    assert_eq!(project_summary.total_hours, 140.0);
    assert_eq!(project_summary.submitted.count, 0);

    assert!(aggregator.project_in_use(&tenant, &project_b)?);
    assert!(!aggregator.project_in_use(&tenant, &utils::new_project_id())?);

    Ok(())
}

#[test]
fn duplicate_cell_coordinates_are_rejected() -> anyhow::Result<()> {
    let (_tmp, db) = open_db("duplicate_cell.db")?;
    let manager = VersionManager::new(db.clone());
    let engine = ApprovalEngine::new(db);

    let tenant = utils::new_tenant_id();
    let v1 = manager.create(&tenant, "V1", None, VersionType::WhatIf, full_year_2025()?)?;
    let assignment = utils::new_assignment_id();

    engine.create(&tenant, &v1.id, &assignment, 2025, 5, 40.0, None, None)?;
    let err = engine
        .create(&tenant, &v1.id, &assignment, 2025, 5, 20.0, None, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    // outside the version's month span
    let err = engine
        .create(&tenant, &v1.id, &assignment, 2026, 1, 20.0, None, None)
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    Ok(())
}
