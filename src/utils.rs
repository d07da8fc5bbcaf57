//! Identifier minting and batch-operation cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32 with a kind-specific prefix
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

fn mint(hrp: &str) -> String {
    new_uuid_to_bech32(hrp).expect("static hrp is valid bech32")
}

pub fn new_tenant_id() -> String {
    mint("tenant_")
}

pub fn new_version_id() -> String {
    mint("ver_")
}

pub fn new_forecast_id() -> String {
    mint("fcst_")
}

pub fn new_assignment_id() -> String {
    mint("asgn_")
}

pub fn new_project_id() -> String {
    mint("proj_")
}

/// Caller-supplied cancellation flag polled by `bulk_approve` and
/// `lock_month` between cells. Each cell's update is a single atomic write,
/// so cancelling mid-batch never leaves a partially mutated cell.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub(crate) fn cancelled(cancel: Option<&CancelToken>) -> bool {
    cancel.is_some_and(CancelToken::is_cancelled)
}
