//! Registry data model
//!
//! instance -> app (one zone of one service) -> apps (all zones of one
//! service+environment). Each level synchronises its own map; the registry
//! decides when levels are created and dropped.

pub mod app;
pub mod apps;
pub mod args;
pub mod info;
pub mod instance;

pub use app::App;
pub use apps::Apps;
pub use args::{ArgCancel, ArgPolls, ArgRegister, ArgRenew, ArgSet};
pub use info::{InstanceInfo, SchedulerInfo};
pub use instance::{Instance, InstanceStatus, StatusFilter};

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// 当前 Unix 纳秒时间戳
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}

// 保证单调递增：不大于当前值时取当前值 + 1
pub(crate) fn bump_latest(latest: &AtomicI64, lts: i64) -> i64 {
    let mut stored = lts;
    let _ = latest.fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
        stored = if lts <= cur { cur + 1 } else { lts };
        Some(stored)
    });
    stored
}
