use std::sync::atomic::{AtomicI64, Ordering};

use super::types::GuardStats;

/// 自我保护计数器
///
/// `expected` 是每分钟期望的续约次数（实例数 × 每实例续约次数），
/// 注册/注销时增量维护，每 15 分钟由全量扫描校正。`fac_in_min` 统计当前
/// 窗口内实际续约次数，每分钟快照到 `fac_last_min` 并清零。
#[derive(Debug)]
pub struct Guard {
    expected: AtomicI64,
    fac_in_min: AtomicI64,
    fac_last_min: AtomicI64,
    renews_per_instance: i64,
    percent_threshold: f64,
}

impl Guard {
    pub fn new(renews_per_instance: i64, percent_threshold: f64) -> Self {
        Self {
            expected: AtomicI64::new(0),
            fac_in_min: AtomicI64::new(0),
            fac_last_min: AtomicI64::new(0),
            renews_per_instance,
            percent_threshold,
        }
    }

    /// 用全量扫描得到的实例数重置期望值
    pub fn set_exp(&self, instances: i64) {
        self.expected
            .store(instances * self.renews_per_instance, Ordering::Release);
    }

    pub fn incr_exp(&self) {
        self.expected
            .fetch_add(self.renews_per_instance, Ordering::AcqRel);
    }

    pub fn decr_exp(&self) {
        let step = self.renews_per_instance;
        let _ = self
            .expected
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (cur > 0).then(|| (cur - step).max(0))
            });
    }

    pub fn incr_fac(&self) {
        self.fac_in_min.fetch_add(1, Ordering::AcqRel);
    }

    // 每分钟调用一次：快照并清零当前窗口
    pub fn update_fac(&self) {
        let renews = self.fac_in_min.swap(0, Ordering::AcqRel);
        self.fac_last_min.store(renews, Ordering::Release);
    }

    fn threshold(&self) -> i64 {
        (self.expected.load(Ordering::Acquire) as f64 * self.percent_threshold) as i64
    }

    /// 上个窗口的实际续约数低于阈值时返回 true，此时只按上限剔除
    pub fn protected(&self) -> bool {
        let renews = self.fac_last_min.load(Ordering::Acquire);
        let threshold = self.threshold();
        let protected = renews < threshold;
        if protected {
            tracing::warn!(
                renews_last_min = renews,
                expected_threshold = threshold,
                "Registry is in self-preservation mode, factual renews below expected"
            );
        }
        protected
    }

    pub fn stats(&self) -> GuardStats {
        GuardStats {
            expected_per_min: self.expected.load(Ordering::Acquire),
            expected_threshold: self.threshold(),
            renews_in_min: self.fac_in_min.load(Ordering::Acquire),
            renews_last_min: self.fac_last_min.load(Ordering::Acquire),
        }
    }
}
