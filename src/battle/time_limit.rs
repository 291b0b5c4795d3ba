//! Timeout, stalemate and mutual supply exhaustion

use super::result::EndReason;

/// Supply exhaustion is only checked on this cadence
pub const SUPPLY_CHECK_INTERVAL: u64 = 10;

/// Grace-period transition observed during a check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraceChange {
    Started { ends_at: u64 },
    Cleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeLimitCheck {
    pub end: Option<EndReason>,
    pub grace: Option<GraceChange>,
}

/// Watches the three time-based end conditions.
///
/// Precedence when several fire on the same tick: timeout, then stalemate,
/// then supply exhaustion.
#[derive(Debug, Clone)]
pub struct TimeLimitMonitor {
    max_ticks: u64,
    stalemate_threshold: u64,
    grace_ticks: u64,
    last_damage_tick: u64,
    grace_started: Option<u64>,
}

impl TimeLimitMonitor {
    pub fn new(max_ticks: u64, stalemate_threshold: u64, grace_ticks: u64) -> Self {
        Self {
            max_ticks,
            stalemate_threshold,
            grace_ticks,
            last_damage_tick: 0,
            grace_started: None,
        }
    }

    /// Restart the stalemate clock, e.g. when the battle starts
    pub fn reset(&mut self, tick: u64) {
        self.last_damage_tick = tick;
        self.grace_started = None;
    }

    pub fn record_damage(&mut self, tick: u64) {
        self.last_damage_tick = tick;
    }

    pub fn ticks_since_damage(&self, tick: u64) -> u64 {
        tick.saturating_sub(self.last_damage_tick)
    }

    pub fn grace_started(&self) -> Option<u64> {
        self.grace_started
    }

    pub fn grace_ends_at(&self) -> Option<u64> {
        self.grace_started.map(|start| start + self.grace_ticks)
    }

    /// Drop a running grace period (fuel came back outside the cadence)
    pub fn clear_grace(&mut self) -> bool {
        self.grace_started.take().is_some()
    }

    /// Evaluate all conditions for `tick`. `exhausted` is only consulted on
    /// supply-check ticks and should report whether no fleet can move.
    pub fn check(&mut self, tick: u64, exhausted: impl FnOnce() -> bool) -> TimeLimitCheck {
        let mut result = TimeLimitCheck::default();

        if tick % SUPPLY_CHECK_INTERVAL == 0 {
            let dry = exhausted();
            match (dry, self.grace_started) {
                (true, None) => {
                    self.grace_started = Some(tick);
                    result.grace = Some(GraceChange::Started {
                        ends_at: tick + self.grace_ticks,
                    });
                }
                (false, Some(_)) => {
                    self.grace_started = None;
                    result.grace = Some(GraceChange::Cleared);
                }
                _ => {}
            }
        }

        result.end = if tick >= self.max_ticks {
            Some(EndReason::Timeout)
        } else if self.ticks_since_damage(tick) >= self.stalemate_threshold {
            Some(EndReason::Stalemate)
        } else if self
            .grace_ends_at()
            .is_some_and(|ends_at| tick >= ends_at)
        {
            Some(EndReason::SupplyExhaustion)
        } else {
            None
        };

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_at_max_ticks() {
        let mut monitor = TimeLimitMonitor::new(100, 1_800, 300);
        for tick in 1..100 {
            monitor.record_damage(tick);
            assert_eq!(monitor.check(tick, || false).end, None);
        }
        assert_eq!(monitor.check(100, || false).end, Some(EndReason::Timeout));
    }

    #[test]
    fn stalemate_after_quiet_period() {
        let mut monitor = TimeLimitMonitor::new(10_000, 50, 300);
        monitor.record_damage(10);
        assert_eq!(monitor.check(59, || false).end, None);
        assert_eq!(monitor.check(60, || false).end, Some(EndReason::Stalemate));
    }

    #[test]
    fn timeout_beats_stalemate() {
        let mut monitor = TimeLimitMonitor::new(100, 100, 300);
        assert_eq!(monitor.check(100, || true).end, Some(EndReason::Timeout));
    }

    #[test]
    fn exhaustion_grace_starts_and_expires() {
        let mut monitor = TimeLimitMonitor::new(10_000, 10_000, 30);

        // Off-cadence ticks never look at supply
        let check = monitor.check(5, || panic!("checked off cadence"));
        assert_eq!(check, TimeLimitCheck::default());

        let check = monitor.check(10, || true);
        assert_eq!(check.grace, Some(GraceChange::Started { ends_at: 40 }));
        assert_eq!(monitor.check(39, || true).end, None);
        assert_eq!(
            monitor.check(40, || true).end,
            Some(EndReason::SupplyExhaustion)
        );
    }

    #[test]
    fn restored_supply_clears_grace() {
        let mut monitor = TimeLimitMonitor::new(10_000, 10_000, 30);
        monitor.check(10, || true);
        let check = monitor.check(20, || false);
        assert_eq!(check.grace, Some(GraceChange::Cleared));
        assert_eq!(monitor.check(50, || false).end, None);
    }
}
