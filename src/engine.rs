//! Streaming-balance interpolation.
//!
//! One [`InterpolationEngine`] per (account, token) subscription. It owns the
//! displayed value and advances it by `net_rate * elapsed` on every tick, carrying
//! the sub-unit remainder forward so truncation never accumulates. New
//! authoritative snapshots only replace the displayed value when the drift is
//! larger than the tolerance; small drifts are absorbed to avoid visible jumps.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::models::{BalanceSnapshot, DisplayedBalance};
use crate::observer::{BalanceChange, BalanceObserver, BalanceUpdate};

const MILLIS_PER_SEC: i128 = 1_000;
const NANOS_PER_SEC: i128 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Uninitialized,
    Tracking,
    Resyncing,
    Closed,
}

/// Input to the reducer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceAction {
    /// A snapshot accepted by the cache
    Resync(BalanceSnapshot),
    /// Time elapsed since the previous tick
    Tick(Duration),
}

/// What the reducer did with an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Initialized,
    Advanced { delta: i128 },
    Unchanged,
    HardResync { drift: u128, tolerance: u128 },
    SoftContinue { drift: u128, tolerance: u128 },
    /// Action arrived before the first snapshot or after teardown
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickCadence {
    Fast,
    Slow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub refresh_interval: Duration,
    pub tolerance_factor: u64,
    pub fast_tick: Duration,
    pub slow_tick: Duration,
    /// Smallest raw amount the presentation layer shows (10^(decimals - precision))
    pub display_unit: u128,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            tolerance_factor: 100,
            fast_tick: Duration::from_millis(250),
            slow_tick: Duration::from_secs(1),
            display_unit: 1_000_000_000_000,
        }
    }
}

impl EngineSettings {
    /// `|rate| * refresh_interval * tolerance_factor`, saturating
    pub fn tolerance(&self, net_rate: i128) -> u128 {
        net_rate
            .unsigned_abs()
            .checked_mul(self.refresh_interval.as_millis())
            .and_then(|v| v.checked_mul(u128::from(self.tolerance_factor)))
            .map(|v| v / MILLIS_PER_SEC as u128)
            .unwrap_or(u128::MAX)
    }

    /// Fast ticks only pay off when each one moves the display by at least one
    /// visible unit; otherwise one tick per second is enough.
    ///
    /// This is the inverse of "tick faster when the increment is imperceptible":
    /// a sub-unit increment renders the same digits on every fast tick, so the
    /// extra ticks would only burn wakeups. Exactness holds at either cadence.
    pub fn cadence(&self, net_rate: i128) -> TickCadence {
        let per_fast_tick = net_rate
            .unsigned_abs()
            .saturating_mul(self.fast_tick.as_millis())
            / MILLIS_PER_SEC as u128;
        if net_rate != 0 && per_fast_tick >= self.display_unit.max(1) {
            TickCadence::Fast
        } else {
            TickCadence::Slow
        }
    }

    pub fn period(&self, cadence: TickCadence) -> Duration {
        match cadence {
            TickCadence::Fast => self.fast_tick,
            TickCadence::Slow => self.slow_tick,
        }
    }
}

/// Mutable interpolation state, driven only through [`reduce`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Interpolation {
    pub(crate) state: EngineState,
    pub(crate) value: u128,
    pub(crate) net_rate: i128,
    /// Fractional units carried between ticks, in billionths (0..1e9)
    pub(crate) carry: i128,
}

impl Default for Interpolation {
    fn default() -> Self {
        Self {
            state: EngineState::Uninitialized,
            value: 0,
            net_rate: 0,
            carry: 0,
        }
    }
}

/// Apply one action. A hard resync leaves the state in `Resyncing`; the caller
/// moves it back to `Tracking` once observers have seen it.
pub(crate) fn reduce(current: &mut Interpolation, action: &BalanceAction, settings: &EngineSettings) -> Outcome {
    match (current.state, action) {
        (EngineState::Closed, _) => Outcome::Ignored,
        (EngineState::Uninitialized, BalanceAction::Tick(_)) => Outcome::Ignored,
        (EngineState::Uninitialized, BalanceAction::Resync(snapshot)) => {
            current.value = snapshot.raw_balance;
            current.carry = 0;
            current.state = EngineState::Tracking;
            Outcome::Initialized
        }
        (_, BalanceAction::Resync(snapshot)) => {
            let drift = current.value.abs_diff(snapshot.raw_balance);
            let tolerance = settings.tolerance(current.net_rate);
            if drift > tolerance {
                current.state = EngineState::Resyncing;
                current.value = snapshot.raw_balance;
                current.carry = 0;
                Outcome::HardResync { drift, tolerance }
            } else {
                Outcome::SoftContinue { drift, tolerance }
            }
        }
        (_, BalanceAction::Tick(elapsed)) => advance(current, *elapsed),
    }
}

fn advance(current: &mut Interpolation, elapsed: Duration) -> Outcome {
    let nanos = i128::try_from(elapsed.as_nanos()).unwrap_or(i128::MAX);
    let scaled = current
        .net_rate
        .checked_mul(nanos)
        .and_then(|v| v.checked_add(current.carry));

    let Some(scaled) = scaled else {
        warn!(
            "Rate x time overflow (rate {}, {}ns), saturating",
            current.net_rate, nanos
        );
        current.carry = 0;
        let before = current.value;
        current.value = if current.net_rate > 0 { u128::MAX } else { 0 };
        return changed(before, current.value);
    };

    let delta = scaled.div_euclid(NANOS_PER_SEC);
    current.carry = scaled.rem_euclid(NANOS_PER_SEC);

    let before = current.value;
    if delta >= 0 {
        current.value = before.checked_add(delta.unsigned_abs()).unwrap_or_else(|| {
            warn!("Displayed balance overflow, saturating");
            current.carry = 0;
            u128::MAX
        });
    } else {
        current.value = before.checked_sub(delta.unsigned_abs()).unwrap_or_else(|| {
            debug!("Displayed balance depleted, clamping at zero");
            current.carry = 0;
            0
        });
    }
    changed(before, current.value)
}

fn changed(before: u128, after: u128) -> Outcome {
    if before == after {
        Outcome::Unchanged
    } else if after > before {
        Outcome::Advanced { delta: i128::try_from(after - before).unwrap_or(i128::MAX) }
    } else {
        Outcome::Advanced { delta: i128::try_from(before - after).map(|d| -d).unwrap_or(i128::MIN) }
    }
}

/// Per-subscription interpolation state machine with observers and explicit teardown
pub struct InterpolationEngine {
    token_id: String,
    settings: EngineSettings,
    inner: Interpolation,
    observers: Vec<Arc<dyn BalanceObserver>>,
}

impl InterpolationEngine {
    pub fn new(token_id: impl Into<String>, settings: EngineSettings) -> Self {
        Self {
            token_id: token_id.into(),
            settings,
            inner: Interpolation::default(),
            observers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, observer: Arc<dyn BalanceObserver>) {
        self.observers.push(observer);
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    pub fn state(&self) -> EngineState {
        self.inner.state
    }

    pub fn net_rate(&self) -> i128 {
        self.inner.net_rate
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// None until the first snapshot
    pub fn displayed(&self) -> Option<DisplayedBalance> {
        match self.inner.state {
            EngineState::Uninitialized => None,
            _ => Some(DisplayedBalance {
                token_id: self.token_id.clone(),
                value: self.inner.value,
            }),
        }
    }

    pub fn cadence(&self) -> TickCadence {
        self.settings.cadence(self.inner.net_rate)
    }

    /// Returns true when the tick cadence changed
    pub fn set_net_rate(&mut self, net_rate: i128) -> bool {
        if self.inner.state == EngineState::Closed {
            return false;
        }
        let before = self.cadence();
        self.inner.net_rate = net_rate;
        let after = self.cadence();
        if before != after {
            debug!("{} cadence {:?} -> {:?}", self.token_id, before, after);
        }
        before != after
    }

    pub fn apply(&mut self, action: BalanceAction) -> Outcome {
        let outcome = reduce(&mut self.inner, &action, &self.settings);
        match &outcome {
            Outcome::Initialized => {
                info!("{} tracking from {}", self.token_id, self.inner.value);
                self.notify(BalanceChange::Initialized);
            }
            Outcome::Advanced { .. } => self.notify(BalanceChange::Ticked),
            Outcome::HardResync { drift, tolerance } => {
                info!(
                    "{} resynced to {} (drift {} > tolerance {})",
                    self.token_id, self.inner.value, drift, tolerance
                );
                self.notify(BalanceChange::HardResync);
                self.inner.state = EngineState::Tracking;
            }
            Outcome::SoftContinue { drift, tolerance } => {
                debug!(
                    "{} keeps interpolating (drift {} <= tolerance {})",
                    self.token_id, drift, tolerance
                );
            }
            Outcome::Unchanged | Outcome::Ignored => {}
        }
        outcome
    }

    /// Stop the engine; every later action is ignored.
    pub fn cancel(&mut self) {
        if self.inner.state != EngineState::Closed {
            info!("{} interpolation cancelled", self.token_id);
            self.inner.state = EngineState::Closed;
            self.observers.clear();
        }
    }

    fn notify(&self, change: BalanceChange) {
        let update = BalanceUpdate {
            token_id: self.token_id.clone(),
            value: self.inner.value,
            net_rate: self.inner.net_rate,
            state: self.inner.state,
            change,
        };
        for observer in &self.observers {
            observer.on_balance(&update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn settings() -> EngineSettings {
        EngineSettings {
            display_unit: 1,
            ..EngineSettings::default()
        }
    }

    fn snapshot(raw: u128, at: i64) -> BalanceSnapshot {
        BalanceSnapshot { token_id: "dai".into(), raw_balance: raw, observed_at: at }
    }

    fn tracking(raw: u128, rate: i128) -> InterpolationEngine {
        let mut engine = InterpolationEngine::new("dai", settings());
        engine.set_net_rate(rate);
        assert_eq!(engine.apply(BalanceAction::Resync(snapshot(raw, 0))), Outcome::Initialized);
        engine
    }

    fn value(engine: &InterpolationEngine) -> u128 {
        engine.displayed().unwrap().value
    }

    fn secs(s: u64) -> BalanceAction {
        BalanceAction::Tick(Duration::from_secs(s))
    }

    #[test]
    fn uninitialized_until_first_snapshot() {
        let mut engine = InterpolationEngine::new("dai", settings());
        engine.set_net_rate(10);
        assert_eq!(engine.apply(secs(1)), Outcome::Ignored);
        assert!(engine.displayed().is_none());

        engine.apply(BalanceAction::Resync(snapshot(1_000, 0)));
        assert_eq!(engine.state(), EngineState::Tracking);
        assert_eq!(value(&engine), 1_000);
    }

    #[test]
    fn small_drift_keeps_interpolating() {
        let mut engine = tracking(1_000, 10);
        for _ in 0..5 {
            engine.apply(secs(1));
        }
        assert_eq!(value(&engine), 1_050);

        let outcome = engine.apply(BalanceAction::Resync(snapshot(1_200, 5_000)));
        assert_eq!(outcome, Outcome::SoftContinue { drift: 150, tolerance: 30_000 });
        assert_eq!(value(&engine), 1_050);

        engine.apply(secs(1));
        assert_eq!(value(&engine), 1_060);
    }

    #[test]
    fn large_drift_snaps_to_snapshot() {
        let mut engine = tracking(1_000, 10);
        for _ in 0..5 {
            engine.apply(secs(1));
        }

        let outcome = engine.apply(BalanceAction::Resync(snapshot(41_050, 5_000)));
        assert_eq!(outcome, Outcome::HardResync { drift: 40_000, tolerance: 30_000 });
        assert_eq!(value(&engine), 41_050);
        assert_eq!(engine.state(), EngineState::Tracking);
    }

    #[test]
    fn resync_with_converged_value_is_a_no_op() {
        let mut engine = tracking(1_000, 10);
        engine.apply(secs(3));
        let before = value(&engine);

        let outcome = engine.apply(BalanceAction::Resync(snapshot(before, 3_000)));
        assert_eq!(outcome, Outcome::SoftContinue { drift: 0, tolerance: 30_000 });
        assert_eq!(value(&engine), before);
    }

    #[test]
    fn zero_rate_never_moves() {
        let mut engine = tracking(777, 0);
        for _ in 0..100 {
            assert_eq!(engine.apply(BalanceAction::Tick(Duration::from_millis(250))), Outcome::Unchanged);
        }
        assert_eq!(value(&engine), 777);
    }

    #[test]
    fn zero_rate_resyncs_on_any_drift() {
        let mut engine = tracking(777, 0);
        assert_eq!(
            engine.apply(BalanceAction::Resync(snapshot(778, 1))),
            Outcome::HardResync { drift: 1, tolerance: 0 }
        );
    }

    #[test]
    fn sub_second_ticks_sum_exactly_to_rate() {
        for rate in [1i128, 3, 7, 10, 999, -1, -3, -10] {
            let mut engine = tracking(1_000_000, rate);
            let t1 = value(&engine);
            for _ in 0..4 * 7 {
                engine.apply(BalanceAction::Tick(Duration::from_millis(250)));
            }
            let t2 = value(&engine);
            assert_eq!(t2 as i128 - t1 as i128, rate * 7, "rate {rate}");
        }
    }

    #[test]
    fn uneven_ticks_carry_remainder() {
        let mut engine = tracking(0, 3);
        for ms in [333u64, 333, 334, 100, 900] {
            engine.apply(BalanceAction::Tick(Duration::from_millis(ms)));
        }
        assert_eq!(value(&engine), 6);
    }

    #[test]
    fn sub_millisecond_elapsed_is_carried() {
        let mut engine = tracking(0, 1_000);
        for _ in 0..8 {
            engine.apply(BalanceAction::Tick(Duration::from_micros(250_500)));
        }
        assert_eq!(value(&engine), 2_004);

        let mut engine = tracking(0, 7);
        for _ in 0..1_000 {
            engine.apply(BalanceAction::Tick(Duration::from_nanos(999_999)));
        }
        // 0.999999s * 7 = 6.999993
        assert_eq!(value(&engine), 6);
        engine.apply(BalanceAction::Tick(Duration::from_nanos(1_000)));
        assert_eq!(value(&engine), 7);
    }

    #[test]
    fn negative_rate_clamps_at_zero() {
        let mut engine = tracking(5, -10);
        engine.apply(secs(1));
        assert_eq!(value(&engine), 0);
        engine.apply(secs(1));
        assert_eq!(value(&engine), 0);
    }

    #[test]
    fn rate_times_time_overflow_saturates() {
        let mut engine = tracking(1, i128::MAX);
        engine.apply(secs(10));
        assert_eq!(value(&engine), u128::MAX);
    }

    #[test]
    fn tolerance_scales_with_rate_interval_and_factor() {
        let s = EngineSettings { tolerance_factor: 2, ..settings() };
        assert_eq!(s.tolerance(-10), 600);
        assert_eq!(s.tolerance(0), 0);
        assert_eq!(s.tolerance(i128::MAX), u128::MAX);
    }

    #[test]
    fn cadence_follows_visible_increment() {
        let s = EngineSettings { display_unit: 1_000, ..EngineSettings::default() };
        assert_eq!(s.cadence(0), TickCadence::Slow);
        assert_eq!(s.cadence(100), TickCadence::Slow); // 25 per fast tick, invisible
        assert_eq!(s.cadence(4_000), TickCadence::Fast);
        assert_eq!(s.cadence(-4_000), TickCadence::Fast);
        assert_eq!(s.period(TickCadence::Fast), Duration::from_millis(250));
    }

    #[test]
    fn set_net_rate_reports_cadence_change() {
        let mut engine = InterpolationEngine::new("dai", EngineSettings { display_unit: 1_000, ..settings() });
        assert!(!engine.set_net_rate(10));
        assert!(engine.set_net_rate(10_000));
        assert!(!engine.set_net_rate(20_000));
        assert_eq!(engine.cadence(), TickCadence::Fast);
    }

    #[test]
    fn observers_see_every_mutation() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut engine = InterpolationEngine::new("dai", settings());
        engine.subscribe(Arc::new(move |u: &BalanceUpdate| {
            sink.lock().unwrap().push((u.change, u.state, u.value))
        }));
        engine.set_net_rate(10);

        engine.apply(BalanceAction::Resync(snapshot(1_000, 0)));
        engine.apply(secs(1));
        engine.apply(BalanceAction::Resync(snapshot(100_000, 1_000)));
        engine.apply(BalanceAction::Resync(snapshot(100_000, 2_000))); // converged, silent

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (BalanceChange::Initialized, EngineState::Tracking, 1_000),
                (BalanceChange::Ticked, EngineState::Tracking, 1_010),
                (BalanceChange::HardResync, EngineState::Resyncing, 100_000),
            ]
        );
    }

    #[test]
    fn cancelled_engine_ignores_late_ticks() {
        let calls = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&calls);
        let mut engine = tracking(1_000, 10);
        engine.subscribe(Arc::new(move |_: &BalanceUpdate| *sink.lock().unwrap() += 1));

        engine.cancel();
        assert_eq!(engine.apply(secs(1)), Outcome::Ignored);
        assert_eq!(engine.apply(BalanceAction::Resync(snapshot(1, 9))), Outcome::Ignored);
        assert!(!engine.set_net_rate(50));
        assert_eq!(value(&engine), 1_000);
        assert_eq!(engine.state(), EngineState::Closed);
        assert_eq!(*calls.lock().unwrap(), 0);
    }
}
