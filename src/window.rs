use crate::error::ConfigError;
use bytemuck::{Pod, Zeroable};
use chrono::{DateTime, NaiveDateTime};
use chrono_tz::Tz;
use std::time::Duration;

/// Largest timestamp magnitude a record may carry, a little over 142,000
/// years either side of the epoch. Together with the limits `validate` puts
/// on size and grace, window bounds and local date-times stay representable.
pub const MAX_TIMESTAMP_MILLIS: i64 = 1 << 52;

pub fn timestamp_in_range(timestamp: i64) -> bool {
    (-MAX_TIMESTAMP_MILLIS..=MAX_TIMESTAMP_MILLIS).contains(&timestamp)
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// A half-open interval `[start, end)` in epoch milliseconds.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Window {
    pub start: i64,
    pub end: i64,
}

impl Window {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    #[inline(always)]
    pub fn contains(&self, timestamp: i64) -> bool {
        self.start <= timestamp && timestamp < self.end
    }

    pub fn size(&self) -> i64 {
        self.end - self.start
    }
}

/// A grouping key scoped to one window instance: the unit of aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Windowed<K> {
    pub key: K,
    pub window: Window,
}

impl<K> Windowed<K> {
    pub fn new(key: K, window: Window) -> Self {
        Self { key, window }
    }
}

/// Size, hop, lateness tolerance and calendar zone of one stat kind.
///
/// Window starts are aligned to multiples of `advance` counted from the epoch.
/// The zone only affects key derivation: it turns a record's instant into the
/// local date-time handed to the key factory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowPolicy {
    size: i64,
    advance: i64,
    grace: i64,
    zone: Tz,
}

impl WindowPolicy {
    pub fn tumbling(size: Duration) -> Self {
        let size = millis(size);
        Self {
            size,
            advance: size,
            grace: 0,
            zone: Tz::UTC,
        }
    }

    pub fn hopping(size: Duration, advance: Duration) -> Self {
        Self {
            size: millis(size),
            advance: millis(advance),
            grace: 0,
            zone: Tz::UTC,
        }
    }

    /// Raw millisecond constructor, mostly for tests working on small numbers.
    pub fn from_millis(size: i64, advance: i64) -> Self {
        Self {
            size,
            advance,
            grace: 0,
            zone: Tz::UTC,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = millis(grace);
        self
    }

    pub fn with_grace_millis(mut self, grace: i64) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_zone(mut self, zone: Tz) -> Self {
        self.zone = zone;
        self
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn advance(&self) -> i64 {
        self.advance
    }

    pub fn grace(&self) -> i64 {
        self.grace
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size <= 0 {
            return Err(ConfigError::NonPositiveWindowSize(self.size));
        }
        if self.size > MAX_TIMESTAMP_MILLIS {
            return Err(ConfigError::WindowTooLarge(self.size));
        }
        if self.advance <= 0 {
            return Err(ConfigError::NonPositiveAdvance(self.advance));
        }
        if self.advance > self.size {
            return Err(ConfigError::AdvanceExceedsSize {
                size: self.size,
                advance: self.advance,
            });
        }
        if self.grace < 0 {
            return Err(ConfigError::NegativeGrace(self.grace));
        }
        if self.grace > MAX_TIMESTAMP_MILLIS {
            return Err(ConfigError::GraceTooLarge(self.grace));
        }
        Ok(())
    }

    /// Calls `f` for every window containing `timestamp`, oldest first.
    /// The policy must be valid and `timestamp` within range.
    #[inline(always)]
    pub fn for_each_window(&self, timestamp: i64, mut f: impl FnMut(Window)) {
        let last_start = timestamp.div_euclid(self.advance) * self.advance;
        let mut start = last_start - ((self.size - 1) / self.advance) * self.advance;
        while start <= last_start {
            if timestamp < start + self.size {
                f(Window::new(start, start + self.size));
            }
            start += self.advance;
        }
    }

    pub fn windows_for(&self, timestamp: i64) -> Vec<Window> {
        let mut windows = Vec::with_capacity((self.size / self.advance) as usize);
        self.for_each_window(timestamp, |w| windows.push(w));
        windows
    }

    /// True while a window may still accept late records.
    #[inline(always)]
    pub fn is_open(&self, window: &Window, stream_time: i64) -> bool {
        window.end.saturating_add(self.grace) > stream_time
    }

    /// Whether an update triggered by a record at `timestamp` falls into the
    /// last hop of `window`.
    #[inline(always)]
    pub fn is_final_hop(&self, window: &Window, timestamp: i64) -> bool {
        timestamp >= window.end - self.advance
    }

    /// Wall clock of `timestamp` in the policy's zone. Every in-range instant
    /// maps to exactly one local date-time, including across DST transitions.
    pub fn local_date_time(&self, timestamp: i64) -> Option<NaiveDateTime> {
        if !timestamp_in_range(timestamp) {
            return None;
        }
        let utc = DateTime::from_timestamp_millis(timestamp)?;
        Some(utc.with_timezone(&self.zone).naive_local())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_tumbling_assignment() {
        let policy = WindowPolicy::from_millis(10, 10);
        assert_eq!(policy.windows_for(0), vec![Window::new(0, 10)]);
        assert_eq!(policy.windows_for(9), vec![Window::new(0, 10)]);
        assert_eq!(policy.windows_for(10), vec![Window::new(10, 20)]);
    }

    #[test]
    fn test_hopping_assignment() {
        let policy = WindowPolicy::from_millis(10, 5);
        assert_eq!(
            policy.windows_for(7),
            vec![Window::new(0, 10), Window::new(5, 15)]
        );
        assert_eq!(
            policy.windows_for(10),
            vec![Window::new(5, 15), Window::new(10, 20)]
        );
        assert_eq!(
            policy.windows_for(4),
            vec![Window::new(-5, 5), Window::new(0, 10)]
        );
    }

    #[test]
    fn test_uneven_hop_assignment() {
        let policy = WindowPolicy::from_millis(10, 3);
        let windows = policy.windows_for(11);
        assert!(windows.iter().all(|w| w.contains(11)));
        assert_eq!(
            windows,
            vec![Window::new(3, 13), Window::new(6, 16), Window::new(9, 19)]
        );
    }

    #[test]
    fn test_negative_timestamps() {
        let policy = WindowPolicy::from_millis(10, 10);
        assert_eq!(policy.windows_for(-1), vec![Window::new(-10, 0)]);
    }

    #[test]
    fn test_validate() {
        assert!(WindowPolicy::from_millis(10, 5).validate().is_ok());
        assert_eq!(
            WindowPolicy::from_millis(5, 10).validate(),
            Err(ConfigError::AdvanceExceedsSize {
                size: 5,
                advance: 10
            })
        );
        assert_eq!(
            WindowPolicy::from_millis(0, 0).validate(),
            Err(ConfigError::NonPositiveWindowSize(0))
        );
        assert_eq!(
            WindowPolicy::from_millis(10, 0).validate(),
            Err(ConfigError::NonPositiveAdvance(0))
        );
        assert_eq!(
            WindowPolicy::from_millis(10, 5)
                .with_grace_millis(-1)
                .validate(),
            Err(ConfigError::NegativeGrace(-1))
        );
    }

    #[test]
    fn test_final_hop_boundary() {
        let policy = WindowPolicy::from_millis(10, 5);
        let window = Window::new(0, 10);
        assert!(!policy.is_final_hop(&window, 4));
        assert!(policy.is_final_hop(&window, 5));
        assert!(policy.is_final_hop(&window, 9));
    }

    #[test]
    fn test_open_until_grace_elapses() {
        let policy = WindowPolicy::from_millis(10, 10).with_grace_millis(5);
        let window = Window::new(0, 10);
        assert!(policy.is_open(&window, 14));
        assert!(!policy.is_open(&window, 15));
    }

    #[test]
    fn test_local_date_time_uses_zone() {
        let policy = WindowPolicy::from_millis(1, 1).with_zone(chrono_tz::Europe::Paris);
        // 2024-01-15T12:00:00Z is 13:00 in Paris (CET).
        let local = policy.local_date_time(1_705_320_000_000).unwrap();
        assert_eq!(local.hour(), 13);
        assert_eq!(local.day(), 15);
    }

    #[test]
    fn test_out_of_range_timestamps_have_no_local_time() {
        let policy = WindowPolicy::from_millis(10, 10);
        assert!(policy.local_date_time(i64::MAX - 3).is_none());
        assert!(policy.local_date_time(i64::MIN).is_none());
        assert!(policy.local_date_time(MAX_TIMESTAMP_MILLIS + 1).is_none());
        assert!(policy.local_date_time(MAX_TIMESTAMP_MILLIS).is_some());
        assert!(policy.local_date_time(-MAX_TIMESTAMP_MILLIS).is_some());
    }

    #[test]
    fn test_window_bounds_at_range_edges() {
        let policy = WindowPolicy::from_millis(MAX_TIMESTAMP_MILLIS, 1 << 40);
        assert!(policy.validate().is_ok());
        let high = policy.windows_for(MAX_TIMESTAMP_MILLIS);
        assert!(high.iter().all(|w| w.contains(MAX_TIMESTAMP_MILLIS)));
        let low = policy.windows_for(-MAX_TIMESTAMP_MILLIS);
        assert!(low.iter().all(|w| w.contains(-MAX_TIMESTAMP_MILLIS)));
        assert_eq!(high.len(), 1 << 12);
    }

    #[test]
    fn test_rejects_oversized_policies() {
        assert_eq!(
            WindowPolicy::from_millis(MAX_TIMESTAMP_MILLIS + 1, 10).validate(),
            Err(ConfigError::WindowTooLarge(MAX_TIMESTAMP_MILLIS + 1))
        );
        assert_eq!(
            WindowPolicy::tumbling(Duration::MAX).validate(),
            Err(ConfigError::WindowTooLarge(i64::MAX))
        );
        assert_eq!(
            WindowPolicy::from_millis(10, 10)
                .with_grace_millis(i64::MAX)
                .validate(),
            Err(ConfigError::GraceTooLarge(i64::MAX))
        );
    }
}
