//! Deciding when a freshly loaded page has stopped fetching resources.
//!
//! The page is probed with a small script reporting `document.readyState` and the
//! number of resource-timing entries. A page counts as settled once it reports
//! `complete` and the entry count has stayed the same for the whole idle window.

use std::time::{Duration, Instant};

/// Script evaluated in the page; yields `"<readyState>|<resource count>"`.
pub(crate) const PROBE_SCRIPT: &str =
    "document.readyState + '|' + performance.getEntriesByType('resource').length";

/// Pause between two probes.
pub(crate) const PROBE_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Probe {
    pub(crate) complete: bool,
    pub(crate) resources: u64,
}

impl Probe {
    /// Parse the string produced by [`PROBE_SCRIPT`].
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        let (state, count) = raw.split_once('|')?;
        let resources = count.trim().parse().ok()?;
        Some(Self {
            complete: state.trim() == "complete",
            resources,
        })
    }
}

/// Tracks consecutive probes until the page has been quiet for `idle_window`.
#[derive(Debug)]
pub(crate) struct SettleTracker {
    idle_window: Duration,
    last: Option<(u64, Instant)>,
}

impl SettleTracker {
    pub(crate) fn new(idle_window: Duration) -> Self {
        Self {
            idle_window,
            last: None,
        }
    }

    /// Record a probe taken at `now`; returns true once the page is settled.
    pub(crate) fn observe(&mut self, probe: Probe, now: Instant) -> bool {
        if !probe.complete {
            self.last = None;
            return false;
        }

        match self.last {
            Some((count, since)) if count == probe.resources => {
                now.duration_since(since) >= self.idle_window
            }
            _ => {
                self.last = Some((probe.resources, now));
                self.idle_window.is_zero()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(resources: u64) -> Probe {
        Probe {
            complete: true,
            resources,
        }
    }

    #[test]
    fn parses_probe_output() {
        assert_eq!(Probe::parse("complete|3"), Some(complete(3)));
        assert_eq!(
            Probe::parse("interactive|0"),
            Some(Probe {
                complete: false,
                resources: 0
            })
        );
        assert_eq!(Probe::parse("complete"), None);
        assert_eq!(Probe::parse("complete|many"), None);
    }

    #[test]
    fn settles_after_quiet_window() {
        let start = Instant::now();
        let mut tracker = SettleTracker::new(Duration::from_millis(500));

        assert!(!tracker.observe(complete(2), start));
        assert!(!tracker.observe(complete(2), start + Duration::from_millis(300)));
        assert!(tracker.observe(complete(2), start + Duration::from_millis(500)));
    }

    #[test]
    fn new_resources_restart_the_window() {
        let start = Instant::now();
        let mut tracker = SettleTracker::new(Duration::from_millis(500));

        assert!(!tracker.observe(complete(1), start));
        assert!(!tracker.observe(complete(4), start + Duration::from_millis(400)));
        assert!(!tracker.observe(complete(4), start + Duration::from_millis(800)));
        assert!(tracker.observe(complete(4), start + Duration::from_millis(900)));
    }

    #[test]
    fn incomplete_document_never_settles() {
        let start = Instant::now();
        let mut tracker = SettleTracker::new(Duration::from_millis(100));
        let loading = Probe {
            complete: false,
            resources: 0,
        };

        assert!(!tracker.observe(loading, start));
        assert!(!tracker.observe(loading, start + Duration::from_secs(5)));
        assert!(!tracker.observe(complete(0), start + Duration::from_secs(5)));
    }

    #[test]
    fn zero_window_settles_on_first_complete_probe() {
        let mut tracker = SettleTracker::new(Duration::ZERO);
        assert!(tracker.observe(complete(0), Instant::now()));
    }
}
