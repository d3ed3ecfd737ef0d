//! Decides whether a company's job is genuinely active.
//!
//! In-process state is authoritative when this process owns the job. Disk
//! markers let any process, including a restarted one, notice a job whose
//! heartbeat or total age has gone stale. Stale jobs are simply reported as
//! not running; nothing cleans their markers up.

use std::time::{Duration, SystemTime};

use crate::markers::MarkerSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessThresholds {
    pub heartbeat_stale: Duration,
    pub max_run: Duration,
}

impl Default for LivenessThresholds {
    fn default() -> Self {
        Self {
            heartbeat_stale: Duration::from_secs(60),
            max_run: Duration::from_secs(3 * 60 * 60),
        }
    }
}

fn age(now: SystemTime, then: SystemTime) -> Duration {
    // A timestamp from the future counts as age zero.
    now.duration_since(then).unwrap_or_default()
}

/// Disk-side liveness: running marker present, no terminal marker, a fresh
/// heartbeat and a run that has not exceeded its maximum age.
pub fn disk_running(snapshot: &MarkerSnapshot, now: SystemTime, thresholds: LivenessThresholds) -> bool {
    let Some(running) = snapshot.running else {
        return false;
    };
    if snapshot.done.is_some() || snapshot.aborted.is_some() {
        return false;
    }
    let Some(heartbeat) = snapshot.heartbeat else {
        return false;
    };
    age(now, heartbeat) <= thresholds.heartbeat_stale && age(now, running) <= thresholds.max_run
}

/// Both halves of the liveness decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Liveness {
    pub memory: bool,
    pub disk: bool,
}

impl Liveness {
    pub fn evaluate(
        memory: bool,
        snapshot: &MarkerSnapshot,
        now: SystemTime,
        thresholds: LivenessThresholds,
    ) -> Self {
        Self {
            memory,
            disk: disk_running(snapshot, now, thresholds),
        }
    }

    pub fn is_running(&self) -> bool {
        self.memory || self.disk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn ago(secs: u64) -> Option<SystemTime> {
        Some(now() - Duration::from_secs(secs))
    }

    fn live_snapshot() -> MarkerSnapshot {
        MarkerSnapshot {
            running: ago(120),
            heartbeat: ago(5),
            ..Default::default()
        }
    }

    #[test]
    fn fresh_markers_are_running() {
        assert!(disk_running(&live_snapshot(), now(), LivenessThresholds::default()));
    }

    #[test]
    fn no_running_marker_is_idle() {
        let snap = MarkerSnapshot {
            heartbeat: ago(1),
            ..Default::default()
        };
        assert!(!disk_running(&snap, now(), LivenessThresholds::default()));
    }

    #[test]
    fn terminal_marker_overrides_running() {
        let mut snap = live_snapshot();
        snap.done = ago(1);
        assert!(!disk_running(&snap, now(), LivenessThresholds::default()));

        let mut snap = live_snapshot();
        snap.aborted = ago(1);
        assert!(!disk_running(&snap, now(), LivenessThresholds::default()));
    }

    #[test]
    fn stale_heartbeat_is_idle() {
        let mut snap = live_snapshot();
        snap.heartbeat = ago(61);
        assert!(!disk_running(&snap, now(), LivenessThresholds::default()));

        snap.heartbeat = ago(60);
        assert!(disk_running(&snap, now(), LivenessThresholds::default()));
    }

    #[test]
    fn missing_heartbeat_is_idle() {
        let mut snap = live_snapshot();
        snap.heartbeat = None;
        assert!(!disk_running(&snap, now(), LivenessThresholds::default()));
    }

    #[test]
    fn run_older_than_max_is_idle_even_with_fresh_heartbeat() {
        let thresholds = LivenessThresholds::default();
        let snap = MarkerSnapshot {
            running: ago(thresholds.max_run.as_secs() + 1),
            heartbeat: ago(0),
            ..Default::default()
        };
        assert!(!disk_running(&snap, now(), thresholds));
    }

    #[test]
    fn future_timestamps_count_as_fresh() {
        let snap = MarkerSnapshot {
            running: Some(now() + Duration::from_secs(30)),
            heartbeat: Some(now() + Duration::from_secs(30)),
            ..Default::default()
        };
        assert!(disk_running(&snap, now(), LivenessThresholds::default()));
    }

    #[test]
    fn memory_or_disk() {
        let idle = MarkerSnapshot::default();
        let t = LivenessThresholds::default();
        assert!(Liveness::evaluate(true, &idle, now(), t).is_running());
        assert!(!Liveness::evaluate(false, &idle, now(), t).is_running());
        assert!(Liveness::evaluate(false, &live_snapshot(), now(), t).is_running());
    }
}
