//! Throttled command dispatch.
//!
//! Each frame's recognition results collapse into at most one `CommandClass`.
//! A class is transmitted only when its cooldown has elapsed since it was
//! last transmitted; classes cool down independently. The dispatcher makes
//! decisions only; the control loop performs the I/O.

use serde::Deserialize;
use std::time::{Duration, Instant};

use crate::faces::DetectedFace;

/// Default spacing between two transmissions of the same class.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(8);

/// Actuator command derived from one frame's faces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandClass {
    /// At least one face matched an enrolled identity.
    Pass,
    /// Faces were present but none matched.
    Failed,
}

impl CommandClass {
    pub const ALL: [CommandClass; 2] = [CommandClass::Pass, CommandClass::Failed];

    /// Token understood by the gate firmware.
    pub fn wire_token(self) -> &'static str {
        match self {
            CommandClass::Pass => "pass",
            CommandClass::Failed => "failed",
        }
    }

    /// Bytes written to the serial line: token plus newline.
    pub fn wire_bytes(self) -> Vec<u8> {
        format!("{}\n", self.wire_token()).into_bytes()
    }

    /// Candidate class for a frame. Any match wins over unmatched faces;
    /// no faces means no candidate.
    pub fn from_faces(faces: &[DetectedFace]) -> Option<CommandClass> {
        if faces.is_empty() {
            None
        } else if faces.iter().any(|face| face.verdict.is_match()) {
            Some(CommandClass::Pass)
        } else {
            Some(CommandClass::Failed)
        }
    }

    fn index(self) -> usize {
        match self {
            CommandClass::Pass => 0,
            CommandClass::Failed => 1,
        }
    }
}

impl std::fmt::Display for CommandClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_token())
    }
}

/// What happens to the cooldown clock when a transmission fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum SendFailurePolicy {
    /// Keep the class cooling as if the send succeeded, so a failing channel
    /// is not hammered once per frame.
    #[default]
    #[serde(rename = "advance")]
    AdvanceCooldown,
    /// Restore the previous timestamp so the next frame may retry at once.
    #[serde(rename = "retry")]
    RetryImmediately,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottlePhase {
    Idle,
    Cooling { remaining: Duration },
}

/// Last transmission time per class. Timestamps only move forward.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ThrottleState {
    last_sent: [Option<Instant>; 2],
}

impl ThrottleState {
    pub fn last_sent(&self, class: CommandClass) -> Option<Instant> {
        self.last_sent[class.index()]
    }

    pub fn phase(&self, class: CommandClass, now: Instant, cooldown: Duration) -> ThrottlePhase {
        let Some(last) = self.last_sent(class) else {
            return ThrottlePhase::Idle;
        };
        // A `now` earlier than the last send is treated as still cooling.
        let elapsed = now.checked_duration_since(last).unwrap_or(Duration::ZERO);
        if elapsed >= cooldown {
            ThrottlePhase::Idle
        } else {
            ThrottlePhase::Cooling {
                remaining: cooldown - elapsed,
            }
        }
    }

    fn record(&mut self, class: CommandClass, now: Instant) {
        let slot = &mut self.last_sent[class.index()];
        *slot = Some(slot.map_or(now, |last| last.max(now)));
    }

    fn restore(&mut self, class: CommandClass, previous: Option<Instant>) {
        self.last_sent[class.index()] = previous;
    }
}

/// Counters kept by the dispatcher.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub decisions: u64,
    pub transmitted: u64,
    pub suppressed: u64,
    pub rolled_back: u64,
}

pub struct Dispatcher {
    state: ThrottleState,
    cooldown: Duration,
    policy: SendFailurePolicy,
    /// Class and its prior timestamp from the last transmit decision, kept
    /// until the next decision so a failed send can be rolled back.
    last_transition: Option<(CommandClass, Option<Instant>)>,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(cooldown: Duration, policy: SendFailurePolicy) -> Self {
        Self {
            state: ThrottleState::default(),
            cooldown,
            policy,
            last_transition: None,
            stats: DispatchStats::default(),
        }
    }

    /// Decide whether this frame's faces produce a transmission.
    ///
    /// Returns the class to send, having already moved it to cooling. An
    /// empty face set neither decides nor touches the throttle state.
    pub fn decide(&mut self, faces: &[DetectedFace], now: Instant) -> Option<CommandClass> {
        let class = CommandClass::from_faces(faces)?;
        self.stats.decisions += 1;
        self.last_transition = None;

        match self.state.phase(class, now, self.cooldown) {
            ThrottlePhase::Idle => {
                let previous = self.state.last_sent(class);
                self.state.record(class, now);
                self.last_transition = Some((class, previous));
                self.stats.transmitted += 1;
                Some(class)
            }
            ThrottlePhase::Cooling { remaining } => {
                log::debug!("{} suppressed, cooling for {:?}", class, remaining);
                self.stats.suppressed += 1;
                None
            }
        }
    }

    /// Report that sending `class` failed. Under `RetryImmediately` this
    /// undoes the most recent transition for that class; returns whether
    /// anything was rolled back.
    pub fn report_send_failure(&mut self, class: CommandClass) -> bool {
        if self.policy != SendFailurePolicy::RetryImmediately {
            return false;
        }
        match self.last_transition.take() {
            Some((pending, previous)) if pending == class => {
                self.state.restore(class, previous);
                self.stats.rolled_back += 1;
                true
            }
            other => {
                self.last_transition = other;
                false
            }
        }
    }

    pub fn phase(&self, class: CommandClass, now: Instant) -> ThrottlePhase {
        self.state.phase(class, now, self.cooldown)
    }

    pub fn state(&self) -> &ThrottleState {
        &self.state
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn policy(&self) -> SendFailurePolicy {
        self.policy
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats.clone()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN, SendFailurePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faces::FaceRegion;

    fn matched() -> DetectedFace {
        DetectedFace::matched(FaceRegion::new(0, 0, 10, 10), "alice")
    }

    fn unmatched() -> DetectedFace {
        DetectedFace::unmatched(FaceRegion::new(20, 0, 30, 10))
    }

    fn at(base: Instant, secs: u64) -> Instant {
        base + Duration::from_secs(secs)
    }

    #[test]
    fn wire_format() {
        assert_eq!(CommandClass::Pass.wire_bytes(), b"pass\n");
        assert_eq!(CommandClass::Failed.wire_bytes(), b"failed\n");
    }

    #[test]
    fn any_match_takes_precedence() {
        assert_eq!(
            CommandClass::from_faces(&[unmatched(), matched()]),
            Some(CommandClass::Pass)
        );
        assert_eq!(
            CommandClass::from_faces(&[unmatched(), unmatched()]),
            Some(CommandClass::Failed)
        );
        assert_eq!(CommandClass::from_faces(&[]), None);
    }

    #[test]
    fn end_to_end_cooldown_scenario() {
        let t0 = Instant::now();
        let mut dispatcher = Dispatcher::new(Duration::from_secs(8), SendFailurePolicy::default());

        assert_eq!(dispatcher.decide(&[matched()], t0), Some(CommandClass::Pass));
        assert!(matches!(
            dispatcher.phase(CommandClass::Pass, at(t0, 5)),
            ThrottlePhase::Cooling { .. }
        ));
        assert_eq!(dispatcher.decide(&[matched()], at(t0, 5)), None);
        assert_eq!(
            dispatcher.decide(&[unmatched()], at(t0, 9)),
            Some(CommandClass::Failed)
        );
        assert_eq!(dispatcher.phase(CommandClass::Pass, at(t0, 9)), ThrottlePhase::Idle);
    }

    #[test]
    fn cooldown_boundary_is_inclusive() {
        let t0 = Instant::now();
        let mut dispatcher = Dispatcher::new(Duration::from_secs(8), SendFailurePolicy::default());
        assert!(dispatcher.decide(&[matched()], t0).is_some());
        assert!(dispatcher.decide(&[matched()], at(t0, 7)).is_none());
        assert!(dispatcher.decide(&[matched()], at(t0, 8)).is_some());
    }

    #[test]
    fn transmissions_are_spaced_by_cooldown() {
        let t0 = Instant::now();
        let cooldown = Duration::from_millis(8000);
        let mut dispatcher = Dispatcher::new(cooldown, SendFailurePolicy::default());
        let mut sent = Vec::new();
        for step in 0..200u64 {
            let now = t0 + Duration::from_millis(step * 370);
            if dispatcher.decide(&[matched()], now).is_some() {
                sent.push(now);
            }
        }
        assert!(sent.len() > 1);
        for pair in sent.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= cooldown);
        }
    }

    #[test]
    fn empty_frame_does_not_touch_state() {
        let t0 = Instant::now();
        let mut dispatcher = Dispatcher::default();
        let before = dispatcher.state().clone();
        assert_eq!(dispatcher.decide(&[], t0), None);
        assert_eq!(dispatcher.state(), &before);
        assert_eq!(dispatcher.stats().decisions, 0);
    }

    #[test]
    fn earlier_timestamp_counts_as_cooling() {
        let t0 = Instant::now();
        let mut dispatcher = Dispatcher::default();
        assert!(dispatcher.decide(&[matched()], at(t0, 100)).is_some());
        assert!(dispatcher.decide(&[matched()], at(t0, 50)).is_none());
        assert_eq!(dispatcher.state().last_sent(CommandClass::Pass), Some(at(t0, 100)));
    }

    #[test]
    fn advance_policy_keeps_cooling_after_failure() {
        let t0 = Instant::now();
        let mut dispatcher = Dispatcher::new(Duration::from_secs(8), SendFailurePolicy::AdvanceCooldown);
        assert!(dispatcher.decide(&[matched()], t0).is_some());
        assert!(!dispatcher.report_send_failure(CommandClass::Pass));
        assert!(dispatcher.decide(&[matched()], at(t0, 1)).is_none());
    }

    #[test]
    fn retry_policy_restores_previous_timestamp() {
        let t0 = Instant::now();
        let mut dispatcher = Dispatcher::new(Duration::from_secs(8), SendFailurePolicy::RetryImmediately);
        assert!(dispatcher.decide(&[matched()], t0).is_some());
        assert!(dispatcher.decide(&[matched()], at(t0, 10)).is_some());
        assert!(dispatcher.report_send_failure(CommandClass::Pass));
        assert_eq!(dispatcher.state().last_sent(CommandClass::Pass), Some(t0));

        assert!(dispatcher.decide(&[matched()], at(t0, 11)).is_some());
        assert_eq!(dispatcher.stats().rolled_back, 1);
    }

    #[test]
    fn retry_policy_ignores_stale_failure_reports() {
        let t0 = Instant::now();
        let mut dispatcher = Dispatcher::new(Duration::from_secs(8), SendFailurePolicy::RetryImmediately);
        assert!(dispatcher.decide(&[matched()], t0).is_some());
        assert!(dispatcher.decide(&[matched()], at(t0, 1)).is_none());
        assert!(!dispatcher.report_send_failure(CommandClass::Pass));
        assert!(!dispatcher.report_send_failure(CommandClass::Failed));
    }
}
