//! Failure-threshold hysteresis.
//!
//! Turns a stream of per-probe pass/fail results into a debounced
//! `up`/`down` state. The decision is a pure function of the stored state,
//! the stored failure count, and the latest result, so it can run against
//! whatever snapshot the store returns.

use uptime_state::MonitorState;

/// Consecutive failing probes required before a monitor is marked down.
pub const FAILURE_THRESHOLD: u32 = 3;

/// New state and failure count after one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: MonitorState,
    pub consecutive_failures: u32,
}

impl Transition {
    /// Whether this transition is the edge into `down` from any other state.
    pub fn is_down_edge(&self, previous: MonitorState) -> bool {
        self.state == MonitorState::Down && previous != MonitorState::Down
    }
}

/// Compute the next state from the current one and a probe result.
///
/// A success always yields `up` with zero failures. A failure increments
/// the count and yields `down` once the count reaches [`FAILURE_THRESHOLD`];
/// below that the current state is held as-is.
pub fn next_state(current: MonitorState, consecutive_failures: u32, is_up: bool) -> Transition {
    if is_up {
        return Transition {
            state: MonitorState::Up,
            consecutive_failures: 0,
        };
    }

    let failures = consecutive_failures.saturating_add(1);
    let state = if failures >= FAILURE_THRESHOLD {
        MonitorState::Down
    } else {
        current
    };
    Transition {
        state,
        consecutive_failures: failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MonitorState::*;

    /// Feed a sequence of results from the initial state, collecting each step.
    fn run(results: &[bool]) -> Vec<Transition> {
        let mut state = Unknown;
        let mut failures = 0;
        results
            .iter()
            .map(|&is_up| {
                let t = next_state(state, failures, is_up);
                state = t.state;
                failures = t.consecutive_failures;
                t
            })
            .collect()
    }

    /// Every result sequence of the given length.
    fn all_sequences(len: usize) -> impl Iterator<Item = Vec<bool>> {
        (0..1u32 << len).map(move |bits| (0..len).map(|i| bits & (1 << i) != 0).collect())
    }

    #[test]
    fn success_resets_from_any_state() {
        for state in [Unknown, Up, Down] {
            for failures in [0, 1, 2, 3, 50] {
                let t = next_state(state, failures, true);
                assert_eq!(t.state, Up);
                assert_eq!(t.consecutive_failures, 0);
            }
        }
    }

    #[test]
    fn first_failure_holds_unknown() {
        let t = next_state(Unknown, 0, false);
        assert_eq!(t.state, Unknown);
        assert_eq!(t.consecutive_failures, 1);
    }

    #[test]
    fn stays_up_under_threshold() {
        let steps = run(&[true, false, false]);
        assert_eq!(steps[2].state, Up);
        assert_eq!(steps[2].consecutive_failures, 2);
    }

    #[test]
    fn goes_down_at_threshold() {
        let steps = run(&[true, false, false, false]);
        assert_eq!(steps[3].state, Down);
        assert_eq!(steps[3].consecutive_failures, 3);
    }

    #[test]
    fn failure_below_threshold_does_not_clear_down() {
        // Down with a reset count can only happen via an external edit;
        // a lone failure still must not move it.
        let t = next_state(Down, 0, false);
        assert_eq!(t.state, Down);
        assert_eq!(t.consecutive_failures, 1);
    }

    #[test]
    fn down_edge_only_on_entry() {
        let steps = run(&[true, false, false, false, false, true]);
        let mut previous = Unknown;
        let edges: Vec<bool> = steps
            .iter()
            .map(|t| {
                let edge = t.is_down_edge(previous);
                previous = t.state;
                edge
            })
            .collect();
        assert_eq!(edges, [false, false, false, true, false, false]);
    }

    #[test]
    fn failure_count_saturates() {
        let t = next_state(Down, u32::MAX, false);
        assert_eq!(t.consecutive_failures, u32::MAX);
        assert_eq!(t.state, Down);
    }

    #[test]
    fn down_iff_threshold_reached_for_all_sequences() {
        for seq in all_sequences(10) {
            let steps = run(&seq);
            let mut run_length = 0;
            let mut previous = Unknown;
            for (is_up, t) in seq.iter().zip(&steps) {
                run_length = if *is_up { 0 } else { run_length + 1 };
                assert_eq!(t.consecutive_failures, run_length, "{seq:?}");

                if run_length >= FAILURE_THRESHOLD {
                    assert_eq!(t.state, Down, "{seq:?}");
                } else if *is_up {
                    assert_eq!(t.state, Up, "{seq:?}");
                } else {
                    assert_eq!(t.state, previous, "{seq:?}");
                }
                // Entering down always happens exactly at the threshold.
                if t.is_down_edge(previous) {
                    assert_eq!(t.consecutive_failures, FAILURE_THRESHOLD, "{seq:?}");
                }
                previous = t.state;
            }
        }
    }

    #[test]
    fn alternating_failures_never_go_down() {
        let steps = run(&[false, false, true, false, false]);
        let failures: Vec<u32> = steps.iter().map(|t| t.consecutive_failures).collect();
        assert_eq!(failures, [1, 2, 0, 1, 2]);
        assert!(steps.iter().all(|t| t.state != Down));
    }
}
