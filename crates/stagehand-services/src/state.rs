//! ---
//! sh_section: "02-service-lifecycle"
//! sh_subsection: "module"
//! sh_type: "source"
//! sh_scope: "code"
//! sh_description: "Lifecycle states and transition rules for supervised services."
//! sh_version: "v0.0.0-prealpha"
//! sh_owner: "tbd"
//! ---
use strum::{Display, IntoStaticStr};

/// Lifecycle state of a single service.
///
/// ```text
/// New ──► Starting ──► Running ──► Stopping ──► Terminated
///  │         └─────────────────────────►┘
///  └──► Terminated            (stopped before it was started)
/// any non-terminal state ──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum State {
    New,
    Starting,
    Running,
    Stopping,
    Terminated,
    Failed,
}

impl State {
    /// Terminated and Failed are absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Terminated | State::Failed)
    }

    /// Whether a direct move from `self` to `to` is a legal transition.
    pub fn can_transition_to(self, to: State) -> bool {
        use State::*;
        match (self, to) {
            (Terminated | Failed, _) => false,
            (_, Failed) => true,
            (New, Starting | Terminated) => true,
            (Starting, Running | Stopping) => true,
            (Running, Stopping) => true,
            (Stopping, Terminated) => true,
            _ => false,
        }
    }

    /// Stable label used for metrics and structured logs.
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::State::*;
    use super::*;

    const ALL: [State; 6] = [New, Starting, Running, Stopping, Terminated, Failed];

    #[test]
    fn terminal_states_are_absorbing() {
        for from in [Terminated, Failed] {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn every_live_state_may_fail() {
        for from in [New, Starting, Running, Stopping] {
            assert!(from.can_transition_to(Failed), "{from} -> failed");
        }
    }

    #[test]
    fn forward_path_is_allowed_and_backward_is_not() {
        assert!(New.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Terminated));

        assert!(!Running.can_transition_to(Starting));
        assert!(!Stopping.can_transition_to(Running));
        assert!(!New.can_transition_to(Running));
    }

    #[test]
    fn labels_are_snake_case() {
        assert_eq!(Terminated.as_str(), "terminated");
        assert_eq!(Starting.to_string(), "starting");
    }
}
