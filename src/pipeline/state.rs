//! Hot-reload state management

/// Reload state machine
///
/// `Idle → ChangeDetected → Validating → {Swapped | Rejected} → Idle`.
/// `Swapped` and `Rejected` are transient; the controller always settles
/// back in `Idle` once a reload attempt is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadState {
    /// Waiting for a configuration change
    Idle,

    /// A change signal passed the debounce window
    ChangeDetected,

    /// Loading the configuration and building the new pipeline
    Validating,

    /// The new executor is active; the old one awaits release
    Swapped,

    /// The configuration was refused; the old executor keeps running
    Rejected,
}

impl ReloadState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &ReloadState) -> bool {
        use ReloadState::*;

        match (self, target) {
            (Idle, ChangeDetected) => true,
            (ChangeDetected, Validating) => true,
            (Validating, Swapped) => true,
            (Validating, Rejected) => true,
            (Swapped, Idle) => true,
            (Rejected, Idle) => true,

            // Self-transitions
            (a, b) if a == b => true,

            _ => false,
        }
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            ReloadState::Idle => "Idle",
            ReloadState::ChangeDetected => "ChangeDetected",
            ReloadState::Validating => "Validating",
            ReloadState::Swapped => "Swapped",
            ReloadState::Rejected => "Rejected",
        }
    }
}

impl std::fmt::Display for ReloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
