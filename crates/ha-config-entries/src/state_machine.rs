//! Config entry lifecycle transitions
//!
//! ```text
//! NotLoaded → SetupInProgress → Loaded
//!                            ↘ SetupError → SetupInProgress
//!                            ↘ SetupRetry → SetupInProgress
//!                            ↘ MigrationError (terminal)
//!
//! Loaded/SetupError/SetupRetry → UnloadInProgress → NotLoaded
//!                                                 ↘ FailedUnload (terminal)
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::entry::ConfigEntryState;

/// Upper bound on the backoff exponent
const MAX_RETRY_EXPONENT: u32 = 4;

/// Base delay multiplied by the backoff factor, in seconds
const RETRY_BASE_SECS: u64 = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid state transition from {from:?} to {to:?}: {reason}")]
pub struct InvalidTransition {
    pub from: ConfigEntryState,
    pub to: ConfigEntryState,
    pub reason: &'static str,
}

impl ConfigEntryState {
    /// Validate a transition, returning the target state on success
    pub fn try_transition(
        self,
        to: ConfigEntryState,
    ) -> Result<ConfigEntryState, InvalidTransition> {
        use ConfigEntryState::*;

        let valid = matches!(
            (self, to),
            (NotLoaded, SetupInProgress)
                | (SetupInProgress, Loaded | SetupError | SetupRetry | MigrationError)
                | (SetupError | SetupRetry, SetupInProgress | UnloadInProgress)
                | (Loaded, UnloadInProgress)
                | (UnloadInProgress, NotLoaded | FailedUnload)
        );

        if valid {
            return Ok(to);
        }

        let reason = match (self, to) {
            (MigrationError | FailedUnload, _) => "state is terminal",
            (NotLoaded, _) => "setup has not started",
            (Loaded, SetupInProgress) => "already loaded, unload first",
            (Loaded, _) => "loaded entries must unload first",
            (SetupInProgress, _) => "setup still in progress",
            (UnloadInProgress, _) => "unload still in progress",
            _ => "transition not allowed",
        };

        Err(InvalidTransition {
            from: self,
            to,
            reason,
        })
    }

    pub fn can_transition_to(self, to: ConfigEntryState) -> bool {
        self.try_transition(to).is_ok()
    }
}

/// Delay before the next setup attempt of a "not ready" entry
///
/// 5s, 10s, 20s, 40s, then 80s for every later try, plus up to 100ms jitter.
pub fn calculate_retry_delay(tries: u32) -> Duration {
    let base = Duration::from_secs(RETRY_BASE_SECS * 2_u64.pow(tries.min(MAX_RETRY_EXPONENT)));
    let jitter = Duration::from_millis(rand::random::<u64>() % 100);
    base + jitter
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConfigEntryState::*;

    #[test]
    fn test_setup_paths() {
        assert!(NotLoaded.can_transition_to(SetupInProgress));
        for outcome in [Loaded, SetupError, SetupRetry, MigrationError] {
            assert!(SetupInProgress.can_transition_to(outcome), "{outcome:?}");
        }
        assert!(SetupRetry.can_transition_to(SetupInProgress));
        assert!(SetupError.can_transition_to(SetupInProgress));
    }

    #[test]
    fn test_unload_paths() {
        for from in [Loaded, SetupError, SetupRetry] {
            assert!(from.can_transition_to(UnloadInProgress), "{from:?}");
        }
        assert!(UnloadInProgress.can_transition_to(NotLoaded));
        assert!(UnloadInProgress.can_transition_to(FailedUnload));
    }

    #[test]
    fn test_shortcuts_rejected() {
        let err = NotLoaded.try_transition(Loaded).unwrap_err();
        assert_eq!(err.from, NotLoaded);
        assert_eq!(err.to, Loaded);

        assert!(!Loaded.can_transition_to(NotLoaded));
        assert!(!Loaded.can_transition_to(SetupInProgress));
        assert!(!SetupInProgress.can_transition_to(NotLoaded));
        assert!(!UnloadInProgress.can_transition_to(Loaded));
    }

    #[test]
    fn test_terminal_states() {
        for to in [NotLoaded, SetupInProgress, Loaded, UnloadInProgress] {
            assert!(!MigrationError.can_transition_to(to));
            assert!(!FailedUnload.can_transition_to(to));
        }
        let err = FailedUnload.try_transition(NotLoaded).unwrap_err();
        assert!(err.to_string().contains("terminal"));
    }

    #[test]
    fn test_retry_delay_backoff() {
        let expected = [5, 10, 20, 40, 80, 80, 80];
        for (tries, secs) in expected.iter().enumerate() {
            let delay = calculate_retry_delay(tries as u32);
            assert!(delay >= Duration::from_secs(*secs));
            assert!(delay < Duration::from_secs(*secs) + Duration::from_millis(100));
        }
    }
}
