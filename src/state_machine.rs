//! Queue status state machine. §4.H.
//!
//! A fixed transition table: each status names the set it may move to.
//! Anything outside that set is `InvalidStatusTransition`, carrying the
//! valid set so the caller can render a useful error.

use crate::errors::{QueueError, QueueResult};
use crate::models::QueueStatus;

fn valid_next(from: QueueStatus) -> &'static [QueueStatus] {
    use QueueStatus::*;
    match from {
        Waiting => &[Notified, NoShow],
        Notified => &[PendingVerification, Nearby, NoShow],
        PendingVerification => &[Nearby, Notified, NoShow],
        Nearby => &[InProgress, NoShow],
        InProgress => &[Completed, NoShow],
        Completed | NoShow => &[],
    }
}

/// Checks whether `from -> to` is a legal transition without mutating
/// anything; callers apply the resulting fields themselves (§4.K) and then
/// call `record_transition` on the audit log.
pub fn check_transition(from: QueueStatus, to: QueueStatus) -> QueueResult<()> {
    if valid_next(from).contains(&to) {
        Ok(())
    } else {
        Err(QueueError::InvalidStatusTransition {
            valid_statuses: valid_next(from).iter().map(|s| s.as_str().to_string()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use QueueStatus::*;

    #[test]
    fn waiting_can_move_to_notified_or_no_show() {
        assert!(check_transition(Waiting, Notified).is_ok());
        assert!(check_transition(Waiting, NoShow).is_ok());
        assert!(check_transition(Waiting, InProgress).is_err());
    }

    #[test]
    fn pending_verification_can_revert_to_notified() {
        assert!(check_transition(PendingVerification, Notified).is_ok());
    }

    #[test]
    fn terminal_states_accept_nothing() {
        assert!(check_transition(Completed, Waiting).is_err());
        assert!(check_transition(NoShow, Notified).is_err());
    }

    #[test]
    fn invalid_transition_carries_valid_set() {
        match check_transition(Waiting, Completed) {
            Err(QueueError::InvalidStatusTransition { valid_statuses }) => {
                assert_eq!(valid_statuses, vec!["notified", "no-show"]);
            }
            _ => panic!("expected InvalidStatusTransition"),
        }
    }
}
