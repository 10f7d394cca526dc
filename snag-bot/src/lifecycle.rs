//! Defect status transitions
//!
//! `fixed` is terminal. Entering `fixed` is guarded by the presence of at
//! least one `after` photo. `awaiting_review` is reachable from storage but no
//! conversational flow moves a defect into it.

use snag_common::db::DefectStatus;
use snag_common::{Error, FailureReason, Result};

/// Statuses reachable from `from` in one step
pub fn allowed_targets(from: DefectStatus) -> &'static [DefectStatus] {
    use DefectStatus::*;
    match from {
        Discovered => &[OnControl, AwaitingReview, Fixed],
        OnControl => &[Discovered, AwaitingReview, Fixed],
        AwaitingReview => &[Discovered, OnControl, Fixed],
        Fixed => &[],
    }
}

pub fn can_transition(from: DefectStatus, to: DefectStatus) -> bool {
    allowed_targets(from).contains(&to)
}

/// Validate a transition against the table and the close guard
pub fn check_transition(from: DefectStatus, to: DefectStatus, after_photos: i64) -> Result<()> {
    if !can_transition(from, to) {
        return Err(Error::Rejected(FailureReason::InvalidTransition));
    }
    if to == DefectStatus::Fixed && after_photos < 1 {
        return Err(Error::Rejected(FailureReason::NoAfterPhotos));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use DefectStatus::*;

    #[test]
    fn test_fixed_is_terminal() {
        for to in DefectStatus::ALL {
            assert!(!can_transition(Fixed, *to));
        }
    }

    #[test]
    fn test_same_state_is_rejected() {
        for status in DefectStatus::ALL {
            assert!(!can_transition(*status, *status));
        }
    }

    #[test]
    fn test_close_guard() {
        assert_eq!(
            check_transition(OnControl, Fixed, 0).unwrap_err().reason(),
            Some(FailureReason::NoAfterPhotos)
        );
        assert!(check_transition(OnControl, Fixed, 1).is_ok());
        assert!(check_transition(Discovered, Fixed, 2).is_ok());
    }

    #[test]
    fn test_control_and_revert() {
        assert!(check_transition(Discovered, OnControl, 0).is_ok());
        assert!(check_transition(OnControl, Discovered, 0).is_ok());
        assert_eq!(
            check_transition(Fixed, Discovered, 1).unwrap_err().reason(),
            Some(FailureReason::InvalidTransition)
        );
    }
}
