use crate::error::{Result, ScraperError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a promoted show.
///
/// `Pending` shows wait on source approval. `Valid` shows can be flagged or
/// invalidated, and `Reinstate` brings either back to `Valid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowStatus {
    /// Source not yet approved; not public
    Pending,
    Valid,
    /// Hidden from listings, kept for audit and reinstatement
    Flagged,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    Approve,
    Reject,
    Flag,
    Invalidate,
    Reinstate,
}

impl ModerationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationAction::Approve => "approve",
            ModerationAction::Reject => "reject",
            ModerationAction::Flag => "flag",
            ModerationAction::Invalidate => "invalidate",
            ModerationAction::Reinstate => "reinstate",
        }
    }
}

impl fmt::Display for ShowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShowStatus::Pending => "pending",
            ShowStatus::Valid => "valid",
            ShowStatus::Flagged => "flagged",
            ShowStatus::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

impl ShowStatus {
    /// Guarded transition; anything not in the table is an error.
    pub fn apply(self, action: ModerationAction) -> Result<ShowStatus> {
        use ModerationAction::*;
        use ShowStatus::*;
        match (self, action) {
            (Pending, Approve) => Ok(Valid),
            (Pending, Reject) => Ok(Invalid),
            (Valid, Flag) => Ok(Flagged),
            (Valid, Invalidate) | (Flagged, Invalidate) => Ok(Invalid),
            (Flagged, Reinstate) | (Invalid, Reinstate) => Ok(Valid),
            (from, action) => Err(ScraperError::IllegalTransition {
                from: from.to_string(),
                action: action.as_str().to_string(),
            }),
        }
    }

    pub fn can_apply(self, action: ModerationAction) -> bool {
        self.apply(action).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let s = ShowStatus::Pending.apply(ModerationAction::Approve).unwrap();
        assert_eq!(s, ShowStatus::Valid);
        let s = s.apply(ModerationAction::Flag).unwrap();
        assert_eq!(s, ShowStatus::Flagged);
        assert_eq!(s.apply(ModerationAction::Reinstate).unwrap(), ShowStatus::Valid);
    }

    #[test]
    fn test_pending_cannot_be_flagged_or_reinstated() {
        assert!(matches!(
            ShowStatus::Pending.apply(ModerationAction::Flag),
            Err(ScraperError::IllegalTransition { .. })
        ));
        assert!(!ShowStatus::Pending.can_apply(ModerationAction::Reinstate));
        assert!(!ShowStatus::Valid.can_apply(ModerationAction::Approve));
        assert!(!ShowStatus::Invalid.can_apply(ModerationAction::Flag));
    }

    #[test]
    fn test_invalid_is_reversible_only_by_reinstate() {
        let s = ShowStatus::Valid.apply(ModerationAction::Invalidate).unwrap();
        assert!(!s.can_apply(ModerationAction::Approve));
        assert_eq!(s.apply(ModerationAction::Reinstate).unwrap(), ShowStatus::Valid);
    }
}
