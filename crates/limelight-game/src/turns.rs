use limelight_types::models::TurnStatus;

/// Who is driving a turn transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Manager,
    /// The participant the open turn belongs to.
    Picked,
}

/// Effect a terminal transition has on the participant's stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatEffect {
    /// successful_rounds += 1, consecutive_skips = 0.
    Success,
    /// consecutive_skips += 1.
    Skip,
    None,
}

/// The full transition table. Everything not listed is invalid; terminal
/// statuses have no outgoing edges at all.
///
/// A manager starts a pending turn and force-resolves a running one; the
/// picked participant accepts or rejects their own turn; either may skip
/// while the turn is still pending.
pub fn allowed(from: TurnStatus, to: TurnStatus, actor: Actor) -> bool {
    use TurnStatus::*;
    match (from, to) {
        (Pending, InProgress) => actor == Actor::Manager,
        (Pending, Skipped) => true,
        (InProgress, Accepted) | (InProgress, Rejected) => actor == Actor::Picked,
        (InProgress, Skipped)
        | (InProgress, Completed)
        | (InProgress, Failed)
        | (Accepted, Completed)
        | (Accepted, Failed) => actor == Actor::Manager,
        _ => false,
    }
}

/// Stat bookkeeping per arrival status. REJECTED counts as a skip: the
/// turn ended without a performance, which is exactly what the skip
/// counter meters.
pub fn stat_effect(to: TurnStatus) -> StatEffect {
    match to {
        TurnStatus::Completed => StatEffect::Success,
        TurnStatus::Skipped | TurnStatus::Rejected => StatEffect::Skip,
        _ => StatEffect::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TurnStatus::*;

    #[test]
    fn only_a_manager_starts_a_pending_turn() {
        assert!(allowed(Pending, InProgress, Actor::Manager));
        assert!(!allowed(Pending, InProgress, Actor::Picked));
    }

    #[test]
    fn either_side_skips_a_pending_turn() {
        assert!(allowed(Pending, Skipped, Actor::Manager));
        assert!(allowed(Pending, Skipped, Actor::Picked));
    }

    #[test]
    fn only_the_picked_user_accepts_or_rejects() {
        for to in [Accepted, Rejected] {
            assert!(allowed(InProgress, to, Actor::Picked));
            assert!(!allowed(InProgress, to, Actor::Manager));
        }
    }

    #[test]
    fn only_managers_force_resolve_a_running_turn() {
        for to in [Skipped, Completed, Failed] {
            assert!(allowed(InProgress, to, Actor::Manager));
            assert!(!allowed(InProgress, to, Actor::Picked));
        }
    }

    #[test]
    fn accepted_turns_only_complete_or_fail() {
        assert!(allowed(Accepted, Completed, Actor::Manager));
        assert!(allowed(Accepted, Failed, Actor::Manager));
        assert!(!allowed(Accepted, Completed, Actor::Picked));
        for to in [Pending, InProgress, Skipped, Rejected] {
            assert!(!allowed(Accepted, to, Actor::Manager));
        }
    }

    #[test]
    fn terminal_statuses_are_frozen() {
        for from in [Completed, Failed, Skipped, Rejected] {
            for to in [
                Pending, InProgress, Accepted, Completed, Failed, Skipped, Rejected,
            ] {
                assert!(!allowed(from, to, Actor::Manager));
                assert!(!allowed(from, to, Actor::Picked));
            }
        }
    }

    #[test]
    fn rejected_and_skipped_both_count_as_skips() {
        assert_eq!(stat_effect(Skipped), StatEffect::Skip);
        assert_eq!(stat_effect(Rejected), StatEffect::Skip);
        assert_eq!(stat_effect(Completed), StatEffect::Success);
        assert_eq!(stat_effect(Failed), StatEffect::None);
        assert_eq!(stat_effect(Accepted), StatEffect::None);
    }
}
