//! Task state machine (§4.6). A closed table of permitted transitions; every dispatch site
//! consults this instead of hand-rolling a match.

use hub_protocol::TaskStatus;

pub fn is_permitted(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Pending, AwaitingApproval)
            | (Pending, Approved)
            | (AwaitingApproval, Approved)
            | (AwaitingApproval, Rejected)
            | (Approved, Running)
            | (Approved, Cancelled)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn approval_branches() {
        assert!(is_permitted(AwaitingApproval, Approved));
        assert!(is_permitted(AwaitingApproval, Rejected));
        assert!(!is_permitted(AwaitingApproval, Running));
    }

    #[test]
    fn auto_approval_skips_awaiting_approval() {
        assert!(is_permitted(Pending, Approved));
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for terminal in [Completed, Failed, Rejected, Cancelled] {
            for to in [Pending, AwaitingApproval, Approved, Running, Completed, Failed, Rejected, Cancelled] {
                assert!(!is_permitted(terminal, to), "{terminal:?} -> {to:?} should be rejected");
            }
        }
    }

    #[test]
    fn cancel_before_run_is_allowed_from_approved() {
        assert!(is_permitted(Approved, Cancelled));
    }
}
