use std::fmt;

use serde::Serialize;

use crate::work::WorkItem;

/// Dispatcher lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// No dispatcher thread yet.
    Idle,
    /// Dispatcher running, consuming the pending queue.
    Dispatching,
    /// Queue closed; the dispatcher is finishing or abandoning what remains.
    Draining,
    /// Terminal; all resources released.
    Stopped,
}

impl SchedulerState {
    /// Whether new submissions are still accepted.
    pub fn accepts_work(self) -> bool {
        matches!(self, SchedulerState::Idle | SchedulerState::Dispatching)
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Dispatching => "dispatching",
            SchedulerState::Draining => "draining",
            SchedulerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Whether `item` may be executed synchronously on the caller's thread.
///
/// Never for a missing item or one that was queued before; otherwise only
/// when it is neither running, queued, nor pending activation.
pub fn inline_eligible(item: Option<&WorkItem>, was_previously_queued: bool) -> bool {
    let Some(item) = item else {
        return false;
    };
    if was_previously_queued {
        return false;
    }
    !item.status().is_started_or_pending()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::WorkStatus;

    fn item_with(status: WorkStatus) -> WorkItem {
        let item = WorkItem::from_fn(|| {});
        item.set_status(status);
        item
    }

    #[test]
    fn missing_item_is_never_eligible() {
        assert!(!inline_eligible(None, false));
        assert!(!inline_eligible(None, true));
    }

    #[test]
    fn previously_queued_is_never_eligible() {
        for status in [WorkStatus::Created, WorkStatus::Completed, WorkStatus::Canceled] {
            assert!(!inline_eligible(Some(&item_with(status)), true));
        }
    }

    #[test]
    fn started_or_pending_items_are_not_eligible() {
        for status in [
            WorkStatus::Running,
            WorkStatus::WaitingToRun,
            WorkStatus::WaitingForActivation,
        ] {
            assert!(!inline_eligible(Some(&item_with(status)), false), "{status}");
        }
    }

    #[test]
    fn other_statuses_are_eligible() {
        for status in [
            WorkStatus::Created,
            WorkStatus::Completed,
            WorkStatus::Faulted,
            WorkStatus::Canceled,
        ] {
            assert!(inline_eligible(Some(&item_with(status)), false), "{status}");
        }
    }

    #[test]
    fn only_idle_and_dispatching_accept_work() {
        assert!(SchedulerState::Idle.accepts_work());
        assert!(SchedulerState::Dispatching.accepts_work());
        assert!(!SchedulerState::Draining.accepts_work());
        assert!(!SchedulerState::Stopped.accepts_work());
    }
}
