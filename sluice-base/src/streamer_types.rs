use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Scheduling priority of a read. Higher values are serviced first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(pub u8);

impl Priority {
    pub const LOWEST: Priority = Priority(0);
    pub const LOW: Priority = Priority(64);
    pub const MEDIUM: Priority = Priority(128);
    pub const HIGH: Priority = Priority(192);
    pub const HIGHEST: Priority = Priority(255);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::MEDIUM
    }
}

/// A deadline relative to the moment a request is created. It is converted into a
/// `DeadlineTime` when the read (or reschedule) request is built.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Deadline(Option<Duration>);

impl Deadline {
    pub const NO_DEADLINE: Deadline = Deadline(None);
    pub const NOW: Deadline = Deadline(Some(Duration::ZERO));

    pub fn from_duration(duration: Duration) -> Self {
        Deadline(Some(duration))
    }

    pub fn duration(&self) -> Option<Duration> {
        self.0
    }

    pub fn is_no_deadline(&self) -> bool {
        self.0.is_none()
    }

    pub fn resolve(
        &self,
        now: Instant,
    ) -> DeadlineTime {
        // Deadlines too far in the future to represent are the same as having no deadline
        DeadlineTime(self.0.and_then(|duration| now.checked_add(duration)))
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Deadline::NO_DEADLINE
    }
}

/// Absolute point in time a request should be completed by. `NO_DEADLINE_TIME` orders after
/// every real instant.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeadlineTime(Option<Instant>);

pub const NO_DEADLINE_TIME: DeadlineTime = DeadlineTime(None);

impl DeadlineTime {
    pub fn at(instant: Instant) -> Self {
        DeadlineTime(Some(instant))
    }

    pub fn instant(&self) -> Option<Instant> {
        self.0
    }

    pub fn is_no_deadline(&self) -> bool {
        self.0.is_none()
    }

    /// A request is "panicking" once its deadline has passed.
    pub fn has_passed(
        &self,
        now: Instant,
    ) -> bool {
        match self.0 {
            Some(deadline) => deadline <= now,
            None => false,
        }
    }
}

impl PartialOrd for DeadlineTime {
    fn partial_cmp(
        &self,
        other: &Self,
    ) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DeadlineTime {
    fn cmp(
        &self,
        other: &Self,
    ) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        match (self.0, other.0) {
            (Some(lhs), Some(rhs)) => lhs.cmp(&rhs),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

// Statuses are ordered, a request may only move to a later status
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestStatus {
    // Created or waiting in the scheduler to be handed to the stack
    Pending = 0,
    // Handed to the stream stack for execution
    Scheduled = 1,
    Completed = 2,
    Canceled = 3,
    Failed = 4,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        match self {
            RequestStatus::Pending | RequestStatus::Scheduled => false,
            RequestStatus::Completed | RequestStatus::Canceled | RequestStatus::Failed => true,
        }
    }

    /// Returns true if moving from self to `next` is a forward transition
    pub fn can_transition_to(
        &self,
        next: RequestStatus,
    ) -> bool {
        !self.is_terminal() && (next as u8) > (*self as u8)
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RequestStatus::Pending),
            1 => Some(RequestStatus::Scheduled),
            2 => Some(RequestStatus::Completed),
            3 => Some(RequestStatus::Canceled),
            4 => Some(RequestStatus::Failed),
            _ => None,
        }
    }
}

/// Whether the caller takes ownership of the memory a read was done into
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ClaimMemory {
    No,
    Yes,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportType {
    // Settings each stack entry was created with
    Config,
    // Files that currently have open handles
    FileLocks,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn no_deadline_orders_last() {
        let now = Instant::now();
        let soon = Deadline::from_duration(Duration::from_millis(5)).resolve(now);
        assert!(soon < NO_DEADLINE_TIME);
        assert!(Deadline::NOW.resolve(now) < soon);
        assert_eq!(Deadline::NO_DEADLINE.resolve(now), NO_DEADLINE_TIME);
    }

    #[test]
    fn deadline_now_has_passed() {
        let now = Instant::now();
        assert!(Deadline::NOW.resolve(now).has_passed(now));
        assert!(!NO_DEADLINE_TIME.has_passed(now));
    }

    #[test]
    fn status_transitions_only_move_forward() {
        assert!(RequestStatus::Pending.can_transition_to(RequestStatus::Scheduled));
        assert!(RequestStatus::Scheduled.can_transition_to(RequestStatus::Canceled));
        assert!(!RequestStatus::Scheduled.can_transition_to(RequestStatus::Pending));
        assert!(!RequestStatus::Completed.can_transition_to(RequestStatus::Failed));
        assert!(!RequestStatus::Canceled.can_transition_to(RequestStatus::Completed));
    }
}
