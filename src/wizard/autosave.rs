//! Debounced auto-save scheduling for draft writes.
//!
//! Modeled as an explicit scheduler with a single pending-write slot rather
//! than ad hoc timers: timestamps are passed in, so coalescing is
//! unit-testable without sleeping. The session manager drives it: `schedule`
//! on each field change, `take_due` from its event loop, `flush` on step
//! advance.

use chrono::{DateTime, Duration, Utc};

use super::steps::StepFields;

#[derive(Debug, Clone)]
struct PendingWrite {
    fields: StepFields,
    due_at: DateTime<Utc>,
}

/// Debounce scheduler with one pending-write slot per wizard session.
#[derive(Debug)]
pub struct AutosaveScheduler {
    delay: Duration,
    pending: Option<PendingWrite>,
}

impl AutosaveScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Record a field update for deferred persistence.
    ///
    /// A same-step update coalesces into the pending slot and pushes the due
    /// time out, so rapid keystrokes become one write. An update for a
    /// different step displaces the slot; the displaced write is returned and
    /// must be persisted immediately so nothing is ever dropped.
    pub fn schedule(&mut self, fields: StepFields, now: DateTime<Utc>) -> Option<StepFields> {
        let due_at = now + self.delay;
        match self.pending.take() {
            None => {
                self.pending = Some(PendingWrite { fields, due_at });
                None
            }
            Some(mut slot) if slot.fields.step_id() == fields.step_id() => {
                slot.fields.coalesce(fields);
                slot.due_at = due_at;
                self.pending = Some(slot);
                None
            }
            Some(displaced) => {
                self.pending = Some(PendingWrite { fields, due_at });
                Some(displaced.fields)
            }
        }
    }

    /// Take the pending write if its debounce window has elapsed.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Option<StepFields> {
        if self.pending.as_ref().is_some_and(|p| p.due_at <= now) {
            self.pending.take().map(|p| p.fields)
        } else {
            None
        }
    }

    /// Take the pending write immediately, bypassing the debounce window.
    pub fn flush(&mut self) -> Option<StepFields> {
        self.pending.take().map(|p| p.fields)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}
