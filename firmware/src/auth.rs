//! Authentication gate fed by fingerprint matches.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    Locked,
}

impl core::fmt::Display for AuthError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AuthError::Locked => write!(f, "device locked"),
        }
    }
}

impl core::error::Error for AuthError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateState {
    #[default]
    Locked,
    Matched {
        slot: u8,
        selected: Option<usize>,
        since_ms: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthGate {
    state: GateState,
    unlock_window_ms: u64,
}

impl AuthGate {
    pub const fn new(unlock_window_ms: u64) -> Self {
        Self {
            state: GateState::Locked,
            unlock_window_ms,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_unlocked(&self, now_ms: u64) -> bool {
        match self.state {
            GateState::Locked => false,
            GateState::Matched { since_ms, .. } => {
                self.unlock_window_ms == 0
                    || now_ms.saturating_sub(since_ms) < self.unlock_window_ms
            }
        }
    }

    pub fn ensure_unlocked(&self, now_ms: u64) -> Result<(), AuthError> {
        if self.is_unlocked(now_ms) {
            Ok(())
        } else {
            Err(AuthError::Locked)
        }
    }

    pub fn selected_user(&self) -> Option<usize> {
        match self.state {
            GateState::Matched { selected, .. } => selected,
            GateState::Locked => None,
        }
    }

    /// Record a match. `pending` is the explicit selection, `auto_bound` the magic-finger
    /// lookup for `slot`; the first one in range wins.
    pub fn on_match(
        &mut self,
        slot: u8,
        now_ms: u64,
        pending: Option<usize>,
        auto_bound: Option<usize>,
        count: usize,
    ) -> Option<usize> {
        let selected = pending
            .filter(|&index| index < count)
            .or(auto_bound.filter(|&index| index < count));
        self.state = GateState::Matched {
            slot,
            selected,
            since_ms: now_ms,
        };
        selected
    }

    /// Start of a touch cycle.
    pub fn begin_touch(&mut self) {
        self.lock();
    }

    pub fn lock(&mut self) {
        self.state = GateState::Locked;
    }

    /// Drop the selection after it was consumed, keeping the protocol unlocked.
    pub fn consume_selection(&mut self) -> Option<usize> {
        match &mut self.state {
            GateState::Matched { selected, .. } => selected.take(),
            GateState::Locked => None,
        }
    }

    /// Lock once the unlock window has elapsed. Returns `true` on the transition.
    pub fn expire(&mut self, now_ms: u64) -> bool {
        if matches!(self.state, GateState::Matched { .. }) && !self.is_unlocked(now_ms) {
            self.lock();
            return true;
        }
        false
    }
}

/// Pending explicit selection driven by the navigation buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    pending: Option<usize>,
}

impl Selection {
    pub const fn new() -> Self {
        Self { pending: None }
    }

    pub fn get(&self) -> Option<usize> {
        self.pending
    }

    pub fn next(&mut self, count: usize) -> Option<usize> {
        self.pending = match (self.pending, count) {
            (_, 0) => None,
            (None, _) => Some(0),
            (Some(index), count) => Some((index + 1) % count),
        };
        self.pending
    }

    pub fn prev(&mut self, count: usize) -> Option<usize> {
        self.pending = match (self.pending, count) {
            (_, 0) => None,
            (None, count) => Some(count - 1),
            (Some(index), count) => Some((index.min(count - 1) + count - 1) % count),
        };
        self.pending
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }

    pub fn take(&mut self) -> Option<usize> {
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_starts_locked() {
        let gate = AuthGate::new(60_000);
        assert_eq!(gate.state(), GateState::Locked);
        assert!(!gate.is_unlocked(0));
        assert_eq!(gate.ensure_unlocked(0), Err(AuthError::Locked));
    }

    #[test]
    fn explicit_selection_beats_magic_finger() {
        let mut gate = AuthGate::new(60_000);
        assert_eq!(gate.on_match(3, 100, Some(1), Some(0), 2), Some(1));
        assert_eq!(gate.selected_user(), Some(1));
    }

    #[test]
    fn out_of_range_selection_falls_back() {
        let mut gate = AuthGate::new(60_000);
        assert_eq!(gate.on_match(3, 100, Some(7), Some(0), 2), Some(0));
        assert_eq!(gate.on_match(3, 100, Some(7), None, 2), None);
        assert!(gate.is_unlocked(100));
    }

    #[test]
    fn window_expires() {
        let mut gate = AuthGate::new(1_000);
        gate.on_match(0, 5_000, None, None, 0);
        assert!(gate.is_unlocked(5_999));
        assert!(!gate.is_unlocked(6_000));
        assert!(gate.expire(6_000));
        assert_eq!(gate.state(), GateState::Locked);
        assert!(!gate.expire(7_000));
    }

    #[test]
    fn zero_window_never_expires() {
        let mut gate = AuthGate::new(0);
        gate.on_match(0, 0, None, None, 0);
        assert!(gate.is_unlocked(u64::MAX));
    }

    #[test]
    fn touch_and_disconnect_relock() {
        let mut gate = AuthGate::new(60_000);
        gate.on_match(1, 0, None, None, 0);
        gate.begin_touch();
        assert!(!gate.is_unlocked(1));

        gate.on_match(1, 0, None, None, 0);
        gate.lock();
        assert!(!gate.is_unlocked(1));
    }

    #[test]
    fn consuming_selection_keeps_gate_open() {
        let mut gate = AuthGate::new(60_000);
        gate.on_match(1, 0, Some(0), None, 1);
        assert_eq!(gate.consume_selection(), Some(0));
        assert_eq!(gate.selected_user(), None);
        assert!(gate.is_unlocked(1));
    }

    #[test]
    fn selection_wraps_both_ways() {
        let mut selection = Selection::new();
        assert_eq!(selection.prev(3), Some(2));
        assert_eq!(selection.next(3), Some(0));
        assert_eq!(selection.next(3), Some(1));
        assert_eq!(selection.prev(3), Some(0));
        assert_eq!(selection.next(0), None);
        selection.next(2);
        assert_eq!(selection.take(), Some(0));
        assert_eq!(selection.get(), None);
    }
}
