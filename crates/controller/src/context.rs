use crate::chat::TurnId;

/// Counters and flags scoped to one user session.
///
/// Created once when the session starts and passed explicitly into every controller
/// operation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionContext {
    turn_counter: u64,
    run_counter: u64,
    improvement_applied: bool,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn ids are assigned at submission time and strictly increase.
    pub fn allocate_turn(&mut self) -> TurnId {
        self.turn_counter = self.turn_counter.saturating_add(1);
        TurnId::new(self.turn_counter)
    }

    pub fn last_turn(&self) -> Option<TurnId> {
        (self.turn_counter > 0).then(|| TurnId::new(self.turn_counter))
    }

    /// Next display index for an archive returned by batch execution.
    pub fn next_run_index(&mut self) -> u64 {
        self.run_counter = self.run_counter.saturating_add(1);
        self.run_counter
    }

    pub fn run_count(&self) -> u64 {
        self.run_counter
    }

    /// Whether the pending prompt text already went through improvement.
    pub fn improvement_applied(&self) -> bool {
        self.improvement_applied
    }

    pub(crate) fn mark_improvement_applied(&mut self) {
        self.improvement_applied = true;
    }

    /// Clears the improvement flag, e.g. after the user rewrites the prompt by hand.
    pub fn reset_improvement(&mut self) {
        self.improvement_applied = false;
    }

    pub(crate) fn take_improvement_applied(&mut self) -> bool {
        std::mem::take(&mut self.improvement_applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_one_and_increase() {
        let mut context = SessionContext::new();
        assert_eq!(context.last_turn(), None);
        assert_eq!(context.allocate_turn(), TurnId::new(1));
        assert_eq!(context.allocate_turn(), TurnId::new(2));
        assert_eq!(context.last_turn(), Some(TurnId::new(2)));

        assert_eq!(context.next_run_index(), 1);
        assert_eq!(context.next_run_index(), 2);
        assert_eq!(context.run_count(), 2);
    }

    #[test]
    fn improvement_flag_is_consumed_once() {
        let mut context = SessionContext::new();
        context.mark_improvement_applied();
        assert!(context.improvement_applied());
        assert!(context.take_improvement_applied());
        assert!(!context.take_improvement_applied());
    }
}
