use uuid::Uuid;

/// Attempt bookkeeping for one logical upload.
///
/// The retry loop itself lives with the manager; this only answers
/// "how many attempts so far" and "which attempt is in flight", so
/// total attempts stay a direct, assertable property.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    attempts: u32,
    current_attempt_id: Option<Uuid>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            // A zero cap would mean "never try at all"; clamp to one
            max_attempts: max_attempts.max(1),
            attempts: 0,
            current_attempt_id: None,
        }
    }

    /// Start the next attempt: bump the counter and stamp a fresh
    /// attempt id.
    pub fn begin_attempt(&mut self) -> Uuid {
        self.attempts += 1;
        let id = Uuid::new_v4();
        self.current_attempt_id = Some(id);
        id
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn current_attempt_id(&self) -> Option<Uuid> {
        self.current_attempt_id
    }

    /// No automatic attempts remain.
    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }

    /// Manual-retry affordance: clears the counter so the user can
    /// explicitly restart a terminally failed upload.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_attempt_id = None;
    }
}
