//! Cooldown gate between item completions and the next assignment.
//!
//! The gate is a single process-wide timer. It starts when an item completes
//! (its change request merges), not when an item is assigned: the point is to
//! leave a quiet interval after each landed change before the agent picks up
//! the next one. Only the "assign next queued item" transition consults it.

use chrono::{DateTime, Duration, Utc};

/// The single timer guarding the assign-next transition.
#[derive(Debug, Clone)]
pub struct CooldownGate {
    cooldown: Duration,
    last_completion_at: Option<DateTime<Utc>>,
}

impl CooldownGate {
    /// Creates a gate with the configured cooldown and the persisted last
    /// completion timestamp (None on first run).
    pub fn new(cooldown_minutes: u64, last_completion_at: Option<DateTime<Utc>>) -> Self {
        CooldownGate {
            cooldown: Duration::minutes(cooldown_minutes as i64),
            last_completion_at,
        }
    }

    /// Returns true iff assignment is permitted: no completion has been
    /// recorded yet, or the cooldown has fully elapsed.
    pub fn permitted(&self, now: DateTime<Utc>) -> bool {
        match self.last_completion_at {
            None => true,
            Some(last) => now - last >= self.cooldown,
        }
    }

    /// Time left until assignment is permitted, if the gate is closed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.last_completion_at?;
        let elapsed = now - last;
        if elapsed >= self.cooldown {
            None
        } else {
            Some(self.cooldown - elapsed)
        }
    }

    /// Records a completion. Called exactly once, synchronously with the
    /// merged-to-done transition.
    pub fn record(&mut self, now: DateTime<Utc>) {
        self.last_completion_at = Some(now);
    }

    /// The persisted timestamp backing the gate.
    pub fn last_completion_at(&self) -> Option<DateTime<Utc>> {
        self.last_completion_at
    }
}
