//! Outbound command rate limiting
//!
//! One `CommandLimiter` throttles every frame leaving a connection to the
//! service's command budget. A limiter is usually per shard; sharing one
//! instance across shards yields a global budget instead.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::GatewayError;

/// Fixed-window outbound command limiter
pub struct CommandLimiter {
    budget: u32,
    window: Duration,
    state: Mutex<LimiterState>,
    notify: Notify,
}

struct LimiterState {
    remaining: u32,
    window_start: Option<Instant>,
    closed: bool,
}

/// Proof of a reserved command slot; send exactly one frame while holding it
#[must_use]
pub struct CommandPermit<'a> {
    _limiter: &'a CommandLimiter,
}

impl CommandLimiter {
    /// Create a limiter allowing `budget` commands per `window`
    #[must_use]
    pub fn new(budget: u32, window: Duration) -> Self {
        Self {
            budget,
            window,
            state: Mutex::new(LimiterState {
                remaining: budget,
                window_start: None,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Reserve one command slot
    ///
    /// Blocks until a slot frees in the current window. Dropping the
    /// returned future cancels the reservation attempt without consuming a
    /// slot. Returns `RateLimiterClosed` once `close()` has been called.
    pub async fn acquire(&self) -> Result<CommandPermit<'_>, GatewayError> {
        loop {
            let wait_until = {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(GatewayError::RateLimiterClosed);
                }

                let now = Instant::now();
                let window_start = match state.window_start {
                    Some(start) if now.duration_since(start) < self.window => start,
                    _ => {
                        state.window_start = Some(now);
                        state.remaining = self.budget;
                        now
                    }
                };

                if state.remaining > 0 {
                    state.remaining -= 1;
                    return Ok(CommandPermit { _limiter: self });
                }
                window_start + self.window
            };

            tokio::select! {
                () = tokio::time::sleep_until(wait_until) => {}
                () = self.notify.notified() => {}
            }
        }
    }

    /// Restore the full budget and reopen the limiter (fresh connect)
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.remaining = self.budget;
        state.window_start = None;
        state.closed = false;
        drop(state);
        self.notify.notify_waiters();
    }

    /// Close the limiter, waking every waiter with `RateLimiterClosed`
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Slots left in the current window
    #[must_use]
    pub fn remaining(&self) -> u32 {
        let state = self.state.lock();
        match state.window_start {
            Some(start) if start.elapsed() < self.window => state.remaining,
            _ => self.budget,
        }
    }
}

impl std::fmt::Debug for CommandLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandLimiter")
            .field("budget", &self.budget)
            .field("window", &self.window)
            .field("remaining", &self.remaining())
            .finish()
    }
}
