use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::{TransportError, TransportResult};

/// Flow-control policy for one channel direction, selected at registration.
///
/// Exactly one policy is active per channel at a time; switching requires the
/// channel to be idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPolicy {
    /// No gating; every write is admitted.
    None,
    /// Sliding window: admitted-but-unacknowledged bytes never exceed `window_size`.
    Ack { window_size: usize },
    /// Minimum delay between two admitted writes.
    Delay { delay: Duration },
    /// Per-tick byte budget of `quota` bytes, with a `max_byte_count` ceiling
    /// per single write.
    Quota { quota: usize, max_byte_count: usize },
}

/// Outcome of [`FlowController::admit`].
#[derive(Debug, PartialEq, Eq)]
pub enum Admission<T> {
    /// The write may proceed now; the item is handed back to the caller.
    Admitted(T),
    /// The policy condition is not met; the item was queued and will be
    /// released in FIFO order once the condition becomes newly satisfied.
    Queued,
}

#[derive(Debug)]
struct Pending<T> {
    item: T,
    len: usize,
}

/// Per-channel, per-direction state machine gating outbound writes.
///
/// Purely synchronous: time is passed in by the caller and the controller
/// never sleeps or busy-waits. Queued writes are released strictly in arrival
/// order.
#[derive(Debug)]
pub struct FlowController<T> {
    policy: FlowPolicy,
    /// Admitted-but-unacknowledged bytes (ack policy).
    outstanding: usize,
    /// Time of the last admitted write (delay policy).
    last_admit: Option<Instant>,
    /// Remaining byte budget for the current tick interval (quota policy).
    budget: usize,
    queue: VecDeque<Pending<T>>,
}

impl<T> FlowController<T> {
    pub fn new(policy: FlowPolicy) -> Self {
        let budget = match policy {
            FlowPolicy::Quota { quota, .. } => quota,
            _ => 0,
        };

        Self {
            policy,
            outstanding: 0,
            last_admit: None,
            budget,
            queue: VecDeque::new(),
        }
    }

    pub fn policy(&self) -> FlowPolicy {
        self.policy
    }

    /// No unacknowledged writes and nothing queued.
    pub fn is_idle(&self) -> bool {
        self.outstanding == 0 && self.queue.is_empty()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Replaces the active policy. Only permitted while idle.
    pub fn set_policy(&mut self, policy: FlowPolicy) -> TransportResult<()> {
        if !self.is_idle() {
            return Err(TransportError::PolicyChangeWhileBusy);
        }

        *self = Self::new(policy);
        Ok(())
    }

    /// Submits a write of `len` bytes.
    ///
    /// Fails with `WriteTooLarge` when `len` can never satisfy the policy
    /// (larger than the ack window or the quota per-write ceiling); such a
    /// write would otherwise stall the queue forever.
    pub fn admit(&mut self, item: T, len: usize, now: Instant) -> TransportResult<Admission<T>> {
        match self.policy {
            FlowPolicy::Ack { window_size } if len > window_size => {
                return Err(TransportError::WriteTooLarge {
                    len,
                    limit: window_size,
                });
            }
            FlowPolicy::Quota { max_byte_count, .. } if len > max_byte_count => {
                return Err(TransportError::WriteTooLarge {
                    len,
                    limit: max_byte_count,
                });
            }
            _ => {}
        }

        // Earlier writes are still waiting; overtaking them would starve the queue.
        if !self.queue.is_empty() || !self.can_admit(len, now) {
            self.queue.push_back(Pending { item, len });
            return Ok(Admission::Queued);
        }

        self.commit(len, now);
        Ok(Admission::Admitted(item))
    }

    /// Queues a write unconditionally, bypassing the admission check.
    ///
    /// Used for suspended channels, where writes wait regardless of policy.
    pub fn enqueue(&mut self, item: T, len: usize) {
        self.queue.push_back(Pending { item, len });
    }

    /// Acknowledges `bytes` previously admitted under the ack policy and
    /// returns the queued writes the freed window now admits.
    pub fn acknowledge(&mut self, bytes: usize, now: Instant) -> Vec<T> {
        self.outstanding = self.outstanding.saturating_sub(bytes);
        self.release(now)
    }

    /// Replenishes the quota budget from the external clock signal and
    /// returns the queued writes the new budget admits.
    pub fn tick(&mut self, now: Instant) -> Vec<T> {
        if let FlowPolicy::Quota { quota, .. } = self.policy {
            self.budget = quota;
        }
        self.release(now)
    }

    /// Releases queued writes whose policy condition is satisfied at `now`.
    pub fn release(&mut self, now: Instant) -> Vec<T> {
        let mut released = Vec::new();

        while let Some(front) = self.queue.front() {
            if !self.can_admit(front.len, now) {
                break;
            }
            let Some(pending) = self.queue.pop_front() else {
                break;
            };
            self.commit(pending.len, now);
            released.push(pending.item);
        }

        released
    }

    /// Drops every queued write, returning them for the caller to fail.
    pub fn drain(&mut self) -> Vec<T> {
        self.outstanding = 0;
        self.queue.drain(..).map(|pending| pending.item).collect()
    }

    /// Deadline at which the head of the queue becomes admissible under the
    /// delay policy. `None` when nothing is queued or another policy is active.
    pub fn next_release_at(&self) -> Option<Instant> {
        match self.policy {
            FlowPolicy::Delay { delay } if !self.queue.is_empty() => {
                self.last_admit.map(|at| at + delay)
            }
            _ => None,
        }
    }

    fn can_admit(&self, len: usize, now: Instant) -> bool {
        match self.policy {
            FlowPolicy::None => true,
            FlowPolicy::Ack { window_size } => self.outstanding + len <= window_size,
            FlowPolicy::Delay { delay } => self
                .last_admit
                .is_none_or(|at| now.saturating_duration_since(at) >= delay),
            FlowPolicy::Quota { .. } => len <= self.budget,
        }
    }

    fn commit(&mut self, len: usize, now: Instant) {
        match self.policy {
            FlowPolicy::None => {}
            FlowPolicy::Ack { .. } => self.outstanding += len,
            FlowPolicy::Delay { .. } => self.last_admit = Some(now),
            FlowPolicy::Quota { .. } => self.budget -= len,
        }
    }
}
