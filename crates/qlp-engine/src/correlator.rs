//! Per-device command/response correlation.
//!
//! Each device id gets a lazily created slot holding at most one in-flight
//! command. A sender for that device first waits until the previous command
//! is answered or its response timeout elapses, then transmits and records the
//! new command. Slots for different devices never interact.
//!
//! Replies are matched on the CONTROL sequence byte. A reply whose sequence
//! differs from the recorded one is assumed to belong to another client on
//! the shared medium and is ignored.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use qlp_frame::ResponseCode;
use tokio::sync::Notify;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};

/// What happened to the command previously in flight for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Nothing was outstanding.
    Idle,
    /// The device answered.
    Resolved(ResponseCode),
    /// No answer within the response timeout. The command was abandoned and
    /// a late reply to it will go unmatched.
    TimedOut { sequence: u8 },
}

impl Disposition {
    pub fn name(self) -> &'static str {
        match self {
            Disposition::Idle => "idle",
            Disposition::Resolved(_) => "resolved",
            Disposition::TimedOut { .. } => "timed-out",
        }
    }
}

/// Result of a successful [`Correlator::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    /// Sequence byte the command was sent with.
    pub sequence: u8,
    /// How the previous command to the same device ended.
    pub prior: Disposition,
    /// Time spent waiting for the previous command before transmitting.
    pub waited: Duration,
}

/// Outcome of matching a reply against the in-flight record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Matched,
    Mismatch { expected: u8 },
}

#[derive(Debug, Clone, Copy)]
enum SlotState {
    Idle,
    InFlight { issued_at: Instant, sequence: u8 },
    Resolved(ResponseCode),
}

#[derive(Debug)]
struct Slot {
    /// Serialises senders for one device.
    gate: tokio::sync::Mutex<()>,
    state: Mutex<SlotState>,
    resolved: Notify,
}

impl Slot {
    fn new() -> Self {
        Self {
            gate: tokio::sync::Mutex::new(()),
            state: Mutex::new(SlotState::Idle),
            resolved: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Tracks the in-flight command of every device.
#[derive(Debug)]
pub struct Correlator {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    sequence: AtomicU8,
    response_timeout: Duration,
}

impl Correlator {
    pub fn new(response_timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            sequence: AtomicU8::new(0),
            response_timeout,
        }
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Wait for the device's previous command, then call `transmit` with a
    /// fresh sequence byte and record the command as in flight.
    ///
    /// Returns as soon as `transmit` completes; it does not wait for the reply.
    /// If `transmit` fails the slot is left idle.
    pub async fn send<F, Fut, E>(
        &self,
        device_id: &str,
        transmit: F,
    ) -> std::result::Result<Dispatch, E>
    where
        F: FnOnce(u8) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
    {
        let slot = self.slot(device_id);
        let started = Instant::now();
        let _gate = slot.gate.lock().await;
        let prior = self.await_prior(device_id, &slot).await;
        let waited = started.elapsed();

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        // Recorded before transmitting: the reply can beat `transmit` back.
        *slot.state() = SlotState::InFlight {
            issued_at: Instant::now(),
            sequence,
        };
        if let Err(err) = transmit(sequence).await {
            *slot.state() = SlotState::Idle;
            return Err(err);
        }

        Ok(Dispatch {
            sequence,
            prior,
            waited,
        })
    }

    /// Wait for the device's outstanding command, if any, without sending.
    ///
    /// The device's slot is dropped afterwards unless another sender is
    /// queued on it.
    pub async fn settle(&self, device_id: &str) -> Disposition {
        let Some(slot) = self.existing(device_id) else {
            return Disposition::Idle;
        };
        let disposition = {
            let _gate = slot.gate.lock().await;
            self.await_prior(device_id, &slot).await
        };
        self.release(device_id, slot);
        disposition
    }

    /// Move the record kept for `old` to `new` after a device re-announced
    /// itself with a fresh id. Returns false when `old` had no record.
    ///
    /// Senders already queued on the old id stay queued on the same gate, and
    /// a reply to the command in flight resolves under the new id.
    pub fn rekey(&self, old: &str, new: &str) -> bool {
        if old == new {
            return false;
        }
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(slot) = slots.remove(old) else {
            return false;
        };
        debug!(old, new, "device id changed, moving correlation record");
        slots.insert(new.to_string(), slot);
        true
    }

    /// Match a reply from `device_id` carrying `sequence`.
    pub fn resolve(
        &self,
        device_id: &str,
        sequence: u8,
        code: ResponseCode,
    ) -> Result<Resolution> {
        let unexpected = || EngineError::UnexpectedReply {
            device_id: device_id.to_string(),
            sequence,
        };
        let slot = self.existing(device_id).ok_or_else(unexpected)?;
        let mut state = slot.state();
        match *state {
            SlotState::InFlight {
                sequence: expected, ..
            } if expected == sequence => {
                *state = SlotState::Resolved(code);
                drop(state);
                slot.resolved.notify_one();
                Ok(Resolution::Matched)
            }
            SlotState::InFlight {
                sequence: expected, ..
            } => {
                debug!(device_id, expected, received = sequence, "reply sequence mismatch");
                Ok(Resolution::Mismatch { expected })
            }
            SlotState::Idle | SlotState::Resolved(_) => Err(unexpected()),
        }
    }

    /// True when a command to `device_id` is waiting for its reply.
    pub fn is_in_flight(&self, device_id: &str) -> bool {
        self.existing(device_id)
            .is_some_and(|slot| matches!(*slot.state(), SlotState::InFlight { .. }))
    }

    async fn await_prior(&self, device_id: &str, slot: &Slot) -> Disposition {
        loop {
            let notified = slot.resolved.notified();
            let deadline = {
                let mut state = slot.state();
                match *state {
                    SlotState::Idle => return Disposition::Idle,
                    SlotState::Resolved(code) => {
                        *state = SlotState::Idle;
                        return Disposition::Resolved(code);
                    }
                    SlotState::InFlight {
                        issued_at,
                        sequence,
                    } => {
                        let deadline = issued_at + self.response_timeout;
                        if Instant::now() >= deadline {
                            *state = SlotState::Idle;
                            warn!(
                                device_id,
                                sequence,
                                timeout = ?self.response_timeout,
                                "no reply, abandoning command"
                            );
                            return Disposition::TimedOut { sequence };
                        }
                        deadline
                    }
                }
            };
            let _ = time::timeout_at(deadline, notified).await;
        }
    }

    fn slot(&self, device_id: &str) -> Arc<Slot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            slots
                .entry(device_id.to_string())
                .or_insert_with(|| Arc::new(Slot::new())),
        )
    }

    /// Drop an idle slot nobody else holds. Clones of a slot are only handed
    /// out under the `slots` lock, so the count cannot grow while it is held.
    fn release(&self, device_id: &str, slot: Arc<Slot>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let current = slots
            .get(device_id)
            .is_some_and(|held| Arc::ptr_eq(held, &slot));
        let idle = matches!(*slot.state(), SlotState::Idle);
        if current && idle && Arc::strong_count(&slot) == 2 {
            slots.remove(device_id);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn existing(&self, device_id: &str) -> Option<Arc<Slot>> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .cloned()
    }
}
