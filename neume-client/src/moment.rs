//! Reentrant timed-command scheduling.
//!
//! A *moment* is a scope pinned to one `Timestamp`. Messages recorded inside
//! any scope for that timestamp accumulate in one buffer, and only when the
//! outermost scope closes does the whole buffer go to the transport as a
//! single bundle — so logically nested operations are never fragmented across
//! network writes, and relative `record` order is preserved exactly.
//!
//! Two APIs: the low-level `enter`/`record`/`exit` triple for callers that
//! interleave scopes across logical tasks, and the RAII `Moment` guard from
//! `at()`, whose drop guarantees the matching `exit` even on early return or
//! unwind.

use std::collections::HashMap;
use std::fmt;

use neume_osc::{TimeTag, Timestamp, WireBundle, WireMessage, WirePacket};

use crate::clock::{Clock, SystemClock};
use crate::transport::{TransportError, TransportSink};

/// Error from a scheduling operation.
#[derive(Debug, Clone, PartialEq)]
pub enum MomentError {
    /// `record` or `exit` without a matching `enter` — a programming error,
    /// fatal in debug builds.
    ScopeMisuse {
        timestamp: Timestamp,
        operation: &'static str,
    },
    /// The flush's send failed. The pending buffer is already cleared; the
    /// messages are not re-sent on the next open of the same timestamp.
    Transport(TransportError),
}

impl fmt::Display for MomentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MomentError::ScopeMisuse {
                timestamp,
                operation,
            } => write!(
                f,
                "{} without matching enter for {:?}",
                operation, timestamp
            ),
            MomentError::Transport(error) => write!(f, "flush failed: {}", error),
        }
    }
}

impl std::error::Error for MomentError {}

impl From<TransportError> for MomentError {
    fn from(error: TransportError) -> Self {
        MomentError::Transport(error)
    }
}

/// Per-timestamp state while at least one scope is open.
struct OpenScope {
    depth: usize,
    pending: Vec<WireMessage>,
}

/// Accumulates outgoing messages per timestamp and flushes each timestamp's
/// buffer exactly once, when its outermost scope closes.
///
/// Not internally locked: one logical owner at a time, with an external mutex
/// when shared (cooperative tasks may interleave `enter`/`record`/`exit`
/// between suspension points, but the flush itself never interleaves).
pub struct MomentScheduler<S: TransportSink, C: Clock = SystemClock> {
    sink: S,
    clock: C,
    scopes: HashMap<Timestamp, OpenScope>,
}

impl<S: TransportSink> MomentScheduler<S> {
    pub fn new(sink: S) -> Self {
        Self::with_clock(sink, SystemClock)
    }
}

impl<S: TransportSink, C: Clock> MomentScheduler<S, C> {
    pub fn with_clock(sink: S, clock: C) -> Self {
        Self {
            sink,
            clock,
            scopes: HashMap::new(),
        }
    }

    /// The injected transport sink (tests use this to inspect a recorder).
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Number of timestamps currently holding an open scope.
    pub fn open_timestamps(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_open(&self, timestamp: Timestamp) -> bool {
        self.scopes.contains_key(&timestamp)
    }

    /// Open a scope for `timestamp`: ABSENT becomes OPEN(1), OPEN(n) becomes
    /// OPEN(n + 1). Every `enter` must be paired with exactly one `exit`.
    pub fn enter(&mut self, timestamp: Timestamp) {
        self.scopes
            .entry(timestamp)
            .and_modify(|scope| scope.depth += 1)
            .or_insert_with(|| OpenScope {
                depth: 1,
                pending: Vec::new(),
            });
    }

    /// Append a message to the pending buffer for an open timestamp.
    pub fn record(
        &mut self,
        timestamp: Timestamp,
        message: WireMessage,
    ) -> Result<(), MomentError> {
        match self.scopes.get_mut(&timestamp) {
            Some(scope) => {
                scope.pending.push(message);
                Ok(())
            }
            None => {
                debug_assert!(false, "record without matching enter for {:?}", timestamp);
                log::warn!(
                    target: "neume::moment",
                    "record without matching enter for {:?}", timestamp
                );
                Err(MomentError::ScopeMisuse {
                    timestamp,
                    operation: "record",
                })
            }
        }
    }

    /// Close one scope for `timestamp`. Closing the outermost scope flushes
    /// the pending buffer: one stamped bundle for numeric timestamps,
    /// individual unstamped messages for `Immediately`. A transport failure
    /// propagates to this caller only; the buffer is cleared either way.
    pub fn exit(&mut self, timestamp: Timestamp) -> Result<(), MomentError> {
        let depth = match self.scopes.get_mut(&timestamp) {
            Some(scope) => {
                scope.depth -= 1;
                scope.depth
            }
            None => {
                debug_assert!(false, "exit without matching enter for {:?}", timestamp);
                log::warn!(
                    target: "neume::moment",
                    "exit without matching enter for {:?}", timestamp
                );
                return Err(MomentError::ScopeMisuse {
                    timestamp,
                    operation: "exit",
                });
            }
        };
        if depth > 0 {
            return Ok(());
        }
        let pending = self
            .scopes
            .remove(&timestamp)
            .map(|scope| scope.pending)
            .unwrap_or_default();
        self.flush(timestamp, pending)
    }

    fn flush(&mut self, timestamp: Timestamp, pending: Vec<WireMessage>) -> Result<(), MomentError> {
        if pending.is_empty() {
            return Ok(());
        }
        match timestamp {
            Timestamp::Immediately => {
                for message in pending {
                    self.sink.send(WirePacket::Message(message))?;
                }
                Ok(())
            }
            Timestamp::At(_) => {
                let bundle = WireBundle::new(
                    timestamp,
                    pending.into_iter().map(WirePacket::from).collect(),
                );
                self.sink
                    .send(WirePacket::Bundle(bundle))
                    .map_err(MomentError::from)
            }
        }
    }

    /// Open a guarded scope for `timestamp`. The guard records into this
    /// scheduler and guarantees the matching `exit` when it leaves scope.
    pub fn at(&mut self, timestamp: Timestamp) -> Moment<'_, S, C> {
        self.enter(timestamp);
        Moment {
            scheduler: self,
            timestamp,
            exited: false,
        }
    }

    /// Open a guarded scope at `now + delta_secs`, resolved through the
    /// injected clock.
    pub fn at_offset(&mut self, delta_secs: f64) -> Moment<'_, S, C> {
        let timestamp = Timestamp::At(TimeTag::from_unix_secs(self.clock.now_secs() + delta_secs));
        self.at(timestamp)
    }
}

/// An open scope. Dropping it closes the scope; `finish()` closes it while
/// surfacing any flush error to the caller.
pub struct Moment<'a, S: TransportSink, C: Clock> {
    scheduler: &'a mut MomentScheduler<S, C>,
    timestamp: Timestamp,
    exited: bool,
}

impl<S: TransportSink, C: Clock> Moment<'_, S, C> {
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn record(&mut self, message: WireMessage) -> Result<(), MomentError> {
        self.scheduler.record(self.timestamp, message)
    }

    /// Open a nested scope, for this or any other timestamp, without giving
    /// up the guarantee that both scopes close in order.
    pub fn nested(&mut self, timestamp: Timestamp) -> Moment<'_, S, C> {
        self.scheduler.at(timestamp)
    }

    /// Close the scope now and observe the flush result. Equivalent to
    /// dropping the guard, except a transport failure is returned instead of
    /// logged.
    pub fn finish(mut self) -> Result<(), MomentError> {
        self.exited = true;
        self.scheduler.exit(self.timestamp)
    }
}

impl<S: TransportSink, C: Clock> Drop for Moment<'_, S, C> {
    fn drop(&mut self) {
        if !self.exited {
            if let Err(error) = self.scheduler.exit(self.timestamp) {
                log::warn!(
                    target: "neume::moment",
                    "flush during scope drop failed: {}", error
                );
            }
        }
    }
}
