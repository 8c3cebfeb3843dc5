//! Transfer progress shared between interrupt handlers and `main`

use core::sync::atomic::{AtomicUsize, Ordering};

/// Transfer indices of the running phase
///
/// `tx` counts bytes handed to the transmitting peripheral, `rx` counts bytes
/// taken from the receiving one. Each index has a single writer: the interrupt
/// handler of the endpoint that owns that direction, or the foreground loop
/// of a DMA transfer. Plain load/store is enough (and available on `thumbv6m`).
#[derive(Debug)]
pub struct Cursor {
    tx: AtomicUsize,
    rx: AtomicUsize,
    faults: AtomicUsize,
}

impl Cursor {
    pub const fn new() -> Self {
        Cursor {
            tx: AtomicUsize::new(0),
            rx: AtomicUsize::new(0),
            faults: AtomicUsize::new(0),
        }
    }

    /// Bytes sent so far in this phase
    pub fn tx(&self) -> usize {
        self.tx.load(Ordering::Acquire)
    }

    /// Bytes received so far in this phase
    pub fn rx(&self) -> usize {
        self.rx.load(Ordering::Acquire)
    }

    /// Transport errors seen by the interrupt handlers in this phase
    pub fn faults(&self) -> usize {
        self.faults.load(Ordering::Acquire)
    }

    /// Only call with the interrupt sources of both endpoints disabled.
    pub fn reset(&self) {
        self.tx.store(0, Ordering::Release);
        self.rx.store(0, Ordering::Release);
        self.faults.store(0, Ordering::Release);
    }

    pub(crate) fn set_tx(&self, index: usize) {
        self.tx.store(index, Ordering::Release);
    }

    pub(crate) fn set_rx(&self, index: usize) {
        self.rx.store(index, Ordering::Release);
    }

    pub(crate) fn fault(&self) {
        let faults = self.faults.load(Ordering::Relaxed);
        self.faults.store(faults.saturating_add(1), Ordering::Release);
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of comparing a received buffer with the buffer that was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PhaseResult {
    Match,
    Mismatch,
}

impl PhaseResult {
    pub fn is_match(self) -> bool {
        self == PhaseResult::Match
    }
}

/// Compare every byte of `inbound` with `outbound`
///
/// Buffers of different length never match.
pub fn verify(inbound: &[u8], outbound: &[u8]) -> PhaseResult {
    if inbound.len() == outbound.len() && inbound.iter().zip(outbound).all(|(a, b)| a == b) {
        PhaseResult::Match
    } else {
        PhaseResult::Mismatch
    }
}
