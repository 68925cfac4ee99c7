//! Edge: a fixed-size byte buffer plus a reference to the destination
//! task's rendezvous channel and the producer slot this edge occupies.
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use getset::CopyGetters;

use crate::channel::RendezvousChannel;

const FILLER_BYTE: u8 = 0xAA;

/// Owns its payload buffer; both endpoint tasks hold a non-owning
/// reference to the `Edge` itself (via `Arc`).
#[derive(CopyGetters)]
#[getset(get_copy = "pub")]
pub struct Edge {
    source: usize,
    destination: usize,
    slot: usize,
    #[getset(skip)]
    channel: Arc<RendezvousChannel>,
    #[getset(skip)]
    payload: Mutex<Vec<u8>>,
}

impl Edge {
    pub fn new(source: usize, destination: usize, slot: usize, size: usize, channel: Arc<RendezvousChannel>) -> Self {
        assert!(size >= 1, "edge payload size must be at least 1 byte (trailing null terminator)");
        let mut payload = vec![FILLER_BYTE; size];
        *payload.last_mut().unwrap() = 0;
        Self { source, destination, slot, channel, payload: Mutex::new(payload) }
    }

    pub fn size(&self) -> usize {
        self.payload.lock().unwrap().len()
    }

    /// Overwrite the payload bytes ahead of a push, keeping the trailing
    /// null terminator intact.
    pub fn stamp(&self, byte: u8) {
        let mut payload = self.payload.lock().unwrap();
        let last = payload.len() - 1;
        for b in &mut payload[..last] {
            *b = byte;
        }
    }

    /// Publish this edge's slot on the destination channel. Returns
    /// `None` if `stop` was observed before the slot became available;
    /// otherwise `Some(true)` iff this push completed the destination's
    /// rendezvous.
    pub fn push(&self, stop: &AtomicBool) -> Option<bool> {
        self.channel.push(self.slot, stop)
    }
}
