//! Chunk codec: splits logical packets into datagrams and reassembles them.
//!
//! Sender: a payload becomes `ceil(len / max_payload)` chunks, or exactly one
//! empty chunk when the payload is empty. Receiver: chunks are collected per
//! `packet_id` until every index has arrived, then concatenated in order.
//! Partial assemblies that stop receiving chunks are evicted after a timeout
//! so a lossy link cannot grow the table without bound.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use zerocopy::AsBytes;

use crate::wire::{ChunkHeader, WireError, HEADER_SIZE, MAX_CHUNKS, MIN_MAX_DATAGRAM};

/// Default idle time after which a partial assembly is dropped.
pub const DEFAULT_ASSEMBLY_TIMEOUT: Duration = Duration::from_millis(3000);

// ── Sending ──────────────────────────────────────────────────────────────────

/// Payload bytes that fit in one datagram of `max_datagram` bytes.
pub fn max_payload(max_datagram: usize) -> usize {
    max_datagram
        .saturating_sub(HEADER_SIZE)
        .min(u16::MAX as usize)
}

/// Number of datagrams needed for a payload. Never zero.
pub fn chunks_required(payload_len: usize, max_datagram: usize) -> usize {
    let per_chunk = max_payload(max_datagram).max(1);
    payload_len.div_ceil(per_chunk).max(1)
}

/// Split a logical packet into wire-ready datagrams, in index order.
pub fn split(
    packet_id: u64,
    packet_type: u32,
    payload: &[u8],
    max_datagram: usize,
) -> Result<Vec<Vec<u8>>, WireError> {
    if max_datagram < MIN_MAX_DATAGRAM {
        return Err(WireError::DatagramTooSmall(max_datagram));
    }

    let per_chunk = max_payload(max_datagram);
    let count = chunks_required(payload.len(), max_datagram);
    if count > MAX_CHUNKS {
        return Err(WireError::PayloadTooLarge(payload.len()));
    }

    let mut datagrams = Vec::with_capacity(count);
    for index in 0..count {
        let start = index * per_chunk;
        let end = (start + per_chunk).min(payload.len());
        let slice = &payload[start.min(end)..end];

        let header = ChunkHeader::new(
            packet_id,
            index as u16,
            count as u16,
            slice.len() as u16,
            packet_type,
        );

        let mut datagram = Vec::with_capacity(HEADER_SIZE + slice.len());
        datagram.extend_from_slice(header.as_bytes());
        datagram.extend_from_slice(slice);
        datagrams.push(datagram);
    }

    Ok(datagrams)
}

// ── Receiving ────────────────────────────────────────────────────────────────

/// A fully reassembled logical packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassembledPacket {
    pub packet_id: u64,
    pub packet_type: u32,
    pub payload: Vec<u8>,
}

struct PendingAssembly {
    chunks: Vec<Option<Vec<u8>>>,
    received: usize,
    packet_type: u32,
    last_update: Instant,
}

impl PendingAssembly {
    fn new(count: u16, packet_type: u32, now: Instant) -> Self {
        Self {
            chunks: vec![None; count as usize],
            received: 0,
            packet_type,
            last_update: now,
        }
    }

    fn chunks_count(&self) -> usize {
        self.chunks.len()
    }

    fn is_complete(&self) -> bool {
        self.received == self.chunks.len()
    }

    fn concat(self) -> Vec<u8> {
        let total = self.chunks.iter().flatten().map(Vec::len).sum();
        let mut out = Vec::with_capacity(total);
        for chunk in self.chunks.into_iter().flatten() {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

/// Per-receiver reassembly table, keyed by `packet_id`.
///
/// Owned by exactly one receive loop. Not shared.
pub struct Reassembler {
    pending: HashMap<u64, PendingAssembly>,
    timeout: Duration,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(DEFAULT_ASSEMBLY_TIMEOUT)
    }
}

impl Reassembler {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            timeout,
        }
    }

    /// Feed one datagram. Returns the logical packet once it is complete.
    pub fn push(&mut self, datagram: &[u8]) -> Result<Option<ReassembledPacket>, WireError> {
        self.push_at(datagram, Instant::now())
    }

    /// `push` with an explicit clock, for deterministic expiry.
    ///
    /// Stale assemblies are swept before the datagram is applied, so a late
    /// chunk never completes a packet whose other chunks already timed out.
    pub fn push_at(
        &mut self,
        datagram: &[u8],
        now: Instant,
    ) -> Result<Option<ReassembledPacket>, WireError> {
        self.evict_expired(now);
        self.accept(datagram, now)
    }

    /// Number of partially received packets.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn accept(
        &mut self,
        datagram: &[u8],
        now: Instant,
    ) -> Result<Option<ReassembledPacket>, WireError> {
        let header = ChunkHeader::parse(datagram)?;

        let declared = header.payload_length() as usize;
        let present = datagram.len() - HEADER_SIZE;
        if declared > present {
            return Err(WireError::TruncatedPayload { declared, present });
        }

        let packet_id = header.packet_id();
        let packet_type = header.packet_type();

        // Bodiless control packets skip the table entirely.
        if declared == 0 {
            return Ok(Some(ReassembledPacket {
                packet_id,
                packet_type,
                payload: Vec::new(),
            }));
        }

        let count = header.chunks_count();
        let index = header.chunk_index();
        if count == 0 {
            return Err(WireError::ZeroChunkCount);
        }
        if index >= count {
            return Err(WireError::ChunkIndexOutOfRange { index, count });
        }

        let entry = self
            .pending
            .entry(packet_id)
            .or_insert_with(|| PendingAssembly::new(count, packet_type, now));

        // A differing shape means the id was reused for a new logical packet.
        if entry.chunks_count() != count as usize || entry.packet_type != packet_type {
            *entry = PendingAssembly::new(count, packet_type, now);
        }

        entry.last_update = now;
        let slot = &mut entry.chunks[index as usize];
        if slot.is_some() {
            return Ok(None);
        }
        *slot = Some(datagram[HEADER_SIZE..HEADER_SIZE + declared].to_vec());
        entry.received += 1;

        if !entry.is_complete() {
            return Ok(None);
        }

        let assembly = match self.pending.remove(&packet_id) {
            Some(a) => a,
            None => return Ok(None),
        };
        Ok(Some(ReassembledPacket {
            packet_id,
            packet_type: assembly.packet_type,
            payload: assembly.concat(),
        }))
    }

    fn evict_expired(&mut self, now: Instant) {
        let timeout = self.timeout;
        self.pending
            .retain(|_, a| now.saturating_duration_since(a.last_update) <= timeout);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
