use std::collections::HashMap;
use std::hash::Hash;

use log::debug;

use crate::error_handling::types::RegistryError;
use crate::event_log::StreamId;
use crate::reassembly::types::AddressTuple;

/// Core-owned state for one admitted stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub stream_id: StreamId,
    pub addr: AddressTuple,
    /// Relative timestamp of admission, in milliseconds.
    pub admitted_at: u64,
}

/// Maps engine connection handles to the streams admitted for them.
///
/// Identifiers are handed out sequentially from 0 and never reused, even after
/// the stream is released. Nothing is assumed about `H` beyond equality and
/// hashing.
pub struct SessionRegistry<H> {
    live: HashMap<H, StreamEntry>,
    next_stream_id: u64,
}

impl<H: Eq + Hash> SessionRegistry<H> {
    pub fn new() -> Self {
        Self {
            live: HashMap::new(),
            next_stream_id: 0,
        }
    }

    pub fn admit(
        &mut self,
        handle: H,
        addr: AddressTuple,
        admitted_at: u64,
    ) -> Result<StreamId, RegistryError> {
        if self.live.contains_key(&handle) {
            return Err(RegistryError::AlreadyAdmitted);
        }
        let stream_id = StreamId::try_from(self.next_stream_id).map_err(|_| RegistryError::Exhausted)?;
        self.live
            .try_reserve(1)
            .map_err(|_| RegistryError::Allocation)?;

        self.next_stream_id += 1;
        self.live.insert(
            handle,
            StreamEntry {
                stream_id,
                addr,
                admitted_at,
            },
        );
        debug!("admitted stream {} ({}), {} live", stream_id, addr, self.live.len());
        Ok(stream_id)
    }

    pub fn release(&mut self, handle: &H) -> Result<StreamEntry, RegistryError> {
        self.live.remove(handle).ok_or(RegistryError::NotFound)
    }

    pub fn lookup(&self, handle: &H) -> Result<StreamId, RegistryError> {
        self.live
            .get(handle)
            .map(|entry| entry.stream_id)
            .ok_or(RegistryError::NotFound)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Identifier the next admission will receive.
    pub fn next_stream_id(&self) -> u64 {
        self.next_stream_id
    }

    pub fn admitted_total(&self) -> u64 {
        self.next_stream_id
    }

    pub fn live_streams(&self) -> impl Iterator<Item = &StreamEntry> {
        self.live.values()
    }

    #[cfg(test)]
    pub(crate) fn set_next_stream_id(&mut self, next: u64) {
        self.next_stream_id = next;
    }
}

impl<H: Eq + Hash> Default for SessionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
