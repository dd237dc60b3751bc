//! Serialized simulation state

use bitcode::{Decode, Encode};

/// Opaque snapshot of simulation state.
///
/// Produced by [`Simulation::save_state`](crate::Simulation::save_state) and
/// carried verbatim over the wire for snapshot catch-up. The checksum lets a
/// receiver reject a blob that was corrupted or truncated in transit.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct StateBlob {
    /// Serialized simulation state
    pub data: Vec<u8>,
    /// xxHash3 checksum of `data`
    pub checksum: u64,
}

impl StateBlob {
    /// Create a blob from serialized data, computing its checksum
    pub fn new(data: Vec<u8>) -> Self {
        let checksum = Self::compute_checksum(&data);
        Self { data, checksum }
    }

    /// Check if this blob is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size of the serialized state in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the stored checksum matches the data
    pub fn verify(&self) -> bool {
        Self::compute_checksum(&self.data) == self.checksum
    }

    /// Compute xxHash3 checksum
    ///
    /// xxHash3 is SIMD-optimized, so checksumming a full state on every
    /// save stays cheap even for large simulations.
    pub fn compute_checksum(data: &[u8]) -> u64 {
        use xxhash_rust::xxh3::Xxh3;
        let mut hasher = Xxh3::new();
        hasher.update(data);
        hasher.digest()
    }
}

impl Default for StateBlob {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}
