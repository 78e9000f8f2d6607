//! Wire format for shmem-resident payloads (spec.md §4.7 "Wire format").
//!
//! What traverses a socket is this small fixed-size header, not the
//! payload itself; the receiving side reconstructs a message from it by
//! resolving the payload pointer through its own mapping of the same
//! segment.

/// `{payload-handle, payload-size, region-id, hint}`. `region_id == 0`
/// means "main segment", matching `ShmemTransport`'s single-segment scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    pub payload_handle: u64,
    pub payload_size: u64,
    pub region_id: u64,
    pub hint: u64,
}

impl WireHeader {
    pub const ENCODED_LEN: usize = 32;

    pub fn to_bytes(self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        buf[0..8].copy_from_slice(&self.payload_handle.to_le_bytes());
        buf[8..16].copy_from_slice(&self.payload_size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.region_id.to_le_bytes());
        buf[24..32].copy_from_slice(&self.hint.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; Self::ENCODED_LEN]) -> Self {
        Self {
            payload_handle: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            payload_size: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            region_id: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            hint: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
        }
    }
}
