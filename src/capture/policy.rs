use crate::reassembly::types::AddressTuple;

/// Destination port recorded when none is configured.
pub const DEFAULT_ADMISSION_PORT: u16 = 1119;

/// Decides whether a newly established connection is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionPolicy {
    dest_port: u16,
}

impl AdmissionPolicy {
    pub fn destination_port(dest_port: u16) -> Self {
        Self { dest_port }
    }

    pub fn port(&self) -> u16 {
        self.dest_port
    }

    pub fn admits(&self, addr: &AddressTuple) -> bool {
        addr.dest.port() == self.dest_port
    }
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::destination_port(DEFAULT_ADMISSION_PORT)
    }
}
