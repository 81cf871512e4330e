// SPDX-License-Identifier: MIT

//! Capability SIDs granted to the sandbox.

use windows::Win32::Security::{self, SID_AND_ATTRIBUTES, WELL_KNOWN_SID_TYPE};
use windows::Win32::System::SystemServices::SE_GROUP_ENABLED;

use super::sid::SidHandle;
use crate::error::BrokerError;

/// The capabilities the game client needs for its network traffic.
pub const STANDARD_CAPABILITIES: [WELL_KNOWN_SID_TYPE; 3] = [
    Security::WinCapabilityInternetClientSid,
    Security::WinCapabilityInternetClientServerSid,
    Security::WinCapabilityPrivateNetworkClientServerSid,
];

/// A fixed-capacity list of enabled capability SIDs.
///
/// The entry array never reallocates, so pointers handed to the OS stay
/// valid for as long as the set is alive.
pub struct CapabilitySet {
    sids: Vec<SidHandle>,
    entries: Vec<SID_AND_ATTRIBUTES>,
    capacity: usize,
}

impl CapabilitySet {
    pub fn with_capacity(capacity: usize) -> Self {
        CapabilitySet {
            sids: Vec::with_capacity(capacity),
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// The standard network capabilities.
    pub fn standard() -> Result<Self, BrokerError> {
        let mut set = Self::with_capacity(STANDARD_CAPABILITIES.len());
        for kind in STANDARD_CAPABILITIES {
            set.add_well_known(kind)?;
        }
        Ok(set)
    }

    /// Add a capability, enabled.
    pub fn add(&mut self, sid: SidHandle) -> Result<(), BrokerError> {
        if self.sids.len() >= self.capacity {
            return Err(BrokerError::CapacityExceeded { capacity: self.capacity });
        }
        self.entries.push(SID_AND_ATTRIBUTES {
            Sid: sid.as_psid(),
            Attributes: SE_GROUP_ENABLED as u32,
        });
        self.sids.push(sid);
        Ok(())
    }

    pub fn add_well_known(&mut self, kind: WELL_KNOWN_SID_TYPE) -> Result<(), BrokerError> {
        if self.sids.len() >= self.capacity {
            return Err(BrokerError::CapacityExceeded { capacity: self.capacity });
        }
        self.add(SidHandle::well_known(kind)?)
    }

    pub fn entries(&self) -> &[SID_AND_ATTRIBUTES] {
        &self.entries
    }

    pub fn sids(&self) -> &[SidHandle] {
        &self.sids
    }

    pub fn len(&self) -> usize {
        self.sids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sids.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
