// SPDX-License-Identifier: MIT

//! # AppContainer Sandbox
//!
//! Owners for the OS objects a sandboxed launch needs: SIDs, the capability
//! list, the process attribute list, and the container profile itself.
//! Every owner releases its object on drop, and anything that hands a
//! pointer to the OS borrows the owner for as long as the pointer is in use.

pub mod acl;
pub mod appcontainer;
pub mod attribute_list;
pub mod capabilities;
mod conv;
pub mod process_token;
pub mod setup;
pub mod sid;

pub use acl::{FileAccess, IntegrityLevel};
pub use appcontainer::{SandboxProfile, SecurityCapabilities};
pub use attribute_list::{AttributeList, ThreadAttribute};
pub use capabilities::CapabilitySet;
pub use sid::SidHandle;

pub(crate) use conv::to_wide_os;
