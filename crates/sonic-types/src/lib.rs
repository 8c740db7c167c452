//! Layer-2 primitives shared by the FDB orchestration crates.
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses, ordered bytewise
//! - [`VlanId`]: IEEE 802.1Q VLAN identifiers, rendered as `Vlan<id>` in
//!   SONiC table keys
//! - [`AdminState`]: port administrative state

mod mac;
mod port;
mod vlan;

pub use mac::MacAddress;
pub use port::AdminState;
pub use vlan::VlanId;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(u16),

    #[error("invalid VLAN name: {0}")]
    InvalidVlanName(String),

    #[error("invalid admin state: {0}")]
    InvalidAdminState(String),
}
