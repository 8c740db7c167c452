//! VLAN identifier, the bridge domain that scopes FDB keys.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// IEEE 802.1Q VLAN identifier (1-4094).
///
/// `Display` renders the bare number; [`VlanId::alias`] renders the SONiC
/// interface name (`Vlan6`) used as the prefix of STATE_DB FDB keys.
///
/// ```
/// use sonic_types::VlanId;
///
/// let vlan: VlanId = "Vlan6".parse().unwrap();
/// assert_eq!(vlan.as_u16(), 6);
/// assert_eq!(vlan.alias(), "Vlan6");
/// assert!(VlanId::new(4095).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct VlanId(u16);

impl VlanId {
    pub const MIN: u16 = 1;
    pub const MAX: u16 = 4094;

    /// Prefix of VLAN interface names.
    pub const ALIAS_PREFIX: &'static str = "Vlan";

    /// # Errors
    ///
    /// Returns an error if the id is outside 1-4094.
    pub const fn new(id: u16) -> Result<Self, ParseError> {
        if id >= Self::MIN && id <= Self::MAX {
            Ok(VlanId(id))
        } else {
            Err(ParseError::InvalidVlanId(id))
        }
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    pub fn alias(&self) -> String {
        format!("{}{}", Self::ALIAS_PREFIX, self.0)
    }
}

impl fmt::Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VlanId {
    type Err = ParseError;

    /// Accepts `100`, `Vlan100` or `VLAN100`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = match s.get(..Self::ALIAS_PREFIX.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(Self::ALIAS_PREFIX) => {
                &s[Self::ALIAS_PREFIX.len()..]
            }
            _ => s,
        };

        let id: u16 = digits
            .parse()
            .map_err(|_| ParseError::InvalidVlanName(s.to_string()))?;
        VlanId::new(id)
    }
}

impl TryFrom<u16> for VlanId {
    type Error = ParseError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        VlanId::new(id)
    }
}

impl From<VlanId> for u16 {
    fn from(vlan: VlanId) -> u16 {
        vlan.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_range() {
        assert!(VlanId::new(1).is_ok());
        assert!(VlanId::new(4094).is_ok());
        assert_eq!(VlanId::new(0), Err(ParseError::InvalidVlanId(0)));
        assert_eq!(VlanId::new(4095), Err(ParseError::InvalidVlanId(4095)));
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!("6".parse::<VlanId>().unwrap().as_u16(), 6);
        assert_eq!("Vlan6".parse::<VlanId>().unwrap().as_u16(), 6);
        assert_eq!("VLAN200".parse::<VlanId>().unwrap().as_u16(), 200);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(
            "Vlanx".parse::<VlanId>(),
            Err(ParseError::InvalidVlanName("Vlanx".to_string()))
        );
        assert!("Vl".parse::<VlanId>().is_err());
        assert!("Vlan0".parse::<VlanId>().is_err());
    }

    #[test]
    fn test_alias_round_trips_through_parse() {
        let vlan = VlanId::new(6).unwrap();
        assert_eq!(vlan.alias(), "Vlan6");
        assert_eq!(vlan.alias().parse::<VlanId>().unwrap(), vlan);
    }
}
