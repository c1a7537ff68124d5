//! WARPNet protocol version and compatibility check.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::error::VersionError;

/// Protocol version implemented by this client
pub const WARPNET_VERSION: ProtocolVersion = ProtocolVersion::new(1, 0, 0);

/// Three-part protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolVersion {
    /// Major version; must match
    pub major: u8,
    /// Minor version; must match
    pub minor: u8,
    /// Revision; a mismatch only warns
    pub revision: u8,
}

impl ProtocolVersion {
    /// Create a version
    pub const fn new(major: u8, minor: u8, revision: u8) -> Self {
        Self {
            major,
            minor,
            revision,
        }
    }

    /// Unpack a `DESIGN_VER` word: major in bits 23:16, minor in 15:8, revision in 7:0
    pub fn from_word(word: u32) -> Self {
        Self {
            major: ((word & 0x00FF_0000) >> 16) as u8,
            minor: ((word & 0x0000_FF00) >> 8) as u8,
            revision: (word & 0x0000_00FF) as u8,
        }
    }

    /// Check a node's version against the client's
    pub fn check(&self, client: ProtocolVersion) -> Result<(), VersionError> {
        if self.major != client.major || self.minor != client.minor {
            return Err(VersionError {
                node: *self,
                client,
            });
        }

        if self.revision != client.revision {
            warn!(
                "Node has version {} which does not match WARPNet v{}",
                self, client
            );
        }

        Ok(())
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_word() {
        let version = ProtocolVersion::from_word(0x0001_0203);
        assert_eq!(version, ProtocolVersion::new(1, 2, 3));
        assert_eq!(version.to_string(), "1.2.3");

        // Reserved top byte is ignored
        assert_eq!(
            ProtocolVersion::from_word(0xAB01_0203),
            ProtocolVersion::new(1, 2, 3)
        );
    }

    #[test]
    fn test_check() {
        let client = ProtocolVersion::new(1, 2, 0);
        assert!(ProtocolVersion::new(1, 2, 0).check(client).is_ok());
        assert!(ProtocolVersion::new(1, 2, 7).check(client).is_ok());

        let err = ProtocolVersion::new(1, 3, 0).check(client).unwrap_err();
        assert_eq!(err.node, ProtocolVersion::new(1, 3, 0));
        assert!(ProtocolVersion::new(2, 2, 0).check(client).is_err());
    }
}
