//! Hardware-info parameter decoding.
//!
//! A hardware-info reply is a flat sequence of tagged records:
//!
//! ```text
//!        | 31 .. 24 | 23 .. 16 | 15 .. 0 |
//! Word 0 | Reserved | Group    | Length  |
//! Word 1 | Parameter identifier          |
//! Word 2 | Value 0                       |
//!  ...   | Value Length-1                |
//! ```
//!
//! Node-group records describe the node itself; transport-group records are
//! handed to [`TransportParams`]. Decoding is all-or-nothing: the caller
//! only adopts the result when every record decoded.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cmds::{GRPID_NODE, GRPID_TRANS};
use crate::error::{NodeError, ParameterError};
use crate::transport::TransportParams;
use crate::version::ProtocolVersion;

/// Node type code
pub const NODE_TYPE: u32 = 0;
/// Node id
pub const NODE_ID: u32 = 1;
/// Hardware generation
pub const NODE_HW_GEN: u32 = 2;
/// WARPNet design version
pub const NODE_DESIGN_VER: u32 = 3;
/// Serial number
pub const NODE_SERIAL_NUM: u32 = 4;
/// 64-bit FPGA DNA (2 words, low word first)
pub const NODE_FPGA_DNA: u32 = 5;

/// Node-level values decoded from a hardware-info query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeParams {
    /// Node type code
    pub node_type: Option<u32>,
    /// Node id
    pub node_id: Option<u16>,
    /// Hardware generation (low byte of the record)
    pub hw_ver: Option<u8>,
    /// WARPNet design version
    pub version: Option<ProtocolVersion>,
    /// Serial number
    pub serial_number: Option<u32>,
    /// FPGA DNA
    pub fpga_dna: Option<u64>,
}

/// Everything a hardware-info query reported
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareInfo {
    /// Node-group values
    pub node: NodeParams,
    /// Transport-group values
    pub transport: TransportParams,
}

/// Decodes hardware-info parameter streams
#[derive(Debug, Clone, Copy)]
pub struct ParameterDecoder {
    client_version: ProtocolVersion,
}

impl ParameterDecoder {
    /// Create a decoder checking design versions against `client_version`
    pub fn new(client_version: ProtocolVersion) -> Self {
        Self { client_version }
    }

    /// Decode every record in `words`
    pub fn decode(&self, words: &[u32]) -> Result<HardwareInfo, NodeError> {
        let mut info = HardwareInfo::default();
        let mut pos = 0;

        while pos < words.len() {
            if pos + 2 > words.len() {
                return Err(ParameterError::new("Record", "Truncated record header").into());
            }

            let group = (words[pos] & 0x00FF_0000) >> 16;
            let length = (words[pos] & 0x0000_FFFF) as usize;
            let identifier = words[pos + 1];

            let value_start = pos + 2;
            let value_end = value_start + length;
            if value_end > words.len() {
                return Err(ParameterError::new(
                    "Record",
                    format!(
                        "Record {} of group {} needs {} values, {} available",
                        identifier,
                        group,
                        length,
                        words.len() - value_start
                    ),
                )
                .into());
            }
            let values = &words[value_start..value_end];

            match group {
                GRPID_NODE => self.apply_node(&mut info.node, identifier, values)?,
                GRPID_TRANS => info.transport.apply(identifier, values)?,
                _ => {
                    return Err(
                        ParameterError::new("Group", format!("Unknown Group: {}", group)).into(),
                    )
                }
            }

            pos = value_end;
        }

        debug!("Decoded hardware info: {:?}", info);
        Ok(info)
    }

    fn apply_node(
        &self,
        node: &mut NodeParams,
        identifier: u32,
        values: &[u32],
    ) -> Result<(), NodeError> {
        match identifier {
            NODE_TYPE => node.node_type = Some(single("NODE_TYPE", values)?),
            NODE_ID => {
                let node_id = single("NODE_ID", values)?;
                let node_id = u16::try_from(node_id).map_err(|_| {
                    ParameterError::new("NODE_ID", format!("Out of range: {}", node_id))
                })?;
                node.node_id = Some(node_id);
            }
            NODE_HW_GEN => node.hw_ver = Some((single("NODE_HW_GEN", values)? & 0xFF) as u8),
            NODE_DESIGN_VER => {
                let version = ProtocolVersion::from_word(single("NODE_DESIGN_VER", values)?);
                version.check(self.client_version)?;
                node.version = Some(version);
            }
            NODE_SERIAL_NUM => node.serial_number = Some(single("NODE_SERIAL_NUM", values)?),
            NODE_FPGA_DNA => match values {
                [low, high] => node.fpga_dna = Some(((*high as u64) << 32) | *low as u64),
                _ => return Err(ParameterError::new("NODE_FPGA_DNA", "Incorrect length").into()),
            },
            _ => {
                return Err(
                    ParameterError::new(identifier.to_string(), "Unknown node parameter").into(),
                )
            }
        }
        Ok(())
    }
}

fn single(name: &str, values: &[u32]) -> Result<u32, ParameterError> {
    match values {
        [value] => Ok(*value),
        _ => Err(ParameterError::new(name, "Incorrect length")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TRANSPORT_UNICAST_PORT;
    use crate::version::WARPNET_VERSION;

    fn record(group: u32, identifier: u32, values: &[u32]) -> Vec<u32> {
        let mut words = vec![(group << 16) | values.len() as u32, identifier];
        words.extend_from_slice(values);
        words
    }

    fn hw_info_words() -> Vec<u32> {
        let mut words = Vec::new();
        words.extend(record(GRPID_NODE, NODE_TYPE, &[0x0000_0000]));
        words.extend(record(GRPID_NODE, NODE_ID, &[3]));
        words.extend(record(GRPID_NODE, NODE_HW_GEN, &[0x1203]));
        words.extend(record(GRPID_NODE, NODE_DESIGN_VER, &[0x0001_0000]));
        words.extend(record(GRPID_NODE, NODE_SERIAL_NUM, &[1234]));
        words.extend(record(GRPID_NODE, NODE_FPGA_DNA, &[0x89AB_CDEF, 0x0123_4567]));
        words.extend(record(GRPID_TRANS, TRANSPORT_UNICAST_PORT, &[9500]));
        words
    }

    #[test]
    fn test_decode_hw_info() {
        let decoder = ParameterDecoder::new(WARPNET_VERSION);
        let info = decoder.decode(&hw_info_words()).unwrap();

        assert_eq!(info.node.node_type, Some(0));
        assert_eq!(info.node.node_id, Some(3));
        assert_eq!(info.node.hw_ver, Some(3));
        assert_eq!(info.node.version, Some(ProtocolVersion::new(1, 0, 0)));
        assert_eq!(info.node.serial_number, Some(1234));
        assert_eq!(info.node.fpga_dna, Some(0x0123_4567_89AB_CDEF));
        assert_eq!(info.transport.unicast_port, Some(9500));
    }

    #[test]
    fn test_decode_is_idempotent() {
        let decoder = ParameterDecoder::new(WARPNET_VERSION);
        let words = hw_info_words();
        assert_eq!(decoder.decode(&words).unwrap(), decoder.decode(&words).unwrap());
    }

    #[test]
    fn test_design_version_record() {
        let decoder = ParameterDecoder::new(ProtocolVersion::new(1, 2, 0));
        let info = decoder
            .decode(&record(GRPID_NODE, NODE_DESIGN_VER, &[0x0001_0203]))
            .unwrap();
        assert_eq!(info.node.version, Some(ProtocolVersion::new(1, 2, 3)));

        let err = ParameterDecoder::new(ProtocolVersion::new(1, 3, 0))
            .decode(&record(GRPID_NODE, NODE_DESIGN_VER, &[0x0001_0203]))
            .unwrap_err();
        assert!(matches!(err, NodeError::Version(_)));
    }

    #[test]
    fn test_decode_errors() {
        let decoder = ParameterDecoder::new(WARPNET_VERSION);

        // Wrong arity
        let err = decoder
            .decode(&record(GRPID_NODE, NODE_ID, &[1, 2]))
            .unwrap_err();
        match err {
            NodeError::Parameter(e) => assert_eq!(e.name, "NODE_ID"),
            other => panic!("unexpected error: {other:?}"),
        }

        // Node ids are 16 bits wide; nothing is kept from a failed stream
        let mut words = record(GRPID_NODE, NODE_TYPE, &[0]);
        words.extend(record(GRPID_NODE, NODE_ID, &[0x0001_0003]));
        let err = decoder.decode(&words).unwrap_err();
        match err {
            NodeError::Parameter(e) => {
                assert_eq!(e.name, "NODE_ID");
                assert!(e.reason.contains("65539"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            decoder
                .decode(&record(GRPID_NODE, NODE_ID, &[0xFFFF]))
                .unwrap()
                .node
                .node_id,
            Some(0xFFFF)
        );

        // Unknown identifier, unknown group
        assert!(decoder.decode(&record(GRPID_NODE, 99, &[1])).is_err());
        assert!(decoder.decode(&record(0x42, NODE_ID, &[1])).is_err());

        // Record runs past the end
        assert!(decoder.decode(&[(GRPID_NODE << 16) | 3, NODE_ID, 1]).is_err());
        assert!(decoder.decode(&[1]).is_err());
    }

    #[test]
    fn test_decode_empty() {
        let decoder = ParameterDecoder::new(WARPNET_VERSION);
        assert_eq!(decoder.decode(&[]).unwrap(), HardwareInfo::default());
    }
}
