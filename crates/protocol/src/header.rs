use std::collections::HashMap;

use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Wire header carrying the (percent-encoded) source file name.
pub const HEADER_FILE_NAME: &str = "chunkinfo-filename";
/// Wire header carrying the total piece count declared by the sender.
pub const HEADER_NUM_PARTS: &str = "chunkinfo-numparts";
/// Wire header carrying the 0-based piece index.
pub const HEADER_PART_NUM: &str = "chunkinfo-partnum";
/// Wire header carrying the opaque upload identifier.
pub const HEADER_UPLOAD_ID: &str = "chunkinfo-uploadid";

/// Per-chunk metadata accompanying the raw piece bytes.
///
/// `num_parts == 0` declares a zero-byte file; the receiver completes the
/// transfer immediately without any piece accounting. For all other values,
/// `part_num` lies in `[0, num_parts)` and every piece of one upload declares
/// the same `num_parts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkHeader {
    pub file_name: String,
    pub num_parts: u32,
    pub part_num: u32,
    pub upload_id: String,
}

impl ChunkHeader {
    /// Flattens the header into string key/value pairs for transports that
    /// carry metadata as HTTP-style headers. The file name is percent-encoded.
    pub fn to_wire(&self) -> HashMap<String, String> {
        let mut map = HashMap::with_capacity(4);
        map.insert(
            HEADER_FILE_NAME.to_string(),
            utf8_percent_encode(&self.file_name, NON_ALPHANUMERIC).to_string(),
        );
        map.insert(HEADER_NUM_PARTS.to_string(), self.num_parts.to_string());
        map.insert(HEADER_PART_NUM.to_string(), self.part_num.to_string());
        map.insert(HEADER_UPLOAD_ID.to_string(), self.upload_id.clone());
        map
    }

    /// Parses a header map produced by [`ChunkHeader::to_wire`].
    pub fn from_wire(headers: &HashMap<String, String>) -> Result<Self, ProtocolError> {
        let raw_name = require(headers, HEADER_FILE_NAME)?;
        let file_name = percent_decode_str(raw_name)
            .decode_utf8()
            .map_err(|e| ProtocolError::InvalidHeader(HEADER_FILE_NAME, e.to_string()))?
            .into_owned();

        Ok(Self {
            file_name,
            num_parts: parse_u32(headers, HEADER_NUM_PARTS)?,
            part_num: parse_u32(headers, HEADER_PART_NUM)?,
            upload_id: require(headers, HEADER_UPLOAD_ID)?.to_string(),
        })
    }
}

fn require<'a>(
    headers: &'a HashMap<String, String>,
    key: &'static str,
) -> Result<&'a str, ProtocolError> {
    headers
        .get(key)
        .map(String::as_str)
        .ok_or(ProtocolError::MissingHeader(key))
}

fn parse_u32(headers: &HashMap<String, String>, key: &'static str) -> Result<u32, ProtocolError> {
    require(headers, key)?
        .parse()
        .map_err(|e: std::num::ParseIntError| ProtocolError::InvalidHeader(key, e.to_string()))
}
