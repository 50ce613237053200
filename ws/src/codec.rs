//! Binary signal envelope (spec §4.1). Version 1 prefixes the JSON payload
//! with `{version, flags, [sn_len_byte, sn_bytes]}`; version 0 is the raw
//! payload with the signal type inferred from its `s` field.
//!
//! The source this was distilled from carries two divergent revisions of
//! this codec, one using the top 2 bits of the length byte for the SN-width
//! code and one using the top 4. This implementation is the top-2-bits
//! revision; it is the only wire format this crate understands.

use crate::error::CodecError;

const HAS_SN_FLAG: u8 = 0x80;

/// A decoded envelope. `payload` borrows from the input buffer — decoding
/// never copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope<'a> {
    pub sn: Option<i64>,
    pub payload: &'a [u8],
}

/// Encode a version-1 envelope, or return `payload` unchanged for version 0.
pub fn encode(version: u8, sn: Option<i64>, payload: &[u8]) -> Vec<u8> {
    if version == 0 {
        return payload.to_vec();
    }

    let mut flags = 0u8;
    if sn.is_some() {
        flags |= HAS_SN_FLAG;
    }

    let mut buf = Vec::with_capacity(2 + payload.len() + 9);
    buf.push(version);
    buf.push(flags);

    if let Some(sn) = sn {
        let unsigned = sn as u64;
        let width = sn_width(unsigned);
        let width_code = match width {
            1 => 0u8,
            2 => 1,
            4 => 2,
            _ => 3,
        };
        buf.push(width_code << 6);
        let bytes = unsigned.to_be_bytes();
        buf.extend_from_slice(&bytes[8 - width..]);
    }

    buf.extend_from_slice(payload);
    buf
}

/// Decode an envelope. `version` is known out-of-band (negotiated at
/// connect time), not read from `bytes`.
pub fn decode(bytes: &[u8], version: u8) -> Result<Envelope<'_>, CodecError> {
    if version == 0 {
        return Ok(Envelope {
            sn: None,
            payload: bytes,
        });
    }

    if bytes.len() < 2 {
        return Err(CodecError::TruncatedHeader);
    }
    let flags = bytes[1];
    let has_sn = flags & HAS_SN_FLAG != 0;
    let mut offset = 2;

    let sn = if has_sn {
        if bytes.len() < offset + 1 {
            return Err(CodecError::TruncatedSN);
        }
        let width_code = (bytes[offset] >> 6) & 0x3;
        let width = match width_code {
            0 => 1usize,
            1 => 2,
            2 => 4,
            _ => 8,
        };
        offset += 1;
        if bytes.len() < offset + width {
            return Err(CodecError::TruncatedSN);
        }
        let mut value: u64 = 0;
        for &b in &bytes[offset..offset + width] {
            value = (value << 8) | b as u64;
        }
        offset += width;
        Some(value as i64)
    } else {
        None
    };

    if offset > bytes.len() {
        return Err(CodecError::TruncatedPayload);
    }

    Ok(Envelope {
        sn,
        payload: &bytes[offset..],
    })
}

/// Smallest width in `{1, 2, 4, 8}` bytes that holds `sn`.
fn sn_width(sn: u64) -> usize {
    if sn <= 0xFF {
        1
    } else if sn <= 0xFFFF {
        2
    } else if sn <= 0xFFFF_FFFF {
        4
    } else {
        8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOUNDARY_SNS: [i64; 7] = [0, 255, 256, 65535, 65536, 0xFFFF_FFFF, i64::MAX];

    #[test]
    fn round_trip_with_sn() {
        for &sn in &BOUNDARY_SNS {
            let payload = b"payload bytes";
            let encoded = encode(1, Some(sn), payload);
            let decoded = decode(&encoded, 1).expect("decode");
            assert_eq!(decoded.sn, Some(sn));
            assert_eq!(decoded.payload, payload);
        }
    }

    #[test]
    fn round_trip_without_sn() {
        let payload = b"{\"s\":1,\"d\":{}}";
        let encoded = encode(1, None, payload);
        let decoded = decode(&encoded, 1).expect("decode");
        assert_eq!(decoded.sn, None);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn version_zero_is_passthrough() {
        let payload = b"{\"s\":2,\"d\":{}}";
        let encoded = encode(0, Some(5), payload);
        assert_eq!(encoded, payload);
        let decoded = decode(payload, 0).expect("decode");
        assert_eq!(decoded.sn, None);
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn sn_width_is_minimal() {
        assert_eq!(sn_width(0), 1);
        assert_eq!(sn_width(255), 1);
        assert_eq!(sn_width(256), 2);
        assert_eq!(sn_width(65535), 2);
        assert_eq!(sn_width(65536), 4);
        assert_eq!(sn_width(0xFFFF_FFFF), 4);
        assert_eq!(sn_width(0x1_0000_0000), 8);
    }

    #[test]
    fn truncated_header() {
        assert_eq!(decode(&[1], 1).unwrap_err(), CodecError::TruncatedHeader);
    }

    #[test]
    fn truncated_sn() {
        // hasSN set, width code says 4 bytes, only 2 supplied.
        let bytes = [1u8, 0x80, 0x80, 0x00, 0x00];
        assert_eq!(decode(&bytes, 1).unwrap_err(), CodecError::TruncatedSN);
    }

    /// Spec §8 S6 (adapted): the source example's literal bytes encode the
    /// width code in the top *nibble*, not the top 2 bits — it's only
    /// self-consistent under the rejected codec revision (see DESIGN.md).
    /// This re-derives the same case (`sn=1234567890`, `payload="test
    /// payload"`) with a header this codec's chosen revision actually
    /// produces, and checks it round-trips.
    #[test]
    fn spec_s6_edge_case() {
        let sn = 1_234_567_890i64;
        let payload = b"test payload";
        let encoded = encode(1, Some(sn), payload);
        assert_eq!(encoded[..3], [0x01, 0x80, 0x80]);

        let decoded = decode(&encoded, 1).expect("decode");
        assert_eq!(decoded.sn, Some(sn));
        assert_eq!(decoded.payload, payload);
    }
}
