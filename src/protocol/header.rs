use super::FunctionId;
use crate::error::ProtocolError;

/// First byte of every request frame.
pub const MAGIC_NUMBER: u8 = 0xDE;

/// Size of the fixed request header: magic (1) + seq_num (4) + length (4).
pub const REQUEST_HEADER_LEN: usize = 9;

/// Size of the function identifier that opens every request payload.
pub const FUNCTION_ID_LEN: usize = 4;

/// Upper bound on a request payload unless configured otherwise (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_LENGTH: u32 = 16 * 1024 * 1024;

/// Fixed request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcHeader {
    pub magic: u8,
    pub seq_num: u32,
    /// Length of the payload that follows, function id included
    pub length: u32,
}

impl RpcHeader {
    /// Header for a payload of `length` bytes.
    #[must_use]
    pub fn new(seq_num: u32, length: u32) -> Self {
        Self {
            magic: MAGIC_NUMBER,
            seq_num,
            length,
        }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; REQUEST_HEADER_LEN] {
        let mut buf = [0u8; REQUEST_HEADER_LEN];
        buf[0] = self.magic;
        buf[1..5].copy_from_slice(&self.seq_num.to_be_bytes());
        buf[5..9].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Parse a header, rejecting anything that does not start with [`MAGIC_NUMBER`].
    pub fn decode(buf: &[u8; REQUEST_HEADER_LEN]) -> Result<Self, ProtocolError> {
        if buf[0] != MAGIC_NUMBER {
            return Err(ProtocolError::BadMagic { found: buf[0] });
        }
        Ok(Self {
            magic: buf[0],
            seq_num: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
            length: u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]),
        })
    }

    /// Check the declared length against protocol and configured bounds.
    ///
    /// Returns the number of payload bytes to read next.
    pub fn payload_len(&self, max: u32) -> Result<usize, ProtocolError> {
        if (self.length as usize) < FUNCTION_ID_LEN {
            return Err(ProtocolError::PayloadTooShort {
                length: self.length,
            });
        }
        if self.length > max {
            return Err(ProtocolError::PayloadTooLarge {
                length: self.length,
                max,
            });
        }
        Ok(self.length as usize)
    }
}

/// Split a request payload into its function id and encoded arguments.
pub fn split_function_id(payload: &[u8]) -> Result<(FunctionId, &[u8]), ProtocolError> {
    if payload.len() < FUNCTION_ID_LEN {
        return Err(ProtocolError::PayloadTooShort {
            length: payload.len() as u32,
        });
    }
    let (id, args) = payload.split_at(FUNCTION_ID_LEN);
    let id = u32::from_be_bytes([id[0], id[1], id[2], id[3]]);
    Ok((FunctionId(id), args))
}

/// Build a complete request frame. Used by clients and tests.
#[must_use]
pub fn encode_request(seq_num: u32, function: FunctionId, args: &[u8]) -> Vec<u8> {
    let length = (FUNCTION_ID_LEN + args.len()) as u32;
    let mut frame = Vec::with_capacity(REQUEST_HEADER_LEN + length as usize);
    frame.extend_from_slice(&RpcHeader::new(seq_num, length).encode());
    frame.extend_from_slice(&function.get().to_be_bytes());
    frame.extend_from_slice(args);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout_is_big_endian() {
        let bytes = RpcHeader::new(0x0102_0304, 0x0000_0010).encode();
        assert_eq!(bytes, [0xDE, 1, 2, 3, 4, 0, 0, 0, 0x10]);
        assert_eq!(RpcHeader::decode(&bytes).unwrap().seq_num, 0x0102_0304);
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut bytes = RpcHeader::new(1, 4).encode();
        bytes[0] = 0x00;
        assert_eq!(
            RpcHeader::decode(&bytes),
            Err(ProtocolError::BadMagic { found: 0x00 })
        );
    }

    #[test]
    fn test_payload_len_bounds() {
        assert_eq!(
            RpcHeader::new(1, 3).payload_len(1024),
            Err(ProtocolError::PayloadTooShort { length: 3 })
        );
        assert_eq!(
            RpcHeader::new(1, 2048).payload_len(1024),
            Err(ProtocolError::PayloadTooLarge {
                length: 2048,
                max: 1024
            })
        );
        assert_eq!(RpcHeader::new(1, 4).payload_len(1024), Ok(4));
    }

    #[test]
    fn test_encode_request_frames_function_id_and_args() {
        let frame = encode_request(7, FunctionId::new(0xAABB_CCDD), b"hi");
        let mut header = [0u8; REQUEST_HEADER_LEN];
        header.copy_from_slice(&frame[..REQUEST_HEADER_LEN]);
        let header = RpcHeader::decode(&header).unwrap();
        assert_eq!(header.seq_num, 7);
        assert_eq!(header.length, 6);

        let (id, args) = split_function_id(&frame[REQUEST_HEADER_LEN..]).unwrap();
        assert_eq!(id, FunctionId::new(0xAABB_CCDD));
        assert_eq!(args, b"hi");
    }
}
