//! Modbus-TCP framing as spoken by the unit's IAM module.

use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

/// Exception code the IAM returns when it has too many requests in flight.
pub const SERVER_BUSY: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub unit_id: u8,
    pub transaction_id: u16,
    pub operation: Operation,
}

/// Addresses are the 1-based register numbers from the unit's documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    GetHoldings { address: u16, count: u16 },
    SetHolding { address: u16, value: u16 },
}

#[derive(Debug, PartialEq, Eq)]
pub struct Response {
    pub unit_id: u8,
    pub transaction_id: u16,
    pub kind: ResponseKind,
}

impl Response {
    pub fn exception_code(&self) -> Option<u8> {
        match &self.kind {
            ResponseKind::ErrorCode(c) => Some(*c),
            ResponseKind::GetHoldings { .. } | ResponseKind::SetHolding { .. } => None,
        }
    }

    pub fn is_server_busy(&self) -> bool {
        self.exception_code() == Some(SERVER_BUSY)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ResponseKind {
    ErrorCode(u8),
    GetHoldings { values: Vec<u16> },
    SetHolding { address: u16, value: u16 },
}

#[derive(Debug, Default)]
pub struct ModbusTCPCodec {}

impl Encoder<&Request> for ModbusTCPCodec {
    type Error = std::io::Error;
    fn encode(&mut self, req: &Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (function, address, argument) = match req.operation {
            Operation::GetHoldings { address, count } => (3, address, count),
            Operation::SetHolding { address, value } => (6, address, value),
        };
        let Some(address) = address.checked_sub(1) else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "register addresses start at 1",
            ));
        };
        dst.reserve(12);
        dst.put_u16(req.transaction_id);
        dst.put_u16(0);
        // Unit id, function code and two 16-bit arguments follow.
        dst.put_u16(6);
        dst.put_u8(req.unit_id);
        dst.put_u8(function);
        dst.put_u16(address);
        dst.put_u16(argument);
        trace!(message = "sending encoded", buffer = ?dst);
        Ok(())
    }
}

impl Decoder for ModbusTCPCodec {
    type Item = Response;
    type Error = std::io::Error;
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            trace!(message = "attempt at decoding", buffer = ?src);
            let Some((header, remainder)) = src.split_first_chunk::<6>() else {
                return Ok(None);
            };
            let transaction_id = u16::from_be_bytes([header[0], header[1]]);
            let proto = u16::from_be_bytes([header[2], header[3]]);
            if proto != 0 {
                src.advance(1);
                continue;
            }
            let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
            let Some((data, _)) = remainder.split_at_checked(length) else {
                return Ok(None);
            };
            let [unit_id, function_code, code, ..] = *data else {
                src.advance(1);
                continue;
            };
            if function_code > 0x80 {
                src.advance(6 + length);
                return Ok(Some(Response {
                    transaction_id,
                    unit_id,
                    kind: ResponseKind::ErrorCode(code),
                }));
            }
            // The byte count is unreliable for large reads on the IAM, so the MBAP length is what
            // delimits the payload.
            let kind = match (function_code, &data[2..]) {
                (3, [_, values @ ..]) if values.len() % 2 == 0 => ResponseKind::GetHoldings {
                    values: values
                        .chunks_exact(2)
                        .map(|w| u16::from_be_bytes([w[0], w[1]]))
                        .collect(),
                },
                (6, [a, b, c, d]) => ResponseKind::SetHolding {
                    address: u16::from_be_bytes([*a, *b]) + 1,
                    value: u16::from_be_bytes([*c, *d]),
                },
                _ => {
                    src.advance(6 + length);
                    continue;
                }
            };
            src.advance(6 + length);
            return Ok(Some(Response { transaction_id, unit_id, kind }));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode(operation: Operation) -> Vec<u8> {
        let mut dst = BytesMut::new();
        let request = Request { unit_id: 1, transaction_id: 0x0102, operation };
        ModbusTCPCodec {}.encode(&request, &mut dst).unwrap();
        dst.to_vec()
    }

    #[test]
    fn read_request_is_zero_based() {
        assert_eq!(
            encode(Operation::GetHoldings { address: 2001, count: 1 }),
            [1, 2, 0, 0, 0, 6, 1, 3, 0x07, 0xD0, 0, 1]
        );
    }

    #[test]
    fn write_request() {
        assert_eq!(
            encode(Operation::SetHolding { address: 1162, value: 3 }),
            [1, 2, 0, 0, 0, 6, 1, 6, 0x04, 0x89, 0, 3]
        );
    }

    #[test]
    fn register_zero_is_rejected() {
        let mut dst = BytesMut::new();
        let operation = Operation::GetHoldings { address: 0, count: 1 };
        let request = Request { unit_id: 1, transaction_id: 1, operation };
        assert!(ModbusTCPCodec {}.encode(&request, &mut dst).is_err());
    }

    #[test]
    fn decodes_split_frames() {
        let mut codec = ModbusTCPCodec {};
        let mut src = BytesMut::from(&[0, 7, 0, 0, 0, 7, 1, 3, 4, 0x00][..]);
        assert_eq!(codec.decode(&mut src).unwrap(), None);
        src.extend_from_slice(&[0xD7, 0x51, 0x80, 0, 9]);
        let response = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(response.transaction_id, 7);
        assert_eq!(response.kind, ResponseKind::GetHoldings { values: vec![215, 0x5180] });
        // Trailing garbage of the next frame is left in place.
        assert_eq!(&src[..], &[0, 9]);
    }

    #[test]
    fn decodes_exceptions() {
        let mut codec = ModbusTCPCodec {};
        let mut src = BytesMut::from(&[0, 3, 0, 0, 0, 3, 1, 0x83, 6][..]);
        let response = codec.decode(&mut src).unwrap().unwrap();
        assert!(response.is_server_busy());
        assert!(src.is_empty());
    }

    #[test]
    fn decodes_write_echo() {
        let mut codec = ModbusTCPCodec {};
        let mut src = BytesMut::from(&[0, 4, 0, 0, 0, 6, 1, 6, 0x07, 0xD0, 0, 215][..]);
        let response = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(response.kind, ResponseKind::SetHolding { address: 2001, value: 215 });
    }

    #[test]
    fn skips_garbage_before_a_frame() {
        let mut codec = ModbusTCPCodec {};
        let mut src = BytesMut::from(&[0xFF, 0, 5, 0, 0, 0, 3, 1, 0x83, 2][..]);
        // The leading byte makes the protocol id non-zero so the decoder resyncs.
        let response = codec.decode(&mut src).unwrap().unwrap();
        assert_eq!(response.transaction_id, 5);
        assert_eq!(response.exception_code(), Some(2));
    }
}
