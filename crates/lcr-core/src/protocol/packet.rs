//! Frame encoding/decoding
//!
//! Wire format of a frame:
//! - 2 bytes: HEADER HEADER
//! - 1 byte each: destination, source, status, data length
//! - N bytes: data (message id followed by its parameters)
//! - 2 bytes: CRC-16, low byte first
//!
//! Any HEADER or ESCAPE byte after the leading header pair is preceded by an
//! ESCAPE byte. The CRC runs over the escaped stream, so the escape byte is
//! folded into the register before the byte it guards.

use byteorder::{ByteOrder, LittleEndian};

use super::{ProtocolError, ESCAPE, HEADER, POLYNOMIAL, RC_SUCCESS};

/// CRC register value before the first body byte
pub const CRC_INIT: u16 = (HEADER as u16) << 8 | HEADER as u16;

/// Status bit carrying the alternating request identifier
pub const STATUS_IDENTIFIER: u8 = 0x01;

/// Status bit requesting sequence synchronization
pub const STATUS_SYNC: u8 = 0x02;

/// Fold one byte into the CRC register, MSB first.
pub fn crc16_update(crc: u16, byte: u8) -> u16 {
    let mut crc = crc;
    for bit in (0..8).rev() {
        let carry = crc & 0x8000 != 0;
        crc = (crc << 1) | u16::from((byte >> bit) & 0x01);
        if carry {
            crc ^= POLYNOMIAL;
        }
    }
    crc
}

/// CRC of an already-escaped frame body (everything between the header pair
/// and the CRC trailer)
pub fn crc16(body: &[u8]) -> u16 {
    body.iter().fold(CRC_INIT, |crc, &b| crc16_update(crc, b))
}

/// An outgoing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Destination (LCR node) address
    pub to: u8,
    /// Source (host) address
    pub from: u8,
    /// Identifier bit in bit 0, sync flag in bit 1
    pub status: u8,
    /// Message id followed by its parameters
    pub data: Vec<u8>,
}

impl Packet {
    /// Message id carried by this packet
    pub fn message_id(&self) -> Option<u8> {
        self.data.first().copied()
    }

    /// Value of the alternating identifier bit
    pub fn identifier(&self) -> bool {
        self.status & STATUS_IDENTIFIER != 0
    }

    /// Whether the sync flag is asserted
    pub fn is_sync(&self) -> bool {
        self.status & STATUS_SYNC != 0
    }

    /// Encode the packet into a wire frame
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(2 + 4 + self.data.len() * 2 + 2);
        frame.push(HEADER);
        frame.push(HEADER);

        let mut crc = CRC_INIT;
        let header = [self.to, self.from, self.status, self.data.len() as u8];
        for &byte in header.iter().chain(self.data.iter()) {
            if byte == HEADER || byte == ESCAPE {
                frame.push(ESCAPE);
                crc = crc16_update(crc, ESCAPE);
            }
            frame.push(byte);
            crc = crc16_update(crc, byte);
        }

        let mut crc_bytes = [0u8; 2];
        LittleEndian::write_u16(&mut crc_bytes, crc);
        frame.extend_from_slice(&crc_bytes);
        frame
    }
}

/// Builder for constructing request packets
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    to: u8,
    from: u8,
    identifier: bool,
    sync: bool,
    data: Vec<u8>,
}

impl PacketBuilder {
    /// Create a new packet builder addressed from `from` to `to`
    pub fn new(to: u8, from: u8) -> Self {
        Self {
            to,
            from,
            identifier: false,
            sync: false,
            data: Vec::new(),
        }
    }

    /// Set the alternating identifier bit
    pub fn identifier(mut self, bit: bool) -> Self {
        self.identifier = bit;
        self
    }

    /// Set the synchronization bit
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Set the message id
    pub fn message(mut self, id: u8) -> Self {
        self.data.insert(0, id);
        self
    }

    /// Append a parameter byte
    pub fn byte(mut self, b: u8) -> Self {
        self.data.push(b);
        self
    }

    /// Append raw bytes
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.data.extend_from_slice(data);
        self
    }

    /// Build the packet
    pub fn build(self) -> Result<Packet, ProtocolError> {
        if self.data.is_empty() {
            return Err(ProtocolError::InvalidArgument(
                "packet has no message id".to_string(),
            ));
        }
        if self.data.len() > u8::MAX as usize {
            return Err(ProtocolError::InvalidArgument(format!(
                "packet data is {} bytes, limit is 255",
                self.data.len()
            )));
        }

        let mut status = 0u8;
        if self.identifier {
            status |= STATUS_IDENTIFIER;
        }
        if self.sync {
            status |= STATUS_SYNC;
        }

        Ok(Packet {
            to: self.to,
            from: self.from,
            status,
            data: self.data,
        })
    }
}

/// Drop the ESCAPE byte in front of every stuffed byte
pub fn unescape(escaped: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut body = Vec::with_capacity(escaped.len());
    let mut bytes = escaped.iter();
    while let Some(&byte) = bytes.next() {
        if byte == ESCAPE {
            match bytes.next() {
                Some(&stuffed) => body.push(stuffed),
                None => {
                    return Err(ProtocolError::InvalidFrame(
                        "frame ends with a lone escape byte".to_string(),
                    ))
                }
            }
        } else {
            body.push(byte);
        }
    }
    Ok(body)
}

/// Payload interpretation of a reply, selected by its return code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseData {
    /// Return code 0: a status byte (meaning depends on the request) and the field bytes
    Success {
        /// Byte after the return code, when present
        status: Option<u8>,
        /// Bytes after the status byte
        field_data: Vec<u8>,
    },
    /// Non-zero return code; the payload carries only the code
    Failure {
        /// Return code
        code: u8,
    },
}

/// A reply frame split into its fixed-offset fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    /// Destination address (the host)
    pub to: u8,
    /// Source address (the device)
    pub from: u8,
    /// Status byte echoing the identifier bit
    pub status: u8,
    /// Declared data length
    pub length: u8,
    /// Data (`length` bytes after the length byte, escapes removed)
    pub payload: Vec<u8>,
    /// First payload byte
    pub return_code: u8,
    /// Payload split by return code
    pub data: ResponseData,
    /// CRC carried in the trailer
    pub crc: u16,
    /// CRC recomputed over the received body
    pub computed_crc: u16,
}

impl ParsedResponse {
    /// Parse a raw reply buffer.
    ///
    /// The CRC is recomputed over the body as received; the header, length
    /// and data are read from the body with escape bytes removed.
    pub fn parse(raw: &[u8]) -> Result<Self, ProtocolError> {
        if raw.len() < 9 {
            return Err(ProtocolError::InvalidFrame(format!(
                "{} bytes is shorter than the smallest frame",
                raw.len()
            )));
        }
        if raw[0] != HEADER || raw[1] != HEADER {
            return Err(ProtocolError::InvalidFrame(format!(
                "bad header {:02x} {:02x}",
                raw[0], raw[1]
            )));
        }

        let trailer = raw.len() - 2;
        let body = unescape(&raw[2..trailer])?;
        if body.len() < 5 {
            return Err(ProtocolError::InvalidFrame(format!(
                "{} byte body is shorter than the smallest frame",
                body.len()
            )));
        }

        let length = body[3];
        let end = 4 + length as usize;
        if length == 0 || body.len() < end {
            return Err(ProtocolError::InvalidFrame(format!(
                "length byte {} does not fit a {} byte body",
                length,
                body.len()
            )));
        }

        let payload = body[4..end].to_vec();
        let return_code = payload[0];
        let data = if return_code == RC_SUCCESS {
            ResponseData::Success {
                status: payload.get(1).copied(),
                field_data: payload.get(2..).map(<[u8]>::to_vec).unwrap_or_default(),
            }
        } else {
            ResponseData::Failure { code: return_code }
        };

        Ok(Self {
            to: body[0],
            from: body[1],
            status: body[2],
            length,
            payload,
            return_code,
            data,
            crc: LittleEndian::read_u16(&raw[trailer..]),
            computed_crc: crc16(&raw[2..trailer]),
        })
    }

    /// Whether the trailer matches the recomputed CRC
    pub fn crc_ok(&self) -> bool {
        self.crc == self.computed_crc
    }

    /// Status byte of a successful reply
    pub fn status_byte(&self) -> Option<u8> {
        match &self.data {
            ResponseData::Success { status, .. } => *status,
            ResponseData::Failure { .. } => None,
        }
    }

    /// Field bytes of a successful reply (empty on failure)
    pub fn field_data(&self) -> &[u8] {
        match &self.data {
            ResponseData::Success { field_data, .. } => field_data,
            ResponseData::Failure { .. } => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a reply the way the device does
    fn reply(status: u8, payload: &[u8]) -> Vec<u8> {
        let packet = Packet {
            to: DEFAULT_HOST,
            from: 0x01,
            status,
            data: payload.to_vec(),
        };
        packet.to_bytes()
    }

    const DEFAULT_HOST: u8 = 0xFF;

    #[test]
    fn test_crc_known_frame() {
        // 7E 7E | 00 FF 00 01 00 | CRC
        let packet = PacketBuilder::new(0x00, 0xFF).message(0x00).build().unwrap();
        let frame = packet.to_bytes();
        assert_eq!(&frame[..7], &[0x7E, 0x7E, 0x00, 0xFF, 0x00, 0x01, 0x00]);

        let crc = crc16(&frame[2..7]);
        assert_eq!(frame[7], (crc & 0xFF) as u8);
        assert_eq!(frame[8], (crc >> 8) as u8);
    }

    #[test]
    fn test_crc_update_is_bit_serial() {
        // Folding a zero byte into a zero register leaves it zero
        assert_eq!(crc16_update(0x0000, 0x00), 0x0000);
        // With an empty high byte the data bits are shifted straight in
        assert_eq!(crc16_update(0x0000, 0xA5), 0x00A5);
        // A set MSB shifted out on the last bit triggers the polynomial
        assert_eq!(crc16_update(0x0100, 0x00), POLYNOMIAL);
    }

    #[test]
    fn test_status_bits() {
        let packet = PacketBuilder::new(1, 0xFF)
            .identifier(true)
            .sync(true)
            .message(0x20)
            .byte(2)
            .build()
            .unwrap();
        assert_eq!(packet.status, 0x03);
        assert!(packet.identifier());
        assert!(packet.is_sync());
        assert_eq!(packet.message_id(), Some(0x20));
        assert_eq!(packet.data, vec![0x20, 2]);
    }

    #[test]
    fn test_escaping_inserts_escape_bytes() {
        let plain = PacketBuilder::new(1, 2).message(0x20).byte(0x05).build().unwrap();
        let stuffed = PacketBuilder::new(1, 2)
            .message(0x20)
            .byte(HEADER)
            .build()
            .unwrap();
        let plain_frame = plain.to_bytes();
        let stuffed_frame = stuffed.to_bytes();

        assert_eq!(stuffed_frame.len(), plain_frame.len() + 1);
        assert_eq!(&stuffed_frame[7..9], &[ESCAPE, HEADER]);
    }

    #[test]
    fn test_escaped_bytes_feed_the_crc() {
        let packet = PacketBuilder::new(ESCAPE, 2).message(0x20).build().unwrap();
        let frame = packet.to_bytes();
        assert_eq!(&frame[2..4], &[ESCAPE, ESCAPE]);

        let trailer = frame.len() - 2;
        let expected = crc16(&frame[2..trailer]);
        assert_eq!(LittleEndian::read_u16(&frame[trailer..]), expected);
    }

    #[test]
    fn test_parse_success_reply() {
        let raw = reply(0x01, &[0x00, 0x12, 0x00, 0x00, 0x00, 0x2A]);
        let parsed = ParsedResponse::parse(&raw).unwrap();

        assert_eq!(parsed.to, 0xFF);
        assert_eq!(parsed.from, 0x01);
        assert_eq!(parsed.length, 6);
        assert_eq!(parsed.return_code, 0);
        assert_eq!(parsed.status_byte(), Some(0x12));
        assert_eq!(parsed.field_data(), &[0, 0, 0, 42]);
        assert!(parsed.crc_ok());
    }

    #[test]
    fn test_parse_failure_reply() {
        let raw = reply(0x00, &[0x26]);
        let parsed = ParsedResponse::parse(&raw).unwrap();
        assert_eq!(parsed.data, ResponseData::Failure { code: 0x26 });
        assert_eq!(parsed.status_byte(), None);
        assert!(parsed.field_data().is_empty());
    }

    #[test]
    fn test_parse_rejects_truncated() {
        assert!(ParsedResponse::parse(&[0x7E, 0x7E, 0x00]).is_err());

        let mut raw = reply(0x00, &[0x00, 0x00, 0x01, 0x02]);
        raw.truncate(raw.len() - 3);
        assert!(ParsedResponse::parse(&raw).is_err());
    }

    #[test]
    fn test_corruption_changes_crc() {
        let mut raw = reply(0x00, &[0x00, 0x00, 0x00, 0x00, 0x00, 0x07]);
        raw[9] ^= 0x01;
        let parsed = ParsedResponse::parse(&raw).unwrap();
        assert!(!parsed.crc_ok());
    }

    #[test]
    fn test_parse_unescapes_field_data() {
        let raw = reply(0x01, &[0x00, 0x01, 0x00, 0x00, 0x00, HEADER]);
        assert_eq!(&raw[11..13], &[ESCAPE, HEADER]);

        let parsed = ParsedResponse::parse(&raw).unwrap();
        assert_eq!(parsed.length, 6);
        assert_eq!(parsed.field_data(), &[0x00, 0x00, 0x00, 0x7E]);
        assert!(parsed.crc_ok());

        let raw = reply(0x01, &[0x00, 0x01, ESCAPE, 0x00, 0x00, ESCAPE]);
        let parsed = ParsedResponse::parse(&raw).unwrap();
        assert_eq!(parsed.field_data(), &[0x1B, 0x00, 0x00, 0x1B]);
        assert!(parsed.crc_ok());
    }

    #[test]
    fn test_parse_unescapes_header_bytes() {
        let raw = Packet {
            to: HEADER,
            from: ESCAPE,
            status: 0x00,
            data: vec![0x00],
        }
        .to_bytes();
        let parsed = ParsedResponse::parse(&raw).unwrap();
        assert_eq!(parsed.to, HEADER);
        assert_eq!(parsed.from, ESCAPE);
        assert_eq!(parsed.return_code, 0x00);
    }

    #[test]
    fn test_lone_escape_is_rejected() {
        assert_eq!(unescape(&[0x01, ESCAPE, ESCAPE, 0x02]).unwrap(), vec![0x01, ESCAPE, 0x02]);
        assert!(matches!(
            unescape(&[0x01, ESCAPE]),
            Err(ProtocolError::InvalidFrame(_))
        ));

        // body ends in an escape right before the trailer
        let raw = [HEADER, HEADER, 0xFF, 0x00, 0x00, 0x01, 0x00, ESCAPE, 0x12, 0x34];
        assert!(matches!(
            ParsedResponse::parse(&raw),
            Err(ProtocolError::InvalidFrame(_))
        ));
    }
}
