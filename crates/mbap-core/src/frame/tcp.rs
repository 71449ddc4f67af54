//! MBAP framing: the 7-byte Modbus/TCP header followed by the PDU.

use crate::encoding::{Reader, Writer};
use crate::{DecodeError, EncodeError};

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

pub const MBAP_HEADER_LEN: usize = 7;
/// Smallest ADU that can carry a frame: header plus the function code byte.
pub const MIN_ADU_LEN: usize = MBAP_HEADER_LEN + 1;
pub const MAX_PDU_LEN: usize = 253;
pub const MAX_ADU_LEN: usize = MBAP_HEADER_LEN + MAX_PDU_LEN;

const MIN_LENGTH_FIELD: u16 = 2;
const MAX_LENGTH_FIELD: u16 = 1 + MAX_PDU_LEN as u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Length includes unit-id byte + PDU length.
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    /// Total on-wire size of the ADU this header announces.
    pub const fn adu_len(&self) -> usize {
        6 + self.length as usize
    }

    pub const fn pdu_len(&self) -> usize {
        (self.length as usize).saturating_sub(1)
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_be_u16(self.transaction_id)?;
        w.write_be_u16(self.protocol_id)?;
        w.write_be_u16(self.length)?;
        w.write_u8(self.unit_id)?;
        Ok(())
    }

    /// Decodes and validates a header.
    ///
    /// A non-zero protocol id or a length that cannot describe a legal PDU
    /// means the reader is not positioned on a frame boundary.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let transaction_id = r.read_be_u16()?;
        let protocol_id = r.read_be_u16()?;
        let length = r.read_be_u16()?;
        let unit_id = r.read_u8()?;

        if protocol_id != 0 {
            return Err(DecodeError::InvalidProtocolId);
        }
        if !(MIN_LENGTH_FIELD..=MAX_LENGTH_FIELD).contains(&length) {
            return Err(DecodeError::InvalidLength);
        }

        Ok(Self {
            transaction_id,
            protocol_id,
            length,
            unit_id,
        })
    }
}

fn length_field(pdu: &[u8]) -> Result<u16, EncodeError> {
    if pdu.is_empty() {
        return Err(EncodeError::InvalidLength);
    }
    if pdu.len() > MAX_PDU_LEN {
        return Err(EncodeError::ValueOutOfRange);
    }
    // Bounded by MAX_PDU_LEN above.
    Ok(pdu.len() as u16 + 1)
}

pub fn encode_frame(
    w: &mut Writer<'_>,
    transaction_id: u16,
    unit_id: u8,
    pdu: &[u8],
) -> Result<(), EncodeError> {
    let header = MbapHeader {
        transaction_id,
        protocol_id: 0,
        length: length_field(pdu)?,
        unit_id,
    };
    header.encode(w)?;
    w.write_all(pdu)?;
    Ok(())
}

pub fn decode_frame<'a>(r: &mut Reader<'a>) -> Result<(MbapHeader, &'a [u8]), DecodeError> {
    let header = MbapHeader::decode(r)?;
    let pdu = r.read_exact(header.pdu_len())?;
    Ok((header, pdu))
}

/// One owned Modbus/TCP message.
///
/// The PDU always holds at least the function code and never more than
/// [`MAX_PDU_LEN`] bytes, so encoding a `Frame` cannot fail.
#[cfg(feature = "alloc")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    transaction_id: u16,
    unit_id: u8,
    pdu: Vec<u8>,
}

#[cfg(feature = "alloc")]
impl Frame {
    pub fn new(
        transaction_id: u16,
        unit_id: u8,
        pdu: impl Into<Vec<u8>>,
    ) -> Result<Self, EncodeError> {
        let pdu = pdu.into();
        length_field(&pdu)?;
        Ok(Self {
            transaction_id,
            unit_id,
            pdu,
        })
    }

    pub fn transaction_id(&self) -> u16 {
        self.transaction_id
    }

    /// Always zero; frames with any other protocol id are never constructed.
    pub fn protocol_id(&self) -> u16 {
        0
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn pdu(&self) -> &[u8] {
        &self.pdu
    }

    pub fn into_pdu(self) -> Vec<u8> {
        self.pdu
    }

    pub fn function_byte(&self) -> u8 {
        self.pdu[0]
    }

    /// PDU bytes after the function code.
    pub fn payload(&self) -> &[u8] {
        &self.pdu[1..]
    }

    pub fn encoded_len(&self) -> usize {
        MBAP_HEADER_LEN + self.pdu.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.transaction_id.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&(self.pdu.len() as u16 + 1).to_be_bytes());
        out.push(self.unit_id);
        out.extend_from_slice(&self.pdu);
        out
    }
}

/// Prepends an MBAP header to `pdu`.
#[cfg(feature = "alloc")]
pub fn encode(unit_id: u8, transaction_id: u16, pdu: &[u8]) -> Result<Vec<u8>, EncodeError> {
    Ok(Frame::new(transaction_id, unit_id, pdu)?.encode())
}

/// Result of looking for one frame at the start of a byte buffer.
#[cfg(feature = "alloc")]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame occupying the first `consumed` bytes.
    Frame { frame: Frame, consumed: usize },
    /// The buffer holds a plausible prefix; wait for more input.
    NeedMoreBytes,
    /// The buffer does not start on a frame boundary.
    Invalid(DecodeError),
}

#[cfg(feature = "alloc")]
pub fn decode(bytes: &[u8]) -> Decoded {
    if bytes.len() < MIN_ADU_LEN {
        return Decoded::NeedMoreBytes;
    }

    let mut reader = Reader::new(bytes);
    let header = match MbapHeader::decode(&mut reader) {
        Ok(header) => header,
        Err(err) => return Decoded::Invalid(err),
    };

    let adu_len = header.adu_len();
    if bytes.len() < adu_len {
        return Decoded::NeedMoreBytes;
    }

    Decoded::Frame {
        frame: Frame {
            transaction_id: header.transaction_id,
            unit_id: header.unit_id,
            pdu: bytes[MBAP_HEADER_LEN..adu_len].to_vec(),
        },
        consumed: adu_len,
    }
}
