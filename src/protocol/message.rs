use super::{SessionError, SessionResult};
use crate::crypto::CkksContext;
use crate::handle::{CiphertextHandle, Packing};
use crate::wire::{read_ciphertext, write_ciphertext};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{Read, Write};

/// Largest tensor rank accepted in a payload.
pub const MAX_RANK: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Parameters = 1,
    EvaluationKeys = 2,
    Execute = 3,
    ReluRequest = 4,
    ReluResponse = 5,
    BoundedReluRequest = 6,
    Result = 8,
}

impl TryFrom<u8> for MessageKind {
    type Error = SessionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => MessageKind::Parameters,
            2 => MessageKind::EvaluationKeys,
            3 => MessageKind::Execute,
            4 => MessageKind::ReluRequest,
            5 => MessageKind::ReluResponse,
            6 => MessageKind::BoundedReluRequest,
            8 => MessageKind::Result,
            other => return Err(SessionError::UnknownMessageKind(other)),
        })
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Envelope: a kind tag, the number of ciphertexts in the payload, and the
/// payload bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    pub count: u64,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(kind: MessageKind, count: u64, payload: Vec<u8>) -> Self {
        Self {
            kind,
            count,
            payload,
        }
    }
}

pub fn write_ciphertexts<W: Write>(
    handles: &[CiphertextHandle],
    context: &CkksContext,
    writer: &mut W,
) -> SessionResult<()> {
    for handle in handles {
        write_ciphertext(handle, context, writer)?;
    }
    Ok(())
}

pub fn read_ciphertexts<R: Read>(
    reader: &mut R,
    count: u64,
    context: &CkksContext,
    packing: Packing,
) -> SessionResult<Vec<CiphertextHandle>> {
    (0..count)
        .map(|_| Ok(read_ciphertext(reader, context, packing)?))
        .collect()
}

/// `[u64 rank][u64 dim]*`
pub fn write_shape<W: Write>(shape: &[usize], writer: &mut W) -> SessionResult<()> {
    writer.write_u64::<LittleEndian>(shape.len() as u64)?;
    for &dim in shape {
        writer.write_u64::<LittleEndian>(dim as u64)?;
    }
    Ok(())
}

pub fn read_shape<R: Read>(reader: &mut R) -> SessionResult<Vec<usize>> {
    let rank = reader.read_u64::<LittleEndian>()?;
    if rank > MAX_RANK {
        return Err(SessionError::Payload(format!("rank {rank} exceeds {MAX_RANK}")));
    }
    (0..rank)
        .map(|_| Ok(reader.read_u64::<LittleEndian>()? as usize))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn kinds_roundtrip_through_tags() {
        for kind in [
            MessageKind::Parameters,
            MessageKind::EvaluationKeys,
            MessageKind::Execute,
            MessageKind::ReluRequest,
            MessageKind::ReluResponse,
            MessageKind::BoundedReluRequest,
            MessageKind::Result,
        ] {
            assert_eq!(MessageKind::try_from(kind as u8).unwrap(), kind);
        }
        assert!(matches!(
            MessageKind::try_from(7),
            Err(SessionError::UnknownMessageKind(7))
        ));
    }

    #[test]
    fn shape_codec() {
        let mut bytes = Vec::new();
        write_shape(&[1, 1, 5, 5], &mut bytes).unwrap();
        assert_eq!(bytes.len(), 40);
        assert_eq!(read_shape(&mut Cursor::new(&bytes)).unwrap(), vec![1, 1, 5, 5]);

        let mut bad = Vec::new();
        bad.write_u64::<LittleEndian>(MAX_RANK + 1).unwrap();
        assert!(matches!(
            read_shape(&mut Cursor::new(&bad)),
            Err(SessionError::Payload(_))
        ));
    }
}
