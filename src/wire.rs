//! Binary wire formats shared by both session peers.
//!
//! Ciphertext layout, all integers little endian:
//!
//! | field | bytes |
//! |---|---|
//! | parms id | 32 |
//! | NTT-form flag | 1 |
//! | component count | 8 |
//! | ring degree | 8 |
//! | modulus-chain length | 8 |
//! | scale (`f64`) | 8 |
//! | coefficients | 8 each, component-major, then channel, then coefficient |
//!
//! A component count of zero encodes a formally-zero handle. Packing is not
//! part of the layout; the receiver supplies its configured packing.

use crate::crypto::{CkksContext, CkksError, CkksParams, ParmsId};
use crate::handle::{CipherState, CiphertextHandle, Packing};
use crate::keys::{KeyError, PublicKey, RelinearizationKey};
use crate::rings::{RingError, RnsBasis, RnsPoly};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};
use std::sync::Arc;
use thiserror::Error;

/// Bytes before the coefficient data.
pub const HEADER_BYTES: usize = ParmsId::BYTES + 1 + 4 * 8;

/// Largest component count accepted on decode.
pub const MAX_COMPONENTS: u64 = 3;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parameter id {0} does not belong to the active context")]
    UnknownParmsId(ParmsId),

    #[error("Unsupported NTT-form flag {0}")]
    NttForm(u8),

    #[error("Invalid component count {0}")]
    InvalidComponentCount(u64),

    #[error("Ring degree mismatch: expected {expected}, got {actual}")]
    DegreeMismatch { expected: u64, actual: u64 },

    #[error("Modulus chain length mismatch: expected {expected}, got {actual}")]
    ChainLengthMismatch { expected: u64, actual: u64 },

    #[error("Invalid scale {0}")]
    InvalidScale(f64),

    #[error("Coefficient {value} not below modulus {modulus}")]
    CoefficientOutOfRange { value: u64, modulus: u64 },

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    #[error(transparent)]
    Ring(#[from] RingError),

    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Ckks(#[from] CkksError),
}

pub type WireResult<T> = Result<T, WireError>;

/// Encoded size of `handle` in bytes.
pub fn ciphertext_size(handle: &CiphertextHandle) -> usize {
    let data = handle.ciphertext().map_or(0, |ct| {
        ct.components
            .iter()
            .map(|c| c.channel_count() * c.degree())
            .sum::<usize>()
    });
    HEADER_BYTES + 8 * data
}

pub fn write_parms_id<W: Write>(id: &ParmsId, writer: &mut W) -> WireResult<()> {
    for word in id.0 {
        writer.write_u64::<LittleEndian>(word)?;
    }
    Ok(())
}

pub fn read_parms_id<R: Read>(reader: &mut R) -> WireResult<ParmsId> {
    let mut words = [0u64; 4];
    for word in &mut words {
        *word = reader.read_u64::<LittleEndian>()?;
    }
    Ok(ParmsId(words))
}

pub fn write_ciphertext<W: Write>(
    handle: &CiphertextHandle,
    context: &CkksContext,
    writer: &mut W,
) -> WireResult<()> {
    let level = handle.level();
    write_parms_id(&context.parms_id(level)?, writer)?;
    writer.write_u8(0)?;
    let components: &[RnsPoly] = match handle.state() {
        CipherState::Zero { .. } => &[],
        CipherState::Encrypted(ct) => &ct.components,
    };
    writer.write_u64::<LittleEndian>(components.len() as u64)?;
    writer.write_u64::<LittleEndian>(context.degree() as u64)?;
    writer.write_u64::<LittleEndian>(level as u64 + 1)?;
    writer.write_f64::<LittleEndian>(handle.scale())?;
    for poly in components {
        write_poly_data(poly, writer)?;
    }
    Ok(())
}

pub fn read_ciphertext<R: Read>(
    reader: &mut R,
    context: &CkksContext,
    packing: Packing,
) -> WireResult<CiphertextHandle> {
    let id = read_parms_id(reader)?;
    let level = context.level_of(&id).ok_or(WireError::UnknownParmsId(id))?;
    let ntt = reader.read_u8()?;
    if ntt != 0 {
        return Err(WireError::NttForm(ntt));
    }
    let size = reader.read_u64::<LittleEndian>()?;
    if size == 1 || size > MAX_COMPONENTS {
        return Err(WireError::InvalidComponentCount(size));
    }
    let degree = reader.read_u64::<LittleEndian>()?;
    if degree != context.degree() as u64 {
        return Err(WireError::DegreeMismatch {
            expected: context.degree() as u64,
            actual: degree,
        });
    }
    let chain = reader.read_u64::<LittleEndian>()?;
    if chain != level as u64 + 1 {
        return Err(WireError::ChainLengthMismatch {
            expected: level as u64 + 1,
            actual: chain,
        });
    }
    let scale = reader.read_f64::<LittleEndian>()?;
    if !scale.is_finite() || scale <= 0.0 {
        return Err(WireError::InvalidScale(scale));
    }
    if size == 0 {
        return Ok(CiphertextHandle::zero(packing, scale, level));
    }
    let basis = context.basis(level)?;
    let components = (0..size)
        .map(|_| read_poly_data(reader, basis))
        .collect::<WireResult<Vec<_>>>()?;
    Ok(CiphertextHandle::encrypted(
        crate::crypto::Ciphertext {
            components,
            scale,
            level,
        },
        packing,
    ))
}

pub fn encode_ciphertext(handle: &CiphertextHandle, context: &CkksContext) -> WireResult<Vec<u8>> {
    let mut bytes = Vec::with_capacity(ciphertext_size(handle));
    write_ciphertext(handle, context, &mut bytes)?;
    Ok(bytes)
}

/// Decodes exactly one ciphertext from `bytes`.
pub fn decode_ciphertext(
    bytes: &[u8],
    context: &CkksContext,
    packing: Packing,
) -> WireResult<CiphertextHandle> {
    let mut cursor = Cursor::new(bytes);
    let handle = read_ciphertext(&mut cursor, context, packing)?;
    ensure_consumed(&cursor)?;
    Ok(handle)
}

pub fn ensure_consumed(cursor: &Cursor<&[u8]>) -> WireResult<()> {
    let rest = cursor.get_ref().len() - cursor.position() as usize;
    if rest == 0 {
        Ok(())
    } else {
        Err(WireError::TrailingBytes(rest))
    }
}

fn write_poly_data<W: Write>(poly: &RnsPoly, writer: &mut W) -> WireResult<()> {
    for channel in poly.channels() {
        for &c in channel {
            writer.write_u64::<LittleEndian>(c)?;
        }
    }
    Ok(())
}

fn read_poly_data<R: Read>(reader: &mut R, basis: &Arc<RnsBasis>) -> WireResult<RnsPoly> {
    let channels = basis
        .primes()
        .iter()
        .map(|&q| {
            (0..basis.degree())
                .map(|_| {
                    let value = reader.read_u64::<LittleEndian>()?;
                    if value >= q {
                        return Err(WireError::CoefficientOutOfRange { value, modulus: q });
                    }
                    Ok(value)
                })
                .collect::<WireResult<Vec<u64>>>()
        })
        .collect::<WireResult<Vec<_>>>()?;
    Ok(RnsPoly::from_channels(channels, Arc::clone(basis))?)
}

/// Public key: top-level parms id, then `b` and `a`.
pub fn write_public_key<W: Write>(
    key: &PublicKey,
    context: &CkksContext,
    writer: &mut W,
) -> WireResult<()> {
    write_parms_id(&context.parms_id(context.top_level())?, writer)?;
    write_poly_data(key.b(), writer)?;
    write_poly_data(key.a(), writer)
}

pub fn read_public_key<R: Read>(reader: &mut R, context: &CkksContext) -> WireResult<PublicKey> {
    let basis = read_top_level_id(reader, context)?;
    let b = read_poly_data(reader, basis)?;
    let a = read_poly_data(reader, basis)?;
    Ok(PublicKey::from_parts(b, a)?)
}

/// Relinearization key: top-level parms id, digit count, then `(b_i, a_i)`.
pub fn write_relin_key<W: Write>(
    key: &RelinearizationKey,
    context: &CkksContext,
    writer: &mut W,
) -> WireResult<()> {
    write_parms_id(&context.parms_id(context.top_level())?, writer)?;
    writer.write_u64::<LittleEndian>(key.digits().len() as u64)?;
    for (b, a) in key.digits() {
        write_poly_data(b, writer)?;
        write_poly_data(a, writer)?;
    }
    Ok(())
}

pub fn read_relin_key<R: Read>(
    reader: &mut R,
    context: &CkksContext,
) -> WireResult<RelinearizationKey> {
    let basis = read_top_level_id(reader, context)?;
    let count = reader.read_u64::<LittleEndian>()?;
    if count != basis.channel_count() as u64 {
        return Err(KeyError::DigitCountMismatch {
            expected: basis.channel_count(),
            got: count as usize,
        }
        .into());
    }
    let digits = (0..count)
        .map(|_| Ok((read_poly_data(reader, basis)?, read_poly_data(reader, basis)?)))
        .collect::<WireResult<Vec<_>>>()?;
    Ok(RelinearizationKey::from_digits(digits)?)
}

fn read_top_level_id<'a, R: Read>(
    reader: &mut R,
    context: &'a CkksContext,
) -> WireResult<&'a Arc<RnsBasis>> {
    let id = read_parms_id(reader)?;
    match context.level_of(&id) {
        Some(level) if level == context.top_level() => Ok(context.top_basis()),
        _ => Err(WireError::UnknownParmsId(id)),
    }
}

/// Scheme parameters sent in the handshake. The receiver rebuilds the
/// identical modulus chain from them.
pub fn write_params<W: Write>(params: &CkksParams, writer: &mut W) -> WireResult<()> {
    writer.write_u64::<LittleEndian>(params.ring_degree as u64)?;
    writer.write_u32::<LittleEndian>(params.base_bits)?;
    writer.write_u32::<LittleEndian>(params.scale_bits)?;
    writer.write_u64::<LittleEndian>(params.levels as u64)?;
    writer.write_f64::<LittleEndian>(params.error_std)?;
    writer.write_u64::<LittleEndian>(params.hamming_weight as u64)?;
    Ok(())
}

pub fn read_params<R: Read>(reader: &mut R) -> WireResult<CkksParams> {
    let params = CkksParams {
        ring_degree: reader.read_u64::<LittleEndian>()? as usize,
        base_bits: reader.read_u32::<LittleEndian>()?,
        scale_bits: reader.read_u32::<LittleEndian>()?,
        levels: reader.read_u64::<LittleEndian>()? as usize,
        error_std: reader.read_f64::<LittleEndian>()?,
        hamming_weight: reader.read_u64::<LittleEndian>()? as usize,
    };
    params.validate()?;
    Ok(params)
}
