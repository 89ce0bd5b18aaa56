use log::info;

use super::{check_duplicate_names, commit, BurnCallbacks};
use crate::{
    efuse::Efuses,
    error::OffsetConflict,
    transport::EfuseTransport,
    Error,
};

/// Burn raw data into whole eFuse blocks.
///
/// A non-zero `offset` places the data that many bytes into the block, and
/// may only be used with a single block. Every payload is zero-padded to the
/// exact length of its block. The burned data is not verified.
pub fn burn_block_data<T, B, D>(
    efuses: &mut Efuses<T>,
    blocks: &[B],
    data: &[D],
    offset: usize,
    callbacks: &mut dyn BurnCallbacks,
) -> Result<(), Error>
where
    T: EfuseTransport,
    B: AsRef<str>,
    D: AsRef<[u8]>,
{
    check_duplicate_names(blocks.iter().map(AsRef::as_ref))?;

    if offset != 0 {
        if blocks.len() > 1 {
            return Err(OffsetConflict::MultipleBlocks {
                offset,
                blocks: blocks.len(),
            }
            .into());
        }

        if let Some(name) = blocks.first() {
            let block = efuses.block_by_name(name.as_ref())?;
            if offset >= block.length() {
                return Err(OffsetConflict::OutOfBlock {
                    block: block.name().to_string(),
                    offset,
                    length: block.length(),
                }
                .into());
            }
        }
    }

    if blocks.len() != data.len() {
        return Err(Error::DataCountMismatch {
            blocks: blocks.len(),
            data: data.len(),
        });
    }

    let mut staged = Vec::with_capacity(blocks.len());
    for (name, payload) in blocks.iter().zip(data) {
        let block = efuses.block_by_name(name.as_ref())?;
        let buffer = place_block_data(block.name(), block.length(), payload.as_ref(), offset)?;
        staged.push((block.id(), buffer, payload.as_ref().len()));
    }

    for (id, buffer, size) in &staged {
        let block = &efuses.blocks()[*id];
        info!("Writing {size} bytes to {} at offset {offset}", block.name());
        callbacks.block_data(block, buffer, offset);

        if let Err(err) = efuses.stage_block(*id, buffer) {
            efuses.discard_staged();
            return Err(err);
        }
    }

    commit(efuses, callbacks)
}

/// Place `payload` into a zeroed buffer of exactly `length` bytes, starting
/// at `offset`.
pub fn place_block_data(
    block: &str,
    length: usize,
    payload: &[u8],
    offset: usize,
) -> Result<Vec<u8>, Error> {
    let actual = offset + payload.len();
    if actual > length {
        return Err(Error::SizeMismatch {
            block: block.to_string(),
            expected: length,
            actual,
            offset,
        });
    }

    let mut buffer = vec![0u8; length];
    buffer[offset..actual].copy_from_slice(payload);

    Ok(buffer)
}

/// Burn individual bits of an eFuse block.
///
/// Bit `i` is bit `i % 8` of byte `i / 8` of the block. The burned bits are
/// not verified.
pub fn burn_bit<T: EfuseTransport>(
    efuses: &mut Efuses<T>,
    block: &str,
    bits: &[usize],
    callbacks: &mut dyn BurnCallbacks,
) -> Result<(), Error> {
    let block = efuses.block_by_name(block)?;
    let id = block.id();
    let data = bit_burn_data(block.name(), block.length(), bits)?;

    info!(
        "Burning bits {} of {}",
        bits.iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
        block.name()
    );
    callbacks.block_data(block, &data, 0);

    if let Err(err) = efuses.stage_block(id, &data) {
        efuses.discard_staged();
        return Err(err);
    }

    commit(efuses, callbacks)
}

/// Block contents with exactly the given bits set.
pub fn bit_burn_data(block: &str, length: usize, bits: &[usize]) -> Result<Vec<u8>, Error> {
    let count = length * 8;

    let mut buffer = vec![false; count];
    for &index in bits {
        if index >= count {
            return Err(Error::BitIndexOutOfRange {
                block: block.to_string(),
                index,
                max: count.saturating_sub(1),
            });
        }
        buffer[index] = true;
    }

    let packed = pack_msb_first(&reverse_bit_order(&buffer));

    Ok(reverse_byte_order(&packed))
}

/// Reverse the order of a bit string.
pub fn reverse_bit_order(bits: &[bool]) -> Vec<bool> {
    bits.iter().rev().copied().collect()
}

/// Pack a bit string into bytes, the first bit of every chunk of eight
/// becoming the most significant bit of its byte. A trailing partial chunk
/// is padded with zero bits.
pub fn pack_msb_first(bits: &[bool]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |byte, (i, bit)| byte | (u8::from(*bit) << (7 - i)))
        })
        .collect()
}

/// Reverse the order of a byte string.
pub fn reverse_byte_order(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().rev().copied().collect()
}
