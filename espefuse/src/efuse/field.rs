use std::ops::Range;

use serde::{Deserialize, Serialize};

use super::Protection;

/// A named eFuse field, located inside of a single eFuse block.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EfuseField {
    /// Unique name of the field.
    pub name: String,
    /// The block in which the field is located.
    pub block: usize,
    /// The bit offset of the start of the field, relative to its block.
    #[serde(alias = "start")]
    pub bit_offset: u32,
    /// The bit width of the field.
    #[serde(alias = "len")]
    pub bit_width: u32,
    /// Bit of the read-disable field which protects this field, if any.
    #[serde(default)]
    pub read_disable_bit: Option<u32>,
    /// Bit of the write-disable field which protects this field, if any.
    #[serde(default)]
    pub write_disable_bit: Option<u32>,
    /// Human readable description.
    #[serde(default, alias = "desc")]
    pub description: String,
}

impl EfuseField {
    /// Creates a new eFuse field definition without any protection bits.
    pub fn new(name: impl Into<String>, block: usize, bit_offset: u32, bit_width: u32) -> Self {
        Self {
            name: name.into(),
            block,
            bit_offset,
            bit_width,
            read_disable_bit: None,
            write_disable_bit: None,
            description: String::new(),
        }
    }

    pub fn with_read_disable_bit(mut self, bit: u32) -> Self {
        self.read_disable_bit = Some(bit);
        self
    }

    pub fn with_write_disable_bit(mut self, bit: u32) -> Self {
        self.write_disable_bit = Some(bit);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The disable bit protecting this field against `protection`, if any.
    pub fn disable_bit(&self, protection: Protection) -> Option<u32> {
        match protection {
            Protection::Read => self.read_disable_bit,
            Protection::Write => self.write_disable_bit,
        }
    }

    /// Range of bits occupied by this field within its block.
    pub fn bit_range(&self) -> Range<u32> {
        self.bit_offset..self.bit_offset + self.bit_width
    }

    /// Number of bytes needed to hold a value of this field.
    pub fn byte_len(&self) -> usize {
        self.bit_width.div_ceil(8) as usize
    }

    /// Extract the value of this field from the bytes of its block.
    ///
    /// Bits are numbered from the least significant bit of the first byte, the
    /// returned value is little endian and zero-extended to [Self::byte_len].
    pub(crate) fn extract(&self, block: &[u8]) -> Vec<u8> {
        let mut value = vec![0u8; self.byte_len()];
        for (i, bit) in self.bit_range().enumerate() {
            if get_bit(block, bit as usize) {
                set_bit(&mut value, i, true);
            }
        }

        value
    }

    /// Overwrite the bits of this field in `block` with `value`.
    pub(crate) fn insert(&self, block: &mut [u8], value: &[u8]) {
        for (i, bit) in self.bit_range().enumerate() {
            set_bit(block, bit as usize, get_bit(value, i));
        }
    }
}

pub(crate) fn get_bit(bytes: &[u8], bit: usize) -> bool {
    bytes
        .get(bit / 8)
        .is_some_and(|byte| byte & (1 << (bit % 8)) != 0)
}

pub(crate) fn set_bit(bytes: &mut [u8], bit: usize, value: bool) {
    if let Some(byte) = bytes.get_mut(bit / 8) {
        if value {
            *byte |= 1 << (bit % 8);
        } else {
            *byte &= !(1 << (bit % 8));
        }
    }
}
