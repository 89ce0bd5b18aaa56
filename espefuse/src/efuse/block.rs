use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, VariantNames};

use crate::{error::TransportError, Error};

/// Error-correcting coding scheme applied across a whole eFuse block.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    Hash,
    PartialEq,
    Eq,
    Display,
    EnumString,
    VariantNames,
    Deserialize,
    Serialize,
)]
#[non_exhaustive]
pub enum CodingScheme {
    /// Bits are stored as they are
    #[default]
    #[serde(rename = "none")]
    #[strum(serialize = "none")]
    None,
    /// 3/4 encoding, 6 bytes of data are stored in 8 bytes
    #[serde(rename = "3/4")]
    #[strum(serialize = "3/4")]
    ThreeFour,
    /// Every bit is stored twice
    #[serde(rename = "repeat")]
    #[strum(serialize = "repeat")]
    Repeat,
    /// Reed-Solomon
    #[serde(rename = "rs")]
    #[strum(serialize = "rs")]
    ReedSolomon,
}

/// Static definition of an eFuse block, as found in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BlockDefinition {
    /// Name of the block, e.g. `BLOCK0`.
    pub name: String,
    /// Alternative names of the block.
    #[serde(default)]
    pub alias: Vec<String>,
    /// Length of the block in bytes.
    pub length: usize,
    /// Coding scheme used by this block.
    #[serde(default)]
    pub coding_scheme: CodingScheme,
}

impl BlockDefinition {
    pub fn new(name: impl Into<String>, length: usize, coding_scheme: CodingScheme) -> Self {
        Self {
            name: name.into(),
            alias: Vec::new(),
            length,
            coding_scheme,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias.push(alias.into());
        self
    }

    /// Whether `name` refers to this block.
    pub fn matches(&self, name: &str) -> bool {
        self.name == name || self.alias.iter().any(|alias| alias == name)
    }
}

/// An eFuse block of a connected device.
///
/// Holds the contents last read from the device and a pending buffer with
/// staged writes. Both buffers are always exactly [Self::length] bytes.
#[derive(Debug, Clone)]
pub struct EfuseBlock {
    id: usize,
    definition: BlockDefinition,
    committed: Vec<u8>,
    pending: Vec<u8>,
    staged: bool,
}

impl EfuseBlock {
    pub(crate) fn new(
        id: usize,
        definition: BlockDefinition,
        committed: Vec<u8>,
    ) -> Result<Self, Error> {
        if committed.len() != definition.length {
            return Err(TransportError::LengthMismatch {
                block: id,
                expected: definition.length,
                actual: committed.len(),
            }
            .into());
        }

        Ok(Self {
            id,
            definition,
            pending: committed.clone(),
            committed,
            staged: false,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &BlockDefinition {
        &self.definition
    }

    /// Length of the block in bytes.
    pub fn length(&self) -> usize {
        self.definition.length
    }

    pub fn coding_scheme(&self) -> CodingScheme {
        self.definition.coding_scheme
    }

    /// Contents as last read from the device.
    pub fn committed(&self) -> &[u8] {
        &self.committed
    }

    /// Contents which will be written by the next burn.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Whether anything was staged since the last burn.
    pub fn is_staged(&self) -> bool {
        self.staged
    }

    /// Whether the pending buffer sets any bit which is not burned yet.
    pub fn has_new_bits(&self) -> bool {
        self.pending
            .iter()
            .zip(&self.committed)
            .any(|(pending, committed)| pending & !committed != 0)
    }

    /// Stage the full contents of the block.
    pub(crate) fn save(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.len() != self.length() {
            return Err(Error::SizeMismatch {
                block: self.name().to_string(),
                expected: self.length(),
                actual: data.len(),
                offset: 0,
            });
        }

        self.pending.copy_from_slice(data);
        self.staged = true;

        Ok(())
    }

    /// Stage a change to the pending buffer in place.
    pub(crate) fn stage_with(&mut self, f: impl FnOnce(&mut [u8])) {
        f(&mut self.pending);
        self.staged = true;
    }

    /// Replace the committed contents with a fresh read from the device.
    pub(crate) fn refresh(&mut self, data: Vec<u8>) -> Result<(), Error> {
        if data.len() != self.length() {
            return Err(TransportError::LengthMismatch {
                block: self.id,
                expected: self.length(),
                actual: data.len(),
            }
            .into());
        }

        self.committed = data;
        self.discard();

        Ok(())
    }

    /// Drop any staged change.
    pub(crate) fn discard(&mut self) {
        self.pending.clone_from(&self.committed);
        self.staged = false;
    }
}
