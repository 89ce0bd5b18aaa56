use std::{
    fs,
    ops::Range,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};

use super::{BlockWrite, EfuseTransport, TransportError};
use crate::efuse::{Protection, Registry};

/// Bits of a block which no longer burn once a write-disable bit is set
#[derive(Debug, Clone, PartialEq, Eq)]
struct WriteLock {
    /// Block and bit position of the write-disable bit.
    disable_bit: (usize, usize),
    block: usize,
    bits: Range<usize>,
}

/// An in-memory eFuse device
///
/// Burning only ever sets bits, exactly like real eFuses. Fields whose
/// write-disable bit is burned keep their value. When opened from a file, the
/// blocks are stored back-to-back in that file and it is rewritten after every
/// successful burn.
#[derive(Debug, Clone, Default)]
pub struct VirtualDevice {
    blocks: Vec<Vec<u8>>,
    defects: Vec<Vec<u8>>,
    locks: Vec<WriteLock>,
    path: Option<PathBuf>,
    fail_next_commit: Option<String>,
    commit_count: usize,
    read_count: usize,
}

impl VirtualDevice {
    /// A device with the given blocks.
    pub fn new(blocks: Vec<Vec<u8>>) -> Self {
        let defects = blocks.iter().map(|block| vec![0u8; block.len()]).collect();

        Self {
            blocks,
            defects,
            ..Self::default()
        }
    }

    /// A device without any burned bit, laid out as described by `registry`.
    ///
    /// Write protection follows the write-disable bits of the registry's
    /// fields.
    pub fn blank(registry: &Registry) -> Self {
        let mut device = Self::new(
            registry
                .blocks()
                .iter()
                .map(|block| vec![0u8; block.length])
                .collect(),
        );
        device.locks = write_locks(registry);

        device
    }

    /// Open the device image at `path`, creating a blank device if the file
    /// does not exist yet.
    pub fn open(path: &Path, registry: &Registry) -> Result<Self, TransportError> {
        let mut device = Self::blank(registry);
        device.path = Some(path.to_path_buf());

        if !path.exists() {
            info!("Creating a blank virtual device at {}", path.display());
            return Ok(device);
        }

        let image = fs::read(path)?;
        let expected = registry.blocks().iter().map(|block| block.length).sum();
        if image.len() != expected {
            return Err(TransportError::CorruptImage {
                expected,
                actual: image.len(),
            });
        }

        let mut rest = image.as_slice();
        for block in &mut device.blocks {
            let (data, tail) = rest.split_at(block.len());
            block.copy_from_slice(data);
            rest = tail;
        }
        debug!("Opened virtual device at {}", path.display());

        Ok(device)
    }

    /// Contents of block `block`.
    ///
    /// # Panics
    ///
    /// If the block does not exist.
    pub fn block_data(&self, block: usize) -> &[u8] {
        &self.blocks[block]
    }

    /// Make the bits set in `mask` impossible to burn in block `block`.
    pub fn add_defect(&mut self, block: usize, mask: &[u8]) {
        if let Some(defects) = self.defects.get_mut(block) {
            for (defect, mask) in defects.iter_mut().zip(mask) {
                *defect |= mask;
            }
        }
    }

    /// Let the next call to [EfuseTransport::commit] fail without writing.
    pub fn fail_next_commit(&mut self, reason: impl Into<String>) {
        self.fail_next_commit = Some(reason.into());
    }

    /// Number of successful burn transactions.
    pub fn commit_count(&self) -> usize {
        self.commit_count
    }

    /// Number of block reads served.
    pub fn read_count(&self) -> usize {
        self.read_count
    }

    fn is_locked(&self, lock: &WriteLock) -> bool {
        let (block, bit) = lock.disable_bit;
        self.blocks
            .get(block)
            .and_then(|data| data.get(bit / 8))
            .is_some_and(|byte| byte & (1 << (bit % 8)) != 0)
    }

    /// Bits of block `block` which can still be burned.
    fn burnable(&self, block: usize) -> Vec<u8> {
        let mut mask: Vec<u8> = self.defects[block].iter().map(|defect| !defect).collect();
        for lock in self
            .locks
            .iter()
            .filter(|lock| lock.block == block && self.is_locked(lock))
        {
            for bit in lock.bits.clone() {
                if let Some(byte) = mask.get_mut(bit / 8) {
                    *byte &= !(1 << (bit % 8));
                }
            }
        }

        mask
    }

    fn persist(&self) -> Result<(), TransportError> {
        if let Some(path) = &self.path {
            fs::write(path, self.blocks.concat())?;
            debug!("Saved virtual device to {}", path.display());
        }

        Ok(())
    }
}

fn write_locks(registry: &Registry) -> Vec<WriteLock> {
    let Ok(disable_field) = registry.field(registry.disable_field_name(Protection::Write)) else {
        return Vec::new();
    };

    registry
        .fields()
        .iter()
        .filter_map(|field| {
            let bit = field.disable_bit(Protection::Write)?;
            let bits = field.bit_range();

            Some(WriteLock {
                disable_bit: (
                    disable_field.block,
                    (disable_field.bit_offset + bit) as usize,
                ),
                block: field.block,
                bits: bits.start as usize..bits.end as usize,
            })
        })
        .collect()
}

impl EfuseTransport for VirtualDevice {
    fn read_all_blocks(&mut self) -> Result<Vec<Vec<u8>>, TransportError> {
        self.read_count += self.blocks.len();
        Ok(self.blocks.clone())
    }

    fn read_block(&mut self, block: usize) -> Result<Vec<u8>, TransportError> {
        let data = self
            .blocks
            .get(block)
            .ok_or(TransportError::BlockOutOfRange(block))?;
        self.read_count += 1;

        Ok(data.clone())
    }

    fn commit(&mut self, writes: &[BlockWrite<'_>]) -> Result<(), TransportError> {
        if let Some(reason) = self.fail_next_commit.take() {
            return Err(TransportError::Rejected(reason));
        }

        // Nothing is written unless every block in the transaction is valid.
        for write in writes {
            let block = self
                .blocks
                .get(write.block)
                .ok_or(TransportError::BlockOutOfRange(write.block))?;
            if block.len() != write.data.len() {
                return Err(TransportError::LengthMismatch {
                    block: write.block,
                    expected: block.len(),
                    actual: write.data.len(),
                });
            }
        }

        // Write protection is decided by the state before the transaction.
        let masks = writes
            .iter()
            .map(|write| self.burnable(write.block))
            .collect::<Vec<_>>();

        for (write, mask) in writes.iter().zip(masks) {
            let block = &mut self.blocks[write.block];
            let mut ignored = false;
            for ((byte, data), mask) in block.iter_mut().zip(write.data).zip(mask) {
                ignored |= data & !mask & !*byte != 0;
                *byte |= data & mask;
            }
            if ignored {
                warn!("Some bits of block {} can not be burned", write.block);
            }
        }
        self.commit_count += 1;

        self.persist()
    }
}
