//! Access to the eFuse blocks of a device
//!
//! The [EfuseTransport] trait is the only way the rest of the crate talks to a
//! device. A [VirtualDevice] implementation is provided, which keeps the
//! eFuses in memory and can optionally persist them to a file.

pub use self::virt::VirtualDevice;
pub use crate::error::TransportError;

mod virt;

/// Contents to be written to a single eFuse block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockWrite<'a> {
    /// Index of the block.
    pub block: usize,
    /// Full contents of the block.
    pub data: &'a [u8],
}

/// Operations for reading and burning the eFuse blocks of a device.
pub trait EfuseTransport {
    /// Read every block of the device, in order of their index.
    fn read_all_blocks(&mut self) -> Result<Vec<Vec<u8>>, TransportError>;

    /// Read a single block.
    fn read_block(&mut self, block: usize) -> Result<Vec<u8>, TransportError>;

    /// Burn all `writes` in one irreversible transaction.
    ///
    /// Only bits which are set in the written data are burned; bits which are
    /// already burned stay burned.
    fn commit(&mut self, writes: &[BlockWrite<'_>]) -> Result<(), TransportError>;
}

impl<T: EfuseTransport + ?Sized> EfuseTransport for &mut T {
    fn read_all_blocks(&mut self) -> Result<Vec<Vec<u8>>, TransportError> {
        (**self).read_all_blocks()
    }

    fn read_block(&mut self, block: usize) -> Result<Vec<u8>, TransportError> {
        (**self).read_block(block)
    }

    fn commit(&mut self, writes: &[BlockWrite<'_>]) -> Result<(), TransportError> {
        (**self).commit(writes)
    }
}

impl<T: EfuseTransport + ?Sized> EfuseTransport for Box<T> {
    fn read_all_blocks(&mut self) -> Result<Vec<Vec<u8>>, TransportError> {
        (**self).read_all_blocks()
    }

    fn read_block(&mut self, block: usize) -> Result<Vec<u8>, TransportError> {
        (**self).read_block(block)
    }

    fn commit(&mut self, writes: &[BlockWrite<'_>]) -> Result<(), TransportError> {
        (**self).commit(writes)
    }
}
