//! Library and application errors

use std::io;

use miette::Diagnostic;
use thiserror::Error;

use crate::efuse::Protection;

/// All possible errors returned by espefuse
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Unknown eFuse field '{0}'")]
    #[diagnostic(
        code(espefuse::unknown_field),
        help("Run the `summary` subcommand to list the fields defined by the catalog")
    )]
    UnknownField(String),

    #[error("Unknown eFuse block '{0}'")]
    #[diagnostic(
        code(espefuse::unknown_block),
        help("Blocks can be referred to by their name or any of their aliases")
    )]
    UnknownBlock(String),

    #[error("The following names are given more than once: {}", .0.join(", "))]
    #[diagnostic(
        code(espefuse::duplicate_name),
        help("Each eFuse field or block may only appear once per command")
    )]
    DuplicateName(Vec<String>),

    #[error("Invalid value '{value}' for eFuse field '{field}': {reason}")]
    #[diagnostic(code(espefuse::invalid_value))]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("No value was provided for eFuse field '{0}'")]
    #[diagnostic(
        code(espefuse::missing_value),
        help("Only single-bit fields may be given without a value")
    )]
    MissingValue(String),

    #[error("eFuse field '{field}' has no {protection}-disable bit")]
    #[diagnostic(code(espefuse::not_protectable))]
    NotProtectable {
        field: String,
        protection: Protection,
    },

    #[error(
        "Data does not fit: {block} holds {expected} bytes, the data is {actual} bytes (offset {offset})"
    )]
    #[diagnostic(code(espefuse::size_mismatch))]
    SizeMismatch {
        block: String,
        expected: usize,
        actual: usize,
        offset: usize,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    OffsetConflict(#[from] OffsetConflict),

    #[error("The number of blocks ({blocks}) and data files ({data}) must be the same")]
    #[diagnostic(code(espefuse::data_count_mismatch))]
    DataCountMismatch { blocks: usize, data: usize },

    #[error("Bit number {index} is out of range, {block} has bit numbers in [0..{max}]")]
    #[diagnostic(code(espefuse::bit_index_out_of_range))]
    BitIndexOutOfRange {
        block: String,
        index: usize,
        max: usize,
    },

    #[error("Failed to burn eFuses")]
    #[diagnostic(
        code(espefuse::commit_failed),
        help("Burned eFuse bits can not be cleared; read the device state before trying again")
    )]
    Commit(#[source] TransportError),

    #[error("The burn was not successful, failed to verify: {}", .fields.join(", "))]
    #[diagnostic(
        code(espefuse::verification_failed),
        help("The fields may be write-protected, or already contain bits which can not be cleared")
    )]
    BurnVerification { fields: Vec<String> },

    #[error("Error while communicating with the device")]
    #[diagnostic(transparent)]
    Transport(#[from] TransportError),

    #[error("The eFuse catalog is invalid: {0}")]
    #[diagnostic(code(espefuse::invalid_catalog))]
    InvalidCatalog(String),

    #[error("Failed to parse the eFuse catalog")]
    #[diagnostic(code(espefuse::catalog_parse))]
    CatalogParse(#[source] toml::de::Error),

    #[error("No eFuse catalog was specified")]
    #[diagnostic(
        code(espefuse::no_catalog),
        help("Provide one with `--catalog`, or set `catalog` in the [device] section of `espefuse.toml`")
    )]
    NoCatalog,

    #[error("No device was specified")]
    #[diagnostic(
        code(espefuse::no_device),
        help("Provide a device image with `--device-file`, or set `device_file` in the [device] section of `espefuse.toml`")
    )]
    NoDevice,

    #[error("Configuration keys are misplaced: {0}")]
    #[diagnostic(code(espefuse::config::misplaced_key))]
    MisplacedKey(String),

    #[error("Operation was cancelled by the user")]
    #[diagnostic(code(espefuse::cancelled))]
    Cancelled,

    #[error("Failed to open file: {0}")]
    #[diagnostic(code(espefuse::file_open))]
    FileOpenError(String, #[source] io::Error),

    #[error(transparent)]
    #[diagnostic(code(espefuse::io))]
    IoError(#[from] io::Error),

    #[cfg(feature = "cli")]
    #[error(transparent)]
    #[diagnostic(code(espefuse::dialoguer_error))]
    DialoguerError(#[from] dialoguer::Error),
}

/// Reasons why a byte offset can not be used for a raw block burn
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum OffsetConflict {
    #[error("The offset {offset} can not be used when {blocks} blocks are given")]
    #[diagnostic(
        code(espefuse::offset_conflict::multiple_blocks),
        help("When an offset is given only a single block may be burned")
    )]
    MultipleBlocks { offset: usize, blocks: usize },

    #[error("Invalid offset {offset}: {block} only holds {length} bytes")]
    #[diagnostic(code(espefuse::offset_conflict::out_of_block))]
    OutOfBlock {
        block: String,
        offset: usize,
        length: usize,
    },
}

/// Errors raised by an [EfuseTransport](crate::transport::EfuseTransport)
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("eFuse block {0} does not exist on the device")]
    #[diagnostic(code(espefuse::transport::block_out_of_range))]
    BlockOutOfRange(usize),

    #[error("eFuse block {block} holds {expected} bytes, but {actual} bytes were given")]
    #[diagnostic(code(espefuse::transport::length_mismatch))]
    LengthMismatch {
        block: usize,
        expected: usize,
        actual: usize,
    },

    #[error("The device image is {actual} bytes, expected {expected} bytes")]
    #[diagnostic(
        code(espefuse::transport::corrupt_image),
        help("Make sure the device image was created with the same eFuse catalog")
    )]
    CorruptImage { expected: usize, actual: usize },

    #[error("The device rejected the burn request: {0}")]
    #[diagnostic(code(espefuse::transport::rejected))]
    Rejected(String),

    #[error("IO error while accessing the device: {0}")]
    #[diagnostic(code(espefuse::transport::io))]
    Io(#[source] io::Error),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

pub(crate) trait ResultExt {
    /// Mark a transport error as having occurred while burning
    fn committing(self) -> Self;
}

impl<T> ResultExt for Result<T, Error> {
    fn committing(self) -> Self {
        match self {
            Err(Error::Transport(err)) => Err(Error::Commit(err)),
            res => res,
        }
    }
}
