use std::{
    fs,
    ops::Range,
    path::{Path, PathBuf},
};

use log::info;

use crate::{
    efuse::{Efuses, EncodedValue},
    Error,
};

/// State of a single eFuse field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSummary {
    pub name: String,
    pub block: String,
    pub bit_range: Range<u32>,
    /// Current value, or `None` if the field is read-protected.
    pub value: Option<EncodedValue>,
    pub readable: bool,
    pub writeable: bool,
    pub description: String,
}

/// Describe every field of the device, in catalog order.
pub fn summary<T>(efuses: &Efuses<T>) -> Result<Vec<FieldSummary>, Error> {
    efuses
        .registry()
        .fields()
        .iter()
        .map(|field| {
            let readable = efuses.is_readable(&field.name)?;
            let value = if readable {
                Some(efuses.read_field(&field.name)?)
            } else {
                None
            };

            Ok(FieldSummary {
                name: field.name.clone(),
                block: efuses.blocks()[field.block].name().to_string(),
                bit_range: field.bit_range(),
                value,
                readable,
                writeable: efuses.is_writeable(&field.name)?,
                description: field.description.clone(),
            })
        })
        .collect()
}

/// Write the contents of every block to its own file.
///
/// The block index is appended to the file stem of `path`, so `dump.bin`
/// becomes `dump0.bin`, `dump1.bin` and so on. Returns the written paths.
pub fn dump<T>(efuses: &Efuses<T>, path: &Path) -> Result<Vec<PathBuf>, Error> {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    let mut written = Vec::with_capacity(efuses.blocks().len());
    for block in efuses.blocks() {
        let file = path.with_file_name(format!("{stem}{}{extension}", block.id()));
        fs::write(&file, block.committed())
            .map_err(|err| Error::FileOpenError(file.display().to_string(), err))?;
        info!("Dump {} to {}", block.name(), file.display());

        written.push(file);
    }

    Ok(written)
}
