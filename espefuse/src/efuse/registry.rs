//! Catalog of eFuse blocks and fields for a device
//!
//! Catalogs are TOML documents listing the device's blocks in order, followed
//! by its fields:
//!
//! ```toml
//! read_disable_field  = "RD_DIS"
//! write_disable_field = "WR_DIS"
//!
//! [[block]]
//! name   = "BLOCK0"
//! length = 16
//!
//! [[field]]
//! name       = "WR_DIS"
//! block      = 0
//! bit_offset = 0
//! bit_width  = 32
//! ```

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs,
    path::Path,
};

use log::debug;
use serde::{Deserialize, Serialize};

use super::{BlockDefinition, EfuseField, Protection};
use crate::Error;

const DEFAULT_READ_DISABLE_FIELD: &str = "RD_DIS";
const DEFAULT_WRITE_DISABLE_FIELD: &str = "WR_DIS";

fn default_read_disable_field() -> String {
    DEFAULT_READ_DISABLE_FIELD.to_string()
}

fn default_write_disable_field() -> String {
    DEFAULT_WRITE_DISABLE_FIELD.to_string()
}

/// Raw, unvalidated catalog contents
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Catalog {
    /// Name of the field holding the read-disable bits.
    #[serde(default = "default_read_disable_field")]
    pub read_disable_field: String,
    /// Name of the field holding the write-disable bits.
    #[serde(default = "default_write_disable_field")]
    pub write_disable_field: String,
    /// Blocks, in order of their index.
    #[serde(rename = "block", default)]
    pub blocks: Vec<BlockDefinition>,
    /// Fields.
    #[serde(rename = "field", default)]
    pub fields: Vec<EfuseField>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            read_disable_field: default_read_disable_field(),
            write_disable_field: default_write_disable_field(),
            blocks: Vec::new(),
            fields: Vec::new(),
        }
    }
}

/// Validated catalog with lookup tables
///
/// Fields sharing a protection bit are grouped once, when the registry is
/// built, so that the set of fields affected by burning a protection bit can
/// be looked up directly.
#[derive(Debug, Clone)]
pub struct Registry {
    catalog: Catalog,
    by_name: HashMap<String, usize>,
    read_groups: BTreeMap<u32, Vec<String>>,
    write_groups: BTreeMap<u32, Vec<String>>,
}

impl Registry {
    /// Validate `catalog` and build its lookup tables.
    pub fn new(catalog: Catalog) -> Result<Self, Error> {
        let mut block_names = HashSet::new();
        for block in &catalog.blocks {
            if block.length == 0 {
                return Err(Error::InvalidCatalog(format!(
                    "block '{}' has a length of zero",
                    block.name
                )));
            }
            for name in std::iter::once(&block.name).chain(&block.alias) {
                if !block_names.insert(name.as_str()) {
                    return Err(Error::DuplicateName(vec![name.clone()]));
                }
            }
        }

        let mut by_name = HashMap::new();
        for (index, field) in catalog.fields.iter().enumerate() {
            if by_name.insert(field.name.clone(), index).is_some() {
                return Err(Error::DuplicateName(vec![field.name.clone()]));
            }

            let Some(block) = catalog.blocks.get(field.block) else {
                return Err(Error::InvalidCatalog(format!(
                    "field '{}' refers to block {}, but only {} blocks are defined",
                    field.name,
                    field.block,
                    catalog.blocks.len()
                )));
            };

            let end = field.bit_offset.checked_add(field.bit_width);
            if field.bit_width == 0 || end.is_none_or(|end| end as usize > block.length * 8) {
                return Err(Error::InvalidCatalog(format!(
                    "field '{}' (bit offset {}, width {}) does not fit into {} ({} bits)",
                    field.name,
                    field.bit_offset,
                    field.bit_width,
                    block.name,
                    block.length * 8
                )));
            }
        }

        let mut registry = Self {
            catalog,
            by_name,
            read_groups: BTreeMap::new(),
            write_groups: BTreeMap::new(),
        };
        registry.read_groups = registry.group_by(Protection::Read)?;
        registry.write_groups = registry.group_by(Protection::Write)?;

        debug!(
            "Loaded eFuse catalog: {} blocks, {} fields",
            registry.catalog.blocks.len(),
            registry.catalog.fields.len()
        );

        Ok(registry)
    }

    /// Parse and validate a TOML catalog.
    pub fn from_toml_str(data: &str) -> Result<Self, Error> {
        let catalog: Catalog = toml::from_str(data).map_err(Error::CatalogParse)?;
        Self::new(catalog)
    }

    /// Load a TOML catalog from `path`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = fs::read_to_string(path)
            .map_err(|err| Error::FileOpenError(path.display().to_string(), err))?;

        Self::from_toml_str(&data)
    }

    fn group_by(&self, protection: Protection) -> Result<BTreeMap<u32, Vec<String>>, Error> {
        let mut groups: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for field in &self.catalog.fields {
            if let Some(bit) = field.disable_bit(protection) {
                groups.entry(bit).or_default().push(field.name.clone());
            }
        }

        if let Some(max) = groups.keys().next_back() {
            let name = self.disable_field_name(protection);
            let Ok(disable_field) = self.field(name) else {
                return Err(Error::InvalidCatalog(format!(
                    "fields use {protection}-disable bits, but the field '{name}' is not defined"
                )));
            };
            if *max >= disable_field.bit_width {
                return Err(Error::InvalidCatalog(format!(
                    "{protection}-disable bit {max} is outside of '{name}' ({} bits)",
                    disable_field.bit_width
                )));
            }
        }

        Ok(groups)
    }

    /// All block definitions, in order of their index.
    pub fn blocks(&self) -> &[BlockDefinition] {
        &self.catalog.blocks
    }

    /// All fields, in catalog order.
    pub fn fields(&self) -> &[EfuseField] {
        &self.catalog.fields
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Result<&EfuseField, Error> {
        self.by_name
            .get(name)
            .map(|index| &self.catalog.fields[*index])
            .ok_or_else(|| Error::UnknownField(name.to_string()))
    }

    /// Look up the index of a block by its name or alias.
    pub fn block_index(&self, name: &str) -> Result<usize, Error> {
        self.catalog
            .blocks
            .iter()
            .position(|block| block.matches(name))
            .ok_or_else(|| Error::UnknownBlock(name.to_string()))
    }

    /// Fields located in the block with index `block`.
    pub fn fields_in_block(&self, block: usize) -> impl Iterator<Item = &EfuseField> {
        self.catalog
            .fields
            .iter()
            .filter(move |field| field.block == block)
    }

    /// Name of the field holding the disable bits for `protection`.
    pub fn disable_field_name(&self, protection: Protection) -> &str {
        match protection {
            Protection::Read => &self.catalog.read_disable_field,
            Protection::Write => &self.catalog.write_disable_field,
        }
    }

    /// Every field protected by disable bit `bit`.
    pub fn protection_group(&self, protection: Protection, bit: u32) -> &[String] {
        let groups = match protection {
            Protection::Read => &self.read_groups,
            Protection::Write => &self.write_groups,
        };

        groups.get(&bit).map(Vec::as_slice).unwrap_or_default()
    }

    /// All protection groups for `protection`, keyed by disable bit.
    pub fn protection_groups(&self, protection: Protection) -> &BTreeMap<u32, Vec<String>> {
        match protection {
            Protection::Read => &self.read_groups,
            Protection::Write => &self.write_groups,
        }
    }
}
