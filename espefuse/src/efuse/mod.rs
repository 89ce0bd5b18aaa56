//! eFuse blocks and fields of a connected device
//!
//! The [Efuses] struct owns the [EfuseTransport] of a device together with the
//! blocks read from it and the [Registry] describing them. Writes are staged
//! into the pending buffers of the blocks, and only reach the device when
//! [Efuses::burn_all] is called.

use log::{debug, info, warn};
use strum::{Display, EnumString, VariantNames};

pub use self::{
    block::{BlockDefinition, CodingScheme, EfuseBlock},
    field::EfuseField,
    registry::{Catalog, Registry},
    value::EncodedValue,
};
use self::field::{get_bit, set_bit};
use crate::{
    error::ResultExt as _,
    transport::{BlockWrite, EfuseTransport},
    Error,
};

mod block;
mod field;
pub mod registry;
mod value;

/// Direction of a protection bit
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Display, EnumString, VariantNames)]
#[strum(serialize_all = "lowercase")]
pub enum Protection {
    /// Burning the bit disables reading the protected fields
    Read,
    /// Burning the bit disables writing the protected fields
    Write,
}

/// Progress of the most recent burn
#[derive(Debug, Default, Clone, Copy, Hash, PartialEq, Eq, Display)]
pub enum BurnState {
    /// Nothing was staged yet
    #[default]
    Idle,
    /// Writes are staged, but were not committed
    Staged,
    /// The device is being written to
    Committing,
    /// The write transaction completed
    Committed,
    /// The write transaction failed, the device state is unknown
    CommitFailed,
    /// Read-back matched the intended state
    Verified,
    /// Read-back did not match the intended state
    VerificationFailed,
}

/// The eFuses of a connected device
#[derive(Debug)]
pub struct Efuses<T> {
    transport: T,
    registry: Registry,
    blocks: Vec<EfuseBlock>,
    force_write_always: bool,
    state: BurnState,
}

impl<T: EfuseTransport> Efuses<T> {
    /// Read every block from the device described by `registry`.
    pub fn connect(mut transport: T, registry: Registry) -> Result<Self, Error> {
        let data = transport.read_all_blocks()?;
        if data.len() != registry.blocks().len() {
            return Err(Error::InvalidCatalog(format!(
                "the catalog defines {} blocks, but the device has {}",
                registry.blocks().len(),
                data.len()
            )));
        }

        let blocks = registry
            .blocks()
            .iter()
            .cloned()
            .zip(data)
            .enumerate()
            .map(|(id, (definition, data))| {
                debug!("BLOCK{id:<2} ({}): {data:02x?}", definition.name);
                EfuseBlock::new(id, definition, data)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            transport,
            registry,
            blocks,
            force_write_always: false,
            state: BurnState::Idle,
        })
    }
}

impl<T> Efuses<T> {
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn blocks(&self) -> &[EfuseBlock] {
        &self.blocks
    }

    /// Look up a block by its name or alias.
    pub fn block_by_name(&self, name: &str) -> Result<&EfuseBlock, Error> {
        let index = self.registry.block_index(name)?;
        Ok(&self.blocks[index])
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Result<&EfuseField, Error> {
        self.registry.field(name)
    }

    /// Write staged blocks even if they look like they are already written.
    ///
    /// This can not disable write protection, or clear any bit which has
    /// already been burned.
    pub fn set_force_write_always(&mut self, force: bool) {
        self.force_write_always = force;
    }

    pub fn force_write_always(&self) -> bool {
        self.force_write_always
    }

    pub fn state(&self) -> BurnState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: BurnState) {
        self.state = state;
    }

    /// Current value of a field, as last read from the device.
    pub fn read_field(&self, name: &str) -> Result<EncodedValue, Error> {
        let field = self.registry.field(name)?;
        let bytes = field.extract(self.blocks[field.block].committed());

        Ok(EncodedValue::from_field_bytes(field, bytes))
    }

    /// Whether `name` has its `protection` disable bit burned.
    ///
    /// Fields without a disable bit for `protection` are never protected.
    pub fn is_protected(&self, name: &str, protection: Protection) -> Result<bool, Error> {
        let field = self.registry.field(name)?;
        match field.disable_bit(protection) {
            Some(bit) => self.disable_bit_burned(protection, bit),
            None => Ok(false),
        }
    }

    pub fn is_readable(&self, name: &str) -> Result<bool, Error> {
        Ok(!self.is_protected(name, Protection::Read)?)
    }

    pub fn is_writeable(&self, name: &str) -> Result<bool, Error> {
        Ok(!self.is_protected(name, Protection::Write)?)
    }

    fn disable_bit_burned(&self, protection: Protection, bit: u32) -> Result<bool, Error> {
        let disable_field = self
            .registry
            .field(self.registry.disable_field_name(protection))?;
        let block = self.blocks[disable_field.block].committed();

        Ok(get_bit(block, (disable_field.bit_offset + bit) as usize))
    }

    /// Stage `value` into the pending buffer of the block holding `name`.
    pub fn stage_field(&mut self, name: &str, value: &EncodedValue) -> Result<(), Error> {
        let field = self.registry.field(name)?;
        if value.bit_width() != field.bit_width {
            return Err(Error::InvalidValue {
                field: name.to_string(),
                value: value.to_string(),
                reason: format!(
                    "the value is {} bits wide, the field is {} bits",
                    value.bit_width(),
                    field.bit_width
                ),
            });
        }

        if !self.is_writeable(name)? {
            warn!("eFuse field {name} is write-protected, burning it will not take effect");
        }

        let field = field.clone();
        let block = &mut self.blocks[field.block];
        block.stage_with(|bytes| field.insert(bytes, value.as_bytes()));
        debug!("Staged {name} = {value} in {}", block.name());

        self.state = BurnState::Staged;

        Ok(())
    }

    /// Stage the `protection` disable bit of `name`.
    pub fn stage_protection(&mut self, name: &str, protection: Protection) -> Result<(), Error> {
        let field = self.registry.field(name)?;
        let Some(bit) = field.disable_bit(protection) else {
            return Err(Error::NotProtectable {
                field: name.to_string(),
                protection,
            });
        };

        let disable_field = self
            .registry
            .field(self.registry.disable_field_name(protection))?
            .clone();
        let block = &mut self.blocks[disable_field.block];
        block.stage_with(|bytes| set_bit(bytes, (disable_field.bit_offset + bit) as usize, true));
        debug!(
            "Staged {protection}-disable bit {bit} ({}) for {name}",
            disable_field.name
        );

        self.state = BurnState::Staged;

        Ok(())
    }

    /// Stage the full contents of block `id`.
    pub fn stage_block(&mut self, id: usize, data: &[u8]) -> Result<(), Error> {
        let block = self
            .blocks
            .get_mut(id)
            .ok_or_else(|| Error::UnknownBlock(format!("BLOCK{id}")))?;
        block.save(data)?;
        debug!("Staged {}: {data:02x?}", block.name());

        self.state = BurnState::Staged;

        Ok(())
    }

    /// Drop every staged change.
    pub fn discard_staged(&mut self) {
        for block in &mut self.blocks {
            block.discard();
        }

        if self.state == BurnState::Staged {
            self.state = BurnState::Idle;
        }
    }
}

impl<T: EfuseTransport> Efuses<T> {
    /// Burn every staged block in a single transaction.
    ///
    /// Blocks whose staged bits are all burned already are skipped, unless
    /// [Self::set_force_write_always] is set. After a successful transaction
    /// the written blocks are read back from the device. A failed transaction
    /// is never retried, and nothing is read back.
    pub fn burn_all(&mut self) -> Result<(), Error> {
        let mut ids = Vec::new();
        for block in self.blocks.iter().filter(|block| block.is_staged()) {
            if block.has_new_bits() || self.force_write_always {
                ids.push(block.id());
            } else {
                info!("{} looks already written, skipping", block.name());
            }
        }

        if ids.is_empty() {
            info!("Nothing to burn");
            self.discard_staged();
            self.state = BurnState::Committed;
            return Ok(());
        }

        self.state = BurnState::Committing;

        let writes = ids
            .iter()
            .map(|id| BlockWrite {
                block: *id,
                data: self.blocks[*id].pending(),
            })
            .collect::<Vec<_>>();
        info!(
            "Burning {}",
            writes
                .iter()
                .map(|write| self.blocks[write.block].name())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let result = self.transport.commit(&writes).map_err(Error::from);
        if let Err(err) = result.committing() {
            self.state = BurnState::CommitFailed;
            for block in &mut self.blocks {
                block.discard();
            }
            return Err(err);
        }
        self.state = BurnState::Committed;

        // Nothing stays staged once the transaction happened, even if the
        // read-back fails.
        let read_back = ids
            .iter()
            .map(|id| self.transport.read_block(*id).map(|data| (*id, data)))
            .collect::<Result<Vec<_>, _>>();
        for block in &mut self.blocks {
            block.discard();
        }

        for (id, data) in read_back? {
            debug!("Read back {}: {data:02x?}", self.blocks[id].name());
            self.blocks[id].refresh(data)?;
        }

        Ok(())
    }
}
