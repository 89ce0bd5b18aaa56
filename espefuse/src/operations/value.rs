use std::collections::BTreeSet;

use log::{info, warn};

use super::{commit, finish_verification, BurnCallbacks, VerificationFailure};
use crate::{
    efuse::{CodingScheme, Efuses, EncodedValue},
    operations::check_duplicate_names,
    transport::EfuseTransport,
    Error,
};

/// A field value which is going to be burned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedWrite {
    /// Name of the field.
    pub name: String,
    /// Index of the block holding the field.
    pub block: usize,
    /// Value before burning.
    pub old: EncodedValue,
    /// Value to burn.
    pub new: EncodedValue,
}

/// Fields which can no longer be burned once a coded block has been written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodingSchemeHazard {
    /// Index of the block.
    pub block: usize,
    /// Name of the block.
    pub block_name: String,
    /// Coding scheme of the block.
    pub coding_scheme: CodingScheme,
    /// Fields of the block which are not part of this burn, sorted by name.
    pub blocked: Vec<String>,
}

/// Validated field writes, together with the hazards they cause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurnPlan {
    pub writes: Vec<PlannedWrite>,
    pub hazards: Vec<CodingSchemeHazard>,
}

/// Validate a value burn without touching the device.
///
/// For every touched block using a coding scheme other than
/// [CodingScheme::None], the returned plan lists the fields of that block
/// which will not be burnable afterwards. These hazards are advisory.
pub fn plan_burn_efuse<T>(
    efuses: &Efuses<T>,
    values: &[(String, EncodedValue)],
) -> Result<BurnPlan, Error> {
    check_duplicate_names(values.iter().map(|(name, _)| name.as_str()))?;

    let mut writes = Vec::with_capacity(values.len());
    for (name, value) in values {
        let field = efuses.field(name)?;
        if value.bit_width() != field.bit_width {
            return Err(Error::InvalidValue {
                field: name.clone(),
                value: value.to_string(),
                reason: format!(
                    "the value is {} bits wide, the field is {} bits",
                    value.bit_width(),
                    field.bit_width
                ),
            });
        }

        writes.push(PlannedWrite {
            name: name.clone(),
            block: field.block,
            old: efuses.read_field(name)?,
            new: value.clone(),
        });
    }

    let hazards = coding_scheme_hazards(efuses, &writes);

    Ok(BurnPlan { writes, hazards })
}

fn coding_scheme_hazards<T>(
    efuses: &Efuses<T>,
    writes: &[PlannedWrite],
) -> Vec<CodingSchemeHazard> {
    let touched: BTreeSet<usize> = writes.iter().map(|write| write.block).collect();

    touched
        .into_iter()
        .filter_map(|id| {
            let block = &efuses.blocks()[id];
            if block.coding_scheme() == CodingScheme::None {
                return None;
            }

            let in_block: BTreeSet<&str> = efuses
                .registry()
                .fields_in_block(id)
                .map(|field| field.name.as_str())
                .collect();
            let written: BTreeSet<&str> = writes
                .iter()
                .filter(|write| write.block == id)
                .map(|write| write.name.as_str())
                .collect();

            let blocked: Vec<String> = in_block
                .symmetric_difference(&written)
                .map(|name| name.to_string())
                .collect();

            (!blocked.is_empty()).then(|| CodingSchemeHazard {
                block: id,
                block_name: block.name().to_string(),
                coding_scheme: block.coding_scheme(),
                blocked,
            })
        })
        .collect()
}

/// Burn new values into named eFuse fields.
///
/// Fields which are read-protected after the burn are reported through
/// [BurnCallbacks::unreadable] and not verified. Every other field is read
/// back, and the call fails with [Error::BurnVerification] naming every field
/// whose value does not match.
pub fn burn_efuse<T: EfuseTransport>(
    efuses: &mut Efuses<T>,
    values: &[(String, EncodedValue)],
    callbacks: &mut dyn BurnCallbacks,
) -> Result<BurnPlan, Error> {
    let plan = plan_burn_efuse(efuses, values)?;

    for hazard in &plan.hazards {
        warn!(
            "{} uses the {} coding scheme, after burning these eFuses can not be burned anymore: {}",
            hazard.block_name,
            hazard.coding_scheme,
            hazard.blocked.join(", ")
        );
        callbacks.attention(hazard);
    }

    for write in &plan.writes {
        callbacks.staging(write);
        if let Err(err) = efuses.stage_field(&write.name, &write.new) {
            efuses.discard_staged();
            return Err(err);
        }
    }

    commit(efuses, callbacks)?;

    info!("Checking eFuses...");
    let mut failures = Vec::new();
    for write in &plan.writes {
        if !efuses.is_readable(&write.name)? {
            warn!(
                "eFuse field {} is read-protected, reading back the burned value is not possible",
                write.name
            );
            callbacks.unreadable(&write.name);
            continue;
        }

        let burned = efuses.read_field(&write.name)?;
        if burned != write.new {
            let failure = VerificationFailure::Value {
                field: write.name.clone(),
                old: write.old.clone(),
                intended: write.new.clone(),
                burned,
            };
            callbacks.verification_failed(&failure);
            failures.push(failure);
        }
    }

    finish_verification(efuses, failures)?;

    Ok(plan)
}
