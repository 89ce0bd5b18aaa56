//! Burn operations
//!
//! Every operation follows the same sequence: all arguments are validated and
//! every write is staged in memory, then the staged blocks are burned in a
//! single transaction using [Efuses::burn_all], and finally the result is read
//! back and verified where that is possible. Nothing reaches the device before
//! validation has finished, and nothing is retried after the device has been
//! written to.

use std::{collections::HashSet, fmt};

use log::{error, info};

pub use self::{
    block::{
        bit_burn_data,
        burn_bit,
        burn_block_data,
        pack_msb_first,
        place_block_data,
        reverse_bit_order,
        reverse_byte_order,
    },
    protect::{read_protect_efuse, write_protect_efuse, ProtectReport},
    report::{dump, summary, FieldSummary},
    value::{burn_efuse, plan_burn_efuse, BurnPlan, CodingSchemeHazard, PlannedWrite},
};
use crate::{
    efuse::{BurnState, EfuseBlock, Efuses, EncodedValue, Protection},
    transport::EfuseTransport,
    Error,
};

mod block;
mod protect;
mod report;
mod value;

/// Callbacks notified while an operation is running.
pub trait BurnCallbacks {
    /// Burning a block with a coding scheme makes other fields unburnable.
    fn attention(&mut self, hazard: &CodingSchemeHazard);
    /// A field is about to be staged.
    fn staging(&mut self, write: &PlannedWrite);
    /// Burning a disable bit for one field affects all of `fields`.
    fn cascade(&mut self, protection: Protection, fields: &[String]);
    /// A field already has its disable bit burned.
    fn already_protected(&mut self, field: &str, protection: Protection);
    /// Raw data is about to be staged into a block.
    fn block_data(&mut self, block: &EfuseBlock, data: &[u8], offset: usize);
    /// Everything is staged. Returning `Ok(false)` cancels the operation, an
    /// error aborts it.
    fn confirm(&mut self) -> Result<bool, Error>;
    /// A burned field can not be read back to verify it.
    fn unreadable(&mut self, field: &str);
    /// A burned field does not have its intended state.
    fn verification_failed(&mut self, failure: &VerificationFailure);
}

/// An implementation of [BurnCallbacks] which does nothing and never cancels.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DefaultBurnCallbacks;

impl BurnCallbacks for DefaultBurnCallbacks {
    fn attention(&mut self, _hazard: &CodingSchemeHazard) {}
    fn staging(&mut self, _write: &PlannedWrite) {}
    fn cascade(&mut self, _protection: Protection, _fields: &[String]) {}
    fn already_protected(&mut self, _field: &str, _protection: Protection) {}
    fn block_data(&mut self, _block: &EfuseBlock, _data: &[u8], _offset: usize) {}
    fn confirm(&mut self) -> Result<bool, Error> {
        Ok(true)
    }
    fn unreadable(&mut self, _field: &str) {}
    fn verification_failed(&mut self, _failure: &VerificationFailure) {}
}

/// A field which did not reach its intended state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationFailure {
    /// The value read back differs from the value burned
    Value {
        field: String,
        old: EncodedValue,
        intended: EncodedValue,
        burned: EncodedValue,
    },
    /// The disable bit is still not burned
    Protection {
        field: String,
        protection: Protection,
    },
}

impl VerificationFailure {
    pub fn field(&self) -> &str {
        match self {
            VerificationFailure::Value { field, .. } => field,
            VerificationFailure::Protection { field, .. } => field,
        }
    }
}

impl fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationFailure::Value {
                field,
                old,
                intended,
                burned,
            } => write!(
                f,
                "eFuse field {field} failed to burn: {old} -> {intended}, read back {burned}. Protected?"
            ),
            VerificationFailure::Protection { field, protection } => {
                write!(f, "eFuse field {field} is not {protection}-protected")
            }
        }
    }
}

/// Fail if any name is given more than once.
///
/// The error lists every repeated name once, in order of first repetition.
pub fn check_duplicate_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<(), Error> {
    let mut seen = HashSet::new();
    let mut duplicates: Vec<String> = Vec::new();
    for name in names {
        if !seen.insert(name) && !duplicates.iter().any(|dup| dup == name) {
            duplicates.push(name.to_string());
        }
    }

    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(Error::DuplicateName(duplicates))
    }
}

/// Ask for confirmation, then burn everything staged.
fn commit<T: EfuseTransport>(
    efuses: &mut Efuses<T>,
    callbacks: &mut dyn BurnCallbacks,
) -> Result<(), Error> {
    match callbacks.confirm() {
        Ok(true) => efuses.burn_all(),
        Ok(false) => {
            efuses.discard_staged();
            Err(Error::Cancelled)
        }
        Err(err) => {
            efuses.discard_staged();
            Err(err)
        }
    }
}

/// Record the outcome of a read-back.
fn finish_verification<T>(
    efuses: &mut Efuses<T>,
    failures: Vec<VerificationFailure>,
) -> Result<(), Error> {
    if failures.is_empty() {
        efuses.set_state(BurnState::Verified);
        info!("Successful");
        return Ok(());
    }

    efuses.set_state(BurnState::VerificationFailed);
    for failure in &failures {
        error!("{failure}");
    }

    Err(Error::BurnVerification {
        fields: failures
            .iter()
            .map(|failure| failure.field().to_string())
            .collect(),
    })
}
