use log::info;

use super::{
    check_duplicate_names,
    commit,
    finish_verification,
    BurnCallbacks,
    VerificationFailure,
};
use crate::{
    efuse::{Efuses, Protection},
    transport::EfuseTransport,
    Error,
};

/// Outcome of a protection burn
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectReport {
    /// Fields whose disable bit was staged and burned.
    pub protected: Vec<String>,
    /// Fields which already had their disable bit burned.
    pub already_protected: Vec<String>,
}

/// Permanently disable reading the given fields.
///
/// Processing stops at the first field which is already read-protected: the
/// call returns successfully without burning anything, including fields
/// staged before it.
pub fn read_protect_efuse<T: EfuseTransport, S: AsRef<str>>(
    efuses: &mut Efuses<T>,
    names: &[S],
    callbacks: &mut dyn BurnCallbacks,
) -> Result<ProtectReport, Error> {
    validate(efuses, names, Protection::Read)?;

    let mut report = ProtectReport::default();
    for name in names.iter().map(AsRef::as_ref) {
        if efuses.is_protected(name, Protection::Read)? {
            info!("eFuse field {name} is already read-protected");
            callbacks.already_protected(name, Protection::Read);
            report.already_protected.push(name.to_string());

            efuses.discard_staged();
            return Ok(report);
        }

        stage(efuses, name, Protection::Read, callbacks)?;
        report.protected.push(name.to_string());
    }

    commit(efuses, callbacks)?;
    verify(efuses, names, Protection::Read, callbacks)?;

    Ok(report)
}

/// Permanently disable writing the given fields.
///
/// Fields which are already write-protected are reported and skipped, the
/// remaining fields are still burned.
pub fn write_protect_efuse<T: EfuseTransport, S: AsRef<str>>(
    efuses: &mut Efuses<T>,
    names: &[S],
    callbacks: &mut dyn BurnCallbacks,
) -> Result<ProtectReport, Error> {
    validate(efuses, names, Protection::Write)?;

    let mut report = ProtectReport::default();
    for name in names.iter().map(AsRef::as_ref) {
        if efuses.is_protected(name, Protection::Write)? {
            info!("eFuse field {name} is already write-protected");
            callbacks.already_protected(name, Protection::Write);
            report.already_protected.push(name.to_string());
            continue;
        }

        stage(efuses, name, Protection::Write, callbacks)?;
        report.protected.push(name.to_string());
    }

    commit(efuses, callbacks)?;
    verify(efuses, names, Protection::Write, callbacks)?;

    Ok(report)
}

fn validate<T, S: AsRef<str>>(
    efuses: &Efuses<T>,
    names: &[S],
    protection: Protection,
) -> Result<(), Error> {
    check_duplicate_names(names.iter().map(AsRef::as_ref))?;

    for name in names.iter().map(AsRef::as_ref) {
        if efuses.field(name)?.disable_bit(protection).is_none() {
            return Err(Error::NotProtectable {
                field: name.to_string(),
                protection,
            });
        }
    }

    Ok(())
}

fn stage<T>(
    efuses: &mut Efuses<T>,
    name: &str,
    protection: Protection,
    callbacks: &mut dyn BurnCallbacks,
) -> Result<(), Error> {
    let bit = efuses
        .field(name)?
        .disable_bit(protection)
        .ok_or_else(|| Error::NotProtectable {
            field: name.to_string(),
            protection,
        })?;

    let group = efuses.registry().protection_group(protection, bit).to_vec();
    info!(
        "Permanently {protection}-disabling eFuse field{} {}",
        if group.len() > 1 { "s" } else { "" },
        group.join(", ")
    );
    callbacks.cascade(protection, &group);

    if let Err(err) = efuses.stage_protection(name, protection) {
        efuses.discard_staged();
        return Err(err);
    }

    Ok(())
}

fn verify<T, S: AsRef<str>>(
    efuses: &mut Efuses<T>,
    names: &[S],
    protection: Protection,
    callbacks: &mut dyn BurnCallbacks,
) -> Result<(), Error> {
    info!("Checking eFuses...");

    let mut failures = Vec::new();
    for name in names.iter().map(AsRef::as_ref) {
        if !efuses.is_protected(name, protection)? {
            let failure = VerificationFailure::Protection {
                field: name.to_string(),
                protection,
            };
            callbacks.verification_failed(&failure);
            failures.push(failure);
        }
    }

    finish_verification(efuses, failures)
}
