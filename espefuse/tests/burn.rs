use std::io;

use espefuse::{
    efuse::{BurnState, EfuseBlock, Efuses, EncodedValue, Protection, Registry},
    error::OffsetConflict,
    operations::{
        burn_bit,
        burn_block_data,
        burn_efuse,
        plan_burn_efuse,
        read_protect_efuse,
        write_protect_efuse,
        BurnCallbacks,
        CodingSchemeHazard,
        DefaultBurnCallbacks,
        PlannedWrite,
        VerificationFailure,
    },
    transport::VirtualDevice,
    Error,
};
use pretty_assertions::assert_eq;

fn efuses() -> Efuses<VirtualDevice> {
    let registry = Registry::from_toml_str(include_str!("data/catalog.toml")).unwrap();
    Efuses::connect(VirtualDevice::blank(&registry), registry).unwrap()
}

fn value(efuses: &Efuses<VirtualDevice>, name: &str, input: &str) -> (String, EncodedValue) {
    let field = efuses.field(name).unwrap();
    (name.to_string(), EncodedValue::parse(field, Some(input)).unwrap())
}

#[derive(Debug, Default)]
struct Recorder {
    cancel: bool,
    terminal_closed: bool,
    hazards: Vec<CodingSchemeHazard>,
    staged: Vec<String>,
    cascades: Vec<(Protection, Vec<String>)>,
    already_protected: Vec<String>,
    unreadable: Vec<String>,
    failures: Vec<VerificationFailure>,
}

impl BurnCallbacks for Recorder {
    fn attention(&mut self, hazard: &CodingSchemeHazard) {
        self.hazards.push(hazard.clone());
    }

    fn staging(&mut self, write: &PlannedWrite) {
        self.staged.push(write.name.clone());
    }

    fn cascade(&mut self, protection: Protection, fields: &[String]) {
        self.cascades.push((protection, fields.to_vec()));
    }

    fn already_protected(&mut self, field: &str, _protection: Protection) {
        self.already_protected.push(field.to_string());
    }

    fn block_data(&mut self, _block: &EfuseBlock, _data: &[u8], _offset: usize) {}

    fn confirm(&mut self) -> Result<bool, Error> {
        if self.terminal_closed {
            return Err(io::Error::other("terminal closed").into());
        }

        Ok(!self.cancel)
    }

    fn unreadable(&mut self, field: &str) {
        self.unreadable.push(field.to_string());
    }

    fn verification_failed(&mut self, failure: &VerificationFailure) {
        self.failures.push(failure.clone());
    }
}

#[test]
fn burned_values_are_verified() {
    let mut efuses = efuses();
    let values = [
        value(&efuses, "CHIP_VERSION", "0x12"),
        value(&efuses, "JTAG_DISABLE", "true"),
    ];

    let plan = burn_efuse(&mut efuses, &values, &mut DefaultBurnCallbacks).unwrap();
    assert!(plan.hazards.is_empty());
    assert_eq!(plan.writes[0].old.to_u64(), Some(0));

    assert_eq!(efuses.state(), BurnState::Verified);
    assert_eq!(efuses.read_field("CHIP_VERSION").unwrap().to_u64(), Some(0x12));
    assert_eq!(efuses.read_field("JTAG_DISABLE").unwrap().to_u64(), Some(1));
    assert_eq!(efuses.transport().commit_count(), 1);
    assert_eq!(&efuses.transport().block_data(0)[4..6], &[0x12, 0x01]);
}

#[test]
fn wide_fields_take_hex_strings() {
    let mut efuses = efuses();
    let key = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";
    let values = [value(&efuses, "FLASH_KEY", key)];

    burn_efuse(&mut efuses, &values, &mut DefaultBurnCallbacks).unwrap();

    let block = efuses.transport().block_data(1);
    assert_eq!(block[0], 0xff);
    assert_eq!(block[31], 0x00);
    assert_eq!(efuses.read_field("FLASH_KEY").unwrap().to_string(), format!("0x{key}"));
}

#[test]
fn mismatching_read_back_fails_verification() {
    let mut efuses = efuses();
    let mut defect = vec![0u8; 16];
    defect[4] = 0x02;
    efuses.transport_mut().add_defect(0, &defect);

    let values = [
        value(&efuses, "CHIP_VERSION", "0x12"),
        value(&efuses, "JTAG_DISABLE", "1"),
    ];
    let mut recorder = Recorder::default();
    let err = burn_efuse(&mut efuses, &values, &mut recorder).unwrap_err();

    assert!(matches!(err, Error::BurnVerification { fields } if fields == ["CHIP_VERSION"]));
    assert_eq!(efuses.state(), BurnState::VerificationFailed);
    assert_eq!(recorder.failures.len(), 1);
    match &recorder.failures[0] {
        VerificationFailure::Value {
            field,
            old,
            intended,
            burned,
        } => {
            assert_eq!(field, "CHIP_VERSION");
            assert_eq!(old.to_u64(), Some(0));
            assert_eq!(intended.to_u64(), Some(0x12));
            assert_eq!(burned.to_u64(), Some(0x10));
        }
        failure => panic!("unexpected failure: {failure}"),
    }
}

#[test]
fn failed_commit_is_not_read_back() {
    let mut efuses = efuses();
    efuses.transport_mut().fail_next_commit("brownout");
    let values = [value(&efuses, "CHIP_VERSION", "7")];

    let reads = efuses.transport().read_count();
    let err = burn_efuse(&mut efuses, &values, &mut DefaultBurnCallbacks).unwrap_err();

    assert!(matches!(err, Error::Commit(_)));
    assert_eq!(efuses.state(), BurnState::CommitFailed);
    assert_eq!(efuses.transport().read_count(), reads);
    assert!(efuses.blocks().iter().all(|block| !block.is_staged()));
}

#[test]
fn declined_confirmation_burns_nothing() {
    let mut efuses = efuses();
    let values = [value(&efuses, "CHIP_VERSION", "7")];
    let mut recorder = Recorder {
        cancel: true,
        ..Recorder::default()
    };

    let err = burn_efuse(&mut efuses, &values, &mut recorder).unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(recorder.staged, ["CHIP_VERSION"]);
    assert_eq!(efuses.state(), BurnState::Idle);
    assert_eq!(efuses.transport().commit_count(), 0);
}

#[test]
fn failed_confirmation_is_reported() {
    let mut efuses = efuses();
    let values = [value(&efuses, "CHIP_VERSION", "7")];
    let mut recorder = Recorder {
        terminal_closed: true,
        ..Recorder::default()
    };

    let err = burn_efuse(&mut efuses, &values, &mut recorder).unwrap_err();
    assert!(matches!(err, Error::IoError(_)));
    assert_eq!(efuses.state(), BurnState::Idle);
    assert!(efuses.blocks().iter().all(|block| !block.is_staged()));
    assert_eq!(efuses.transport().commit_count(), 0);
}

#[test]
fn write_protected_fields_fail_verification() {
    let mut efuses = efuses();
    write_protect_efuse(&mut efuses, &["CHIP_VERSION"], &mut DefaultBurnCallbacks).unwrap();

    let values = [value(&efuses, "CHIP_VERSION", "0x12")];
    let mut recorder = Recorder::default();
    let err = burn_efuse(&mut efuses, &values, &mut recorder).unwrap_err();

    assert!(matches!(err, Error::BurnVerification { fields } if fields == ["CHIP_VERSION"]));
    assert_eq!(efuses.state(), BurnState::VerificationFailed);
    assert_eq!(efuses.read_field("CHIP_VERSION").unwrap().to_u64(), Some(0));
    assert_eq!(efuses.transport().block_data(0)[4], 0x00);
    assert!(matches!(
        &recorder.failures[..],
        [VerificationFailure::Value { field, .. }] if field == "CHIP_VERSION"
    ));
}

#[test]
fn coded_blocks_report_unburnable_fields() {
    let efuses = efuses();

    let plan = plan_burn_efuse(&efuses, &[value(&efuses, "MAC", "0x0011aabbccdd")]).unwrap();
    assert_eq!(plan.hazards.len(), 1);
    assert_eq!(plan.hazards[0].block_name, "BLOCK2");
    assert_eq!(plan.hazards[0].blocked, ["CUSTOM_DATA", "MAC_CRC"]);

    let plan = plan_burn_efuse(
        &efuses,
        &[
            value(&efuses, "MAC_CRC", "0x5a"),
            value(&efuses, "MAC", "0x0011aabbccdd"),
        ],
    )
    .unwrap();
    assert_eq!(plan.hazards[0].blocked, ["CUSTOM_DATA"]);

    let plan = plan_burn_efuse(&efuses, &[value(&efuses, "CHIP_VERSION", "1")]).unwrap();
    assert!(plan.hazards.is_empty());
}

#[test]
fn hazards_do_not_prevent_burning() {
    let mut efuses = efuses();
    let values = [value(&efuses, "USER_WORD0", "0xdeadbeef")];
    let mut recorder = Recorder::default();

    burn_efuse(&mut efuses, &values, &mut recorder).unwrap();

    assert_eq!(recorder.hazards.len(), 1);
    assert_eq!(recorder.hazards[0].blocked, ["USER_WORD1"]);
    assert_eq!(efuses.state(), BurnState::Verified);
}

#[test]
fn read_protected_fields_are_not_verified() {
    let mut efuses = efuses();
    read_protect_efuse(&mut efuses, &["USER_WORD0"], &mut DefaultBurnCallbacks).unwrap();

    let values = [value(&efuses, "USER_WORD1", "42")];
    let mut recorder = Recorder::default();
    burn_efuse(&mut efuses, &values, &mut recorder).unwrap();

    assert_eq!(recorder.unreadable, ["USER_WORD1"]);
    assert!(recorder.failures.is_empty());
    assert_eq!(efuses.state(), BurnState::Verified);
}

#[test]
fn protection_cascades_to_shared_bits() {
    let mut efuses = efuses();
    let mut recorder = Recorder::default();

    let report = write_protect_efuse(&mut efuses, &["FLASH_CRYPT_CNT"], &mut recorder).unwrap();

    assert_eq!(report.protected, ["FLASH_CRYPT_CNT"]);
    assert_eq!(
        recorder.cascades,
        [(
            Protection::Write,
            vec!["FLASH_CRYPT_CNT".to_string(), "UART_DOWNLOAD_DIS".to_string()]
        )]
    );
    assert!(!efuses.is_writeable("FLASH_CRYPT_CNT").unwrap());
    assert!(!efuses.is_writeable("UART_DOWNLOAD_DIS").unwrap());
    assert!(efuses.is_writeable("CHIP_VERSION").unwrap());
    assert_eq!(efuses.state(), BurnState::Verified);
}

#[test]
fn read_protection_stops_at_protected_field() {
    let mut efuses = efuses();
    read_protect_efuse(&mut efuses, &["USER_WORD0"], &mut DefaultBurnCallbacks).unwrap();
    assert!(!efuses.is_readable("USER_WORD1").unwrap());
    let commits = efuses.transport().commit_count();

    let mut recorder = Recorder::default();
    let report =
        read_protect_efuse(&mut efuses, &["FLASH_KEY", "USER_WORD1"], &mut recorder).unwrap();

    assert_eq!(report.already_protected, ["USER_WORD1"]);
    assert_eq!(recorder.already_protected, ["USER_WORD1"]);
    assert!(efuses.is_readable("FLASH_KEY").unwrap());
    assert_eq!(efuses.transport().commit_count(), commits);

    let report = read_protect_efuse(&mut efuses, &["USER_WORD1"], &mut recorder).unwrap();
    assert!(report.protected.is_empty());
    assert_eq!(efuses.transport().commit_count(), commits);
}

#[test]
fn write_protection_skips_protected_fields() {
    let mut efuses = efuses();
    write_protect_efuse(&mut efuses, &["JTAG_DISABLE"], &mut DefaultBurnCallbacks).unwrap();

    let mut recorder = Recorder::default();
    let report =
        write_protect_efuse(&mut efuses, &["JTAG_DISABLE", "CHIP_VERSION"], &mut recorder)
            .unwrap();

    assert_eq!(report.already_protected, ["JTAG_DISABLE"]);
    assert_eq!(report.protected, ["CHIP_VERSION"]);
    assert!(!efuses.is_writeable("CHIP_VERSION").unwrap());
}

#[test]
fn unburned_write_disable_bit_fails_verification() {
    let mut efuses = efuses();
    let mut defect = vec![0u8; 16];
    defect[0] = 0x08;
    efuses.transport_mut().add_defect(0, &defect);

    let mut recorder = Recorder::default();
    let err = write_protect_efuse(&mut efuses, &["CHIP_VERSION", "JTAG_DISABLE"], &mut recorder)
        .unwrap_err();

    assert!(matches!(err, Error::BurnVerification { fields } if fields == ["CHIP_VERSION"]));
    assert_eq!(efuses.state(), BurnState::VerificationFailed);
    assert_eq!(
        recorder.failures,
        [VerificationFailure::Protection {
            field: "CHIP_VERSION".to_string(),
            protection: Protection::Write,
        }]
    );
    assert!(efuses.is_writeable("CHIP_VERSION").unwrap());
    assert!(!efuses.is_writeable("JTAG_DISABLE").unwrap());
}

#[test]
fn unburned_read_disable_bit_fails_verification() {
    let mut efuses = efuses();
    let mut defect = vec![0u8; 16];
    defect[2] = 0x01;
    efuses.transport_mut().add_defect(0, &defect);

    let mut recorder = Recorder::default();
    let err = read_protect_efuse(&mut efuses, &["FLASH_KEY"], &mut recorder).unwrap_err();

    assert!(matches!(err, Error::BurnVerification { fields } if fields == ["FLASH_KEY"]));
    assert_eq!(efuses.state(), BurnState::VerificationFailed);
    assert_eq!(
        recorder.failures,
        [VerificationFailure::Protection {
            field: "FLASH_KEY".to_string(),
            protection: Protection::Read,
        }]
    );
    assert!(efuses.is_readable("FLASH_KEY").unwrap());
}

#[test]
fn protection_needs_a_disable_bit() {
    let mut efuses = efuses();

    let err =
        read_protect_efuse(&mut efuses, &["CHIP_VERSION"], &mut DefaultBurnCallbacks).unwrap_err();
    assert!(matches!(
        err,
        Error::NotProtectable {
            protection: Protection::Read,
            ..
        }
    ));

    let err = write_protect_efuse(&mut efuses, &["NO_SUCH_FIELD"], &mut DefaultBurnCallbacks)
        .unwrap_err();
    assert!(matches!(err, Error::UnknownField(name) if name == "NO_SUCH_FIELD"));
    assert_eq!(efuses.transport().commit_count(), 0);
}

#[test]
fn duplicate_names_are_rejected_everywhere() {
    let mut efuses = efuses();
    let values = [
        value(&efuses, "CHIP_VERSION", "1"),
        value(&efuses, "CHIP_VERSION", "2"),
    ];
    let mut callbacks = DefaultBurnCallbacks;

    assert!(matches!(
        burn_efuse(&mut efuses, &values, &mut callbacks),
        Err(Error::DuplicateName(_))
    ));
    assert!(matches!(
        read_protect_efuse(&mut efuses, &["FLASH_KEY", "FLASH_KEY"], &mut callbacks),
        Err(Error::DuplicateName(_))
    ));
    assert!(matches!(
        write_protect_efuse(&mut efuses, &["MAC", "MAC"], &mut callbacks),
        Err(Error::DuplicateName(_))
    ));
    assert!(matches!(
        burn_block_data(
            &mut efuses,
            &["BLOCK1", "BLOCK1"],
            &[vec![0u8; 32], vec![0u8; 32]],
            0,
            &mut callbacks
        ),
        Err(Error::DuplicateName(names)) if names == ["BLOCK1"]
    ));

    assert_eq!(efuses.state(), BurnState::Idle);
    assert!(efuses.blocks().iter().all(|block| !block.is_staged()));
    assert_eq!(efuses.transport().commit_count(), 0);
}

#[test]
fn block_data_is_placed_at_offset() {
    let mut efuses = efuses();
    let payload: Vec<u8> = (1..=28).collect();

    burn_block_data(
        &mut efuses,
        &["flash_encryption"],
        &[payload.as_slice()],
        4,
        &mut DefaultBurnCallbacks,
    )
    .unwrap();

    let block = efuses.transport().block_data(1);
    assert_eq!(&block[..4], &[0, 0, 0, 0]);
    assert_eq!(&block[4..], payload.as_slice());
    assert_eq!(efuses.state(), BurnState::Committed);
}

#[test]
fn block_data_must_fit() {
    let mut efuses = efuses();

    let err = burn_block_data(
        &mut efuses,
        &["BLOCK1"],
        &[[0xffu8; 30]],
        4,
        &mut DefaultBurnCallbacks,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::SizeMismatch {
            expected: 32,
            actual: 34,
            offset: 4,
            ..
        }
    ));

    let err = burn_block_data(
        &mut efuses,
        &["BLOCK1"],
        &[[0u8; 4]],
        32,
        &mut DefaultBurnCallbacks,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::OffsetConflict(OffsetConflict::OutOfBlock { offset: 32, length: 32, .. })
    ));
    assert_eq!(efuses.transport().commit_count(), 0);
}

#[test]
fn offset_needs_a_single_block() {
    let mut efuses = efuses();

    // Payloads which could never fit do not matter.
    let err = burn_block_data(
        &mut efuses,
        &["BLOCK1", "BLOCK2"],
        &[vec![0u8; 100], vec![0u8; 100]],
        4,
        &mut DefaultBurnCallbacks,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::OffsetConflict(OffsetConflict::MultipleBlocks { offset: 4, blocks: 2 })
    ));

    let err = burn_block_data(
        &mut efuses,
        &["BLOCK1", "BLOCK2"],
        &[vec![0u8; 32]],
        0,
        &mut DefaultBurnCallbacks,
    )
    .unwrap_err();
    assert!(matches!(err, Error::DataCountMismatch { blocks: 2, data: 1 }));

    let err = burn_block_data(
        &mut efuses,
        &["BLOCK9"],
        &[vec![0u8; 32]],
        0,
        &mut DefaultBurnCallbacks,
    )
    .unwrap_err();
    assert!(matches!(err, Error::UnknownBlock(_)));
}

#[test]
fn every_payload_is_checked_before_staging() {
    let mut efuses = efuses();

    let err = burn_block_data(
        &mut efuses,
        &["BLOCK1", "BLOCK2"],
        &[vec![0xaau8; 32], vec![0u8; 33]],
        0,
        &mut DefaultBurnCallbacks,
    )
    .unwrap_err();

    assert!(matches!(err, Error::SizeMismatch { .. }));
    assert!(efuses.blocks().iter().all(|block| !block.is_staged()));
    assert_eq!(efuses.transport().block_data(1), &[0u8; 32]);
}

#[test]
fn single_bits_are_burned() {
    let mut efuses = efuses();

    burn_bit(&mut efuses, "BLOCK3", &[0, 255], &mut DefaultBurnCallbacks).unwrap();

    let block = efuses.transport().block_data(3);
    assert_eq!(block[0], 0x01);
    assert_eq!(block[31], 0x80);
    assert_eq!(efuses.state(), BurnState::Committed);

    let err = burn_bit(&mut efuses, "BLOCK3", &[256], &mut DefaultBurnCallbacks).unwrap_err();
    assert!(matches!(
        err,
        Error::BitIndexOutOfRange {
            index: 256,
            max: 255,
            ..
        }
    ));
    assert_eq!(efuses.transport().commit_count(), 1);
}
