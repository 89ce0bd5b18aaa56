//! A library and application for burning eFuses on Espressif devices
//!
//! eFuses are one-time-programmable bits: once a bit has been burned it can
//! never be cleared again. This crate stages writes to named eFuse fields and
//! raw eFuse blocks in memory, commits every staged block to the device in a
//! single transaction, and verifies the result afterwards.
//!
//! ## As an application
//!
//! [espefuse] can be installed using `cargo install`, and additionally supports
//! installation via [cargo-binstall]:
//!
//! ```bash
//! $ cargo install espefuse
//! $ cargo binstall espefuse
//! ```
//!
//! ## As a library
//!
//! [espefuse] can be used as a library in other applications:
//!
//! ```toml
//! espefuse = { version = "0.1", default-features = false }
//! ```
//!
//! Disabling the `cli` feature removes all command-line related
//! dependencies, leaving the burn orchestration in [operations] and the
//! [efuse] model.
//!
//! [espefuse]: https://crates.io/crates/espefuse
//! [cargo-binstall]: https://github.com/cargo-bins/cargo-binstall

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_debug_implementations, rust_2018_idioms)]

pub use self::error::Error;

#[cfg(feature = "cli")]
#[cfg_attr(docsrs, doc(cfg(feature = "cli")))]
pub mod cli;
pub mod efuse;
pub mod error;
pub mod operations;
pub mod transport;

/// Logging utilities
#[cfg(feature = "cli")]
#[cfg_attr(docsrs, doc(cfg(feature = "cli")))]
pub mod logging {
    use env_logger::Env;
    use log::LevelFilter;

    /// Initialize the logger with the given [LevelFilter]
    pub fn initialize_logger(filter: LevelFilter) {
        env_logger::Builder::from_env(Env::default().default_filter_or(filter.as_str()))
            .format_target(false)
            .init();
    }
}
