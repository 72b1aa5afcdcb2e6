//! Boardcompat Arduino: the arduino-cli toolchain adapter
//!
//! Implements [`boardcompat_core::CompileAdapter`] and
//! [`boardcompat_core::LibraryCatalog`] by running `arduino-cli` as a child
//! process and reading its JSON output.

pub mod client;
pub mod command;
pub mod runner;

pub use client::{
    parse_core_version, parse_installed_libraries, parse_user_dir, parse_version, ArduinoCli,
    ArduinoCliConfig, ArduinoCliFactory, DEFAULT_PROGRAM, DEFAULT_QUERY_TIMEOUT,
};
pub use command::{CliCommand, Invocation};
pub use runner::{ProcessOutput, ProcessRunner};
