//! RPL to ELF converter library.
//!
//! This library provides the core components of the `rpl2elf` converter.
//! It is organized into several modules, one per pipeline stage:
//! - `config`: CLI configuration.
//! - `rpl`: the in-memory container model and record codecs.
//! - `loader`: container parsing and section inflation.
//! - `relocation`: vendor relocation repair.
//! - `imports`: import section relocation.
//! - `layout`: file offset assignment.
//! - `writer`: final ELF serialization.

pub mod config;
pub mod imports;
pub mod layout;
pub mod loader;
pub mod relocation;
pub mod rpl;
pub mod utils;
pub mod writer;
