//! Convert a 64-bit x86-64 relocatable object (ET_REL) into a 32-bit i386
//! one whose externally visible functions stay callable across the ABI
//! boundary through generated mode-switch thunks.
//!
//! The pipeline is strictly sequential: parse the input image, re-emit
//! every structure in the 32-bit layout, fold RELA relocations into REL
//! form, synthesise the thunks, lay the file out and write it. Each stage
//! is available on [`Object`]; [`convert`] runs them all.
//!
//! ```no_run
//! use thunker::parse_signatures;
//!
//! # fn main() -> thunker::Result<()> {
//! let signatures = parse_signatures("foo int int\nbar longlong ptr\n")?;
//! thunker::convert_file("input64.o", "output32.o", &signatures)?;
//! # Ok(())
//! # }
//! ```
//!
//! Callers supply one [`sig::Signature`] per exported or imported function
//! so the stubs know the argument widths and the return convention.

use std::fs;
use std::path::Path;

pub mod convert;
pub mod elf;
pub mod error;
pub mod object;
pub mod sig;
pub mod strtab;
pub mod thunk;
pub mod writer;

pub use crate::elf::Class;
pub use crate::error::{Error, Result};
pub use crate::object::{Object, Section, SectionContent};
pub use crate::sig::{parse_signatures, Signature};

/// Runs the whole conversion on an in-memory image and returns the final
/// 32-bit object image.
pub fn convert(bytes: &[u8], signatures: &[Signature]) -> Result<Vec<u8>> {
    let object = Object::parse(bytes)?;
    let mut object = object.switch_bitness()?;
    object.rela_to_rel(true)?;
    object.add_thunks(signatures)?;
    object.to_bytes()
}

/// [`convert`] with one read and one write: reads the object at `input`,
/// writes the converted image to `output`.
pub fn convert_file<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    signatures: &[Signature],
) -> Result<()> {
    let bytes = fs::read(input)?;
    let image = convert(&bytes, signatures)?;
    fs::write(output, image)?;
    Ok(())
}
