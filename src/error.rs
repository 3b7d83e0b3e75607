//! Terminal error kinds for every stage of the conversion pipeline.
//! There is no partial recovery: callers report the kind and give up.

use quick_error::quick_error;
use std::io;

quick_error! {
    #[derive(Debug)]
    pub enum Error {
        Io(err: io::Error) {
            from()
            display("IO error: {}", err)
        }
        Scroll(err: scroll::Error) {
            from()
            display("codec error: {}", err)
        }
        /// The 16 identification bytes match neither canonical little-endian
        /// System V form.
        BadIdent(ident: [u8; 16]) {
            display("unrecognised ELF ident {:02x?}", ident)
        }
        /// `e_type` is not ET_REL.
        BadObjectType(e_type: u16) {
            display("object type {:#x} is not ET_REL", e_type)
        }
        ShortBuffer { wanted: usize, got: usize } {
            display("short buffer: wanted {} bytes, got {}", wanted, got)
        }
        Malformed(msg: String) {
            display("malformed object: {}", msg)
        }
        /// A relocation type outside the 64-to-32 mapping table.
        UnsupportedReloc { typ: u32, section: String } {
            display("unsupported relocation type {} in {}", typ, section)
        }
        /// The 32-to-64 direction is not implemented.
        UnsupportedBitnessChange {
            display("switching from 32-bit to 64-bit is not supported")
        }
        BadSignature(msg: String) {
            display("bad signature: {}", msg)
        }
        /// `rela_to_rel` could not fold an addend into the patched section.
        AddendOutOfRange { section: String, offset: u64 } {
            display("cannot fold addend into {} at offset {:#x}", section, offset)
        }
        /// A post-emission stub check failed; this is a bug, not bad input.
        Codegen(msg: String) {
            display("internal codegen error: {}", msg)
        }
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;
