//! Function signatures supplied alongside the input object.
//!
//! One record per exported or imported function; the thunk pass needs the
//! argument widths and the return convention to bridge the two ABIs. The
//! textual form is one whitespace-split record per line:
//! `<name> <return type> <argument type>*`.

use crate::error::{Error, Result};

/// Argument type tokens and their 32-bit ABI stack widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CType {
    Int,
    Uint,
    Long,
    Ulong,
    Longlong,
    Ulonglong,
    Ptr,
}

impl CType {
    pub fn from_token(token: &str) -> Option<CType> {
        match token {
            "int" => Some(CType::Int),
            "uint" => Some(CType::Uint),
            "long" => Some(CType::Long),
            "ulong" => Some(CType::Ulong),
            "longlong" => Some(CType::Longlong),
            "ulonglong" => Some(CType::Ulonglong),
            "ptr" => Some(CType::Ptr),
            _ => None,
        }
    }

    /// Bytes the value occupies on the 32-bit stack.
    pub fn size(self) -> usize {
        match self {
            CType::Longlong | CType::Ulonglong => 8,
            _ => 4,
        }
    }
}

/// Return conventions a stub has to honour. Four-byte returns travel in
/// eax; eight-byte returns travel in the edx:eax pair on the 32-bit side
/// and in rax on the 64-bit side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    Void,
    Value(CType),
}

impl ReturnType {
    pub fn from_token(token: &str) -> Option<ReturnType> {
        if token == "void" {
            return Some(ReturnType::Void);
        }
        CType::from_token(token).map(ReturnType::Value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub return_type: ReturnType,
    pub args: Vec<CType>,
}

impl Signature {
    /// Total 32-bit stack footprint of the argument list.
    pub fn args_size(&self) -> usize {
        self.args.iter().map(|arg| arg.size()).sum()
    }
}

/// Parses a signature list, preserving record order.
pub fn parse_signatures(text: &str) -> Result<Vec<Signature>> {
    let mut signatures = Vec::new();
    for line in text.lines() {
        let mut tokens = line.split_whitespace();
        let name = match tokens.next() {
            Some(name) => name,
            None => continue, // blank line
        };
        let return_token = tokens.next().ok_or_else(|| {
            Error::BadSignature(format!("{}: missing return type", name))
        })?;
        let return_type = ReturnType::from_token(return_token).ok_or_else(|| {
            Error::BadSignature(format!("{}: unknown return type {:?}", name, return_token))
        })?;
        let mut args = Vec::new();
        for token in tokens {
            args.push(CType::from_token(token).ok_or_else(|| {
                Error::BadSignature(format!("{}: unknown argument type {:?}", name, token))
            })?);
        }
        signatures.push(Signature {
            name: name.to_string(),
            return_type,
            args,
        });
    }
    Ok(signatures)
}
