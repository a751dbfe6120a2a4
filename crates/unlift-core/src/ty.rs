//! The register-transfer type vocabulary.
//!
//! Types here are deliberately shallow: they carry just enough structure
//! for constants, assignments and signature parameters. No recovery of
//! high-level types happens in this workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Integer signedness. Stored on the type, unlike high-level IRs that
/// push signedness onto operations, because the lifted code compares
/// sizes and signs when reconciling call arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sign {
    Signed,
    Unsigned,
}

/// A register-transfer level type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ty {
    /// Unknown or irrelevant type.
    Void,
    /// A single character.
    Char,
    /// Sized integer with signedness.
    Integer { size: u16, sign: Sign },
    /// Sized IEEE float.
    Float { size: u16 },
    /// Pointer to another type.
    Pointer(Box<Ty>),
    /// Unsized array of an element type.
    Array(Box<Ty>),
    /// A function (used for function-pointer constants).
    Func,
}

impl Ty {
    /// Signed integer of the given bit size.
    pub fn int(size: u16) -> Ty {
        Ty::Integer {
            size,
            sign: Sign::Signed,
        }
    }

    /// Unsigned integer of the given bit size.
    pub fn uint(size: u16) -> Ty {
        Ty::Integer {
            size,
            sign: Sign::Unsigned,
        }
    }

    /// Float of the given bit size.
    pub fn float(size: u16) -> Ty {
        Ty::Float { size }
    }

    /// Pointer to `pointee`.
    pub fn ptr(pointee: Ty) -> Ty {
        Ty::Pointer(Box::new(pointee))
    }

    /// Array of `element`.
    pub fn array(element: Ty) -> Ty {
        Ty::Array(Box::new(element))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Ty::Pointer(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Ty::Integer { .. })
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Ty::Float { .. })
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Ty::Void)
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Void => write!(f, "void"),
            Ty::Char => write!(f, "char"),
            Ty::Integer {
                size,
                sign: Sign::Signed,
            } => write!(f, "i{}", size),
            Ty::Integer {
                size,
                sign: Sign::Unsigned,
            } => write!(f, "u{}", size),
            Ty::Float { size } => write!(f, "f{}", size),
            Ty::Pointer(pointee) => write!(f, "{}*", pointee),
            Ty::Array(element) => write!(f, "{}[]", element),
            Ty::Func => write!(f, "func"),
        }
    }
}
