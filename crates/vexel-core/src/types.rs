//! Scalar element types
//!
//! Every base array carries one `ScalarType`. The engine uses it to size
//! buffers, pick interpreter lanes, and render C type names in generated
//! kernels.

use crate::error::{Error, Result};
use std::fmt;

/// Scalar element type of a base array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// Complex of two f32
    C64,
    /// Complex of two f64
    C128,
}

impl ScalarType {
    /// Size of one element in bytes
    pub const fn size_of(self) -> usize {
        match self {
            ScalarType::Bool | ScalarType::I8 | ScalarType::U8 => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::U64 | ScalarType::F64 | ScalarType::C64 => 8,
            ScalarType::C128 => 16,
        }
    }

    /// C99 rendering of the type, as used by generated kernels
    pub const fn c_name(self) -> &'static str {
        match self {
            ScalarType::Bool => "uint8_t",
            ScalarType::I8 => "int8_t",
            ScalarType::I16 => "int16_t",
            ScalarType::I32 => "int32_t",
            ScalarType::I64 => "int64_t",
            ScalarType::U8 => "uint8_t",
            ScalarType::U16 => "uint16_t",
            ScalarType::U32 => "uint32_t",
            ScalarType::U64 => "uint64_t",
            ScalarType::F32 => "float",
            ScalarType::F64 => "double",
            ScalarType::C64 => "float complex",
            ScalarType::C128 => "double complex",
        }
    }

    /// Short mnemonic used in block fingerprints
    pub const fn mnemonic(self) -> &'static str {
        match self {
            ScalarType::Bool => "b1",
            ScalarType::I8 => "i8",
            ScalarType::I16 => "i16",
            ScalarType::I32 => "i32",
            ScalarType::I64 => "i64",
            ScalarType::U8 => "u8",
            ScalarType::U16 => "u16",
            ScalarType::U32 => "u32",
            ScalarType::U64 => "u64",
            ScalarType::F32 => "f32",
            ScalarType::F64 => "f64",
            ScalarType::C64 => "c64",
            ScalarType::C128 => "c128",
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, ScalarType::F32 | ScalarType::F64)
    }

    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            ScalarType::I8
                | ScalarType::I16
                | ScalarType::I32
                | ScalarType::I64
                | ScalarType::U8
                | ScalarType::U16
                | ScalarType::U32
                | ScalarType::U64
        )
    }

    pub const fn is_complex(self) -> bool {
        matches!(self, ScalarType::C64 | ScalarType::C128)
    }

    /// Check that a `Pod` access of `elem_size` bytes per element matches this type
    pub fn check_elem_size(self, elem_size: usize) -> Result<()> {
        if self.size_of() == elem_size {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                expected: self.to_string(),
                actual: elem_size,
            })
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(ScalarType::Bool.size_of(), 1);
        assert_eq!(ScalarType::I32.size_of(), 4);
        assert_eq!(ScalarType::F64.size_of(), 8);
        assert_eq!(ScalarType::C64.size_of(), 8);
        assert_eq!(ScalarType::C128.size_of(), 16);
    }

    #[test]
    fn test_c_names() {
        assert_eq!(ScalarType::U16.c_name(), "uint16_t");
        assert_eq!(ScalarType::F32.c_name(), "float");
        assert_eq!(ScalarType::C128.c_name(), "double complex");
    }

    #[test]
    fn test_classes() {
        assert!(ScalarType::F32.is_float());
        assert!(!ScalarType::F32.is_integer());
        assert!(ScalarType::U64.is_integer());
        assert!(ScalarType::C64.is_complex());
        assert!(!ScalarType::Bool.is_integer());
    }

    #[test]
    fn test_elem_size_check() {
        assert!(ScalarType::I32.check_elem_size(4).is_ok());
        assert!(ScalarType::I32.check_elem_size(8).is_err());
    }
}
