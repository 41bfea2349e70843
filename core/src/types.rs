/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the Lo Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * 1. OPEN SOURCE: You may use this file under the terms of the GNU Affero
 * General Public License v3.0. If you link to this code, your ENTIRE
 * application must be open-sourced under AGPLv3.
 *
 * 2. COMMERCIAL: For proprietary use, you must obtain a Commercial License
 * from Sovereign Systems.
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

use serde::Serialize;
use std::fmt;
use wasm_encoder::ValType;

/// Name of the built-in string slice struct `{ ptr: &u8, len: u32 }`.
pub const STR_TYPE: &str = "str";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Scalar {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl Scalar {
    pub fn from_name(name: &str) -> Option<Scalar> {
        Some(match name {
            "bool" => Scalar::Bool,
            "u8" => Scalar::U8,
            "i8" => Scalar::I8,
            "u16" => Scalar::U16,
            "i16" => Scalar::I16,
            "u32" => Scalar::U32,
            "i32" => Scalar::I32,
            "u64" => Scalar::U64,
            "i64" => Scalar::I64,
            "f32" => Scalar::F32,
            "f64" => Scalar::F64,
            _ => return None,
        })
    }

    pub fn size(self) -> u32 {
        match self {
            Scalar::Bool | Scalar::U8 | Scalar::I8 => 1,
            Scalar::U16 | Scalar::I16 => 2,
            Scalar::U32 | Scalar::I32 | Scalar::F32 => 4,
            Scalar::U64 | Scalar::I64 | Scalar::F64 => 8,
        }
    }

    pub fn is_int(self) -> bool {
        !matches!(self, Scalar::Bool | Scalar::F32 | Scalar::F64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Scalar::F32 | Scalar::F64)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            Scalar::I8 | Scalar::I16 | Scalar::I32 | Scalar::I64 | Scalar::F32 | Scalar::F64
        )
    }

    /// Integers stored in an `i32` but narrower than 32 bits.
    pub fn is_narrow(self) -> bool {
        matches!(self, Scalar::U8 | Scalar::I8 | Scalar::U16 | Scalar::I16)
    }

    /// True for 64-bit integers (carried as `i64`).
    pub fn is_wide(self) -> bool {
        matches!(self, Scalar::U64 | Scalar::I64)
    }

    pub fn val_type(self) -> ValType {
        match self {
            Scalar::U64 | Scalar::I64 => ValType::I64,
            Scalar::F32 => ValType::F32,
            Scalar::F64 => ValType::F64,
            _ => ValType::I32,
        }
    }

    /// Inclusive value range of an integer scalar, as i128.
    pub fn int_range(self) -> (i128, i128) {
        match self {
            Scalar::Bool => (0, 1),
            Scalar::U8 => (0, u8::MAX as i128),
            Scalar::I8 => (i8::MIN as i128, i8::MAX as i128),
            Scalar::U16 => (0, u16::MAX as i128),
            Scalar::I16 => (i16::MIN as i128, i16::MAX as i128),
            Scalar::U32 => (0, u32::MAX as i128),
            Scalar::I32 => (i32::MIN as i128, i32::MAX as i128),
            Scalar::U64 => (0, u64::MAX as i128),
            Scalar::I64 => (i64::MIN as i128, i64::MAX as i128),
            Scalar::F32 | Scalar::F64 => (i128::MIN, i128::MAX),
        }
    }

    /// Implicit widening. No narrowing, no int/float mixing.
    pub fn widens_to(self, target: Scalar) -> bool {
        if self == target {
            return true;
        }
        if self.is_int() && target.is_int() {
            let widening = target.size() > self.size();
            return widening && (target.is_signed() || !self.is_signed());
        }
        self == Scalar::F32 && target == Scalar::F64
    }

    pub fn name(self) -> &'static str {
        match self {
            Scalar::Bool => "bool",
            Scalar::U8 => "u8",
            Scalar::I8 => "i8",
            Scalar::U16 => "u16",
            Scalar::I16 => "i16",
            Scalar::U32 => "u32",
            Scalar::I32 => "i32",
            Scalar::U64 => "u64",
            Scalar::I64 => "i64",
            Scalar::F32 => "f32",
            Scalar::F64 => "f64",
        }
    }
}

/// A resolved type. Structs and enums are referenced by name; their
/// definitions live once in the symbol table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Type {
    #[default]
    Void,
    Scalar(Scalar),
    Pointer(Box<Type>),
    Struct(String),
    Enum(String),
}

impl Type {
    pub const BOOL: Type = Type::Scalar(Scalar::Bool);
    pub const U8: Type = Type::Scalar(Scalar::U8);
    pub const U32: Type = Type::Scalar(Scalar::U32);
    pub const I32: Type = Type::Scalar(Scalar::I32);

    pub fn pointer_to(ty: Type) -> Type {
        Type::Pointer(Box::new(ty))
    }

    pub fn str() -> Type {
        Type::Struct(STR_TYPE.to_string())
    }

    pub fn scalar(&self) -> Option<Scalar> {
        match self {
            Type::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Type::Struct(_) | Type::Enum(_))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    pub fn is_int(&self) -> bool {
        self.scalar().is_some_and(Scalar::is_int)
    }

    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer(inner) => Some(inner),
            _ => None,
        }
    }

    /// How a value of this type travels on the WASM operand stack.
    /// Aggregates travel as the `i32` address of their storage.
    pub fn val_type(&self) -> Option<ValType> {
        match self {
            Type::Void => None,
            Type::Scalar(s) => Some(s.val_type()),
            Type::Pointer(_) | Type::Struct(_) | Type::Enum(_) => Some(ValType::I32),
        }
    }

    /// Whether a value of `self` may be used where `target` is expected
    /// without an explicit cast.
    pub fn coerces_to(&self, target: &Type) -> bool {
        match (self, target) {
            (Type::Scalar(a), Type::Scalar(b)) => a.widens_to(*b),
            _ => self == target,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Scalar(s) => write!(f, "{}", s.name()),
            Type::Pointer(inner) => write!(f, "&{}", inner),
            Type::Struct(name) | Type::Enum(name) => write!(f, "{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widening_table() {
        assert!(Scalar::U8.widens_to(Scalar::U32));
        assert!(Scalar::U8.widens_to(Scalar::I16), "unsigned into wider signed is lossless");
        assert!(Scalar::I32.widens_to(Scalar::I64));
        assert!(Scalar::F32.widens_to(Scalar::F64));
        assert!(!Scalar::U32.widens_to(Scalar::U8), "no implicit narrowing");
        assert!(!Scalar::I8.widens_to(Scalar::U32), "signed never widens to unsigned");
        assert!(!Scalar::U32.widens_to(Scalar::I32), "same width changes meaning");
        assert!(!Scalar::U32.widens_to(Scalar::F64), "no int to float");
        assert!(!Scalar::Bool.widens_to(Scalar::U8));
    }

    #[test]
    fn test_coercion_between_types() {
        let p = Type::pointer_to(Type::U8);
        assert!(p.coerces_to(&Type::pointer_to(Type::U8)));
        assert!(!p.coerces_to(&Type::pointer_to(Type::U32)));
        assert!(!p.coerces_to(&Type::U32));
        assert!(Type::str().coerces_to(&Type::str()));
    }

    #[test]
    fn test_val_types() {
        assert_eq!(Type::U8.val_type(), Some(ValType::I32));
        assert_eq!(Type::Scalar(Scalar::U64).val_type(), Some(ValType::I64));
        assert_eq!(Type::str().val_type(), Some(ValType::I32));
        assert_eq!(Type::Void.val_type(), None);
    }

    #[test]
    fn test_display() {
        let t = Type::pointer_to(Type::pointer_to(Type::Struct("Node".into())));
        assert_eq!(t.to_string(), "&&Node");
        assert_eq!(Scalar::from_name("i16"), Some(Scalar::I16));
        assert_eq!(Scalar::from_name("int"), None);
    }
}
