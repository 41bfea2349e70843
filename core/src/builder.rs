/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * In-Progress Output Module for the Lo Compiler.
 *
 * Accumulates types, imports, function bodies, globals, exports and the
 * static data image while lowering runs. Serialisation happens once, in
 * the emitter.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

use crate::layout::align_to;
use std::collections::HashMap;
use wasm_encoder::{Instruction, ValType};

/// Mutable `i32` global holding the shadow stack pointer.
pub const STACK_POINTER_GLOBAL: u32 = 0;
/// Immutable `i32` global holding the first heap address.
pub const HEAP_BASE_GLOBAL: u32 = 1;
/// Index of the first user global.
pub const FIRST_USER_GLOBAL: u32 = 2;

// =============================================================================
// Static Data
// =============================================================================

/// Bytes placed in linear memory at instantiation, starting at `base`.
#[derive(Debug, Clone)]
pub struct DataImage {
    base: u32,
    bytes: Vec<u8>,
}

impl DataImage {
    pub fn new(base: u32) -> Self {
        DataImage {
            base,
            bytes: Vec::new(),
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// One past the last byte in use.
    pub fn end(&self) -> u32 {
        self.base + self.bytes.len() as u32
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Reserve zeroed storage and return its absolute address.
    pub fn alloc(&mut self, size: u32, align: u32) -> u32 {
        let addr = align_to(self.end(), align.max(1));
        let new_len = (addr - self.base + size) as usize;
        self.bytes.resize(new_len, 0);
        addr
    }

    /// Overwrite previously reserved bytes.
    pub fn write(&mut self, addr: u32, data: &[u8]) {
        let start = (addr - self.base) as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
    }
}

/// Where an interned string lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrRef {
    /// Address of the first byte.
    pub ptr: u32,
    pub len: u32,
    /// Address of the pooled `str { ptr, len }` value.
    pub descriptor: u32,
}

/// Byte-for-byte string interning. Equal contents always map to the same
/// address; different contents never share one.
#[derive(Debug, Clone, Default)]
pub struct StringPool {
    interned: HashMap<Vec<u8>, StrRef>,
}

impl StringPool {
    pub fn intern(&mut self, image: &mut DataImage, bytes: &[u8]) -> StrRef {
        if let Some(existing) = self.interned.get(bytes) {
            return *existing;
        }
        let ptr = image.alloc(bytes.len() as u32, 1);
        image.write(ptr, bytes);
        let descriptor = image.alloc(8, 4);
        let mut desc = [0u8; 8];
        desc[..4].copy_from_slice(&ptr.to_le_bytes());
        desc[4..].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
        image.write(descriptor, &desc);
        let interned = StrRef {
            ptr,
            len: bytes.len() as u32,
            descriptor,
        };
        tracing::trace!(ptr, len = interned.len, "interned string");
        self.interned.insert(bytes.to_vec(), interned);
        interned
    }

    pub fn len(&self) -> usize {
        self.interned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interned.is_empty()
    }
}

// =============================================================================
// Module Builder
// =============================================================================

#[derive(Debug, Clone)]
pub struct ImportEntry {
    pub module: String,
    pub field: String,
    pub type_index: u32,
}

#[derive(Debug, Clone)]
pub struct FunctionBody {
    pub name: String,
    pub type_index: u32,
    /// Locals beyond the parameters, in index order.
    pub locals: Vec<ValType>,
    pub instructions: Vec<Instruction<'static>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GlobalInit {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
}

impl GlobalInit {
    pub fn val_type(self) -> ValType {
        match self {
            GlobalInit::I32(_) => ValType::I32,
            GlobalInit::I64(_) => ValType::I64,
            GlobalInit::F32(_) => ValType::F32,
            GlobalInit::F64(_) => ValType::F64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GlobalEntry {
    pub name: String,
    pub mutable: bool,
    pub init: GlobalInit,
}

#[derive(Debug, Clone)]
pub struct ModuleBuilder {
    pub types: Vec<(Vec<ValType>, Vec<ValType>)>,
    pub imports: Vec<ImportEntry>,
    pub functions: Vec<FunctionBody>,
    pub globals: Vec<GlobalEntry>,
    pub exports: Vec<(String, u32)>,
    pub image: DataImage,
    pub strings: StringPool,
}

impl ModuleBuilder {
    pub fn new(data_start: u32) -> Self {
        ModuleBuilder {
            types: Vec::new(),
            imports: Vec::new(),
            functions: Vec::new(),
            globals: Vec::new(),
            exports: Vec::new(),
            image: DataImage::new(data_start),
            strings: StringPool::default(),
        }
    }

    /// Index of the function type, adding it on first use.
    pub fn intern_type(&mut self, params: Vec<ValType>, results: Vec<ValType>) -> u32 {
        if let Some(idx) = self
            .types
            .iter()
            .position(|(p, r)| *p == params && *r == results)
        {
            return idx as u32;
        }
        self.types.push((params, results));
        self.types.len() as u32 - 1
    }

    pub fn add_import(&mut self, module: &str, field: &str, type_index: u32) {
        self.imports.push(ImportEntry {
            module: module.to_string(),
            field: field.to_string(),
            type_index,
        });
    }

    pub fn add_function(&mut self, body: FunctionBody) {
        self.functions.push(body);
    }

    /// Add a WASM global and return its index.
    pub fn add_global(&mut self, name: &str, mutable: bool, init: GlobalInit) -> u32 {
        self.globals.push(GlobalEntry {
            name: name.to_string(),
            mutable,
            init,
        });
        FIRST_USER_GLOBAL + self.globals.len() as u32 - 1
    }

    pub fn export_function(&mut self, name: &str, index: u32) {
        self.exports.push((name.to_string(), index));
    }

    /// Intern a string literal into the static image.
    pub fn intern_str(&mut self, bytes: &[u8]) -> StrRef {
        self.strings.intern(&mut self.image, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_interning_dedups() {
        let mut b = ModuleBuilder::new(8);
        let a = b.intern_type(vec![ValType::I32], vec![]);
        let c = b.intern_type(vec![ValType::I64], vec![ValType::I32]);
        let a2 = b.intern_type(vec![ValType::I32], vec![]);
        assert_eq!(a, a2);
        assert_ne!(a, c);
        assert_eq!(b.types.len(), 2);
    }

    #[test]
    fn test_string_pooling_by_content() {
        let mut b = ModuleBuilder::new(8);
        let hello = b.intern_str(b"hello");
        let world = b.intern_str(b"world");
        let owned = format!("hel{}", "lo");
        let again = b.intern_str(owned.as_bytes());
        assert_eq!(hello, again, "identical contents must share storage");
        assert_ne!(hello.ptr, world.ptr, "different contents must not alias");
        assert_eq!(b.strings.len(), 2);
        assert_eq!(&b.image.bytes()[(hello.ptr - 8) as usize..][..5], b"hello");
    }

    #[test]
    fn test_descriptor_layout() {
        let mut b = ModuleBuilder::new(8);
        let s = b.intern_str(b"abc");
        assert_eq!(s.descriptor % 4, 0);
        let start = (s.descriptor - b.image.base()) as usize;
        let desc = &b.image.bytes()[start..start + 8];
        assert_eq!(u32::from_le_bytes(desc[..4].try_into().unwrap()), s.ptr);
        assert_eq!(u32::from_le_bytes(desc[4..].try_into().unwrap()), 3);
    }

    #[test]
    fn test_image_alignment() {
        let mut image = DataImage::new(8);
        let a = image.alloc(1, 1);
        let b = image.alloc(8, 8);
        assert_eq!(a, 8);
        assert_eq!(b, 16);
        assert_eq!(image.end(), 24);
    }
}
