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

//! C ABI used when the compiler itself runs as a WASM module inside a host.

use crate::config::CompileOptions;
use crate::loader::MemoryProvider;
use std::mem;
use std::slice;
use std::str;

/// Response status: module bytes follow.
pub const STATUS_OK: u32 = 0;
/// Response status: UTF-8 diagnostic text follows.
pub const STATUS_ERROR: u32 = 1;

/// Allocates `size` bytes for the host to write into.
#[no_mangle]
pub extern "C" fn mem_alloc(size: usize) -> *mut u8 {
    let mut buf = Vec::with_capacity(size);
    let ptr = buf.as_mut_ptr();
    mem::forget(buf);
    ptr
}

/// Releases a buffer obtained from [`mem_alloc`] or returned by [`compile`].
///
/// # Safety
/// `ptr` must come from this module and `size` must be its allocation size.
#[no_mangle]
pub unsafe extern "C" fn mem_free(ptr: *mut u8, size: usize) {
    let _ = Vec::from_raw_parts(ptr, 0, size);
}

/// Compiles one source file with default options. Includes cannot be
/// resolved in this setting and fail as missing files.
///
/// Returns a pointer to `[status: u32][len: u32][payload]`; free it with
/// [`mem_free`] using `len + 8`.
///
/// # Safety
/// Both (pointer, length) pairs must describe readable memory.
#[no_mangle]
pub unsafe extern "C" fn compile(
    name_ptr: *const u8,
    name_len: usize,
    src_ptr: *const u8,
    src_len: usize,
) -> *mut u8 {
    let name = str::from_utf8(slice::from_raw_parts(name_ptr, name_len));
    let source = str::from_utf8(slice::from_raw_parts(src_ptr, src_len));
    let (name, source) = match (name, source) {
        (Ok(n), Ok(s)) => (n, s),
        _ => return into_raw(encode_response(Err("Error: Invalid UTF-8 input".into()))),
    };
    into_raw(encode_response(compile_to_response(name, source)))
}

fn compile_to_response(name: &str, source: &str) -> Result<Vec<u8>, String> {
    let provider = MemoryProvider::new();
    crate::compile_with(source, name, &provider, &CompileOptions::default()).map_err(|e| e.to_string())
}

/// Layout: `[status (4 bytes LE)] [len (4 bytes LE)] [payload...]`.
pub fn encode_response(result: Result<Vec<u8>, String>) -> Vec<u8> {
    let (status, payload) = match result {
        Ok(bytes) => (STATUS_OK, bytes),
        Err(message) => (STATUS_ERROR, message.into_bytes()),
    };
    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.extend_from_slice(&status.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf
}

fn into_raw(mut buf: Vec<u8>) -> *mut u8 {
    buf.shrink_to_fit();
    let ptr = buf.as_mut_ptr();
    mem::forget(buf);
    ptr
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(buf: &[u8]) -> (u32, usize) {
        let status = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let len = u32::from_le_bytes(buf[4..8].try_into().unwrap()) as usize;
        (status, len)
    }

    #[test]
    fn test_success_response_carries_module() {
        let buf = encode_response(compile_to_response("m.lo", "export fn f(): u32 { return 1; }"));
        let (status, len) = header(&buf);
        assert_eq!(status, STATUS_OK);
        assert_eq!(len, buf.len() - 8);
        assert_eq!(&buf[8..12], b"\0asm");
    }

    #[test]
    fn test_error_response_carries_diagnostic() {
        let buf = encode_response(compile_to_response("m.lo", "fn f() { g(); }"));
        let (status, len) = header(&buf);
        assert_eq!(status, STATUS_ERROR);
        let text = std::str::from_utf8(&buf[8..8 + len]).unwrap();
        assert!(text.starts_with("m.lo:1:"), "diagnostic should carry a location: {}", text);
        assert!(text.ends_with("UnknownSymbol: unknown function: g"), "got {}", text);
    }

    #[test]
    fn test_raw_roundtrip_through_exports() {
        let name = b"m.lo";
        let src = b"fn f() {}";
        unsafe {
            let ptr = compile(name.as_ptr(), name.len(), src.as_ptr(), src.len());
            let head = slice::from_raw_parts(ptr, 8);
            let (status, len) = header(head);
            assert_eq!(status, STATUS_OK);
            mem_free(ptr, len + 8);
        }
    }
}
