/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * Wasmtime Host for Lo Compiler Output.
 *
 * Executes compiled modules with a lightweight WASI preview1 surface
 * (no full wasmtime-wasi dependency):
 *
 *   wasi_snapshot_preview1::fd_write   captured stdout / stderr
 *   wasi_snapshot_preview1::proc_exit  recorded exit code
 *   utils::debug(i32)                  recorded debug values
 *
 * plus no-op stubs for the remaining preview1 calls a small runtime
 * library tends to import.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

use thiserror::Error;
use wasmtime::{Caller, Engine, Extern, Instance, Linker, Module, Store, Val, ValType};

const WASI: &str = "wasi_snapshot_preview1";

/// WASI errno values used by the host functions.
const ERRNO_SUCCESS: i32 = 0;
const ERRNO_BADF: i32 = 8;
const ERRNO_FAULT: i32 = 21;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Failed to load WASM module: {0}")]
    Load(String),
    #[error("Failed to link {name}: {message}")]
    Link { name: String, message: String },
    #[error("Failed to instantiate: {0}")]
    Instantiate(String),
    #[error("Export '{0}' not found")]
    MissingExport(String),
    #[error("Export '{name}' expects {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Call to '{name}' trapped: {message}")]
    Trap { name: String, message: String },
}

// =============================================================================
// Host State
// =============================================================================

/// Side effects observed while the guest runs.
#[derive(Debug, Clone, Default)]
pub struct HostState {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Values passed to `utils::debug`, in call order.
    pub debug_log: Vec<i32>,
    /// Set once the guest calls `proc_exit`.
    pub exit_code: Option<i32>,
}

/// Result of running a module.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    /// Captured stdout, lossily decoded.
    pub stdout: String,
    pub stdout_raw: Vec<u8>,
    pub stderr: String,
    pub debug_log: Vec<i32>,
    pub exit_code: Option<i32>,
}

impl From<HostState> for RunOutput {
    fn from(state: HostState) -> Self {
        RunOutput {
            stdout: String::from_utf8_lossy(&state.stdout).into_owned(),
            stdout_raw: state.stdout,
            stderr: String::from_utf8_lossy(&state.stderr).into_owned(),
            debug_log: state.debug_log,
            exit_code: state.exit_code,
        }
    }
}

/// Results of one exported call together with the host side effects.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Each result widened to `i64`; floats are truncated.
    pub results: Vec<i64>,
    pub output: RunOutput,
}

// =============================================================================
// Public API
// =============================================================================

/// Run the module's `_start` export and capture what it printed.
///
/// A `proc_exit` call ends the run normally with its code recorded.
pub fn run_start(bytes: &[u8]) -> Result<RunOutput, RunError> {
    invoke(bytes, "_start", &[]).map(|inv| inv.output)
}

/// Call export `name`, converting each `i64` argument to the parameter's
/// type, and return the results.
pub fn call_export(bytes: &[u8], name: &str, args: &[i64]) -> Result<Vec<i64>, RunError> {
    invoke(bytes, name, args).map(|inv| inv.results)
}

/// Instantiate the module in a fresh store and call export `name`.
pub fn invoke(bytes: &[u8], name: &str, args: &[i64]) -> Result<Invocation, RunError> {
    let (mut store, instance) = instantiate(bytes)?;
    let func = instance
        .get_func(&mut store, name)
        .ok_or_else(|| RunError::MissingExport(name.to_string()))?;

    let ty = func.ty(&store);
    let param_types: Vec<ValType> = ty.params().collect();
    if param_types.len() != args.len() {
        return Err(RunError::Arity {
            name: name.to_string(),
            expected: param_types.len(),
            found: args.len(),
        });
    }
    let params: Vec<Val> = param_types
        .iter()
        .zip(args)
        .map(|(ty, &v)| to_val(ty, v))
        .collect();
    let mut results = vec![Val::I32(0); ty.results().len()];

    tracing::debug!(export = name, ?args, "invoking");
    if let Err(e) = func.call(&mut store, &params, &mut results) {
        // proc_exit unwinds the guest through a host error.
        if store.data().exit_code.is_none() {
            return Err(RunError::Trap {
                name: name.to_string(),
                message: format!("{:#}", e),
            });
        }
        results.clear();
    }

    let results = results.iter().filter_map(from_val).collect();
    let state = std::mem::take(store.data_mut());
    Ok(Invocation {
        results,
        output: state.into(),
    })
}

fn to_val(ty: &ValType, v: i64) -> Val {
    match ty {
        ValType::I64 => Val::I64(v),
        ValType::F32 => Val::F32((v as f32).to_bits()),
        ValType::F64 => Val::F64((v as f64).to_bits()),
        _ => Val::I32(v as i32),
    }
}

fn from_val(val: &Val) -> Option<i64> {
    match val {
        Val::I32(v) => Some(*v as i64),
        Val::I64(v) => Some(*v),
        Val::F32(bits) => Some(f32::from_bits(*bits) as i64),
        Val::F64(bits) => Some(f64::from_bits(*bits) as i64),
        _ => None,
    }
}

fn instantiate(bytes: &[u8]) -> Result<(Store<HostState>, Instance), RunError> {
    let engine = Engine::default();
    let module = Module::from_binary(&engine, bytes).map_err(|e| RunError::Load(e.to_string()))?;

    let mut linker = Linker::<HostState>::new(&engine);
    link_wasi(&mut linker)?;
    link_wasi_stubs(&mut linker)?;
    link_utils(&mut linker)?;

    let mut store = Store::new(&engine, HostState::default());
    let instance = linker
        .instantiate(&mut store, &module)
        .map_err(|e| RunError::Instantiate(format!("{:#}", e)))?;
    Ok((store, instance))
}

fn link_error(name: &str) -> impl FnOnce(wasmtime::Error) -> RunError + '_ {
    move |e| RunError::Link {
        name: name.to_string(),
        message: e.to_string(),
    }
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn write_u32(data: &mut [u8], offset: usize, value: u32) {
    if let Some(slot) = data.get_mut(offset..offset + 4) {
        slot.copy_from_slice(&value.to_le_bytes());
    }
}

// =============================================================================
// WASI Implementation
// =============================================================================

/// fd_write(fd, iovs, iovs_len, nwritten_ptr) -> errno
///
/// Each iovec is `{ buf_ptr: u32, buf_len: u32 }`. fd 1 and 2 are captured;
/// other descriptors are reported as bad.
fn fd_write(mut caller: Caller<'_, HostState>, fd: i32, iovs: i32, iovs_len: i32, nwritten_ptr: i32) -> i32 {
    if fd != 1 && fd != 2 {
        return ERRNO_BADF;
    }
    let memory = match caller.get_export("memory") {
        Some(Extern::Memory(mem)) => mem,
        _ => return ERRNO_BADF,
    };

    let data = memory.data(&caller);
    let mut written = Vec::new();
    for i in 0..iovs_len.max(0) as usize {
        let iov = iovs as usize + i * 8;
        let (Some(ptr), Some(len)) = (read_u32(data, iov), read_u32(data, iov + 4)) else {
            return ERRNO_FAULT;
        };
        match data.get(ptr as usize..ptr as usize + len as usize) {
            Some(bytes) => written.extend_from_slice(bytes),
            None => return ERRNO_FAULT,
        }
    }

    let total = written.len() as u32;
    let state = caller.data_mut();
    if fd == 1 {
        state.stdout.extend_from_slice(&written);
    } else {
        state.stderr.extend_from_slice(&written);
    }
    write_u32(memory.data_mut(&mut caller), nwritten_ptr as usize, total);
    ERRNO_SUCCESS
}

fn link_wasi(linker: &mut Linker<HostState>) -> Result<(), RunError> {
    linker
        .func_wrap(WASI, "fd_write", fd_write)
        .map_err(link_error("fd_write"))?;

    linker
        .func_wrap(
            WASI,
            "proc_exit",
            |mut caller: Caller<'_, HostState>, code: i32| -> wasmtime::Result<()> {
                caller.data_mut().exit_code = Some(code);
                Err(wasmtime::Error::msg(format!("proc_exit({})", code)))
            },
        )
        .map_err(link_error("proc_exit"))?;
    Ok(())
}

/// No-op implementations of the other preview1 calls. Size queries report
/// zero; everything else succeeds without effect.
fn link_wasi_stubs(linker: &mut Linker<HostState>) -> Result<(), RunError> {
    linker
        .func_wrap(
            WASI,
            "fd_read",
            |_caller: Caller<'_, HostState>, _fd: i32, _iovs: i32, _iovs_len: i32, _nread: i32| -> i32 {
                ERRNO_SUCCESS
            },
        )
        .map_err(link_error("fd_read"))?;

    linker
        .func_wrap(WASI, "fd_close", |_caller: Caller<'_, HostState>, _fd: i32| -> i32 {
            ERRNO_SUCCESS
        })
        .map_err(link_error("fd_close"))?;

    for name in ["args_get", "environ_get"] {
        linker
            .func_wrap(WASI, name, |_caller: Caller<'_, HostState>, _a: i32, _b: i32| -> i32 {
                ERRNO_SUCCESS
            })
            .map_err(link_error(name))?;
    }

    for name in ["args_sizes_get", "environ_sizes_get"] {
        linker
            .func_wrap(
                WASI,
                name,
                |mut caller: Caller<'_, HostState>, count_ptr: i32, size_ptr: i32| -> i32 {
                    if let Some(Extern::Memory(memory)) = caller.get_export("memory") {
                        let data = memory.data_mut(&mut caller);
                        write_u32(data, count_ptr as usize, 0);
                        write_u32(data, size_ptr as usize, 0);
                    }
                    ERRNO_SUCCESS
                },
            )
            .map_err(link_error(name))?;
    }
    Ok(())
}

fn link_utils(linker: &mut Linker<HostState>) -> Result<(), RunError> {
    linker
        .func_wrap("utils", "debug", |mut caller: Caller<'_, HostState>, value: i32| {
            tracing::debug!(value, "guest debug");
            caller.data_mut().debug_log.push(value);
        })
        .map_err(link_error("debug"))?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompileOptions;

    fn compile(src: &str) -> Vec<u8> {
        crate::compile(src, "test.lo", &CompileOptions::default()).expect("compile failed")
    }

    #[test]
    fn test_call_export_returns_value() {
        let wasm = compile("export fn answer(): u32 { return 42; }");
        assert_eq!(call_export(&wasm, "answer", &[]).unwrap(), vec![42]);
    }

    #[test]
    fn test_arguments_converted_to_param_types() {
        let wasm = compile("export fn add(a: u64, b: u32): u64 { return a + b; }");
        assert_eq!(call_export(&wasm, "add", &[1 << 40, 2]).unwrap(), vec![(1 << 40) + 2]);
    }

    #[test]
    fn test_fd_write_captured() {
        let src = r#"
            import from "wasi_snapshot_preview1" {
                fn fd_write(fd: u32, iovs: &str, count: u32, written: &u32): u32;
            }
            export fn _start() {
                let written: u32 = 0;
                fd_write(1, &"hi\n", 1, &written);
            }
        "#;
        let out = run_start(&compile(src)).unwrap();
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(out.exit_code, None);
    }

    #[test]
    fn test_proc_exit_recorded() {
        let src = r#"
            import from "wasi_snapshot_preview1" { fn proc_exit(code: u32); }
            export fn _start() { proc_exit(3); unreachable(); }
        "#;
        let out = run_start(&compile(src)).unwrap();
        assert_eq!(out.exit_code, Some(3), "proc_exit should end the run cleanly");
    }

    #[test]
    fn test_debug_import_logged() {
        let src = r#"
            import from "utils" { fn debug(v: i32); }
            export fn _start() { debug(7); debug(-1); }
        "#;
        let out = run_start(&compile(src)).unwrap();
        assert_eq!(out.debug_log, vec![7, -1]);
    }

    #[test]
    fn test_trap_reported() {
        let wasm = compile("export fn boom() { unreachable(); }");
        match invoke(&wasm, "boom", &[]) {
            Err(RunError::Trap { name, .. }) => assert_eq!(name, "boom"),
            other => panic!("expected trap, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_export_and_arity() {
        let wasm = compile("export fn one(a: u32): u32 { return a; }");
        assert!(matches!(
            call_export(&wasm, "two", &[]),
            Err(RunError::MissingExport(_))
        ));
        assert!(matches!(
            call_export(&wasm, "one", &[]),
            Err(RunError::Arity { expected: 1, found: 0, .. })
        ));
    }

    #[test]
    fn test_invalid_wasm() {
        assert!(matches!(run_start(b"not wasm"), Err(RunError::Load(_))));
    }
}
