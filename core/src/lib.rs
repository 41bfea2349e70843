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

//! Ahead-of-time compiler for the Lo systems language, targeting WASM.
//!
//! Pipeline: [`loader`] parses the entry file and its includes into one
//! [`ast::Ast`]; [`symbols`] and [`layout`] build the read-only tables;
//! [`lower`] emits every function into a [`builder::ModuleBuilder`]; and
//! [`emit`] lays out memory, serialises and verifies the module.

pub mod ast;
pub mod builder;
pub mod config;
pub mod consts;
pub mod context;
pub mod emit;
pub mod error;
pub mod layout;
pub mod loader;
pub mod lower;
pub mod parser;
#[cfg(not(target_arch = "wasm32"))]
pub mod runner;
pub mod symbols;
pub mod types;
pub mod wasm;

pub use config::CompileOptions;
pub use error::{CompileError, Error, ErrorKind};

use loader::{load_program, load_program_from_source, FsProvider, SourceProvider};
use std::sync::Once;

/// Compile `source` (named `file` in diagnostics). Includes are read from
/// the filesystem relative to `file`.
pub fn compile(source: &str, file: &str, options: &CompileOptions) -> Result<Vec<u8>, Error> {
    compile_with(source, file, &FsProvider, options)
}

/// Compile `source`, resolving includes through `provider`.
pub fn compile_with(
    source: &str,
    file: &str,
    provider: &dyn SourceProvider,
    options: &CompileOptions,
) -> Result<Vec<u8>, Error> {
    let ast = load_program_from_source(source, file, provider)?;
    Ok(emit::compile_ast(&ast, options)?)
}

/// Load `path` and everything it includes through `provider`, then compile.
pub fn compile_file(path: &str, provider: &dyn SourceProvider, options: &CompileOptions) -> Result<Vec<u8>, Error> {
    let ast = load_program(path, provider)?;
    Ok(emit::compile_ast(&ast, options)?)
}

static TRACING: Once = Once::new();

/// Install a stderr `tracing` subscriber filtered by `RUST_LOG`. Does
/// nothing when `RUST_LOG` is unset, and only runs once per process.
pub fn init_tracing() {
    TRACING.call_once(|| {
        if std::env::var_os("RUST_LOG").is_none() {
            return;
        }
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
    });
}
