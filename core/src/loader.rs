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

//! Source loading and `include` resolution.

use crate::ast::{Ast, ItemId, ItemKind};
use crate::parser::{parse_source, ParseError};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("{0}")]
    Parse(#[from] ParseError),
}

/// Where source text comes from.
pub trait SourceProvider {
    fn read_source(&self, path: &str) -> std::io::Result<String>;
}

/// Reads files from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsProvider;

impl SourceProvider for FsProvider {
    fn read_source(&self, path: &str) -> std::io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// In-memory file set, keyed by normalised path.
#[derive(Debug, Default, Clone)]
pub struct MemoryProvider {
    files: HashMap<String, String>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, source: &str) -> Self {
        self.files.insert(normalize_path(path), source.to_string());
        self
    }
}

impl SourceProvider for MemoryProvider {
    fn read_source(&self, path: &str) -> std::io::Result<String> {
        self.files.get(&normalize_path(path)).cloned().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("no such file: {}", path))
        })
    }
}

/// Resolve `path` relative to the directory of `relative_to`, folding `.`
/// and `..` segments. Absolute paths are returned normalised.
pub fn resolve_path(path: &str, relative_to: &str) -> String {
    if path.starts_with('/') {
        return normalize_path(path);
    }
    let dir = match relative_to.rfind('/') {
        Some(idx) => &relative_to[..idx],
        None => "",
    };
    if dir.is_empty() {
        normalize_path(path)
    } else {
        normalize_path(&format!("{}/{}", dir, path))
    }
}

fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." if parts.last().is_some_and(|p| *p != "..") => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Parse `entry` and every file it includes into a single tree.
///
/// Included files are spliced in at the `include` site, depth first, and
/// each file is loaded at most once.
pub fn load_program(entry: &str, provider: &dyn SourceProvider) -> Result<Ast, LoadError> {
    let entry = normalize_path(entry);
    let mut ast = Ast::new(&entry);
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    load_file(&entry, provider, &mut ast, &mut seen, &mut order)?;
    ast.order = order;
    Ok(ast)
}

/// Like [`load_program`], with the entry file's text already in hand.
pub fn load_program_from_source(
    source: &str,
    file: &str,
    provider: &dyn SourceProvider,
) -> Result<Ast, LoadError> {
    let file = normalize_path(file);
    let mut ast = Ast::new(&file);
    let mut seen = HashSet::new();
    seen.insert(file.clone());
    let mut order = Vec::new();
    let items = parse_source(source, &file, &mut ast)?;
    splice(&file, items, provider, &mut ast, &mut seen, &mut order)?;
    ast.order = order;
    Ok(ast)
}

fn load_file(
    path: &str,
    provider: &dyn SourceProvider,
    ast: &mut Ast,
    seen: &mut HashSet<String>,
    order: &mut Vec<ItemId>,
) -> Result<(), LoadError> {
    if !seen.insert(path.to_string()) {
        return Ok(());
    }
    let source = provider.read_source(path).map_err(|source| LoadError::Io {
        path: path.to_string(),
        source,
    })?;
    tracing::debug!(path, bytes = source.len(), "loading source");
    let items = parse_source(&source, path, ast)?;
    splice(path, items, provider, ast, seen, order)
}

fn splice(
    path: &str,
    items: Vec<ItemId>,
    provider: &dyn SourceProvider,
    ast: &mut Ast,
    seen: &mut HashSet<String>,
    order: &mut Vec<ItemId>,
) -> Result<(), LoadError> {
    for item in items {
        let include = match &ast.item(item).kind {
            ItemKind::Include(target) => Some(resolve_path(target, path)),
            _ => None,
        };
        match include {
            Some(target) => load_file(&target, provider, ast, seen, order)?,
            None => order.push(item),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_path() {
        assert_eq!(resolve_path("std.lo", "main.lo"), "std.lo");
        assert_eq!(resolve_path("./lib/a.lo", "src/main.lo"), "src/lib/a.lo");
        assert_eq!(resolve_path("../std.lo", "src/app/main.lo"), "src/std.lo");
        assert_eq!(resolve_path("/abs/x.lo", "src/main.lo"), "/abs/x.lo");
    }

    #[test]
    fn test_includes_spliced_in_order() {
        let provider = MemoryProvider::new()
            .with_file("main.lo", "include \"lib/a.lo\";\nfn main() { }")
            .with_file("lib/a.lo", "include \"b.lo\";\nfn a() { }")
            .with_file("lib/b.lo", "fn b() { }");
        let ast = load_program("main.lo", &provider).unwrap();
        let names: Vec<String> = ast
            .items()
            .filter_map(|(_, item)| match &item.kind {
                ItemKind::Function(f) => Some(f.name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["b", "a", "main"]);
    }

    #[test]
    fn test_each_file_loaded_once() {
        let provider = MemoryProvider::new()
            .with_file("main.lo", "include \"a.lo\";\ninclude \"a.lo\";\nfn main() { }")
            .with_file("a.lo", "include \"main.lo\";\nfn a() { }");
        let ast = load_program("main.lo", &provider).unwrap();
        assert_eq!(ast.items().count(), 2, "a.lo and main.lo contribute one fn each");
    }

    #[test]
    fn test_missing_include_reports_path() {
        let provider = MemoryProvider::new().with_file("main.lo", "include \"gone.lo\";");
        let err = load_program("main.lo", &provider).unwrap_err();
        assert!(err.to_string().contains("gone.lo"), "got {}", err);
    }

    #[test]
    fn test_item_spans_keep_their_file() {
        let provider = MemoryProvider::new().with_file("lib.lo", "fn helper() { }");
        let ast = load_program_from_source("include \"lib.lo\";", "main.lo", &provider).unwrap();
        let (_, item) = ast.items().next().unwrap();
        assert_eq!(&*item.span.file, "lib.lo");
    }
}
