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

use lo_compiler::loader::FsProvider;
use lo_compiler::{compile_with, init_tracing, CompileOptions};
use std::env;
use std::fs;
use std::io::{self, Read, Write};
use std::process;

const USAGE: &str = "Usage: loc [FILE] [-o OUT] [--config FILE] [--run] [--invoke NAME ARGS...]";

#[derive(Debug, Default)]
struct Args {
    input: Option<String>,
    output: Option<String>,
    config: Option<String>,
    run: bool,
    invoke: Option<(String, Vec<i64>)>,
}

fn parse_args(mut argv: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut args = Args::default();
    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "-o" => args.output = Some(argv.next().ok_or("-o needs a file")?),
            "--config" => args.config = Some(argv.next().ok_or("--config needs a file")?),
            "--run" => args.run = true,
            "--invoke" => {
                let name = argv.next().ok_or("--invoke needs an export name")?;
                let values = argv
                    .by_ref()
                    .map(|v| v.parse::<i64>().map_err(|_| format!("invalid argument: {}", v)))
                    .collect::<Result<Vec<_>, _>>()?;
                args.invoke = Some((name, values));
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            other if other.starts_with('-') => return Err(format!("unknown option: {}\n{}", other, USAGE)),
            other => {
                if args.input.replace(other.to_string()).is_some() {
                    return Err(format!("more than one input file\n{}", USAGE));
                }
            }
        }
    }
    Ok(args)
}

fn main() {
    init_tracing();
    let args = match parse_args(env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            process::exit(2);
        }
    };
    if let Err(message) = run(args) {
        eprintln!("{}", message);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<(), String> {
    let options = match &args.config {
        Some(path) => CompileOptions::load(path).map_err(|e| e.to_string())?,
        None => CompileOptions::default(),
    };

    let (source, file) = match &args.input {
        Some(path) => (
            fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path, e))?,
            path.clone(),
        ),
        None => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .map_err(|e| format!("Failed to read stdin: {}", e))?;
            (text, "<stdin>".to_string())
        }
    };

    let wasm = compile_with(&source, &file, &FsProvider, &options).map_err(|e| e.to_string())?;

    if args.run || args.invoke.is_some() {
        return execute(&wasm, &args);
    }
    match &args.output {
        Some(path) => fs::write(path, &wasm).map_err(|e| format!("Failed to write {}: {}", path, e)),
        None => io::stdout()
            .write_all(&wasm)
            .map_err(|e| format!("Failed to write stdout: {}", e)),
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn execute(wasm: &[u8], args: &Args) -> Result<(), String> {
    use lo_compiler::runner;

    if let Some(path) = &args.output {
        fs::write(path, wasm).map_err(|e| format!("Failed to write {}: {}", path, e))?;
    }
    let output = match &args.invoke {
        Some((name, values)) => {
            let invocation = runner::invoke(wasm, name, values).map_err(|e| e.to_string())?;
            for value in &invocation.results {
                println!("{}", value);
            }
            invocation.output
        }
        None => runner::run_start(wasm).map_err(|e| e.to_string())?,
    };
    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    if let Some(code) = output.exit_code.filter(|c| *c != 0) {
        process::exit(code);
    }
    Ok(())
}

#[cfg(target_arch = "wasm32")]
fn execute(_wasm: &[u8], _args: &Args) -> Result<(), String> {
    Err("--run is not available in this build".to_string())
}
