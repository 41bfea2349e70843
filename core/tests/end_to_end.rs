/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the Lo Compiler.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 *
 * PATENT NOTICE: Protected by US Patent App #63/935,467.
 * NO IMPLIED LICENSE to rights of Mohamad Al-Zawahreh or Sovereign Systems.
 */

//! Compiles Lo programs and runs them under the embedded host.

use lo_compiler::loader::{FsProvider, MemoryProvider};
use lo_compiler::runner::{call_export, invoke, run_start};
use lo_compiler::{compile_file, compile_with, CompileOptions, Error, ErrorKind};

const STD: &str = include_str!("lo/std.lo");
const HEAP: &str = include_str!("lo/heap.lo");

fn provider() -> MemoryProvider {
    MemoryProvider::new()
        .with_file("std.lo", STD)
        .with_file("heap.lo", HEAP)
}

fn build(src: &str) -> Vec<u8> {
    match compile_with(src, "main.lo", &provider(), &CompileOptions::default()) {
        Ok(bytes) => bytes,
        Err(e) => panic!("compilation failed: {}", e),
    }
}

fn fixture(name: &str) -> Vec<u8> {
    let path = format!("{}/tests/lo/{}", env!("CARGO_MANIFEST_DIR"), name);
    match compile_file(&path, &FsProvider, &CompileOptions::default()) {
        Ok(bytes) => bytes,
        Err(e) => panic!("compilation of {} failed: {}", name, e),
    }
}

fn error_kind(src: &str, options: &CompileOptions) -> ErrorKind {
    match compile_with(src, "main.lo", &provider(), options) {
        Ok(_) => panic!("expected a compile error for:\n{}", src),
        Err(Error::Compile(e)) => e.kind,
        Err(other) => panic!("expected a compile error, got {}", other),
    }
}

fn rejects(src: &str) -> ErrorKind {
    error_kind(src, &CompileOptions::default())
}

fn call(bytes: &[u8], name: &str, args: &[i64]) -> Vec<i64> {
    call_export(bytes, name, args).unwrap()
}

// =============================================================================
// Programs
// =============================================================================

#[test]
fn test_returns_constant() {
    let wasm = build("export fn answer(): u32 { return 42; }");
    assert_eq!(call(&wasm, "answer", &[]), vec![42]);
}

#[test]
fn test_factorial_and_recursion() {
    let wasm = fixture("factorial.lo");
    assert_eq!(call(&wasm, "factorial", &[5]), vec![120]);
    assert_eq!(call(&wasm, "factorial", &[0]), vec![1]);
    assert_eq!(call(&wasm, "fib", &[10]), vec![55]);
}

#[test]
fn test_hello_world() {
    let wasm = build(
        r#"
        include "std.lo";
        export fn _start() { print("hello\n"); }
        "#,
    );
    let output = run_start(&wasm).unwrap();
    assert_eq!(output.stdout, "hello\n");
    assert_eq!(output.exit_code, None);
}

#[test]
fn test_print_numbers() {
    let wasm = build(
        r#"
        include "std.lo";
        export fn _start() {
            println_u32(0);
            println_u32(1234567);
            print_i32(-42);
        }
        "#,
    );
    assert_eq!(run_start(&wasm).unwrap().stdout, "0\n1234567\n-42");
}

#[test]
fn test_proc_exit_code() {
    let wasm = build(
        r#"
        include "std.lo";
        export fn _start() { print("bye\n"); proc_exit(3); print("unreached\n"); }
        "#,
    );
    let output = run_start(&wasm).unwrap();
    assert_eq!(output.stdout, "bye\n");
    assert_eq!(output.exit_code, Some(3));
}

#[test]
fn test_methods_dispatch_by_receiver_type() {
    let wasm = build(
        r#"
        include "std.lo";
        struct Cat { lives: u32 }
        struct Dog { good: bool }
        fn Cat::speak(self: &Cat) { print("meow "); println_u32(self.lives); }
        fn Dog::speak(self: &Dog) { if self.good { print("woof\n"); } }
        export fn _start() {
            let c = Cat { lives: 9 };
            let d = Dog { good: true };
            c.speak();
            d.speak();
        }
        "#,
    );
    assert_eq!(run_start(&wasm).unwrap().stdout, "meow 9\nwoof\n");
}

#[test]
fn test_method_binds_to_declared_receiver_type() {
    let wasm = build(
        r#"
        struct Cat { lives: u32 }
        struct Dog { age: u32 }
        fn Cat::speak(self: &Cat): u32 { return self.lives + 3; }
        fn Dog::speak(self: &Dog): u32 { return self.age * 100; }
        export fn run(): u32 {
            let dog = Dog { age: 9 };
            let erased = &dog as u32;
            let cat = erased as &Cat;
            return cat.speak();
        }
        "#,
    );
    // Dog's bytes are read through Cat's method.
    assert_eq!(call(&wasm, "run", &[]), vec![12]);
}

#[test]
fn test_imported_function_receives_arguments_in_order() {
    let wasm = fixture("import.lo");
    let inv = invoke(&wasm, "main", &[]).unwrap();
    assert_eq!(inv.output.debug_log, vec![1, 2, 3]);
}

#[test]
fn test_nested_if_break() {
    let wasm = fixture("nested_if_break.lo");
    assert_eq!(call(&wasm, "main", &[]), vec![1]);
}

#[test]
fn test_vec_push_swap_and_grow() {
    let wasm = fixture("vec_test.lo");
    let output = run_start(&wasm).unwrap();
    assert_eq!(output.debug_log, vec![1, 2, 3, 4, 5, 6, 7, 7]);
}

#[test]
fn test_vec_new_is_exported() {
    let wasm = fixture("vec_test.lo");
    let vec = call(&wasm, "vec_new", &[4, 1])[0];
    assert!(vec > 0, "allocation should succeed");
}

// =============================================================================
// Defer
// =============================================================================

#[test]
fn test_defer_runs_newest_first_per_block() {
    let wasm = fixture("defer.lo");
    let output = run_start(&wasm).unwrap();
    assert_eq!(
        output.stdout,
        "body\ninner 2\ninner 1\nafter inner\nouter 2\nouter 1\n"
    );
}

#[test]
fn test_defer_on_break_runs_loop_body_only() {
    let wasm = fixture("defer.lo");
    let inv = invoke(&wasm, "loop_defers", &[]).unwrap();
    assert_eq!(inv.output.stdout, "iter\niter\niter\ndone\nfn\n");
}

#[test]
fn test_defer_on_return_runs_every_frame() {
    let wasm = fixture("defer.lo");
    let inv = invoke(&wasm, "early", &[1]).unwrap();
    assert_eq!(inv.results, vec![10]);
    assert_eq!(inv.output.stdout, "inner\ncleanup\n");

    let inv = invoke(&wasm, "early", &[0]).unwrap();
    assert_eq!(inv.results, vec![20]);
    assert_eq!(inv.output.stdout, "inner\ncleanup\n");
}

#[test]
fn test_return_value_evaluated_before_defers() {
    let wasm = build(
        r#"
        global mut X: u32 = 1;
        export fn f(): u32 {
            defer X = 100;
            return X;
        }
        export fn g(): u32 { f(); return X; }
        "#,
    );
    assert_eq!(call(&wasm, "f", &[]), vec![1]);
    assert_eq!(call(&wasm, "g", &[]), vec![100]);
}

// =============================================================================
// Data and Layout
// =============================================================================

#[test]
fn test_globals() {
    let wasm = build(
        r#"
        struct Pair { a: u32, b: u32 }
        global LIMIT: u32 = 10 * 4;
        global mut COUNTER: u32 = 0;
        global ORIGIN: Pair = Pair { a: 3, b: 4 };
        global mut SLOT: u32 = 7;
        fn bump() { COUNTER += 1; }
        export fn run(): u32 {
            bump();
            bump();
            let p = &SLOT;
            *p = *p + 1;
            return LIMIT + COUNTER + ORIGIN.a * ORIGIN.b + SLOT;
        }
        "#,
    );
    assert_eq!(call(&wasm, "run", &[]), vec![40 + 2 + 12 + 8]);
}

#[test]
fn test_identical_strings_share_storage() {
    let wasm = build(
        r#"
        export fn run(): u32 {
            let a = "shared";
            let b = "shared";
            let c = "other";
            let same = a.ptr == b.ptr;
            let diff = a.ptr != c.ptr;
            return same as u32 * 10 + diff as u32 + a.len * 100;
        }
        "#,
    );
    assert_eq!(call(&wasm, "run", &[]), vec![611]);
}

#[test]
fn test_struct_layout_is_padded() {
    let wasm = build(
        r#"
        struct Mixed { a: u8, b: u32, c: u8 }
        export fn run(): u32 {
            let m = Mixed { a: 1, b: 2, c: 3 };
            return sizeof(Mixed) * 100 + ((&m.b as u32) - (&m as u32));
        }
        "#,
    );
    assert_eq!(call(&wasm, "run", &[]), vec![1204]);
}

#[test]
fn test_structs_by_value() {
    let wasm = build(
        r#"
        struct Pair { a: u32, b: u32 }
        struct Big { a: u64, b: u64, c: u64 }
        fn swap(p: Pair): Pair { return Pair { a: p.b, b: p.a }; }
        fn make_big(x: u64): Big { return Big { a: x, b: x * 2, c: x * 3 }; }
        fn sum_big(b: Big): u64 { return b.a + b.b + b.c; }
        export fn run(): u64 {
            let p = swap(Pair { a: 1, b: 2 });
            let big = make_big(10);
            return (p.a * 10 + p.b) as u64 * 1000 + sum_big(big);
        }
        "#,
    );
    assert_eq!(call(&wasm, "run", &[]), vec![21060]);
}

#[test]
fn test_callee_copy_leaves_caller_untouched() {
    let wasm = build(
        r#"
        struct Big { a: u64, b: u64, c: u64 }
        fn clobber(b: Big): u64 { b.a = 99; return b.a; }
        export fn run(): u64 {
            let big = Big { a: 1, b: 2, c: 3 };
            let seen = clobber(big);
            return seen * 10 + big.a;
        }
        "#,
    );
    assert_eq!(call(&wasm, "run", &[]), vec![991]);
}

#[test]
fn test_struct_in_struct() {
    let wasm = fixture("struct_in_struct.lo");
    assert_eq!(run_start(&wasm).unwrap().stdout, "3\n".repeat(7));
}

#[test]
fn test_callers_and_callees_agree_on_layout() {
    let wasm = build(
        r#"
        struct Rec { tag: u8, count: u32, total: u64 }
        fn fill(r: &Rec) { r.tag = 7; r.count = 5; r.total = 1000; }
        fn weigh(r: Rec): u64 { return r.tag as u64 + r.count as u64 * 10 + r.total; }
        export fn run(): u64 {
            let rec = Rec { tag: 0, count: 0, total: 0 };
            fill(&rec);
            let p = &rec;
            let by_ptr = p.tag as u64 + p.count as u64 * 10 + p.total;
            return by_ptr * 10000 + weigh(rec);
        }
        export fn raw(): u64 {
            let rec = Rec { tag: 0, count: 0, total: 0 };
            fill(&rec);
            let base = &rec as u32;
            let count = *((base + 4) as &u32);
            let total = *((base + 8) as &u64);
            return count as u64 * 10000 + total;
        }
        "#,
    );
    assert_eq!(call(&wasm, "run", &[]), vec![1057 * 10000 + 1057]);
    assert_eq!(call(&wasm, "raw", &[]), vec![5 * 10000 + 1000]);
}

#[test]
fn test_folded_shifts_match_runtime_shifts() {
    let wasm = build(
        r#"
        global G: u8 = 200u8 >> 9;
        global H: u8 = 200u8 << 9;
        global S: i8 = -56i8 >> 9;
        export fn folded(): u32 { return G as u32 * 1000 + H as u32 + (S as i32 + 1) as u32; }
        export fn runtime(): u32 {
            let a = 200u8;
            let b = -56i8;
            let g = a >> 9;
            let h = a << 9;
            let s = b >> 9;
            return g as u32 * 1000 + h as u32 + (s as i32 + 1) as u32;
        }
        "#,
    );
    assert_eq!(call(&wasm, "folded", &[]), call(&wasm, "runtime", &[]));
    assert_eq!(call(&wasm, "folded", &[]), vec![0]);
}

#[test]
fn test_pointer_mutation() {
    let wasm = build(
        r#"
        fn inc(p: &u32) { *p += 1; }
        export fn run(): u32 {
            let mut x: u32 = 5;
            inc(&x);
            inc(&x);
            return x;
        }
        "#,
    );
    assert_eq!(call(&wasm, "run", &[]), vec![7]);
}

#[test]
fn test_heap_allocator_reuses_freed_blocks() {
    let wasm = fixture("heap_test.lo");
    let output = run_start(&wasm).unwrap();
    let log = output.debug_log;
    assert_eq!(log.len(), 4);
    let (a, b, c, d) = (log[0], log[1], log[2], log[3]);
    assert!(a > 0, "allocation should not fail");
    assert_eq!(a % 4, 0);
    assert!(b >= a + 16, "blocks must not overlap");
    assert_eq!(c, a, "freed block should be reused");
    assert!(d > b, "fresh block should come from the top");
}

// =============================================================================
// Control Flow and Arithmetic
// =============================================================================

#[test]
fn test_enum_match_with_payload() {
    let wasm = build(
        r#"
        enum Shape { Circle(u32), Square(u32), Empty }
        fn area(s: Shape): u32 {
            match s {
                Shape::Circle(r) => { return 3 * r * r; }
                Shape::Square(w) => { return w * w; }
                _ => { return 0; }
            }
        }
        export fn run(): u32 {
            return area(Shape::Circle(2)) + area(Shape::Square(3)) + area(Shape::Empty);
        }
        "#,
    );
    assert_eq!(call(&wasm, "run", &[]), vec![21]);
}

#[test]
fn test_labeled_break_and_continue() {
    let wasm = build(
        r#"
        export fn run(): u32 {
            let mut count: u32 = 0;
            'outer: for i in 0..10 {
                for j in 0..10 {
                    if j == 3 { continue 'outer; }
                    if i == 4 { break 'outer; }
                    count += 1;
                }
            }
            return count;
        }
        "#,
    );
    assert_eq!(call(&wasm, "run", &[]), vec![12]);
}

#[test]
fn test_while_and_continue() {
    let wasm = build(
        r#"
        export fn sum_odd(n: u32): u32 {
            let mut total: u32 = 0;
            let mut i: u32 = 0;
            while i < n {
                i += 1;
                if i % 2 == 0 { continue; }
                total += i;
            }
            return total;
        }
        "#,
    );
    assert_eq!(call(&wasm, "sum_odd", &[10]), vec![25]);
}

#[test]
fn test_narrow_arithmetic_wraps() {
    let wasm = build(
        r#"
        export fn wrap(): u32 { let x = 200u8 + 100u8; return x as u32; }
        export fn signed(): i32 { let a: i32 = -7; return a / 2 + (a >> 1) + a % 2; }
        export fn float(): i32 { let x: f64 = 2.5; let y = x * 4.0 + 0.5; return y as i32; }
        "#,
    );
    assert_eq!(call(&wasm, "wrap", &[]), vec![44]);
    assert_eq!(call(&wasm, "signed", &[]), vec![-3 - 4 - 1]);
    assert_eq!(call(&wasm, "float", &[]), vec![10]);
}

#[test]
fn test_logical_operators_short_circuit() {
    let wasm = build(
        r#"
        import from "utils" { fn debug(v: i32); }
        fn side(): bool { debug(1); return true; }
        export fn _start() {
            if false && side() { debug(2); }
            if true || side() { debug(3); }
        }
        "#,
    );
    assert_eq!(run_start(&wasm).unwrap().debug_log, vec![3]);
}

#[test]
fn test_falling_off_non_void_function_traps() {
    let wasm = build(
        r#"
        export fn f(x: u32): u32 { if x > 0 { return x; } }
        "#,
    );
    assert_eq!(call(&wasm, "f", &[2]), vec![2]);
    assert!(call_export(&wasm, "f", &[0]).is_err());
}

// =============================================================================
// Module Shape
// =============================================================================

#[test]
fn test_output_is_deterministic() {
    let src = r#"
        include "std.lo";
        include "heap.lo";
        export fn _start() { print("a"); print("b"); println_u32(alloc(4)); }
    "#;
    assert_eq!(build(src), build(src));
}

#[test]
fn test_stack_is_restored_after_calls() {
    let wasm = build(
        r#"
        struct Big { a: u64, b: u64, c: u64 }
        fn touch(n: u32): u64 { let b = Big { a: 1, b: 2, c: 3 }; let p = &b; return p.a; }
        export fn run(): u32 {
            let mut i: u32 = 0;
            while i < 100000 { touch(i); i += 1; }
            return i;
        }
        "#,
    );
    // Leaking 24+ bytes per call would overflow the default stack.
    assert_eq!(call(&wasm, "run", &[]), vec![100000]);
}

// =============================================================================
// Diagnostics
// =============================================================================

#[test]
fn test_each_error_kind() {
    assert_eq!(rejects("fn main() { let x = y; }"), ErrorKind::UnknownSymbol);
    assert_eq!(rejects("fn main() { missing(); }"), ErrorKind::UnknownSymbol);
    assert_eq!(rejects("struct A { x: u32 } struct A { y: u32 }"), ErrorKind::DuplicateSymbol);
    assert_eq!(rejects("fn main() { let x: u8 = 300; }"), ErrorKind::TypeMismatch);
    assert_eq!(rejects("fn main() { let x: u32 = 1u64; }"), ErrorKind::TypeMismatch);
    assert_eq!(
        rejects("struct P { x: u32, y: u32 } fn main() { let p = P { x: 1 }; }"),
        ErrorKind::IncompleteInitializer
    );
    assert_eq!(rejects("fn main() { loop { break 'nowhere; } }"), ErrorKind::UnknownLabel);
    assert_eq!(rejects("fn main() { break; }"), ErrorKind::UnknownLabel);
    assert_eq!(
        rejects("fn f(): u32 { return 1; } global G: u32 = f();"),
        ErrorKind::NonConstantInitializer
    );
    assert_eq!(rejects("struct Node { next: Node }"), ErrorKind::InfiniteLayout);

    let tight = CompileOptions {
        stack_size: 2 * 65536,
        max_memory_pages: Some(1),
        ..CompileOptions::default()
    };
    assert_eq!(error_kind("fn main() {}", &tight), ErrorKind::InvalidModule);
}

#[test]
fn test_error_message() {
    let err = match compile_with("fn main() { let x = y; }", "main.lo", &provider(), &CompileOptions::default()) {
        Err(Error::Compile(e)) => e,
        other => panic!("unexpected result: {:?}", other.map(|b| b.len())),
    };
    insta::assert_snapshot!(err.message, @"unknown variable: y");
    assert_eq!(&*err.span.file, "main.lo");
}

#[test]
fn test_missing_include_is_load_error() {
    let result = compile_with("include \"nope.lo\";", "main.lo", &provider(), &CompileOptions::default());
    assert!(matches!(result, Err(Error::Load(_))));
}
