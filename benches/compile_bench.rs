//! Benchmarks for the scriptcore compilation pipeline: lex -> parse ->
//! optimize -> compile, plus disassembly of the resulting bytecode.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use scriptcore::compiler::binder::Binder;
use scriptcore::compiler::{codegen, optimize, parse};

fn fib_source(depth: u32) -> String {
    let mut src = String::from("var a = 0; var b = 1; var i = 0;\n");
    src.push_str(&format!("while (i < {depth}) {{\n"));
    src.push_str("  var t = a + b;\n  a = b;\n  b = t;\n  i += 1;\n}\n");
    src.push_str("return a;\n");
    src
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    let binder = Binder::new();

    for &depth in &[1u32, 8, 32, 128] {
        let source = fib_source(depth);
        group.throughput(Throughput::Bytes(source.len() as u64));
        group.bench_function(format!("fib_loop_{depth}"), |b| {
            b.iter(|| {
                let result = parse::parse(black_box(&source), &binder);
                black_box(result)
            })
        });
    }
    group.finish();
}

fn bench_optimize(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimize");
    let binder = Binder::new();

    for &depth in &[1u32, 8, 32, 128] {
        let source = fib_source(depth);
        group.bench_function(format!("fib_loop_{depth}"), |b| {
            b.iter_batched(
                || parse::parse(&source, &binder),
                |mut parsed| {
                    optimize::optimize(&mut parsed.doc, parsed.root);
                    black_box(parsed)
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_full_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile_pipeline");
    let binder = Binder::new();

    for &depth in &[1u32, 8, 32, 128] {
        let source = fib_source(depth);
        group.throughput(Throughput::Bytes(source.len() as u64));
        group.bench_function(format!("fib_loop_{depth}"), |b| {
            b.iter(|| {
                let mut parsed = parse::parse(black_box(&source), &binder);
                optimize::optimize(&mut parsed.doc, parsed.root);
                let program = codegen::compile(&parsed.doc, parsed.root, binder.signature_hash()).unwrap();
                black_box(program)
            })
        });
    }
    group.finish();
}

fn bench_disassemble(c: &mut Criterion) {
    let binder = Binder::new();
    let source = fib_source(32);
    let mut parsed = parse::parse(&source, &binder);
    optimize::optimize(&mut parsed.doc, parsed.root);
    let program = codegen::compile(&parsed.doc, parsed.root, binder.signature_hash()).unwrap();

    c.bench_function("disassemble_fib_loop_32", |b| {
        b.iter(|| black_box(program.disassemble()))
    });
}

criterion_group!(benches, bench_parse, bench_optimize, bench_full_pipeline, bench_disassemble);
criterion_main!(benches);
