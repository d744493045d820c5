//! Batch execution benchmarks
//!
//! Measures end-to-end `execute()` over the interpreter-backed loader:
//! - fused vs per-TAC execution of a map/zip chain
//! - native Rust loop baseline for the same arithmetic
//! - steady-state victim-cache recycling

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vexel_core::{BaseArena, Const, Instruction, Opcode, ScalarType, View};
use vexel_engine::{Engine, EngineConfig, InterpLoader};

fn bench_engine(jit_fusion: bool, dir: &tempfile::TempDir) -> Engine {
    let config = EngineConfig {
        jit_fusion,
        kernel_dir: dir.path().join("kernels"),
        object_dir: dir.path().join("objects"),
        template_dir: concat!(env!("CARGO_MANIFEST_DIR"), "/../../templates").into(),
        ..EngineConfig::default()
    };
    Engine::with_loader(config, Box::new(InterpLoader::new())).unwrap()
}

fn chain_batch(arena: &mut BaseArena, n: i64) -> Vec<Instruction> {
    let a = arena.alloc(ScalarType::F64, n as usize);
    let b = arena.alloc(ScalarType::F64, n as usize);
    let t = arena.alloc(ScalarType::F64, n as usize);
    let o = arena.alloc(ScalarType::F64, n as usize);
    let data: Vec<f64> = (0..n).map(|i| i as f64 * 0.25 + 1.0).collect();
    arena.write::<f64>(a, &data).unwrap();
    arena.write::<f64>(b, &data).unwrap();

    let (va, vb) = (View::contiguous(a, &[n]), View::contiguous(b, &[n]));
    let (vt, vo) = (View::contiguous(t, &[n]), View::contiguous(o, &[n]));
    vec![
        Instruction::new(Opcode::Multiply, vec![vt.clone(), va.clone(), vb]),
        Instruction::new(Opcode::Add, vec![vo, vt.clone(), va]),
        Instruction::new(Opcode::Free, vec![vt]),
    ]
}

fn benchmark_map_zip_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_zip_chain");

    for size in [1_000i64, 100_000, 1_000_000] {
        // Native Rust baseline for the same arithmetic
        group.bench_with_input(BenchmarkId::new("native_rust", size), &size, |bench, &n| {
            let data: Vec<f64> = (0..n).map(|i| i as f64 * 0.25 + 1.0).collect();
            bench.iter(|| {
                let mut out = vec![0.0f64; n as usize];
                for i in 0..n as usize {
                    out[i] = data[i] * data[i] + data[i];
                }
                black_box(out);
            });
        });

        group.bench_with_input(BenchmarkId::new("fused", size), &size, |bench, &n| {
            let dir = tempfile::tempdir().unwrap();
            let mut engine = bench_engine(true, &dir);
            bench.iter(|| {
                let mut arena = BaseArena::new();
                let batch = chain_batch(&mut arena, n);
                engine.execute(&mut arena, &batch).unwrap();
                black_box(&arena);
            });
        });

        group.bench_with_input(BenchmarkId::new("per_tac", size), &size, |bench, &n| {
            let dir = tempfile::tempdir().unwrap();
            let mut engine = bench_engine(false, &dir);
            bench.iter(|| {
                let mut arena = BaseArena::new();
                let batch = chain_batch(&mut arena, n);
                engine.execute(&mut arena, &batch).unwrap();
                black_box(&arena);
            });
        });
    }

    group.finish();
}

fn benchmark_vcache_steady_state(c: &mut Criterion) {
    let mut group = c.benchmark_group("vcache_steady_state");

    for size in [100_000i64, 1_000_000] {
        group.bench_with_input(BenchmarkId::new("fill_free", size), &size, |bench, &n| {
            let dir = tempfile::tempdir().unwrap();
            let mut engine = bench_engine(true, &dir);
            let mut arena = BaseArena::new();
            bench.iter(|| {
                let x = arena.alloc(ScalarType::F64, n as usize);
                let vx = View::contiguous(x, &[n]);
                let batch = vec![
                    Instruction::with_constant(Opcode::Fill, vec![vx.clone()], Const::F64(1.0)),
                    Instruction::new(Opcode::Free, vec![vx]),
                ];
                engine.execute(&mut arena, &batch).unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_map_zip_chain, benchmark_vcache_steady_state);
criterion_main!(benches);
