//! Victim-cache behavior across batches

mod common;

use common::{dense_f64, test_config};
use vexel_core::{BaseArena, Const, Instruction, Opcode};
use vexel_engine::{Engine, InterpLoader};

fn engine_with_vcache(dir: &tempfile::TempDir, vcache_size: usize) -> Engine {
    let mut config = test_config(dir);
    config.vcache_size = vcache_size;
    Engine::with_loader(config, Box::new(InterpLoader::new())).unwrap()
}

/// Realize-then-free a pair of large arrays: the canonical iteration shape
fn fill_free_batch(arena: &mut BaseArena, nelem: i64) -> Vec<Instruction> {
    let (_x, vx) = dense_f64(arena, nelem);
    let (_y, vy) = dense_f64(arena, nelem);
    vec![
        Instruction::with_constant(Opcode::Fill, vec![vx.clone()], Const::F64(1.0)),
        Instruction::new(Opcode::Free, vec![vx]),
        Instruction::with_constant(Opcode::Fill, vec![vy.clone()], Const::F64(2.0)),
        Instruction::new(Opcode::Free, vec![vy]),
    ]
}

#[test]
fn second_batch_hits_the_allocator_zero_times() {
    const NELEM: i64 = 1 << 20;
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_with_vcache(&dir, 2);

    let mut arena = BaseArena::new();
    let batch = fill_free_batch(&mut arena, NELEM);
    engine.execute(&mut arena, &batch).unwrap();

    // First batch: x missed the empty cache, y recycled x's buffer
    let first = engine.vcache_stats();
    assert_eq!(first.misses, 1);
    assert_eq!(first.hits, 1);

    let batch = fill_free_batch(&mut arena, NELEM);
    engine.execute(&mut arena, &batch).unwrap();

    // Second batch: both allocations served from the cache
    let second = engine.vcache_stats();
    assert_eq!(second.misses, first.misses);
    assert_eq!(second.hits, first.hits + 2);
}

#[test]
fn conservation_over_many_iterations() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_with_vcache(&dir, 8);
    let mut arena = BaseArena::new();

    // Two distinct sizes cycled repeatedly; capacity comfortably exceeds
    // the distinct-size count, so misses equal the distinct sizes.
    for _ in 0..5 {
        for nelem in [128, 512] {
            let batch = fill_free_batch(&mut arena, nelem);
            engine.execute(&mut arena, &batch).unwrap();
        }
    }
    let stats = engine.vcache_stats();
    assert_eq!(stats.requests - stats.hits, 2);
    assert_eq!(stats.evictions, 0);
}

#[test]
fn zero_capacity_never_recycles() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_with_vcache(&dir, 0);
    let mut arena = BaseArena::new();

    for _ in 0..3 {
        let batch = fill_free_batch(&mut arena, 256);
        engine.execute(&mut arena, &batch).unwrap();
    }
    let stats = engine.vcache_stats();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, stats.requests);
}

#[test]
fn freed_buffers_leave_bases_unrealized() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_with_vcache(&dir, 4);
    let mut arena = BaseArena::new();

    let (x, vx) = dense_f64(&mut arena, 64);
    let batch = vec![
        Instruction::with_constant(Opcode::Fill, vec![vx.clone()], Const::F64(7.0)),
        Instruction::new(Opcode::Free, vec![vx]),
    ];
    engine.execute(&mut arena, &batch).unwrap();

    assert!(!arena.get(x).unwrap().is_realized());
    assert_eq!(engine.vcache_stats().frees, 1);
}
