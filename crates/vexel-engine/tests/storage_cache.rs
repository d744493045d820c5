//! Compile-cache discipline: at-most-once compilation, failure hygiene,
//! source dumping

mod common;

use common::{dense_f64, test_config, CountingLoader, FlakyLoader};
use std::sync::atomic::Ordering;
use vexel_core::{BaseArena, Instruction, Opcode};
use vexel_engine::{Engine, EngineError, InterpLoader};

fn map_batch(arena: &mut BaseArena, nelem: i64) -> Vec<Instruction> {
    let (a, va) = dense_f64(arena, nelem);
    let (_o, vo) = dense_f64(arena, nelem);
    let data: Vec<f64> = (0..nelem).map(|i| i as f64 + 1.0).collect();
    arena.write::<f64>(a, &data).unwrap();
    vec![Instruction::new(Opcode::Sqrt, vec![vo, va])]
}

#[test]
fn structurally_identical_batches_compile_once() {
    let dir = tempfile::tempdir().unwrap();
    let (loader, compiles) = CountingLoader::new();
    let mut engine = Engine::with_loader(test_config(&dir), Box::new(loader)).unwrap();

    // Three batches over fresh bases: same structure, different handles
    for _ in 0..3 {
        let mut arena = BaseArena::new();
        let batch = map_batch(&mut arena, 128);
        engine.execute(&mut arena, &batch).unwrap();
    }
    assert_eq!(compiles.load(Ordering::SeqCst), 1);
    assert_eq!(engine.kernels_loaded(), 1);

    // A different extent keeps the fingerprint, a different dtype does not
    let mut arena = BaseArena::new();
    let batch = map_batch(&mut arena, 4096);
    engine.execute(&mut arena, &batch).unwrap();
    assert_eq!(compiles.load(Ordering::SeqCst), 1);
}

#[test]
fn distinct_structures_compile_separately() {
    use vexel_core::{ScalarType, View};

    let dir = tempfile::tempdir().unwrap();
    let (loader, compiles) = CountingLoader::new();
    let mut engine = Engine::with_loader(test_config(&dir), Box::new(loader)).unwrap();

    // A rank-1 map and a rank-2 map: different fingerprints, and the rank
    // mismatch keeps the blocks from merging into one nest.
    let mut arena = BaseArena::new();
    let (a, va) = dense_f64(&mut arena, 64);
    let (_o1, vo1) = dense_f64(&mut arena, 64);
    let m = arena.alloc(ScalarType::F64, 64);
    let o2 = arena.alloc(ScalarType::F64, 64);
    arena.write::<f64>(a, &vec![1.0; 64]).unwrap();
    arena.write::<f64>(m, &vec![1.0; 64]).unwrap();

    let batch = vec![
        Instruction::new(Opcode::Sqrt, vec![vo1, va]),
        Instruction::new(
            Opcode::Exp,
            vec![View::contiguous(o2, &[8, 8]), View::contiguous(m, &[8, 8])],
        ),
    ];
    engine.execute(&mut arena, &batch).unwrap();

    assert_eq!(compiles.load(Ordering::SeqCst), 2);
    assert_eq!(engine.kernels_loaded(), 2);
}

#[test]
fn failed_compile_leaves_storage_clean_and_retries() {
    let dir = tempfile::tempdir().unwrap();
    let (loader, attempts) = FlakyLoader::new(1);
    let mut engine = Engine::with_loader(test_config(&dir), Box::new(loader)).unwrap();

    let mut arena = BaseArena::new();
    let batch = map_batch(&mut arena, 32);
    let err = engine.execute(&mut arena, &batch).unwrap_err();
    assert!(matches!(err, EngineError::CompileFailed { .. }));
    assert_eq!(engine.kernels_loaded(), 0);

    // The fingerprint was not recorded, so the next batch recompiles
    let mut arena = BaseArena::new();
    let batch = map_batch(&mut arena, 32);
    engine.execute(&mut arena, &batch).unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(engine.kernels_loaded(), 1);
}

#[test]
fn broken_template_directory_fails_then_fixed_engine_compiles() {
    let dir = tempfile::tempdir().unwrap();

    // Engine pointed at a template directory that does not exist
    let mut broken = test_config(&dir);
    broken.template_dir = dir.path().join("no-templates-here");
    let mut engine = Engine::with_loader(broken, Box::new(InterpLoader::new())).unwrap();

    let mut arena = BaseArena::new();
    let batch = map_batch(&mut arena, 32);
    let err = engine.execute(&mut arena, &batch).unwrap_err();
    assert!(matches!(err, EngineError::Template(_)));
    assert_eq!(engine.kernels_loaded(), 0);
    drop(engine);

    // Same cache directories, working templates: compiles from scratch
    let mut engine = Engine::with_loader(test_config(&dir), Box::new(InterpLoader::new())).unwrap();
    let mut arena = BaseArena::new();
    let batch = map_batch(&mut arena, 32);
    engine.execute(&mut arena, &batch).unwrap();
    assert_eq!(engine.kernels_loaded(), 1);
}

#[test]
fn dumpsrc_writes_source_next_to_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.jit_dumpsrc = true;
    let kernel_dir = config.kernel_dir.clone();
    let mut engine = Engine::with_loader(config, Box::new(InterpLoader::new())).unwrap();

    let mut arena = BaseArena::new();
    let batch = map_batch(&mut arena, 32);
    engine.execute(&mut arena, &batch).unwrap();

    let sources: Vec<_> = std::fs::read_dir(&kernel_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "c"))
        .collect();
    assert_eq!(sources.len(), 1);

    let text = std::fs::read_to_string(sources[0].path()).unwrap();
    assert!(text.contains("int64_t launcher"));
    assert!(text.contains("sqrt"));
}
