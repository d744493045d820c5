//! Shared fixtures for engine integration tests
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use vexel_core::{BaseArena, BaseHandle, ScalarType, View};
use vexel_engine::{
    EngineConfig, EngineError, InterpLoader, KernelLoader, KernelPlan, Launcher, Result,
};

/// Engine configuration rooted in a fresh temp directory, pointed at the
/// workspace templates.
pub fn test_config(dir: &tempfile::TempDir) -> EngineConfig {
    EngineConfig {
        kernel_dir: dir.path().join("kernels"),
        object_dir: dir.path().join("objects"),
        template_dir: concat!(env!("CARGO_MANIFEST_DIR"), "/../../templates").into(),
        ..EngineConfig::default()
    }
}

/// Allocate a dense 1-d f64 base plus its view
pub fn dense_f64(arena: &mut BaseArena, nelem: i64) -> (BaseHandle, View) {
    let handle = arena.alloc(ScalarType::F64, nelem as usize);
    (handle, View::contiguous(handle, &[nelem]))
}

/// Interpreter-backed loader that counts compile invocations
pub struct CountingLoader {
    inner: InterpLoader,
    compiles: Arc<AtomicUsize>,
}

impl CountingLoader {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let compiles = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner: InterpLoader::new(),
                compiles: Arc::clone(&compiles),
            },
            compiles,
        )
    }
}

impl KernelLoader for CountingLoader {
    fn compile(
        &mut self,
        symbol: &str,
        source: &str,
        plan: &KernelPlan,
        obj_path: &Path,
    ) -> Result<()> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        self.inner.compile(symbol, source, plan, obj_path)
    }

    fn load(&mut self, symbol: &str, obj_path: &Path) -> Result<Launcher> {
        self.inner.load(symbol, obj_path)
    }
}

/// Loader whose first N compile attempts fail, like a broken toolchain
/// that gets fixed underneath a running process.
pub struct FlakyLoader {
    inner: InterpLoader,
    failures_left: usize,
    attempts: Arc<AtomicUsize>,
}

impl FlakyLoader {
    pub fn new(failures: usize) -> (Self, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner: InterpLoader::new(),
                failures_left: failures,
                attempts: Arc::clone(&attempts),
            },
            attempts,
        )
    }
}

impl KernelLoader for FlakyLoader {
    fn compile(
        &mut self,
        symbol: &str,
        source: &str,
        plan: &KernelPlan,
        obj_path: &Path,
    ) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(EngineError::CompileFailed {
                symbol: symbol.to_string(),
                detail: "injected toolchain failure".to_string(),
            });
        }
        self.inner.compile(symbol, source, plan, obj_path)
    }

    fn load(&mut self, symbol: &str, obj_path: &Path) -> Result<Launcher> {
        self.inner.load(symbol, obj_path)
    }
}
