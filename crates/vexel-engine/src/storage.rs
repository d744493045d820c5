//! Storage: the fingerprint-keyed compile cache
//!
//! Maps block fingerprints to resolved launchers, backed by two
//! directories: `kernel_directory` for dumped sources and
//! `object_directory` for shared objects. Resolved launchers sit behind a
//! read-mostly lock; loaded libraries are retained for the process
//! lifetime inside the launcher closures.
//!
//! Compile discipline: a fingerprint is recorded with `add_symbol` only
//! after a successful compile, so a failed compile leaves storage clean
//! and a later batch retries. Preloading scans `object_directory` and
//! resolves every object it finds, which is how kernels persist across
//! runs.

use crate::error::Result;
use crate::loader::KernelLoader;
use crate::plan::Launcher;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use vexel_tracing::{debug, warn};

/// Platform extension of shared objects
#[cfg(target_os = "macos")]
pub const OBJ_EXT: &str = "dylib";
#[cfg(target_os = "windows")]
pub const OBJ_EXT: &str = "dll";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub const OBJ_EXT: &str = "so";

pub struct Storage {
    kernel_dir: PathBuf,
    object_dir: PathBuf,
    /// Fingerprint -> resolved launcher
    funcs: RwLock<HashMap<String, Launcher>>,
    /// Fingerprint -> object path, recorded after successful compiles
    objects: HashMap<String, PathBuf>,
}

impl Storage {
    /// Open (and create if needed) the backing directories.
    pub fn new(object_dir: impl Into<PathBuf>, kernel_dir: impl Into<PathBuf>) -> Result<Self> {
        let object_dir = object_dir.into();
        let kernel_dir = kernel_dir.into();
        std::fs::create_dir_all(&object_dir)?;
        std::fs::create_dir_all(&kernel_dir)?;
        Ok(Self {
            kernel_dir,
            object_dir,
            funcs: RwLock::new(HashMap::new()),
            objects: HashMap::new(),
        })
    }

    /// Launcher resolved in memory?
    pub fn symbol_ready(&self, symbol: &str) -> bool {
        self.funcs.read().contains_key(symbol)
    }

    /// Resolved launcher for a fingerprint
    pub fn func(&self, symbol: &str) -> Option<Launcher> {
        self.funcs.read().get(symbol).cloned()
    }

    pub fn len(&self) -> usize {
        self.funcs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn obj_filename(&self, symbol: &str) -> String {
        format!("{symbol}.{OBJ_EXT}")
    }

    pub fn obj_abspath(&self, symbol: &str) -> PathBuf {
        self.object_dir.join(self.obj_filename(symbol))
    }

    pub fn src_abspath(&self, symbol: &str) -> PathBuf {
        self.kernel_dir.join(format!("{symbol}.c"))
    }

    /// Record that a freshly compiled object exists for `symbol`.
    pub fn add_symbol(&mut self, symbol: &str, filename: &str) {
        self.objects
            .insert(symbol.to_string(), self.object_dir.join(filename));
    }

    /// Object recorded (or discovered) for this fingerprint?
    pub fn has_object(&self, symbol: &str) -> bool {
        self.objects.contains_key(symbol)
    }

    /// Resolve `symbol` into a launcher through `loader` and cache it.
    pub fn load(&self, loader: &mut dyn KernelLoader, symbol: &str) -> Result<()> {
        let path = self
            .objects
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| self.obj_abspath(symbol));
        let launcher = loader.load(symbol, &path)?;
        self.funcs.write().insert(symbol.to_string(), launcher);
        Ok(())
    }

    /// Discover and resolve every object in `object_directory`.
    ///
    /// Best effort: unloadable objects are logged and skipped.
    pub fn preload(&mut self, loader: &mut dyn KernelLoader) -> Result<usize> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(&self.object_dir)? {
            let path = entry?.path();
            let is_object = path
                .extension()
                .is_some_and(|ext| ext.to_string_lossy() == OBJ_EXT);
            if !is_object {
                continue;
            }
            let Some(symbol) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            match loader.load(&symbol, &path) {
                Ok(launcher) => {
                    self.objects.insert(symbol.clone(), path);
                    self.funcs.write().insert(symbol, launcher);
                    loaded += 1;
                }
                Err(e) => {
                    warn!(%symbol, error = %e, "skipping unloadable kernel object");
                }
            }
        }
        debug!(loaded, dir = %self.object_dir.display(), "kernel preload done");
        Ok(loaded)
    }
}
