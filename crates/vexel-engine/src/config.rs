//! Engine configuration
//!
//! All knobs come from `VEXEL_*` environment variables with sensible
//! defaults, so an embedding process can tune the engine without a config
//! file. `Display` prints the effective environment, which embedders log
//! at startup.

use crate::compiler::DEFAULT_CMD;
use std::env;
use std::fmt;
use std::path::PathBuf;

/// Runtime configuration of one engine instance
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Victim-cache capacity in buffers; 0 disables recycling
    pub vcache_size: usize,
    /// Load every cached object at startup
    pub preload: bool,
    /// Generate and compile kernels; false uses the built-in kernel table
    pub jit_enabled: bool,
    /// Fuse compatible TACs into one kernel; false forces per-TAC mode
    pub jit_fusion: bool,
    /// Write generated sources to `kernel_dir`
    pub jit_dumpsrc: bool,
    /// Write `graph<n>.dot` per executed batch
    pub dump_rep: bool,
    /// External toolchain command; `{OBJ}` marks the object path
    pub compiler_cmd: String,
    /// Directory holding the kernel skeleton templates
    pub template_dir: PathBuf,
    /// Directory for dumped kernel sources
    pub kernel_dir: PathBuf,
    /// Directory for compiled shared objects
    pub object_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vcache_size: 10,
            preload: false,
            jit_enabled: true,
            jit_fusion: true,
            jit_dumpsrc: false,
            dump_rep: false,
            compiler_cmd: DEFAULT_CMD.to_string(),
            template_dir: PathBuf::from("templates"),
            kernel_dir: PathBuf::from(".vexel/kernels"),
            object_dir: PathBuf::from(".vexel/objects"),
        }
    }
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1" || value.eq_ignore_ascii_case("yes")
}

impl EngineConfig {
    /// Build a configuration from `VEXEL_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = env::var("VEXEL_VCACHE_SIZE") {
            if let Ok(n) = v.parse::<usize>() {
                config.vcache_size = n;
            }
        }
        if let Ok(v) = env::var("VEXEL_PRELOAD") {
            config.preload = parse_bool(&v);
        }
        if let Ok(v) = env::var("VEXEL_JIT_ENABLED") {
            config.jit_enabled = parse_bool(&v);
        }
        if let Ok(v) = env::var("VEXEL_JIT_FUSION") {
            config.jit_fusion = parse_bool(&v);
        }
        if let Ok(v) = env::var("VEXEL_JIT_DUMPSRC") {
            config.jit_dumpsrc = parse_bool(&v);
        }
        if let Ok(v) = env::var("VEXEL_DUMP_REP") {
            config.dump_rep = parse_bool(&v);
        }
        if let Ok(v) = env::var("VEXEL_COMPILER_CMD") {
            if !v.trim().is_empty() {
                config.compiler_cmd = v;
            }
        }
        if let Ok(v) = env::var("VEXEL_TEMPLATE_DIR") {
            config.template_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("VEXEL_KERNEL_DIR") {
            config.kernel_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("VEXEL_OBJECT_DIR") {
            config.object_dir = PathBuf::from(v);
        }

        config
    }
}

impl fmt::Display for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ENVIRONMENT {{")?;
        writeln!(f, "  VEXEL_VCACHE_SIZE={}", self.vcache_size)?;
        writeln!(f, "  VEXEL_PRELOAD={}", self.preload)?;
        writeln!(f, "  VEXEL_JIT_ENABLED={}", self.jit_enabled)?;
        writeln!(f, "  VEXEL_JIT_FUSION={}", self.jit_fusion)?;
        writeln!(f, "  VEXEL_JIT_DUMPSRC={}", self.jit_dumpsrc)?;
        writeln!(f, "  VEXEL_DUMP_REP={}", self.dump_rep)?;
        writeln!(f, "  VEXEL_COMPILER_CMD={}", self.compiler_cmd)?;
        writeln!(f, "  VEXEL_TEMPLATE_DIR={}", self.template_dir.display())?;
        writeln!(f, "  VEXEL_KERNEL_DIR={}", self.kernel_dir.display())?;
        writeln!(f, "  VEXEL_OBJECT_DIR={}", self.object_dir.display())?;
        write!(f, "}}")
    }
}
