//! Vector execution engine
//!
//! Executes batches of array instructions by fusing compatible operations
//! into data-parallel loop nests, specializing each nest to C source,
//! compiling it once per structural fingerprint, and recycling base-array
//! buffers across batches.
//!
//! # Pipeline
//!
//! ```text
//! instructions
//!   ──▶ SymbolTable + TACs          (vexel-core lowering)
//!   ──▶ Dag ──▶ subgraphs           (dependency + fusibility analysis)
//!   ──▶ Block ──▶ fuse ranges       (one loop nest per range)
//!   ──▶ fingerprint ──▶ Storage     (hit: reuse launcher)
//!   ──▶ Specializer ──▶ C source    (miss: render, compile, load)
//!   ──▶ VCache.malloc ──▶ launcher  (realize outputs, run)
//!   ──▶ honor FREEs                 (buffers back to the VCache)
//! ```
//!
//! # Loaders
//!
//! The external C toolchain sits behind the [`loader::KernelLoader`]
//! capability. [`loader::CcLoader`] is the production path;
//! [`loader::InterpLoader`] serves kernels from the built-in interpreter
//! and needs no toolchain, which is what the test suite runs on.

pub mod block;
pub mod compiler;
pub mod config;
pub mod dag;
pub mod engine;
pub mod error;
pub mod extensions;
pub mod fuser;
pub mod interp;
pub mod loader;
pub mod plan;
pub mod specializer;
pub mod storage;
pub mod vcache;

pub use block::Block;
pub use compiler::{Compiler, DEFAULT_CMD};
pub use config::EngineConfig;
pub use dag::{Dag, EdgeKind, Subgraph};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use extensions::{ExtMethod, ExtensionRegistry};
pub use fuser::FuseRange;
pub use loader::{CcLoader, InterpLoader, KernelLoader};
pub use plan::{KernelOperand, KernelPlan, Launcher};
pub use specializer::Specializer;
pub use storage::Storage;
pub use vcache::{VCache, VCacheStats};
