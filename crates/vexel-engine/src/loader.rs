//! Kernel loading capability
//!
//! `KernelLoader` abstracts how a specialized kernel becomes callable. The
//! production loader shells out to the C toolchain and resolves the
//! `launcher` symbol from the produced shared object. The in-memory loader
//! skips the toolchain entirely and builds interpreter launchers from the
//! kernel plan; it backs the test suite and embedders without a compiler.

use crate::compiler::Compiler;
use crate::error::{EngineError, Result};
use crate::interp;
use crate::plan::{KernelOperand, KernelPlan, Launcher};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// C ABI of the generated trampoline
type RawLauncher = unsafe extern "C" fn(*const KernelOperand, i64) -> i64;

/// Turns specialized kernels into callable launchers
pub trait KernelLoader: Send {
    /// Materialize the kernel at `obj_path`. `source` and `plan` describe
    /// the same kernel; implementations use whichever representation they
    /// consume.
    fn compile(
        &mut self,
        symbol: &str,
        source: &str,
        plan: &KernelPlan,
        obj_path: &Path,
    ) -> Result<()>;

    /// Resolve a previously materialized kernel into a launcher.
    fn load(&mut self, symbol: &str, obj_path: &Path) -> Result<Launcher>;
}

/// Production loader: external C toolchain plus dynamic loading
pub struct CcLoader {
    compiler: Compiler,
}

impl CcLoader {
    pub fn new(compiler: Compiler) -> Self {
        Self { compiler }
    }
}

impl KernelLoader for CcLoader {
    fn compile(
        &mut self,
        symbol: &str,
        source: &str,
        _plan: &KernelPlan,
        obj_path: &Path,
    ) -> Result<()> {
        self.compiler.compile(symbol, source, obj_path)
    }

    fn load(&mut self, symbol: &str, obj_path: &Path) -> Result<Launcher> {
        // Safety: the object was produced by our own specializer/toolchain
        // and exports the launcher ABI declared above.
        let (library, func) = unsafe {
            let library = libloading::Library::new(obj_path).map_err(|e| EngineError::LoadFailed {
                symbol: symbol.to_string(),
                detail: e.to_string(),
            })?;
            let func: libloading::Symbol<RawLauncher> =
                library.get(b"launcher").map_err(|e| EngineError::LoadFailed {
                    symbol: symbol.to_string(),
                    detail: e.to_string(),
                })?;
            let func = *func;
            (Arc::new(library), func)
        };

        debug!(%symbol, path = %obj_path.display(), "kernel loaded");
        let symbol = symbol.to_string();
        Ok(Arc::new(move |args: &mut [KernelOperand]| {
            // The library must outlive every call through `func`
            let _keep_alive = &library;
            let status = unsafe { func(args.as_ptr(), args.len() as i64) };
            if status == 0 {
                Ok(())
            } else {
                Err(EngineError::KernelFailed {
                    symbol: symbol.clone(),
                    status,
                })
            }
        }))
    }
}

/// In-memory loader: interpreter launchers built from kernel plans
///
/// `compile` registers the plan under its symbol; `load` wraps it in a
/// closure over the fallback kernel table. Nothing touches the filesystem,
/// so preloading finds no objects and cross-process persistence does not
/// apply.
#[derive(Default)]
pub struct InterpLoader {
    plans: HashMap<String, Arc<KernelPlan>>,
}

impl InterpLoader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KernelLoader for InterpLoader {
    fn compile(
        &mut self,
        symbol: &str,
        _source: &str,
        plan: &KernelPlan,
        _obj_path: &Path,
    ) -> Result<()> {
        self.plans.insert(symbol.to_string(), Arc::new(plan.clone()));
        Ok(())
    }

    fn load(&mut self, symbol: &str, _obj_path: &Path) -> Result<Launcher> {
        let plan = self
            .plans
            .get(symbol)
            .cloned()
            .ok_or_else(|| EngineError::LoadFailed {
                symbol: symbol.to_string(),
                detail: "no plan registered for symbol".to_string(),
            })?;
        Ok(Arc::new(move |args: &mut [KernelOperand]| {
            interp::run_plan(&plan, args)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interp_loader_round_trip() {
        let plan = KernelPlan {
            operands: vec![],
            ranges: vec![],
        };
        let mut loader = InterpLoader::new();
        loader
            .compile("sym", "", &plan, Path::new("/nowhere"))
            .unwrap();

        let launcher = loader.load("sym", Path::new("/nowhere")).unwrap();
        let mut args: Vec<KernelOperand> = vec![];
        (*launcher)(&mut args).unwrap();
    }

    #[test]
    fn test_interp_loader_unknown_symbol() {
        let mut loader = InterpLoader::new();
        let err = match loader.load("missing", Path::new("/nowhere")) {
            Err(e) => e,
            Ok(_) => panic!("expected load to fail for unregistered symbol"),
        };
        assert!(matches!(err, EngineError::LoadFailed { .. }));
    }
}
