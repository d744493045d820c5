//! Engine: one `execute()` of a batch, end to end
//!
//! The engine owns every piece of shared state explicitly: the victim
//! cache, the compile cache, the specializer, the kernel loader and the
//! extension registry. One execution thread drives `execute` to
//! completion; kernels may parallelize internally.
//!
//! Per batch: lower to TACs, mark temps, build the dependency graph, then
//! sweep subgraphs in order. Fusible subgraphs run through `fuse_mode`
//! (one kernel per block, adjacent blocks merged when legal); everything
//! else runs per TAC through `sij_mode`.

use crate::block::Block;
use crate::compiler::Compiler;
use crate::config::EngineConfig;
use crate::dag::Dag;
use crate::error::{EngineError, Result};
use crate::extensions::{ExtMethod, ExtensionRegistry};
use crate::fuser;
use crate::interp;
use crate::loader::{CcLoader, KernelLoader};
use crate::plan::{KernelOperand, KernelPlan, Launcher};
use crate::specializer::Specializer;
use crate::storage::Storage;
use crate::vcache::{VCache, VCacheStats};
use std::sync::Arc;
use vexel_tracing::debug;
use vexel_core::{
    instrs_to_tacs, BaseArena, Batch, Layout, Opcode, Operand, SymbolTable, Tac, TacOp, TacSub,
};

pub struct Engine {
    config: EngineConfig,
    vcache: VCache,
    storage: Storage,
    specializer: Specializer,
    loader: Box<dyn KernelLoader>,
    extensions: ExtensionRegistry,
    exec_count: u64,
}

impl Engine {
    /// Engine with the production toolchain loader.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let loader = Box::new(CcLoader::new(Compiler::new(config.compiler_cmd.clone())));
        Self::with_loader(config, loader)
    }

    /// Engine with a caller-provided kernel loader (in-memory backends,
    /// instrumented loaders).
    pub fn with_loader(config: EngineConfig, mut loader: Box<dyn KernelLoader>) -> Result<Self> {
        let mut storage = Storage::new(&config.object_dir, &config.kernel_dir)?;
        if config.preload {
            storage.preload(loader.as_mut())?;
        }
        Ok(Self {
            vcache: VCache::new(config.vcache_size),
            specializer: Specializer::new(&config.template_dir),
            storage,
            loader,
            extensions: ExtensionRegistry::new(),
            exec_count: 0,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Effective environment, for startup logging
    pub fn text(&self) -> String {
        self.config.to_string()
    }

    pub fn vcache_stats(&self) -> VCacheStats {
        self.vcache.stats()
    }

    pub fn kernels_loaded(&self) -> usize {
        self.storage.len()
    }

    /// Register an extension method for `opcode`.
    pub fn register_extension(&mut self, name: &str, opcode: u32, method: ExtMethod) -> u32 {
        self.extensions.register(name, opcode, method)
    }

    /// Execute one batch to completion.
    pub fn execute(&mut self, arena: &mut BaseArena, batch: &Batch) -> Result<()> {
        self.exec_count += 1;
        debug!(batch = self.exec_count, ninstr = batch.len(), "execute");

        let mut table = SymbolTable::for_batch(batch.len());
        let mut program: Vec<Tac> = Vec::with_capacity(batch.len());
        instrs_to_tacs(arena, batch, &mut program, &mut table)?;
        table.count_tmp();

        let dag = Dag::new(&table, &program);
        if self.config.dump_rep {
            let path = format!("graph{}.dot", self.exec_count);
            std::fs::write(path, dag.dot(&program))?;
        }

        // Fuse-eligible blocks are held back one step so adjacent blocks
        // can merge into a single nest when shapes and data-parallelism
        // permit.
        let mut pending: Option<Block> = None;

        for sg in dag.subgraphs() {
            let fuse_eligible = self.config.jit_fusion
                && sg.omask & TacOp::NON_FUSABLE == 0
                && sg.omask & TacOp::ARRAY_OPS != 0;

            if fuse_eligible {
                let mut block = Block::new();
                block.compose(&sg.vertices, &program);
                pending = Some(match pending.take() {
                    None => block,
                    Some(prev) => match fuser::try_merge(&prev, &block, &program, &table) {
                        Some(merged) => merged,
                        None => {
                            self.fuse_mode(prev, &program, &table, arena)?;
                            block
                        }
                    },
                });
            } else {
                if let Some(prev) = pending.take() {
                    self.fuse_mode(prev, &program, &table, arena)?;
                }
                for &v in &sg.vertices {
                    self.sij_mode(v, &program, &table, arena, batch)?;
                }
            }
        }
        if let Some(prev) = pending.take() {
            self.fuse_mode(prev, &program, &table, arena)?;
        }
        Ok(())
    }

    /// Single-instruction mode: compile/load and run one TAC, or handle a
    /// system/extension op inline.
    fn sij_mode(
        &mut self,
        vertex: usize,
        program: &[Tac],
        table: &SymbolTable,
        arena: &mut BaseArena,
        batch: &Batch,
    ) -> Result<()> {
        let tac = &program[vertex];
        match tac.op {
            TacOp::Noop => Ok(()),

            TacOp::System => match tac.sub {
                TacSub::Discard | TacSub::Sync => Ok(()),
                TacSub::Free => {
                    let view = table[tac.out]
                        .view()
                        .ok_or_else(|| EngineError::Invariant("FREE of a constant".into()))?;
                    self.vcache
                        .free_base(arena, view.base)
                        .map_err(|_| EngineError::Invariant(format!("FREE of unknown {}", view.base)))
                }
                other => Err(EngineError::Invariant(format!("system op {other}"))),
            },

            TacOp::Extension => {
                let index = tac
                    .ext
                    .ok_or_else(|| EngineError::Invariant("extension TAC without payload".into()))?;
                let instr = &batch[index];
                let Opcode::Extension(opcode) = instr.opcode else {
                    return Err(EngineError::Invariant(
                        "extension TAC maps to a non-extension instruction".into(),
                    ));
                };
                self.extensions.dispatch(opcode, instr, arena)
            },

            // Array ops: a one-TAC kernel
            _ => {
                let mut block = Block::new();
                block.compose_single(vertex, program);
                let ranges = fuser::fuse_ranges(&block, program, table);
                block.symbolize(program, table);
                let plan = KernelPlan::build(&block, &ranges, program, table);

                let launcher = self.compile_and_load(block.symbol(), &plan)?;
                self.alloc_outputs(&block, program, table, arena)?;
                let mut args = build_args(&block, &plan, table, arena)?;
                (*launcher)(&mut args)
            }
        }
    }

    /// Fused mode: one kernel for a whole block, then honor its FREEs.
    fn fuse_mode(
        &mut self,
        mut block: Block,
        program: &[Tac],
        table: &SymbolTable,
        arena: &mut BaseArena,
    ) -> Result<()> {
        let ranges = fuser::fuse_ranges(&block, program, table);
        fuser::scalar_replace(&mut block, &ranges, program, table);
        block.symbolize(program, table);
        let plan = KernelPlan::build(&block, &ranges, program, table);

        debug!(symbol = block.symbol(), ntacs = block.ntacs(), "fuse mode");
        let launcher = self.compile_and_load(block.symbol(), &plan)?;
        self.alloc_outputs(&block, program, table, arena)?;
        {
            let mut args = build_args(&block, &plan, table, arena)?;
            (*launcher)(&mut args)?;
        }

        // Honor FREEs inside the block, in block order
        for pos in 0..block.ntacs() {
            let tac = block.tac(pos, program);
            if tac.sub == TacSub::Free {
                if let Some(view) = table[tac.out].view() {
                    self.vcache.free_base(arena, view.base)?;
                }
            }
        }
        Ok(())
    }

    /// Resolve a launcher for `symbol`: compile cache when the JIT is
    /// enabled, the built-in kernel table otherwise.
    fn compile_and_load(&mut self, symbol: &str, plan: &KernelPlan) -> Result<Launcher> {
        if !self.config.jit_enabled {
            let plan = plan.clone();
            return Ok(Arc::new(move |args: &mut [KernelOperand]| {
                interp::run_plan(&plan, args)
            }));
        }

        if !self.storage.symbol_ready(symbol) {
            if !self.storage.has_object(symbol) {
                let source = self.specializer.specialize(plan, symbol)?;
                if self.config.jit_dumpsrc {
                    std::fs::write(self.storage.src_abspath(symbol), &source)?;
                }
                let object = self.storage.obj_abspath(symbol);
                self.loader.compile(symbol, &source, plan, &object)?;
                let filename = self.storage.obj_filename(symbol);
                self.storage.add_symbol(symbol, &filename);
            }
            self.storage.load(self.loader.as_mut(), symbol)?;
        }
        self.storage
            .func(symbol)
            .ok_or_else(|| EngineError::LoadFailed {
                symbol: symbol.to_string(),
                detail: "launcher vanished from storage".to_string(),
            })
    }

    /// Realize the output buffer of every array-op TAC in the block.
    /// Scalar-replaced outputs stay register-resident and get no buffer;
    /// scalar outputs collapse to one element before allocation.
    fn alloc_outputs(
        &mut self,
        block: &Block,
        program: &[Tac],
        table: &SymbolTable,
        arena: &mut BaseArena,
    ) -> Result<()> {
        for pos in 0..block.ntacs() {
            let tac = block.tac(pos, program);
            if !tac.op.is_array_op() {
                continue;
            }
            let operand = &table[tac.out];
            let Some(view) = operand.view() else { continue };
            if block.is_scalar_replaced(block.local(tac.out)) {
                continue;
            }
            if operand.layout() == Layout::Scalar {
                arena.get_mut(view.base)?.collapse_to_scalar();
            }
            self.vcache.malloc_base(arena, view.base)?;
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.vcache.clear();
    }
}

/// Build the launcher argument pack for a block: one descriptor per local
/// operand, shape/stride pointers borrowed from the symbol table for the
/// duration of the call.
fn build_args(
    block: &Block,
    plan: &KernelPlan,
    table: &SymbolTable,
    arena: &mut BaseArena,
) -> Result<Vec<KernelOperand>> {
    let mut args = Vec::with_capacity(block.noperands());
    for (local, &handle) in block.operands().iter().enumerate() {
        let meta = &plan.operands[local];
        let mut ko = KernelOperand::null();
        match &table[handle] {
            Operand::Immediate { value, .. } => {
                ko.nelem = 1;
                ko.imm_f = value.as_f64();
                ko.imm_i = value.as_i64();
            }
            Operand::Array { view, .. } => {
                ko.nelem = view.nelem() as i64;
                ko.start = view.start;
                ko.ndim = view.ndim() as i64;
                ko.shape = view.shape.as_ptr();
                ko.stride = view.stride.as_ptr();
                if !meta.scalar_replaced {
                    ko.data = arena
                        .get_mut(view.base)?
                        .data_ptr_mut()
                        .ok_or_else(|| {
                            EngineError::Invariant(format!(
                                "{} has null data on kernel entry",
                                view.base
                            ))
                        })?;
                }
            }
        }
        args.push(ko);
    }
    Ok(args)
}
