//! Fuser: fuse ranges, scalar replacement, block-level merging
//!
//! Within one block the fuser sweeps left to right and groups maximal
//! contiguous runs of MAP/ZIP over compatible operands into *fuse ranges*,
//! each of which the specializer emits as one inner loop. SYSTEM and NOOP
//! TACs are skipped outright: they neither split a range nor contribute
//! operands. Any other op closes the current range and stands alone.
//!
//! Across blocks, two adjacent data-parallel blocks of equal rank may merge
//! when their extents match, or when one is reshapable and the extents
//! divide evenly. Partial overlap between an output of one side and any
//! operand of the other is a hard barrier: a shared loop would reorder
//! reads and writes on the same cells.

use crate::block::Block;
use std::collections::HashMap;
use vexel_core::{Layout, Operand, SymbolTable, Tac, TacOp};

/// Maximal run of TAC positions emitted as a single inner loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuseRange {
    /// First TAC position in the block, inclusive
    pub begin: usize,
    /// Last TAC position in the block, inclusive
    pub end: usize,
    /// Least-specialized layout required by any member operand
    pub layout: Layout,
}

/// Two operands may share one loop iteration
///
/// Requires one element type (each emitted loop is type-homogeneous) and
/// holds for identical views, for dense operands of equal shape, and for a
/// scalar or constant broadcasting into the partner's shape.
pub fn compatible(a: &Operand, b: &Operand) -> bool {
    if a.dtype() != b.dtype() {
        return false;
    }
    if matches!(a.layout(), Layout::Scalar | Layout::Constant)
        || matches!(b.layout(), Layout::Scalar | Layout::Constant)
    {
        return true;
    }
    match (a.view(), b.view()) {
        (Some(va), Some(vb)) => {
            va.aligned(vb)
                || (a.layout() == Layout::Contiguous
                    && b.layout() == Layout::Contiguous
                    && va.shape == vb.shape)
        }
        _ => false,
    }
}

fn operand_layouts(tac: &Tac, table: &SymbolTable) -> Layout {
    tac.operands()
        .map(|h| table[h].layout())
        .max()
        .unwrap_or(Layout::Scalar)
}

/// Determine the fuse ranges of a block.
pub fn fuse_ranges(block: &Block, program: &[Tac], table: &SymbolTable) -> Vec<FuseRange> {
    let mut ranges = Vec::new();
    let ntacs = block.ntacs();

    let mut begin: Option<usize> = None;
    let mut first: Option<&Tac> = None;
    let mut layout = Layout::Scalar;

    for pos in 0..ntacs {
        let tac = block.tac(pos, program);

        // Skipped: do not split, contribute no operands
        if matches!(tac.op, TacOp::System | TacOp::Noop) {
            continue;
        }

        // Ops outside MAP/ZIP close the open range and stand alone
        if !matches!(tac.op, TacOp::Map | TacOp::Zip) {
            if let Some(b) = begin.take() {
                ranges.push(FuseRange {
                    begin: b,
                    end: pos - 1,
                    layout,
                });
            }
            ranges.push(FuseRange {
                begin: pos,
                end: pos,
                layout: operand_layouts(tac, table),
            });
            first = None;
            layout = Layout::Scalar;
            continue;
        }

        match (begin, first) {
            (None, _) => {
                begin = Some(pos);
                first = Some(tac);
                layout = operand_layouts(tac, table);
            }
            (Some(b), Some(anchor)) => {
                let anchor_out = &table[anchor.out];
                let fits = tac.operands().all(|h| compatible(anchor_out, &table[h]));
                if fits {
                    layout = layout.max(operand_layouts(tac, table));
                } else {
                    ranges.push(FuseRange {
                        begin: b,
                        end: pos - 1,
                        layout,
                    });
                    begin = Some(pos);
                    first = Some(tac);
                    layout = operand_layouts(tac, table);
                }
            }
            (Some(_), None) => unreachable!("open range always has an anchor"),
        }
    }

    if let Some(b) = begin {
        ranges.push(FuseRange {
            begin: b,
            end: ntacs - 1,
            layout,
        });
    }
    ranges
}

/// Elect scalar-replacement candidates inside each range.
///
/// An operand becomes a register-resident scalar when it is produced once
/// and consumed once within the range and the symbol table marked it as a
/// batch-local temp. Elected operands get no buffer and no FREE; the marks
/// feed the fingerprint.
pub fn scalar_replace(
    block: &mut Block,
    ranges: &[FuseRange],
    program: &[Tac],
    table: &SymbolTable,
) {
    for range in ranges {
        let mut produced: HashMap<usize, u32> = HashMap::new();
        let mut consumed: HashMap<usize, u32> = HashMap::new();

        for pos in range.begin..=range.end {
            let tac = block.tac(pos, program);
            if matches!(tac.op, TacOp::System | TacOp::Noop) {
                continue;
            }
            if let Some(out) = tac.output() {
                *produced.entry(out).or_default() += 1;
            }
            if let Some(in1) = tac.input1() {
                *consumed.entry(in1).or_default() += 1;
            }
            if let Some(in2) = tac.input2() {
                if tac.input2() != tac.input1() {
                    *consumed.entry(in2).or_default() += 1;
                }
            }
        }

        for (&handle, &writes) in &produced {
            if writes == 1 && consumed.get(&handle) == Some(&1) && table.is_temp(handle) {
                let local = block.local(handle);
                block.mark_scalar_replaced(local);
            }
        }
    }
}

/// Every output of either block is disjoint from or aligned with every
/// operand of the other: the condition under which a shared loop cannot
/// reorder reads and writes on the same cells.
pub fn data_parallel_compatible(
    a: &Block,
    b: &Block,
    program: &[Tac],
    table: &SymbolTable,
) -> bool {
    let check = |producer: &Block, consumer: &Block| -> bool {
        for &pi in producer.tacs() {
            let ptac = &program[pi];
            if !ptac.op.is_array_op() {
                continue;
            }
            let Some(out) = ptac.output() else { continue };
            let Some(out_view) = table[out].view() else {
                continue;
            };
            for &ci in consumer.tacs() {
                let ctac = &program[ci];
                if matches!(ctac.op, TacOp::Noop) {
                    continue;
                }
                for handle in ctac.operands() {
                    if let Some(view) = table[handle].view() {
                        if !out_view.aligned_or_disjoint(view) {
                            return false;
                        }
                    }
                }
            }
        }
        true
    };
    check(a, b) && check(b, a)
}

/// Attempt to merge two adjacent blocks into one loop nest.
///
/// Requires equal rank; equal extent, or one reshapable side whose extent
/// the other divides evenly; and data-parallel compatibility. The merged
/// block is composed in program order and must be re-symbolized by the
/// caller after range/scalar analysis.
pub fn try_merge(
    a: &Block,
    b: &Block,
    program: &[Tac],
    table: &SymbolTable,
) -> Option<Block> {
    if a.ntacs() == 0 || b.ntacs() == 0 {
        return None;
    }
    if a.rank(program, table) != b.rank(program, table) {
        return None;
    }

    let (sa, sb) = (a.size(program, table), b.size(program, table));
    let extent_ok = sa == sb
        || (a.is_reshapable(table) && sb != 0 && sa % sb == 0)
        || (b.is_reshapable(table) && sa != 0 && sb % sa == 0);
    if !extent_ok {
        return None;
    }

    if !data_parallel_compatible(a, b, program, table) {
        return None;
    }

    let mut vertices: Vec<usize> = a.tacs().iter().chain(b.tacs()).copied().collect();
    vertices.sort_unstable();
    let mut merged = Block::new();
    merged.compose(&vertices, program);
    Some(merged)
}
