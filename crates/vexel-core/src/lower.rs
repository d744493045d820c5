//! Lowering: instruction batches to TAC programs
//!
//! One TAC per instruction. Views are interned through the symbol table so
//! that identical descriptors share a handle, and per-handle read/write
//! counts are recorded along the way for the later temp scan.

use crate::base::BaseArena;
use crate::error::{Error, Result};
use crate::instr::{Batch, Instruction, Opcode};
use crate::operand::Const;
use crate::symbol::SymbolTable;
use crate::tac::{Tac, TacOp, TacSub};
use crate::types::ScalarType;
use crate::view::View;
use tracing::trace;

fn intern(table: &mut SymbolTable, arena: &BaseArena, view: &View) -> Result<usize> {
    let dtype = arena.get(view.base)?.dtype();
    Ok(table.intern_view(view, dtype))
}

fn expect_operands(instr: &Instruction, n: usize) -> Result<()> {
    if instr.operands.len() < n {
        return Err(Error::MalformedInstruction(format!(
            "{:?} expects {} operands, got {}",
            instr.opcode,
            n,
            instr.operands.len()
        )));
    }
    Ok(())
}

fn map_sub(opcode: Opcode) -> TacSub {
    match opcode {
        Opcode::Identity => TacSub::Identity,
        Opcode::Negative => TacSub::Neg,
        Opcode::Absolute => TacSub::Abs,
        Opcode::Exp => TacSub::Exp,
        Opcode::Log => TacSub::Log,
        Opcode::Sqrt => TacSub::Sqrt,
        Opcode::Sin => TacSub::Sin,
        Opcode::Cos => TacSub::Cos,
        Opcode::Tanh => TacSub::Tanh,
        Opcode::LogicalNot => TacSub::Not,
        _ => unreachable!("not a map opcode"),
    }
}

fn zip_sub(opcode: Opcode) -> TacSub {
    match opcode {
        Opcode::Add => TacSub::Add,
        Opcode::Subtract => TacSub::Sub,
        Opcode::Multiply => TacSub::Mul,
        Opcode::Divide => TacSub::Div,
        Opcode::Mod => TacSub::Mod,
        Opcode::Power => TacSub::Pow,
        Opcode::Minimum => TacSub::Min,
        Opcode::Maximum => TacSub::Max,
        Opcode::BitwiseAnd => TacSub::And,
        Opcode::BitwiseOr => TacSub::Or,
        Opcode::BitwiseXor => TacSub::Xor,
        _ => unreachable!("not a zip opcode"),
    }
}

fn sweep_sub(opcode: Opcode) -> TacSub {
    match opcode {
        Opcode::AddReduce | Opcode::AddScan => TacSub::Add,
        Opcode::MulReduce | Opcode::MulScan => TacSub::Mul,
        Opcode::MinReduce => TacSub::Min,
        Opcode::MaxReduce => TacSub::Max,
        _ => unreachable!("not a reduction/scan opcode"),
    }
}

/// Lower a batch into `program`, interning operands into `table`.
pub fn instrs_to_tacs(
    arena: &BaseArena,
    batch: &Batch,
    program: &mut Vec<Tac>,
    table: &mut SymbolTable,
) -> Result<()> {
    program.reserve(batch.len());

    for (index, instr) in batch.iter().enumerate() {
        let tac = match instr.opcode {
            Opcode::None => Tac::nullary(TacOp::Noop, TacSub::None),

            Opcode::Sync => {
                expect_operands(instr, 1)?;
                let out = intern(table, arena, &instr.operands[0])?;
                table.record_read(out);
                Tac::unary(TacOp::System, TacSub::Sync, out)
            }
            Opcode::Discard => {
                expect_operands(instr, 1)?;
                let out = intern(table, arena, &instr.operands[0])?;
                Tac::unary(TacOp::System, TacSub::Discard, out)
            }
            Opcode::Free => {
                expect_operands(instr, 1)?;
                let out = intern(table, arena, &instr.operands[0])?;
                table.record_free(instr.operands[0].base);
                Tac::unary(TacOp::System, TacSub::Free, out)
            }

            Opcode::Identity
            | Opcode::Negative
            | Opcode::Absolute
            | Opcode::Exp
            | Opcode::Log
            | Opcode::Sqrt
            | Opcode::Sin
            | Opcode::Cos
            | Opcode::Tanh
            | Opcode::LogicalNot => {
                expect_operands(instr, 2)?;
                let out = intern(table, arena, &instr.operands[0])?;
                let in1 = intern(table, arena, &instr.operands[1])?;
                table.record_write(out);
                table.record_read(in1);
                Tac::binary(TacOp::Map, map_sub(instr.opcode), out, in1)
            }

            Opcode::Add
            | Opcode::Subtract
            | Opcode::Multiply
            | Opcode::Divide
            | Opcode::Mod
            | Opcode::Power
            | Opcode::Minimum
            | Opcode::Maximum
            | Opcode::BitwiseAnd
            | Opcode::BitwiseOr
            | Opcode::BitwiseXor => {
                expect_operands(instr, 3)?;
                let out = intern(table, arena, &instr.operands[0])?;
                let in1 = intern(table, arena, &instr.operands[1])?;
                let in2 = intern(table, arena, &instr.operands[2])?;
                table.record_write(out);
                table.record_read(in1);
                table.record_read(in2);
                Tac::ternary(TacOp::Zip, zip_sub(instr.opcode), out, in1, in2)
            }

            Opcode::Fill => {
                expect_operands(instr, 1)?;
                let value = instr.constant.ok_or_else(|| {
                    Error::MalformedInstruction("Fill without a constant".into())
                })?;
                let out = intern(table, arena, &instr.operands[0])?;
                let dtype = arena.get(instr.operands[0].base)?.dtype();
                let in1 = table.intern_const(value, dtype);
                table.record_write(out);
                Tac::binary(TacOp::Generate, TacSub::Fill, out, in1)
            }
            Opcode::Range => {
                expect_operands(instr, 1)?;
                let out = intern(table, arena, &instr.operands[0])?;
                table.record_write(out);
                Tac::unary(TacOp::Generate, TacSub::Range, out)
            }

            Opcode::AddReduce | Opcode::MulReduce | Opcode::MinReduce | Opcode::MaxReduce => {
                expect_operands(instr, 2)?;
                let out = intern(table, arena, &instr.operands[0])?;
                let in1 = intern(table, arena, &instr.operands[1])?;
                let axis = instr.constant.unwrap_or(Const::I64(0));
                let in2 = table.intern_const(Const::I64(axis.as_i64()), ScalarType::I64);
                table.record_write(out);
                table.record_read(in1);
                Tac::ternary(TacOp::Reduce, sweep_sub(instr.opcode), out, in1, in2)
            }

            Opcode::AddScan | Opcode::MulScan => {
                expect_operands(instr, 2)?;
                let out = intern(table, arena, &instr.operands[0])?;
                let in1 = intern(table, arena, &instr.operands[1])?;
                let axis = instr.constant.unwrap_or(Const::I64(0));
                let in2 = table.intern_const(Const::I64(axis.as_i64()), ScalarType::I64);
                table.record_write(out);
                table.record_read(in1);
                Tac::ternary(TacOp::Scan, sweep_sub(instr.opcode), out, in1, in2)
            }

            Opcode::Extension(_) => {
                // Operands are interned so dependencies are visible to the
                // graph; the method itself receives the raw instruction.
                let mut tac = Tac::nullary(TacOp::Extension, TacSub::None);
                for (i, view) in instr.operands.iter().enumerate() {
                    let handle = intern(table, arena, view)?;
                    if i == 0 {
                        table.record_write(handle);
                        tac.out = handle;
                    } else {
                        table.record_read(handle);
                        if tac.in1 == crate::tac::NO_OPERAND {
                            tac.in1 = handle;
                        } else {
                            tac.in2 = handle;
                        }
                    }
                }
                tac.ext = Some(index);
                tac
            }
        };
        program.push(tac);
    }
    trace!(
        ntacs = program.len(),
        nsymbols = table.len(),
        "batch lowered"
    );
    Ok(())
}
