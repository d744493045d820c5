//! Data model for the vexel vector engine
//!
//! This crate defines everything the execution engine reasons about,
//! without any execution machinery:
//!
//! - **Bases and views**: owning typed buffers in a handle-indexed arena,
//!   plus shape/stride/offset descriptors over them
//! - **Operands and layouts**: views tagged with access regularity
//! - **Instruction batches**: the IR handed over by the front end
//! - **TAC program**: the flat three-address form of one batch
//! - **Symbol table**: canonicalized operands behind dense handles
//!
//! # Pipeline position
//!
//! ```text
//! front end                    vexel-core                vexel-engine
//! ───────────                  ──────────────            ────────────
//! Batch of Instruction   ──▶   instrs_to_tacs      ──▶   DAG / blocks /
//!   (views over bases)         SymbolTable + Tacs        kernels
//! ```

pub mod base;
pub mod error;
pub mod instr;
pub mod lower;
pub mod operand;
pub mod symbol;
pub mod tac;
pub mod types;
pub mod view;

pub use base::{Base, BaseArena, BaseHandle};
pub use error::{Error, Result};
pub use instr::{Batch, Instruction, Opcode};
pub use lower::instrs_to_tacs;
pub use operand::{Const, Layout, Operand};
pub use symbol::{table_capacity, SymbolTable};
pub use tac::{Tac, TacOp, TacSub, NO_OPERAND};
pub use types::ScalarType;
pub use view::View;
