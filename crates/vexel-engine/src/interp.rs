//! Fallback kernel table: direct execution of kernel plans
//!
//! When code generation is disabled, or when an embedder wires in the
//! in-memory loader, blocks execute here instead of in compiled C. The
//! element order and operator semantics mirror the generated loops exactly
//! (row-major logical order, C ternary min/max, `fmod` remainder), so the
//! two paths produce identical buffers for identical inputs.
//!
//! Typed dispatch is a `match` over `ScalarType` onto a generic lane
//! implementation; complex types have no interpreter lanes and are served
//! only by the compiled path.

use crate::error::{EngineError, Result};
use crate::plan::{KernelOperand, KernelPlan, PlanRange, PlanStep};
use vexel_core::{ScalarType, TacOp, TacSub};

/// One interpreter element lane: everything a scalar type must provide
trait Lane: bytemuck::Pod + Copy + Send + Sync + 'static {
    const DTYPE: ScalarType;

    fn from_imm(operand: &KernelOperand) -> Self;
    fn from_index(index: i64) -> Self;
    fn unary(sub: TacSub, a: Self) -> Result<Self>;
    fn binary(sub: TacSub, a: Self, b: Self) -> Result<Self>;
}

macro_rules! unsupported {
    () => {
        return Err(EngineError::TypeNotSupported(Self::DTYPE))
    };
}

macro_rules! int_lane {
    ($ty:ty, $dtype:expr, $abs:expr) => {
        impl Lane for $ty {
            const DTYPE: ScalarType = $dtype;

            fn from_imm(operand: &KernelOperand) -> Self {
                operand.imm_i as $ty
            }

            fn from_index(index: i64) -> Self {
                index as $ty
            }

            fn unary(sub: TacSub, a: Self) -> Result<Self> {
                Ok(match sub {
                    TacSub::Identity => a,
                    TacSub::Neg => a.wrapping_neg(),
                    TacSub::Abs => $abs(a),
                    TacSub::Not => !a,
                    _ => unsupported!(),
                })
            }

            fn binary(sub: TacSub, a: Self, b: Self) -> Result<Self> {
                Ok(match sub {
                    TacSub::Add => a.wrapping_add(b),
                    TacSub::Sub => a.wrapping_sub(b),
                    TacSub::Mul => a.wrapping_mul(b),
                    TacSub::Div => a
                        .checked_div(b)
                        .ok_or_else(|| EngineError::Invariant("integer division by zero".into()))?,
                    TacSub::Mod => a
                        .checked_rem(b)
                        .ok_or_else(|| EngineError::Invariant("integer modulo by zero".into()))?,
                    TacSub::Pow => a.wrapping_pow(b as u32),
                    TacSub::Min => {
                        if a < b {
                            a
                        } else {
                            b
                        }
                    }
                    TacSub::Max => {
                        if a > b {
                            a
                        } else {
                            b
                        }
                    }
                    TacSub::And => a & b,
                    TacSub::Or => a | b,
                    TacSub::Xor => a ^ b,
                    _ => unsupported!(),
                })
            }
        }
    };
}

int_lane!(i8, ScalarType::I8, |a: i8| a.wrapping_abs());
int_lane!(i16, ScalarType::I16, |a: i16| a.wrapping_abs());
int_lane!(i32, ScalarType::I32, |a: i32| a.wrapping_abs());
int_lane!(i64, ScalarType::I64, |a: i64| a.wrapping_abs());
int_lane!(u8, ScalarType::U8, |a: u8| a);
int_lane!(u16, ScalarType::U16, |a: u16| a);
int_lane!(u32, ScalarType::U32, |a: u32| a);
int_lane!(u64, ScalarType::U64, |a: u64| a);

macro_rules! float_lane {
    ($ty:ty, $dtype:expr) => {
        impl Lane for $ty {
            const DTYPE: ScalarType = $dtype;

            fn from_imm(operand: &KernelOperand) -> Self {
                operand.imm_f as $ty
            }

            fn from_index(index: i64) -> Self {
                index as $ty
            }

            fn unary(sub: TacSub, a: Self) -> Result<Self> {
                Ok(match sub {
                    TacSub::Identity => a,
                    TacSub::Neg => -a,
                    TacSub::Abs => a.abs(),
                    TacSub::Exp => a.exp(),
                    TacSub::Log => a.ln(),
                    TacSub::Sqrt => a.sqrt(),
                    TacSub::Sin => a.sin(),
                    TacSub::Cos => a.cos(),
                    TacSub::Tanh => a.tanh(),
                    _ => unsupported!(),
                })
            }

            fn binary(sub: TacSub, a: Self, b: Self) -> Result<Self> {
                Ok(match sub {
                    TacSub::Add => a + b,
                    TacSub::Sub => a - b,
                    TacSub::Mul => a * b,
                    TacSub::Div => a / b,
                    // Same remainder as the generated fmod call
                    TacSub::Mod => a % b,
                    TacSub::Pow => a.powf(b),
                    // C ternary semantics, not IEEE min/max
                    TacSub::Min => {
                        if a < b {
                            a
                        } else {
                            b
                        }
                    }
                    TacSub::Max => {
                        if a > b {
                            a
                        } else {
                            b
                        }
                    }
                    _ => unsupported!(),
                })
            }
        }
    };
}

float_lane!(f32, ScalarType::F32);
float_lane!(f64, ScalarType::F64);

/// Bool lane: stored as one byte, logical rather than bitwise semantics
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct B1(u8);

// One byte, any bit pattern is a valid value
unsafe impl bytemuck::Zeroable for B1 {}
unsafe impl bytemuck::Pod for B1 {}

impl B1 {
    fn truth(self) -> bool {
        self.0 != 0
    }
}

impl Lane for B1 {
    const DTYPE: ScalarType = ScalarType::Bool;

    fn from_imm(operand: &KernelOperand) -> Self {
        B1((operand.imm_i != 0) as u8)
    }

    fn from_index(index: i64) -> Self {
        B1((index != 0) as u8)
    }

    fn unary(sub: TacSub, a: Self) -> Result<Self> {
        Ok(match sub {
            TacSub::Identity => a,
            TacSub::Not => B1(!a.truth() as u8),
            _ => unsupported!(),
        })
    }

    fn binary(sub: TacSub, a: Self, b: Self) -> Result<Self> {
        Ok(match sub {
            TacSub::And => B1((a.truth() && b.truth()) as u8),
            TacSub::Or => B1((a.truth() || b.truth()) as u8),
            TacSub::Xor => B1((a.truth() ^ b.truth()) as u8),
            TacSub::Add => B1((a.truth() || b.truth()) as u8),
            TacSub::Mul => B1((a.truth() && b.truth()) as u8),
            _ => unsupported!(),
        })
    }
}

macro_rules! dispatch_lane {
    ($dtype:expr, $fn:ident($($arg:expr),*)) => {
        match $dtype {
            ScalarType::Bool => $fn::<B1>($($arg),*),
            ScalarType::I8 => $fn::<i8>($($arg),*),
            ScalarType::I16 => $fn::<i16>($($arg),*),
            ScalarType::I32 => $fn::<i32>($($arg),*),
            ScalarType::I64 => $fn::<i64>($($arg),*),
            ScalarType::U8 => $fn::<u8>($($arg),*),
            ScalarType::U16 => $fn::<u16>($($arg),*),
            ScalarType::U32 => $fn::<u32>($($arg),*),
            ScalarType::U64 => $fn::<u64>($($arg),*),
            ScalarType::F32 => $fn::<f32>($($arg),*),
            ScalarType::F64 => $fn::<f64>($($arg),*),
            other @ (ScalarType::C64 | ScalarType::C128) => {
                Err(EngineError::TypeNotSupported(other))
            }
        }
    };
}

/// Shape of an operand as a slice
///
/// # Safety
///
/// `shape` must point at `ndim` valid elements (guaranteed by the argument
/// pack builder for the duration of a launch).
unsafe fn shape_of(operand: &KernelOperand) -> &[i64] {
    std::slice::from_raw_parts(operand.shape, operand.ndim as usize)
}

/// Element offset of logical coordinates under an operand's strides
///
/// Single-element operands broadcast: every coordinate maps to `start`.
unsafe fn elem_offset(operand: &KernelOperand, coords: &[i64]) -> i64 {
    if operand.nelem <= 1 {
        return operand.start;
    }
    let stride = std::slice::from_raw_parts(operand.stride, operand.ndim as usize);
    let mut off = operand.start;
    for (c, s) in coords.iter().zip(stride) {
        off += c * s;
    }
    off
}

/// Decode row-major logical index `k` into `coords` over `shape`
fn decode(mut k: i64, shape: &[i64], coords: &mut [i64]) {
    for d in (0..shape.len()).rev() {
        coords[d] = k % shape[d];
        k /= shape[d];
    }
}

struct Frame<'a, L: Lane> {
    plan: &'a KernelPlan,
    args: &'a mut [KernelOperand],
    /// Register slots for scalar-replaced operands
    scratch: Vec<Option<L>>,
}

impl<'a, L: Lane> Frame<'a, L> {
    fn new(plan: &'a KernelPlan, args: &'a mut [KernelOperand]) -> Self {
        let scratch = vec![None; plan.operands.len()];
        Self { plan, args, scratch }
    }

    unsafe fn read(&self, local: usize, coords: &[i64]) -> Result<L> {
        let meta = &self.plan.operands[local];
        if meta.scalar_replaced {
            return self.scratch[local]
                .ok_or_else(|| EngineError::Invariant(format!("operand {local} read before write")));
        }
        let operand = &self.args[local];
        if meta.immediate {
            return Ok(L::from_imm(operand));
        }
        if operand.data.is_null() {
            return Err(EngineError::Invariant(format!(
                "operand {local} has null data on entry"
            )));
        }
        let off = elem_offset(operand, coords);
        Ok(*(operand.data as *const L).offset(off as isize))
    }

    unsafe fn write(&mut self, local: usize, coords: &[i64], value: L) -> Result<()> {
        let meta = &self.plan.operands[local];
        if meta.scalar_replaced {
            self.scratch[local] = Some(value);
            return Ok(());
        }
        if meta.immediate {
            return Err(EngineError::Invariant(format!(
                "operand {local} is immediate but written"
            )));
        }
        let operand = &self.args[local];
        if operand.data.is_null() {
            return Err(EngineError::Invariant(format!(
                "operand {local} has null data on entry"
            )));
        }
        let off = elem_offset(operand, coords);
        *(operand.data as *mut L).offset(off as isize) = value;
        Ok(())
    }

    unsafe fn step(&mut self, step: &PlanStep, coords: &[i64]) -> Result<()> {
        let value = match step.op {
            TacOp::Map => {
                let a = self.read(step.in1.expect("map input"), coords)?;
                L::unary(step.sub, a)?
            }
            TacOp::Zip => {
                let a = self.read(step.in1.expect("zip lhs"), coords)?;
                let b = self.read(step.in2.expect("zip rhs"), coords)?;
                L::binary(step.sub, a, b)?
            }
            other => {
                return Err(EngineError::Invariant(format!(
                    "{other} inside an elementwise range"
                )))
            }
        };
        self.write(step.out, coords, value)
    }
}

fn run_elementwise<L: Lane>(
    plan: &KernelPlan,
    range: &PlanRange,
    args: &mut [KernelOperand],
) -> Result<()> {
    let iter_local = plan.range_iteration_operand(range);
    let iter = args[iter_local];
    let mut frame = Frame::<L>::new(plan, args);
    let mut coords = vec![0i64; iter.ndim as usize];

    // Safety: descriptors are built from live views and realized buffers
    unsafe {
        let shape = shape_of(&iter).to_vec();
        for k in 0..iter.nelem {
            decode(k, &shape, &mut coords);
            for step in &range.steps {
                frame.step(step, &coords)?;
            }
        }
    }
    Ok(())
}

fn run_generate<L: Lane>(
    plan: &KernelPlan,
    range: &PlanRange,
    args: &mut [KernelOperand],
) -> Result<()> {
    let step = &range.steps[0];
    let out = args[step.out];
    let mut frame = Frame::<L>::new(plan, args);
    let mut coords = vec![0i64; out.ndim as usize];

    // Safety: as in run_elementwise
    unsafe {
        let shape = shape_of(&out).to_vec();
        for k in 0..out.nelem {
            decode(k, &shape, &mut coords);
            let value = match step.sub {
                TacSub::Fill => L::from_imm(&frame.args[step.in1.expect("fill value")]),
                TacSub::Range => L::from_index(k),
                other => {
                    return Err(EngineError::Invariant(format!(
                        "generator {other} has no kernel"
                    )))
                }
            };
            frame.write(step.out, &coords, value)?;
        }
    }
    Ok(())
}

fn run_reduce<L: Lane>(
    plan: &KernelPlan,
    range: &PlanRange,
    args: &mut [KernelOperand],
) -> Result<()> {
    let step = &range.steps[0];
    let input = args[step.in1.expect("reduce input")];
    let axis = args[step.in2.expect("reduce axis")].imm_i;
    let mut frame = Frame::<L>::new(plan, args);

    // Safety: as in run_elementwise
    unsafe {
        let in_shape = shape_of(&input).to_vec();
        let ndim = in_shape.len();
        if axis < 0 || axis as usize >= ndim {
            return Err(EngineError::Invariant(format!("reduction axis {axis} of rank {ndim}")));
        }
        let axis = axis as usize;
        let axis_len = in_shape[axis];

        let out_shape: Vec<i64> = in_shape
            .iter()
            .enumerate()
            .filter(|(d, _)| *d != axis)
            .map(|(_, &s)| s)
            .collect();
        let nout: i64 = out_shape.iter().product::<i64>().max(1);

        let mut out_coords = vec![0i64; out_shape.len()];
        let mut in_coords = vec![0i64; ndim];
        for k in 0..nout {
            decode(k, &out_shape, &mut out_coords);
            // Input coordinates with the axis dimension re-inserted
            for (d, slot) in in_coords.iter_mut().enumerate() {
                *slot = match d.cmp(&axis) {
                    std::cmp::Ordering::Less => out_coords[d],
                    std::cmp::Ordering::Equal => 0,
                    std::cmp::Ordering::Greater => out_coords[d - 1],
                };
            }
            let mut acc = frame.read(step.in1.expect("reduce input"), &in_coords)?;
            for j in 1..axis_len {
                in_coords[axis] = j;
                let v = frame.read(step.in1.expect("reduce input"), &in_coords)?;
                acc = L::binary(step.sub, acc, v)?;
            }
            frame.write(step.out, &out_coords, acc)?;
        }
    }
    Ok(())
}

fn run_scan<L: Lane>(
    plan: &KernelPlan,
    range: &PlanRange,
    args: &mut [KernelOperand],
) -> Result<()> {
    let step = &range.steps[0];
    let input = args[step.in1.expect("scan input")];
    let axis = args[step.in2.expect("scan axis")].imm_i;
    let mut frame = Frame::<L>::new(plan, args);

    // Safety: as in run_elementwise
    unsafe {
        let shape = shape_of(&input).to_vec();
        let ndim = shape.len();
        if axis < 0 || axis as usize >= ndim {
            return Err(EngineError::Invariant(format!("scan axis {axis} of rank {ndim}")));
        }
        let axis = axis as usize;
        let axis_len = shape[axis];

        let line_shape: Vec<i64> = shape
            .iter()
            .enumerate()
            .filter(|(d, _)| *d != axis)
            .map(|(_, &s)| s)
            .collect();
        let nlines: i64 = line_shape.iter().product::<i64>().max(1);

        let mut line_coords = vec![0i64; line_shape.len()];
        let mut coords = vec![0i64; ndim];
        for k in 0..nlines {
            decode(k, &line_shape, &mut line_coords);
            for (d, slot) in coords.iter_mut().enumerate() {
                *slot = match d.cmp(&axis) {
                    std::cmp::Ordering::Less => line_coords[d],
                    std::cmp::Ordering::Equal => 0,
                    std::cmp::Ordering::Greater => line_coords[d - 1],
                };
            }
            let mut acc = frame.read(step.in1.expect("scan input"), &coords)?;
            frame.write(step.out, &coords, acc)?;
            for j in 1..axis_len {
                coords[axis] = j;
                let v = frame.read(step.in1.expect("scan input"), &coords)?;
                acc = L::binary(step.sub, acc, v)?;
                frame.write(step.out, &coords, acc)?;
            }
        }
    }
    Ok(())
}

fn range_dtype(plan: &KernelPlan, range: &PlanRange) -> ScalarType {
    plan.operands[range.steps[0].out].dtype
}

/// Execute every range of a plan against an argument pack.
pub fn run_plan(plan: &KernelPlan, args: &mut [KernelOperand]) -> Result<()> {
    for range in &plan.ranges {
        let dtype = range_dtype(plan, range);
        match range.steps[0].op {
            TacOp::Map | TacOp::Zip => {
                dispatch_lane!(dtype, run_elementwise(plan, range, args))?
            }
            TacOp::Generate => dispatch_lane!(dtype, run_generate(plan, range, args))?,
            TacOp::Reduce => dispatch_lane!(dtype, run_reduce(plan, range, args))?,
            TacOp::Scan => dispatch_lane!(dtype, run_scan(plan, range, args))?,
            other => {
                return Err(EngineError::Invariant(format!(
                    "{other} reached the kernel table"
                )))
            }
        }
    }
    Ok(())
}
