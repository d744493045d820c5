//! Specializer: kernel plans to C source
//!
//! Renders a self-contained C99 translation unit for one plan: the operand
//! descriptor struct and trampoline come from the skeleton template in
//! `template_directory`, the loop nests are generated per range. All
//! substitutions are structural (dtype, layout, rank, op names, scalar
//! replacement), so identical fingerprints yield byte-identical source.
//!
//! Emitted shapes per range:
//! - fused MAP/ZIP, dense operands: one flat loop, OpenMP-parallel
//! - fused MAP/ZIP, strided operands: a rank-deep nest with per-operand
//!   stride arithmetic
//! - GENERATE/REDUCE/SCAN: a generic nest that decodes logical indices at
//!   run time (extents and the sweep axis are launch arguments, not part
//!   of the structure)

use crate::error::{EngineError, Result};
use crate::plan::{KernelPlan, PlanRange, PlanStep};
use std::fmt::Write as _;
use std::path::PathBuf;
use vexel_core::{Layout, ScalarType, TacOp, TacSub};

/// Maximum view rank the generic nests decode into
const MAX_RANK: usize = 16;

const SKELETON: &str = "kernel.c.tpl";

pub struct Specializer {
    template_dir: PathBuf,
}

impl Specializer {
    pub fn new(template_dir: impl Into<PathBuf>) -> Self {
        Self {
            template_dir: template_dir.into(),
        }
    }

    pub fn template_dir(&self) -> &std::path::Path {
        &self.template_dir
    }

    /// Render the full translation unit for `plan`.
    pub fn specialize(&self, plan: &KernelPlan, symbol: &str) -> Result<String> {
        let path = self.template_dir.join(SKELETON);
        let skeleton = std::fs::read_to_string(&path).map_err(|e| {
            EngineError::Template(format!("cannot read {}: {e}", path.display()))
        })?;
        if !skeleton.contains("{{BODY}}") {
            return Err(EngineError::Template(format!(
                "{} has no {{{{BODY}}}} placeholder",
                path.display()
            )));
        }

        let body = render_body(plan)?;
        Ok(skeleton
            .replace("{{SYMBOL}}", symbol)
            .replace("{{BODY}}", body.trim_end()))
    }
}

fn c_type(dtype: ScalarType) -> &'static str {
    dtype.c_name()
}

/// Reference to operand `k`'s element under the access context
#[derive(Clone, Copy)]
enum Ctx<'a> {
    /// Flat loop variable `i`
    Flat,
    /// Nested loop variables `i0..i{rank-1}`
    Nested(usize),
    /// Verbatim index expression
    Index(&'a str),
}

fn operand_ref(plan: &KernelPlan, k: usize, ctx: Ctx<'_>) -> String {
    let meta = &plan.operands[k];
    if meta.immediate {
        return format!("c{k}");
    }
    if meta.scalar_replaced {
        return format!("r{k}");
    }
    if meta.layout == Layout::Scalar {
        return format!("a{k}[opr[{k}].start]");
    }
    match ctx {
        Ctx::Flat => format!("a{k}[opr[{k}].start + i]"),
        Ctx::Nested(rank) => {
            let mut idx = format!("opr[{k}].start");
            for d in 0..rank {
                let _ = write!(idx, " + i{d}*opr[{k}].stride[{d}]");
            }
            format!("a{k}[{idx}]")
        }
        Ctx::Index(expr) => format!("a{k}[{expr}]"),
    }
}

fn unary_expr(sub: TacSub, dtype: ScalarType, x: &str) -> Result<String> {
    use ScalarType as S;
    let call = |f32name: &str, f64name: &str, c64name: &str, c128name: &str| match dtype {
        S::F32 => Ok(format!("{f32name}({x})")),
        S::F64 => Ok(format!("{f64name}({x})")),
        S::C64 => Ok(format!("{c64name}({x})")),
        S::C128 => Ok(format!("{c128name}({x})")),
        other => Err(EngineError::TypeNotSupported(other)),
    };
    match sub {
        TacSub::Identity => Ok(x.to_string()),
        TacSub::Neg => Ok(format!("-({x})")),
        TacSub::Abs => match dtype {
            S::F32 => Ok(format!("fabsf({x})")),
            S::F64 => Ok(format!("fabs({x})")),
            S::I64 => Ok(format!("llabs({x})")),
            S::I8 | S::I16 | S::I32 => Ok(format!("({}) (({x}) < 0 ? -({x}) : ({x}))", c_type(dtype))),
            S::U8 | S::U16 | S::U32 | S::U64 | S::Bool => Ok(x.to_string()),
            other => Err(EngineError::TypeNotSupported(other)),
        },
        TacSub::Not => match dtype {
            S::Bool => Ok(format!("!({x})")),
            d if d.is_integer() => Ok(format!("~({x})")),
            other => Err(EngineError::TypeNotSupported(other)),
        },
        TacSub::Exp => call("expf", "exp", "cexpf", "cexp"),
        TacSub::Log => call("logf", "log", "clogf", "clog"),
        TacSub::Sqrt => call("sqrtf", "sqrt", "csqrtf", "csqrt"),
        TacSub::Sin => call("sinf", "sin", "csinf", "csin"),
        TacSub::Cos => call("cosf", "cos", "ccosf", "ccos"),
        TacSub::Tanh => call("tanhf", "tanh", "ctanhf", "ctanh"),
        other => Err(EngineError::Invariant(format!("{other} is not unary"))),
    }
}

fn binary_expr(sub: TacSub, dtype: ScalarType, x: &str, y: &str) -> Result<String> {
    use ScalarType as S;
    if dtype == S::Bool {
        return match sub {
            TacSub::And | TacSub::Mul => Ok(format!("(({x}) && ({y}))")),
            TacSub::Or | TacSub::Add => Ok(format!("(({x}) || ({y}))")),
            TacSub::Xor => Ok(format!("((!!({x})) ^ (!!({y})))")),
            other => Err(EngineError::Invariant(format!("{other} has no bool kernel"))),
        };
    }
    match sub {
        TacSub::Add => Ok(format!("({x}) + ({y})")),
        TacSub::Sub => Ok(format!("({x}) - ({y})")),
        TacSub::Mul => Ok(format!("({x}) * ({y})")),
        TacSub::Div => Ok(format!("({x}) / ({y})")),
        TacSub::Mod => match dtype {
            S::F32 => Ok(format!("fmodf({x}, {y})")),
            S::F64 => Ok(format!("fmod({x}, {y})")),
            d if d.is_integer() => Ok(format!("({x}) % ({y})")),
            other => Err(EngineError::TypeNotSupported(other)),
        },
        TacSub::Pow => match dtype {
            S::F32 => Ok(format!("powf({x}, {y})")),
            S::F64 => Ok(format!("pow({x}, {y})")),
            S::C64 => Ok(format!("cpowf({x}, {y})")),
            S::C128 => Ok(format!("cpow({x}, {y})")),
            d if d.is_integer() => Ok(format!("({}) pow((double)({x}), (double)({y}))", c_type(dtype))),
            other => Err(EngineError::TypeNotSupported(other)),
        },
        TacSub::Min => Ok(format!("(({x}) < ({y}) ? ({x}) : ({y}))")),
        TacSub::Max => Ok(format!("(({x}) > ({y}) ? ({x}) : ({y}))")),
        TacSub::And => Ok(format!("({x}) & ({y})")),
        TacSub::Or => Ok(format!("({x}) | ({y})")),
        TacSub::Xor => Ok(format!("({x}) ^ ({y})")),
        other => Err(EngineError::Invariant(format!("{other} is not binary"))),
    }
}

fn step_stmt(plan: &KernelPlan, step: &PlanStep, ctx: Ctx<'_>) -> Result<String> {
    let dtype = plan.operands[step.out].dtype;
    let value = match step.op {
        TacOp::Map => {
            let x = operand_ref(plan, step.in1.expect("map input"), ctx);
            unary_expr(step.sub, dtype, &x)?
        }
        TacOp::Zip => {
            let x = operand_ref(plan, step.in1.expect("zip lhs"), ctx);
            let y = operand_ref(plan, step.in2.expect("zip rhs"), ctx);
            binary_expr(step.sub, dtype, &x, &y)?
        }
        other => {
            return Err(EngineError::Invariant(format!(
                "{other} in an elementwise range"
            )))
        }
    };
    Ok(format!("{} = {};", operand_ref(plan, step.out, ctx), value))
}

/// Declarations of scalar-replacement registers used by a range
fn scalar_decls(plan: &KernelPlan, range: &PlanRange, indent: &str) -> String {
    let mut seen = std::collections::BTreeSet::new();
    for step in &range.steps {
        for local in [Some(step.out), step.in1, step.in2].into_iter().flatten() {
            if plan.operands[local].scalar_replaced {
                seen.insert(local);
            }
        }
    }
    let mut out = String::new();
    for local in seen {
        let _ = writeln!(
            out,
            "{indent}{} r{local};",
            c_type(plan.operands[local].dtype)
        );
    }
    out
}

fn render_elementwise(plan: &KernelPlan, range: &PlanRange, out: &mut String) -> Result<()> {
    let it = plan.range_iteration_operand(range);
    let dense = range.layout <= Layout::Contiguous;

    if dense {
        let _ = writeln!(out, "    {{");
        let _ = writeln!(out, "        const int64_t n = opr[{it}].nelem;");
        let _ = writeln!(out, "        #pragma omp parallel for");
        let _ = writeln!(out, "        for (int64_t i = 0; i < n; ++i) {{");
        out.push_str(&scalar_decls(plan, range, "            "));
        for step in &range.steps {
            let _ = writeln!(out, "            {}", step_stmt(plan, step, Ctx::Flat)?);
        }
        let _ = writeln!(out, "        }}");
        let _ = writeln!(out, "    }}");
        return Ok(());
    }

    let rank = plan.operands[it].ndim.max(1);
    let _ = writeln!(out, "    {{");
    let _ = writeln!(out, "        #pragma omp parallel for");
    for d in 0..rank {
        let indent = "        ".to_string() + &"    ".repeat(d);
        let _ = writeln!(
            out,
            "{indent}for (int64_t i{d} = 0; i{d} < opr[{it}].shape[{d}]; ++i{d}) {{"
        );
    }
    let body_indent = "        ".to_string() + &"    ".repeat(rank);
    out.push_str(&scalar_decls(plan, range, &body_indent));
    for step in &range.steps {
        let _ = writeln!(
            out,
            "{body_indent}{}",
            step_stmt(plan, step, Ctx::Nested(rank))?
        );
    }
    for d in (0..rank).rev() {
        let indent = "        ".to_string() + &"    ".repeat(d);
        let _ = writeln!(out, "{indent}}}");
    }
    let _ = writeln!(out, "    }}");
    Ok(())
}

fn render_generate(plan: &KernelPlan, range: &PlanRange, out: &mut String) -> Result<()> {
    let step = &range.steps[0];
    let k = step.out;
    let dtype = plan.operands[k].dtype;

    let value = match step.sub {
        TacSub::Fill => operand_ref(plan, step.in1.expect("fill value"), Ctx::Flat),
        TacSub::Range => format!("({}) i", c_type(dtype)),
        other => {
            return Err(EngineError::Invariant(format!(
                "generator {other} has no template"
            )))
        }
    };

    let _ = writeln!(out, "    {{");
    let _ = writeln!(out, "        const int64_t n = opr[{k}].nelem;");
    if plan.operands[k].layout <= Layout::Contiguous {
        let _ = writeln!(out, "        #pragma omp parallel for");
        let _ = writeln!(out, "        for (int64_t i = 0; i < n; ++i) {{");
        let _ = writeln!(
            out,
            "            {} = {value};",
            operand_ref(plan, k, Ctx::Flat)
        );
        let _ = writeln!(out, "        }}");
    } else {
        // Strided output: decode the logical index against the shape
        let _ = writeln!(out, "        const int64_t nd = opr[{k}].ndim;");
        let _ = writeln!(out, "        #pragma omp parallel for");
        let _ = writeln!(out, "        for (int64_t i = 0; i < n; ++i) {{");
        let _ = writeln!(out, "            int64_t coord[{MAX_RANK}];");
        let _ = writeln!(out, "            int64_t rem = i;");
        let _ = writeln!(out, "            for (int64_t d = nd - 1; d >= 0; --d) {{");
        let _ = writeln!(out, "                coord[d] = rem % opr[{k}].shape[d];");
        let _ = writeln!(out, "                rem /= opr[{k}].shape[d];");
        let _ = writeln!(out, "            }}");
        let _ = writeln!(out, "            int64_t off = opr[{k}].start;");
        let _ = writeln!(
            out,
            "            for (int64_t d = 0; d < nd; ++d) off += coord[d] * opr[{k}].stride[d];"
        );
        let _ = writeln!(
            out,
            "            {} = {value};",
            operand_ref(plan, k, Ctx::Index("off"))
        );
        let _ = writeln!(out, "        }}");
    }
    let _ = writeln!(out, "    }}");
    Ok(())
}

fn render_reduce(plan: &KernelPlan, range: &PlanRange, out: &mut String) -> Result<()> {
    let step = &range.steps[0];
    let (ko, ki, ka) = (
        step.out,
        step.in1.expect("reduce input"),
        step.in2.expect("reduce axis"),
    );
    let dtype = plan.operands[ko].dtype;
    let fold = binary_expr(step.sub, dtype, "acc", "v")?;

    let _ = writeln!(out, "    {{");
    let _ = writeln!(out, "        const int64_t axis = opr[{ka}].imm_i;");
    let _ = writeln!(out, "        const int64_t nd   = opr[{ki}].ndim;");
    let _ = writeln!(out, "        const int64_t alen = opr[{ki}].shape[axis];");
    let _ = writeln!(out, "        const int64_t nout = opr[{ko}].nelem;");
    let _ = writeln!(out, "        #pragma omp parallel for");
    let _ = writeln!(out, "        for (int64_t o = 0; o < nout; ++o) {{");
    let _ = writeln!(out, "            int64_t coord[{MAX_RANK}];");
    let _ = writeln!(out, "            int64_t rem = o;");
    let _ = writeln!(out, "            for (int64_t d = nd - 1; d >= 0; --d) {{");
    let _ = writeln!(out, "                if (d == axis) {{ coord[d] = 0; continue; }}");
    let _ = writeln!(out, "                coord[d] = rem % opr[{ki}].shape[d];");
    let _ = writeln!(out, "                rem /= opr[{ki}].shape[d];");
    let _ = writeln!(out, "            }}");
    let _ = writeln!(out, "            int64_t in_off = opr[{ki}].start;");
    let _ = writeln!(
        out,
        "            for (int64_t d = 0; d < nd; ++d) in_off += coord[d] * opr[{ki}].stride[d];"
    );
    let _ = writeln!(out, "            int64_t out_off = opr[{ko}].start;");
    let _ = writeln!(out, "            if (opr[{ko}].nelem > 1) {{");
    let _ = writeln!(out, "                int64_t od = 0;");
    let _ = writeln!(out, "                for (int64_t d = 0; d < nd; ++d) {{");
    let _ = writeln!(out, "                    if (d == axis) continue;");
    let _ = writeln!(
        out,
        "                    out_off += coord[d] * opr[{ko}].stride[od]; ++od;"
    );
    let _ = writeln!(out, "                }}");
    let _ = writeln!(out, "            }}");
    let _ = writeln!(out, "            {} acc = a{ki}[in_off];", c_type(dtype));
    let _ = writeln!(out, "            for (int64_t j = 1; j < alen; ++j) {{");
    let _ = writeln!(out, "                in_off += opr[{ki}].stride[axis];");
    let _ = writeln!(out, "                const {} v = a{ki}[in_off];", c_type(dtype));
    let _ = writeln!(out, "                acc = {fold};");
    let _ = writeln!(out, "            }}");
    let _ = writeln!(out, "            a{ko}[out_off] = acc;");
    let _ = writeln!(out, "        }}");
    let _ = writeln!(out, "    }}");
    Ok(())
}

fn render_scan(plan: &KernelPlan, range: &PlanRange, out: &mut String) -> Result<()> {
    let step = &range.steps[0];
    let (ko, ki, ka) = (
        step.out,
        step.in1.expect("scan input"),
        step.in2.expect("scan axis"),
    );
    let dtype = plan.operands[ko].dtype;
    let fold = binary_expr(step.sub, dtype, "acc", "v")?;

    let _ = writeln!(out, "    {{");
    let _ = writeln!(out, "        const int64_t axis   = opr[{ka}].imm_i;");
    let _ = writeln!(out, "        const int64_t nd     = opr[{ki}].ndim;");
    let _ = writeln!(out, "        const int64_t alen   = opr[{ki}].shape[axis];");
    let _ = writeln!(out, "        const int64_t nlines = opr[{ki}].nelem / alen;");
    let _ = writeln!(out, "        #pragma omp parallel for");
    let _ = writeln!(out, "        for (int64_t l = 0; l < nlines; ++l) {{");
    let _ = writeln!(out, "            int64_t coord[{MAX_RANK}];");
    let _ = writeln!(out, "            int64_t rem = l;");
    let _ = writeln!(out, "            for (int64_t d = nd - 1; d >= 0; --d) {{");
    let _ = writeln!(out, "                if (d == axis) {{ coord[d] = 0; continue; }}");
    let _ = writeln!(out, "                coord[d] = rem % opr[{ki}].shape[d];");
    let _ = writeln!(out, "                rem /= opr[{ki}].shape[d];");
    let _ = writeln!(out, "            }}");
    let _ = writeln!(out, "            int64_t in_off  = opr[{ki}].start;");
    let _ = writeln!(out, "            int64_t out_off = opr[{ko}].start;");
    let _ = writeln!(out, "            for (int64_t d = 0; d < nd; ++d) {{");
    let _ = writeln!(out, "                in_off  += coord[d] * opr[{ki}].stride[d];");
    let _ = writeln!(out, "                out_off += coord[d] * opr[{ko}].stride[d];");
    let _ = writeln!(out, "            }}");
    let _ = writeln!(out, "            {} acc = a{ki}[in_off];", c_type(dtype));
    let _ = writeln!(out, "            a{ko}[out_off] = acc;");
    let _ = writeln!(out, "            for (int64_t j = 1; j < alen; ++j) {{");
    let _ = writeln!(out, "                in_off  += opr[{ki}].stride[axis];");
    let _ = writeln!(out, "                out_off += opr[{ko}].stride[axis];");
    let _ = writeln!(out, "                const {} v = a{ki}[in_off];", c_type(dtype));
    let _ = writeln!(out, "                acc = {fold};");
    let _ = writeln!(out, "                a{ko}[out_off] = acc;");
    let _ = writeln!(out, "            }}");
    let _ = writeln!(out, "        }}");
    let _ = writeln!(out, "    }}");
    Ok(())
}

fn render_body(plan: &KernelPlan) -> Result<String> {
    let mut body = String::new();

    // Operand bindings: element pointers for arrays, typed constants for
    // immediates. Scalar-replaced operands become per-iteration registers
    // declared inside their range's loop.
    for (k, meta) in plan.operands.iter().enumerate() {
        if meta.scalar_replaced {
            continue;
        }
        let ty = c_type(meta.dtype);
        if meta.immediate {
            let imm = if meta.dtype.is_integer() || meta.dtype == ScalarType::Bool {
                format!("({ty})opr[{k}].imm_i")
            } else {
                format!("({ty})opr[{k}].imm_f")
            };
            let _ = writeln!(body, "    const {ty} c{k} = {imm};");
        } else {
            let _ = writeln!(body, "    {ty}* a{k} = ({ty}*)opr[{k}].data;");
        }
    }
    body.push('\n');

    for range in &plan.ranges {
        match range.steps[0].op {
            TacOp::Map | TacOp::Zip => render_elementwise(plan, range, &mut body)?,
            TacOp::Generate => render_generate(plan, range, &mut body)?,
            TacOp::Reduce => render_reduce(plan, range, &mut body)?,
            TacOp::Scan => render_scan(plan, range, &mut body)?,
            other => {
                return Err(EngineError::Invariant(format!(
                    "{other} reached the specializer"
                )))
            }
        }
    }
    Ok(body)
}
