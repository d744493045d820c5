//! Operands and access layouts
//!
//! An operand is a view plus the layout tag the specializer will pick a
//! template for, or an immediate constant. Layout tags are ordered from
//! least to most general; the fuser takes the maximum over a fuse range to
//! pick the least-specialized loop that can serve every member.

use crate::types::ScalarType;
use crate::view::View;
use std::fmt;

/// Access regularity of an operand, least to most general
///
/// The derived `Ord` follows declaration order; the fuser relies on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Layout {
    /// 0-d or single-element view
    Scalar,
    /// Immediate constant
    Constant,
    /// Unit-stride row-major
    Contiguous,
    /// Anything else expressible with strides
    Strided,
    /// Reserved for gather/scatter extensions
    Sparse,
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Layout::Scalar => "K",
            Layout::Constant => "C",
            Layout::Contiguous => "D",
            Layout::Strided => "S",
            Layout::Sparse => "P",
        };
        f.write_str(s)
    }
}

impl Layout {
    /// Infer the layout of an array view.
    ///
    /// Tie-break: a single-element view is Scalar even when it is also
    /// unit-stride; otherwise the lowest tag preserving semantics wins.
    pub fn of_view(view: &View) -> Layout {
        if view.nelem() <= 1 {
            Layout::Scalar
        } else if view.is_contiguous() {
            Layout::Contiguous
        } else {
            Layout::Strided
        }
    }
}

/// Immediate constant value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Const {
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
}

impl Const {
    pub fn as_f64(self) -> f64 {
        match self {
            Const::Bool(v) => v as u8 as f64,
            Const::I64(v) => v as f64,
            Const::U64(v) => v as f64,
            Const::F64(v) => v,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Const::Bool(v) => v as i64,
            Const::I64(v) => v,
            Const::U64(v) => v as i64,
            Const::F64(v) => v as i64,
        }
    }
}

/// One symbol-table entry: an array view or an immediate
#[derive(Debug, Clone)]
pub enum Operand {
    Array {
        view: View,
        dtype: ScalarType,
        layout: Layout,
    },
    Immediate {
        value: Const,
        dtype: ScalarType,
    },
}

impl Operand {
    pub fn array(view: View, dtype: ScalarType) -> Self {
        let layout = Layout::of_view(&view);
        Operand::Array { view, dtype, layout }
    }

    pub fn immediate(value: Const, dtype: ScalarType) -> Self {
        Operand::Immediate { value, dtype }
    }

    pub fn dtype(&self) -> ScalarType {
        match self {
            Operand::Array { dtype, .. } | Operand::Immediate { dtype, .. } => *dtype,
        }
    }

    pub fn layout(&self) -> Layout {
        match self {
            Operand::Array { layout, .. } => *layout,
            Operand::Immediate { .. } => Layout::Constant,
        }
    }

    pub fn view(&self) -> Option<&View> {
        match self {
            Operand::Array { view, .. } => Some(view),
            Operand::Immediate { .. } => None,
        }
    }

    pub fn ndim(&self) -> usize {
        self.view().map_or(0, View::ndim)
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Operand::Immediate { .. })
    }
}
