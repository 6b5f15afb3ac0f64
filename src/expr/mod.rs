//! Expression trees for objectives and constraints.
//!
//! Problems arrive as finite trees of [`Expr`] nodes referencing 1-based
//! variable indices. The operator set mirrors the opcode table of the NL
//! format, so a canonicalized tree serializes node-for-node.

use faer::Col;
use problemo::{Problem, common::IntoCommonProblem};

use crate::{E, I};

pub mod convert;
pub mod decompose;
pub mod linearity;

/// Operators understood by the NL format.
///
/// The discriminants below are internal; the wire opcode of each operator
/// is given by [`Op::opcode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Less,
    Min,
    Max,
    Floor,
    Ceil,
    Abs,
    Neg,
    Or,
    And,
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
    Ne,
    Not,
    If,
    Tanh,
    Tan,
    Sqrt,
    Sinh,
    Sin,
    Log10,
    Log,
    Exp,
    Cosh,
    Cos,
    Atanh,
    Atan2,
    Atan,
    Asinh,
    Asin,
    Acosh,
    Acos,
    Sum,
    IntDiv,
}

/// Argument count class of an operator on the NL wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Unary,
    Binary,
    Ternary,
    Nary,
}

impl Op {
    /// The NL opcode written after the `o` tag.
    pub fn opcode(&self) -> u32 {
        match self {
            Op::Add => 0,
            Op::Sub => 1,
            Op::Mul => 2,
            Op::Div => 3,
            Op::Rem => 4,
            Op::Pow => 5,
            Op::Less => 6,
            Op::Min => 11,
            Op::Max => 12,
            Op::Floor => 13,
            Op::Ceil => 14,
            Op::Abs => 15,
            Op::Neg => 16,
            Op::Or => 20,
            Op::And => 21,
            Op::Lt => 22,
            Op::Le => 23,
            Op::Eq => 24,
            Op::Ge => 28,
            Op::Gt => 29,
            Op::Ne => 30,
            Op::Not => 34,
            Op::If => 35,
            Op::Tanh => 37,
            Op::Tan => 38,
            Op::Sqrt => 39,
            Op::Sinh => 40,
            Op::Sin => 41,
            Op::Log10 => 42,
            Op::Log => 43,
            Op::Exp => 44,
            Op::Cosh => 45,
            Op::Cos => 46,
            Op::Atanh => 47,
            Op::Atan2 => 48,
            Op::Atan => 49,
            Op::Asinh => 50,
            Op::Asin => 51,
            Op::Acosh => 52,
            Op::Acos => 53,
            Op::Sum => 54,
            Op::IntDiv => 55,
        }
    }

    /// Argument count the operator takes once canonicalized for the wire.
    pub fn arity(&self) -> Arity {
        match self {
            Op::Floor | Op::Ceil | Op::Abs | Op::Neg | Op::Not => Arity::Unary,
            Op::Tanh | Op::Tan | Op::Sqrt | Op::Sinh | Op::Sin => Arity::Unary,
            Op::Log10 | Op::Log | Op::Exp | Op::Cosh | Op::Cos => Arity::Unary,
            Op::Atanh | Op::Atan | Op::Asinh | Op::Asin | Op::Acosh | Op::Acos => Arity::Unary,
            Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Rem | Op::Pow => Arity::Binary,
            Op::Less | Op::Or | Op::And | Op::Atan2 | Op::IntDiv => Arity::Binary,
            Op::Lt | Op::Le | Op::Eq | Op::Ge | Op::Gt | Op::Ne => Arity::Binary,
            Op::If => Arity::Ternary,
            Op::Min | Op::Max | Op::Sum => Arity::Nary,
        }
    }

    /// N-ary operators are written with an explicit argument count line.
    pub fn is_nary(&self) -> bool {
        self.arity() == Arity::Nary
    }
}

/// A node of an expression tree.
///
/// Trees are finite; sharing is permitted but duplicated subtrees are
/// processed independently. `Var` carries the user-facing 1-based index.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(E),
    Var(I),
    Call(Op, Vec<Expr>),
}

impl Expr {
    /// Whether this node is the scalar zero.
    pub fn is_zero(&self) -> bool {
        matches!(self, Expr::Const(c) if *c == 0.)
    }

    /// Visits every `Var` index in the tree.
    pub(crate) fn for_each_var(&self, f: &mut impl FnMut(I)) {
        match self {
            Expr::Const(_) => {}
            Expr::Var(j) => f(*j),
            Expr::Call(_, args) => {
                for arg in args {
                    arg.for_each_var(f);
                }
            }
        }
    }

    /// Evaluates the tree at the point `x` (indexed by `Var(j) -> x[j - 1]`).
    ///
    /// Comparison and logical operators yield 0/1; `if` selects on a
    /// nonzero condition. Operator arities are tolerated liberally here
    /// (n-ary `+`/`*` evaluate as folds) since evaluation is also used on
    /// trees that have not been canonicalized yet.
    pub fn eval(&self, x: &Col<E>) -> Result<E, Problem> {
        match self {
            Expr::Const(c) => Ok(*c),
            Expr::Var(j) => {
                if *j >= 1 && *j <= x.nrows() {
                    Ok(x[*j - 1])
                } else {
                    Err(format!("variable index {} out of range 1..{}", j, x.nrows()).gloss())
                }
            }
            Expr::Call(op, args) => {
                let vals = args.iter().map(|a| a.eval(x)).collect::<Result<Vec<E>, _>>()?;
                apply(*op, &vals)
            }
        }
    }
}

fn apply(op: Op, vals: &[E]) -> Result<E, Problem> {
    let exact = |n: usize| -> Result<(), Problem> {
        if vals.len() == n {
            Ok(())
        } else {
            Err(format!("operator {:?} applied to {} arguments, expected {}", op, vals.len(), n)
                .gloss())
        }
    };
    let at_least = |n: usize| -> Result<(), Problem> {
        if vals.len() >= n {
            Ok(())
        } else {
            Err(format!(
                "operator {:?} applied to {} arguments, expected at least {}",
                op,
                vals.len(),
                n
            )
            .gloss())
        }
    };
    let truth = |v: E| v != 0.;

    Ok(match op {
        Op::Add | Op::Sum => {
            at_least(1)?;
            vals.iter().sum()
        }
        Op::Sub => match vals {
            [a] => -a,
            [a, b] => a - b,
            _ => {
                exact(2)?;
                unreachable!()
            }
        },
        Op::Mul => {
            at_least(2)?;
            vals.iter().product()
        }
        Op::Div => {
            exact(2)?;
            vals[0] / vals[1]
        }
        Op::Rem => {
            exact(2)?;
            vals[0] % vals[1]
        }
        Op::Pow => {
            exact(2)?;
            vals[0].powf(vals[1])
        }
        Op::Less => {
            exact(2)?;
            (vals[0] - vals[1]).max(0.)
        }
        Op::Min => {
            at_least(1)?;
            vals.iter().copied().fold(E::INFINITY, E::min)
        }
        Op::Max => {
            at_least(1)?;
            vals.iter().copied().fold(E::NEG_INFINITY, E::max)
        }
        Op::Floor => {
            exact(1)?;
            vals[0].floor()
        }
        Op::Ceil => {
            exact(1)?;
            vals[0].ceil()
        }
        Op::Abs => {
            exact(1)?;
            vals[0].abs()
        }
        Op::Neg => {
            exact(1)?;
            -vals[0]
        }
        Op::Or => {
            exact(2)?;
            (truth(vals[0]) || truth(vals[1])) as u8 as E
        }
        Op::And => {
            exact(2)?;
            (truth(vals[0]) && truth(vals[1])) as u8 as E
        }
        Op::Lt => {
            exact(2)?;
            (vals[0] < vals[1]) as u8 as E
        }
        Op::Le => {
            exact(2)?;
            (vals[0] <= vals[1]) as u8 as E
        }
        Op::Eq => {
            exact(2)?;
            (vals[0] == vals[1]) as u8 as E
        }
        Op::Ge => {
            exact(2)?;
            (vals[0] >= vals[1]) as u8 as E
        }
        Op::Gt => {
            exact(2)?;
            (vals[0] > vals[1]) as u8 as E
        }
        Op::Ne => {
            exact(2)?;
            (vals[0] != vals[1]) as u8 as E
        }
        Op::Not => {
            exact(1)?;
            (!truth(vals[0])) as u8 as E
        }
        Op::If => {
            exact(3)?;
            if truth(vals[0]) { vals[1] } else { vals[2] }
        }
        Op::Tanh => {
            exact(1)?;
            vals[0].tanh()
        }
        Op::Tan => {
            exact(1)?;
            vals[0].tan()
        }
        Op::Sqrt => {
            exact(1)?;
            vals[0].sqrt()
        }
        Op::Sinh => {
            exact(1)?;
            vals[0].sinh()
        }
        Op::Sin => {
            exact(1)?;
            vals[0].sin()
        }
        Op::Log10 => {
            exact(1)?;
            vals[0].log10()
        }
        Op::Log => {
            exact(1)?;
            vals[0].ln()
        }
        Op::Exp => {
            exact(1)?;
            vals[0].exp()
        }
        Op::Cosh => {
            exact(1)?;
            vals[0].cosh()
        }
        Op::Cos => {
            exact(1)?;
            vals[0].cos()
        }
        Op::Atanh => {
            exact(1)?;
            vals[0].atanh()
        }
        Op::Atan2 => {
            exact(2)?;
            vals[0].atan2(vals[1])
        }
        Op::Atan => {
            exact(1)?;
            vals[0].atan()
        }
        Op::Asinh => {
            exact(1)?;
            vals[0].asinh()
        }
        Op::Asin => {
            exact(1)?;
            vals[0].asin()
        }
        Op::Acosh => {
            exact(1)?;
            vals[0].acosh()
        }
        Op::Acos => {
            exact(1)?;
            vals[0].acos()
        }
        Op::IntDiv => {
            exact(2)?;
            (vals[0] / vals[1]).trunc()
        }
    })
}
