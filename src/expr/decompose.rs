//! Splitting an expression into a linear coefficient map, an extracted
//! constant, and a residual nonlinear tree.

use std::collections::{BTreeMap, BTreeSet};

use problemo::{Problem, common::IntoCommonProblem};

use super::linearity::{Linearity, LinearityExpr, LinearityNode, analyze, pull_up_constants};
use super::{Expr, Op};
use crate::{E, I};

/// Coefficients of the linear part, keyed by user variable index.
///
/// A zero coefficient survives only while the variable also appears in the
/// residual tree, so the NL writer still lists the variable as present.
pub type LinearMap = BTreeMap<I, E>;

/// Result of decomposing one expression.
#[derive(Debug)]
pub struct Decomposition {
    /// Residual nonlinear tree; the scalar zero when everything was extracted.
    pub residual: Expr,
    /// Constant pulled out of the expression.
    pub constant: E,
    /// `Nonlinear` iff the residual is not the scalar zero.
    pub linearity: Linearity,
    /// Variables occurring in the residual.
    pub nonlinear_vars: BTreeSet<I>,
}

/// Decomposes `expr`, accumulating linear coefficients into `lin`.
///
/// For every assignment `x` the identity
/// `eval(expr, x) == eval(residual, x) + constant + sum_j lin[j] * x[j]`
/// holds up to floating-point rounding.
pub fn process_expression(expr: &Expr, lin: &mut LinearMap) -> Result<Decomposition, Problem> {
    // Every variable the expression mentions gets a row in the linear map;
    // entries still at zero that never show up in the residual are dropped
    // again below.
    expr.for_each_var(&mut |j| {
        lin.entry(j).or_insert(0.);
    });

    let tagged = pull_up_constants(analyze(expr))?;

    let mut constant = 0.;
    let residual = match prune(tagged, lin, &mut constant, 1.)? {
        Some(rest) => rest.to_expr(),
        None => Expr::Const(0.),
    };

    let mut nonlinear_vars = BTreeSet::new();
    residual.for_each_var(&mut |j| {
        nonlinear_vars.insert(j);
    });

    lin.retain(|j, c| *c != 0. || nonlinear_vars.contains(j));

    let linearity = if residual.is_zero() {
        Linearity::Linear
    } else {
        Linearity::Nonlinear
    };

    Ok(Decomposition {
        residual,
        constant,
        linearity,
        nonlinear_vars,
    })
}

/// Removes Linear/Const subtrees reachable through additive structure,
/// folding them into `lin` and `constant`. Returns the surviving residual,
/// or `None` when the whole subtree was extracted. `sign` is the additive
/// context (`1` or `-1`).
fn prune(
    le: LinearityExpr,
    lin: &mut LinearMap,
    constant: &mut E,
    sign: E,
) -> Result<Option<LinearityExpr>, Problem> {
    if le.linearity != Linearity::Nonlinear {
        accumulate_linear(&le, lin, constant, sign)?;
        return Ok(None);
    }
    match le.node {
        LinearityNode::Call(op @ (Op::Add | Op::Sum), args) => {
            let mut kept = Vec::with_capacity(args.len());
            for arg in args {
                if let Some(k) = prune(arg, lin, constant, sign)? {
                    kept.push(k);
                }
            }
            // The node is nonlinear, so at least one child survives.
            Ok(Some(match kept.len() {
                1 => kept.pop().expect("nonempty"),
                _ => LinearityExpr {
                    linearity: Linearity::Nonlinear,
                    node: LinearityNode::Call(op, kept),
                },
            }))
        }
        LinearityNode::Call(Op::Sub | Op::Neg, mut args) if args.len() == 1 => {
            Ok(prune(args.pop().expect("nonempty"), lin, constant, -sign)?.map(negated))
        }
        LinearityNode::Call(Op::Sub, mut args) if args.len() == 2 => {
            let b = args.pop().expect("nonempty");
            let a = args.pop().expect("nonempty");
            let a = prune(a, lin, constant, sign)?;
            let b = prune(b, lin, constant, -sign)?;
            Ok(match (a, b) {
                (Some(a), Some(b)) => Some(LinearityExpr {
                    linearity: Linearity::Nonlinear,
                    node: LinearityNode::Call(Op::Sub, vec![a, b]),
                }),
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(negated(b)),
                (None, None) => None,
            })
        }
        node => Ok(Some(LinearityExpr {
            linearity: Linearity::Nonlinear,
            node,
        })),
    }
}

fn negated(le: LinearityExpr) -> LinearityExpr {
    LinearityExpr {
        linearity: le.linearity,
        node: LinearityNode::Call(Op::Neg, vec![le]),
    }
}

/// Folds an entire Linear/Const subtree into the coefficient map and the
/// constant, propagating a scalar multiplier through products, quotients
/// and signs. Handles any shape the analyzer can tag as non-nonlinear
/// (`c`, `x`, `c*x`, `c*(x+y)`, `(x-y)/c`, nested signs, ...).
fn accumulate_linear(
    le: &LinearityExpr,
    lin: &mut LinearMap,
    constant: &mut E,
    mult: E,
) -> Result<(), Problem> {
    match &le.node {
        LinearityNode::Const(c) => {
            *constant += mult * c;
        }
        LinearityNode::Var(j) => {
            *lin.entry(*j).or_insert(0.) += mult;
        }
        LinearityNode::Call(Op::Add | Op::Sum, args) => {
            for arg in args {
                accumulate_linear(arg, lin, constant, mult)?;
            }
        }
        LinearityNode::Call(Op::Sub | Op::Neg, args) if args.len() == 1 => {
            accumulate_linear(&args[0], lin, constant, -mult)?;
        }
        LinearityNode::Call(Op::Sub, args) if args.len() == 2 => {
            accumulate_linear(&args[0], lin, constant, mult)?;
            accumulate_linear(&args[1], lin, constant, -mult)?;
        }
        LinearityNode::Call(Op::Mul, args) => {
            let mut scale = mult;
            let mut variable_factor = None;
            for arg in args {
                if arg.linearity == Linearity::Const {
                    scale *= arg.eval_const()?;
                } else if variable_factor.is_none() {
                    variable_factor = Some(arg);
                } else {
                    return Err("product with two non-constant factors is not linear".gloss());
                }
            }
            match variable_factor {
                Some(arg) => accumulate_linear(arg, lin, constant, scale)?,
                None => *constant += scale,
            }
        }
        LinearityNode::Call(Op::Div, args) if args.len() == 2 => {
            let den = args[1].eval_const()?;
            accumulate_linear(&args[0], lin, constant, mult / den)?;
        }
        _ => {
            // Anything else that reaches here must have folded to a
            // constant already (pull-up runs first).
            if le.linearity == Linearity::Const {
                *constant += mult * le.eval_const()?;
            } else {
                return Err("unexpected operator in linear subtree".gloss());
            }
        }
    }
    Ok(())
}
