//! Bottom-up linearity classification of expression trees.

use faer::Col;
use problemo::Problem;

use super::{Expr, Op};
use crate::{E, I};

/// Linearity class of a subtree, ordered `Const < Linear < Nonlinear`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Linearity {
    Const,
    Linear,
    Nonlinear,
}

/// An expression decorated with the computed linearity of every subtree.
///
/// Purely derived from an [`Expr`]; it exists only between analysis and
/// decomposition and is discarded afterwards.
#[derive(Debug, Clone)]
pub struct LinearityExpr {
    pub linearity: Linearity,
    pub node: LinearityNode,
}

#[derive(Debug, Clone)]
pub enum LinearityNode {
    Const(E),
    Var(I),
    Call(Op, Vec<LinearityExpr>),
}

impl LinearityExpr {
    fn tagged(linearity: Linearity, node: LinearityNode) -> Self {
        Self { linearity, node }
    }

    /// Strips the decoration back to a plain expression tree.
    pub fn to_expr(&self) -> Expr {
        match &self.node {
            LinearityNode::Const(c) => Expr::Const(*c),
            LinearityNode::Var(j) => Expr::Var(*j),
            LinearityNode::Call(op, args) => {
                Expr::Call(*op, args.iter().map(LinearityExpr::to_expr).collect())
            }
        }
    }

    /// Evaluates a subtree tagged `Const` (which holds no variables).
    pub(crate) fn eval_const(&self) -> Result<E, Problem> {
        self.to_expr().eval(&Col::<E>::zeros(0))
    }
}

/// Decorates a tree bottom-up with the linearity of each node.
pub fn analyze(expr: &Expr) -> LinearityExpr {
    match expr {
        Expr::Const(c) => LinearityExpr::tagged(Linearity::Const, LinearityNode::Const(*c)),
        Expr::Var(j) => LinearityExpr::tagged(Linearity::Linear, LinearityNode::Var(*j)),
        Expr::Call(op, args) => {
            let children: Vec<LinearityExpr> = args.iter().map(analyze).collect();
            let linearity = combine(*op, &children);
            LinearityExpr::tagged(linearity, LinearityNode::Call(*op, children))
        }
    }
}

fn combine(op: Op, children: &[LinearityExpr]) -> Linearity {
    let max = children
        .iter()
        .map(|c| c.linearity)
        .max()
        .unwrap_or(Linearity::Const);
    match op {
        Op::Add | Op::Sub | Op::Sum | Op::Neg => max,
        Op::Mul => {
            if max == Linearity::Nonlinear {
                return Linearity::Nonlinear;
            }
            // A product stays linear only while at most one factor is.
            match children.iter().filter(|c| c.linearity == Linearity::Linear).count() {
                0 => Linearity::Const,
                1 => Linearity::Linear,
                _ => Linearity::Nonlinear,
            }
        }
        Op::Div => match children {
            [num, den] if den.linearity == Linearity::Const => num.linearity,
            _ if max == Linearity::Const => Linearity::Const,
            _ => Linearity::Nonlinear,
        },
        // Transcendentals, powers, comparisons, conditionals: constant
        // arguments fold, anything else is nonlinear.
        _ => {
            if max == Linearity::Const {
                Linearity::Const
            } else {
                Linearity::Nonlinear
            }
        }
    }
}

/// Collapses every `Const`-tagged call into a single constant node,
/// evaluated at the highest position where the subtree is constant.
pub fn pull_up_constants(le: LinearityExpr) -> Result<LinearityExpr, Problem> {
    if le.linearity == Linearity::Const {
        if let LinearityNode::Call(_, _) = le.node {
            let value = le.eval_const()?;
            return Ok(LinearityExpr::tagged(
                Linearity::Const,
                LinearityNode::Const(value),
            ));
        }
        return Ok(le);
    }
    match le.node {
        LinearityNode::Call(op, args) => {
            let args = args
                .into_iter()
                .map(pull_up_constants)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(LinearityExpr::tagged(le.linearity, LinearityNode::Call(op, args)))
        }
        node => Ok(LinearityExpr::tagged(le.linearity, node)),
    }
}
