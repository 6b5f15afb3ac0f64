//! Canonicalization of residual trees into the shapes the NL wire accepts.

use problemo::{Problem, common::IntoCommonProblem};

use super::{Arity, Expr, Op};

/// Rewrites an expression into NL-compatible operator shapes:
///
/// - unary `-x` becomes `neg(x)`;
/// - n-ary `+` with more than two children becomes `sum(...)`, a single
///   child collapses to that child;
/// - n-ary `*` folds into nested binary products;
/// - every other operator keeps its shape, with its arity validated
///   against the opcode table.
pub fn convert_formula(expr: Expr) -> Result<Expr, Problem> {
    match expr {
        Expr::Const(_) | Expr::Var(_) => Ok(expr),
        Expr::Call(op, args) => {
            let mut args = args
                .into_iter()
                .map(convert_formula)
                .collect::<Result<Vec<_>, _>>()?;
            match op {
                Op::Add => match args.len() {
                    0 => Err("addition with no operands".gloss()),
                    1 => Ok(args.pop().expect("nonempty")),
                    2 => Ok(Expr::Call(Op::Add, args)),
                    _ => Ok(Expr::Call(Op::Sum, args)),
                },
                Op::Sub => match args.len() {
                    1 => Ok(Expr::Call(Op::Neg, args)),
                    2 => Ok(Expr::Call(Op::Sub, args)),
                    n => Err(format!("subtraction with {} operands", n).gloss()),
                },
                Op::Mul => match args.len() {
                    0 => Err("product with no operands".gloss()),
                    1 => Ok(args.pop().expect("nonempty")),
                    _ => Ok(args
                        .into_iter()
                        .reduce(|acc, rhs| Expr::Call(Op::Mul, vec![acc, rhs]))
                        .expect("nonempty")),
                },
                _ => {
                    let ok = match op.arity() {
                        Arity::Unary => args.len() == 1,
                        Arity::Binary => args.len() == 2,
                        Arity::Ternary => args.len() == 3,
                        Arity::Nary => !args.is_empty(),
                    };
                    if !ok {
                        return Err(format!(
                            "operator {:?} applied to {} arguments",
                            op,
                            args.len()
                        )
                        .gloss());
                    }
                    Ok(Expr::Call(op, args))
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wide_additions_become_sums() {
        let expr = Expr::Call(Op::Add, vec![Expr::Var(1), Expr::Var(2), Expr::Var(3)]);
        assert_eq!(
            convert_formula(expr).unwrap(),
            Expr::Call(Op::Sum, vec![Expr::Var(1), Expr::Var(2), Expr::Var(3)])
        );

        let pair = Expr::Call(Op::Add, vec![Expr::Var(1), Expr::Var(2)]);
        assert_eq!(convert_formula(pair.clone()).unwrap(), pair);
    }

    #[test]
    fn unary_minus_becomes_neg() {
        let expr = Expr::Call(Op::Sub, vec![Expr::Var(1)]);
        assert_eq!(
            convert_formula(expr).unwrap(),
            Expr::Call(Op::Neg, vec![Expr::Var(1)])
        );
    }

    #[test]
    fn wide_products_fold_to_binary() {
        let expr = Expr::Call(Op::Mul, vec![Expr::Var(1), Expr::Var(2), Expr::Var(3)]);
        assert_eq!(
            convert_formula(expr).unwrap(),
            Expr::Call(
                Op::Mul,
                vec![
                    Expr::Call(Op::Mul, vec![Expr::Var(1), Expr::Var(2)]),
                    Expr::Var(3)
                ]
            )
        );
    }

    #[test]
    fn arity_violations_are_rejected() {
        let expr = Expr::Call(Op::Div, vec![Expr::Var(1)]);
        assert!(convert_formula(expr).is_err());

        let expr = Expr::Call(Op::Exp, vec![Expr::Var(1), Expr::Var(2)]);
        assert!(convert_formula(expr).is_err());
    }
}
