//! Serialization of a finalized [`Model`] into the text NL format.
//!
//! The segment layout and opcodes follow the format consumed by the AMPL
//! solver library: a ten-line `g` header, then `C`/`O`/`d`/`x`/`r`/`b`/`k`/
//! `J`/`G` segments, expressions in prefix notation one node per line. All
//! body indices are permuted NL indices.

use std::collections::BTreeMap;
use std::io::{self, Write};

use derive_more::{Display, Error};
use problemo::{Problem, ProblemResult};

use crate::expr::Expr;
use crate::expr::convert::convert_formula;
use crate::expr::linearity::Linearity;
use crate::model::Model;
use crate::{E, I, Sense, VarCategory};

#[derive(Debug, Display, Error, PartialEq)]
pub enum NlWriteError {
    #[display("failed to write NL stream")]
    Io,
}

/// Canonicalizes the model's residual trees and emits the NL stream.
pub(crate) fn write<W: Write>(w: &mut W, model: &Model) -> Result<(), Problem> {
    let constrs = model
        .constrs
        .iter()
        .map(|e| convert_formula(e.clone()))
        .collect::<Result<Vec<_>, _>>()?;
    let obj = convert_formula(model.obj.clone().unwrap_or(Expr::Const(0.)))?;
    emit(w, model, &constrs, &obj).via(NlWriteError::Io)
}

fn emit<W: Write>(w: &mut W, m: &Model, constrs: &[Expr], obj: &Expr) -> io::Result<()> {
    header(w, m)?;

    // C: nonlinear part of each constraint, NL order.
    for nl_i in 0..m.ncon {
        let i = m.maps.c_reverse[&nl_i];
        writeln!(w, "C{}", nl_i)?;
        write_expr(w, &constrs[i - 1], &m.maps.v_forward)?;
    }

    // O: the objective is always present on the wire.
    let sense = match m.sense {
        Sense::Minimize => 0,
        Sense::Maximize => 1,
    };
    writeln!(w, "O0 {}", sense)?;
    write_expr(w, obj, &m.maps.v_forward)?;

    // d: dual initial guesses are never written.
    writeln!(w, "d0")?;

    // x: nonzero primal initial guesses.
    let mut guesses: Vec<(I, E)> = (1..=m.nvar)
        .filter(|&j| m.x0[j - 1] != 0.)
        .map(|j| (m.maps.v_forward[&j], m.x0[j - 1]))
        .collect();
    guesses.sort_by_key(|&(nl_j, _)| nl_j);
    writeln!(w, "x{}", guesses.len())?;
    for (nl_j, v) in guesses {
        writeln!(w, "{} {}", nl_j, v)?;
    }

    // r: constraint relation codes and bounds.
    writeln!(w, "r")?;
    for nl_i in 0..m.ncon {
        let i = m.maps.c_reverse[&nl_i];
        match m.r_codes[i - 1] {
            0 => writeln!(w, "0 {} {}", m.g_l[i - 1], m.g_u[i - 1])?,
            1 => writeln!(w, "1 {}", m.g_u[i - 1])?,
            2 => writeln!(w, "2 {}", m.g_l[i - 1])?,
            4 => writeln!(w, "4 {}", m.g_l[i - 1])?,
            code => unreachable!("relation code {} cannot be emitted", code),
        }
    }

    // b: variable bounds, same code scheme.
    writeln!(w, "b")?;
    for nl_j in 0..m.nvar {
        let j = m.maps.v_reverse[&nl_j];
        let (l, u) = (m.x_l[j - 1], m.x_u[j - 1]);
        let (has_l, has_u) = (l != E::NEG_INFINITY, u != E::INFINITY);
        match (has_l, has_u) {
            (true, true) if l == u => writeln!(w, "4 {}", l)?,
            (true, true) => writeln!(w, "0 {} {}", l, u)?,
            (false, true) => writeln!(w, "1 {}", u)?,
            (true, false) => writeln!(w, "2 {}", l)?,
            (false, false) => writeln!(w, "3")?,
        }
    }

    // k: cumulative Jacobian column counts for the first nvar-1 variables.
    if m.nvar > 0 {
        writeln!(w, "k{}", m.nvar - 1)?;
        let mut total = 0;
        for nl_j in 0..m.nvar - 1 {
            total += m.j_counts[m.maps.v_reverse[&nl_j] - 1];
            writeln!(w, "{}", total)?;
        }
    }

    // J: linear part of each constraint.
    for nl_i in 0..m.ncon {
        let i = m.maps.c_reverse[&nl_i];
        let lmap = &m.lin_constrs[i - 1];
        if lmap.is_empty() {
            continue;
        }
        let mut entries: Vec<(I, E)> = lmap
            .iter()
            .map(|(j, c)| (m.maps.v_forward[j], *c))
            .collect();
        entries.sort_by_key(|&(nl_j, _)| nl_j);
        writeln!(w, "J{} {}", nl_i, entries.len())?;
        for (nl_j, c) in entries {
            writeln!(w, "{} {}", nl_j, c)?;
        }
    }

    // G: linear part of the objective.
    if !m.lin_obj.is_empty() {
        let mut entries: Vec<(I, E)> = m
            .lin_obj
            .iter()
            .map(|(j, c)| (m.maps.v_forward[j], *c))
            .collect();
        entries.sort_by_key(|&(nl_j, _)| nl_j);
        writeln!(w, "G0 {}", entries.len())?;
        for (nl_j, c) in entries {
            writeln!(w, "{} {}", nl_j, c)?;
        }
    }

    Ok(())
}

fn header<W: Write>(w: &mut W, m: &Model) -> io::Result<()> {
    let nranges = m.r_codes.iter().filter(|c| **c == 0).count();
    let neqns = m.r_codes.iter().filter(|c| **c == 4).count();
    let nlc = m
        .conlin
        .iter()
        .filter(|l| **l == Linearity::Nonlinear)
        .count();
    let nlo = (m.objlin == Linearity::Nonlinear) as usize;

    let nonlinear = |j: I| {
        m.varlin_con[j - 1] == Linearity::Nonlinear || m.varlin_obj[j - 1] == Linearity::Nonlinear
    };
    let nlv = (1..=m.nvar).filter(|&j| nonlinear(j)).count();
    let nlvi = (1..=m.nvar)
        .filter(|&j| nonlinear(j) && m.vartypes[j - 1] != VarCategory::Continuous)
        .count();
    let nbv = (1..=m.nvar)
        .filter(|&j| !nonlinear(j) && m.vartypes[j - 1] == VarCategory::Binary)
        .count();
    let niv = (1..=m.nvar)
        .filter(|&j| !nonlinear(j) && m.vartypes[j - 1] == VarCategory::Integer)
        .count();

    let nnzj: usize = m.lin_constrs.iter().map(BTreeMap::len).sum();
    let nnzg = m.lin_obj.len();

    writeln!(w, "g3 1 1 0\t# problem model")?;
    writeln!(
        w,
        " {} {} 1 {} {}\t# vars, constraints, objectives, ranges, eqns",
        m.nvar, m.ncon, nranges, neqns
    )?;
    writeln!(w, " {} {}\t# nonlinear constraints, objectives", nlc, nlo)?;
    writeln!(w, " 0 0\t# network constraints: nonlinear, linear")?;
    // The ordering fronts the union of nonlinear variables, so the same
    // count is declared for constraints, objectives, and both.
    writeln!(
        w,
        " {} {} {}\t# nonlinear vars in constraints, objectives, both",
        nlv, nlv, nlv
    )?;
    writeln!(w, " 0 0 0 1\t# linear network variables; functions; arith, flags")?;
    writeln!(
        w,
        " {} {} {} 0 0\t# discrete variables: binary, integer, nonlinear (b,c,o)",
        nbv, niv, nlvi
    )?;
    writeln!(w, " {} {}\t# nonzeros in Jacobian, gradients", nnzj, nnzg)?;
    writeln!(w, " 0 0\t# max name lengths: constraints, variables")?;
    writeln!(w, " 0 0 0 0 0\t# common exprs: b,c,o,c1,o1")?;
    Ok(())
}

/// Writes an expression in prefix notation, one node per line: `o<opcode>`
/// (n-ary operators followed by their argument count), `v<nl_index>`, or
/// `n<value>`.
fn write_expr<W: Write>(w: &mut W, expr: &Expr, v_forward: &BTreeMap<I, I>) -> io::Result<()> {
    match expr {
        Expr::Const(c) => writeln!(w, "n{}", c),
        Expr::Var(j) => writeln!(w, "v{}", v_forward[j]),
        Expr::Call(op, args) => {
            writeln!(w, "o{}", op.opcode())?;
            if op.is_nary() {
                writeln!(w, "{}", args.len())?;
            }
            for arg in args {
                write_expr(w, arg, v_forward)?;
            }
            Ok(())
        }
    }
}
