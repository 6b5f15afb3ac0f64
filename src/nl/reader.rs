//! Parsing of SOL result files and status classification.

use std::path::Path;

use derive_more::{Display, Error};
use log::warn;
use problemo::{Problem, common::IntoCommonProblem};

use crate::model::Model;
use crate::{E, Status};

/// Layout violations encountered while reading a SOL file.
#[derive(Debug, Display, Error, PartialEq)]
pub enum SolFormatError {
    #[display("missing 'Options' header line")]
    MissingOptions,
    #[display("unexpected end of file")]
    UnexpectedEof,
    #[display("option count out of range 3..=9")]
    OptionCountOutOfRange,
    #[display("constraint count disagrees with the model")]
    ConstraintCountMismatch,
    #[display("dual count is neither 0 nor the constraint count")]
    DualCountMismatch,
    #[display("variable count disagrees with the model")]
    VariableCountMismatch,
    #[display("primal count is neither 0 nor the variable count")]
    PrimalCountMismatch,
    #[display("malformed number")]
    MalformedNumber,
    #[display("objective index is not zero")]
    NonzeroObjectiveIndex,
}

/// Reads `<workdir>/model.sol` into the model: banner message, primal
/// values (through the reverse variable permutation), status fields, and
/// the reconstituted objective.
pub(crate) fn read_solution(path: &Path, model: &mut Model) -> Result<(), Problem> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e).gloss())?;
    parse(&contents, model)
}

fn parse(contents: &str, model: &mut Model) -> Result<(), Problem> {
    let mut lines = contents.lines();
    let mut next = || lines.next().ok_or(SolFormatError::UnexpectedEof);

    // Leading blank lines, then the banner until a blank line (or the
    // `Options` literal, for solvers that write no banner).
    let mut line = next()?;
    while line.trim().is_empty() {
        line = next()?;
    }
    let mut message = Vec::new();
    while !line.trim().is_empty() && line.trim() != "Options" {
        message.push(line.trim_end());
        line = next()?;
    }
    while line.trim().is_empty() {
        line = next()?;
    }
    if line.trim() != "Options" {
        return Err(SolFormatError::MissingOptions.into());
    }

    let int = |line: &str| -> Result<i64, SolFormatError> {
        line.trim().parse().map_err(|_| SolFormatError::MalformedNumber)
    };
    let float = |line: &str| -> Result<E, SolFormatError> {
        line.trim().parse().map_err(|_| SolFormatError::MalformedNumber)
    };

    let o1 = int(next()?)?;
    let _o2 = int(next()?)?;
    let o3 = int(next()?)?;
    let mut num_options = o1;
    if !(3..=9).contains(&num_options) {
        return Err(SolFormatError::OptionCountOutOfRange.into());
    }
    let need_vbtol = o3 == 3;
    if need_vbtol {
        num_options -= 2;
    }
    // The remaining option values are not interpreted.
    for _ in 3..num_options {
        int(next()?)?;
    }

    let n_constraints = int(next()?)? as usize;
    if n_constraints != model.ncon {
        return Err(SolFormatError::ConstraintCountMismatch.into());
    }
    let n_duals = int(next()?)? as usize;
    if n_duals != 0 && n_duals != model.ncon {
        return Err(SolFormatError::DualCountMismatch.into());
    }
    let n_variables = int(next()?)? as usize;
    if n_variables != model.nvar {
        return Err(SolFormatError::VariableCountMismatch.into());
    }
    let n_primals = int(next()?)? as usize;
    if n_primals != 0 && n_primals != model.nvar {
        return Err(SolFormatError::PrimalCountMismatch.into());
    }

    if need_vbtol {
        next()?;
    }
    for _ in 0..n_duals {
        next()?;
    }
    for nl_j in 0..n_primals {
        let value = float(next()?)?;
        let j = model.maps.v_reverse[&nl_j];
        model.solution[j - 1] = value;
    }

    // Trailing lines: the first `objno` line carries the result code.
    let mut result_num = None;
    for line in lines {
        if let Some(rest) = line.trim().strip_prefix("objno ") {
            let mut fields = rest.split_whitespace();
            let objno = fields
                .next()
                .ok_or(SolFormatError::MalformedNumber)
                .and_then(int)?;
            if objno != 0 {
                return Err(SolFormatError::NonzeroObjectiveIndex.into());
            }
            result_num = Some(
                fields
                    .next()
                    .ok_or(SolFormatError::MalformedNumber)
                    .and_then(int)?,
            );
            break;
        }
    }

    model.solve_message = message.join("\n");
    model.status = Status::NotSolved;
    if let Some(num) = result_num {
        model.solve_result_num = num;
        let (status, label) = classify(num);
        if (100..200).contains(&num) {
            warn!(
                "solver finished with solve_result_num {} (\"{}\"): treating as optimal",
                num, label
            );
        }
        model.status = status;
        model.solve_result = String::from(label);
    }
    if model.status == Status::NotSolved
        && let Some(status) = status_from_message(&model.solve_message)
    {
        model.status = status;
    }

    model.objval = if n_primals > 0 {
        let residual = match &model.obj {
            Some(expr) => expr.eval(&model.solution)?,
            None => 0.,
        };
        let linear: E = model
            .lin_obj
            .iter()
            .map(|(j, c)| c * model.solution[j - 1])
            .sum();
        residual + linear + model.obj_constant
    } else {
        E::NAN
    };

    Ok(())
}

/// Maps a solver result number onto a status and its textual form. Total
/// over all integers: anything outside the documented bands is a failure.
pub(crate) fn classify(num: i64) -> (Status, &'static str) {
    match num {
        0..=99 => (Status::Optimal, "solved"),
        100..=199 => (Status::Optimal, "solved?"),
        200..=299 => (Status::Infeasible, "infeasible"),
        300..=399 => (Status::Unbounded, "unbounded"),
        400..=499 => (Status::UserLimit, "limit"),
        _ => (Status::Error, "failure"),
    }
}

/// Last-resort classification from the solver banner, first match wins.
pub(crate) fn status_from_message(message: &str) -> Option<Status> {
    let lowered = message.to_lowercase();
    [
        ("optimal", Status::Optimal),
        ("infeasible", Status::Infeasible),
        ("unbounded", Status::Unbounded),
        ("limit", Status::UserLimit),
        ("error", Status::Error),
    ]
    .into_iter()
    .find(|(needle, _)| lowered.contains(needle))
    .map(|(_, status)| status)
}
