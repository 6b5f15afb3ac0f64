use std::any::Any;

use dyn_clone::DynClone;
use serde::{Deserialize, Serialize};

pub type E = f64;
pub type I = usize;

pub mod expr;
pub mod index_map;
pub mod model;
pub mod nl;
pub mod solver;

#[cfg(test)]
pub mod tests;

pub use expr::{Expr, Op};
pub use model::{Model, NlpProvider};
pub use solver::AmplSolver;

/// A value usable in the solver option map.
///
/// AMPL solvers receive options as free-form `key=value` command-line
/// arguments owned by the solver binary, so values are kept boxed and only
/// coerced to their display form when the command line is assembled.
pub trait OptionValue: Any + Sync + Send + DynClone {
    /// Renders the value as it appears on the right of `key=value`.
    fn as_arg(&self) -> String;
}

macro_rules! impl_option_value {
    ($($t:ty),* $(,)?) => {
        $(impl OptionValue for $t {
            fn as_arg(&self) -> String {
                self.to_string()
            }
        })*
    };
}

impl_option_value!(
    &'static str,
    String,
    bool,
    usize,
    u8,
    u16,
    u32,
    u64,
    i8,
    i16,
    i32,
    i64,
    f32,
    f64,
);

impl Clone for Box<dyn OptionValue> {
    fn clone(&self) -> Self {
        dyn_clone::clone_box(&**self)
    }
}

/// Status codes reported after driving a solver.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    /// No solve has been attempted yet.
    NotSolved,
    /// An optimal solution was found.
    Optimal,
    /// The problem is infeasible.
    Infeasible,
    /// The problem is unbounded.
    Unbounded,
    /// The solver stopped at a user-imposed limit (time, iterations, ...).
    UserLimit,
    /// The solver failed or reported an error.
    Error,
}

/// Optimization direction of the objective.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sense {
    #[default]
    Minimize,
    Maximize,
}

/// Category of a decision variable.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarCategory {
    #[default]
    Continuous,
    Integer,
    Binary,
}
