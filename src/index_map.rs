//! Orderings imposed by NL readers, as forward/reverse permutations.
//!
//! NL files require variables to be listed nonlinear-first, partitioned by
//! category, and constraints nonlinear-before-linear. User indices are
//! 1-based; NL indices are 0-based.

use std::collections::BTreeMap;

use crate::expr::linearity::Linearity;
use crate::{I, VarCategory};

/// Forward (`user -> nl`) and reverse (`nl -> user`) permutations for
/// variables and constraints.
#[derive(Debug, Default, Clone)]
pub struct IndexMaps {
    pub v_forward: BTreeMap<I, I>,
    pub v_reverse: BTreeMap<I, I>,
    pub c_forward: BTreeMap<I, I>,
    pub c_reverse: BTreeMap<I, I>,
}

/// Variable order: nonlinear continuous, nonlinear integer (binary counts
/// as integer here), linear continuous, linear binary, linear integer. A
/// variable is nonlinear if it is tagged nonlinear in either the objective
/// or any constraint. Original order is preserved within each bucket.
fn variable_bucket(category: VarCategory, nonlinear: bool) -> usize {
    match (nonlinear, category) {
        (true, VarCategory::Continuous) => 0,
        (true, VarCategory::Integer | VarCategory::Binary) => 1,
        (false, VarCategory::Continuous) => 2,
        (false, VarCategory::Binary) => 3,
        (false, VarCategory::Integer) => 4,
    }
}

/// Builds the permutations for the given per-variable categories and
/// linearity tags and per-constraint linearity tags.
pub fn build(
    vartypes: &[VarCategory],
    varlin_con: &[Linearity],
    varlin_obj: &[Linearity],
    conlin: &[Linearity],
) -> IndexMaps {
    let mut maps = IndexMaps::default();

    let nonlinear = |j: I| {
        varlin_con[j - 1] == Linearity::Nonlinear || varlin_obj[j - 1] == Linearity::Nonlinear
    };

    let mut next = 0;
    for bucket in 0..5 {
        for j in 1..=vartypes.len() {
            if variable_bucket(vartypes[j - 1], nonlinear(j)) == bucket {
                maps.v_forward.insert(j, next);
                maps.v_reverse.insert(next, j);
                next += 1;
            }
        }
    }

    let mut next = 0;
    for target in [Linearity::Nonlinear, Linearity::Linear] {
        for i in 1..=conlin.len() {
            if conlin[i - 1] == target {
                maps.c_forward.insert(i, next);
                maps.c_reverse.insert(next, i);
                next += 1;
            }
        }
    }

    maps
}
