//! The model aggregate: owns the decomposed problem during a solve.

use std::fs::File;
use std::io::{BufWriter, Write};

use faer::{Col, MatRef};
use problemo::{Problem, common::IntoCommonProblem};

use crate::expr::decompose::{LinearMap, process_expression};
use crate::expr::linearity::{Linearity, analyze};
use crate::expr::{Expr, Op};
use crate::index_map::{self, IndexMaps};
use crate::nl;
use crate::solver::AmplSolver;
use crate::{E, I, Sense, Status, VarCategory};

/// Source of expression trees for a nonlinear problem.
///
/// Constraint expressions arrive as comparison trees: `Call(Le | Ge | Eq,
/// [a, b])` where either side carries the constant bound, or the range
/// form `Call(Le, [lo, body, hi])` with constant `lo`/`hi`. Strict `<` /
/// `>` are accepted and treated as their non-strict counterparts. The
/// bounds are extracted at load time; only the inner expression is kept.
pub trait NlpProvider {
    /// Called once before any expression is requested.
    fn init_expr_graph(&mut self) -> Result<(), Problem>;

    /// The `i`-th constraint (1-based), as a comparison tree.
    fn constraint_expr(&self, i: I) -> Result<Expr, Problem>;

    /// The objective expression.
    fn objective_expr(&self) -> Result<Expr, Problem>;
}

/// An optimization problem bound to an AMPL-compatible solver:
///
/// ```text
/// min/max  f(x)
/// s.t.     g_l <= g(x) <= g_u
///          x_l <=   x  <= x_u
/// ```
///
/// with each row of `g` (and `f`) held as a linear coefficient map, an
/// extracted constant, and a residual nonlinear tree. Created empty,
/// populated by one of the `load_*` calls, finalized by [`Model::optimize`],
/// and read through the getters afterwards.
pub struct Model {
    pub(crate) solver: AmplSolver,

    pub(crate) nvar: I,
    pub(crate) ncon: I,

    /// Lower bounds on the variables.
    pub(crate) x_l: Col<E>,
    /// Upper bounds on the variables.
    pub(crate) x_u: Col<E>,
    /// Constraint lower bounds, shifted by the extracted constants.
    pub(crate) g_l: Col<E>,
    /// Constraint upper bounds, shifted by the extracted constants.
    pub(crate) g_u: Col<E>,

    /// NL relation code per constraint (0 range, 1 upper, 2 lower, 4 equality).
    pub(crate) r_codes: Vec<u8>,
    /// Per variable, the number of constraints whose linear part lists it.
    pub(crate) j_counts: Vec<I>,

    /// Linear part of each constraint.
    pub(crate) lin_constrs: Vec<LinearMap>,
    /// Linear part of the objective.
    pub(crate) lin_obj: LinearMap,
    /// Residual nonlinear tree per constraint (scalar zero when linear).
    pub(crate) constrs: Vec<Expr>,
    /// Residual nonlinear tree of the objective, when one remains.
    pub(crate) obj: Option<Expr>,
    /// Constant extracted from the objective, re-added at reconstitution.
    pub(crate) obj_constant: E,

    pub(crate) varlin_con: Vec<Linearity>,
    pub(crate) varlin_obj: Vec<Linearity>,
    pub(crate) conlin: Vec<Linearity>,
    pub(crate) objlin: Linearity,

    pub(crate) vartypes: Vec<VarCategory>,
    pub(crate) sense: Sense,
    /// Warm start; zeros unless provided.
    pub(crate) x0: Col<E>,

    pub(crate) maps: IndexMaps,

    pub(crate) solution: Col<E>,
    pub(crate) objval: E,
    pub(crate) status: Status,
    pub(crate) solve_result_num: i64,
    pub(crate) solve_result: String,
    pub(crate) solve_message: String,
    pub(crate) solve_exitcode: i32,

    loaded: bool,
}

impl Model {
    /// Creates an empty model bound to `solver`.
    pub fn new(solver: AmplSolver) -> Self {
        Self {
            solver,
            nvar: 0,
            ncon: 0,
            x_l: Col::zeros(0),
            x_u: Col::zeros(0),
            g_l: Col::zeros(0),
            g_u: Col::zeros(0),
            r_codes: Vec::new(),
            j_counts: Vec::new(),
            lin_constrs: Vec::new(),
            lin_obj: LinearMap::new(),
            constrs: Vec::new(),
            obj: None,
            obj_constant: 0.,
            varlin_con: Vec::new(),
            varlin_obj: Vec::new(),
            conlin: Vec::new(),
            objlin: Linearity::Linear,
            vartypes: Vec::new(),
            sense: Sense::Minimize,
            x0: Col::zeros(0),
            maps: IndexMaps::default(),
            solution: Col::zeros(0),
            objval: E::NAN,
            status: Status::NotSolved,
            solve_result_num: -1,
            solve_result: String::from("?"),
            solve_message: String::new(),
            solve_exitcode: -1,
            loaded: false,
        }
    }

    /// Returns the number of variables.
    pub fn get_n_vars(&self) -> usize {
        self.nvar
    }

    /// Returns the number of constraints.
    pub fn get_n_cons(&self) -> usize {
        self.ncon
    }

    /// Loads a nonlinear problem whose expressions come from `provider`.
    ///
    /// Constraint bounds are taken from the comparison trees the provider
    /// yields (the `g_l`/`g_u` arguments size the problem and are
    /// overwritten by extraction), then shifted by each row's extracted
    /// constant.
    pub fn load_nonlinear_problem(
        &mut self,
        nvar: I,
        ncon: I,
        x_l: Col<E>,
        x_u: Col<E>,
        g_l: Col<E>,
        g_u: Col<E>,
        sense: Sense,
        provider: &mut dyn NlpProvider,
    ) -> Result<(), Problem> {
        if x_l.nrows() != nvar || x_u.nrows() != nvar {
            return Err(format!(
                "variable bound lengths ({}, {}) disagree with nvar = {}",
                x_l.nrows(),
                x_u.nrows(),
                nvar
            )
            .gloss());
        }
        if g_l.nrows() != ncon || g_u.nrows() != ncon {
            return Err(format!(
                "constraint bound lengths ({}, {}) disagree with ncon = {}",
                g_l.nrows(),
                g_u.nrows(),
                ncon
            )
            .gloss());
        }

        self.prepare(nvar, ncon, x_l, x_u, g_l, g_u, sense);

        provider.init_expr_graph()?;

        for i in 1..=ncon {
            let raw = provider.constraint_expr(i)?;
            check_var_range(&raw, nvar)?;
            let (body, code, lo, hi) = split_comparison(raw)?;

            let mut lmap = LinearMap::new();
            let d = process_expression(&body, &mut lmap)?;

            self.g_l[i - 1] = if lo.is_finite() { lo - d.constant } else { lo };
            self.g_u[i - 1] = if hi.is_finite() { hi - d.constant } else { hi };
            self.r_codes.push(code);
            self.conlin.push(d.linearity);
            for j in &d.nonlinear_vars {
                self.varlin_con[j - 1] = Linearity::Nonlinear;
            }
            self.lin_constrs.push(lmap);
            self.constrs.push(d.residual);
        }

        let objective = provider.objective_expr()?;
        check_var_range(&objective, nvar)?;
        let d = process_expression(&objective, &mut self.lin_obj)?;
        self.obj_constant = d.constant;
        self.objlin = d.linearity;
        for j in &d.nonlinear_vars {
            self.varlin_obj[j - 1] = Linearity::Nonlinear;
        }
        self.obj = if d.residual.is_zero() {
            None
        } else {
            Some(d.residual)
        };

        self.loaded = true;
        Ok(())
    }

    /// Loads the linear problem
    ///
    /// ```text
    /// min/max  c^T x
    /// s.t.     g_l <= A x <= g_u
    ///          x_l <=  x  <= x_u
    /// ```
    ///
    /// `a` is dense; only its nonzero entries are kept.
    #[allow(non_snake_case)]
    pub fn load_linear_problem(
        &mut self,
        A: MatRef<'_, E>,
        x_l: Col<E>,
        x_u: Col<E>,
        c: Col<E>,
        g_l: Col<E>,
        g_u: Col<E>,
        sense: Sense,
    ) -> Result<(), Problem> {
        let (ncon, nvar) = (A.nrows(), A.ncols());
        if x_l.nrows() != nvar || x_u.nrows() != nvar || c.nrows() != nvar {
            return Err(format!(
                "variable vector lengths ({}, {}, {}) disagree with A's {} columns",
                x_l.nrows(),
                x_u.nrows(),
                c.nrows(),
                nvar
            )
            .gloss());
        }
        if g_l.nrows() != ncon || g_u.nrows() != ncon {
            return Err(format!(
                "constraint bound lengths ({}, {}) disagree with A's {} rows",
                g_l.nrows(),
                g_u.nrows(),
                ncon
            )
            .gloss());
        }

        self.prepare(nvar, ncon, x_l, x_u, g_l, g_u, sense);

        for i in 1..=ncon {
            let mut lmap = LinearMap::new();
            for j in 1..=nvar {
                let coeff = A[(i - 1, j - 1)];
                if coeff != 0. {
                    lmap.insert(j, coeff);
                }
            }
            self.r_codes.push(relation_code(self.g_l[i - 1], self.g_u[i - 1])?);
            self.conlin.push(Linearity::Linear);
            self.lin_constrs.push(lmap);
            self.constrs.push(Expr::Const(0.));
        }

        for j in 1..=nvar {
            if c[j - 1] != 0. {
                self.lin_obj.insert(j, c[j - 1]);
            }
        }
        self.obj = None;
        self.objlin = Linearity::Linear;

        self.loaded = true;
        Ok(())
    }

    /// Sets the category of every variable.
    pub fn set_var_types(&mut self, categories: Vec<VarCategory>) -> Result<(), Problem> {
        if categories.len() != self.nvar {
            return Err(format!(
                "got {} variable categories for {} variables",
                categories.len(),
                self.nvar
            )
            .gloss());
        }
        self.vartypes = categories;
        Ok(())
    }

    /// Sets the initial guess handed to the solver.
    pub fn set_warm_start(&mut self, x0: Col<E>) -> Result<(), Problem> {
        if x0.nrows() != self.nvar {
            return Err(format!(
                "warm start has {} entries for {} variables",
                x0.nrows(),
                self.nvar
            )
            .gloss());
        }
        self.x0 = x0;
        Ok(())
    }

    /// Finalizes the model and serializes it as an NL stream.
    ///
    /// Called by [`Model::optimize`]; exposed so the emitted file can be
    /// inspected without running a solver.
    pub fn write_nl<W: Write>(&mut self, w: &mut W) -> Result<(), Problem> {
        if !self.loaded {
            return Err("no problem has been loaded".gloss());
        }
        self.finalize();
        nl::writer::write(w, self)
    }

    /// Writes the NL file, runs the solver, and reads back the SOL file.
    ///
    /// A nonzero solver exit code is not an error: the model records
    /// `Status::Error` with `solve_result_num = 999` and returns normally.
    pub fn optimize(&mut self) -> Result<(), Problem> {
        let nl_path = self.solver.get_workdir().join("model.nl");
        {
            let file = File::create(&nl_path)
                .map_err(|e| format!("failed to create {}: {}", nl_path.display(), e).gloss())?;
            let mut out = BufWriter::new(file);
            self.write_nl(&mut out)?;
            out.flush()
                .map_err(|e| format!("failed to write {}: {}", nl_path.display(), e).gloss())?;
        }

        self.solve_exitcode = self.solver.run(&nl_path)?;
        if self.solve_exitcode != 0 {
            self.status = Status::Error;
            self.solve_result = String::from("failure");
            self.solve_result_num = 999;
            return Ok(());
        }

        let sol_path = self.solver.get_workdir().join("model.sol");
        nl::reader::read_solution(&sol_path, self)
    }

    /// Returns the status of the last solve.
    pub fn get_status(&self) -> Status {
        self.status
    }

    /// Returns the primal solution (user variable order).
    pub fn get_solution(&self) -> &Col<E> {
        &self.solution
    }

    /// Returns the reconstituted objective value (NaN when no primal
    /// values were returned).
    pub fn get_obj_val(&self) -> E {
        self.objval
    }

    /// Returns the textual solve result ("solved", "infeasible", ...).
    pub fn get_solve_result(&self) -> &str {
        &self.solve_result
    }

    /// Returns the numeric solve result reported by the solver.
    pub fn get_solve_result_num(&self) -> i64 {
        self.solve_result_num
    }

    /// Returns the solver's banner message from the SOL file.
    pub fn get_solve_message(&self) -> &str {
        &self.solve_message
    }

    /// Returns the solver process exit code.
    pub fn get_solve_exitcode(&self) -> i32 {
        self.solve_exitcode
    }

    fn prepare(
        &mut self,
        nvar: I,
        ncon: I,
        x_l: Col<E>,
        x_u: Col<E>,
        g_l: Col<E>,
        g_u: Col<E>,
        sense: Sense,
    ) {
        self.nvar = nvar;
        self.ncon = ncon;
        self.x_l = x_l;
        self.x_u = x_u;
        self.g_l = g_l;
        self.g_u = g_u;
        self.sense = sense;
        self.r_codes = Vec::with_capacity(ncon);
        self.lin_constrs = Vec::with_capacity(ncon);
        self.constrs = Vec::with_capacity(ncon);
        self.conlin = Vec::with_capacity(ncon);
        self.lin_obj = LinearMap::new();
        self.obj = None;
        self.obj_constant = 0.;
        self.varlin_con = vec![Linearity::Linear; nvar];
        self.varlin_obj = vec![Linearity::Linear; nvar];
        self.objlin = Linearity::Linear;
        self.vartypes = vec![VarCategory::Continuous; nvar];
        self.x0 = Col::zeros(nvar);
        self.solution = Col::zeros(nvar);
        self.objval = E::NAN;
        self.status = Status::NotSolved;
        self.solve_result_num = -1;
        self.solve_result = String::from("?");
        self.solve_message = String::new();
        self.solve_exitcode = -1;
    }

    /// Clamps binary bounds, tallies Jacobian counts, and builds the NL
    /// permutations.
    fn finalize(&mut self) {
        for j in 0..self.nvar {
            if self.vartypes[j] == VarCategory::Binary {
                self.x_l[j] = self.x_l[j].max(0.);
                self.x_u[j] = self.x_u[j].min(1.);
            }
        }

        self.j_counts = (1..=self.nvar)
            .map(|j| self.lin_constrs.iter().filter(|m| m.contains_key(&j)).count())
            .collect();

        self.maps = index_map::build(
            &self.vartypes,
            &self.varlin_con,
            &self.varlin_obj,
            &self.conlin,
        );
    }
}

/// Computes the NL relation code for a pair of constraint bounds.
fn relation_code(l: E, u: E) -> Result<u8, Problem> {
    let has_l = l != E::NEG_INFINITY;
    let has_u = u != E::INFINITY;
    match (has_l, has_u) {
        (true, true) if l == u => Ok(4),
        (true, true) => Ok(0),
        (false, true) => Ok(1),
        (true, false) => Ok(2),
        (false, false) => Err("constraint has neither a lower nor an upper bound".gloss()),
    }
}

/// Verifies that every variable reference is within `1..=nvar`.
fn check_var_range(expr: &Expr, nvar: I) -> Result<(), Problem> {
    let mut bad = None;
    expr.for_each_var(&mut |j| {
        if (j < 1 || j > nvar) && bad.is_none() {
            bad = Some(j);
        }
    });
    match bad {
        Some(j) => Err(format!("variable index {} out of range 1..{}", j, nvar).gloss()),
        None => Ok(()),
    }
}

/// Evaluates a side of a comparison when it is a constant subtree.
fn try_const(expr: &Expr) -> Option<E> {
    let tagged = analyze(expr);
    if tagged.linearity == Linearity::Const {
        tagged.eval_const().ok()
    } else {
        None
    }
}

/// Normalizes a constraint comparison into `(body, code, lower, upper)`.
fn split_comparison(expr: Expr) -> Result<(Expr, u8, E, E), Problem> {
    let Expr::Call(op, mut args) = expr else {
        return Err("constraint expression is not a comparison".gloss());
    };
    match (op, args.len()) {
        // Range form: lo <= body <= hi.
        (Op::Le | Op::Lt, 3) => {
            let hi_expr = args.pop().expect("nonempty");
            let body = args.pop().expect("nonempty");
            let lo_expr = args.pop().expect("nonempty");
            let (Some(lo), Some(hi)) = (try_const(&lo_expr), try_const(&hi_expr)) else {
                return Err("range constraint without constant outer bounds".gloss());
            };
            Ok((body, 0, lo, hi))
        }
        (Op::Le | Op::Lt | Op::Ge | Op::Gt | Op::Eq, 2) => {
            let rhs = args.pop().expect("nonempty");
            let lhs = args.pop().expect("nonempty");
            let (body, bound, bound_on_right) = match (try_const(&lhs), try_const(&rhs)) {
                (None, Some(b)) => (lhs, b, true),
                (Some(b), None) => (rhs, b, false),
                _ => {
                    return Err("comparison needs exactly one constant bound side".gloss());
                }
            };
            let (code, lo, hi) = match (op, bound_on_right) {
                (Op::Eq, _) => (4, bound, bound),
                // body <= b  or  b >= body
                (Op::Le | Op::Lt, true) | (Op::Ge | Op::Gt, false) => {
                    (1, E::NEG_INFINITY, bound)
                }
                // body >= b  or  b <= body
                (Op::Ge | Op::Gt, true) | (Op::Le | Op::Lt, false) => (2, bound, E::INFINITY),
                _ => unreachable!(),
            };
            Ok((body, code, lo, hi))
        }
        _ => Err("constraint expression is not a comparison".gloss()),
    }
}
