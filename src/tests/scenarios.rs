//! Scenario tests: each builds a model, runs a stub solver that replays a
//! prepared SOL file (or fails outright), and checks the reported status,
//! solution, and reconstituted objective.

use std::fs;
use std::os::unix::fs::PermissionsExt;

use faer::{Col, Mat};
use problemo::{Problem, common::IntoCommonProblem};
use rstest::rstest;
use rstest_reuse::{apply, template};
use tempfile::TempDir;

use crate::expr::{Expr, Op};
use crate::model::{Model, NlpProvider};
use crate::solver::AmplSolver;
use crate::{E, Sense, Status, VarCategory};

/// Writes an executable stub that copies the prepared SOL file next to the
/// problem file, mimicking a solver invoked as `solver model.nl -AMPL ...`.
fn stub_solver(dir: &TempDir, sol: &str) -> AmplSolver {
    fs::write(dir.path().join("expected.sol"), sol).unwrap();
    write_script(
        dir,
        "#!/bin/sh\ncp \"$(dirname \"$1\")/expected.sol\" \"${1%.nl}.sol\"\nexit 0\n",
    )
}

/// A stub that records its arguments, then behaves like [`stub_solver`].
fn recording_solver(dir: &TempDir, sol: &str) -> AmplSolver {
    fs::write(dir.path().join("expected.sol"), sol).unwrap();
    write_script(
        dir,
        "#!/bin/sh\nd=$(dirname \"$1\")\nprintf '%s\\n' \"$@\" > \"$d/args.txt\"\ncp \"$d/expected.sol\" \"${1%.nl}.sol\"\nexit 0\n",
    )
}

/// A stub that exits with the given code before writing any SOL file.
fn crashing_solver(dir: &TempDir, code: i32) -> AmplSolver {
    write_script(dir, &format!("#!/bin/sh\nexit {}\n", code))
}

fn write_script(dir: &TempDir, body: &str) -> AmplSolver {
    let script = dir.path().join("solver.sh");
    fs::write(&script, body).unwrap();
    let mut perm = fs::metadata(&script).unwrap().permissions();
    perm.set_mode(0o755);
    fs::set_permissions(&script, perm).unwrap();
    AmplSolver::new(script.to_str().unwrap()).with_workdir(dir.path())
}

/// Builds a SOL file in the layout the reader expects.
fn sol_text(message: &str, ncon: usize, nvar: usize, primals: &[E], result_num: i64) -> String {
    let mut text = format!(
        "{}\n\nOptions\n3\n1\n1\n{}\n0\n{}\n{}\n",
        message,
        ncon,
        nvar,
        if primals.is_empty() { 0 } else { nvar }
    );
    for p in primals {
        text.push_str(&format!("{}\n", p));
    }
    text.push_str(&format!("objno 0 {}\n", result_num));
    text
}

/// min 2 x1 + 3 x2  s.t.  x1 + x2 >= 1,  x >= 0
fn load_transport_lp(model: &mut Model) {
    let a = Mat::from_fn(1, 2, |_, _| 1.);
    model
        .load_linear_problem(
            a.as_ref(),
            Col::zeros(2),
            Col::from_fn(2, |_| E::INFINITY),
            Col::from_fn(2, |i| [2., 3.][i]),
            Col::from_fn(1, |_| 1.),
            Col::from_fn(1, |_| E::INFINITY),
            Sense::Minimize,
        )
        .unwrap();
}

#[test]
fn linear_minimization_reports_the_replayed_optimum() {
    let dir = TempDir::new().unwrap();
    let sol = sol_text("stub: optimal solution found", 1, 2, &[1., 0.], 0);
    let mut model = Model::new(stub_solver(&dir, &sol));
    load_transport_lp(&mut model);

    model.optimize().unwrap();

    assert_eq!(model.get_status(), Status::Optimal);
    assert_eq!(model.get_solve_result(), "solved");
    assert_eq!(model.get_solve_exitcode(), 0);
    assert!((model.get_obj_val() - 2.).abs() < 1e-6);
    assert!((model.get_solution()[0] - 1.).abs() < 1e-6);
    assert!(model.get_solution()[1].abs() < 1e-6);
    // Both exchange files stay behind for inspection.
    assert!(dir.path().join("model.nl").exists());
    assert!(dir.path().join("model.sol").exists());
}

struct SumOfSquares;

impl NlpProvider for SumOfSquares {
    fn init_expr_graph(&mut self) -> Result<(), Problem> {
        Ok(())
    }

    fn constraint_expr(&self, _i: usize) -> Result<Expr, Problem> {
        // x1 + x2 == 1
        Ok(Expr::Call(
            Op::Eq,
            vec![
                Expr::Call(Op::Add, vec![Expr::Var(1), Expr::Var(2)]),
                Expr::Const(1.),
            ],
        ))
    }

    fn objective_expr(&self) -> Result<Expr, Problem> {
        // x1^2 + x2^2
        Ok(Expr::Call(
            Op::Add,
            vec![
                Expr::Call(Op::Pow, vec![Expr::Var(1), Expr::Const(2.)]),
                Expr::Call(Op::Pow, vec![Expr::Var(2), Expr::Const(2.)]),
            ],
        ))
    }
}

#[test]
fn equality_constrained_quadratic_reconstitutes_its_objective() {
    let dir = TempDir::new().unwrap();
    let sol = sol_text("stub: optimal solution found", 1, 2, &[0.5, 0.5], 0);
    let mut model = Model::new(stub_solver(&dir, &sol));
    let inf = E::INFINITY;
    model
        .load_nonlinear_problem(
            2,
            1,
            Col::from_fn(2, |_| -inf),
            Col::from_fn(2, |_| inf),
            Col::zeros(1),
            Col::zeros(1),
            Sense::Minimize,
            &mut SumOfSquares,
        )
        .unwrap();

    model.optimize().unwrap();

    assert_eq!(model.get_status(), Status::Optimal);
    assert!((model.get_obj_val() - 0.5).abs() < 1e-8);
    assert!((model.get_solution()[0] - 0.5).abs() < 1e-6);
    assert!((model.get_solution()[1] - 0.5).abs() < 1e-6);
}

struct BinaryParabola;

impl NlpProvider for BinaryParabola {
    fn init_expr_graph(&mut self) -> Result<(), Problem> {
        Ok(())
    }

    fn constraint_expr(&self, i: usize) -> Result<Expr, Problem> {
        Err(format!("no constraint {} in this problem", i).gloss())
    }

    fn objective_expr(&self) -> Result<Expr, Problem> {
        // (x1 - 0.7)^2
        Ok(Expr::Call(
            Op::Pow,
            vec![
                Expr::Call(Op::Sub, vec![Expr::Var(1), Expr::Const(0.7)]),
                Expr::Const(2.),
            ],
        ))
    }
}

#[test]
fn binary_variable_problem_rounds_to_the_replayed_choice() {
    let dir = TempDir::new().unwrap();
    let sol = sol_text("stub: optimal solution found", 0, 1, &[1.], 0);
    let mut model = Model::new(stub_solver(&dir, &sol));
    model
        .load_nonlinear_problem(
            1,
            0,
            Col::zeros(1),
            Col::from_fn(1, |_| 1.),
            Col::zeros(0),
            Col::zeros(0),
            Sense::Minimize,
            &mut BinaryParabola,
        )
        .unwrap();
    model.set_var_types(vec![VarCategory::Binary]).unwrap();

    model.optimize().unwrap();

    assert_eq!(model.get_status(), Status::Optimal);
    assert_eq!(model.get_solution()[0], 1.);
    assert!((model.get_obj_val() - 0.09).abs() < 1e-8);
}

#[test]
fn infeasible_bounds_are_reported_as_infeasible() {
    // x >= 2 and x <= 1 cannot both hold.
    let dir = TempDir::new().unwrap();
    let sol = sol_text("stub: problem is infeasible", 2, 1, &[], 200);
    let mut model = Model::new(stub_solver(&dir, &sol));
    let a = Mat::from_fn(2, 1, |_, _| 1.);
    model
        .load_linear_problem(
            a.as_ref(),
            Col::from_fn(1, |_| E::NEG_INFINITY),
            Col::from_fn(1, |_| E::INFINITY),
            Col::zeros(1),
            Col::from_fn(2, |i| [2., E::NEG_INFINITY][i]),
            Col::from_fn(2, |i| [E::INFINITY, 1.][i]),
            Sense::Minimize,
        )
        .unwrap();

    model.optimize().unwrap();

    assert_eq!(model.get_status(), Status::Infeasible);
    assert_eq!(model.get_solve_result(), "infeasible");
    assert!(model.get_obj_val().is_nan());
}

#[test]
fn unbounded_descent_is_reported_as_unbounded() {
    // min -x with x >= 0 and no upper bound.
    let dir = TempDir::new().unwrap();
    let sol = sol_text("stub: problem is unbounded", 0, 1, &[], 300);
    let mut model = Model::new(stub_solver(&dir, &sol));
    let a = Mat::<E>::zeros(0, 1);
    model
        .load_linear_problem(
            a.as_ref(),
            Col::zeros(1),
            Col::from_fn(1, |_| E::INFINITY),
            Col::from_fn(1, |_| -1.),
            Col::zeros(0),
            Col::zeros(0),
            Sense::Minimize,
        )
        .unwrap();

    model.optimize().unwrap();

    assert_eq!(model.get_status(), Status::Unbounded);
    assert_eq!(model.get_solve_result(), "unbounded");
}

#[test]
fn crashing_solver_is_reported_without_raising() {
    let dir = TempDir::new().unwrap();
    let mut model = Model::new(crashing_solver(&dir, 7));
    load_transport_lp(&mut model);

    model.optimize().unwrap();

    assert_eq!(model.get_status(), Status::Error);
    assert_eq!(model.get_solve_result(), "failure");
    assert_eq!(model.get_solve_result_num(), 999);
    assert_eq!(model.get_solve_exitcode(), 7);
    assert!(!dir.path().join("model.sol").exists());
}

#[test]
fn solver_receives_the_ampl_flag_and_options() {
    let dir = TempDir::new().unwrap();
    let sol = sol_text("stub: optimal solution found", 1, 2, &[1., 0.], 0);
    let solver = recording_solver(&dir, &sol)
        .with_option("outlev", 1)
        .with_option("tol", 0.5);
    let mut model = Model::new(solver);
    load_transport_lp(&mut model);

    model.optimize().unwrap();

    let args = fs::read_to_string(dir.path().join("args.txt")).unwrap();
    let args: Vec<&str> = args.lines().collect();
    assert!(args[0].ends_with("model.nl"));
    assert_eq!(args[1], "-AMPL");
    assert_eq!(args[2..].to_vec(), vec!["outlev=1", "tol=0.5"]);
}

#[template]
#[rstest]
pub fn result_bands(
    #[values(
        (0, Status::Optimal, "solved"),
        (150, Status::Optimal, "solved?"),
        (201, Status::Infeasible, "infeasible"),
        (350, Status::Unbounded, "unbounded"),
        (400, Status::UserLimit, "limit"),
        (599, Status::Error, "failure")
    )]
    band: (i64, Status, &'static str),
) {
}

#[apply(result_bands)]
fn solver_result_numbers_drive_the_status(band: (i64, Status, &'static str)) {
    let (num, expected_status, expected_result) = band;
    let dir = TempDir::new().unwrap();
    let sol = sol_text("stub finished", 1, 2, &[0., 0.], num);
    let mut model = Model::new(stub_solver(&dir, &sol));
    load_transport_lp(&mut model);

    model.optimize().unwrap();

    assert_eq!(model.get_status(), expected_status);
    assert_eq!(model.get_solve_result(), expected_result);
    assert_eq!(model.get_solve_result_num(), num);
}
