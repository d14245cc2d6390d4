//! The constraint oracle.
//!
//! Numeric side conditions are framed as satisfiability queries: to prove a
//! constraint we conjoin everything the environment knows with the
//! constraint's negation and ask whether that is unsatisfiable. A syntactic
//! fast path folds constants, substitutes ground equations and evaluates
//! ground atoms before anything is sent to the external solver; queries that
//! survive are printed to SMT-LIB 2 with densely indexed variables and
//! submitted to a `z3` subprocess. Launch failures, parse failures and
//! timeouts all collapse to [`SatResult::Unknown`], which provers treat as
//! "could not prove", never as an internal error.

use std::collections::BTreeMap;
use std::io::Write;
use std::process::{Command, Stdio};

use log::{debug, trace};
use num_bigint::BigInt;
use num_traits::Signed;
use thiserror::Error;

use crate::ast::subst::{self, kids_of_constraint, nexp_identical, nexp_simp};
use crate::ast::{Kid, NConstraint, Nexp};
use crate::env::Env;

/// What the external solver said.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SatResult {
    Sat,
    Unsat,
    Unknown,
}

/// Infrastructure failures talking to the solver. These never abort
/// checking; they degrade to [`SatResult::Unknown`].
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("failed to run solver: {0}")]
    Launch(#[from] std::io::Error),
    #[error("unexpected solver output: {0:?}")]
    Protocol(String),
}

/// Prove `nc` under the environment's constraints.
///
/// Returns `true` iff the solver reports that the conjunction of the
/// environment with the negation of `nc` is unsatisfiable.
pub fn prove(env: &Env, nc: &NConstraint) -> bool {
    let goal = match env.expand_constraint_synonyms(nc) {
        Ok(goal) => goal,
        Err(_) => return false,
    };
    let mut assumptions = Vec::new();
    for nc in env.get_constraints() {
        match env.expand_constraint_synonyms(&nc) {
            Ok(nc) => assumptions.push(expand_num_ids(env, nc)),
            Err(_) => return false,
        }
    }
    let goal = expand_num_ids(env, goal);

    if let Some(result) = prove_fast(&assumptions, &goal) {
        trace!("prove (fast path): {} |- {} = {}", assumptions.len(), goal, result);
        return result;
    }

    let negated = match subst::nc_negate(&goal) {
        Some(negated) => negated,
        None => return false,
    };
    assumptions.push(negated);
    match check_sat(env, &assumptions) {
        SatResult::Unsat => true,
        SatResult::Sat | SatResult::Unknown => false,
    }
}

/// Ask the solver for a concrete integer equal to `nexp` under the
/// environment's constraints. Used by `__solve` assertions.
pub fn solve(env: &Env, nexp: &Nexp) -> Option<BigInt> {
    let nexp = nexp_simp(&expand_num_ids_nexp(env, nexp.clone()));
    if let Nexp::Constant(n) = &nexp {
        return Some(n.clone());
    }

    let mut assumptions = Vec::new();
    for nc in env.get_constraints() {
        let nc = env.expand_constraint_synonyms(&nc).ok()?;
        assumptions.push(expand_num_ids(env, nc));
    }
    let witness = Kid::synthetic("solve#");
    assumptions.push(NConstraint::Equal(Nexp::Var(witness.clone()), nexp));
    match query_solver(env, &assumptions, Some(&witness)) {
        Ok((SatResult::Sat, Some(value))) => Some(value),
        _ => None,
    }
}

/// Whether the solver configuration supports integer division, which enables
/// the division strategy for multiplication equations during unification.
pub fn have_smt_div(env: &Env) -> bool {
    env.options().smt_div
}

// ---------------------------------------------------------------------------
// The syntactic fast path
// ---------------------------------------------------------------------------

/// Decide `assumptions |- goal` syntactically if possible.
fn prove_fast(assumptions: &[NConstraint], goal: &NConstraint) -> Option<bool> {
    // Conjunctive assumptions support their conjuncts individually.
    let mut flattened = Vec::with_capacity(assumptions.len());
    for nc in assumptions {
        flatten_conjuncts(nc, &mut flattened);
    }
    let mut assumptions = flattened;
    let mut goal = goal.clone();
    let mut seen = BTreeMap::new();
    loop {
        let bindings: BTreeMap<Kid, BigInt> = ground_bindings(&assumptions)
            .into_iter()
            .filter(|(kid, _)| !seen.contains_key(kid))
            .collect();
        if bindings.is_empty() {
            break;
        }
        for nc in &mut assumptions {
            *nc = apply_bindings(nc, &bindings);
        }
        goal = apply_bindings(&goal, &bindings);
        seen.extend(bindings);
    }
    let assumptions = assumptions;
    let goal = goal;

    // An unsatisfiable environment proves everything.
    if assumptions
        .iter()
        .any(|nc| eval_ground(nc) == Some(false))
    {
        return Some(true);
    }

    if let Some(result) = entails(&assumptions, &goal) {
        return Some(result);
    }

    // Case-split a small set-membership assumption: the obligation holds
    // exactly when it holds with the variable pinned to each member.
    if let Some(index) = assumptions.iter().position(|nc| {
        matches!(nc, NConstraint::Set(_, ns) if ns.len() <= SET_SPLIT_LIMIT)
    }) {
        if let NConstraint::Set(kid, ns) = assumptions[index].clone() {
            let mut all = true;
            for n in &ns {
                let mut split = assumptions.clone();
                split[index] = NConstraint::eq(Nexp::Var(kid.clone()), Nexp::Constant(n.clone()));
                match prove_fast(&split, &goal) {
                    Some(true) => {}
                    Some(false) => return Some(false),
                    None => {
                        all = false;
                        break;
                    }
                }
            }
            if all {
                return Some(true);
            }
        }
    }

    // Case-split a disjunctive assumption the same way.
    if let Some(index) = assumptions
        .iter()
        .position(|nc| matches!(nc, NConstraint::Or(_, _)))
    {
        if let NConstraint::Or(lhs, rhs) = assumptions[index].clone() {
            let mut split = assumptions.clone();
            split[index] = *lhs;
            let left = prove_fast(&split, &goal);
            split[index] = *rhs;
            let right = prove_fast(&split, &goal);
            match (left, right) {
                (Some(true), Some(true)) => return Some(true),
                (Some(false), _) | (_, Some(false)) => return Some(false),
                _ => {}
            }
        }
    }

    // A ground goal that evaluates false can only be proved by an
    // unsatisfiable environment, which the check above did not find; if the
    // environment is entirely ground, that is a definitive no.
    if eval_ground(&goal) == Some(false)
        && assumptions.iter().all(|nc| eval_ground(nc).is_some())
    {
        return Some(false);
    }

    None
}

/// Only small membership domains are worth enumerating syntactically.
const SET_SPLIT_LIMIT: usize = 16;

fn flatten_conjuncts(nc: &NConstraint, out: &mut Vec<NConstraint>) {
    match nc {
        NConstraint::And(lhs, rhs) => {
            flatten_conjuncts(lhs, out);
            flatten_conjuncts(rhs, out);
        }
        nc => out.push(nc.clone()),
    }
}

fn entails(assumptions: &[NConstraint], goal: &NConstraint) -> Option<bool> {
    if eval_ground(goal) == Some(true) {
        return Some(true);
    }
    // The goal is syntactically among the assumptions.
    if assumptions.iter().any(|nc| nc == goal) {
        return Some(true);
    }
    match goal {
        // Trivial reflexive comparisons, e.g. `n = n`.
        NConstraint::Equal(lhs, rhs) | NConstraint::BoundedLe(lhs, rhs)
        | NConstraint::BoundedGe(lhs, rhs)
            if nexp_identical(lhs, rhs) =>
        {
            Some(true)
        }
        NConstraint::And(lhs, rhs) => {
            match (entails(assumptions, lhs), entails(assumptions, rhs)) {
                (Some(true), Some(true)) => Some(true),
                (Some(false), _) | (_, Some(false)) => Some(false),
                _ => None,
            }
        }
        NConstraint::Or(lhs, rhs) => {
            match (entails(assumptions, lhs), entails(assumptions, rhs)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Collect `kid = constant` equations from a conjunction of assumptions.
fn ground_bindings(assumptions: &[NConstraint]) -> BTreeMap<Kid, BigInt> {
    let mut bindings = BTreeMap::new();
    for nc in assumptions {
        if let NConstraint::Equal(lhs, rhs) = nc {
            match (nexp_simp(lhs), nexp_simp(rhs)) {
                (Nexp::Var(kid), Nexp::Constant(n)) | (Nexp::Constant(n), Nexp::Var(kid)) => {
                    bindings.entry(kid).or_insert(n);
                }
                _ => {}
            }
        }
    }
    bindings
}

fn apply_bindings(nc: &NConstraint, bindings: &BTreeMap<Kid, BigInt>) -> NConstraint {
    let mut nc = nc.clone();
    for (kid, n) in bindings {
        nc = subst::subst_nexp_constraint(&nc, kid, &Nexp::Constant(n.clone()));
    }
    nc
}

/// Evaluate a constraint with no free variables.
fn eval_ground(nc: &NConstraint) -> Option<bool> {
    match nc {
        NConstraint::Equal(lhs, rhs) => Some(constant(lhs)? == constant(rhs)?),
        NConstraint::NotEqual(lhs, rhs) => Some(constant(lhs)? != constant(rhs)?),
        NConstraint::BoundedLe(lhs, rhs) => Some(constant(lhs)? <= constant(rhs)?),
        NConstraint::BoundedGe(lhs, rhs) => Some(constant(lhs)? >= constant(rhs)?),
        NConstraint::Set(_, _) => None,
        NConstraint::Or(lhs, rhs) => match (eval_ground(lhs), eval_ground(rhs)) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        NConstraint::And(lhs, rhs) => match (eval_ground(lhs), eval_ground(rhs)) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        NConstraint::True => Some(true),
        NConstraint::False => Some(false),
        NConstraint::App(_, _) => None,
    }
}

fn constant(nexp: &Nexp) -> Option<BigInt> {
    match nexp_simp(nexp) {
        Nexp::Constant(n) => Some(n),
        _ => None,
    }
}

/// Replace named numeric constants with their definitions.
fn expand_num_ids(env: &Env, nc: NConstraint) -> NConstraint {
    match nc {
        NConstraint::Equal(lhs, rhs) => NConstraint::Equal(
            expand_num_ids_nexp(env, lhs),
            expand_num_ids_nexp(env, rhs),
        ),
        NConstraint::NotEqual(lhs, rhs) => NConstraint::NotEqual(
            expand_num_ids_nexp(env, lhs),
            expand_num_ids_nexp(env, rhs),
        ),
        NConstraint::BoundedLe(lhs, rhs) => NConstraint::BoundedLe(
            expand_num_ids_nexp(env, lhs),
            expand_num_ids_nexp(env, rhs),
        ),
        NConstraint::BoundedGe(lhs, rhs) => NConstraint::BoundedGe(
            expand_num_ids_nexp(env, lhs),
            expand_num_ids_nexp(env, rhs),
        ),
        NConstraint::Or(lhs, rhs) => NConstraint::or(
            expand_num_ids(env, *lhs),
            expand_num_ids(env, *rhs),
        ),
        NConstraint::And(lhs, rhs) => NConstraint::And(
            Box::new(expand_num_ids(env, *lhs)),
            Box::new(expand_num_ids(env, *rhs)),
        ),
        nc => nc,
    }
}

fn expand_num_ids_nexp(env: &Env, nexp: Nexp) -> Nexp {
    match nexp {
        Nexp::Id(id) => match env.get_num_def(&id) {
            Ok(nexp) => expand_num_ids_nexp(env, nexp),
            Err(_) => Nexp::Id(id),
        },
        Nexp::Var(_) | Nexp::Constant(_) => nexp,
        Nexp::App(id, args) => Nexp::App(
            id,
            args.into_iter()
                .map(|arg| expand_num_ids_nexp(env, arg))
                .collect(),
        ),
        Nexp::Sum(lhs, rhs) => Nexp::sum(
            expand_num_ids_nexp(env, *lhs),
            expand_num_ids_nexp(env, *rhs),
        ),
        Nexp::Minus(lhs, rhs) => Nexp::minus(
            expand_num_ids_nexp(env, *lhs),
            expand_num_ids_nexp(env, *rhs),
        ),
        Nexp::Times(lhs, rhs) => Nexp::times(
            expand_num_ids_nexp(env, *lhs),
            expand_num_ids_nexp(env, *rhs),
        ),
        Nexp::Exp(exp) => Nexp::pow2(expand_num_ids_nexp(env, *exp)),
        Nexp::Neg(exp) => Nexp::neg(expand_num_ids_nexp(env, *exp)),
    }
}

// ---------------------------------------------------------------------------
// SMT-LIB lowering and the external process
// ---------------------------------------------------------------------------

/// Check satisfiability of a conjunction of constraints.
fn check_sat(env: &Env, constraints: &[NConstraint]) -> SatResult {
    match query_solver(env, constraints, None) {
        Ok((result, _)) => result,
        Err(err) => {
            debug!("solver unavailable: {}", err);
            SatResult::Unknown
        }
    }
}

fn query_solver(
    env: &Env,
    constraints: &[NConstraint],
    witness: Option<&Kid>,
) -> Result<(SatResult, Option<BigInt>), SolverError> {
    let script = match smtlib_script(env, constraints, witness) {
        Some(script) => script,
        // Something in the query cannot be expressed (e.g. a symbolic
        // exponent); be conservative.
        None => return Ok((SatResult::Unknown, None)),
    };
    if env.options().tc_debug >= 2 {
        trace!("solver query:\n{}", script);
    }

    let mut child = Command::new(&env.options().solver_path)
        .args(["-in", "-smt2"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;
    child
        .stdin
        .as_mut()
        .expect("solver stdin was piped")
        .write_all(script.as_bytes())?;
    let output = child.wait_with_output()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut lines = stdout.lines();

    let result = match lines.next() {
        Some("sat") => SatResult::Sat,
        Some("unsat") => SatResult::Unsat,
        Some("unknown") | None => SatResult::Unknown,
        Some(other) => return Err(SolverError::Protocol(other.to_owned())),
    };
    debug!("solver answered {:?}", result);

    let value = match (result, witness) {
        (SatResult::Sat, Some(_)) => parse_model_value(&lines.collect::<Vec<_>>().join(" ")),
        _ => None,
    };
    Ok((result, value))
}

/// Print a full SMT-LIB 2 script for the constraints, declaring every
/// variable with a dense index so the solver never sees user names.
fn smtlib_script(
    env: &Env,
    constraints: &[NConstraint],
    witness: Option<&Kid>,
) -> Option<String> {
    let mut vars: BTreeMap<Kid, usize> = BTreeMap::new();
    for nc in constraints {
        for kid in kids_of_constraint(nc) {
            let next = vars.len();
            vars.entry(kid).or_insert(next);
        }
    }

    let mut script = String::new();
    script.push_str(&format!(
        "(set-option :timeout {})\n",
        env.options().solver_timeout_ms
    ));
    for index in 0..vars.len() {
        script.push_str(&format!("(declare-const v{} Int)\n", index));
    }
    for (symbol, arity) in uninterpreted(env, constraints) {
        let params = vec!["Int"; arity].join(" ");
        script.push_str(&format!("(declare-fun {} ({}) Int)\n", symbol, params));
    }
    for nc in constraints {
        script.push_str(&format!("(assert {})\n", smt_constraint(env, nc, &vars)?));
    }
    script.push_str("(check-sat)\n");
    if let Some(witness) = witness {
        let index = vars.get(witness)?;
        script.push_str(&format!("(get-value (v{}))\n", index));
    }
    Some(script)
}

fn uninterpreted(env: &Env, constraints: &[NConstraint]) -> Vec<(String, usize)> {
    fn walk_nexp(env: &Env, nexp: &Nexp, symbols: &mut Vec<(String, usize)>) {
        match nexp {
            Nexp::App(id, args) => {
                if let Some(symbol) = env.get_smt_op(id) {
                    if !symbols.iter().any(|(existing, _)| existing == symbol) {
                        symbols.push((symbol.clone(), args.len()));
                    }
                }
                args.iter().for_each(|arg| walk_nexp(env, arg, symbols));
            }
            Nexp::Sum(lhs, rhs) | Nexp::Minus(lhs, rhs) | Nexp::Times(lhs, rhs) => {
                walk_nexp(env, lhs, symbols);
                walk_nexp(env, rhs, symbols);
            }
            Nexp::Exp(exp) | Nexp::Neg(exp) => walk_nexp(env, exp, symbols),
            Nexp::Id(_) | Nexp::Var(_) | Nexp::Constant(_) => {}
        }
    }
    fn walk(env: &Env, nc: &NConstraint, symbols: &mut Vec<(String, usize)>) {
        match nc {
            NConstraint::Equal(lhs, rhs)
            | NConstraint::NotEqual(lhs, rhs)
            | NConstraint::BoundedLe(lhs, rhs)
            | NConstraint::BoundedGe(lhs, rhs) => {
                walk_nexp(env, lhs, symbols);
                walk_nexp(env, rhs, symbols);
            }
            NConstraint::Or(lhs, rhs) | NConstraint::And(lhs, rhs) => {
                walk(env, lhs, symbols);
                walk(env, rhs, symbols);
            }
            NConstraint::Set(_, _)
            | NConstraint::True
            | NConstraint::False
            | NConstraint::App(_, _) => {}
        }
    }
    let mut symbols = Vec::new();
    for nc in constraints {
        walk(env, nc, &mut symbols);
    }
    symbols
}

fn smt_constraint(
    env: &Env,
    nc: &NConstraint,
    vars: &BTreeMap<Kid, usize>,
) -> Option<String> {
    match nc {
        NConstraint::Equal(lhs, rhs) => Some(format!(
            "(= {} {})",
            smt_nexp(env, lhs, vars)?,
            smt_nexp(env, rhs, vars)?
        )),
        NConstraint::NotEqual(lhs, rhs) => Some(format!(
            "(not (= {} {}))",
            smt_nexp(env, lhs, vars)?,
            smt_nexp(env, rhs, vars)?
        )),
        NConstraint::BoundedLe(lhs, rhs) => Some(format!(
            "(<= {} {})",
            smt_nexp(env, lhs, vars)?,
            smt_nexp(env, rhs, vars)?
        )),
        NConstraint::BoundedGe(lhs, rhs) => Some(format!(
            "(>= {} {})",
            smt_nexp(env, lhs, vars)?,
            smt_nexp(env, rhs, vars)?
        )),
        NConstraint::Set(kid, ns) => {
            let var = format!("v{}", vars.get(kid)?);
            let disjuncts: Vec<String> = ns
                .iter()
                .map(|n| format!("(= {} {})", var, smt_int(n)))
                .collect();
            Some(format!("(or {})", disjuncts.join(" ")))
        }
        NConstraint::Or(lhs, rhs) => Some(format!(
            "(or {} {})",
            smt_constraint(env, lhs, vars)?,
            smt_constraint(env, rhs, vars)?
        )),
        NConstraint::And(lhs, rhs) => Some(format!(
            "(and {} {})",
            smt_constraint(env, lhs, vars)?,
            smt_constraint(env, rhs, vars)?
        )),
        NConstraint::True => Some("true".to_owned()),
        NConstraint::False => Some("false".to_owned()),
        // Synonyms are expanded before lowering.
        NConstraint::App(_, _) => None,
    }
}

fn smt_nexp(env: &Env, nexp: &Nexp, vars: &BTreeMap<Kid, usize>) -> Option<String> {
    match nexp {
        Nexp::Id(_) => None,
        Nexp::Var(kid) => Some(format!("v{}", vars.get(kid)?)),
        Nexp::Constant(n) => Some(smt_int(n)),
        Nexp::App(id, args) => {
            let symbol = env.get_smt_op(id)?;
            let args = args
                .iter()
                .map(|arg| smt_nexp(env, arg, vars))
                .collect::<Option<Vec<_>>>()?;
            Some(format!("({} {})", symbol, args.join(" ")))
        }
        Nexp::Sum(lhs, rhs) => Some(format!(
            "(+ {} {})",
            smt_nexp(env, lhs, vars)?,
            smt_nexp(env, rhs, vars)?
        )),
        Nexp::Minus(lhs, rhs) => Some(format!(
            "(- {} {})",
            smt_nexp(env, lhs, vars)?,
            smt_nexp(env, rhs, vars)?
        )),
        Nexp::Times(lhs, rhs) => Some(format!(
            "(* {} {})",
            smt_nexp(env, lhs, vars)?,
            smt_nexp(env, rhs, vars)?
        )),
        // Only constant exponents can be expressed linearly.
        Nexp::Exp(exp) => match nexp_simp(exp) {
            Nexp::Constant(n) => subst::pow2(&n).map(|n| smt_int(&n)),
            _ => None,
        },
        Nexp::Neg(exp) => Some(format!("(- {})", smt_nexp(env, exp, vars)?)),
    }
}

fn smt_int(n: &BigInt) -> String {
    if n.is_negative() {
        format!("(- {})", n.magnitude())
    } else {
        n.to_string()
    }
}

/// Parse a `(get-value (vN))` answer of the form `((vN 5))` or
/// `((vN (- 5)))`.
fn parse_model_value(text: &str) -> Option<BigInt> {
    let cleaned: String = text
        .chars()
        .map(|c| if c == '(' || c == ')' { ' ' } else { c })
        .collect();
    let mut tokens = cleaned.split_whitespace();
    let _name = tokens.next()?;
    match tokens.next()? {
        "-" => tokens.next()?.parse::<BigInt>().ok().map(|n| -n),
        token => token.parse::<BigInt>().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Kind;

    fn kid(name: &str) -> Kid {
        Kid::synthetic(name)
    }

    fn env_with(constraints: &[NConstraint]) -> Env {
        let mut env = Env::new();
        for nc in constraints {
            for k in kids_of_constraint(nc) {
                if env.get_typ_var(&k).is_none() {
                    env.add_typ_var(k, Kind::Int);
                }
            }
            env.add_constraint(nc.clone());
        }
        env
    }

    #[test]
    fn proves_ground_truths_without_a_solver() {
        let env = Env::new();
        assert!(prove(&env, &NConstraint::True));
        assert!(prove(
            &env,
            &NConstraint::eq(Nexp::constant(4), Nexp::constant(4))
        ));
        assert!(prove(
            &env,
            &NConstraint::lteq(Nexp::constant(3), Nexp::constant(7))
        ));
        assert!(!prove(
            &env,
            &NConstraint::eq(Nexp::constant(6), Nexp::constant(7))
        ));
    }

    #[test]
    fn proves_reflexive_comparisons() {
        let mut env = Env::new();
        env.add_typ_var(kid("n"), Kind::Int);
        let n = Nexp::var(kid("n"));
        assert!(prove(&env, &NConstraint::eq(n.clone(), n.clone())));
        assert!(prove(&env, &NConstraint::lteq(n.clone(), n)));
    }

    #[test]
    fn ground_equations_propagate_through_the_goal() {
        let env = env_with(&[NConstraint::eq(Nexp::var(kid("n")), Nexp::constant(8))]);
        assert!(prove(
            &env,
            &NConstraint::Set(kid("n"), vec![8.into(), 16.into()])
        ));
        assert!(!prove(
            &env,
            &NConstraint::Set(kid("n"), vec![4.into(), 16.into()])
        ));
    }

    #[test]
    fn assumption_reuse_is_syntactic() {
        let env = env_with(&[NConstraint::gteq(Nexp::var(kid("x")), Nexp::constant(1))]);
        assert!(prove(
            &env,
            &NConstraint::gteq(Nexp::var(kid("x")), Nexp::constant(1))
        ));
    }

    #[test]
    fn unsatisfiable_environment_proves_anything() {
        let env = env_with(&[NConstraint::eq(Nexp::constant(0), Nexp::constant(1))]);
        assert!(prove(
            &env,
            &NConstraint::eq(Nexp::constant(6), Nexp::constant(7))
        ));
    }

    #[test]
    fn conjunctions_split() {
        let env = Env::new();
        let goal = NConstraint::and(
            NConstraint::lteq(Nexp::constant(0), Nexp::constant(5)),
            NConstraint::gteq(Nexp::constant(9), Nexp::constant(5)),
        );
        assert!(prove(&env, &goal));
    }

    #[test]
    fn solve_returns_ground_witnesses() {
        let env = Env::new();
        assert_eq!(
            solve(&env, &Nexp::sum(Nexp::constant(30), Nexp::constant(2))),
            Some(32.into())
        );
    }

    #[test]
    fn model_values_parse() {
        assert_eq!(parse_model_value("((v0 5))"), Some(5.into()));
        assert_eq!(parse_model_value("((v0 (- 5)))"), Some((-5).into()));
    }
}
