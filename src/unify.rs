//! Unification of types against types.
//!
//! `unify(env, pattern, actual)` finds substitutions for the goal variables
//! of `pattern` — its type/numeric/order variables that are neither bound in
//! the environment nor free in `actual` — that make the two sides equal.
//! Arithmetic equations that cannot be solved syntactically are sourced to
//! the oracle as side-equations.

use std::collections::BTreeMap;

use log::trace;
use num_bigint::BigInt;
use num_traits::{Signed, Zero};

use crate::ast::subst::{
    self, kids_of_nexp, kids_of_typ, nexp_identical, nexp_simp, rename_kid_constraint,
    rename_kid_typ, KidSet,
};
use crate::ast::{Kid, KindedId, NConstraint, Nexp, Order, Typ, TypArg};
use crate::env::Env;
use crate::reporting::TypeError;
use crate::solver;
use crate::source::Span;

/// What a goal variable was unified with.
#[derive(Debug, Clone)]
pub enum Uvar {
    Nexp(Nexp),
    Typ(Typ),
    Order(Order),
}

impl std::fmt::Display for Uvar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Uvar::Nexp(nexp) => write!(f, "{}", nexp),
            Uvar::Typ(typ) => write!(f, "{}", typ),
            Uvar::Order(order) => write!(f, "{}", order),
        }
    }
}

/// A substitution from goal variables to their solutions.
pub type Unifier = BTreeMap<Kid, Uvar>;

/// The result of a unification: the substitution, plus any existential the
/// actual side was opened from — the caller is responsible for binding the
/// opened variables and constraint in its environment.
#[derive(Debug, Clone)]
pub struct Unification {
    pub unifier: Unifier,
    pub opened: Vec<KindedId>,
    pub constraint: Option<NConstraint>,
}

/// Unify `pattern` against `actual`.
pub fn unify(env: &Env, pattern: &Typ, actual: &Typ, span: Span) -> Result<Unification, TypeError> {
    unify_tagged(env, pattern, actual, None, span)
}

/// Unify, renaming any existential opened on the actual side with the given
/// tag so that variables opened for different call arguments never capture
/// each other.
pub fn unify_tagged(
    env: &Env,
    pattern: &Typ,
    actual: &Typ,
    tag: Option<&str>,
    span: Span,
) -> Result<Unification, TypeError> {
    trace!("unify: {} with {}", pattern, actual);

    let mut opened = Vec::new();
    let mut constraint = None;
    let actual = match actual {
        Typ::Exist(kids, nc, body) => {
            let mut nc = nc.clone();
            let mut body = body.as_ref().clone();
            for kinded in kids {
                let fresh = env.fresh_existential(tag);
                nc = rename_kid_constraint(&nc, &kinded.kid, &fresh);
                body = rename_kid_typ(&body, &kinded.kid, &fresh);
                opened.push(KindedId::new(fresh, kinded.kind));
            }
            constraint = Some(nc);
            body
        }
        actual => actual.clone(),
    };

    let mut goals: KidSet = kids_of_typ(pattern);
    for kid in kids_of_typ(&actual) {
        goals.remove(&kid);
    }
    goals.retain(|kid| env.get_typ_var(kid).is_none());

    let unifier = unify_typ(env, &goals, pattern, &actual, span)?;
    Ok(Unification {
        unifier,
        opened,
        constraint,
    })
}

fn unify_typ(
    env: &Env,
    goals: &KidSet,
    pattern: &Typ,
    actual: &Typ,
    span: Span,
) -> Result<Unifier, TypeError> {
    let mismatch = || TypeError::Mismatch {
        span,
        expected: pattern.clone(),
        found: actual.clone(),
    };

    match (pattern, actual) {
        (Typ::Var(kid), actual) if goals.contains(kid) => {
            Ok(Unifier::from([(kid.clone(), Uvar::Typ(actual.clone()))]))
        }
        (pattern, Typ::Var(kid)) if goals.contains(kid) => {
            Ok(Unifier::from([(kid.clone(), Uvar::Typ(pattern.clone()))]))
        }
        (Typ::Var(k1), Typ::Var(k2)) if k1 == k2 => Ok(Unifier::new()),
        (Typ::Id(id1), Typ::Id(id2)) if id1 == id2 => Ok(Unifier::new()),
        (Typ::Unknown, _) | (_, Typ::Unknown) if env.allow_unknowns() => Ok(Unifier::new()),
        (Typ::Tuple(pats), Typ::Tuple(acts)) if pats.len() == acts.len() => {
            let positions: Vec<(Typ, Typ)> = pats
                .iter()
                .cloned()
                .zip(acts.iter().cloned())
                .collect();
            unify_positions(env, goals, positions, span)
        }
        (Typ::App(id1, args1), Typ::App(id2, args2))
            if id1 == id2 && args1.len() == args2.len() =>
        {
            unify_arg_positions(env, goals, args1, args2, span)
        }
        (Typ::Fn(args1, ret1, _), Typ::Fn(args2, ret2, _)) if args1.len() == args2.len() => {
            let mut positions: Vec<(Typ, Typ)> = args1
                .iter()
                .cloned()
                .zip(args2.iter().cloned())
                .collect();
            positions.push((ret1.as_ref().clone(), ret2.as_ref().clone()));
            unify_positions(env, goals, positions, span)
        }
        (Typ::Bidir(l1, r1), Typ::Bidir(l2, r2)) => {
            let positions = vec![
                (l1.as_ref().clone(), l2.as_ref().clone()),
                (r1.as_ref().clone(), r2.as_ref().clone()),
            ];
            unify_positions(env, goals, positions, span)
        }
        (Typ::Exist(..), Typ::Exist(..)) if subst::alpha_equivalent(pattern, actual) => {
            Ok(Unifier::new())
        }
        _ => Err(mismatch()),
    }
}

/// Unify a list of positions, making up to as many passes as there are
/// positions: solved positions contribute their unifiers, which are
/// substituted into unresolved positions before the next pass. A pass that
/// resolves nothing while positions remain is an error.
fn unify_positions(
    env: &Env,
    goals: &KidSet,
    positions: Vec<(Typ, Typ)>,
    span: Span,
) -> Result<Unifier, TypeError> {
    let mut unifier = Unifier::new();
    let mut unresolved: Vec<(Typ, Typ)> = positions;

    while !unresolved.is_empty() {
        let mut next = Vec::new();
        let mut first_error = None;
        let before = unresolved.len();
        for (pattern, actual) in unresolved.drain(..) {
            let pattern = apply_unifier_typ(&pattern, &unifier);
            match unify_typ(env, goals, &pattern, &actual, span) {
                Ok(new) => merge_unifiers(&mut unifier, new, span)?,
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                    next.push((pattern, actual));
                }
            }
        }
        if next.len() == before {
            // No position resolved this pass.
            return Err(first_error.unwrap_or_else(|| {
                TypeError::other(span, "unification made no progress")
            }));
        }
        unresolved = next;
    }
    Ok(unifier)
}

fn unify_arg_positions(
    env: &Env,
    goals: &KidSet,
    pats: &[TypArg],
    acts: &[TypArg],
    span: Span,
) -> Result<Unifier, TypeError> {
    let mut unifier = Unifier::new();
    let mut unresolved: Vec<(TypArg, TypArg)> = pats
        .iter()
        .cloned()
        .zip(acts.iter().cloned())
        .collect();

    while !unresolved.is_empty() {
        let mut next = Vec::new();
        let mut first_error = None;
        let before = unresolved.len();
        for (pattern, actual) in unresolved.drain(..) {
            let pattern = apply_unifier_typ_arg(&pattern, &unifier);
            let result = match (&pattern, &actual) {
                (TypArg::Nexp(np), TypArg::Nexp(na)) => unify_nexp(env, goals, np, na, span),
                (TypArg::Typ(tp), TypArg::Typ(ta)) => unify_typ(env, goals, tp, ta, span),
                (TypArg::Order(op), TypArg::Order(oa)) => unify_order(goals, op, oa, span),
                _ => Err(TypeError::other(span, "kind mismatch in type arguments")),
            };
            match result {
                Ok(new) => merge_unifiers(&mut unifier, new, span)?,
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                    next.push((pattern, actual));
                }
            }
        }
        if next.len() == before {
            return Err(first_error.unwrap_or_else(|| {
                TypeError::other(span, "unification made no progress")
            }));
        }
        unresolved = next;
    }
    Ok(unifier)
}

fn unify_order(
    goals: &KidSet,
    pattern: &Order,
    actual: &Order,
    span: Span,
) -> Result<Unifier, TypeError> {
    match (pattern, actual) {
        (Order::Var(kid), actual) if goals.contains(kid) => {
            Ok(Unifier::from([(kid.clone(), Uvar::Order(actual.clone()))]))
        }
        (pattern, Order::Var(kid)) if goals.contains(kid) => {
            Ok(Unifier::from([(kid.clone(), Uvar::Order(pattern.clone()))]))
        }
        (pattern, actual) if pattern == actual => Ok(Unifier::new()),
        _ => Err(TypeError::other(
            span,
            format!("cannot unify order {} with {}", pattern, actual),
        )),
    }
}

/// Solve a numeric equation `pattern = actual` for the goal variables.
pub fn unify_nexp(
    env: &Env,
    goals: &KidSet,
    pattern: &Nexp,
    actual: &Nexp,
    span: Span,
) -> Result<Unifier, TypeError> {
    let pattern = nexp_simp(pattern);
    let actual = nexp_simp(actual);
    let contains_goal = |nexp: &Nexp| kids_of_nexp(nexp).iter().any(|kid| goals.contains(kid));

    if !contains_goal(&pattern) && !contains_goal(&actual) {
        return defer_to_oracle(env, &pattern, &actual, span);
    }

    match (&pattern, &actual) {
        (Nexp::Constant(c1), Nexp::Constant(c2)) => {
            if c1 == c2 {
                Ok(Unifier::new())
            } else {
                Err(TypeError::Mismatch {
                    span,
                    expected: Typ::atom(pattern.clone()),
                    found: Typ::atom(actual.clone()),
                })
            }
        }
        (Nexp::Var(kid), actual) if goals.contains(kid) => {
            Ok(Unifier::from([(kid.clone(), Uvar::Nexp(actual.clone()))]))
        }
        (pattern, Nexp::Var(kid)) if goals.contains(kid) => {
            Ok(Unifier::from([(kid.clone(), Uvar::Nexp(pattern.clone()))]))
        }
        (Nexp::Sum(e1, e2), rhs) => {
            if !contains_goal(e1) {
                unify_nexp(env, goals, e2, &nexp_simp(&Nexp::minus((*rhs).clone(), e1.as_ref().clone())), span)
            } else if !contains_goal(e2) {
                unify_nexp(env, goals, e1, &nexp_simp(&Nexp::minus((*rhs).clone(), e2.as_ref().clone())), span)
            } else {
                defer_to_oracle(env, &pattern, &actual, span)
            }
        }
        (Nexp::Minus(e1, e2), rhs) => {
            if !contains_goal(e1) {
                // e1 - e2 = rhs, so e2 = e1 - rhs.
                unify_nexp(env, goals, e2, &nexp_simp(&Nexp::minus(e1.as_ref().clone(), (*rhs).clone())), span)
            } else if !contains_goal(e2) {
                unify_nexp(env, goals, e1, &nexp_simp(&Nexp::sum((*rhs).clone(), e2.as_ref().clone())), span)
            } else {
                defer_to_oracle(env, &pattern, &actual, span)
            }
        }
        (Nexp::Times(e1, e2), rhs) => {
            unify_times(env, goals, e1, e2, rhs, &pattern, &actual, span)
        }
        (Nexp::Exp(e), Nexp::Exp(e2)) => unify_nexp(env, goals, e, e2, span),
        (Nexp::Exp(e), Nexp::Constant(c)) => match log2_exact(c) {
            Some(log) => unify_nexp(env, goals, e, &Nexp::Constant(log), span),
            None => defer_to_oracle(env, &pattern, &actual, span),
        },
        (Nexp::Neg(e), Nexp::Constant(c)) => {
            unify_nexp(env, goals, e, &Nexp::Constant(-c.clone()), span)
        }
        (Nexp::App(id1, args1), Nexp::App(id2, args2))
            if id1 == id2 && args1.len() == args2.len() =>
        {
            let mut unifier = Unifier::new();
            for (arg1, arg2) in args1.iter().zip(args2.iter()) {
                let new = unify_nexp(env, goals, arg1, arg2, span)?;
                merge_unifiers(&mut unifier, new, span)?;
            }
            Ok(unifier)
        }
        _ => defer_to_oracle(env, &pattern, &actual, span),
    }
}

/// The multiplication strategy: a goal under a constant factor solves by
/// exact division of a constant product. The N-exp grammar has no division
/// constructor, so a symbolic product defers to the oracle regardless of
/// whether the solver supports `div`.
#[allow(clippy::too_many_arguments)]
fn unify_times(
    env: &Env,
    goals: &KidSet,
    e1: &Nexp,
    e2: &Nexp,
    rhs: &Nexp,
    pattern: &Nexp,
    actual: &Nexp,
    span: Span,
) -> Result<Unifier, TypeError> {
    let factor_and_goal = match (nexp_simp(e1), e2) {
        (Nexp::Constant(c), goal_side) => Some((c, goal_side.clone())),
        _ => match (nexp_simp(e2), e1) {
            (Nexp::Constant(c), goal_side) => Some((c, goal_side.clone())),
            _ => None,
        },
    };
    if let (Some((factor, goal_side)), Nexp::Constant(product)) = (factor_and_goal, rhs) {
        if !factor.is_zero() && (product % &factor).is_zero() {
            let quotient = product / &factor;
            return unify_nexp(env, goals, &goal_side, &Nexp::Constant(quotient), span);
        }
        return Err(TypeError::Mismatch {
            span,
            expected: Typ::atom(pattern.clone()),
            found: Typ::atom(actual.clone()),
        });
    }
    defer_to_oracle(env, pattern, actual, span)
}

/// Any other arithmetic shape: succeed with no unifier if the oracle can
/// prove the two sides equal.
fn defer_to_oracle(
    env: &Env,
    pattern: &Nexp,
    actual: &Nexp,
    span: Span,
) -> Result<Unifier, TypeError> {
    if nexp_identical(pattern, actual) {
        return Ok(Unifier::new());
    }
    let equation = NConstraint::eq(pattern.clone(), actual.clone());
    if solver::prove(env, &equation) {
        Ok(Unifier::new())
    } else {
        Err(TypeError::CouldNotProve {
            span,
            constraint: equation,
            constraints: env.get_constraints(),
        })
    }
}

fn log2_exact(n: &BigInt) -> Option<BigInt> {
    if !n.is_positive() {
        return None;
    }
    let bits = n.bits() - 1;
    if (BigInt::from(1) << bits) == *n {
        Some(BigInt::from(bits))
    } else {
        None
    }
}

/// Merge a new unifier into an accumulator, requiring agreement on shared
/// variables.
pub fn merge_unifiers(
    unifier: &mut Unifier,
    new: Unifier,
    span: Span,
) -> Result<(), TypeError> {
    use std::collections::btree_map::Entry;

    for (kid, uvar) in new {
        match unifier.entry(kid) {
            Entry::Vacant(entry) => {
                entry.insert(uvar);
            }
            Entry::Occupied(entry) => {
                let consistent = match (entry.get(), &uvar) {
                    (Uvar::Nexp(a), Uvar::Nexp(b)) => nexp_identical(a, b),
                    (Uvar::Typ(a), Uvar::Typ(b)) => subst::alpha_equivalent(a, b),
                    (Uvar::Order(a), Uvar::Order(b)) => a == b,
                    _ => false,
                };
                if !consistent {
                    return Err(TypeError::other(
                        span,
                        format!(
                            "`{}` unified inconsistently: {} and {}",
                            entry.key(),
                            entry.get(),
                            uvar
                        ),
                    ));
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Applying unifiers
// ---------------------------------------------------------------------------

pub fn apply_unifier_typ(typ: &Typ, unifier: &Unifier) -> Typ {
    let mut typ = typ.clone();
    for (kid, uvar) in unifier {
        typ = match uvar {
            Uvar::Nexp(nexp) => subst::subst_nexp_typ(&typ, kid, nexp),
            Uvar::Typ(with) => subst::subst_typ(&typ, kid, with),
            Uvar::Order(order) => subst::subst_order(&typ, kid, order),
        };
    }
    typ
}

pub fn apply_unifier_typ_arg(arg: &TypArg, unifier: &Unifier) -> TypArg {
    match arg {
        TypArg::Nexp(nexp) => TypArg::Nexp(apply_unifier_nexp(nexp, unifier)),
        TypArg::Typ(typ) => TypArg::Typ(apply_unifier_typ(typ, unifier)),
        TypArg::Order(Order::Var(kid)) => match unifier.get(kid) {
            Some(Uvar::Order(order)) => TypArg::Order(order.clone()),
            _ => arg.clone(),
        },
        TypArg::Order(_) => arg.clone(),
    }
}

pub fn apply_unifier_nexp(nexp: &Nexp, unifier: &Unifier) -> Nexp {
    let mut nexp = nexp.clone();
    for (kid, uvar) in unifier {
        if let Uvar::Nexp(with) = uvar {
            nexp = subst::subst_nexp(&nexp, kid, with);
        }
    }
    nexp
}

pub fn apply_unifier_constraint(nc: &NConstraint, unifier: &Unifier) -> NConstraint {
    let mut nc = nc.clone();
    for (kid, uvar) in unifier {
        if let Uvar::Nexp(with) = uvar {
            nc = subst::subst_nexp_constraint(&nc, kid, with);
        }
    }
    nc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Kind;

    fn kid(name: &str) -> Kid {
        Kid::synthetic(name)
    }

    fn nexp_binding(unification: &Unification, name: &str) -> Nexp {
        match unification.unifier.get(&kid(name)) {
            Some(Uvar::Nexp(nexp)) => nexp.clone(),
            other => panic!("expected a numeric binding for '{}, got {:?}", name, other),
        }
    }

    #[test]
    fn goal_variable_binds_to_constant() {
        let env = Env::new();
        let result = unify(
            &env,
            &Typ::atom(Nexp::var(kid("n"))),
            &Typ::atom(Nexp::constant(4)),
            Span::Empty,
        )
        .unwrap();
        assert_eq!(nexp_binding(&result, "n"), Nexp::constant(4));
    }

    #[test]
    fn env_bound_variables_are_rigid() {
        let mut env = Env::new();
        env.add_typ_var(kid("n"), Kind::Int);
        // With 'n rigid and nothing known about it, atom('n) does not unify
        // with atom(4).
        let result = unify(
            &env,
            &Typ::atom(Nexp::var(kid("n"))),
            &Typ::atom(Nexp::constant(4)),
            Span::Empty,
        );
        assert!(result.is_err());
        // But it does once the environment knows they are equal.
        let mut env = env.clone();
        env.add_constraint(NConstraint::eq(Nexp::var(kid("n")), Nexp::constant(4)));
        let result = unify(
            &env,
            &Typ::atom(Nexp::var(kid("n"))),
            &Typ::atom(Nexp::constant(4)),
            Span::Empty,
        )
        .unwrap();
        assert!(result.unifier.is_empty());
    }

    #[test]
    fn sum_rewrites_around_ground_side() {
        let env = Env::new();
        // 'n + 1 = 8 gives 'n = 7.
        let result = unify(
            &env,
            &Typ::atom(Nexp::sum(Nexp::var(kid("n")), Nexp::constant(1))),
            &Typ::atom(Nexp::constant(8)),
            Span::Empty,
        )
        .unwrap();
        assert_eq!(nexp_binding(&result, "n"), Nexp::constant(7));
    }

    #[test]
    fn times_requires_a_literal_multiple() {
        let env = Env::new();
        let result = unify(
            &env,
            &Typ::atom(Nexp::times(Nexp::constant(8), Nexp::var(kid("n")))),
            &Typ::atom(Nexp::constant(32)),
            Span::Empty,
        )
        .unwrap();
        assert_eq!(nexp_binding(&result, "n"), Nexp::constant(4));

        let result = unify(
            &env,
            &Typ::atom(Nexp::times(Nexp::constant(8), Nexp::var(kid("n")))),
            &Typ::atom(Nexp::constant(33)),
            Span::Empty,
        );
        assert!(result.is_err());
    }

    #[test]
    fn powers_of_two_invert() {
        let env = Env::new();
        let result = unify(
            &env,
            &Typ::atom(Nexp::pow2(Nexp::var(kid("n")))),
            &Typ::atom(Nexp::constant(64)),
            Span::Empty,
        )
        .unwrap();
        assert_eq!(nexp_binding(&result, "n"), Nexp::constant(6));
    }

    #[test]
    fn tuple_positions_feed_each_other() {
        let env = Env::new();
        // ('n, 'n + 'm): the first position resolves 'n, which makes the
        // second solvable on a later pass.
        let pattern = Typ::tuple(vec![
            Typ::atom(Nexp::var(kid("n"))),
            Typ::atom(Nexp::sum(Nexp::var(kid("n")), Nexp::var(kid("m")))),
        ]);
        let actual = Typ::tuple(vec![
            Typ::atom(Nexp::constant(2)),
            Typ::atom(Nexp::constant(5)),
        ]);
        let result = unify(&env, &pattern, &actual, Span::Empty).unwrap();
        assert_eq!(nexp_binding(&result, "n"), Nexp::constant(2));
        assert_eq!(nexp_binding(&result, "m"), Nexp::constant(3));
    }

    #[test]
    fn existential_actual_opens() {
        let env = Env::new();
        let actual = Typ::exist(
            vec![KindedId::int(kid("e"))],
            NConstraint::Set(kid("e"), vec![8.into(), 16.into()]),
            Typ::atom(Nexp::var(kid("e"))),
        );
        let result = unify(&env, &Typ::atom(Nexp::var(kid("n"))), &actual, Span::Empty).unwrap();
        assert_eq!(result.opened.len(), 1);
        let opened = result.opened[0].kid.clone();
        assert!(opened.is_fresh());
        assert_eq!(nexp_binding(&result, "n"), Nexp::var(opened.clone()));
        assert_eq!(
            result.constraint,
            Some(NConstraint::Set(opened, vec![8.into(), 16.into()]))
        );
    }

    #[test]
    fn unifiers_preserve_subtyping() {
        let env = Env::new();
        let pattern = Typ::tuple(vec![
            Typ::atom(Nexp::var(kid("n"))),
            Typ::bits(Nexp::var(kid("n"))),
        ]);
        let actual = Typ::tuple(vec![
            Typ::atom(Nexp::constant(8)),
            Typ::bits(Nexp::constant(8)),
        ]);
        let result = unify(&env, &pattern, &actual, Span::Empty).unwrap();
        let substituted = apply_unifier_typ(&pattern, &result.unifier);
        assert!(
            crate::subtype::typ_equality(&env, &substituted, &actual, Span::Empty).is_ok()
        );
    }

    #[test]
    fn type_variables_unify_structurally() {
        let env = Env::new();
        let pattern = Typ::vector(
            Nexp::var(kid("n")),
            Order::Dec,
            Typ::Var(kid("a")),
        );
        let actual = Typ::vector(Nexp::constant(32), Order::Dec, Typ::bit());
        let result = unify(&env, &pattern, &actual, Span::Empty).unwrap();
        assert_eq!(nexp_binding(&result, "n"), Nexp::constant(32));
        match result.unifier.get(&kid("a")) {
            Some(Uvar::Typ(typ)) => assert_eq!(*typ, Typ::bit()),
            other => panic!("expected a type binding, got {:?}", other),
        }
    }
}
