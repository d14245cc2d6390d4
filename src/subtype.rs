//! Subtyping, numeric destructuring and canonical forms.
//!
//! `subtyp` decides `T1 <: T2` under the environment's constraints by
//! combining unification with the oracle. Numeric types destructure into a
//! `(kids, constraint, nexp)` triple; variables of the supertype that the
//! equation between the two numeric expressions does not determine stay free
//! in the final obligation, which makes them universally quantified under
//! the oracle's unsatisfiability framing.

use log::trace;

use crate::ast::subst::{self, kids_of_constraint, kids_of_typ, rename_kid_constraint, rename_kid_typ};
use crate::ast::{Kid, Kind, KindedId, NConstraint, Nexp, Typ, TypArg};
use crate::env::Env;
use crate::reporting::TypeError;
use crate::solver;
use crate::source::Span;
use crate::unify::{self, Uvar};

/// Transform a type into canonical form: existentials lifted out of tuple
/// components and constructor arguments into one outer existential, nested
/// existentials flattened, function arguments existential-free.
///
/// Fails if lifting would leave an existential in a function-argument
/// position, which is a user error.
pub fn canonicalize(env: &Env, typ: &Typ) -> Result<Typ, TypeError> {
    let typ = env.expand_synonyms(typ)?;
    canon(env, &typ)
}

fn canon(env: &Env, typ: &Typ) -> Result<Typ, TypeError> {
    match typ {
        Typ::Id(_) | Typ::Var(_) | Typ::Unknown => Ok(typ.clone()),
        Typ::Tuple(typs) => {
            let mut lifted = Lifted::new();
            let components = typs
                .iter()
                .map(|typ| {
                    let typ = canon(env, typ)?;
                    Ok(lifted.lift(env, typ))
                })
                .collect::<Result<Vec<_>, TypeError>>()?;
            Ok(lifted.wrap(Typ::Tuple(components)))
        }
        Typ::App(id, args) => {
            let mut lifted = Lifted::new();
            let args = args
                .iter()
                .map(|arg| match arg {
                    TypArg::Typ(typ) => {
                        let typ = canon(env, typ)?;
                        Ok(TypArg::Typ(lifted.lift(env, typ)))
                    }
                    arg => Ok(arg.clone()),
                })
                .collect::<Result<Vec<_>, TypeError>>()?;
            Ok(lifted.wrap(Typ::App(id.clone(), args)))
        }
        Typ::Fn(args, ret, effect) => {
            let args = args
                .iter()
                .map(|arg| {
                    let arg = canon(env, arg)?;
                    if arg.is_exist() {
                        Err(TypeError::other(
                            Span::Empty,
                            format!(
                                "existential type `{}` is not allowed in a function argument",
                                arg
                            ),
                        ))
                    } else {
                        Ok(arg)
                    }
                })
                .collect::<Result<Vec<_>, TypeError>>()?;
            let ret = canon(env, ret)?;
            Ok(Typ::Fn(args, Box::new(ret), effect.clone()))
        }
        Typ::Bidir(lhs, rhs) => Ok(Typ::Bidir(
            Box::new(canon(env, lhs)?),
            Box::new(canon(env, rhs)?),
        )),
        Typ::Exist(kids, nc, body) => {
            let body = canon(env, body)?;
            match body {
                // Flatten nested existentials.
                Typ::Exist(inner_kids, inner_nc, inner_body) => {
                    let mut kids = kids.clone();
                    kids.extend(inner_kids);
                    Ok(Typ::Exist(
                        kids,
                        NConstraint::and(nc.clone(), inner_nc),
                        inner_body,
                    ))
                }
                body => Ok(Typ::Exist(kids.clone(), nc.clone(), Box::new(body))),
            }
        }
    }
}

/// Accumulator for existentials lifted out of sibling positions. Binders
/// that would clash with one already accumulated are renamed first.
struct Lifted {
    kids: Vec<KindedId>,
    nc: NConstraint,
}

impl Lifted {
    fn new() -> Lifted {
        Lifted {
            kids: Vec::new(),
            nc: NConstraint::True,
        }
    }

    fn lift(&mut self, env: &Env, typ: Typ) -> Typ {
        match typ {
            Typ::Exist(kids, mut nc, body) => {
                let mut body = *body;
                for mut kinded in kids {
                    if self.kids.iter().any(|existing| existing.kid == kinded.kid)
                        || env.get_typ_var(&kinded.kid).is_some()
                    {
                        let fresh = env.fresh_existential(None);
                        nc = rename_kid_constraint(&nc, &kinded.kid, &fresh);
                        body = rename_kid_typ(&body, &kinded.kid, &fresh);
                        kinded = KindedId::new(fresh, kinded.kind);
                    }
                    self.kids.push(kinded);
                }
                self.nc = NConstraint::and(std::mem::replace(&mut self.nc, NConstraint::True), nc);
                body
            }
            typ => typ,
        }
    }

    fn wrap(self, typ: Typ) -> Typ {
        if self.kids.is_empty() {
            typ
        } else {
            Typ::exist(self.kids, self.nc, typ)
        }
    }
}

/// Destructure a numeric type into `(kids, constraint, nexp)` form.
///
/// `atom(n)` carries no variables; `range`, `int` and `nat` introduce one;
/// a numeric existential contributes its own binders and constraint.
pub fn destructure_numeric(
    env: &Env,
    typ: &Typ,
) -> Option<(Vec<KindedId>, NConstraint, Nexp)> {
    match typ {
        Typ::App(id, args) if id.name() == "atom" => match args.as_slice() {
            [TypArg::Nexp(nexp)] => Some((Vec::new(), NConstraint::True, nexp.clone())),
            _ => None,
        },
        Typ::App(id, args) if id.name() == "range" => match args.as_slice() {
            [TypArg::Nexp(lo), TypArg::Nexp(hi)] => {
                let kid = env.fresh_existential(None);
                let var = Nexp::Var(kid.clone());
                Some((
                    vec![KindedId::int(kid)],
                    NConstraint::and(
                        NConstraint::lteq(lo.clone(), var.clone()),
                        NConstraint::lteq(var.clone(), hi.clone()),
                    ),
                    var,
                ))
            }
            _ => None,
        },
        Typ::Id(id) if id.name() == "int" => {
            let kid = env.fresh_existential(None);
            let var = Nexp::Var(kid.clone());
            Some((vec![KindedId::int(kid)], NConstraint::True, var))
        }
        Typ::Id(id) if id.name() == "nat" => {
            let kid = env.fresh_existential(None);
            let var = Nexp::Var(kid.clone());
            Some((
                vec![KindedId::int(kid)],
                NConstraint::gteq(var.clone(), Nexp::constant(0)),
                var,
            ))
        }
        Typ::Exist(kids, nc, body) => {
            let (mut inner_kids, inner_nc, nexp) = destructure_numeric(env, body)?;
            let mut all = kids.clone();
            all.append(&mut inner_kids);
            Some((all, NConstraint::and(nc.clone(), inner_nc), nexp))
        }
        _ => None,
    }
}

/// Decide `typ1 <: typ2`, failing with [`TypeError::Subtype`] when no valid
/// witness exists.
pub fn subtyp(env: &Env, typ1: &Typ, typ2: &Typ, span: Span) -> Result<(), TypeError> {
    trace!("subtyp: {} <: {}", typ1, typ2);
    let typ1 = env.expand_synonyms(typ1)?;
    let typ2 = env.expand_synonyms(typ2)?;

    let subtype_err = |env: &Env| TypeError::Subtype {
        span,
        found: typ1.clone(),
        expected: typ2.clone(),
        constraints: env.get_constraints(),
        var_spans: var_spans(env, &typ1, &typ2),
    };

    // Tuples are covariant pointwise.
    if let (Typ::Tuple(typs1), Typ::Tuple(typs2)) = (&typ1, &typ2) {
        if typs1.len() != typs2.len() {
            return Err(subtype_err(env));
        }
        for (typ1, typ2) in typs1.iter().zip(typs2.iter()) {
            subtyp(env, typ1, typ2, span)?;
        }
        return Ok(());
    }

    // Both numeric.
    if let (Some((kids1, nc1, nexp1)), Some((kids2, nc2, nexp2))) = (
        destructure_numeric(env, &typ1),
        destructure_numeric(env, &typ2),
    ) {
        let mut env = env.clone();
        env.add_typ_vars(&kids1);
        env.add_constraint(nc1);
        // The supertype's variables stay rigid; those the equation between
        // the two numeric expressions determines are substituted out, and
        // the rest stay free so the final obligation quantifies over them.
        let mut goal_env = env.clone();
        goal_env.add_typ_vars(&kids2);

        let goals = kids2.iter().map(|kinded| kinded.kid.clone()).collect();
        match unify::unify_nexp(&env, &goals, &nexp2, &nexp1, span) {
            Ok(unifier) => {
                let nc2 = unify::apply_unifier_constraint(&nc2, &unifier);
                if solver::prove(&goal_env, &nc2) {
                    return Ok(());
                }
            }
            Err(_) => {
                let obligation =
                    NConstraint::and(NConstraint::eq(nexp1.clone(), nexp2.clone()), nc2);
                if solver::prove(&goal_env, &obligation) {
                    return Ok(());
                }
            }
        }
        return Err(subtype_err(&env));
    }

    // Alpha-equivalent types need no reasoning.
    if subst::alpha_equivalent(&typ1, &typ2) {
        return Ok(());
    }

    // Open an existential subtype and recurse.
    if let Typ::Exist(kids, nc, body) = &typ1 {
        let mut env = env.clone();
        let mut nc = nc.clone();
        let mut body = body.as_ref().clone();
        for kinded in kids {
            let fresh = env.fresh_existential(None);
            nc = rename_kid_constraint(&nc, &kinded.kid, &fresh);
            body = rename_kid_typ(&body, &kinded.kid, &fresh);
            env.add_typ_var(fresh, kinded.kind);
        }
        env.add_constraint(nc);
        return subtyp(&env, &body, &typ2, span);
    }

    // General case: canonicalise the supertype, unify its base against the
    // subtype with the lifted variables as goals, and discharge the
    // substituted constraint.
    let canonical = canonicalize(env, &typ2)?;
    let (kids, nc, base) = canonical.unwrap_exist();
    match unify::unify(env, base, &typ1, span) {
        Ok(unification) => {
            let mut env = env.clone();
            env.add_typ_vars(&unification.opened);
            if let Some(opened_nc) = &unification.constraint {
                env.add_constraint(opened_nc.clone());
            }
            let nc = unify::apply_unifier_constraint(&nc, &unification.unifier);
            for (kid, uvar) in &unification.unifier {
                if let Uvar::Nexp(nexp) = uvar {
                    if kids.iter().any(|kinded| &kinded.kid == kid) {
                        env.add_typ_var(kid.clone(), Kind::Int);
                        env.add_constraint(NConstraint::eq(
                            Nexp::Var(kid.clone()),
                            nexp.clone(),
                        ));
                    }
                }
            }
            if solver::prove(&env, &nc) {
                Ok(())
            } else {
                Err(subtype_err(&env))
            }
        }
        Err(_) => Err(subtype_err(env)),
    }
}

/// Mutual subtyping.
pub fn typ_equality(env: &Env, typ1: &Typ, typ2: &Typ, span: Span) -> Result<(), TypeError> {
    subtyp(env, typ1, typ2, span)?;
    subtyp(env, typ2, typ1, span)
}

fn var_spans(env: &Env, typ1: &Typ, typ2: &Typ) -> Vec<(Kid, Span)> {
    let mut kids = kids_of_typ(typ1);
    kids.extend(kids_of_typ(typ2));
    for nc in env.get_constraints() {
        kids.extend(kids_of_constraint(&nc));
    }
    kids.into_iter()
        .filter_map(|kid| env.typ_var_span(&kid).map(|span| (kid, span)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kid(name: &str) -> Kid {
        Kid::synthetic(name)
    }

    #[test]
    fn atoms_are_subtypes_of_ranges() {
        let env = Env::new();
        assert!(subtyp(
            &env,
            &Typ::atom(Nexp::constant(4)),
            &Typ::range(Nexp::constant(0), Nexp::constant(10)),
            Span::Empty,
        )
        .is_ok());
        assert!(subtyp(
            &env,
            &Typ::atom(Nexp::constant(11)),
            &Typ::range(Nexp::constant(0), Nexp::constant(10)),
            Span::Empty,
        )
        .is_err());
    }

    #[test]
    fn every_numeric_type_fits_int() {
        let env = Env::new();
        assert!(subtyp(&env, &Typ::atom(Nexp::constant(-3)), &Typ::int(), Span::Empty).is_ok());
        assert!(subtyp(
            &env,
            &Typ::range(Nexp::constant(0), Nexp::constant(10)),
            &Typ::int(),
            Span::Empty,
        )
        .is_ok());
        assert!(subtyp(&env, &Typ::atom(Nexp::constant(-3)), &Typ::nat(), Span::Empty).is_err());
        assert!(subtyp(&env, &Typ::atom(Nexp::constant(3)), &Typ::nat(), Span::Empty).is_ok());
    }

    #[test]
    fn unequal_atoms_clash() {
        let env = Env::new();
        let err = subtyp(
            &env,
            &Typ::atom(Nexp::constant(6)),
            &Typ::atom(Nexp::constant(7)),
            Span::Empty,
        )
        .unwrap_err();
        match err {
            TypeError::Subtype { found, expected, .. } => {
                assert_eq!(found, Typ::atom(Nexp::constant(6)));
                assert_eq!(expected, Typ::atom(Nexp::constant(7)));
            }
            err => panic!("expected a subtype error, got {:?}", err),
        }
    }

    #[test]
    fn atom_packs_into_numeric_existential() {
        let env = Env::new();
        let packed = Typ::exist(
            vec![KindedId::int(kid("k"))],
            NConstraint::Set(kid("k"), vec![1.into(), 2.into()]),
            Typ::atom(Nexp::var(kid("k"))),
        );
        assert!(subtyp(&env, &Typ::atom(Nexp::constant(1)), &packed, Span::Empty).is_ok());
        assert!(subtyp(&env, &Typ::atom(Nexp::constant(6)), &packed, Span::Empty).is_err());
    }

    #[test]
    fn existential_subtype_opens() {
        let env = Env::new();
        // {'k, 'k in {1,2}. atom('k)} <: range(0, 10) holds because both 1
        // and 2 are in range; it fails against range(2, 10) because 'k may
        // be 1.
        let packed = Typ::exist(
            vec![KindedId::int(kid("k"))],
            NConstraint::Set(kid("k"), vec![1.into(), 2.into()]),
            Typ::atom(Nexp::var(kid("k"))),
        );
        assert!(subtyp(
            &env,
            &packed,
            &Typ::range(Nexp::constant(0), Nexp::constant(10)),
            Span::Empty,
        )
        .is_ok());
        assert!(subtyp(
            &env,
            &packed,
            &Typ::range(Nexp::constant(2), Nexp::constant(10)),
            Span::Empty,
        )
        .is_err());
    }

    #[test]
    fn rigid_variables_use_environment_facts() {
        let mut env = Env::new();
        env.add_typ_var(kid("x"), Kind::Int);
        env.add_constraint(NConstraint::gteq(Nexp::var(kid("x")), Nexp::constant(1)));
        // atom('x) <: nat needs 'x >= 0; with only 'x >= 1 in scope this is
        // decidable by the solver, and syntactically after substitution it
        // still requires the oracle; use the ground case instead.
        env.add_constraint(NConstraint::eq(Nexp::var(kid("x")), Nexp::constant(5)));
        assert!(subtyp(&env, &Typ::atom(Nexp::var(kid("x"))), &Typ::nat(), Span::Empty).is_ok());
    }

    #[test]
    fn tuples_are_pointwise() {
        let env = Env::new();
        let sub = Typ::tuple(vec![Typ::atom(Nexp::constant(1)), Typ::bit()]);
        let sup = Typ::tuple(vec![Typ::range(Nexp::constant(0), Nexp::constant(3)), Typ::bit()]);
        assert!(subtyp(&env, &sub, &sup, Span::Empty).is_ok());
        assert!(subtyp(&env, &sup, &sub, Span::Empty).is_err());
    }

    #[test]
    fn vectors_need_equal_lengths() {
        let env = Env::new();
        assert!(subtyp(
            &env,
            &Typ::bits(Nexp::constant(8)),
            &Typ::bits(Nexp::constant(8)),
            Span::Empty,
        )
        .is_ok());
        assert!(subtyp(
            &env,
            &Typ::bits(Nexp::constant(8)),
            &Typ::bits(Nexp::constant(16)),
            Span::Empty,
        )
        .is_err());
    }

    #[test]
    fn canonicalisation_lifts_tuple_existentials() {
        let env = Env::new();
        let typ = Typ::tuple(vec![
            Typ::exist(
                vec![KindedId::int(kid("n"))],
                NConstraint::gteq(Nexp::var(kid("n")), Nexp::constant(0)),
                Typ::atom(Nexp::var(kid("n"))),
            ),
            Typ::exist(
                vec![KindedId::int(kid("m"))],
                NConstraint::gteq(Nexp::var(kid("m")), Nexp::constant(1)),
                Typ::atom(Nexp::var(kid("m"))),
            ),
        ]);
        match canonicalize(&env, &typ).unwrap() {
            Typ::Exist(kids, _, body) => {
                assert_eq!(kids.len(), 2);
                assert!(matches!(*body, Typ::Tuple(_)));
            }
            typ => panic!("expected an existential, got {}", typ),
        }
    }

    #[test]
    fn canonicalisation_flattens_nested_existentials() {
        let env = Env::new();
        let typ = Typ::exist(
            vec![KindedId::int(kid("n"))],
            NConstraint::gteq(Nexp::var(kid("n")), Nexp::constant(0)),
            Typ::exist(
                vec![KindedId::int(kid("m"))],
                NConstraint::lteq(Nexp::var(kid("m")), Nexp::var(kid("n"))),
                Typ::atom(Nexp::var(kid("m"))),
            ),
        );
        match canonicalize(&env, &typ).unwrap() {
            Typ::Exist(kids, _, body) => {
                assert_eq!(kids.len(), 2);
                assert!(!body.is_exist());
            }
            typ => panic!("expected an existential, got {}", typ),
        }
    }

    #[test]
    fn function_arguments_reject_existentials() {
        let env = Env::new();
        let arg = Typ::tuple(vec![Typ::exist(
            vec![KindedId::int(kid("n"))],
            NConstraint::True,
            Typ::atom(Nexp::var(kid("n"))),
        )]);
        let typ = Typ::function(vec![arg], Typ::unit(), crate::ast::EffectSet::pure());
        assert!(canonicalize(&env, &typ).is_err());
    }
}
