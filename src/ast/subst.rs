//! Substitution, renaming, free variables and the numeric simplifier.
//!
//! Substitution is capture-avoiding: pushing a term under an existential
//! whose binders clash with the term's free variables first renames those
//! binders. All renaming is name-to-name, so it is reused for
//! alpha-equivalence and for freshening quantified bindings.

use std::collections::BTreeSet;

use num_bigint::BigInt;
use num_traits::{One, ToPrimitive, Zero};

use crate::ast::{Kid, KindedId, NConstraint, Nexp, Order, Typ, TypArg};

/// The set of kinded variables appearing free in a term.
pub type KidSet = BTreeSet<Kid>;

// ---------------------------------------------------------------------------
// Free variables
// ---------------------------------------------------------------------------

pub fn kids_of_nexp(nexp: &Nexp) -> KidSet {
    let mut kids = KidSet::new();
    collect_nexp(nexp, &mut kids);
    kids
}

pub fn kids_of_constraint(nc: &NConstraint) -> KidSet {
    let mut kids = KidSet::new();
    collect_constraint(nc, &mut kids);
    kids
}

pub fn kids_of_typ(typ: &Typ) -> KidSet {
    let mut kids = KidSet::new();
    collect_typ(typ, &mut kids);
    kids
}

pub fn kids_of_typ_arg(arg: &TypArg) -> KidSet {
    match arg {
        TypArg::Nexp(nexp) => kids_of_nexp(nexp),
        TypArg::Typ(typ) => kids_of_typ(typ),
        TypArg::Order(Order::Var(kid)) => KidSet::from([kid.clone()]),
        TypArg::Order(_) => KidSet::new(),
    }
}

fn collect_nexp(nexp: &Nexp, kids: &mut KidSet) {
    match nexp {
        Nexp::Id(_) | Nexp::Constant(_) => {}
        Nexp::Var(kid) => {
            kids.insert(kid.clone());
        }
        Nexp::App(_, args) => args.iter().for_each(|arg| collect_nexp(arg, kids)),
        Nexp::Sum(lhs, rhs) | Nexp::Minus(lhs, rhs) | Nexp::Times(lhs, rhs) => {
            collect_nexp(lhs, kids);
            collect_nexp(rhs, kids);
        }
        Nexp::Exp(exp) | Nexp::Neg(exp) => collect_nexp(exp, kids),
    }
}

fn collect_constraint(nc: &NConstraint, kids: &mut KidSet) {
    match nc {
        NConstraint::Equal(lhs, rhs)
        | NConstraint::NotEqual(lhs, rhs)
        | NConstraint::BoundedLe(lhs, rhs)
        | NConstraint::BoundedGe(lhs, rhs) => {
            collect_nexp(lhs, kids);
            collect_nexp(rhs, kids);
        }
        NConstraint::Set(kid, _) => {
            kids.insert(kid.clone());
        }
        NConstraint::Or(lhs, rhs) | NConstraint::And(lhs, rhs) => {
            collect_constraint(lhs, kids);
            collect_constraint(rhs, kids);
        }
        NConstraint::True | NConstraint::False => {}
        NConstraint::App(_, args) => {
            args.iter().for_each(|arg| kids.extend(kids_of_typ_arg(arg)))
        }
    }
}

fn collect_typ(typ: &Typ, kids: &mut KidSet) {
    match typ {
        Typ::Id(_) | Typ::Unknown => {}
        Typ::Var(kid) => {
            kids.insert(kid.clone());
        }
        Typ::Fn(args, ret, _) => {
            args.iter().for_each(|arg| collect_typ(arg, kids));
            collect_typ(ret, kids);
        }
        Typ::Bidir(lhs, rhs) => {
            collect_typ(lhs, kids);
            collect_typ(rhs, kids);
        }
        Typ::Tuple(typs) => typs.iter().for_each(|typ| collect_typ(typ, kids)),
        Typ::App(_, args) => args.iter().for_each(|arg| kids.extend(kids_of_typ_arg(arg))),
        Typ::Exist(bound, nc, body) => {
            // Binders are excluded from the free set.
            let mut inner = KidSet::new();
            collect_constraint(nc, &mut inner);
            collect_typ(body, &mut inner);
            for kinded in bound {
                inner.remove(&kinded.kid);
            }
            kids.extend(inner);
        }
    }
}

// ---------------------------------------------------------------------------
// Renaming (variable-to-variable, all sorts at once)
// ---------------------------------------------------------------------------

pub fn rename_kid_nexp(nexp: &Nexp, from: &Kid, to: &Kid) -> Nexp {
    match nexp {
        Nexp::Var(kid) if kid == from => Nexp::Var(to.clone()),
        Nexp::Id(_) | Nexp::Var(_) | Nexp::Constant(_) => nexp.clone(),
        Nexp::App(id, args) => Nexp::App(
            id.clone(),
            args.iter()
                .map(|arg| rename_kid_nexp(arg, from, to))
                .collect(),
        ),
        Nexp::Sum(lhs, rhs) => Nexp::sum(
            rename_kid_nexp(lhs, from, to),
            rename_kid_nexp(rhs, from, to),
        ),
        Nexp::Minus(lhs, rhs) => Nexp::minus(
            rename_kid_nexp(lhs, from, to),
            rename_kid_nexp(rhs, from, to),
        ),
        Nexp::Times(lhs, rhs) => Nexp::times(
            rename_kid_nexp(lhs, from, to),
            rename_kid_nexp(rhs, from, to),
        ),
        Nexp::Exp(exp) => Nexp::pow2(rename_kid_nexp(exp, from, to)),
        Nexp::Neg(exp) => Nexp::neg(rename_kid_nexp(exp, from, to)),
    }
}

pub fn rename_kid_constraint(nc: &NConstraint, from: &Kid, to: &Kid) -> NConstraint {
    match nc {
        NConstraint::Equal(lhs, rhs) => NConstraint::Equal(
            rename_kid_nexp(lhs, from, to),
            rename_kid_nexp(rhs, from, to),
        ),
        NConstraint::NotEqual(lhs, rhs) => NConstraint::NotEqual(
            rename_kid_nexp(lhs, from, to),
            rename_kid_nexp(rhs, from, to),
        ),
        NConstraint::BoundedLe(lhs, rhs) => NConstraint::BoundedLe(
            rename_kid_nexp(lhs, from, to),
            rename_kid_nexp(rhs, from, to),
        ),
        NConstraint::BoundedGe(lhs, rhs) => NConstraint::BoundedGe(
            rename_kid_nexp(lhs, from, to),
            rename_kid_nexp(rhs, from, to),
        ),
        NConstraint::Set(kid, ns) if kid == from => NConstraint::Set(to.clone(), ns.clone()),
        NConstraint::Set(_, _) => nc.clone(),
        NConstraint::Or(lhs, rhs) => NConstraint::or(
            rename_kid_constraint(lhs, from, to),
            rename_kid_constraint(rhs, from, to),
        ),
        NConstraint::And(lhs, rhs) => NConstraint::And(
            Box::new(rename_kid_constraint(lhs, from, to)),
            Box::new(rename_kid_constraint(rhs, from, to)),
        ),
        NConstraint::True | NConstraint::False => nc.clone(),
        NConstraint::App(id, args) => NConstraint::App(
            id.clone(),
            args.iter()
                .map(|arg| rename_kid_typ_arg(arg, from, to))
                .collect(),
        ),
    }
}

pub fn rename_kid_typ(typ: &Typ, from: &Kid, to: &Kid) -> Typ {
    match typ {
        Typ::Var(kid) if kid == from => Typ::Var(to.clone()),
        Typ::Id(_) | Typ::Var(_) | Typ::Unknown => typ.clone(),
        Typ::Fn(args, ret, effect) => Typ::Fn(
            args.iter().map(|arg| rename_kid_typ(arg, from, to)).collect(),
            Box::new(rename_kid_typ(ret, from, to)),
            effect.clone(),
        ),
        Typ::Bidir(lhs, rhs) => Typ::Bidir(
            Box::new(rename_kid_typ(lhs, from, to)),
            Box::new(rename_kid_typ(rhs, from, to)),
        ),
        Typ::Tuple(typs) => Typ::Tuple(
            typs.iter().map(|typ| rename_kid_typ(typ, from, to)).collect(),
        ),
        Typ::App(id, args) => Typ::App(
            id.clone(),
            args.iter()
                .map(|arg| rename_kid_typ_arg(arg, from, to))
                .collect(),
        ),
        Typ::Exist(kids, nc, body) => {
            if kids.iter().any(|kinded| &kinded.kid == from) {
                // Shadowed.
                typ.clone()
            } else {
                Typ::Exist(
                    kids.clone(),
                    rename_kid_constraint(nc, from, to),
                    Box::new(rename_kid_typ(body, from, to)),
                )
            }
        }
    }
}

pub fn rename_kid_typ_arg(arg: &TypArg, from: &Kid, to: &Kid) -> TypArg {
    match arg {
        TypArg::Nexp(nexp) => TypArg::Nexp(rename_kid_nexp(nexp, from, to)),
        TypArg::Typ(typ) => TypArg::Typ(rename_kid_typ(typ, from, to)),
        TypArg::Order(Order::Var(kid)) if kid == from => TypArg::Order(Order::Var(to.clone())),
        TypArg::Order(order) => TypArg::Order(order.clone()),
    }
}

// ---------------------------------------------------------------------------
// Substitution of an N-exp for an Int-kinded variable
// ---------------------------------------------------------------------------

pub fn subst_nexp(nexp: &Nexp, kid: &Kid, with: &Nexp) -> Nexp {
    match nexp {
        Nexp::Var(var) if var == kid => with.clone(),
        Nexp::Id(_) | Nexp::Var(_) | Nexp::Constant(_) => nexp.clone(),
        Nexp::App(id, args) => Nexp::App(
            id.clone(),
            args.iter().map(|arg| subst_nexp(arg, kid, with)).collect(),
        ),
        Nexp::Sum(lhs, rhs) => Nexp::sum(subst_nexp(lhs, kid, with), subst_nexp(rhs, kid, with)),
        Nexp::Minus(lhs, rhs) => {
            Nexp::minus(subst_nexp(lhs, kid, with), subst_nexp(rhs, kid, with))
        }
        Nexp::Times(lhs, rhs) => {
            Nexp::times(subst_nexp(lhs, kid, with), subst_nexp(rhs, kid, with))
        }
        Nexp::Exp(exp) => Nexp::pow2(subst_nexp(exp, kid, with)),
        Nexp::Neg(exp) => Nexp::neg(subst_nexp(exp, kid, with)),
    }
}

pub fn subst_nexp_constraint(nc: &NConstraint, kid: &Kid, with: &Nexp) -> NConstraint {
    match nc {
        NConstraint::Equal(lhs, rhs) => {
            NConstraint::Equal(subst_nexp(lhs, kid, with), subst_nexp(rhs, kid, with))
        }
        NConstraint::NotEqual(lhs, rhs) => {
            NConstraint::NotEqual(subst_nexp(lhs, kid, with), subst_nexp(rhs, kid, with))
        }
        NConstraint::BoundedLe(lhs, rhs) => {
            NConstraint::BoundedLe(subst_nexp(lhs, kid, with), subst_nexp(rhs, kid, with))
        }
        NConstraint::BoundedGe(lhs, rhs) => {
            NConstraint::BoundedGe(subst_nexp(lhs, kid, with), subst_nexp(rhs, kid, with))
        }
        NConstraint::Set(var, ns) if var == kid => {
            // A membership constraint on the substituted variable becomes a
            // disjunction of equations on the replacement expression.
            let mut nc = NConstraint::False;
            for n in ns {
                let eq = NConstraint::Equal(with.clone(), Nexp::Constant(n.clone()));
                nc = match nc {
                    NConstraint::False => eq,
                    nc => NConstraint::or(nc, eq),
                };
            }
            nc
        }
        NConstraint::Set(_, _) => nc.clone(),
        NConstraint::Or(lhs, rhs) => NConstraint::or(
            subst_nexp_constraint(lhs, kid, with),
            subst_nexp_constraint(rhs, kid, with),
        ),
        NConstraint::And(lhs, rhs) => NConstraint::And(
            Box::new(subst_nexp_constraint(lhs, kid, with)),
            Box::new(subst_nexp_constraint(rhs, kid, with)),
        ),
        NConstraint::True | NConstraint::False => nc.clone(),
        NConstraint::App(id, args) => NConstraint::App(
            id.clone(),
            args.iter()
                .map(|arg| subst_nexp_typ_arg(arg, kid, with))
                .collect(),
        ),
    }
}

pub fn subst_nexp_typ(typ: &Typ, kid: &Kid, with: &Nexp) -> Typ {
    match typ {
        Typ::Id(_) | Typ::Var(_) | Typ::Unknown => typ.clone(),
        Typ::Fn(args, ret, effect) => Typ::Fn(
            args.iter().map(|arg| subst_nexp_typ(arg, kid, with)).collect(),
            Box::new(subst_nexp_typ(ret, kid, with)),
            effect.clone(),
        ),
        Typ::Bidir(lhs, rhs) => Typ::Bidir(
            Box::new(subst_nexp_typ(lhs, kid, with)),
            Box::new(subst_nexp_typ(rhs, kid, with)),
        ),
        Typ::Tuple(typs) => Typ::Tuple(
            typs.iter().map(|typ| subst_nexp_typ(typ, kid, with)).collect(),
        ),
        Typ::App(id, args) => Typ::App(
            id.clone(),
            args.iter()
                .map(|arg| subst_nexp_typ_arg(arg, kid, with))
                .collect(),
        ),
        Typ::Exist(kids, nc, body) => {
            if kids.iter().any(|kinded| &kinded.kid == kid) {
                typ.clone()
            } else {
                let (kids, nc, body) = avoid_capture(kids, nc, body, &kids_of_nexp(with));
                Typ::Exist(
                    kids,
                    subst_nexp_constraint(&nc, kid, with),
                    Box::new(subst_nexp_typ(&body, kid, with)),
                )
            }
        }
    }
}

pub fn subst_nexp_typ_arg(arg: &TypArg, kid: &Kid, with: &Nexp) -> TypArg {
    match arg {
        TypArg::Nexp(nexp) => TypArg::Nexp(subst_nexp(nexp, kid, with)),
        TypArg::Typ(typ) => TypArg::Typ(subst_nexp_typ(typ, kid, with)),
        TypArg::Order(order) => TypArg::Order(order.clone()),
    }
}

/// Rename any existential binders that would capture free variables of the
/// term being substituted in.
fn avoid_capture(
    kids: &[KindedId],
    nc: &NConstraint,
    body: &Typ,
    avoid: &KidSet,
) -> (Vec<KindedId>, NConstraint, Typ) {
    let mut kids = kids.to_vec();
    let mut nc = nc.clone();
    let mut body = body.clone();
    for index in 0..kids.len() {
        if avoid.contains(&kids[index].kid) {
            let old = kids[index].kid.clone();
            let mut fresh = Kid::synthetic(format!("{}'", old.name()));
            while avoid.contains(&fresh) || kids.iter().any(|kinded| kinded.kid == fresh) {
                fresh = Kid::synthetic(format!("{}'", fresh.name()));
            }
            nc = rename_kid_constraint(&nc, &old, &fresh);
            body = rename_kid_typ(&body, &old, &fresh);
            kids[index].kid = fresh;
        }
    }
    (kids, nc, body)
}

// ---------------------------------------------------------------------------
// Substitution of a type / an order for a variable
// ---------------------------------------------------------------------------

pub fn subst_typ(typ: &Typ, kid: &Kid, with: &Typ) -> Typ {
    match typ {
        Typ::Var(var) if var == kid => with.clone(),
        Typ::Id(_) | Typ::Var(_) | Typ::Unknown => typ.clone(),
        Typ::Fn(args, ret, effect) => Typ::Fn(
            args.iter().map(|arg| subst_typ(arg, kid, with)).collect(),
            Box::new(subst_typ(ret, kid, with)),
            effect.clone(),
        ),
        Typ::Bidir(lhs, rhs) => Typ::Bidir(
            Box::new(subst_typ(lhs, kid, with)),
            Box::new(subst_typ(rhs, kid, with)),
        ),
        Typ::Tuple(typs) => {
            Typ::Tuple(typs.iter().map(|typ| subst_typ(typ, kid, with)).collect())
        }
        Typ::App(id, args) => Typ::App(
            id.clone(),
            args.iter()
                .map(|arg| match arg {
                    TypArg::Typ(typ) => TypArg::Typ(subst_typ(typ, kid, with)),
                    arg => arg.clone(),
                })
                .collect(),
        ),
        Typ::Exist(kids, nc, body) => {
            if kids.iter().any(|kinded| &kinded.kid == kid) {
                typ.clone()
            } else {
                let (kids, nc, body) = avoid_capture(kids, nc, body, &kids_of_typ(with));
                Typ::Exist(kids, nc, Box::new(subst_typ(&body, kid, with)))
            }
        }
    }
}

pub fn subst_order(typ: &Typ, kid: &Kid, with: &Order) -> Typ {
    let subst_arg = |arg: &TypArg| match arg {
        TypArg::Order(Order::Var(var)) if var == kid => TypArg::Order(with.clone()),
        TypArg::Typ(typ) => TypArg::Typ(subst_order(typ, kid, with)),
        arg => arg.clone(),
    };
    match typ {
        Typ::Id(_) | Typ::Var(_) | Typ::Unknown => typ.clone(),
        Typ::Fn(args, ret, effect) => Typ::Fn(
            args.iter().map(|arg| subst_order(arg, kid, with)).collect(),
            Box::new(subst_order(ret, kid, with)),
            effect.clone(),
        ),
        Typ::Bidir(lhs, rhs) => Typ::Bidir(
            Box::new(subst_order(lhs, kid, with)),
            Box::new(subst_order(rhs, kid, with)),
        ),
        Typ::Tuple(typs) => Typ::Tuple(
            typs.iter().map(|typ| subst_order(typ, kid, with)).collect(),
        ),
        Typ::App(id, args) => Typ::App(id.clone(), args.iter().map(subst_arg).collect()),
        Typ::Exist(kids, nc, body) => {
            if kids.iter().any(|kinded| &kinded.kid == kid) {
                typ.clone()
            } else {
                Typ::Exist(kids.clone(), nc.clone(), Box::new(subst_order(body, kid, with)))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// The numeric simplifier
// ---------------------------------------------------------------------------

/// Fold constants and collapse arithmetic identities.
///
/// `a - b` is rewritten to `a + (-b)` only inside [`nexp_identical`], not
/// here, so that user-visible types keep their written shape.
pub fn nexp_simp(nexp: &Nexp) -> Nexp {
    match nexp {
        Nexp::Id(_) | Nexp::Var(_) | Nexp::Constant(_) => nexp.clone(),
        Nexp::App(id, args) => Nexp::App(id.clone(), args.iter().map(nexp_simp).collect()),
        Nexp::Sum(lhs, rhs) => {
            let lhs = nexp_simp(lhs);
            let rhs = nexp_simp(rhs);
            match (&lhs, &rhs) {
                (Nexp::Constant(a), Nexp::Constant(b)) => Nexp::Constant(a + b),
                (Nexp::Constant(a), _) if a.is_zero() => rhs,
                (_, Nexp::Constant(b)) if b.is_zero() => lhs,
                // Reassociate (e + c1) + c2 into e + (c1 + c2).
                (Nexp::Sum(inner, c1), Nexp::Constant(c2)) => {
                    if let Nexp::Constant(c1) = c1.as_ref() {
                        nexp_simp(&Nexp::sum(
                            inner.as_ref().clone(),
                            Nexp::Constant(c1 + c2),
                        ))
                    } else {
                        Nexp::sum(lhs.clone(), rhs)
                    }
                }
                _ => Nexp::sum(lhs, rhs),
            }
        }
        Nexp::Minus(lhs, rhs) => {
            let lhs = nexp_simp(lhs);
            let rhs = nexp_simp(rhs);
            match (&lhs, &rhs) {
                (Nexp::Constant(a), Nexp::Constant(b)) => Nexp::Constant(a - b),
                (_, Nexp::Constant(b)) if b.is_zero() => lhs,
                _ => Nexp::minus(lhs, rhs),
            }
        }
        Nexp::Times(lhs, rhs) => {
            let lhs = nexp_simp(lhs);
            let rhs = nexp_simp(rhs);
            match (&lhs, &rhs) {
                (Nexp::Constant(a), Nexp::Constant(b)) => Nexp::Constant(a * b),
                (Nexp::Constant(a), _) if a.is_one() => rhs,
                (_, Nexp::Constant(b)) if b.is_one() => lhs,
                (Nexp::Constant(a), _) if a.is_zero() => Nexp::Constant(BigInt::zero()),
                (_, Nexp::Constant(b)) if b.is_zero() => Nexp::Constant(BigInt::zero()),
                _ => Nexp::times(lhs, rhs),
            }
        }
        Nexp::Exp(exp) => {
            let exp = nexp_simp(exp);
            match &exp {
                Nexp::Constant(n) => match pow2(n) {
                    Some(result) => Nexp::Constant(result),
                    None => Nexp::pow2(exp),
                },
                _ => Nexp::pow2(exp),
            }
        }
        Nexp::Neg(exp) => {
            let exp = nexp_simp(exp);
            match exp {
                Nexp::Constant(n) => Nexp::Constant(-n),
                Nexp::Neg(inner) => *inner,
                exp => Nexp::neg(exp),
            }
        }
    }
}

/// `2 ^ n` for non-negative `n` that fits a shift.
pub fn pow2(n: &BigInt) -> Option<BigInt> {
    let exp = n.to_u32()?;
    Some(BigInt::one() << exp)
}

/// Structural identity of numeric expressions up to simplification, with
/// `a - b` compared as `a + (-b)`.
pub fn nexp_identical(lhs: &Nexp, rhs: &Nexp) -> bool {
    fn minus_form(nexp: &Nexp) -> Nexp {
        match nexp {
            Nexp::Id(_) | Nexp::Var(_) | Nexp::Constant(_) => nexp.clone(),
            Nexp::App(id, args) => Nexp::App(id.clone(), args.iter().map(minus_form).collect()),
            Nexp::Sum(lhs, rhs) => Nexp::sum(minus_form(lhs), minus_form(rhs)),
            Nexp::Minus(lhs, rhs) => Nexp::sum(minus_form(lhs), Nexp::neg(minus_form(rhs))),
            Nexp::Times(lhs, rhs) => Nexp::times(minus_form(lhs), minus_form(rhs)),
            Nexp::Exp(exp) => Nexp::pow2(minus_form(exp)),
            Nexp::Neg(exp) => Nexp::neg(minus_form(exp)),
        }
    }
    minus_form(&nexp_simp(lhs)) == minus_form(&nexp_simp(rhs))
}

// ---------------------------------------------------------------------------
// Constraint negation
// ---------------------------------------------------------------------------

/// Negation-normal-form negation of a constraint.
///
/// The constraint grammar has no negation node, so comparisons flip and
/// connectives dualise; all arithmetic is over the integers, so `!(a <= b)`
/// is `a >= b + 1`. Returns `None` if an unexpanded constraint synonym
/// application remains; callers expand synonyms first.
pub fn nc_negate(nc: &NConstraint) -> Option<NConstraint> {
    match nc {
        NConstraint::Equal(lhs, rhs) => Some(NConstraint::NotEqual(lhs.clone(), rhs.clone())),
        NConstraint::NotEqual(lhs, rhs) => Some(NConstraint::Equal(lhs.clone(), rhs.clone())),
        NConstraint::BoundedLe(lhs, rhs) => Some(NConstraint::BoundedGe(
            lhs.clone(),
            nexp_simp(&Nexp::sum(rhs.clone(), Nexp::constant(1))),
        )),
        NConstraint::BoundedGe(lhs, rhs) => Some(NConstraint::BoundedLe(
            lhs.clone(),
            nexp_simp(&Nexp::sum(rhs.clone(), Nexp::constant(-1))),
        )),
        NConstraint::Set(kid, ns) => Some(NConstraint::conj(ns.iter().map(|n| {
            NConstraint::NotEqual(Nexp::Var(kid.clone()), Nexp::Constant(n.clone()))
        }))),
        NConstraint::Or(lhs, rhs) => Some(NConstraint::And(
            Box::new(nc_negate(lhs)?),
            Box::new(nc_negate(rhs)?),
        )),
        NConstraint::And(lhs, rhs) => Some(NConstraint::or(nc_negate(lhs)?, nc_negate(rhs)?)),
        NConstraint::True => Some(NConstraint::False),
        NConstraint::False => Some(NConstraint::True),
        NConstraint::App(_, _) => None,
    }
}

// ---------------------------------------------------------------------------
// Alpha-equivalence
// ---------------------------------------------------------------------------

/// Structural equality of types up to renaming of existential binders.
pub fn alpha_equivalent(typ1: &Typ, typ2: &Typ) -> bool {
    let mut counter1 = 0;
    let mut counter2 = 0;
    alpha_canon(typ1, &mut counter1) == alpha_canon(typ2, &mut counter2)
}

fn alpha_canon(typ: &Typ, counter: &mut usize) -> Typ {
    match typ {
        Typ::Id(_) | Typ::Var(_) | Typ::Unknown => typ.clone(),
        Typ::Fn(args, ret, effect) => Typ::Fn(
            args.iter().map(|arg| alpha_canon(arg, counter)).collect(),
            Box::new(alpha_canon(ret, counter)),
            effect.clone(),
        ),
        Typ::Bidir(lhs, rhs) => Typ::Bidir(
            Box::new(alpha_canon(lhs, counter)),
            Box::new(alpha_canon(rhs, counter)),
        ),
        Typ::Tuple(typs) => Typ::Tuple(
            typs.iter().map(|typ| alpha_canon(typ, counter)).collect(),
        ),
        Typ::App(id, args) => Typ::App(
            id.clone(),
            args.iter()
                .map(|arg| match arg {
                    TypArg::Typ(typ) => TypArg::Typ(alpha_canon(typ, counter)),
                    arg => arg.clone(),
                })
                .collect(),
        ),
        Typ::Exist(kids, nc, body) => {
            let mut nc = nc.clone();
            let mut body = body.as_ref().clone();
            let mut canon_kids = Vec::with_capacity(kids.len());
            for kinded in kids {
                let fresh = Kid::synthetic(format!("alpha#{}", counter));
                *counter += 1;
                nc = rename_kid_constraint(&nc, &kinded.kid, &fresh);
                body = rename_kid_typ(&body, &kinded.kid, &fresh);
                canon_kids.push(KindedId::new(fresh, kinded.kind));
            }
            Typ::Exist(canon_kids, nc, Box::new(alpha_canon(&body, counter)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Kind;

    fn kid(name: &str) -> Kid {
        Kid::synthetic(name)
    }

    #[test]
    fn simplifier_folds_constants() {
        let nexp = Nexp::sum(
            Nexp::times(Nexp::constant(2), Nexp::constant(3)),
            Nexp::constant(4),
        );
        assert_eq!(nexp_simp(&nexp), Nexp::constant(10));
    }

    #[test]
    fn simplifier_collapses_identities() {
        let n = Nexp::var(kid("n"));
        assert_eq!(nexp_simp(&Nexp::sum(n.clone(), Nexp::constant(0))), n);
        assert_eq!(nexp_simp(&Nexp::times(n.clone(), Nexp::constant(1))), n);
        assert_eq!(nexp_simp(&Nexp::neg(Nexp::neg(n.clone()))), n);
        assert_eq!(
            nexp_simp(&Nexp::times(n.clone(), Nexp::constant(0))),
            Nexp::constant(0)
        );
    }

    #[test]
    fn simplifier_reassociates_sums() {
        let n = Nexp::var(kid("n"));
        let nexp = Nexp::sum(Nexp::sum(n.clone(), Nexp::constant(1)), Nexp::constant(2));
        assert_eq!(nexp_simp(&nexp), Nexp::sum(n, Nexp::constant(3)));
    }

    #[test]
    fn simplifier_folds_powers() {
        assert_eq!(nexp_simp(&Nexp::pow2(Nexp::constant(5))), Nexp::constant(32));
    }

    #[test]
    fn minus_compares_as_negated_sum() {
        let n = Nexp::var(kid("n"));
        let minus = Nexp::minus(n.clone(), Nexp::constant(1));
        let sum = Nexp::sum(n, Nexp::neg(Nexp::constant(1)));
        assert!(nexp_identical(&minus, &sum));
    }

    #[test]
    fn subst_replaces_free_variable() {
        let typ = Typ::atom(Nexp::sum(Nexp::var(kid("n")), Nexp::constant(1)));
        let result = subst_nexp_typ(&typ, &kid("n"), &Nexp::constant(3));
        assert_eq!(result, Typ::atom(Nexp::sum(Nexp::constant(3), Nexp::constant(1))));
    }

    #[test]
    fn subst_respects_existential_shadowing() {
        let typ = Typ::exist(
            vec![KindedId::int(kid("n"))],
            NConstraint::gteq(Nexp::var(kid("n")), Nexp::constant(0)),
            Typ::atom(Nexp::var(kid("n"))),
        );
        assert_eq!(subst_nexp_typ(&typ, &kid("n"), &Nexp::constant(3)), typ);
    }

    #[test]
    fn subst_avoids_capture() {
        // Substituting 'n into a type that binds 'n existentially must rename
        // the binder first.
        let typ = Typ::exist(
            vec![KindedId::int(kid("m"))],
            NConstraint::eq(Nexp::var(kid("m")), Nexp::var(kid("k"))),
            Typ::atom(Nexp::var(kid("m"))),
        );
        let result = subst_nexp_typ(&typ, &kid("k"), &Nexp::var(kid("m")));
        match result {
            Typ::Exist(kids, nc, _) => {
                assert_ne!(kids[0].kid, kid("m"));
                assert_eq!(
                    nc,
                    NConstraint::eq(Nexp::var(kids[0].kid.clone()), Nexp::var(kid("m")))
                );
            }
            typ => panic!("expected an existential, got {:?}", typ),
        }
    }

    #[test]
    fn free_kids_exclude_existential_binders() {
        let typ = Typ::exist(
            vec![KindedId::int(kid("n"))],
            NConstraint::lteq(Nexp::var(kid("n")), Nexp::var(kid("m"))),
            Typ::atom(Nexp::var(kid("n"))),
        );
        let kids = kids_of_typ(&typ);
        assert!(kids.contains(&kid("m")));
        assert!(!kids.contains(&kid("n")));
    }

    #[test]
    fn negate_bounds_over_integers() {
        let nc = NConstraint::lteq(Nexp::var(kid("n")), Nexp::constant(7));
        assert_eq!(
            nc_negate(&nc),
            Some(NConstraint::gteq(Nexp::var(kid("n")), Nexp::constant(8)))
        );
    }

    #[test]
    fn negate_set_membership() {
        let nc = NConstraint::Set(kid("n"), vec![8.into(), 16.into()]);
        assert_eq!(
            nc_negate(&nc),
            Some(NConstraint::And(
                Box::new(NConstraint::neq(Nexp::var(kid("n")), Nexp::constant(8))),
                Box::new(NConstraint::neq(Nexp::var(kid("n")), Nexp::constant(16))),
            ))
        );
    }

    #[test]
    fn alpha_equivalence_ignores_binder_names() {
        let lhs = Typ::exist(
            vec![KindedId::new(kid("n"), Kind::Int)],
            NConstraint::Set(kid("n"), vec![1.into(), 2.into()]),
            Typ::atom(Nexp::var(kid("n"))),
        );
        let rhs = Typ::exist(
            vec![KindedId::new(kid("m"), Kind::Int)],
            NConstraint::Set(kid("m"), vec![1.into(), 2.into()]),
            Typ::atom(Nexp::var(kid("m"))),
        );
        assert!(alpha_equivalent(&lhs, &rhs));
        assert!(!alpha_equivalent(&lhs, &Typ::atom(Nexp::constant(1))));
    }
}
