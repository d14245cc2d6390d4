//! Shared builders for the checker tests.
//!
//! Each test constructs an AST by hand and checks what the checker assigns
//! to it; the prelude environment registers the comparison and boolean
//! operators the scenarios lean on.

#![allow(dead_code)]

use sail_core::ast::*;
use sail_core::driver;
use sail_core::env::Env;
use sail_core::source::Span;

pub fn id(name: &str) -> Id {
    Id::synthetic(name)
}

pub fn kid(name: &str) -> Kid {
    Kid::synthetic(name)
}

// Expressions ---------------------------------------------------------------

pub fn exp(kind: ExpKind) -> Exp {
    Exp::new(kind, Span::Empty)
}

pub fn num(n: i64) -> Exp {
    exp(ExpKind::Lit(Lit::Num(n.into())))
}

pub fn unit() -> Exp {
    exp(ExpKind::Lit(Lit::Unit))
}

pub fn bool_lit(b: bool) -> Exp {
    exp(ExpKind::Lit(if b { Lit::True } else { Lit::False }))
}

pub fn string_lit(s: &str) -> Exp {
    exp(ExpKind::Lit(Lit::String(s.to_owned())))
}

pub fn bin_lit(digits: &str) -> Exp {
    exp(ExpKind::Lit(Lit::Bin(digits.to_owned())))
}

pub fn var(name: &str) -> Exp {
    exp(ExpKind::Id(id(name)))
}

pub fn app(name: &str, args: Vec<Exp>) -> Exp {
    exp(ExpKind::App(id(name), args))
}

pub fn block(exps: Vec<Exp>) -> Exp {
    exp(ExpKind::Block(exps))
}

pub fn if_exp(cond: Exp, then_exp: Exp, else_exp: Exp) -> Exp {
    exp(ExpKind::If(
        Box::new(cond),
        Box::new(then_exp),
        Box::new(else_exp),
    ))
}

pub fn assert_exp(cond: Exp) -> Exp {
    exp(ExpKind::Assert(Box::new(cond), Box::new(string_lit("assertion"))))
}

// Patterns ------------------------------------------------------------------

pub fn pat(kind: PatKind) -> Pat {
    Pat::new(kind, Span::Empty)
}

pub fn pat_id(name: &str) -> Pat {
    pat(PatKind::Id(id(name)))
}

pub fn pat_typ(typ: Typ, inner: Pat) -> Pat {
    pat(PatKind::Typ(typ, Box::new(inner)))
}

pub fn pat_tuple(pats: Vec<Pat>) -> Pat {
    pat(PatKind::Tuple(pats))
}

pub fn pat_app(name: &str, pats: Vec<Pat>) -> Pat {
    pat(PatKind::App(id(name), pats))
}

// Types ---------------------------------------------------------------------

pub fn atom(n: i64) -> Typ {
    Typ::atom(Nexp::constant(n))
}

pub fn atom_var(name: &str) -> Typ {
    Typ::atom(Nexp::var(kid(name)))
}

pub fn bits(n: i64) -> Typ {
    Typ::bits(Nexp::constant(n))
}

pub fn bits_var(name: &str) -> Typ {
    Typ::bits(Nexp::var(kid(name)))
}

pub fn fn_typ(args: Vec<Typ>, ret: Typ) -> Typ {
    Typ::function(args, ret, EffectSet::pure())
}

pub fn fn_typ_eff(args: Vec<Typ>, ret: Typ, effect: EffectSet) -> Typ {
    Typ::function(args, ret, effect)
}

pub fn forall_int(names: &[&str], constraints: Vec<NConstraint>) -> TypQuant {
    TypQuant::new(
        names.iter().map(|name| KindedId::int(kid(name))).collect(),
        constraints,
    )
}

// Definitions ---------------------------------------------------------------

pub fn spec(name: &str, quant: TypQuant, typ: Typ) -> Def {
    Def::Spec(ValSpec {
        id: id(name),
        quant,
        typ,
        is_cast: false,
        span: Span::Empty,
    })
}

pub fn cast_spec(name: &str, typ: Typ) -> Def {
    Def::Spec(ValSpec {
        id: id(name),
        quant: TypQuant::empty(),
        typ,
        is_cast: true,
        span: Span::Empty,
    })
}

pub fn fundef(name: &str, pat: Pat, body: Exp) -> Def {
    Def::Fun(FunDef {
        id: id(name),
        clauses: vec![FunClause {
            pat,
            body,
            span: Span::Empty,
        }],
        span: Span::Empty,
    })
}

// Environments --------------------------------------------------------------

/// An environment with the comparison and boolean operators registered.
pub fn prelude() -> Env {
    let defs = prelude_defs();
    let (_, env) = driver::check_defs(&Env::new(), &defs).expect("the prelude typechecks");
    env
}

pub fn prelude_defs() -> Vec<Def> {
    let int2 = || vec![Typ::int(), Typ::int()];
    vec![
        Def::DefaultOrder(Order::Dec, Span::Empty),
        spec("eq_int", TypQuant::empty(), fn_typ(int2(), Typ::bool())),
        spec("neq_int", TypQuant::empty(), fn_typ(int2(), Typ::bool())),
        spec("lteq_int", TypQuant::empty(), fn_typ(int2(), Typ::bool())),
        spec("gteq_int", TypQuant::empty(), fn_typ(int2(), Typ::bool())),
        spec("lt_int", TypQuant::empty(), fn_typ(int2(), Typ::bool())),
        spec("gt_int", TypQuant::empty(), fn_typ(int2(), Typ::bool())),
        spec(
            "eq_bool",
            TypQuant::empty(),
            fn_typ(vec![Typ::bool(), Typ::bool()], Typ::bool()),
        ),
        spec(
            "eq_bit",
            TypQuant::empty(),
            fn_typ(vec![Typ::bit(), Typ::bit()], Typ::bool()),
        ),
        spec(
            "and_bool",
            TypQuant::empty(),
            fn_typ(vec![Typ::bool(), Typ::bool()], Typ::bool()),
        ),
        spec(
            "or_bool",
            TypQuant::empty(),
            fn_typ(vec![Typ::bool(), Typ::bool()], Typ::bool()),
        ),
    ]
}

// Inspection ----------------------------------------------------------------

pub fn typ_of(exp: &Exp) -> Typ {
    exp.typ().cloned().expect("expression was annotated")
}

/// Every node's effect is a superset of the union of its children's.
pub fn effects_monotone(exp: &Exp) -> bool {
    let effect = exp.effect();
    children(exp).iter().all(|child| {
        child.effect().is_subset(&effect) && effects_monotone(child)
    })
}

fn children(exp: &Exp) -> Vec<&Exp> {
    match &exp.kind {
        ExpKind::Block(exps) | ExpKind::Tuple(exps) | ExpKind::Vector(exps) => {
            exps.iter().collect()
        }
        ExpKind::Id(_) | ExpKind::Lit(_) | ExpKind::Ref(_) => Vec::new(),
        ExpKind::Cast(_, inner)
        | ExpKind::Exit(inner)
        | ExpKind::Return(inner) => vec![inner.as_ref()],
        ExpKind::App(_, args) => args.iter().collect(),
        ExpKind::If(cond, then_exp, else_exp) => {
            vec![cond.as_ref(), then_exp.as_ref(), else_exp.as_ref()]
        }
        ExpKind::Match(scrutinee, arms) => std::iter::once(scrutinee.as_ref())
            .chain(arms.iter().map(|arm| &arm.exp))
            .collect(),
        ExpKind::Let(_, bind, body) => vec![bind.as_ref(), body.as_ref()],
        ExpKind::Assign(_, rhs) => vec![rhs.as_ref()],
        ExpKind::RecordUpdate(record, fields) => std::iter::once(record.as_ref())
            .chain(fields.iter().map(|(_, exp)| exp))
            .collect(),
        ExpKind::Field(record, _) => vec![record.as_ref()],
        ExpKind::Assert(cond, msg) => vec![cond.as_ref(), msg.as_ref()],
    }
}
