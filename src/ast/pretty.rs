//! A pretty printer for types, numeric expressions and constraints.
//!
//! Diagnostics embed the unbounded-width rendering, which is also what the
//! `Display` impls produce.

use std::fmt;

use itertools::Itertools;
use pretty::RcDoc;

use crate::ast::{EffectSet, NConstraint, Nexp, Order, Typ, TypArg, TypQuant};

/// Numeric expression precedences.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    Top = 0,
    Sum,
    Product,
    Atomic,
}

fn paren(wrap: bool, doc: RcDoc<'static>) -> RcDoc<'static> {
    if wrap {
        RcDoc::text("(").append(doc).append(RcDoc::text(")"))
    } else {
        doc
    }
}

pub fn nexp(nexp: &Nexp) -> RcDoc<'static> {
    nexp_prec(Prec::Top, nexp)
}

fn nexp_prec(prec: Prec, nexp: &Nexp) -> RcDoc<'static> {
    match nexp {
        Nexp::Id(id) => RcDoc::text(id.name().to_owned()),
        Nexp::Var(kid) => RcDoc::text(kid.to_string()),
        Nexp::Constant(n) => RcDoc::text(n.to_string()),
        Nexp::App(id, args) => RcDoc::text(id.name().to_owned())
            .append(RcDoc::text("("))
            .append(RcDoc::intersperse(
                args.iter().map(|arg| nexp_prec(Prec::Top, arg)),
                RcDoc::text(", "),
            ))
            .append(RcDoc::text(")")),
        Nexp::Sum(lhs, rhs) => paren(
            prec > Prec::Sum,
            nexp_prec(Prec::Sum, lhs)
                .append(RcDoc::text(" + "))
                .append(nexp_prec(Prec::Product, rhs)),
        ),
        Nexp::Minus(lhs, rhs) => paren(
            prec > Prec::Sum,
            nexp_prec(Prec::Sum, lhs)
                .append(RcDoc::text(" - "))
                .append(nexp_prec(Prec::Product, rhs)),
        ),
        Nexp::Times(lhs, rhs) => paren(
            prec > Prec::Product,
            nexp_prec(Prec::Product, lhs)
                .append(RcDoc::text(" * "))
                .append(nexp_prec(Prec::Atomic, rhs)),
        ),
        Nexp::Exp(exp) => RcDoc::text("2 ^ ").append(nexp_prec(Prec::Atomic, exp)),
        Nexp::Neg(exp) => RcDoc::text("- ").append(nexp_prec(Prec::Atomic, exp)),
    }
}

pub fn constraint(nc: &NConstraint) -> RcDoc<'static> {
    match nc {
        NConstraint::Equal(lhs, rhs) => infix(lhs, "==", rhs),
        NConstraint::NotEqual(lhs, rhs) => infix(lhs, "!=", rhs),
        NConstraint::BoundedLe(lhs, rhs) => infix(lhs, "<=", rhs),
        NConstraint::BoundedGe(lhs, rhs) => infix(lhs, ">=", rhs),
        NConstraint::Set(kid, ns) => RcDoc::text(kid.to_string())
            .append(RcDoc::text(" in {"))
            .append(RcDoc::text(ns.iter().format(", ").to_string()))
            .append(RcDoc::text("}")),
        NConstraint::Or(lhs, rhs) => paren(
            true,
            constraint(lhs)
                .append(RcDoc::text(" | "))
                .append(constraint(rhs)),
        ),
        NConstraint::And(lhs, rhs) => constraint(lhs)
            .append(RcDoc::text(" & "))
            .append(constraint(rhs)),
        NConstraint::True => RcDoc::text("true"),
        NConstraint::False => RcDoc::text("false"),
        NConstraint::App(id, args) => RcDoc::text(id.name().to_owned())
            .append(RcDoc::text("("))
            .append(RcDoc::intersperse(typ_args(args), RcDoc::text(", ")))
            .append(RcDoc::text(")")),
    }
}

fn infix(lhs: &Nexp, op: &'static str, rhs: &Nexp) -> RcDoc<'static> {
    nexp_prec(Prec::Sum, lhs)
        .append(RcDoc::text(" "))
        .append(RcDoc::text(op))
        .append(RcDoc::text(" "))
        .append(nexp_prec(Prec::Sum, rhs))
}

pub fn order(order: &Order) -> RcDoc<'static> {
    match order {
        Order::Var(kid) => RcDoc::text(kid.to_string()),
        Order::Inc => RcDoc::text("inc"),
        Order::Dec => RcDoc::text("dec"),
    }
}

pub fn typ(typ: &Typ) -> RcDoc<'static> {
    match typ {
        Typ::Id(id) => RcDoc::text(id.name().to_owned()),
        Typ::Var(kid) => RcDoc::text(kid.to_string()),
        Typ::Fn(args, ret, effect) => {
            let args = match args.len() {
                1 => self::typ(&args[0]),
                _ => paren(
                    true,
                    RcDoc::intersperse(args.iter().map(self::typ), RcDoc::text(", ")),
                ),
            };
            args.append(RcDoc::text(" -> "))
                .append(self::typ(ret))
                .append(if effect.is_pure() {
                    RcDoc::nil()
                } else {
                    RcDoc::text(" effect ").append(effect_set(effect))
                })
        }
        Typ::Bidir(lhs, rhs) => self::typ(lhs)
            .append(RcDoc::text(" <-> "))
            .append(self::typ(rhs)),
        Typ::Tuple(typs) => paren(
            true,
            RcDoc::intersperse(typs.iter().map(self::typ), RcDoc::text(", ")),
        ),
        Typ::App(id, args) => RcDoc::text(id.name().to_owned())
            .append(RcDoc::text("("))
            .append(RcDoc::intersperse(typ_args(args), RcDoc::text(", ")))
            .append(RcDoc::text(")")),
        Typ::Exist(kids, nc, body) => RcDoc::text("{")
            .append(RcDoc::intersperse(
                kids.iter().map(|kinded| RcDoc::text(kinded.kid.to_string())),
                RcDoc::text(" "),
            ))
            .append(RcDoc::text(", "))
            .append(constraint(nc))
            .append(RcDoc::text(". "))
            .append(self::typ(body))
            .append(RcDoc::text("}")),
        Typ::Unknown => RcDoc::text("?"),
    }
}

fn typ_args(args: &[TypArg]) -> impl Iterator<Item = RcDoc<'static>> + '_ {
    args.iter().map(|arg| match arg {
        TypArg::Nexp(n) => nexp(n),
        TypArg::Typ(t) => typ(t),
        TypArg::Order(o) => order(o),
    })
}

pub fn effect_set(effect: &EffectSet) -> RcDoc<'static> {
    RcDoc::text("{")
        .append(RcDoc::text(effect.iter().format(", ").to_string()))
        .append(RcDoc::text("}"))
}

pub fn typ_quant(quant: &TypQuant) -> RcDoc<'static> {
    if quant.is_empty() {
        return RcDoc::nil();
    }
    RcDoc::text("forall ")
        .append(RcDoc::intersperse(
            quant.kids.iter().map(|kinded| {
                RcDoc::text(format!("{} : {}", kinded.kid, kinded.kind))
            }),
            RcDoc::text(" "),
        ))
        .append(if quant.constraints.is_empty() {
            RcDoc::nil()
        } else {
            RcDoc::text(", ").append(RcDoc::intersperse(
                quant.constraints.iter().map(constraint),
                RcDoc::text(" & "),
            ))
        })
        .append(RcDoc::text(". "))
}

impl fmt::Display for Nexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", nexp(self).pretty(usize::MAX))
    }
}

impl fmt::Display for NConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", constraint(self).pretty(usize::MAX))
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", order(self).pretty(usize::MAX))
    }
}

impl fmt::Display for Typ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", typ(self).pretty(usize::MAX))
    }
}

impl fmt::Display for EffectSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", effect_set(self).pretty(usize::MAX))
    }
}

impl fmt::Display for TypQuant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", typ_quant(self).pretty(usize::MAX))
    }
}
