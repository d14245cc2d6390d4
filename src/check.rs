//! The bidirectional expression checker.
//!
//! Checking and inference are mutually recursive: check mode validates an
//! expression against a known type and falls through to inference plus an
//! implicit coercion when no rule applies directly, while inference
//! synthesises a type bottom-up. Overload candidates, mapping directions and
//! casts are searched by treating type errors as values and accumulating the
//! per-candidate failures.

use log::{debug, trace};

use crate::ast::subst::{kids_of_typ, nexp_simp};
use crate::ast::{
    Annot, Effect, EffectSet, Exp, ExpKind, Id, Kind, KindedId, LExp, LExpKind, Lit, Mut,
    NConstraint, Nexp, Pat, PatExp, PatKind, Typ, TypArg,
};
use crate::env::{Bind, Env};
use crate::reporting::TypeError;
use crate::solver;
use crate::source::Span;
use crate::subtype::{self, destructure_numeric};
use crate::unify::{self, Unifier, Uvar};

// ---------------------------------------------------------------------------
// Check mode
// ---------------------------------------------------------------------------

/// Check `exp` against `typ`, returning the annotated expression.
pub fn check_exp(env: &Env, exp: &Exp, typ: &Typ) -> Result<Exp, TypeError> {
    trace!("check: {:?} <= {}", exp.kind, typ);
    let span = exp.span;

    match &exp.kind {
        ExpKind::Block(exps) => {
            let (exps, effect) = check_block(env, exps, typ, span)?;
            Ok(Exp::new(ExpKind::Block(exps), span)
                .with_annot(Annot::new(env.clone(), typ.clone(), effect).with_expected(typ.clone())))
        }
        ExpKind::If(cond, then_exp, else_exp) => {
            let cond = check_exp(env, cond, &Typ::bool())?;
            let (then_env, else_env) = branch_envs(env, &cond);
            let then_exp = check_exp(&then_env, then_exp, typ)?;
            let else_exp = check_exp(&else_env, else_exp, typ)?;

            let effect = cond
                .effect()
                .union(&then_exp.effect())
                .union(&else_exp.effect());
            Ok(Exp::new(
                ExpKind::If(Box::new(cond), Box::new(then_exp), Box::new(else_exp)),
                span,
            )
            .with_annot(Annot::new(env.clone(), typ.clone(), effect).with_expected(typ.clone())))
        }
        ExpKind::Match(scrutinee, arms) => {
            let scrutinee = infer_exp(env, scrutinee)?;
            let scrutinee_typ = annot_typ(&scrutinee)?;
            let mut effect = scrutinee.effect();
            let mut checked_arms = Vec::with_capacity(arms.len());
            for arm in arms {
                let (pat, arm_env) = bind_pat(env, &arm.pat, &scrutinee_typ)?;
                let body = check_exp(&arm_env, &arm.exp, typ)?;
                effect.union_with(&body.effect());
                checked_arms.push(PatExp { pat, exp: body });
            }
            consult_completeness(&checked_arms, span);
            Ok(Exp::new(ExpKind::Match(Box::new(scrutinee), checked_arms), span)
                .with_annot(Annot::new(env.clone(), typ.clone(), effect).with_expected(typ.clone())))
        }
        ExpKind::Let(pat, bind, body) => {
            let (pat, bind, let_env) = check_let(env, pat, bind)?;
            let body = check_exp(&let_env, body, typ)?;
            let effect = bind.effect().union(&body.effect());
            Ok(Exp::new(ExpKind::Let(pat, Box::new(bind), Box::new(body)), span)
                .with_annot(Annot::new(env.clone(), typ.clone(), effect).with_expected(typ.clone())))
        }
        ExpKind::Cast(cast_typ, inner) => {
            env.wf_typ(cast_typ)?;
            let inner = check_exp(env, inner, cast_typ)?;
            let effect = inner.effect();
            let cast = Exp::new(ExpKind::Cast(cast_typ.clone(), Box::new(inner)), span)
                .with_annot(Annot::new(env.clone(), cast_typ.clone(), effect));
            coerce(env, cast, typ)
        }
        ExpKind::Lit(Lit::Undefined) => {
            if !env.poly_undefineds() && !kids_of_typ(typ).is_empty() {
                return Err(TypeError::other(
                    span,
                    format!("undefined literal needs a monomorphic type, not `{}`", typ),
                ));
            }
            Ok(Exp::new(ExpKind::Lit(Lit::Undefined), span).with_annot(
                Annot::new(env.clone(), typ.clone(), EffectSet::single(Effect::Undefined))
                    .with_expected(typ.clone()),
            ))
        }
        ExpKind::Vector(items) => check_vector(env, items, typ, span)
            .or_else(|err| fallthrough(env, exp, typ).map_err(|_| err)),
        ExpKind::Tuple(exps) => match typ {
            Typ::Tuple(typs) if typs.len() == exps.len() => {
                let mut effect = EffectSet::pure();
                let mut checked = Vec::with_capacity(exps.len());
                for (exp, typ) in exps.iter().zip(typs.iter()) {
                    let exp = check_exp(env, exp, typ)?;
                    effect.union_with(&exp.effect());
                    checked.push(exp);
                }
                Ok(Exp::new(ExpKind::Tuple(checked), span).with_annot(
                    Annot::new(env.clone(), typ.clone(), effect).with_expected(typ.clone()),
                ))
            }
            _ => fallthrough(env, exp, typ),
        },
        ExpKind::App(id, args) => {
            let inferred = infer_app(env, id, args, Some(typ), span)?;
            coerce(env, inferred, typ)
        }
        ExpKind::Return(inner) => {
            let ret_typ = env
                .get_ret_typ()
                .cloned()
                .ok_or_else(|| TypeError::other(span, "return outside a function body"))?;
            let inner = check_exp(env, inner, &ret_typ)?;
            let effect = inner.effect();
            Ok(Exp::new(ExpKind::Return(Box::new(inner)), span)
                .with_annot(Annot::new(env.clone(), typ.clone(), effect).with_expected(typ.clone())))
        }
        _ => fallthrough(env, exp, typ),
    }
}

/// The default check rule: infer, then coerce to the target.
fn fallthrough(env: &Env, exp: &Exp, typ: &Typ) -> Result<Exp, TypeError> {
    let inferred = infer_exp(env, exp)?;
    coerce(env, inferred, typ)
}

/// Check the expressions of a block: every non-final expression against
/// `unit`, the final one against the block's type. Assignments and asserted
/// propositions thread an extended environment through the remainder.
fn check_block(
    env: &Env,
    exps: &[Exp],
    typ: &Typ,
    span: Span,
) -> Result<(Vec<Exp>, EffectSet), TypeError> {
    let (last, prefix) = match exps.split_last() {
        Some(split) => split,
        None => {
            return if matches!(typ, Typ::Id(id) if id.name() == "unit") {
                Ok((Vec::new(), EffectSet::pure()))
            } else {
                Err(TypeError::other(span, "empty block cannot have a non-unit type"))
            }
        }
    };
    let (mut checked, env, mut effect) = check_block_prefix(env, prefix)?;
    let last = match &last.kind {
        ExpKind::Assign(lexp, rhs) => {
            let assign = check_assign(&env, lexp, rhs, last.span)?.0;
            coerce(&env, assign, typ)?
        }
        _ => check_exp(&env, last, typ)?,
    };
    effect.union_with(&last.effect());
    checked.push(last);
    Ok((checked, effect))
}

/// Check the non-final expressions of a block against `unit`, threading the
/// environment through assignments and asserted propositions.
fn check_block_prefix(
    env: &Env,
    exps: &[Exp],
) -> Result<(Vec<Exp>, Env, EffectSet), TypeError> {
    let mut env = env.clone();
    let mut effect = EffectSet::pure();
    let mut checked = Vec::with_capacity(exps.len());

    for exp in exps {
        let exp = match &exp.kind {
            ExpKind::Assign(lexp, rhs) => {
                let (assign, new_env) = check_assign(&env, lexp, rhs, exp.span)?;
                env = new_env;
                assign
            }
            ExpKind::Assert(cond, _) => {
                let checked_assert = check_exp(&env, exp, &Typ::unit())?;
                // A pure constraint assertion extends the environment for
                // the rest of the block.
                let cond = check_exp(&env, cond, &Typ::bool())?;
                narrow_operands(&mut env, &cond);
                if let Some(nc) = assert_constraint(&env, &cond) {
                    env.add_constraint(nc);
                }
                checked_assert
            }
            _ => check_exp(&env, exp, &Typ::unit())?,
        };
        effect.union_with(&exp.effect());
        checked.push(exp);
    }
    Ok((checked, env, effect))
}

/// Check an assignment: the right-hand side is checked against a declared
/// l-value type when one is given, inferred otherwise; the l-expression then
/// binds against the result.
fn check_assign(
    env: &Env,
    lexp: &LExp,
    rhs: &Exp,
    span: Span,
) -> Result<(Exp, Env), TypeError> {
    let rhs = match &lexp.kind {
        LExpKind::Typ(declared, _) => check_exp(env, rhs, declared)?,
        _ => infer_exp(env, rhs)?,
    };
    let rhs_typ = annot_typ(&rhs)?;
    let (lexp, env_after) = bind_lexp(env, lexp, &rhs_typ)?;
    let effect = rhs.effect().union(&lexp_effect(&lexp));
    let assign = Exp::new(ExpKind::Assign(Box::new(lexp), Box::new(rhs)), span)
        .with_annot(Annot::new(env_after.clone(), Typ::unit(), effect));
    Ok((assign, env_after))
}

fn check_let(env: &Env, pat: &Pat, bind: &Exp) -> Result<(Pat, Exp, Env), TypeError> {
    let bind = match &pat.kind {
        PatKind::Typ(ascription, _) => {
            env.wf_typ(ascription)?;
            check_exp(env, bind, ascription)?
        }
        _ => infer_exp(env, bind)?,
    };
    let bind_typ = annot_typ(&bind)?;
    let (pat, env) = bind_pat(env, pat, &bind_typ)?;
    Ok((pat, bind, env))
}

fn check_vector(env: &Env, items: &[Exp], typ: &Typ, span: Span) -> Result<Exp, TypeError> {
    let (len, elem) = match env.expand_synonyms(typ)? {
        Typ::App(id, args) if id.name() == "bits" => match args.as_slice() {
            [TypArg::Nexp(len)] => (len.clone(), Typ::bit()),
            _ => return Err(TypeError::other(span, "malformed bits type")),
        },
        Typ::App(id, args) if id.name() == "vector" => match args.as_slice() {
            [TypArg::Nexp(len), TypArg::Order(_), TypArg::Typ(elem)] => {
                (len.clone(), elem.clone())
            }
            _ => return Err(TypeError::other(span, "malformed vector type")),
        },
        typ => {
            return Err(TypeError::Mismatch {
                span,
                expected: typ,
                found: Typ::id("vector"),
            })
        }
    };

    let expected_len = NConstraint::eq(len, Nexp::constant(items.len() as i64));
    if !solver::prove(env, &expected_len) {
        return Err(TypeError::CouldNotProve {
            span,
            constraint: expected_len,
            constraints: env.get_constraints(),
        });
    }

    let mut effect = EffectSet::pure();
    let mut checked = Vec::with_capacity(items.len());
    for item in items {
        let item = check_exp(env, item, &elem)?;
        effect.union_with(&item.effect());
        checked.push(item);
    }
    Ok(Exp::new(ExpKind::Vector(checked), span)
        .with_annot(Annot::new(env.clone(), typ.clone(), effect).with_expected(typ.clone())))
}

// ---------------------------------------------------------------------------
// Coercion
// ---------------------------------------------------------------------------

/// Coerce an inferred expression to the target type: accept it when it is
/// already a subtype, otherwise try the registered casts in order.
fn coerce(env: &Env, exp: Exp, typ: &Typ) -> Result<Exp, TypeError> {
    let inferred = annot_typ(&exp)?;
    let trigger = match subtype::subtyp(env, &inferred, typ, exp.span) {
        Ok(()) => {
            let mut exp = exp;
            if let Some(annot) = &mut exp.annot {
                annot.expected = Some(typ.clone());
            }
            return Ok(exp);
        }
        Err(err) => err,
    };

    if !env.allow_casts() {
        return Err(trigger);
    }

    // Casts are disabled while a cast application itself is checked, so
    // coercion search cannot recurse into itself.
    let mut cast_env = env.clone();
    cast_env.set_allow_casts(false);

    let mut attempted = false;
    let mut alternatives = Vec::new();
    for cast in env.get_casts() {
        let bind = match env.get_val_spec(&cast) {
            Ok(bind) => bind,
            Err(err) => {
                alternatives.push((cast, err));
                continue;
            }
        };
        let (from, to) = match &bind.typ {
            Typ::Fn(args, ret, _) if args.len() == 1 => (&args[0], ret.as_ref()),
            _ => continue,
        };
        if !match_typ(env, from, &inferred) || !match_typ(env, to, typ) {
            continue;
        }
        debug!("coerce: trying cast {}", cast);
        attempted = true;
        let cast_app = Exp::new(
            ExpKind::App(cast.clone(), vec![exp.strip_annots()]),
            exp.span,
        );
        match check_exp(&cast_env, &cast_app, typ) {
            Ok(coerced) => return Ok(coerced),
            Err(err) => alternatives.push((cast, err)),
        }
    }

    if !attempted {
        return Err(trigger);
    }
    Err(TypeError::NoCasts {
        span: exp.span,
        found: inferred,
        expected: typ.clone(),
        trigger: Box::new(trigger),
        alternatives,
    })
}

/// A conservative overapproximation of "could unify", used to pre-filter
/// cast candidates.
fn match_typ(env: &Env, typ1: &Typ, typ2: &Typ) -> bool {
    let numeric = |typ: &Typ| {
        matches!(typ, Typ::Id(id) if id.name() == "int" || id.name() == "nat")
            || matches!(typ, Typ::App(id, _) if id.name() == "atom" || id.name() == "range")
    };
    match (typ1, typ2) {
        (Typ::Var(_), _) | (_, Typ::Var(_)) => true,
        (Typ::Unknown, _) | (_, Typ::Unknown) => true,
        (Typ::Exist(_, _, body), typ) => match_typ(env, body, typ),
        (typ, Typ::Exist(_, _, body)) => match_typ(env, typ, body),
        (typ1, typ2) if numeric(typ1) && numeric(typ2) => true,
        (Typ::Id(id1), Typ::Id(id2)) => id1 == id2,
        (Typ::App(id1, args1), Typ::App(id2, args2)) => {
            id1 == id2 && args1.len() == args2.len()
        }
        (Typ::Tuple(typs1), Typ::Tuple(typs2)) => {
            typs1.len() == typs2.len()
                && typs1
                    .iter()
                    .zip(typs2.iter())
                    .all(|(typ1, typ2)| match_typ(env, typ1, typ2))
        }
        (Typ::Fn(args1, _, _), Typ::Fn(args2, _, _)) => args1.len() == args2.len(),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Inference
// ---------------------------------------------------------------------------

/// Infer a type for `exp`, returning the annotated expression.
pub fn infer_exp(env: &Env, exp: &Exp) -> Result<Exp, TypeError> {
    trace!("infer: {:?}", exp.kind);
    let span = exp.span;

    match &exp.kind {
        ExpKind::Id(id) => infer_id(env, id, span),
        ExpKind::Lit(lit) => {
            let typ = infer_lit(lit, span)?;
            Ok(Exp::new(ExpKind::Lit(lit.clone()), span)
                .with_annot(Annot::new(env.clone(), typ, EffectSet::pure())))
        }
        ExpKind::Cast(cast_typ, inner) => {
            env.wf_typ(cast_typ)?;
            let inner = check_exp(env, inner, cast_typ)?;
            let effect = inner.effect();
            Ok(Exp::new(ExpKind::Cast(cast_typ.clone(), Box::new(inner)), span)
                .with_annot(Annot::new(env.clone(), cast_typ.clone(), effect)))
        }
        ExpKind::App(id, args) => infer_app(env, id, args, None, span),
        ExpKind::Tuple(exps) => {
            let mut effect = EffectSet::pure();
            let mut typs = Vec::with_capacity(exps.len());
            let mut checked = Vec::with_capacity(exps.len());
            for exp in exps {
                let exp = infer_exp(env, exp)?;
                effect.union_with(&exp.effect());
                typs.push(annot_typ(&exp)?);
                checked.push(exp);
            }
            Ok(Exp::new(ExpKind::Tuple(checked), span)
                .with_annot(Annot::new(env.clone(), Typ::Tuple(typs), effect)))
        }
        ExpKind::If(cond, then_exp, else_exp) => {
            let cond = check_exp(env, cond, &Typ::bool())?;
            let (then_env, else_env) = branch_envs(env, &cond);
            let then_exp = infer_exp(&then_env, then_exp)?;
            let else_exp = infer_exp(&else_env, else_exp)?;
            let typ = join_typs(env, &annot_typ(&then_exp)?, &annot_typ(&else_exp)?, span)?;

            let effect = cond
                .effect()
                .union(&then_exp.effect())
                .union(&else_exp.effect());
            Ok(Exp::new(
                ExpKind::If(Box::new(cond), Box::new(then_exp), Box::new(else_exp)),
                span,
            )
            .with_annot(Annot::new(env.clone(), typ, effect)))
        }
        ExpKind::Match(scrutinee, arms) => {
            let scrutinee = infer_exp(env, scrutinee)?;
            let scrutinee_typ = annot_typ(&scrutinee)?;
            let mut effect = scrutinee.effect();
            let mut typ: Option<Typ> = None;
            let mut checked_arms = Vec::with_capacity(arms.len());
            for arm in arms {
                let (pat, arm_env) = bind_pat(env, &arm.pat, &scrutinee_typ)?;
                let body = infer_exp(&arm_env, &arm.exp)?;
                effect.union_with(&body.effect());
                let body_typ = annot_typ(&body)?;
                typ = Some(match typ {
                    None => body_typ,
                    Some(typ) => join_typs(env, &typ, &body_typ, span)?,
                });
                checked_arms.push(PatExp { pat, exp: body });
            }
            let typ = typ.ok_or_else(|| TypeError::other(span, "match with no arms"))?;
            consult_completeness(&checked_arms, span);
            Ok(Exp::new(ExpKind::Match(Box::new(scrutinee), checked_arms), span)
                .with_annot(Annot::new(env.clone(), typ, effect)))
        }
        ExpKind::Let(pat, bind, body) => {
            let (pat, bind, let_env) = check_let(env, pat, bind)?;
            let body = infer_exp(&let_env, body)?;
            let typ = annot_typ(&body)?;
            let effect = bind.effect().union(&body.effect());
            Ok(Exp::new(ExpKind::Let(pat, Box::new(bind), Box::new(body)), span)
                .with_annot(Annot::new(env.clone(), typ, effect)))
        }
        ExpKind::Block(exps) => {
            let (last, prefix) = match exps.split_last() {
                Some(split) => split,
                None => {
                    return Ok(Exp::new(ExpKind::Block(Vec::new()), span).with_annot(
                        Annot::new(env.clone(), Typ::unit(), EffectSet::pure()),
                    ))
                }
            };
            let (mut checked, block_env, mut effect) = check_block_prefix(env, prefix)?;
            let last = infer_exp(&block_env, last)?;
            let typ = annot_typ(&last)?;
            effect.union_with(&last.effect());
            checked.push(last);
            Ok(Exp::new(ExpKind::Block(checked), span)
                .with_annot(Annot::new(env.clone(), typ, effect)))
        }
        ExpKind::Field(record, field) => {
            let record = infer_exp(env, record)?;
            let record_typ = annot_typ(&record)?;
            let (typ, effect) = infer_field_access(env, &record_typ, field, record.effect(), span)?;
            Ok(Exp::new(ExpKind::Field(Box::new(record), field.clone()), span)
                .with_annot(Annot::new(env.clone(), typ, effect)))
        }
        ExpKind::RecordUpdate(record, fields) => {
            infer_record_update(env, record, fields, span)
        }
        ExpKind::Vector(items) => {
            let mut items_iter = items.iter();
            let first = match items_iter.next() {
                Some(first) => infer_exp(env, first)?,
                None => {
                    return Err(TypeError::other(span, "cannot infer the type of an empty vector"))
                }
            };
            let elem = annot_typ(&first)?;
            let mut effect = first.effect();
            let mut checked = vec![first];
            for item in items_iter {
                let item = check_exp(env, item, &elem)?;
                effect.union_with(&item.effect());
                checked.push(item);
            }
            let len = Nexp::constant(checked.len() as i64);
            let typ = if elem == Typ::bit() {
                Typ::bits(len)
            } else {
                let order = env
                    .get_default_order()
                    .cloned()
                    .ok_or_else(|| TypeError::other(span, "no default order is set"))?;
                Typ::vector(len, order, elem)
            };
            Ok(Exp::new(ExpKind::Vector(checked), span)
                .with_annot(Annot::new(env.clone(), typ, effect)))
        }
        ExpKind::Assign(lexp, rhs) => check_assign(env, lexp, rhs, span).map(|(exp, _)| exp),
        ExpKind::Assert(cond, msg) => {
            let cond = check_exp(env, cond, &Typ::bool())?;
            let msg = check_exp(env, msg, &Typ::string())?;
            let effect = cond
                .effect()
                .union(&msg.effect())
                .union(&EffectSet::single(Effect::Escape));
            Ok(Exp::new(ExpKind::Assert(Box::new(cond), Box::new(msg)), span)
                .with_annot(Annot::new(env.clone(), Typ::unit(), effect)))
        }
        ExpKind::Exit(inner) => {
            let inner = check_exp(env, inner, &Typ::unit())?;
            let effect = inner.effect().union(&EffectSet::single(Effect::Escape));
            Ok(Exp::new(ExpKind::Exit(Box::new(inner)), span)
                .with_annot(Annot::new(env.clone(), Typ::unit(), effect)))
        }
        ExpKind::Return(inner) => {
            let ret_typ = env
                .get_ret_typ()
                .cloned()
                .ok_or_else(|| TypeError::other(span, "return outside a function body"))?;
            let inner = check_exp(env, inner, &ret_typ)?;
            let typ = annot_typ(&inner)?;
            let effect = inner.effect();
            Ok(Exp::new(ExpKind::Return(Box::new(inner)), span)
                .with_annot(Annot::new(env.clone(), typ, effect)))
        }
        ExpKind::Ref(id) => match env.get_register(id) {
            Some(entry) => {
                let typ = Typ::register(entry.typ.clone());
                Ok(Exp::new(ExpKind::Ref(id.clone()), span)
                    .with_annot(Annot::new(env.clone(), typ, EffectSet::pure())))
            }
            None => Err(TypeError::UnboundId {
                span,
                id: id.clone(),
            }),
        },
    }
}

fn infer_id(env: &Env, id: &Id, span: Span) -> Result<Exp, TypeError> {
    if let Some((_, typ)) = env.get_local(id) {
        return Ok(Exp::new(ExpKind::Id(id.clone()), span)
            .with_annot(Annot::new(env.clone(), typ, EffectSet::pure())));
    }
    if let Some(enum_id) = env.enum_for_member(id) {
        return Ok(Exp::new(ExpKind::Id(id.clone()), span).with_annot(Annot::new(
            env.clone(),
            Typ::Id(enum_id.clone()),
            EffectSet::pure(),
        )));
    }
    if let Some(entry) = env.get_register(id) {
        return Ok(Exp::new(ExpKind::Id(id.clone()), span).with_annot(Annot::new(
            env.clone(),
            entry.typ.clone(),
            entry.read_effect.clone(),
        )));
    }
    Err(TypeError::UnboundId {
        span,
        id: id.clone(),
    })
}

fn infer_lit(lit: &Lit, span: Span) -> Result<Typ, TypeError> {
    match lit {
        Lit::Unit => Ok(Typ::unit()),
        Lit::Zero | Lit::One => Ok(Typ::bit()),
        Lit::True | Lit::False => Ok(Typ::bool()),
        Lit::Num(n) => Ok(Typ::atom(Nexp::Constant(n.clone()))),
        Lit::Bin(digits) => Ok(Typ::bits(Nexp::constant(digits.len() as i64))),
        Lit::Hex(digits) => Ok(Typ::bits(Nexp::constant(4 * digits.len() as i64))),
        Lit::String(_) => Ok(Typ::string()),
        Lit::Undefined => Err(TypeError::other(
            span,
            "cannot infer the type of undefined; check it against a type",
        )),
    }
}

fn infer_field_access(
    env: &Env,
    record_typ: &Typ,
    field: &Id,
    record_effect: EffectSet,
    span: Span,
) -> Result<(Typ, EffectSet), TypeError> {
    let record_typ = env.expand_synonyms(record_typ)?;
    let record_id = match &record_typ {
        Typ::Id(id) => id.clone(),
        Typ::App(id, _) => id.clone(),
        typ => {
            return Err(TypeError::other(
                span,
                format!("`{}` is not a record type", typ),
            ))
        }
    };
    let accessor = env.get_accessor(&record_id, field).ok_or_else(|| {
        TypeError::other(
            span,
            format!("no field `{}` on record `{}`", field, record_id),
        )
    })?;
    let (shape, field_typ) = match &accessor.typ {
        Typ::Fn(args, ret, _) if args.len() == 1 => (args[0].clone(), ret.as_ref().clone()),
        _ => return Err(TypeError::other(span, "malformed field accessor")),
    };
    let unification = unify::unify(env, &shape, &record_typ, span)?;
    Ok((
        unify::apply_unifier_typ(&field_typ, &unification.unifier),
        record_effect,
    ))
}

fn infer_record_update(
    env: &Env,
    record: &Exp,
    fields: &[(Id, Exp)],
    span: Span,
) -> Result<Exp, TypeError> {
    let record = infer_exp(env, record)?;
    let record_typ = env.expand_synonyms(&annot_typ(&record)?)?;
    let record_id = match &record_typ {
        Typ::Id(id) => id.clone(),
        Typ::App(id, _) => id.clone(),
        typ => {
            return Err(TypeError::other(
                span,
                format!("`{}` is not a record type", typ),
            ))
        }
    };
    if env.get_record(&record_id).is_none() {
        return Err(TypeError::other(
            span,
            format!("`{}` is not a record type", record_id),
        ));
    }

    let mut effect = record.effect();
    let mut checked_fields = Vec::with_capacity(fields.len());
    for (field, exp) in fields {
        let accessor = env.get_accessor(&record_id, field).ok_or_else(|| {
            TypeError::other(
                span,
                format!("no field `{}` on record `{}`", field, record_id),
            )
        })?;
        let (shape, field_typ) = match &accessor.typ {
            Typ::Fn(args, ret, _) if args.len() == 1 => {
                (args[0].clone(), ret.as_ref().clone())
            }
            _ => return Err(TypeError::other(span, "malformed field accessor")),
        };
        let unification = unify::unify(env, &shape, &record_typ, span)?;
        let target = unify::apply_unifier_typ(&field_typ, &unification.unifier);
        let exp = check_exp(env, exp, &target)?;
        effect.union_with(&exp.effect());
        checked_fields.push((field.clone(), exp));
    }
    Ok(Exp::new(
        ExpKind::RecordUpdate(Box::new(record), checked_fields),
        span,
    )
    .with_annot(Annot::new(env.clone(), record_typ, effect)))
}

/// The type of an `if` or `match` whose branches disagree: equal types stand,
/// one-way subtypes widen, and numeric branches pack into an existential.
fn join_typs(env: &Env, typ1: &Typ, typ2: &Typ, span: Span) -> Result<Typ, TypeError> {
    if crate::ast::subst::alpha_equivalent(typ1, typ2) {
        return Ok(typ1.clone());
    }
    if subtype::subtyp(env, typ1, typ2, span).is_ok() {
        return Ok(typ2.clone());
    }
    if subtype::subtyp(env, typ2, typ1, span).is_ok() {
        return Ok(typ1.clone());
    }
    match (destructure_numeric(env, typ1), destructure_numeric(env, typ2)) {
        (Some((kids1, nc1, nexp1)), Some((kids2, nc2, nexp2))) => {
            let kid = env.fresh_existential(None);
            let var = Nexp::Var(kid.clone());
            let mut kids = vec![KindedId::int(kid)];
            kids.extend(kids1);
            kids.extend(kids2);
            let nc = NConstraint::or(
                NConstraint::and(nc1, NConstraint::eq(var.clone(), nexp1)),
                NConstraint::and(nc2, NConstraint::eq(var.clone(), nexp2)),
            );
            Ok(Typ::exist(kids, nc, Typ::atom(var)))
        }
        _ => Err(TypeError::Mismatch {
            span,
            expected: typ1.clone(),
            found: typ2.clone(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Application
// ---------------------------------------------------------------------------

/// Infer an application: overload resolution, mapping direction dispatch,
/// union constructor sugar, then ordinary function application.
fn infer_app(
    env: &Env,
    id: &Id,
    args: &[Exp],
    expected_ret: Option<&Typ>,
    span: Span,
) -> Result<Exp, TypeError> {
    if let Some(candidates) = env.get_overloads(id) {
        let candidates = candidates.clone();
        debug!("overload: {} -> {:?}", id, candidates.len());
        let mut alternatives = Vec::new();
        for candidate in candidates {
            match infer_app(env, &candidate, args, expected_ret, span) {
                Ok(exp) => return Ok(exp),
                Err(err) => alternatives.push((candidate, err)),
            }
        }
        return Err(TypeError::NoOverloading {
            span,
            id: id.clone(),
            alternatives,
        });
    }

    // A mapping expression is tried forwards, then backwards.
    if env.get_mapping(id).is_some() {
        let forwards = Id::synthetic(format!("{}_forwards", id.name()));
        let backwards = Id::synthetic(format!("{}_backwards", id.name()));
        return match infer_app(env, &forwards, args, expected_ret, span) {
            Ok(exp) => Ok(exp),
            Err(forwards_err) => match infer_app(env, &backwards, args, expected_ret, span) {
                Ok(exp) => Ok(exp),
                Err(backwards_err) => Err(TypeError::NoOverloading {
                    span,
                    id: id.clone(),
                    alternatives: vec![(forwards, forwards_err), (backwards, backwards_err)],
                }),
            },
        };
    }

    // A union constructor applied to several arguments takes a single tuple.
    if env.is_union_ctor(id) && args.len() > 1 {
        let tuple_span = args
            .iter()
            .fold(Span::Empty, |acc, arg| acc.merge(&arg.span));
        let tuple = Exp::new(ExpKind::Tuple(args.to_vec()), tuple_span);
        return infer_funapp(env, id, &[tuple], expected_ret, span);
    }

    infer_funapp(env, id, args, expected_ret, span)
}

/// Function-application inference: instantiate the callee's quantifier
/// against the arguments and the expected return type.
pub fn infer_funapp(
    env: &Env,
    id: &Id,
    args: &[Exp],
    expected_ret: Option<&Typ>,
    span: Span,
) -> Result<Exp, TypeError> {
    let bind = env.get_val_spec(id)?;
    let Bind { quant, typ } = bind;
    let (arg_typs, ret_typ, fn_effect) = match typ {
        Typ::Fn(args, ret, effect) => (args, *ret, effect),
        typ => {
            return Err(TypeError::other(
                span,
                format!("`{}` is not a function: `{}`", id, typ),
            ))
        }
    };
    if arg_typs.len() != args.len() {
        return Err(TypeError::other(
            span,
            format!(
                "`{}` expects {} arguments, given {}",
                id,
                arg_typs.len(),
                args.len()
            ),
        ));
    }
    trace!("infer_funapp: {} with {} argument(s)", id, args.len());

    let mut env = env.clone();
    let constraints_before = env.constraints_len();
    let mut unifier = Unifier::new();
    let mut quants: Vec<KindedId> = quant.kids.clone();
    let mut constraints: Vec<NConstraint> = quant.constraints.clone();

    // Seed unifiers from simple quantifier equations `kid = e`.
    constraints.retain(|nc| {
        if let NConstraint::Equal(lhs, rhs) = nc {
            let binding = match (lhs, rhs) {
                (Nexp::Var(kid), e) if quants.iter().any(|kinded| &kinded.kid == kid) => {
                    Some((kid.clone(), e.clone()))
                }
                (e, Nexp::Var(kid)) if quants.iter().any(|kinded| &kinded.kid == kid) => {
                    Some((kid.clone(), e.clone()))
                }
                _ => None,
            };
            if let Some((kid, e)) = binding {
                if !crate::ast::subst::kids_of_nexp(&e).contains(&kid)
                    && !unifier.contains_key(&kid)
                {
                    unifier.insert(kid, Uvar::Nexp(e));
                    return false;
                }
            }
        }
        true
    });

    // Instantiate from the return-type expectation.
    if let Some(expected) = expected_ret {
        if !expected.is_exist() {
            let pattern = unify::apply_unifier_typ(&ret_typ, &unifier);
            if let Ok(unification) = unify::unify(&env, &pattern, expected, span) {
                // Context instantiation opens nothing; existential expected
                // types are skipped above.
                let _ = unify::merge_unifiers(&mut unifier, unification.unifier, span);
            }
        }
    }
    quants.retain(|kinded| !unifier.contains_key(&kinded.kid));

    // Per-argument pass: check arguments whose targets are fully resolved,
    // defer the rest to inference plus coercing unification.
    let mut checked: Vec<Option<Exp>> = vec![None; args.len()];
    let mut effect = fn_effect.clone();
    loop {
        let mut progress = false;
        for (index, arg) in args.iter().enumerate() {
            if checked[index].is_some() {
                continue;
            }
            let target = unify::apply_unifier_typ(&arg_typs[index], &unifier);
            let unresolved = kids_of_typ(&target)
                .into_iter()
                .any(|kid| quants.iter().any(|kinded| kinded.kid == kid));
            if !unresolved {
                let arg = check_exp(&env, arg, &target)?;
                effect.union_with(&arg.effect());
                checked[index] = Some(arg);
                progress = true;
            }
        }
        if checked.iter().all(Option::is_some) {
            break;
        }
        if progress {
            continue;
        }

        // Deferred argument: infer it and unify its type with the target,
        // trying casts when straightforward unification fails.
        let index = checked
            .iter()
            .position(Option::is_none)
            .expect("an unresolved argument remains");
        let target = unify::apply_unifier_typ(&arg_typs[index], &unifier);
        let tag = format!("arg{}", index);
        let (arg, unification) =
            coercing_unify(&env, &args[index], &target, &tag, span)?;
        effect.union_with(&arg.effect());
        env.add_typ_vars(&unification.opened);
        if let Some(nc) = &unification.constraint {
            env.add_constraint(nc.clone());
        }
        unify::merge_unifiers(&mut unifier, unification.unifier, span)?;
        quants.retain(|kinded| !unifier.contains_key(&kinded.kid));
        checked[index] = Some(arg);
    }

    // Every residual quantifier must have been unified away...
    quants.retain(|kinded| !unifier.contains_key(&kinded.kid));
    if !quants.is_empty() {
        return Err(TypeError::UnresolvedQuants {
            span,
            id: id.clone(),
            quants,
            locals: env.local_bindings(),
            constraints: env.get_constraints(),
        });
    }

    // ...and every residual quantifier constraint proved.
    for nc in &constraints {
        let nc = unify::apply_unifier_constraint(nc, &unifier);
        if !solver::prove(&env, &nc) {
            return Err(TypeError::CouldNotProve {
                span,
                constraint: nc,
                constraints: env.get_constraints(),
            });
        }
    }

    // Fresh variables that survive into the return type are packed into an
    // existential together with the constraints this call introduced.
    let ret = unify::apply_unifier_typ(&ret_typ, &unifier);
    let ret = simp_typ(&ret);
    let surviving: Vec<KindedId> = kids_of_typ(&ret)
        .into_iter()
        .filter(|kid| kid.is_fresh())
        .map(|kid| KindedId::new(kid.clone(), env.get_typ_var(&kid).unwrap_or(Kind::Int)))
        .collect();
    let ret = if surviving.is_empty() {
        ret
    } else {
        let new_ncs = env.constraints_since(constraints_before);
        let nc = NConstraint::conj(new_ncs.into_iter().filter(|nc| {
            crate::ast::subst::kids_of_constraint(nc)
                .iter()
                .any(|kid| surviving.iter().any(|kinded| &kinded.kid == kid))
        }));
        Typ::exist(surviving, nc, ret)
    };

    let checked: Vec<Exp> = checked.into_iter().map(Option::unwrap).collect();
    let mut annot = Annot::new(env, ret, effect);
    annot.expected = expected_ret.cloned();
    Ok(Exp::new(ExpKind::App(id.clone(), checked), span).with_annot(annot))
}

/// Infer an argument and unify its type with the target; when that fails and
/// casts are allowed, each registered cast whose signature structurally
/// matches is attempted, and the first that unifies is woven into the call.
fn coercing_unify(
    env: &Env,
    arg: &Exp,
    target: &Typ,
    tag: &str,
    span: Span,
) -> Result<(Exp, unify::Unification), TypeError> {
    let inferred = infer_exp(env, arg)?;
    let inferred_typ = annot_typ(&inferred)?;
    let direct = match unify::unify_tagged(env, target, &inferred_typ, Some(tag), span) {
        Ok(unification) => return Ok((inferred, unification)),
        Err(err) => err,
    };

    if env.allow_casts() {
        let mut cast_env = env.clone();
        cast_env.set_allow_casts(false);
        for cast in env.get_casts() {
            let bind = match env.get_val_spec(&cast) {
                Ok(bind) => bind,
                Err(_) => continue,
            };
            let (from, to) = match &bind.typ {
                Typ::Fn(args, ret, _) if args.len() == 1 => (&args[0], ret.as_ref()),
                _ => continue,
            };
            if !match_typ(env, from, &inferred_typ) || !match_typ(env, to, target) {
                continue;
            }
            let cast_app = Exp::new(
                ExpKind::App(cast.clone(), vec![arg.strip_annots()]),
                arg.span,
            );
            let coerced = match infer_exp(&cast_env, &cast_app) {
                Ok(coerced) => coerced,
                Err(_) => continue,
            };
            let coerced_typ = match annot_typ(&coerced) {
                Ok(typ) => typ,
                Err(_) => continue,
            };
            if let Ok(unification) =
                unify::unify_tagged(env, target, &coerced_typ, Some(tag), span)
            {
                return Ok((coerced, unification));
            }
        }
    }
    Err(direct)
}

// ---------------------------------------------------------------------------
// Pattern binding
// ---------------------------------------------------------------------------

/// Bind a pattern against the type of the value it matches, producing the
/// annotated pattern and the environment its right-hand side is checked in.
pub fn bind_pat(env: &Env, pat: &Pat, typ: &Typ) -> Result<(Pat, Env), TypeError> {
    trace!("bind_pat: {:?} <= {}", pat.kind, typ);
    let span = pat.span;
    let annot = |env: &Env| Annot::new(env.clone(), typ.clone(), EffectSet::pure());

    match &pat.kind {
        PatKind::Wild => {
            let pat = Pat::new(PatKind::Wild, span).with_annot(annot(env));
            Ok((pat, env.clone()))
        }
        PatKind::Id(id) => {
            if let Some(enum_id) = env.enum_for_member(id) {
                subtype::subtyp(env, &Typ::Id(enum_id.clone()), typ, span)?;
                let pat = Pat::new(PatKind::Id(id.clone()), span).with_annot(annot(env));
                return Ok((pat, env.clone()));
            }
            let mut env = env.clone();
            env.add_local(id.clone(), Mut::Immutable, typ.clone());
            let pat = Pat::new(PatKind::Id(id.clone()), span).with_annot(annot(&env));
            Ok((pat, env))
        }
        PatKind::Lit(lit) => {
            let lit_typ = infer_lit(lit, span)?;
            subtype::subtyp(env, &lit_typ, typ, span)?;
            let pat = Pat::new(PatKind::Lit(lit.clone()), span).with_annot(annot(env));
            Ok((pat, env.clone()))
        }
        PatKind::Typ(ascription, inner) => {
            // The ascription may mention type variables determined by the
            // scrutinee's type; unify to discover them and bind them in the
            // pattern environment. Numeric variables stay named, recorded by
            // an equation; type and order variables are substituted out.
            let mut env = env.clone();
            let unification = unify::unify(&env, ascription, typ, span)?;
            env.add_typ_vars(&unification.opened);
            if let Some(nc) = &unification.constraint {
                env.add_constraint(nc.clone());
            }
            let mut target = ascription.clone();
            for (kid, uvar) in &unification.unifier {
                match uvar {
                    Uvar::Nexp(nexp) => {
                        env.add_typ_var(kid.clone(), Kind::Int);
                        env.add_constraint(NConstraint::eq(Nexp::Var(kid.clone()), nexp.clone()));
                    }
                    Uvar::Typ(with) => {
                        target = crate::ast::subst::subst_typ(&target, kid, with)
                    }
                    Uvar::Order(with) => {
                        target = crate::ast::subst::subst_order(&target, kid, with)
                    }
                }
            }
            env.wf_typ(&target)?;
            let (inner, env) = bind_pat(&env, inner, &target)?;
            let pat = Pat::new(PatKind::Typ(ascription.clone(), Box::new(inner)), span)
                .with_annot(annot(&env));
            Ok((pat, env))
        }
        PatKind::As(inner, id) => {
            let (inner, mut env) = bind_pat(env, inner, typ)?;
            env.add_local(id.clone(), Mut::Immutable, typ.clone());
            let pat = Pat::new(PatKind::As(Box::new(inner), id.clone()), span)
                .with_annot(annot(&env));
            Ok((pat, env))
        }
        PatKind::Tuple(pats) => {
            let mut env = env.clone();
            let typ = open_existential(&mut env, typ);
            let typs = match env.expand_synonyms(&typ)? {
                Typ::Tuple(typs) if typs.len() == pats.len() => typs,
                typ => {
                    return Err(TypeError::Mismatch {
                        span,
                        expected: Typ::Tuple(vec![Typ::Unknown; pats.len()]),
                        found: typ,
                    })
                }
            };
            let mut bound = Vec::with_capacity(pats.len());
            for (pat, typ) in pats.iter().zip(typs.iter()) {
                let (pat, next_env) = bind_pat(&env, pat, typ)?;
                env = next_env;
                bound.push(pat);
            }
            let pat = Pat::new(PatKind::Tuple(bound), span).with_annot(annot(&env));
            Ok((pat, env))
        }
        PatKind::App(head, pats) => {
            if env.get_mapping(head).is_some() {
                bind_mapping_pat(env, head, pats, typ, span)
            } else {
                bind_ctor_pat(env, head, pats, typ, span)
            }
        }
        PatKind::Vector(pats) => {
            let (len, elem) = match env.expand_synonyms(typ)? {
                Typ::App(id, args) if id.name() == "bits" => match args.as_slice() {
                    [TypArg::Nexp(len)] => (len.clone(), Typ::bit()),
                    _ => return Err(TypeError::other(span, "malformed bits type")),
                },
                Typ::App(id, args) if id.name() == "vector" => match args.as_slice() {
                    [TypArg::Nexp(len), TypArg::Order(_), TypArg::Typ(elem)] => {
                        (len.clone(), elem.clone())
                    }
                    _ => return Err(TypeError::other(span, "malformed vector type")),
                },
                typ => {
                    return Err(TypeError::other(
                        span,
                        format!("cannot match a vector pattern against `{}`", typ),
                    ))
                }
            };
            let expected_len = NConstraint::eq(len, Nexp::constant(pats.len() as i64));
            if !solver::prove(env, &expected_len) {
                return Err(TypeError::CouldNotProve {
                    span,
                    constraint: expected_len,
                    constraints: env.get_constraints(),
                });
            }
            let mut env = env.clone();
            let mut bound = Vec::with_capacity(pats.len());
            for pat in pats {
                let (pat, next_env) = bind_pat(&env, pat, &elem)?;
                env = next_env;
                bound.push(pat);
            }
            let pat = Pat::new(PatKind::Vector(bound), span).with_annot(annot(&env));
            Ok((pat, env))
        }
    }
}

/// Open an existential scrutinee type: its binders become rigid variables of
/// the pattern environment and its constraint comes into scope.
fn open_existential(env: &mut Env, typ: &Typ) -> Typ {
    match typ {
        Typ::Exist(kids, nc, body) => {
            let mut nc = nc.clone();
            let mut body = body.as_ref().clone();
            for kinded in kids {
                if env.get_typ_var(&kinded.kid).is_some() {
                    let fresh = env.fresh_existential(None);
                    nc = crate::ast::subst::rename_kid_constraint(&nc, &kinded.kid, &fresh);
                    body = crate::ast::subst::rename_kid_typ(&body, &kinded.kid, &fresh);
                    env.add_typ_var(fresh, kinded.kind);
                } else {
                    env.add_typ_var(kinded.kid.clone(), kinded.kind);
                }
            }
            env.add_constraint(nc);
            body
        }
        typ => typ.clone(),
    }
}

fn bind_ctor_pat(
    env: &Env,
    ctor: &Id,
    pats: &[Pat],
    typ: &Typ,
    span: Span,
) -> Result<(Pat, Env), TypeError> {
    if !env.is_union_ctor(ctor) {
        return Err(TypeError::UnboundId {
            span,
            id: ctor.clone(),
        });
    }
    let bind = env.get_val_spec(ctor)?;
    let (arg_typ, union_typ) = match &bind.typ {
        Typ::Fn(args, ret, _) if args.len() == 1 => (args[0].clone(), ret.as_ref().clone()),
        _ => return Err(TypeError::other(span, "malformed union constructor")),
    };

    let mut env = env.clone();
    let scrutinee = open_existential(&mut env, typ);
    let unification = unify::unify(&env, &union_typ, &scrutinee, span)?;
    env.add_typ_vars(&unification.opened);
    if let Some(nc) = &unification.constraint {
        env.add_constraint(nc.clone());
    }

    // Quantified variables the scrutinee does not determine stay abstract in
    // the pattern environment, constrained by the quantifier.
    for kinded in &bind.quant.kids {
        if !unification.unifier.contains_key(&kinded.kid) {
            env.add_typ_var(kinded.kid.clone(), kinded.kind);
        }
    }
    for nc in &bind.quant.constraints {
        env.add_constraint(unify::apply_unifier_constraint(nc, &unification.unifier));
    }
    let target = unify::apply_unifier_typ(&arg_typ, &unification.unifier);

    let inner = match pats {
        [single] => single.clone(),
        pats => {
            let tuple_span = pats
                .iter()
                .fold(Span::Empty, |acc, pat| acc.merge(&pat.span));
            Pat::new(PatKind::Tuple(pats.to_vec()), tuple_span)
        }
    };
    let (inner, env) = bind_pat(&env, &inner, &target)?;
    let pat = Pat::new(PatKind::App(ctor.clone(), vec![inner]), span)
        .with_annot(Annot::new(env.clone(), typ.clone(), EffectSet::pure()));
    Ok((pat, env))
}

/// A mapping pattern `m(p)` matches a scrutinee of either side's type, with
/// the inner pattern binding at the other side.
fn bind_mapping_pat(
    env: &Env,
    mapping: &Id,
    pats: &[Pat],
    typ: &Typ,
    span: Span,
) -> Result<(Pat, Env), TypeError> {
    let (quant, lhs, rhs) = env
        .get_mapping(mapping)
        .cloned()
        .expect("caller checked the mapping exists");
    let inner = match pats {
        [single] => single.clone(),
        pats => {
            let tuple_span = pats
                .iter()
                .fold(Span::Empty, |acc, pat| acc.merge(&pat.span));
            Pat::new(PatKind::Tuple(pats.to_vec()), tuple_span)
        }
    };

    let mut first_err = None;
    for (scrutinee_side, other_side) in [(&lhs, &rhs), (&rhs, &lhs)] {
        let mut env = env.clone();
        let scrutinee = open_existential(&mut env, typ);
        match unify::unify(&env, scrutinee_side, &scrutinee, span) {
            Ok(unification) => {
                env.add_typ_vars(&unification.opened);
                if let Some(nc) = &unification.constraint {
                    env.add_constraint(nc.clone());
                }
                for kinded in &quant.kids {
                    if !unification.unifier.contains_key(&kinded.kid) {
                        env.add_typ_var(kinded.kid.clone(), kinded.kind);
                    }
                }
                for nc in &quant.constraints {
                    env.add_constraint(unify::apply_unifier_constraint(
                        nc,
                        &unification.unifier,
                    ));
                }
                let target = unify::apply_unifier_typ(other_side, &unification.unifier);
                match bind_pat(&env, &inner, &target) {
                    Ok((inner, env)) => {
                        let pat = Pat::new(PatKind::App(mapping.clone(), vec![inner]), span)
                            .with_annot(Annot::new(
                                env.clone(),
                                typ.clone(),
                                EffectSet::pure(),
                            ));
                        return Ok((pat, env));
                    }
                    Err(err) => {
                        if first_err.is_none() {
                            first_err = Some(err);
                        }
                    }
                }
            }
            Err(err) => {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
    }
    Err(first_err.unwrap_or_else(|| {
        TypeError::other(span, format!("mapping pattern `{}` matches neither side", mapping))
    }))
}

/// Pattern-completeness analysis is an external collaborator; record that it
/// would be consulted here.
fn consult_completeness(arms: &[PatExp], span: Span) {
    debug!(
        "pattern completeness delegated for {} clause(s) at {:?}",
        arms.len(),
        span
    );
}

// ---------------------------------------------------------------------------
// L-expression binding
// ---------------------------------------------------------------------------

/// Bind an l-expression against the type of the assigned value, producing
/// the annotated l-expression and the environment for the code that follows.
pub fn bind_lexp(env: &Env, lexp: &LExp, typ: &Typ) -> Result<(LExp, Env), TypeError> {
    trace!("bind_lexp: {:?} <= {}", lexp.kind, typ);
    let span = lexp.span;

    match &lexp.kind {
        LExpKind::Id(id) => {
            if let Some(entry) = env.get_register(id) {
                subtype::subtyp(env, typ, &entry.typ, span)?;
                let annot = Annot::new(env.clone(), entry.typ.clone(), entry.write_effect.clone());
                return Ok((
                    LExp::new(LExpKind::Id(id.clone()), span).with_annot(annot),
                    env.clone(),
                ));
            }
            match env.get_local(id) {
                Some((Mut::Mutable, local_typ)) => {
                    subtype::subtyp(env, typ, &local_typ, span)?;
                    let annot = Annot::new(env.clone(), local_typ, EffectSet::pure());
                    Ok((
                        LExp::new(LExpKind::Id(id.clone()), span).with_annot(annot),
                        env.clone(),
                    ))
                }
                Some((Mut::Immutable, _)) => Err(TypeError::other(
                    span,
                    format!("cannot assign to immutable binding `{}`", id),
                )),
                None if env.allow_bindings() => {
                    let mut env = env.clone();
                    env.add_local(id.clone(), Mut::Mutable, typ.clone());
                    let annot = Annot::new(env.clone(), typ.clone(), EffectSet::pure());
                    Ok((
                        LExp::new(LExpKind::Id(id.clone()), span).with_annot(annot),
                        env,
                    ))
                }
                None => Err(TypeError::UnboundId {
                    span,
                    id: id.clone(),
                }),
            }
        }
        LExpKind::Typ(declared, id) => {
            env.wf_typ(declared)?;
            subtype::subtyp(env, typ, declared, span)?;
            let mut env = env.clone();
            env.add_local(id.clone(), Mut::Mutable, declared.clone());
            let annot = Annot::new(env.clone(), declared.clone(), EffectSet::pure());
            Ok((
                LExp::new(LExpKind::Typ(declared.clone(), id.clone()), span).with_annot(annot),
                env,
            ))
        }
        LExpKind::Tuple(lexps) => {
            let typs = match env.expand_synonyms(typ)? {
                Typ::Tuple(typs) if typs.len() == lexps.len() => typs,
                typ => {
                    return Err(TypeError::Mismatch {
                        span,
                        expected: Typ::Tuple(vec![Typ::Unknown; lexps.len()]),
                        found: typ,
                    })
                }
            };
            let mut env = env.clone();
            let mut effect = EffectSet::pure();
            let mut bound = Vec::with_capacity(lexps.len());
            for (lexp, typ) in lexps.iter().zip(typs.iter()) {
                let (lexp, next_env) = bind_lexp(&env, lexp, typ)?;
                env = next_env;
                effect.union_with(&lexp_effect(&lexp));
                bound.push(lexp);
            }
            let annot = Annot::new(env.clone(), typ.clone(), effect);
            Ok((
                LExp::new(LExpKind::Tuple(bound), span).with_annot(annot),
                env,
            ))
        }
        LExpKind::VectorIndex(inner, index) => {
            let (inner, env_after, len, elem, inner_effect) = bind_vector_lexp(env, inner)?;
            let index = check_exp(env, index, &Typ::int())?;
            vector_bounds_obligation(env, &index, &len, span)?;
            subtype::subtyp(env, typ, &elem, span)?;
            let effect = inner_effect.union(&index.effect());
            let annot = Annot::new(env_after.clone(), elem, effect);
            Ok((
                LExp::new(LExpKind::VectorIndex(Box::new(inner), Box::new(index)), span).with_annot(annot),
                env_after,
            ))
        }
        LExpKind::VectorRange(inner, lo, hi) => {
            let (inner, env_after, len, elem, inner_effect) = bind_vector_lexp(env, inner)?;
            if elem != Typ::bit() {
                return Err(TypeError::other(
                    span,
                    "vector range assignment requires a bit vector",
                ));
            }
            let lo = check_exp(env, lo, &Typ::int())?;
            let hi = check_exp(env, hi, &Typ::int())?;
            vector_bounds_obligation(env, &lo, &len, span)?;
            vector_bounds_obligation(env, &hi, &len, span)?;
            let width = match (numeric_annot(env, &lo), numeric_annot(env, &hi)) {
                (Some(lo), Some(hi)) => nexp_simp(&Nexp::sum(
                    Nexp::minus(hi, lo),
                    Nexp::constant(1),
                )),
                _ => {
                    return Err(TypeError::other(
                        span,
                        "vector range bounds must have numeric types",
                    ))
                }
            };
            subtype::subtyp(env, typ, &Typ::bits(width.clone()), span)?;
            let effect = inner_effect.union(&lo.effect()).union(&hi.effect());
            let annot = Annot::new(env_after.clone(), Typ::bits(width), effect);
            Ok((
                LExp::new(LExpKind::VectorRange(Box::new(inner), lo, hi), span)
                    .with_annot(annot),
                env_after,
            ))
        }
        LExpKind::Field(inner, field) => {
            // The record itself is only read to locate the field; the write
            // effect comes from the underlying l-value.
            let (inner, env_after) = bind_lexp_no_write(env, inner)?;
            let record_typ = annot_typ_lexp(&inner)?;
            let (field_typ, _) =
                infer_field_access(env, &record_typ, field, EffectSet::pure(), span)?;
            subtype::subtyp(env, typ, &field_typ, span)?;
            let effect = lexp_effect(&inner);
            let annot = Annot::new(env_after.clone(), field_typ, effect);
            Ok((
                LExp::new(LExpKind::Field(Box::new(inner), field.clone()), span)
                    .with_annot(annot),
                env_after,
            ))
        }
        LExpKind::Deref(exp) => {
            let exp = infer_exp(env, exp)?;
            let deref_typ = match env.expand_synonyms(&annot_typ(&exp)?)? {
                Typ::App(id, args) if id.name() == "register" => match args.as_slice() {
                    [TypArg::Typ(inner)] => inner.clone(),
                    _ => return Err(TypeError::other(span, "malformed register type")),
                },
                typ => {
                    return Err(TypeError::other(
                        span,
                        format!("cannot assign through `{}`; not a register reference", typ),
                    ))
                }
            };
            subtype::subtyp(env, typ, &deref_typ, span)?;
            let effect = exp.effect().union(&EffectSet::single(Effect::WriteReg));
            let annot = Annot::new(env.clone(), deref_typ, effect);
            Ok((
                LExp::new(LExpKind::Deref(exp), span).with_annot(annot),
                env.clone(),
            ))
        }
        LExpKind::Memory(id, args) => {
            let bind = env.get_val_spec(id)?;
            let (param_typs, fn_effect) = match &bind.typ {
                Typ::Fn(params, _, effect) => (params.clone(), effect.clone()),
                _ => {
                    return Err(TypeError::other(
                        span,
                        format!("`{}` is not a function", id),
                    ))
                }
            };
            if param_typs.len() != args.len() + 1 {
                return Err(TypeError::other(
                    span,
                    format!(
                        "memory write `{}` expects {} arguments, given {}",
                        id,
                        param_typs.len(),
                        args.len() + 1
                    ),
                ));
            }
            let mut effect = fn_effect;
            let mut checked = Vec::with_capacity(args.len());
            for (arg, target) in args.iter().zip(param_typs.iter()) {
                let arg = check_exp(env, arg, target)?;
                effect.union_with(&arg.effect());
                checked.push(arg);
            }
            subtype::subtyp(env, typ, param_typs.last().expect("arity checked"), span)?;
            let annot = Annot::new(env.clone(), typ.clone(), effect);
            Ok((
                LExp::new(LExpKind::Memory(id.clone(), checked), span).with_annot(annot),
                env.clone(),
            ))
        }
    }
}

/// Resolve the vector-shaped l-value underlying an index or range
/// assignment.
fn bind_vector_lexp(
    env: &Env,
    lexp: &LExp,
) -> Result<(LExp, Env, Nexp, Typ, EffectSet), TypeError> {
    let (inner, env_after) = bind_lexp_no_write(env, lexp)?;
    let vec_typ = annot_typ_lexp(&inner)?;
    let (len, elem) = match env.expand_synonyms(&vec_typ)? {
        Typ::App(id, args) if id.name() == "bits" => match args.as_slice() {
            [TypArg::Nexp(len)] => (len.clone(), Typ::bit()),
            _ => return Err(TypeError::other(lexp.span, "malformed bits type")),
        },
        Typ::App(id, args) if id.name() == "vector" => match args.as_slice() {
            [TypArg::Nexp(len), TypArg::Order(_), TypArg::Typ(elem)] => {
                (len.clone(), elem.clone())
            }
            _ => return Err(TypeError::other(lexp.span, "malformed vector type")),
        },
        typ => {
            return Err(TypeError::other(
                lexp.span,
                format!("cannot index into `{}`", typ),
            ))
        }
    };
    let effect = lexp_effect(&inner);
    Ok((inner, env_after, len, elem, effect))
}

/// Bind the l-value under a projection, at its own type.
fn bind_lexp_no_write(env: &Env, lexp: &LExp) -> Result<(LExp, Env), TypeError> {
    match &lexp.kind {
        LExpKind::Id(id) => {
            if let Some(entry) = env.get_register(id) {
                let annot =
                    Annot::new(env.clone(), entry.typ.clone(), entry.write_effect.clone());
                return Ok((
                    LExp::new(LExpKind::Id(id.clone()), lexp.span).with_annot(annot),
                    env.clone(),
                ));
            }
            match env.get_local(id) {
                Some((Mut::Mutable, typ)) => {
                    let annot = Annot::new(env.clone(), typ, EffectSet::pure());
                    Ok((
                        LExp::new(LExpKind::Id(id.clone()), lexp.span).with_annot(annot),
                        env.clone(),
                    ))
                }
                Some((Mut::Immutable, _)) => Err(TypeError::other(
                    lexp.span,
                    format!("cannot assign to immutable binding `{}`", id),
                )),
                None => Err(TypeError::UnboundId {
                    span: lexp.span,
                    id: id.clone(),
                }),
            }
        }
        LExpKind::Field(inner, field) => {
            let (inner, env_after) = bind_lexp_no_write(env, inner)?;
            let record_typ = annot_typ_lexp(&inner)?;
            let (field_typ, _) =
                infer_field_access(env, &record_typ, field, EffectSet::pure(), lexp.span)?;
            let effect = lexp_effect(&inner);
            let annot = Annot::new(env_after.clone(), field_typ, effect);
            Ok((
                LExp::new(LExpKind::Field(Box::new(inner), field.clone()), lexp.span)
                    .with_annot(annot),
                env_after,
            ))
        }
        _ => Err(TypeError::other(
            lexp.span,
            "only identifiers and fields can be indexed in assignments",
        )),
    }
}

/// The bounds obligation for a vector index: `0 <= i` and `i < len`,
/// dispatched to the oracle unless disabled.
fn vector_bounds_obligation(
    env: &Env,
    index: &Exp,
    len: &Nexp,
    span: Span,
) -> Result<(), TypeError> {
    if env.options().no_lexp_bounds_check {
        return Ok(());
    }
    let typ = annot_typ(index)?;
    let (kids, nc, index_nexp) = match destructure_numeric(env, &typ) {
        Some(parts) => parts,
        None => {
            return Err(TypeError::other(
                span,
                "vector index must have a numeric type",
            ))
        }
    };
    let mut env = env.clone();
    env.add_typ_vars(&kids);
    env.add_constraint(nc);
    let obligation = NConstraint::and(
        NConstraint::lteq(Nexp::constant(0), index_nexp.clone()),
        NConstraint::lteq(
            index_nexp,
            nexp_simp(&Nexp::minus(len.clone(), Nexp::constant(1))),
        ),
    );
    if solver::prove(&env, &obligation) {
        Ok(())
    } else {
        Err(TypeError::CouldNotProve {
            span,
            constraint: obligation,
            constraints: env.get_constraints(),
        })
    }
}

/// The numeric expression of an expression's inferred type, when it is an
/// atom.
fn numeric_annot(env: &Env, exp: &Exp) -> Option<Nexp> {
    let typ = exp.typ()?;
    match destructure_numeric(env, typ) {
        Some((kids, _, nexp)) if kids.is_empty() => Some(nexp),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Flow typing
// ---------------------------------------------------------------------------

/// The environments a conditional's branches are checked in: operand types
/// narrow, and the condition's witness holds positively in the `then`
/// branch and negated in the `else` branch.
fn branch_envs(env: &Env, cond: &Exp) -> (Env, Env) {
    let mut then_env = env.clone();
    let mut else_env = env.clone();
    narrow_operands(&mut then_env, cond);
    narrow_operands(&mut else_env, cond);
    if let Some(nc) = assert_constraint(&then_env, cond) {
        then_env.add_constraint(nc);
    }
    if let Some(nc) = assert_constraint(&else_env, cond) {
        if let Some(negated) = crate::ast::subst::nc_negate(&nc) {
            else_env.add_constraint(negated);
        }
    }
    (then_env, else_env)
}

/// Narrow the visible types of comparison operands that are immutable
/// locals of a loose numeric type (`int`, `nat`, `range`): the local's view
/// becomes an atom over the opened variables, which branch witnesses can
/// then mention. The underlying binding is unchanged.
pub fn narrow_operands(env: &mut Env, cond: &Exp) {
    if let ExpKind::App(id, args) = &cond.kind {
        if matches!(id.name(), "and_bool" | "or_bool") {
            args.iter().for_each(|arg| narrow_operands(env, arg));
            return;
        }
        if comparison_op(id.name()).is_none() {
            return;
        }
        for arg in args {
            let local = match &arg.kind {
                ExpKind::Id(id) => id.clone(),
                _ => continue,
            };
            let typ = match env.get_local(&local) {
                Some((Mut::Immutable, typ)) => typ,
                _ => continue,
            };
            match destructure_numeric(env, &typ) {
                Some((kids, nc, nexp)) if !kids.is_empty() => {
                    env.add_typ_vars(&kids);
                    env.add_constraint(nc);
                    env.add_flow(local, Typ::atom(nexp));
                }
                _ => {}
            }
        }
    }
}

/// Extract a numeric constraint witnessed by a checked boolean condition:
/// constant `true`/`false`, comparisons of atoms, and conjunctions or
/// disjunctions of those.
pub fn assert_constraint(env: &Env, cond: &Exp) -> Option<NConstraint> {
    match &cond.kind {
        ExpKind::Lit(Lit::True) => Some(NConstraint::True),
        ExpKind::Lit(Lit::False) => Some(NConstraint::False),
        ExpKind::App(id, args) => match (id.name(), args.as_slice()) {
            ("and_bool", [lhs, rhs]) => Some(NConstraint::and(
                assert_constraint(env, lhs)?,
                assert_constraint(env, rhs)?,
            )),
            ("or_bool", [lhs, rhs]) => Some(NConstraint::or(
                assert_constraint(env, lhs)?,
                assert_constraint(env, rhs)?,
            )),
            (name, [lhs, rhs]) => {
                let lhs = numeric_operand(env, lhs)?;
                let rhs = numeric_operand(env, rhs)?;
                match comparison_op(name)? {
                    Comparison::Eq => Some(NConstraint::eq(lhs, rhs)),
                    Comparison::Neq => Some(NConstraint::neq(lhs, rhs)),
                    Comparison::Lteq => Some(NConstraint::lteq(lhs, rhs)),
                    Comparison::Gteq => Some(NConstraint::gteq(lhs, rhs)),
                    Comparison::Lt => Some(NConstraint::lteq(
                        lhs,
                        nexp_simp(&Nexp::minus(rhs, Nexp::constant(1))),
                    )),
                    Comparison::Gt => Some(NConstraint::gteq(
                        lhs,
                        nexp_simp(&Nexp::sum(rhs, Nexp::constant(1))),
                    )),
                }
            }
            _ => None,
        },
        _ => None,
    }
}

/// The numeric expression a comparison operand denotes: for a local this is
/// read through any flow narrowing, for anything else from its annotation.
fn numeric_operand(env: &Env, exp: &Exp) -> Option<Nexp> {
    if let ExpKind::Id(id) = &exp.kind {
        if let Some((_, typ)) = env.get_local(id) {
            return match destructure_numeric(env, &typ) {
                Some((kids, _, nexp)) if kids.is_empty() => Some(nexp),
                _ => None,
            };
        }
    }
    numeric_annot(env, exp)
}

enum Comparison {
    Eq,
    Neq,
    Lteq,
    Gteq,
    Lt,
    Gt,
}

fn comparison_op(name: &str) -> Option<Comparison> {
    match name {
        "eq_int" | "eq_atom" | "operator ==" => Some(Comparison::Eq),
        "neq_int" | "neq_atom" | "operator !=" => Some(Comparison::Neq),
        "lteq" | "lteq_int" | "operator <=" => Some(Comparison::Lteq),
        "gteq" | "gteq_int" | "operator >=" => Some(Comparison::Gteq),
        "lt" | "lt_int" | "operator <" => Some(Comparison::Lt),
        "gt" | "gt_int" | "operator >" => Some(Comparison::Gt),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn annot_typ(exp: &Exp) -> Result<Typ, TypeError> {
    exp.typ().cloned().ok_or_else(|| {
        TypeError::other(exp.span, "internal: expression was not annotated")
    })
}

fn annot_typ_lexp(lexp: &LExp) -> Result<Typ, TypeError> {
    lexp.annot
        .as_ref()
        .map(|annot| annot.typ.clone())
        .ok_or_else(|| TypeError::other(lexp.span, "internal: l-expression was not annotated"))
}

fn lexp_effect(lexp: &LExp) -> EffectSet {
    lexp.annot
        .as_ref()
        .map(|annot| annot.effect.clone())
        .unwrap_or_default()
}

/// Fold constants inside a type's numeric arguments.
pub fn simp_typ(typ: &Typ) -> Typ {
    match typ {
        Typ::Id(_) | Typ::Var(_) | Typ::Unknown => typ.clone(),
        Typ::Fn(args, ret, effect) => Typ::Fn(
            args.iter().map(simp_typ).collect(),
            Box::new(simp_typ(ret)),
            effect.clone(),
        ),
        Typ::Bidir(lhs, rhs) => {
            Typ::Bidir(Box::new(simp_typ(lhs)), Box::new(simp_typ(rhs)))
        }
        Typ::Tuple(typs) => Typ::Tuple(typs.iter().map(simp_typ).collect()),
        Typ::App(id, args) => Typ::App(
            id.clone(),
            args.iter()
                .map(|arg| match arg {
                    TypArg::Nexp(nexp) => TypArg::Nexp(nexp_simp(nexp)),
                    TypArg::Typ(typ) => TypArg::Typ(simp_typ(typ)),
                    arg => arg.clone(),
                })
                .collect(),
        ),
        Typ::Exist(kids, nc, body) => {
            Typ::Exist(kids.clone(), nc.clone(), Box::new(simp_typ(body)))
        }
    }
}
