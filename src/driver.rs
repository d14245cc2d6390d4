//! The top-level definition checker.
//!
//! Processes a definition stream in source order, threading the environment
//! through: each definition is checked against the environment produced by
//! its predecessors, and a failed definition leaves the environment
//! untouched.

use log::debug;

use crate::ast::subst::alpha_equivalent;
use crate::ast::{
    Annot, Def, Effect, EffectSet, Exp, ExpKind, FunClause, FunDef, MapClause, MapDef, Pat,
    PatKind, RegisterDef, Typ, TypArg, TypQuant, TypeDef, ValSpec,
};
use crate::check::{bind_pat, check_exp, infer_exp};
use crate::env::{Bind, Env};
use crate::reporting::TypeError;
use crate::source::Span;
use crate::subtype;

/// A checked definition: the definition with its expressions annotated, plus
/// the annotation of its outermost expression, when it has one.
#[derive(Debug, Clone)]
pub struct CheckedDef {
    pub def: Def,
    pub annot: Option<Annot>,
}

impl CheckedDef {
    fn plain(def: Def) -> CheckedDef {
        CheckedDef { def, annot: None }
    }
}

/// Check a definition stream, aborting at the first failed definition.
pub fn check_defs(env: &Env, defs: &[Def]) -> Result<(Vec<CheckedDef>, Env), TypeError> {
    let mut env = env.clone();
    let mut checked = Vec::with_capacity(defs.len());
    for def in defs {
        let (def, next_env) = check_def(&env, def)?;
        env = next_env;
        checked.push(def);
    }
    Ok((checked, env))
}

/// Check a definition stream, skipping failed definitions and collecting
/// their errors.
pub fn check_defs_continuing(env: &Env, defs: &[Def]) -> (Vec<CheckedDef>, Env, Vec<TypeError>) {
    let mut env = env.clone();
    let mut checked = Vec::with_capacity(defs.len());
    let mut errors = Vec::new();
    for def in defs {
        match check_def(&env, def) {
            Ok((def, next_env)) => {
                env = next_env;
                checked.push(def);
            }
            Err(err) => errors.push(err),
        }
    }
    (checked, env, errors)
}

/// Check a single definition against the environment, producing the
/// annotated definition and the extended environment.
pub fn check_def(env: &Env, def: &Def) -> Result<(CheckedDef, Env), TypeError> {
    if env.options().tc_debug >= 1 {
        debug!("definition at {:?}", def.span());
    }
    check_def_inner(env, def).map_err(|err| err.with_span(def.span()))
}

fn check_def_inner(env: &Env, def: &Def) -> Result<(CheckedDef, Env), TypeError> {
    match def {
        Def::Type(type_def) => check_typedef(env, type_def).map(|env| {
            (CheckedDef::plain(Def::Type(type_def.clone())), env)
        }),
        Def::Spec(spec) => {
            let env = check_val_spec(env, spec)?;
            Ok((CheckedDef::plain(Def::Spec(spec.clone())), env))
        }
        Def::Fun(fundef) => check_fundef(env, fundef),
        Def::Mapping(mapdef) => check_mapdef(env, mapdef),
        Def::Let(pat, exp) => check_letdef(env, pat, exp),
        Def::NumConst(id, nexp) => {
            let mut env = env.clone();
            env.wf_nexp(nexp)?;
            env.add_num_def(id.clone(), nexp.clone());
            Ok((CheckedDef::plain(Def::NumConst(id.clone(), nexp.clone())), env))
        }
        Def::DefaultOrder(order, span) => {
            let mut env = env.clone();
            env.set_default_order(order.clone(), *span)?;
            Ok((
                CheckedDef::plain(Def::DefaultOrder(order.clone(), *span)),
                env,
            ))
        }
        Def::Overload(id, candidates) => {
            let mut env = env.clone();
            env.add_overloads(id.clone(), candidates.clone());
            Ok((
                CheckedDef::plain(Def::Overload(id.clone(), candidates.clone())),
                env,
            ))
        }
        Def::Register(register) => check_register(env, register),
    }
}

// ---------------------------------------------------------------------------
// Type definitions
// ---------------------------------------------------------------------------

fn check_typedef(env: &Env, type_def: &TypeDef) -> Result<Env, TypeError> {
    let mut env = env.clone();
    match type_def {
        TypeDef::Abbrev { id, quant, arg, span: _ } => {
            let mut scoped = env.clone();
            scoped.add_typ_vars(&quant.kids);
            match arg {
                TypArg::Typ(typ) => scoped.wf_typ(typ)?,
                TypArg::Nexp(nexp) => scoped.wf_nexp(nexp)?,
                TypArg::Order(_) => {}
            }
            env.add_typ_synonym(id.clone(), quant.clone(), arg.clone());
        }
        TypeDef::Constraint { id, params, body, span } => {
            if !env.options().constraint_synonyms {
                return Err(TypeError::other(
                    *span,
                    "constraint synonyms are not enabled",
                ));
            }
            let mut scoped = env.clone();
            scoped.add_typ_vars(params);
            scoped.wf_constraint(body)?;
            env.add_constraint_synonym(id.clone(), params.clone(), body.clone());
        }
        TypeDef::Record { id, quant, fields, span } => {
            if env.get_record(id).is_some() {
                return Err(TypeError::Redefinition {
                    span: *span,
                    id: id.clone(),
                });
            }
            let mut scoped = env.clone();
            scoped.add_typ_vars(&quant.kids);
            for nc in &quant.constraints {
                scoped.wf_constraint(nc)?;
            }
            for (typ, _) in fields {
                scoped.wf_typ(typ)?;
            }
            env.add_record(id.clone(), quant.clone(), fields.clone());
        }
        TypeDef::Variant { id, quant, ctors, span } => {
            if env.is_union_ctor(id) {
                return Err(TypeError::Redefinition {
                    span: *span,
                    id: id.clone(),
                });
            }
            let mut scoped = env.clone();
            scoped.add_typ_vars(&quant.kids);
            for nc in &quant.constraints {
                scoped.wf_constraint(nc)?;
            }
            for (typ, ctor) in ctors {
                if env.have_val_spec(ctor) {
                    return Err(TypeError::Redefinition {
                        span: *span,
                        id: ctor.clone(),
                    });
                }
                scoped.wf_typ(typ)?;
            }
            env.add_variant(id.clone(), quant.clone(), ctors.clone());
        }
        TypeDef::Enum { id, members, span } => {
            for member in members {
                if env.enum_for_member(member).is_some() {
                    return Err(TypeError::Redefinition {
                        span: *span,
                        id: member.clone(),
                    });
                }
            }
            env.add_enum(id.clone(), members.clone());
        }
    }
    Ok(env)
}

// ---------------------------------------------------------------------------
// Value specifications
// ---------------------------------------------------------------------------

fn check_val_spec(env: &Env, spec: &ValSpec) -> Result<Env, TypeError> {
    let ValSpec {
        id,
        quant,
        typ,
        is_cast,
        span,
    } = spec;
    debug!("val spec: {}", id);

    let mut scoped = env.clone();
    scoped.add_typ_vars(&quant.kids);
    for nc in &quant.constraints {
        scoped.wf_constraint(nc)?;
    }
    scoped.wf_typ(typ)?;

    let declared = if env.options().expand_valspec {
        scoped.expand_synonyms(typ)?
    } else {
        typ.clone()
    };
    let canonical = subtype::canonicalize(&scoped, &declared)?;

    // A bidirectional specification declares a mapping, which also
    // synthesises its auxiliary value specifications.
    if let Typ::Bidir(lhs, rhs) = &canonical {
        let mut env = env.clone();
        env.add_mapping(
            id.clone(),
            quant.clone(),
            lhs.as_ref().clone(),
            rhs.as_ref().clone(),
        );
        return Ok(env);
    }

    if env.have_val_spec(id) {
        let existing = env.get_val_spec(id)?;
        if alpha_equivalent(&existing.typ, &canonical) {
            return Ok(env.clone());
        }
        return Err(TypeError::Redefinition {
            span: *span,
            id: id.clone(),
        });
    }

    let mut env = env.clone();
    env.add_val_spec(
        id.clone(),
        Bind::new(quant.clone(), canonical),
        Bind::new(quant.clone(), declared),
    );
    if *is_cast {
        env.add_cast(id.clone());
    }
    Ok(env)
}

// ---------------------------------------------------------------------------
// Function definitions
// ---------------------------------------------------------------------------

fn check_fundef(env: &Env, fundef: &FunDef) -> Result<(CheckedDef, Env), TypeError> {
    let FunDef { id, clauses, span } = fundef;
    debug!("fundef: {}", id);
    if env.is_defined(id) {
        return Err(TypeError::Redefinition {
            span: *span,
            id: id.clone(),
        });
    }

    let mut env = env.clone();
    if !env.have_val_spec(id) {
        let spec = infer_fun_spec(fundef)?;
        env = check_val_spec(&env, &spec)?;
    }
    let bind = env.get_val_spec(id)?;
    let (arg_typs, ret_typ, declared_effect) = match &bind.typ {
        Typ::Fn(args, ret, effect) => (args.clone(), ret.as_ref().clone(), effect.clone()),
        typ => {
            return Err(TypeError::other(
                *span,
                format!("specification of `{}` is not a function type: `{}`", id, typ),
            ))
        }
    };
    let pat_typ = match arg_typs.as_slice() {
        [single] => single.clone(),
        args => Typ::Tuple(args.to_vec()),
    };

    let mut effect = EffectSet::pure();
    let mut checked_clauses = Vec::with_capacity(clauses.len());
    let mut first_annot = None;
    for clause in clauses {
        let mut clause_env = env.clone();
        clause_env.add_typ_vars(&bind.quant.kids);
        for nc in &bind.quant.constraints {
            clause_env.add_constraint(nc.clone());
        }
        clause_env.set_ret_typ(ret_typ.clone());
        clause_env.set_allow_bindings(true);

        let (pat, clause_env) = bind_pat(&clause_env, &clause.pat, &pat_typ)?;
        let body = check_exp(&clause_env, &clause.body, &ret_typ)?;
        effect.union_with(&body.effect());
        if first_annot.is_none() {
            first_annot = body.annot.clone();
        }
        checked_clauses.push(FunClause {
            pat,
            body,
            span: clause.span,
        });
    }

    if !env.options().no_effects && !effect.is_subset(&declared_effect) {
        return Err(TypeError::EffectMismatch {
            span: *span,
            declared: declared_effect,
            inferred: effect,
        });
    }

    env.mark_defined(id.clone());
    Ok((
        CheckedDef {
            def: Def::Fun(FunDef {
                id: id.clone(),
                clauses: checked_clauses,
                span: *span,
            }),
            annot: first_annot,
        },
        env,
    ))
}

/// Infer a value specification from a single clause whose pattern and body
/// carry type annotations.
fn infer_fun_spec(fundef: &FunDef) -> Result<ValSpec, TypeError> {
    let clause = match fundef.clauses.as_slice() {
        [clause] => clause,
        _ => {
            return Err(TypeError::other(
                fundef.span,
                format!("`{}` needs a value specification", fundef.id),
            ))
        }
    };
    let arg_typ = match &clause.pat.kind {
        PatKind::Typ(typ, _) => typ.clone(),
        _ => {
            return Err(TypeError::other(
                fundef.span,
                format!("`{}` needs a value specification or an annotated pattern", fundef.id),
            ))
        }
    };
    let ret_typ = match &clause.body.kind {
        ExpKind::Cast(typ, _) => typ.clone(),
        _ => {
            return Err(TypeError::other(
                fundef.span,
                format!("`{}` needs a value specification or an annotated body", fundef.id),
            ))
        }
    };
    Ok(ValSpec {
        id: fundef.id.clone(),
        quant: TypQuant::empty(),
        typ: Typ::function(vec![arg_typ], ret_typ, EffectSet::pure()),
        is_cast: false,
        span: fundef.span,
    })
}

// ---------------------------------------------------------------------------
// Mapping definitions
// ---------------------------------------------------------------------------

fn check_mapdef(env: &Env, mapdef: &MapDef) -> Result<(CheckedDef, Env), TypeError> {
    let MapDef { id, clauses, span } = mapdef;
    debug!("mapdef: {}", id);
    if env.is_defined(id) {
        return Err(TypeError::Redefinition {
            span: *span,
            id: id.clone(),
        });
    }
    let (quant, lhs, rhs) = env
        .get_mapping(id)
        .cloned()
        .ok_or_else(|| {
            TypeError::other(*span, format!("mapping `{}` needs a value specification", id))
        })?;

    let escape_only = EffectSet::single(Effect::Escape);
    let mut effect = EffectSet::pure();
    let mut checked_clauses = Vec::with_capacity(clauses.len());
    for clause in clauses {
        let mut clause_env = env.clone();
        clause_env.add_typ_vars(&quant.kids);
        for nc in &quant.constraints {
            clause_env.add_constraint(nc.clone());
        }
        // Unknown types may stand in for not-yet-determined sides while a
        // mapping clause is elaborated.
        clause_env.set_allow_unknowns(true);

        let checked = match clause {
            MapClause::Bidir(left, right, clause_span) => {
                // Bind each side on its own, then check each side in the
                // environment the other side produced: the two sides must
                // agree on the variables they bind and their types.
                let (_, left_env) = bind_pat(&clause_env, left, &lhs)?;
                let (_, right_env) = bind_pat(&clause_env, right, &rhs)?;
                bidir_sides_agree(&clause_env, &left_env, &right_env, *clause_span)?;
                let (left, _) = bind_pat(&right_env, left, &lhs)?;
                let (right, _) = bind_pat(&left_env, right, &rhs)?;
                MapClause::Bidir(left, right, *clause_span)
            }
            MapClause::Forwards(pat, exp, clause_span) => {
                let (pat, pat_env) = bind_pat(&clause_env, pat, &lhs)?;
                let exp = check_exp(&pat_env, exp, &rhs)?;
                effect.union_with(&exp.effect());
                MapClause::Forwards(pat, exp, *clause_span)
            }
            MapClause::Backwards(pat, exp, clause_span) => {
                let (pat, pat_env) = bind_pat(&clause_env, pat, &rhs)?;
                let exp = check_exp(&pat_env, exp, &lhs)?;
                effect.union_with(&exp.effect());
                MapClause::Backwards(pat, exp, *clause_span)
            }
        };
        checked_clauses.push(checked);
    }

    if !env.options().no_effects && !effect.is_subset(&escape_only) {
        return Err(TypeError::EffectMismatch {
            span: *span,
            declared: escape_only,
            inferred: effect,
        });
    }

    let mut env = env.clone();
    env.mark_defined(id.clone());
    Ok((
        CheckedDef::plain(Def::Mapping(MapDef {
            id: id.clone(),
            clauses: checked_clauses,
            span: *span,
        })),
        env,
    ))
}

/// The two sides of a bidirectional clause must introduce the same variables
/// at alpha-equivalent types.
fn bidir_sides_agree(
    base: &Env,
    left_env: &Env,
    right_env: &Env,
    span: Span,
) -> Result<(), TypeError> {
    use std::collections::BTreeMap;

    let bound = |env: &Env| -> BTreeMap<_, _> {
        let base: Vec<_> = base.local_bindings().into_iter().map(|(id, _)| id).collect();
        env.local_bindings()
            .into_iter()
            .filter(|(id, _)| !base.contains(id))
            .collect()
    };
    let left = bound(left_env);
    let right = bound(right_env);
    for (id, left_typ) in &left {
        match right.get(id) {
            Some(right_typ) if alpha_equivalent(left_typ, right_typ) => {}
            Some(right_typ) => {
                return Err(TypeError::Mismatch {
                    span,
                    expected: left_typ.clone(),
                    found: right_typ.clone(),
                })
            }
            None => {
                return Err(TypeError::other(
                    span,
                    format!("`{}` is bound on only one side of the mapping clause", id),
                ))
            }
        }
    }
    for id in right.keys() {
        if !left.contains_key(id) {
            return Err(TypeError::other(
                span,
                format!("`{}` is bound on only one side of the mapping clause", id),
            ));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Let definitions and registers
// ---------------------------------------------------------------------------

fn check_letdef(env: &Env, pat: &Pat, exp: &Exp) -> Result<(CheckedDef, Env), TypeError> {
    let exp = match &pat.kind {
        PatKind::Typ(ascription, _) => {
            env.wf_typ(ascription)?;
            check_exp(env, exp, ascription)?
        }
        _ => infer_exp(env, exp)?,
    };
    if !env.options().no_effects && !exp.effect().is_pure() {
        return Err(TypeError::EffectMismatch {
            span: pat.span,
            declared: EffectSet::pure(),
            inferred: exp.effect(),
        });
    }
    let typ = exp
        .typ()
        .cloned()
        .ok_or_else(|| TypeError::other(pat.span, "internal: binding was not annotated"))?;
    let (pat, env) = bind_pat(env, pat, &typ)?;
    let annot = exp.annot.clone();
    Ok((
        CheckedDef {
            def: Def::Let(pat, exp),
            annot,
        },
        env,
    ))
}

fn check_register(env: &Env, register: &RegisterDef) -> Result<(CheckedDef, Env), TypeError> {
    let RegisterDef { id, typ, init, span } = register;
    env.wf_typ(typ)?;
    if env.get_register(id).is_some() {
        return Err(TypeError::Redefinition {
            span: *span,
            id: id.clone(),
        });
    }

    // A configuration register carries an initial expression and the config
    // effect.
    let (init, annot) = match init {
        Some(init) => {
            let init = check_exp(env, init, typ)?;
            let mut annot = init.annot.clone();
            if let Some(annot) = &mut annot {
                annot.effect.insert(Effect::Config);
            }
            (Some(init), annot)
        }
        None => (None, None),
    };

    let mut env = env.clone();
    env.add_register(id.clone(), typ.clone());
    Ok((
        CheckedDef {
            def: Def::Register(RegisterDef {
                id: id.clone(),
                typ: typ.clone(),
                init,
                span: *span,
            }),
            annot,
        },
        env,
    ))
}

/// Strip every annotation from a checked definition, for re-checking.
pub fn strip_def(def: &Def) -> Def {
    match def {
        Def::Fun(fundef) => Def::Fun(FunDef {
            id: fundef.id.clone(),
            clauses: fundef
                .clauses
                .iter()
                .map(|clause| FunClause {
                    pat: clause.pat.strip_annots(),
                    body: clause.body.strip_annots(),
                    span: clause.span,
                })
                .collect(),
            span: fundef.span,
        }),
        Def::Mapping(mapdef) => Def::Mapping(MapDef {
            id: mapdef.id.clone(),
            clauses: mapdef
                .clauses
                .iter()
                .map(|clause| match clause {
                    MapClause::Bidir(left, right, span) => {
                        MapClause::Bidir(left.strip_annots(), right.strip_annots(), *span)
                    }
                    MapClause::Forwards(pat, exp, span) => {
                        MapClause::Forwards(pat.strip_annots(), exp.strip_annots(), *span)
                    }
                    MapClause::Backwards(pat, exp, span) => {
                        MapClause::Backwards(pat.strip_annots(), exp.strip_annots(), *span)
                    }
                })
                .collect(),
            span: mapdef.span,
        }),
        Def::Let(pat, exp) => Def::Let(pat.strip_annots(), exp.strip_annots()),
        Def::Register(register) => Def::Register(RegisterDef {
            id: register.id.clone(),
            typ: register.typ.clone(),
            init: register.init.as_ref().map(Exp::strip_annots),
            span: register.span,
        }),
        def => def.clone(),
    }
}
