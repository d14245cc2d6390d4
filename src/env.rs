//! The typing environment.
//!
//! Name resolution and fact storage for everything the checker knows:
//! value specifications, locals, registers, type declarations, mappings,
//! type variables, synonyms, overloads, casts, flow refinements and the
//! in-scope numeric constraints.
//!
//! The environment is value-typed: extension produces a new environment that
//! shares structure with the old one, so failed branches and cast attempts
//! are discarded by dropping their copy. Fresh-name counters are the one
//! piece of shared state; they live in a per-session naming context behind an
//! `Rc` so that independent checking sessions stay reproducible.

use std::cell::Cell;
use std::rc::Rc;

use log::trace;

use crate::ast::subst::{self, rename_kid_constraint, rename_kid_typ};
use crate::ast::{
    Effect, EffectSet, Id, Kid, Kind, KindedId, Mut, NConstraint, Nexp, Order, Typ, TypArg,
    TypQuant,
};
use crate::reporting::TypeError;
use crate::source::Span;
use crate::Options;

/// A quantified type, as stored for value specifications and accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct Bind {
    pub quant: TypQuant,
    pub typ: Typ,
}

impl Bind {
    pub fn new(quant: TypQuant, typ: Typ) -> Bind {
        Bind { quant, typ }
    }
}

/// A register's entry: its access effects and content type.
#[derive(Debug, Clone)]
pub struct RegEntry {
    pub read_effect: EffectSet,
    pub write_effect: EffectSet,
    pub typ: Typ,
}

/// The per-session naming context. Two counters: one for type-variable
/// freshening, one for existential opening.
#[derive(Debug, Default)]
struct Naming {
    kid: Cell<u64>,
    exist: Cell<u64>,
}

#[derive(Debug, Clone)]
pub struct Env {
    // Value specifications: canonical form used during checking, and the
    // original declared form.
    val_specs: im::HashMap<Id, Bind>,
    orig_val_specs: im::HashMap<Id, Bind>,
    defined_val_specs: im::HashSet<Id>,

    locals: im::HashMap<Id, (Mut, Typ)>,
    registers: im::HashMap<Id, RegEntry>,

    records: im::HashMap<Id, (TypQuant, Vec<(Typ, Id)>)>,
    // Field accessors, keyed by the synthesised "record.field" name.
    accessors: im::HashMap<Id, Bind>,
    variants: im::HashMap<Id, (TypQuant, Vec<(Typ, Id)>)>,
    union_ctors: im::HashMap<Id, Id>,
    enums: im::HashMap<Id, Vec<Id>>,
    enum_members: im::HashMap<Id, Id>,

    mappings: im::HashMap<Id, (TypQuant, Typ, Typ)>,

    typ_vars: im::HashMap<Kid, (Span, Kind)>,
    typ_synonyms: im::HashMap<Id, (TypQuant, TypArg)>,
    constraint_synonyms: im::HashMap<Id, (Vec<KindedId>, NConstraint)>,
    num_defs: im::HashMap<Id, Nexp>,

    overloads: im::HashMap<Id, Vec<Id>>,
    casts: im::Vector<Id>,
    // A local's narrowed visible type under the current control-flow path.
    flow: im::HashMap<Id, Typ>,
    smt_ops: im::HashMap<Id, String>,

    // Declared kinds of type constructors, and the nullary base types.
    typ_ctors: im::HashMap<Id, Vec<Kind>>,
    typ_ids: im::HashSet<Id>,

    // Most recently added first.
    constraints: im::Vector<NConstraint>,

    default_order: Option<Order>,
    ret_typ: Option<Typ>,

    allow_casts: bool,
    allow_bindings: bool,
    poly_undefineds: bool,
    allow_unknowns: bool,

    opts: Rc<Options>,
    naming: Rc<Naming>,
}

impl Env {
    pub fn new() -> Env {
        Env::with_options(Options::default())
    }

    /// A fresh root environment. Building a new root resets the naming
    /// context, which keeps independent sessions reproducible.
    pub fn with_options(opts: Options) -> Env {
        let builtin_ctors = [
            ("atom", vec![Kind::Int]),
            ("range", vec![Kind::Int, Kind::Int]),
            ("vector", vec![Kind::Int, Kind::Order, Kind::Type]),
            ("bits", vec![Kind::Int]),
            ("register", vec![Kind::Type]),
            ("option", vec![Kind::Type]),
            ("list", vec![Kind::Type]),
        ];
        let builtin_ids = ["unit", "bool", "bit", "int", "nat", "real", "string"];

        Env {
            val_specs: im::HashMap::new(),
            orig_val_specs: im::HashMap::new(),
            defined_val_specs: im::HashSet::new(),
            locals: im::HashMap::new(),
            registers: im::HashMap::new(),
            records: im::HashMap::new(),
            accessors: im::HashMap::new(),
            variants: im::HashMap::new(),
            union_ctors: im::HashMap::new(),
            enums: im::HashMap::new(),
            enum_members: im::HashMap::new(),
            mappings: im::HashMap::new(),
            typ_vars: im::HashMap::new(),
            typ_synonyms: im::HashMap::new(),
            constraint_synonyms: im::HashMap::new(),
            num_defs: im::HashMap::new(),
            overloads: im::HashMap::new(),
            casts: im::Vector::new(),
            flow: im::HashMap::new(),
            smt_ops: im::HashMap::new(),
            typ_ctors: builtin_ctors
                .into_iter()
                .map(|(name, kinds)| (Id::synthetic(name), kinds))
                .collect(),
            typ_ids: builtin_ids.into_iter().map(Id::synthetic).collect(),
            constraints: im::Vector::new(),
            default_order: None,
            ret_typ: None,
            allow_casts: true,
            allow_bindings: false,
            poly_undefineds: false,
            allow_unknowns: false,
            opts: Rc::new(opts),
            naming: Rc::new(Naming::default()),
        }
    }

    pub fn options(&self) -> &Options {
        &self.opts
    }

    // -----------------------------------------------------------------------
    // Fresh names
    // -----------------------------------------------------------------------

    /// Mint a type variable with the reserved freshening prefix.
    pub fn fresh_kid(&self) -> Kid {
        let n = self.naming.kid.get();
        self.naming.kid.set(n + 1);
        Kid::synthetic(format!("fv#{}", n))
    }

    /// Mint a variable for opening an existential, optionally tagged so that
    /// variables opened for different call arguments never capture each
    /// other.
    pub fn fresh_existential(&self, tag: Option<&str>) -> Kid {
        let n = self.naming.exist.get();
        self.naming.exist.set(n + 1);
        match tag {
            Some(tag) => Kid::synthetic(format!("{}#ex{}", tag, n)),
            None => Kid::synthetic(format!("ex#{}", n)),
        }
    }

    /// Rename every quantified variable of a binding that clashes with a
    /// variable currently in scope.
    pub fn freshen_bind(&self, bind: &Bind) -> Bind {
        let mut quant = bind.quant.clone();
        let mut typ = bind.typ.clone();
        for index in 0..quant.kids.len() {
            let kid = quant.kids[index].kid.clone();
            if self.typ_vars.contains_key(&kid) {
                let fresh = self.fresh_kid();
                for nc in &mut quant.constraints {
                    *nc = rename_kid_constraint(nc, &kid, &fresh);
                }
                typ = rename_kid_typ(&typ, &kid, &fresh);
                quant.kids[index].kid = fresh;
            }
        }
        Bind { quant, typ }
    }

    // -----------------------------------------------------------------------
    // Type variables and constraints
    // -----------------------------------------------------------------------

    pub fn get_typ_var(&self, kid: &Kid) -> Option<Kind> {
        self.typ_vars.get(kid).map(|(_, kind)| *kind)
    }

    pub fn typ_var_span(&self, kid: &Kid) -> Option<Span> {
        self.typ_vars.get(kid).map(|(span, _)| *span)
    }

    pub fn add_typ_var(&mut self, kid: Kid, kind: Kind) {
        let span = kid.span();
        self.typ_vars.insert(kid, (span, kind));
    }

    pub fn add_typ_vars(&mut self, kids: &[KindedId]) {
        for kinded in kids {
            self.add_typ_var(kinded.kid.clone(), kinded.kind);
        }
    }

    /// Add a constraint to the environment, expanding constraint synonyms
    /// and dropping trivial `true`.
    pub fn add_constraint(&mut self, nc: NConstraint) {
        let nc = match self.expand_constraint_synonyms(&nc) {
            Ok(nc) => nc,
            Err(_) => nc,
        };
        if let NConstraint::True = nc {
            return;
        }
        trace!("add_constraint: {}", nc);
        self.constraints.push_front(nc);
    }

    /// Every constraint currently in scope, most recent first.
    pub fn get_constraints(&self) -> Vec<NConstraint> {
        self.constraints.iter().cloned().collect()
    }

    /// The current length of the constraint list. Callers record this before
    /// an operation and use [`Env::constraints_since`] to collect exactly the
    /// constraints the operation introduced.
    pub fn constraints_len(&self) -> usize {
        self.constraints.len()
    }

    pub fn constraints_since(&self, len: usize) -> Vec<NConstraint> {
        let added = self.constraints.len().saturating_sub(len);
        self.constraints.iter().take(added).cloned().collect()
    }

    // -----------------------------------------------------------------------
    // Value specifications
    // -----------------------------------------------------------------------

    /// Look up a value specification in its canonical form, with quantified
    /// variables freshened against the current scope.
    pub fn get_val_spec(&self, id: &Id) -> Result<Bind, TypeError> {
        match self.val_specs.get(id) {
            Some(bind) => Ok(self.freshen_bind(bind)),
            None => Err(TypeError::UnboundId {
                span: id.span(),
                id: id.clone(),
            }),
        }
    }

    /// The declared (pre-canonicalisation) form of a value specification.
    pub fn get_val_spec_orig(&self, id: &Id) -> Result<Bind, TypeError> {
        match self.orig_val_specs.get(id) {
            Some(bind) => Ok(self.freshen_bind(bind)),
            None => self.get_val_spec(id),
        }
    }

    pub fn have_val_spec(&self, id: &Id) -> bool {
        self.val_specs.contains_key(id)
    }

    pub fn add_val_spec(&mut self, id: Id, canonical: Bind, orig: Bind) {
        self.orig_val_specs.insert(id.clone(), orig);
        self.val_specs.insert(id, canonical);
    }

    pub fn is_defined(&self, id: &Id) -> bool {
        self.defined_val_specs.contains(id)
    }

    pub fn mark_defined(&mut self, id: Id) {
        self.defined_val_specs.insert(id);
    }

    // -----------------------------------------------------------------------
    // Locals, registers and flow refinement
    // -----------------------------------------------------------------------

    pub fn add_local(&mut self, id: Id, mutability: Mut, typ: Typ) {
        self.flow.remove(&id);
        self.locals.insert(id, (mutability, typ));
    }

    /// The visible type of a local, through any flow refinement.
    pub fn get_local(&self, id: &Id) -> Option<(Mut, Typ)> {
        let (mutability, typ) = self.locals.get(id)?.clone();
        match self.flow.get(id) {
            Some(narrowed) => Some((mutability, narrowed.clone())),
            None => Some((mutability, typ)),
        }
    }

    /// Narrow the visible type of a local on the current flow path. The
    /// underlying binding is unchanged; narrowing an already-narrowed local
    /// composes.
    pub fn add_flow(&mut self, id: Id, narrowed: Typ) {
        self.flow.insert(id, narrowed);
    }

    pub fn add_register(&mut self, id: Id, typ: Typ) {
        self.registers.insert(
            id,
            RegEntry {
                read_effect: EffectSet::single(Effect::ReadReg),
                write_effect: EffectSet::single(Effect::WriteReg),
                typ,
            },
        );
    }

    pub fn get_register(&self, id: &Id) -> Option<&RegEntry> {
        self.registers.get(id)
    }

    // -----------------------------------------------------------------------
    // Records, variants and enums
    // -----------------------------------------------------------------------

    /// The type a declaration's quantifier gives its own applications.
    fn self_typ(id: &Id, quant: &TypQuant) -> Typ {
        if quant.kids.is_empty() {
            Typ::Id(id.clone())
        } else {
            Typ::App(
                id.clone(),
                quant
                    .kids
                    .iter()
                    .map(|kinded| match kinded.kind {
                        Kind::Int => TypArg::Nexp(Nexp::Var(kinded.kid.clone())),
                        Kind::Order => TypArg::Order(Order::Var(kinded.kid.clone())),
                        _ => TypArg::Typ(Typ::Var(kinded.kid.clone())),
                    })
                    .collect(),
            )
        }
    }

    fn register_ctor_kinds(&mut self, id: &Id, quant: &TypQuant) {
        if quant.kids.is_empty() {
            self.typ_ids.insert(id.clone());
        } else {
            self.typ_ctors.insert(
                id.clone(),
                quant.kids.iter().map(|kinded| kinded.kind).collect(),
            );
        }
    }

    pub fn add_record(&mut self, id: Id, quant: TypQuant, fields: Vec<(Typ, Id)>) {
        self.register_ctor_kinds(&id, &quant);
        let rec_typ = Env::self_typ(&id, &quant);
        for (field_typ, field) in &fields {
            let accessor = Id::synthetic(format!("{}.{}", id.name(), field.name()));
            self.accessors.insert(
                accessor,
                Bind::new(
                    quant.clone(),
                    Typ::function(
                        vec![rec_typ.clone()],
                        field_typ.clone(),
                        EffectSet::pure(),
                    ),
                ),
            );
        }
        self.records.insert(id, (quant, fields));
    }

    pub fn get_record(&self, id: &Id) -> Option<&(TypQuant, Vec<(Typ, Id)>)> {
        self.records.get(id)
    }

    pub fn get_accessor(&self, record: &Id, field: &Id) -> Option<Bind> {
        let accessor = Id::synthetic(format!("{}.{}", record.name(), field.name()));
        self.accessors
            .get(&accessor)
            .map(|bind| self.freshen_bind(bind))
    }

    pub fn add_variant(&mut self, id: Id, quant: TypQuant, ctors: Vec<(Typ, Id)>) {
        self.register_ctor_kinds(&id, &quant);
        let union_typ = Env::self_typ(&id, &quant);
        for (arg_typ, ctor) in &ctors {
            // A leading existential in a constructor's argument lifts into
            // the constructor's quantifier, keeping argument positions free
            // of existentials.
            let mut ctor_quant = quant.clone();
            let arg_typ = match arg_typ {
                Typ::Exist(kids, nc, body) => {
                    ctor_quant.kids.extend(kids.iter().cloned());
                    ctor_quant.constraints.push(nc.clone());
                    body.as_ref().clone()
                }
                arg_typ => arg_typ.clone(),
            };
            let bind = Bind::new(
                ctor_quant,
                Typ::function(vec![arg_typ], union_typ.clone(), EffectSet::pure()),
            );
            self.val_specs.insert(ctor.clone(), bind.clone());
            self.orig_val_specs.insert(ctor.clone(), bind);
            self.union_ctors.insert(ctor.clone(), id.clone());
        }
        self.variants.insert(id, (quant, ctors));
    }

    pub fn is_union_ctor(&self, id: &Id) -> bool {
        self.union_ctors.contains_key(id)
    }

    pub fn union_for_ctor(&self, id: &Id) -> Option<&Id> {
        self.union_ctors.get(id)
    }

    pub fn add_enum(&mut self, id: Id, members: Vec<Id>) {
        self.typ_ids.insert(id.clone());
        for member in &members {
            self.enum_members.insert(member.clone(), id.clone());
        }
        self.enums.insert(id, members);
    }

    pub fn get_enum(&self, id: &Id) -> Option<&Vec<Id>> {
        self.enums.get(id)
    }

    /// The enumeration an identifier is a member of, if any.
    pub fn enum_for_member(&self, member: &Id) -> Option<&Id> {
        self.enum_members.get(member)
    }

    // -----------------------------------------------------------------------
    // Mappings
    // -----------------------------------------------------------------------

    /// Register a mapping and synthesise its auxiliary value specifications.
    pub fn add_mapping(&mut self, id: Id, quant: TypQuant, lhs: Typ, rhs: Typ) {
        let escape = EffectSet::single(Effect::Escape);
        let specs = [
            (
                format!("{}_forwards", id.name()),
                Typ::function(vec![lhs.clone()], rhs.clone(), escape.clone()),
            ),
            (
                format!("{}_backwards", id.name()),
                Typ::function(vec![rhs.clone()], lhs.clone(), escape),
            ),
            (
                format!("{}_forwards_matches", id.name()),
                Typ::function(vec![lhs.clone()], Typ::bool(), EffectSet::pure()),
            ),
            (
                format!("{}_backwards_matches", id.name()),
                Typ::function(vec![rhs.clone()], Typ::bool(), EffectSet::pure()),
            ),
        ];
        for (name, typ) in specs {
            let bind = Bind::new(quant.clone(), typ);
            let spec_id = Id::synthetic(name);
            self.orig_val_specs.insert(spec_id.clone(), bind.clone());
            self.val_specs.insert(spec_id, bind);
        }

        // When one side is a string, the mapping can also match a prefix,
        // returning the other side plus the matched length.
        let string_side = |typ: &Typ| matches!(typ, Typ::Id(id) if id.name() == "string");
        let other = if string_side(&lhs) {
            Some(rhs.clone())
        } else if string_side(&rhs) {
            Some(lhs.clone())
        } else {
            None
        };
        if let Some(other) = other {
            let bind = Bind::new(
                quant.clone(),
                Typ::function(
                    vec![Typ::string()],
                    Typ::option(Typ::tuple(vec![other, Typ::nat()])),
                    EffectSet::pure(),
                ),
            );
            let spec_id = Id::synthetic(format!("{}_matches_prefix", id.name()));
            self.orig_val_specs.insert(spec_id.clone(), bind.clone());
            self.val_specs.insert(spec_id, bind);
        }

        self.mappings.insert(id, (quant, lhs, rhs));
    }

    pub fn get_mapping(&self, id: &Id) -> Option<&(TypQuant, Typ, Typ)> {
        self.mappings.get(id)
    }

    // -----------------------------------------------------------------------
    // Synonyms and numeric constants
    // -----------------------------------------------------------------------

    pub fn add_typ_synonym(&mut self, id: Id, quant: TypQuant, arg: TypArg) {
        if quant.kids.is_empty() {
            self.typ_ids.insert(id.clone());
        } else {
            self.typ_ctors.insert(
                id.clone(),
                quant.kids.iter().map(|kinded| kinded.kind).collect(),
            );
        }
        self.typ_synonyms.insert(id, (quant, arg));
    }

    pub fn add_constraint_synonym(
        &mut self,
        id: Id,
        params: Vec<KindedId>,
        body: NConstraint,
    ) {
        self.constraint_synonyms.insert(id, (params, body));
    }

    pub fn get_constraint_synonym(&self, id: &Id) -> Option<&(Vec<KindedId>, NConstraint)> {
        self.constraint_synonyms.get(id)
    }

    pub fn add_num_def(&mut self, id: Id, nexp: Nexp) {
        self.num_defs.insert(id, nexp);
    }

    pub fn get_num_def(&self, id: &Id) -> Result<Nexp, TypeError> {
        match self.num_defs.get(id) {
            Some(nexp) => Ok(nexp.clone()),
            None => Err(TypeError::NoNumIdent {
                span: id.span(),
                id: id.clone(),
            }),
        }
    }

    /// Recursively unfold type and constraint synonyms.
    ///
    /// Existential binders are preserved; binders that would capture a
    /// variable introduced by unfolding are renamed with the reserved fresh
    /// prefix before substitution (the substitution functions handle that).
    pub fn expand_synonyms(&self, typ: &Typ) -> Result<Typ, TypeError> {
        match typ {
            Typ::Id(id) => match self.typ_synonyms.get(id) {
                Some((quant, arg)) if quant.kids.is_empty() => match arg {
                    TypArg::Typ(body) => self.expand_synonyms(body),
                    _ => Err(TypeError::other(
                        id.span(),
                        format!("type synonym `{}` does not expand to a type", id),
                    )),
                },
                Some(_) => Err(TypeError::other(
                    id.span(),
                    format!("type synonym `{}` requires arguments", id),
                )),
                None => Ok(typ.clone()),
            },
            Typ::Var(_) | Typ::Unknown => Ok(typ.clone()),
            Typ::Fn(args, ret, effect) => Ok(Typ::Fn(
                args.iter()
                    .map(|arg| self.expand_synonyms(arg))
                    .collect::<Result<_, _>>()?,
                Box::new(self.expand_synonyms(ret)?),
                effect.clone(),
            )),
            Typ::Bidir(lhs, rhs) => Ok(Typ::Bidir(
                Box::new(self.expand_synonyms(lhs)?),
                Box::new(self.expand_synonyms(rhs)?),
            )),
            Typ::Tuple(typs) => Ok(Typ::Tuple(
                typs.iter()
                    .map(|typ| self.expand_synonyms(typ))
                    .collect::<Result<_, _>>()?,
            )),
            Typ::App(id, args) => {
                let args = args
                    .iter()
                    .map(|arg| self.expand_typ_arg_synonyms(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                match self.typ_synonyms.get(id) {
                    Some((quant, body)) => {
                        if quant.kids.len() != args.len() {
                            return Err(TypeError::other(
                                id.span(),
                                format!(
                                    "type synonym `{}` expects {} arguments, given {}",
                                    id,
                                    quant.kids.len(),
                                    args.len()
                                ),
                            ));
                        }
                        let body = match body {
                            TypArg::Typ(body) => body.clone(),
                            _ => {
                                return Err(TypeError::other(
                                    id.span(),
                                    format!("type synonym `{}` does not expand to a type", id),
                                ))
                            }
                        };
                        let expanded = quant.kids.iter().zip(args.iter()).try_fold(
                            body,
                            |body, (kinded, arg)| match (kinded.kind, arg) {
                                (Kind::Int, TypArg::Nexp(nexp)) => {
                                    Ok(subst::subst_nexp_typ(&body, &kinded.kid, nexp))
                                }
                                (Kind::Type, TypArg::Typ(typ)) => {
                                    Ok(subst::subst_typ(&body, &kinded.kid, typ))
                                }
                                (Kind::Order, TypArg::Order(order)) => {
                                    Ok(subst::subst_order(&body, &kinded.kid, order))
                                }
                                (kind, arg) => Err(TypeError::other(
                                    id.span(),
                                    format!(
                                        "argument {:?} to synonym `{}` is not of kind {}",
                                        arg, id, kind
                                    ),
                                )),
                            },
                        )?;
                        self.expand_synonyms(&expanded)
                    }
                    None => Ok(Typ::App(id.clone(), args)),
                }
            }
            Typ::Exist(kids, nc, body) => Ok(Typ::Exist(
                kids.clone(),
                self.expand_constraint_synonyms(nc)?,
                Box::new(self.expand_synonyms(body)?),
            )),
        }
    }

    fn expand_typ_arg_synonyms(&self, arg: &TypArg) -> Result<TypArg, TypeError> {
        match arg {
            TypArg::Typ(typ) => Ok(TypArg::Typ(self.expand_synonyms(typ)?)),
            arg => Ok(arg.clone()),
        }
    }

    /// Unfold constraint synonym applications.
    pub fn expand_constraint_synonyms(&self, nc: &NConstraint) -> Result<NConstraint, TypeError> {
        match nc {
            NConstraint::And(lhs, rhs) => Ok(NConstraint::And(
                Box::new(self.expand_constraint_synonyms(lhs)?),
                Box::new(self.expand_constraint_synonyms(rhs)?),
            )),
            NConstraint::Or(lhs, rhs) => Ok(NConstraint::or(
                self.expand_constraint_synonyms(lhs)?,
                self.expand_constraint_synonyms(rhs)?,
            )),
            NConstraint::App(id, args) => {
                let (params, body) = match self.constraint_synonyms.get(id) {
                    Some(entry) => entry,
                    None => {
                        return Err(TypeError::other(
                            id.span(),
                            format!("no constraint synonym named `{}`", id),
                        ))
                    }
                };
                if params.len() != args.len() {
                    return Err(TypeError::other(
                        id.span(),
                        format!(
                            "constraint synonym `{}` expects {} arguments, given {}",
                            id,
                            params.len(),
                            args.len()
                        ),
                    ));
                }
                let expanded = params.iter().zip(args.iter()).try_fold(
                    body.clone(),
                    |body, (kinded, arg)| match arg {
                        TypArg::Nexp(nexp) => {
                            Ok(subst::subst_nexp_constraint(&body, &kinded.kid, nexp))
                        }
                        arg => Err(TypeError::other(
                            id.span(),
                            format!(
                                "argument {:?} to constraint synonym `{}` is not numeric",
                                arg, id
                            ),
                        )),
                    },
                )?;
                self.expand_constraint_synonyms(&expanded)
            }
            nc => Ok(nc.clone()),
        }
    }

    // -----------------------------------------------------------------------
    // Overloads, casts and solver symbols
    // -----------------------------------------------------------------------

    pub fn add_overloads(&mut self, id: Id, candidates: Vec<Id>) {
        self.overloads
            .entry(id)
            .or_insert_with(Vec::new)
            .extend(candidates);
    }

    pub fn get_overloads(&self, id: &Id) -> Option<&Vec<Id>> {
        self.overloads.get(id)
    }

    pub fn add_cast(&mut self, id: Id) {
        self.casts.push_back(id);
    }

    /// Registered casts, in registration order.
    pub fn get_casts(&self) -> Vec<Id> {
        self.casts.iter().cloned().collect()
    }

    pub fn add_smt_op(&mut self, id: Id, symbol: impl Into<String>) {
        self.smt_ops.insert(id, symbol.into());
    }

    pub fn get_smt_op(&self, id: &Id) -> Option<&String> {
        self.smt_ops.get(id)
    }

    // -----------------------------------------------------------------------
    // Policy flags, default order and return type
    // -----------------------------------------------------------------------

    pub fn allow_casts(&self) -> bool {
        self.allow_casts
    }

    pub fn set_allow_casts(&mut self, allow: bool) {
        self.allow_casts = allow;
    }

    pub fn allow_bindings(&self) -> bool {
        self.allow_bindings
    }

    pub fn set_allow_bindings(&mut self, allow: bool) {
        self.allow_bindings = allow;
    }

    pub fn poly_undefineds(&self) -> bool {
        self.poly_undefineds
    }

    pub fn set_poly_undefineds(&mut self, allow: bool) {
        self.poly_undefineds = allow;
    }

    pub fn allow_unknowns(&self) -> bool {
        self.allow_unknowns
    }

    pub fn set_allow_unknowns(&mut self, allow: bool) {
        self.allow_unknowns = allow;
    }

    pub fn get_default_order(&self) -> Option<&Order> {
        self.default_order.as_ref()
    }

    pub fn set_default_order(&mut self, order: Order, span: Span) -> Result<(), TypeError> {
        match &self.default_order {
            Some(existing) if *existing != order => Err(TypeError::other(
                span,
                "default order was already set differently",
            )),
            _ => {
                self.default_order = Some(order);
                Ok(())
            }
        }
    }

    pub fn get_ret_typ(&self) -> Option<&Typ> {
        self.ret_typ.as_ref()
    }

    pub fn set_ret_typ(&mut self, typ: Typ) {
        self.ret_typ = Some(typ);
    }

    // -----------------------------------------------------------------------
    // Well-formedness
    // -----------------------------------------------------------------------

    /// Check that a type is well formed: every constructor applied at its
    /// declared kind, every variable bound, existential binder lists
    /// non-empty, bidirectional sides not alpha-equivalent, and any
    /// constraints attached to a constructor's quantifier provable.
    pub fn wf_typ(&self, typ: &Typ) -> Result<(), TypeError> {
        match typ {
            Typ::Id(id) => {
                if self.typ_ids.contains(id)
                    || self.records.contains_key(id)
                    || self.variants.contains_key(id)
                    || self.enums.contains_key(id)
                {
                    Ok(())
                } else if self.typ_ctors.contains_key(id) {
                    Err(TypeError::other(
                        id.span(),
                        format!("type constructor `{}` requires arguments", id),
                    ))
                } else {
                    Err(TypeError::UnboundId {
                        span: id.span(),
                        id: id.clone(),
                    })
                }
            }
            Typ::Var(kid) => match self.get_typ_var(kid) {
                Some(Kind::Type) => Ok(()),
                Some(kind) => Err(TypeError::other(
                    kid.span(),
                    format!("`{}` has kind {}, expected Type", kid, kind),
                )),
                None => Err(TypeError::UnboundKid {
                    span: kid.span(),
                    kid: kid.clone(),
                }),
            },
            Typ::Fn(args, ret, _) => {
                for arg in args {
                    self.wf_typ(arg)?;
                }
                self.wf_typ(ret)
            }
            Typ::Bidir(lhs, rhs) => {
                if subst::alpha_equivalent(lhs, rhs) {
                    return Err(TypeError::other(
                        Span::Empty,
                        "left and right of a bidirectional type cannot be the same",
                    ));
                }
                self.wf_typ(lhs)?;
                self.wf_typ(rhs)
            }
            Typ::Tuple(typs) => typs.iter().try_for_each(|typ| self.wf_typ(typ)),
            Typ::App(id, args) => {
                let kinds = match self.typ_ctors.get(id) {
                    Some(kinds) => kinds.clone(),
                    None => match self.records.get(id).map(|(quant, _)| quant).or_else(|| {
                        self.variants.get(id).map(|(quant, _)| quant)
                    }) {
                        Some(quant) => quant.kids.iter().map(|kinded| kinded.kind).collect(),
                        None => {
                            return Err(TypeError::UnboundId {
                                span: id.span(),
                                id: id.clone(),
                            })
                        }
                    },
                };
                if kinds.len() != args.len() {
                    return Err(TypeError::other(
                        id.span(),
                        format!(
                            "`{}` expects {} arguments, given {}",
                            id,
                            kinds.len(),
                            args.len()
                        ),
                    ));
                }
                for (kind, arg) in kinds.iter().zip(args.iter()) {
                    if *kind != arg.kind() {
                        return Err(TypeError::other(
                            id.span(),
                            format!("argument to `{}` has kind {}, expected {}", id, arg.kind(), kind),
                        ));
                    }
                    match arg {
                        TypArg::Nexp(nexp) => self.wf_nexp(nexp)?,
                        TypArg::Typ(typ) => self.wf_typ(typ)?,
                        TypArg::Order(Order::Var(kid)) => match self.get_typ_var(kid) {
                            Some(Kind::Order) => {}
                            Some(kind) => {
                                return Err(TypeError::other(
                                    kid.span(),
                                    format!("`{}` has kind {}, expected Order", kid, kind),
                                ))
                            }
                            None => {
                                return Err(TypeError::UnboundKid {
                                    span: kid.span(),
                                    kid: kid.clone(),
                                })
                            }
                        },
                        TypArg::Order(_) => {}
                    }
                }
                self.prove_ctor_constraints(id, args)
            }
            Typ::Exist(kids, nc, body) => {
                if kids.is_empty() {
                    return Err(TypeError::other(
                        Span::Empty,
                        "existential quantifier with no variables",
                    ));
                }
                let mut env = self.clone();
                env.add_typ_vars(kids);
                env.wf_constraint(nc)?;
                env.wf_typ(body)
            }
            Typ::Unknown => {
                if self.allow_unknowns {
                    Ok(())
                } else {
                    Err(TypeError::other(
                        Span::Empty,
                        "unknown type outside mapping elaboration",
                    ))
                }
            }
        }
    }

    /// Discharge the constraints a record or variant attaches to its
    /// quantifier, instantiated at the given arguments.
    fn prove_ctor_constraints(&self, id: &Id, args: &[TypArg]) -> Result<(), TypeError> {
        let quant = match self
            .records
            .get(id)
            .map(|(quant, _)| quant)
            .or_else(|| self.variants.get(id).map(|(quant, _)| quant))
        {
            Some(quant) if !quant.constraints.is_empty() => quant.clone(),
            _ => return Ok(()),
        };
        for nc in &quant.constraints {
            let mut nc = nc.clone();
            for (kinded, arg) in quant.kids.iter().zip(args.iter()) {
                if let TypArg::Nexp(nexp) = arg {
                    nc = subst::subst_nexp_constraint(&nc, &kinded.kid, nexp);
                }
            }
            if !crate::solver::prove(self, &nc) {
                return Err(TypeError::CouldNotProve {
                    span: id.span(),
                    constraint: nc,
                    constraints: self.get_constraints(),
                });
            }
        }
        Ok(())
    }

    /// Check that a numeric expression is well formed: every variable is
    /// `Int`-kinded, every named constant exists, and every named function
    /// has a recorded solver symbol.
    pub fn wf_nexp(&self, nexp: &Nexp) -> Result<(), TypeError> {
        match nexp {
            Nexp::Id(id) => self.get_num_def(id).map(|_| ()),
            Nexp::Var(kid) => match self.get_typ_var(kid) {
                Some(Kind::Int) => Ok(()),
                Some(kind) => Err(TypeError::other(
                    kid.span(),
                    format!("`{}` has kind {}, expected Int", kid, kind),
                )),
                None => Err(TypeError::UnboundKid {
                    span: kid.span(),
                    kid: kid.clone(),
                }),
            },
            Nexp::Constant(_) => Ok(()),
            Nexp::App(id, args) => {
                if self.smt_ops.get(id).is_none() {
                    return Err(TypeError::other(
                        id.span(),
                        format!("`{}` has no solver-level function symbol", id),
                    ));
                }
                args.iter().try_for_each(|arg| self.wf_nexp(arg))
            }
            Nexp::Sum(lhs, rhs) | Nexp::Minus(lhs, rhs) | Nexp::Times(lhs, rhs) => {
                self.wf_nexp(lhs)?;
                self.wf_nexp(rhs)
            }
            Nexp::Exp(exp) | Nexp::Neg(exp) => self.wf_nexp(exp),
        }
    }

    /// Check that a constraint is well formed.
    pub fn wf_constraint(&self, nc: &NConstraint) -> Result<(), TypeError> {
        match nc {
            NConstraint::Equal(lhs, rhs)
            | NConstraint::NotEqual(lhs, rhs)
            | NConstraint::BoundedLe(lhs, rhs)
            | NConstraint::BoundedGe(lhs, rhs) => {
                self.wf_nexp(lhs)?;
                self.wf_nexp(rhs)
            }
            NConstraint::Set(kid, _) => self.wf_nexp(&Nexp::Var(kid.clone())),
            NConstraint::Or(lhs, rhs) | NConstraint::And(lhs, rhs) => {
                self.wf_constraint(lhs)?;
                self.wf_constraint(rhs)
            }
            NConstraint::True | NConstraint::False => Ok(()),
            NConstraint::App(id, args) => {
                if self.constraint_synonyms.get(id).is_none() {
                    return Err(TypeError::other(
                        id.span(),
                        format!("no constraint synonym named `{}`", id),
                    ));
                }
                for arg in args {
                    if let TypArg::Nexp(nexp) = arg {
                        self.wf_nexp(nexp)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Locals visible in this environment, for diagnostics.
    pub fn local_bindings(&self) -> Vec<(Id, Typ)> {
        self.locals
            .iter()
            .map(|(id, (_, typ))| (id.clone(), typ.clone()))
            .collect()
    }
}

impl Default for Env {
    fn default() -> Env {
        Env::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kid(name: &str) -> Kid {
        Kid::synthetic(name)
    }

    fn id(name: &str) -> Id {
        Id::synthetic(name)
    }

    #[test]
    fn fresh_names_carry_reserved_prefixes() {
        let env = Env::new();
        let fv = env.fresh_kid();
        let ex = env.fresh_existential(None);
        let tagged = env.fresh_existential(Some("arg0"));
        assert!(fv.is_fresh());
        assert!(ex.is_fresh());
        assert!(tagged.is_fresh());
        assert!(tagged.name().starts_with("arg0#"));
        assert_ne!(fv, ex);
    }

    #[test]
    fn freshen_bind_renames_clashing_quantifiers() {
        let mut env = Env::new();
        env.add_typ_var(kid("n"), Kind::Int);

        let bind = Bind::new(
            TypQuant::new(
                vec![KindedId::int(kid("n"))],
                vec![NConstraint::gteq(Nexp::Var(kid("n")), Nexp::constant(0))],
            ),
            Typ::atom(Nexp::Var(kid("n"))),
        );
        let freshened = env.freshen_bind(&bind);
        let renamed = freshened.quant.kids[0].kid.clone();
        assert_ne!(renamed, kid("n"));
        assert_eq!(freshened.typ, Typ::atom(Nexp::Var(renamed.clone())));
        assert_eq!(
            freshened.quant.constraints[0],
            NConstraint::gteq(Nexp::Var(renamed), Nexp::constant(0))
        );
    }

    #[test]
    fn type_synonyms_expand_with_their_arguments() {
        let mut env = Env::new();
        env.add_typ_synonym(
            id("word"),
            TypQuant::new(vec![KindedId::int(kid("n"))], Vec::new()),
            TypArg::Typ(Typ::bits(Nexp::Var(kid("n")))),
        );
        let expanded = env
            .expand_synonyms(&Typ::App(id("word"), vec![TypArg::Nexp(Nexp::constant(8))]))
            .unwrap();
        assert_eq!(expanded, Typ::bits(Nexp::constant(8)));
    }

    #[test]
    fn constraint_synonyms_expand_recursively() {
        let mut env = Env::new();
        env.add_constraint_synonym(
            id("small"),
            vec![KindedId::int(kid("n"))],
            NConstraint::lteq(Nexp::Var(kid("n")), Nexp::constant(10)),
        );
        let expanded = env
            .expand_constraint_synonyms(&NConstraint::App(
                id("small"),
                vec![TypArg::Nexp(Nexp::constant(5))],
            ))
            .unwrap();
        assert_eq!(
            expanded,
            NConstraint::lteq(Nexp::constant(5), Nexp::constant(10))
        );
    }

    #[test]
    fn numeric_applications_need_solver_symbols() {
        let mut env = Env::new();
        let nexp = Nexp::App(id("popcount"), vec![Nexp::constant(3)]);
        assert!(env.wf_nexp(&nexp).is_err());
        env.add_smt_op(id("popcount"), "popcount");
        assert!(env.wf_nexp(&nexp).is_ok());
    }

    #[test]
    fn bidirectional_types_reject_equal_sides() {
        let env = Env::new();
        let same = Typ::Bidir(Box::new(Typ::int()), Box::new(Typ::int()));
        assert!(env.wf_typ(&same).is_err());
        let fine = Typ::Bidir(Box::new(Typ::int()), Box::new(Typ::bool()));
        assert!(env.wf_typ(&fine).is_ok());
    }

    #[test]
    fn existentials_need_binders() {
        let env = Env::new();
        let empty = Typ::Exist(
            Vec::new(),
            NConstraint::True,
            Box::new(Typ::int()),
        );
        assert!(env.wf_typ(&empty).is_err());
    }

    #[test]
    fn flow_narrowing_changes_only_the_visible_type() {
        let mut env = Env::new();
        env.add_local(id("x"), Mut::Immutable, Typ::int());
        env.add_flow(id("x"), Typ::atom(Nexp::constant(3)));
        let (_, visible) = env.get_local(&id("x")).unwrap();
        assert_eq!(visible, Typ::atom(Nexp::constant(3)));

        // Rebinding clears the narrowing.
        env.add_local(id("x"), Mut::Immutable, Typ::int());
        let (_, visible) = env.get_local(&id("x")).unwrap();
        assert_eq!(visible, Typ::int());
    }

    #[test]
    fn mappings_synthesise_their_auxiliary_specs() {
        let mut env = Env::new();
        env.add_mapping(id("m"), TypQuant::empty(), Typ::bits(Nexp::constant(2)), Typ::bool());
        for name in ["m_forwards", "m_backwards", "m_forwards_matches", "m_backwards_matches"] {
            assert!(env.have_val_spec(&id(name)), "missing {}", name);
        }
        assert!(!env.have_val_spec(&id("m_matches_prefix")));
    }
}
