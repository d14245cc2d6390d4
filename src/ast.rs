//! The Sail term algebra.
//!
//! Types, numeric expressions, constraints, patterns, expressions and
//! l-expressions, in the shape the upstream parser produces them. Identifiers
//! compare by their string payload only, so derived structural equality is
//! location-stripped everywhere.
//!
//! Substitution, free-variable computation and the numeric simplifier live in
//! [`subst`]; the pretty printer lives in [`pretty`].

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use num_bigint::BigInt;

use crate::env::Env;
use crate::source::Span;

pub mod pretty;
pub mod subst;

/// A plain identifier, or the de-infixed form of an operator name.
#[derive(Debug, Clone)]
pub struct Id {
    name: String,
    span: Span,
}

impl Id {
    pub fn new(name: impl Into<String>, span: Span) -> Id {
        Id {
            name: name.into(),
            span,
        }
    }

    /// An identifier minted by the checker itself, with no source location.
    pub fn synthetic(name: impl Into<String>) -> Id {
        Id::new(name, Span::Empty)
    }

    /// The de-infixed form of an operator name, e.g. `operator <=`.
    pub fn operator(name: impl Into<String>, span: Span) -> Id {
        Id::new(format!("operator {}", name.into()), span)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn span(&self) -> Span {
        self.span
    }
}

impl PartialEq for Id {
    fn eq(&self, other: &Id) -> bool {
        self.name == other.name
    }
}

impl Eq for Id {}

impl PartialOrd for Id {
    fn partial_cmp(&self, other: &Id) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Id {
    fn cmp(&self, other: &Id) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}

impl Hash for Id {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A kinded identifier: a type-level variable such as `'n`.
///
/// The leading tick is not stored. Names minted by the checker carry reserved
/// prefixes (`fv#`, `ex#`) that the concrete syntax cannot produce.
#[derive(Debug, Clone)]
pub struct Kid {
    name: String,
    span: Span,
}

impl Kid {
    pub fn new(name: impl Into<String>, span: Span) -> Kid {
        Kid {
            name: name.into(),
            span,
        }
    }

    pub fn synthetic(name: impl Into<String>) -> Kid {
        Kid::new(name, Span::Empty)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn span(&self) -> Span {
        self.span
    }

    /// True for names minted by the checker rather than written by the user.
    pub fn is_fresh(&self) -> bool {
        self.name.contains('#')
    }
}

impl PartialEq for Kid {
    fn eq(&self, other: &Kid) -> bool {
        self.name == other.name
    }
}

impl Eq for Kid {}

impl PartialOrd for Kid {
    fn partial_cmp(&self, other: &Kid) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Kid {
    fn cmp(&self, other: &Kid) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}

impl Hash for Kid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state)
    }
}

impl fmt::Display for Kid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}", self.name)
    }
}

/// Kinds classify type-level variables.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Kind {
    Type,
    Int,
    Order,
    Effect,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Type => f.write_str("Type"),
            Kind::Int => f.write_str("Int"),
            Kind::Order => f.write_str("Order"),
            Kind::Effect => f.write_str("Effect"),
        }
    }
}

/// A kinded variable binding, as it appears in quantifiers and existentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindedId {
    pub kid: Kid,
    pub kind: Kind,
}

impl KindedId {
    pub fn new(kid: Kid, kind: Kind) -> KindedId {
        KindedId { kid, kind }
    }

    pub fn int(kid: Kid) -> KindedId {
        KindedId::new(kid, Kind::Int)
    }
}

/// Numeric expressions over unbounded integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nexp {
    /// A named numeric constant.
    Id(Id),
    /// An `Int`-kinded variable.
    Var(Kid),
    Constant(BigInt),
    /// An uninterpreted named application.
    App(Id, Vec<Nexp>),
    Sum(Box<Nexp>, Box<Nexp>),
    Minus(Box<Nexp>, Box<Nexp>),
    Times(Box<Nexp>, Box<Nexp>),
    /// `2 ^ e`
    Exp(Box<Nexp>),
    Neg(Box<Nexp>),
}

impl Nexp {
    pub fn constant(n: impl Into<BigInt>) -> Nexp {
        Nexp::Constant(n.into())
    }

    pub fn var(kid: Kid) -> Nexp {
        Nexp::Var(kid)
    }

    pub fn sum(lhs: Nexp, rhs: Nexp) -> Nexp {
        Nexp::Sum(Box::new(lhs), Box::new(rhs))
    }

    pub fn minus(lhs: Nexp, rhs: Nexp) -> Nexp {
        Nexp::Minus(Box::new(lhs), Box::new(rhs))
    }

    pub fn times(lhs: Nexp, rhs: Nexp) -> Nexp {
        Nexp::Times(Box::new(lhs), Box::new(rhs))
    }

    pub fn pow2(e: Nexp) -> Nexp {
        Nexp::Exp(Box::new(e))
    }

    pub fn neg(e: Nexp) -> Nexp {
        Nexp::Neg(Box::new(e))
    }

    /// The constant payload, if this is a literal.
    pub fn as_constant(&self) -> Option<&BigInt> {
        match self {
            Nexp::Constant(n) => Some(n),
            _ => None,
        }
    }
}

/// Numeric constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NConstraint {
    Equal(Nexp, Nexp),
    NotEqual(Nexp, Nexp),
    /// `lhs <= rhs`
    BoundedLe(Nexp, Nexp),
    /// `lhs >= rhs`
    BoundedGe(Nexp, Nexp),
    /// `kid in {n1, ..., nk}`
    Set(Kid, Vec<BigInt>),
    Or(Box<NConstraint>, Box<NConstraint>),
    And(Box<NConstraint>, Box<NConstraint>),
    True,
    False,
    /// Application of a constraint synonym.
    App(Id, Vec<TypArg>),
}

impl NConstraint {
    pub fn eq(lhs: Nexp, rhs: Nexp) -> NConstraint {
        NConstraint::Equal(lhs, rhs)
    }

    pub fn neq(lhs: Nexp, rhs: Nexp) -> NConstraint {
        NConstraint::NotEqual(lhs, rhs)
    }

    pub fn lteq(lhs: Nexp, rhs: Nexp) -> NConstraint {
        NConstraint::BoundedLe(lhs, rhs)
    }

    pub fn gteq(lhs: Nexp, rhs: Nexp) -> NConstraint {
        NConstraint::BoundedGe(lhs, rhs)
    }

    pub fn and(lhs: NConstraint, rhs: NConstraint) -> NConstraint {
        match (lhs, rhs) {
            (NConstraint::True, rhs) => rhs,
            (lhs, NConstraint::True) => lhs,
            (lhs, rhs) => NConstraint::And(Box::new(lhs), Box::new(rhs)),
        }
    }

    pub fn or(lhs: NConstraint, rhs: NConstraint) -> NConstraint {
        NConstraint::Or(Box::new(lhs), Box::new(rhs))
    }

    /// Conjoin a list of constraints, dropping trivial `true`s.
    pub fn conj(ncs: impl IntoIterator<Item = NConstraint>) -> NConstraint {
        ncs.into_iter().fold(NConstraint::True, NConstraint::and)
    }
}

/// Bit-vector index direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Order {
    Var(Kid),
    Inc,
    Dec,
}

/// Types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Typ {
    /// A base type identifier, e.g. `int` or a user-declared type.
    Id(Id),
    /// A `Type`-kinded variable.
    Var(Kid),
    /// A function type with its effect set.
    Fn(Vec<Typ>, Box<Typ>, EffectSet),
    /// A bidirectional (mapping) type `T1 <-> T2`.
    Bidir(Box<Typ>, Box<Typ>),
    Tuple(Vec<Typ>),
    /// Application of a type constructor to type arguments.
    App(Id, Vec<TypArg>),
    /// An existential `{'k1 ... 'kn, NC. T}`.
    Exist(Vec<KindedId>, NConstraint, Box<Typ>),
    /// Stands in for a not-yet-determined type during mapping-clause
    /// elaboration. Never well-formed outside of it.
    Unknown,
}

impl Typ {
    pub fn id(name: &str) -> Typ {
        Typ::Id(Id::synthetic(name))
    }

    pub fn unit() -> Typ {
        Typ::id("unit")
    }

    pub fn bool() -> Typ {
        Typ::id("bool")
    }

    pub fn bit() -> Typ {
        Typ::id("bit")
    }

    pub fn int() -> Typ {
        Typ::id("int")
    }

    pub fn nat() -> Typ {
        Typ::id("nat")
    }

    pub fn string() -> Typ {
        Typ::id("string")
    }

    pub fn atom(nexp: Nexp) -> Typ {
        Typ::App(Id::synthetic("atom"), vec![TypArg::Nexp(nexp)])
    }

    pub fn range(lo: Nexp, hi: Nexp) -> Typ {
        Typ::App(
            Id::synthetic("range"),
            vec![TypArg::Nexp(lo), TypArg::Nexp(hi)],
        )
    }

    pub fn bits(len: Nexp) -> Typ {
        Typ::App(Id::synthetic("bits"), vec![TypArg::Nexp(len)])
    }

    pub fn vector(len: Nexp, order: Order, elem: Typ) -> Typ {
        Typ::App(
            Id::synthetic("vector"),
            vec![TypArg::Nexp(len), TypArg::Order(order), TypArg::Typ(elem)],
        )
    }

    pub fn option(inner: Typ) -> Typ {
        Typ::App(Id::synthetic("option"), vec![TypArg::Typ(inner)])
    }

    pub fn register(inner: Typ) -> Typ {
        Typ::App(Id::synthetic("register"), vec![TypArg::Typ(inner)])
    }

    pub fn function(args: Vec<Typ>, ret: Typ, effect: EffectSet) -> Typ {
        Typ::Fn(args, Box::new(ret), effect)
    }

    pub fn tuple(typs: Vec<Typ>) -> Typ {
        Typ::Tuple(typs)
    }

    pub fn exist(kids: Vec<KindedId>, nc: NConstraint, body: Typ) -> Typ {
        Typ::Exist(kids, nc, Box::new(body))
    }

    /// Strip a leading existential, returning its parts.
    pub fn unwrap_exist(&self) -> (Vec<KindedId>, NConstraint, &Typ) {
        match self {
            Typ::Exist(kids, nc, body) => (kids.clone(), nc.clone(), body),
            typ => (Vec::new(), NConstraint::True, typ),
        }
    }

    pub fn is_exist(&self) -> bool {
        matches!(self, Typ::Exist(..))
    }
}

/// An argument to a type constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypArg {
    Nexp(Nexp),
    Typ(Typ),
    Order(Order),
}

impl TypArg {
    pub fn kind(&self) -> Kind {
        match self {
            TypArg::Nexp(_) => Kind::Int,
            TypArg::Typ(_) => Kind::Type,
            TypArg::Order(_) => Kind::Order,
        }
    }
}

/// A universal quantifier: kinded variable bindings plus constraints on them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypQuant {
    pub kids: Vec<KindedId>,
    pub constraints: Vec<NConstraint>,
}

impl TypQuant {
    pub fn empty() -> TypQuant {
        TypQuant::default()
    }

    pub fn new(kids: Vec<KindedId>, constraints: Vec<NConstraint>) -> TypQuant {
        TypQuant { kids, constraints }
    }

    pub fn is_empty(&self) -> bool {
        self.kids.is_empty() && self.constraints.is_empty()
    }
}

/// The closed effect vocabulary.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Effect {
    /// Read a register.
    ReadReg,
    /// Write a register.
    WriteReg,
    /// Read memory.
    ReadMem,
    /// Write memory.
    WriteMem,
    /// Announce a memory value.
    WriteMemValue,
    /// Read a configuration value.
    Config,
    /// Possible exception or exit.
    Escape,
    /// Undefined-value generation.
    Undefined,
    /// Non-determinism.
    Nondet,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Effect::ReadReg => f.write_str("rreg"),
            Effect::WriteReg => f.write_str("wreg"),
            Effect::ReadMem => f.write_str("rmem"),
            Effect::WriteMem => f.write_str("wmem"),
            Effect::WriteMemValue => f.write_str("wmv"),
            Effect::Config => f.write_str("config"),
            Effect::Escape => f.write_str("escape"),
            Effect::Undefined => f.write_str("undef"),
            Effect::Nondet => f.write_str("nondet"),
        }
    }
}

/// A finite set of effects. Union is set union; equality is set equality.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EffectSet {
    effects: BTreeSet<Effect>,
}

impl EffectSet {
    pub fn pure() -> EffectSet {
        EffectSet::default()
    }

    pub fn single(effect: Effect) -> EffectSet {
        EffectSet {
            effects: BTreeSet::from([effect]),
        }
    }

    pub fn of(effects: &[Effect]) -> EffectSet {
        EffectSet {
            effects: effects.iter().copied().collect(),
        }
    }

    pub fn is_pure(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn contains(&self, effect: Effect) -> bool {
        self.effects.contains(&effect)
    }

    pub fn union(&self, other: &EffectSet) -> EffectSet {
        EffectSet {
            effects: self.effects.union(&other.effects).copied().collect(),
        }
    }

    pub fn union_with(&mut self, other: &EffectSet) {
        self.effects.extend(other.effects.iter().copied());
    }

    pub fn insert(&mut self, effect: Effect) {
        self.effects.insert(effect);
    }

    pub fn is_subset(&self, other: &EffectSet) -> bool {
        self.effects.is_subset(&other.effects)
    }

    pub fn iter(&self) -> impl Iterator<Item = Effect> + '_ {
        self.effects.iter().copied()
    }
}

/// Literals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lit {
    Unit,
    Zero,
    One,
    True,
    False,
    Num(BigInt),
    /// A binary vector literal, e.g. `0b0101`, one char per bit.
    Bin(String),
    /// A hex vector literal, e.g. `0xff`, four bits per char.
    Hex(String),
    String(String),
    Undefined,
}

/// The annotation attached to every checked node.
///
/// `env` is the environment the node's sub-expressions were checked in, `typ`
/// the type the node has, and `expected` the type it was checked against, if
/// checking mode supplied one.
#[derive(Debug, Clone)]
pub struct Annot {
    pub env: Env,
    pub typ: Typ,
    pub effect: EffectSet,
    pub expected: Option<Typ>,
}

impl Annot {
    pub fn new(env: Env, typ: Typ, effect: EffectSet) -> Annot {
        Annot {
            env,
            typ,
            effect,
            expected: None,
        }
    }

    pub fn with_expected(mut self, expected: Typ) -> Annot {
        self.expected = Some(expected);
        self
    }
}

/// Patterns.
#[derive(Debug, Clone)]
pub struct Pat {
    pub kind: PatKind,
    pub span: Span,
    pub annot: Option<Annot>,
}

impl Pat {
    pub fn new(kind: PatKind, span: Span) -> Pat {
        Pat {
            kind,
            span,
            annot: None,
        }
    }

    pub fn with_annot(mut self, annot: Annot) -> Pat {
        self.annot = Some(annot);
        self
    }

    pub fn typ(&self) -> Option<&Typ> {
        self.annot.as_ref().map(|annot| &annot.typ)
    }
}

#[derive(Debug, Clone)]
pub enum PatKind {
    Lit(Lit),
    Wild,
    /// Binds an identifier, or matches an enumeration member of that name.
    Id(Id),
    /// A type-ascribed pattern `pat : typ`.
    Typ(Typ, Box<Pat>),
    As(Box<Pat>, Id),
    Tuple(Vec<Pat>),
    /// A constructor or mapping application pattern.
    App(Id, Vec<Pat>),
    Vector(Vec<Pat>),
}

/// Expressions.
#[derive(Debug, Clone)]
pub struct Exp {
    pub kind: ExpKind,
    pub span: Span,
    pub annot: Option<Annot>,
}

impl Exp {
    pub fn new(kind: ExpKind, span: Span) -> Exp {
        Exp {
            kind,
            span,
            annot: None,
        }
    }

    pub fn with_annot(mut self, annot: Annot) -> Exp {
        self.annot = Some(annot);
        self
    }

    /// The type this node was assigned by the checker.
    pub fn typ(&self) -> Option<&Typ> {
        self.annot.as_ref().map(|annot| &annot.typ)
    }

    /// The effect this node was assigned by the checker.
    pub fn effect(&self) -> EffectSet {
        self.annot
            .as_ref()
            .map(|annot| annot.effect.clone())
            .unwrap_or_default()
    }

    /// Strip annotations from this node and everything below it, yielding the
    /// expression as the parser produced it.
    pub fn strip_annots(&self) -> Exp {
        let kind = match &self.kind {
            ExpKind::Block(exps) => ExpKind::Block(exps.iter().map(Exp::strip_annots).collect()),
            ExpKind::Id(id) => ExpKind::Id(id.clone()),
            ExpKind::Lit(lit) => ExpKind::Lit(lit.clone()),
            ExpKind::Cast(typ, exp) => {
                ExpKind::Cast(typ.clone(), Box::new(exp.strip_annots()))
            }
            ExpKind::App(id, args) => {
                ExpKind::App(id.clone(), args.iter().map(Exp::strip_annots).collect())
            }
            ExpKind::Tuple(exps) => ExpKind::Tuple(exps.iter().map(Exp::strip_annots).collect()),
            ExpKind::If(cond, then_exp, else_exp) => ExpKind::If(
                Box::new(cond.strip_annots()),
                Box::new(then_exp.strip_annots()),
                Box::new(else_exp.strip_annots()),
            ),
            ExpKind::Match(scrutinee, arms) => ExpKind::Match(
                Box::new(scrutinee.strip_annots()),
                arms.iter()
                    .map(|arm| PatExp {
                        pat: arm.pat.strip_annots(),
                        exp: arm.exp.strip_annots(),
                    })
                    .collect(),
            ),
            ExpKind::Let(pat, bind, body) => ExpKind::Let(
                pat.strip_annots(),
                Box::new(bind.strip_annots()),
                Box::new(body.strip_annots()),
            ),
            ExpKind::Assign(lexp, exp) => {
                ExpKind::Assign(Box::new(lexp.strip_annots()), Box::new(exp.strip_annots()))
            }
            ExpKind::RecordUpdate(exp, fields) => ExpKind::RecordUpdate(
                Box::new(exp.strip_annots()),
                fields
                    .iter()
                    .map(|(id, exp)| (id.clone(), exp.strip_annots()))
                    .collect(),
            ),
            ExpKind::Field(exp, id) => ExpKind::Field(Box::new(exp.strip_annots()), id.clone()),
            ExpKind::Vector(exps) => ExpKind::Vector(exps.iter().map(Exp::strip_annots).collect()),
            ExpKind::Assert(cond, msg) => {
                ExpKind::Assert(Box::new(cond.strip_annots()), Box::new(msg.strip_annots()))
            }
            ExpKind::Exit(exp) => ExpKind::Exit(Box::new(exp.strip_annots())),
            ExpKind::Return(exp) => ExpKind::Return(Box::new(exp.strip_annots())),
            ExpKind::Ref(id) => ExpKind::Ref(id.clone()),
        };
        Exp::new(kind, self.span)
    }
}

#[derive(Debug, Clone)]
pub enum ExpKind {
    Block(Vec<Exp>),
    /// A variable, enumeration member, or nullary union constructor.
    Id(Id),
    Lit(Lit),
    /// A type ascription `exp : typ`, also the seam where implicit coercions
    /// are woven in.
    Cast(Typ, Box<Exp>),
    /// Application of a function, union constructor, or mapping.
    App(Id, Vec<Exp>),
    Tuple(Vec<Exp>),
    If(Box<Exp>, Box<Exp>, Box<Exp>),
    Match(Box<Exp>, Vec<PatExp>),
    Let(Pat, Box<Exp>, Box<Exp>),
    Assign(Box<LExp>, Box<Exp>),
    /// `{ exp with field = e, ... }`
    RecordUpdate(Box<Exp>, Vec<(Id, Exp)>),
    Field(Box<Exp>, Id),
    Vector(Vec<Exp>),
    /// `assert(cond, msg)`; a pure constraint condition extends the
    /// environment for the rest of the enclosing block.
    Assert(Box<Exp>, Box<Exp>),
    Exit(Box<Exp>),
    Return(Box<Exp>),
    /// A register reference `ref r`.
    Ref(Id),
}

/// One arm of a match expression.
#[derive(Debug, Clone)]
pub struct PatExp {
    pub pat: Pat,
    pub exp: Exp,
}

impl Pat {
    /// Strip annotations from this pattern and everything below it.
    pub fn strip_annots(&self) -> Pat {
        let kind = match &self.kind {
            PatKind::Lit(lit) => PatKind::Lit(lit.clone()),
            PatKind::Wild => PatKind::Wild,
            PatKind::Id(id) => PatKind::Id(id.clone()),
            PatKind::Typ(typ, pat) => PatKind::Typ(typ.clone(), Box::new(pat.strip_annots())),
            PatKind::As(pat, id) => PatKind::As(Box::new(pat.strip_annots()), id.clone()),
            PatKind::Tuple(pats) => PatKind::Tuple(pats.iter().map(Pat::strip_annots).collect()),
            PatKind::App(id, pats) => {
                PatKind::App(id.clone(), pats.iter().map(Pat::strip_annots).collect())
            }
            PatKind::Vector(pats) => PatKind::Vector(pats.iter().map(Pat::strip_annots).collect()),
        };
        Pat::new(kind, self.span)
    }
}

/// L-expressions: the left-hand sides of assignments.
#[derive(Debug, Clone)]
pub struct LExp {
    pub kind: LExpKind,
    pub span: Span,
    pub annot: Option<Annot>,
}

impl LExp {
    pub fn new(kind: LExpKind, span: Span) -> LExp {
        LExp {
            kind,
            span,
            annot: None,
        }
    }

    pub fn with_annot(mut self, annot: Annot) -> LExp {
        self.annot = Some(annot);
        self
    }

    pub fn strip_annots(&self) -> LExp {
        let kind = match &self.kind {
            LExpKind::Id(id) => LExpKind::Id(id.clone()),
            LExpKind::Typ(typ, id) => LExpKind::Typ(typ.clone(), id.clone()),
            LExpKind::Tuple(lexps) => {
                LExpKind::Tuple(lexps.iter().map(LExp::strip_annots).collect())
            }
            LExpKind::VectorIndex(lexp, index) => {
                LExpKind::VectorIndex(Box::new(lexp.strip_annots()), Box::new(index.strip_annots()))
            }
            LExpKind::VectorRange(lexp, lo, hi) => LExpKind::VectorRange(
                Box::new(lexp.strip_annots()),
                lo.strip_annots(),
                hi.strip_annots(),
            ),
            LExpKind::Field(lexp, id) => {
                LExpKind::Field(Box::new(lexp.strip_annots()), id.clone())
            }
            LExpKind::Deref(exp) => LExpKind::Deref(exp.strip_annots()),
            LExpKind::Memory(id, args) => {
                LExpKind::Memory(id.clone(), args.iter().map(Exp::strip_annots).collect())
            }
        };
        LExp::new(kind, self.span)
    }
}

#[derive(Debug, Clone)]
pub enum LExpKind {
    /// A register, a mutable local, or a fresh binding.
    Id(Id),
    /// A declared-type binding `(typ) id`.
    Typ(Typ, Id),
    Tuple(Vec<LExp>),
    VectorIndex(Box<LExp>, Box<Exp>),
    VectorRange(Box<LExp>, Exp, Exp),
    Field(Box<LExp>, Id),
    /// Assignment through a register reference.
    Deref(Exp),
    /// A memory write `addr_fn(args) = exp`.
    Memory(Id, Vec<Exp>),
}

/// Mutability of a local binding.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mut {
    Immutable,
    Mutable,
}

/// Top-level definitions, in source order.
#[derive(Debug, Clone)]
pub enum Def {
    Type(TypeDef),
    Spec(ValSpec),
    Fun(FunDef),
    Mapping(MapDef),
    /// A top-level let binding.
    Let(Pat, Exp),
    /// Names an arbitrary numeric expression.
    NumConst(Id, Nexp),
    DefaultOrder(Order, Span),
    Overload(Id, Vec<Id>),
    Register(RegisterDef),
}

impl Def {
    pub fn span(&self) -> Span {
        match self {
            Def::Type(td) => td.span(),
            Def::Spec(vs) => vs.span,
            Def::Fun(fd) => fd.span,
            Def::Mapping(md) => md.span,
            Def::Let(pat, _) => pat.span,
            Def::NumConst(id, _) => id.span(),
            Def::DefaultOrder(_, span) => *span,
            Def::Overload(id, _) => id.span(),
            Def::Register(rd) => rd.span,
        }
    }
}

/// A value specification `val id : forall Q. typ`.
#[derive(Debug, Clone)]
pub struct ValSpec {
    pub id: Id,
    pub quant: TypQuant,
    pub typ: Typ,
    /// Registers the function as an implicit cast.
    pub is_cast: bool,
    pub span: Span,
}

/// A function definition.
#[derive(Debug, Clone)]
pub struct FunDef {
    pub id: Id,
    pub clauses: Vec<FunClause>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct FunClause {
    pub pat: Pat,
    pub body: Exp,
    pub span: Span,
}

/// A mapping definition over a bidirectional type.
#[derive(Debug, Clone)]
pub struct MapDef {
    pub id: Id,
    pub clauses: Vec<MapClause>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum MapClause {
    /// `lhs <-> rhs`
    Bidir(Pat, Pat, Span),
    /// `lhs => exp`
    Forwards(Pat, Exp, Span),
    /// `lhs <= exp` (right-to-left)
    Backwards(Pat, Exp, Span),
}

impl MapClause {
    pub fn span(&self) -> Span {
        match self {
            MapClause::Bidir(_, _, span)
            | MapClause::Forwards(_, _, span)
            | MapClause::Backwards(_, _, span) => *span,
        }
    }
}

/// A register declaration, with an optional configuration initialiser.
#[derive(Debug, Clone)]
pub struct RegisterDef {
    pub id: Id,
    pub typ: Typ,
    pub init: Option<Exp>,
    pub span: Span,
}

/// Type-level definitions.
#[derive(Debug, Clone)]
pub enum TypeDef {
    /// A parameterised type synonym.
    Abbrev {
        id: Id,
        quant: TypQuant,
        arg: TypArg,
        span: Span,
    },
    /// A parameterised constraint synonym.
    Constraint {
        id: Id,
        params: Vec<KindedId>,
        body: NConstraint,
        span: Span,
    },
    Record {
        id: Id,
        quant: TypQuant,
        fields: Vec<(Typ, Id)>,
        span: Span,
    },
    Variant {
        id: Id,
        quant: TypQuant,
        ctors: Vec<(Typ, Id)>,
        span: Span,
    },
    Enum {
        id: Id,
        members: Vec<Id>,
        span: Span,
    },
}

impl TypeDef {
    pub fn span(&self) -> Span {
        match self {
            TypeDef::Abbrev { span, .. }
            | TypeDef::Constraint { span, .. }
            | TypeDef::Record { span, .. }
            | TypeDef::Variant { span, .. }
            | TypeDef::Enum { span, .. } => *span,
        }
    }

    pub fn id(&self) -> &Id {
        match self {
            TypeDef::Abbrev { id, .. }
            | TypeDef::Constraint { id, .. }
            | TypeDef::Record { id, .. }
            | TypeDef::Variant { id, .. }
            | TypeDef::Enum { id, .. } => id,
        }
    }
}
