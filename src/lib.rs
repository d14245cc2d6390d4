//! Static semantics engine for the Sail ISA specification language.
//!
//! Sail describes instruction-set architectures with dependently-typed
//! bit-vectors, numeric refinement constraints and effect annotations. This
//! crate is the core of the toolchain: a bidirectional type checker that
//! validates a parsed program, elaborates implicit coercions, resolves
//! overloads, discharges numeric side conditions through an external SMT
//! solver, and produces a fully-annotated AST for downstream translators.
//!
//! The checker is structured _bidirectionally_: checking and inference are
//! mutually recursive, interleaved with unification, coercion search and
//! quantifier instantiation. Numeric subtype obligations that survive a
//! syntactic fast path are framed as satisfiability queries and handed to an
//! external solver.
//!
//! Parsing, pattern-completeness analysis, bitfield expansion and the
//! back-end translators are external collaborators; they appear here only
//! through the ASTs this crate consumes and produces.

// Supporting modules
pub mod ast;
pub mod reporting;
pub mod source;

// The checker, leaves first
pub mod check;
pub mod driver;
pub mod env;
pub mod solver;
pub mod subtype;
pub mod unify;

// Public exports
pub use crate::check::{check_exp, infer_exp};
pub use crate::driver::{check_defs, CheckedDef};
pub use crate::env::Env;
pub use crate::reporting::TypeError;

use std::path::PathBuf;

/// Process-wide checker settings.
///
/// These are fixed for the duration of a checking session and read-only from
/// the checker's perspective; they are shared through the [`Env`] rather than
/// held in global state so that independent sessions stay reproducible.
#[derive(Debug, Clone)]
pub struct Options {
    /// Trace depth: 0 silent, 1 tree trace, 2 verbose trace. Mapped onto the
    /// `log` crate's `debug`/`trace` levels.
    pub tc_debug: u8,
    /// Skip effect-set checks.
    pub no_effects: bool,
    /// Skip vector-index bounds obligations on l-expressions.
    pub no_lexp_bounds_check: bool,
    /// Permit type-level constraint synonyms.
    pub constraint_synonyms: bool,
    /// Expand type synonyms eagerly in value specifications.
    pub expand_valspec: bool,
    /// The external solver supports integer `div`/`mod`, enabling the
    /// division strategy for multiplication equations during unification.
    pub smt_div: bool,
    /// Path to the solver binary.
    pub solver_path: PathBuf,
    /// Solver wall-clock budget per query, in milliseconds. Timeouts are
    /// reported as unknown.
    pub solver_timeout_ms: u32,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            tc_debug: 0,
            no_effects: false,
            no_lexp_bounds_check: false,
            constraint_synonyms: false,
            expand_valspec: false,
            smt_div: false,
            solver_path: PathBuf::from("z3"),
            solver_timeout_ms: 1000,
        }
    }
}
