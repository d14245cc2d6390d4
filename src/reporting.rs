//! The type error taxonomy.
//!
//! Checking functions return these as values; overload and cast search treat
//! them as data and accumulate per-candidate failures. Each error is tagged
//! with the offending source location and can be rendered as a
//! [`Diagnostic`] for terminal output.
//!
//! [`Diagnostic`]: codespan_reporting::diagnostic::Diagnostic

use std::fmt;

use codespan_reporting::diagnostic::{Diagnostic, Label};
use itertools::Itertools;

use crate::ast::{EffectSet, Id, Kid, KindedId, NConstraint, Typ};
use crate::source::{FileId, Span};

/// Everything that can go wrong while checking.
#[derive(Debug, Clone)]
pub enum TypeError {
    /// `found` is not a subtype of `expected` under the recorded constraints.
    Subtype {
        span: Span,
        found: Typ,
        expected: Typ,
        constraints: Vec<NConstraint>,
        /// Locations of the type variables involved.
        var_spans: Vec<(Kid, Span)>,
    },

    /// No registered cast coerces `found` into `expected`; `trigger` is the
    /// original subtype failure, `alternatives` the per-cast failures.
    NoCasts {
        span: Span,
        found: Typ,
        expected: Typ,
        trigger: Box<TypeError>,
        alternatives: Vec<(Id, TypeError)>,
    },

    /// No overload candidate for `id` typechecks.
    NoOverloading {
        span: Span,
        id: Id,
        alternatives: Vec<(Id, TypeError)>,
    },

    /// Instantiating a call to `id` left universal variables unbound.
    UnresolvedQuants {
        span: Span,
        id: Id,
        quants: Vec<KindedId>,
        locals: Vec<(Id, Typ)>,
        constraints: Vec<NConstraint>,
    },

    /// A named numeric constant was not found.
    NoNumIdent { span: Span, id: Id },

    /// The oracle could not establish a required constraint. Solver
    /// `Unknown` results land here, not in an internal error.
    CouldNotProve {
        span: Span,
        constraint: NConstraint,
        constraints: Vec<NConstraint>,
    },

    /// An identifier is not bound in the environment.
    UnboundId { span: Span, id: Id },

    /// A type variable is not bound in the quantifier or environment.
    UnboundKid { span: Span, kid: Kid },

    /// Two types clashed structurally, before any subtype reasoning.
    Mismatch {
        span: Span,
        expected: Typ,
        found: Typ,
    },

    /// A definition or specification was given twice.
    Redefinition { span: Span, id: Id },

    /// A function body performs effects its specification does not declare.
    EffectMismatch {
        span: Span,
        declared: EffectSet,
        inferred: EffectSet,
    },

    /// Catch-all with a free-form message.
    Other { span: Span, message: String },
}

impl TypeError {
    pub fn other(span: Span, message: impl Into<String>) -> TypeError {
        TypeError::Other {
            span,
            message: message.into(),
        }
    }

    /// The source location the error is tagged with.
    pub fn span(&self) -> Span {
        match self {
            TypeError::Subtype { span, .. }
            | TypeError::NoCasts { span, .. }
            | TypeError::NoOverloading { span, .. }
            | TypeError::UnresolvedQuants { span, .. }
            | TypeError::NoNumIdent { span, .. }
            | TypeError::CouldNotProve { span, .. }
            | TypeError::UnboundId { span, .. }
            | TypeError::UnboundKid { span, .. }
            | TypeError::Mismatch { span, .. }
            | TypeError::Redefinition { span, .. }
            | TypeError::EffectMismatch { span, .. }
            | TypeError::Other { span, .. } => *span,
        }
    }

    /// Re-tag the error with a location, used when an inner error surfaces
    /// at an enclosing definition.
    pub fn with_span(mut self, new_span: Span) -> TypeError {
        match &mut self {
            TypeError::Subtype { span, .. }
            | TypeError::NoCasts { span, .. }
            | TypeError::NoOverloading { span, .. }
            | TypeError::UnresolvedQuants { span, .. }
            | TypeError::NoNumIdent { span, .. }
            | TypeError::CouldNotProve { span, .. }
            | TypeError::UnboundId { span, .. }
            | TypeError::UnboundKid { span, .. }
            | TypeError::Mismatch { span, .. }
            | TypeError::Redefinition { span, .. }
            | TypeError::EffectMismatch { span, .. }
            | TypeError::Other { span, .. } => {
                if matches!(span, Span::Empty) {
                    *span = new_span;
                }
            }
        }
        self
    }

    /// Render for terminal output.
    pub fn to_diagnostic(&self) -> Diagnostic<FileId> {
        let file_id = self.span().file_id().unwrap_or(0);
        let primary = Label::primary(file_id, self.span().byte_range());

        match self {
            TypeError::Subtype {
                found,
                expected,
                constraints,
                var_spans,
                ..
            } => {
                let mut labels = vec![primary
                    .with_message(format!("`{}` is not a subtype of `{}`", found, expected))];
                for (kid, span) in var_spans {
                    if let Some(file_id) = span.file_id() {
                        labels.push(
                            Label::secondary(file_id, span.byte_range())
                                .with_message(format!("`{}` bound here", kid)),
                        );
                    }
                }
                Diagnostic::error()
                    .with_message("subtype check failed")
                    .with_labels(labels)
                    .with_notes(constraint_notes(constraints))
            }
            TypeError::NoCasts {
                found,
                expected,
                trigger,
                alternatives,
                ..
            } => Diagnostic::error()
                .with_message(format!("no cast from `{}` to `{}`", found, expected))
                .with_labels(vec![primary.with_message("no implicit coercion applies")])
                .with_notes(
                    std::iter::once(format!("because: {}", trigger))
                        .chain(
                            alternatives
                                .iter()
                                .map(|(id, err)| format!("cast `{}` failed: {}", id, err)),
                        )
                        .collect(),
                ),
            TypeError::NoOverloading {
                id, alternatives, ..
            } => Diagnostic::error()
                .with_message(format!("no overloading for `{}` typechecks", id))
                .with_labels(vec![primary.with_message("no candidate applies")])
                .with_notes(
                    alternatives
                        .iter()
                        .map(|(id, err)| format!("candidate `{}` failed: {}", id, err))
                        .collect(),
                ),
            TypeError::UnresolvedQuants {
                id,
                quants,
                locals,
                constraints,
                ..
            } => Diagnostic::error()
                .with_message(format!(
                    "could not resolve quantifiers for `{}`: {}",
                    id,
                    quants.iter().map(|kinded| &kinded.kid).format(", "),
                ))
                .with_labels(vec![primary.with_message("instantiation incomplete")])
                .with_notes(
                    locals
                        .iter()
                        .map(|(id, typ)| format!("local `{}` : `{}`", id, typ))
                        .chain(constraint_notes(constraints))
                        .collect(),
                ),
            TypeError::NoNumIdent { id, .. } => Diagnostic::error()
                .with_message(format!("no numeric constant named `{}`", id))
                .with_labels(vec![primary]),
            TypeError::CouldNotProve {
                constraint,
                constraints,
                ..
            } => Diagnostic::error()
                .with_message(format!("could not prove `{}`", constraint))
                .with_labels(vec![primary])
                .with_notes(constraint_notes(constraints)),
            TypeError::UnboundId { id, .. } => Diagnostic::error()
                .with_message(format!("cannot find `{}` in this scope", id))
                .with_labels(vec![primary.with_message("not found in this scope")]),
            TypeError::UnboundKid { kid, .. } => Diagnostic::error()
                .with_message(format!("type variable `{}` is not bound", kid))
                .with_labels(vec![primary]),
            TypeError::Mismatch {
                expected, found, ..
            } => Diagnostic::error()
                .with_message("type mismatch")
                .with_labels(vec![
                    primary.with_message(format!("expected `{}`, found `{}`", expected, found))
                ])
                .with_notes(vec![[
                    format!("expected `{}`", expected),
                    format!("   found `{}`", found),
                ]
                .join("\n")]),
            TypeError::Redefinition { id, .. } => Diagnostic::error()
                .with_message(format!("`{}` is defined multiple times", id))
                .with_labels(vec![primary.with_message("redefined here")]),
            TypeError::EffectMismatch {
                declared, inferred, ..
            } => Diagnostic::error()
                .with_message("undeclared effects")
                .with_labels(vec![primary.with_message(format!(
                    "body has effect `{}`, specification declares `{}`",
                    inferred, declared
                ))]),
            TypeError::Other { message, .. } => Diagnostic::error()
                .with_message(message.clone())
                .with_labels(vec![primary]),
        }
    }
}

fn constraint_notes(constraints: &[NConstraint]) -> Vec<String> {
    if constraints.is_empty() {
        vec!["no constraints in scope".to_owned()]
    } else {
        vec![format!(
            "constraints in scope: {}",
            constraints.iter().format(", "),
        )]
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeError::Subtype {
                found, expected, ..
            } => write!(f, "`{}` is not a subtype of `{}`", found, expected),
            TypeError::NoCasts {
                found, expected, ..
            } => write!(f, "no cast from `{}` to `{}`", found, expected),
            TypeError::NoOverloading { id, .. } => {
                write!(f, "no overloading for `{}` typechecks", id)
            }
            TypeError::UnresolvedQuants { id, quants, .. } => write!(
                f,
                "could not resolve quantifiers for `{}`: {}",
                id,
                quants.iter().map(|kinded| &kinded.kid).format(", "),
            ),
            TypeError::NoNumIdent { id, .. } => {
                write!(f, "no numeric constant named `{}`", id)
            }
            TypeError::CouldNotProve { constraint, .. } => {
                write!(f, "could not prove `{}`", constraint)
            }
            TypeError::UnboundId { id, .. } => write!(f, "cannot find `{}` in this scope", id),
            TypeError::UnboundKid { kid, .. } => {
                write!(f, "type variable `{}` is not bound", kid)
            }
            TypeError::Mismatch {
                expected, found, ..
            } => write!(f, "expected `{}`, found `{}`", expected, found),
            TypeError::Redefinition { id, .. } => {
                write!(f, "`{}` is defined multiple times", id)
            }
            TypeError::EffectMismatch {
                declared, inferred, ..
            } => write!(
                f,
                "body has effect `{}`, specification declares `{}`",
                inferred, declared
            ),
            TypeError::Other { message, .. } => f.write_str(message),
        }
    }
}

impl std::error::Error for TypeError {}
