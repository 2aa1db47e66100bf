//! schemexp - Continuation-based Scheme evaluation core
//!
//! This crate implements the execution engine of a Scheme-family runtime:
//! evaluating parsed forms, managing lexical bindings, applying procedures,
//! and supporting first-class continuations (`call/cc`) with proper tail
//! calls. The "call stack" is an explicit chain of [`evaluator::Action`]
//! nodes threaded through a [`evaluator::Continuation`] cursor, so Scheme
//! recursion never consumes native stack, continuations are ordinary data,
//! and reinstating one is a pointer rebind rather than a stack unwind.
//!
//! ```scheme
//! ;; proper tail calls: constant space however long the loop runs
//! (define loop (lambda (n) (if (= n 0) 'done (loop (- n 1)))))
//! (loop 1000000)
//!
//! ;; first-class continuations, reentrant
//! (define saved #f)
//! (+ 1 (call/cc (lambda (k) (set! saved k) 1)))  ; => 2
//! (saved 41)                                      ; => 42, again and again
//! ```
//!
//! ## Modules
//!
//! - `entity`: the universal runtime value type and equivalence predicates
//! - `symbol`: interned symbols with process-wide identity
//! - `env`: lexical environment frames and variable storage cells
//! - `evaluator`: the Action/Continuation stepping engine and closure
//!   application protocol
//! - `builtinops`: the primitive-operation registry and global environment
//! - `scheme`: s-expression reader (text to `Entity` trees)

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::entity::Entity;
use crate::symbol::Symbol;

/// Maximum parsing depth to prevent stack overflow on deeply nested input
pub const MAX_PARSE_DEPTH: usize = 64;

/// Rendering detail level, ordered from no output to full internal detail.
///
/// The single piece of cross-cutting configuration the core reacts to:
/// `write`/`Display` include the full source of procedures and rewriters
/// only at `Config` or finer. The setting is process-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Verbosity {
    Off = 0,
    Error = 1,
    Warning = 2,
    Info = 3,
    Config = 4,
    Fine = 5,
    All = 6,
}

static VERBOSITY: AtomicU8 = AtomicU8::new(Verbosity::Info as u8);

/// Set the process-wide rendering detail level.
pub fn set_verbosity(level: Verbosity) {
    VERBOSITY.store(level as u8, Ordering::Relaxed);
}

/// Current process-wide rendering detail level.
pub fn verbosity() -> Verbosity {
    match VERBOSITY.load(Ordering::Relaxed) {
        0 => Verbosity::Off,
        1 => Verbosity::Error,
        2 => Verbosity::Warning,
        3 => Verbosity::Info,
        4 => Verbosity::Config,
        5 => Verbosity::Fine,
        _ => Verbosity::All,
    }
}

/// Categorizes the different kinds of reader failures.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, malformed expressions)
    InvalidSyntax,
    /// Input ended before the expression was complete
    Incomplete,
    /// Expression nesting exceeded the maximum parse depth
    TooDeeplyNested,
    /// Extra input found after a complete, valid expression
    TrailingContent,
}

/// A structured reader error.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    /// Create a ParseError with a kind and message but no found token
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        ParseError {
            kind,
            message: message.into(),
            found: None,
        }
    }

    /// Create a ParseError that records the offending input fragment
    pub fn with_found(
        kind: ParseErrorKind,
        message: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            found: Some(found.into()),
        }
    }
}

/// Error family for the evaluation core.
///
/// Every variant carries the offending [`Entity`] (or [`Symbol`]) for
/// diagnostics. Errors abort the current top-level evaluation and surface to
/// the caller of the eval entry point; side effects performed before the
/// failing step persist, and nothing is rolled back or silently swallowed.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Reader failure, before anything was evaluated
    Parse(ParseError),
    /// A symbol was looked up but no frame binds it
    UnboundVariable(Symbol),
    /// `set!` of a symbol that no frame binds
    UnboundAssignment(Symbol),
    /// A form that cannot be evaluated as a combination (e.g. `()`)
    InvalidCombination(Entity),
    /// Application of a value that is not a procedure
    NotApplicable(Entity),
    /// Procedure application with fewer arguments than formals
    TooFewArguments(Entity),
    /// Procedure application with more arguments than formals
    TooManyArguments(Entity),
    /// A formal-parameter spec (or definition target) of invalid shape
    InvalidFormal(Entity),
    /// Structural access on a value that does not support it (e.g. `(car '())`)
    InvalidAccess(&'static str, Entity),
    /// Error raised from Scheme code via the `error` primitive
    Signaled { message: String, irritant: Entity },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Parse(e) => {
                write!(f, "parse error: {}", e.message)?;
                if let Some(found) = &e.found {
                    write!(f, " (found: {found})")?;
                }
                Ok(())
            }
            Error::UnboundVariable(name) => write!(f, "unbound variable: {name}"),
            Error::UnboundAssignment(name) => write!(f, "set!: unbound variable: {name}"),
            Error::InvalidCombination(e) => write!(f, "invalid combination: {e}"),
            Error::NotApplicable(e) => write!(f, "not a procedure: {e}"),
            Error::TooFewArguments(e) => write!(f, "apply: too few arguments: {e}"),
            Error::TooManyArguments(e) => write!(f, "apply: too many arguments: {e}"),
            Error::InvalidFormal(e) => write!(f, "invalid formal parameter: {e}"),
            Error::InvalidAccess(op, e) => write!(f, "{op}: invalid arguments: {e}"),
            Error::Signaled { message, irritant } => match irritant {
                Entity::Void => write!(f, "error: {message}"),
                other => write!(f, "error: {message} {other}"),
            },
        }
    }
}

impl std::error::Error for Error {}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Parse(e)
    }
}

pub mod builtinops;
pub mod entity;
pub mod env;
pub mod evaluator;
pub mod scheme;
pub mod symbol;
