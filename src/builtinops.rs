//! Built-in operations registry.
//!
//! Primitive procedures and syntax operators are defined once, in a single
//! contiguous table, and installed into the global environment by
//! [`create_global_env`]. Every entry uses the same canonical signature:
//!
//! ```rust,ignore
//! fn(args: &[Entity], env: &Environment, cont: &mut Continuation)
//!     -> Result<Option<Entity>, Error>
//! ```
//!
//! mirroring ordinary closures, so both kinds of procedure can be stored
//! interchangeably as values. Primitives follow the engine's two-outcome
//! invoke contract and may rewire the continuation themselves; that is how
//! `call/cc` and `apply` are implemented here, with no special casing in
//! the engine.
//!
//! ## Procedures vs syntax
//!
//! - **Procedures** (`cons`, `+`, `eq?`, ...) receive evaluated arguments.
//! - **Syntax** (`if`, `define`, `lambda`, ...) receive unevaluated
//!   operands and control their own scheduling. Their handlers live in
//!   `evaluator`; the registry only tags and names them.
//!
//! Arity is declared per entry and validated before invocation, so the
//! implementations can index their argument slice directly.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::Error;
use crate::entity::{Entity, Number, cons, list_from_slice, list_to_vec};
use crate::env::Environment;
use crate::evaluator::{
    Arguments, Continuation, apply_procedure, eval_begin, eval_define, eval_define_syntax,
    eval_if, eval_lambda, eval_quote, eval_set,
};
use crate::symbol::Symbol;

/// Canonical primitive signature; see the module docs.
pub type PrimitiveFn =
    fn(&[Entity], &Environment, &mut Continuation) -> Result<Option<Entity>, Error>;

/// Expected number of arguments for a registry entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arity {
    /// Exactly n arguments
    Exact(usize),
    /// At least n arguments
    AtLeast(usize),
    /// Between min and max arguments (inclusive)
    Range(usize, usize),
}

impl Arity {
    /// Validate an argument count, reporting too-few and too-many as
    /// distinct errors carrying `subject`.
    pub(crate) fn validate(&self, got: usize, subject: &Entity) -> Result<(), Error> {
        let (min, max) = match *self {
            Arity::Exact(n) => (n, Some(n)),
            Arity::AtLeast(n) => (n, None),
            Arity::Range(min, max) => (min, Some(max)),
        };
        if got < min {
            return Err(Error::TooFewArguments(subject.clone()));
        }
        if let Some(max) = max
            && got > max
        {
            return Err(Error::TooManyArguments(subject.clone()));
        }
        Ok(())
    }
}

/// Whether an entry takes evaluated arguments or unevaluated operands.
#[derive(Clone, Copy)]
pub enum OpKind {
    /// Ordinary procedure: arguments are evaluated before invocation
    Procedure(PrimitiveFn),
    /// Syntax operator: receives the unevaluated operands of its form
    Syntax(PrimitiveFn),
}

impl std::fmt::Debug for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            OpKind::Procedure(_) => write!(f, "Procedure(<fn>)"),
            OpKind::Syntax(_) => write!(f, "Syntax(<fn>)"),
        }
    }
}

/// Definition of a built-in operation.
#[derive(Debug)]
pub struct PrimitiveOp {
    /// The identifier this operation is bound to
    pub name: &'static str,
    /// Expected number of arguments
    pub arity: Arity,
    /// Procedure or syntax, with the implementation
    pub kind: OpKind,
}

impl PrimitiveOp {
    pub fn is_syntax(&self) -> bool {
        matches!(self.kind, OpKind::Syntax(_))
    }

    pub(crate) fn invoke(
        &self,
        args: &[Entity],
        env: &Environment,
        cont: &mut Continuation,
    ) -> Result<Option<Entity>, Error> {
        match self.kind {
            OpKind::Procedure(f) | OpKind::Syntax(f) => f(args, env, cont),
        }
    }
}

//
// Control primitives. These are the ones that exercise the two-outcome
// contract: both rewire the continuation instead of computing a value.
//

/// `call/cc`: package the current cursor as a first-class procedure and
/// hand it to the receiver. The capture happens after the calling
/// combination has advanced, so the captured chain is exactly "the rest of
/// the program after this call".
fn prim_call_cc(
    args: &[Entity],
    env: &Environment,
    cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    let reified = Entity::Continuation(cont.capture());
    let mut reified_args = Arguments::new();
    reified_args.push(reified);
    apply_procedure(&args[0], reified_args, env, cont)
}

/// `apply`: spread a list of arguments into a procedure application.
fn prim_apply(
    args: &[Entity],
    env: &Environment,
    cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    let spread = list_to_vec(&args[1])
        .ok_or_else(|| Error::InvalidAccess("apply", args[1].clone()))?;
    apply_procedure(&args[0], spread.into_iter().collect(), env, cont)
}

//
// Pairs and lists
//

fn prim_cons(
    args: &[Entity],
    _env: &Environment,
    _cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    Ok(Some(cons(args[0].clone(), args[1].clone())))
}

fn prim_car(
    args: &[Entity],
    _env: &Environment,
    _cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    match &args[0] {
        Entity::Pair(p) => Ok(Some(p.car.borrow().clone())),
        other => Err(Error::InvalidAccess("car", other.clone())),
    }
}

fn prim_cdr(
    args: &[Entity],
    _env: &Environment,
    _cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    match &args[0] {
        Entity::Pair(p) => Ok(Some(p.cdr.borrow().clone())),
        other => Err(Error::InvalidAccess("cdr", other.clone())),
    }
}

fn prim_set_car(
    args: &[Entity],
    _env: &Environment,
    _cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    match &args[0] {
        Entity::Pair(p) => {
            *p.car.borrow_mut() = args[1].clone();
            Ok(Some(Entity::Void))
        }
        other => Err(Error::InvalidAccess("set-car!", other.clone())),
    }
}

fn prim_set_cdr(
    args: &[Entity],
    _env: &Environment,
    _cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    match &args[0] {
        Entity::Pair(p) => {
            *p.cdr.borrow_mut() = args[1].clone();
            Ok(Some(Entity::Void))
        }
        other => Err(Error::InvalidAccess("set-cdr!", other.clone())),
    }
}

fn prim_list(
    args: &[Entity],
    _env: &Environment,
    _cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    Ok(Some(list_from_slice(args)))
}

//
// Type predicates
//

macro_rules! type_predicate {
    ($name:ident, $($pattern:pat_param)|+) => {
        fn $name(
            args: &[Entity],
            _env: &Environment,
            _cont: &mut Continuation,
        ) -> Result<Option<Entity>, Error> {
            Ok(Some(Entity::Boolean(matches!(&args[0], $($pattern)|+))))
        }
    };
}

type_predicate!(prim_is_null, Entity::Null);
type_predicate!(prim_is_pair, Entity::Pair(_));
type_predicate!(prim_is_symbol, Entity::Symbol(_));
type_predicate!(prim_is_boolean, Entity::Boolean(_));
type_predicate!(prim_is_number, Entity::Number(_));
type_predicate!(prim_is_string, Entity::Str(_));
type_predicate!(prim_is_char, Entity::Character(_));
type_predicate!(
    prim_is_procedure,
    Entity::Closure(_) | Entity::Primitive(_) | Entity::Continuation(_)
);

fn prim_not(
    args: &[Entity],
    _env: &Environment,
    _cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    Ok(Some(Entity::Boolean(!args[0].is_true())))
}

//
// Equivalence
//

fn prim_eq(
    args: &[Entity],
    _env: &Environment,
    _cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    Ok(Some(Entity::Boolean(args[0].is_eq(&args[1]))))
}

fn prim_eqv(
    args: &[Entity],
    _env: &Environment,
    _cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    Ok(Some(Entity::Boolean(args[0].is_eqv(&args[1]))))
}

fn prim_equal(
    args: &[Entity],
    _env: &Environment,
    _cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    Ok(Some(Entity::Boolean(args[0] == args[1])))
}

//
// Arithmetic and comparison. Integers are exact with checked arithmetic;
// any real operand promotes the operation to inexact.
//

fn number_of(value: &Entity, op: &'static str) -> Result<Number, Error> {
    match value {
        Entity::Number(n) => Ok(*n),
        other => Err(Error::InvalidAccess(op, other.clone())),
    }
}

fn overflow(op: &'static str) -> Error {
    Error::Signaled {
        message: format!("integer overflow in {op}"),
        irritant: Entity::Void,
    }
}

fn num_add(a: Number, b: Number) -> Result<Number, Error> {
    match (a, b) {
        (Number::Integer(x), Number::Integer(y)) => {
            x.checked_add(y).map(Number::Integer).ok_or_else(|| overflow("+"))
        }
        _ => Ok(Number::Real(as_real(a) + as_real(b))),
    }
}

fn num_sub(a: Number, b: Number) -> Result<Number, Error> {
    match (a, b) {
        (Number::Integer(x), Number::Integer(y)) => {
            x.checked_sub(y).map(Number::Integer).ok_or_else(|| overflow("-"))
        }
        _ => Ok(Number::Real(as_real(a) - as_real(b))),
    }
}

fn num_mul(a: Number, b: Number) -> Result<Number, Error> {
    match (a, b) {
        (Number::Integer(x), Number::Integer(y)) => {
            x.checked_mul(y).map(Number::Integer).ok_or_else(|| overflow("*"))
        }
        _ => Ok(Number::Real(as_real(a) * as_real(b))),
    }
}

fn as_real(n: Number) -> f64 {
    match n {
        Number::Integer(i) => i as f64,
        Number::Real(r) => r,
    }
}

fn num_cmp(a: Number, b: Number) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Number::Integer(x), Number::Integer(y)) => Some(x.cmp(&y)),
        _ => as_real(a).partial_cmp(&as_real(b)),
    }
}

fn prim_add(
    args: &[Entity],
    _env: &Environment,
    _cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    let mut sum = Number::Integer(0);
    for arg in args {
        sum = num_add(sum, number_of(arg, "+")?)?;
    }
    Ok(Some(Entity::Number(sum)))
}

fn prim_sub(
    args: &[Entity],
    _env: &Environment,
    _cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    let first = number_of(&args[0], "-")?;
    if args.len() == 1 {
        // unary negation
        return num_sub(Number::Integer(0), first).map(|n| Some(Entity::Number(n)));
    }
    let mut result = first;
    for arg in &args[1..] {
        result = num_sub(result, number_of(arg, "-")?)?;
    }
    Ok(Some(Entity::Number(result)))
}

fn prim_mul(
    args: &[Entity],
    _env: &Environment,
    _cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    let mut product = number_of(&args[0], "*")?;
    for arg in &args[1..] {
        product = num_mul(product, number_of(arg, "*")?)?;
    }
    Ok(Some(Entity::Number(product)))
}

// Chained comparisons: every adjacent pair must satisfy the relation.
macro_rules! numeric_comparison {
    ($name:ident, $op_str:expr, $($ordering:pat_param)|+) => {
        fn $name(
            args: &[Entity],
            _env: &Environment,
            _cont: &mut Continuation,
        ) -> Result<Option<Entity>, Error> {
            let mut prev = number_of(&args[0], $op_str)?;
            for arg in &args[1..] {
                let current = number_of(arg, $op_str)?;
                match num_cmp(prev, current) {
                    Some($($ordering)|+) => prev = current,
                    _ => return Ok(Some(Entity::Boolean(false))),
                }
            }
            Ok(Some(Entity::Boolean(true)))
        }
    };
}

use std::cmp::Ordering::{Equal, Greater, Less};
numeric_comparison!(prim_num_eq, "=", Equal);
numeric_comparison!(prim_lt, "<", Less);
numeric_comparison!(prim_gt, ">", Greater);
numeric_comparison!(prim_le, "<=", Less | Equal);
numeric_comparison!(prim_ge, ">=", Greater | Equal);

//
// Miscellaneous
//

/// Fresh uninterned symbol, optionally named after the argument.
fn prim_gensym(
    args: &[Entity],
    _env: &Environment,
    _cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    let name = match args.first() {
        Some(Entity::Str(s)) => s.as_str().to_owned(),
        Some(Entity::Symbol(s)) => s.name().to_owned(),
        Some(other) => return Err(Error::InvalidAccess("gensym", other.clone())),
        None => String::from("g"),
    };
    Ok(Some(Entity::Symbol(Symbol::uninterned(&name))))
}

/// Signal a Scheme-level error: message, plus an optional irritant carried
/// for diagnostics.
fn prim_error(
    args: &[Entity],
    _env: &Environment,
    _cont: &mut Continuation,
) -> Result<Option<Entity>, Error> {
    let message = match &args[0] {
        Entity::Str(s) => s.as_str().to_owned(),
        other => format!("{other}"),
    };
    let irritant = args.get(1).cloned().unwrap_or(Entity::Void);
    Err(Error::Signaled { message, irritant })
}

/// Registry of all built-in operations, one contiguous table for ease of
/// auditing.
static BUILTIN_OPS: &[PrimitiveOp] = &[
    // Syntax operators (handlers in evaluator)
    PrimitiveOp { name: "quote", arity: Arity::Exact(1), kind: OpKind::Syntax(eval_quote) },
    PrimitiveOp { name: "if", arity: Arity::Range(2, 3), kind: OpKind::Syntax(eval_if) },
    PrimitiveOp { name: "define", arity: Arity::AtLeast(2), kind: OpKind::Syntax(eval_define) },
    PrimitiveOp { name: "set!", arity: Arity::Exact(2), kind: OpKind::Syntax(eval_set) },
    PrimitiveOp { name: "lambda", arity: Arity::AtLeast(2), kind: OpKind::Syntax(eval_lambda) },
    PrimitiveOp { name: "begin", arity: Arity::AtLeast(0), kind: OpKind::Syntax(eval_begin) },
    PrimitiveOp {
        name: "define-syntax",
        arity: Arity::Exact(2),
        kind: OpKind::Syntax(eval_define_syntax),
    },
    // Control
    PrimitiveOp { name: "call/cc", arity: Arity::Exact(1), kind: OpKind::Procedure(prim_call_cc) },
    PrimitiveOp {
        name: "call-with-current-continuation",
        arity: Arity::Exact(1),
        kind: OpKind::Procedure(prim_call_cc),
    },
    PrimitiveOp { name: "apply", arity: Arity::Exact(2), kind: OpKind::Procedure(prim_apply) },
    // Pairs and lists
    PrimitiveOp { name: "cons", arity: Arity::Exact(2), kind: OpKind::Procedure(prim_cons) },
    PrimitiveOp { name: "car", arity: Arity::Exact(1), kind: OpKind::Procedure(prim_car) },
    PrimitiveOp { name: "cdr", arity: Arity::Exact(1), kind: OpKind::Procedure(prim_cdr) },
    PrimitiveOp { name: "set-car!", arity: Arity::Exact(2), kind: OpKind::Procedure(prim_set_car) },
    PrimitiveOp { name: "set-cdr!", arity: Arity::Exact(2), kind: OpKind::Procedure(prim_set_cdr) },
    PrimitiveOp { name: "list", arity: Arity::AtLeast(0), kind: OpKind::Procedure(prim_list) },
    // Predicates
    PrimitiveOp { name: "null?", arity: Arity::Exact(1), kind: OpKind::Procedure(prim_is_null) },
    PrimitiveOp { name: "pair?", arity: Arity::Exact(1), kind: OpKind::Procedure(prim_is_pair) },
    PrimitiveOp { name: "symbol?", arity: Arity::Exact(1), kind: OpKind::Procedure(prim_is_symbol) },
    PrimitiveOp {
        name: "boolean?",
        arity: Arity::Exact(1),
        kind: OpKind::Procedure(prim_is_boolean),
    },
    PrimitiveOp { name: "number?", arity: Arity::Exact(1), kind: OpKind::Procedure(prim_is_number) },
    PrimitiveOp { name: "string?", arity: Arity::Exact(1), kind: OpKind::Procedure(prim_is_string) },
    PrimitiveOp { name: "char?", arity: Arity::Exact(1), kind: OpKind::Procedure(prim_is_char) },
    PrimitiveOp {
        name: "procedure?",
        arity: Arity::Exact(1),
        kind: OpKind::Procedure(prim_is_procedure),
    },
    PrimitiveOp { name: "not", arity: Arity::Exact(1), kind: OpKind::Procedure(prim_not) },
    // Equivalence
    PrimitiveOp { name: "eq?", arity: Arity::Exact(2), kind: OpKind::Procedure(prim_eq) },
    PrimitiveOp { name: "eqv?", arity: Arity::Exact(2), kind: OpKind::Procedure(prim_eqv) },
    PrimitiveOp { name: "equal?", arity: Arity::Exact(2), kind: OpKind::Procedure(prim_equal) },
    // Arithmetic and comparison
    PrimitiveOp { name: "+", arity: Arity::AtLeast(0), kind: OpKind::Procedure(prim_add) },
    PrimitiveOp { name: "-", arity: Arity::AtLeast(1), kind: OpKind::Procedure(prim_sub) },
    PrimitiveOp { name: "*", arity: Arity::AtLeast(1), kind: OpKind::Procedure(prim_mul) },
    PrimitiveOp { name: "=", arity: Arity::AtLeast(2), kind: OpKind::Procedure(prim_num_eq) },
    PrimitiveOp { name: "<", arity: Arity::AtLeast(2), kind: OpKind::Procedure(prim_lt) },
    PrimitiveOp { name: ">", arity: Arity::AtLeast(2), kind: OpKind::Procedure(prim_gt) },
    PrimitiveOp { name: "<=", arity: Arity::AtLeast(2), kind: OpKind::Procedure(prim_le) },
    PrimitiveOp { name: ">=", arity: Arity::AtLeast(2), kind: OpKind::Procedure(prim_ge) },
    // Miscellaneous
    PrimitiveOp { name: "gensym", arity: Arity::Range(0, 1), kind: OpKind::Procedure(prim_gensym) },
    PrimitiveOp { name: "error", arity: Arity::Range(1, 2), kind: OpKind::Procedure(prim_error) },
];

/// Lazy index from name to registry entry.
static BUILTIN_INDEX: LazyLock<HashMap<&'static str, &'static PrimitiveOp>> =
    LazyLock::new(|| BUILTIN_OPS.iter().map(|op| (op.name, op)).collect());

/// Find a built-in operation by name.
pub fn find_op(name: &str) -> Option<&'static PrimitiveOp> {
    BUILTIN_INDEX.get(name).copied()
}

/// A fresh global environment with every registry entry bound to its name.
pub fn create_global_env() -> Environment {
    let env = Environment::new();
    for op in BUILTIN_OPS {
        env.define(&Symbol::intern(op.name), Entity::Primitive(op));
    }
    env
}
