//! The universal runtime value type.
//!
//! Every object the engine touches is an [`Entity`]: pairs, symbols, the
//! empty list, booleans, characters, numbers, strings, vectors, procedures
//! of all kinds, pre-resolved variable sites, and opaque host-object
//! wrappers. Cloning an `Entity` is cheap: heap-shaped variants hold `Rc`
//! handles, so identity semantics (`eq?`) are pointer comparisons.
//!
//! The empty list is the unit variant [`Entity::Null`], which gives it
//! exactly one instance system-wide; symbols carry their identity through
//! the intern table in [`crate::symbol`].

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::io;
use std::rc::Rc;

use crate::builtinops::PrimitiveOp;
use crate::env::{Environment, Location};
use crate::evaluator::Capture;
use crate::symbol::Symbol;
use crate::{Verbosity, verbosity};

/// Numbers carry their exactness: integers are exact, reals are not.
/// `eqv?` compares value and exactness, so `1` and `1.0` are distinct.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Integer(i64),
    Real(f64),
}

/// A mutable cons cell. Identity is the cell: two pairs with equal contents
/// are never `eq?`.
pub struct Pair {
    pub car: RefCell<Entity>,
    pub cdr: RefCell<Entity>,
}

/// A compound procedure: parameter spec, body, and the environment it was
/// defined in. Immutable after construction; the captured environment is
/// shared, not owned.
pub struct Closure {
    pub(crate) params: Entity,
    pub(crate) body: Vec<Entity>,
    pub(crate) env: Environment,
}

impl Closure {
    /// Number of fixed parameter slots, or None for variadic specs (a bare
    /// rest symbol or a dotted tail).
    pub fn max_arity(&self) -> Option<usize> {
        let mut count = 0;
        let mut spec = self.params.clone();
        loop {
            match spec {
                Entity::Pair(p) => {
                    count += 1;
                    let next = p.cdr.borrow().clone();
                    spec = next;
                }
                Entity::Symbol(_) => return None,
                _ => return Some(count),
            }
        }
    }

    /// The `(lambda params body...)` form, for high-verbosity rendering.
    fn lambda_form(&self) -> Entity {
        let mut items = vec![sym("lambda"), self.params.clone()];
        items.extend(self.body.iter().cloned());
        list_from_slice(&items)
    }
}

/// An opaque wrapper around a host (Rust) object. Two wrappers are `eq?`
/// exactly when they wrap the same underlying object, even if the wrapper
/// instances themselves differ.
#[derive(Clone)]
pub struct HostObject {
    inner: Rc<dyn Any>,
}

impl HostObject {
    pub fn new<T: Any>(value: T) -> HostObject {
        HostObject {
            inner: Rc::new(value),
        }
    }

    /// Wrap an already-shared host object. Wrappers built from clones of
    /// the same `Rc` compare equal under `eq?`.
    pub fn from_rc(inner: Rc<dyn Any>) -> HostObject {
        HostObject { inner }
    }

    pub fn same_object(&self, other: &HostObject) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref()
    }
}

/// The universal value type.
#[derive(Clone)]
pub enum Entity {
    /// The empty list. One instance system-wide.
    Null,
    Boolean(bool),
    Character(char),
    Number(Number),
    Str(Rc<String>),
    Vector(Rc<RefCell<Vec<Entity>>>),
    Symbol(Symbol),
    Pair(Rc<Pair>),
    /// Compound procedure
    Closure(Rc<Closure>),
    /// A closure used to transform source forms before evaluation
    Rewriter(Rc<Closure>),
    /// Registry-defined primitive operation
    Primitive(&'static PrimitiveOp),
    /// A captured continuation, applicable as a procedure of one argument
    Continuation(Rc<Capture>),
    /// A variable site pre-resolved to its storage cell
    Location(Location),
    /// Opaque host-object wrapper
    Host(HostObject),
    /// The unspecified result of commands like `define` and `set!`
    Void,
    /// The "parameter not yet bound" sentinel
    Undefined,
}

impl Entity {
    /// Everything except `#f` counts as true in conditionals.
    pub fn is_true(&self) -> bool {
        !matches!(self, Entity::Boolean(false))
    }

    /// Identity comparison (`eq?`). Host objects are the one special case:
    /// the wrapped objects are compared, not the wrappers.
    pub fn is_eq(&self, other: &Entity) -> bool {
        match (self, other) {
            (Entity::Host(a), Entity::Host(b)) => a.same_object(b),
            (Entity::Pair(a), Entity::Pair(b)) => Rc::ptr_eq(a, b),
            (Entity::Str(a), Entity::Str(b)) => Rc::ptr_eq(a, b),
            (Entity::Vector(a), Entity::Vector(b)) => Rc::ptr_eq(a, b),
            (Entity::Closure(a), Entity::Closure(b)) => Rc::ptr_eq(a, b),
            (Entity::Rewriter(a), Entity::Rewriter(b)) => Rc::ptr_eq(a, b),
            (Entity::Continuation(a), Entity::Continuation(b)) => Rc::ptr_eq(a, b),
            (Entity::Primitive(a), Entity::Primitive(b)) => std::ptr::eq(*a, *b),
            (Entity::Symbol(a), Entity::Symbol(b)) => a == b,
            (Entity::Null, Entity::Null) => true,
            (Entity::Void, Entity::Void) => true,
            (Entity::Undefined, Entity::Undefined) => true,
            (Entity::Boolean(a), Entity::Boolean(b)) => a == b,
            (Entity::Character(a), Entity::Character(b)) => a == b,
            (Entity::Number(a), Entity::Number(b)) => a == b,
            _ => false,
        }
    }

    /// Atom-value comparison (`eqv?`): numbers by value and exactness,
    /// characters by code point, symbols by identity, aggregates by
    /// identity. Numbers and characters are unboxed here, so this coincides
    /// with [`Entity::is_eq`].
    pub fn is_eqv(&self, other: &Entity) -> bool {
        self.is_eq(other)
    }

    /// Render this value into an output sink. The textual form is
    /// type-specific; procedures include their full source only at
    /// [`Verbosity::Config`] or finer.
    pub fn write(&self, out: &mut dyn io::Write) -> io::Result<()> {
        write!(out, "{self}")
    }
}

/// Structural equality (`equal?`): recursive over pairs and vectors,
/// by contents for strings, identity for procedures and host objects.
impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Entity::Str(a), Entity::Str(b)) => a == b,
            (Entity::Pair(a), Entity::Pair(b)) => {
                Rc::ptr_eq(a, b)
                    || (*a.car.borrow() == *b.car.borrow() && *a.cdr.borrow() == *b.cdr.borrow())
            }
            (Entity::Vector(a), Entity::Vector(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            _ => self.is_eq(other),
        }
    }
}

//
// Construction helpers
//

/// Cons two values into a fresh pair.
pub fn cons(car: Entity, cdr: Entity) -> Entity {
    Entity::Pair(Rc::new(Pair {
        car: RefCell::new(car),
        cdr: RefCell::new(cdr),
    }))
}

/// The interned symbol for `name`, as an Entity.
pub fn sym(name: &str) -> Entity {
    Entity::Symbol(Symbol::intern(name))
}

/// An exact integer.
pub fn int(n: i64) -> Entity {
    Entity::Number(Number::Integer(n))
}

/// A freshly built proper list of `items`.
pub fn list_from_slice(items: &[Entity]) -> Entity {
    items
        .iter()
        .rev()
        .fold(Entity::Null, |tail, item| cons(item.clone(), tail))
}

/// A list of `items` ending in `tail` (dotted when `tail` is not `Null`).
pub fn improper_from_slice(items: &[Entity], tail: Entity) -> Entity {
    items
        .iter()
        .rev()
        .fold(tail, |rest, item| cons(item.clone(), rest))
}

/// The elements of a proper list, or None if `list` is improper or not a
/// list at all.
pub fn list_to_vec(list: &Entity) -> Option<Vec<Entity>> {
    let mut items = Vec::new();
    let mut cursor = list.clone();
    loop {
        match cursor {
            Entity::Null => return Some(items),
            Entity::Pair(p) => {
                items.push(p.car.borrow().clone());
                let next = p.cdr.borrow().clone();
                cursor = next;
            }
            _ => return None,
        }
    }
}

//
// Rendering
//

fn write_string_literal(f: &mut fmt::Formatter, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for ch in s.chars() {
        match ch {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            '\r' => write!(f, "\\r")?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "\"")
}

fn write_character(f: &mut fmt::Formatter, c: char) -> fmt::Result {
    match c {
        ' ' => write!(f, "#\\space"),
        '\n' => write!(f, "#\\newline"),
        '\t' => write!(f, "#\\tab"),
        other => write!(f, "#\\{other}"),
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Number::Integer(n) => write!(f, "{n}"),
            Number::Real(r) => {
                if r.is_finite() && r.fract() == 0.0 {
                    write!(f, "{r:.1}")
                } else {
                    write!(f, "{r}")
                }
            }
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Entity::Null => write!(f, "()"),
            Entity::Boolean(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Entity::Character(c) => write_character(f, *c),
            Entity::Number(n) => write!(f, "{n}"),
            Entity::Str(s) => write_string_literal(f, s),
            Entity::Vector(v) => {
                write!(f, "#(")?;
                for (i, item) in v.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Entity::Symbol(s) => write!(f, "{s}"),
            Entity::Pair(pair) => {
                write!(f, "(")?;
                write!(f, "{}", &*pair.car.borrow())?;
                let mut cursor = pair.cdr.borrow().clone();
                loop {
                    match cursor {
                        Entity::Null => break,
                        Entity::Pair(p) => {
                            write!(f, " {}", &*p.car.borrow())?;
                            let next = p.cdr.borrow().clone();
                            cursor = next;
                        }
                        other => {
                            write!(f, " . {other}")?;
                            break;
                        }
                    }
                }
                write!(f, ")")
            }
            Entity::Closure(c) => {
                write!(f, "#<procedure")?;
                if verbosity() >= Verbosity::Config {
                    write!(f, " {}", c.lambda_form())?;
                }
                write!(f, ">")
            }
            Entity::Rewriter(c) => {
                write!(f, "#<syntax-rewriter")?;
                if verbosity() >= Verbosity::Config {
                    write!(f, " {}", c.lambda_form())?;
                }
                write!(f, ">")
            }
            Entity::Primitive(op) => write!(f, "#<primitive:{}>", op.name),
            Entity::Continuation(_) => write!(f, "#<continuation>"),
            Entity::Location(loc) => {
                write!(f, "#<location")?;
                if verbosity() >= Verbosity::Config {
                    write!(f, " {}", loc.get())?;
                }
                write!(f, ">")
            }
            Entity::Host(h) => {
                write!(f, "#<host-object")?;
                if verbosity() >= Verbosity::Config {
                    write!(f, " {:p}", Rc::as_ptr(&h.inner))?;
                }
                write!(f, ">")
            }
            Entity::Void => write!(f, "#<void>"),
            Entity::Undefined => write!(f, "#<undefined>"),
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_is_one_instance() {
        assert!(Entity::Null.is_eq(&Entity::Null));
    }

    #[test]
    fn fresh_pairs_with_equal_contents_are_not_eq() {
        let a = cons(int(1), cons(int(2), Entity::Null));
        let b = cons(int(1), cons(int(2), Entity::Null));
        assert!(!a.is_eq(&b));
        assert!(a.is_eq(&a.clone()));
        // but they are equal? (structural)
        assert_eq!(a, b);
    }

    #[test]
    fn eqv_numbers_compare_value_and_exactness() {
        let exact = Entity::Number(Number::Integer(1));
        let inexact = Entity::Number(Number::Real(1.0));
        assert!(exact.is_eqv(&int(1)));
        assert!(!exact.is_eqv(&inexact));
        assert!(inexact.is_eqv(&Entity::Number(Number::Real(1.0))));
        assert!(!int(1).is_eqv(&int(2)));
    }

    #[test]
    fn eq_on_host_objects_compares_the_wrapped_object() {
        let underlying: Rc<dyn Any> = Rc::new(String::from("shared host value"));
        let wrapper1 = Entity::Host(HostObject::from_rc(underlying.clone()));
        let wrapper2 = Entity::Host(HostObject::from_rc(underlying));
        // distinct wrapper instances, same underlying object
        assert!(wrapper1.is_eq(&wrapper2));

        let other = Entity::Host(HostObject::new(String::from("shared host value")));
        assert!(!wrapper1.is_eq(&other));
    }

    #[test]
    fn host_object_downcast() {
        let host = HostObject::new(7_u32);
        assert_eq!(host.downcast_ref::<u32>(), Some(&7));
        assert_eq!(host.downcast_ref::<i64>(), None);
    }

    #[test]
    fn symbols_compare_by_identity() {
        assert!(sym("alpha").is_eq(&sym("alpha")));
        let ghost = Entity::Symbol(crate::symbol::Symbol::uninterned("alpha"));
        assert!(!ghost.is_eq(&sym("alpha")));
    }

    #[test]
    fn strings_are_eq_by_identity_and_equal_by_contents() {
        let a = Entity::Str(Rc::new(String::from("text")));
        let b = Entity::Str(Rc::new(String::from("text")));
        assert!(!a.is_eq(&b));
        assert_eq!(a, b);
        assert!(a.is_eq(&a.clone()));
    }

    #[test]
    fn list_helpers_round_trip() {
        let items = vec![int(1), sym("two"), Entity::Boolean(true)];
        let list = list_from_slice(&items);
        assert_eq!(list_to_vec(&list).unwrap(), items);
        assert_eq!(list_to_vec(&Entity::Null).unwrap(), Vec::<Entity>::new());

        let dotted = improper_from_slice(&[int(1)], int(2));
        assert!(list_to_vec(&dotted).is_none());
        assert!(list_to_vec(&int(3)).is_none());
    }

    #[test]
    fn display_forms() {
        assert_eq!(format!("{}", Entity::Null), "()");
        assert_eq!(format!("{}", Entity::Boolean(true)), "#t");
        assert_eq!(format!("{}", Entity::Character(' ')), "#\\space");
        assert_eq!(format!("{}", Entity::Character('x')), "#\\x");
        assert_eq!(format!("{}", int(-7)), "-7");
        assert_eq!(format!("{}", Entity::Number(Number::Real(2.5))), "2.5");
        assert_eq!(format!("{}", Entity::Number(Number::Real(5.0))), "5.0");
        assert_eq!(
            format!("{}", Entity::Str(Rc::new(String::from("a\"b")))),
            "\"a\\\"b\""
        );
        assert_eq!(
            format!("{}", list_from_slice(&[sym("a"), sym("b")])),
            "(a b)"
        );
        assert_eq!(format!("{}", cons(sym("a"), sym("b"))), "(a . b)");
        assert_eq!(format!("{}", Entity::Void), "#<void>");
    }

    #[test]
    fn write_renders_like_display() {
        let value = list_from_slice(&[sym("car"), int(1)]);
        let mut out = Vec::new();
        value.write(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "(car 1)");
    }
}
