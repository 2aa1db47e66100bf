//! Lexical environments: chains of binding frames mapping symbols to
//! mutable storage cells.
//!
//! A frame is created per closure application (and per block construct) and
//! stays alive exactly as long as something reaches into it, which is what
//! makes closures correct. [`Location`] cells are never relocated, so a
//! reference resolved once stays valid for the life of the binding.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::Error;
use crate::entity::Entity;
use crate::symbol::Symbol;

/// A mutable single-value cell: the unit of variable storage. Identity is
/// the cell, not the value; pre-resolved symbol sites hold these directly.
#[derive(Clone)]
pub struct Location(Rc<RefCell<Entity>>);

impl Location {
    pub fn new(value: Entity) -> Location {
        Location(Rc::new(RefCell::new(value)))
    }

    pub fn get(&self) -> Entity {
        self.0.borrow().clone()
    }

    pub fn set(&self, value: Entity) {
        *self.0.borrow_mut() = value;
    }

    /// True when both refer to the same storage cell.
    pub fn same_cell(&self, other: &Location) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

struct Frame {
    bindings: RefCell<HashMap<Symbol, Location>>,
    parent: Option<Environment>,
}

/// A chain of binding frames, innermost first. Cloning shares the frame.
#[derive(Clone)]
pub struct Environment(Rc<Frame>);

impl Environment {
    /// A root environment with no parent.
    pub fn new() -> Environment {
        Environment(Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent: None,
        }))
    }

    /// A fresh innermost frame chained onto `parent`.
    pub fn with_parent(parent: &Environment) -> Environment {
        Environment(Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
        }))
    }

    /// Bind `name` in this frame. Re-defining a name writes through the
    /// existing cell, so "most recent define wins" and previously resolved
    /// references stay valid.
    pub fn define(&self, name: &Symbol, value: Entity) {
        if let Some(existing) = self.0.bindings.borrow().get(name) {
            existing.set(value);
            return;
        }
        self.0
            .bindings
            .borrow_mut()
            .insert(name.clone(), Location::new(value));
    }

    /// Current value of `name`, searching frames innermost-first.
    pub fn lookup(&self, name: &Symbol) -> Result<Entity, Error> {
        match self.location_of(name) {
            Some(location) => Ok(location.get()),
            None => Err(Error::UnboundVariable(name.clone())),
        }
    }

    /// The binding cell for `name`, or None if no frame binds it.
    pub fn location_of(&self, name: &Symbol) -> Option<Location> {
        let mut env = self.clone();
        loop {
            if let Some(location) = env.0.bindings.borrow().get(name) {
                return Some(location.clone());
            }
            let parent = env.0.parent.clone()?;
            env = parent;
        }
    }

    /// Write through the existing binding of `name`, wherever in the chain
    /// it lives. Fails if the symbol is unbound everywhere.
    pub fn set(&self, name: &Symbol, value: Entity) -> Result<(), Error> {
        match self.location_of(name) {
            Some(location) => {
                location.set(value);
                Ok(())
            }
            None => Err(Error::UnboundAssignment(name.clone())),
        }
    }

    /// True when both refer to the same frame.
    pub fn same_frame(&self, other: &Environment) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Number;

    fn int(n: i64) -> Entity {
        Entity::Number(Number::Integer(n))
    }

    #[test]
    fn define_and_lookup() {
        let env = Environment::new();
        let x = Symbol::intern("x");
        env.define(&x, int(42));
        assert_eq!(env.lookup(&x).unwrap(), int(42));
        assert_eq!(
            env.lookup(&Symbol::intern("missing")),
            Err(Error::UnboundVariable(Symbol::intern("missing")))
        );
    }

    #[test]
    fn inner_frames_shadow_without_destroying() {
        let outer = Environment::new();
        let x = Symbol::intern("x");
        outer.define(&x, int(1));

        let inner = Environment::with_parent(&outer);
        inner.define(&x, int(2));
        assert_eq!(inner.lookup(&x).unwrap(), int(2));
        assert_eq!(outer.lookup(&x).unwrap(), int(1));
    }

    #[test]
    fn redefining_keeps_the_same_cell() {
        let env = Environment::new();
        let x = Symbol::intern("x");
        env.define(&x, int(1));
        let before = env.location_of(&x).unwrap();
        env.define(&x, int(2));
        let after = env.location_of(&x).unwrap();
        assert!(before.same_cell(&after));
        assert_eq!(before.get(), int(2));
    }

    #[test]
    fn set_writes_through_outer_frames() {
        let outer = Environment::new();
        let x = Symbol::intern("x");
        outer.define(&x, int(1));

        let inner = Environment::with_parent(&outer);
        inner.set(&x, int(5)).unwrap();
        assert_eq!(outer.lookup(&x).unwrap(), int(5));

        let unbound = Symbol::intern("nowhere");
        assert_eq!(
            inner.set(&unbound, int(0)),
            Err(Error::UnboundAssignment(unbound))
        );
    }

    #[test]
    fn uninterned_symbols_do_not_collide_with_interned_bindings() {
        let env = Environment::new();
        let interned = Symbol::intern("n");
        let hidden = Symbol::uninterned("n");
        env.define(&interned, int(1));
        env.define(&hidden, int(2));
        assert_eq!(env.lookup(&interned).unwrap(), int(1));
        assert_eq!(env.lookup(&hidden).unwrap(), int(2));
    }

    #[test]
    fn location_of_unbound_is_none() {
        let env = Environment::new();
        assert!(env.location_of(&Symbol::intern("ghost")).is_none());
    }
}
