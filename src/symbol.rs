//! Interned symbols with process-wide identity.
//!
//! Two interned symbols with the same name are the same instance, so `eq?`
//! is a pointer comparison. The table lives for the whole process, is
//! populated lazily on first use, and is the only process-wide shared
//! mutable resource in the core, so access is synchronized.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, LazyLock, Mutex};

struct SymbolData {
    name: String,
    interned: bool,
}

/// An immutable symbol name. Equality is identity: interned symbols are
/// canonicalized through the process-wide table, uninterned symbols are
/// never equal to anything but themselves.
#[derive(Clone)]
pub struct Symbol(Arc<SymbolData>);

/// The unique symbol table. Entries are small and immutable; there is no
/// teardown.
static SYMBOLS: LazyLock<Mutex<HashMap<String, Symbol>>> =
    LazyLock::new(|| Mutex::new(HashMap::with_capacity(256)));

impl Symbol {
    /// Return the canonical symbol for `name`, creating and storing it on
    /// first use. Concurrent calls for the same name yield the same
    /// instance.
    pub fn intern(name: &str) -> Symbol {
        let mut table = SYMBOLS.lock().expect("symbol table poisoned");
        if let Some(existing) = table.get(name) {
            return existing.clone();
        }
        let symbol = Symbol(Arc::new(SymbolData {
            name: name.to_owned(),
            interned: true,
        }));
        table.insert(name.to_owned(), symbol.clone());
        symbol
    }

    /// Create a fresh symbol that bypasses the table. It shares its text
    /// with nothing and is never identity-equal to any other symbol.
    pub fn uninterned(name: &str) -> Symbol {
        Symbol(Arc::new(SymbolData {
            name: name.to_owned(),
            interned: false,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn is_interned(&self) -> bool {
        self.0.interned
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.0.interned {
            write!(f, "Symbol({})", self.0.name)
        } else {
            write!(f, "Symbol({} uninterned)", self.0.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interned_symbols_with_equal_names_are_identical() {
        let a = Symbol::intern("weather");
        let b = Symbol::intern("weather");
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn distinct_names_are_distinct() {
        assert_ne!(Symbol::intern("car"), Symbol::intern("cdr"));
    }

    #[test]
    fn uninterned_symbols_never_alias() {
        let interned = Symbol::intern("shadow");
        let u1 = Symbol::uninterned("shadow");
        let u2 = Symbol::uninterned("shadow");
        assert_eq!(u1.name(), interned.name());
        assert_ne!(u1, interned);
        assert_ne!(u1, u2);
        assert_eq!(u1, u1.clone());
        assert!(!u1.is_interned());
        assert!(interned.is_interned());
    }

    #[test]
    fn concurrent_interning_yields_one_instance() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| Symbol::intern("contested-name")))
            .collect();
        let symbols: Vec<Symbol> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for s in &symbols[1..] {
            assert_eq!(*s, symbols[0]);
        }
    }

    #[test]
    fn hashing_follows_identity() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(Symbol::intern("key"), 1);
        map.insert(Symbol::uninterned("key"), 2);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&Symbol::intern("key")), Some(&1));
    }
}
