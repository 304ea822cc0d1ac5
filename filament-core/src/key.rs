//! Identifiers and Property Keys
//!
//! Every observed entity (cell, map, set, or anything an external
//! interception layer wraps) is identified by an [`EntityId`] assigned on
//! first participation. The id stands in for reference identity; it is
//! surfaced by the debug registry snapshot but never compared for value
//! equality.
//!
//! A [`Key`] names a trackable slot on an entity. Plain single-value cells
//! use [`Key::Value`]; collections additionally use synthetic keys for
//! per-element access, per-element existence checks, and the aggregate
//! operations (size and the enumeration views). The original implementation
//! minted one unforgeable symbol per synthetic slot; here the variants of the
//! enum keep the slots distinct, and a per-entity [`KeyInterner`] maps
//! collection keys to stable [`KeyToken`]s.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Unique identifier for an observed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EntityId(u64);

impl EntityId {
    /// Assign a fresh entity id.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw id value. Diagnostics only.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

/// Stable token standing in for one collection key on one entity.
///
/// Tokens are allocated by the entity's own [`KeyInterner`], so two distinct
/// collection keys never share a token and the same key always resolves to
/// the same token for the lifetime of the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct KeyToken(u32);

impl KeyToken {
    /// Get the raw token value. Diagnostics only.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// A trackable slot on an observed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Key {
    /// The single slot of a value cell.
    Value,
    /// One element of a keyed or set-like collection.
    Element(KeyToken),
    /// Presence of a specific element (`contains`-style reads).
    Existence(KeyToken),
    /// Element count.
    Size,
    /// Key enumeration.
    Keys,
    /// Value enumeration.
    Values,
    /// Entry enumeration.
    Entries,
    /// Full iteration (`for_each`-style traversal).
    Iteration,
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Value => write!(f, "value"),
            Key::Element(tok) => write!(f, "element({})", tok.raw()),
            Key::Existence(tok) => write!(f, "existence({})", tok.raw()),
            Key::Size => write!(f, "size"),
            Key::Keys => write!(f, "keys"),
            Key::Values => write!(f, "values"),
            Key::Entries => write!(f, "entries"),
            Key::Iteration => write!(f, "iteration"),
        }
    }
}

/// Per-entity interner mapping collection keys to [`KeyToken`]s.
///
/// Interning is monotonic: a token is never reused for a different key, even
/// after the element is removed, so existence subscriptions survive
/// remove/re-insert cycles of the same key.
pub(crate) struct KeyInterner<K> {
    tokens: HashMap<K, KeyToken>,
    next: u32,
}

impl<K: Eq + Hash + Clone> KeyInterner<K> {
    pub(crate) fn new() -> Self {
        Self {
            tokens: HashMap::new(),
            next: 0,
        }
    }

    pub(crate) fn intern(&mut self, key: &K) -> KeyToken {
        if let Some(tok) = self.tokens.get(key) {
            return *tok;
        }
        let tok = KeyToken(self.next);
        self.next += 1;
        self.tokens.insert(key.clone(), tok);
        tok
    }
}
