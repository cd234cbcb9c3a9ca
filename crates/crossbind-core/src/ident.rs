//! Per-body identifier allocation.
//!
//! An [`IdentifierScope`] lives for the generation of exactly one function
//! body. Names minted from it never collide with each other or with names
//! reserved up front (parameters, the receiver).

use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct IdentifierScope {
    taken: HashSet<String>,
}

impl IdentifierScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope with `names` already taken.
    pub fn with_reserved<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            taken: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Mark `name` as taken. Returns false if it already was.
    pub fn reserve(&mut self, name: impl Into<String>) -> bool {
        self.taken.insert(name.into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.taken.contains(name)
    }

    /// Mint a fresh name: `base` if free, otherwise the first free of
    /// `base0`, `base1`, ...
    pub fn mint(&mut self, base: &str) -> String {
        let name = if self.taken.contains(base) {
            (0usize..)
                .map(|i| format!("{base}{i}"))
                .find(|candidate| !self.taken.contains(candidate))
                .unwrap_or_else(|| base.to_string())
        } else {
            base.to_string()
        };
        self.taken.insert(name.clone());
        name
    }

    pub fn len(&self) -> usize {
        self.taken.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taken.is_empty()
    }
}
