use rustc_hash::FxHashMap;

/// Names every module namespace starts out with
pub const MODULE_ATTRIBUTES: &[&str] = &["__name__", "__file__", "__doc__", "__package__"];

/// Deduplicates identifiers of one module tree and hands out compact ids
///
/// Variable lookups compare `StringId`s instead of strings, so scopes and
/// traces never hash the identifier text.
#[derive(Debug, Default)]
pub struct StringInterner {
    string_to_id: FxHashMap<String, StringId>,
    id_to_string: Vec<String>,
}

/// Id of an interned identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(u32);

impl StringInterner {
    pub fn new() -> Self {
        Self {
            string_to_id: FxHashMap::default(),
            id_to_string: Vec::new(),
        }
    }

    /// Interner pre-seeded with the implicit module attributes
    pub fn with_module_attributes() -> Self {
        let mut interner = Self::new();
        for name in MODULE_ATTRIBUTES {
            interner.intern(name);
        }
        interner
    }

    /// Intern a string, returning the existing id when already known
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.string_to_id.get(s) {
            return id;
        }

        let id = StringId(self.id_to_string.len() as u32);
        self.id_to_string.push(s.to_string());
        self.string_to_id.insert(s.to_string(), id);
        id
    }

    /// Look up an id without interning
    pub fn get(&self, s: &str) -> Option<StringId> {
        self.string_to_id.get(s).copied()
    }

    /// Panics if the id was not produced by this interner
    pub fn resolve(&self, id: StringId) -> &str {
        &self.id_to_string[id.0 as usize]
    }

    pub fn try_resolve(&self, id: StringId) -> Option<&str> {
        self.id_to_string.get(id.0 as usize).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.id_to_string.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_string.is_empty()
    }
}

impl StringId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_basic() {
        let mut interner = StringInterner::new();

        let x = interner.intern("x");
        let y = interner.intern("y");
        let x_again = interner.intern("x");

        assert_eq!(x, x_again);
        assert_ne!(x, y);
        assert_eq!(interner.resolve(x), "x");
        assert_eq!(interner.resolve(y), "y");
    }

    #[test]
    fn test_module_attributes_are_seeded() {
        let interner = StringInterner::with_module_attributes();
        assert_eq!(interner.len(), MODULE_ATTRIBUTES.len());
        assert!(interner.get("__name__").is_some());
        assert!(interner.get("x").is_none());
    }

    #[test]
    fn test_try_resolve_unknown() {
        let mut interner = StringInterner::new();
        let id = interner.intern("value");
        assert_eq!(interner.try_resolve(id), Some("value"));
        assert_eq!(interner.try_resolve(StringId(99)), None);
    }
}
