//! Registry namespaces

use std::fmt;
use std::sync::Arc;

/// Names a group of entries. Compared by full string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace(Arc<str>);

impl Namespace {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// A namespace named after a type, for caches owned by one component
    pub fn of<T: ?Sized>() -> Self {
        Self::new(std::any::type_name::<T>())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Namespace {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Namespace {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<&Namespace> for Namespace {
    fn from(ns: &Namespace) -> Self {
        ns.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TokenCache;

    #[test]
    fn test_equality_by_content() {
        assert_eq!(Namespace::from("auth"), Namespace::from(String::from("auth")));
        assert_ne!(Namespace::from("auth"), Namespace::from("Auth"));
    }

    #[test]
    fn test_of_type() {
        let ns = Namespace::of::<TokenCache>();
        assert!(ns.as_str().ends_with("TokenCache"));
        assert_eq!(ns, Namespace::of::<TokenCache>());
        assert_ne!(ns, Namespace::of::<u8>());
    }
}
