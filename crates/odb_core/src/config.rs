//! Database options.

/// Configuration for an [`crate::ObjectDb`].
///
/// # Example
///
/// ```rust,ignore
/// use odb_core::Options;
///
/// let options = Options::default().auto_register_relations(false);
/// ```
#[derive(Debug, Clone)]
pub struct Options {
    /// Whether `get_relation` may instantiate a declared relation
    /// constructor that was never explicitly initialized. When disabled,
    /// only relations registered through `init_relation` resolve.
    pub auto_register_relations: bool,
}

impl Options {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self {
            auto_register_relations: true,
        }
    }

    /// Sets whether relations auto-register on first lookup.
    #[must_use]
    pub fn auto_register_relations(mut self, value: bool) -> Self {
        self.auto_register_relations = value;
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = Options::default();
        assert!(options.auto_register_relations);
    }

    #[test]
    fn builder() {
        let options = Options::new().auto_register_relations(false);
        assert!(!options.auto_register_relations);
    }
}
