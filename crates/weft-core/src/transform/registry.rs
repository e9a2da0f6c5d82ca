use std::collections::BTreeMap;

use super::builtin::{
    CssTransformer, DefineTransformer, ExtractCssTransformer, FileTransformer, HtmlTransformer,
    JsonTransformer, ScriptTransformer,
};
use super::{ContentKind, Transformer};

type Factory = Box<dyn Fn() -> Box<dyn Transformer> + Send + Sync>;

struct Registration {
    accepts: Vec<ContentKind>,
    produces: ContentKind,
    factory: Factory,
}

/// Named transformer factories.
///
/// Each rule gets fresh instances so per-rule options never leak between
/// rules.
#[derive(Default)]
pub struct TransformerRegistry {
    entries: BTreeMap<String, Registration>,
}

impl std::fmt::Debug for TransformerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

impl TransformerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in transformer.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(|| Box::new(ScriptTransformer));
        registry.register(|| Box::new(JsonTransformer));
        registry.register(|| Box::new(HtmlTransformer));
        registry.register(|| Box::new(CssTransformer));
        registry.register(|| Box::new(ExtractCssTransformer));
        registry.register(|| Box::new(FileTransformer::default()));
        registry.register(|| Box::new(DefineTransformer::default()));
        registry
    }

    /// Register a factory under the name its transformers report. A later
    /// registration with the same name replaces the earlier one.
    pub fn register<F>(&mut self, factory: F)
    where
        F: Fn() -> Box<dyn Transformer> + Send + Sync + 'static,
    {
        let sample = factory();
        let name = sample.name().to_string();
        let registration = Registration {
            accepts: sample.accepts().to_vec(),
            produces: sample.produces(),
            factory: Box::new(factory),
        };
        self.entries.insert(name, registration);
    }

    /// Fresh, unconfigured instance of `name`.
    #[must_use]
    pub fn create(&self, name: &str) -> Option<Box<dyn Transformer>> {
        self.entries.get(name).map(|r| (r.factory)())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Names of transformers that accept `input` and produce `output`.
    #[must_use]
    pub fn find(&self, input: ContentKind, output: ContentKind) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, r)| r.produces == output && r.accepts.contains(&input))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransformError;
    use crate::transform::{Content, TransformContext};

    struct Shout;

    impl Transformer for Shout {
        fn name(&self) -> &str {
            "shout"
        }
        fn accepts(&self) -> &[ContentKind] {
            &[ContentKind::Script]
        }
        fn produces(&self) -> ContentKind {
            ContentKind::Script
        }
        fn transform(
            &self,
            input: Content,
            _ctx: &mut TransformContext<'_>,
        ) -> Result<Content, TransformError> {
            Ok(Content::Script(input.into_text(self.name())?.to_uppercase()))
        }
    }

    #[test]
    fn test_builtins_registered() {
        let registry = TransformerRegistry::with_builtins();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(
            names,
            vec!["css", "define", "extract-css", "file", "html", "json", "script"]
        );
    }

    #[test]
    fn test_find_by_kinds() {
        let registry = TransformerRegistry::with_builtins();
        assert_eq!(
            registry.find(ContentKind::Stylesheet, ContentKind::Script),
            vec!["extract-css"]
        );
        assert_eq!(
            registry.find(ContentKind::Source, ContentKind::Stylesheet),
            vec!["css"]
        );
    }

    #[test]
    fn test_register_custom() {
        let mut registry = TransformerRegistry::new();
        registry.register(|| Box::new(Shout));
        assert!(registry.contains("shout"));
        assert!(registry.create("shout").is_some());
        assert!(registry.create("missing").is_none());
        assert_eq!(
            registry.find(ContentKind::Script, ContentKind::Script),
            vec!["shout"]
        );
    }
}
