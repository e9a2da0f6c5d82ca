use std::collections::BTreeMap;
use std::path::Path;

use regex_lite::Regex;

use super::builtin::DefineTransformer;
use super::registry::TransformerRegistry;
use super::{Content, ContentKind, Finalized, TransformContext, Transformer};
use crate::artifact::Artifact;
use crate::config::BuildConfig;
use crate::error::{BuildError, ConfigError, TransformError};
use crate::imports::{dedupe, scan_imports, ImportRef};

struct CompiledRule {
    test: Regex,
    exclude: Option<Regex>,
    chain: Vec<Box<dyn Transformer>>,
    output: ContentKind,
}

impl CompiledRule {
    fn matches(&self, identity: &str) -> bool {
        self.test.is_match(identity) && !self.exclude.as_ref().is_some_and(|x| x.is_match(identity))
    }
}

/// A module after its rule chain ran.
#[derive(Debug, Clone)]
pub struct TransformedModule {
    /// Index of the matched rule.
    pub rule: usize,
    /// `Script` or `Stylesheet`.
    pub kind: ContentKind,
    /// Script text; empty for a stylesheet, whose text is in `styles`.
    pub code: String,
    /// Dependencies in declaration order: transformer-declared first, then
    /// those found in script text.
    pub imports: Vec<ImportRef>,
    /// Auxiliary files registered by transformers.
    pub artifacts: Vec<Artifact>,
    /// Stylesheet text extracted into the owning chunk's CSS file.
    pub styles: Vec<String>,
}

/// Compiled transform rules.
///
/// Construction validates every chain, so a misconfigured rule fails the
/// build before any module is read.
pub struct Pipeline {
    rules: Vec<CompiledRule>,
    /// Applied after any chain that ends in a script.
    post: Option<DefineTransformer>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("rules", &self.rules.len())
            .field("define", &self.post.is_some())
            .finish()
    }
}

impl Pipeline {
    /// Instantiate, configure and validate every rule chain.
    ///
    /// `defines` is the replacement table for the post-chain define pass;
    /// an empty table disables the pass.
    pub fn new(
        config: &BuildConfig,
        registry: &TransformerRegistry,
        defines: BTreeMap<String, String>,
    ) -> Result<Self, BuildError> {
        let mut rules = Vec::with_capacity(config.rules.len());

        for (index, rule) in config.rules.iter().enumerate() {
            let test = compile(index, &rule.test)?;
            let exclude = rule
                .exclude
                .as_deref()
                .map(|p| compile(index, p))
                .transpose()?;

            if rule.chain.is_empty() {
                return Err(ConfigError::EmptyChain { rule: index }.into());
            }

            let mut chain = Vec::with_capacity(rule.chain.len());
            let mut kind = ContentKind::Source;
            for (position, entry) in rule.chain.iter().enumerate() {
                let mut transformer =
                    registry
                        .create(entry.name())
                        .ok_or_else(|| ConfigError::UnknownTransformer {
                            rule: index,
                            name: entry.name().to_string(),
                        })?;

                if !transformer.accepts().contains(&kind) {
                    return Err(BuildError::IncompatibleTransformChain {
                        rule: index,
                        position,
                        transformer: transformer.name().to_string(),
                        expected: kinds_list(transformer.accepts()),
                        found: kind,
                    });
                }

                transformer
                    .configure(entry.options(), config)
                    .map_err(ConfigError::from)?;
                kind = transformer.produces();
                chain.push(transformer);
            }

            if !kind.is_terminal() {
                return Err(BuildError::IncompatibleTransformChain {
                    rule: index,
                    position: chain.len(),
                    transformer: "(chunk)".to_string(),
                    expected: kinds_list(&[ContentKind::Script, ContentKind::Stylesheet]),
                    found: kind,
                });
            }

            rules.push(CompiledRule {
                test,
                exclude,
                chain,
                output: kind,
            });
        }

        let post = if defines.is_empty() {
            None
        } else {
            Some(DefineTransformer::new(defines).warn_unused(config.define.keys().cloned()))
        };

        Ok(Self { rules, post })
    }

    /// Index of the first rule matching `identity`.
    #[must_use]
    pub fn match_rule(&self, identity: &str) -> Option<usize> {
        self.rules.iter().position(|r| r.matches(identity))
    }

    /// Run `bytes` through the chain of the first rule matching `module`.
    ///
    /// Rules match against the absolute path with `/` separators.
    pub fn run(
        &self,
        module: &Path,
        id: &str,
        bytes: Vec<u8>,
        config: &BuildConfig,
    ) -> Result<TransformedModule, TransformError> {
        let identity = module.to_string_lossy().replace('\\', "/");
        let index = self
            .match_rule(&identity)
            .ok_or(TransformError::NoMatchingRule)?;
        let rule = &self.rules[index];

        let mut ctx = TransformContext::new(module, id, config);
        let mut content = Content::Source(bytes);
        for transformer in &rule.chain {
            content = transformer.transform(content, &mut ctx)?;
            debug_assert_eq!(content.kind(), transformer.produces());
        }

        if rule.output == ContentKind::Script {
            if let Some(define) = &self.post {
                content = define.transform(content, &mut ctx)?;
            }
        }

        let text = content.into_text("pipeline")?;
        let (mut imports, artifacts, mut styles) = ctx.into_parts();
        let code = match rule.output {
            // A chain ending in a stylesheet extracts it whole.
            ContentKind::Stylesheet => {
                styles.push(text);
                String::new()
            }
            _ => {
                imports.extend(scan_imports(&text));
                text
            }
        };

        Ok(TransformedModule {
            rule: index,
            kind: rule.output,
            code,
            imports: dedupe(imports),
            artifacts,
            styles,
        })
    }

    /// Finalize every transformer instance.
    pub fn finalize(&self) -> Result<Finalized, TransformError> {
        let mut all = Finalized::default();
        let mut absorb = |done: Finalized| {
            all.artifacts.extend(done.artifacts);
            all.warnings.extend(done.warnings);
        };

        for transformer in self.rules.iter().flat_map(|r| &r.chain) {
            absorb(transformer.finalize()?);
        }
        if let Some(define) = &self.post {
            absorb(define.finalize()?);
        }
        Ok(all)
    }
}

fn compile(rule: usize, pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
        rule,
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

fn kinds_list(kinds: &[ContentKind]) -> String {
    kinds
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(" | ")
}
