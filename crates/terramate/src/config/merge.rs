//! merged block representation
//!
//! Mergeable block types (`terramate`, `globals`) may appear several times
//! within one directory scope; their attribute sets combine by union with
//! collision detection at insertion time. The merged value is built up front
//! instead of deep-mutating parsed bodies.

use std::path::{Path, PathBuf};

use hcl_edit::Span as _;

use crate::error::{Error, ErrorKind, ErrorList, SourceRange};

/// Attribute collected during a merge: the file it came from plus the still
/// unevaluated expression.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub origin: PathBuf,
    pub expr: hcl_edit::expr::Expression,
    pub range: Option<SourceRange>,
}

/// Union of every occurrence of one mergeable block type within a directory
/// scope. Sub-blocks merge recursively under the same rule.
#[derive(Debug, Clone, Default)]
pub struct MergedBlock {
    pub attributes: indexmap::IndexMap<String, Attribute>,
    pub blocks: indexmap::IndexMap<String, MergedBlock>,
}

impl MergedBlock {
    /// Merges one parsed block occurrence. Attribute name collisions are
    /// reported with `collision_kind` and do not abort the merge, so one
    /// pass reports every colliding name.
    pub fn merge(
        &mut self,
        origin: &Path,
        source: &str,
        block: &hcl_edit::structure::Block,
        collision_kind: ErrorKind,
    ) -> Result<(), ErrorList> {
        let mut errs = ErrorList::new();
        self.merge_body(origin, source, &block.body, collision_kind, &mut errs);
        errs.into_result()
    }

    fn merge_body(
        &mut self,
        origin: &Path,
        source: &str,
        body: &hcl_edit::structure::Body,
        collision_kind: ErrorKind,
        errs: &mut ErrorList,
    ) {
        for attr in body.attributes() {
            let name = attr.key.value().as_str().to_string();
            let range = span_range(origin, source, attr.key.span());

            if self.attributes.contains_key(&name) {
                let mut err =
                    Error::new(collision_kind, format!("attribute {name:?} redeclared"));
                if let Some(range) = range {
                    err = err.at(range);
                }
                errs.push(err);
                continue;
            }

            self.attributes.insert(
                name,
                Attribute {
                    origin: origin.to_path_buf(),
                    expr: attr.value.clone(),
                    range,
                },
            );
        }

        for sub in body.blocks() {
            let name = sub.ident.value().as_str().to_string();
            self.blocks.entry(name).or_default().merge_body(
                origin,
                source,
                &sub.body,
                collision_kind,
                errs,
            );
        }
    }

    /// Folds another merged block (from an import) into this one.
    pub fn merge_from(
        &mut self,
        other: &MergedBlock,
        collision_kind: ErrorKind,
    ) -> Result<(), ErrorList> {
        let mut errs = ErrorList::new();
        self.merge_from_inner(other, collision_kind, &mut errs);
        errs.into_result()
    }

    fn merge_from_inner(
        &mut self,
        other: &MergedBlock,
        collision_kind: ErrorKind,
        errs: &mut ErrorList,
    ) {
        for (name, attr) in &other.attributes {
            if self.attributes.contains_key(name) {
                let mut err =
                    Error::new(collision_kind, format!("attribute {name:?} redeclared"));
                if let Some(range) = &attr.range {
                    err = err.at(range.clone());
                }
                errs.push(err);
                continue;
            }
            self.attributes.insert(name.clone(), attr.clone());
        }

        for (name, sub) in &other.blocks {
            self.blocks
                .entry(name.clone())
                .or_default()
                .merge_from_inner(sub, collision_kind, errs);
        }
    }

    /// Validates that only the listed sub-block types are present.
    pub fn validate_sub_blocks(&self, allowed: &[&str]) -> Result<(), ErrorList> {
        let mut errs = ErrorList::new();
        for name in self.blocks.keys() {
            if !allowed.contains(&name.as_str()) {
                errs.push(Error::new(
                    ErrorKind::Schema,
                    format!("unrecognized block {name:?}"),
                ));
            }
        }
        errs.into_result()
    }
}

/// Computes a source range from an `hcl-edit` span, when the node still
/// carries one.
pub fn span_range(
    origin: &Path,
    source: &str,
    span: Option<std::ops::Range<usize>>,
) -> Option<SourceRange> {
    span.map(|span| SourceRange::from_span(origin, source, span))
}
