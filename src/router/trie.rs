//! Segment trie backing the [`Router`](crate::Router).
//!
//! Nodes live in one arena addressed by index; the root is index `0` and
//! stands for the path `/`. A node whose segment is written `{name}` is
//! dynamic and matches any single path segment.

use crate::{errors::Error, http::types::Method, router::route::Handler};
use std::{fmt, sync::Arc};

const ROOT: usize = 0;

/// One path component of a registered route.
pub(crate) struct UrlSegment {
    segment: String,
    handlers: Vec<(Method, Arc<dyn Handler>)>,
    children: Vec<usize>,
}

impl UrlSegment {
    #[inline]
    fn new(segment: &str) -> Self {
        Self {
            segment: segment.to_owned(),
            handlers: Vec::new(),
            children: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn is_dynamic(&self) -> bool {
        is_dynamic(&self.segment)
    }

    /// Placeholder name without braces, for dynamic segments.
    #[inline]
    pub(crate) fn param_name(&self) -> Option<&str> {
        match self.is_dynamic() {
            true => Some(&self.segment[1..self.segment.len() - 1]),
            false => None,
        }
    }

    #[inline]
    pub(crate) fn is_endpoint(&self) -> bool {
        !self.handlers.is_empty()
    }

    #[inline]
    fn handler(&self, method: Method) -> Option<&Arc<dyn Handler>> {
        self.handlers
            .iter()
            .find(|(m, _)| *m == method)
            .map(|(_, handler)| handler)
    }

    fn set_handler(&mut self, method: Method, handler: Arc<dyn Handler>) {
        match self.handlers.iter_mut().find(|(m, _)| *m == method) {
            Some(slot) => slot.1 = handler,
            None => self.handlers.push((method, handler)),
        }
    }
}

impl fmt::Debug for UrlSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let methods: Vec<Method> = self.handlers.iter().map(|(m, _)| *m).collect();

        f.debug_struct("UrlSegment")
            .field("segment", &self.segment)
            .field("methods", &methods)
            .field("children", &self.children)
            .finish()
    }
}

#[derive(Debug)]
pub(crate) struct SegmentTrie {
    nodes: Vec<UrlSegment>,
}

impl Default for SegmentTrie {
    fn default() -> Self {
        Self {
            nodes: vec![UrlSegment::new("/")],
        }
    }
}

impl SegmentTrie {
    #[inline]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `(method, template)`, replacing any
    /// handler already stored for that pair.
    pub(crate) fn insert(
        &mut self,
        method: Method,
        template: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<(), Error> {
        validate(template)?;

        let mut current = ROOT;
        for segment in split_path(template) {
            current = match self.child(current, |node| node.segment == segment) {
                Some(index) => index,
                None => {
                    if is_dynamic(segment) && self.child(current, UrlSegment::is_dynamic).is_some() {
                        return Err(invalid(template, "conflicting dynamic segment"));
                    }
                    self.push_child(current, segment)
                }
            };
        }

        self.nodes[current].set_handler(method, handler);
        Ok(())
    }

    /// Resolves `path` for `method`.
    ///
    /// At every level a static child equal to the path segment wins over a
    /// dynamic one; on the last segment the candidate must also carry a
    /// handler for `method`. Returns the handler and the `(name, value)`
    /// pairs bound by dynamic segments on the way down.
    pub(crate) fn lookup<'t, 'p>(
        &'t self,
        method: Method,
        path: &'p str,
    ) -> Option<(&'t dyn Handler, Vec<(&'t str, &'p str)>)> {
        let segments: Vec<&str> = split_path(path).collect();
        let mut params = Vec::new();
        let mut current = ROOT;

        for (i, &segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            let accepts = |node: &UrlSegment| !last || node.handler(method).is_some();

            let next = self
                .child(current, |node| {
                    !node.is_dynamic() && node.segment == segment && accepts(node)
                })
                .or_else(|| self.child(current, |node| node.is_dynamic() && accepts(node)))?;

            if let Some(name) = self.nodes[next].param_name() {
                params.push((name, segment));
            }
            current = next;
        }

        let handler = self.nodes[current].handler(method)?;
        Some((handler.as_ref(), params))
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    fn child<P: Fn(&UrlSegment) -> bool>(&self, parent: usize, predicate: P) -> Option<usize> {
        self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&index| predicate(&self.nodes[index]))
    }

    fn push_child(&mut self, parent: usize, segment: &str) -> usize {
        let index = self.nodes.len();
        self.nodes.push(UrlSegment::new(segment));
        self.nodes[parent].children.push(index);
        index
    }
}

/// Non-empty `/`-separated components of a path.
#[inline]
pub(crate) fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

#[inline]
fn is_dynamic(segment: &str) -> bool {
    segment.len() >= 2 && segment.starts_with('{') && segment.ends_with('}')
}

fn validate(template: &str) -> Result<(), Error> {
    if !template.starts_with('/') {
        return Err(invalid(template, "must start with `/`"));
    }

    let open = template.bytes().filter(|&b| b == b'{').count();
    let close = template.bytes().filter(|&b| b == b'}').count();
    if open != close {
        return Err(invalid(template, "mismatched braces"));
    }

    if split_path(template).any(|segment| segment == "{}") {
        return Err(invalid(template, "empty parameter name"));
    }

    Ok(())
}

#[inline]
fn invalid(template: &str, reason: &'static str) -> Error {
    Error::InvalidRoute {
        template: template.to_owned(),
        reason,
    }
}
