//! Route resolution for parameterized templates.
//!
//! A template such as `/users/id:\d+/posts` carries its parameters inline as
//! `name:pattern` segments. [`ParamsTree::mark`] records each pattern on the
//! tree node named after the parameter, so registration and dispatch both use
//! the pattern-free path (`/users/id/posts`). [`ParamsTree::find`] walks a
//! runtime path back to that normalized path and extracts the captures.
//!
//! Resolved route shapes are memoized per verb. The cache is append-only and
//! consulted before any tree walk, so once a shape has been resolved later
//! registrations do not change how it resolves.

use crate::context::Params;
use crate::error::{Error, Result};
use crate::logging::{debug, trace};
use crate::tree::{segments, NodeId, PathTree};
use crate::verb::Verb;
use parking_lot::RwLock;
use regex::Regex;
use std::fmt;

/// A compiled parameter pattern, applied unanchored to a single segment.
#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self> {
        let regex = Regex::new(source).map_err(|source_err| Error::InvalidPattern {
            pattern: source.to_string(),
            source: source_err,
        })?;
        Ok(Self { regex })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    pub fn is_match(&self, segment: &str) -> bool {
        self.regex.is_match(segment)
    }

    /// Every capture group of the first match, percent-decoded.
    ///
    /// Index 0 is the whole match; groups that did not participate are empty.
    pub fn captures(&self, segment: &str) -> Option<Vec<String>> {
        let captures = self.regex.captures(segment)?;
        Some(
            captures
                .iter()
                .map(|group| decode(group.map_or("", |m| m.as_str())))
                .collect(),
        )
    }
}

fn decode(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => String::from_utf8_lossy(&urlencoding::decode_binary(raw.as_bytes())).into_owned(),
    }
}

/// Split a `name:pattern` segment at its first colon.
///
/// Returns `None` for literal segments, including ones with an empty name or
/// an empty pattern.
pub fn split_param(segment: &str) -> Option<(&str, &str)> {
    segment
        .split_once(':')
        .filter(|(name, pattern)| !name.is_empty() && !pattern.is_empty())
}

/// Whether any segment of `template` is a parameter.
pub fn has_params(template: &str) -> bool {
    segments(template).any(|segment| split_param(segment).is_some())
}

/// The template with every `name:pattern` reduced to `name`.
pub fn strip_params(template: &str) -> String {
    let names: Vec<&str> = segments(template)
        .map(|segment| split_param(segment).map_or(segment, |(name, _)| name))
        .collect();
    format!("/{}", names.join("/"))
}

#[derive(Debug, Clone)]
struct RuleSegment {
    name: String,
    pattern: Option<Pattern>,
}

/// A resolved route shape: literal segments and `name:pattern` segments.
///
/// Renders back to its canonical string, e.g. `/a/b:.+`.
#[derive(Debug, Clone)]
pub struct Rule {
    segments: Vec<RuleSegment>,
}

impl Rule {
    /// Compile a canonical rule string.
    pub fn compile(rule: &str) -> Result<Self> {
        let segments = segments(rule)
            .map(|segment| -> Result<RuleSegment> {
                Ok(match parse_segment(segment)? {
                    Segment::Literal(name) => RuleSegment {
                        name: name.to_string(),
                        pattern: None,
                    },
                    Segment::Param(name, pattern) => RuleSegment {
                        name: name.to_string(),
                        pattern: Some(pattern),
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { segments })
    }

    /// Whether every path segment satisfies the matching rule segment.
    pub fn matches(&self, names: &[&str]) -> bool {
        names.len() == self.segments.len()
            && self
                .segments
                .iter()
                .zip(names)
                .all(|(segment, name)| match &segment.pattern {
                    Some(pattern) => pattern.is_match(name),
                    None => segment.name == *name,
                })
    }

    /// Extract the captures of `path` and the normalized path.
    pub fn parse(&self, path: &str) -> Resolution {
        let mut params = Params::new();
        for (segment, name) in self.segments.iter().zip(segments(path)) {
            if let Some(captures) = segment
                .pattern
                .as_ref()
                .and_then(|pattern| pattern.captures(name))
            {
                params.insert(segment.name.clone(), captures);
            }
        }
        Resolution {
            params,
            normalized: self.normalized(),
        }
    }

    /// The rule without its patterns.
    pub fn normalized(&self) -> String {
        let names: Vec<&str> = self.segments.iter().map(|s| s.name.as_str()).collect();
        format!("/{}", names.join("/"))
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            match &segment.pattern {
                Some(pattern) => write!(f, "/{}:{}", segment.name, pattern.as_str())?,
                None => write!(f, "/{}", segment.name)?,
            }
        }
        Ok(())
    }
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub params: Params,
    pub normalized: String,
}

#[derive(Debug)]
struct CacheEntry {
    verb: Verb,
    rule: Rule,
}

enum Segment<'a> {
    Literal(&'a str),
    Param(&'a str, Pattern),
}

fn parse_segment(segment: &str) -> Result<Segment<'_>> {
    Ok(match split_param(segment) {
        Some((name, pattern)) => Segment::Param(name, Pattern::new(pattern)?),
        None => Segment::Literal(segment),
    })
}

/// Pattern resolver over a [`PathTree`] it does not own.
#[derive(Debug, Default)]
pub struct ParamsTree {
    cache: RwLock<Vec<CacheEntry>>,
}

impl ParamsTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the patterns of `template` for every verb in `verbs`.
    ///
    /// Templates without a parameter segment are ignored. Every pattern is
    /// compiled before the tree is touched, so an invalid pattern leaves the
    /// tree unchanged.
    pub fn mark(&self, tree: &mut PathTree, verbs: &[Verb], template: &str) -> Result<()> {
        if !has_params(template) {
            return Ok(());
        }
        debug!(template, verbs = ?verbs, "Marking parameterized route");

        let parsed = segments(template)
            .map(parse_segment)
            .collect::<Result<Vec<_>>>()?;

        let any = [Verb::any()];
        let verbs = if verbs.is_empty() { &any[..] } else { verbs };

        let mut current = tree.root();
        for segment in parsed {
            match segment {
                Segment::Literal(name) => current = tree.child_or_make(current, name),
                Segment::Param(name, pattern) => {
                    current = tree.child_or_make(current, name);
                    for verb in verbs {
                        tree.push_pattern(current, verb.clone(), pattern.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolve `path` for `verb`. `None` is a routing miss.
    pub fn find(&self, tree: &PathTree, verb: &Verb, path: &str) -> Option<Resolution> {
        let names: Vec<&str> = segments(path).collect();

        if let Some(resolution) = self.cached(verb, &names, path) {
            return Some(resolution);
        }

        let mut ends = vec![tree.root()];
        for name in &names {
            ends = ends
                .iter()
                .flat_map(|&id| tree.children(id))
                .copied()
                .filter(|&child| accepts(tree, child, verb, name))
                .collect();

            if ends.is_empty() {
                debug!(verb = %verb, path, "No route matches path");
                return None;
            }
        }

        // `max_by_key` keeps the last of equal maxima: the latest registration wins ties.
        let chain = ends
            .into_iter()
            .map(|end| {
                let mut chain = tree.ancestry(end);
                chain.remove(0);
                chain
            })
            .max_by_key(|chain| priority(tree, chain, verb, &names))?;

        let rule = build_rule(tree, &chain, verb, &names);
        debug!(verb = %verb, path, rule = %rule, "Resolved route");

        let resolution = rule.parse(path);
        self.cache.write().push(CacheEntry {
            verb: verb.clone(),
            rule,
        });
        Some(resolution)
    }

    /// Parse `path` against a canonical rule string.
    pub fn parse(&self, path: &str, rule: &str) -> Result<Resolution> {
        Ok(Rule::compile(rule)?.parse(path))
    }

    /// Number of memoized route shapes.
    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }

    fn cached(&self, verb: &Verb, names: &[&str], path: &str) -> Option<Resolution> {
        let cache = self.cache.read();
        let entry = cache
            .iter()
            .find(|entry| entry.verb == *verb && entry.rule.matches(names))?;
        trace!(verb = %verb, path, rule = %entry.rule, "Route cache hit");
        Some(entry.rule.parse(path))
    }
}

/// Patterns consulted for `verb` on `node`: exact verb first, then wildcard.
fn candidate_patterns<'t>(
    tree: &'t PathTree,
    node: NodeId,
    verb: &'t Verb,
) -> impl Iterator<Item = &'t Pattern> {
    verb.with_fallback()
        .flat_map(move |token| tree.node(node).patterns(token))
}

fn accepts(tree: &PathTree, node: NodeId, verb: &Verb, name: &str) -> bool {
    if !tree.node(node).has_params() {
        return tree.node(node).name() == name;
    }
    candidate_patterns(tree, node, verb).any(|pattern| pattern.is_match(name))
}

/// Literal nodes score one; parameter nodes score one only when a pattern
/// registered for the exact request verb matches.
fn priority(tree: &PathTree, chain: &[NodeId], verb: &Verb, names: &[&str]) -> usize {
    chain
        .iter()
        .zip(names)
        .filter(|&(&node, name)| {
            let node = tree.node(node);
            !node.has_params()
                || node
                    .patterns(verb.as_str())
                    .iter()
                    .any(|pattern| pattern.is_match(name))
        })
        .count()
}

fn build_rule(tree: &PathTree, chain: &[NodeId], verb: &Verb, names: &[&str]) -> Rule {
    let segments = chain
        .iter()
        .zip(names)
        .map(|(&node, name)| RuleSegment {
            name: tree.node(node).name().to_string(),
            pattern: candidate_patterns(tree, node, verb)
                .find(|pattern| pattern.is_match(name))
                .cloned(),
        })
        .collect();
    Rule { segments }
}
