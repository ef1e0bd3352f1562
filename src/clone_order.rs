//! # Clone Ordering
//!
//! When a new repository borrows objects from another (its `reference`),
//! the reference has to exist on disk before the dependent is cloned.
//! This module orders a batch of not-yet-present repositories so that every
//! reference comes first.
//!
//! ## Process
//!
//! The ordering is an iterative fixed point over an owned list of pending
//! paths. Each pass moves every entry whose reference is satisfied (no
//! reference, already present locally, or placed by an earlier pass) to the
//! output. Entries still waiting carry over to the next pass. Passing over
//! the list until it stops shrinking avoids recursion, so deep reference
//! chains cannot overflow the stack.
//!
//! Entries left over when a pass makes no progress have a cyclic or missing
//! reference. They are kept, in their original relative order, after the
//! resolved ones: the clone phase creates them without a reference and a
//! later repack can fix up object sharing. Nothing is ever dropped.

use std::collections::HashSet;

use crate::manifest::Manifest;

/// Clone sequence produced by [`resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloneOrder {
    /// Paths whose references are satisfied, in dependency order.
    pub ordered: Vec<String>,
    /// Paths with cyclic or unresolvable references, in input order.
    pub unresolved: Vec<String>,
}

impl CloneOrder {
    pub fn len(&self) -> usize {
        self.ordered.len() + self.unresolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full clone sequence: resolved paths followed by unresolved ones.
    pub fn into_sequence(self) -> Vec<String> {
        let mut sequence = self.ordered;
        sequence.extend(self.unresolved);
        sequence
    }
}

/// Orders `pending` so that references are cloned before their dependents.
///
/// `exists` reports whether a path is already present locally. Duplicate
/// paths in `pending` are collapsed to their first occurrence.
pub fn resolve(
    pending: &[String],
    manifest: &Manifest,
    exists: impl Fn(&str) -> bool,
) -> CloneOrder {
    let mut seen = HashSet::new();
    let mut waiting: Vec<&str> = pending
        .iter()
        .map(String::as_str)
        .filter(|p| seen.insert(*p))
        .collect();

    let mut resolved: HashSet<&str> = HashSet::new();
    let mut ordered = Vec::with_capacity(waiting.len());

    while !waiting.is_empty() {
        let before = waiting.len();
        let mut carry = Vec::with_capacity(before);

        for path in waiting {
            let reference = manifest.get(path).and_then(|e| e.reference.as_deref());
            let satisfied = match reference {
                None => true,
                Some(r) if r == path => false,
                Some(r) => resolved.contains(r) || exists(r),
            };
            if satisfied {
                resolved.insert(path);
                ordered.push(path.to_string());
            } else {
                carry.push(path);
            }
        }

        waiting = carry;
        if waiting.len() == before {
            break;
        }
    }

    CloneOrder {
        ordered,
        unresolved: waiting.into_iter().map(str::to_string).collect(),
    }
}
