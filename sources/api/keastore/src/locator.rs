//! Finding the document entry that corresponds to a desired record.
//!
//! Entries we create carry an identity tag in their `user-context` map.  The tag wins over
//! anything else, so a record keeps its entry even when its natural key (a subnet, an
//! identifier, a domain name) changes.  Entries authored elsewhere have no tag, and are
//! matched by natural key instead, which lets us adopt them.

use serde_json::{Map, Value};
use snafu::ensure;
use std::collections::HashMap;

use crate::error::{self, Result};
use crate::family::keys;
use crate::record::RecordKind;

/// Returns the identity tag stored in an entry, if it has one.
pub fn identity_tag<'a>(entry: &'a Value, tag_key: &str) -> Option<&'a str> {
    entry.get(keys::USER_CONTEXT)?.get(tag_key)?.as_str()
}

/// Stores an identity tag in an entry's `user-context`, leaving other context keys alone.
pub(crate) fn set_identity_tag(entry: &mut Map<String, Value>, tag_key: &str, tag: &str) {
    let context = entry
        .entry(keys::USER_CONTEXT)
        .or_insert_with(|| Value::Object(Map::new()));
    if !context.is_object() {
        warn!("Replacing non-map user-context while tagging '{}'", tag);
        *context = Value::Object(Map::new());
    }
    if let Some(context) = context.as_object_mut() {
        context.insert(tag_key.to_string(), Value::String(tag.to_string()));
    }
}

/// Positions of tagged entries in a container, by tag.
#[derive(Debug, Default)]
pub struct IdentityIndex<'a> {
    by_tag: HashMap<&'a str, Vec<usize>>,
}

impl<'a> IdentityIndex<'a> {
    pub fn build(entries: &'a [Value], tag_key: &str) -> Self {
        let mut by_tag: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            if let Some(tag) = identity_tag(entry, tag_key) {
                by_tag.entry(tag).or_default().push(i);
            }
        }
        Self { by_tag }
    }

    pub fn lookup(&self, tag: &str) -> &[usize] {
        self.by_tag.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// How an entry was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
    Identity(usize),
    NaturalKey(usize),
}

impl Match {
    pub fn index(&self) -> usize {
        match self {
            Match::Identity(i) | Match::NaturalKey(i) => *i,
        }
    }
}

/// Finds the entry for `tag` in `entries`: first by identity tag, then by the first untagged
/// entry the natural key predicate accepts.  An entry tagged for another record is never ours.
/// More than one entry with the tag is an error, since we can't know which one is ours.
pub fn locate<F>(
    entries: &[Value],
    kind: RecordKind,
    tag_key: &str,
    tag: &str,
    natural: F,
) -> Result<Option<Match>>
where
    F: Fn(&Map<String, Value>) -> bool,
{
    let index = IdentityIndex::build(entries, tag_key);
    match index.lookup(tag) {
        [] => {}
        [only] => return Ok(Some(Match::Identity(*only))),
        many => {
            return error::AmbiguousIdentitySnafu {
                kind,
                tag,
                count: many.len(),
            }
            .fail()
        }
    }

    Ok(entries
        .iter()
        .position(|entry| {
            identity_tag(entry, tag_key).is_none() && entry.as_object().map_or(false, &natural)
        })
        .map(Match::NaturalKey))
}

/// Checks that no more than one entry across several containers carries `tag`, and returns
/// its (container, entry) position if one does.
pub(crate) fn locate_tagged<'a, I>(
    containers: I,
    kind: RecordKind,
    tag_key: &str,
    tag: &str,
) -> Result<Option<(usize, usize)>>
where
    I: IntoIterator<Item = &'a [Value]>,
{
    let found: Vec<(usize, usize)> = containers
        .into_iter()
        .enumerate()
        .flat_map(|(c, entries)| {
            IdentityIndex::build(entries, tag_key)
                .lookup(tag)
                .iter()
                .map(move |&e| (c, e))
                .collect::<Vec<_>>()
        })
        .collect();
    ensure!(
        found.len() <= 1,
        error::AmbiguousIdentitySnafu {
            kind,
            tag,
            count: found.len(),
        }
    );
    Ok(found.first().copied())
}
