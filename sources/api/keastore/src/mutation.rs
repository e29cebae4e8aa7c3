//! Applying a desired record to a located entry.
//!
//! Updates start from a copy of the existing entry and only overwrite the keys the record
//! owns, so keys authored by someone else survive.  The rebuilt entry is compared with the old
//! one before anything is replaced; an identical result leaves the document alone.

use serde::Serialize;
use serde_json::{Map, Value};
use snafu::OptionExt;

use crate::error::{self, Result};
use crate::locator::set_identity_tag;

/// What reconciling one record did to its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
    Removed,
    AlreadyAbsent,
}

impl Outcome {
    /// Whether the document changed, and so needs to be committed.
    pub fn changed(&self) -> bool {
        matches!(self, Outcome::Created | Outcome::Updated | Outcome::Removed)
    }
}

/// Builds the desired form of an entry.  `base` is the existing entry, if there is one; the
/// identity tag is written first so that it leads new entries.
pub(crate) fn render_entry<F>(
    base: Option<&Value>,
    tag_key: &str,
    tag: &str,
    write: F,
) -> Result<Value>
where
    F: FnOnce(&mut Map<String, Value>) -> Result<()>,
{
    let mut entry = match base {
        Some(existing) => existing
            .as_object()
            .cloned()
            .context(error::InternalSnafu {
                msg: "located entry is not an object",
            })?,
        None => Map::new(),
    };
    set_identity_tag(&mut entry, tag_key, tag);
    write(&mut entry)?;
    Ok(Value::Object(entry))
}

/// Puts a rendered entry in place of the located one, or at the end if nothing was located.
pub(crate) fn place_entry(entries: &mut Vec<Value>, located: Option<usize>, entry: Value) -> Outcome {
    match located {
        Some(i) if entries[i] == entry => Outcome::Unchanged,
        Some(i) => {
            entries[i] = entry;
            Outcome::Updated
        }
        None => {
            entries.push(entry);
            Outcome::Created
        }
    }
}

/// Renders and places an entry in one step.
pub(crate) fn upsert_entry<F>(
    entries: &mut Vec<Value>,
    located: Option<usize>,
    tag_key: &str,
    tag: &str,
    write: F,
) -> Result<Outcome>
where
    F: FnOnce(&mut Map<String, Value>) -> Result<()>,
{
    let entry = render_entry(located.map(|i| &entries[i]), tag_key, tag, write)?;
    Ok(place_entry(entries, located, entry))
}

/// Removes the located entry; an entry that was never there isn't an error.
pub(crate) fn remove_entry(entries: &mut Vec<Value>, located: Option<usize>) -> Outcome {
    match located {
        Some(i) => {
            entries.remove(i);
            Outcome::Removed
        }
        None => Outcome::AlreadyAbsent,
    }
}

/// Applies a settings change to a singleton section.  `write` works on a copy; the section is
/// only replaced when the copy differs.  `present` says whether any owned key existed before.
pub(crate) fn update_section<F>(
    section: &mut Map<String, Value>,
    present: bool,
    write: F,
) -> Result<Outcome>
where
    F: FnOnce(&mut Map<String, Value>) -> Result<()>,
{
    let mut updated = section.clone();
    write(&mut updated)?;
    if updated == *section {
        return Ok(Outcome::Unchanged);
    }
    *section = updated;
    Ok(if present {
        Outcome::Updated
    } else {
        Outcome::Created
    })
}

/// Removes the owned keys of a singleton, leaving the rest of its section in place.
pub(crate) fn remove_keys(section: &mut Map<String, Value>, owned: &[&str]) -> Outcome {
    let mut removed = false;
    for key in owned {
        removed |= section.shift_remove(*key).is_some();
    }
    if removed {
        Outcome::Removed
    } else {
        Outcome::AlreadyAbsent
    }
}

/// Sets `key` to `value`, or removes it when there's no value.
pub(crate) fn set_or_remove(entry: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    match value {
        Some(value) => {
            entry.insert(key.to_string(), value);
        }
        None => {
            entry.shift_remove(key);
        }
    }
}
