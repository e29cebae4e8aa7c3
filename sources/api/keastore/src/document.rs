//! The document store keeps one parsed Kea document per path for the duration of a
//! reconciliation pass, along with the set of paths whose in-memory copy no longer matches
//! what's on disk.

use serde_json::{Map, Value};
use snafu::{ensure, OptionExt, ResultExt};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{self, Result};
use crate::family::DocumentFamily;

/// A parsed Kea document.  The tree is kept generic so that anything we don't manage survives
/// a load/save cycle untouched, in its original key order.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    family: DocumentFamily,
    path: PathBuf,
    root: Value,
}

impl Document {
    pub(crate) fn new<P: Into<PathBuf>>(family: DocumentFamily, path: P, root: Value) -> Result<Self> {
        let path = path.into();
        let root_map = root.as_object().context(error::InvalidDocumentSnafu {
            path: &path,
            location: "/",
            expected: "an object",
        })?;
        if let Some(section) = root_map.get(family.root_key()) {
            ensure!(
                section.is_object(),
                error::InvalidDocumentSnafu {
                    path: &path,
                    location: family.root_key(),
                    expected: "an object",
                }
            );
        }
        Ok(Self { family, path, root })
    }

    pub fn family(&self) -> DocumentFamily {
        self.family
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// The family's top-level section, if the document has one.
    pub(crate) fn section(&self) -> Result<Option<&Map<String, Value>>> {
        let root = self.root.as_object().context(error::InternalSnafu {
            msg: "document root is not an object",
        })?;
        object(root, self.family.root_key(), &self.path)
    }

    /// The family's top-level section, created from the family skeleton if missing.
    pub(crate) fn section_mut(&mut self) -> Result<&mut Map<String, Value>> {
        let family = self.family;
        let path = &self.path;
        let root = self.root.as_object_mut().context(error::InternalSnafu {
            msg: "document root is not an object",
        })?;
        root.entry(family.root_key())
            .or_insert_with(|| family.default_section())
            .as_object_mut()
            .context(error::InvalidDocumentSnafu {
                path,
                location: family.root_key(),
                expected: "an object",
            })
    }

    /// Pretty-printed form of the document, as written to disk.
    pub fn render(&self) -> Result<String> {
        let mut rendered = serde_json::to_string_pretty(&self.root)
            .context(error::SerializeSnafu { path: &self.path })?;
        rendered.push('\n');
        Ok(rendered)
    }
}

/// Returns the object under `key`, or None if there's nothing there.
pub(crate) fn object<'a>(
    map: &'a Map<String, Value>,
    key: &str,
    path: &Path,
) -> Result<Option<&'a Map<String, Value>>> {
    match map.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_object()
            .map(Some)
            .context(error::InvalidDocumentSnafu {
                path,
                location: key,
                expected: "an object",
            }),
    }
}

/// Returns the object under `key`, inserting an empty one if there's nothing there.
pub(crate) fn object_mut<'a>(
    map: &'a mut Map<String, Value>,
    key: &str,
    path: &Path,
) -> Result<&'a mut Map<String, Value>> {
    map.entry(key)
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .context(error::InvalidDocumentSnafu {
            path,
            location: key,
            expected: "an object",
        })
}

/// Returns the array under `key`, or an empty slice if there's nothing there.
pub(crate) fn array<'a>(map: &'a Map<String, Value>, key: &str, path: &Path) -> Result<&'a [Value]> {
    match map.get(key) {
        None => Ok(&[]),
        Some(value) => value
            .as_array()
            .map(Vec::as_slice)
            .context(error::InvalidDocumentSnafu {
                path,
                location: key,
                expected: "an array",
            }),
    }
}

/// Returns the array under `key`, inserting an empty one if there's nothing there.
pub(crate) fn array_mut<'a>(
    map: &'a mut Map<String, Value>,
    key: &str,
    path: &Path,
) -> Result<&'a mut Vec<Value>> {
    map.entry(key)
        .or_insert_with(|| Value::Array(Vec::new()))
        .as_array_mut()
        .context(error::InvalidDocumentSnafu {
            path,
            location: key,
            expected: "an array",
        })
}

/// Parsed documents for the current pass, keyed by path, plus which of them are dirty.
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: HashMap<PathBuf, Document>,
    dirty: BTreeSet<PathBuf>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the document at `path`, reading it from disk the first time it's requested.  A
    /// file that doesn't exist yet is replaced by the family's default skeleton.
    pub fn load(&mut self, path: &Path, family: DocumentFamily) -> Result<&mut Document> {
        if !self.documents.contains_key(path) {
            let document = Self::read_document(path, family)?;
            self.documents.insert(path.to_path_buf(), document);
        }
        let document = self
            .documents
            .get_mut(path)
            .context(error::InternalSnafu {
                msg: format!("document '{}' missing right after load", path.display()),
            })?;
        ensure!(
            document.family == family,
            error::FamilyMismatchSnafu {
                path,
                loaded: document.family,
                requested: family,
            }
        );
        Ok(document)
    }

    fn read_document(path: &Path, family: DocumentFamily) -> Result<Document> {
        let root = match fs::read_to_string(path) {
            Ok(contents) => {
                debug!("Parsing {} document '{}'", family, path.display());
                serde_json::from_str(&contents).context(error::DocumentParseSnafu { path })?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(
                    "'{}' does not exist, starting from an empty {} document",
                    path.display(),
                    family
                );
                family.default_document()
            }
            Err(e) => return Err(e).context(error::DocumentReadSnafu { path }),
        };
        Document::new(family, path, root)
    }

    pub fn get(&self, path: &Path) -> Option<&Document> {
        self.documents.get(path)
    }

    pub fn mark_dirty(&mut self, path: &Path) {
        trace!("Marking '{}' dirty", path.display());
        self.dirty.insert(path.to_path_buf());
    }

    pub fn is_dirty(&self, path: &Path) -> bool {
        self.dirty.contains(path)
    }

    /// Dirty paths, in sorted order.
    pub fn dirty_paths(&self) -> Vec<PathBuf> {
        self.dirty.iter().cloned().collect()
    }

    pub(crate) fn clear_dirty(&mut self, path: &Path) {
        self.dirty.remove(path);
    }

    /// Forgets every cached document and dirty mark, so the next pass starts from disk.
    pub fn reset(&mut self) {
        self.documents.clear();
        self.dirty.clear();
    }
}
