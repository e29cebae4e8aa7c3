/*!
# Background

Kea's DHCPv4, DHCPv6, and DDNS daemons each read one JSON configuration document.
Many independently described records (server settings, subnets, reservations, DDNS domains, TSIG keys) can end up in the same document, so changes to a document have to be made together and checked by Kea before they're allowed to replace what's on disk.

# Library

This library takes a list of desired records and brings the documents in line with them.

* `DocumentStore` parses each document once per pass and tracks which ones have been changed.
* `locator` finds the entry a record manages, first by the identity tag stored in the entry's `user-context`, then by the record's natural key (subnet CIDR, hardware address, domain name, and so on).
* `mutation` applies field-level changes to a located entry, leaving keys the record doesn't manage untouched.
* `allocator` picks scope ids and refuses duplicates that Kea would reject anyway.
* `commit` stages a document in a temporary directory, runs the daemon's own config test against it, and atomically replaces the live file only if the test passes.
* `Reconciler` ties these together; server records act as coordinators, so every record of a family in one pass is validated and written with a single commit.

# Current limitations

* The caller needs to make sure only one process reconciles a given document at a time.
* Kea is not told to reload its configuration; that's left to the service manager.
*/

#[macro_use]
extern crate log;

pub mod allocator;
pub mod commit;
pub mod config;
pub mod document;
pub mod error;
pub mod family;
pub mod locator;
pub mod mutation;
pub mod record;
pub mod reconcile;

pub use allocator::resolve_id;
pub use commit::{
    AcceptAll, CommandValidator, CommitCoordinator, CommitResult, StagedDocument, Validator,
};
pub use config::Config;
pub use document::{Document, DocumentStore};
pub use error::{Error, ErrorKind, Result};
pub use family::DocumentFamily;
pub use locator::{identity_tag, locate, IdentityIndex, Match};
pub use mutation::Outcome;
pub use reconcile::{CommitReport, ErrorReport, RecordReport, Reconciler, RunReport};
pub use record::{DesiredRecord, Ensure, Listing, RecordKind, RecordSpec};
