// only enables the `doc_cfg` feature when
// the `docsrs` configuration attribute is defined
#![cfg_attr(docsrs, feature(doc_cfg))]

mod file_name;
mod stash;

pub use file_name::{generate_file_name, normalize_name, FALLBACK_EXTENSION};
pub use stash::{LocalStash, StashedFile, StorageError};
