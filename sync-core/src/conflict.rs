//! Field-level conflict resolution for data records.
//!
//! A conflict exists when the server holds a newer version than the one the
//! local edit was based on. Bodies are merged field by field:
//! - fields only on one side are kept
//! - fields on both sides take the value with the later `updated_at`
//! - on equal timestamps the remote value wins, so every client merging the
//!   same pair converges on the same body

use std::collections::BTreeSet;
use sync_types::{ConflictRecord, DataRecordPayload, RecordBody, RemoteRecord};

/// True if the remote record is newer than the local edit's base version.
pub fn has_conflict(local: &DataRecordPayload, remote: &RemoteRecord) -> bool {
    remote.version > local.local_version
}

/// Merge a local record against its remote counterpart.
pub fn resolve(local: &DataRecordPayload, remote: &RemoteRecord) -> ConflictRecord {
    let mut merged_body = RecordBody::new();
    let mut detected_fields = BTreeSet::new();

    for (name, remote_field) in &remote.body {
        match local.body.get(name) {
            Some(local_field) => {
                if local_field.value != remote_field.value {
                    detected_fields.insert(name.clone());
                }
                let winner = if local_field.updated_at > remote_field.updated_at {
                    local_field
                } else {
                    remote_field
                };
                merged_body.insert(name.clone(), winner.clone());
            }
            None => {
                merged_body.insert(name.clone(), remote_field.clone());
            }
        }
    }

    for (name, local_field) in &local.body {
        merged_body
            .entry(name.clone())
            .or_insert_with(|| local_field.clone());
    }

    ConflictRecord {
        local_version: local.local_version,
        remote_version: remote.version,
        merged_body,
        detected_fields,
    }
}
