//! Member records: cached in memory, created on first sight, written through
//! to the store.
//!
//! Each record sits behind its own mutex so updates to one member serialize
//! while different members proceed in parallel. Store failures are logged and
//! the in-memory record stays authoritative.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::lock;
use crate::member::MemberRecord;
use crate::storage::Store;

type MemberKey = (String, String);

pub struct MemberTracker {
    store: Arc<dyn Store>,
    records: Mutex<HashMap<MemberKey, Arc<Mutex<MemberRecord>>>>,
}

impl MemberTracker {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Current record, creating a default one if the member is unknown.
    pub fn get(&self, community_id: &str, member_id: &str) -> MemberRecord {
        let entry = self.entry(community_id, member_id);
        let record = lock(&entry).clone();
        record
    }

    /// Applies `f` to the member's record and persists it if anything changed.
    pub fn modify<T, F>(&self, community_id: &str, member_id: &str, f: F) -> T
    where
        F: FnOnce(&mut MemberRecord) -> T,
    {
        let entry = self.entry(community_id, member_id);
        let mut record = lock(&entry);
        let before = record.clone();
        let out = f(&mut record);
        if *record != before {
            self.persist(&record);
        }
        out
    }

    fn entry(&self, community_id: &str, member_id: &str) -> Arc<Mutex<MemberRecord>> {
        let key = (community_id.to_string(), member_id.to_string());
        if let Some(entry) = lock(&self.records).get(&key) {
            return Arc::clone(entry);
        }

        let (record, created) = match self.store.load_member(community_id, member_id) {
            Ok(Some(record)) => (record, false),
            Ok(None) => (MemberRecord::new(community_id, member_id), true),
            Err(err) => {
                tracing::warn!(
                    community_id = %community_id,
                    member_id = %member_id,
                    error = %err,
                    "Failed to load member record; starting fresh"
                );
                (MemberRecord::new(community_id, member_id), true)
            }
        };

        let mut records = lock(&self.records);
        if let Some(existing) = records.get(&key) {
            return Arc::clone(existing);
        }
        let entry = Arc::new(Mutex::new(record));
        records.insert(key, Arc::clone(&entry));
        drop(records);

        if created {
            let record = lock(&entry);
            self.persist(&record);
        }
        entry
    }

    fn persist(&self, record: &MemberRecord) {
        if let Err(err) = self.store.save_member(record) {
            tracing::warn!(
                community_id = %record.community_id,
                member_id = %record.member_id,
                error = %err,
                "Failed to persist member record"
            );
        }
    }
}
