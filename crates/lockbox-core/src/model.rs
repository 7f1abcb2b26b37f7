//! Credential entries and the dataset that holds them.
//!
//! Entries are keyed by a case-insensitive id and the dataset keeps them
//! sorted ascending by that key after every mutation. `reused` is derived from
//! the whole dataset on demand and never stored on an entry.

use crate::error::EntryError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

pub const SCHEMA_VERSION: u32 = 1;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Weakness {
    TooShort,
    OnlyLetters,
    OnlyNumbers,
    NoSymbols,
}

impl Weakness {
    pub fn assess(password: &str) -> Option<Self> {
        if password.chars().count() < 8 {
            Some(Weakness::TooShort)
        } else if password.chars().all(|c| c.is_ascii_alphabetic()) {
            Some(Weakness::OnlyLetters)
        } else if password.chars().all(|c| c.is_ascii_digit()) {
            Some(Weakness::OnlyNumbers)
        } else if password.chars().all(|c| c.is_ascii_alphanumeric()) {
            Some(Weakness::NoSymbols)
        } else {
            None
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Weakness::TooShort => "Too short",
            Weakness::OnlyLetters => "Only letters",
            Weakness::OnlyNumbers => "Only numbers",
            Weakness::NoSymbols => "No symbols",
        }
    }
}

pub fn is_insecure_website(website: &str) -> bool {
    !website.is_empty()
        && !website
            .get(..6)
            .map(|scheme| scheme.eq_ignore_ascii_case("https:"))
            .unwrap_or(false)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry {
    pub id: String,
    pub username: String,
    pub password: String,
    pub website: String,
    pub notes: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub weak: Option<Weakness>,
    #[serde(default)]
    pub insecure: bool,
}

impl Entry {
    pub fn new(
        id: &str,
        username: &str,
        password: &str,
        website: &str,
        notes: &str,
        timestamp: Timestamp,
    ) -> Result<Self, EntryError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(EntryError::EmptyId);
        }
        if password.is_empty() {
            return Err(EntryError::EmptyPassword);
        }
        let mut entry = Entry {
            id: id.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            website: website.to_string(),
            notes: notes.trim().to_string(),
            timestamp,
            weak: None,
            insecure: false,
        };
        entry.refresh_flags();
        Ok(entry)
    }

    /// Recompute the persisted derived flags from the current field values.
    pub fn refresh_flags(&mut self) {
        self.weak = Weakness::assess(&self.password);
        self.insecure = is_insecure_website(&self.website);
    }

    pub fn key(&self) -> String {
        self.id.to_uppercase()
    }

    pub fn same_id(&self, id: &str) -> bool {
        self.key() == id.to_uppercase()
    }
}

/// Case-insensitive ordering on entry ids.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    a.to_uppercase().cmp(&b.to_uppercase())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "DatasetRepr")]
pub struct Dataset {
    #[serde(rename = "schema")]
    pub schema_version: u32,
    pub timestamp: Timestamp,
    entries: Vec<Entry>,
}

/// Wire shape of a dataset; converted through [`Dataset::with_schema`] so a
/// deserialized dataset is always sorted and free of duplicates.
#[derive(Deserialize)]
struct DatasetRepr {
    schema: u32,
    timestamp: Timestamp,
    #[serde(default)]
    entries: Vec<Entry>,
}

impl From<DatasetRepr> for Dataset {
    fn from(repr: DatasetRepr) -> Self {
        Dataset::with_schema(repr.schema, repr.timestamp, repr.entries)
    }
}

impl Default for Dataset {
    fn default() -> Self {
        Self::empty()
    }
}

impl Dataset {
    /// A dataset that has never been loaded or synchronized.
    pub fn empty() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            timestamp: 0,
            entries: Vec::new(),
        }
    }

    pub fn new(timestamp: Timestamp, entries: Vec<Entry>) -> Self {
        Self::with_schema(SCHEMA_VERSION, timestamp, entries)
    }

    pub(crate) fn with_schema(schema_version: u32, timestamp: Timestamp, entries: Vec<Entry>) -> Self {
        let mut dataset = Self {
            schema_version,
            timestamp,
            entries,
        };
        dataset.normalize();
        dataset
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Entry> {
        self.position(id).map(|idx| &self.entries[idx])
    }

    /// Insert `entry`, replacing any entry with the same id. When `replacing`
    /// names a different existing entry (an edit that renamed it), that entry
    /// is removed as well.
    pub fn upsert(&mut self, entry: Entry, replacing: Option<&str>) {
        if let Some(previous) = replacing {
            if !entry.same_id(previous) {
                self.remove(previous);
            }
        }
        match self.position(&entry.id) {
            Some(idx) => self.entries[idx] = entry,
            None => self.entries.push(entry),
        }
        self.sort();
    }

    pub fn remove(&mut self, id: &str) -> bool {
        match self.position(id) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Ids of entries whose password also appears on another entry.
    pub fn reused_ids(&self) -> BTreeSet<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for entry in &self.entries {
            *counts.entry(entry.password.as_str()).or_default() += 1;
        }
        self.entries
            .iter()
            .filter(|e| counts.get(e.password.as_str()).copied().unwrap_or(0) > 1)
            .map(|e| e.id.clone())
            .collect()
    }

    pub fn is_reused(&self, entry: &Entry) -> bool {
        self.entries
            .iter()
            .filter(|e| e.password == entry.password)
            .nth(1)
            .is_some()
    }

    /// Entries whose id or username contains `text`, ignoring case.
    pub fn filter<'a>(&'a self, text: &str) -> impl Iterator<Item = &'a Entry> + 'a {
        let needle = text.to_uppercase();
        self.entries.iter().filter(move |e| {
            needle.is_empty()
                || e.id.to_uppercase().contains(&needle)
                || e.username.to_uppercase().contains(&needle)
        })
    }

    fn position(&self, id: &str) -> Option<usize> {
        let key = id.to_uppercase();
        self.entries
            .binary_search_by(|e| e.key().cmp(&key))
            .ok()
    }

    fn sort(&mut self) {
        self.entries.sort_by_key(Entry::key);
    }

    /// Sort and collapse case-insensitive duplicates, keeping the most recent.
    fn normalize(&mut self) {
        self.sort();
        let mut out: Vec<Entry> = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            match out.last_mut() {
                Some(last) if last.key() == entry.key() => {
                    if entry.timestamp > last.timestamp {
                        *last = entry;
                    }
                }
                _ => out.push(entry),
            }
        }
        self.entries = out;
    }
}
