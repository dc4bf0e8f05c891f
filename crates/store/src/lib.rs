//! Durable keyed storage for words and review statistics, backed by [`redb`].
//!
//! The store is the only shared mutable resource in the system. Every public
//! method is one transaction; redb serializes write transactions, which gives
//! the per-word atomic read-modify-write the stats updater relies on.
//!
//! # Tables
//!
//! | Name          | Key            | Value                               |
//! |---------------|----------------|-------------------------------------|
//! | `words`       | word id (u64)  | JSON-serialised [`Word`]            |
//! | `owner_words` | owner id (i64) | newline-separated word-id list      |
//! | `word_stats`  | word id (u64)  | JSON-serialised [`WordStats`]       |
//! | `nudges`      | owner id (i64) | local date of the last nudge        |
//! | `meta`        | &str           | id counter, sweep bookkeeping       |

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};

use tango_core::{OwnerId, Word, WordId, WordStats};

const WORDS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("words");
const OWNER_TABLE: TableDefinition<i64, &str> = TableDefinition::new("owner_words");
const STATS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("word_stats");
const NUDGES_TABLE: TableDefinition<i64, &str> = TableDefinition::new("nudges");
const META_TABLE: TableDefinition<&str, &str> = TableDefinition::new("meta");

const META_NEXT_WORD_ID: &str = "next_word_id";
const META_LAST_DUE_SWEEP: &str = "last_due_sweep";

pub struct WordStore {
    db: Database,
    path: PathBuf,
}

impl WordStore {
    /// Open or create the store database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(&path)
            .with_context(|| format!("opening word store at {}", path.display()))?;

        // Ensure tables exist.
        {
            let tx = db.begin_write()?;
            tx.open_table(WORDS_TABLE)?;
            tx.open_table(OWNER_TABLE)?;
            tx.open_table(STATS_TABLE)?;
            tx.open_table(NUDGES_TABLE)?;
            tx.open_table(META_TABLE)?;
            tx.commit()?;
        }

        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ── Words ────────────────────────────────────────────────────────────────

    /// Insert a new word for `owner`, allocating its id.
    pub fn insert_word(
        &self,
        owner: OwnerId,
        term: &str,
        definition: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Word> {
        let tx = self.db.begin_write()?;
        let word = {
            let mut meta = tx.open_table(META_TABLE)?;
            let next_id: u64 = meta
                .get(META_NEXT_WORD_ID)?
                .map(|v| v.value().parse().unwrap_or(1))
                .unwrap_or(1);
            meta.insert(META_NEXT_WORD_ID, (next_id + 1).to_string().as_str())?;

            let word = Word {
                id: next_id,
                owner,
                term: term.to_string(),
                definition: definition.to_string(),
                created_at,
                mastered: false,
            };

            let mut words = tx.open_table(WORDS_TABLE)?;
            words.insert(word.id, serde_json::to_vec(&word)?.as_slice())?;

            let mut owners = tx.open_table(OWNER_TABLE)?;
            let existing = owners
                .get(owner)?
                .map(|v| v.value().to_string())
                .unwrap_or_default();
            let updated = if existing.is_empty() {
                word.id.to_string()
            } else {
                format!("{existing}\n{}", word.id)
            };
            owners.insert(owner, updated.as_str())?;
            word
        };
        tx.commit()?;
        Ok(word)
    }

    /// Look up a single word by id.
    pub fn get_word(&self, id: WordId) -> Result<Option<Word>> {
        let tx = self.db.begin_read()?;
        let words = tx.open_table(WORDS_TABLE)?;
        match words.get(id)? {
            None => Ok(None),
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
        }
    }

    /// All words registered by `owner`, in insertion order.
    pub fn words_for_owner(&self, owner: OwnerId) -> Result<Vec<Word>> {
        let tx = self.db.begin_read()?;
        let owners = tx.open_table(OWNER_TABLE)?;
        let ids = match owners.get(owner)? {
            None => return Ok(Vec::new()),
            Some(v) => parse_id_list(v.value()),
        };

        let words = tx.open_table(WORDS_TABLE)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(v) = words.get(id)? {
                out.push(serde_json::from_slice(v.value())?);
            }
        }
        Ok(out)
    }

    /// First word with a matching term for `owner`, if any.
    pub fn find_by_term(&self, owner: OwnerId, term: &str) -> Result<Option<Word>> {
        Ok(self
            .words_for_owner(owner)?
            .into_iter()
            .find(|w| w.term == term))
    }

    /// Every owner with at least one registered word.
    pub fn all_owners(&self) -> Result<Vec<OwnerId>> {
        let tx = self.db.begin_read()?;
        let owners = tx.open_table(OWNER_TABLE)?;
        let mut out = Vec::new();
        for row in owners.iter()? {
            let (key, value) = row?;
            if !value.value().is_empty() {
                out.push(key.value());
            }
        }
        Ok(out)
    }

    /// Update term and/or definition of an existing word. Returns the
    /// updated word, or `None` when the id is unknown.
    pub fn update_word(
        &self,
        id: WordId,
        new_term: Option<&str>,
        new_definition: Option<&str>,
    ) -> Result<Option<Word>> {
        let tx = self.db.begin_write()?;
        let updated = {
            let mut words = tx.open_table(WORDS_TABLE)?;
            let Some(raw) = words.get(id)?.map(|v| v.value().to_vec()) else {
                return Ok(None);
            };
            let mut word: Word = serde_json::from_slice(&raw)?;
            if let Some(term) = new_term {
                word.term = term.to_string();
            }
            if let Some(definition) = new_definition {
                word.definition = definition.to_string();
            }
            words.insert(id, serde_json::to_vec(&word)?.as_slice())?;
            word
        };
        tx.commit()?;
        Ok(Some(updated))
    }

    /// Delete all of `owner`'s words matching `term`; returns the removed
    /// entries (empty when nothing matched). Stats rows go with them.
    pub fn delete_by_term(&self, owner: OwnerId, term: &str) -> Result<Vec<Word>> {
        let matches: Vec<Word> = self
            .words_for_owner(owner)?
            .into_iter()
            .filter(|w| w.term == term)
            .collect();
        if matches.is_empty() {
            return Ok(Vec::new());
        }

        let tx = self.db.begin_write()?;
        {
            let mut words = tx.open_table(WORDS_TABLE)?;
            let mut stats = tx.open_table(STATS_TABLE)?;
            for word in &matches {
                words.remove(word.id)?;
                stats.remove(word.id)?;
            }

            let mut owners = tx.open_table(OWNER_TABLE)?;
            let remaining = owners
                .get(owner)?
                .map(|v| parse_id_list(v.value()))
                .unwrap_or_default()
                .into_iter()
                .filter(|id| !matches.iter().any(|w| w.id == *id))
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join("\n");
            owners.insert(owner, remaining.as_str())?;
        }
        tx.commit()?;
        Ok(matches)
    }

    /// Mark a word as mastered, permanently removing it from due rotation.
    /// Returns `false` when the id is unknown.
    pub fn set_mastered(&self, id: WordId) -> Result<bool> {
        let tx = self.db.begin_write()?;
        let found = {
            let mut words = tx.open_table(WORDS_TABLE)?;
            let existing = words.get(id)?.map(|v| v.value().to_vec());
            match existing {
                None => false,
                Some(raw) => {
                    let mut word: Word = serde_json::from_slice(&raw)?;
                    word.mastered = true;
                    words.insert(id, serde_json::to_vec(&word)?.as_slice())?;
                    true
                }
            }
        };
        tx.commit()?;
        Ok(found)
    }

    // ── Stats ────────────────────────────────────────────────────────────────

    /// Fetch stats for a set of word ids; absent entries are simply missing
    /// from the returned map.
    pub fn stats_for(&self, ids: &[WordId]) -> Result<HashMap<WordId, WordStats>> {
        let tx = self.db.begin_read()?;
        let stats = tx.open_table(STATS_TABLE)?;
        let mut out = HashMap::with_capacity(ids.len());
        for &id in ids {
            if let Some(v) = stats.get(id)? {
                out.insert(id, serde_json::from_slice::<WordStats>(v.value())?);
            }
        }
        Ok(out)
    }

    /// Atomic read-modify-write of one word's stats row.
    ///
    /// The closure receives the current row (None on first outcome) and
    /// returns the replacement. The whole exchange happens inside a single
    /// write transaction, so overlapping sessions touching the same word
    /// cannot lose updates.
    pub fn upsert_stats<F>(&self, word_id: WordId, update: F) -> Result<WordStats>
    where
        F: FnOnce(Option<WordStats>) -> WordStats,
    {
        let tx = self.db.begin_write()?;
        let updated = {
            let mut stats = tx.open_table(STATS_TABLE)?;
            let current = match stats.get(word_id)? {
                None => None,
                Some(v) => Some(serde_json::from_slice::<WordStats>(v.value())?),
            };
            let updated = update(current);
            stats.insert(word_id, serde_json::to_vec(&updated)?.as_slice())?;
            updated
        };
        tx.commit()?;
        Ok(updated)
    }

    // ── Sweep bookkeeping ────────────────────────────────────────────────────

    /// Local calendar date (as `YYYY-MM-DD`) of the last nudge sent to
    /// `owner`, if any.
    pub fn last_nudge_date(&self, owner: OwnerId) -> Result<Option<String>> {
        let tx = self.db.begin_read()?;
        let nudges = tx.open_table(NUDGES_TABLE)?;
        Ok(nudges.get(owner)?.map(|v| v.value().to_string()))
    }

    pub fn record_nudge(&self, owner: OwnerId, date: &str) -> Result<()> {
        let tx = self.db.begin_write()?;
        {
            let mut nudges = tx.open_table(NUDGES_TABLE)?;
            nudges.insert(owner, date)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Local calendar date of the last completed due-batch pass.
    pub fn last_due_sweep_date(&self) -> Result<Option<String>> {
        let tx = self.db.begin_read()?;
        let meta = tx.open_table(META_TABLE)?;
        Ok(meta.get(META_LAST_DUE_SWEEP)?.map(|v| v.value().to_string()))
    }

    pub fn record_due_sweep(&self, date: &str) -> Result<()> {
        let tx = self.db.begin_write()?;
        {
            let mut meta = tx.open_table(META_TABLE)?;
            meta.insert(META_LAST_DUE_SWEEP, date)?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn parse_id_list(raw: &str) -> Vec<WordId> {
    raw.lines().filter_map(|s| s.parse().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> WordStore {
        WordStore::open(dir.path().join("words.redb")).unwrap()
    }

    #[test]
    fn insert_and_list_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let now = Utc::now();

        let a = store.insert_word(1, "apple", "りんご", now).unwrap();
        let b = store.insert_word(1, "banana", "バナナ", now).unwrap();
        store.insert_word(2, "cherry", "さくらんぼ", now).unwrap();

        assert_ne!(a.id, b.id);
        let words = store.words_for_owner(1).unwrap();
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].term, "apple");
        assert_eq!(words[1].term, "banana");
        assert_eq!(store.words_for_owner(3).unwrap().len(), 0);
    }

    #[test]
    fn ids_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("words.redb");
        let first_id = {
            let store = WordStore::open(&path).unwrap();
            store.insert_word(1, "a", "x", Utc::now()).unwrap().id
        };
        let store = WordStore::open(&path).unwrap();
        let second_id = store.insert_word(1, "b", "y", Utc::now()).unwrap().id;
        assert!(second_id > first_id, "id counter must persist across reopen");
        assert_eq!(store.words_for_owner(1).unwrap().len(), 2);
    }

    #[test]
    fn find_by_term_scopes_to_owner() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.insert_word(1, "apple", "りんご", Utc::now()).unwrap();

        assert!(store.find_by_term(1, "apple").unwrap().is_some());
        assert!(store.find_by_term(2, "apple").unwrap().is_none());
        assert!(store.find_by_term(1, "pear").unwrap().is_none());
    }

    #[test]
    fn update_word_changes_fields() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let word = store.insert_word(1, "aple", "りんご", Utc::now()).unwrap();

        let updated = store
            .update_word(word.id, Some("apple"), None)
            .unwrap()
            .unwrap();
        assert_eq!(updated.term, "apple");
        assert_eq!(updated.definition, "りんご");

        assert!(store.update_word(9999, Some("x"), None).unwrap().is_none());
    }

    #[test]
    fn delete_by_term_removes_words_index_and_stats() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let now = Utc::now();
        let word = store.insert_word(1, "apple", "りんご", now).unwrap();
        store.insert_word(1, "banana", "バナナ", now).unwrap();
        store
            .upsert_stats(word.id, |_| WordStats {
                word_id: word.id,
                attempts: 1,
                correct: 1,
                ease: 2.55,
                last_seen: now,
            })
            .unwrap();

        let removed = store.delete_by_term(1, "apple").unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].term, "apple");

        let words = store.words_for_owner(1).unwrap();
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].term, "banana");
        assert!(store.stats_for(&[word.id]).unwrap().is_empty());
        assert!(store.delete_by_term(1, "apple").unwrap().is_empty());
    }

    #[test]
    fn set_mastered_flips_flag() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let word = store.insert_word(1, "apple", "りんご", Utc::now()).unwrap();

        assert!(store.set_mastered(word.id).unwrap());
        assert!(store.get_word(word.id).unwrap().unwrap().mastered);
        assert!(!store.set_mastered(9999).unwrap());
    }

    #[test]
    fn upsert_stats_applies_closure_over_current_row() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let now = Utc::now();

        let first = store
            .upsert_stats(7, |current| {
                assert!(current.is_none());
                WordStats {
                    word_id: 7,
                    attempts: 1,
                    correct: 0,
                    ease: 2.35,
                    last_seen: now,
                }
            })
            .unwrap();
        assert_eq!(first.attempts, 1);

        let second = store
            .upsert_stats(7, |current| {
                let mut stats = current.unwrap();
                stats.attempts += 1;
                stats.correct += 1;
                stats
            })
            .unwrap();
        assert_eq!(second.attempts, 2);
        assert_eq!(second.correct, 1);

        let map = store.stats_for(&[7]).unwrap();
        assert_eq!(map[&7].attempts, 2);
    }

    #[test]
    fn all_owners_lists_everyone_with_words() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.insert_word(1, "a", "x", Utc::now()).unwrap();
        store.insert_word(5, "b", "y", Utc::now()).unwrap();

        let mut owners = store.all_owners().unwrap();
        owners.sort_unstable();
        assert_eq!(owners, vec![1, 5]);
    }

    #[test]
    fn nudge_bookkeeping() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert!(store.last_nudge_date(1).unwrap().is_none());
        store.record_nudge(1, "2026-08-07").unwrap();
        assert_eq!(store.last_nudge_date(1).unwrap().unwrap(), "2026-08-07");
        store.record_nudge(1, "2026-08-08").unwrap();
        assert_eq!(store.last_nudge_date(1).unwrap().unwrap(), "2026-08-08");
    }

    #[test]
    fn due_sweep_bookkeeping() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert!(store.last_due_sweep_date().unwrap().is_none());
        store.record_due_sweep("2026-08-07").unwrap();
        assert_eq!(store.last_due_sweep_date().unwrap().unwrap(), "2026-08-07");
    }
}
