// table.rs - the immutable namespace -> dictionary routing table.
//
// A Table is built once, published through the TableSlot, and never mutated
// afterwards. Writers (trainer, reload, namespace changes) construct a new
// Table from the current one and swap it in; the displaced Table travels to
// the GC, which waits for its readers to drain before reclaiming it.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use super::Meta;

/// One namespace entry: a key prefix and the dictionaries trained for it,
/// oldest first. `default` is the most recently trained Meta and receives
/// all encode traffic for the prefix.
#[derive(Clone)]
pub struct NsEntry {
    pub prefix: String,
    pub metas: Vec<Arc<Meta>>,
    pub default: Option<Arc<Meta>>,
}

impl NsEntry {
    fn new(prefix: String) -> Self {
        NsEntry {
            prefix,
            metas: Vec::new(),
            default: None,
        }
    }
}

/// Immutable routing snapshot: ordered namespace entries plus a sparse
/// id -> Meta map (ids 1..=0xFFFE).
pub struct Table {
    namespaces: Vec<NsEntry>,
    by_id: BTreeMap<u16, Arc<Meta>>,
    only_default: bool,
    version: u64,
}

impl Table {
    /// The boot table: just the default namespace, no dictionaries.
    pub fn empty() -> Self {
        Table {
            namespaces: vec![NsEntry::new(String::new())],
            by_id: BTreeMap::new(),
            only_default: true,
            version: 0,
        }
    }

    /// Routes a key to the default Meta of the best-matching namespace.
    /// Longest exact prefix wins; ties keep the earlier entry. Returns
    /// `None` when the winning namespace has no trained dictionary yet.
    pub fn lookup_by_prefix(&self, key: &[u8]) -> Option<&Arc<Meta>> {
        if self.only_default {
            return self.namespaces[0].default.as_ref();
        }
        let mut best: Option<&NsEntry> = None;
        for ns in &self.namespaces {
            if key.starts_with(ns.prefix.as_bytes()) {
                match best {
                    Some(b) if ns.prefix.len() <= b.prefix.len() => {}
                    _ => best = Some(ns),
                }
            }
        }
        best.and_then(|ns| ns.default.as_ref())
    }

    /// Looks a dictionary up by its wire id. The sentinel values 0 and
    /// 0xFFFF never resolve.
    pub fn lookup_by_id(&self, id: u16) -> Option<&Arc<Meta>> {
        self.by_id.get(&id)
    }

    /// True when a Meta with the same id and blob path is present. The GC
    /// uses this to recognize dictionaries still referenced by the current
    /// table.
    pub fn contains_same(&self, id: u16, dict_path: &Path) -> bool {
        self.by_id
            .get(&id)
            .is_some_and(|m| m.same_identity(id, dict_path))
    }

    /// Every Meta reachable from this table.
    pub fn all_metas(&self) -> impl Iterator<Item = &Arc<Meta>> {
        self.by_id.values()
    }

    /// Lowest unassigned dictionary id, or `None` when 1..=0xFFFE is full.
    pub fn next_free_id(&self) -> Option<u16> {
        (1..=crate::config::DICT_ID_MAX).find(|id| !self.by_id.contains_key(id))
    }

    pub fn only_default(&self) -> bool {
        self.only_default
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn namespaces(&self) -> &[NsEntry] {
        &self.namespaces
    }

    pub fn dict_count(&self) -> usize {
        self.by_id.len()
    }

    /// Returns a successor table with `meta` appended to `prefix`'s entry
    /// (created if absent) as the new default, trimming the entry to
    /// `retain_max` dictionaries. The second value lists Metas present in
    /// `self` but absent from the successor; the caller stamps their
    /// retirement and hands `self` to the GC after the swap.
    pub fn with_new_meta(
        &self,
        prefix: &str,
        meta: Arc<Meta>,
        retain_max: usize,
    ) -> (Table, Vec<Arc<Meta>>) {
        let mut namespaces = self.namespaces.clone();
        let entry = match namespaces.iter_mut().find(|ns| ns.prefix == prefix) {
            Some(e) => e,
            None => {
                namespaces.push(NsEntry::new(prefix.to_string()));
                namespaces.last_mut().unwrap()
            }
        };
        entry.metas.push(Arc::clone(&meta));
        entry.default = Some(meta);
        if entry.metas.len() > retain_max {
            let excess = entry.metas.len() - retain_max;
            entry.metas.drain(..excess);
        }
        self.successor(namespaces)
    }

    /// Returns a successor table whose user namespaces are exactly
    /// `prefixes` (insertion order preserved, duplicates ignored). Entries
    /// for retained prefixes keep their dictionaries; removed entries drop
    /// theirs, which appear in the retired list.
    pub fn rebuild_with_namespaces(&self, prefixes: &[String]) -> (Table, Vec<Arc<Meta>>) {
        let mut namespaces = Vec::with_capacity(prefixes.len() + 1);
        // The default namespace always survives a rebuild.
        namespaces.push(self.namespaces[0].clone());
        for prefix in prefixes {
            if prefix.is_empty() || namespaces.iter().any(|ns| &ns.prefix == prefix) {
                continue;
            }
            match self.namespaces.iter().find(|ns| &ns.prefix == prefix) {
                Some(existing) => namespaces.push(existing.clone()),
                None => namespaces.push(NsEntry::new(prefix.clone())),
            }
        }
        self.successor(namespaces)
    }

    /// Builds a table from scratch out of reloaded Metas. `metas` must be
    /// sorted oldest-to-newest so that the last attachment per namespace
    /// becomes the default. Every Meta is decodable by id even when none of
    /// its prefixes is a registered namespace.
    pub fn from_metas(
        user_prefixes: &[String],
        metas: Vec<Arc<Meta>>,
        version: u64,
    ) -> Table {
        let mut namespaces = vec![NsEntry::new(String::new())];
        for prefix in user_prefixes {
            if !prefix.is_empty() && !namespaces.iter().any(|ns| &ns.prefix == prefix) {
                namespaces.push(NsEntry::new(prefix.clone()));
            }
        }
        let mut by_id = BTreeMap::new();
        for meta in metas {
            for prefix in meta.prefixes() {
                if let Some(entry) = namespaces.iter_mut().find(|ns| &ns.prefix == prefix) {
                    entry.metas.push(Arc::clone(&meta));
                    entry.default = Some(Arc::clone(&meta));
                }
            }
            by_id.insert(meta.id(), meta);
        }
        let only_default = namespaces.len() == 1;
        Table {
            namespaces,
            by_id,
            only_default,
            version,
        }
    }

    fn successor(&self, namespaces: Vec<NsEntry>) -> (Table, Vec<Arc<Meta>>) {
        let mut by_id = BTreeMap::new();
        for ns in &namespaces {
            for meta in &ns.metas {
                by_id.insert(meta.id(), Arc::clone(meta));
            }
        }
        let retired = self
            .by_id
            .values()
            .filter(|old| {
                !by_id
                    .get(&old.id())
                    .is_some_and(|new| Arc::ptr_eq(new, old))
            })
            .cloned()
            .collect();
        let only_default = namespaces.len() == 1;
        (
            Table {
                namespaces,
                by_id,
                only_default,
                version: self.version + 1,
            },
            retired,
        )
    }
}

// ---------------------------------------------------------------------------
// Publication slot
// ---------------------------------------------------------------------------

/// The single publication point for the current routing table.
///
/// Readers clone the `Arc` out of the slot; the strong count doubles as
/// the per-table reader count the GC polls before reclaiming a retired
/// table. The write lock is held only for the pointer swap, so readers are
/// never blocked for longer than a clone.
pub struct TableSlot {
    slot: RwLock<Arc<Table>>,
}

impl TableSlot {
    pub fn new(table: Table) -> Self {
        TableSlot {
            slot: RwLock::new(Arc::new(table)),
        }
    }

    /// Acquires the current table for the duration of one operation.
    pub fn load(&self) -> Arc<Table> {
        self.slot.read().expect("table slot poisoned").clone()
    }

    /// Publishes `next` and returns the displaced table for retirement.
    pub fn swap(&self, next: Arc<Table>) -> Arc<Table> {
        let mut guard = self.slot.write().expect("table slot poisoned");
        std::mem::replace(&mut *guard, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use time::OffsetDateTime;

    fn test_meta(id: u16, prefixes: &[&str]) -> Arc<Meta> {
        let samples: Vec<Vec<u8>> = (0..64)
            .map(|i| format!("routing table test sample {i} {id}").into_bytes())
            .collect();
        let bytes = zstd::dict::from_samples(&samples, 8 * 1024).unwrap();
        Arc::new(Meta::new(
            id,
            &bytes,
            prefixes.iter().map(|s| s.to_string()).collect(),
            3,
            PathBuf::from(format!("/tmp/t-{id:04x}.dict")),
            PathBuf::from(format!("/tmp/t-{id:04x}.mf")),
            OffsetDateTime::UNIX_EPOCH,
        ))
    }

    #[test]
    fn empty_table_routes_to_nothing() {
        let t = Table::empty();
        assert!(t.only_default());
        assert!(t.lookup_by_prefix(b"u:1").is_none());
        assert!(t.lookup_by_id(1).is_none());
    }

    #[test]
    fn new_meta_becomes_default() {
        let t = Table::empty();
        let (t, retired) = t.with_new_meta("u:", test_meta(1, &["u:"]), 3);
        assert!(retired.is_empty());
        assert_eq!(t.lookup_by_prefix(b"u:42").unwrap().id(), 1);
        assert_eq!(t.lookup_by_id(1).unwrap().id(), 1);
        assert!(!t.only_default());
    }

    #[test]
    fn longest_prefix_wins() {
        let t = Table::empty();
        let (t, _) = t.with_new_meta("u:", test_meta(1, &["u:"]), 3);
        let (t, _) = t.with_new_meta("u:img:", test_meta(2, &["u:img:"]), 3);
        assert_eq!(t.lookup_by_prefix(b"u:img:7").unwrap().id(), 2);
        assert_eq!(t.lookup_by_prefix(b"u:txt:7").unwrap().id(), 1);
        assert!(t.lookup_by_prefix(b"p:7").is_none());
    }

    #[test]
    fn retention_cap_retires_oldest() {
        let mut t = Table::empty();
        for id in 1..=4u16 {
            let (next, retired) = t.with_new_meta("u:", test_meta(id, &["u:"]), 2);
            if id <= 2 {
                assert!(retired.is_empty());
            } else {
                assert_eq!(retired.len(), 1);
                assert_eq!(retired[0].id(), id - 2);
            }
            t = next;
        }
        // Ids 3 and 4 remain; default is the newest.
        assert_eq!(t.lookup_by_prefix(b"u:x").unwrap().id(), 4);
        assert!(t.lookup_by_id(2).is_none());
        assert!(t.lookup_by_id(3).is_some());
    }

    #[test]
    fn ids_are_pairwise_distinct() {
        let mut t = Table::empty();
        for id in 1..=5u16 {
            let (next, _) = t.with_new_meta("u:", test_meta(id, &["u:"]), 8);
            t = next;
        }
        let mut seen = std::collections::BTreeSet::new();
        for meta in t.all_metas() {
            assert!(seen.insert(meta.id()), "duplicate id {}", meta.id());
        }
    }

    #[test]
    fn namespace_rebuild_drops_removed_entries() {
        let t = Table::empty();
        let (t, _) = t.rebuild_with_namespaces(&["u:".to_string(), "p:".to_string()]);
        let (t, _) = t.with_new_meta("u:", test_meta(1, &["u:"]), 3);
        let (t, _) = t.with_new_meta("p:", test_meta(2, &["p:"]), 3);

        let (t, retired) = t.rebuild_with_namespaces(&["u:".to_string()]);
        assert_eq!(retired.len(), 1);
        assert_eq!(retired[0].id(), 2);
        assert!(t.lookup_by_prefix(b"u:1").is_some());
        assert!(t.lookup_by_prefix(b"p:1").is_none());
        assert!(t.lookup_by_id(2).is_none());
    }

    #[test]
    fn next_free_id_skips_assigned() {
        let t = Table::empty();
        assert_eq!(t.next_free_id(), Some(1));
        let (t, _) = t.with_new_meta("u:", test_meta(1, &["u:"]), 8);
        assert_eq!(t.next_free_id(), Some(2));
    }

    #[test]
    fn from_metas_attaches_newest_as_default() {
        let old = test_meta(1, &["u:"]);
        let new = test_meta(2, &["u:"]);
        let t = Table::from_metas(&["u:".to_string()], vec![old, new], 1);
        assert_eq!(t.lookup_by_prefix(b"u:k").unwrap().id(), 2);
        assert!(t.lookup_by_id(1).is_some());
    }

    #[test]
    fn slot_swap_returns_previous() {
        let slot = TableSlot::new(Table::empty());
        let first = slot.load();
        assert_eq!(first.version(), 0);
        let (next, _) = first.with_new_meta("u:", test_meta(1, &["u:"]), 3);
        let displaced = slot.swap(Arc::new(next));
        assert_eq!(displaced.version(), 0);
        assert_eq!(slot.load().version(), 1);
    }
}
