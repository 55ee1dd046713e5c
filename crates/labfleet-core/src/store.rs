//! `FleetStore`: the fleet document on disk
//!
//! One YAML file holds every PDU, device and forge. The store keeps the live
//! document in memory together with the last content written to disk; a save
//! only happens when the two differ structurally. Writers in other processes
//! are kept out by an advisory lock on a `<store>.lock` sidecar file, and
//! writes replace the file atomically.
//!
//! The in-process lock is reentrant: a store closure may call `read`,
//! `snapshot` or `with_lock` again on the same thread. Closures work on a
//! private copy of the document, nested `with_lock` calls apply their edits to
//! the shared document when they return, and only the outermost one saves.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::ReentrantMutex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::{FleetDocument, looks_like_mac};
use crate::error::StoreError;
use crate::lock::FileLock;

const LOCK_ATTEMPTS: u32 = 5;
const LOCK_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Holding the in-process lock longer than this is logged
const SLOW_LOCK: Duration = Duration::from_millis(100);

/// One difference between two versions of the document
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// Keys leading to the changed value
    pub path: Vec<String>,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<Value>| match v {
            Some(v) => v.to_string(),
            None => "<absent>".to_string(),
        };
        write!(
            f,
            "{}: {} -> {}",
            self.path.join("."),
            show(&self.before),
            show(&self.after)
        )
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => arrays_equal_unordered(x, y),
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => a == b,
    }
}

fn arrays_equal_unordered(a: &[Value], b: &[Value]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut unmatched: Vec<&Value> = b.iter().collect();
    for item in a {
        match unmatched.iter().position(|other| values_equal(item, other)) {
            Some(idx) => {
                unmatched.swap_remove(idx);
            }
            None => return false,
        }
    }
    true
}

fn diff_into(path: &mut Vec<String>, before: &Value, after: &Value, out: &mut Vec<Change>) {
    if let (Value::Object(b), Value::Object(a)) = (before, after) {
        for (key, old) in b {
            path.push(key.clone());
            match a.get(key) {
                Some(new) => diff_into(path, old, new, out),
                None => out.push(Change {
                    path: path.clone(),
                    before: Some(old.clone()),
                    after: None,
                }),
            }
            path.pop();
        }
        for (key, new) in a {
            if !b.contains_key(key) {
                let mut child = path.clone();
                child.push(key.clone());
                out.push(Change {
                    path: child,
                    before: None,
                    after: Some(new.clone()),
                });
            }
        }
    } else if !values_equal(before, after) {
        out.push(Change {
            path: path.clone(),
            before: Some(before.clone()),
            after: Some(after.clone()),
        });
    }
}

/// Structural differences between two documents
///
/// Array order and integer/float spelling of numbers are ignored.
#[must_use]
pub fn diff_values(before: &Value, after: &Value) -> Vec<Change> {
    let mut changes = Vec::new();
    diff_into(&mut Vec::new(), before, after, &mut changes);
    changes
}

/// Make `root` reflect `change`, creating missing parent objects
fn apply_change(root: &mut Value, change: &Change) {
    let Some((last, parents)) = change.path.split_last() else {
        if let Some(after) = &change.after {
            *root = after.clone();
        }
        return;
    };

    let mut node = root;
    for key in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };
        node = map
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };
    match &change.after {
        Some(after) => {
            map.insert(last.clone(), after.clone());
        }
        None => {
            map.remove(last);
        }
    }
}

fn to_value(doc: &FleetDocument) -> Result<Value, StoreError> {
    serde_json::to_value(doc).map_err(|e| StoreError::Serialize(e.to_string()))
}

/// Replay the edits that turned `start` into `edited` on top of `current`
fn rebase(
    current: &FleetDocument,
    start: &FleetDocument,
    edited: &FleetDocument,
) -> Result<FleetDocument, StoreError> {
    let mut merged = to_value(current)?;
    for change in diff_values(&to_value(start)?, &to_value(edited)?) {
        apply_change(&mut merged, &change);
    }
    serde_json::from_value(merged).map_err(|e| StoreError::Serialize(e.to_string()))
}

/// Turn numeric port ids written by hand into strings
fn normalize_port_ids(raw: &mut Value) {
    fn stringify(value: &mut Value) -> bool {
        if let Value::Number(n) = value {
            *value = Value::String(n.to_string());
            true
        } else {
            false
        }
    }

    if let Some(duts) = raw.get_mut("duts").and_then(Value::as_object_mut) {
        for (id, dut) in duts {
            if let Some(port) = dut.get_mut("pdu_port_id")
                && stringify(port)
            {
                info!(device = %id, "migrated numeric pdu_port_id to a string");
            }
        }
    }

    if let Some(pdus) = raw.get_mut("pdus").and_then(Value::as_object_mut) {
        for (name, pdu) in pdus {
            if let Some(ids) = pdu.get_mut("reserved_port_ids").and_then(Value::as_array_mut) {
                let migrated = ids.iter_mut().map(stringify).filter(|m| *m).count();
                if migrated > 0 {
                    info!(pdu = %name, migrated, "migrated numeric reserved port ids to strings");
                }
            }
        }
    }
}

/// Fill `mac_address` from device ids that are MAC addresses
fn backfill_mac_addresses(doc: &mut FleetDocument) {
    for (id, device) in &mut doc.duts {
        if device.mac_address.is_none() && looks_like_mac(id) {
            info!(device = %id, "backfilled mac_address from the device id");
            device.mac_address = Some(id.clone());
        }
    }
}

struct StoreInner {
    doc: Arc<FleetDocument>,
    /// Content of the file as last read or written
    saved: Value,
}

/// State behind the reentrant lock
///
/// Borrows of `inner` never span a user closure, so nested calls on the
/// owning thread cannot conflict.
struct StoreState {
    inner: RefCell<StoreInner>,
    /// Active `with_lock` calls on the owning thread
    depth: Cell<u32>,
}

/// One `with_lock` level, popped on drop even when the closure panics
struct Nesting<'a> {
    depth: &'a Cell<u32>,
}

impl<'a> Nesting<'a> {
    fn enter(depth: &'a Cell<u32>) -> Self {
        depth.set(depth.get() + 1);
        Self { depth }
    }

    fn outermost(&self) -> bool {
        self.depth.get() == 1
    }
}

impl Drop for Nesting<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

/// The durable fleet configuration database
pub struct FleetStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_attempts: u32,
    lock_retry_delay: Duration,
    state: ReentrantMutex<StoreState>,
}

impl FleetStore {
    /// Load the store at `path`; a missing or empty file is an empty fleet
    ///
    /// # Errors
    /// Returns `StoreError` when the file cannot be locked, read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with_lock_retry(path, LOCK_ATTEMPTS, LOCK_RETRY_DELAY)
    }

    /// Like [`FleetStore::open`], with a custom cross-process lock policy
    ///
    /// # Errors
    /// Returns `StoreError` when the file cannot be locked, read or parsed.
    pub fn open_with_lock_retry(
        path: impl Into<PathBuf>,
        lock_attempts: u32,
        lock_retry_delay: Duration,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let mut lock_name = path.file_name().unwrap_or_default().to_os_string();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);

        let store = Self {
            path,
            lock_path,
            lock_attempts,
            lock_retry_delay,
            state: ReentrantMutex::new(StoreState {
                inner: RefCell::new(StoreInner {
                    doc: Arc::new(FleetDocument::default()),
                    saved: Value::Null,
                }),
                depth: Cell::new(0),
            }),
        };
        store.reload()?;
        Ok(store)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_file(&self) -> Result<FileLock, StoreError> {
        FileLock::acquire(&self.lock_path, self.lock_attempts, self.lock_retry_delay)
            .map_err(|e| StoreError::io(&self.lock_path, &e))?
            .ok_or_else(|| StoreError::LockTimeout(self.lock_path.clone()))
    }

    fn load(&self) -> Result<(FleetDocument, Value), StoreError> {
        let _lock = self.lock_file()?;

        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(StoreError::io(&self.path, &e)),
        };

        let mut raw: Value = if text.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_yaml::from_str(&text).map_err(|e| StoreError::Parse {
                path: self.path.clone(),
                message: e.to_string(),
            })?
        };
        if raw.is_null() {
            raw = Value::Object(Map::new());
        }

        // The baseline is taken before migrations so that they get saved
        let baseline = raw.clone();

        normalize_port_ids(&mut raw);
        let mut doc: FleetDocument =
            serde_json::from_value(raw).map_err(|e| StoreError::Parse {
                path: self.path.clone(),
                message: e.to_string(),
            })?;
        backfill_mac_addresses(&mut doc);
        doc.validate().map_err(StoreError::Invalid)?;

        Ok((doc, baseline))
    }

    /// Replace the in-memory document with the file's content
    ///
    /// Both locks are held from the read through the swap, so a concurrent
    /// save can never be overwritten by older file content.
    ///
    /// # Errors
    /// Returns `StoreError` when the file cannot be locked, read or parsed;
    /// the in-memory document is then left untouched.
    pub fn reload(&self) -> Result<(), StoreError> {
        let started = Instant::now();
        let state = self.state.lock();
        let (doc, saved) = self.load()?;
        {
            let mut inner = state.inner.borrow_mut();
            inner.doc = Arc::new(doc);
            inner.saved = saved;
        }
        drop(state);
        log_hold(started, "reload");

        debug!(path = %self.path.display(), "fleet store loaded");
        Ok(())
    }

    fn current(&self) -> Arc<FleetDocument> {
        let state = self.state.lock();
        Arc::clone(&state.inner.borrow().doc)
    }

    /// Run `f` on the committed document without saving
    ///
    /// Edits still pending in an enclosing `with_lock` closure are not
    /// visible to `f`.
    ///
    /// # Errors
    /// Never fails today; the signature matches the other store accessors.
    pub fn read<T>(&self, f: impl FnOnce(&FleetDocument) -> T) -> Result<T, StoreError> {
        Ok(f(&self.current()))
    }

    /// Copy of the committed document
    ///
    /// # Errors
    /// Never fails today; see [`FleetStore::read`].
    pub fn snapshot(&self) -> Result<FleetDocument, StoreError> {
        self.read(FleetDocument::clone)
    }

    /// Mutate the document, then save it if anything changed
    ///
    /// Calls may nest on the same thread. A nested call applies its edits
    /// to the shared document when `f` succeeds and leaves saving to the
    /// outermost call. When the outermost `f` or the save fails, the document
    /// is restored to its content before that call, nested edits included.
    ///
    /// # Errors
    /// Returns `f`'s error, or the `StoreError` of a failed save.
    pub fn with_lock<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut FleetDocument) -> Result<T, E>,
        E: From<StoreError>,
    {
        let started = Instant::now();
        let state = self.state.lock();
        let level = Nesting::enter(&state.depth);
        let outermost = level.outermost();

        let start = Arc::clone(&state.inner.borrow().doc);
        let mut edited = FleetDocument::clone(&start);

        let result = f(&mut edited).and_then(|value| {
            self.commit(&state, &start, edited, outermost)
                .map(|()| value)
                .map_err(E::from)
        });
        if result.is_err() && outermost {
            state.inner.borrow_mut().doc = start;
        }

        drop(level);
        drop(state);
        if outermost {
            log_hold(started, "with_lock");
        }
        result
    }

    /// Publish `edited` as the shared document, saving it when `save` is set
    fn commit(
        &self,
        state: &StoreState,
        start: &Arc<FleetDocument>,
        edited: FleetDocument,
        save: bool,
    ) -> Result<(), StoreError> {
        let mut inner = state.inner.borrow_mut();
        inner.doc = if Arc::ptr_eq(&inner.doc, start) {
            Arc::new(edited)
        } else {
            // A nested call or a reload replaced the document meanwhile
            Arc::new(rebase(&inner.doc, start, &edited)?)
        };
        if save {
            self.save_locked(&mut inner)?;
        }
        Ok(())
    }

    /// Save the document if it differs from the file; returns whether it did
    ///
    /// # Errors
    /// Returns `StoreError` when the document cannot be written.
    pub fn save_if_needed(&self) -> Result<bool, StoreError> {
        let started = Instant::now();
        let state = self.state.lock();
        let saved = self.save_locked(&mut state.inner.borrow_mut());
        drop(state);
        log_hold(started, "save_if_needed");
        saved
    }

    /// Unsaved changes
    ///
    /// # Errors
    /// Returns `StoreError` when the document cannot be serialized.
    pub fn diff(&self) -> Result<Vec<Change>, StoreError> {
        let state = self.state.lock();
        let inner = state.inner.borrow();
        Ok(diff_values(&inner.saved, &to_value(&inner.doc)?))
    }

    fn save_locked(&self, inner: &mut StoreInner) -> Result<bool, StoreError> {
        let current = to_value(&inner.doc)?;
        let changes = diff_values(&inner.saved, &current);
        if changes.is_empty() {
            return Ok(false);
        }

        inner.doc.validate().map_err(StoreError::Invalid)?;
        for change in &changes {
            info!(target: "labfleet::audit", %change, "fleet store change");
        }

        let yaml =
            serde_yaml::to_string(&current).map_err(|e| StoreError::Serialize(e.to_string()))?;
        let _lock = self.lock_file()?;
        write_atomically(&self.path, yaml.as_bytes())?;

        inner.saved = current;
        debug!(path = %self.path.display(), changes = changes.len(), "fleet store saved");
        Ok(true)
    }
}

impl fmt::Debug for FleetStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FleetStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn log_hold(started: Instant, operation: &'static str) {
    let held = started.elapsed();
    if held > SLOW_LOCK {
        warn!(operation, held_ms = held.as_millis(), "fleet store lock held for too long");
    }
}

/// Write to a temporary sibling, sync it, then rename it over `path`
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let write = || -> std::io::Result<()> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    };

    write().map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StoreError::io(path, &e)
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::config::DeviceConfig;

    const MAC: &str = "00:11:22:33:44:55";

    fn store_with(contents: &str) -> (tempfile::TempDir, FleetStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.yml");
        fs::write(&path, contents).unwrap();
        let store = FleetStore::open_with_lock_retry(&path, 2, Duration::from_millis(5)).unwrap();
        (dir, store)
    }

    fn legacy_document() -> String {
        format!(
            "pdus:\n  pdu-1:\n    driver: dummy\n    reserved_port_ids: [7]\n\
             duts:\n  \"{MAC}\":\n    base_name: gfx9\n    ip_address: 10.0.0.2\n    \
             pdu: pdu-1\n    pdu_port_id: 3\n"
        )
    }

    #[test]
    fn test_empty_and_missing_files_are_empty_fleets() {
        let (_dir, store) = store_with("");
        assert_eq!(store.snapshot().unwrap(), FleetDocument::default());

        let dir = tempfile::tempdir().unwrap();
        let store = FleetStore::open(dir.path().join("absent.yml")).unwrap();
        assert!(store.snapshot().unwrap().duts.is_empty());
    }

    #[test]
    fn test_migrations_are_written_back_once() {
        let (_dir, store) = store_with(&legacy_document());

        let doc = store.snapshot().unwrap();
        let device = &doc.duts[MAC];
        assert_eq!(device.mac_address.as_deref(), Some(MAC));
        assert_eq!(device.pdu_port_id.as_deref(), Some("3"));
        assert!(doc.pdus["pdu-1"].reserved_port_ids.contains("7"));

        assert!(store.save_if_needed().unwrap());
        let first = fs::read_to_string(store.path()).unwrap();
        assert!(first.contains("mac_address"));

        let reopened = FleetStore::open(store.path()).unwrap();
        assert!(!reopened.save_if_needed().unwrap());
        assert_eq!(fs::read_to_string(store.path()).unwrap(), first);
    }

    #[test]
    fn test_idempotent_mutation_never_writes() {
        let (_dir, store) = store_with(&legacy_document());
        store.save_if_needed().unwrap();
        fs::remove_file(store.path()).unwrap();

        store
            .with_lock(|doc| -> Result<(), StoreError> {
                doc.duts.get_mut(MAC).unwrap().ready_for_service = false;
                Ok(())
            })
            .unwrap();
        assert!(!store.path().exists());

        store
            .with_lock(|doc| -> Result<(), StoreError> {
                doc.duts.get_mut(MAC).unwrap().ready_for_service = true;
                Ok(())
            })
            .unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_failed_closure_restores_document() {
        let (_dir, store) = store_with(&legacy_document());
        store.save_if_needed().unwrap();

        let res: Result<(), StoreError> = store.with_lock(|doc| {
            doc.duts.clear();
            Err(StoreError::Invalid("nope".to_string()))
        });
        assert!(res.is_err());
        assert_eq!(store.snapshot().unwrap().duts.len(), 1);
        assert!(store.diff().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_mutation_is_not_saved() {
        let (_dir, store) = store_with(&legacy_document());
        store.save_if_needed().unwrap();

        let res: Result<(), StoreError> = store.with_lock(|doc| {
            doc.duts.get_mut(MAC).unwrap().ip_address = "not-an-ip".to_string();
            Ok(())
        });
        assert!(matches!(res, Err(StoreError::Invalid(_))));
        assert!(!fs::read_to_string(store.path()).unwrap().contains("not-an-ip"));
        assert_eq!(store.read(|doc| doc.duts[MAC].ip_address.clone()).unwrap(), "10.0.0.2");
    }

    #[test]
    fn test_nested_calls_share_the_lock() {
        let (_dir, store) = store_with(&legacy_document());
        store.save_if_needed().unwrap();

        let seen = store
            .with_lock(|doc| -> Result<usize, StoreError> {
                let before = store.read(|d| d.duts.len())?;
                store.with_lock(|inner| -> Result<(), StoreError> {
                    inner
                        .duts
                        .insert("nested".to_string(), DeviceConfig::new("gfx10", "10.0.0.4"));
                    Ok(())
                })?;
                // The nested edit is not written until the outer call returns
                assert!(!fs::read_to_string(store.path()).unwrap().contains("nested"));
                assert_eq!(store.snapshot()?.duts.len(), before + 1);

                doc.duts
                    .insert("outer".to_string(), DeviceConfig::new("gfx11", "10.0.0.5"));
                Ok(before)
            })
            .unwrap();
        assert_eq!(seen, 1);

        let reopened = FleetStore::open(store.path()).unwrap().snapshot().unwrap();
        let ids: Vec<&str> = reopened.duts.keys().map(String::as_str).collect();
        assert_eq!(ids, vec![MAC, "nested", "outer"]);
    }

    #[test]
    fn test_outer_failure_discards_nested_edits() {
        let (_dir, store) = store_with(&legacy_document());
        store.save_if_needed().unwrap();

        let res: Result<(), StoreError> = store.with_lock(|_| {
            store.with_lock(|inner| -> Result<(), StoreError> {
                inner.duts.clear();
                Ok(())
            })?;
            Err(StoreError::Invalid("abort".to_string()))
        });
        assert!(res.is_err());
        assert_eq!(store.snapshot().unwrap().duts.len(), 1);
        assert!(store.diff().unwrap().is_empty());

        // A failing nested call leaves the outer edits alone
        store
            .with_lock(|doc| -> Result<(), StoreError> {
                doc.duts.get_mut(MAC).unwrap().ready_for_service = true;
                let nested: Result<(), StoreError> = store.with_lock(|inner| {
                    inner.duts.clear();
                    Err(StoreError::Invalid("nested".to_string()))
                });
                assert!(nested.is_err());
                Ok(())
            })
            .unwrap();
        let doc = store.snapshot().unwrap();
        assert_eq!(doc.duts.len(), 1);
        assert!(doc.duts[MAC].ready_for_service);
    }

    #[test]
    fn test_reload_never_loses_concurrent_saves() {
        let (_dir, store) = store_with("");
        let store = Arc::new(store);
        store
            .with_lock(|doc| -> Result<(), StoreError> {
                let mut device = DeviceConfig::new("gfx9", "10.0.0.2");
                device.pdu_off_delay = 0.0;
                doc.duts.insert("dev".to_string(), device);
                Ok(())
            })
            .unwrap();

        let reloader = {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    store.reload().unwrap();
                }
            })
        };
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        store
                            .with_lock(|doc| -> Result<(), StoreError> {
                                doc.duts.get_mut("dev").unwrap().pdu_off_delay += 1.0;
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in writers {
            handle.join().unwrap();
        }
        reloader.join().unwrap();

        let delay = store.read(|doc| doc.duts["dev"].pdu_off_delay).unwrap();
        assert!((delay - 40.0).abs() < f64::EPSILON);
        assert!(store.diff().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_mutations_never_interleave() {
        let (_dir, store) = store_with("");
        let store = Arc::new(store);
        store
            .with_lock(|doc| -> Result<(), StoreError> {
                let mut device = DeviceConfig::new("gfx9", "10.0.0.2");
                device.pdu_off_delay = 0.0;
                doc.duts.insert("dev".to_string(), device);
                Ok(())
            })
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        store
                            .with_lock(|doc| -> Result<(), StoreError> {
                                let device = doc.duts.get_mut("dev").unwrap();
                                let seen = device.pdu_off_delay;
                                std::thread::yield_now();
                                device.pdu_off_delay = seen + 1.0;
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let delay = store.read(|doc| doc.duts["dev"].pdu_off_delay).unwrap();
        assert!((delay - 80.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_save_fails_when_another_process_holds_the_lock() {
        let (_dir, store) = store_with("");
        let lock_path = store.path().with_file_name("fleet.yml.lock");
        let _held = FileLock::acquire(&lock_path, 1, Duration::from_millis(1))
            .unwrap()
            .unwrap();

        let res: Result<(), StoreError> = store.with_lock(|doc| {
            doc.duts
                .insert("dev".to_string(), DeviceConfig::new("gfx9", "10.0.0.2"));
            Ok(())
        });
        assert!(matches!(res, Err(StoreError::LockTimeout(_))));
    }

    #[test]
    fn test_diff_ignores_ordering_and_number_spelling() {
        let before = json!({"tags": ["a", "b"], "delay": 30, "gone": 1});
        let after = json!({"tags": ["b", "a"], "delay": 30.0, "new": true});

        let changes = diff_values(&before, &after);
        let paths: Vec<String> = changes.iter().map(|c| c.path.join(".")).collect();
        assert_eq!(paths, vec!["gone", "new"]);
        assert_eq!(changes[0].to_string(), "gone: 1 -> <absent>");
    }

    #[test]
    fn test_rebase_keeps_keys_containing_dots() {
        let (_dir, store) = store_with("");
        store
            .with_lock(|doc| -> Result<(), StoreError> {
                store.with_lock(|inner| -> Result<(), StoreError> {
                    inner
                        .duts
                        .insert("host.lab".to_string(), DeviceConfig::new("gfx9", "10.0.0.2"));
                    Ok(())
                })?;
                doc.duts
                    .insert("rack.2".to_string(), DeviceConfig::new("gfx10", "10.0.0.3"));
                Ok(())
            })
            .unwrap();

        let doc = store.snapshot().unwrap();
        assert_eq!(doc.duts["host.lab"].ip_address, "10.0.0.2");
        assert_eq!(doc.duts["rack.2"].ip_address, "10.0.0.3");
    }
}
