//! Field lookup cache.
//!
//! # Single flight
//! Each key owns a slot with its own mutex and condition variable.  The
//! map lock is held only long enough to find or insert a slot, so lookups of
//! different keys never wait on each other's decodes.  The first caller for a
//! key becomes the loader; every other caller for that key blocks on the slot
//! until the loader publishes either the field or its error.
//!
//! A failed slot is detached from the map before the failure is published:
//! callers already waiting on it receive a clone of the error, later callers
//! start a fresh decode.  Successful entries are never evicted or replaced.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::codec::{FieldCodec, FileType};
use crate::error::{FieldError, Result};
use crate::field::{FieldData, FieldQuantity};

// ── Slots ────────────────────────────────────────────────────────────────────

enum SlotState {
    Loading,
    Ready(FieldData),
    Failed(FieldError),
}

struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl Slot {
    fn loading() -> Self {
        Self { state: Mutex::new(SlotState::Loading), ready: Condvar::new() }
    }

    /// Block until the slot leaves `Loading`.
    fn wait(&self) -> Result<FieldData> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                SlotState::Ready(f)  => return Ok(f.clone()),
                SlotState::Failed(e) => return Err(e.clone()),
                SlotState::Loading   => {}
            }
            self.ready.wait(&mut state);
        }
    }
}

/// Publishes the loader's outcome.  If the loader unwinds, the slot is failed
/// on drop so that waiters are released.
struct PendingLoad<'a> {
    cache: &'a FieldCache,
    key:   &'a str,
    slot:  Arc<Slot>,
    done:  bool,
}

impl PendingLoad<'_> {
    fn finish(mut self, result: &Result<FieldData>) {
        let state = match result {
            Ok(field) => SlotState::Ready(field.clone()),
            Err(e)    => SlotState::Failed(e.clone()),
        };
        self.publish(state);
        self.done = true;
    }

    fn publish(&self, state: SlotState) {
        if matches!(state, SlotState::Failed(_)) {
            let mut slots = self.cache.slots.lock();
            if slots.get(self.key).is_some_and(|s| Arc::ptr_eq(s, &self.slot)) {
                slots.remove(self.key);
            }
        }
        *self.slot.state.lock() = state;
        self.slot.ready.notify_all();
    }
}

impl Drop for PendingLoad<'_> {
    fn drop(&mut self) {
        if !self.done {
            let err = io::Error::other("field loader panicked");
            self.publish(SlotState::Failed(err.into()));
        }
    }
}

// ── FieldCache ───────────────────────────────────────────────────────────────

/// Keyed store of decoded fields with at most one decode per key.
///
/// Keys are compared verbatim; callers are expected to canonicalize paths.
#[derive(Default)]
pub struct FieldCache {
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl FieldCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the field cached under `key`, calling `load` on a miss.
    ///
    /// `load` runs on the calling thread, at most once across all concurrent
    /// callers for the same key.  Its error is returned to every caller that
    /// waited on it and nothing is stored.
    pub fn get_or_load<F>(&self, key: &str, load: F) -> Result<FieldData>
    where
        F: FnOnce() -> Result<FieldData>,
    {
        let (slot, is_loader) = {
            let mut slots = self.slots.lock();
            match slots.get(key) {
                Some(slot) => (Arc::clone(slot), false),
                None => {
                    let slot = Arc::new(Slot::loading());
                    slots.insert(key.to_string(), Arc::clone(&slot));
                    (slot, true)
                }
            }
        };

        if !is_loader {
            let result = slot.wait();
            if result.is_ok() {
                info!("Using cached field data");
            }
            return result;
        }

        debug!("Field cache miss for \"{}\"", key);
        let pending = PendingLoad { cache: self, key, slot, done: false };
        let result = load();
        pending.finish(&result);
        result
    }

    /// Whether a successfully decoded field is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        let slot = self.slots.lock().get(key).cloned();
        slot.is_some_and(|s| matches!(*s.state.lock(), SlotState::Ready(_)))
    }

    /// Number of successfully decoded fields.
    pub fn len(&self) -> usize {
        let slots: Vec<Arc<Slot>> = self.slots.lock().values().cloned().collect();
        slots
            .iter()
            .filter(|s| matches!(*s.state.lock(), SlotState::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── FieldParser ──────────────────────────────────────────────────────────────

/// Cached field reader: one codec configuration plus its cache.
///
/// Share it between workers by reference or through an `Arc`.
pub struct FieldParser {
    codec: FieldCodec,
    cache: FieldCache,
}

impl FieldParser {
    pub fn new(quantity: FieldQuantity, unit: impl Into<String>) -> Self {
        Self::with_codec(FieldCodec::new(quantity, unit))
    }

    pub fn with_codec(codec: FieldCodec) -> Self {
        Self { codec, cache: FieldCache::new() }
    }

    pub fn codec(&self) -> &FieldCodec { &self.codec }

    pub fn cache(&self) -> &FieldCache { &self.cache }

    /// Get the field stored in `file_name`, decoding it only on a cache miss.
    ///
    /// `file_name` is used verbatim as the cache key and should already be
    /// canonical.
    pub fn get_by_file_name(&self, file_name: &str, file_type: FileType) -> Result<FieldData> {
        self.cache.get_or_load(file_name, || self.codec.read(Path::new(file_name), file_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    fn field(tag: &str) -> FieldData {
        FieldData::new(tag, [1, 1, 1], [1.0, 1.0, 1.0], vec![1.0])
    }

    #[test]
    fn test_second_lookup_skips_loader() {
        let cache = FieldCache::new();
        let calls = AtomicUsize::new(0);
        let load = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(field("a"))
        };
        let first = cache.get_or_load("a", load).unwrap();
        let second = cache.get_or_load("a", load).unwrap();
        assert_eq!(first, second);
        assert!(Arc::ptr_eq(first.data(), second.data()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.contains("a"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failure_is_not_cached() {
        let cache = FieldCache::new();
        let err = cache
            .get_or_load("bad", || Err(FieldError::MalformedHeader("x".into())))
            .unwrap_err();
        assert!(matches!(err, FieldError::MalformedHeader(_)));
        assert!(!cache.contains("bad"));
        assert!(cache.is_empty());

        let ok = cache.get_or_load("bad", || Ok(field("retry"))).unwrap();
        assert_eq!(ok.header(), "retry");
    }

    #[test]
    fn test_concurrent_same_key_decodes_once() {
        const THREADS: usize = 8;
        let cache = FieldCache::new();
        let calls = AtomicUsize::new(0);
        let barrier = Barrier::new(THREADS);

        let results: Vec<FieldData> = thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        cache
                            .get_or_load("slow", || {
                                calls.fetch_add(1, Ordering::SeqCst);
                                thread::sleep(Duration::from_millis(100));
                                Ok(field("slow"))
                            })
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for r in &results {
            assert!(Arc::ptr_eq(r.data(), results[0].data()));
        }
    }

    #[test]
    fn test_waiters_share_failure() {
        const THREADS: usize = 4;
        let cache = FieldCache::new();
        let calls = AtomicUsize::new(0);
        let barrier = Barrier::new(THREADS);

        let errors: Vec<FieldError> = thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        cache
                            .get_or_load("broken", || {
                                calls.fetch_add(1, Ordering::SeqCst);
                                thread::sleep(Duration::from_millis(100));
                                Err(FieldError::TruncatedInput("test".into()))
                            })
                            .unwrap_err()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(errors.iter().all(|e| matches!(e, FieldError::TruncatedInput(_))));
        assert!(!cache.contains("broken"));
    }

    #[test]
    fn test_distinct_keys_do_not_block() {
        let cache = FieldCache::new();
        let cache = &cache;
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        thread::scope(|s| {
            let slow = s.spawn(move || {
                cache.get_or_load("slow", || {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(field("slow"))
                })
            });
            started_rx.recv().unwrap();
            // "slow" is still decoding; another key must go through.
            let fast = cache.get_or_load("fast", || Ok(field("fast"))).unwrap();
            assert_eq!(fast.header(), "fast");
            release_tx.send(()).unwrap();
            assert_eq!(slow.join().unwrap().unwrap().header(), "slow");
        });
    }

    #[test]
    fn test_panicking_loader_releases_waiters() {
        let cache = FieldCache::new();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            cache.get_or_load("boom", || panic!("loader failed"))
        }));
        assert!(outcome.is_err());
        assert!(!cache.contains("boom"));
        assert!(cache.get_or_load("boom", || Ok(field("ok"))).is_ok());
    }
}
