//! A process-wide debug registry of live list instances: an explicit,
//! opt-in table a host process can snapshot for diagnostics. Nothing in
//! this crate consults it on any correctness-affecting path (a host that
//! never calls [`init_once`] or [`snapshot`] behaves identically to one
//! that does).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::SystemTime;

/// A snapshot fact about one currently open list. Carries no reference to
/// the list itself: by the time a caller reads a [`snapshot`], the list it
/// describes may already have closed.
#[derive(Debug, Clone)]
pub struct Entry {
    pub id: u64,
    pub path: PathBuf,
    pub kind: &'static str,
    pub data_type: u32,
    pub writer: bool,
    pub opened_at: SystemTime,
}

struct Registry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Entry>>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| Registry {
        next_id: AtomicU64::new(1),
        entries: Mutex::new(HashMap::new()),
    })
}

/// Forces the registry to initialize now rather than lazily on the first
/// [`register`] call. Entirely optional; every other function in this
/// module initializes it on demand.
pub fn init_once() {
    registry();
}

/// Registers a newly opened list instance, returning a handle id to pass to
/// [`unregister`] when it closes.
pub fn register(path: PathBuf, kind: &'static str, data_type: u32, writer: bool) -> u64 {
    let reg = registry();
    let id = reg.next_id.fetch_add(1, Ordering::Relaxed);
    let entry = Entry {
        id,
        path,
        kind,
        data_type,
        writer,
        opened_at: SystemTime::now(),
    };
    reg.entries
        .lock()
        .expect("registry mutex poisoned")
        .insert(id, entry);
    id
}

/// Removes a previously registered entry. A no-op if `id` is already gone.
pub fn unregister(id: u64) {
    registry()
        .entries
        .lock()
        .expect("registry mutex poisoned")
        .remove(&id);
}

/// Every currently registered entry, in no particular order.
pub fn snapshot() -> Vec<Entry> {
    registry()
        .entries
        .lock()
        .expect("registry mutex poisoned")
        .values()
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_unregister_round_trip() {
        let id = register(PathBuf::from("/tmp/example.bin"), "list", 9, true);
        assert!(snapshot().iter().any(|e| e.id == id));

        unregister(id);
        assert!(!snapshot().iter().any(|e| e.id == id));
    }
}
