//! Concurrent, versioned registry of collection definitions.
//!
//! # Concurrency
//!
//! * Readers load the current snapshot (an immutable `name -> definition` map) from an
//!   [`ArcSwap`]. They never take a lock and never observe a partially built map.
//! * Writers serialize on a single mutex, clone the current map, apply their change and
//!   publish the new map atomically.
//! * Listeners run on the writer's thread after the lock is released. A listener that
//!   returns an error or panics is logged and skipped; the write stays applied.
//!
//! # Versions
//!
//! Each definition carries its own version. Re-registering a name stores
//! `max(incoming, prior + 1)`. Separately, a registry-wide counter is bumped by every
//! successful write and can be polled for change detection.

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use std::{
    any::Any,
    collections::{BTreeSet, HashMap},
    error::Error,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::{error, info, warn};

use crate::{definition::CollectionDefinition, record::now};

type Snapshot = HashMap<String, Arc<CollectionDefinition>>;

/// Outcome reported by a listener. Errors are logged, never propagated.
pub type ListenerResult = Result<(), Box<dyn Error + Send + Sync>>;

type Listener = Arc<dyn Fn(&RegistryEvent) -> ListenerResult + Send + Sync>;

/// A change applied to the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// First registration of a name.
    Registered(Arc<CollectionDefinition>),
    /// A name was registered again.
    Updated {
        old: Arc<CollectionDefinition>,
        new: Arc<CollectionDefinition>,
    },
    Unregistered(Arc<CollectionDefinition>),
}

impl RegistryEvent {
    /// Name of the affected collection.
    pub fn collection(&self) -> &str {
        match self {
            RegistryEvent::Registered(definition) | RegistryEvent::Unregistered(definition) => {
                definition.name()
            }
            RegistryEvent::Updated { new, .. } => new.name(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            RegistryEvent::Registered(_) => "registered",
            RegistryEvent::Updated { .. } => "updated",
            RegistryEvent::Unregistered(_) => "unregistered",
        }
    }
}

/// Handle returned by [`CollectionRegistry::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// In-memory store of the live collection definitions.
pub struct CollectionRegistry {
    snapshot: ArcSwap<Snapshot>,
    write_lock: Mutex<()>,
    version: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl CollectionRegistry {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::new()),
            write_lock: Mutex::new(()),
            version: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Stores a definition and returns the value actually stored.
    ///
    /// A first registration is stored as given. Otherwise the stored version becomes
    /// `max(definition.version(), prior.version() + 1)` and the prior creation time is kept.
    pub fn register(&self, definition: CollectionDefinition) -> Arc<CollectionDefinition> {
        let (stored, event) = {
            let _guard = self.write_lock.lock();
            let current = self.snapshot.load_full();

            let (stored, event) = match current.get(definition.name()) {
                None => {
                    let stored = Arc::new(definition);
                    (stored.clone(), RegistryEvent::Registered(stored))
                }
                Some(prior) => {
                    let next = if definition.version() > prior.version() {
                        definition.restamped(
                            definition.version(),
                            prior.created_at(),
                            definition.updated_at(),
                        )
                    } else {
                        definition.restamped(prior.version() + 1, prior.created_at(), now())
                    };
                    let stored = Arc::new(next);
                    (
                        stored.clone(),
                        RegistryEvent::Updated { old: prior.clone(), new: stored },
                    )
                }
            };

            let mut next = Snapshot::clone(&current);
            next.insert(stored.name().to_string(), stored.clone());
            self.snapshot.store(Arc::new(next));
            let registry_version = self.version.fetch_add(1, Ordering::SeqCst) + 1;

            info!(
                collection = stored.name(),
                version = stored.version(),
                registry_version,
                event = event.label(),
                "collection definition stored"
            );

            (stored, event)
        };

        self.notify(&event);
        stored
    }

    /// Returns the current definition of `name`.
    pub fn get(&self, name: &str) -> Option<Arc<CollectionDefinition>> {
        self.snapshot.load().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snapshot.load().contains_key(name)
    }

    /// Names of every registered collection, sorted.
    pub fn list_names(&self) -> BTreeSet<String> {
        self.snapshot.load().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }

    /// The whole current mapping. Later writes do not affect the returned value.
    pub fn snapshot(&self) -> Arc<HashMap<String, Arc<CollectionDefinition>>> {
        self.snapshot.load_full()
    }

    /// Registry-wide write counter.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Removes `name`. Returns the removed definition, or `None` (and changes nothing) when
    /// the name is not registered.
    pub fn unregister(&self, name: &str) -> Option<Arc<CollectionDefinition>> {
        let removed = {
            let _guard = self.write_lock.lock();
            let current = self.snapshot.load_full();
            let removed = current.get(name)?.clone();

            let mut next = Snapshot::clone(&current);
            next.remove(name);
            self.snapshot.store(Arc::new(next));
            let registry_version = self.version.fetch_add(1, Ordering::SeqCst) + 1;

            info!(collection = name, registry_version, "collection definition removed");
            removed
        };

        self.notify(&RegistryEvent::Unregistered(removed.clone()));
        Some(removed)
    }

    /// Adds a callback invoked after every successful write, in registration order.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&RegistryEvent) -> ListenerResult + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Returns whether a listener was removed.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn notify(&self, event: &RegistryEvent) {
        // Listeners may add or remove listeners, so the list is copied before invoking.
        let listeners = self
            .listeners
            .read()
            .iter()
            .map(|(id, listener)| (*id, listener.clone()))
            .collect::<Vec<_>>();

        for (id, listener) in listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(
                    listener = id.0,
                    collection = event.collection(),
                    event = event.label(),
                    error = %err,
                    "registry listener failed"
                ),
                Err(payload) => error!(
                    listener = id.0,
                    collection = event.collection(),
                    event = event.label(),
                    panic = panic_message(payload.as_ref()),
                    "registry listener panicked"
                ),
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl Default for CollectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CollectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionRegistry")
            .field("collections", &self.list_names())
            .field("version", &self.version())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{FieldDefinition, FieldType};
    use std::{sync::atomic::AtomicUsize, thread};

    fn books(version: u64) -> CollectionDefinition {
        CollectionDefinition::builder("books")
            .field(FieldDefinition::new("title", FieldType::String))
            .version(version)
            .build()
            .unwrap()
    }

    #[test]
    fn register_then_get() {
        let registry = CollectionRegistry::new();
        assert!(registry.get("books").is_none());

        let stored = registry.register(books(1));

        assert_eq!(stored.version(), 1);
        assert_eq!(registry.get("books").unwrap(), stored);
        assert!(registry.contains("books"));
        assert_eq!(registry.list_names(), BTreeSet::from(["books".to_string()]));
        assert_eq!(registry.version(), 1);
    }

    #[test]
    fn re_registration_bumps_version() {
        let registry = CollectionRegistry::new();
        let first = registry.register(books(3));

        let bumped = registry.register(books(2));
        assert_eq!(bumped.version(), 4);
        assert_eq!(bumped.created_at(), first.created_at());

        let same = registry.register(books(4));
        assert_eq!(same.version(), 5);

        let explicit = registry.register(books(9));
        assert_eq!(explicit.version(), 9);
        assert_eq!(registry.version(), 4);
    }

    #[test]
    fn unregister_absent_name_is_a_no_op() {
        let registry = CollectionRegistry::new();
        let events = Arc::new(AtomicUsize::new(0));
        let counter = events.clone();
        registry.add_listener(move |event| {
            if matches!(event, RegistryEvent::Unregistered(_)) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });

        assert!(registry.unregister("books").is_none());
        assert_eq!(registry.version(), 0);

        registry.register(books(1));
        assert!(registry.unregister("books").is_some());
        assert_eq!(registry.version(), 2);
        assert_eq!(events.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn listeners_receive_events_in_order() {
        let registry = CollectionRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = seen.clone();
        registry.add_listener(move |event| {
            let entry = match event {
                RegistryEvent::Registered(def) => format!("registered:{}", def.version()),
                RegistryEvent::Updated { old, new } => format!("updated:{}->{}", old.version(), new.version()),
                RegistryEvent::Unregistered(def) => format!("unregistered:{}", def.name()),
            };
            log.lock().push(entry);
            Ok(())
        });

        registry.register(books(1));
        registry.register(books(1));
        registry.unregister("books");

        assert_eq!(
            *seen.lock(),
            vec!["registered:1", "updated:1->2", "unregistered:books"]
        );
    }

    #[test]
    fn failing_listeners_are_isolated() {
        let registry = CollectionRegistry::new();
        let reached = Arc::new(AtomicUsize::new(0));

        registry.add_listener(|_| Err("listener rejected the event".into()));
        registry.add_listener(|_| panic!("listener blew up"));
        let counter = reached.clone();
        let last = registry.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        registry.register(books(1));
        assert_eq!(reached.load(Ordering::SeqCst), 1);
        assert!(registry.get("books").is_some());

        assert!(registry.remove_listener(last));
        assert!(!registry.remove_listener(last));
        registry.register(books(1));
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn readers_never_observe_partial_state() {
        let registry = Arc::new(CollectionRegistry::new());
        registry.register(books(1));

        thread::scope(|scope| {
            for _ in 0..4 {
                let registry = registry.clone();
                scope.spawn(move || {
                    let mut last_seen = 0;
                    for _ in 0..2_000 {
                        let current = registry.get("books").expect("books is always registered");
                        assert!(current.version() >= last_seen);
                        assert_eq!(current.fields().len(), 1);
                        last_seen = current.version();
                    }
                });
            }

            for writer in 0..2 {
                let registry = registry.clone();
                scope.spawn(move || {
                    for i in 0..200 {
                        let name = format!("extra_{}_{}", writer, i);
                        let definition = CollectionDefinition::builder(name)
                            .field(FieldDefinition::new("value", FieldType::Integer))
                            .build()
                            .unwrap();
                        registry.register(definition);
                        registry.register(books(1));
                    }
                });
            }
        });

        assert_eq!(registry.len(), 401);
        assert_eq!(registry.get("books").unwrap().version(), 401);
        assert_eq!(registry.version(), 801);
    }
}
