//! Typed shared-state objects.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::BusError;
use crate::queue::EventQueue;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Shared<T> {
    name: &'static str,
    value: Mutex<T>,
    /// Bumped on every set/notify; lets readers poll for fresh data.
    version: AtomicU64,
    subscribers: Mutex<Vec<Callback<T>>>,
}

/// Handle to one named, typed record on the bus.
///
/// Created once at init and cloned into every module that reads or writes
/// it. `set` replaces the whole record atomically; `get` copies the whole
/// record. Field-at-a-time read-modify-write is the caller's composition
/// of `get` and `set`.
pub struct Object<T: Copy> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy> Clone for Object<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Copy + Default> Object<T> {
    pub fn new(name: &'static str) -> Self {
        Self::with_initial(name, T::default())
    }
}

impl<T: Copy> Object<T> {
    pub fn with_initial(name: &'static str, initial: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                value: Mutex::new(initial),
                version: AtomicU64::new(0),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    /// Snapshot of the current record.
    pub fn get(&self) -> T {
        *self.shared.value.lock().unwrap()
    }

    /// Replace the record and notify subscribers.
    pub fn set(&self, value: T) {
        {
            let mut guard = self.shared.value.lock().unwrap();
            *guard = value;
        }
        self.shared.version.fetch_add(1, Ordering::Release);
        self.notify(&value);
    }

    /// Mark the record dirty and re-fire subscribers with its current
    /// value, without changing it.
    pub fn update_notify(&self) {
        let value = self.get();
        self.shared.version.fetch_add(1, Ordering::Release);
        self.notify(&value);
    }

    /// Monotonic change counter.
    pub fn version(&self) -> u64 {
        self.shared.version.load(Ordering::Acquire)
    }

    /// Register a change callback. It runs in the writer's context — keep
    /// it short and never block in it.
    pub fn connect_callback(&self, cb: impl Fn(&T) + Send + Sync + 'static) {
        self.shared.subscribers.lock().unwrap().push(Arc::new(cb));
    }

    /// Post every update into `queue`.
    pub fn connect_queue<const N: usize>(&self, queue: &EventQueue<T, N>)
    where
        T: Send + Sync + 'static,
    {
        let queue = queue.clone();
        self.connect_callback(move |value: &T| queue.push(*value));
    }

    /// Snapshot the callback list, then invoke outside all locks so a
    /// callback may freely use this object.
    fn notify(&self, value: &T) {
        let subscribers: Vec<Callback<T>> = self.shared.subscribers.lock().unwrap().clone();
        for cb in subscribers {
            cb(value);
        }
    }
}

/// A record with a small fixed number of instances (accessory channels).
pub struct ObjectArray<T: Copy, const N: usize> {
    name: &'static str,
    values: Mutex<[T; N]>,
    version: AtomicU64,
}

impl<T: Copy + Default, const N: usize> Default for ObjectArray<T, N> {
    fn default() -> Self {
        Self::new("unnamed")
    }
}

impl<T: Copy + Default, const N: usize> ObjectArray<T, N> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            values: Mutex::new([T::default(); N]),
            version: AtomicU64::new(0),
        }
    }
}

impl<T: Copy, const N: usize> ObjectArray<T, N> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn instance_get(&self, index: usize) -> Result<T, BusError> {
        if index >= N {
            return Err(BusError::NoSuchInstance { index, count: N });
        }
        Ok(self.values.lock().unwrap()[index])
    }

    pub fn instance_set(&self, index: usize, value: T) -> Result<(), BusError> {
        if index >= N {
            return Err(BusError::NoSuchInstance { index, count: N });
        }
        self.values.lock().unwrap()[index] = value;
        self.version.fetch_add(1, Ordering::Release);
        Ok(())
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    struct Pair {
        a: u64,
        b: u64,
    }

    #[test]
    fn get_returns_last_set() {
        let obj: Object<Pair> = Object::new("pair");
        obj.set(Pair { a: 1, b: 2 });
        assert_eq!(obj.get(), Pair { a: 1, b: 2 });
        assert_eq!(obj.version(), 1);
    }

    #[test]
    fn set_is_whole_object_atomic() {
        // Writer keeps a == b at all times; a torn read would break it.
        let obj: Object<Pair> = Object::new("pair");
        let writer = obj.clone();
        let handle = std::thread::spawn(move || {
            for i in 0..50_000u64 {
                writer.set(Pair { a: i, b: i });
            }
        });
        for _ in 0..50_000 {
            let v = obj.get();
            assert_eq!(v.a, v.b);
        }
        handle.join().unwrap();
    }

    #[test]
    fn callbacks_fire_with_new_value() {
        let obj: Object<Pair> = Object::new("pair");
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = Arc::clone(&seen);
        obj.connect_callback(move |v| {
            assert_eq!(v.a, 7);
            seen_cb.fetch_add(1, Ordering::SeqCst);
        });
        obj.set(Pair { a: 7, b: 7 });
        obj.update_notify();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn callback_may_reenter_the_object() {
        let obj: Object<Pair> = Object::new("pair");
        let reader = obj.clone();
        obj.connect_callback(move |v| {
            // get() from inside a callback must not deadlock
            assert_eq!(reader.get().a, v.a);
        });
        obj.set(Pair { a: 3, b: 3 });
    }

    #[test]
    fn queue_connection_receives_updates() {
        let obj: Object<Pair> = Object::new("pair");
        let queue: EventQueue<Pair, 4> = EventQueue::new();
        obj.connect_queue(&queue);
        obj.set(Pair { a: 1, b: 1 });
        obj.set(Pair { a: 2, b: 2 });
        assert_eq!(queue.pop().map(|p| p.a), Some(1));
        assert_eq!(queue.pop().map(|p| p.a), Some(2));
    }

    #[test]
    fn instance_bounds_are_checked() {
        let arr: ObjectArray<f32, 4> = ObjectArray::new("accessory");
        arr.instance_set(2, 0.5).unwrap();
        assert_eq!(arr.instance_get(2), Ok(0.5));
        assert!(matches!(
            arr.instance_get(4),
            Err(BusError::NoSuchInstance { index: 4, count: 4 })
        ));
    }
}
