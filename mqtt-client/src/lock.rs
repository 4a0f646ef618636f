//! The mutual-exclusion wrapper selected by the `sync` cargo feature.
//!
//! With `sync` enabled (the default), every public `Client` operation
//! takes the same internal `Mutex`, so at most one operation runs at a
//! time regardless of which thread calls it. A caller who has proven
//! single-threaded access can disable default features to swap the
//! `Mutex` for a `RefCell` and drop the lock overhead entirely; the
//! public API is identical either way.

#[cfg(feature = "sync")]
mod imp {
    use std::sync::Mutex;

    pub struct ClientLock<T>(Mutex<T>);

    impl<T> ClientLock<T> {
        pub fn new(value: T) -> Self {
            ClientLock(Mutex::new(value))
        }

        pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
            let mut guard = self.0.lock().expect("client mutex poisoned");
            f(&mut guard)
        }
    }
}

#[cfg(not(feature = "sync"))]
mod imp {
    use std::cell::RefCell;

    pub struct ClientLock<T>(RefCell<T>);

    impl<T> ClientLock<T> {
        pub fn new(value: T) -> Self {
            ClientLock(RefCell::new(value))
        }

        pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
            f(&mut self.0.borrow_mut())
        }
    }
}

pub use imp::ClientLock;
