use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Cellule unique contenant une valeur immuable derrière un `Arc`.
///
/// Les lecteurs clonent l'`Arc`, les écrivains le remplacent. Le verrou n'est
/// tenu que le temps de copier le pointeur.
pub struct SwapCell<T> {
    inner: RwLock<Arc<T>>,
}

impl<T> SwapCell<T> {
    pub fn new(value: T) -> Self {
        Self { inner: RwLock::new(Arc::new(value)) }
    }

    pub fn load(&self) -> Arc<T> {
        self.inner.read().clone()
    }

    pub fn store(&self, value: T) {
        let next = Arc::new(value);
        *self.inner.write() = next;
    }

    /// Builds the next value from the current one under the write lock.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let mut guard = self.inner.write();
        let next = f(&guard);
        *guard = Arc::new(next);
    }
}
