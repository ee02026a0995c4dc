//! Named spin locks.
//!
//! The kernel runs its threads one at a time, so these locks are never
//! contended for long; they exist to make shared mutation sound and to keep
//! the critical sections visible in the source. Blocking coordination uses
//! the primitives in the rest of this module, never a spin lock.

pub type SpinlockGuard<'s, T> = spin::MutexGuard<'s, T>;

pub struct Spinlock<T> {
    /// Name of lock, for debugging.
    name: &'static str,
    inner: spin::Mutex<T>,
}

impl<T> Spinlock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            inner: spin::Mutex::new(data),
        }
    }

    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        self.inner.lock()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Mutable access without locking. Requires exclusive ownership, so it
    /// cannot race.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}
