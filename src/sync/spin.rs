// SPDX-License-Identifier: MPL-2.0

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::trap::{disable_local, DisabledLocalIrqGuard};

/// A spin lock.
pub struct SpinLock<T: ?Sized> {
    lock: AtomicBool,
    val: UnsafeCell<T>,
}

impl<T> SpinLock<T> {
    /// Creates a new spin lock.
    pub const fn new(val: T) -> Self {
        Self {
            val: UnsafeCell::new(val),
            lock: AtomicBool::new(false),
        }
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquire the spin lock with local IRQs disabled.
    ///
    /// This is the only correct way to take a lock that is also taken from
    /// interrupt context. All interrupts stay disabled until the guard is
    /// dropped.
    pub fn lock_irq_disabled(&self) -> SpinLockGuard<T> {
        let guard = disable_local();
        self.acquire_lock();
        SpinLockGuard {
            lock: self,
            irq_guard: Some(guard),
            _not_send: PhantomData,
        }
    }

    /// Acquire the spin lock without disabling local IRQs.
    ///
    /// Only valid for data that is never touched by an interrupt handler.
    pub fn lock(&self) -> SpinLockGuard<T> {
        self.acquire_lock();
        SpinLockGuard {
            lock: self,
            irq_guard: None,
            _not_send: PhantomData,
        }
    }

    /// Try acquiring the spin lock immediately with local IRQs disabled.
    pub fn try_lock_irq_disabled(&self) -> Option<SpinLockGuard<T>> {
        let irq_guard = disable_local();
        if self.try_acquire_lock() {
            return Some(SpinLockGuard {
                lock: self,
                irq_guard: Some(irq_guard),
                _not_send: PhantomData,
            });
        }
        None
    }

    fn acquire_lock(&self) {
        while !self.try_acquire_lock() {
            core::hint::spin_loop();
        }
    }

    fn try_acquire_lock(&self) -> bool {
        self.lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn release_lock(&self) {
        self.lock.store(false, Ordering::Release);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.val, f)
    }
}

// SAFETY: Only a single lock holder is permitted to access the inner data.
unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

/// The guard of an acquired spin lock.
pub struct SpinLockGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
    irq_guard: Option<DisabledLocalIrqGuard>,
    // Sending the guard to another CPU would re-enable IRQs on the wrong one.
    _not_send: PhantomData<*mut ()>,
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: Holding the guard means holding the lock.
        unsafe { &*self.lock.val.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: Holding the guard means holding the lock.
        unsafe { &mut *self.lock.val.get() }
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_lock();
        // The IRQ guard, if any, drops afterwards and re-enables interrupts.
        self.irq_guard.take();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLockGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

// SAFETY: The guard can be shared between threads on the same CPU.
unsafe impl<T: ?Sized + Sync> Sync for SpinLockGuard<'_, T> {}
