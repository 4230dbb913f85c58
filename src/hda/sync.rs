// ============================================================================
// src/hda/sync.rs - 割り込み禁止Mutex
//
// 問題: spin::Mutex はロック中でも割り込みを許可する
// → ストリーム状態をロック中に HDA 割り込みが入り、ハンドラが同じ
//   Mutexをロックしようとするとデッドロック
//
// 解決: ロック取得前に Platform 経由でローカル割り込みを禁止し、
//       ロック解放後に元の状態に戻す
// ============================================================================

use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

use spin::{Mutex, MutexGuard};

use super::platform::Platform;

/// Mutex whose holder runs with local interrupts masked
pub struct IrqMutex<T> {
    inner: Mutex<T>,
}

impl<T> IrqMutex<T> {
    pub const fn new(data: T) -> Self {
        Self { inner: Mutex::new(data) }
    }

    /// Mask interrupts through `platform`, then take the lock
    pub fn lock<'a, P: Platform>(&'a self, platform: &'a P) -> IrqMutexGuard<'a, T, P> {
        let was_enabled = platform.save_and_disable_interrupts();
        IrqMutexGuard {
            guard: ManuallyDrop::new(self.inner.lock()),
            platform,
            was_enabled,
        }
    }
}

/// Releases the lock, then restores the saved interrupt state
pub struct IrqMutexGuard<'a, T, P: Platform> {
    guard: ManuallyDrop<MutexGuard<'a, T>>,
    platform: &'a P,
    was_enabled: bool,
}

impl<T, P: Platform> Deref for IrqMutexGuard<'_, T, P> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T, P: Platform> DerefMut for IrqMutexGuard<'_, T, P> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T, P: Platform> Drop for IrqMutexGuard<'_, T, P> {
    fn drop(&mut self) {
        // ロック解放 → 割り込み復元の順
        // SAFETY: the guard is dropped exactly once, here.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        self.platform.restore_interrupts(self.was_enabled);
    }
}
