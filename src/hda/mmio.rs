// ============================================================================
// src/hda/mmio.rs - Register Space
// ============================================================================
//!
//! MMIO レジスタ空間のビュー。
//!
//! - 幅付きレジスタ定義 (`Register<T>`)
//! - volatile な読み書き
//! - ストリーム記述子ブロック用のサブ空間

use core::marker::PhantomData;
use core::ptr::{read_volatile, write_volatile};

/// A register of width `T` at a fixed offset from the start of its block
#[derive(Debug)]
pub struct Register<T> {
    offset: usize,
    _width: PhantomData<T>,
}

impl<T> Register<T> {
    pub const fn new(offset: usize) -> Self {
        Self {
            offset,
            _width: PhantomData,
        }
    }

    pub const fn offset(&self) -> usize {
        self.offset
    }
}

impl<T> Clone for Register<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Register<T> {}

/// Integer widths that can be accessed through MMIO
pub trait RegisterValue: Copy {
    /// # Safety
    /// `ptr` must be valid for a volatile read of `Self` and naturally aligned.
    unsafe fn read(ptr: *const u8) -> Self;

    /// # Safety
    /// `ptr` must be valid for a volatile write of `Self` and naturally aligned.
    unsafe fn write(ptr: *mut u8, value: Self);
}

macro_rules! register_value {
    ($($ty:ty),*) => {
        $(
            impl RegisterValue for $ty {
                #[inline]
                unsafe fn read(ptr: *const u8) -> Self {
                    // SAFETY: guaranteed by the caller.
                    unsafe { read_volatile(ptr as *const $ty) }
                }

                #[inline]
                unsafe fn write(ptr: *mut u8, value: Self) {
                    // SAFETY: guaranteed by the caller.
                    unsafe { write_volatile(ptr as *mut $ty, value) }
                }
            }
        )*
    };
}

register_value!(u8, u16, u32, u64);

/// View over a memory-mapped register window
///
/// Owns no memory. Copies are cheap and refer to the same device.
#[derive(Debug, Clone, Copy)]
pub struct RegisterSpace {
    base: usize,
    offset: usize,
}

impl RegisterSpace {
    /// Create a view over the window starting at `base`
    ///
    /// # Safety
    /// `base` must point to a mapped register window large enough for every
    /// register (and sub-space) accessed through this view, for as long as the
    /// view is used.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base, offset: 0 }
    }

    /// A view that points nowhere; every stream slot starts out like this
    pub const fn unbound() -> Self {
        Self { base: 0, offset: 0 }
    }

    pub fn is_bound(&self) -> bool {
        self.base != 0
    }

    /// Absolute address of the start of this view
    pub fn address(&self) -> usize {
        self.base + self.offset
    }

    /// A new view with `offset` added to this view's start
    pub fn subspace(&self, offset: usize) -> Self {
        Self {
            base: self.base,
            offset: self.offset + offset,
        }
    }

    #[inline]
    pub fn load<T: RegisterValue>(&self, reg: Register<T>) -> T {
        debug_assert!(self.is_bound());
        let ptr = (self.address() + reg.offset()) as *const u8;
        // SAFETY: the window was validated by the creator of this view (see
        // `new`) and register offsets come from the datasheet layout.
        unsafe { T::read(ptr) }
    }

    #[inline]
    pub fn store<T: RegisterValue>(&self, reg: Register<T>, value: T) {
        debug_assert!(self.is_bound());
        let ptr = (self.address() + reg.offset()) as *mut u8;
        // SAFETY: see `load`.
        unsafe { T::write(ptr, value) }
    }
}
