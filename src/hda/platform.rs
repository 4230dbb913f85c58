// ============================================================================
// src/hda/platform.rs - Host Primitives
// ============================================================================
//!
//! ホスト環境が提供するプリミティブ。
//!
//! - PCI コンフィグ空間 / BAR マッピング
//! - IRQ 割り当て
//! - 物理メモリ (DMA ページ)
//! - ディレイ
//!
//! 取得したリソースは RAII ハンドル (`DmaPage`, `BarMapping`, `IrqLine`) が
//! 所有し、どの経路でも drop 時に解放される。

use alloc::sync::Arc;
use core::ptr::{self, NonNull};
use core::time::Duration;

use x86_64::PhysAddr;

use super::types::HdaResult;
use crate::regs::PAGE_SIZE;

/// Width of a PCI configuration space access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessWidth {
    Byte = 1,
    Word = 2,
    Dword = 4,
}

/// Interrupt delivery preference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqHint {
    /// MSI, MSI-X or legacy, whatever the host prefers
    Any,
    /// Legacy INTx only
    Legacy,
}

/// Services supplied by the embedding environment for one matched device
///
/// The host must route the interrupt returned by [`Platform::allocate_irq`] to
/// [`Controller::handle_irq`](super::Controller::handle_irq).
pub trait Platform {
    /// Host handle of an allocated interrupt
    type Irq: Copy;

    fn pci_read(&self, offset: u16, width: AccessWidth) -> HdaResult<u32>;
    fn pci_write(&self, offset: u16, width: AccessWidth, value: u32) -> HdaResult<()>;

    /// Map a memory BAR into CPU address space
    fn pci_map_bar(&self, bar: u8) -> HdaResult<NonNull<u8>>;
    fn pci_unmap_bar(&self, bar: u8, virt: NonNull<u8>);

    fn allocate_irq(&self, hint: IrqHint) -> HdaResult<Self::Irq>;
    fn deallocate_irq(&self, irq: Self::Irq);
    fn enable_irq(&self, irq: Self::Irq, enable: bool);

    /// Allocate physically contiguous memory
    fn allocate_physical(&self, size: usize) -> HdaResult<PhysAddr>;
    fn deallocate_physical(&self, phys: PhysAddr, size: usize);

    fn map(&self, phys: PhysAddr, size: usize) -> HdaResult<NonNull<u8>>;
    fn unmap(&self, virt: NonNull<u8>, size: usize);

    /// Busy-wait
    fn delay(&self, duration: Duration);

    /// Mask local interrupts; returns whether they were enabled
    ///
    /// Stream state is shared with [`Controller::handle_irq`](super::Controller::handle_irq)
    /// and is only locked while interrupts are masked. On bare-metal x86_64
    /// this clears RFLAGS.IF. Hosts that deliver the interrupt some other way
    /// override both methods.
    fn save_and_disable_interrupts(&self) -> bool {
        #[cfg(all(target_arch = "x86_64", target_os = "none"))]
        {
            let enabled = x86_64::instructions::interrupts::are_enabled();
            x86_64::instructions::interrupts::disable();
            enabled
        }
        #[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
        {
            false
        }
    }

    /// Undo [`Platform::save_and_disable_interrupts`]
    fn restore_interrupts(&self, was_enabled: bool) {
        #[cfg(all(target_arch = "x86_64", target_os = "none"))]
        if was_enabled {
            x86_64::instructions::interrupts::enable();
        }
        #[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
        let _ = was_enabled;
    }
}

/// Poll `done` every [`POLL_INTERVAL`](crate::regs::POLL_INTERVAL) until it
/// holds or `timeout` elapses
pub(crate) fn poll_until<P, F>(platform: &P, timeout: Duration, mut done: F) -> bool
where
    P: Platform + ?Sized,
    F: FnMut() -> bool,
{
    let interval = crate::regs::POLL_INTERVAL;
    let budget = (timeout.as_micros() / interval.as_micros().max(1)).max(1);

    for _ in 0..budget {
        if done() {
            return true;
        }
        platform.delay(interval);
    }

    done()
}

// ============================================================================
// DMA Page
// ============================================================================

/// One page of physically contiguous, CPU-mapped memory
pub struct DmaPage<P: Platform> {
    platform: Arc<P>,
    phys: PhysAddr,
    virt: NonNull<u8>,
}

// SAFETY: the page is exclusively owned by this handle; the device side only
// reaches it through the physical address programmed by the owner.
unsafe impl<P: Platform + Send + Sync> Send for DmaPage<P> {}
unsafe impl<P: Platform + Send + Sync> Sync for DmaPage<P> {}

impl<P: Platform> DmaPage<P> {
    pub fn allocate(platform: &Arc<P>) -> HdaResult<Self> {
        let phys = platform.allocate_physical(PAGE_SIZE)?;
        let virt = match platform.map(phys, PAGE_SIZE) {
            Ok(virt) => virt,
            Err(e) => {
                platform.deallocate_physical(phys, PAGE_SIZE);
                return Err(e);
            }
        };

        Ok(Self {
            platform: Arc::clone(platform),
            phys,
            virt,
        })
    }

    pub fn phys(&self) -> PhysAddr {
        self.phys
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.virt.as_ptr()
    }

    pub fn zero(&mut self) {
        // SAFETY: the mapping is PAGE_SIZE bytes long and owned by us.
        unsafe { ptr::write_bytes(self.as_ptr(), 0, PAGE_SIZE) }
    }

    /// Copy `data` to `offset`, zero-filling up to `len`
    pub fn fill(&mut self, offset: usize, data: &[u8], len: usize) {
        assert!(data.len() <= len && offset + len <= PAGE_SIZE);
        // SAFETY: bounds checked above; the mapping is owned by us.
        unsafe {
            let dst = self.as_ptr().add(offset);
            ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
            ptr::write_bytes(dst.add(data.len()), 0, len - data.len());
        }
    }

    /// Volatile write of a device-visible value
    pub fn write<T: Copy>(&mut self, offset: usize, value: T) {
        assert!(offset + core::mem::size_of::<T>() <= PAGE_SIZE);
        assert!(offset % core::mem::align_of::<T>() == 0);
        // SAFETY: in bounds and aligned (checked above).
        unsafe { ptr::write_volatile(self.as_ptr().add(offset) as *mut T, value) }
    }

    /// Volatile read of a device-written value
    pub fn read<T: Copy>(&self, offset: usize) -> T {
        assert!(offset + core::mem::size_of::<T>() <= PAGE_SIZE);
        assert!(offset % core::mem::align_of::<T>() == 0);
        // SAFETY: in bounds and aligned (checked above).
        unsafe { ptr::read_volatile(self.as_ptr().add(offset) as *const T) }
    }
}

impl<P: Platform> Drop for DmaPage<P> {
    fn drop(&mut self) {
        self.platform.unmap(self.virt, PAGE_SIZE);
        self.platform.deallocate_physical(self.phys, PAGE_SIZE);
    }
}

// ============================================================================
// BAR Mapping
// ============================================================================

/// Mapped register BAR
pub struct BarMapping<P: Platform> {
    platform: Arc<P>,
    bar: u8,
    virt: NonNull<u8>,
}

// SAFETY: see DmaPage.
unsafe impl<P: Platform + Send + Sync> Send for BarMapping<P> {}
unsafe impl<P: Platform + Send + Sync> Sync for BarMapping<P> {}

impl<P: Platform> BarMapping<P> {
    pub fn map(platform: &Arc<P>, bar: u8) -> HdaResult<Self> {
        let virt = platform.pci_map_bar(bar)?;
        Ok(Self {
            platform: Arc::clone(platform),
            bar,
            virt,
        })
    }

    pub fn bar(&self) -> u8 {
        self.bar
    }

    pub fn base(&self) -> usize {
        self.virt.as_ptr() as usize
    }
}

impl<P: Platform> Drop for BarMapping<P> {
    fn drop(&mut self) {
        self.platform.pci_unmap_bar(self.bar, self.virt);
    }
}

// ============================================================================
// IRQ Line
// ============================================================================

/// Allocated interrupt; released on drop
pub struct IrqLine<P: Platform> {
    platform: Arc<P>,
    irq: P::Irq,
}

impl<P: Platform> IrqLine<P> {
    pub fn allocate(platform: &Arc<P>, hint: IrqHint) -> HdaResult<Self> {
        let irq = platform.allocate_irq(hint)?;
        Ok(Self {
            platform: Arc::clone(platform),
            irq,
        })
    }

    pub fn enable(&self, enable: bool) {
        self.platform.enable_irq(self.irq, enable);
    }
}

impl<P: Platform> Drop for IrqLine<P> {
    fn drop(&mut self) {
        self.platform.enable_irq(self.irq, false);
        self.platform.deallocate_irq(self.irq);
    }
}
