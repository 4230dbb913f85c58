// ============================================================================
// tests/common/mod.rs - Simulated HDA Controller
// ============================================================================
//!
//! 統合テスト用の疑似 HDA デバイス。
//!
//! - MMIO はただのメモリ
//! - 物理ページはホストのヒープ
//! - `delay()` のたびにデバイス側を 1 ステップ進める
//!   (リセット解除、CORB 消費、RIRB 応答)

#![allow(dead_code)]

use std::collections::HashMap;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use uhda::hda::{AccessWidth, HdaError, HdaResult, IrqHint, Platform, PlatformError};
use uhda::regs::*;
use x86_64::PhysAddr;

const MMIO_SIZE: usize = 0x2000;
const BAR0_VALUE: u32 = 0xFEB0_0000;
const FIRST_PHYS: u64 = 0x0010_0000;

/// Device configuration
#[derive(Debug, Clone)]
pub struct Options {
    pub vendor: u16,
    pub iss: u16,
    pub oss: u16,
    pub ok64: bool,
    /// CORBSIZE / RIRBSIZE capability bits (0b001 = 2, 0b010 = 16, 0b100 = 256)
    pub ring_caps: u8,
    /// STATESTS bits raised when the link leaves reset
    pub codecs: u16,
    /// Codecs that consume verbs but never answer
    pub silent: u16,
    /// Fail the n-th physical allocation (0-based)
    pub fail_allocation: Option<usize>,
    /// Put an I/O BAR in front of the memory BAR
    pub io_bar_first: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            vendor: 0x8086,
            iss: 2,
            oss: 4,
            ok64: true,
            ring_caps: 0b111,
            codecs: 0b1,
            silent: 0,
            fail_allocation: None,
            io_bar_first: false,
        }
    }
}

#[repr(C, align(4096))]
struct Page([u8; PAGE_SIZE]);

struct State {
    config: [u8; 256],
    pages: HashMap<u64, Box<Page>>,
    next_phys: u64,
    allocations: usize,
    mapped: usize,
    bar_mapped: bool,
    irq_allocated: Option<IrqHint>,
    irq_enabled: bool,
    in_reset: bool,
    verbs: Vec<u32>,
}

/// Simulated controller plus host
pub struct FakeHda {
    options: Options,
    /// GCAP.64OK restored on reset
    ok64: AtomicBool,
    mmio: *mut u8,
    _mmio_backing: Box<[u64]>,
    state: Mutex<State>,
    interrupts_masked: AtomicBool,
    masked_sections: AtomicUsize,
}

// SAFETY: `mmio` points into `_mmio_backing`, owned by the same value; all
// accesses are volatile and the tests drive the device from one thread.
unsafe impl Send for FakeHda {}
unsafe impl Sync for FakeHda {}

impl FakeHda {
    pub fn new(options: Options) -> Self {
        let mut backing = vec![0u64; MMIO_SIZE / 8].into_boxed_slice();
        let mmio = backing.as_mut_ptr() as *mut u8;

        let mut config = [0u8; 256];
        config[0..2].copy_from_slice(&options.vendor.to_le_bytes());
        config[2..4].copy_from_slice(&0x2668u16.to_le_bytes());
        let memory_bar = if options.io_bar_first { 0x14 } else { 0x10 };
        if options.io_bar_first {
            config[0x10..0x14].copy_from_slice(&0x0000_C001u32.to_le_bytes());
        }
        config[memory_bar..memory_bar + 4].copy_from_slice(&BAR0_VALUE.to_le_bytes());

        let fake = Self {
            ok64: AtomicBool::new(options.ok64),
            options,
            mmio,
            _mmio_backing: backing,
            interrupts_masked: AtomicBool::new(false),
            masked_sections: AtomicUsize::new(0),
            state: Mutex::new(State {
                config,
                pages: HashMap::new(),
                next_phys: FIRST_PHYS,
                allocations: 0,
                mapped: 0,
                bar_mapped: false,
                irq_allocated: None,
                irq_enabled: false,
                in_reset: true,
                verbs: Vec::new(),
            }),
        };
        fake.power_on_defaults();
        fake
    }

    // ========================================================================
    // MMIO helpers
    // ========================================================================

    pub fn read<T: Copy>(&self, offset: usize) -> T {
        assert!(offset + size_of::<T>() <= MMIO_SIZE);
        // SAFETY: in bounds of the backing store; naturally aligned offsets.
        unsafe { ptr::read_volatile(self.mmio.add(offset) as *const T) }
    }

    pub fn write<T: Copy>(&self, offset: usize, value: T) {
        assert!(offset + size_of::<T>() <= MMIO_SIZE);
        // SAFETY: see `read`.
        unsafe { ptr::write_volatile(self.mmio.add(offset) as *mut T, value) }
    }

    pub fn mmio_base(&self) -> usize {
        self.mmio as usize
    }

    fn power_on_defaults(&self) {
        for offset in (0..MMIO_SIZE).step_by(8) {
            self.write::<u64>(offset, 0);
        }

        let mut gcap = (self.options.oss << GCAP_OSS_SHIFT) | (self.options.iss << GCAP_ISS_SHIFT);
        if self.ok64.load(Ordering::SeqCst) {
            gcap |= GCAP_OK64;
        }
        self.write(GCAP.offset(), gcap);
        self.write(CORBSIZE.offset(), self.options.ring_caps << RING_SZCAP_SHIFT);
        self.write(RIRBSIZE.offset(), self.options.ring_caps << RING_SZCAP_SHIFT);
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Physical pages currently allocated
    pub fn live_pages(&self) -> usize {
        self.state.lock().unwrap().pages.len()
    }

    pub fn live_mappings(&self) -> usize {
        self.state.lock().unwrap().mapped
    }

    pub fn bar_mapped(&self) -> bool {
        self.state.lock().unwrap().bar_mapped
    }

    pub fn irq(&self) -> Option<IrqHint> {
        self.state.lock().unwrap().irq_allocated
    }

    pub fn irq_enabled(&self) -> bool {
        self.state.lock().unwrap().irq_enabled
    }

    /// Change GCAP.64OK, now and across later resets
    pub fn set_ok64(&self, ok64: bool) {
        self.ok64.store(ok64, Ordering::SeqCst);
        let gcap = self.read::<u16>(GCAP.offset()) & !GCAP_OK64;
        self.write(GCAP.offset(), if ok64 { gcap | GCAP_OK64 } else { gcap });
    }

    pub fn interrupts_masked(&self) -> bool {
        self.interrupts_masked.load(Ordering::SeqCst)
    }

    /// How many times the driver masked interrupts
    pub fn masked_sections(&self) -> usize {
        self.masked_sections.load(Ordering::SeqCst)
    }

    pub fn pci_command(&self) -> u16 {
        let state = self.state.lock().unwrap();
        u16::from_le_bytes([state.config[4], state.config[5]])
    }

    /// Every verb the device consumed, oldest first
    pub fn take_verbs(&self) -> Vec<u32> {
        std::mem::take(&mut self.state.lock().unwrap().verbs)
    }

    /// Copy a physical page
    pub fn page(&self, phys: u64) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        let base = phys & !(PAGE_SIZE as u64 - 1);
        let page = state.pages.get(&base).expect("unknown physical page");
        let offset = (phys - base) as usize;
        page.0[offset..].to_vec()
    }

    /// Overwrite bytes of a physical page, as a bus master would
    pub fn poke(&self, phys: u64, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let base = phys & !(PAGE_SIZE as u64 - 1);
        let page = state.pages.get_mut(&base).expect("unknown physical page");
        let offset = (phys - base) as usize;
        page.0[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Offset of a stream descriptor block; outputs follow the inputs
    pub fn stream_offset(&self, output: bool, index: usize) -> usize {
        let slot = if output { self.options.iss as usize + index } else { index };
        STREAM_BASE + slot * STREAM_DESC_SIZE
    }

    /// Contents of BDL entry `entry` of a stream's buffer, as played by the DMA engine
    pub fn play_entry(&self, output: bool, index: usize, entry: usize) -> Vec<u8> {
        let sd = self.stream_offset(output, index);
        let bdl = self.read::<u32>(sd + SD_BDPL.offset()) as u64
            | ((self.read::<u32>(sd + SD_BDPU.offset()) as u64) << 32);

        let raw = self.page(bdl + (entry * BDL_ENTRY_SIZE) as u64);
        let addr = u64::from_le_bytes(raw[0..8].try_into().unwrap());
        let length = u32::from_le_bytes(raw[8..12].try_into().unwrap()) as usize;

        self.page(addr)[..length].to_vec()
    }

    /// Raise the completion status of a stream
    pub fn raise_completion(&self, output: bool, index: usize) {
        let slot = if output { self.options.iss as usize + index } else { index };
        let sd = self.stream_offset(output, index);
        self.write::<u8>(sd + SD_STS.offset(), SdSts::BCIS.bits());
        let intsts = self.read::<u32>(INTSTS.offset());
        self.write(INTSTS.offset(), intsts | (1 << slot) | (1 << 31));
    }

    pub fn clear_interrupts(&self) {
        self.write::<u32>(INTSTS.offset(), 0);
    }

    // ========================================================================
    // Device model
    // ========================================================================

    fn step(&self) {
        let crst = self.read::<u32>(GCTL.offset()) & Gctl::CRST.bits() != 0;
        let mut state = self.state.lock().unwrap();

        if !crst {
            if !state.in_reset {
                state.in_reset = true;
                drop(state);
                self.power_on_defaults();
            }
            return;
        }

        if state.in_reset {
            state.in_reset = false;
            let statests = self.read::<u16>(STATESTS.offset());
            self.write(STATESTS.offset(), statests | self.options.codecs);
        }

        self.process_commands(&mut state);
    }

    fn process_commands(&self, state: &mut State) {
        if self.read::<u16>(RIRBWP.offset()) & RIRBWP_RST != 0 {
            self.write::<u16>(RIRBWP.offset(), 0);
        }

        let corb_running = self.read::<u8>(CORBCTL.offset()) & CorbCtl::RUN.bits() != 0;
        let rirb_running = self.read::<u8>(RIRBCTL.offset()) & RirbCtl::DMAEN.bits() != 0;
        if !corb_running || !rirb_running {
            return;
        }

        let corb_size = ring_entries(self.read::<u8>(CORBSIZE.offset()));
        let rirb_size = ring_entries(self.read::<u8>(RIRBSIZE.offset()));
        let corb_base = self.read::<u32>(CORBLBASE.offset()) as u64
            | ((self.read::<u32>(CORBUBASE.offset()) as u64) << 32);
        let rirb_base = self.read::<u32>(RIRBLBASE.offset()) as u64
            | ((self.read::<u32>(RIRBUBASE.offset()) as u64) << 32);

        let wp = self.read::<u16>(CORBWP.offset()) & RING_POINTER_MASK;
        let mut rp = self.read::<u16>(CORBRP.offset()) & RING_POINTER_MASK;

        while rp != wp {
            rp = (rp + 1) % corb_size;

            let corb = state.pages.get(&corb_base).expect("CORB not in host memory");
            let slot = rp as usize * 4;
            let verb = u32::from_le_bytes(corb.0[slot..slot + 4].try_into().unwrap());
            self.write(CORBRP.offset(), rp);
            state.verbs.push(verb);

            let cid = (verb >> 28) as u16;
            if self.options.silent & (1 << cid) != 0 || self.options.codecs & (1 << cid) == 0 {
                continue;
            }

            let response = codec_response(verb);
            let rirb_wp = (self.read::<u16>(RIRBWP.offset()) + 1) % rirb_size;
            let rirb = state.pages.get_mut(&rirb_base).expect("RIRB not in host memory");
            let slot = rirb_wp as usize * 8;
            rirb.0[slot..slot + 4].copy_from_slice(&response.to_le_bytes());
            rirb.0[slot + 4..slot + 8].copy_from_slice(&(cid as u32).to_le_bytes());
            self.write(RIRBWP.offset(), rirb_wp);
        }
    }
}

fn ring_entries(size_reg: u8) -> u16 {
    match size_reg & RING_SIZE_MASK {
        RING_SIZE_256 => 256,
        RING_SIZE_16 => 16,
        _ => 2,
    }
}

// ============================================================================
// Codec model
// ============================================================================
//
// NID 0x01  audio function group (nodes 0x02..=0x15)
// NID 0x02  DAC
// NID 0x03  DAC
// NID 0x0C  mixer   <- 0x02, 0x03
// NID 0x14  speaker <- 0x0C           (association 1, sequence 0)
// NID 0x15  headphone <- 0x03, 0x0C   (association 1, sequence 1)

pub const CODEC_VENDOR: u32 = 0x10EC_0282;
pub const DAC_A: u8 = 0x02;
pub const DAC_B: u8 = 0x03;
pub const MIXER: u8 = 0x0C;
pub const SPEAKER: u8 = 0x14;
pub const HEADPHONE: u8 = 0x15;

const OUT_AMP_CAPS: u32 = (1 << 31) | (0x7F << 8) | 0x57;

fn widget_caps(nid: u8) -> u32 {
    let amp = WCAP_OUT_AMP | WCAP_AMP_OVERRIDE;
    match nid {
        DAC_A | DAC_B => amp,
        MIXER => (0x2 << WCAP_TYPE_SHIFT) | amp | WCAP_CONN_LIST,
        SPEAKER | HEADPHONE => (0x4 << WCAP_TYPE_SHIFT) | amp | WCAP_CONN_LIST,
        _ => 0xF << WCAP_TYPE_SHIFT,
    }
}

fn connections(nid: u8) -> &'static [u8] {
    match nid {
        MIXER => &[DAC_A, DAC_B],
        SPEAKER => &[MIXER],
        HEADPHONE => &[DAC_B, MIXER],
        _ => &[],
    }
}

fn codec_response(verb: u32) -> u32 {
    let nid = ((verb >> 20) & 0xFF) as u8;
    let payload = verb & 0xF_FFFF;
    let cmd = (payload >> 8) as u16;
    let data = (payload & 0xFF) as u8;

    match (cmd, nid) {
        (VERB_GET_PARAM, 0) => match data {
            PARAM_VENDOR_ID => CODEC_VENDOR,
            PARAM_SUB_NODE_COUNT => (1 << 16) | 1,
            _ => 0,
        },
        (VERB_GET_PARAM, 1) => match data {
            PARAM_SUB_NODE_COUNT => (0x02 << 16) | (HEADPHONE as u32 - 0x02 + 1),
            PARAM_FUNC_GROUP_TYPE => FUNC_GROUP_AUDIO as u32,
            _ => 0,
        },
        (VERB_GET_PARAM, _) => match data {
            PARAM_WIDGET_CAPS => widget_caps(nid),
            PARAM_OUT_AMP_CAPS => OUT_AMP_CAPS,
            PARAM_PIN_CAPS if nid == SPEAKER || nid == HEADPHONE => PIN_CAP_OUTPUT | PIN_CAP_EAPD,
            PARAM_CONN_LIST_LEN => connections(nid).len() as u32,
            _ => 0,
        },
        (VERB_GET_CONFIG_DEFAULT, SPEAKER) => (0x1 << 20) | (1 << 4),
        (VERB_GET_CONFIG_DEFAULT, HEADPHONE) => (0x2 << 20) | (1 << 4) | 1,
        (VERB_GET_CONN_LIST, _) => connections(nid)
            .iter()
            .skip(data as usize)
            .take(4)
            .enumerate()
            .fold(0, |acc, (i, &n)| acc | ((n as u32) << (8 * i))),
        _ => 0,
    }
}

// ============================================================================
// Host primitives
// ============================================================================

impl Platform for FakeHda {
    type Irq = u32;

    fn pci_read(&self, offset: u16, width: AccessWidth) -> HdaResult<u32> {
        let state = self.state.lock().unwrap();
        let offset = offset as usize;
        let len = width as usize;
        if offset + len > state.config.len() {
            return Err(PlatformError::PciAccess.into());
        }

        let mut bytes = [0u8; 4];
        bytes[..len].copy_from_slice(&state.config[offset..offset + len]);
        Ok(u32::from_le_bytes(bytes))
    }

    fn pci_write(&self, offset: u16, width: AccessWidth, value: u32) -> HdaResult<()> {
        let mut state = self.state.lock().unwrap();
        let offset = offset as usize;
        let len = width as usize;
        if offset + len > state.config.len() {
            return Err(PlatformError::PciAccess.into());
        }

        state.config[offset..offset + len].copy_from_slice(&value.to_le_bytes()[..len]);
        Ok(())
    }

    fn pci_map_bar(&self, bar: u8) -> HdaResult<NonNull<u8>> {
        let expected = if self.options.io_bar_first { 1 } else { 0 };
        if bar != expected {
            return Err(PlatformError::BarMapping.into());
        }
        self.state.lock().unwrap().bar_mapped = true;
        NonNull::new(self.mmio).ok_or(HdaError::Platform(PlatformError::BarMapping))
    }

    fn pci_unmap_bar(&self, _bar: u8, _virt: NonNull<u8>) {
        self.state.lock().unwrap().bar_mapped = false;
    }

    fn allocate_irq(&self, hint: IrqHint) -> HdaResult<u32> {
        self.state.lock().unwrap().irq_allocated = Some(hint);
        Ok(11)
    }

    fn deallocate_irq(&self, _irq: u32) {
        self.state.lock().unwrap().irq_allocated = None;
    }

    fn enable_irq(&self, _irq: u32, enable: bool) {
        self.state.lock().unwrap().irq_enabled = enable;
    }

    fn allocate_physical(&self, size: usize) -> HdaResult<PhysAddr> {
        assert_eq!(size, PAGE_SIZE);
        let mut state = self.state.lock().unwrap();

        let n = state.allocations;
        state.allocations += 1;
        if self.options.fail_allocation == Some(n) {
            return Err(PlatformError::PhysicalAllocation.into());
        }

        let phys = state.next_phys;
        state.next_phys += PAGE_SIZE as u64;
        state.pages.insert(phys, Box::new(Page([0xCC; PAGE_SIZE])));
        Ok(PhysAddr::new(phys))
    }

    fn deallocate_physical(&self, phys: PhysAddr, _size: usize) {
        let removed = self.state.lock().unwrap().pages.remove(&phys.as_u64());
        assert!(removed.is_some(), "double free of {:#x}", phys.as_u64());
    }

    fn map(&self, phys: PhysAddr, _size: usize) -> HdaResult<NonNull<u8>> {
        let mut state = self.state.lock().unwrap();
        let page = state
            .pages
            .get_mut(&phys.as_u64())
            .ok_or(HdaError::Platform(PlatformError::Mapping))?;
        let virt = NonNull::from(&mut page.0).cast();
        state.mapped += 1;
        Ok(virt)
    }

    fn unmap(&self, _virt: NonNull<u8>, _size: usize) {
        self.state.lock().unwrap().mapped -= 1;
    }

    fn delay(&self, _duration: Duration) {
        assert!(!self.interrupts_masked(), "busy-wait with interrupts masked");
        self.step();
    }

    fn save_and_disable_interrupts(&self) -> bool {
        self.masked_sections.fetch_add(1, Ordering::SeqCst);
        !self.interrupts_masked.swap(true, Ordering::SeqCst)
    }

    fn restore_interrupts(&self, was_enabled: bool) {
        if was_enabled {
            self.interrupts_masked.store(false, Ordering::SeqCst);
        }
    }
}
