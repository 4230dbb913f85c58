// ============================================================================
// src/hda/command.rs - CORB/RIRB Command Protocol
// ============================================================================
//!
//! CORB/RIRB によるコーデックコマンドの送受信。
//!
//! - リングサイズのネゴシエーション
//! - ベリブの投入 (short / long)
//! - 応答待ち (有限リトライ)

use spin::Mutex;

use super::mmio::{Register, RegisterSpace};
use super::platform::{poll_until, DmaPage, Platform};
use super::types::{HdaError, HdaResult, ResponseDescriptor, VerbDescriptor};
use crate::regs::*;

/// Size of one CORB entry
const CORB_ENTRY_SIZE: usize = 4;

/// Size of one RIRB entry
const RIRB_ENTRY_SIZE: usize = 8;

/// Pick the largest ring the hardware supports
///
/// Returns `(entries, SIZE field value)` for a CORBSIZE/RIRBSIZE register value.
pub fn negotiate_ring_size(size_reg: u8) -> (u16, u8) {
    let cap = (size_reg >> RING_SZCAP_SHIFT) & 0x07;

    if cap & RING_SZCAP_256 != 0 {
        (256, RING_SIZE_256)
    } else if cap & RING_SZCAP_16 != 0 {
        (16, RING_SIZE_16)
    } else {
        (2, RING_SIZE_2)
    }
}

// ============================================================================
// Command Ring
// ============================================================================

/// Command (CORB) and response (RIRB) rings, one DMA page each
pub struct CommandRing<P: Platform> {
    corb: DmaPage<P>,
    rirb: DmaPage<P>,
    corb_size: u16,
    rirb_size: u16,
}

impl<P: Platform> CommandRing<P> {
    pub fn new(corb: DmaPage<P>, rirb: DmaPage<P>) -> Self {
        Self {
            corb,
            rirb,
            corb_size: 2,
            rirb_size: 2,
        }
    }

    pub fn corb_size(&self) -> u16 {
        self.corb_size
    }

    pub fn rirb_size(&self) -> u16 {
        self.rirb_size
    }

    /// Negotiate ring sizes and program base addresses, then start both DMA engines
    pub fn start(&mut self, regs: &RegisterSpace, platform: &P) -> HdaResult<()> {
        self.corb_size = Self::negotiate(regs, CORBSIZE);
        self.rirb_size = Self::negotiate(regs, RIRBSIZE);

        log::debug!(
            "[HDA] CORB: {} entries at {:#x}, RIRB: {} entries at {:#x}",
            self.corb_size,
            self.corb.phys().as_u64(),
            self.rirb_size,
            self.rirb.phys().as_u64()
        );

        let corb_phys = self.corb.phys().as_u64();
        let rirb_phys = self.rirb.phys().as_u64();
        regs.store(CORBLBASE, corb_phys as u32);
        regs.store(CORBUBASE, (corb_phys >> 32) as u32);
        regs.store(RIRBLBASE, rirb_phys as u32);
        regs.store(RIRBUBASE, (rirb_phys >> 32) as u32);

        let rintcnt = regs.load(RINTCNT);
        regs.store(RINTCNT, (rintcnt & !RINTCNT_MASK) | 0xFF);

        self.rewind(regs, platform)
    }

    /// Put both ring pointers back to slot 0 and run the DMA engines
    fn rewind(&self, regs: &RegisterSpace, platform: &P) -> HdaResult<()> {
        regs.store(CORBWP, regs.load(CORBWP) & !RING_POINTER_MASK);
        self.reset_read_pointer(regs, platform)?;
        regs.store(RIRBWP, RIRBWP_RST);

        let corbctl = CorbCtl::from_bits_retain(regs.load(CORBCTL));
        regs.store(CORBCTL, (corbctl | CorbCtl::RUN).bits());
        let rirbctl = RirbCtl::from_bits_retain(regs.load(RIRBCTL));
        regs.store(RIRBCTL, (rirbctl | RirbCtl::DMAEN).bits());

        Ok(())
    }

    /// Bring the rings back into lock-step after a verb went unanswered
    ///
    /// A consumed but unanswered verb leaves RIRBWP one slot behind CORBRP;
    /// both engines are stopped and restarted from slot 0.
    pub fn realign(&mut self, regs: &RegisterSpace, platform: &P) -> HdaResult<()> {
        Self::stop(regs);
        if !poll_until(platform, RESET_TIMEOUT, || {
            !CorbCtl::from_bits_retain(regs.load(CORBCTL)).contains(CorbCtl::RUN)
                && !RirbCtl::from_bits_retain(regs.load(RIRBCTL)).contains(RirbCtl::DMAEN)
        }) {
            return Err(HdaError::Timeout);
        }

        self.rewind(regs, platform)
    }

    /// Stop both DMA engines
    pub fn stop(regs: &RegisterSpace) {
        let corbctl = CorbCtl::from_bits_retain(regs.load(CORBCTL));
        regs.store(CORBCTL, (corbctl - CorbCtl::RUN).bits());
        let rirbctl = RirbCtl::from_bits_retain(regs.load(RIRBCTL));
        regs.store(RIRBCTL, (rirbctl - RirbCtl::DMAEN).bits());
    }

    fn negotiate(regs: &RegisterSpace, reg: Register<u8>) -> u16 {
        let value = regs.load(reg);
        let (entries, size) = negotiate_ring_size(value);

        if value & RING_SIZE_MASK != size {
            regs.store(reg, (value & !RING_SIZE_MASK) | size);
        }

        entries
    }

    fn reset_read_pointer(&self, regs: &RegisterSpace, platform: &P) -> HdaResult<()> {
        regs.store(CORBRP, CORBRP_RST);
        if !poll_until(platform, RESET_TIMEOUT, || regs.load(CORBRP) & CORBRP_RST != 0) {
            return Err(HdaError::Timeout);
        }

        regs.store(CORBRP, 0);
        if !poll_until(platform, RESET_TIMEOUT, || regs.load(CORBRP) & CORBRP_RST == 0) {
            return Err(HdaError::Timeout);
        }

        Ok(())
    }

    /// Write `verb` into the next CORB slot and publish it
    ///
    /// Returns the slot index just written.
    pub fn submit(&mut self, regs: &RegisterSpace, verb: VerbDescriptor) -> u8 {
        let wp = regs.load(CORBWP);
        let index = ((wp & RING_POINTER_MASK) + 1) % self.corb_size;

        self.corb.write(index as usize * CORB_ENTRY_SIZE, verb.0);
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);

        regs.store(CORBWP, (wp & !RING_POINTER_MASK) | index);
        index as u8
    }

    /// Wait until the codec consumed slot `index` and answered in the same RIRB slot
    pub fn wait(&self, regs: &RegisterSpace, platform: &P, index: u8) -> HdaResult<ResponseDescriptor> {
        let index = index as u16;

        if !poll_until(platform, VERB_TIMEOUT, || regs.load(CORBRP) & RING_POINTER_MASK == index) {
            return Err(HdaError::Timeout);
        }

        if !poll_until(platform, VERB_TIMEOUT, || regs.load(RIRBWP) & RING_POINTER_MASK == index) {
            return Err(HdaError::Timeout);
        }

        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);

        let offset = index as usize % self.rirb_size as usize * RIRB_ENTRY_SIZE;
        Ok(ResponseDescriptor {
            response: self.rirb.read(offset),
            response_ex: self.rirb.read(offset + 4),
        })
    }
}

// ============================================================================
// Command Interface
// ============================================================================

/// Anything that can carry a verb to a codec and return its response
pub trait CodecBus {
    fn command(&self, verb: VerbDescriptor) -> HdaResult<u32>;

    fn command_short(&self, cid: u8, nid: u8, cmd: u16, data: u8) -> HdaResult<u32> {
        self.command(VerbDescriptor::short(cid, nid, cmd, data))
    }

    fn command_long(&self, cid: u8, nid: u8, cmd: u8, data: u16) -> HdaResult<u32> {
        self.command(VerbDescriptor::long(cid, nid, cmd, data))
    }

    /// Get parameter from a codec node
    fn get_parameter(&self, cid: u8, nid: u8, param: u8) -> HdaResult<u32> {
        self.command_short(cid, nid, VERB_GET_PARAM, param)
    }
}

/// The controller's rings, borrowed for verb round trips
pub struct CommandChannel<'a, P: Platform> {
    pub(crate) regs: &'a RegisterSpace,
    pub(crate) ring: &'a Mutex<CommandRing<P>>,
    pub(crate) platform: &'a P,
}

impl<P: Platform> CodecBus for CommandChannel<'_, P> {
    fn command(&self, verb: VerbDescriptor) -> HdaResult<u32> {
        // The lock spans submit and wait so that slots stay in lock-step
        let mut ring = self.ring.lock();
        let index = ring.submit(self.regs, verb);
        let response = match ring.wait(self.regs, self.platform, index) {
            Ok(response) => response,
            Err(e) => {
                if let Err(realign) = ring.realign(self.regs, self.platform) {
                    log::error!("[HDA] Command ring realignment failed: {}", realign);
                }
                return Err(e);
            }
        };

        #[cfg(feature = "verbose_logging")]
        log::trace!(
            "[HDA] verb {:#010x} -> {:#010x} (slot {})",
            verb.0,
            response.response,
            index
        );

        Ok(response.response)
    }
}
