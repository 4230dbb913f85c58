// ============================================================================
// src/hda/stream.rs - Audio Stream Engine
// ============================================================================
//!
//! HDA ストリーム (DMA エンジン) の管理。
//!
//! - ストリーム設定 (SDnFMT / BDL / ストリームタグ)
//! - ソフトウェアリングバッファへのデータ投入
//! - 完了割り込みによるハードウェアページの補充
//!
//! リングバッファのカーソルとハードウェアページはストリームごとの
//! `IrqMutex` で保護される。投入側 (呼び出しスレッド) と消費側
//! (割り込みハンドラ) が同じロックを取るため、ロック中はローカル割り込みを
//! 禁止する。ロック中にポーリング待ちはしない。

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{fence, Ordering};

use super::format::StreamParams;
use super::mmio::{Register, RegisterSpace};
use super::platform::{poll_until, DmaPage, Platform};
use super::sync::{IrqMutex, IrqMutexGuard};
use super::types::{BdlEntry, HdaError, HdaResult};
use crate::regs::*;

/// Data-fill hook stored with a stream
///
/// The driver keeps it for the caller; it is never invoked from here. Data
/// enters the stream through [`Stream::queue_data`].
pub type FillCallback = Box<dyn FnMut(&mut [u8]) -> usize + Send>;

/// Stream position entry within the DMA position buffer
const DMA_POSITION: Register<u32> = Register::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    Input,
    Output,
}

// ============================================================================
// Ring Buffer
// ============================================================================

/// Byte FIFO between the producer (caller) and the DMA page refill
#[derive(Debug)]
pub struct RingBuffer {
    buffer: Vec<u8>,
    read: usize,
    write: usize,
    len: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> HdaResult<Self> {
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(capacity)?;
        buffer.resize(capacity, 0);

        Ok(Self {
            buffer,
            read: 0,
            write: 0,
            len: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes waiting to be consumed
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    /// Append as much of `data` as fits; returns the number of bytes taken
    pub fn push(&mut self, data: &[u8]) -> usize {
        let count = data.len().min(self.free());
        let first = count.min(self.capacity() - self.write);

        self.buffer[self.write..self.write + first].copy_from_slice(&data[..first]);
        self.buffer[..count - first].copy_from_slice(&data[first..count]);

        self.write = (self.write + count) % self.capacity().max(1);
        self.len += count;
        count
    }

    /// Up to `max` pending bytes as two contiguous pieces, oldest first
    pub fn peek(&self, max: usize) -> (&[u8], &[u8]) {
        let count = max.min(self.len);
        let first = count.min(self.capacity() - self.read);
        (
            &self.buffer[self.read..self.read + first],
            &self.buffer[..count - first],
        )
    }

    /// Drop `count` bytes from the front
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.len);
        self.read = (self.read + count) % self.capacity().max(1);
        self.len -= count;
    }
}

// ============================================================================
// Stream
// ============================================================================

/// Resources of a configured stream
struct StreamBuffers<P: Platform> {
    bdl: DmaPage<P>,
    pages: Vec<DmaPage<P>>,
    ring: RingBuffer,
    /// Hardware page refilled by the next completion interrupt
    next_page: usize,
    params: StreamParams,
    format: u16,
    fill: Option<FillCallback>,
}

impl<P: Platform> StreamBuffers<P> {
    /// Move up to one page from the ring into `pages[index]`, padding with silence
    fn refill(&mut self, index: usize) -> usize {
        let (head, tail) = self.ring.peek(PAGE_SIZE);
        let (head_len, tail_len) = (head.len(), tail.len());

        let page = &mut self.pages[index];
        page.fill(0, head, head_len);
        page.fill(head_len, tail, PAGE_SIZE - head_len);

        let moved = head_len + tail_len;
        self.ring.consume(moved);
        moved
    }
}

struct StreamState<P: Platform> {
    buffers: Option<StreamBuffers<P>>,
    running: bool,
    underruns: u64,
}

/// One stream descriptor and its software buffering
pub struct Stream<P: Platform> {
    direction: StreamDirection,
    index: u8,
    regs: RegisterSpace,
    dma_pos: RegisterSpace,
    platform: Arc<P>,
    state: IrqMutex<StreamState<P>>,
}

impl<P: Platform> Stream<P> {
    /// An unbound stream slot
    pub(crate) fn new(direction: StreamDirection, index: u8, platform: Arc<P>) -> Self {
        Self {
            direction,
            index,
            regs: RegisterSpace::unbound(),
            dma_pos: RegisterSpace::unbound(),
            platform,
            state: IrqMutex::new(StreamState {
                buffers: None,
                running: false,
                underruns: 0,
            }),
        }
    }

    fn lock(&self) -> IrqMutexGuard<'_, StreamState<P>, P> {
        self.state.lock(self.platform.as_ref())
    }

    /// Attach the slot to its descriptor block and DMA position entry
    pub(crate) fn bind(&mut self, regs: RegisterSpace, dma_pos: RegisterSpace, index: u8) {
        self.regs = regs;
        self.dma_pos = dma_pos;
        self.index = index;
    }

    pub fn direction(&self) -> StreamDirection {
        self.direction
    }

    pub fn is_output(&self) -> bool {
        self.direction == StreamDirection::Output
    }

    /// Index within its direction
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Stream tag programmed into SDnCTL and the converters
    pub fn tag(&self) -> u8 {
        self.index + 1
    }

    pub fn registers(&self) -> RegisterSpace {
        self.regs
    }

    pub fn is_configured(&self) -> bool {
        self.lock().buffers.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Completion interrupts that found the ring buffer short of a full page
    pub fn underruns(&self) -> u64 {
        self.lock().underruns
    }

    /// Encoded format of the configured stream
    pub fn format(&self) -> Option<u16> {
        self.lock().buffers.as_ref().map(|b| b.format)
    }

    pub fn params(&self) -> Option<StreamParams> {
        self.lock().buffers.as_ref().map(|b| b.params)
    }

    /// Bytes pending in the software ring buffer
    pub fn queued(&self) -> usize {
        self.lock().buffers.as_ref().map_or(0, |b| b.ring.len())
    }

    /// Take the stored fill hook back
    pub fn take_fill_callback(&self) -> Option<FillCallback> {
        self.lock().buffers.as_mut().and_then(|b| b.fill.take())
    }

    /// Link position in bytes as reported through the DMA position buffer
    pub fn dma_position(&self) -> u32 {
        if !self.dma_pos.is_bound() {
            return 0;
        }
        self.dma_pos.load(DMA_POSITION)
    }

    // ========================================================================
    // Setup / Shutdown
    // ========================================================================

    /// Allocate buffers and program the descriptor
    ///
    /// Output streams only. `params` is adjusted to what the hardware will
    /// play. Returns the encoded format word for the converters on the path.
    pub fn setup(
        &self,
        params: &mut StreamParams,
        ring_buffer_size: usize,
        fill: Option<FillCallback>,
    ) -> HdaResult<u16> {
        if !self.regs.is_bound() || !self.is_output() {
            return Err(HdaError::Unsupported);
        }

        let previous = {
            let mut state = self.lock();
            if state.running {
                self.set_run(false);
                state.running = false;
            }
            state.buffers.take()
        };
        drop(previous);

        let format = params.encode();

        let mut bdl = DmaPage::allocate(&self.platform)?;
        bdl.zero();

        let mut pages = Vec::new();
        pages.try_reserve_exact(BUFFER_PAGES)?;
        for i in 0..BUFFER_PAGES {
            let mut page = DmaPage::allocate(&self.platform)?;
            page.zero();
            bdl.write(i * BDL_ENTRY_SIZE, BdlEntry::new(page.phys().as_u64(), PAGE_SIZE as u32, true));
            pages.push(page);
        }
        fence(Ordering::SeqCst);

        let ring_size = ring_buffer_size.max(1).div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let ring = RingBuffer::new(ring_size)?;

        self.reset()?;
        self.program(bdl.phys().as_u64(), format);

        log::info!(
            "[HDA] {:?} stream {}: format {:#06x} ({} Hz, {} ch), ring {} bytes",
            self.direction,
            self.index,
            format,
            params.sample_rate,
            params.channels,
            ring_size
        );

        let mut state = self.lock();
        state.buffers = Some(StreamBuffers {
            bdl,
            pages,
            ring,
            next_page: 0,
            params: *params,
            format,
            fill,
        });
        state.underruns = 0;

        Ok(format)
    }

    /// Re-program the descriptor of a configured stream after a controller reset
    ///
    /// Buffers and queued data are kept. The engine stays stopped.
    pub(crate) fn restore(&self) -> HdaResult<()> {
        let programmed = {
            let state = self.lock();
            state.buffers.as_ref().map(|b| (b.bdl.phys().as_u64(), b.format))
        };
        let Some((bdl, format)) = programmed else {
            return Ok(());
        };

        self.reset()?;
        self.program(bdl, format);
        log::debug!("[HDA] {:?} stream {}: restored (format {:#06x})", self.direction, self.index, format);
        Ok(())
    }

    /// Format, BDL, cyclic length, last valid index, tag and IOCE
    fn program(&self, bdl: u64, format: u16) {
        let regs = &self.regs;
        regs.store(SD_FMT, format);
        regs.store(SD_BDPL, bdl as u32);
        regs.store(SD_BDPU, (bdl >> 32) as u32);
        regs.store(SD_CBL, (BUFFER_PAGES * PAGE_SIZE) as u32);
        regs.store(SD_LVI, (BUFFER_PAGES - 1) as u16);

        let ctl2 = regs.load(SD_CTL2) & !SD_CTL2_STRM_MASK;
        regs.store(SD_CTL2, ctl2 | ((self.tag() << SD_CTL2_STRM_SHIFT) & SD_CTL2_STRM_MASK));

        regs.store(SD_STS, (SdSts::BCIS | SdSts::FIFOE | SdSts::DESE).bits());
        let ctl0 = SdCtl0::from_bits_retain(regs.load(SD_CTL0));
        regs.store(SD_CTL0, (ctl0 | SdCtl0::IOCE).bits());
    }

    /// Stop the engine and release its buffers
    pub fn shutdown(&self) {
        let released = {
            let mut state = self.lock();
            if self.regs.is_bound() {
                self.set_run(false);
                let ctl0 = SdCtl0::from_bits_retain(self.regs.load(SD_CTL0));
                self.regs.store(SD_CTL0, (ctl0 - SdCtl0::IOCE).bits());
            }
            state.running = false;
            state.buffers.take()
        };

        if let Some(buffers) = released {
            log::debug!(
                "[HDA] {:?} stream {}: released (BDL at {:#x})",
                self.direction,
                self.index,
                buffers.bdl.phys().as_u64()
            );
        }
    }

    /// SRST enter/exit handshake; never called with the state lock held
    fn reset(&self) -> HdaResult<()> {
        let regs = &self.regs;
        let platform = self.platform.as_ref();

        let ctl0 = SdCtl0::from_bits_retain(regs.load(SD_CTL0));
        regs.store(SD_CTL0, ((ctl0 - SdCtl0::RUN) | SdCtl0::SRST).bits());
        if !poll_until(platform, RESET_TIMEOUT, || {
            SdCtl0::from_bits_retain(regs.load(SD_CTL0)).contains(SdCtl0::SRST)
        }) {
            log::warn!("[HDA] {:?} stream {}: reset entry timed out", self.direction, self.index);
            return Err(HdaError::Timeout);
        }

        let ctl0 = SdCtl0::from_bits_retain(regs.load(SD_CTL0));
        regs.store(SD_CTL0, (ctl0 - SdCtl0::SRST).bits());
        if !poll_until(platform, RESET_TIMEOUT, || {
            !SdCtl0::from_bits_retain(regs.load(SD_CTL0)).contains(SdCtl0::SRST)
        }) {
            log::warn!("[HDA] {:?} stream {}: reset exit timed out", self.direction, self.index);
            return Err(HdaError::Timeout);
        }

        Ok(())
    }

    fn set_run(&self, run: bool) {
        let ctl0 = SdCtl0::from_bits_retain(self.regs.load(SD_CTL0));
        let ctl0 = if run { ctl0 | SdCtl0::RUN } else { ctl0 - SdCtl0::RUN };
        self.regs.store(SD_CTL0, ctl0.bits());
    }

    // ========================================================================
    // Playback
    // ========================================================================

    /// Start or pause the DMA engine
    ///
    /// Starting primes every hardware page from the ring buffer first.
    /// Pausing keeps whatever is still queued.
    pub fn play(&self, run: bool) -> HdaResult<()> {
        let mut state = self.lock();
        let state = &mut *state;
        let buffers = state.buffers.as_mut().ok_or(HdaError::Unsupported)?;

        if run == state.running {
            return Ok(());
        }

        if run {
            let mut primed = 0;
            for page in 0..BUFFER_PAGES {
                primed += buffers.refill(page);
            }
            buffers.next_page = 0;
            fence(Ordering::SeqCst);

            log::debug!("[HDA] {:?} stream {}: start ({} bytes primed)", self.direction, self.index, primed);
        } else {
            log::debug!("[HDA] {:?} stream {}: pause", self.direction, self.index);
        }

        self.set_run(run);
        state.running = run;
        Ok(())
    }

    /// Halt the engine without touching buffers
    pub(crate) fn stop(&self) {
        let mut state = self.lock();
        if state.running && self.regs.is_bound() {
            self.set_run(false);
        }
        state.running = false;
    }

    /// Queue PCM data; returns how many bytes were accepted
    ///
    /// Fewer bytes than offered means the ring buffer is full. Retry later.
    pub fn queue_data(&self, data: &[u8]) -> HdaResult<usize> {
        if !self.is_output() {
            return Err(HdaError::Unsupported);
        }

        let mut state = self.lock();
        let buffers = state.buffers.as_mut().ok_or(HdaError::Unsupported)?;
        Ok(buffers.ring.push(data))
    }

    /// Buffer completion: acknowledge, then refill the page the hardware just left
    ///
    /// Called from the interrupt handler.
    pub(crate) fn output_irq(&self) {
        self.regs.store(SD_STS, SdSts::BCIS.bits());
        if !self.is_output() {
            return;
        }

        let mut state = self.lock();
        let state = &mut *state;
        let Some(buffers) = state.buffers.as_mut() else {
            return;
        };

        let page = buffers.next_page;
        if buffers.refill(page) < PAGE_SIZE && state.running {
            state.underruns += 1;
        }
        buffers.next_page = (page + 1) % BUFFER_PAGES;
        fence(Ordering::SeqCst);

        #[cfg(feature = "verbose_logging")]
        log::trace!(
            "[HDA] {:?} stream {}: refilled page {}, {} bytes queued",
            self.direction,
            self.index,
            page,
            buffers.ring.len()
        );
    }
}
