// ============================================================================
// src/hda/controller.rs - HDA Controller Lifecycle
// ============================================================================
//!
//! Intel HD Audio コントローラのライフサイクル。
//!
//! - PCI 設定 / BAR マッピング / IRQ 割り当て
//! - リセット (suspend / resume)
//! - CORB/RIRB と DMA 位置バッファの設定
//! - コーデック検出
//! - 割り込みハンドラ
//! - パス / ストリーム操作の入口

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use super::codec::{Codec, Output};
use super::command::{CommandChannel, CommandRing};
use super::format::StreamParams;
use super::mmio::RegisterSpace;
use super::path::Path;
use super::platform::{poll_until, AccessWidth, BarMapping, DmaPage, IrqHint, IrqLine, Platform};
use super::stream::{FillCallback, Stream, StreamDirection};
use super::types::{HdaError, HdaResult};
use crate::regs::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Active,
    /// Link in reset; also the state before the first bring-up
    Suspended,
}

/// Handle to a codec's output path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathId {
    pub codec: u8,
    pub index: usize,
}

/// Handle to a stream slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamId {
    pub direction: StreamDirection,
    pub index: u8,
}

impl StreamId {
    pub fn output(index: u8) -> Self {
        Self {
            direction: StreamDirection::Output,
            index,
        }
    }

    pub fn input(index: u8) -> Self {
        Self {
            direction: StreamDirection::Input,
            index,
        }
    }
}

// ============================================================================
// HDA Controller
// ============================================================================

/// Intel HD Audio Controller
///
/// Fields drop in declaration order: streams and rings go before the
/// interrupt and the register mapping.
pub struct Controller<P: Platform> {
    codecs: Vec<Codec>,
    in_streams: Vec<Stream<P>>,
    out_streams: Vec<Stream<P>>,
    in_count: usize,
    out_count: usize,
    /// Guards every command round trip
    commands: Mutex<CommandRing<P>>,
    dma_pos: DmaPage<P>,
    state: ControllerState,
    regs: RegisterSpace,
    irq: IrqLine<P>,
    bar: BarMapping<P>,
    platform: Arc<P>,
}

impl<P: Platform> Controller<P> {
    /// Bring up the controller behind `platform`
    ///
    /// Every resource acquired before a failure is released on return.
    pub fn new(platform: Arc<P>) -> HdaResult<Self> {
        pci_setup(platform.as_ref())?;
        let bar = map_register_bar(&platform)?;

        let vendor = platform.pci_read(PCI_VENDOR_ID, AccessWidth::Word)? as u16;
        let hint = if vendor == PCI_VENDOR_NVIDIA {
            IrqHint::Legacy
        } else {
            IrqHint::Any
        };
        let irq = IrqLine::allocate(&platform, hint)?;

        let corb = DmaPage::allocate(&platform)?;
        let rirb = DmaPage::allocate(&platform)?;
        let mut dma_pos = DmaPage::allocate(&platform)?;
        dma_pos.zero();

        let mut in_streams = Vec::new();
        let mut out_streams = Vec::new();
        in_streams.try_reserve_exact(MAX_STREAMS)?;
        out_streams.try_reserve_exact(MAX_STREAMS)?;
        for i in 0..MAX_STREAMS as u8 {
            in_streams.push(Stream::new(StreamDirection::Input, i, Arc::clone(&platform)));
            out_streams.push(Stream::new(StreamDirection::Output, i, Arc::clone(&platform)));
        }

        log::info!(
            "[HDA] Controller {:04x}: registers in BAR{} at {:#x}, IRQ hint {:?}",
            vendor,
            bar.bar(),
            bar.base(),
            hint
        );

        // SAFETY: the BAR stays mapped for as long as `bar` lives, which is
        // the lifetime of the controller and of every copy of `regs`.
        let regs = unsafe { RegisterSpace::new(bar.base()) };

        let mut controller = Self {
            codecs: Vec::new(),
            in_streams,
            out_streams,
            in_count: 0,
            out_count: 0,
            commands: Mutex::new(CommandRing::new(corb, rirb)),
            dma_pos,
            state: ControllerState::Suspended,
            regs,
            irq,
            bar,
            platform,
        };

        controller.resume()?;
        Ok(controller)
    }

    /// Stop all DMA and put the link into reset
    ///
    /// Configured streams keep their buffers and queued data; [`resume`](Self::resume)
    /// programs them again. The interrupt stays disabled even if reset times out.
    pub fn suspend(&mut self) -> HdaResult<()> {
        self.irq.enable(false);
        for stream in self.in_streams.iter().chain(self.out_streams.iter()) {
            stream.stop();
        }

        let gctl = Gctl::from_bits_retain(self.regs.load(GCTL));
        if !gctl.contains(Gctl::CRST) {
            self.codecs.clear();
            self.state = ControllerState::Suspended;
            return Ok(());
        }

        CommandRing::<P>::stop(&self.regs);

        self.regs.store(GCTL, (gctl - Gctl::CRST).bits());
        let regs = &self.regs;
        if !poll_until(self.platform.as_ref(), RESET_TIMEOUT, || {
            !Gctl::from_bits_retain(regs.load(GCTL)).contains(Gctl::CRST)
        }) {
            log::error!("[HDA] Controller reset entry timed out");
            return Err(HdaError::Timeout);
        }
        self.platform.delay(POLL_INTERVAL);

        self.codecs.clear();
        self.state = ControllerState::Suspended;
        log::info!("[HDA] Controller suspended");
        Ok(())
    }

    /// Reset, program and enumerate
    pub fn resume(&mut self) -> HdaResult<()> {
        let result = self.bring_up();
        if let Err(e) = result {
            log::error!("[HDA] Resume failed: {}", e);
        }
        result
    }

    fn bring_up(&mut self) -> HdaResult<()> {
        pci_setup(self.platform.as_ref())?;
        self.suspend()?;

        self.irq.enable(true);
        let result = self.start_link();
        if result.is_err() {
            self.irq.enable(false);
        }
        result
    }

    /// Leave reset and bring every engine up; the interrupt is already enabled
    fn start_link(&mut self) -> HdaResult<()> {
        // Leave reset
        let gctl = Gctl::from_bits_retain(self.regs.load(GCTL));
        self.regs.store(GCTL, (gctl | Gctl::CRST).bits());
        let regs = &self.regs;
        if !poll_until(self.platform.as_ref(), RESET_TIMEOUT, || {
            Gctl::from_bits_retain(regs.load(GCTL)).contains(Gctl::CRST)
        }) {
            log::error!("[HDA] Controller reset exit timed out");
            return Err(HdaError::Timeout);
        }

        let gcap = self.regs.load(GCAP);
        if gcap & GCAP_OK64 == 0 {
            log::warn!("[HDA] Controller lacks 64-bit addressing, rejecting");
            return Err(HdaError::Unsupported);
        }

        self.commands.get_mut().start(&self.regs, self.platform.as_ref())?;
        self.program_dma_position();

        self.in_count = (((gcap >> GCAP_ISS_SHIFT) & GCAP_STREAM_MASK) as usize).min(MAX_STREAMS);
        self.out_count = (((gcap >> GCAP_OSS_SHIFT) & GCAP_STREAM_MASK) as usize).min(MAX_STREAMS);
        self.bind_streams();
        self.restore_streams();

        self.platform.delay(CODEC_SETTLE_DELAY);

        let stream_bits = (1u32 << (self.in_count + self.out_count)) - 1;
        let intctl = IntCtl::from_bits_retain(self.regs.load(INTCTL));
        self.regs.store(INTCTL, (intctl | IntCtl::GIE).bits() | (stream_bits & INT_STREAM_MASK));

        self.codecs = self.discover_codecs()?;
        self.state = ControllerState::Active;

        let commands = self.commands.lock();
        log::info!(
            "[HDA] Controller active: {} input / {} output streams, CORB {} / RIRB {} entries, {} codec(s)",
            self.in_count,
            self.out_count,
            commands.corb_size(),
            commands.rirb_size(),
            self.codecs.len()
        );

        Ok(())
    }

    fn program_dma_position(&self) {
        let phys = self.dma_pos.phys().as_u64();
        self.regs.store(DPUBASE, (phys >> 32) as u32);
        self.regs.store(DPLBASE, phys as u32 & DPLBASE_ADDR_MASK);
        self.regs.store(DPLBASE, (phys as u32 & DPLBASE_ADDR_MASK) | DPLBASE_DPBE);
    }

    /// Program streams that were configured before the last reset
    fn restore_streams(&self) {
        for stream in self.output_streams() {
            if let Err(e) = stream.restore() {
                log::warn!("[HDA] Output stream {}: restore failed ({}), releasing", stream.index(), e);
                stream.shutdown();
            }
        }
    }

    fn bind_streams(&mut self) {
        // SAFETY: the position page is mapped for the controller's lifetime.
        let positions = unsafe { RegisterSpace::new(self.dma_pos.as_ptr() as usize) };

        for (i, stream) in self.in_streams.iter_mut().take(self.in_count).enumerate() {
            stream.bind(
                self.regs.subspace(STREAM_BASE + i * STREAM_DESC_SIZE),
                positions.subspace(i * DMA_POS_STRIDE),
                i as u8,
            );
        }

        let base = self.in_count;
        for (i, stream) in self.out_streams.iter_mut().take(self.out_count).enumerate() {
            stream.bind(
                self.regs.subspace(STREAM_BASE + (base + i) * STREAM_DESC_SIZE),
                positions.subspace((base + i) * DMA_POS_STRIDE),
                i as u8,
            );
        }
    }

    fn discover_codecs(&self) -> HdaResult<Vec<Codec>> {
        let statests = self.regs.load(STATESTS);
        self.regs.store(STATESTS, statests);

        let bus = self.bus();
        let mut codecs = Vec::new();

        for cid in 0..MAX_CODECS {
            if statests & (1 << cid) == 0 {
                continue;
            }

            match Codec::init(&bus, cid) {
                Ok(codec) => {
                    codecs.try_reserve(1)?;
                    codecs.push(codec);
                }
                Err(HdaError::Timeout) => {
                    log::warn!("[HDA] Codec {} signalled presence but does not respond, skipping", cid);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(codecs)
    }

    /// Suspend and release everything
    pub fn destroy(mut self) -> HdaResult<()> {
        let result = self.suspend();
        log::info!("[HDA] Controller destroyed");
        result
    }

    // ========================================================================
    // Interrupts
    // ========================================================================

    /// Shared interrupt entry point; returns whether the interrupt was ours
    pub fn handle_irq(&self) -> bool {
        let status = self.regs.load(INTSTS);
        if status == 0 || status == u32::MAX {
            return false;
        }

        let streams = status & INT_STREAM_MASK;
        for bit in 0..self.in_count + self.out_count {
            if streams & (1 << bit) == 0 {
                continue;
            }
            if bit < self.in_count {
                self.in_streams[bit].output_irq();
            } else {
                self.out_streams[bit - self.in_count].output_irq();
            }
        }

        true
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn registers(&self) -> RegisterSpace {
        self.regs
    }

    pub fn codecs(&self) -> &[Codec] {
        &self.codecs
    }

    pub fn codec(&self, cid: u8) -> Option<&Codec> {
        self.codecs.iter().find(|c| c.cid() == cid)
    }

    pub fn input_streams(&self) -> &[Stream<P>] {
        &self.in_streams[..self.in_count]
    }

    pub fn output_streams(&self) -> &[Stream<P>] {
        &self.out_streams[..self.out_count]
    }

    pub fn corb_size(&self) -> u16 {
        self.commands.lock().corb_size()
    }

    pub fn rirb_size(&self) -> u16 {
        self.commands.lock().rirb_size()
    }

    /// Command channel for issuing verbs directly
    pub fn bus(&self) -> CommandChannel<'_, P> {
        CommandChannel {
            regs: &self.regs,
            ring: &self.commands,
            platform: self.platform.as_ref(),
        }
    }

    // ========================================================================
    // Paths
    // ========================================================================

    pub fn path(&self, id: PathId) -> HdaResult<&Path> {
        self.codec(id.codec)
            .and_then(|c| c.paths().get(id.index))
            .ok_or(HdaError::Unsupported)
    }

    /// Find a path to `destination` that can run next to every path in `active`
    pub fn find_path(&self, destination: &Output, active: &[PathId], same_stream: bool) -> HdaResult<PathId> {
        let codec = self.codec(destination.codec()).ok_or(HdaError::Unsupported)?;

        let mut others = Vec::new();
        others.try_reserve(active.len())?;
        for &id in active {
            others.push(self.path(id)?);
        }

        let index = codec.find_path(destination.widget, &others, same_stream)?;
        Ok(PathId {
            codec: destination.codec(),
            index,
        })
    }

    /// Route a path to an output stream
    ///
    /// `params` is adjusted to the format actually programmed.
    pub fn path_setup(&mut self, id: PathId, params: &mut StreamParams, stream: StreamId) -> HdaResult<()> {
        let target = self.stream(stream)?;
        if !target.is_output() {
            return Err(HdaError::Unsupported);
        }
        let tag = target.tag();

        let format = params.encode();
        let bus = CommandChannel {
            regs: &self.regs,
            ring: &self.commands,
            platform: self.platform.as_ref(),
        };
        let codec = self
            .codecs
            .iter_mut()
            .find(|c| c.cid() == id.codec)
            .ok_or(HdaError::Unsupported)?;

        codec.path_setup(&bus, id.index, format, params.channels, tag)
    }

    pub fn path_shutdown(&self, id: PathId) -> HdaResult<()> {
        let codec = self.codec(id.codec).ok_or(HdaError::Unsupported)?;
        codec.path_shutdown(&self.bus(), id.index)
    }

    pub fn path_set_volume(&mut self, id: PathId, volume: i32) -> HdaResult<()> {
        let bus = CommandChannel {
            regs: &self.regs,
            ring: &self.commands,
            platform: self.platform.as_ref(),
        };
        let codec = self
            .codecs
            .iter_mut()
            .find(|c| c.cid() == id.codec)
            .ok_or(HdaError::Unsupported)?;

        codec.path_set_volume(&bus, id.index, volume)
    }

    pub fn path_mute(&self, id: PathId, mute: bool) -> HdaResult<()> {
        let codec = self.codec(id.codec).ok_or(HdaError::Unsupported)?;
        codec.path_mute(&self.bus(), id.index, mute)
    }

    // ========================================================================
    // Streams
    // ========================================================================

    pub fn stream(&self, id: StreamId) -> HdaResult<&Stream<P>> {
        let streams = match id.direction {
            StreamDirection::Input => self.input_streams(),
            StreamDirection::Output => self.output_streams(),
        };
        streams.get(id.index as usize).ok_or(HdaError::Unsupported)
    }

    /// Configure a stream; returns the format word to hand to [`path_setup`](Self::path_setup)
    pub fn stream_setup(
        &self,
        id: StreamId,
        params: &mut StreamParams,
        ring_buffer_size: usize,
        fill: Option<FillCallback>,
    ) -> HdaResult<u16> {
        self.stream(id)?.setup(params, ring_buffer_size, fill)
    }

    pub fn stream_shutdown(&self, id: StreamId) -> HdaResult<()> {
        self.stream(id)?.shutdown();
        Ok(())
    }

    pub fn stream_play(&self, id: StreamId, run: bool) -> HdaResult<()> {
        self.stream(id)?.play(run)
    }

    /// Returns the number of bytes accepted
    pub fn stream_queue_data(&self, id: StreamId, data: &[u8]) -> HdaResult<usize> {
        self.stream(id)?.queue_data(data)
    }
}

impl<P: Platform> Drop for Controller<P> {
    fn drop(&mut self) {
        if let Err(e) = self.suspend() {
            log::warn!("[HDA] Suspend during teardown failed: {}", e);
        }
    }
}

/// Enable memory decoding and bus mastering
fn pci_setup<P: Platform + ?Sized>(platform: &P) -> HdaResult<()> {
    let command = PciCommand::from_bits_retain(platform.pci_read(PCI_COMMAND, AccessWidth::Word)? as u16);
    let command = command | PciCommand::MEM_SPACE | PciCommand::BUS_MASTER;
    platform.pci_write(PCI_COMMAND, AccessWidth::Word, command.bits() as u32)
}

/// Map the first memory BAR
fn map_register_bar<P: Platform>(platform: &Arc<P>) -> HdaResult<BarMapping<P>> {
    let mut bar = 0;
    while bar < PCI_BAR_COUNT {
        let value = platform.pci_read(PCI_BAR0 + bar as u16 * 4, AccessWidth::Dword)?;

        if value & PCI_BAR_IO == 0 && value != 0 {
            return BarMapping::map(platform, bar);
        }

        bar += if value & PCI_BAR_IO == 0 && value & PCI_BAR_TYPE_MASK == PCI_BAR_TYPE_64 {
            2
        } else {
            1
        };
    }

    log::warn!("[HDA] No memory BAR found");
    Err(HdaError::Unsupported)
}
