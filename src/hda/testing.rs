//! Scripted codec used by unit tests.

use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::ptr::NonNull;
use core::time::Duration;

use x86_64::PhysAddr;

use super::command::CodecBus;
use super::platform::{AccessWidth, IrqHint, Platform};
use super::types::*;
use crate::regs::*;

const VENDOR_ID: u32 = 0x10EC_0269;
const AFG_NID: Nid = 0x01;

/// Any node between the first and last scripted widget that was not scripted
const FILLER_CAPS: u32 = 0xF << WCAP_TYPE_SHIFT;

#[derive(Debug, Clone)]
pub struct FakeWidget {
    nid: Nid,
    caps: u32,
    pin_caps: u32,
    config: u32,
    in_amp: u32,
    out_amp: u32,
    entries: Vec<u16>,
    long_form: bool,
}

impl FakeWidget {
    fn new(nid: Nid, widget_type: u32, caps: u32, connections: &[Nid]) -> Self {
        let mut caps = (widget_type << WCAP_TYPE_SHIFT) | caps;
        if !connections.is_empty() {
            caps |= WCAP_CONN_LIST;
        }

        Self {
            nid,
            caps,
            pin_caps: 0,
            config: 0,
            in_amp: 0,
            out_amp: 0,
            entries: connections.iter().map(|&n| n as u16).collect(),
            long_form: false,
        }
    }

    /// Output converter with a 127-step output amp
    pub fn dac(nid: Nid) -> Self {
        let mut w = Self::new(nid, 0x0, WCAP_OUT_AMP | WCAP_AMP_OVERRIDE, &[]);
        w.out_amp = (1 << 31) | (0x7F << 8) | 0x57;
        w
    }

    /// Mixer with 31-step input and output amps
    pub fn mixer(nid: Nid, inputs: &[Nid]) -> Self {
        let mut w = Self::new(nid, 0x2, WCAP_IN_AMP | WCAP_OUT_AMP | WCAP_AMP_OVERRIDE, inputs);
        w.in_amp = (1 << 31) | (0x1F << 8) | 0x17;
        w.out_amp = w.in_amp;
        w
    }

    /// Selector whose long-form connection list is the single range `first..=last`
    pub fn selector_range(nid: Nid, first: Nid, last: Nid) -> Self {
        Self::selector_long(nid, &[first as u16, 0x8000 | last as u16])
    }

    /// Selector with raw 16-bit long-form connection entries
    pub fn selector_long(nid: Nid, entries: &[u16]) -> Self {
        let mut w = Self::new(nid, 0x3, WCAP_CONN_LIST, &[]);
        w.entries = entries.to_vec();
        w.long_form = true;
        w
    }

    /// Output-capable pin complex with EAPD and a 3-step output amp
    pub fn output_pin(nid: Nid, device: u32, association: u32, sequence: u32, inputs: &[Nid]) -> Self {
        let mut w = Self::new(nid, 0x4, WCAP_OUT_AMP | WCAP_AMP_OVERRIDE, inputs);
        w.pin_caps = PIN_CAP_OUTPUT | PIN_CAP_EAPD;
        w.config = (device << 20) | (association << 4) | sequence;
        w.out_amp = (1 << 31) | (0x03 << 8);
        w
    }

    /// Microphone jack
    pub fn input_pin(nid: Nid) -> Self {
        let mut w = Self::new(nid, 0x4, 0, &[]);
        w.pin_caps = 1 << 5;
        w.config = 0xA << 20;
        w
    }

    /// Port connectivity: nothing attached
    pub fn unconnected(mut self) -> Self {
        self.config = (self.config & !(0b11 << 30)) | (0b01 << 30);
        self
    }

    fn parameter(&self, param: u8) -> u32 {
        match param {
            PARAM_WIDGET_CAPS => self.caps,
            PARAM_PIN_CAPS => self.pin_caps,
            PARAM_IN_AMP_CAPS => self.in_amp,
            PARAM_OUT_AMP_CAPS => self.out_amp,
            PARAM_CONN_LIST_LEN => {
                let form = if self.long_form { CONN_LIST_LONG_FORM } else { 0 };
                self.entries.len() as u32 | form
            }
            _ => 0,
        }
    }

    fn connection_list(&self, offset: usize) -> u32 {
        let (per_response, bits) = if self.long_form { (2, 16) } else { (4, 8) };

        self.entries
            .iter()
            .skip(offset)
            .take(per_response)
            .enumerate()
            .fold(0, |acc, (i, &entry)| {
                let entry = if self.long_form {
                    entry as u32
                } else {
                    // Short form range flag lives in bit 7
                    (entry as u32 & 0x7F) | (((entry as u32) >> 8) & 0x80)
                };
                acc | (entry << (bits * i))
            })
    }
}

/// Single-AFG codec answering from a widget table
pub struct FakeCodec {
    widgets: Vec<FakeWidget>,
    log: RefCell<Vec<VerbDescriptor>>,
    fail_nid: Cell<Option<Nid>>,
}

impl FakeCodec {
    pub fn new(widgets: Vec<FakeWidget>) -> Self {
        Self {
            widgets,
            log: RefCell::new(Vec::new()),
            fail_nid: Cell::new(None),
        }
    }

    /// Every later verb addressed to `nid` times out
    pub fn fail_node(&self, nid: Option<Nid>) {
        self.fail_nid.set(nid);
    }

    pub fn clear_log(&self) {
        self.log.borrow_mut().clear();
    }

    pub fn take_log(&self) -> Vec<VerbDescriptor> {
        core::mem::take(&mut *self.log.borrow_mut())
    }

    fn node_range(&self) -> (Nid, Nid) {
        let first = self.widgets.iter().map(|w| w.nid).min().unwrap_or(2);
        let last = self.widgets.iter().map(|w| w.nid).max().unwrap_or(1);
        (first, last.saturating_sub(first).saturating_add(1))
    }

    fn widget(&self, nid: Nid) -> Option<&FakeWidget> {
        self.widgets.iter().find(|w| w.nid == nid)
    }
}

impl CodecBus for FakeCodec {
    fn command(&self, verb: VerbDescriptor) -> HdaResult<u32> {
        self.log.borrow_mut().push(verb);

        let nid = verb.nid();
        if self.fail_nid.get() == Some(nid) {
            return Err(HdaError::Timeout);
        }

        let payload = verb.payload();
        let cmd = (payload >> 8) as u16;
        let data = payload as u8;

        let response = match (nid, cmd) {
            (0, VERB_GET_PARAM) => match data {
                PARAM_VENDOR_ID => VENDOR_ID,
                PARAM_SUB_NODE_COUNT => ((AFG_NID as u32) << 16) | 1,
                _ => 0,
            },
            (AFG_NID, VERB_GET_PARAM) => match data {
                PARAM_SUB_NODE_COUNT => {
                    let (first, count) = self.node_range();
                    ((first as u32) << 16) | count as u32
                }
                PARAM_FUNC_GROUP_TYPE => FUNC_GROUP_AUDIO as u32,
                _ => 0,
            },
            (_, VERB_GET_PARAM) => match self.widget(nid) {
                Some(w) => w.parameter(data),
                None if data == PARAM_WIDGET_CAPS => FILLER_CAPS,
                None => 0,
            },
            (_, VERB_GET_CONFIG_DEFAULT) => self.widget(nid).map_or(0, |w| w.config),
            (_, VERB_GET_CONN_LIST) => self.widget(nid).map_or(0, |w| w.connection_list(data as usize)),
            _ => 0,
        };

        Ok(response)
    }
}

/// Host that refuses every resource
#[derive(Default)]
pub struct NullPlatform {
    masked: Cell<bool>,
    sections: Cell<usize>,
}

impl NullPlatform {
    pub fn interrupts_masked(&self) -> bool {
        self.masked.get()
    }

    /// How many times interrupts were masked
    pub fn masked_sections(&self) -> usize {
        self.sections.get()
    }
}

impl Platform for NullPlatform {
    type Irq = ();

    fn pci_read(&self, _offset: u16, _width: AccessWidth) -> HdaResult<u32> {
        Err(PlatformError::PciAccess.into())
    }

    fn pci_write(&self, _offset: u16, _width: AccessWidth, _value: u32) -> HdaResult<()> {
        Err(PlatformError::PciAccess.into())
    }

    fn pci_map_bar(&self, _bar: u8) -> HdaResult<NonNull<u8>> {
        Err(PlatformError::BarMapping.into())
    }

    fn pci_unmap_bar(&self, _bar: u8, _virt: NonNull<u8>) {}

    fn allocate_irq(&self, _hint: IrqHint) -> HdaResult<()> {
        Err(PlatformError::IrqAllocation.into())
    }

    fn deallocate_irq(&self, _irq: ()) {}

    fn enable_irq(&self, _irq: (), _enable: bool) {}

    fn allocate_physical(&self, _size: usize) -> HdaResult<PhysAddr> {
        Err(PlatformError::PhysicalAllocation.into())
    }

    fn deallocate_physical(&self, _phys: PhysAddr, _size: usize) {}

    fn map(&self, _phys: PhysAddr, _size: usize) -> HdaResult<NonNull<u8>> {
        Err(PlatformError::Mapping.into())
    }

    fn unmap(&self, _virt: NonNull<u8>, _size: usize) {}

    fn delay(&self, _duration: Duration) {}

    fn save_and_disable_interrupts(&self) -> bool {
        self.sections.set(self.sections.get() + 1);
        !self.masked.replace(true)
    }

    fn restore_interrupts(&self, was_enabled: bool) {
        if was_enabled {
            self.masked.set(false);
        }
    }
}
