// ============================================================================
// src/hda/types.rs - HDA Types and Data Structures
// ============================================================================
//!
//! HDA ドライバで使用される型定義。
//!
//! - エラー型
//! - CORB/RIRBエントリ
//! - BDLエントリ
//! - ウィジェット種別と能力フィールド

use alloc::collections::TryReserveError;
use core::fmt;

use crate::regs::*;

// ============================================================================
// Error Types
// ============================================================================

/// HDA Driver Error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HdaError {
    /// Bounded wait exceeded (often: codec absent)
    Timeout,
    /// Memory allocation failed
    NoMemory,
    /// Missing hardware capability or invalid operation for the object
    Unsupported,
    /// Failure reported by a host primitive, passed through unchanged
    Platform(PlatformError),
}

/// Failures raised by the embedding environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformError {
    /// PCI configuration space access failed
    PciAccess,
    /// BAR could not be mapped
    BarMapping,
    /// Interrupt could not be allocated
    IrqAllocation,
    /// Physical memory allocation failed
    PhysicalAllocation,
    /// Physical memory could not be mapped
    Mapping,
    /// Host specific status code
    Other(i32),
}

pub type HdaResult<T> = Result<T, HdaError>;

impl fmt::Display for HdaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HdaError::Timeout => write!(f, "timed out"),
            HdaError::NoMemory => write!(f, "out of memory"),
            HdaError::Unsupported => write!(f, "unsupported"),
            HdaError::Platform(e) => write!(f, "platform error: {}", e),
        }
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformError::PciAccess => write!(f, "PCI config access failed"),
            PlatformError::BarMapping => write!(f, "BAR mapping failed"),
            PlatformError::IrqAllocation => write!(f, "IRQ allocation failed"),
            PlatformError::PhysicalAllocation => write!(f, "physical allocation failed"),
            PlatformError::Mapping => write!(f, "mapping failed"),
            PlatformError::Other(code) => write!(f, "host status {}", code),
        }
    }
}

impl From<PlatformError> for HdaError {
    fn from(e: PlatformError) -> Self {
        HdaError::Platform(e)
    }
}

impl From<TryReserveError> for HdaError {
    fn from(_: TryReserveError) -> Self {
        HdaError::NoMemory
    }
}

// ============================================================================
// CORB Entry
// ============================================================================

/// Codec command as laid out in the CORB
///
/// Format: [Codec Address (4)] [Node ID (8)] [Verb payload (20)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct VerbDescriptor(pub u32);

impl VerbDescriptor {
    /// 12-bit command with 8-bit data
    pub fn short(cid: u8, nid: u8, cmd: u16, data: u8) -> Self {
        Self::with_payload(cid, nid, ((cmd as u32 & 0xFFF) << 8) | data as u32)
    }

    /// 4-bit command with 16-bit data
    pub fn long(cid: u8, nid: u8, cmd: u8, data: u16) -> Self {
        Self::with_payload(cid, nid, ((cmd as u32 & 0xF) << 16) | data as u32)
    }

    fn with_payload(cid: u8, nid: u8, payload: u32) -> Self {
        Self(((cid as u32 & 0x0F) << 28) | ((nid as u32) << 20) | (payload & 0xF_FFFF))
    }

    pub fn cid(&self) -> u8 {
        (self.0 >> 28) as u8
    }

    pub fn nid(&self) -> u8 {
        (self.0 >> 20) as u8
    }

    pub fn payload(&self) -> u32 {
        self.0 & 0xF_FFFF
    }
}

// ============================================================================
// RIRB Entry
// ============================================================================

/// RIRB Response Entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct ResponseDescriptor {
    /// Response data
    pub response: u32,
    /// Response extended (codec address, unsolicited flag)
    pub response_ex: u32,
}

// ============================================================================
// Buffer Descriptor List Entry
// ============================================================================

/// Buffer Descriptor List entry for audio DMA
#[derive(Debug, Clone, Copy)]
#[repr(C, align(16))]
pub struct BdlEntry {
    /// Buffer address (lower 32 bits)
    pub addr_lo: u32,
    /// Buffer address (upper 32 bits)
    pub addr_hi: u32,
    /// Buffer length in bytes
    pub length: u32,
    /// Interrupt on completion flag
    pub ioc: u32,
}

impl BdlEntry {
    /// Create a new BDL entry
    pub fn new(addr: u64, length: u32, ioc: bool) -> Self {
        Self {
            addr_lo: addr as u32,
            addr_hi: (addr >> 32) as u32,
            length,
            ioc: if ioc { BDL_IOC } else { 0 },
        }
    }
}

// ============================================================================
// Widgets
// ============================================================================

/// Node ID within a codec
pub type Nid = u8;

/// Widget type (Audio Widget Capabilities bits 23:20)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetType {
    AudioOutput,
    AudioInput,
    AudioMixer,
    AudioSelector,
    PinComplex,
    PowerWidget,
    VolumeKnob,
    BeepGenerator,
    VendorDefined,
    Unknown(u8),
}

impl From<u8> for WidgetType {
    fn from(v: u8) -> Self {
        match v {
            0x0 => WidgetType::AudioOutput,
            0x1 => WidgetType::AudioInput,
            0x2 => WidgetType::AudioMixer,
            0x3 => WidgetType::AudioSelector,
            0x4 => WidgetType::PinComplex,
            0x5 => WidgetType::PowerWidget,
            0x6 => WidgetType::VolumeKnob,
            0x7 => WidgetType::BeepGenerator,
            0xF => WidgetType::VendorDefined,
            _ => WidgetType::Unknown(v),
        }
    }
}

/// Amplifier capabilities parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AmpCaps(pub u32);

impl AmpCaps {
    /// Highest gain step (NumSteps field)
    pub fn max_step(&self) -> u8 {
        ((self.0 >> 8) & 0x7F) as u8
    }
}

/// Default device (Configuration Default bits 23:20)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultDevice {
    LineOut,
    Speaker,
    HpOut,
    Cd,
    SpdifOut,
    DigitalOtherOut,
    Other(u8),
}

impl From<u8> for DefaultDevice {
    fn from(v: u8) -> Self {
        match v {
            0x0 => DefaultDevice::LineOut,
            0x1 => DefaultDevice::Speaker,
            0x2 => DefaultDevice::HpOut,
            0x3 => DefaultDevice::Cd,
            0x4 => DefaultDevice::SpdifOut,
            0x5 => DefaultDevice::DigitalOtherOut,
            _ => DefaultDevice::Other(v),
        }
    }
}

impl DefaultDevice {
    pub fn is_output(&self) -> bool {
        !matches!(self, DefaultDevice::Other(_))
    }
}

/// Pin Configuration Default register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PinConfig(pub u32);

impl PinConfig {
    pub fn sequence(&self) -> u8 {
        (self.0 & 0x0F) as u8
    }

    pub fn association(&self) -> u8 {
        ((self.0 >> 4) & 0x0F) as u8
    }

    pub fn default_device(&self) -> DefaultDevice {
        DefaultDevice::from(((self.0 >> 20) & 0x0F) as u8)
    }

    /// Port connectivity 0b01 means nothing is attached
    pub fn is_connected(&self) -> bool {
        (self.0 >> 30) & 0b11 != 0b01
    }
}

/// One entry of a widget's connection list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    /// A single node
    Node(Nid),
    /// Inclusive range from the previous `Node` entry up to this node
    RangeEnd(Nid),
}
