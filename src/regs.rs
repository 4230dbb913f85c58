// ============================================================================
// src/regs.rs - Intel High Definition Audio Register Definitions
// ============================================================================
//!
//! # Intel HD Audio レジスタ定義
//!
//! Intel High Definition Audio Specification Rev 1.0a に基づくレジスタ定義。
//! 各レジスタは幅付きの [`Register`] として定義し、制御ビットは `bitflags` で表す。

use core::time::Duration;

use bitflags::bitflags;

use crate::hda::mmio::Register;

// ============================================================================
// PCI Configuration Space
// ============================================================================

/// Vendor ID register offset
pub const PCI_VENDOR_ID: u16 = 0x00;

/// PCI Command register offset
pub const PCI_COMMAND: u16 = 0x04;

/// First Base Address Register offset
pub const PCI_BAR0: u16 = 0x10;

/// Number of BARs in a type 0 header
pub const PCI_BAR_COUNT: u8 = 6;

/// BAR bit 0: I/O space indicator
pub const PCI_BAR_IO: u32 = 1 << 0;

/// Memory BAR type field
pub const PCI_BAR_TYPE_MASK: u32 = 0b11 << 1;

/// Memory BAR type: 64-bit, consumes the following BAR slot
pub const PCI_BAR_TYPE_64: u32 = 0b10 << 1;

/// NVIDIA vendor ID (legacy INTx forced, MSI is unreliable on some parts)
pub const PCI_VENDOR_NVIDIA: u16 = 0x10DE;

bitflags! {
    /// PCI Command register bits used by the driver
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PciCommand: u16 {
        /// Memory Space Enable
        const MEM_SPACE = 1 << 1;
        /// Bus Master Enable
        const BUS_MASTER = 1 << 2;
    }
}

/// HDA Controller Class Code (Multimedia / HD Audio)
pub const HDA_CLASS: u16 = 0x04;
pub const HDA_SUBCLASS: u16 = 0x03;

// ============================================================================
// Global Registers (Offset 0x00 - 0x2F)
// ============================================================================

/// Global Capabilities (GCAP)
pub const GCAP: Register<u16> = Register::new(0x00);

/// Global Control (GCTL)
pub const GCTL: Register<u32> = Register::new(0x08);

/// State Change Status (STATESTS) - RW1C
pub const STATESTS: Register<u16> = Register::new(0x0E);

/// Interrupt Control (INTCTL)
pub const INTCTL: Register<u32> = Register::new(0x20);

/// Interrupt Status (INTSTS)
pub const INTSTS: Register<u32> = Register::new(0x24);

// GCAP fields
pub const GCAP_OK64: u16 = 1 << 0;
pub const GCAP_ISS_SHIFT: u16 = 8;
pub const GCAP_OSS_SHIFT: u16 = 12;
pub const GCAP_STREAM_MASK: u16 = 0x0F;

bitflags! {
    /// Global Control
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Gctl: u32 {
        /// Controller Reset (0 = in reset)
        const CRST = 1 << 0;
        /// Flush Control
        const FCNTRL = 1 << 1;
        /// Accept Unsolicited Response Enable
        const UNSOL = 1 << 8;
        const _ = !0;
    }
}

bitflags! {
    /// Interrupt Control
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IntCtl: u32 {
        /// Controller Interrupt Enable
        const CIE = 1 << 30;
        /// Global Interrupt Enable
        const GIE = 1 << 31;
        const _ = !0;
    }
}

/// Stream Interrupt Enable / Status bits (bit 0-29)
pub const INT_STREAM_MASK: u32 = 0x3FFF_FFFF;

// ============================================================================
// CORB Registers (Offset 0x40 - 0x4F)
// ============================================================================

pub const CORBLBASE: Register<u32> = Register::new(0x40);
pub const CORBUBASE: Register<u32> = Register::new(0x44);
pub const CORBWP: Register<u16> = Register::new(0x48);
pub const CORBRP: Register<u16> = Register::new(0x4A);
pub const CORBCTL: Register<u8> = Register::new(0x4C);
pub const CORBSIZE: Register<u8> = Register::new(0x4E);

/// CORB/RIRB pointer field
pub const RING_POINTER_MASK: u16 = 0xFF;

/// CORB Read Pointer Reset
pub const CORBRP_RST: u16 = 1 << 15;

bitflags! {
    /// CORB Control
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CorbCtl: u8 {
        /// Memory Error Interrupt Enable
        const CMEIE = 1 << 0;
        /// CORB DMA Engine run
        const RUN = 1 << 1;
        const _ = !0;
    }
}

// ============================================================================
// RIRB Registers (Offset 0x50 - 0x5F)
// ============================================================================

pub const RIRBLBASE: Register<u32> = Register::new(0x50);
pub const RIRBUBASE: Register<u32> = Register::new(0x54);
pub const RIRBWP: Register<u16> = Register::new(0x58);
pub const RINTCNT: Register<u16> = Register::new(0x5A);
pub const RIRBCTL: Register<u8> = Register::new(0x5C);
pub const RIRBSIZE: Register<u8> = Register::new(0x5E);

/// RIRB Write Pointer Reset
pub const RIRBWP_RST: u16 = 1 << 15;

/// Response interrupt count field
pub const RINTCNT_MASK: u16 = 0xFF;

bitflags! {
    /// RIRB Control
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RirbCtl: u8 {
        /// Response Interrupt Control
        const RINTCTL = 1 << 0;
        /// RIRB DMA Enable
        const DMAEN = 1 << 1;
        /// Response Overrun Interrupt Control
        const OIC = 1 << 2;
        const _ = !0;
    }
}

// CORBSIZE / RIRBSIZE fields (identical layout)
pub const RING_SIZE_MASK: u8 = 0x03;
pub const RING_SZCAP_SHIFT: u8 = 4;
pub const RING_SZCAP_2: u8 = 0b001;
pub const RING_SZCAP_16: u8 = 0b010;
pub const RING_SZCAP_256: u8 = 0b100;
pub const RING_SIZE_2: u8 = 0x00;
pub const RING_SIZE_16: u8 = 0x01;
pub const RING_SIZE_256: u8 = 0x02;

// ============================================================================
// DMA Position Buffer
// ============================================================================

pub const DPLBASE: Register<u32> = Register::new(0x70);
pub const DPUBASE: Register<u32> = Register::new(0x74);

/// DMA Position Buffer Enable
pub const DPLBASE_DPBE: u32 = 1 << 0;

/// DMA Position Lower Base address field (128-byte aligned)
pub const DPLBASE_ADDR_MASK: u32 = !0x7F;

/// Bytes per stream slot in the position buffer (LPIB + reserved)
pub const DMA_POS_STRIDE: usize = 8;

// ============================================================================
// Stream Descriptor Registers (Relative to stream base)
// ============================================================================

/// First stream descriptor block
pub const STREAM_BASE: usize = 0x80;

/// Size of one stream descriptor block
pub const STREAM_DESC_SIZE: usize = 0x20;

pub const SD_CTL0: Register<u8> = Register::new(0x00);
pub const SD_CTL2: Register<u8> = Register::new(0x02);
pub const SD_STS: Register<u8> = Register::new(0x03);
pub const SD_LPIB: Register<u32> = Register::new(0x04);
pub const SD_CBL: Register<u32> = Register::new(0x08);
pub const SD_LVI: Register<u16> = Register::new(0x0C);
pub const SD_FMT: Register<u16> = Register::new(0x12);
pub const SD_BDPL: Register<u32> = Register::new(0x18);
pub const SD_BDPU: Register<u32> = Register::new(0x1C);

bitflags! {
    /// Stream Descriptor Control, byte 0
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SdCtl0: u8 {
        /// Stream Reset
        const SRST = 1 << 0;
        /// Stream Run
        const RUN = 1 << 1;
        /// Interrupt On Completion Enable
        const IOCE = 1 << 2;
        /// FIFO Error Interrupt Enable
        const FEIE = 1 << 3;
        /// Descriptor Error Interrupt Enable
        const DEIE = 1 << 4;
        const _ = !0;
    }
}

bitflags! {
    /// Stream Descriptor Status (RW1C)
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SdSts: u8 {
        /// Buffer Completion Interrupt Status
        const BCIS = 1 << 2;
        /// FIFO Error
        const FIFOE = 1 << 3;
        /// Descriptor Error
        const DESE = 1 << 4;
        const _ = !0;
    }
}

// ============================================================================
// Stream Format (SDnFMT / converter format) Bit Definitions
// ============================================================================

/// Number of channels minus one
pub const FMT_CHAN_MASK: u16 = 0x000F;

/// Bits per sample
pub const FMT_BITS_SHIFT: u16 = 4;

/// Sample base rate divisor minus one
pub const FMT_DIV_SHIFT: u16 = 8;

/// Sample base rate multiplier minus one
pub const FMT_MULT_SHIFT: u16 = 11;

/// Sample base rate: 0 = 48 kHz, 1 = 44.1 kHz
pub const FMT_BASE: u16 = 1 << 14;

pub const FMT_BITS_8: u16 = 0x00;
pub const FMT_BITS_16: u16 = 0x01;
pub const FMT_BITS_20: u16 = 0x02;
pub const FMT_BITS_24: u16 = 0x03;
pub const FMT_BITS_32: u16 = 0x04;

pub const SD_CTL2_STRM_SHIFT: u8 = 4;
pub const SD_CTL2_STRM_MASK: u8 = 0xF0;

/// Buffer Descriptor List entry size
pub const BDL_ENTRY_SIZE: usize = 16;

/// BDL entry Interrupt On Completion
pub const BDL_IOC: u32 = 1 << 0;

// ============================================================================
// Codec Command/Response Verbs
// ============================================================================

// 12-bit verbs (8-bit payload)
pub const VERB_GET_PARAM: u16 = 0xF00;
pub const VERB_SET_CONN_SEL: u16 = 0x701;
pub const VERB_GET_CONN_LIST: u16 = 0xF02;
pub const VERB_SET_POWER: u16 = 0x705;
pub const VERB_SET_CONV_STREAM: u16 = 0x706;
pub const VERB_SET_PIN_CTL: u16 = 0x707;
pub const VERB_SET_EAPD: u16 = 0x70C;
pub const VERB_GET_CONFIG_DEFAULT: u16 = 0xF1C;
pub const VERB_SET_CONV_CHAN_COUNT: u16 = 0x72D;

// 4-bit verbs (16-bit payload)
pub const VERB_SET_CONV_FMT: u8 = 0x2;
pub const VERB_SET_AMP_GAIN: u8 = 0x3;

// ============================================================================
// Codec Parameters (for GET_PARAM verb)
// ============================================================================

pub const PARAM_VENDOR_ID: u8 = 0x00;
pub const PARAM_SUB_NODE_COUNT: u8 = 0x04;
pub const PARAM_FUNC_GROUP_TYPE: u8 = 0x05;
pub const PARAM_WIDGET_CAPS: u8 = 0x09;
pub const PARAM_PIN_CAPS: u8 = 0x0C;
pub const PARAM_IN_AMP_CAPS: u8 = 0x0D;
pub const PARAM_CONN_LIST_LEN: u8 = 0x0E;
pub const PARAM_OUT_AMP_CAPS: u8 = 0x12;

/// Function group type: Audio Function Group
pub const FUNC_GROUP_AUDIO: u8 = 0x01;

// Widget capability bits
pub const WCAP_IN_AMP: u32 = 1 << 1;
pub const WCAP_OUT_AMP: u32 = 1 << 2;
pub const WCAP_AMP_OVERRIDE: u32 = 1 << 3;
pub const WCAP_CONN_LIST: u32 = 1 << 8;
pub const WCAP_TYPE_SHIFT: u32 = 20;

// Connection list length parameter
pub const CONN_LIST_LONG_FORM: u32 = 1 << 7;
pub const CONN_LIST_LEN_MASK: u32 = 0x7F;

// Pin capability bits
pub const PIN_CAP_OUTPUT: u32 = 1 << 4;
pub const PIN_CAP_EAPD: u32 = 1 << 16;

// ============================================================================
// Pin Widget Control Bits
// ============================================================================

pub const PIN_CTL_HP_EN: u8 = 1 << 7;
pub const PIN_CTL_OUT_EN: u8 = 1 << 6;

// ============================================================================
// EAPD/BTL Enable Bits
// ============================================================================

pub const EAPD_EAPD: u8 = 1 << 1;

// ============================================================================
// Power State Values
// ============================================================================

pub const POWER_D0: u8 = 0x00;

// ============================================================================
// Amplifier Gain/Mute Bits
// ============================================================================

pub const AMP_GAIN_MASK: u16 = 0x7F;
pub const AMP_MUTE: u16 = 1 << 7;
pub const AMP_INDEX_SHIFT: u16 = 8;
pub const AMP_SET_OUTPUT: u16 = 1 << 15;
pub const AMP_SET_INPUT: u16 = 1 << 14;
pub const AMP_SET_LEFT: u16 = 1 << 13;
pub const AMP_SET_RIGHT: u16 = 1 << 12;

/// Output amp, both channels
pub const AMP_SET_OUTPUT_BOTH: u16 = AMP_SET_OUTPUT | AMP_SET_LEFT | AMP_SET_RIGHT;

/// Input amp, both channels
pub const AMP_SET_INPUT_BOTH: u16 = AMP_SET_INPUT | AMP_SET_LEFT | AMP_SET_RIGHT;

// ============================================================================
// Stream/Channel Assignment
// ============================================================================

pub const CONV_STREAM_SHIFT: u8 = 4;
pub const CONV_CHANNEL_MASK: u8 = 0x0F;

// ============================================================================
// Limits and Timing
// ============================================================================

/// Size of one DMA page handed out by the host
pub const PAGE_SIZE: usize = 0x1000;

/// Architectural maximum of stream descriptors per direction
pub const MAX_STREAMS: usize = 15;

/// Codec addresses reported by STATESTS
pub const MAX_CODECS: u8 = 15;

/// Hardware pages per stream (BDL entries)
pub const BUFFER_PAGES: usize = 4;

/// Controller reset enter/exit
pub const RESET_TIMEOUT: Duration = Duration::from_secs(1);

/// Granularity of every polling loop
pub const POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Verb consumption / response wait
pub const VERB_TIMEOUT: Duration = Duration::from_secs(1);

/// Codec self-initialization after reset
pub const CODEC_SETTLE_DELAY: Duration = Duration::from_millis(1);
