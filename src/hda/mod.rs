// ============================================================================
// src/hda/mod.rs - Intel High Definition Audio Driver
// ============================================================================
//!
//! # Intel HD Audio ドライバ
//!
//! ホスト非依存の HDA コントローラドライバ。ホストは [`Platform`] を実装し、
//! 割り当てた IRQ を [`Controller::handle_irq`] に配送する。
//!
//! ## 機能
//! - PCIデバイス照合
//! - CORB/RIRB によるコーデック通信
//! - コーデック / ウィジェットグラフの検出
//! - 出力パスの選択と設定 (音量 / ミュート)
//! - ストリーム再生 (BDL + ソフトウェアリングバッファ)
//!
//! ## モジュール構成
//! - `mmio` - レジスタ空間ビュー
//! - `types` - エラー型、データ構造定義
//! - `platform` - ホストプリミティブと RAII ハンドル
//! - `command` - CORB/RIRB
//! - `controller` - Controller の実装
//! - `codec` - コーデック検出・ウィジェット設定
//! - `path` - 出力パス
//! - `stream` - オーディオストリーム管理
//! - `sync` - 割り込み禁止ロック
//! - `format` - ストリームフォーマット

pub mod mmio;

mod codec;
mod command;
mod controller;
mod format;
mod path;
mod platform;
mod stream;
mod sync;
mod types;

#[cfg(test)]
mod testing;

pub use codec::{Codec, Output, OutputGroup, OutputInfo, OutputType, Widget};
pub use command::{negotiate_ring_size, CodecBus, CommandChannel};
pub use controller::{Controller, ControllerState, PathId, StreamId};
pub use format::{SampleFormat, StreamParams};
pub use path::{paths_usable_simultaneously, volume_to_gain, Path};
pub use platform::{AccessWidth, IrqHint, Platform};
pub use stream::{FillCallback, RingBuffer, Stream, StreamDirection};
pub use types::{
    AmpCaps, BdlEntry, Connection, DefaultDevice, HdaError, HdaResult, Nid, PinConfig, PlatformError,
    ResponseDescriptor, VerbDescriptor, WidgetType,
};

use crate::regs::{HDA_CLASS, HDA_SUBCLASS};

/// Known HDA controllers as (vendor, device)
const MATCH_TABLE: &[(u16, u16)] = &[
    // Intel
    (0x8086, 0x2668),
    (0x8086, 0x269A),
    (0x8086, 0x27D8),
    (0x8086, 0x284B),
    (0x8086, 0x293E),
    (0x8086, 0x293F),
    (0x8086, 0x3A3E),
    (0x8086, 0x3A6E),
    (0x8086, 0x3B56),
    (0x8086, 0x3B57),
    (0x8086, 0x1C20),
    (0x8086, 0x1D20),
    (0x8086, 0x1E20),
    (0x8086, 0x8C20),
    (0x8086, 0x8CA0),
    (0x8086, 0x8D20),
    (0x8086, 0x8D21),
    (0x8086, 0x9C20),
    (0x8086, 0x9C21),
    (0x8086, 0x9D70),
    (0x8086, 0x9D71),
    (0x8086, 0xA170),
    (0x8086, 0xA171),
    (0x8086, 0xA1F0),
    (0x8086, 0xA270),
    (0x8086, 0xA271),
    (0x8086, 0x02C8),
    (0x8086, 0x06C8),
    (0x8086, 0x34C8),
    (0x8086, 0x38C8),
    (0x8086, 0x4DC8),
    (0x8086, 0xA348),
    (0x8086, 0xA0C8),
    (0x8086, 0x43C8),
    (0x8086, 0x51C8),
    (0x8086, 0x7AD0),
    // AMD
    (0x1022, 0x1457),
    (0x1022, 0x1487),
    (0x1022, 0x15E3),
    (0x1002, 0x4383),
    // NVIDIA
    (0x10DE, 0x026C),
    (0x10DE, 0x0371),
    (0x10DE, 0x03E4),
    (0x10DE, 0x03F0),
    (0x10DE, 0x044A),
    (0x10DE, 0x055C),
    (0x10DE, 0x07FC),
    (0x10DE, 0x0AC0),
    (0x10DE, 0x0D94),
];

/// Whether this driver knows `vendor:device`
pub fn device_matches(vendor: u16, device: u16) -> bool {
    MATCH_TABLE.contains(&(vendor, device))
}

/// Whether a PCI class/subclass pair is an HD Audio controller
pub fn class_matches(class: u16, subclass: u16) -> bool {
    class == HDA_CLASS && subclass == HDA_SUBCLASS
}
