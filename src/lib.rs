// ============================================================================
// src/lib.rs - uhda
// ============================================================================
//!
//! # uhda
//!
//! Intel High Definition Audio コントローラドライバのコア。
//! カーネルに依存せず、ホストは [`hda::Platform`] を通じて PCI / IRQ /
//! 物理メモリ / ディレイを提供する。
//!
//! ## モジュール構成
//! - `regs` - レジスタ / ベリブ / パラメータ定義
//! - `hda` - ドライバ本体

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod hda;
pub mod regs;

pub use hda::{
    class_matches, device_matches, Controller, ControllerState, HdaError, HdaResult, PathId, Platform,
    StreamId, StreamParams,
};
