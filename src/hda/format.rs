// ============================================================================
// src/hda/format.rs - PCM Stream Format
// ============================================================================
//!
//! ストリームフォーマット (SDnFMT / コンバータフォーマット) のエンコード。
//!
//! 要求されたレートとチャネル数は、ハードウェアで表現可能な最も近い値に
//! 補正される。

use crate::regs::*;

/// Sample container width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Pcm8,
    Pcm16,
    Pcm20,
    Pcm24,
    Pcm32,
}

impl SampleFormat {
    fn bits_field(self) -> u16 {
        match self {
            SampleFormat::Pcm8 => FMT_BITS_8,
            SampleFormat::Pcm16 => FMT_BITS_16,
            SampleFormat::Pcm20 => FMT_BITS_20,
            SampleFormat::Pcm24 => FMT_BITS_24,
            SampleFormat::Pcm32 => FMT_BITS_32,
        }
    }

    /// Bytes one sample occupies in memory
    pub fn container_bytes(self) -> usize {
        match self {
            SampleFormat::Pcm8 => 1,
            SampleFormat::Pcm16 => 2,
            SampleFormat::Pcm20 | SampleFormat::Pcm24 | SampleFormat::Pcm32 => 4,
        }
    }
}

/// Requested stream parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u8,
    pub format: SampleFormat,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            format: SampleFormat::Pcm16,
        }
    }
}

impl StreamParams {
    /// Encode as a stream format word
    ///
    /// `sample_rate` and `channels` are rewritten to the values actually
    /// programmed.
    pub fn encode(&mut self) -> u16 {
        let (base, mult, div, rate) = nearest_rate(self.sample_rate);
        self.sample_rate = rate;
        self.channels = self.channels.clamp(1, 16);

        let mut format = 0;
        if base == 44_100 {
            format |= FMT_BASE;
        }
        format |= (mult - 1) << FMT_MULT_SHIFT;
        format |= (div - 1) << FMT_DIV_SHIFT;
        format |= self.format.bits_field() << FMT_BITS_SHIFT;
        format |= (self.channels as u16 - 1) & FMT_CHAN_MASK;
        format
    }

    /// Bytes per frame (all channels)
    pub fn frame_bytes(&self) -> usize {
        self.format.container_bytes() * self.channels.max(1) as usize
    }
}

/// `(base, multiplier, divisor, rate)` closest to `requested`
///
/// Ties go to the 48 kHz family and to the smaller multiplier.
fn nearest_rate(requested: u32) -> (u32, u16, u16, u32) {
    let mut best = (48_000, 1, 1, 48_000);
    let mut best_diff = u32::MAX;

    for base in [48_000u32, 44_100] {
        for mult in 1..=4u16 {
            for div in 1..=8u16 {
                let rate = base * mult as u32 / div as u32;
                let diff = rate.abs_diff(requested);
                if diff < best_diff {
                    best = (base, mult, div, rate);
                    best_diff = diff;
                }
            }
        }
    }

    best
}
