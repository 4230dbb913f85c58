// ============================================================================
// src/hda/path.rs - Output Path Resolution and Programming
// ============================================================================
//!
//! 出力パス (ピン → ミキサ/セレクタ → コンバータ) の選択と設定。
//!
//! パスはコーデック内のウィジェットインデックス列で、先頭がピン、
//! 末尾がコンバータ。

use alloc::vec::Vec;

use super::codec::{Codec, Widget};
use super::command::CodecBus;
use super::types::*;
use crate::regs::*;

/// One route from an output pin (index 0) back to a converter (last index)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    codec: u8,
    widgets: Vec<usize>,
    gain: u8,
}

impl Path {
    pub(crate) fn new(codec: u8, widgets: Vec<usize>) -> Self {
        Self {
            codec,
            widgets,
            gain: 0,
        }
    }

    pub fn codec(&self) -> u8 {
        self.codec
    }

    /// Widget indices, destination first
    pub fn widgets(&self) -> &[usize] {
        &self.widgets
    }

    /// Current converter gain step
    pub fn gain(&self) -> u8 {
        self.gain
    }

    fn destination(&self) -> Option<usize> {
        self.widgets.first().copied()
    }

    fn converter(&self) -> Option<usize> {
        self.widgets.last().copied()
    }
}

/// Whether `a` and `b` can be routed at the same time
///
/// Origin widgets are never compared. A widget shared by both paths must be
/// reached from the same predecessor, and even then only when both paths
/// carry the same stream.
fn compatible(a: &Path, b: &Path, same_stream: bool) -> bool {
    if a.codec != b.codec {
        return true;
    }

    for i in 1..a.widgets.len() {
        for j in 1..b.widgets.len() {
            if a.widgets[i] != b.widgets[j] {
                continue;
            }
            if a.widgets[i - 1] != b.widgets[j - 1] || !same_stream {
                return false;
            }
        }
    }

    true
}

/// Check every distinct pair of `paths`
pub fn paths_usable_simultaneously(paths: &[&Path], same_stream: bool) -> bool {
    paths.iter().enumerate().all(|(i, a)| {
        paths[i + 1..]
            .iter()
            .all(|b| compatible(a, b, same_stream))
    })
}

impl Codec {
    /// Index of the first path to `destination` usable alongside all of `active`
    pub fn find_path(
        &self,
        destination: usize,
        active: &[&Path],
        same_stream: bool,
    ) -> HdaResult<usize> {
        self.paths
            .iter()
            .position(|candidate| {
                candidate.destination() == Some(destination)
                    && active.iter().all(|other| compatible(candidate, other, same_stream))
            })
            .ok_or(HdaError::Unsupported)
    }

    fn path(&self, index: usize) -> HdaResult<&Path> {
        self.paths.get(index).ok_or(HdaError::Unsupported)
    }

    /// Route path `index` to stream tag `stream_tag` and unmute it
    ///
    /// Stops at the first failing verb; nothing is rolled back.
    pub fn path_setup<B: CodecBus>(
        &mut self,
        bus: &B,
        index: usize,
        format: u16,
        channels: u8,
        stream_tag: u8,
    ) -> HdaResult<()> {
        let gain = self.program_path(bus, self.path(index)?, format, channels, stream_tag)?;
        self.paths[index].gain = gain;
        Ok(())
    }

    fn program_path<B: CodecBus>(
        &self,
        bus: &B,
        path: &Path,
        format: u16,
        channels: u8,
        stream_tag: u8,
    ) -> HdaResult<u8> {
        let converter = path.converter().ok_or(HdaError::Unsupported)?;
        let converter = self.widget(converter).ok_or(HdaError::Unsupported)?;
        if converter.widget_type != WidgetType::AudioOutput {
            return Err(HdaError::Unsupported);
        }

        self.set_converter_format(bus, converter.nid, format)?;
        self.set_converter_channel_count(bus, converter.nid, channels)?;

        let mut gain = 0;
        let last = path.widgets.len() - 1;

        for (position, &index) in path.widgets.iter().enumerate() {
            let widget = self.widget(index).ok_or(HdaError::Unsupported)?;
            let upstream = match path.widgets.get(position + 1) {
                Some(&next) => Some(self.widget(next).ok_or(HdaError::Unsupported)?.nid),
                None => None,
            };

            if let Some(source) = upstream {
                let connections = widget.connected_nids();
                if connections.len() > 1 {
                    let select = widget.connection_index(source).ok_or(HdaError::Unsupported)?;
                    self.set_selected_connection(bus, widget.nid, select)?;
                }
            }

            self.set_power_state(bus, widget.nid, POWER_D0)?;

            match widget.widget_type {
                WidgetType::PinComplex => {
                    if widget.pin_caps & PIN_CAP_EAPD != 0 {
                        self.set_eapd_enable(bus, widget.nid, EAPD_EAPD)?;
                    }
                    if widget.caps & WCAP_OUT_AMP != 0 {
                        let step = widget.out_amp_caps.max_step();
                        self.set_amp_gain_mute(bus, widget.nid, output_amp(step, false))?;
                    }
                    self.set_pin_control(bus, widget.nid, PIN_CTL_HP_EN | PIN_CTL_OUT_EN)?;
                }
                WidgetType::AudioMixer => {
                    if widget.caps & WCAP_OUT_AMP != 0 {
                        let step = widget.out_amp_caps.max_step();
                        self.set_amp_gain_mute(bus, widget.nid, output_amp(step, false))?;
                    }
                    if let (Some(source), true) = (upstream, widget.caps & WCAP_IN_AMP != 0) {
                        if let Some(input) = widget.connection_index(source) {
                            let step = widget.in_amp_caps.max_step();
                            self.set_amp_gain_mute(bus, widget.nid, input_amp(input, step))?;
                        }
                    }
                }
                WidgetType::AudioOutput if position == last => {
                    self.set_converter_control(bus, widget.nid, stream_tag, 0)?;
                    gain = widget.out_amp_caps.max_step() / 2;
                    if widget.caps & WCAP_OUT_AMP != 0 {
                        self.set_amp_gain_mute(bus, widget.nid, output_amp(gain, false))?;
                    }
                }
                _ => {}
            }
        }

        log::debug!(
            "[HDA] Codec {}: path to NID {} routed from NID {} on stream {}",
            self.cid(),
            self.widget(path.widgets[0]).map_or(0, |w| w.nid),
            converter.nid,
            stream_tag
        );

        Ok(gain)
    }

    /// Mute path `index` and release its converter
    ///
    /// Every widget is visited; the first failure is returned.
    pub fn path_shutdown<B: CodecBus>(&self, bus: &B, index: usize) -> HdaResult<()> {
        let path = self.path(index)?;
        let mut first_error = None;

        for &widget in &path.widgets {
            let widget = self.widget(widget).ok_or(HdaError::Unsupported)?;
            let result = match widget.widget_type {
                WidgetType::PinComplex | WidgetType::AudioMixer if widget.caps & WCAP_OUT_AMP != 0 => {
                    self.set_amp_gain_mute(bus, widget.nid, output_amp(0, true))
                }
                WidgetType::AudioOutput => self.set_converter_control(bus, widget.nid, 0, 0),
                _ => Ok(()),
            };

            if let Err(e) = result {
                log::warn!("[HDA] Codec {}: shutdown of NID {} failed: {}", self.cid(), widget.nid, e);
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Set the converter gain of path `index` from a 0..=100 volume
    pub fn path_set_volume<B: CodecBus>(&mut self, bus: &B, index: usize, volume: i32) -> HdaResult<()> {
        let converter = self.path_converter(index)?;
        let gain = volume_to_gain(volume, converter.out_amp_caps.max_step());
        self.set_amp_gain_mute(bus, converter.nid, output_amp(gain, false))?;
        self.paths[index].gain = gain;
        Ok(())
    }

    /// Mute or unmute path `index` at its current gain
    pub fn path_mute<B: CodecBus>(&self, bus: &B, index: usize, mute: bool) -> HdaResult<()> {
        let converter = self.path_converter(index)?;
        let gain = self.path(index)?.gain;
        self.set_amp_gain_mute(bus, converter.nid, output_amp(gain, mute))
    }

    fn path_converter(&self, index: usize) -> HdaResult<&Widget> {
        let converter = self.path(index)?.converter().ok_or(HdaError::Unsupported)?;
        self.widget(converter)
            .filter(|w| w.widget_type == WidgetType::AudioOutput)
            .ok_or(HdaError::Unsupported)
    }
}

/// Map a volume percentage onto `0..=max` amplifier steps
///
/// Full volume is always the top step.
pub fn volume_to_gain(volume: i32, max: u8) -> u8 {
    let volume = volume.clamp(0, 100) as u32;
    if volume == 100 {
        return max;
    }
    let one_percent = (max as u32 / 100).max(1);
    (one_percent * volume).min(max as u32) as u8
}

fn output_amp(gain: u8, mute: bool) -> u16 {
    let mut data = AMP_SET_OUTPUT_BOTH | (gain as u16 & AMP_GAIN_MASK);
    if mute {
        data |= AMP_MUTE;
    }
    data
}

fn input_amp(index: u8, gain: u8) -> u16 {
    AMP_SET_INPUT_BOTH | ((index as u16) << AMP_INDEX_SHIFT) | (gain as u16 & AMP_GAIN_MASK)
}
