// ============================================================================
// src/hda/codec.rs - Codec Detection and Widget Graph
// ============================================================================
//!
//! HDA コーデックの検出とウィジェットグラフ。
//!
//! - ファンクショングループ / ウィジェット列挙
//! - 接続リスト (範囲圧縮形式を含む)
//! - 出力ピンのグループ化と出力パスの計算
//! - ウィジェット単位の設定ベリブ

use alloc::vec::Vec;

use hashbrown::HashMap;

use super::command::CodecBus;
use super::path::Path;
use super::types::*;
use crate::regs::*;

/// Longest pin-to-converter route that is still considered
const MAX_PATH_DEPTH: usize = 10;

// ============================================================================
// Widget
// ============================================================================

/// A node of a codec's audio function group
#[derive(Debug, Clone)]
pub struct Widget {
    pub nid: Nid,
    pub widget_type: WidgetType,
    /// Audio Widget Capabilities
    pub caps: u32,
    /// Pin Capabilities (pin complexes only)
    pub pin_caps: u32,
    pub in_amp_caps: AmpCaps,
    pub out_amp_caps: AmpCaps,
    /// Configuration Default (pin complexes only)
    pub config: PinConfig,
    pub connections: Vec<Connection>,
}

impl Widget {
    /// Connection list with ranges expanded, in hardware index order
    pub fn connected_nids(&self) -> Vec<Nid> {
        let mut nids = Vec::with_capacity(self.connections.len());
        let mut last: Option<Nid> = None;

        for connection in &self.connections {
            match *connection {
                Connection::Node(nid) => {
                    nids.push(nid);
                    last = Some(nid);
                }
                Connection::RangeEnd(end) => {
                    // The start of the range is the preceding literal entry
                    let start = last.map_or(end, |s| s.saturating_add(1));
                    nids.extend(start..=end);
                    last = Some(end);
                }
            }
        }

        nids
    }

    /// Connection select index of `nid`, if it is one of this widget's inputs
    pub fn connection_index(&self, nid: Nid) -> Option<u8> {
        self.connected_nids()
            .iter()
            .position(|&n| n == nid)
            .map(|i| i as u8)
    }

    pub fn is_output_pin(&self) -> bool {
        self.widget_type == WidgetType::PinComplex
            && self.pin_caps & PIN_CAP_OUTPUT != 0
            && self.config.is_connected()
            && self.config.default_device().is_output()
    }
}

// ============================================================================
// Outputs
// ============================================================================

/// Kind of jack/device behind an output pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    LineOut,
    Speaker,
    Headphone,
    Cd,
    SpdifOut,
    OtherDigitalOut,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputInfo {
    pub output_type: OutputType,
}

/// An output pin complex
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Output {
    pub(crate) codec: u8,
    pub(crate) widget: usize,
    pub(crate) nid: Nid,
    pub(crate) config: PinConfig,
}

impl Output {
    pub fn codec(&self) -> u8 {
        self.codec
    }

    pub fn nid(&self) -> Nid {
        self.nid
    }

    pub fn info(&self) -> OutputInfo {
        let output_type = match self.config.default_device() {
            DefaultDevice::LineOut => OutputType::LineOut,
            DefaultDevice::Speaker => OutputType::Speaker,
            DefaultDevice::HpOut => OutputType::Headphone,
            DefaultDevice::Cd => OutputType::Cd,
            DefaultDevice::SpdifOut => OutputType::SpdifOut,
            DefaultDevice::DigitalOtherOut => OutputType::OtherDigitalOut,
            DefaultDevice::Other(_) => OutputType::Unknown,
        };

        OutputInfo { output_type }
    }
}

/// Outputs sharing one default association, ordered by sequence
#[derive(Debug, Clone)]
pub struct OutputGroup {
    association: u8,
    outputs: Vec<Output>,
}

impl OutputGroup {
    pub fn association(&self) -> u8 {
        self.association
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }
}

// ============================================================================
// Codec
// ============================================================================

/// One codec on the link and its discovered topology
#[derive(Debug)]
pub struct Codec {
    cid: u8,
    vendor_id: u32,
    widgets: Vec<Widget>,
    by_nid: HashMap<Nid, usize>,
    output_groups: Vec<OutputGroup>,
    pub(crate) paths: Vec<Path>,
}

impl Codec {
    /// Enumerate codec `cid`
    ///
    /// A codec that does not answer yields `HdaError::Timeout`.
    pub fn init<B: CodecBus>(bus: &B, cid: u8) -> HdaResult<Self> {
        let vendor_id = bus.get_parameter(cid, 0, PARAM_VENDOR_ID)?;

        log::info!(
            "[HDA] Codec {}: Vendor={:04x}, Device={:04x}",
            cid,
            vendor_id >> 16,
            vendor_id & 0xFFFF
        );

        let mut codec = Self {
            cid,
            vendor_id,
            widgets: Vec::new(),
            by_nid: HashMap::new(),
            output_groups: Vec::new(),
            paths: Vec::new(),
        };

        let (start, count) = sub_nodes(bus, cid, 0)?;
        for fg in start..start.saturating_add(count) {
            let fg_type = bus.get_parameter(cid, fg, PARAM_FUNC_GROUP_TYPE)? & 0xFF;
            if fg_type as u8 != FUNC_GROUP_AUDIO {
                log::debug!("[HDA] Codec {}: skipping function group {} (type {})", cid, fg, fg_type);
                continue;
            }

            codec.enumerate_afg(bus, fg)?;
        }

        codec.group_outputs()?;
        codec.compute_paths()?;

        log::debug!(
            "[HDA] Codec {}: {} widgets, {} output groups, {} paths",
            cid,
            codec.widgets.len(),
            codec.output_groups.len(),
            codec.paths.len()
        );

        Ok(codec)
    }

    /// Enumerate Audio Function Group nodes
    fn enumerate_afg<B: CodecBus>(&mut self, bus: &B, afg: Nid) -> HdaResult<()> {
        self.set_power_state(bus, afg, POWER_D0)?;

        let afg_in_amp = bus.get_parameter(self.cid, afg, PARAM_IN_AMP_CAPS)?;
        let afg_out_amp = bus.get_parameter(self.cid, afg, PARAM_OUT_AMP_CAPS)?;

        let (start, count) = sub_nodes(bus, self.cid, afg)?;
        self.widgets.try_reserve(count as usize)?;
        self.by_nid.try_reserve(count as usize).map_err(|_| HdaError::NoMemory)?;

        for nid in start..start.saturating_add(count) {
            let widget = self.read_widget(bus, nid, afg_in_amp, afg_out_amp)?;
            log::debug!(
                "[HDA] Widget {}: {:?}, {} connections",
                nid,
                widget.widget_type,
                widget.connections.len()
            );

            self.by_nid.insert(nid, self.widgets.len());
            self.widgets.push(widget);
        }

        Ok(())
    }

    fn read_widget<B: CodecBus>(
        &self,
        bus: &B,
        nid: Nid,
        afg_in_amp: u32,
        afg_out_amp: u32,
    ) -> HdaResult<Widget> {
        let cid = self.cid;
        let caps = bus.get_parameter(cid, nid, PARAM_WIDGET_CAPS)?;
        let widget_type = WidgetType::from(((caps >> WCAP_TYPE_SHIFT) & 0x0F) as u8);
        let amp_override = caps & WCAP_AMP_OVERRIDE != 0;

        let in_amp_caps = match (caps & WCAP_IN_AMP != 0, amp_override) {
            (false, _) => 0,
            (true, true) => bus.get_parameter(cid, nid, PARAM_IN_AMP_CAPS)?,
            (true, false) => afg_in_amp,
        };
        let out_amp_caps = match (caps & WCAP_OUT_AMP != 0, amp_override) {
            (false, _) => 0,
            (true, true) => bus.get_parameter(cid, nid, PARAM_OUT_AMP_CAPS)?,
            (true, false) => afg_out_amp,
        };

        let (pin_caps, config) = if widget_type == WidgetType::PinComplex {
            (
                bus.get_parameter(cid, nid, PARAM_PIN_CAPS)?,
                bus.command_short(cid, nid, VERB_GET_CONFIG_DEFAULT, 0)?,
            )
        } else {
            (0, 0)
        };

        let connections = if caps & WCAP_CONN_LIST != 0 {
            read_connection_list(bus, cid, nid)?
        } else {
            Vec::new()
        };

        Ok(Widget {
            nid,
            widget_type,
            caps,
            pin_caps,
            in_amp_caps: AmpCaps(in_amp_caps),
            out_amp_caps: AmpCaps(out_amp_caps),
            config: PinConfig(config),
            connections,
        })
    }

    fn group_outputs(&mut self) -> HdaResult<()> {
        for (index, widget) in self.widgets.iter().enumerate() {
            if !widget.is_output_pin() {
                continue;
            }

            let output = Output {
                codec: self.cid,
                widget: index,
                nid: widget.nid,
                config: widget.config,
            };

            let association = widget.config.association();
            match self.output_groups.iter_mut().find(|g| g.association == association) {
                Some(group) => {
                    group.outputs.try_reserve(1)?;
                    group.outputs.push(output);
                }
                None => {
                    let mut outputs = Vec::new();
                    outputs.try_reserve(1)?;
                    outputs.push(output);
                    self.output_groups.try_reserve(1)?;
                    self.output_groups.push(OutputGroup { association, outputs });
                }
            }
        }

        for group in &mut self.output_groups {
            group.outputs.sort_by_key(|o| o.config.sequence());
        }
        self.output_groups.sort_by_key(|g| g.association);

        Ok(())
    }

    /// Record every route from an output pin back to an output converter
    fn compute_paths(&mut self) -> HdaResult<()> {
        let mut paths = Vec::new();

        for group in &self.output_groups {
            for output in &group.outputs {
                let mut route = Vec::new();
                route.try_reserve(MAX_PATH_DEPTH)?;
                route.push(output.widget);
                self.walk(&mut route, &mut paths)?;
            }
        }

        self.paths = paths;
        Ok(())
    }

    fn walk(&self, route: &mut Vec<usize>, paths: &mut Vec<Path>) -> HdaResult<()> {
        let Some(&current) = route.last() else {
            return Ok(());
        };

        for nid in self.widgets[current].connected_nids() {
            let Some(&next) = self.by_nid.get(&nid) else {
                continue;
            };
            if route.contains(&next) {
                continue;
            }

            match self.widgets[next].widget_type {
                WidgetType::AudioOutput => {
                    let mut widgets = Vec::new();
                    widgets.try_reserve(route.len() + 1)?;
                    widgets.extend_from_slice(route);
                    widgets.push(next);
                    paths.try_reserve(1)?;
                    paths.push(Path::new(self.cid, widgets));
                }
                WidgetType::AudioMixer | WidgetType::AudioSelector if route.len() < MAX_PATH_DEPTH => {
                    route.push(next);
                    self.walk(route, paths)?;
                    route.pop();
                }
                _ => {}
            }
        }

        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn cid(&self) -> u8 {
        self.cid
    }

    pub fn vendor_id(&self) -> u32 {
        self.vendor_id
    }

    pub fn widgets(&self) -> &[Widget] {
        &self.widgets
    }

    pub fn widget(&self, index: usize) -> Option<&Widget> {
        self.widgets.get(index)
    }

    pub fn widget_by_nid(&self, nid: Nid) -> Option<&Widget> {
        self.by_nid.get(&nid).map(|&i| &self.widgets[i])
    }

    pub fn output_groups(&self) -> &[OutputGroup] {
        &self.output_groups
    }

    pub fn paths(&self) -> &[Path] {
        &self.paths
    }

    // ========================================================================
    // Widget Controls
    // ========================================================================

    pub fn set_converter_format<B: CodecBus>(&self, bus: &B, nid: Nid, format: u16) -> HdaResult<()> {
        bus.command_long(self.cid, nid, VERB_SET_CONV_FMT, format).map(drop)
    }

    pub fn set_converter_channel_count<B: CodecBus>(&self, bus: &B, nid: Nid, channels: u8) -> HdaResult<()> {
        bus.command_short(self.cid, nid, VERB_SET_CONV_CHAN_COUNT, channels.saturating_sub(1))
            .map(drop)
    }

    pub fn set_power_state<B: CodecBus>(&self, bus: &B, nid: Nid, state: u8) -> HdaResult<()> {
        bus.command_short(self.cid, nid, VERB_SET_POWER, state).map(drop)
    }

    pub fn set_pin_control<B: CodecBus>(&self, bus: &B, nid: Nid, control: u8) -> HdaResult<()> {
        bus.command_short(self.cid, nid, VERB_SET_PIN_CTL, control).map(drop)
    }

    pub fn set_amp_gain_mute<B: CodecBus>(&self, bus: &B, nid: Nid, data: u16) -> HdaResult<()> {
        bus.command_long(self.cid, nid, VERB_SET_AMP_GAIN, data).map(drop)
    }

    pub fn set_selected_connection<B: CodecBus>(&self, bus: &B, nid: Nid, index: u8) -> HdaResult<()> {
        bus.command_short(self.cid, nid, VERB_SET_CONN_SEL, index).map(drop)
    }

    pub fn set_eapd_enable<B: CodecBus>(&self, bus: &B, nid: Nid, value: u8) -> HdaResult<()> {
        bus.command_short(self.cid, nid, VERB_SET_EAPD, value).map(drop)
    }

    /// Bind a converter to stream tag `stream` (0 unbinds) and first channel `channel`
    pub fn set_converter_control<B: CodecBus>(
        &self,
        bus: &B,
        nid: Nid,
        stream: u8,
        channel: u8,
    ) -> HdaResult<()> {
        let data = (stream << CONV_STREAM_SHIFT) | (channel & CONV_CHANNEL_MASK);
        bus.command_short(self.cid, nid, VERB_SET_CONV_STREAM, data).map(drop)
    }
}

/// `(start, count)` of the nodes below `nid`
fn sub_nodes<B: CodecBus>(bus: &B, cid: u8, nid: Nid) -> HdaResult<(Nid, Nid)> {
    let sub = bus.get_parameter(cid, nid, PARAM_SUB_NODE_COUNT)?;
    Ok((((sub >> 16) & 0xFF) as Nid, (sub & 0xFF) as Nid))
}

/// Read a widget's connection list, keeping range entries compressed
fn read_connection_list<B: CodecBus>(bus: &B, cid: u8, nid: Nid) -> HdaResult<Vec<Connection>> {
    let len_field = bus.get_parameter(cid, nid, PARAM_CONN_LIST_LEN)?;
    let len = (len_field & CONN_LIST_LEN_MASK) as usize;
    let long_form = len_field & CONN_LIST_LONG_FORM != 0;

    let (per_response, entry_bits) = if long_form { (2, 16) } else { (4, 8) };
    let entry_mask = (1u32 << entry_bits) - 1;
    let range_flag = 1u32 << (entry_bits - 1);

    let mut list = Vec::new();
    list.try_reserve(len)?;

    let mut offset = 0;
    while offset < len {
        let response = bus.command_short(cid, nid, VERB_GET_CONN_LIST, offset as u8)?;

        for i in 0..per_response.min(len - offset) {
            let entry = (response >> (entry_bits * i)) & entry_mask;
            let Ok(target) = Nid::try_from(entry & (range_flag - 1)) else {
                // Verbs address 8-bit NIDs. Connection indices are positional,
                // so the list is dropped whole rather than left with a hole.
                log::warn!(
                    "[HDA] Codec {} node {:#04x}: connection to NID {:#x} is not addressable, ignoring list",
                    cid,
                    nid,
                    entry & (range_flag - 1)
                );
                return Ok(Vec::new());
            };

            if entry & range_flag != 0 && !list.is_empty() {
                list.push(Connection::RangeEnd(target));
            } else {
                list.push(Connection::Node(target));
            }
        }

        offset += per_response;
    }

    Ok(list)
}
