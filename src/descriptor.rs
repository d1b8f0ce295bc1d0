//! The flat command descriptor model — the wire record emitted to
//! `chiplet_commands.json`. Field names here are contract: they are also the
//! JSON keys downstream stages parse.

use std::collections::BTreeMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Hardware action kind. Closed set — implementers (and the `kind` JSON
/// field) must use exactly these names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    PeTokenPrep,
    PeAttentionHead,
    PeElementwise,
    PeReduce,
    PeMatmulTile,
    SpuDispatch,
    TransferSchedule,
    TransferC2D,
    TransferD2C,
    TransferHost2D,
    TransferD2Host,
    RramStageAct,
    RramExecute,
    RramPost,
    RramMerge,
    MoeMerge,
}

/// Executor class a command runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    Digital,
    Transfer,
    Rram,
    Host,
}

bitflags! {
    /// Stable numeric flag bits — required for interoperability with the
    /// downstream simulator, so these values must never be renumbered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct CommandFlags: u32 {
        const TRANSFER_DIGITAL_TO_RRAM = 0x1;
        const TRANSFER_RRAM_TO_DIGITAL = 0x2;
        const TRANSFER_HOST            = 0x4;
        const PARALLEL_EXPERTS         = 0x10;
    }
}

impl CommandFlags {
    const DIRECTION_MASK: Self = Self::from_bits_truncate(
        Self::TRANSFER_DIGITAL_TO_RRAM.bits()
            | Self::TRANSFER_RRAM_TO_DIGITAL.bits()
            | Self::TRANSFER_HOST.bits(),
    );

    /// True if exactly one of the three mutually-exclusive direction bits
    /// is set (invariant 5 / 4 of the spec).
    pub fn has_exactly_one_direction(self) -> bool {
        (self & Self::DIRECTION_MASK).bits().count_ones() == 1
    }
}

/// One hardware action, forming a node in the command descriptor DAG.
///
/// `dependencies` is an ordered set: no duplicates, every entry strictly
/// less than `id`. Integer fields absent from an input command always
/// default to `0` / `-1` on construction, and are always serialized — never
/// omitted — so the JSON schema stays fixed-width (§4.5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub id: i32,
    pub kind: CommandKind,
    pub target: Target,
    #[serde(default = "neg_one")]
    pub chiplet: i32,
    #[serde(default = "neg_one")]
    pub unit: i32,
    #[serde(default)]
    pub rows: i32,
    #[serde(default)]
    pub cols: i32,
    #[serde(default)]
    pub k: i32,
    #[serde(default)]
    pub bytes: i64,
    #[serde(default)]
    pub latency: i32,
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub dependencies: Vec<i32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

fn neg_one() -> i32 {
    -1
}

impl CommandDescriptor {
    /// A minimal, unattached descriptor. Callers fill in shape/bytes/flags
    /// and push it onto a builder buffer; `id` and `dependencies` are set
    /// relative to the builder's local scope and rewritten by the Composer.
    pub fn new(id: i32, kind: CommandKind, target: Target) -> Self {
        Self {
            id,
            kind,
            target,
            chiplet: -1,
            unit: -1,
            rows: 0,
            cols: 0,
            k: 0,
            bytes: 0,
            latency: 0,
            flags: 0,
            dependencies: Vec::new(),
            meta: BTreeMap::new(),
        }
    }

    pub fn with_unit(mut self, chiplet: u32, unit: u32) -> Self {
        self.chiplet = chiplet as i32;
        self.unit = unit as i32;
        self
    }

    pub fn with_shape(mut self, rows: i32, cols: i32, k: i32) -> Self {
        self.rows = rows;
        self.cols = cols;
        self.k = k;
        self
    }

    pub fn with_bytes(mut self, bytes: i64) -> Self {
        self.bytes = bytes;
        self
    }

    pub fn with_latency(mut self, latency: i32) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_flags(mut self, flags: CommandFlags) -> Self {
        self.flags |= flags.bits();
        self
    }

    /// Append a dependency, deduplicating and preserving first-occurrence
    /// order (the Composer relies on this when it merges boundary edges).
    pub fn depend_on(mut self, dep: i32) -> Self {
        if !self.dependencies.contains(&dep) {
            self.dependencies.push(dep);
        }
        self
    }

    pub fn depend_on_all(mut self, deps: impl IntoIterator<Item = i32>) -> Self {
        for d in deps {
            if !self.dependencies.contains(&d) {
                self.dependencies.push(d);
            }
        }
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_direction_flag_is_detected() {
        let f = CommandFlags::TRANSFER_DIGITAL_TO_RRAM;
        assert!(f.has_exactly_one_direction());
        let f2 = CommandFlags::TRANSFER_DIGITAL_TO_RRAM | CommandFlags::TRANSFER_HOST;
        assert!(!f2.has_exactly_one_direction());
        let f3 = CommandFlags::PARALLEL_EXPERTS;
        assert!(!f3.has_exactly_one_direction());
    }

    #[test]
    fn depend_on_deduplicates_preserving_order() {
        let c = CommandDescriptor::new(3, CommandKind::PeElementwise, Target::Digital)
            .depend_on(1)
            .depend_on(2)
            .depend_on(1);
        assert_eq!(c.dependencies, vec![1, 2]);
    }

    #[test]
    fn json_serializes_all_fields_even_at_defaults() {
        let c = CommandDescriptor::new(0, CommandKind::PeTokenPrep, Target::Digital);
        let v: serde_json::Value = serde_json::to_value(&c).unwrap();
        for key in ["id", "kind", "target", "chiplet", "unit", "rows", "cols", "k", "bytes", "latency", "flags", "dependencies"] {
            assert!(v.get(key).is_some(), "missing key {key}");
        }
    }
}
