//! Model-spec compiler: loads a declarative JSON workload description and
//! lowers it to the same flat [`CommandDescriptor`] vector the operator
//! library emits, reusing its target/flag/shape conventions directly.
//!
//! A spec stage may expand into several commands (`moe_linear` expands into
//! one `RramStageAct`/`RramExecute`/`RramPost` triple per expert); entry/exit
//! bookkeeping (§4.4) is what lets a later stage's `deps` — indices into the
//! stage *sequence*, not command ids — resolve to the right predecessor
//! command ids regardless of how many commands the referenced stage lowered
//! to.

pub mod model_spec;

use std::path::Path;

use crate::config::Config;
use crate::descriptor::{CommandDescriptor, CommandFlags, CommandKind, Target};
use crate::error::SpecValidationError;
use crate::oracle::OracleClient;
use crate::topology::Topology;
use model_spec::{ModelSpec, Stage};

/// Default latency (cycles) stamped on a `TransferSchedule` when the spec
/// omits one and no oracle estimate is available.
const DEFAULT_TRANSFER_LATENCY: i32 = 64;

/// Entry/exit command ids for one stage, used to resolve later stages'
/// `deps` (§4.4 entry/exit conventions).
#[derive(Debug, Clone, Default)]
struct StageBoundary {
    entries: Vec<i32>,
    exits: Vec<i32>,
}

/// Read and parse a model-spec JSON document. Validation and lowering
/// happen in [`compile`]; this only handles the filesystem/JSON layer so
/// I/O and parse failures are reported distinctly from stage-level ones.
pub fn load(path: &Path) -> Result<ModelSpec, SpecValidationError> {
    let text = std::fs::read_to_string(path).map_err(|source| SpecValidationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| SpecValidationError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Lower a validated model spec into a flat command vector. `oracle`, if
/// given, is consulted to stamp `TransferSchedule.latency` only when a
/// `transfer` stage omits the field entirely; a spec-provided latency
/// always wins.
pub fn compile(
    spec: &ModelSpec,
    config: &Config,
    topology: &Topology,
    oracle: Option<&OracleClient>,
) -> Result<Vec<CommandDescriptor>, SpecValidationError> {
    let mut out: Vec<CommandDescriptor> = Vec::new();
    let mut boundaries: Vec<StageBoundary> = Vec::with_capacity(spec.sequence.len());

    for (idx, stage) in spec.sequence.iter().enumerate() {
        for &dep in &stage.deps {
            if dep >= idx {
                return Err(SpecValidationError::ForwardReference { stage: idx, dep });
            }
        }

        let entry_deps = dedup_preserve_order(
            stage
                .deps
                .iter()
                .flat_map(|&d| boundaries[d].exits.iter().copied()),
        );

        let start_id = out.len() as i32;
        let mut local = lower_stage(idx, stage, config, topology, oracle, start_id)?;

        let boundary = stage_boundary(start_id, &local);
        for &entry in &boundary.entries {
            let pos = (entry - start_id) as usize;
            for &dep in &entry_deps {
                if !local[pos].dependencies.contains(&dep) {
                    local[pos].dependencies.push(dep);
                }
            }
        }

        out.append(&mut local);
        boundaries.push(boundary);
    }

    Ok(out)
}

/// Determine a just-lowered stage's entry/exit command ids (§4.4
/// conventions): single-command stages are entry=exit=that command;
/// `moe_linear` entries are every `RramStageAct`, exits every `RramPost`.
fn stage_boundary(start_id: i32, local: &[CommandDescriptor]) -> StageBoundary {
    let stage_acts: Vec<i32> = local
        .iter()
        .filter(|c| c.kind == CommandKind::RramStageAct)
        .map(|c| c.id)
        .collect();
    let posts: Vec<i32> = local
        .iter()
        .filter(|c| c.kind == CommandKind::RramPost)
        .map(|c| c.id)
        .collect();

    if !stage_acts.is_empty() {
        return StageBoundary { entries: stage_acts, exits: posts };
    }

    // Single-command stage (or any stage not built from an RRAM pipeline):
    // entry = exit = the first command starting this stage.
    StageBoundary { entries: vec![start_id], exits: vec![start_id] }
}

fn lower_stage(
    idx: usize,
    stage: &Stage,
    config: &Config,
    topology: &Topology,
    oracle: Option<&OracleClient>,
    start_id: i32,
) -> Result<Vec<CommandDescriptor>, SpecValidationError> {
    match stage.kind.as_str() {
        "token_prep" => {
            let tokens = non_negative(idx, "tokens", stage.i64_field("tokens", 0))?;
            let features = non_negative(idx, "features", stage.i64_field("features", 0))?;
            let latency = non_negative(idx, "latency", stage.i64_field("latency", 0))?;
            Ok(vec![CommandDescriptor::new(start_id, CommandKind::PeTokenPrep, Target::Digital)
                .with_unit(topology.digital_pe(0, 0).chiplet, topology.digital_pe(0, 0).pe_index)
                .with_shape(tokens as i32, features as i32, 0)
                .with_latency(latency as i32)])
        }
        "attention" => {
            let rows = non_negative(idx, "rows", stage.i64_field("rows", 0))?;
            let cols = non_negative(idx, "cols", stage.i64_field("cols", 0))?;
            let k = non_negative(idx, "k", stage.i64_field("k", 0))?;
            let latency = non_negative(idx, "latency", stage.i64_field("latency", 0))?;
            Ok(vec![CommandDescriptor::new(start_id, CommandKind::PeAttentionHead, Target::Digital)
                .with_unit(topology.digital_pe(0, 0).chiplet, topology.digital_pe(0, 0).pe_index)
                .with_shape(rows as i32, cols as i32, k as i32)
                .with_latency(latency as i32)])
        }
        "softmax" | "layernorm" => {
            let rows = non_negative(idx, "rows", stage.i64_field("rows", 0))?;
            let cols = non_negative(idx, "cols", stage.i64_field("cols", 0))?;
            let latency = non_negative(idx, "latency", stage.i64_field("latency", 0))?;
            Ok(vec![CommandDescriptor::new(start_id, CommandKind::PeReduce, Target::Digital)
                .with_unit(topology.digital_pe(0, 0).chiplet, topology.digital_pe(0, 0).pe_index)
                .with_shape(rows as i32, cols as i32, 0)
                .with_latency(latency as i32)
                .with_meta("stage", stage.kind.clone())])
        }
        "elementwise" => {
            let rows = non_negative(idx, "rows", stage.i64_field("rows", 0))?;
            let cols = non_negative(idx, "cols", stage.i64_field("cols", 0))?;
            let latency = non_negative(idx, "latency", stage.i64_field("latency", 0))?;
            Ok(vec![CommandDescriptor::new(start_id, CommandKind::PeElementwise, Target::Digital)
                .with_unit(topology.digital_pe(0, 0).chiplet, topology.digital_pe(0, 0).pe_index)
                .with_shape(rows as i32, cols as i32, 0)
                .with_latency(latency as i32)])
        }
        "matmul" => {
            let rows = non_negative(idx, "rows", stage.i64_field("rows", 0))?;
            let cols = non_negative(idx, "cols", stage.i64_field("cols", 0))?;
            let k = non_negative(idx, "k", stage.i64_field("k", 0))?;
            let latency = non_negative(idx, "latency", stage.i64_field("latency", 0))?;
            Ok(vec![CommandDescriptor::new(start_id, CommandKind::PeMatmulTile, Target::Digital)
                .with_unit(topology.digital_pe(0, 0).chiplet, topology.digital_pe(0, 0).pe_index)
                .with_shape(rows as i32, cols as i32, k as i32)
                .with_latency(latency as i32)])
        }
        "moe_merge" => {
            let rows = non_negative(idx, "rows", stage.i64_field("rows", 0))?;
            let cols = non_negative(idx, "cols", stage.i64_field("cols", 0))?;
            let latency = non_negative(idx, "latency", stage.i64_field("latency", 0))?;
            Ok(vec![CommandDescriptor::new(start_id, CommandKind::MoeMerge, Target::Digital)
                .with_unit(topology.digital_pe(0, 0).chiplet, topology.digital_pe(0, 0).pe_index)
                .with_shape(rows as i32, cols as i32, 0)
                .with_latency(latency as i32)])
        }
        "transfer" => lower_transfer(idx, stage, oracle, start_id),
        "moe_linear" => lower_moe_linear(idx, stage, topology, start_id),
        other => Err(SpecValidationError::UnknownType { stage: idx, kind: other.to_string() }),
    }
}

fn lower_transfer(
    idx: usize,
    stage: &Stage,
    oracle: Option<&OracleClient>,
    start_id: i32,
) -> Result<Vec<CommandDescriptor>, SpecValidationError> {
    let bytes = non_negative(idx, "bytes", stage.i64_field("bytes", 0))?;
    let direction = stage.str_field("direction").unwrap_or("").to_string();

    let (flag, target) = match direction.as_str() {
        "digital_to_rram" => (CommandFlags::TRANSFER_DIGITAL_TO_RRAM, Target::Transfer),
        "rram_to_digital" => (CommandFlags::TRANSFER_RRAM_TO_DIGITAL, Target::Transfer),
        "host_to_digital" | "digital_to_host" => (CommandFlags::TRANSFER_HOST, Target::Host),
        _ => {
            return Err(SpecValidationError::BadDirection {
                stage: idx,
                direction,
            })
        }
    };

    let latency = if stage.has_field("latency") {
        non_negative(idx, "latency", stage.i64_field("latency", 0))? as i32
    } else if let Some(oracle) = oracle {
        oracle.estimate(0, 1, bytes).map(|c| c as i32).unwrap_or(DEFAULT_TRANSFER_LATENCY)
    } else {
        DEFAULT_TRANSFER_LATENCY
    };

    Ok(vec![CommandDescriptor::new(start_id, CommandKind::TransferSchedule, target)
        .with_bytes(bytes)
        .with_latency(latency)
        .with_flags(flag)
        .with_meta("direction", direction)])
}

fn lower_moe_linear(
    idx: usize,
    stage: &Stage,
    topology: &Topology,
    start_id: i32,
) -> Result<Vec<CommandDescriptor>, SpecValidationError> {
    let experts = stage.array_field("experts").cloned().unwrap_or_default();
    if experts.is_empty() {
        return Err(SpecValidationError::NoExperts { stage: idx });
    }

    let parallel = stage.bool_field("parallel", true);
    let stage_latency = non_negative(idx, "stage_latency", stage.i64_field("stage_latency", 0))?;
    let execute_latency_default = non_negative(idx, "execute_latency", stage.i64_field("execute_latency", 0))?;
    let post_latency = non_negative(idx, "post_latency", stage.i64_field("post_latency", 0))?;
    let activation_bytes_default = non_negative(idx, "activation_bytes", stage.i64_field("activation_bytes", 0))?;
    let weight_bytes_default = non_negative(idx, "weight_bytes", stage.i64_field("weight_bytes", 0))?;
    let pulse_count = non_negative(idx, "pulse_count", stage.i64_field("pulse_count", 0))?;
    let adc_samples = non_negative(idx, "adc_samples", stage.i64_field("adc_samples", 0))?;
    let pre_cycles = non_negative(idx, "pre_cycles", stage.i64_field("pre_cycles", 0))?;
    let post_cycles = non_negative(idx, "post_cycles", stage.i64_field("post_cycles", 0))?;

    let mut commands = Vec::with_capacity(experts.len() * 3);
    let mut next_id = start_id;

    for (e, expert) in experts.iter().enumerate() {
        let chiplet = expert.get("chiplet").and_then(|v| v.as_i64()).unwrap_or(0);
        let chiplet = non_negative(idx, "experts[].chiplet", chiplet)? as u32;
        let activation_bytes = match expert.get("activation_bytes").and_then(|v| v.as_i64()) {
            Some(v) => non_negative(idx, "experts[].activation_bytes", v)?,
            None => activation_bytes_default,
        };
        let weight_bytes = match expert.get("weight_bytes").and_then(|v| v.as_i64()) {
            Some(v) => non_negative(idx, "experts[].weight_bytes", v)?,
            None => weight_bytes_default,
        };
        let execute_latency = match expert.get("execute_latency").and_then(|v| v.as_i64()) {
            Some(v) => non_negative(idx, "experts[].execute_latency", v)?,
            None => execute_latency_default,
        };

        let sa = topology.rram_sub_array(chiplet, 0);
        let mut flags = CommandFlags::empty();
        if parallel {
            flags |= CommandFlags::PARALLEL_EXPERTS;
        }

        let stage_id = next_id;
        next_id += 1;
        let stage_cmd = CommandDescriptor::new(stage_id, CommandKind::RramStageAct, Target::Rram)
            .with_unit(sa.chiplet, 0)
            .with_bytes(activation_bytes + weight_bytes)
            .with_latency(stage_latency as i32)
            .with_flags(flags)
            .with_meta("expert_index", e.to_string())
            .with_meta("pre_cycles", pre_cycles.to_string());
        commands.push(stage_cmd);

        let exec_id = next_id;
        next_id += 1;
        let exec_cmd = CommandDescriptor::new(exec_id, CommandKind::RramExecute, Target::Rram)
            .with_unit(sa.chiplet, 0)
            .with_latency(execute_latency as i32)
            .with_flags(flags)
            .depend_on(stage_id)
            .with_meta("expert_index", e.to_string())
            .with_meta("pulse_count", pulse_count.to_string())
            .with_meta("adc_samples", adc_samples.to_string());
        commands.push(exec_cmd);

        let post_id = next_id;
        next_id += 1;
        let post_cmd = CommandDescriptor::new(post_id, CommandKind::RramPost, Target::Rram)
            .with_unit(sa.chiplet, 0)
            .with_bytes(weight_bytes)
            .with_latency(post_latency as i32)
            .with_flags(flags)
            .depend_on(exec_id)
            .with_meta("expert_index", e.to_string())
            .with_meta("post_cycles", post_cycles.to_string());
        commands.push(post_cmd);
    }

    Ok(commands)
}

fn non_negative(stage: usize, field: &'static str, value: i64) -> Result<i64, SpecValidationError> {
    if value < 0 {
        Err(SpecValidationError::NegativeField { stage, field })
    } else {
        Ok(value)
    }
}

fn dedup_preserve_order(iter: impl IntoIterator<Item = i32>) -> Vec<i32> {
    let mut seen = Vec::new();
    for v in iter {
        if !seen.contains(&v) {
            seen.push(v);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec_from(value: serde_json::Value) -> ModelSpec {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn single_token_prep_stage_has_no_dependencies() {
        let cfg = Config::default();
        let topo = Topology::from_config(&cfg);
        let spec = spec_from(json!({
            "name": "single",
            "sequence": [
                { "type": "token_prep", "tokens": 128, "features": 256, "latency": 8 }
            ]
        }));
        let out = compile(&spec, &cfg, &topo, None).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].dependencies.is_empty());
        assert_eq!(out[0].kind, CommandKind::PeTokenPrep);
    }

    #[test]
    fn forward_reference_is_rejected_naming_the_stage() {
        let cfg = Config::default();
        let topo = Topology::from_config(&cfg);
        let spec = spec_from(json!({
            "name": "bad",
            "sequence": [
                { "type": "token_prep", "tokens": 1, "features": 1 },
                { "type": "token_prep", "tokens": 1, "features": 1 },
                { "type": "token_prep", "tokens": 1, "features": 1 },
                { "type": "elementwise", "rows": 1, "cols": 1, "deps": [5] }
            ]
        }));
        let err = compile(&spec, &cfg, &topo, None).unwrap_err();
        assert!(matches!(err, SpecValidationError::ForwardReference { stage: 3, dep: 5 }));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let cfg = Config::default();
        let topo = Topology::from_config(&cfg);
        let spec = spec_from(json!({
            "name": "bad",
            "sequence": [ { "type": "quantum_teleport" } ]
        }));
        let err = compile(&spec, &cfg, &topo, None).unwrap_err();
        assert!(matches!(err, SpecValidationError::UnknownType { stage: 0, .. }));
    }

    #[test]
    fn moe_linear_with_zero_experts_is_rejected() {
        let cfg = Config::default();
        let topo = Topology::from_config(&cfg);
        let spec = spec_from(json!({
            "name": "bad",
            "sequence": [ { "type": "moe_linear", "experts": [] } ]
        }));
        let err = compile(&spec, &cfg, &topo, None).unwrap_err();
        assert!(matches!(err, SpecValidationError::NoExperts { stage: 0 }));
    }

    #[test]
    fn bad_transfer_direction_is_rejected() {
        let cfg = Config::default();
        let topo = Topology::from_config(&cfg);
        let spec = spec_from(json!({
            "name": "bad",
            "sequence": [ { "type": "transfer", "bytes": 10, "direction": "teleport" } ]
        }));
        let err = compile(&spec, &cfg, &topo, None).unwrap_err();
        assert!(matches!(err, SpecValidationError::BadDirection { stage: 0, .. }));
    }

    #[test]
    fn negative_field_is_rejected() {
        let cfg = Config::default();
        let topo = Topology::from_config(&cfg);
        let spec = spec_from(json!({
            "name": "bad",
            "sequence": [ { "type": "token_prep", "tokens": -1, "features": 1 } ]
        }));
        let err = compile(&spec, &cfg, &topo, None).unwrap_err();
        assert!(matches!(err, SpecValidationError::NegativeField { stage: 0, .. }));
    }

    /// Scenario C from the design: a full token_prep → attention → softmax →
    /// transfer → moe_linear(2 experts) → transfer → moe_merge chain.
    #[test]
    fn scenario_c_model_spec_lowering() {
        let cfg = Config::default();
        let topo = Topology::from_config(&cfg);
        let spec = spec_from(json!({
            "name": "scenario-c",
            "sequence": [
                { "type": "token_prep", "tokens": 128, "features": 256, "latency": 8 },
                { "type": "attention", "rows": 256, "cols": 256, "k": 128, "latency": 64, "deps": [0] },
                { "type": "softmax", "rows": 128, "cols": 128, "latency": 24, "deps": [1] },
                { "type": "transfer", "bytes": 65536, "latency": 14, "direction": "digital_to_rram", "deps": [2] },
                {
                    "type": "moe_linear",
                    "parallel": true,
                    "experts": [
                        { "chiplet": 0 },
                        { "chiplet": 1, "execute_latency": 64, "activation_bytes": 45056, "weight_bytes": 90112 }
                    ],
                    "deps": [3]
                },
                { "type": "transfer", "bytes": 49152, "latency": 12, "direction": "rram_to_digital", "deps": [4] },
                { "type": "moe_merge", "rows": 96, "cols": 32, "latency": 22, "deps": [5] }
            ]
        }));

        let out = compile(&spec, &cfg, &topo, None).unwrap();
        assert!(out.len() >= 12);

        assert!(out.iter().any(|c| c.kind == CommandKind::PeTokenPrep));
        assert!(out.iter().any(|c| c.kind == CommandKind::PeAttentionHead));
        assert!(out.iter().any(|c| c.kind == CommandKind::PeReduce));

        let d2r = out
            .iter()
            .find(|c| c.kind == CommandKind::TransferSchedule && c.flags & CommandFlags::TRANSFER_DIGITAL_TO_RRAM.bits() != 0)
            .expect("digital_to_rram transfer");
        let first_stage_act = out
            .iter()
            .find(|c| c.kind == CommandKind::RramStageAct)
            .expect("at least one RramStageAct");
        assert!(d2r.id < first_stage_act.id);

        let posts: Vec<i32> = out
            .iter()
            .filter(|c| c.kind == CommandKind::RramPost)
            .map(|c| c.id)
            .collect();
        assert_eq!(posts.len(), 2);

        for chiplet_experts in 0..2 {
            let stage_cmd = out
                .iter()
                .find(|c| c.kind == CommandKind::RramStageAct && c.meta.get("expert_index") == Some(&chiplet_experts.to_string()))
                .unwrap();
            let exec_cmd = out
                .iter()
                .find(|c| c.kind == CommandKind::RramExecute && c.meta.get("expert_index") == Some(&chiplet_experts.to_string()))
                .unwrap();
            let post_cmd = out
                .iter()
                .find(|c| c.kind == CommandKind::RramPost && c.meta.get("expert_index") == Some(&chiplet_experts.to_string()))
                .unwrap();
            assert!(exec_cmd.dependencies.contains(&stage_cmd.id));
            assert!(post_cmd.dependencies.contains(&exec_cmd.id));
        }

        let r2d = out
            .iter()
            .find(|c| c.kind == CommandKind::TransferSchedule && c.flags & CommandFlags::TRANSFER_RRAM_TO_DIGITAL.bits() != 0)
            .expect("rram_to_digital transfer");
        for post_id in &posts {
            assert!(r2d.dependencies.contains(post_id));
        }

        assert_eq!(out.last().unwrap().kind, CommandKind::MoeMerge);
    }

    #[test]
    fn transfer_without_latency_falls_back_to_default_without_oracle() {
        let cfg = Config::default();
        let topo = Topology::from_config(&cfg);
        let spec = spec_from(json!({
            "name": "no-latency",
            "sequence": [ { "type": "transfer", "bytes": 10, "direction": "digital_to_rram" } ]
        }));
        let out = compile(&spec, &cfg, &topo, None).unwrap();
        assert_eq!(out[0].latency, DEFAULT_TRANSFER_LATENCY);
    }
}
