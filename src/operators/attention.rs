//! Single attention head: token prep → attention → softmax fold →
//! projection/residual, a straight-line chain on one digital PE.

use crate::config::Config;
use crate::descriptor::{CommandDescriptor, CommandKind, Target};
use crate::topology::Topology;

use super::{Operator, OperatorKind};

/// Default token/feature/head shapes used by the built-in benchmark. A
/// model-spec stage overrides these per-instance (§ model-spec compiler).
const TOKENS: i32 = 256;
const FEATURES: i32 = 256;
const ATTN_ROWS: i32 = 256;
const ATTN_COLS: i32 = 256;
const ATTN_K: i32 = 128;
const REDUCE_DIM: i32 = 128;

pub fn attention_block(_config: &Config, topology: &Topology) -> Operator {
    let pe = topology.digital_pe(0, 0);
    let mut commands = Vec::with_capacity(4);

    let prep = CommandDescriptor::new(0, CommandKind::PeTokenPrep, Target::Digital)
        .with_unit(pe.chiplet, pe.pe_index)
        .with_shape(TOKENS, FEATURES, 0);
    commands.push(prep);

    let head = CommandDescriptor::new(1, CommandKind::PeAttentionHead, Target::Digital)
        .with_unit(pe.chiplet, pe.pe_index)
        .with_shape(ATTN_ROWS, ATTN_COLS, ATTN_K)
        .depend_on(0);
    commands.push(head);

    let softmax = CommandDescriptor::new(2, CommandKind::PeReduce, Target::Digital)
        .with_unit(pe.chiplet, pe.pe_index)
        .with_shape(REDUCE_DIM, REDUCE_DIM, 0)
        .depend_on(1)
        .with_meta("stage", "softmax_fold");
    commands.push(softmax);

    let project = CommandDescriptor::new(3, CommandKind::PeElementwise, Target::Digital)
        .with_unit(pe.chiplet, pe.pe_index)
        .depend_on(2)
        .with_meta("stage", "project_add_residual");
    commands.push(project);

    Operator::new(OperatorKind::Attention, commands, vec![0], vec![3])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attention_sequencing() {
        let cfg = Config::default();
        let topo = Topology::from_config(&cfg);
        let op = attention_block(&cfg, &topo);

        assert!(op.commands.len() >= 4);
        assert_eq!(op.commands[0].kind, CommandKind::PeTokenPrep);
        for (i, cmd) in op.commands.iter().enumerate().skip(1) {
            assert!(cmd.dependencies.contains(&((i - 1) as i32)));
        }
        assert!(!op.commands.last().unwrap().dependencies.is_empty());
    }
}
