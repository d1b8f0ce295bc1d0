//! SwiGLU feed-forward block: matmul tile → SiLU activation → gate multiply.
//! A plain linear chain, same shape as `attention_block` but shorter.

use crate::config::Config;
use crate::descriptor::{CommandDescriptor, CommandKind, Target};
use crate::topology::Topology;

use super::{Operator, OperatorKind};

const ROWS: i32 = 256;
const COLS: i32 = 256;
const K: i32 = 256;

pub fn swiglu_block(_config: &Config, topology: &Topology) -> Operator {
    let pe = topology.digital_pe(0, 0);

    let matmul = CommandDescriptor::new(0, CommandKind::PeMatmulTile, Target::Digital)
        .with_unit(pe.chiplet, pe.pe_index)
        .with_shape(ROWS, COLS, K);

    let silu = CommandDescriptor::new(1, CommandKind::PeElementwise, Target::Digital)
        .with_unit(pe.chiplet, pe.pe_index)
        .depend_on(0)
        .with_meta("stage", "silu");

    let gate = CommandDescriptor::new(2, CommandKind::PeElementwise, Target::Digital)
        .with_unit(pe.chiplet, pe.pe_index)
        .depend_on(1)
        .with_meta("stage", "gate_multiply");

    Operator::new(OperatorKind::SwiGlu, vec![matmul, silu, gate], vec![0], vec![2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_chain() {
        let cfg = Config::default();
        let topo = Topology::from_config(&cfg);
        let op = swiglu_block(&cfg, &topo);
        assert_eq!(op.commands.len(), 3);
        assert_eq!(op.commands[0].kind, CommandKind::PeMatmulTile);
        assert_eq!(op.commands[1].dependencies, vec![0]);
        assert_eq!(op.commands[2].dependencies, vec![1]);
    }
}
