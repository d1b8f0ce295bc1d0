//! `transformer_block` composes attention + MoE + SwiGlu into one operator;
//! `transformer_pipeline(n)` chains `n` of those head-to-tail and returns
//! the flat emission form directly (it is terminal — not composable again).

use crate::composer::{compose, compose_to_operator};
use crate::config::Config;
use crate::descriptor::CommandDescriptor;
use crate::error::ComposerError;
use crate::topology::Topology;

use super::{attention_block, moe_gating_block, swiglu_block, Operator, OperatorKind};

pub fn transformer_block(config: &Config, topology: &Topology) -> Result<Operator, ComposerError> {
    let attn = attention_block(config, topology);
    let moe = moe_gating_block(config, topology);
    let swiglu = swiglu_block(config, topology);
    compose_to_operator(OperatorKind::Transformer, vec![attn, moe, swiglu])
}

/// Compose `n` transformer blocks head-to-tail. `n == 0` emits zero
/// commands.
pub fn transformer_pipeline(
    n: usize,
    config: &Config,
    topology: &Topology,
) -> Result<Vec<CommandDescriptor>, ComposerError> {
    if n == 0 {
        return Ok(Vec::new());
    }
    let mut blocks = Vec::with_capacity(n);
    for _ in 0..n {
        blocks.push(transformer_block(config, topology)?);
    }
    compose(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_blocks_emits_nothing() {
        let cfg = Config::default();
        let topo = Topology::from_config(&cfg);
        let out = transformer_pipeline(0, &cfg, &topo).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn six_blocks_chain_head_to_tail() {
        let cfg = Config::default();
        let topo = Topology::from_config(&cfg);
        let single = transformer_block(&cfg, &topo).unwrap().len();
        let out = transformer_pipeline(6, &cfg, &topo).unwrap();
        assert_eq!(out.len(), single * 6);
        for (i, cmd) in out.iter().enumerate() {
            assert_eq!(cmd.id, i as i32);
            for &dep in &cmd.dependencies {
                assert!(dep < cmd.id);
            }
        }
    }
}
