//! The Composer: concatenates a sequence of local-scope [`Operator`]s into
//! one globally-ordered command vector, rebasing ids and stitching
//! boundary edges so the result is itself a valid sub-DAG (and, via
//! [`compose_to_operator`], composable again).

use crate::descriptor::CommandDescriptor;
use crate::error::ComposerError;
use crate::id_alloc::rebase;
use crate::operators::{Operator, OperatorKind};

/// Compose operators into a flat command vector ready for emission.
///
/// `Compose(A)` is the identity up to rebase: a single operator is just
/// rebased to start at 0 (a no-op, since operators already start at 0) with
/// no boundary stitching. `Compose(A, B, C)` is associative: grouping the
/// operators differently before composing yields the same command vector.
pub fn compose(operators: Vec<Operator>) -> Result<Vec<CommandDescriptor>, ComposerError> {
    let mut out: Vec<CommandDescriptor> = Vec::new();
    let mut offset: i32 = 0;
    let mut prev_outputs_global: Vec<i32> = Vec::new();

    for (i, op) in operators.into_iter().enumerate() {
        let shift = rebase(offset);
        let local_inputs = op.inputs.clone();

        let mut rebased: Vec<CommandDescriptor> = op
            .commands
            .into_iter()
            .map(|mut cmd| {
                let local_id = cmd.id;
                cmd.id = shift(cmd.id);
                cmd.dependencies = cmd.dependencies.into_iter().map(&shift).collect();
                if i > 0 {
                    let is_input = if local_inputs.is_empty() {
                        local_id == 0
                    } else {
                        local_inputs.contains(&local_id)
                    };
                    if is_input {
                        cmd.dependencies = dedup_preserve_order(
                            cmd.dependencies
                                .iter()
                                .copied()
                                .chain(prev_outputs_global.iter().copied()),
                        );
                    }
                }
                cmd
            })
            .collect();

        let count = rebased.len();
        if (offset as i64) + (count as i64) > i32::MAX as i64 {
            return Err(ComposerError::IdOverflow {
                count: out.len() + count,
            });
        }

        prev_outputs_global = op.outputs.iter().map(|&id| shift(id)).collect();

        out.append(&mut rebased);
        offset += count as i32;
    }

    for cmd in &out {
        for &dep in &cmd.dependencies {
            if dep >= cmd.id {
                return Err(ComposerError::DanglingDependency {
                    id: cmd.id,
                    dep,
                    offset,
                });
            }
        }
    }

    Ok(out)
}

/// Compose operators but keep the result as an `Operator` (rather than a
/// bare command vector) so it can itself be an input to a further compose
/// call. Inputs are the first composed operator's inputs; outputs are the
/// last composed operator's outputs (rebased).
pub fn compose_to_operator(
    kind: OperatorKind,
    operators: Vec<Operator>,
) -> Result<Operator, ComposerError> {
    let first_inputs = operators.first().map(|o| o.inputs.clone()).unwrap_or_default();
    let last_len_before_last: i32 = operators[..operators.len().saturating_sub(1)]
        .iter()
        .map(|o| o.len() as i32)
        .sum();
    let last_outputs_local: Vec<i32> = operators
        .last()
        .map(|o| o.outputs.clone())
        .unwrap_or_default();
    let outputs: Vec<i32> = last_outputs_local
        .into_iter()
        .map(|id| id + last_len_before_last)
        .collect();

    let commands = compose(operators)?;
    Ok(Operator::new(kind, commands, first_inputs, outputs))
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
    use crate::config::Config;
    use crate::operators::{attention_block, moe_gating_block, swiglu_block};
    use crate::topology::Topology;

    #[test]
    fn compose_single_operator_is_identity_up_to_rebase() {
        let cfg = Config::default();
        let topo = Topology::from_config(&cfg);
        let op = attention_block(&cfg, &topo);
        let expected = op.commands.clone();
        let out = compose(vec![op]).unwrap();
        assert_eq!(out, expected);
    }

    #[test]
    fn compose_three_blocks_scenario_b() {
        let cfg = Config::default();
        let topo = Topology::from_config(&cfg);
        let attn = attention_block(&cfg, &topo);
        let moe = moe_gating_block(&cfg, &topo);
        let swiglu = swiglu_block(&cfg, &topo);

        let a = attn.len();
        let m = moe.len();
        let s = swiglu.len();

        let out = compose(vec![attn, moe, swiglu]).unwrap();
        assert_eq!(out.len(), a + m + s);
        assert!(out[a].dependencies.contains(&(a as i32 - 1)));
        assert!(out[a + m].dependencies.contains(&(a as i32 + m as i32 - 1)));
    }

    #[test]
    fn compose_is_associative() {
        let cfg = Config::default();
        let topo = Topology::from_config(&cfg);

        // Compose(Compose(A, B), C)
        let a1 = attention_block(&cfg, &topo);
        let b1 = moe_gating_block(&cfg, &topo);
        let c1 = swiglu_block(&cfg, &topo);
        let ab = compose_to_operator(OperatorKind::Custom, vec![a1, b1]).unwrap();
        let left = compose(vec![ab, c1]).unwrap();

        // Compose(A, Compose(B, C))
        let a2 = attention_block(&cfg, &topo);
        let b2 = moe_gating_block(&cfg, &topo);
        let c2 = swiglu_block(&cfg, &topo);
        let bc = compose_to_operator(OperatorKind::Custom, vec![b2, c2]).unwrap();
        let right = compose(vec![a2, bc]).unwrap();

        assert_eq!(left, right);
    }
}
