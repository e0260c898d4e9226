use super::{GraphPass, PassError, PassResult};
use crate::graph::{Graph, NodeId, OpKind};
use log::{debug, info};

/// Places a `Rescale` directly after every multiplicative node.
///
/// `AvgPool` is dispatched but left alone: its `1/k` multiply is not given
/// a chain step.
pub struct InsertRescale;

impl GraphPass for InsertRescale {
    fn name(&self) -> &'static str {
        "InsertRescale"
    }

    fn run_on_graph(&self, graph: &mut Graph) -> PassResult<bool> {
        let mut changed = false;
        for id in graph.ordered_ops() {
            let Some(kind) = graph.kind(id) else { continue };
            changed |= match kind {
                OpKind::Dot | OpKind::Multiply | OpKind::Convolution => {
                    ensure_rescale_after(graph, id)?
                }
                OpKind::AvgPool => {
                    check_single_output(graph, id)?;
                    debug!("rescale after {kind} {id} not implemented, skipping");
                    false
                }
                _ => false,
            };
        }
        Ok(changed)
    }
}

fn check_single_output(graph: &Graph, id: NodeId) -> PassResult<()> {
    let node = graph.node(id)?;
    if node.outputs != 1 {
        return Err(PassError::MultipleOutputs {
            node: id,
            kind: node.kind(),
            outputs: node.outputs,
        });
    }
    Ok(())
}

/// Makes one `Rescale` the sole consumer of `id`.
///
/// Reuses an existing `Rescale` consumer when there is one, so a node
/// handled by several rewrites never gets two. Returns whether anything
/// changed.
pub fn ensure_rescale_after(graph: &mut Graph, id: NodeId) -> PassResult<bool> {
    check_single_output(graph, id)?;
    let consumers = graph.consumers(id);
    let (rescales, others): (Vec<NodeId>, Vec<NodeId>) = consumers
        .into_iter()
        .partition(|&c| graph.kind(c) == Some(OpKind::Rescale));

    let Some((&keep, duplicates)) = rescales.split_first() else {
        let rescale = graph.rescale(id)?;
        graph.redirect_uses(id, rescale, &[rescale]);
        info!("inserted rescale {rescale} after {id}");
        return Ok(true);
    };

    let mut changed = false;
    for &dup in duplicates {
        graph.replace_node(dup, keep)?;
        changed = true;
    }
    for &other in &others {
        changed |= graph.redirect_consumer(other, id, keep)?;
    }
    if graph.is_result(id) {
        changed |= graph.redirect_uses(id, keep, &[keep]);
    }
    if changed {
        info!("routed consumers of {id} through rescale {keep}");
    }
    Ok(changed)
}
