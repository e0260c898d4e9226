use super::PassResult;
use crate::graph::{Graph, Match, Matcher};
use log::debug;

/// Rewrite applied to a successful match. Returning `Ok(false)` declines
/// the match and lets the remaining matchers try the same root.
pub type Callback = fn(&mut Graph, &Match) -> PassResult<bool>;

/// Matcher/callback pairs tried against every live node in topological
/// order.
#[derive(Default)]
pub struct GraphRewrite {
    matchers: Vec<(Matcher, Callback)>,
}

impl GraphRewrite {
    pub fn add_matcher(&mut self, matcher: Matcher, callback: Callback) {
        self.matchers.push((matcher, callback));
    }

    pub fn run(&self, graph: &mut Graph) -> PassResult<bool> {
        let mut changed = false;
        for id in graph.ordered_ops() {
            for (matcher, callback) in &self.matchers {
                if !graph.is_live(id) {
                    break;
                }
                let Some(m) = matcher.match_root(graph, id) else {
                    continue;
                };
                debug!("{} matched at {id}", matcher.name());
                if callback(graph, &m)? {
                    changed = true;
                    break;
                }
            }
        }
        Ok(changed)
    }
}
