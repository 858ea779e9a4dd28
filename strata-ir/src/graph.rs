//! Flow graph construction and analysis over implementation bodies:
//! - Reachability pruning and predecessor links
//! - Dominator tree
//! - Natural loop detection and reducibility

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use crate::ir::{BlockId, Implementation};

/// Removes blocks that cannot be reached from the entry block.
///
/// Returns the number of blocks removed.
pub fn prune_unreachable_blocks(imp: &mut Implementation) -> usize {
    let Some(entry) = imp.entry() else {
        return 0;
    };

    let mut reachable = HashSet::new();
    let mut worklist = VecDeque::from([entry]);
    while let Some(id) = worklist.pop_front() {
        if !reachable.insert(id) {
            continue;
        }
        if let Some(block) = imp.block(id) {
            worklist.extend(block.successors().iter().copied());
        }
    }

    let before = imp.blocks.len();
    imp.blocks.retain(|b| reachable.contains(&b.id));
    before - imp.blocks.len()
}

/// Recomputes `Block::predecessors` from the `Goto` targets.
pub fn compute_predecessors(imp: &mut Implementation) {
    let mut preds: BTreeMap<BlockId, Vec<BlockId>> = BTreeMap::new();
    for block in &imp.blocks {
        for &succ in block.successors() {
            let entry = preds.entry(succ).or_default();
            if !entry.contains(&block.id) {
                entry.push(block.id);
            }
        }
    }
    for block in &mut imp.blocks {
        block.predecessors = preds.remove(&block.id).unwrap_or_default();
    }
}

/// Control flow graph of one implementation.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    pub entry: BlockId,
    pub successors: BTreeMap<BlockId, Vec<BlockId>>,
    pub predecessors: BTreeMap<BlockId, Vec<BlockId>>,
    /// Immediate dominator of every reachable block except the entry.
    pub idom: BTreeMap<BlockId, BlockId>,
    pub rpo: Vec<BlockId>,
    pub post_order: Vec<BlockId>,
    loops: Option<LoopInfo>,
}

#[derive(Debug, Clone)]
struct LoopInfo {
    /// Natural loops: header -> blocks in the loop (header included).
    bodies: BTreeMap<BlockId, BTreeSet<BlockId>>,
    reducible: bool,
}

impl FlowGraph {
    /// Builds the graph. Returns `None` for an implementation without blocks.
    pub fn build(imp: &Implementation) -> Option<Self> {
        let entry = imp.entry()?;
        let mut graph = FlowGraph {
            entry,
            successors: BTreeMap::new(),
            predecessors: BTreeMap::new(),
            idom: BTreeMap::new(),
            rpo: Vec::new(),
            post_order: Vec::new(),
            loops: None,
        };

        for block in &imp.blocks {
            graph.predecessors.entry(block.id).or_default();
            graph.successors.insert(block.id, Vec::new());
        }

        for block in &imp.blocks {
            let succs: Vec<BlockId> = block
                .successors()
                .iter()
                .copied()
                .filter(|s| graph.successors.contains_key(s))
                .collect();
            for &succ in &succs {
                graph.predecessors.entry(succ).or_default().push(block.id);
            }
            graph.successors.insert(block.id, succs);
        }

        graph.compute_post_order();
        graph.compute_dominators();
        Some(graph)
    }

    fn compute_post_order(&mut self) {
        let mut visited = HashSet::new();
        let mut post_order = Vec::new();
        // (block, index of the next successor to visit)
        let mut stack = vec![(self.entry, 0usize)];
        visited.insert(self.entry);

        while let Some((block, next)) = stack.last_mut() {
            let block = *block;
            if let Some(&succ) = self.successors[&block].get(*next) {
                *next += 1;
                if visited.insert(succ) {
                    stack.push((succ, 0));
                }
            } else {
                post_order.push(block);
                stack.pop();
            }
        }

        self.rpo = post_order.iter().rev().copied().collect();
        self.post_order = post_order;
    }

    fn compute_dominators(&mut self) {
        let rpo_index: BTreeMap<BlockId, usize> =
            self.rpo.iter().enumerate().map(|(i, &b)| (b, i)).collect();

        let mut doms: BTreeMap<BlockId, BlockId> = BTreeMap::new();
        doms.insert(self.entry, self.entry);

        let mut changed = true;
        while changed {
            changed = false;

            for &block in &self.rpo {
                if block == self.entry {
                    continue;
                }

                let mut new_idom: Option<BlockId> = None;
                for &pred in &self.predecessors[&block] {
                    if !doms.contains_key(&pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(pred, current, &doms, &rpo_index),
                    });
                }

                if let Some(idom) = new_idom
                    && doms.get(&block) != Some(&idom)
                {
                    doms.insert(block, idom);
                    changed = true;
                }
            }
        }

        doms.remove(&self.entry);
        self.idom = doms;
    }

    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return true;
        }
        let mut current = b;
        while let Some(&dom) = self.idom.get(&current) {
            if dom == a {
                return true;
            }
            current = dom;
        }
        false
    }

    /// Finds natural loops and checks reducibility.
    pub fn compute_loops(&mut self) {
        let mut bodies: BTreeMap<BlockId, BTreeSet<BlockId>> = BTreeMap::new();
        let mut reducible = true;

        for (source, target) in self.retreating_edges() {
            if !self.dominates(target, source) {
                // The loop can be entered without passing through `target`.
                reducible = false;
                continue;
            }

            let body = bodies.entry(target).or_default();
            body.insert(target);
            let mut worklist = VecDeque::new();
            if body.insert(source) {
                worklist.push_back(source);
            }
            while let Some(block) = worklist.pop_front() {
                for &pred in &self.predecessors[&block] {
                    if self.idom.contains_key(&pred) || pred == self.entry {
                        if body.insert(pred) {
                            worklist.push_back(pred);
                        }
                    }
                }
            }
        }

        self.loops = Some(LoopInfo { bodies, reducible });
    }

    /// Edges whose target is on the depth-first stack when they are explored.
    fn retreating_edges(&self) -> Vec<(BlockId, BlockId)> {
        let mut edges = Vec::new();
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        let mut stack = vec![(self.entry, 0usize)];
        visited.insert(self.entry);
        on_stack.insert(self.entry);

        while let Some((block, next)) = stack.last_mut() {
            let block = *block;
            if let Some(&succ) = self.successors[&block].get(*next) {
                *next += 1;
                if on_stack.contains(&succ) {
                    edges.push((block, succ));
                } else if visited.insert(succ) {
                    on_stack.insert(succ);
                    stack.push((succ, 0));
                }
            } else {
                on_stack.remove(&block);
                stack.pop();
            }
        }
        edges
    }

    /// Loop headers, in block id order. Empty until `compute_loops` runs.
    pub fn headers(&self) -> Vec<BlockId> {
        self.loops
            .as_ref()
            .map(|l| l.bodies.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn loop_body(&self, header: BlockId) -> Option<&BTreeSet<BlockId>> {
        self.loops.as_ref()?.bodies.get(&header)
    }

    /// `true` until `compute_loops` finds a loop with more than one entry.
    pub fn is_reducible(&self) -> bool {
        self.loops.as_ref().is_none_or(|l| l.reducible)
    }
}

fn intersect(
    b1: BlockId,
    b2: BlockId,
    doms: &BTreeMap<BlockId, BlockId>,
    rpo_index: &BTreeMap<BlockId, usize>,
) -> BlockId {
    let idx = |b: BlockId| rpo_index.get(&b).copied().unwrap_or(usize::MAX);

    let mut finger1 = b1;
    let mut finger2 = b2;
    while finger1 != finger2 {
        while idx(finger1) > idx(finger2) {
            match doms.get(&finger1) {
                Some(&dom) if dom != finger1 => finger1 = dom,
                _ => return finger2,
            }
        }
        while idx(finger2) > idx(finger1) {
            match doms.get(&finger2) {
                Some(&dom) if dom != finger2 => finger2 = dom,
                _ => return finger1,
            }
        }
    }
    finger1
}
