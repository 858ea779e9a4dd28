//! Injection of disjointness assumptions over linear permissions.
//!
//! At a program point, every linear variable in scope at the configured layer
//! is partitioned by ownership domain, and for every domain a predicate stating
//! that the permissions of its variables do not overlap is synthesized.
//! [`PermissionInstrumenter::add_disjointness_assumptions`] assumes these
//! predicates after every parallel call and at the top of every loop header.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use strata_ir::{
    BlockId, Cmd, CmdId, Expr, FlowGraph, IdGen, Implementation, LinearKind, Node, Procedure, Span,
    VarId, compute_predecessors, prune_unreachable_blocks,
};

use crate::checker::CivlTypeChecker;
use crate::config::InstrumentSettings;
use crate::error::InstrumentError;
use crate::linear::DomainId;
use crate::node_map::NodeMap;

/// Where linear scope is resolved. Entry points carry their declaration so
/// that the parameter list is at hand when the node map has no original for
/// them; flow points are resolved through the availability table.
#[derive(Clone, Copy, Debug)]
pub enum ProgramPoint<'p> {
    Procedure(&'p Procedure),
    Implementation(&'p Implementation),
    Block(BlockId),
    Cmd(CmdId),
}

impl ProgramPoint<'_> {
    pub fn node(&self) -> Node {
        match self {
            ProgramPoint::Procedure(proc) => Node::Procedure(proc.id),
            ProgramPoint::Implementation(imp) => Node::Implementation(imp.id),
            ProgramPoint::Block(id) => Node::Block(*id),
            ProgramPoint::Cmd(id) => Node::Cmd(*id),
        }
    }
}

pub struct PermissionInstrumenter<'a> {
    checker: &'a CivlTypeChecker,
    node_map: &'a NodeMap,
    settings: InstrumentSettings,
}

impl<'a> PermissionInstrumenter<'a> {
    pub fn new(checker: &'a CivlTypeChecker, node_map: &'a NodeMap, settings: InstrumentSettings) -> Self {
        Self {
            checker,
            node_map,
            settings,
        }
    }

    pub fn settings(&self) -> &InstrumentSettings {
        &self.settings
    }

    /// Assumptions over the parameters owned at entry to (`at_entry`) or exit
    /// from `proc`.
    pub fn proc_disjointness_assume_cmds(
        &self,
        proc: &Procedure,
        at_entry: bool,
        ids: &mut IdGen,
    ) -> Vec<Cmd> {
        let vars: Vec<VarId> = if at_entry {
            self.filter_in_params(&proc.ins)
        } else {
            let mut params = proc.ins.clone();
            params.extend(proc.outs.iter().filter(|v| !proc.ins.contains(v)));
            self.filter_in_out_params(&params)
        };
        self.assume_cmds(self.domain_disjointness(vars), proc.span, ids)
    }

    pub fn disjointness_assume_cmds(
        &self,
        point: ProgramPoint<'_>,
        add_globals: bool,
        span: Span,
        ids: &mut IdGen,
    ) -> Vec<Cmd> {
        let vars = self.available_vars(point, add_globals);
        self.assume_cmds(self.domain_disjointness(vars), span, ids)
    }

    pub fn disjointness_exprs(&self, point: ProgramPoint<'_>, add_globals: bool) -> Vec<Expr> {
        let vars = self.available_vars(point, add_globals);
        self.domain_disjointness(vars).into_values().collect()
    }

    /// Union of the permissions held at `point` for every domain, globals
    /// included. Domains with nothing in scope map to the empty union.
    pub fn permission_exprs(&self, point: ProgramPoint<'_>) -> BTreeMap<DomainId, Expr> {
        let linear = self.checker.linear();
        self.partition(self.available_vars(point, true))
            .into_iter()
            .map(|(domain, scope)| {
                let perms = linear.permission_exprs(domain, &scope);
                (domain, linear.union_expr(domain, perms))
            })
            .collect()
    }

    /// Assumes disjointness after every parallel call and at every loop
    /// header of `imp`.
    ///
    /// Parallel calls are rewritten before the flow graph is examined, so an
    /// irreducible graph leaves them instrumented while no header is.
    /// Running this twice inserts the assumptions twice.
    pub fn add_disjointness_assumptions(
        &self,
        imp: &mut Implementation,
        ids: &mut IdGen,
    ) -> Result<(), InstrumentError> {
        let mut after_calls = 0;
        for block in &mut imp.blocks {
            let mut cmds = Vec::with_capacity(block.cmds.len());
            for cmd in std::mem::take(&mut block.cmds) {
                let par_call = cmd.is_par_call().then_some((cmd.id, cmd.span));
                cmds.push(cmd);
                if let Some((id, span)) = par_call {
                    let assumes = self.disjointness_assume_cmds(ProgramPoint::Cmd(id), true, span, ids);
                    after_calls += assumes.len();
                    cmds.extend(assumes);
                }
            }
            block.cmds = cmds;
        }

        prune_unreachable_blocks(imp);
        compute_predecessors(imp);
        let Some(mut graph) = FlowGraph::build(imp) else {
            return Ok(());
        };
        graph.compute_loops();
        if !graph.is_reducible() {
            return Err(InstrumentError::IrreducibleFlowGraph {
                implementation: imp.name.clone(),
                span: imp.span,
            });
        }

        let mut at_headers = 0;
        for header in graph.headers() {
            let Some(block) = imp.block_mut(header) else {
                continue;
            };
            let mut cmds = self.disjointness_assume_cmds(ProgramPoint::Block(header), true, block.span, ids);
            tracing::trace!(block = %block.label, assumes = cmds.len(), "loop header");
            at_headers += cmds.len();
            cmds.append(&mut block.cmds);
            block.cmds = cmds;
        }

        tracing::debug!(
            implementation = %imp.name,
            layer = self.settings.layer,
            after_calls,
            at_headers,
            "disjointness assumptions added"
        );
        Ok(())
    }

    fn assume_cmds(
        &self,
        exprs: BTreeMap<DomainId, Expr>,
        span: Span,
        ids: &mut IdGen,
    ) -> Vec<Cmd> {
        exprs
            .into_values()
            .map(|e| Cmd::assume(ids.fresh_cmd(), span, e))
            .collect()
    }

    fn available_vars(&self, point: ProgramPoint<'_>, add_globals: bool) -> Vec<VarId> {
        let mut vars = self.available_linear_local_vars(point);
        if add_globals {
            for g in self.linear_global_vars() {
                if !vars.contains(&g) {
                    vars.push(g);
                }
            }
        }
        vars
    }

    /// Splits `vars` by domain after renaming. Every domain gets an entry,
    /// possibly empty.
    fn partition(&self, vars: Vec<VarId>) -> BTreeMap<DomainId, BTreeSet<VarId>> {
        let linear = self.checker.linear();
        let mut scopes: BTreeMap<DomainId, BTreeSet<VarId>> =
            linear.domains().map(|d| (d, BTreeSet::new())).collect();
        for v in vars {
            match linear.find_domain(v) {
                Some(domain) => {
                    scopes.entry(domain).or_default().insert(self.map_variable(v));
                }
                None => tracing::warn!(var = v.0, "linear variable without a domain skipped"),
            }
        }
        scopes
    }

    /// Non-trivial disjointness predicate per domain.
    fn domain_disjointness(&self, vars: Vec<VarId>) -> BTreeMap<DomainId, Expr> {
        let linear = self.checker.linear();
        let mut out = BTreeMap::new();
        for (domain, scope) in self.partition(vars) {
            let mut perms = linear.permission_exprs(domain, &scope);
            if let Some(&hole) = self.settings.hole_vars.get(&domain) {
                perms.push(Expr::Var(hole));
            }
            let expr = linear.disjointness_expr(domain, perms);
            if !expr.is_true() {
                out.insert(domain, expr);
            }
        }
        out
    }

    fn available_linear_local_vars(&self, point: ProgramPoint<'_>) -> Vec<VarId> {
        match point {
            ProgramPoint::Procedure(proc) => self.entry_vars(point.node(), &proc.ins),
            ProgramPoint::Implementation(imp) => self.entry_vars(point.node(), &imp.ins),
            ProgramPoint::Block(_) | ProgramPoint::Cmd(_) => {
                let original = self.node_map.original_or_input(point.node());
                self.checker
                    .linear()
                    .available_linear_vars(original)
                    .filter(|&v| {
                        !self.checker.is_global(v)
                            && self.checker.local_layer_range(v).contains(self.settings.layer)
                    })
                    .collect()
            }
        }
    }

    /// In-parameters of the original declaration, or of `ins` when `node` was
    /// never mapped to one the checker knows.
    fn entry_vars(&self, node: Node, ins: &[VarId]) -> Vec<VarId> {
        let original = self
            .node_map
            .get(node)
            .and_then(|original| self.checker.signature(original));
        match original {
            Some(sig) => self.filter_in_params(&sig.ins),
            None => self.filter_in_params(ins),
        }
    }

    fn filter_in_params(&self, params: &[VarId]) -> Vec<VarId> {
        self.filter(params, |k| matches!(k, LinearKind::Linear | LinearKind::LinearIn))
    }

    fn filter_in_out_params(&self, params: &[VarId]) -> Vec<VarId> {
        self.filter(params, |k| matches!(k, LinearKind::Linear | LinearKind::LinearOut))
    }

    fn filter(&self, params: &[VarId], pred: impl Fn(LinearKind) -> bool) -> Vec<VarId> {
        params
            .iter()
            .copied()
            .filter(|&v| {
                pred(self.checker.linear_kind(v))
                    && self.checker.local_layer_range(v).contains(self.settings.layer)
            })
            .collect()
    }

    fn linear_global_vars(&self) -> Vec<VarId> {
        self.checker
            .global_vars()
            .iter()
            .copied()
            .filter(|&v| {
                self.checker.linear_kind(v) == LinearKind::Linear
                    && self.checker.global_layer_range(v).contains(self.settings.layer)
            })
            .collect()
    }

    fn map_variable(&self, v: VarId) -> VarId {
        self.settings.var_map.get(&v).copied().unwrap_or(v)
    }
}
