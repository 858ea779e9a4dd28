#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use miette::SourceSpan;

pub type Span = SourceSpan;

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImplId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CmdId(pub u32);

pub type Layer = u32;

/// Closed interval of layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayerRange {
    pub lower: Layer,
    pub upper: Layer,
}

impl LayerRange {
    pub fn new(lower: Layer, upper: Layer) -> Self {
        Self { lower, upper }
    }

    pub fn single(layer: Layer) -> Self {
        Self::new(layer, layer)
    }

    pub fn contains(&self, layer: Layer) -> bool {
        self.lower <= layer && layer <= self.upper
    }

    pub fn is_empty(&self) -> bool {
        self.lower > self.upper
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum LinearKind {
    #[default]
    None,
    Linear,
    LinearIn,
    LinearOut,
}

impl LinearKind {
    pub fn is_linear(self) -> bool {
        !matches!(self, LinearKind::None)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VarScope {
    Global,
    Local,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Bool,
    Int,
    Named(String),
    Map(Box<Type>, Box<Type>),
}

#[derive(Clone, Debug)]
pub struct Variable {
    pub name: String,
    pub ty: Type,
    pub scope: VarScope,
    pub linear: LinearKind,
    /// Ownership domain, required for linear variables.
    pub domain: Option<String>,
    /// Declared `{:layer}` range; `None` falls back to the checker's default.
    pub layers: Option<LayerRange>,
    pub span: Span,
}

impl Variable {
    pub fn global(name: impl Into<String>, ty: Type) -> Self {
        Self::new(name, ty, VarScope::Global)
    }

    pub fn local(name: impl Into<String>, ty: Type) -> Self {
        Self::new(name, ty, VarScope::Local)
    }

    fn new(name: impl Into<String>, ty: Type, scope: VarScope) -> Self {
        Self {
            name: name.into(),
            ty,
            scope,
            linear: LinearKind::None,
            domain: None,
            layers: None,
            span: span(0, 0),
        }
    }

    pub fn linear(mut self, kind: LinearKind, domain: impl Into<String>) -> Self {
        self.linear = kind;
        self.domain = Some(domain.into());
        self
    }

    pub fn at_layers(mut self, layers: LayerRange) -> Self {
        self.layers = Some(layers);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn is_global(&self) -> bool {
        self.scope == VarScope::Global
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    Lit(bool),
    Var(VarId),
    App { func: String, args: Vec<Expr> },
    Not(Box<Expr>),
    And(Vec<Expr>),
}

impl Expr {
    pub const TRUE: Expr = Expr::Lit(true);

    pub fn is_true(&self) -> bool {
        matches!(self, Expr::Lit(true))
    }

    pub fn app(func: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::App {
            func: func.into(),
            args,
        }
    }

    /// Conjunction that collapses the empty and singleton cases.
    pub fn and(mut parts: Vec<Expr>) -> Self {
        match parts.len() {
            0 => Expr::TRUE,
            1 => parts.remove(0),
            _ => Expr::And(parts),
        }
    }

    pub fn free_vars(&self) -> BTreeSet<VarId> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut BTreeSet<VarId>) {
        match self {
            Expr::Lit(_) => {}
            Expr::Var(v) => {
                out.insert(*v);
            }
            Expr::App { args, .. } | Expr::And(args) => {
                for arg in args {
                    arg.collect_vars(out);
                }
            }
            Expr::Not(inner) => inner.collect_vars(out),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallCmd {
    pub callee: ProcId,
    pub args: Vec<Expr>,
    pub outs: Vec<VarId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CmdKind {
    Assume(Expr),
    Assert(Expr),
    Assign { lhs: Vec<VarId>, rhs: Vec<Expr> },
    Havoc(Vec<VarId>),
    Call(CallCmd),
    /// Concurrent invocation of every arm.
    ParCall(Vec<CallCmd>),
}

#[derive(Clone, Debug)]
pub struct Cmd {
    pub id: CmdId,
    pub span: Span,
    pub kind: CmdKind,
}

impl Cmd {
    pub fn new(id: CmdId, span: Span, kind: CmdKind) -> Self {
        Self { id, span, kind }
    }

    pub fn assume(id: CmdId, span: Span, expr: Expr) -> Self {
        Self::new(id, span, CmdKind::Assume(expr))
    }

    pub fn is_par_call(&self) -> bool {
        matches!(self.kind, CmdKind::ParCall(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transfer {
    Goto(Vec<BlockId>),
    Return,
}

#[derive(Clone, Debug)]
pub struct Block {
    pub id: BlockId,
    pub label: String,
    pub cmds: Vec<Cmd>,
    pub transfer: Transfer,
    /// Filled in by `compute_predecessors`.
    pub predecessors: Vec<BlockId>,
    pub span: Span,
}

impl Block {
    pub fn new(id: BlockId, label: impl Into<String>, cmds: Vec<Cmd>, transfer: Transfer) -> Self {
        Self {
            id,
            label: label.into(),
            cmds,
            transfer,
            predecessors: Vec::new(),
            span: span(0, 0),
        }
    }

    pub fn successors(&self) -> &[BlockId] {
        match &self.transfer {
            Transfer::Goto(targets) => targets,
            Transfer::Return => &[],
        }
    }
}

#[derive(Clone, Debug)]
pub struct Procedure {
    pub id: ProcId,
    pub name: String,
    pub ins: Vec<VarId>,
    pub outs: Vec<VarId>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct Implementation {
    pub id: ImplId,
    pub proc: ProcId,
    pub name: String,
    pub ins: Vec<VarId>,
    pub outs: Vec<VarId>,
    pub locals: Vec<VarId>,
    /// The first block is the entry.
    pub blocks: Vec<Block>,
    pub span: Span,
}

impl Implementation {
    pub fn entry(&self) -> Option<BlockId> {
        self.blocks.first().map(|b| b.id)
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    /// Copies the implementation with fresh implementation, block, and command
    /// ids. Returns the copy together with `(copy, original)` node pairs.
    pub fn clone_with_fresh_ids(&self, ids: &mut IdGen) -> (Implementation, Vec<(Node, Node)>) {
        let new_id = ids.fresh_impl();
        let mut pairs = vec![(Node::Implementation(new_id), Node::Implementation(self.id))];

        let block_ids: BTreeMap<BlockId, BlockId> = self
            .blocks
            .iter()
            .map(|b| (b.id, ids.fresh_block()))
            .collect();
        let remap = |b: &BlockId| block_ids.get(b).copied().unwrap_or(*b);

        let mut blocks = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let id = remap(&block.id);
            pairs.push((Node::Block(id), Node::Block(block.id)));

            let mut cmds = Vec::with_capacity(block.cmds.len());
            for cmd in &block.cmds {
                let cmd_id = ids.fresh_cmd();
                pairs.push((Node::Cmd(cmd_id), Node::Cmd(cmd.id)));
                cmds.push(Cmd::new(cmd_id, cmd.span, cmd.kind.clone()));
            }

            let transfer = match &block.transfer {
                Transfer::Goto(targets) => Transfer::Goto(targets.iter().map(remap).collect()),
                Transfer::Return => Transfer::Return,
            };

            blocks.push(Block {
                id,
                label: block.label.clone(),
                cmds,
                transfer,
                predecessors: block.predecessors.iter().map(remap).collect(),
                span: block.span,
            });
        }

        let copy = Implementation {
            id: new_id,
            proc: self.proc,
            name: self.name.clone(),
            ins: self.ins.clone(),
            outs: self.outs.clone(),
            locals: self.locals.clone(),
            blocks,
            span: self.span,
        };
        (copy, pairs)
    }
}

/// A program point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Node {
    Procedure(ProcId),
    Implementation(ImplId),
    Block(BlockId),
    Cmd(CmdId),
}

#[derive(Clone, Default, Debug)]
pub struct IdGen {
    next_proc: u32,
    next_impl: u32,
    next_block: u32,
    next_cmd: u32,
}

impl IdGen {
    pub fn fresh_proc(&mut self) -> ProcId {
        let id = ProcId(self.next_proc);
        self.next_proc += 1;
        id
    }

    pub fn fresh_impl(&mut self) -> ImplId {
        let id = ImplId(self.next_impl);
        self.next_impl += 1;
        id
    }

    pub fn fresh_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        id
    }

    pub fn fresh_cmd(&mut self) -> CmdId {
        let id = CmdId(self.next_cmd);
        self.next_cmd += 1;
        id
    }

    pub fn cmd(&mut self, kind: CmdKind) -> Cmd {
        Cmd::new(self.fresh_cmd(), span(0, 0), kind)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Program {
    /// Indexed by `VarId`.
    pub vars: Vec<Variable>,
    pub globals: Vec<VarId>,
    pub procedures: BTreeMap<ProcId, Procedure>,
    pub implementations: BTreeMap<ImplId, Implementation>,
    pub ids: IdGen,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_var(&mut self, var: Variable) -> VarId {
        let id = VarId(self.vars.len() as u32);
        if var.is_global() {
            self.globals.push(id);
        }
        self.vars.push(var);
        id
    }

    pub fn var(&self, id: VarId) -> Option<&Variable> {
        self.vars.get(id.0 as usize)
    }

    pub fn add_procedure(
        &mut self,
        name: impl Into<String>,
        ins: Vec<VarId>,
        outs: Vec<VarId>,
    ) -> ProcId {
        let id = self.ids.fresh_proc();
        self.procedures.insert(
            id,
            Procedure {
                id,
                name: name.into(),
                ins,
                outs,
                span: span(0, 0),
            },
        );
        id
    }

    /// Adds an implementation of `proc` sharing its parameters.
    pub fn add_implementation(
        &mut self,
        proc: ProcId,
        locals: Vec<VarId>,
        blocks: Vec<Block>,
    ) -> Option<ImplId> {
        let decl = self.procedures.get(&proc)?;
        let (name, ins, outs, span) = (decl.name.clone(), decl.ins.clone(), decl.outs.clone(), decl.span);
        let id = self.ids.fresh_impl();
        self.implementations.insert(
            id,
            Implementation {
                id,
                proc,
                name,
                ins,
                outs,
                locals,
                blocks,
                span,
            },
        );
        Some(id)
    }

    pub fn procedure(&self, id: ProcId) -> Option<&Procedure> {
        self.procedures.get(&id)
    }

    pub fn implementation(&self, id: ImplId) -> Option<&Implementation> {
        self.implementations.get(&id)
    }

    pub fn find_var(&self, name: &str) -> Vec<VarId> {
        self.vars
            .iter()
            .enumerate()
            .filter(|(_, v)| v.name == name)
            .map(|(i, _)| VarId(i as u32))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_collapses_trivial_conjunctions() {
        assert_eq!(Expr::and(vec![]), Expr::TRUE);
        assert_eq!(Expr::and(vec![Expr::Var(VarId(3))]), Expr::Var(VarId(3)));
        assert!(matches!(
            Expr::and(vec![Expr::Var(VarId(0)), Expr::Var(VarId(1))]),
            Expr::And(parts) if parts.len() == 2
        ));
    }

    #[test]
    fn free_vars_walks_nested_applications() {
        let e = Expr::and(vec![
            Expr::app("f", vec![Expr::Var(VarId(1)), Expr::Lit(false)]),
            Expr::Not(Box::new(Expr::Var(VarId(4)))),
        ]);
        assert_eq!(e.free_vars().into_iter().collect::<Vec<_>>(), vec![VarId(1), VarId(4)]);
    }

    #[test]
    fn layer_range_is_closed() {
        let r = LayerRange::new(1, 3);
        assert!(!r.contains(0));
        assert!(r.contains(1));
        assert!(r.contains(3));
        assert!(!r.contains(4));
        assert!(LayerRange::new(2, 1).is_empty());
    }

    #[test]
    fn clone_with_fresh_ids_remaps_blocks_and_commands() {
        let mut program = Program::new();
        let p = program.add_procedure("p", vec![], vec![]);
        let b0 = program.ids.fresh_block();
        let b1 = program.ids.fresh_block();
        let c0 = program.ids.cmd(CmdKind::Assume(Expr::TRUE));
        let c0_id = c0.id;
        let blocks = vec![
            Block::new(b0, "entry", vec![c0], Transfer::Goto(vec![b1])),
            Block::new(b1, "exit", vec![], Transfer::Return),
        ];
        let imp = program.add_implementation(p, vec![], blocks).unwrap();

        let original = program.implementations[&imp].clone();
        let (copy, pairs) = original.clone_with_fresh_ids(&mut program.ids);

        assert_ne!(copy.id, original.id);
        assert_eq!(copy.blocks.len(), 2);
        assert_ne!(copy.blocks[0].id, b0);
        assert_eq!(copy.blocks[0].successors(), &[copy.blocks[1].id]);
        assert!(pairs.contains(&(Node::Implementation(copy.id), Node::Implementation(imp))));
        assert!(pairs.contains(&(Node::Cmd(copy.blocks[0].cmds[0].id), Node::Cmd(c0_id))));
        assert!(pairs.contains(&(Node::Block(copy.blocks[1].id), Node::Block(b1))));
    }
}
