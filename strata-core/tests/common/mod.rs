#![allow(dead_code)]

use std::collections::BTreeSet;

use strata_core::{CivlTypeChecker, InstrumentError, InstrumentSettings, NodeMap, PermissionInstrumenter};
use strata_ir::{
    Block, BlockId, CallCmd, Cmd, CmdKind, Expr, ImplId, LinearKind, ProcId, Program, Transfer, Type, VarId,
    Variable,
};

/// Two linear parameters `x`, `y` and a linear global `g`, all in domain `perm`.
pub struct World {
    pub program: Program,
    pub x: VarId,
    pub y: VarId,
    pub g: VarId,
    /// `worker()`: no parameters.
    pub worker: ProcId,
    /// `main(x, y)`.
    pub main: ProcId,
}

pub fn world() -> World {
    let mut program = Program::new();
    let x = program.add_var(Variable::local("x", Type::Int).linear(LinearKind::Linear, "perm"));
    let y = program.add_var(Variable::local("y", Type::Int).linear(LinearKind::Linear, "perm"));
    let g = program.add_var(Variable::global("g", Type::Int).linear(LinearKind::Linear, "perm"));
    let worker = program.add_procedure("worker", vec![], vec![]);
    let main = program.add_procedure("main", vec![x, y], vec![]);
    World {
        program,
        x,
        y,
        g,
        worker,
        main,
    }
}

pub fn assume_true(program: &mut Program) -> Cmd {
    program.ids.cmd(CmdKind::Assume(Expr::TRUE))
}

pub fn assert_true(program: &mut Program) -> Cmd {
    program.ids.cmd(CmdKind::Assert(Expr::TRUE))
}

pub fn call(callee: ProcId, args: Vec<VarId>) -> CallCmd {
    CallCmd {
        callee,
        args: args.into_iter().map(Expr::Var).collect(),
        outs: vec![],
    }
}

pub fn par_call(program: &mut Program, calls: Vec<CallCmd>) -> Cmd {
    program.ids.cmd(CmdKind::ParCall(calls))
}

pub fn block(id: BlockId, label: &str, cmds: Vec<Cmd>, succs: &[BlockId]) -> Block {
    let transfer = if succs.is_empty() {
        Transfer::Return
    } else {
        Transfer::Goto(succs.to_vec())
    };
    Block::new(id, label, cmds, transfer)
}

pub fn fresh_blocks<const N: usize>(program: &mut Program) -> [BlockId; N] {
    [(); N].map(|_| program.ids.fresh_block())
}

/// Runs `add_disjointness_assumptions` on `imp` inside `program`.
pub fn instrument(
    program: &mut Program,
    imp: ImplId,
    checker: &CivlTypeChecker,
    node_map: &NodeMap,
    settings: InstrumentSettings,
) -> Result<(), InstrumentError> {
    let instrumenter = PermissionInstrumenter::new(checker, node_map, settings);
    let Program {
        implementations,
        ids,
        ..
    } = program;
    let imp = implementations.get_mut(&imp).expect("implementation");
    instrumenter.add_disjointness_assumptions(imp, ids)
}

pub fn cmd_ids(block: &Block) -> Vec<u32> {
    block.cmds.iter().map(|c| c.id.0).collect()
}

pub fn assumed_exprs(cmds: &[Cmd]) -> Vec<&Expr> {
    cmds.iter()
        .filter_map(|c| match &c.kind {
            CmdKind::Assume(e) => Some(e),
            _ => None,
        })
        .collect()
}

/// Commands rendered with variable names, for readable comparisons.
pub fn rendered(program: &Program, cmds: &[Cmd]) -> Vec<String> {
    cmds.iter().map(|c| program.display_cmd(c).to_string()).collect()
}

pub fn vars_of<'e>(exprs: impl IntoIterator<Item = &'e Expr>) -> BTreeSet<VarId> {
    exprs.into_iter().flat_map(Expr::free_vars).collect()
}
