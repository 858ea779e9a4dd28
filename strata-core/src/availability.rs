//! Forward must-analysis of the linear local variables that hold ownership at
//! each point of an implementation.
//!
//! A linear variable becomes available when it is assigned (or enters as a
//! `Linear`/`LinearIn` parameter) and stops being available when its value is
//! moved into another variable, passed to a linear formal, or havocked. At
//! joins only variables available along every incoming edge survive.

#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap};

use strata_ir::{BlockId, CallCmd, Cmd, CmdKind, Expr, FlowGraph, Implementation, LinearKind, Node, Program, VarId};

pub struct AvailabilityAnalysis<'a> {
    program: &'a Program,
}

impl<'a> AvailabilityAnalysis<'a> {
    pub fn new(program: &'a Program) -> Self {
        Self { program }
    }

    /// Returns the available set at the entry of every reachable block
    /// (`Node::Block`) and right after every command in it (`Node::Cmd`).
    pub fn run(&self, imp: &Implementation) -> HashMap<Node, BTreeSet<VarId>> {
        let mut table = HashMap::new();
        let Some(graph) = FlowGraph::build(imp) else {
            return table;
        };

        let entry_set: BTreeSet<VarId> = imp
            .ins
            .iter()
            .copied()
            .filter(|&v| {
                self.is_tracked(v)
                    && matches!(self.kind(v), LinearKind::Linear | LinearKind::LinearIn)
            })
            .collect();

        // Missing entries stand for "not reached yet", the top of the lattice.
        let mut block_out: HashMap<BlockId, BTreeSet<VarId>> = HashMap::new();
        let mut changed = true;
        while changed {
            changed = false;
            for &id in &graph.rpo {
                let Some(block) = imp.block(id) else {
                    continue;
                };
                let Some(mut live) = self.block_in(&graph, id, &entry_set, &block_out) else {
                    continue;
                };
                for cmd in &block.cmds {
                    self.transfer(cmd, &mut live);
                }
                if block_out.get(&id) != Some(&live) {
                    block_out.insert(id, live);
                    changed = true;
                }
            }
        }

        for &id in &graph.rpo {
            let Some(block) = imp.block(id) else {
                continue;
            };
            let Some(mut live) = self.block_in(&graph, id, &entry_set, &block_out) else {
                continue;
            };
            table.insert(Node::Block(id), live.clone());
            for cmd in &block.cmds {
                self.transfer(cmd, &mut live);
                table.insert(Node::Cmd(cmd.id), live.clone());
            }
        }

        tracing::trace!(implementation = %imp.name, points = table.len(), "availability computed");
        table
    }

    fn block_in(
        &self,
        graph: &FlowGraph,
        id: BlockId,
        entry_set: &BTreeSet<VarId>,
        block_out: &HashMap<BlockId, BTreeSet<VarId>>,
    ) -> Option<BTreeSet<VarId>> {
        let mut live = (id == graph.entry).then(|| entry_set.clone());
        for pred in &graph.predecessors[&id] {
            let Some(out) = block_out.get(pred) else {
                continue;
            };
            live = Some(match live {
                None => out.clone(),
                Some(current) => current.intersection(out).copied().collect(),
            });
        }
        live
    }

    fn transfer(&self, cmd: &Cmd, live: &mut BTreeSet<VarId>) {
        match &cmd.kind {
            CmdKind::Assume(_) | CmdKind::Assert(_) => {}
            CmdKind::Assign { lhs, rhs } => {
                for e in rhs {
                    if let Expr::Var(v) = e {
                        live.remove(v);
                    }
                }
                self.produce(lhs, live);
            }
            CmdKind::Havoc(vars) => {
                for v in vars {
                    live.remove(v);
                }
            }
            CmdKind::Call(call) => {
                self.consume(call, live);
                self.produce(&call.outs, live);
            }
            CmdKind::ParCall(calls) => {
                for call in calls {
                    self.consume(call, live);
                }
                for call in calls {
                    self.produce(&call.outs, live);
                }
            }
        }
    }

    fn consume(&self, call: &CallCmd, live: &mut BTreeSet<VarId>) {
        let Some(callee) = self.program.procedure(call.callee) else {
            return;
        };
        for (arg, &formal) in call.args.iter().zip(&callee.ins) {
            if let Expr::Var(v) = arg
                && matches!(self.kind(formal), LinearKind::Linear | LinearKind::LinearIn)
            {
                live.remove(v);
            }
        }
    }

    fn produce(&self, vars: &[VarId], live: &mut BTreeSet<VarId>) {
        live.extend(vars.iter().copied().filter(|&v| self.is_tracked(v)));
    }

    fn kind(&self, v: VarId) -> LinearKind {
        self.program.var(v).map(|v| v.linear).unwrap_or_default()
    }

    fn is_tracked(&self, v: VarId) -> bool {
        self.program
            .var(v)
            .is_some_and(|v| !v.is_global() && v.linear.is_linear())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_ir::{Block, Transfer, Type, Variable};

    struct Fixture {
        program: Program,
        x: VarId,
        y: VarId,
        sink: strata_ir::ProcId,
    }

    fn fixture() -> Fixture {
        let mut program = Program::new();
        let x = program.add_var(Variable::local("x", Type::Int).linear(LinearKind::Linear, "perm"));
        let y = program.add_var(Variable::local("y", Type::Int).linear(LinearKind::LinearIn, "perm"));
        let formal = program.add_var(Variable::local("f", Type::Int).linear(LinearKind::LinearIn, "perm"));
        let sink = program.add_procedure("sink", vec![formal], vec![]);
        Fixture { program, x, y, sink }
    }

    #[test]
    fn call_consumes_linear_argument() {
        let Fixture { mut program, x, y, sink } = fixture();
        let main = program.add_procedure("main", vec![x, y], vec![]);
        let call = program.ids.cmd(CmdKind::Call(CallCmd {
            callee: sink,
            args: vec![Expr::Var(x)],
            outs: vec![],
        }));
        let call_id = call.id;
        let b0 = program.ids.fresh_block();
        let imp = program
            .add_implementation(main, vec![], vec![Block::new(b0, "entry", vec![call], Transfer::Return)])
            .unwrap();

        let table = AvailabilityAnalysis::new(&program).run(&program.implementations[&imp]);
        assert_eq!(table[&Node::Block(b0)], BTreeSet::from([x, y]));
        assert_eq!(table[&Node::Cmd(call_id)], BTreeSet::from([y]));
    }

    #[test]
    fn join_keeps_only_vars_available_on_every_path() {
        let Fixture { mut program, x, y, sink } = fixture();
        let main = program.add_procedure("main", vec![x, y], vec![]);
        let [b0, b1, b2, b3] = [(); 4].map(|_| program.ids.fresh_block());
        let call = program.ids.cmd(CmdKind::Call(CallCmd {
            callee: sink,
            args: vec![Expr::Var(y)],
            outs: vec![],
        }));
        let blocks = vec![
            Block::new(b0, "entry", vec![], Transfer::Goto(vec![b1, b2])),
            Block::new(b1, "then", vec![call], Transfer::Goto(vec![b3])),
            Block::new(b2, "else", vec![], Transfer::Goto(vec![b3])),
            Block::new(b3, "join", vec![], Transfer::Return),
        ];
        let imp = program.add_implementation(main, vec![], blocks).unwrap();

        let table = AvailabilityAnalysis::new(&program).run(&program.implementations[&imp]);
        assert_eq!(table[&Node::Block(b2)], BTreeSet::from([x, y]));
        assert_eq!(table[&Node::Block(b3)], BTreeSet::from([x]));
    }

    #[test]
    fn assignment_moves_and_unreachable_blocks_are_absent() {
        let Fixture { mut program, x, .. } = fixture();
        let z = program.add_var(Variable::local("z", Type::Int).linear(LinearKind::Linear, "perm"));
        let main = program.add_procedure("main", vec![x], vec![]);
        let mv = program.ids.cmd(CmdKind::Assign {
            lhs: vec![z],
            rhs: vec![Expr::Var(x)],
        });
        let mv_id = mv.id;
        let [b0, dead] = [(); 2].map(|_| program.ids.fresh_block());
        let blocks = vec![
            Block::new(b0, "entry", vec![mv], Transfer::Return),
            Block::new(dead, "dead", vec![], Transfer::Return),
        ];
        let imp = program.add_implementation(main, vec![z], blocks).unwrap();

        let table = AvailabilityAnalysis::new(&program).run(&program.implementations[&imp]);
        assert_eq!(table[&Node::Cmd(mv_id)], BTreeSet::from([z]));
        assert!(!table.contains_key(&Node::Block(dead)));
    }

    fn single_block(
        program: &mut Program,
        main: strata_ir::ProcId,
        locals: Vec<VarId>,
        cmds: Vec<Cmd>,
    ) -> (strata_ir::ImplId, BlockId) {
        let b0 = program.ids.fresh_block();
        let imp = program
            .add_implementation(main, locals, vec![Block::new(b0, "entry", cmds, Transfer::Return)])
            .unwrap();
        (imp, b0)
    }

    #[test]
    fn havoc_drops_ownership() {
        let Fixture { mut program, x, y, .. } = fixture();
        let main = program.add_procedure("main", vec![x, y], vec![]);
        let havoc = program.ids.cmd(CmdKind::Havoc(vec![x]));
        let havoc_id = havoc.id;
        let (imp, _) = single_block(&mut program, main, vec![], vec![havoc]);

        let table = AvailabilityAnalysis::new(&program).run(&program.implementations[&imp]);
        assert_eq!(table[&Node::Cmd(havoc_id)], BTreeSet::from([y]));
    }

    #[test]
    fn call_outputs_become_available() {
        let Fixture { mut program, x, .. } = fixture();
        let z = program.add_var(Variable::local("z", Type::Int).linear(LinearKind::Linear, "perm"));
        let r = program.add_var(Variable::local("r", Type::Int).linear(LinearKind::LinearOut, "perm"));
        let make = program.add_procedure("make", vec![], vec![r]);
        let main = program.add_procedure("main", vec![x], vec![]);
        let call = program.ids.cmd(CmdKind::Call(CallCmd {
            callee: make,
            args: vec![],
            outs: vec![z],
        }));
        let call_id = call.id;
        let (imp, b0) = single_block(&mut program, main, vec![z], vec![call]);

        let table = AvailabilityAnalysis::new(&program).run(&program.implementations[&imp]);
        assert_eq!(table[&Node::Block(b0)], BTreeSet::from([x]));
        assert_eq!(table[&Node::Cmd(call_id)], BTreeSet::from([x, z]));
    }

    #[test]
    fn parallel_arms_consume_before_any_arm_produces() {
        let Fixture { mut program, x, y, sink } = fixture();
        let r = program.add_var(Variable::local("r", Type::Int).linear(LinearKind::LinearOut, "perm"));
        let make = program.add_procedure("make", vec![], vec![r]);
        let main = program.add_procedure("main", vec![x, y], vec![]);
        // The producing arm comes first; `x` is still available afterwards.
        let par = program.ids.cmd(CmdKind::ParCall(vec![
            CallCmd {
                callee: make,
                args: vec![],
                outs: vec![x],
            },
            CallCmd {
                callee: sink,
                args: vec![Expr::Var(x)],
                outs: vec![],
            },
        ]));
        let par_id = par.id;
        let (imp, _) = single_block(&mut program, main, vec![], vec![par]);

        let table = AvailabilityAnalysis::new(&program).run(&program.implementations[&imp]);
        assert_eq!(table[&Node::Cmd(par_id)], BTreeSet::from([x, y]));
    }

    #[test]
    fn assignment_from_a_compound_expression_moves_nothing() {
        let Fixture { mut program, x, y, .. } = fixture();
        let z = program.add_var(Variable::local("z", Type::Int).linear(LinearKind::Linear, "perm"));
        let main = program.add_procedure("main", vec![x, y], vec![]);
        let assign = program.ids.cmd(CmdKind::Assign {
            lhs: vec![z],
            rhs: vec![Expr::app("split", vec![Expr::Var(x)])],
        });
        let assign_id = assign.id;
        let (imp, _) = single_block(&mut program, main, vec![z], vec![assign]);

        let table = AvailabilityAnalysis::new(&program).run(&program.implementations[&imp]);
        assert_eq!(table[&Node::Cmd(assign_id)], BTreeSet::from([x, y, z]));
    }
}
