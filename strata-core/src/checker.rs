#![forbid(unsafe_code)]

use std::collections::HashMap;

use strata_ir::{LayerRange, LinearKind, Node, Program, VarId, Variable};

use crate::error::TypeError;
use crate::linear::{LinearTypeChecker, PermissionEncoding};

/// Parameter lists of a procedure or implementation as type-checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub ins: Vec<VarId>,
    pub outs: Vec<VarId>,
}

/// Layer and linearity facts about a type-checked program.
///
/// Everything is snapshotted at construction, so the program can be rewritten
/// afterwards while the checker is still in use.
#[derive(Debug)]
pub struct CivlTypeChecker {
    vars: Vec<Variable>,
    globals: Vec<VarId>,
    signatures: HashMap<Node, Signature>,
    default_layers: LayerRange,
    linear: LinearTypeChecker,
}

impl CivlTypeChecker {
    pub fn new(program: &Program) -> Result<Self, TypeError> {
        for var in &program.vars {
            check_variable(var)?;
        }

        let max_layer = program
            .vars
            .iter()
            .filter_map(|v| v.layers)
            .map(|r| r.upper)
            .max()
            .unwrap_or(0);

        let mut signatures = HashMap::new();
        for proc in program.procedures.values() {
            signatures.insert(
                Node::Procedure(proc.id),
                Signature {
                    ins: proc.ins.clone(),
                    outs: proc.outs.clone(),
                },
            );
        }
        for imp in program.implementations.values() {
            signatures.insert(
                Node::Implementation(imp.id),
                Signature {
                    ins: imp.ins.clone(),
                    outs: imp.outs.clone(),
                },
            );
        }

        Ok(Self {
            vars: program.vars.clone(),
            globals: program.globals.clone(),
            signatures,
            default_layers: LayerRange::new(0, max_layer),
            linear: LinearTypeChecker::new(program),
        })
    }

    pub fn with_encoding(mut self, encoding: impl PermissionEncoding + 'static) -> Self {
        self.linear = self.linear.with_encoding(encoding);
        self
    }

    pub fn linear(&self) -> &LinearTypeChecker {
        &self.linear
    }

    pub fn variable(&self, v: VarId) -> Option<&Variable> {
        self.vars.get(v.0 as usize)
    }

    pub fn linear_kind(&self, v: VarId) -> LinearKind {
        self.variable(v).map(|v| v.linear).unwrap_or_default()
    }

    pub fn is_global(&self, v: VarId) -> bool {
        self.variable(v).is_some_and(Variable::is_global)
    }

    pub fn global_vars(&self) -> &[VarId] {
        &self.globals
    }

    pub fn signature(&self, node: Node) -> Option<&Signature> {
        self.signatures.get(&node)
    }

    /// Range used for variables without a `{:layer}` annotation.
    pub fn default_layers(&self) -> LayerRange {
        self.default_layers
    }

    pub fn local_layer_range(&self, v: VarId) -> LayerRange {
        self.declared_or_default(v)
    }

    pub fn global_layer_range(&self, v: VarId) -> LayerRange {
        self.declared_or_default(v)
    }

    fn declared_or_default(&self, v: VarId) -> LayerRange {
        self.variable(v)
            .and_then(|v| v.layers)
            .unwrap_or(self.default_layers)
    }
}

fn check_variable(var: &Variable) -> Result<(), TypeError> {
    let err = |message: String| {
        Err(TypeError {
            message,
            span: var.span,
        })
    };

    match (var.linear.is_linear(), &var.domain) {
        (true, None) => return err(format!("linear variable `{}` has no domain", var.name)),
        (false, Some(domain)) => {
            return err(format!(
                "variable `{}` names domain `{domain}` but is not linear",
                var.name
            ));
        }
        _ => {}
    }

    if var.is_global() && matches!(var.linear, LinearKind::LinearIn | LinearKind::LinearOut) {
        return err(format!(
            "global variable `{}` must be plain linear, found {:?}",
            var.name, var.linear
        ));
    }

    if let Some(range) = var.layers
        && range.is_empty()
    {
        return err(format!(
            "variable `{}` has empty layer range {}..{}",
            var.name, range.lower, range.upper
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_ir::Type;

    #[test]
    fn linear_variable_without_domain_is_rejected() {
        let mut program = Program::new();
        let mut v = Variable::local("x", Type::Int);
        v.linear = LinearKind::Linear;
        program.add_var(v);

        let err = CivlTypeChecker::new(&program).expect_err("expected type error");
        assert!(err.message.contains("no domain"), "unexpected error: {}", err.message);
    }

    #[test]
    fn directional_global_is_rejected() {
        let mut program = Program::new();
        program.add_var(Variable::global("g", Type::Int).linear(LinearKind::LinearIn, "perm"));

        let err = CivlTypeChecker::new(&program).expect_err("expected type error");
        assert!(err.message.contains("plain linear"), "unexpected error: {}", err.message);
    }

    #[test]
    fn empty_layer_range_is_rejected() {
        let mut program = Program::new();
        program.add_var(Variable::local("x", Type::Int).at_layers(LayerRange::new(3, 1)));

        let err = CivlTypeChecker::new(&program).expect_err("expected type error");
        assert!(err.message.contains("empty layer range"), "unexpected error: {}", err.message);
    }

    #[test]
    fn unannotated_variables_span_all_declared_layers() {
        let mut program = Program::new();
        let a = program.add_var(Variable::local("a", Type::Int).at_layers(LayerRange::new(1, 4)));
        let b = program.add_var(Variable::global("b", Type::Int));

        let checker = CivlTypeChecker::new(&program).expect("typecheck");
        assert_eq!(checker.local_layer_range(a), LayerRange::new(1, 4));
        assert_eq!(checker.global_layer_range(b), LayerRange::new(0, 4));
        assert!(checker.is_global(b));
        assert_eq!(checker.global_vars(), &[b]);
    }
}
