#![forbid(unsafe_code)]

use std::fmt;

use crate::ir::{CallCmd, Cmd, CmdKind, Expr, Program, VarId};

/// Renders an expression with variable names resolved against `program`.
pub struct ExprDisplay<'a> {
    pub program: &'a Program,
    pub expr: &'a Expr,
}

/// Renders a command with variable and procedure names resolved against `program`.
pub struct CmdDisplay<'a> {
    pub program: &'a Program,
    pub cmd: &'a Cmd,
}

impl Program {
    pub fn display_expr<'a>(&'a self, expr: &'a Expr) -> ExprDisplay<'a> {
        ExprDisplay { program: self, expr }
    }

    pub fn display_cmd<'a>(&'a self, cmd: &'a Cmd) -> CmdDisplay<'a> {
        CmdDisplay { program: self, cmd }
    }

    fn var_name(&self, id: VarId) -> String {
        match self.var(id) {
            Some(v) => v.name.clone(),
            None => format!("v{}", id.0),
        }
    }
}

impl fmt::Display for ExprDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_expr(f, self.program, self.expr)
    }
}

fn write_expr(f: &mut fmt::Formatter<'_>, program: &Program, expr: &Expr) -> fmt::Result {
    match expr {
        Expr::Lit(b) => write!(f, "{b}"),
        Expr::Var(v) => write!(f, "{}", program.var_name(*v)),
        Expr::App { func, args } => {
            write!(f, "{func}(")?;
            write_list(f, program, args, ", ")?;
            write!(f, ")")
        }
        Expr::Not(inner) => {
            write!(f, "!(")?;
            write_expr(f, program, inner)?;
            write!(f, ")")
        }
        Expr::And(parts) => {
            write!(f, "(")?;
            write_list(f, program, parts, " && ")?;
            write!(f, ")")
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, program: &Program, exprs: &[Expr], sep: &str) -> fmt::Result {
    for (i, e) in exprs.iter().enumerate() {
        if i > 0 {
            write!(f, "{sep}")?;
        }
        write_expr(f, program, e)?;
    }
    Ok(())
}

fn write_vars(f: &mut fmt::Formatter<'_>, program: &Program, vars: &[VarId]) -> fmt::Result {
    for (i, v) in vars.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", program.var_name(*v))?;
    }
    Ok(())
}

fn write_call(f: &mut fmt::Formatter<'_>, program: &Program, call: &CallCmd) -> fmt::Result {
    if !call.outs.is_empty() {
        write_vars(f, program, &call.outs)?;
        write!(f, " := ")?;
    }
    match program.procedure(call.callee) {
        Some(p) => write!(f, "{}(", p.name)?,
        None => write!(f, "proc{}(", call.callee.0)?,
    }
    write_list(f, program, &call.args, ", ")?;
    write!(f, ")")
}

impl fmt::Display for CmdDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let program = self.program;
        match &self.cmd.kind {
            CmdKind::Assume(e) => {
                write!(f, "assume ")?;
                write_expr(f, program, e)
            }
            CmdKind::Assert(e) => {
                write!(f, "assert ")?;
                write_expr(f, program, e)
            }
            CmdKind::Assign { lhs, rhs } => {
                write_vars(f, program, lhs)?;
                write!(f, " := ")?;
                write_list(f, program, rhs, ", ")
            }
            CmdKind::Havoc(vars) => {
                write!(f, "havoc ")?;
                write_vars(f, program, vars)
            }
            CmdKind::Call(call) => {
                write!(f, "call ")?;
                write_call(f, program, call)
            }
            CmdKind::ParCall(calls) => {
                write!(f, "par ")?;
                for (i, call) in calls.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write_call(f, program, call)?;
                }
                Ok(())
            }
        }
    }
}
