#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use miette::Diagnostic;
use strata_ir::Span;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum InstrumentError {
    #[error("irreducible flow graph in implementation `{implementation}`")]
    #[diagnostic(
        code(strata::irreducible),
        help("loop headers must be the single entry of their loop; restructure the control flow")
    )]
    IrreducibleFlowGraph {
        implementation: String,
        #[label("unsupported control flow")]
        span: Span,
    },
}

#[derive(Debug, Error, Diagnostic)]
#[error("type error: {message}")]
#[diagnostic(code(strata::typecheck))]
#[allow(unused_assignments)]
pub struct TypeError {
    pub message: String,
    #[label]
    pub span: Span,
}

#[derive(Debug, Error, Diagnostic)]
#[error("instrumentation config error: {message}")]
#[diagnostic(code(strata::config))]
pub struct ConfigError {
    pub message: String,
}
