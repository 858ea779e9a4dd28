#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};

use strata_ir::{Layer, Program, VarId};

use crate::checker::CivlTypeChecker;
use crate::error::ConfigError;
use crate::linear::DomainId;

/// Resolved configuration of one instrumentation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstrumentSettings {
    pub layer: Layer,
    /// Placeholder permission per domain; a missing entry adds no term.
    pub hole_vars: HashMap<DomainId, VarId>,
    /// Substitution applied to variables in synthesized predicates; a missing
    /// entry maps a variable to itself.
    pub var_map: HashMap<VarId, VarId>,
}

impl InstrumentSettings {
    pub fn at_layer(layer: Layer) -> Self {
        Self {
            layer,
            ..Self::default()
        }
    }

    pub fn with_hole(mut self, domain: DomainId, var: VarId) -> Self {
        self.hole_vars.insert(domain, var);
        self
    }

    pub fn with_rename(mut self, from: VarId, to: VarId) -> Self {
        self.var_map.insert(from, to);
        self
    }
}

/// Name-based form of [`InstrumentSettings`], read from TOML:
///
/// ```toml
/// layer = 1
///
/// [holes]
/// perm = "perm_hole"
///
/// [renames]
/// x = "x_copy"
/// ```
#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct InstrumentConfig {
    pub layer: Layer,

    /// Domain name -> hole variable name.
    #[serde(default)]
    pub holes: BTreeMap<String, String>,

    /// Variable name -> replacement variable name.
    #[serde(default)]
    pub renames: BTreeMap<String, String>,
}

impl InstrumentConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError {
            message: e.to_string(),
        })
    }

    pub fn resolve(
        &self,
        program: &Program,
        checker: &CivlTypeChecker,
    ) -> Result<InstrumentSettings, ConfigError> {
        let mut settings = InstrumentSettings::at_layer(self.layer);

        for (domain, hole) in &self.holes {
            let Some(id) = checker.linear().domain_by_name(domain) else {
                return Err(ConfigError {
                    message: format!("unknown domain `{domain}`"),
                });
            };
            settings.hole_vars.insert(id, unique_var(program, hole)?);
        }

        for (from, to) in &self.renames {
            settings
                .var_map
                .insert(unique_var(program, from)?, unique_var(program, to)?);
        }

        Ok(settings)
    }
}

fn unique_var(program: &Program, name: &str) -> Result<VarId, ConfigError> {
    match program.find_var(name).as_slice() {
        [v] => Ok(*v),
        [] => Err(ConfigError {
            message: format!("unknown variable `{name}`"),
        }),
        _ => Err(ConfigError {
            message: format!("variable name `{name}` is ambiguous"),
        }),
    }
}
