#![forbid(unsafe_code)]

use std::collections::{BTreeSet, HashMap};

use rayon::prelude::*;
use strata_ir::{Expr, Node, Program, VarId};

use crate::availability::AvailabilityAnalysis;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainId(pub u32);

/// A class of linear resources whose permissions are tracked together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinearDomain {
    pub name: String,
}

/// Boolean encoding of the permission algebra of a domain.
pub trait PermissionEncoding: Send + Sync {
    /// Permission held by `var`.
    fn permission(&self, domain: &LinearDomain, var: VarId) -> Expr;

    /// Union of the given permissions.
    fn union(&self, domain: &LinearDomain, perms: Vec<Expr>) -> Expr;

    /// Predicate stating that the given permissions do not overlap. Must be the
    /// literal `true` when fewer than two permissions are given.
    fn disjointness(&self, domain: &LinearDomain, perms: Vec<Expr>) -> Expr;
}

/// Encodes permissions as sets produced by the domain's collector function:
///
/// - `perm(v)`          = `<domain>#collect(v)`
/// - `union(a, b, ..)`  = `<domain>#union(<domain>#union(a, b), ..)`, `<domain>#empty()` if none
/// - `disjoint(a, b, ..)` = conjunction of `<domain>#disjoint(x, y)` over all pairs
#[derive(Clone, Copy, Debug, Default)]
pub struct CollectorEncoding;

impl PermissionEncoding for CollectorEncoding {
    fn permission(&self, domain: &LinearDomain, var: VarId) -> Expr {
        Expr::app(format!("{}#collect", domain.name), vec![Expr::Var(var)])
    }

    fn union(&self, domain: &LinearDomain, perms: Vec<Expr>) -> Expr {
        let func = format!("{}#union", domain.name);
        perms
            .into_iter()
            .reduce(|acc, p| Expr::app(func.clone(), vec![acc, p]))
            .unwrap_or_else(|| Expr::app(format!("{}#empty", domain.name), vec![]))
    }

    fn disjointness(&self, domain: &LinearDomain, perms: Vec<Expr>) -> Expr {
        if perms.len() < 2 {
            return Expr::TRUE;
        }
        let func = format!("{}#disjoint", domain.name);
        let mut pairs = Vec::new();
        for (i, a) in perms.iter().enumerate() {
            for b in &perms[i + 1..] {
                pairs.push(Expr::app(func.clone(), vec![a.clone(), b.clone()]));
            }
        }
        Expr::and(pairs)
    }
}

/// Registry of ownership domains and of the linear variables available at each
/// program point.
pub struct LinearTypeChecker {
    domains: Vec<LinearDomain>,
    domain_of: HashMap<VarId, DomainId>,
    available: HashMap<Node, BTreeSet<VarId>>,
    encoding: Box<dyn PermissionEncoding>,
}

impl std::fmt::Debug for LinearTypeChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinearTypeChecker")
            .field("domains", &self.domains)
            .field("domain_of", &self.domain_of)
            .field("available_points", &self.available.len())
            .finish()
    }
}

impl LinearTypeChecker {
    /// Collects domains from the linear variables of `program` and runs the
    /// availability analysis over every implementation.
    pub fn new(program: &Program) -> Self {
        let names: BTreeSet<&str> = program
            .vars
            .iter()
            .filter(|v| v.linear.is_linear())
            .filter_map(|v| v.domain.as_deref())
            .collect();
        let domains: Vec<LinearDomain> = names
            .into_iter()
            .map(|name| LinearDomain {
                name: name.to_string(),
            })
            .collect();

        let mut domain_of = HashMap::new();
        for (i, var) in program.vars.iter().enumerate() {
            if !var.linear.is_linear() {
                continue;
            }
            let Some(name) = var.domain.as_deref() else {
                continue;
            };
            if let Some(d) = domains.iter().position(|d| d.name == name) {
                domain_of.insert(VarId(i as u32), DomainId(d as u32));
            }
        }

        let available = program
            .implementations
            .par_iter()
            .map(|(_, imp)| AvailabilityAnalysis::new(program).run(imp))
            .reduce(HashMap::new, |mut acc, table| {
                acc.extend(table);
                acc
            });

        tracing::debug!(
            domains = domains.len(),
            points = available.len(),
            "linear type registry built"
        );

        Self {
            domains,
            domain_of,
            available,
            encoding: Box::new(CollectorEncoding),
        }
    }

    pub fn with_encoding(mut self, encoding: impl PermissionEncoding + 'static) -> Self {
        self.encoding = Box::new(encoding);
        self
    }

    pub fn domains(&self) -> impl Iterator<Item = DomainId> + '_ {
        (0..self.domains.len()).map(|i| DomainId(i as u32))
    }

    /// # Panics
    ///
    /// If `id` was not handed out by this registry. The expression builders
    /// below share this precondition.
    pub fn domain(&self, id: DomainId) -> &LinearDomain {
        &self.domains[id.0 as usize]
    }

    pub fn domain_by_name(&self, name: &str) -> Option<DomainId> {
        self.domains
            .iter()
            .position(|d| d.name == name)
            .map(|i| DomainId(i as u32))
    }

    pub fn find_domain(&self, var: VarId) -> Option<DomainId> {
        self.domain_of.get(&var).copied()
    }

    pub fn permission_exprs<'v>(
        &self,
        domain: DomainId,
        vars: impl IntoIterator<Item = &'v VarId>,
    ) -> Vec<Expr> {
        let d = self.domain(domain);
        vars.into_iter()
            .map(|v| self.encoding.permission(d, *v))
            .collect()
    }

    pub fn union_expr(&self, domain: DomainId, perms: Vec<Expr>) -> Expr {
        self.encoding.union(self.domain(domain), perms)
    }

    pub fn disjointness_expr(&self, domain: DomainId, perms: Vec<Expr>) -> Expr {
        self.encoding.disjointness(self.domain(domain), perms)
    }

    /// Linear variables available at `node`; empty for points the analysis
    /// never saw.
    pub fn available_linear_vars(&self, node: Node) -> impl Iterator<Item = VarId> + '_ {
        self.available.get(&node).into_iter().flatten().copied()
    }
}
