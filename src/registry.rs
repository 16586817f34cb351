// registry.rs - Protocol Registry

//! Name resolution and caching for the protocols of one module.
//!
//! The registry owns the parsed protocol declarations, knows the `do`
//! dependency graph between them, and memoises built CFGs. It is
//! constructed once per module, is read-only afterwards, and is shared by
//! reference between the projector and the simulators.

use crate::cfg::{self, Cfg, CfgError};
use crate::parser::{GlobalProtocol, Interaction, Module, Span};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Hard errors on the registry boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("protocol not found: {name}")]
    ProtocolNotFound { name: String },

    #[error("duplicate protocol declaration: {name}")]
    DuplicateProtocol { name: String },

    #[error("circular protocol dependency: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    #[error("role mismatch calling {protocol}: expected {expected} roles, got {actual}")]
    RoleMismatch {
        protocol: String,
        expected: usize,
        actual: usize,
    },

    #[error(transparent)]
    Cfg(#[from] CfgError),
}

/// Non-fatal problems found by [`ProtocolRegistry::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryViolation {
    /// A `do` statement targets a protocol the module does not declare
    MissingTarget {
        caller: String,
        target: String,
        span: Span,
    },

    /// A `do` statement passes the wrong number of roles
    ArityMismatch {
        caller: String,
        target: String,
        expected: usize,
        actual: usize,
        span: Span,
    },

    /// A `do` argument is not a declared role of the calling protocol
    UndeclaredRoleArgument {
        caller: String,
        target: String,
        role: String,
        span: Span,
    },
}

#[derive(Debug)]
pub struct ProtocolRegistry {
    protocols: BTreeMap<String, GlobalProtocol>,

    /// Direct `do` dependencies per protocol
    direct_deps: BTreeMap<String, BTreeSet<String>>,

    /// Memoised CFGs; built lazily, immutable once inserted
    cfgs: RwLock<HashMap<String, Arc<Cfg>>>,
}

impl ProtocolRegistry {
    /// Build a registry from a parsed module.
    ///
    /// Computes the dependency graph up front; a dependency cycle is a hard
    /// error because neither projection nor simulation terminates on one.
    pub fn from_module(module: &Module) -> Result<Self, RegistryError> {
        let mut protocols = BTreeMap::new();
        for protocol in &module.protocols {
            if protocols
                .insert(protocol.name.clone(), protocol.clone())
                .is_some()
            {
                return Err(RegistryError::DuplicateProtocol {
                    name: protocol.name.clone(),
                });
            }
        }

        let mut direct_deps = BTreeMap::new();
        for (name, protocol) in &protocols {
            let deps: BTreeSet<String> = do_sites(&protocol.body)
                .into_iter()
                .map(|site| site.target.clone())
                .collect();
            direct_deps.insert(name.clone(), deps);
        }

        let registry = Self {
            protocols,
            direct_deps,
            cfgs: RwLock::new(HashMap::new()),
        };
        registry.check_acyclic()?;

        debug!(protocols = registry.protocols.len(), "registry constructed");
        Ok(registry)
    }

    /// Resolve a protocol declaration by name.
    pub fn resolve(&self, name: &str) -> Result<&GlobalProtocol, RegistryError> {
        self.protocols
            .get(name)
            .ok_or_else(|| RegistryError::ProtocolNotFound {
                name: name.to_string(),
            })
    }

    pub fn protocol_names(&self) -> impl Iterator<Item = &String> {
        self.protocols.keys()
    }

    /// Transitive `do` dependencies of a protocol.
    pub fn dependencies(&self, name: &str) -> Result<BTreeSet<String>, RegistryError> {
        self.resolve(name)?;
        let mut seen = BTreeSet::new();
        let mut stack = vec![name.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(deps) = self.direct_deps.get(&current) {
                for dep in deps {
                    if seen.insert(dep.clone()) {
                        stack.push(dep.clone());
                    }
                }
            }
        }
        Ok(seen)
    }

    /// Diagnose all `do` call sites: missing targets, arity mismatches,
    /// undeclared role arguments.
    pub fn validate(&self) -> Vec<RegistryViolation> {
        let mut violations = Vec::new();
        for (caller, protocol) in &self.protocols {
            for site in do_sites(&protocol.body) {
                match self.protocols.get(site.target) {
                    None => violations.push(RegistryViolation::MissingTarget {
                        caller: caller.clone(),
                        target: site.target.clone(),
                        span: site.span,
                    }),
                    Some(target) => {
                        if target.roles.len() != site.arguments.len() {
                            violations.push(RegistryViolation::ArityMismatch {
                                caller: caller.clone(),
                                target: site.target.clone(),
                                expected: target.roles.len(),
                                actual: site.arguments.len(),
                                span: site.span,
                            });
                        }
                    }
                }
                for role in site.arguments {
                    if !protocol.has_role(role) {
                        violations.push(RegistryViolation::UndeclaredRoleArgument {
                            caller: caller.clone(),
                            target: site.target.clone(),
                            role: role.clone(),
                            span: site.span,
                        });
                    }
                }
            }
        }
        violations
    }

    /// Build the formal → actual role bijection for calling `name` with
    /// `actual_roles`.
    pub fn role_mapping(
        &self,
        name: &str,
        actual_roles: &[String],
    ) -> Result<BTreeMap<String, String>, RegistryError> {
        let protocol = self.resolve(name)?;
        if protocol.roles.len() != actual_roles.len() {
            return Err(RegistryError::RoleMismatch {
                protocol: name.to_string(),
                expected: protocol.roles.len(),
                actual: actual_roles.len(),
            });
        }
        Ok(protocol
            .roles
            .iter()
            .map(|r| r.name.clone())
            .zip(actual_roles.iter().cloned())
            .collect())
    }

    /// The CFG of a protocol, built on first use and memoised.
    pub fn cfg(&self, name: &str) -> Result<Arc<Cfg>, RegistryError> {
        if let Some(cached) = self.cfgs.read().get(name) {
            return Ok(cached.clone());
        }
        let protocol = self.resolve(name)?;
        let built = Arc::new(cfg::build(protocol)?);
        self.cfgs.write().insert(name.to_string(), built.clone());
        debug!(protocol = name, "CFG built and cached");
        Ok(built)
    }

    /// Grey/black DFS over the direct dependency graph.
    fn check_acyclic(&self) -> Result<(), RegistryError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Colour {
            White,
            Grey,
            Black,
        }

        fn visit(
            name: &str,
            deps: &BTreeMap<String, BTreeSet<String>>,
            colours: &mut BTreeMap<String, Colour>,
            path: &mut Vec<String>,
        ) -> Result<(), RegistryError> {
            colours.insert(name.to_string(), Colour::Grey);
            path.push(name.to_string());

            if let Some(targets) = deps.get(name) {
                for target in targets {
                    match colours.get(target.as_str()).copied().unwrap_or(Colour::White) {
                        Colour::Grey => {
                            let start = path.iter().position(|p| p == target).unwrap_or(0);
                            let mut cycle: Vec<String> = path[start..].to_vec();
                            cycle.push(target.clone());
                            return Err(RegistryError::CircularDependency { cycle });
                        }
                        Colour::White if deps.contains_key(target.as_str()) => {
                            visit(target, deps, colours, path)?;
                        }
                        // Missing targets are validate()'s concern, not a cycle.
                        _ => {}
                    }
                }
            }

            path.pop();
            colours.insert(name.to_string(), Colour::Black);
            Ok(())
        }

        let mut colours = BTreeMap::new();
        for name in self.protocols.keys() {
            if colours.get(name.as_str()).copied().unwrap_or(Colour::White) == Colour::White {
                visit(name, &self.direct_deps, &mut colours, &mut Vec::new())?;
            }
        }
        Ok(())
    }
}

struct DoSite<'a> {
    target: &'a String,
    arguments: &'a Vec<String>,
    span: Span,
}

fn do_sites(body: &[Interaction]) -> Vec<DoSite<'_>> {
    let mut sites = Vec::new();
    collect_do_sites(body, &mut sites);
    sites
}

fn collect_do_sites<'a>(body: &'a [Interaction], sites: &mut Vec<DoSite<'a>>) {
    for interaction in body {
        match interaction {
            Interaction::Do {
                target,
                arguments,
                span,
            } => sites.push(DoSite {
                target,
                arguments,
                span: *span,
            }),
            Interaction::Choice { branches, .. } | Interaction::Parallel { branches, .. } => {
                for branch in branches {
                    collect_do_sites(branch, sites);
                }
            }
            Interaction::Recursion { body, .. } => collect_do_sites(body, sites),
            Interaction::Message(_) | Interaction::Continue { .. } => {}
        }
    }
}
