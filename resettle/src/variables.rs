use crate::service::{VarKind, VarValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::error::Error;

pub type SolverError = Box<dyn Error + Send + Sync>;

/// Converts a variable's intermediate value into its final string, e.g. a
/// database entry key into the secret it names.
pub trait VarSolver {
    fn value(&self, key: &str) -> Result<String, SolverError>;
}

#[derive(Debug, thiserror::Error)]
pub enum VarError {
    #[error("service not found in the variable store")]
    NoService,

    #[error("variable not found")]
    NoVariable,

    #[error("no variable solver registered for kind {0}")]
    NoSolver(VarKind),

    #[error("solver for kind {kind} failed: {source}")]
    SolverFailure {
        kind: VarKind,
        #[source]
        source: SolverError,
    },
}

/// Resolves and caches services' variables.
///
/// The store encodes to `common`, per-service parents and resolved values
/// only: solvers are a configuration concern of the parent process and never
/// cross the privilege pipe.
#[derive(Default, Serialize, Deserialize)]
pub struct Variables {
    common: HashMap<String, String>,
    resolved: HashMap<String, ServiceVars>,
    #[serde(skip)]
    solvers: HashMap<VarKind, Box<dyn VarSolver>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ServiceVars {
    parents: Vec<String>,
    vars: HashMap<String, String>,
}

impl Variables {
    pub fn new() -> Variables {
        Variables::default()
    }

    /// Replaces the process-wide fallback values consulted when a service
    /// has no variable under the requested name.
    pub fn set_common(&mut self, common: HashMap<String, String>) {
        self.common = common;
    }

    pub fn register_solver(&mut self, kind: VarKind, solver: Box<dyn VarSolver>) {
        self.solvers.insert(kind, solver);
    }

    /// Saves a value for service `srv` under `key`, resolving non-cleartext
    /// kinds through the registered solver. If the key already resolves for
    /// `srv`, insert is a no-op: the first value wins.
    pub fn insert(&mut self, srv: &str, key: &str, value: &VarValue) -> Result<(), VarError> {
        match self.get(srv, key) {
            Ok(_) => return Ok(()),
            Err(VarError::NoService) => {
                self.resolved.insert(srv.to_owned(), ServiceVars::default());
            }
            Err(VarError::NoVariable) => {}
            Err(err) => return Err(err),
        }
        let resolved = match &value.kind {
            VarKind::Cleartext => value.value.clone(),
            kind => {
                let solver = self
                    .solvers
                    .get(kind)
                    .ok_or_else(|| VarError::NoSolver(kind.clone()))?;
                solver
                    .value(&value.value)
                    .map_err(|source| VarError::SolverFailure {
                        kind: kind.clone(),
                        source,
                    })?
            }
        };
        if let Some(entry) = self.resolved.get_mut(srv) {
            entry.vars.insert(key.to_owned(), resolved);
        }
        Ok(())
    }

    pub fn insert_many(
        &mut self,
        srv: &str,
        values: &BTreeMap<String, VarValue>,
    ) -> Result<(), VarError> {
        for (key, value) in values {
            self.insert(srv, key, value)?;
        }
        Ok(())
    }

    /// Records that `parent`'s variables may be addressed from `srv`'s
    /// templates. Both services must already exist in the store; duplicates
    /// are ignored.
    pub fn add_parent(&mut self, srv: &str, parent: &str) -> Result<(), VarError> {
        if !self.resolved.contains_key(parent) {
            return Err(VarError::NoService);
        }
        let entry = self.resolved.get_mut(srv).ok_or(VarError::NoService)?;
        if !entry.parents.iter().any(|p| p == parent) {
            entry.parents.push(parent.to_owned());
        }
        Ok(())
    }

    /// The parent list of `srv`, in insertion order.
    pub fn parents(&self, srv: &str) -> Result<&[String], VarError> {
        self.resolved
            .get(srv)
            .map(|entry| entry.parents.as_slice())
            .ok_or(VarError::NoService)
    }

    /// Looks up a resolved variable, falling back to the common values.
    /// `NoService` is only reported for services never seen before; once a
    /// service exists, a missing key reports `NoVariable`.
    pub fn get(&self, srv: &str, key: &str) -> Result<&str, VarError> {
        let entry = self.resolved.get(srv).ok_or(VarError::NoService)?;
        match entry.vars.get(key) {
            Some(value) => Ok(value),
            None => self
                .common
                .get(key)
                .map(String::as_str)
                .ok_or(VarError::NoVariable),
        }
    }

    /// Number of services seen by the store.
    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    /// A copy of the resolved data without the solver registry, fit for
    /// embedding in messages to the privileged child.
    pub fn snapshot(&self) -> Variables {
        Variables {
            common: self.common.clone(),
            resolved: self.resolved.clone(),
            solvers: HashMap::new(),
        }
    }
}

impl std::fmt::Debug for Variables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Variables")
            .field("common", &self.common)
            .field("resolved", &self.resolved)
            .finish()
    }
}
