// policy.rs — An immutable, ordered set of permission scopes.
//
// Scopes are validated once, at construction: every blocked-command pattern
// is compiled up front so a typo in a regex is a load error, not a rule that
// silently never matches. After that the Policy exposes read-only access.

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::scope::PermissionScope;

/// A scope together with its compiled command patterns.
#[derive(Debug, Clone)]
pub(crate) struct CompiledScope {
    pub(crate) scope: PermissionScope,
    /// `None` when the scope declares no patterns at all.
    pub(crate) command_patterns: Option<Vec<Regex>>,
}

/// On-disk policy document (YAML or JSON).
#[derive(Debug, Serialize, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    scopes: Vec<PermissionScope>,
}

/// The full rule set handed to the evaluator.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    scopes: Vec<CompiledScope>,
}

impl Policy {
    /// Build a policy, compiling every command pattern.
    pub fn new(scopes: Vec<PermissionScope>) -> Result<Self, PolicyError> {
        let scopes = scopes
            .into_iter()
            .map(compile_scope)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { scopes })
    }

    /// A policy with no scopes: everything is blocked.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, PolicyError> {
        let file: PolicyFile = serde_yaml::from_str(yaml)?;
        Self::new(file.scopes)
    }

    pub fn from_json_str(json: &str) -> Result<Self, PolicyError> {
        let file: PolicyFile = serde_json::from_str(json)?;
        Self::new(file.scopes)
    }

    /// Load a policy file. `.json` files are parsed as JSON, everything else as YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| PolicyError::LoadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_str(&text)
        } else {
            Self::from_yaml_str(&text)
        }
    }

    /// All scopes, in declaration order.
    pub fn scopes(&self) -> impl Iterator<Item = &PermissionScope> {
        self.scopes.iter().map(|c| &c.scope)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Scopes (with their index) that apply to the given action name.
    pub(crate) fn matching<'a>(
        &'a self,
        action_name: &'a str,
    ) -> impl Iterator<Item = (usize, &'a CompiledScope)> + 'a {
        self.scopes
            .iter()
            .enumerate()
            .filter(move |(_, c)| c.scope.action_name == action_name)
    }
}

fn compile_scope(scope: PermissionScope) -> Result<CompiledScope, PolicyError> {
    let command_patterns = match &scope.blocked_command_patterns {
        None => None,
        Some(patterns) => Some(
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| PolicyError::InvalidPattern {
                        action_name: scope.action_name.clone(),
                        pattern: p.clone(),
                        reason: e.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
        ),
    };
    Ok(CompiledScope {
        scope,
        command_patterns,
    })
}
