// src/resolver/conflict.rs

//! Conflict types for dependency tree construction
//!
//! Conflicts are reported, never reconciled: the tree build stops at the
//! first one and surfaces it through [`crate::Error::Conflict`].

use crate::version::ComparableVersion;

/// An irreconcilable situation found while building a tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// A package was already selected at a version another edge rejects
    ConflictingConstraints {
        package: String,
        selected: ComparableVersion,
        constraints: Vec<(String, String)>, // (requirer, constraint)
    },
    /// A package depends on itself, directly or transitively
    CircularDependency { cycle: Vec<String> },
}

impl Conflict {
    /// Name of the package the conflict is about
    pub fn package(&self) -> &str {
        match self {
            Conflict::ConflictingConstraints { package, .. } => package,
            Conflict::CircularDependency { cycle } => {
                cycle.first().map(String::as_str).unwrap_or_default()
            }
        }
    }
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Conflict::ConflictingConstraints {
                package,
                selected,
                constraints,
            } => {
                writeln!(
                    f,
                    "Conflicting version requirements for package {} (selected {}):",
                    package, selected
                )?;
                for (requirer, constraint) in constraints {
                    writeln!(f, "  - {} requires {}", requirer, constraint)?;
                }
                Ok(())
            }
            Conflict::CircularDependency { cycle } => {
                write!(f, "Circular dependency: {}", cycle.join(" -> "))
            }
        }
    }
}

impl std::error::Error for Conflict {}
