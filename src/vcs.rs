// src/vcs.rs

//! Version-control provenance
//!
//! Resolution only needs two facts from version control: the current
//! branch (an opaque partition key for package identities) and the current
//! changeset (stamped into archives as `vcs.info`). Commands are described
//! by an immutable [`HgRequest`] and executed by [`run_hg`].

use crate::error::{Error, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Archive entry holding provenance
pub const VCS_INFO_FILE: &str = "vcs.info";

/// Source of branch and changeset information
pub trait VersionControl {
    fn current_branch(&self) -> Result<String>;
    fn current_changeset(&self) -> Result<String>;
}

/// One Mercurial invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HgRequest {
    pub repository: PathBuf,
    pub args: Vec<String>,
}

impl HgRequest {
    pub fn new<I, S>(repository: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            repository: repository.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

/// Run `hg` and return its trimmed standard output
pub fn run_hg(request: &HgRequest) -> Result<String> {
    debug!("Running hg {:?} in {:?}", request.args, request.repository);

    let output = Command::new("hg")
        .arg("--repository")
        .arg(&request.repository)
        .args(&request.args)
        .output()
        .map_err(|e| Error::IoError(format!("Failed to run hg: {e}")))?;

    if !output.status.success() {
        return Err(Error::IoError(format!(
            "hg {} failed: {}",
            request.args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Mercurial working copy
#[derive(Debug, Clone)]
pub struct Mercurial {
    root: PathBuf,
}

impl Mercurial {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl VersionControl for Mercurial {
    fn current_branch(&self) -> Result<String> {
        run_hg(&HgRequest::new(&self.root, ["branch"]))
    }

    fn current_changeset(&self) -> Result<String> {
        let id = run_hg(&HgRequest::new(&self.root, ["id", "-i"]))?;
        // a trailing '+' marks uncommitted changes
        Ok(id.trim_end_matches('+').to_string())
    }
}

/// Fixed answers, for builds outside a working copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedRevision {
    pub branch: String,
    pub changeset: String,
}

impl VersionControl for FixedRevision {
    fn current_branch(&self) -> Result<String> {
        Ok(self.branch.clone())
    }

    fn current_changeset(&self) -> Result<String> {
        Ok(self.changeset.clone())
    }
}

/// Contents of `vcs.info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcsInfo {
    pub branch: String,
    pub changeset: String,
}

impl VcsInfo {
    pub fn collect(vcs: &dyn VersionControl) -> Result<Self> {
        Ok(Self {
            branch: vcs.current_branch()?,
            changeset: vcs.current_changeset()?,
        })
    }

    pub fn to_info_string(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "branch={}", self.branch);
        let _ = writeln!(out, "changeset={}", self.changeset);
        out
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut branch = None;
        let mut changeset = None;
        for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match line.split_once('=') {
                Some(("branch", value)) => branch = Some(value.trim().to_string()),
                Some(("changeset", value)) => changeset = Some(value.trim().to_string()),
                Some(_) => {}
                None => {
                    return Err(Error::ParseError(format!(
                        "Malformed {VCS_INFO_FILE} line: {line}"
                    )));
                }
            }
        }

        match (branch, changeset) {
            (Some(branch), Some(changeset)) => Ok(Self { branch, changeset }),
            _ => Err(Error::ParseError(format!(
                "{VCS_INFO_FILE} needs both branch and changeset"
            ))),
        }
    }
}
