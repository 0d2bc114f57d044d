//! The persisted metadata record carried by every repository directory.

use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{Local, LocalResult, TimeZone};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Reserved name of the descriptor file present in every repository directory.
pub const DESCRIPTOR_FILE: &str = ".evolve";

/// Temporary name a descriptor is written under before being renamed into
/// place. Hidden, so tree walks never see it.
const DESCRIPTOR_TEMP_FILE: &str = ".evolve.tmp";

fn unavailable() -> String {
    "unavailable".to_owned()
}

/// The metadata record for one repository directory.
///
/// A descriptor's on-disk path is its identity; there is no separate ID
/// scheme. The modifier stamp is refreshed on every [`save`](Self::save);
/// records predating the stamp fields load with sentinel values instead of
/// failing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    /// Identity of the user who last saved this record.
    #[serde(default = "unavailable")]
    pub last_modified_by: String,

    /// Time of the last save in epoch seconds, 0 when unavailable.
    #[serde(default)]
    pub last_modified_time: i64,

    /// The variant data for this node.
    #[serde(flatten)]
    pub node: Node,
}

/// The four node kinds of the repository tree.
///
/// A closed sum type: the accepts-child predicates and the descriptor shape
/// are the only polymorphic surface, so variants are matched exhaustively
/// rather than dispatched virtually.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "lowercase")]
pub enum Node {
    /// The repository root; accepts only projects.
    Root {
        /// Names of child projects, in creation order.
        projects: Vec<String>,
    },
    /// An organizational container of either sub-projects or releases,
    /// never both.
    Project {
        /// Names of child projects, in creation order.
        projects: Vec<String>,
        /// Names of child releases and rlinks, in creation order.
        releases: Vec<String>,
    },
    /// A versioned build output. Leaf.
    Release {
        /// One-way flag set by deployment.
        deployed: bool,
        /// Reserved, unused.
        dependencies: Vec<String>,
    },
    /// A named pointer to a release via a `bin` symlink. Leaf.
    Rlink {
        /// Repository-relative path of the release currently pointed at.
        target: Utf8PathBuf,
        /// Reserved, unused.
        dependencies: Vec<String>,
        /// Superseded targets, most recent first.
        history: Vec<HistoryEntry>,
    },
}

/// One superseded rlink target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The repository-relative release path that was pointed at.
    pub target: Utf8PathBuf,
    /// Who had set that target.
    pub modified_by: String,
    /// When that target was set, in epoch seconds.
    pub modified_time: i64,
}

/// The type tag of a node, for display and validation messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// See [`Node::Root`].
    Root,
    /// See [`Node::Project`].
    Project,
    /// See [`Node::Release`].
    Release,
    /// See [`Node::Rlink`].
    Rlink,
}

impl NodeType {
    /// The human-readable name of this node type.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Root => "repository root",
            NodeType::Project => "project",
            NodeType::Release => "release",
            NodeType::Rlink => "rlink",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Descriptor {
    /// A fresh root record with no children.
    pub fn new_root() -> Self {
        Self::new(Node::Root { projects: vec![] })
    }

    /// A fresh project record with no children.
    pub fn new_project() -> Self {
        Self::new(Node::Project {
            projects: vec![],
            releases: vec![],
        })
    }

    /// A fresh, undeployed release record.
    pub fn new_release() -> Self {
        Self::new(Node::Release {
            deployed: false,
            dependencies: vec![],
        })
    }

    /// A fresh rlink record pointing at `target`, with empty history.
    pub fn new_rlink(target: Utf8PathBuf) -> Self {
        Self::new(Node::Rlink {
            target,
            dependencies: vec![],
            history: vec![],
        })
    }

    fn new(node: Node) -> Self {
        Descriptor {
            last_modified_by: unavailable(),
            last_modified_time: 0,
            node,
        }
    }

    /// Reads and deserializes the descriptor stored in `dir`.
    pub fn load(dir: impl AsRef<Utf8Path>) -> Result<Self> {
        let text = fs::read_to_string(meta_path(dir.as_ref()).as_std_path())?;
        Ok(toml::from_str(&text)?)
    }

    /// Whether `dir` holds a descriptor file, distinguishing "not a
    /// repository element" from "not yet created".
    pub fn exists(dir: impl AsRef<Utf8Path>) -> bool {
        meta_path(dir.as_ref()).is_file()
    }

    /// Stamps the current user and time, then persists the record into
    /// `dir`, writing to a temporary file and renaming it into place so a
    /// concurrent reader never observes a torn descriptor.
    pub fn save(&mut self, dir: impl AsRef<Utf8Path>) -> Result<()> {
        let dir = dir.as_ref();
        self.last_modified_by = users::get_current_username()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(unavailable);
        self.last_modified_time = epoch_now();
        let text = toml::to_string(self)?;
        let temp = dir.join(DESCRIPTOR_TEMP_FILE);
        fs::write(temp.as_std_path(), text)?;
        fs::rename(temp.as_std_path(), meta_path(dir).as_std_path())?;
        Ok(())
    }

    /// The type tag of this node.
    pub fn node_type(&self) -> NodeType {
        match self.node {
            Node::Root { .. } => NodeType::Root,
            Node::Project { .. } => NodeType::Project,
            Node::Release { .. } => NodeType::Release,
            Node::Rlink { .. } => NodeType::Rlink,
        }
    }

    /// Whether this is the repository root.
    pub fn is_root(&self) -> bool {
        matches!(self.node, Node::Root { .. })
    }

    /// Whether this node can hold no children.
    pub fn is_leaf(&self) -> bool {
        matches!(self.node, Node::Release { .. } | Node::Rlink { .. })
    }

    /// Whether a project may be created directly below this node.
    pub fn accepts_project(&self) -> bool {
        match &self.node {
            Node::Root { .. } => true,
            Node::Project { releases, .. } => releases.is_empty(),
            _ => false,
        }
    }

    /// Whether a release may be created directly below this node.
    pub fn accepts_release(&self) -> bool {
        matches!(&self.node, Node::Project { projects, .. } if projects.is_empty())
    }

    /// Whether an rlink may be created directly below this node. Requires at
    /// least one release to point at.
    pub fn accepts_rlink(&self) -> bool {
        matches!(
            &self.node,
            Node::Project { projects, releases } if projects.is_empty() && !releases.is_empty()
        )
    }

    /// Names of this node's children: releases if any exist, otherwise
    /// sub-projects, mirroring the container-exclusivity invariant.
    pub fn children(&self) -> &[String] {
        match &self.node {
            Node::Root { projects } => projects,
            Node::Project { projects, releases } => {
                if releases.is_empty() {
                    projects
                } else {
                    releases
                }
            }
            _ => &[],
        }
    }

    /// Whether this is a release that has been deployed.
    pub fn is_deployed(&self) -> bool {
        matches!(self.node, Node::Release { deployed: true, .. })
    }

    /// The current rlink target, if this is an rlink.
    pub fn target(&self) -> Option<&Utf8Path> {
        match &self.node {
            Node::Rlink { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Ordered label/value pairs for display. A release adds its deployed
    /// flag; an rlink adds the short name of its target.
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("Type", self.node_type().to_string()),
            ("Last Mod By", self.last_modified_by.clone()),
            ("Last Modified", format_timestamp(self.last_modified_time)),
        ];
        match &self.node {
            Node::Release { deployed, .. } => {
                fields.push(("Dpl", if *deployed { "Yes".to_owned() } else { String::new() }));
            }
            Node::Rlink { target, .. } => {
                let short = target.file_name().unwrap_or(target.as_str());
                fields.push(("Target", short.to_owned()));
            }
            _ => {}
        }
        fields
    }

    /// Records `name` as a child project. Callers must have consulted
    /// [`accepts_project`](Self::accepts_project) first.
    pub(crate) fn add_project(&mut self, name: &str) {
        if let Node::Root { projects } | Node::Project { projects, .. } = &mut self.node {
            projects.push(name.to_owned());
        }
    }

    /// Records `name` as a child release or rlink. Callers must have
    /// consulted the matching accepts-predicate first.
    pub(crate) fn add_release(&mut self, name: &str) {
        if let Node::Project { releases, .. } = &mut self.node {
            releases.push(name.to_owned());
        }
    }

    /// Repoints an rlink at `new_target`, pushing the superseded target and
    /// its modifier stamp onto the front of the history.
    pub(crate) fn repoint(&mut self, new_target: Utf8PathBuf) {
        let modified_by = self.last_modified_by.clone();
        let modified_time = self.last_modified_time;
        if let Node::Rlink { target, history, .. } = &mut self.node {
            history.insert(
                0,
                HistoryEntry {
                    target: std::mem::replace(target, new_target),
                    modified_by,
                    modified_time,
                },
            );
        }
    }
}

fn meta_path(dir: &Utf8Path) -> Utf8PathBuf {
    dir.join(DESCRIPTOR_FILE)
}

pub(crate) fn epoch_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

/// Renders an epoch-seconds timestamp for human display, with "unavailable"
/// for the zero sentinel.
pub fn format_timestamp(epoch: i64) -> String {
    if epoch == 0 {
        return unavailable();
    }
    match Local.timestamp_opt(epoch, 0) {
        LocalResult::Single(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => unavailable(),
    }
}
