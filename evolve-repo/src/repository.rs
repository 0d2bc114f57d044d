//! The repository engine: path validation, hierarchy rules and locked,
//! all-or-nothing mutations over the repository tree.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::OnceLock;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use tracing::info;

use crate::{
    argument,
    descriptor::{Descriptor, HistoryEntry, Node, NodeType},
    lock::DirLock,
    sync, Result,
};

/// Name of the artifact staging directory inside a release.
const SRC_DIR: &str = "src";
/// Name of the served artifact directory inside a release, and of the
/// symlink to it inside an rlink.
const BIN_DIR: &str = "bin";

fn project_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][\w.-]*$").expect("a valid literal pattern"))
}

fn child_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\w[\w.-]*$").expect("a valid literal pattern"))
}

/// A handle on one repository tree, rooted at a directory holding a root
/// [`Descriptor`].
///
/// All paths taken by operations are relative to the repository root.
/// Descriptors are re-read from disk on every call; nothing is cached in
/// memory between calls, so cooperating processes sharing the filesystem
/// observe each other's completed mutations. Mutations of a directory are
/// serialized by that directory's [`DirLock`]; reads take no lock and see a
/// self-consistent descriptor per load, not cross-directory consistency.
pub struct Repository {
    root: Utf8PathBuf,
}

impl Repository {
    /// Provisions a new repository in an existing, empty directory.
    pub fn init(path: impl AsRef<Utf8Path>) -> Result<Repository> {
        let root = normalize_root(path.as_ref());
        if !root.is_dir() {
            return Err(argument(format!(
                "path [{root}] does not correspond to a directory"
            )));
        }
        if Descriptor::exists(&root) {
            return Err(argument(format!(
                "path [{root}] corresponds to an existing repository"
            )));
        }
        if !sync::dir_names(&root)?.is_empty() {
            return Err(argument(format!(
                "path [{root}] does not correspond to an empty directory"
            )));
        }
        Descriptor::new_root().save(&root)?;
        info!("repository initialized at [{root}]");
        Ok(Repository { root })
    }

    /// Opens an existing repository, validating that `path` holds a root
    /// descriptor.
    pub fn open(path: impl AsRef<Utf8Path>) -> Result<Repository> {
        let root = normalize_root(path.as_ref());
        let is_root = Descriptor::load(&root).map(|meta| meta.is_root()).unwrap_or(false);
        if !is_root {
            return Err(argument(format!(
                "path [{root}] does not correspond to a repository root"
            )));
        }
        Ok(Repository { root })
    }

    /// The absolute path of the repository root.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Creates the project at `path`, creating any missing intermediate
    /// projects along the way, each under its own directory lock.
    ///
    /// All-or-nothing: on any failure after validation the partially created
    /// subtree is removed before the error propagates, leaving the tree as
    /// it was before the call.
    pub fn create_project(&self, path: &str) -> Result<()> {
        let path = rel(path);
        if path.is_empty() {
            return Err(argument("empty path specified for project"));
        }
        for segment in path.split('/') {
            if !project_name_pattern().is_match(segment) {
                return Err(argument(format!("illegal project name: [{segment}]")));
            }
        }
        let full = self.full(path);
        if full.exists() {
            let existing = Descriptor::load(&full)?;
            return Err(argument(format!(
                "project path corresponds to existing {}",
                existing.node_type()
            )));
        }

        let (parent, mut parent_meta) = self.nearest_ancestor(&full)?;
        if !parent_meta.accepts_project() {
            return Err(argument("invalid project location"));
        }
        let segments: Vec<String> = full
            .strip_prefix(&parent)
            .map_err(|_| argument("invalid project location"))?
            .as_str()
            .split('/')
            .map(str::to_owned)
            .collect();
        let first = parent.join(&segments[0]);

        let result: Result<()> = (|| {
            let lock = DirLock::acquire(&parent)?;
            create_project_chain(&parent, &segments)?;
            parent_meta.add_project(&segments[0]);
            parent_meta.save(&parent)?;
            lock.release()
        })();
        if let Err(err) = result {
            remove_tree(&first);
            return Err(err);
        }
        info!("created project [{path}]");
        Ok(())
    }

    /// Creates the release at `path` under its project, with empty `src`
    /// (group-writable) and `bin` directories. All-or-nothing, as for
    /// [`create_project`](Self::create_project).
    pub fn create_release(&self, path: &str) -> Result<()> {
        let path = rel(path);
        if path.is_empty() || !path.contains('/') {
            return Err(argument("cannot create release at repository root"));
        }
        let full = self.full(path);
        let (project, name) = split_parent(&full)?;
        let project = project.to_owned();
        if !project.exists() {
            return Err(argument(format!(
                "project path not found: [{}]",
                self.display_rel(&project)
            )));
        }
        if !child_name_pattern().is_match(name) {
            return Err(argument(format!("illegal release name: [{name}]")));
        }
        let mut project_meta = Descriptor::load(&project)?;
        if !project_meta.accepts_release() {
            return Err(argument("invalid release location"));
        }
        if full.exists() {
            return Err(argument(format!("release [{path}] already exists")));
        }

        let result: Result<()> = (|| {
            let lock = DirLock::acquire(&project)?;
            create_release_dirs(&full)?;
            project_meta.add_release(name);
            project_meta.save(&project)?;
            lock.release()
        })();
        if let Err(err) = result {
            remove_tree(&full);
            return Err(err);
        }
        info!("created release [{path}]");
        Ok(())
    }

    /// Creates an rlink named `name` beside the release at `release_path`,
    /// with a `bin` symlink to the release's `bin` directory.
    /// All-or-nothing, as for [`create_project`](Self::create_project).
    pub fn create_rlink(&self, release_path: &str, name: &str) -> Result<()> {
        let release_path = rel(release_path);
        let name = rel(name);
        if release_path.is_empty() || !release_path.contains('/') {
            return Err(argument("cannot create rlink at repository root"));
        }
        if name.contains('/') {
            return Err(argument("hierarchical rlinks not supported"));
        }
        let release = self.full(release_path);
        let (project, _) = split_parent(&release)?;
        let project = project.to_owned();
        if !project.exists() {
            return Err(argument(format!(
                "project path not found: [{}]",
                self.display_rel(&project)
            )));
        }
        if !release.exists() {
            return Err(argument(format!("release path not found: [{release_path}]")));
        }
        if Descriptor::load(&release)?.node_type() != NodeType::Release {
            return Err(argument(format!(
                "path [{release_path}] does not correspond to a release"
            )));
        }
        if !child_name_pattern().is_match(name) {
            return Err(argument(format!("illegal rlink name: [{name}]")));
        }
        let rlink = project.join(name);
        if rlink.exists() {
            let existing = Descriptor::load(&rlink)?;
            let hint = if existing.node_type() == NodeType::Rlink {
                " (did you mean `update'?)"
            } else {
                ""
            };
            return Err(argument(format!(
                "name corresponds to existing {}{hint}",
                existing.node_type()
            )));
        }
        let mut project_meta = Descriptor::load(&project)?;
        if !project_meta.accepts_rlink() {
            return Err(argument("invalid rlink location"));
        }

        let result: Result<()> = (|| {
            let lock = DirLock::acquire(&project)?;
            create_rlink_dir(&rlink, &release, release_path)?;
            project_meta.add_release(name);
            project_meta.save(&project)?;
            lock.release()
        })();
        if let Err(err) = result {
            remove_tree(&rlink);
            return Err(err);
        }
        info!("created rlink [{name}] -> [{release_path}]");
        Ok(())
    }

    /// Repoints the rlink `name` (a sibling of the release) at
    /// `release_path`, recording the superseded target at the front of the
    /// rlink's history. Repointing at the current target is rejected.
    ///
    /// The `bin` symlink is removed and recreated rather than renamed into
    /// place, so a concurrent reader may briefly observe no target at all.
    /// Every entry under the new `bin` tree has its mtime refreshed as a
    /// freshness signal for external watchers.
    pub fn update_rlink(&self, release_path: &str, name: &str) -> Result<()> {
        let release_path = rel(release_path);
        let name = rel(name);
        let release = self.full(release_path);
        let (project, _) = split_parent(&release)?;
        let rlink = project.join(name);
        if !release.exists() {
            return Err(argument(format!("release not found: [{release_path}]")));
        }
        if !rlink.exists() {
            return Err(argument(format!("rlink not found: [{name}]")));
        }
        let release_meta = Descriptor::load(&release)?;
        if release_meta.node_type() != NodeType::Release {
            return Err(argument(format!(
                "path [{release_path}] does not correspond to a release"
            )));
        }
        let mut rlink_meta = Descriptor::load(&rlink)?;
        if rlink_meta.node_type() != NodeType::Rlink {
            return Err(argument(format!("path [{name}] does not correspond to an rlink")));
        }

        let lock = DirLock::acquire(&rlink)?;
        if rlink_meta.target() == Some(Utf8Path::new(release_path)) {
            return Err(argument("existing and specified targets are the same"));
        }
        let link = rlink.join(BIN_DIR);
        fs::remove_file(link.as_std_path())?;
        std::os::unix::fs::symlink(
            release.join(BIN_DIR).as_std_path(),
            link.as_std_path(),
        )?;
        sync::touch_tree(&link)?;
        rlink_meta.repoint(Utf8PathBuf::from(release_path));
        rlink_meta.save(&rlink)?;
        lock.release()?;
        info!("updated rlink [{name}] -> [{release_path}]");
        Ok(())
    }

    /// Mirrors the artifact at `artifact` (relative to the release's `src`
    /// directory) into the release's `bin` directory. Rejected once the
    /// release is deployed; freely repeatable before then, which is why no
    /// lock is taken.
    pub fn install(&self, release_path: &str, artifact: &str) -> Result<()> {
        let release_path = rel(release_path);
        let artifact = rel(artifact);
        let release = self.full(release_path);
        if !release.exists() {
            return Err(argument(format!("release not found: [{release_path}]")));
        }
        let meta = Descriptor::load(&release)?;
        if meta.node_type() != NodeType::Release {
            return Err(argument(format!(
                "path [{release_path}] does not correspond to a release"
            )));
        }
        if meta.is_deployed() {
            return Err(argument(format!(
                "release [{release_path}] is locked and deployed"
            )));
        }
        let source = release.join(SRC_DIR).join(artifact);
        if !source.exists() {
            return Err(argument(format!(
                "build artifact path not found: [{release_path}/{SRC_DIR}/{artifact}]"
            )));
        }
        let bin = release.join(BIN_DIR);
        if source.is_dir() {
            sync::mirror(&source, &bin)?;
        } else {
            let target = bin.join(source.file_name().unwrap_or(artifact));
            fs::copy(source.as_std_path(), target.as_std_path())?;
        }
        info!("installed [{artifact}] into [{release_path}]");
        Ok(())
    }

    /// Marks the release at `release_path` deployed: a one-way transition
    /// that also sets its `bin` directory to read/execute-for-all. Requires
    /// at least one installed artifact.
    pub fn deploy(&self, release_path: &str) -> Result<()> {
        let release_path = rel(release_path);
        let release = self.full(release_path);
        if !release.exists() {
            return Err(argument(format!("release not found: [{release_path}]")));
        }
        if Descriptor::load(&release)?.node_type() != NodeType::Release {
            return Err(argument(format!(
                "path [{release_path}] does not correspond to a release"
            )));
        }
        let bin = release.join(BIN_DIR);
        if sync::dir_names(&bin)?.is_empty() {
            return Err(argument(format!(
                "no build artifacts installed for release [{release_path}]"
            )));
        }

        let lock = DirLock::acquire(&release)?;
        // Re-read under the lock: a concurrent deploy may have completed
        // between validation and acquisition.
        let mut meta = Descriptor::load(&release)?;
        if meta.is_deployed() {
            return Err(argument(format!("release [{release_path}] already deployed")));
        }
        if let Node::Release { deployed, .. } = &mut meta.node {
            *deployed = true;
        }
        meta.save(&release)?;
        fs::set_permissions(bin.as_std_path(), fs::Permissions::from_mode(0o755))?;
        lock.release()?;
        info!("deployed release [{release_path}]");
        Ok(())
    }

    /// Removes an abandoned lock marker at `path` by steal-acquiring and
    /// immediately releasing the directory lock. Fails with the usual busy
    /// error if a live process still holds the lock.
    pub fn clean(&self, path: &str) -> Result<()> {
        let path = rel(path);
        let full = self.full(path);
        if !full.exists() {
            return Err(argument(format!("repository location not found: [{path}]")));
        }
        DirLock::steal(&full)?.release()
    }

    /// The descriptor at `path` together with each direct child's
    /// descriptor, keyed by name. Lockless read.
    pub fn contents(&self, path: &str) -> Result<(Descriptor, BTreeMap<String, Descriptor>)> {
        let path = rel(path);
        let full = self.full(path);
        if !full.exists() {
            return Err(argument(format!("repository location not found: [{path}]")));
        }
        if !Descriptor::exists(&full) {
            return Err(argument(format!(
                "location does not correspond to repository element: [{path}]"
            )));
        }
        let target = Descriptor::load(&full)?;
        let mut children = BTreeMap::new();
        for child in target.children() {
            children.insert(child.clone(), Descriptor::load(full.join(child))?);
        }
        Ok((target, children))
    }

    /// Depth-first, pre-order traversal from `path`.
    ///
    /// At each node `visit` receives the repository-relative path, a stack
    /// recording for each ancestor level whether more siblings followed at
    /// descent time (accurate indentation state for tree drawing; rendering
    /// itself is the caller's concern), and the node's type. Children are
    /// visited in lexical name order, hidden entries are skipped, and leaf
    /// nodes are not descended into.
    pub fn walk<F>(&self, path: &str, mut visit: F) -> Result<()>
    where
        F: FnMut(&Utf8Path, &[bool], NodeType),
    {
        let path = rel(path);
        if !self.full(path).exists() {
            return Err(argument(format!("repository location not found: [{path}]")));
        }
        self.walk_inner(Utf8Path::new(path), &mut vec![false], &mut visit)
    }

    fn walk_inner(
        &self,
        path: &Utf8Path,
        more: &mut Vec<bool>,
        visit: &mut dyn FnMut(&Utf8Path, &[bool], NodeType),
    ) -> Result<()> {
        let full = self.full(path.as_str());
        let meta = Descriptor::load(&full)?;
        visit(path, more, meta.node_type());
        if meta.is_leaf() {
            return Ok(());
        }
        let names: Vec<String> = sync::dir_names(&full)?
            .into_iter()
            .filter(|name| !name.starts_with('.'))
            .collect();
        for (index, name) in names.iter().enumerate() {
            more.push(index + 1 < names.len());
            self.walk_inner(&path.join(name), more, visit)?;
            more.pop();
        }
        Ok(())
    }

    /// The repoint history of the rlink at `path`, most recent first. Empty
    /// if the rlink has never been repointed.
    pub fn history(&self, path: &str) -> Result<Vec<HistoryEntry>> {
        let path = rel(path);
        let full = self.full(path);
        if !full.exists() {
            return Err(argument(format!("rlink path not found: [{path}]")));
        }
        let meta = Descriptor::load(&full)?;
        match meta.node {
            Node::Rlink { history, .. } => Ok(history),
            _ => Err(argument(format!(
                "path does not correspond to an rlink: [{path}]"
            ))),
        }
    }

    fn full(&self, path: &str) -> Utf8PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }

    fn display_rel<'a>(&self, path: &'a Utf8Path) -> &'a str {
        path.strip_prefix(&self.root)
            .map(Utf8Path::as_str)
            .unwrap_or(path.as_str())
    }

    /// Walks up from `path` to the nearest directory that already exists
    /// and loads its descriptor. The repository root always exists, so the
    /// search terminates within the tree.
    fn nearest_ancestor(&self, path: &Utf8Path) -> Result<(Utf8PathBuf, Descriptor)> {
        let mut current = path;
        while let Some(parent) = current.parent() {
            if parent.exists() {
                let meta = Descriptor::load(parent)?;
                return Ok((parent.to_owned(), meta));
            }
            current = parent;
        }
        Err(argument(format!("no existing ancestor for [{path}]")))
    }
}

/// Creates a chain of nested project directories, innermost last, each with
/// a fresh descriptor saved under its own lock. The caller removes the whole
/// chain on failure.
fn create_project_chain(parent: &Utf8Path, segments: &[String]) -> Result<()> {
    let Some((first, rest)) = segments.split_first() else {
        return Ok(());
    };
    let dir = parent.join(first);
    fs::create_dir(dir.as_std_path())?;
    let lock = DirLock::acquire(&dir)?;
    let mut meta = Descriptor::new_project();
    if let Some(next) = rest.first() {
        create_project_chain(&dir, rest)?;
        meta.add_project(next);
    }
    meta.save(&dir)?;
    lock.release()
}

fn create_release_dirs(release: &Utf8Path) -> Result<()> {
    fs::create_dir(release.as_std_path())?;
    let lock = DirLock::acquire(release)?;
    let src = release.join(SRC_DIR);
    fs::create_dir(src.as_std_path())?;
    fs::set_permissions(src.as_std_path(), fs::Permissions::from_mode(0o775))?;
    fs::create_dir(release.join(BIN_DIR).as_std_path())?;
    Descriptor::new_release().save(release)?;
    lock.release()
}

fn create_rlink_dir(rlink: &Utf8Path, release: &Utf8Path, target: &str) -> Result<()> {
    fs::create_dir(rlink.as_std_path())?;
    let lock = DirLock::acquire(rlink)?;
    std::os::unix::fs::symlink(
        release.join(BIN_DIR).as_std_path(),
        rlink.join(BIN_DIR).as_std_path(),
    )?;
    Descriptor::new_rlink(Utf8PathBuf::from(target)).save(rlink)?;
    lock.release()
}

/// Best-effort rollback of a partially created subtree.
fn remove_tree(path: &Utf8Path) {
    if path.exists() {
        let _ = fs::remove_dir_all(path.as_std_path());
    }
}

fn split_parent(path: &Utf8Path) -> Result<(&Utf8Path, &str)> {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => Ok((parent, name)),
        _ => Err(argument(format!("invalid path: [{path}]"))),
    }
}

fn normalize_root(path: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(path.as_str().trim().trim_end_matches('/'))
}

fn rel(path: &str) -> &str {
    path.trim().trim_matches('/')
}
