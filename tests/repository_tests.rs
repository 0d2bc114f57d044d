use std::fs;
use std::os::unix::fs::PermissionsExt;

use camino::{Utf8Path, Utf8PathBuf};
use evolve_repo::{Descriptor, DirLock, Node, NodeType, RepoError, Repository, LOCK_FILE};

fn new_repo() -> (tempfile::TempDir, Utf8PathBuf, Repository) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let repo = Repository::init(&root).unwrap();
    (dir, root, repo)
}

fn assert_argument(result: Result<(), RepoError>, fragment: &str) {
    match result {
        Err(RepoError::Argument(message)) => assert!(
            message.contains(fragment),
            "expected [{fragment}] in [{message}]"
        ),
        other => panic!("expected argument error containing [{fragment}], got {other:?}"),
    }
}

#[test]
fn create_project_with_intermediate_segments() {
    let (_guard, root, repo) = new_repo();
    repo.create_project("team/app").unwrap();

    let team = Descriptor::load(root.join("team")).unwrap();
    assert_eq!(team.node_type(), NodeType::Project);
    assert_eq!(team.children(), ["app"]);

    let app = Descriptor::load(root.join("team/app")).unwrap();
    assert_eq!(app.node_type(), NodeType::Project);
    assert!(app.children().is_empty());

    let top = Descriptor::load(&root).unwrap();
    assert_eq!(top.children(), ["team"]);
}

#[test]
fn create_project_conflict_names_the_existing_type() {
    let (_guard, _root, repo) = new_repo();
    repo.create_project("team/app").unwrap();
    repo.create_release("team/app/v1").unwrap();

    assert_argument(repo.create_project("team"), "existing project");
    assert_argument(repo.create_project("team/app/v1"), "existing release");
}

#[test]
fn create_release_populates_src_and_bin() {
    let (_guard, root, repo) = new_repo();
    repo.create_project("team/app").unwrap();
    repo.create_release("team/app/v1").unwrap();

    let app = Descriptor::load(root.join("team/app")).unwrap();
    assert_eq!(app.children(), ["v1"]);

    let src = root.join("team/app/v1/src");
    let bin = root.join("team/app/v1/bin");
    assert!(src.is_dir());
    assert!(bin.is_dir());
    assert_eq!(fs::read_dir(src.as_std_path()).unwrap().count(), 0);
    assert_eq!(fs::read_dir(bin.as_std_path()).unwrap().count(), 0);

    let mode = fs::metadata(src.as_std_path()).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o775);

    let release = Descriptor::load(root.join("team/app/v1")).unwrap();
    assert_eq!(release.node_type(), NodeType::Release);
    assert!(!release.is_deployed());
}

#[test]
fn create_release_at_root_is_rejected() {
    let (_guard, _root, repo) = new_repo();
    assert_argument(repo.create_release("v1"), "cannot create release at repository root");
}

#[test]
fn hierarchy_rules_are_exclusive() {
    let (_guard, _root, repo) = new_repo();
    repo.create_project("team/app").unwrap();
    repo.create_release("team/app/v1").unwrap();

    // A project holding releases refuses sub-projects, and vice versa.
    assert_argument(repo.create_project("team/app/sub"), "invalid project location");
    assert_argument(repo.create_release("team/v1"), "invalid release location");

    // Rlinks need at least one release to point at.
    repo.create_project("other").unwrap();
    assert_argument(
        repo.create_rlink("other/missing", "prod"),
        "release path not found",
    );
}

#[test]
fn create_rlink_links_bin_to_the_target_release() {
    let (_guard, root, repo) = new_repo();
    repo.create_project("team/app").unwrap();
    repo.create_release("team/app/v1").unwrap();
    repo.create_rlink("team/app/v1", "prod").unwrap();

    let link = root.join("team/app/prod/bin");
    let target = fs::read_link(link.as_std_path()).unwrap();
    assert_eq!(target, root.join("team/app/v1/bin").as_std_path());

    let rlink = Descriptor::load(root.join("team/app/prod")).unwrap();
    assert_eq!(rlink.node_type(), NodeType::Rlink);
    assert_eq!(rlink.target(), Some(Utf8Path::new("team/app/v1")));
    assert!(repo.history("team/app/prod").unwrap().is_empty());

    let app = Descriptor::load(root.join("team/app")).unwrap();
    assert_eq!(app.children(), ["v1", "prod"]);
}

#[test]
fn create_rlink_collision_suggests_update() {
    let (_guard, _root, repo) = new_repo();
    repo.create_project("team/app").unwrap();
    repo.create_release("team/app/v1").unwrap();
    repo.create_rlink("team/app/v1", "prod").unwrap();

    assert_argument(
        repo.create_rlink("team/app/v1", "prod"),
        "existing rlink (did you mean `update'?)",
    );
    assert_argument(repo.create_rlink("team/app/v1", "v1"), "existing release");
}

#[test]
fn create_rlink_requires_a_release_target() {
    let (_guard, root, repo) = new_repo();
    repo.create_project("team/app").unwrap();
    repo.create_release("team/app/v1").unwrap();
    repo.create_rlink("team/app/v1", "prod").unwrap();

    // An rlink may not chain through another rlink.
    assert_argument(
        repo.create_rlink("team/app/prod", "prod2"),
        "does not correspond to a release",
    );
    assert!(!root.join("team/app/prod2").exists());

    // Nor point at a project.
    assert_argument(
        repo.create_rlink("team/app", "prod3"),
        "does not correspond to a release",
    );

    let app = Descriptor::load(root.join("team/app")).unwrap();
    assert_eq!(app.children(), ["v1", "prod"]);
}

#[test]
fn install_then_deploy_freezes_the_release() {
    let (_guard, root, repo) = new_repo();
    repo.create_project("team/app").unwrap();
    repo.create_release("team/app/v1").unwrap();
    fs::write(root.join("team/app/v1/src/x.bin").as_std_path(), "artifact").unwrap();

    repo.install("team/app/v1", "x.bin").unwrap();
    assert_eq!(
        fs::read_to_string(root.join("team/app/v1/bin/x.bin").as_std_path()).unwrap(),
        "artifact"
    );

    repo.deploy("team/app/v1").unwrap();
    let release = Descriptor::load(root.join("team/app/v1")).unwrap();
    assert!(release.is_deployed());
    let mode = fs::metadata(root.join("team/app/v1/bin").as_std_path())
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);

    assert_argument(repo.install("team/app/v1", "x.bin"), "locked and deployed");
}

#[test]
fn install_mirrors_directory_artifacts() {
    let (_guard, root, repo) = new_repo();
    repo.create_project("team/app").unwrap();
    repo.create_release("team/app/v1").unwrap();
    let src = root.join("team/app/v1/src");
    fs::create_dir_all(src.join("dist/lib").as_std_path()).unwrap();
    fs::write(src.join("dist/a.bin").as_std_path(), "a").unwrap();
    fs::write(src.join("dist/lib/b.bin").as_std_path(), "b").unwrap();

    repo.install("team/app/v1", "dist").unwrap();
    let bin = root.join("team/app/v1/bin");
    assert!(bin.join("a.bin").is_file());
    assert!(bin.join("lib/b.bin").is_file());

    // A second install mirrors exactly: removed sources disappear from bin.
    fs::remove_file(src.join("dist/a.bin").as_std_path()).unwrap();
    repo.install("team/app/v1", "dist").unwrap();
    assert!(!bin.join("a.bin").exists());
    assert!(bin.join("lib/b.bin").is_file());
}

#[test]
fn install_rejects_a_missing_artifact() {
    let (_guard, _root, repo) = new_repo();
    repo.create_project("team/app").unwrap();
    repo.create_release("team/app/v1").unwrap();
    assert_argument(
        repo.install("team/app/v1", "nope.bin"),
        "build artifact path not found",
    );
}

#[test]
fn deploy_requires_installed_artifacts() {
    let (_guard, _root, repo) = new_repo();
    repo.create_project("team/app").unwrap();
    repo.create_release("team/app/v1").unwrap();
    assert_argument(repo.deploy("team/app/v1"), "no build artifacts installed");
}

#[test]
fn deploy_is_one_way() {
    let (_guard, root, repo) = new_repo();
    repo.create_project("team/app").unwrap();
    repo.create_release("team/app/v1").unwrap();
    fs::write(root.join("team/app/v1/src/x.bin").as_std_path(), "x").unwrap();
    repo.install("team/app/v1", "x.bin").unwrap();
    repo.deploy("team/app/v1").unwrap();

    let stamped = Descriptor::load(root.join("team/app/v1")).unwrap().last_modified_time;
    assert_argument(repo.deploy("team/app/v1"), "already deployed");
    let after = Descriptor::load(root.join("team/app/v1")).unwrap().last_modified_time;
    assert_eq!(stamped, after);
}

#[test]
fn deploy_rechecks_the_flag_under_the_lock() {
    let (_guard, root, repo) = new_repo();
    repo.create_project("team/app").unwrap();
    repo.create_release("team/app/v1").unwrap();
    fs::write(root.join("team/app/v1/src/x.bin").as_std_path(), "x").unwrap();
    repo.install("team/app/v1", "x.bin").unwrap();

    // Another process deploys between this caller's validation and its
    // lock acquisition; the on-disk flag wins.
    let release = root.join("team/app/v1");
    let mut meta = Descriptor::load(&release).unwrap();
    if let Node::Release { deployed, .. } = &mut meta.node {
        *deployed = true;
    }
    meta.save(&release).unwrap();
    let stamped = Descriptor::load(&release).unwrap().last_modified_time;

    assert_argument(repo.deploy("team/app/v1"), "already deployed");
    assert_eq!(Descriptor::load(&release).unwrap().last_modified_time, stamped);
    assert!(!release.join(LOCK_FILE).exists());
}

#[test]
fn update_rlink_repoints_and_records_history() {
    let (_guard, root, repo) = new_repo();
    repo.create_project("team/app").unwrap();
    repo.create_release("team/app/v1").unwrap();
    repo.create_release("team/app/v2").unwrap();
    repo.create_rlink("team/app/v1", "prod").unwrap();
    fs::write(root.join("team/app/v2/bin/served.bin").as_std_path(), "v2").unwrap();

    repo.update_rlink("team/app/v2", "prod").unwrap();

    let link = fs::read_link(root.join("team/app/prod/bin").as_std_path()).unwrap();
    assert_eq!(link, root.join("team/app/v2/bin").as_std_path());

    let history = repo.history("team/app/prod").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].target, "team/app/v1");

    // Repointing back stacks a second entry, most recent first.
    repo.update_rlink("team/app/v1", "prod").unwrap();
    let history = repo.history("team/app/prod").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].target, "team/app/v2");
    assert_eq!(history[1].target, "team/app/v1");
}

#[test]
fn update_rlink_rejects_the_current_target() {
    let (_guard, root, repo) = new_repo();
    repo.create_project("team/app").unwrap();
    repo.create_release("team/app/v1").unwrap();
    repo.create_rlink("team/app/v1", "prod").unwrap();

    assert_argument(
        repo.update_rlink("team/app/v1", "prod"),
        "existing and specified targets are the same",
    );
    // The rejected no-op released its lock.
    assert!(!root.join("team/app/prod").join(LOCK_FILE).exists());
}

#[test]
fn failed_create_rolls_back_cleanly() {
    let (_guard, root, repo) = new_repo();
    repo.create_project("team/app").unwrap();
    let project = root.join("team/app");

    let held = DirLock::acquire(&project).unwrap();
    assert!(matches!(
        repo.create_release("team/app/v1"),
        Err(RepoError::LockBusy(_))
    ));
    held.release().unwrap();

    // No lingering subtree, no appended child.
    assert!(!root.join("team/app/v1").exists());
    let app = Descriptor::load(&project).unwrap();
    assert!(app.children().is_empty());

    // The same create succeeds once the lock is free.
    repo.create_release("team/app/v1").unwrap();
}

#[test]
fn failed_project_create_removes_the_whole_chain() {
    let (_guard, root, repo) = new_repo();
    let held = DirLock::acquire(&root).unwrap();
    assert!(matches!(
        repo.create_project("team/app"),
        Err(RepoError::LockBusy(_))
    ));
    drop(held);

    assert!(!root.join("team").exists());
    assert!(Descriptor::load(&root).unwrap().children().is_empty());
}

#[test]
fn clean_fails_against_a_live_holder() {
    let (_guard, root, repo) = new_repo();
    repo.create_project("team").unwrap();

    let held = DirLock::acquire(root.join("team")).unwrap();
    assert!(matches!(repo.clean("team"), Err(RepoError::LockBusy(_))));
    held.release().unwrap();
}

#[test]
fn clean_removes_a_stale_marker() {
    let (_guard, root, repo) = new_repo();
    repo.create_project("team").unwrap();
    let marker = root.join("team").join(LOCK_FILE);
    fs::write(marker.as_std_path(), "").unwrap();

    repo.clean("team").unwrap();
    assert!(!marker.exists());
}

#[test]
fn contents_returns_target_and_child_descriptors() {
    let (_guard, _root, repo) = new_repo();
    repo.create_project("team/app").unwrap();
    repo.create_release("team/app/v1").unwrap();
    repo.create_rlink("team/app/v1", "prod").unwrap();

    let (target, children) = repo.contents("team/app").unwrap();
    assert_eq!(target.node_type(), NodeType::Project);
    assert_eq!(children.len(), 2);
    assert_eq!(children["v1"].node_type(), NodeType::Release);
    assert_eq!(children["prod"].node_type(), NodeType::Rlink);

    let (root_meta, root_children) = repo.contents("").unwrap();
    assert_eq!(root_meta.node_type(), NodeType::Root);
    assert_eq!(root_children.len(), 1);
}

#[test]
fn contents_rejects_non_repository_locations() {
    let (_guard, _root, repo) = new_repo();
    repo.create_project("team/app").unwrap();
    repo.create_release("team/app/v1").unwrap();

    assert!(matches!(
        repo.contents("team/nope"),
        Err(RepoError::Argument(message)) if message.contains("not found")
    ));
    // Exists on disk, but holds no descriptor.
    assert!(matches!(
        repo.contents("team/app/v1/src"),
        Err(RepoError::Argument(message)) if message.contains("repository element")
    ));
}

#[test]
fn walk_visits_pre_order_with_sibling_stack() {
    let (_guard, _root, repo) = new_repo();
    repo.create_project("alpha").unwrap();
    repo.create_project("beta").unwrap();
    repo.create_release("alpha/v1").unwrap();
    repo.create_release("alpha/v2").unwrap();

    let mut visits: Vec<(String, Vec<bool>, NodeType)> = Vec::new();
    repo.walk("", |path, more, node_type| {
        visits.push((path.to_string(), more.to_vec(), node_type));
    })
    .unwrap();

    let expected = [
        ("", vec![false], NodeType::Root),
        ("alpha", vec![false, true], NodeType::Project),
        ("alpha/v1", vec![false, true, true], NodeType::Release),
        ("alpha/v2", vec![false, true, false], NodeType::Release),
        ("beta", vec![false, false], NodeType::Project),
    ];
    assert_eq!(visits.len(), expected.len());
    for (visit, (path, more, node_type)) in visits.iter().zip(expected) {
        assert_eq!(visit.0, path);
        assert_eq!(visit.1, more);
        assert_eq!(visit.2, node_type);
    }
}

#[test]
fn walk_does_not_descend_into_leaves() {
    let (_guard, _root, repo) = new_repo();
    repo.create_project("team/app").unwrap();
    repo.create_release("team/app/v1").unwrap();

    let mut paths = Vec::new();
    repo.walk("team", |path, _, _| paths.push(path.to_string())).unwrap();
    // src and bin live below the release but are not repository nodes.
    assert_eq!(paths, ["team", "team/app", "team/app/v1"]);
}

#[test]
fn history_rejects_non_rlinks() {
    let (_guard, _root, repo) = new_repo();
    repo.create_project("team/app").unwrap();
    repo.create_release("team/app/v1").unwrap();

    assert!(matches!(
        repo.history("team/app/v1"),
        Err(RepoError::Argument(message)) if message.contains("does not correspond to an rlink")
    ));
    assert!(matches!(
        repo.history("team/nope"),
        Err(RepoError::Argument(message)) if message.contains("not found")
    ));
}
