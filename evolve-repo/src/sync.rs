//! Filesystem helpers: artifact mirroring and freshness propagation.

use std::fs;

use camino::Utf8Path;
use nix::sys::time::{TimeVal, TimeValLike};

use crate::{descriptor, Result};

/// Lists the entry names of `dir` in lexical order.
pub(crate) fn dir_names(dir: &Utf8Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir.as_std_path())? {
        let entry = entry?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Mirrors the directory `src` into `dst`: entries missing from the source
/// are deleted from the destination, everything else is copied over, so the
/// destination ends up matching the source exactly.
pub(crate) fn mirror(src: &Utf8Path, dst: &Utf8Path) -> Result<()> {
    for name in dir_names(dst)? {
        if !src.join(&name).exists() {
            remove_entry(&dst.join(&name))?;
        }
    }
    for name in dir_names(src)? {
        let from = src.join(&name);
        let to = dst.join(&name);
        if from.is_dir() {
            if to.exists() && !to.is_dir() {
                fs::remove_file(to.as_std_path())?;
            }
            if !to.exists() {
                fs::create_dir(to.as_std_path())?;
            }
            mirror(&from, &to)?;
        } else {
            if to.is_dir() {
                fs::remove_dir_all(to.as_std_path())?;
            }
            fs::copy(from.as_std_path(), to.as_std_path())?;
        }
    }
    Ok(())
}

fn remove_entry(path: &Utf8Path) -> Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path.as_std_path())?;
    } else {
        fs::remove_file(path.as_std_path())?;
    }
    Ok(())
}

/// Sets the access and modification times of everything below `dir` to now,
/// recursively. External watchers treat mtimes under an rlink's `bin` tree
/// as a freshness signal after a repoint.
pub(crate) fn touch_tree(dir: &Utf8Path) -> Result<()> {
    let now = TimeVal::seconds(descriptor::epoch_now());
    for name in dir_names(dir)? {
        let path = dir.join(&name);
        nix::sys::stat::utimes(path.as_std_path(), &now, &now)?;
        if path.is_dir() {
            touch_tree(&path)?;
        }
    }
    Ok(())
}
