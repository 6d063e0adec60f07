use crate::command::Command;
use nix::unistd::{AccessFlags, access};
use std::borrow::Cow;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

/// Replace `argv[0]` with the absolute path of the program it names.
///
/// Never fails: when nothing matches, the command comes back unchanged and the
/// orchestrator reports it as not found before anything is spawned.
pub fn resolve(command: Command, search_paths: &OsStr, cwd: &Path) -> Command {
    let found = find_command_path(search_paths, cwd, Path::new(command.program()))
        .and_then(|path| path.to_str().map(String::from));
    match found {
        Some(program) => command.with_program(program),
        None => command,
    }
}

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - Absolute path: returns it if it is an executable file.
/// - Relative with several components (e.g. `./foo`, `bin/foo`): joined onto
///   `cwd` and returned if executable.
/// - Single component: search each directory in `search_paths` (PATH) in order
///   and return the first executable match. Empty entries are skipped and
///   relative entries are taken relative to `cwd`.
/// - Empty path: returns `None`.
pub fn find_command_path<'a>(
    search_paths: &OsStr,
    cwd: &Path,
    path: &'a Path,
) -> Option<Cow<'a, Path>> {
    if path.is_absolute() {
        return find_by_path(path).map(Cow::Borrowed);
    }

    let mut components = path.components();
    match (components.next(), components.next()) {
        (None, _) => None,
        (Some(x), None) if !path.as_os_str().as_encoded_bytes().contains(&b'/') => {
            find_in_path(search_paths, cwd, x.as_os_str()).map(Cow::Owned)
        }
        _ => {
            let joined = cwd.join(path);
            find_by_path(&joined).map(|p| Cow::Owned(p.to_path_buf()))
        }
    }
}

fn find_in_path(search_paths: &OsStr, cwd: &Path, cmd: &OsStr) -> Option<PathBuf> {
    for dir in std::env::split_paths(search_paths) {
        if dir.as_os_str().is_empty() {
            continue;
        }
        let path = cwd.join(dir).join(cmd);
        if find_by_path(&path).is_some() {
            return Some(path);
        }
    }
    None
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if is_executable(path) { Some(path) } else { None }
}

/// True for a regular file the current user may execute.
pub fn is_executable(path: &Path) -> bool {
    let is_file = fs::metadata(path).map(|m| m.is_file()).unwrap_or(false);
    is_file && access(path, AccessFlags::X_OK).is_ok()
}
