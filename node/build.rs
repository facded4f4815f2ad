use std::process::Command;

// Sources for the commit shown by `birthbook-node version`, in priority order.
const COMMIT_ENV_VARS: [&str; 2] = ["GIT_COMMIT_HASH", "GITHUB_SHA"];

fn main() {
    for var in COMMIT_ENV_VARS {
        println!("cargo:rerun-if-env-changed={var}");
    }
    println!("cargo:rerun-if-changed=../.git/HEAD");

    if let Some(commit) = commit_from_env().or_else(commit_from_git) {
        println!("cargo:rustc-env=GIT_COMMIT_HASH={commit}");
    }
}

fn commit_from_env() -> Option<String> {
    COMMIT_ENV_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|sha| short_sha(&sha))
        .find(|sha| !sha.is_empty())
}

fn commit_from_git() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(short_sha(&String::from_utf8_lossy(&output.stdout))).filter(|sha| !sha.is_empty())
}

// CI provides full 40-character SHAs; version output uses the short form.
fn short_sha(raw: &str) -> String {
    raw.trim().chars().take(12).collect()
}
