use std::env;
use std::process::Command;

fn main() {
    let build_id = env::var("STUDIO_BUILD_ID")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(git_short_rev)
        .unwrap_or_else(|| "dev".to_string());

    println!("cargo:rustc-env=STUDIO_EMBEDDED_BUILD_ID={}", build_id.trim());
    println!("cargo:rerun-if-env-changed=STUDIO_BUILD_ID");
    println!("cargo:rerun-if-changed=build.rs");
}

fn git_short_rev() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let rev = String::from_utf8(output.stdout).ok()?;
    let rev = rev.trim();
    if rev.is_empty() {
        None
    } else {
        Some(rev.to_string())
    }
}
