use std::process::Command;

/// Short commit hash of the checkout, or "unknown" outside git.
fn git_commit() -> String {
    let output = Command::new("git").args(["rev-parse", "--short=7", "HEAD"]).output();
    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).trim().to_string(),
        _ => "unknown".to_string(),
    }
}

fn main() {
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rustc-env=GIT_COMMIT_HASH={}", git_commit());
    println!(
        "cargo:rustc-env=TARGET={}",
        std::env::var("TARGET").unwrap_or_else(|_| "unknown".to_string())
    );
}
