use std::process::Command;

/// `<crate version>+<git describe>` for checkouts, or whatever the packager sets in
/// `WORKGROVE_VERSION`. Tarball builds without git report the bare crate version.
fn main() {
    println!("cargo:rerun-if-env-changed=WORKGROVE_VERSION");
    println!("cargo:rerun-if-changed=.git/HEAD");

    let pkg = env!("CARGO_PKG_VERSION");
    let version = match std::env::var("WORKGROVE_VERSION") {
        Ok(pinned) if !pinned.trim().is_empty() => pinned,
        _ => match git_describe() {
            Some(describe) => format!("{pkg}+{describe}"),
            None => pkg.to_string(),
        },
    };
    println!("cargo:rustc-env=WORKGROVE_VERSION={version}");
}

fn git_describe() -> Option<String> {
    let out = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=7"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let describe = String::from_utf8(out.stdout).ok()?.trim().to_string();
    (!describe.is_empty()).then_some(describe)
}
