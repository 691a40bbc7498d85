use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-env-changed=VIGIL_GIT_SHA");

    if std::env::var("VIGIL_GIT_SHA").is_ok() {
        return;
    }

    let output = match Command::new("git").args(["rev-parse", "HEAD"]).output() {
        Ok(output) if output.status.success() => output,
        _ => {
            println!("cargo:warning=git revision unavailable, version will be reported as unknown");
            return;
        }
    };

    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !sha.is_empty() {
        println!("cargo:rustc-env=VIGIL_GIT_SHA={}", sha);
    }
}
