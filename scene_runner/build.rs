use std::error::Error;
use std::ffi::OsStr;
use std::fs;
use std::process::Command;

/// Runs a git command and flattens its output to a single line.
///
/// Returns an empty string when git is unavailable or the workspace is not a repository.
fn git_command_stdout<I: IntoIterator<Item = S>, S: AsRef<OsStr>>(args: I) -> String {
    match Command::new("git").args(args).output() {
        Ok(output) if output.status.success() => String::from_utf8_lossy(output.stdout.as_slice())
            .trim_end_matches('\n')
            .replace('\n', ";"),
        _ => String::new(),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    // Prepare environment variables that will be baked into the binary
    {
        let last_commit = git_command_stdout(&["show", "-s", "--format=Commit: %H%nAuthor: %an, %aI%nTitle: '%s'"]);
        let current_changes = git_command_stdout(&["status", "-b", "--porcelain"]);

        let hostname = hostname::get()?.to_string_lossy().into_owned();
        let timestamp = chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, false);

        println!("cargo:rustc-env=BRICKFEM_BUILD_TIMESTAMP={}", timestamp);
        println!("cargo:rustc-env=BRICKFEM_BUILD_HOSTNAME={}", hostname);
        println!("cargo:rustc-env=BRICKFEM_GIT_LAST_COMMIT={}", last_commit);
        println!("cargo:rustc-env=BRICKFEM_GIT_CHANGES={}", current_changes);
    }

    // Every git command touches the .git folder itself, so only its top-level entries are
    // watched. This rebuilds on a local commit. Outside of a repository only the sources count.
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
    if let Ok(entries) = fs::read_dir("../.git") {
        for entry in entries.filter_map(|e| e.ok()).filter(|e| e.metadata().is_ok()) {
            if let Some(path) = entry.path().to_str() {
                println!("cargo:rerun-if-changed={}", path);
            }
        }
    }

    Ok(())
}
