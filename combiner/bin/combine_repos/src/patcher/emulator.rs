// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Foreign-architecture emulator deployment inside the patching chroot.
//!
//! When the host cannot execute the target architecture's binaries, an
//! emulator is located (a user-supplied binary, a user-supplied package, or
//! any matching `qemu-*` package of the original repositories), installed
//! into the chroot, and registered as the host's binary-format handler for
//! the target's ELF magic.

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{bail, Context, Result};
use chrootenv::{architecture_synonyms, is_architecture_compatible, BinfmtRegistration};
use processes::Runner;
use tracing::{info, warn};

/// The host machine's architecture.
pub fn host_architecture() -> Result<String> {
    let uname = nix::sys::utsname::uname().context("uname(2) failed")?;
    Ok(uname.machine().to_string_lossy().into_owned())
}

/// Sets up emulation for `architecture` inside the chroot at `root` if the
/// host needs it. Returns the live registration, or `None` when binaries
/// run natively.
pub fn deploy(
    root: &Path,
    architecture: &str,
    repositories: &[PathBuf],
    user_override: Option<&Path>,
    runner: &dyn Runner,
) -> Result<Option<BinfmtRegistration>> {
    let host = host_architecture()?;
    if is_architecture_compatible(&host, architecture) {
        return Ok(None);
    }

    let executable = install_emulator(root, architecture, repositories, user_override, runner)?;
    let registration = BinfmtRegistration::register(architecture, &executable)?;
    Ok(Some(registration))
}

/// Installs an emulator into the chroot and returns its chroot-relative
/// path. Binaries are preferred over packages.
fn install_emulator(
    root: &Path,
    architecture: &str,
    repositories: &[PathBuf],
    user_override: Option<&Path>,
    runner: &dyn Runner,
) -> Result<PathBuf> {
    if let Some(supplied) = user_override {
        if !supplied.is_file() {
            bail!(
                "Specified file {} does not exist or is not a file!",
                supplied.display()
            );
        }
        if supplied.extension().and_then(|e| e.to_str()) != Some("rpm") {
            if let Some(installed) = install_user_executable(root, supplied, runner)? {
                return Ok(installed);
            }
            warn!("The specified emulator executable is not working.");
        }
    }

    unpack_emulator_packages(root, architecture, repositories, user_override, runner)?;
    find_working_executable(root, architecture, runner)
}

/// Copies a user-supplied emulator binary into the chroot after checking it
/// runs on the host.
fn install_user_executable(
    root: &Path,
    executable: &Path,
    runner: &dyn Runner,
) -> Result<Option<PathBuf>> {
    info!("Checking specified emulator executable {}...", executable.display());
    if !runner.check_command(executable) {
        return Ok(None);
    }
    let install_dir = root.join("usr/local/bin");
    std::fs::create_dir_all(&install_dir)?;
    let name = executable
        .file_name()
        .context("Emulator executable has no file name")?;
    std::fs::copy(executable, install_dir.join(name))?;
    Ok(Some(Path::new("/usr/local/bin").join(name)))
}

/// Unpacks emulator packages into the chroot: the user-supplied package, or
/// every matching `qemu-*` package of the original repositories.
fn unpack_emulator_packages(
    root: &Path,
    architecture: &str,
    repositories: &[PathBuf],
    user_override: Option<&Path>,
    runner: &dyn Runner,
) -> Result<()> {
    let mut packages: Vec<PathBuf> = Vec::new();
    match user_override {
        Some(package) if package.extension().is_some_and(|e| e == "rpm") => {
            packages.push(package.to_path_buf());
        }
        _ => {
            let expression = format!(r"^qemu.*\.{architecture}\.rpm$");
            for repository in repositories {
                packages.extend(fileutil::find_files_matching(repository, &expression)?);
            }
            if !packages.is_empty() {
                warn!("The following emulator packages will be unpacked in chroot:");
                for package in &packages {
                    warn!(" * {}", package.display());
                }
            }
        }
    }
    if packages.is_empty() {
        bail!("No emulator packages found for architecture {architecture}");
    }

    for package in packages {
        // rpm2cpio | cpio must run with the chroot as working directory so
        // the payload lands inside it.
        let script = format!(
            "rpm2cpio {} | cpio --extract --unconditional \
             --preserve-modification-time --make-directories",
            shell_escape(&package.to_string_lossy()),
        );
        runner
            .execute_and_check(Command::new("sh").arg("-c").arg(&script).current_dir(root))
            .with_context(|| format!("Failed to unpack package {}", package.display()))?;
    }
    Ok(())
}

/// Picks the first working emulator executable inside the chroot.
///
/// For each architecture synonym, `qemu-<arch>-binfmt` wrappers are probed
/// before plain `qemu-<arch>` binaries. Anything under a `bootstrap` subtree
/// belongs to a foreign toolchain and is skipped.
fn find_working_executable(
    root: &Path,
    architecture: &str,
    runner: &dyn Runner,
) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    for arch in architecture_synonyms(architecture) {
        for expression in [format!("^qemu-{arch}-binfmt$"), format!("^qemu-{arch}$")] {
            candidates.extend(fileutil::find_files_matching(root, &expression)?);
        }
    }
    candidates.retain(|path| {
        !path
            .components()
            .any(|c| c.as_os_str().to_string_lossy().contains("bootstrap"))
    });

    warn!("Found emulator executable candidates:");
    let mut working: Option<PathBuf> = None;
    for candidate in &candidates {
        let relative = candidate.strip_prefix(root).unwrap_or(candidate);
        let works = runner.check_command(candidate);
        warn!(
            " * /{} ({})",
            relative.display(),
            if works { "working" } else { "not working" }
        );
        if works && working.is_none() {
            working = Some(Path::new("/").join(relative));
        }
    }

    let Some(selected) = working else {
        bail!("No working emulator executables found!");
    };
    warn!("The following one was selected: {}", selected.display());
    Ok(selected)
}

fn shell_escape(s: &str) -> String {
    shell_escape::escape(s.into()).into_owned()
}
