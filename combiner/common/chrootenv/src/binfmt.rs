// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use tracing::{info, warn};

/// Where the kernel exposes binary-format handler registration.
pub const BINFMT_MISC_DIR: &str = "/proc/sys/fs/binfmt_misc";

/// ELF magic of 32-bit little-endian ARM executables (machine type 0x28).
const ARM_MAGIC: &str = "\\x7fELF\\x01\\x01\\x01\\x00\\x00\\x00\\x00\\x00\\x00\\x00\\x00\\x00\\x02\\x00\\x28\\x00";
const ARM_MASK: &str = "\\xff\\xff\\xff\\xff\\xff\\xff\\xff\\x00\\xff\\xff\\xff\\xff\\xff\\xff\\xff\\xff\\xfe\\xff\\xff\\xff";

/// ELF magic of 64-bit little-endian ARM executables (machine type 0xb7).
const ARM64_MAGIC: &str = "\\x7fELF\\x02\\x01\\x01\\x00\\x00\\x00\\x00\\x00\\x00\\x00\\x00\\x00\\x02\\x00\\xb7";
const ARM64_MASK: &str = "\\xff\\xff\\xff\\xff\\xff\\xff\\xff\\x00\\xff\\xff\\xff\\xff\\xff\\xff\\xff\\xff\\xfe\\xff\\xff";

fn handler_name(architecture: &str) -> Result<&'static str> {
    if architecture.contains("arm64") || architecture.contains("aarch64") {
        Ok("arm64")
    } else if architecture.contains("arm") {
        Ok("arm")
    } else {
        bail!("Binary format handling for architecture {architecture} is not implemented");
    }
}

fn magic_mask(name: &str) -> (&'static str, &'static str) {
    match name {
        "arm" => (ARM_MAGIC, ARM_MASK),
        "arm64" => (ARM64_MAGIC, ARM64_MASK),
        _ => unreachable!("unknown handler name {name}"),
    }
}

/// A scoped binary-format handler registration.
///
/// Acquisition disables every pre-existing handler and registers the target
/// architecture's handler pointing at the emulator; release unregisters the
/// handler and re-enables the pre-existing ones. Exactly one registration
/// may be live per process: the orchestrator acquires it before fanning out
/// workers.
pub struct BinfmtRegistration {
    binfmt_dir: PathBuf,
    name: String,
}

impl BinfmtRegistration {
    /// Registers a handler under the default kernel directory.
    ///
    /// `interpreter` is the emulator's path as seen from inside the chroot
    /// (it must start with `/`). Plain emulator binaries use the `OC` flags;
    /// `-binfmt` wrappers use `P`, which changes how the kernel passes the
    /// binary to the interpreter.
    pub fn register(architecture: &str, interpreter: &Path) -> Result<Self> {
        Self::register_in(Path::new(BINFMT_MISC_DIR), architecture, interpreter)
    }

    /// Registers under an explicit binfmt directory. Tests point this at a
    /// scratch directory.
    pub fn register_in(binfmt_dir: &Path, architecture: &str, interpreter: &Path) -> Result<Self> {
        ensure!(
            interpreter.is_absolute(),
            "Emulator path {} must be absolute inside the chroot",
            interpreter.display()
        );
        let name = handler_name(architecture)?;
        let (magic, mask) = magic_mask(name);
        let flags = if interpreter
            .file_name()
            .is_some_and(|n| n.to_string_lossy().ends_with("-binfmt"))
        {
            "P"
        } else {
            "OC"
        };

        let status_path = binfmt_dir.join("status");
        ensure!(
            status_path.is_file(),
            "{} does not exist; is binfmt_misc mounted?",
            status_path.display()
        );
        std::fs::write(&status_path, "0\n")
            .with_context(|| format!("Failed to disable handlers via {}", status_path.display()))?;

        let line = format!(
            ":{}:M::{}:{}:{}:{}",
            name,
            magic,
            mask,
            interpreter.display(),
            flags
        );
        info!("Registering binary format handler {line}");
        let register_path = binfmt_dir.join("register");
        std::fs::write(&register_path, &line)
            .with_context(|| format!("Failed to write {}", register_path.display()))?;

        Ok(Self {
            binfmt_dir: binfmt_dir.to_path_buf(),
            name: name.to_string(),
        })
    }
}

impl Drop for BinfmtRegistration {
    fn drop(&mut self) {
        let entry = self.binfmt_dir.join(&self.name);
        if let Err(error) = std::fs::write(&entry, "-1\n") {
            warn!(
                "Failed to unregister binary format handler {}: {}",
                entry.display(),
                error
            );
        }
        let status = self.binfmt_dir.join("status");
        if let Err(error) = std::fs::write(&status, "1\n") {
            warn!(
                "Failed to re-enable binary format handlers: {}",
                error
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_restores() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let binfmt_dir = temp_dir.path();
        std::fs::write(binfmt_dir.join("status"), "1\n")?;

        {
            let _registration = BinfmtRegistration::register_in(
                binfmt_dir,
                "armv7l",
                Path::new("/usr/local/bin/qemu-arm"),
            )?;
            assert_eq!(std::fs::read_to_string(binfmt_dir.join("status"))?, "0\n");
            let line = std::fs::read_to_string(binfmt_dir.join("register"))?;
            assert!(line.starts_with(":arm:M::\\x7fELF"));
            assert!(line.ends_with(":/usr/local/bin/qemu-arm:OC"));
        }

        // Dropping the registration re-enables the pre-existing handlers.
        assert_eq!(std::fs::read_to_string(binfmt_dir.join("status"))?, "1\n");
        Ok(())
    }

    #[test]
    fn wrapper_binaries_use_the_p_flag() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let binfmt_dir = temp_dir.path();
        std::fs::write(binfmt_dir.join("status"), "1\n")?;

        let registration = BinfmtRegistration::register_in(
            binfmt_dir,
            "aarch64",
            Path::new("/usr/bin/qemu-aarch64-binfmt"),
        )?;
        let line = std::fs::read_to_string(binfmt_dir.join("register"))?;
        assert!(line.starts_with(":arm64:M::"));
        assert!(line.ends_with(":P"));
        drop(registration);
        Ok(())
    }

    #[test]
    fn unsupported_architecture_fails() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("status"), "1\n").unwrap();
        assert!(BinfmtRegistration::register_in(
            temp_dir.path(),
            "riscv64",
            Path::new("/usr/bin/qemu-riscv64")
        )
        .is_err());
    }

    #[test]
    fn relative_interpreter_paths_are_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("status"), "1\n").unwrap();
        assert!(BinfmtRegistration::register_in(
            temp_dir.path(),
            "armv7l",
            Path::new("usr/bin/qemu-arm")
        )
        .is_err());
    }
}
