// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::{Context, Result};
use nix::mount::{umount2, MntFlags};
use processes::Runner;
use tracing::warn;

/// Unmounts an mount point on drop.
///
/// Unmounting tries a lazy detach first and falls back to the external
/// `umount -l`; failures are logged, not fatal, so that tearing down a
/// partially-mounted chroot never aborts the cleanup path.
#[must_use]
pub struct MountGuard {
    dir: Option<PathBuf>,
}

impl MountGuard {
    fn new(dir: &Path) -> Self {
        Self {
            dir: Some(dir.to_path_buf()),
        }
    }

    // Forgets this mount point. After calling this method, it is your responsibility to unmount it.
    // It is often safe to use this method, e.g. when this mount point is under another mount point
    // and you're sure it's unmounted recursively.
    pub fn leak(mut self) {
        self.dir = None;
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        if umount2(&dir, MntFlags::MNT_DETACH).is_ok() {
            return;
        }
        let fallback = Command::new("umount")
            .arg("-l")
            .arg(&dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if !fallback.map(|status| status.success()).unwrap_or(false) {
            warn!("Failed to unmount {}", dir.display());
        }
    }
}

/// Bind-mounts given paths recursively.
///
/// The mount is delegated to the external `mount` through the [`Runner`]
/// seam, which keeps tests hermetic and matches how the loop mounts below
/// are performed.
pub fn bind_mount(old_dir: &Path, new_dir: &Path, runner: &dyn Runner) -> Result<MountGuard> {
    runner
        .execute_and_check(Command::new("mount").arg("--rbind").arg(old_dir).arg(new_dir))
        .with_context(|| {
            format!(
                "Bind-mounting {} to {} failed",
                old_dir.display(),
                new_dir.display()
            )
        })?;
    Ok(MountGuard::new(new_dir))
}

/// Loop-mounts a filesystem image read-write. Attaching the loop device and
/// detecting the filesystem is the external `mount`'s job.
pub fn mount_loop_image(image: &Path, dir: &Path, runner: &dyn Runner) -> Result<MountGuard> {
    runner
        .execute_and_check(
            Command::new("mount")
                .args(["-o", "rw,loop"])
                .arg(image)
                .arg(dir),
        )
        .with_context(|| {
            format!(
                "Failed to mount image {} at {}",
                image.display(),
                dir.display()
            )
        })?;
    Ok(MountGuard::new(dir))
}

/// A stack of mounts released in reverse acquisition order on drop.
#[derive(Default)]
#[must_use]
pub struct MountStack {
    guards: Vec<MountGuard>,
}

impl MountStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, guard: MountGuard) {
        self.guards.push(guard);
    }

    /// Forgets all mount points without unmounting them.
    pub fn leak(mut self) {
        for guard in self.guards.drain(..) {
            guard.leak();
        }
    }
}

impl Drop for MountStack {
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}

/// The pseudo-filesystems a chrooted toolchain expects, bind-mounted from
/// the host. `/dev/null` comes with the `/dev` bind mount.
const PSEUDO_FILESYSTEMS: &[&str] = &[
    "/sys",
    "/proc",
    "/dev",
    "/dev/pts",
    "/dev/shm",
    "/dev/mqueue",
];

/// Bind-mounts the host's pseudo-filesystems into a chroot.
pub fn mount_pseudo_filesystems(root: &Path, runner: &dyn Runner) -> Result<MountStack> {
    let mut stack = MountStack::new();
    for source in PSEUDO_FILESYSTEMS {
        let source_path = Path::new(source);
        if !source_path.exists() {
            continue;
        }
        let target = root.join(source.trim_start_matches('/'));
        std::fs::create_dir_all(&target)
            .with_context(|| format!("Failed to create mount point {}", target.display()))?;
        stack.push(bind_mount(source_path, &target, runner)?);
    }
    Ok(stack)
}
