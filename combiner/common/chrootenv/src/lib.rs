// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Chroot environments for running foreign tools: scoped mounts, the
//! pseudo-filesystems a chrooted toolchain expects, and host binary-format
//! registration for foreign-architecture emulation.

mod arch;
mod binfmt;
mod mounts;

pub use arch::{architecture_synonyms, is_architecture_compatible};
pub use binfmt::BinfmtRegistration;
pub use mounts::{bind_mount, mount_loop_image, mount_pseudo_filesystems, MountGuard, MountStack};
