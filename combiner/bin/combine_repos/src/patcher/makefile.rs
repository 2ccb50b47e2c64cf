// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Generation of the per-clone Makefile and the per-task sed scripts that
//! drive the header rewriter inside a chroot.
//!
//! Each clone executes one dependency-free Makefile whose `all` rule has
//! one target per assigned task. A target invokes the rewriter with the
//! release override and a sed script applying the requirement updates and
//! the standing spec cleanups.

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use tera::Tera;

use crate::counterpart::{PatchTask, RequirementUpdate};

/// Directory inside a clone where task inputs (packages, sed scripts, logs)
/// live.
pub const TASKS_DIR: &str = "tasks";
/// Directory inside a clone where the rewriter drops rebuilt packages.
pub const RESULTS_DIR: &str = "results";
/// The header rewriter executable expected inside the chroot.
pub const REWRITER_COMMAND: &str = "rpmrebuild";

const MAKEFILE_TEMPLATE: &str = r#"all: {% for task in tasks %}task{{ task.index }} {% endfor %}

{% for task in tasks %}task{{ task.index }}:
	{{ rewriter }} --release={{ task.release }} --change-spec-whole='sed -f /tasks/task{{ task.index }}.sed' --directory=/results --notest-install -p /tasks/task{{ task.index }}.rpm > /tasks/task{{ task.index }}.log 2>&1

{% endfor %}"#;

lazy_static! {
    static ref TEMPLATES: Tera = {
        let mut tera = Tera::default();
        tera.add_raw_template("Makefile", MAKEFILE_TEMPLATE)
            .expect("embedded template parses");
        tera
    };
}

/// Renders the Makefile of one clone. `indexes` are the clone-local task
/// numbers paired with the required release of each task.
pub fn render_makefile(tasks: &[(usize, &PatchTask)]) -> Result<String> {
    #[derive(serde::Serialize)]
    struct TemplateTask {
        index: usize,
        release: String,
    }
    let mut context = tera::Context::new();
    context.insert("rewriter", REWRITER_COMMAND);
    context.insert(
        "tasks",
        &tasks
            .iter()
            .map(|(index, task)| TemplateTask {
                index: *index,
                release: task.required_release.clone(),
            })
            .collect::<Vec<_>>(),
    );
    TEMPLATES
        .render("Makefile", &context)
        .context("Failed to render the clone Makefile")
}

/// Escapes a string for use inside a basic-regular-expression sed address
/// or pattern.
fn escape_pattern(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if "\\.[]*^$/&".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Renders the sed script applying one task's spec edits.
pub fn render_sed_script(task: &PatchTask) -> String {
    let mut lines: Vec<String> = Vec::new();

    for update in &task.updates {
        match update {
            RequirementUpdate::Change { from, to } => {
                lines.push(format!(
                    "s/^Requires:[[:space:]]*{}[[:space:]]*$/Requires: {}/",
                    escape_pattern(&from.canonical_expression()),
                    to.canonical_expression(),
                ));
            }
            RequirementUpdate::Add(requirement) => {
                // Insert the new requirement just before the first existing
                // Requires: line.
                lines.push(format!(
                    "0,/^Requires:/{{/^Requires:/i\\\nRequires: {}\n}}",
                    requirement.canonical_expression(),
                ));
            }
        }
    }

    // Standing cleanups: stale build-id files, target wants symlinks, the
    // program form of %posttrans, and subpackage relations pinned to the
    // marked release.
    lines.push(r"/\.build-id/d".to_string());
    lines.push(r"/basic\.target\.wants/d".to_string());
    lines.push(r"s/^%posttrans[[:space:]]\+-p.*$/%posttrans/".to_string());
    lines.push(format!(
        "s/\\(= {}-\\)[0-9.+_a-z]\\+/\\1{}/g",
        escape_pattern(&task.version),
        task.required_release,
    ));

    lines.join("\n") + "\n"
}
