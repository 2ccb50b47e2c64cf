// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cliutil::{cli_main, LoggingConfig};
use combine_repos::config::{split_names, Profile, RepositoryPair, RunConfig};
use combine_repos::pipeline;
use depgraph::{Directives, Strategy};
use processes::HostRunner;

#[derive(Parser, Debug)]
#[command(name = "combine_repos")]
#[command(about = "Combines pairs of RPM repositories and builds an image", long_about = None)]
struct Args {
    /// Repository triples: the name as the kickstart mentions it, the path
    /// to the original repository, and the path to the marked repository.
    #[arg(value_name = "NAME URL_ORIG URL_MARKED")]
    triples: Vec<String>,

    /// Packages to mark together with all their forward dependencies.
    #[arg(short = 'f', long)]
    forward: Vec<String>,

    /// Packages to mark together with all their dependees.
    #[arg(short = 'b', long)]
    backward: Vec<String>,

    /// Packages to mark exactly.
    #[arg(short = 's', long)]
    single: Vec<String>,

    /// Packages to exclude from the final marked set.
    #[arg(short = 'e', long)]
    exclude: Vec<String>,

    /// Packages not installed by default that this build must install.
    #[arg(short = 'S', long)]
    service: Vec<String>,

    /// Packages preferred when a symbol has several providers.
    #[arg(short = 'p', long)]
    preferable: Vec<String>,

    /// How to choose among same-named packages: prefer the smaller or the
    /// bigger version/release numbers.
    #[arg(short = 'P', long, value_name = "small|big")]
    preferring_strategy: Option<String>,

    /// The image architecture.
    #[arg(short = 'A', long)]
    architecture: Option<String>,

    /// Kickstart file used as a template.
    #[arg(short = 'k', long)]
    kickstart_file: Option<PathBuf>,

    /// Output directory for the image builder.
    #[arg(short = 'o', long)]
    outdir: Option<PathBuf>,

    /// Additional options passed to the image builder.
    #[arg(short = 'M', long = "builder-option")]
    builder_options: Vec<String>,

    /// Patcher worker count.
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// The cache directory [default: /var/tmp/combine-repos].
    #[arg(long)]
    cachedir: Option<PathBuf>,

    /// Use original packages for marked packages missing on the marked side.
    #[arg(short = 'm', long)]
    mirror: bool,

    /// Take as many packages from the marked repository as possible.
    #[arg(short = 'g', long)]
    greedy: bool,

    /// Drop counterparts whose versions differ instead of failing.
    #[arg(long)]
    skip_version_mismatch: bool,

    /// Degrade header rewrites to plain copies.
    #[arg(long)]
    disable_rpm_patching: bool,

    /// Wipe the patching cache before the run.
    #[arg(long)]
    drop_patching_cache: bool,

    /// Fail on critical file conflicts inside the installation scope.
    #[arg(long)]
    abort_on_scope_conflicts: bool,

    /// Use this preliminary image (file or directory) instead of building
    /// one.
    #[arg(long)]
    preliminary_image: Option<PathBuf>,

    /// Output directory for the built preliminary image.
    #[arg(long)]
    outdir_preliminary_image: Option<PathBuf>,

    /// An emulator executable or package to use instead of searching the
    /// repositories.
    #[arg(long)]
    use_custom_emulator: Option<PathBuf>,

    /// Header rewriter source tree to install into the patching chroot.
    #[arg(long)]
    rewriter_source: Option<PathBuf>,

    /// Re-generate the repository indexes before combining.
    #[arg(long)]
    regenerate_repodata: bool,

    /// TOML profile with defaults for most options.
    #[arg(short = 'c', long, default_value = "~/.combine-repos.toml")]
    config: PathBuf,

    /// Enable verbose mode.
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Enable debug mode (temporaries are kept).
    #[arg(short = 'd', long)]
    debug: bool,

    /// Log all output to the given file.
    #[arg(short = 'l', long)]
    logfile: Option<PathBuf>,
}

fn expand_home(path: &PathBuf) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.clone()
}

fn build_config(args: &Args) -> Result<RunConfig> {
    let profile = Profile::load(&expand_home(&args.config))?;

    let mut pairs: Vec<RepositoryPair> = Vec::new();
    if args.triples.is_empty() {
        for repository in &profile.repository {
            pairs.push(RepositoryPair {
                name: repository.name.clone(),
                url: repository.url.clone(),
                url_marked: repository.url_marked.clone(),
            });
        }
    } else {
        if args.triples.len() % 3 != 0 {
            bail!("The number of positional arguments should be divisible by 3");
        }
        for triple in args.triples.chunks(3) {
            pairs.push(RepositoryPair {
                name: triple[0].clone(),
                url: PathBuf::from(&triple[1]),
                url_marked: PathBuf::from(&triple[2]),
            });
        }
    }

    let strategy = match args.preferring_strategy.as_deref() {
        None => None,
        Some(value) => Some(
            value
                .parse::<Strategy>()
                .map_err(|_| anyhow::anyhow!("Unknown preferring strategy: {value}"))?,
        ),
    };

    let merge = |cli: &[String], profile: &[String]| {
        let mut all = cli.to_vec();
        all.extend(profile.iter().cloned());
        split_names(&all)
    };
    let directives = Directives {
        forward: merge(&args.forward, &profile.packages.forward),
        backward: merge(&args.backward, &profile.packages.backward),
        single: merge(&args.single, &profile.packages.single),
        excluded: merge(&args.exclude, &profile.packages.excluded),
        service: merge(&args.service, &profile.packages.service),
        greedy: args.greedy,
    };
    let preferables = merge(&args.preferable, &profile.packages.preferable);

    let architecture = args
        .architecture
        .clone()
        .or(profile.architecture)
        .context("No architecture given; use --architecture")?;
    let kickstart = args
        .kickstart_file
        .clone()
        .or(profile.kickstart)
        .context("No kickstart file given; use --kickstart-file")?;
    let output_dir = args
        .outdir
        .clone()
        .or(profile.outdir)
        .unwrap_or_else(|| PathBuf::from("."));
    let cache_dir = args
        .cachedir
        .clone()
        .or(profile.cachedir)
        .unwrap_or_else(|| PathBuf::from("/var/tmp/combine-repos"));

    Ok(RunConfig {
        pairs,
        architecture,
        kickstart,
        output_dir,
        cache_dir,
        jobs: args.jobs.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }),
        strategy,
        directives,
        preferables,
        mirror_mode: args.mirror,
        skip_version_mismatch: args.skip_version_mismatch,
        patching_enabled: !args.disable_rpm_patching,
        drop_patching_cache: args.drop_patching_cache,
        abort_on_scope_conflicts: args.abort_on_scope_conflicts,
        debug: args.debug,
        builder_options: args.builder_options.clone(),
        preliminary_image: args.preliminary_image.clone(),
        preliminary_image_outdir: args.outdir_preliminary_image.clone(),
        emulator_override: args.use_custom_emulator.clone(),
        rewriter_source: args.rewriter_source.clone(),
        regenerate_repodata: args.regenerate_repodata,
    })
}

fn main() -> ExitCode {
    let args = Args::parse();
    let logging = LoggingConfig::new(args.verbose || args.debug, args.logfile.clone());
    cli_main(
        || -> Result<()> {
            let config = build_config(&args)?;
            // Debug and verbose runs show subprocess output directly.
            let runner = HostRunner::new(args.verbose || args.debug);
            pipeline::run(&config, &runner)
        },
        logging,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec![
            "combine_repos",
            "-A",
            "armv7l",
            "-k",
            "image.ks",
            "--config",
            "/nonexistent/profile.toml",
            "base",
            "/repos/base",
            "/repos/base-marked",
        ];
        argv.extend(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn builds_config_from_triples() -> Result<()> {
        let config = build_config(&parse(&[]))?;
        assert_eq!(config.pairs.len(), 1);
        assert_eq!(config.pairs[0].name, "base");
        assert_eq!(config.pairs[0].url, PathBuf::from("/repos/base"));
        assert_eq!(config.architecture, "armv7l");
        assert!(config.patching_enabled);
        assert!(!config.mirror_mode);
        assert_eq!(config.cache_dir, PathBuf::from("/var/tmp/combine-repos"));
        Ok(())
    }

    #[test]
    fn splits_joined_directive_names() -> Result<()> {
        let config = build_config(&parse(&["-s", "libx,liby", "-s", "libz"]))?;
        assert_eq!(config.directives.single, vec!["libx", "liby", "libz"]);
        Ok(())
    }

    #[test]
    fn parses_strategy_and_flags() -> Result<()> {
        let config = build_config(&parse(&[
            "-P",
            "big",
            "--mirror",
            "--disable-rpm-patching",
            "--skip-version-mismatch",
        ]))?;
        assert_eq!(config.strategy, Some(Strategy::Big));
        assert!(config.mirror_mode);
        assert!(!config.patching_enabled);
        assert!(config.skip_version_mismatch);

        assert!(build_config(&parse(&["-P", "bogus"])).is_err());
        Ok(())
    }

    #[test]
    fn incomplete_triples_are_rejected() {
        let args = Args::parse_from([
            "combine_repos",
            "-A",
            "armv7l",
            "-k",
            "image.ks",
            "--config",
            "/nonexistent/profile.toml",
            "base",
            "/repos/base",
        ]);
        assert!(build_config(&args).is_err());
    }
}
