//! # mobdbg
//!
//! Command-line tool that builds a Rust library into an Android app and
//! attaches debuggers to it on a connected device.
//!
//! ## Overview
//!
//! - **Building** - Installs missing rustup targets, configures NDK linkers
//!   and cross-compiles every requested triple
//! - **Packaging** - Lays the shared libraries out per ABI and runs Gradle
//! - **Debugging** - Installs the APK, launches it held at the debugger wait,
//!   then attaches `jdb` over JDWP and starts `lldb-server` inside the app sandbox
//!
//! ## Quick Start
//!
//! ```bash
//! mobdbg init --crate hbat
//! export ANDROID_NDK_HOME=/opt/android-ndk-r25c
//! mobdbg build --target aarch64-linux-android
//! mobdbg debug --package com.example.native_activity --activity .HBATActivity
//! ```
//!
//! Once `debug` reports the native tunnel, connect lldb:
//!
//! ```text
//! (lldb) platform select remote-android
//! (lldb) platform connect connect://localhost:3059
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `build` | Resolve targets, build and package |
//! | `debug` | Install, launch and attach jdb + lldb-server |
//! | `init` | Write a starter `mobdbg.toml` |
//! | `targets` | List supported triples and their install status |
//!
//! ## Global Flags
//!
//! - **`--verbose` / `-v`** - Debug logging, including every external command
//! - **`--config <path>`** - Use this config file instead of discovering `mobdbg.toml`
//!
//! Logging goes through `tracing`; `RUST_LOG` overrides the default filter.
//!
//! ## Modules
//!
//! - [`config`] - Configuration file support for `mobdbg.toml`

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use mobdbg_sdk::builders::{
    BuildDriver, Cargo, Gradle, PackageReport, Packager, PackagingLayout,
};
use mobdbg_sdk::device::{
    Adb, AttachedSession, Jdb, RetryPolicy, SessionConfig, SessionOrchestrator,
};
use mobdbg_sdk::{
    BuildProfile, BuildResult, HostPlatform, NdkLayout, Rustup, TargetSpec, ToolchainResolver,
    ToolchainState,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::env;
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub mod config;

use config::ConfigResolver;

/// Build a Rust library into an Android app and debug it on a device.
#[derive(Parser, Debug)]
#[command(
    name = "mobdbg",
    author,
    version,
    about = "Build and debug Rust libraries inside Android apps",
    long_about = None
)]
struct Cli {
    /// Enable debug logging, including every external command
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Path to the config file (default: discover mobdbg.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install missing targets, build every target and package the app.
    Build {
        /// Target triple to build (repeatable; default: [toolchain] targets or all Android triples)
        #[arg(long = "target", value_name = "TRIPLE")]
        targets: Vec<String>,
        #[arg(long, help = "Build in release mode")]
        release: bool,
        #[arg(long, help = "Package the targets that built even if others failed")]
        allow_partial: bool,
        #[arg(long, help = "Populate the ABI layout but do not run Gradle")]
        skip_bundle: bool,
        #[arg(long, value_name = "PATH", help = "Write a JSON build summary")]
        summary: Option<PathBuf>,
    },
    /// Install the APK, launch it and attach jdb and lldb-server.
    Debug {
        #[arg(long, help = "APK to install (default: Gradle debug output)")]
        apk: Option<PathBuf>,
        #[arg(long, help = "Application id of the app")]
        package: Option<String>,
        #[arg(long, help = "Launch activity, absolute or relative (.MainActivity)")]
        activity: Option<String>,
        #[arg(long, help = "Local port forwarded to the app's JDWP transport")]
        jdwp_port: Option<u16>,
        #[arg(long, help = "Local port forwarded to the lldb-server socket")]
        native_port: Option<u16>,
        #[arg(long, help = "Process discovery attempts")]
        max_attempts: Option<u32>,
        #[arg(long, help = "Delay before the second discovery attempt, in milliseconds")]
        retry_delay_ms: Option<u64>,
        #[arg(long, help = "adb serial of the device to use")]
        serial: Option<String>,
        #[arg(long, help = "Return once attached instead of waiting for the debuggers")]
        no_wait: bool,
    },
    /// Write a starter mobdbg.toml.
    Init {
        #[arg(long, default_value = config::CONFIG_FILE_NAME)]
        output: PathBuf,
        #[arg(
            long = "crate",
            value_name = "NAME",
            help = "Crate name (default: from ./Cargo.toml)"
        )]
        crate_name: Option<String>,
    },
    /// List supported target triples, their ABI slots and install status.
    Targets,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cwd = env::current_dir().context("Failed to get current directory")?;
    if let Command::Init { output, crate_name } = &cli.command {
        return cmd_init(&cwd, output, crate_name.as_deref());
    }

    let resolver = ConfigResolver::load(cli.config.as_deref(), &cwd)?;
    if let Some(path) = &resolver.config_path {
        tracing::info!("Using config file: {}", path.display());
    }
    load_dotenv(&resolver.root);

    match cli.command {
        Command::Build {
            targets,
            release,
            allow_partial,
            skip_bundle,
            summary,
        } => cmd_build(
            &resolver,
            BuildArgs {
                targets,
                profile: if release {
                    BuildProfile::Release
                } else {
                    BuildProfile::Debug
                },
                allow_partial,
                skip_bundle,
                summary,
                verbose: cli.verbose,
            },
        ),
        Command::Debug {
            apk,
            package,
            activity,
            jdwp_port,
            native_port,
            max_attempts,
            retry_delay_ms,
            serial,
            no_wait,
        } => {
            let overrides = DebugOverrides {
                apk,
                package,
                activity,
                jdwp_port,
                native_port,
                max_attempts,
                retry_delay_ms,
                serial,
            };
            cmd_debug(&resolver, overrides, no_wait)
        }
        Command::Targets => cmd_targets(),
        Command::Init { .. } => Ok(()),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "mobdbg=debug,mobdbg_sdk=debug"
    } else {
        "mobdbg=info,mobdbg_sdk=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

fn load_dotenv(root: &Path) {
    let _ = dotenvy::from_path(root.join(".env.local"));
}

struct BuildArgs {
    targets: Vec<String>,
    profile: BuildProfile,
    allow_partial: bool,
    skip_bundle: bool,
    summary: Option<PathBuf>,
    verbose: bool,
}

fn cmd_build(resolver: &ConfigResolver, args: BuildArgs) -> Result<()> {
    let specs = resolve_targets(&args.targets, &resolver.config.toolchain.targets)?;
    println!("Building mobile artifacts...");
    println!(
        "  Targets: {}",
        specs.iter().map(|s| s.triple).collect::<Vec<_>>().join(", ")
    );
    println!("  Profile: {}", args.profile.as_str());

    let rustup = Rustup::locate()?;
    let installed = ToolchainResolver::new(rustup)
        .ensure(&specs)
        .context("Failed to prepare rustup targets")?;
    tracing::debug!("{} rustup target(s) installed", installed.len());

    let crate_dir = resolver.crate_dir();
    let cargo = Cargo::locate()?;
    let target_dir = cargo.target_dir(&crate_dir);
    let mut driver = BuildDriver::new(cargo, &crate_dir, target_dir).profile(args.profile);
    if specs.iter().any(TargetSpec::is_android) {
        driver = driver.ndk(ndk_layout(resolver)?);
    }
    let results = driver.build(&specs)?;

    let failed: Vec<&BuildResult> = results.values().filter(|r| !r.is_success()).collect();
    if !failed.is_empty() && !args.allow_partial {
        if let Some(path) = &args.summary {
            write_summary(path, &BuildSummary::new(args.profile, &results, None))?;
        }
        let details = failed
            .iter()
            .filter_map(|r| r.to_error())
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");
        bail!(
            "{} of {} target(s) failed to build:\n{}\n\nRe-run with --allow-partial to package the rest",
            failed.len(),
            results.len(),
            details
        );
    }

    let report = if specs.iter().any(TargetSpec::is_android) {
        let prefix = format!("lib{}", resolver.library_name()?);
        let packager = Packager::new(PackagingLayout::new(resolver.layout_dir()), prefix)
            .profile(args.profile);
        let report = if args.skip_bundle {
            packager.prepare(&results)?
        } else {
            let gradle = Gradle::new(resolver.android_dir()).verbose(args.verbose);
            packager.package(&results, &gradle)?
        };
        Some(report)
    } else {
        println!("No Android targets requested; nothing to package");
        None
    };

    if let Some(report) = &report {
        print!("{}", render_package_report(report));
    }
    if let Some(path) = &args.summary {
        write_summary(path, &BuildSummary::new(args.profile, &results, report.as_ref()))?;
    }
    Ok(())
}

/// CLI triples first, then the config list, then every Android triple.
fn resolve_targets(cli: &[String], configured: &[String]) -> Result<Vec<TargetSpec>> {
    let specs = if !cli.is_empty() {
        TargetSpec::resolve_all(cli)?
    } else if !configured.is_empty() {
        TargetSpec::resolve_all(configured)?
    } else {
        TargetSpec::android_defaults()
    };
    Ok(specs)
}

fn ndk_layout(resolver: &ConfigResolver) -> Result<NdkLayout> {
    let home = resolver.ndk_home(|key| env::var(key).ok()).ok_or_else(|| {
        anyhow!(
            "Android NDK not found.\n\n\
             Set ANDROID_NDK_HOME (or NDK_HOME), or [toolchain] ndk_home in {}",
            config::CONFIG_FILE_NAME
        )
    })?;
    if !home.is_dir() {
        bail!("Android NDK directory does not exist: {}", home.display());
    }
    let toolchain = &resolver.config.toolchain;
    let ndk = NdkLayout::new(home, HostPlatform::detect()?)
        .clang_version(toolchain.clang_version.as_str())
        .api_level(toolchain.api_level);
    println!(
        "  NDK: {} ({})",
        ndk.home().display(),
        ndk.host().prebuilt_dir()
    );
    Ok(ndk)
}

fn render_package_report(report: &PackageReport) -> String {
    let mut out = String::new();
    for slot in &report.slots {
        let _ = writeln!(
            out,
            "  {} <- {} ({} file(s))",
            slot.slot,
            slot.triple,
            slot.files.len()
        );
    }
    for triple in &report.skipped {
        let _ = writeln!(out, "  skipped {} (build failed)", triple);
    }
    for triple in &report.deferred {
        let _ = writeln!(out, "  deferred {} (packaging not supported yet)", triple);
    }
    match &report.bundle {
        Some(bundle) => {
            let _ = writeln!(out, "Built APK at {}", bundle.display());
        }
        None => {
            let _ = writeln!(out, "ABI layout ready; Gradle skipped");
        }
    }
    out
}

/// JSON build summary written with `--summary`.
#[derive(Debug, Serialize)]
struct BuildSummary<'a> {
    profile: &'static str,
    results: Vec<&'a BuildResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    package: Option<&'a PackageReport>,
}

impl<'a> BuildSummary<'a> {
    fn new(
        profile: BuildProfile,
        results: &'a BTreeMap<TargetSpec, BuildResult>,
        package: Option<&'a PackageReport>,
    ) -> Self {
        Self {
            profile: profile.as_str(),
            results: results.values().collect(),
            package,
        }
    }
}

fn write_summary(path: &Path, summary: &BuildSummary<'_>) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    ensure_parent_dir(path)?;
    write_file(path, json.as_bytes())?;
    println!("Wrote build summary to {:?}", path);
    Ok(())
}

/// `debug` flags; `None` falls back to `[device]` in the config file.
#[derive(Debug, Default)]
struct DebugOverrides {
    apk: Option<PathBuf>,
    package: Option<String>,
    activity: Option<String>,
    jdwp_port: Option<u16>,
    native_port: Option<u16>,
    max_attempts: Option<u32>,
    retry_delay_ms: Option<u64>,
    serial: Option<String>,
}

fn session_config(resolver: &ConfigResolver, overrides: DebugOverrides) -> Result<SessionConfig> {
    let device = &resolver.config.device;
    let package = overrides
        .package
        .or_else(|| device.package.clone())
        .ok_or_else(|| {
            anyhow!(
                "no package to debug. Pass --package or set [device] package in {}",
                config::CONFIG_FILE_NAME
            )
        })?;
    let activity = resolver.resolve(
        overrides.activity,
        |c| Some(c.device.activity.clone()),
        String::new(),
    );
    let apk = match overrides.apk {
        Some(apk) => apk,
        None => match &device.apk {
            Some(apk) => resolver.path(apk),
            None => Gradle::new(resolver.android_dir()).apk_path(BuildProfile::Debug),
        },
    };

    let max_attempts =
        resolver.resolve(overrides.max_attempts, |c| Some(c.device.max_attempts), 10);
    let delay_ms = resolver.resolve(
        overrides.retry_delay_ms,
        |c| Some(c.device.retry_delay_ms),
        200,
    );
    let retry = RetryPolicy::new(max_attempts)
        .delay(Duration::from_millis(delay_ms))
        .backoff(device.backoff_factor);

    let jdwp_port = resolver.resolve(
        overrides.jdwp_port,
        |c| Some(c.device.jdwp_port),
        SessionConfig::DEFAULT_JDWP_PORT,
    );
    let native_port = resolver.resolve(
        overrides.native_port,
        |c| Some(c.device.native_port),
        SessionConfig::DEFAULT_NATIVE_PORT,
    );
    if jdwp_port == native_port {
        bail!("--jdwp-port and --native-port must differ (both are {})", jdwp_port);
    }

    Ok(SessionConfig::new(package, activity, apk)
        .ports(jdwp_port, native_port)
        .retry(retry))
}

fn cmd_debug(resolver: &ConfigResolver, overrides: DebugOverrides, no_wait: bool) -> Result<()> {
    let serial = overrides.serial.clone().or_else(|| resolver.config.device.serial.clone());
    let session = session_config(resolver, overrides)?;
    let ndk = ndk_layout(resolver)?;

    let adb = Adb::locate()?
        .serial(serial)
        .timeout(Duration::from_secs(resolver.config.device.command_timeout_secs));
    let jdb = Jdb::locate()?;

    println!("Starting debug session for {}...", session.package);
    let attached = SessionOrchestrator::new(adb, jdb, ndk, session)
        .run()
        .context("Device session failed")?;
    print!("{}", render_attached(&attached));

    if no_wait {
        return Ok(());
    }
    println!("Waiting for debuggers to exit (Ctrl-C to stop)...");
    attached.wait()?;
    Ok(())
}

fn render_attached(attached: &AttachedSession) -> String {
    let session = &attached.session;
    let mut out = String::new();
    if let Some(pid) = session.pid() {
        let _ = writeln!(out, "Attached to {} (pid {})", session.package(), pid);
    }
    if let Some(tunnel) = session.jdwp_tunnel() {
        let _ = writeln!(out, "  jdb:  localhost:{} -> {}", tunnel.local_port, tunnel.remote);
    }
    if let Some(tunnel) = session.native_tunnel() {
        let _ = writeln!(out, "  lldb: localhost:{} -> {}", tunnel.local_port, tunnel.remote);
        let _ = writeln!(
            out,
            "  connect with: platform select remote-android; platform connect connect://localhost:{}",
            tunnel.local_port
        );
    }
    out
}

fn cmd_targets() -> Result<()> {
    let state = match Rustup::locate() {
        Ok(rustup) => match ToolchainResolver::new(rustup).refresh() {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!("could not query installed targets: {}", e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("{}", e);
            None
        }
    };
    print!("{}", render_targets_table(state.as_ref()));
    Ok(())
}

fn render_targets_table(state: Option<&ToolchainState>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<26} {:<8} {:<22} {}",
        "TRIPLE", "PLATFORM", "SLOT", "INSTALLED"
    );
    for spec in TargetSpec::all() {
        let installed = match state {
            Some(state) if state.contains(spec.triple) => "yes",
            Some(_) => "no",
            None => "?",
        };
        let _ = writeln!(
            out,
            "{:<26} {:<8} {:<22} {}",
            spec.triple,
            spec.platform.as_str(),
            spec.slot,
            installed
        );
    }
    out
}

fn cmd_init(cwd: &Path, output: &Path, crate_name: Option<&str>) -> Result<()> {
    let path = if output.is_absolute() {
        output.to_path_buf()
    } else {
        cwd.join(output)
    };
    let config_dir = path.parent().unwrap_or(cwd);
    // Without --crate the current directory is the crate.
    let (crate_name, crate_dir) = match crate_name {
        Some(name) => (name.to_string(), relative_dir(config_dir, &cwd.join(name))),
        None => (detect_crate_name(cwd)?, relative_dir(config_dir, cwd)),
    };
    ensure_can_write(&path)?;
    write_file(
        &path,
        config::MobdbgConfig::generate_starter_toml(&crate_name, &crate_dir).as_bytes(),
    )?;
    println!("Wrote starter config to {:?}", path);
    Ok(())
}

/// `target` relative to `base`; `target` as given when they share no prefix.
fn relative_dir(base: &Path, target: &Path) -> PathBuf {
    let base: Vec<_> = base.components().collect();
    let target_parts: Vec<_> = target.components().collect();
    let common = base
        .iter()
        .zip(&target_parts)
        .take_while(|(a, b)| a == b)
        .count();
    if common == 0 {
        return target.to_path_buf();
    }

    let mut relative = PathBuf::new();
    for _ in common..base.len() {
        relative.push("..");
    }
    for part in &target_parts[common..] {
        relative.push(part);
    }
    if relative.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        relative
    }
}

fn detect_crate_name(dir: &Path) -> Result<String> {
    let manifest = dir.join("Cargo.toml");
    let contents = fs::read_to_string(&manifest).with_context(|| {
        format!(
            "No Cargo.toml in {:?}; pass --crate <name> to choose the crate",
            dir
        )
    })?;
    let value: toml::Value =
        toml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", manifest))?;
    value
        .get("package")
        .and_then(|p| p.get("name"))
        .and_then(|n| n.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("{:?} has no [package] name; pass --crate <name>", manifest))
}

fn ensure_can_write(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("refusing to overwrite existing file: {:?}", path);
    }
    ensure_parent_dir(path)
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("creating directory {:?}", parent))?;
    }
    Ok(())
}

fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("writing file {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use mobdbg_sdk::BuildOutcome;
    use mobdbg_sdk::builders::SlotReport;
    use mobdbg_sdk::builders::common::validate_crate_dir;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_build_flags() {
        let cli = Cli::try_parse_from([
            "mobdbg",
            "-v",
            "build",
            "--target",
            "aarch64-linux-android",
            "--target",
            "x86_64-linux-android",
            "--release",
            "--allow-partial",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Build {
                targets,
                release,
                allow_partial,
                skip_bundle,
                summary,
            } => {
                assert_eq!(targets, vec!["aarch64-linux-android", "x86_64-linux-android"]);
                assert!(release);
                assert!(allow_partial);
                assert!(!skip_bundle);
                assert!(summary.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_debug_flags() {
        let cli = Cli::try_parse_from([
            "mobdbg",
            "debug",
            "--package",
            "com.example.native_activity",
            "--max-attempts",
            "20",
            "--serial",
            "emulator-5554",
            "--no-wait",
            "--config",
            "other.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("other.toml")));
        match cli.command {
            Command::Debug {
                package,
                max_attempts,
                serial,
                no_wait,
                jdwp_port,
                ..
            } => {
                assert_eq!(package.as_deref(), Some("com.example.native_activity"));
                assert_eq!(max_attempts, Some(20));
                assert_eq!(serial.as_deref(), Some("emulator-5554"));
                assert!(no_wait);
                assert_eq!(jdwp_port, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn target_resolution_order() {
        let cli = vec!["x86_64-linux-android".to_string()];
        let configured = vec!["aarch64-linux-android".to_string()];

        let specs = resolve_targets(&cli, &configured).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].triple, "x86_64-linux-android");

        let specs = resolve_targets(&[], &configured).unwrap();
        assert_eq!(specs[0].triple, "aarch64-linux-android");

        let specs = resolve_targets(&[], &[]).unwrap();
        assert_eq!(specs.len(), 4);
        assert!(specs.iter().all(TargetSpec::is_android));

        assert!(resolve_targets(&["mips-linux-android".to_string()], &[]).is_err());
    }

    #[test]
    fn session_config_prefers_cli_then_file() {
        let mut resolver = ConfigResolver {
            root: PathBuf::from("/proj"),
            ..Default::default()
        };
        resolver.config.device.package = Some("com.example.native_activity".into());
        resolver.config.device.activity = ".HBATActivity".into();
        resolver.config.device.jdwp_port = 6000;

        let session = session_config(
            &resolver,
            DebugOverrides {
                native_port: Some(4000),
                max_attempts: Some(3),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(session.package, "com.example.native_activity");
        assert_eq!(session.activity, ".HBATActivity");
        assert_eq!(session.jdwp_port, 6000);
        assert_eq!(session.native_port, 4000);
        assert_eq!(session.retry.max_attempts(), 3);
        assert_eq!(
            session.apk,
            PathBuf::from("/proj/android/app/build/outputs/apk/debug/app-debug.apk")
        );
    }

    #[test]
    fn session_config_requires_package() {
        let resolver = ConfigResolver::default();
        let err = session_config(&resolver, DebugOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("--package"));
    }

    #[test]
    fn session_config_rejects_equal_ports() {
        let resolver = ConfigResolver::default();
        let overrides = DebugOverrides {
            package: Some("com.a".into()),
            jdwp_port: Some(5000),
            native_port: Some(5000),
            ..Default::default()
        };
        assert!(session_config(&resolver, overrides).is_err());
    }

    #[test]
    fn targets_table_lists_every_triple() {
        let state = ToolchainState::parse_target_list(
            "aarch64-linux-android (installed)\nx86_64-linux-android\n",
        );
        let table = render_targets_table(Some(&state));
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), TargetSpec::all().len() + 1);
        let arm64 = lines
            .iter()
            .find(|l| l.starts_with("aarch64-linux-android "))
            .unwrap();
        assert!(arm64.contains("arm64-v8a"));
        assert!(arm64.ends_with("yes"));
        let x86 = lines
            .iter()
            .find(|l| l.starts_with("x86_64-linux-android "))
            .unwrap();
        assert!(x86.ends_with("no"));

        let unknown = render_targets_table(None);
        assert!(unknown.lines().skip(1).all(|l| l.ends_with('?')));
    }

    #[test]
    fn summary_json_shape() {
        let arm64 = TargetSpec::lookup("aarch64-linux-android").unwrap();
        let x86 = TargetSpec::lookup("x86_64-linux-android").unwrap();
        let mut results = BTreeMap::new();
        results.insert(
            arm64,
            BuildResult {
                target: arm64,
                outcome: BuildOutcome::Passed,
                artifact_dir: PathBuf::from("target/aarch64-linux-android/debug"),
            },
        );
        results.insert(
            x86,
            BuildResult {
                target: x86,
                outcome: BuildOutcome::Failed {
                    reason: "linker not found".into(),
                },
                artifact_dir: PathBuf::from("target/x86_64-linux-android/debug"),
            },
        );
        let report = PackageReport {
            slots: vec![SlotReport {
                slot: "arm64-v8a",
                triple: "aarch64-linux-android",
                files: vec![PathBuf::from("build/jniLibs/arm64-v8a/libhbat.so")],
            }],
            skipped: vec!["x86_64-linux-android"],
            ..Default::default()
        };

        let summary = BuildSummary::new(BuildProfile::Debug, &results, Some(&report));
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["profile"], "debug");
        assert_eq!(value["results"].as_array().unwrap().len(), 2);
        assert_eq!(value["package"]["slots"][0]["slot"], "arm64-v8a");
        assert_eq!(value["package"]["skipped"][0], "x86_64-linux-android");

        let text = render_package_report(&report);
        assert!(text.contains("arm64-v8a <- aarch64-linux-android (1 file(s))"));
        assert!(text.contains("skipped x86_64-linux-android"));
        assert!(text.contains("Gradle skipped"));
    }

    #[test]
    fn init_writes_starter_and_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("Cargo.toml"),
            "[package]\nname = \"hbat\"\nversion = \"0.1.0\"\n",
        )
        .unwrap();

        cmd_init(dir.path(), Path::new("mobdbg.toml"), None).unwrap();
        let written = fs::read_to_string(dir.path().join("mobdbg.toml")).unwrap();
        assert!(written.contains("crate_dir = \".\""));
        assert!(written.contains("library_name = \"hbat\""));

        let err = cmd_init(dir.path(), Path::new("mobdbg.toml"), Some("other")).unwrap_err();
        assert!(err.to_string().contains("refusing to overwrite"));
    }

    #[test]
    fn init_from_crate_root_produces_buildable_config() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("Cargo.toml"),
            "[package]\nname = \"hbat\"\nversion = \"0.1.0\"\n",
        )
        .unwrap();

        cmd_init(dir.path(), Path::new("mobdbg.toml"), None).unwrap();
        let resolver = ConfigResolver::load(None, dir.path()).unwrap();
        assert_eq!(resolver.crate_dir(), dir.path().join("."));
        validate_crate_dir(&resolver.crate_dir()).unwrap();
        assert_eq!(resolver.library_name().unwrap(), "hbat");
    }

    #[test]
    fn init_with_crate_flag_points_below_config() {
        let dir = tempfile::tempdir().unwrap();
        let crate_dir = dir.path().join("hbat-core");
        fs::create_dir(&crate_dir).unwrap();
        fs::write(
            crate_dir.join("Cargo.toml"),
            "[package]\nname = \"hbat-core\"\nversion = \"0.1.0\"\n",
        )
        .unwrap();

        cmd_init(dir.path(), Path::new("mobdbg.toml"), Some("hbat-core")).unwrap();
        let resolver = ConfigResolver::load(None, dir.path()).unwrap();
        assert_eq!(resolver.crate_dir(), dir.path().join("hbat-core"));
        validate_crate_dir(&resolver.crate_dir()).unwrap();
    }

    #[test]
    fn init_without_manifest_needs_crate_flag() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cmd_init(dir.path(), Path::new("mobdbg.toml"), None).is_err());
        cmd_init(dir.path(), Path::new("conf/mobdbg.toml"), Some("my-lib")).unwrap();
        let written = fs::read_to_string(dir.path().join("conf/mobdbg.toml")).unwrap();
        assert!(written.contains("crate_dir = \"../my-lib\""));
    }

    #[test]
    fn relative_dir_walks_up_and_down() {
        let root = Path::new("/work/app");
        assert_eq!(relative_dir(root, root), PathBuf::from("."));
        assert_eq!(relative_dir(root, &root.join("hbat")), PathBuf::from("hbat"));
        assert_eq!(relative_dir(&root.join("conf"), root), PathBuf::from(".."));
        assert_eq!(
            relative_dir(&root.join("conf"), &root.join("hbat")),
            PathBuf::from("../hbat")
        );
        assert_eq!(
            relative_dir(Path::new("conf"), Path::new("/work/app")),
            PathBuf::from("/work/app")
        );
    }
}
