//! Artifact packaging.
//!
//! Places each Android target's build artifacts into its ABI slot directory
//! and hands the finished layout to the bundle builder (Gradle). Artifacts
//! are hard-linked, falling back to a copy, so the cargo target directory
//! stays usable for incremental rebuilds.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;

use crate::builders::common::capture;
use crate::types::{BuildProfile, BuildResult, MobdbgError, TargetSpec};

/// Per-ABI directory layout consumed by the bundle builder.
#[derive(Debug, Clone)]
pub struct PackagingLayout {
    root: PathBuf,
}

impl PackagingLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn slot_dir(&self, slot: &str) -> PathBuf {
        self.root.join(slot)
    }

    /// Replaces the `prefix` artifacts in `slot` with those found in `artifact_dir`.
    ///
    /// Every file in the slot whose name starts with `prefix` is removed
    /// first, so the slot never mixes artifacts from two builds.
    pub fn populate_slot(
        &self,
        slot: &str,
        artifact_dir: &Path,
        prefix: &str,
    ) -> Result<Vec<PathBuf>, MobdbgError> {
        let sources = matching_files(artifact_dir, prefix).map_err(|e| {
            MobdbgError::PackagingIncomplete(format!(
                "cannot read artifacts for slot {} in {}: {}",
                slot,
                artifact_dir.display(),
                e
            ))
        })?;
        if sources.is_empty() {
            return Err(MobdbgError::PackagingIncomplete(format!(
                "no artifacts starting with \"{}\" in {} for slot {}",
                prefix,
                artifact_dir.display(),
                slot
            )));
        }

        let slot_dir = self.slot_dir(slot);
        fs::create_dir_all(&slot_dir)?;
        for stale in matching_files(&slot_dir, prefix)? {
            tracing::debug!("removing stale {}", stale.display());
            fs::remove_file(&stale)?;
        }

        let mut placed = Vec::with_capacity(sources.len());
        for src in sources {
            let Some(name) = src.file_name() else {
                continue;
            };
            let dest = slot_dir.join(name);
            place(&src, &dest)?;
            tracing::debug!("placed {} -> {}", src.display(), dest.display());
            placed.push(dest);
        }
        Ok(placed)
    }
}

/// Regular files in `dir` whose names start with `prefix`, sorted by name.
fn matching_files(dir: &Path, prefix: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(prefix));
        if matches && entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn place(src: &Path, dest: &Path) -> std::io::Result<()> {
    if fs::hard_link(src, dest).is_ok() {
        return Ok(());
    }
    // Cross-device layouts cannot be hard-linked.
    fs::copy(src, dest).map(|_| ())
}

/// External tool turning a populated layout into an installable bundle.
pub trait BundleBuilder {
    /// Builds the bundle restricted to `slots`, returning the bundle path.
    fn assemble(
        &self,
        slots: &[&str],
        layout: &PackagingLayout,
        profile: BuildProfile,
    ) -> Result<PathBuf, MobdbgError>;
}

/// [`BundleBuilder`] running the Gradle wrapper of an Android project.
///
/// The ABI list is passed as `-Pmobdbg.abiFilters=<a,b>` and the layout root
/// as `-Pmobdbg.jniLibsDir=<dir>`; the project's `build.gradle` is expected
/// to read both properties.
#[derive(Debug, Clone)]
pub struct Gradle {
    android_dir: PathBuf,
    verbose: bool,
}

impl Gradle {
    pub fn new(android_dir: impl Into<PathBuf>) -> Self {
        Self {
            android_dir: android_dir.into(),
            verbose: false,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Where Gradle writes the APK for `profile`.
    pub fn apk_path(&self, profile: BuildProfile) -> PathBuf {
        self.android_dir
            .join("app/build/outputs/apk")
            .join(profile.as_str())
            .join(format!("app-{}.apk", profile.as_str()))
    }
}

impl BundleBuilder for Gradle {
    fn assemble(
        &self,
        slots: &[&str],
        layout: &PackagingLayout,
        profile: BuildProfile,
    ) -> Result<PathBuf, MobdbgError> {
        if !self.android_dir.is_dir() {
            return Err(MobdbgError::PackagingIncomplete(format!(
                "Android project not found at {}",
                self.android_dir.display()
            )));
        }

        let wrapper = if cfg!(windows) { "gradlew.bat" } else { "gradlew" };
        let mut cmd = Command::new(self.android_dir.join(wrapper));
        cmd.arg(profile.gradle_task())
            .arg(format!("-Pmobdbg.abiFilters={}", slots.join(",")))
            .arg(format!("-Pmobdbg.jniLibsDir={}", layout.root().display()))
            .current_dir(&self.android_dir);
        if self.verbose {
            cmd.arg("--info");
        }

        capture(cmd, None).map_err(|e| {
            MobdbgError::PackagingIncomplete(format!(
                "Gradle {} failed: {}",
                profile.gradle_task(),
                e
            ))
        })?;

        let apk = self.apk_path(profile);
        if !apk.is_file() {
            return Err(MobdbgError::PackagingIncomplete(format!(
                "APK not found at expected location: {}",
                apk.display()
            )));
        }
        Ok(apk)
    }
}

/// Artifacts placed into one slot.
#[derive(Debug, Clone, Serialize)]
pub struct SlotReport {
    pub slot: &'static str,
    pub triple: &'static str,
    pub files: Vec<PathBuf>,
}

/// Outcome of a packaging run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PackageReport {
    /// Populated slots, in target order.
    pub slots: Vec<SlotReport>,
    /// Non-Android targets, whose packaging is not implemented yet.
    pub deferred: Vec<&'static str>,
    /// Android targets skipped because their build failed.
    pub skipped: Vec<&'static str>,
    /// Bundle produced by the bundle builder, if it ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<PathBuf>,
}

impl PackageReport {
    pub fn slot_names(&self) -> Vec<&'static str> {
        self.slots.iter().map(|s| s.slot).collect()
    }
}

/// Maps build results onto a [`PackagingLayout`].
pub struct Packager {
    layout: PackagingLayout,
    library_prefix: String,
    profile: BuildProfile,
}

impl Packager {
    /// `library_prefix` selects the artifacts to package, e.g. `libhbat`.
    pub fn new(layout: PackagingLayout, library_prefix: impl Into<String>) -> Self {
        Self {
            layout,
            library_prefix: library_prefix.into(),
            profile: BuildProfile::Debug,
        }
    }

    pub fn profile(mut self, profile: BuildProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn layout(&self) -> &PackagingLayout {
        &self.layout
    }

    /// Populates the slot directories without invoking the bundle builder.
    pub fn prepare(
        &self,
        results: &BTreeMap<TargetSpec, BuildResult>,
    ) -> Result<PackageReport, MobdbgError> {
        let mut report = PackageReport::default();
        for (target, result) in results {
            if !target.is_android() {
                tracing::info!(
                    "Packaging for {} ({}) is not supported yet, skipping",
                    target.triple,
                    target.platform.as_str()
                );
                report.deferred.push(target.triple);
                continue;
            }
            if !result.is_success() {
                tracing::warn!(
                    "{} did not build, leaving slot {} untouched",
                    target.triple,
                    target.slot
                );
                report.skipped.push(target.triple);
                continue;
            }
            let files = self.layout.populate_slot(
                target.slot,
                &result.artifact_dir,
                &self.library_prefix,
            )?;
            tracing::info!("Placed {} artifact(s) in {}", files.len(), target.slot);
            report.slots.push(SlotReport {
                slot: target.slot,
                triple: target.triple,
                files,
            });
        }
        Ok(report)
    }

    /// Populates the layout, then runs `bundle` with the populated slot names.
    pub fn package(
        &self,
        results: &BTreeMap<TargetSpec, BuildResult>,
        bundle: &impl BundleBuilder,
    ) -> Result<PackageReport, MobdbgError> {
        let mut report = self.prepare(results)?;
        if report.slots.is_empty() {
            return Err(MobdbgError::PackagingIncomplete(
                "no Android target built successfully, nothing to bundle".to_string(),
            ));
        }
        let slots = report.slot_names();
        tracing::info!("Assembling bundle for {}", slots.join(", "));
        let bundle_path = bundle.assemble(&slots, &self.layout, self.profile)?;
        report.bundle = Some(bundle_path);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BuildOutcome;
    use std::cell::RefCell;

    struct FakeBundle {
        calls: RefCell<Vec<Vec<String>>>,
        fail: bool,
    }

    impl FakeBundle {
        fn new() -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                fail: false,
            }
        }
    }

    impl BundleBuilder for FakeBundle {
        fn assemble(
            &self,
            slots: &[&str],
            layout: &PackagingLayout,
            _profile: BuildProfile,
        ) -> Result<PathBuf, MobdbgError> {
            for slot in slots {
                assert!(layout.slot_dir(slot).is_dir(), "slot {slot} must exist before bundling");
            }
            self.calls
                .borrow_mut()
                .push(slots.iter().map(|s| s.to_string()).collect());
            if self.fail {
                return Err(MobdbgError::PackagingIncomplete("gradle exploded".into()));
            }
            Ok(PathBuf::from("app-debug.apk"))
        }
    }

    fn write_artifacts(dir: &Path, files: &[(&str, &str)]) {
        fs::create_dir_all(dir).unwrap();
        for (name, contents) in files {
            fs::write(dir.join(name), contents).unwrap();
        }
    }

    fn result(triple: &str, artifact_dir: &Path, passed: bool) -> (TargetSpec, BuildResult) {
        let target = TargetSpec::lookup(triple).unwrap();
        let outcome = if passed {
            BuildOutcome::Passed
        } else {
            BuildOutcome::Failed {
                reason: "boom".into(),
            }
        };
        (
            target,
            BuildResult {
                target,
                outcome,
                artifact_dir: artifact_dir.to_path_buf(),
            },
        )
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_places_only_prefixed_artifacts_in_slot() {
        let tmp = tempfile::tempdir().unwrap();
        let artifacts = tmp.path().join("target/aarch64-linux-android/debug");
        write_artifacts(
            &artifacts,
            &[("libhbat.so", "elf"), ("libhbat.d", "deps"), ("libother.so", "x")],
        );
        fs::create_dir_all(artifacts.join("libhbat-deps")).unwrap();

        let packager = Packager::new(PackagingLayout::new(tmp.path().join("abis")), "libhbat");
        let results = BTreeMap::from([result("aarch64-linux-android", &artifacts, true)]);
        let bundle = FakeBundle::new();
        let report = packager.package(&results, &bundle).unwrap();

        let slot = tmp.path().join("abis/arm64-v8a");
        assert_eq!(names(&slot), vec!["libhbat.d", "libhbat.so"]);
        assert_eq!(report.slot_names(), vec!["arm64-v8a"]);
        assert_eq!(*bundle.calls.borrow(), vec![vec!["arm64-v8a".to_string()]]);
        assert_eq!(report.bundle, Some(PathBuf::from("app-debug.apk")));
        // Source artifacts remain for incremental rebuilds.
        assert!(artifacts.join("libhbat.so").exists());
    }

    #[test]
    fn test_second_run_leaves_no_stale_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = PackagingLayout::new(tmp.path().join("abis"));
        let packager = Packager::new(layout, "libhbat");

        let first = tmp.path().join("first");
        write_artifacts(&first, &[("libhbat.so", "v1"), ("libhbat_old.so", "v1")]);
        packager
            .prepare(&BTreeMap::from([result("x86_64-linux-android", &first, true)]))
            .unwrap();

        let second = tmp.path().join("second");
        write_artifacts(&second, &[("libhbat.so", "v2")]);
        packager
            .prepare(&BTreeMap::from([result("x86_64-linux-android", &second, true)]))
            .unwrap();

        let slot = tmp.path().join("abis/x86_64");
        assert_eq!(names(&slot), vec!["libhbat.so"]);
        assert_eq!(fs::read_to_string(slot.join("libhbat.so")).unwrap(), "v2");
    }

    #[test]
    fn test_replacing_a_linked_artifact_does_not_touch_old_source() {
        let tmp = tempfile::tempdir().unwrap();
        let packager = Packager::new(PackagingLayout::new(tmp.path().join("abis")), "libhbat");

        let first = tmp.path().join("first");
        write_artifacts(&first, &[("libhbat.so", "v1")]);
        packager
            .prepare(&BTreeMap::from([result("i686-linux-android", &first, true)]))
            .unwrap();
        let second = tmp.path().join("second");
        write_artifacts(&second, &[("libhbat.so", "v2")]);
        packager
            .prepare(&BTreeMap::from([result("i686-linux-android", &second, true)]))
            .unwrap();

        assert_eq!(fs::read_to_string(first.join("libhbat.so")).unwrap(), "v1");
        assert_eq!(
            fs::read_to_string(tmp.path().join("abis/x86/libhbat.so")).unwrap(),
            "v2"
        );
    }

    #[test]
    fn test_ios_targets_are_deferred_and_failed_builds_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let ok = tmp.path().join("ok");
        write_artifacts(&ok, &[("libhbat.so", "elf")]);
        let results = BTreeMap::from([
            result("aarch64-linux-android", &ok, true),
            result("armv7-linux-androideabi", &tmp.path().join("missing"), false),
            result("aarch64-apple-ios", &tmp.path().join("ios"), true),
        ]);

        let packager = Packager::new(PackagingLayout::new(tmp.path().join("abis")), "libhbat");
        let report = packager.prepare(&results).unwrap();
        assert_eq!(report.slot_names(), vec!["arm64-v8a"]);
        assert_eq!(report.deferred, vec!["aarch64-apple-ios"]);
        assert_eq!(report.skipped, vec!["armv7-linux-androideabi"]);
        assert!(!tmp.path().join("abis/armeabi-v7a").exists());
    }

    #[test]
    fn test_missing_artifacts_is_packaging_incomplete() {
        let tmp = tempfile::tempdir().unwrap();
        let empty = tmp.path().join("empty");
        write_artifacts(&empty, &[("README", "nothing here")]);
        let packager = Packager::new(PackagingLayout::new(tmp.path().join("abis")), "libhbat");
        let err = packager
            .prepare(&BTreeMap::from([result("x86_64-linux-android", &empty, true)]))
            .unwrap_err();
        assert!(matches!(err, MobdbgError::PackagingIncomplete(ref m) if m.contains("x86_64")));
    }

    #[test]
    fn test_bundle_failure_fails_packaging() {
        let tmp = tempfile::tempdir().unwrap();
        let ok = tmp.path().join("ok");
        write_artifacts(&ok, &[("libhbat.so", "elf")]);
        let packager = Packager::new(PackagingLayout::new(tmp.path().join("abis")), "libhbat");
        let mut bundle = FakeBundle::new();
        bundle.fail = true;
        let err = packager
            .package(&BTreeMap::from([result("x86_64-linux-android", &ok, true)]), &bundle)
            .unwrap_err();
        assert!(matches!(err, MobdbgError::PackagingIncomplete(_)));
        // The populated slot is not rolled back.
        assert!(tmp.path().join("abis/x86_64/libhbat.so").exists());
    }

    #[test]
    fn test_nothing_to_bundle() {
        let tmp = tempfile::tempdir().unwrap();
        let packager = Packager::new(PackagingLayout::new(tmp.path().join("abis")), "libhbat");
        let bundle = FakeBundle::new();
        let results = BTreeMap::from([result("aarch64-linux-android", tmp.path(), false)]);
        assert!(packager.package(&results, &bundle).is_err());
        assert!(bundle.calls.borrow().is_empty());
    }

    #[test]
    fn test_gradle_missing_project() {
        let tmp = tempfile::tempdir().unwrap();
        let gradle = Gradle::new(tmp.path().join("android"));
        let err = gradle
            .assemble(&["arm64-v8a"], &PackagingLayout::new(tmp.path()), BuildProfile::Debug)
            .unwrap_err();
        assert!(err.to_string().contains("Android project not found"));
        assert!(gradle
            .apk_path(BuildProfile::Release)
            .ends_with("app/build/outputs/apk/release/app-release.apk"));
    }
}
