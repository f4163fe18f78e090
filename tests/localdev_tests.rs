//! Local development flow: build for the host, then point the SDK at the
//! result through the locator's environment variables.

mod fixtures;

use std::fs;

use fixtures::Harness;
use topt_locator::{Locator, LocatorEnv, NativeLocation};
use topt_native::app::{cargo_invocation, localdev_overrides, parse_localdev_args};
use topt_native::config::EffectiveConfig;
use topt_native::{Arch, LinkMode, Os, TargetKey};

#[test]
fn test_locator_finds_localdev_output() {
    let h = Harness::new(&["git", "go", "gcc", "strip"]);
    let summary = h
        .linux(&[
            ("TOPT_NATIVE_MODE", "localdev"),
            ("TOPT_NATIVE_TARGETS", "linux-x64-static"),
        ])
        .run()
        .unwrap();
    assert_eq!(summary.exit_code, 0);

    let args = parse_localdev_args(["-sn", "test", "--", "--nocapture"]);
    let invocation = cargo_invocation("cargo", &args.cargo_args, Os::Linux, Arch::Amd64, &h.output());
    assert_eq!(invocation.args_lossy(), vec!["test", "--", "--nocapture"]);

    let env = LocatorEnv::from_lookup(|name| invocation.env.get(name).cloned());
    assert!(env.dev_mode);

    let locator = Locator::new(TargetKey::new(Os::Linux, Arch::Amd64, LinkMode::Static));
    match locator.resolve(&env) {
        NativeLocation::SearchPath { dir, library } => {
            assert_eq!(dir, h.output().join("linux-x64-libtestoptimization-static"));
            assert!(library.is_file());
        }
        other => panic!("unexpected location: {:?}", other),
    }
}

#[test]
fn test_ci_packages_match_release_asset_names() {
    let h = Harness::new(&["git", "go", "gcc", "strip"]);
    let summary = h
        .linux(&[("TOPT_NATIVE_TARGETS", "linux-x64-static,linux-x64-dynamic")])
        .run()
        .unwrap();
    assert_eq!(summary.packages.len(), 2);

    for mode in [LinkMode::Static, LinkMode::Dynamic] {
        let asset = Locator::new(TargetKey::new(Os::Linux, Arch::Amd64, mode)).release_asset_name();
        assert!(h.output().join(&asset).is_file(), "missing {}", asset);
    }
}

#[test]
fn test_search_path_archive_is_recognized() {
    let h = Harness::new(&["git", "go", "gcc", "strip"]);
    h.linux(&[("TOPT_NATIVE_TARGETS", "linux-x64-static")])
        .run()
        .unwrap();

    let output = h.output();
    let env = LocatorEnv::from_lookup(|name| {
        (name == topt_locator::NATIVE_SEARCH_PATH_ENV).then(|| output.display().to_string())
    });
    let locator = Locator::new(TargetKey::new(Os::Linux, Arch::Amd64, LinkMode::Static));
    assert!(matches!(
        locator.resolve(&env),
        NativeLocation::SearchPathArchive { .. }
    ));
}

#[test]
fn test_localdev_overrides_select_host_targets() {
    let dir = tempfile::TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("native")).unwrap();
    let config = EffectiveConfig::build(dir.path(), &Default::default(), Some(localdev_overrides())).unwrap();

    let matrix = config.settings.matrix(Os::Linux, Arch::Arm64).unwrap();
    let keys: Vec<String> = matrix.iter().map(|t| t.key().to_string()).collect();
    assert_eq!(keys, vec!["linux-arm64-static", "linux-arm64-dynamic"]);
}
