//! Target matrix
//!
//! Which targets each build host produces. Cross-platform coverage comes
//! from running the pipeline once per host OS; the outputs never collide
//! because every target has its own directory name.

use std::collections::BTreeSet;

use crate::platform::{Arch, LinkMode, Os};
use crate::target::{BuildTarget, TargetKey};

/// Ordered list of targets for one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetMatrix {
    targets: Vec<BuildTarget>,
}

/// A pair of same-OS, same-link-mode targets to fuse into a universal binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FusionGroup {
    pub os: Os,
    pub link_mode: LinkMode,
    pub members: [TargetKey; 2],
}

impl FusionGroup {
    pub fn logical_name(&self) -> String {
        self.members[0].logical_name()
    }
}

impl TargetMatrix {
    /// Build a matrix from explicit keys, dropping duplicates and keeping order
    pub fn from_keys(keys: impl IntoIterator<Item = TargetKey>) -> Self {
        let mut seen = BTreeSet::new();
        let targets = keys
            .into_iter()
            .filter(|k| seen.insert(*k))
            .map(BuildTarget::new)
            .collect();
        Self { targets }
    }

    /// Every target any host can produce
    pub fn all() -> Self {
        Self::from_keys(
            Os::ALL
                .iter()
                .flat_map(|os| Self::host_keys(*os).into_iter())
                .collect::<Vec<_>>(),
        )
    }

    /// Targets built by a host running `host`
    pub fn for_host(host: Os) -> Self {
        Self::from_keys(Self::host_keys(host))
    }

    /// Targets for a local development build: only what the host itself can
    /// load, except on macOS where both slices are built so they can be fused.
    pub fn local_dev(host: Os, arch: Arch) -> Self {
        let keys: Vec<TargetKey> = match host {
            Os::Macos => Self::host_keys(Os::Macos)
                .into_iter()
                .filter(|k| k.os == Os::Macos)
                .collect(),
            Os::Linux | Os::Windows => LinkMode::ALL
                .iter()
                .map(|mode| TargetKey::new(host, arch, *mode))
                .collect(),
            Os::Ios | Os::Android => Vec::new(),
        };
        Self::from_keys(keys)
    }

    fn host_keys(host: Os) -> Vec<TargetKey> {
        let mut keys = Vec::new();
        match host {
            Os::Linux => {
                for arch in [Arch::Amd64, Arch::Arm64] {
                    for mode in LinkMode::ALL {
                        keys.push(TargetKey::new(Os::Linux, arch, mode));
                    }
                }
                keys.push(TargetKey::new(Os::Android, Arch::Arm64, LinkMode::Dynamic));
            }
            Os::Macos => {
                for mode in LinkMode::ALL {
                    for arch in [Arch::Arm64, Arch::Amd64] {
                        keys.push(TargetKey::new(Os::Macos, arch, mode));
                    }
                }
                keys.push(TargetKey::new(Os::Ios, Arch::Arm64, LinkMode::Static));
            }
            Os::Windows => {
                for mode in LinkMode::ALL {
                    keys.push(TargetKey::new(Os::Windows, Arch::Amd64, mode));
                }
            }
            Os::Ios | Os::Android => {}
        }
        keys
    }

    /// Keep only the targets whose key is in `keys`
    pub fn retain_keys(mut self, keys: &[TargetKey]) -> Self {
        self.targets.retain(|t| keys.contains(&t.key()));
        self
    }

    pub fn targets(&self) -> &[BuildTarget] {
        &self.targets
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuildTarget> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn contains(&self, key: &TargetKey) -> bool {
        self.targets.iter().any(|t| t.key() == *key)
    }

    /// Sibling pairs present in this matrix that must be fused
    pub fn fusion_groups(&self) -> Vec<FusionGroup> {
        let mut groups = Vec::new();
        let mut seen = BTreeSet::new();
        for target in &self.targets {
            let key = target.key();
            if !key.needs_fusion() || !seen.insert((key.os, key.link_mode)) {
                continue;
            }
            let sibling = key.sibling();
            if self.contains(&sibling) {
                let mut members = [key, sibling];
                members.sort();
                groups.push(FusionGroup {
                    os: key.os,
                    link_mode: key.link_mode,
                    members,
                });
            }
        }
        groups
    }

    /// Distinct logical output names, sorted
    pub fn logical_outputs(&self) -> Vec<String> {
        self.targets
            .iter()
            .map(|t| t.logical_name())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl<'a> IntoIterator for &'a TargetMatrix {
    type Item = &'a BuildTarget;
    type IntoIter = std::slice::Iter<'a, BuildTarget>;

    fn into_iter(self) -> Self::IntoIter {
        self.targets.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_covers_every_logical_output() {
        let matrix = TargetMatrix::all();
        assert_eq!(matrix.len(), 12);
        assert_eq!(
            matrix.logical_outputs(),
            vec![
                "android-arm64-libtestoptimization-dynamic",
                "ios-libtestoptimization-static",
                "linux-arm64-libtestoptimization-dynamic",
                "linux-arm64-libtestoptimization-static",
                "linux-x64-libtestoptimization-dynamic",
                "linux-x64-libtestoptimization-static",
                "macos-libtestoptimization-dynamic",
                "macos-libtestoptimization-static",
                "windows-x64-libtestoptimization-dynamic",
                "windows-x64-libtestoptimization-static",
            ]
        );
    }

    #[test]
    fn test_output_dirs_are_unique() {
        let matrix = TargetMatrix::all();
        let dirs: BTreeSet<_> = matrix.iter().map(|t| t.output_dir_name()).collect();
        assert_eq!(dirs.len(), matrix.len());
    }

    #[test]
    fn test_host_matrices() {
        let linux = TargetMatrix::for_host(Os::Linux);
        assert_eq!(linux.len(), 5);
        assert!(linux.contains(&TargetKey::new(Os::Android, Arch::Arm64, LinkMode::Dynamic)));

        let mac = TargetMatrix::for_host(Os::Macos);
        assert_eq!(mac.len(), 5);
        assert!(mac.contains(&TargetKey::new(Os::Ios, Arch::Arm64, LinkMode::Static)));

        let win = TargetMatrix::for_host(Os::Windows);
        assert_eq!(win.len(), 2);

        assert!(TargetMatrix::for_host(Os::Ios).is_empty());
    }

    #[test]
    fn test_fusion_groups_on_macos() {
        let groups = TargetMatrix::for_host(Os::Macos).fusion_groups();
        assert_eq!(groups.len(), 2);
        for group in &groups {
            assert_eq!(group.os, Os::Macos);
            assert_ne!(group.members[0].arch, group.members[1].arch);
            assert_eq!(group.members[0].link_mode, group.link_mode);
        }
        assert_eq!(groups[0].logical_name(), "macos-libtestoptimization-static");
    }

    #[test]
    fn test_no_fusion_without_sibling() {
        let matrix = TargetMatrix::from_keys([TargetKey::new(Os::Macos, Arch::Arm64, LinkMode::Static)]);
        assert!(matrix.fusion_groups().is_empty());
        assert!(TargetMatrix::for_host(Os::Linux).fusion_groups().is_empty());
    }

    #[test]
    fn test_local_dev() {
        let linux = TargetMatrix::local_dev(Os::Linux, Arch::Arm64);
        let keys: Vec<String> = linux.iter().map(|t| t.key().to_string()).collect();
        assert_eq!(keys, vec!["linux-arm64-static", "linux-arm64-dynamic"]);

        let mac = TargetMatrix::local_dev(Os::Macos, Arch::Arm64);
        assert_eq!(mac.len(), 4);
        assert_eq!(mac.fusion_groups().len(), 2);
    }

    #[test]
    fn test_from_keys_dedups_and_retain() {
        let key = TargetKey::new(Os::Linux, Arch::Amd64, LinkMode::Static);
        let matrix = TargetMatrix::from_keys([key, key]);
        assert_eq!(matrix.len(), 1);

        let filtered = TargetMatrix::for_host(Os::Linux).retain_keys(&[key]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered.targets()[0].key(), key);
    }
}
