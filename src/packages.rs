//! # Package Registry Scanner
//!
//! Derives deployable packages from local storage. A package `<base>` of `<app>`
//! is valid when both `<packages_dir>/<app>/<base>.tar.gz` and
//! `<packages_dir>/<app>/<base>.json` exist.
//!
//! Nothing is cached: tasks add and remove packages underneath us, so every call
//! reads the directory again. Entries vanishing mid-scan are treated as absent.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use tracing::{debug, trace};

use crate::constants::package_files::{METADATA, TARBALL};

/// Whether `name` stays a single entry under the directory it is joined to
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\'])
}

/// App name to sorted valid package base names
pub type PackageMap = BTreeMap<String, Vec<String>>;

/// Both files making up one package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagePaths {
    pub tarball: PathBuf,
    pub metadata: PathBuf,
}

impl PackagePaths {
    pub fn exists(&self) -> bool {
        self.tarball.is_file() && self.metadata.is_file()
    }
}

#[derive(Debug)]
pub struct PackageScanner {
    root: PathBuf,
    scans: AtomicU64,
}

impl PackageScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            scans: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of full directory scans performed so far
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    /// Every app directory with its valid packages; apps without any map to `[]`
    pub fn scan(&self) -> PackageMap {
        self.scans.fetch_add(1, Ordering::Relaxed);

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(root = %self.root.display(), error = %e, "Packages directory unreadable");
                return PackageMap::new();
            }
        };

        entries
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .map(|app| {
                let packages = self.app_packages(&app);
                (app, packages)
            })
            .collect()
    }

    /// Sorted valid package base names of one app
    pub fn app_packages(&self, app: &str) -> Vec<String> {
        if !is_plain_name(app) {
            debug!(app, "Ignoring app name outside the packages directory");
            return Vec::new();
        }
        let dir = self.root.join(app);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                trace!(dir = %dir.display(), error = %e, "App directory unreadable");
                return Vec::new();
            }
        };

        // (has tarball, has metadata) per base name
        let mut groups: HashMap<String, (bool, bool)> = HashMap::new();
        for entry in entries.flatten() {
            if !entry.path().is_file() {
                continue;
            }
            let Ok(file_name) = entry.file_name().into_string() else {
                continue;
            };
            if let Some(base) = file_name.strip_suffix(TARBALL) {
                groups.entry(base.to_string()).or_default().0 = true;
            } else if let Some(base) = file_name.strip_suffix(METADATA) {
                groups.entry(base.to_string()).or_default().1 = true;
            }
        }

        let mut valid: Vec<String> = groups
            .into_iter()
            .filter(|(base, (tarball, metadata))| !base.is_empty() && *tarball && *metadata)
            .map(|(base, _)| base)
            .collect();
        valid.sort();
        valid
    }

    /// Valid packages of one app, oldest tarball first (ties broken by name)
    pub fn packages_by_age(&self, app: &str) -> Vec<String> {
        let mut aged: Vec<(SystemTime, String)> = self
            .app_packages(app)
            .into_iter()
            .map(|base| {
                let modified = fs::metadata(self.package_paths(app, &base).tarball)
                    .and_then(|meta| meta.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, base)
            })
            .collect();
        aged.sort();
        aged.into_iter().map(|(_, base)| base).collect()
    }

    pub fn package_paths(&self, app: &str, base: &str) -> PackagePaths {
        let dir = self.root.join(app);
        PackagePaths {
            tarball: dir.join(format!("{base}{TARBALL}")),
            metadata: dir.join(format!("{base}{METADATA}")),
        }
    }

    pub fn is_valid(&self, app: &str, base: &str) -> bool {
        is_plain_name(app) && is_plain_name(base) && self.package_paths(app, base).exists()
    }
}
