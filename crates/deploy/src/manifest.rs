//! Manifest reduction.
//!
//! The hasher feeds every [`HashedFile`] through a single [`ManifestBuilder`]
//! which keeps two indexes, one for static files and one for functions.
//! Each index is a path→digest [`Manifest`] plus the digest→sources
//! [`ShaMap`] used to pick upload bodies.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use sitesync_protocol::{DeployRecord, FunctionConfig, FunctionSchedule};
use sitesync_transfer::{HashAlgorithm, checksum_bytes};
use tracing::debug;

use crate::error::DeployError;
use crate::types::{AssetKind, FileEntry, HashedFile, UploadTask};

/// Normalized path → digest.
pub type Manifest = BTreeMap<String, String>;

/// Digest → every hashed file with that content, in arrival order.
pub type ShaMap = BTreeMap<String, Vec<HashedFile>>;

/// Manifest plus dedup index for one asset kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetIndex {
    pub manifest: Manifest,
    pub sha_map: ShaMap,
}

impl AssetIndex {
    pub fn len(&self) -> usize {
        self.manifest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.is_empty()
    }

    /// Adds a hashed file. Returns `false` when the same path was already
    /// present with the same digest.
    fn insert(&mut self, file: HashedFile) -> Result<bool, DeployError> {
        let path = file.entry.normalized_path.clone();
        if let Some(existing_digest) = self.manifest.get(&path) {
            if *existing_digest == file.digest {
                debug!(path = %path, "identical duplicate ignored");
                return Ok(false);
            }
            let existing = self
                .entry(&path)
                .map(|f| f.entry.absolute_path.clone())
                .unwrap_or_default();
            return Err(DeployError::DuplicatePath {
                path,
                existing,
                incoming: file.entry.absolute_path,
            });
        }

        self.manifest.insert(path, file.digest.clone());
        self.sha_map.entry(file.digest.clone()).or_default().push(file);
        Ok(true)
    }

    /// The hashed file stored under `path` itself.
    pub fn entry(&self, path: &str) -> Option<&HashedFile> {
        let digest = self.manifest.get(path)?;
        self.sha_map
            .get(digest)?
            .iter()
            .find(|f| f.entry.normalized_path == path)
    }

    /// Byte source for `path`: the first file sharing its digest.
    pub fn source_for(&self, path: &str) -> Option<&HashedFile> {
        let digest = self.manifest.get(path)?;
        self.sha_map.get(digest)?.first()
    }

    /// Entries in manifest order.
    pub fn entries(&self) -> impl Iterator<Item = &HashedFile> {
        self.manifest.keys().filter_map(|path| self.entry(path))
    }
}

/// Single-writer reducer from hashed files to manifests.
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    files: AssetIndex,
    functions: AssetIndex,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes a hashed file into the file or function index.
    pub fn insert(&mut self, file: HashedFile) -> Result<(), DeployError> {
        let index = match file.entry.asset {
            AssetKind::File => &mut self.files,
            AssetKind::Function(_) => &mut self.functions,
        };
        index.insert(file)?;
        Ok(())
    }

    /// Serializes the site configuration (keys sorted), hashes it and adds
    /// it to the file manifest under `name`.
    pub fn inject_config(
        &mut self,
        config: &toml::Table,
        name: &str,
        algorithm: HashAlgorithm,
    ) -> Result<(), DeployError> {
        let entry = config_entry(config, name)?;
        let digest = match &entry.contents {
            Some(bytes) => checksum_bytes(algorithm, bytes),
            None => return Err(DeployError::Config("config entry has no contents".into())),
        };
        debug!(path = %name, digest = %digest, "injecting site configuration");
        self.insert(HashedFile { entry, digest })
    }

    pub fn len(&self) -> usize {
        self.files.len() + self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.functions.is_empty()
    }

    pub fn finish(self) -> DeployManifest {
        DeployManifest {
            files: self.files,
            functions: self.functions,
        }
    }
}

/// Builds the synthetic entry holding the serialized site configuration.
pub fn config_entry(config: &toml::Table, name: &str) -> Result<FileEntry, DeployError> {
    let normalized_path = sitesync_transfer::validate_deploy_path(name)
        .map(|_| name.to_string())
        .map_err(|e| DeployError::PathValidation {
            path: name.to_string(),
            reason: e.to_string(),
        })?;
    let serialized = toml::to_string(config)?;
    let bytes: Arc<[u8]> = Arc::from(serialized.into_bytes());

    Ok(FileEntry {
        root_dir: PathBuf::new(),
        absolute_path: PathBuf::from(name),
        relative_path: PathBuf::from(name),
        normalized_path,
        size: bytes.len() as u64,
        asset: AssetKind::File,
        contents: Some(bytes),
    })
}

/// Fully reduced manifests for one deploy attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeployManifest {
    pub files: AssetIndex,
    pub functions: AssetIndex,
}

impl DeployManifest {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.functions.is_empty()
    }

    /// Cron schedules of scheduled functions, by name.
    pub fn function_schedules(&self) -> Vec<FunctionSchedule> {
        self.functions
            .entries()
            .filter_map(|f| match &f.entry.asset {
                AssetKind::Function(meta) => meta.schedule.as_ref().map(|cron| FunctionSchedule {
                    name: f.entry.normalized_path.clone(),
                    cron: cron.clone(),
                }),
                AssetKind::File => None,
            })
            .collect()
    }

    /// Per-function settings for functions that define any.
    pub fn functions_config(&self) -> BTreeMap<String, FunctionConfig> {
        self.functions
            .entries()
            .filter_map(|f| match &f.entry.asset {
                AssetKind::Function(meta) => {
                    let config = meta.config();
                    (!config.is_empty()).then(|| (f.entry.normalized_path.clone(), config))
                }
                AssetKind::File => None,
            })
            .collect()
    }

    /// Resolves the store's required lists into upload tasks, files first.
    ///
    /// A required path missing from the manifest means the store answered
    /// for a different manifest and fails negotiation.
    pub fn upload_list(&self, record: &DeployRecord) -> Result<Vec<UploadTask>, DeployError> {
        let files = record
            .required
            .iter()
            .map(|path| resolve(&self.files, path, "file"));
        let functions = record
            .required_functions
            .iter()
            .map(|name| resolve(&self.functions, name, "function"));
        files.chain(functions).collect()
    }
}

fn resolve(index: &AssetIndex, path: &str, kind: &'static str) -> Result<UploadTask, DeployError> {
    let source = index
        .source_for(path)
        .ok_or_else(|| DeployError::UnknownRequiredPath {
            path: path.to_string(),
            kind,
        })?;
    Ok(UploadTask {
        normalized_path: path.to_string(),
        digest: source.digest.clone(),
        asset: source.entry.asset.clone(),
        source: source.entry.source(),
        attempt: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{function_hashed, hashed};
    use crate::types::FunctionMetadata;
    use sitesync_protocol::DeployState;
    use sitesync_transfer::UploadSource;

    fn scenario_a() -> DeployManifest {
        let mut builder = ManifestBuilder::new();
        builder.insert(hashed("a.txt", b"hello")).unwrap();
        builder.insert(hashed("b.txt", b"hello")).unwrap();
        builder.insert(hashed("c.txt", b"world")).unwrap();
        builder.finish()
    }

    #[test]
    fn dedup_index_groups_identical_content() {
        let manifest = scenario_a();
        let hello = checksum_bytes(HashAlgorithm::Sha1, b"hello");

        assert_eq!(manifest.files.len(), 3);
        assert_eq!(manifest.files.sha_map[&hello].len(), 2);
        for digest in manifest.files.manifest.values() {
            assert!(!manifest.files.sha_map[digest].is_empty());
        }
    }

    #[test]
    fn required_paths_become_upload_tasks() {
        let manifest = scenario_a();
        let mut record = DeployRecord::new("d1", DeployState::Prepared);
        record.required = vec!["a.txt".into(), "c.txt".into()];

        let tasks = manifest.upload_list(&record).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].normalized_path, "a.txt");
        let UploadSource::File(source) = &tasks[0].source else {
            panic!("expected a file source");
        };
        assert!(source.ends_with("a.txt") || source.ends_with("b.txt"));
        assert_eq!(tasks[1].digest, checksum_bytes(HashAlgorithm::Sha1, b"world"));
        assert!(tasks.iter().all(|t| t.attempt == 0));
    }

    #[test]
    fn conflicting_duplicate_is_rejected() {
        let mut builder = ManifestBuilder::new();
        builder.insert(hashed("page.html", b"one")).unwrap();
        let err = builder.insert(hashed("page.html", b"two")).unwrap_err();
        match err {
            DeployError::DuplicatePath { path, .. } => assert_eq!(path, "page.html"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn identical_duplicate_is_accepted_once() {
        let mut builder = ManifestBuilder::new();
        builder.insert(hashed("page.html", b"same")).unwrap();
        builder.insert(hashed("page.html", b"same")).unwrap();
        let manifest = builder.finish();
        assert_eq!(manifest.files.len(), 1);
        let digest = &manifest.files.manifest["page.html"];
        assert_eq!(manifest.files.sha_map[digest].len(), 1);
    }

    #[test]
    fn unknown_required_path_fails() {
        let manifest = scenario_a();
        let mut record = DeployRecord::new("d1", DeployState::Prepared);
        record.required = vec!["missing.txt".into()];
        let err = manifest.upload_list(&record).unwrap_err();
        assert!(matches!(
            err,
            DeployError::UnknownRequiredPath { kind: "file", .. }
        ));
    }

    #[test]
    fn files_and_functions_are_separate() {
        let mut builder = ManifestBuilder::new();
        builder.insert(hashed("hello", b"static")).unwrap();
        builder
            .insert(function_hashed(
                "hello",
                b"zip",
                FunctionMetadata {
                    name: "hello".into(),
                    schedule: Some("@daily".into()),
                    display_name: Some("Hello".into()),
                    ..Default::default()
                },
            ))
            .unwrap();
        let manifest = builder.finish();

        assert_eq!(manifest.files.len(), 1);
        assert_eq!(manifest.functions.len(), 1);
        assert_eq!(
            manifest.function_schedules(),
            vec![FunctionSchedule {
                name: "hello".into(),
                cron: "@daily".into()
            }]
        );
        assert_eq!(
            manifest.functions_config()["hello"].display_name.as_deref(),
            Some("Hello")
        );

        let mut record = DeployRecord::new("d1", DeployState::Prepared);
        record.required_functions = vec!["hello".into()];
        let tasks = manifest.upload_list(&record).unwrap();
        assert!(tasks[0].asset.is_function());
    }

    #[test]
    fn config_injection_is_deterministic() {
        let mut config = toml::Table::new();
        config.insert("zeta".into(), toml::Value::Integer(1));
        config.insert("alpha".into(), toml::Value::String("x".into()));

        let mut first = ManifestBuilder::new();
        first.inject_config(&config, "site.toml", HashAlgorithm::Sha1).unwrap();
        let mut second = ManifestBuilder::new();
        second.inject_config(&config, "site.toml", HashAlgorithm::Sha1).unwrap();

        let first = first.finish();
        assert_eq!(first, second.finish());

        let entry = first.files.entry("site.toml").unwrap();
        let UploadSource::Inline(bytes) = entry.entry.source() else {
            panic!("config entry should be inline");
        };
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.find("alpha").unwrap() < text.find("zeta").unwrap());
        assert_eq!(entry.digest, checksum_bytes(HashAlgorithm::Sha1, &bytes));
    }

    #[test]
    fn config_collides_with_different_file() {
        let config = toml::Table::new();
        let mut builder = ManifestBuilder::new();
        builder.insert(hashed("site.toml", b"something else")).unwrap();
        let err = builder
            .inject_config(&config, "site.toml", HashAlgorithm::Sha1)
            .unwrap_err();
        assert!(matches!(err, DeployError::DuplicatePath { .. }));
    }
}
