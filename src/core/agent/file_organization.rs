use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{info, warn};

use super::{Agent, Params, TaskResult};

const CATEGORIES: &[(&str, &[&str])] = &[
    ("image", &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp"]),
    ("video", &["mp4", "avi", "mov", "wmv", "flv", "mkv", "webm"]),
    ("audio", &["mp3", "wav", "flac", "aac", "ogg", "m4a"]),
    ("document", &["pdf", "doc", "docx", "txt", "rtf", "odt"]),
    ("spreadsheet", &["xls", "xlsx", "csv", "ods"]),
    ("presentation", &["ppt", "pptx", "odp"]),
    ("archive", &["zip", "rar", "7z", "tar", "gz"]),
    (
        "code",
        &["py", "js", "html", "css", "java", "cpp", "c", "php", "rb", "go", "rs"],
    ),
    ("data", &["json", "xml", "yaml", "yml", "sql", "db", "sqlite"]),
];

const OTHER: &str = "other";

const OPERATIONS: &[&str] = &["process_documents", "organize_files", "add_test_files"];

const TEST_FILES: &[(&str, &str)] = &[
    ("test_document.pdf", "document"),
    ("sample_image.jpg", "image"),
    ("video_sample.mp4", "video"),
    ("audio_file.mp3", "audio"),
    ("code_script.py", "code"),
    ("data_file.json", "data"),
    ("presentation.pptx", "presentation"),
    ("spreadsheet.xlsx", "spreadsheet"),
    ("archive.zip", "archive"),
];

/// Sorts files under `documents_dir` into per-category folders and flags duplicates.
pub struct FileOrganizationAgent {
    documents_dir: PathBuf,
    reports_dir: PathBuf,
    files_processed: AtomicU64,
    duplicates_found: AtomicU64,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Serialize)]
struct OrganizedFile {
    original: String,
    organized: String,
    #[serde(rename = "type")]
    category: &'static str,
    size: u64,
}

#[derive(Debug, Clone, Serialize)]
struct DuplicateFile {
    path: String,
    hash: String,
    size: u64,
}

impl FileOrganizationAgent {
    pub fn new(documents_dir: impl Into<PathBuf>, reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            documents_dir: documents_dir.into(),
            reports_dir: reports_dir.into(),
            files_processed: AtomicU64::new(0),
            duplicates_found: AtomicU64::new(0),
            last_run: Mutex::new(None),
        }
    }

    /// Default triggers: the webhook route N8N posts file events to, and a
    /// six-hourly batch run.
    pub fn default_triggers() -> Vec<(&'static str, Value)> {
        vec![
            (
                "file_upload",
                json!({
                    "type": "webhook",
                    "endpoint": "/webhook/file-organization",
                    "triggers": ["new_file", "file_modified", "file_deleted"]
                }),
            ),
            (
                "batch_processing",
                json!({
                    "type": "scheduled",
                    "schedule": "0 */6 * * *",
                    "action": "process_documents"
                }),
            ),
        ]
    }

    fn process_documents(&self) -> Result<TaskResult> {
        let start = Instant::now();
        fs::create_dir_all(&self.documents_dir).with_context(|| {
            format!("cannot create {}", self.documents_dir.display())
        })?;

        let mut seen = self.organized_hashes();
        let pending = self.unorganized_files()?;
        if pending.is_empty() {
            return Ok(TaskResult::success(json!({
                "status": "idle",
                "message": "No files to process",
                "files_processed": 0,
                "duplicates_found": 0,
                "processing_time": start.elapsed().as_secs_f64()
            })));
        }

        let mut organized = Vec::new();
        let mut duplicates = Vec::new();
        for path in pending {
            let (hash, size) = match hash_file(&path) {
                Ok(v) => v,
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };

            if !seen.insert(hash.clone()) {
                duplicates.push(DuplicateFile {
                    path: path.display().to_string(),
                    hash,
                    size,
                });
                continue;
            }

            let category = category_for(&path);
            match self.move_into(&path, category) {
                Ok(target) => organized.push(OrganizedFile {
                    original: path.display().to_string(),
                    organized: target.display().to_string(),
                    category,
                    size,
                }),
                Err(e) => warn!("Error organizing {}: {}", path.display(), e),
            }
        }

        self.files_processed
            .fetch_add(organized.len() as u64, Ordering::Relaxed);
        self.duplicates_found
            .fetch_add(duplicates.len() as u64, Ordering::Relaxed);
        if let Ok(mut last) = self.last_run.lock() {
            *last = Some(Utc::now());
        }

        let report = self.write_report(&organized, &duplicates)?;
        info!(
            "File organization finished: {} organized, {} duplicates",
            organized.len(),
            duplicates.len()
        );

        Ok(TaskResult::success(json!({
            "status": "completed",
            "message": format!("Organized {} files", organized.len()),
            "files_processed": organized.len(),
            "duplicates_found": duplicates.len(),
            "processing_time": start.elapsed().as_secs_f64(),
            "report": report,
            "organized_files": organized
        })))
    }

    fn add_test_files(&self) -> Result<TaskResult> {
        fs::create_dir_all(&self.documents_dir)?;
        let now = Utc::now().to_rfc3339();
        let mut created = Vec::new();
        for (name, category) in TEST_FILES {
            let path = self.documents_dir.join(name);
            fs::write(
                &path,
                format!("This is a test {} file created at {}", category, now),
            )
            .with_context(|| format!("cannot write {}", path.display()))?;
            created.push(path.display().to_string());
        }

        Ok(TaskResult::success(json!({
            "status": "completed",
            "files_created": created.len(),
            "files": created
        })))
    }

    /// Files not yet inside a category folder, in path order.
    fn unorganized_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.documents_dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                if !is_category_dir(&path) {
                    walk(&path, &mut files)?;
                }
            } else if file_type.is_file() || (file_type.is_symlink() && path.is_file()) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Hashes of files already sorted on a previous run, so their copies still count as duplicates.
    fn organized_hashes(&self) -> HashSet<String> {
        let mut hashes = HashSet::new();
        let categories = CATEGORIES
            .iter()
            .map(|(name, _)| *name)
            .chain(std::iter::once(OTHER));
        for category in categories {
            let dir = self.documents_dir.join(category);
            let mut files = Vec::new();
            if dir.is_dir() && walk(&dir, &mut files).is_ok() {
                hashes.extend(files.iter().filter_map(|f| hash_file(f).ok().map(|(h, _)| h)));
            }
        }
        hashes
    }

    fn move_into(&self, path: &Path, category: &str) -> Result<PathBuf> {
        let dir = self.documents_dir.join(category);
        fs::create_dir_all(&dir)?;
        let target = unique_destination(&dir, path);
        if fs::rename(path, &target).is_err() {
            fs::copy(path, &target)?;
            fs::remove_file(path)?;
        }
        Ok(target)
    }

    fn write_report(&self, organized: &[OrganizedFile], duplicates: &[DuplicateFile]) -> Result<Value> {
        let total_size: u64 = organized.iter().map(|f| f.size).sum();
        let mut distribution: BTreeMap<&str, usize> = BTreeMap::new();
        for file in organized {
            *distribution.entry(file.category).or_default() += 1;
        }

        let now = Utc::now();
        let report = json!({
            "timestamp": now.to_rfc3339(),
            "summary": {
                "files_organized": organized.len(),
                "duplicates_found": duplicates.len(),
                "total_size_bytes": total_size,
                "total_size_mb": (total_size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
            },
            "type_distribution": distribution,
            "organized_files": organized,
            "duplicates": duplicates
        });

        fs::create_dir_all(&self.reports_dir)?;
        let file = self.reports_dir.join(format!(
            "file_organization_report_{}.json",
            now.format("%Y%m%d_%H%M%S_%6f")
        ));
        fs::write(&file, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("cannot write report {}", file.display()))?;
        Ok(report)
    }
}

impl Agent for FileOrganizationAgent {
    fn execute(&self, params: &Params) -> Result<TaskResult> {
        let operation = params
            .get("operation")
            .and_then(|v| v.as_str())
            .unwrap_or("process_documents");

        match operation {
            "process_documents" | "organize_files" => self.process_documents(),
            "add_test_files" => self.add_test_files(),
            other => Ok(TaskResult::failure_with(
                format!("Unknown operation: {}", other),
                json!({ "supported_operations": OPERATIONS }),
            )),
        }
    }

    fn status(&self) -> Value {
        let last_run = self.last_run.lock().ok().and_then(|l| *l);
        json!({
            "files_processed": self.files_processed.load(Ordering::Relaxed),
            "duplicates_found": self.duplicates_found.load(Ordering::Relaxed),
            "documents_dir": self.documents_dir.display().to_string(),
            "reports_dir": self.reports_dir.display().to_string(),
            "last_run": last_run
        })
    }

    fn capabilities(&self) -> Value {
        json!({
            "name": "File Organization Agent",
            "capabilities": [
                "file_organization",
                "duplicate_detection",
                "file_categorization",
                "batch_processing",
                "report_generation"
            ],
            "supported_file_types": CATEGORIES.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            "operations": OPERATIONS
        })
    }

    fn validate_parameters(&self, params: &Params) -> bool {
        params
            .get("operation")
            .is_none_or(|op| op.is_string() || op.is_null())
    }
}

/// Extension table first, then the MIME top-level type, then `other`.
pub(crate) fn category_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if let Some((category, _)) = CATEGORIES
        .iter()
        .find(|(_, exts)| exts.contains(&extension.as_str()))
    {
        return *category;
    }

    match mime_guess::from_path(path).first() {
        Some(mime) => match mime.type_().as_str() {
            "image" => "image",
            "video" => "video",
            "audio" => "audio",
            "text" => "document",
            _ => OTHER,
        },
        None => OTHER,
    }
}

fn is_category_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n == OTHER || CATEGORIES.iter().any(|(c, _)| *c == n))
}

/// Regular files under `dir`. Symlinked directories are not descended into.
fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            walk(&path, files)?;
        } else if file_type.is_file() || (file_type.is_symlink() && path.is_file()) {
            files.push(path);
        }
    }
    Ok(())
}

fn hash_file(path: &Path) -> std::io::Result<(String, u64)> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let size = std::io::copy(&mut file, &mut hasher)?;
    Ok((hex::encode(hasher.finalize()), size))
}

/// `name.ext`, then `name_1.ext`, `name_2.ext`, ... until the slot is free.
fn unique_destination(dir: &Path, source: &Path) -> PathBuf {
    let file_name = source.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    let candidate = dir.join(&file_name);
    if !candidate.exists() {
        return candidate;
    }

    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let mut counter = 1;
    loop {
        let candidate = dir.join(format!("{}_{}{}", stem, counter, suffix));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}
