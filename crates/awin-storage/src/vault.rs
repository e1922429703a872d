//! File-backed notes store: one Markdown note per slug with YAML frontmatter.
//!
//! Layout under the vault root:
//! - `inbox/<slug>.md`      scraped campaign record (the ingestion state lives here)
//! - `campaigns/<slug>.md`  enrichment artifact produced downstream
//! - `media/<file>`         downloaded images referenced by `image_paths`

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use awin_core::{
    Award, AwardSource, CampaignRecord, Credit, IllegalTransition, IngestionStatus,
    NarrativeSection,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::sha256_hex;

const INBOX_DIR: &str = "inbox";
const ENRICHED_DIR: &str = "campaigns";
const MEDIA_DIR: &str = "media";
const DESCRIPTION_HEADING: &str = "Description";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{slug}: {source}")]
    IllegalTransition {
        slug: String,
        #[source]
        source: IllegalTransition,
    },
    #[error("no persisted record for slug {0}")]
    NotFound(String),
    #[error("refusing to persist a record without a slug (url: {0})")]
    MissingSlug(String),
    #[error("malformed note {path}: {message}")]
    Frontmatter { path: String, message: String },
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Which persisted records an operation looks at.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum JobScope {
    #[default]
    All,
    Job(String),
}

impl JobScope {
    pub fn from_option(job_id: Option<String>) -> Self {
        match job_id {
            Some(id) if !id.trim().is_empty() => JobScope::Job(id),
            _ => JobScope::All,
        }
    }

    pub fn matches(&self, job_id: Option<&str>) -> bool {
        match self {
            JobScope::All => true,
            JobScope::Job(id) => job_id == Some(id.as_str()),
        }
    }
}

/// A note as found on disk. Unreadable notes are surfaced rather than skipped so
/// the auditor can classify them.
#[derive(Debug, Clone)]
pub enum StoredNote {
    Readable(CampaignRecord),
    Unreadable { slug: String, error: String },
}

impl StoredNote {
    pub fn slug(&self) -> &str {
        match self {
            StoredNote::Readable(record) => &record.slug,
            StoredNote::Unreadable { slug, .. } => slug,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced { previous: IngestionStatus },
}

/// Persistence boundary of the ingest. Every status change is validated against
/// the [`IngestionStatus`] transition table here.
#[async_trait]
pub trait NotesStore: Send + Sync {
    async fn load(&self, slug: &str) -> Result<Option<CampaignRecord>, StoreError>;

    async fn scan(&self, scope: &JobScope) -> Result<Vec<StoredNote>, StoreError>;

    /// Insert or overwrite by slug. The record's status must be a legal successor
    /// of whatever is persisted under that slug.
    async fn upsert(&self, record: &CampaignRecord) -> Result<UpsertOutcome, StoreError>;

    async fn transition(
        &self,
        slug: &str,
        to: IngestionStatus,
    ) -> Result<CampaignRecord, StoreError>;

    async fn write_enrichment(&self, slug: &str, body: &str) -> Result<(), StoreError>;

    async fn delete_enrichment(&self, slug: &str) -> Result<bool, StoreError>;

    async fn has_enrichment(&self, slug: &str) -> Result<bool, StoreError>;

    /// Store a downloaded media asset and return its vault-relative path.
    async fn store_media(
        &self,
        slug: &str,
        index: usize,
        source_url: &str,
        bytes: &[u8],
    ) -> Result<String, StoreError>;

    async fn known_slugs(&self, scope: &JobScope) -> Result<BTreeSet<String>, StoreError> {
        Ok(self
            .scan(scope)
            .await?
            .iter()
            .map(|note| note.slug().to_string())
            .collect())
    }

    async fn list_with_status(
        &self,
        scope: &JobScope,
        status: IngestionStatus,
    ) -> Result<Vec<CampaignRecord>, StoreError> {
        Ok(self
            .scan(scope)
            .await?
            .into_iter()
            .filter_map(|note| match note {
                StoredNote::Readable(record) if record.status == status => Some(record),
                _ => None,
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct VaultStore {
    root: PathBuf,
}

impl VaultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn note_path(&self, slug: &str) -> PathBuf {
        self.root.join(INBOX_DIR).join(format!("{slug}.md"))
    }

    pub fn enrichment_path(&self, slug: &str) -> PathBuf {
        self.root.join(ENRICHED_DIR).join(format!("{slug}.md"))
    }

    async fn read_note(&self, path: &Path) -> Result<Option<CampaignRecord>, StoreError> {
        let text = match fs::read_to_string(path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::io(path, err)),
        };
        parse_note(&text)
            .map(Some)
            .map_err(|message| StoreError::Frontmatter {
                path: path.display().to_string(),
                message,
            })
    }
}

#[async_trait]
impl NotesStore for VaultStore {
    async fn load(&self, slug: &str) -> Result<Option<CampaignRecord>, StoreError> {
        self.read_note(&self.note_path(slug)).await
    }

    async fn scan(&self, scope: &JobScope) -> Result<Vec<StoredNote>, StoreError> {
        let inbox = self.root.join(INBOX_DIR);
        let mut entries = match fs::read_dir(&inbox).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(&inbox, err)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| StoreError::io(&inbox, err))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("md") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut notes = Vec::with_capacity(paths.len());
        for path in paths {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            match self.read_note(&path).await {
                Ok(Some(record)) => {
                    if scope.matches(record.job_id.as_deref()) {
                        notes.push(StoredNote::Readable(record));
                    }
                }
                Ok(None) => {}
                // An unreadable note carries no job id, so only an unscoped scan owns it.
                Err(StoreError::Frontmatter { .. }) if *scope != JobScope::All => {
                    debug!(note = %stem, "skipping unreadable note in job-scoped scan");
                }
                Err(StoreError::Frontmatter { message, .. }) => {
                    notes.push(StoredNote::Unreadable {
                        slug: stem,
                        error: message,
                    });
                }
                Err(err) => return Err(err),
            }
        }
        Ok(notes)
    }

    async fn upsert(&self, record: &CampaignRecord) -> Result<UpsertOutcome, StoreError> {
        if record.slug.trim().is_empty() {
            return Err(StoreError::MissingSlug(record.url.clone()));
        }
        let path = self.note_path(&record.slug);
        let previous = self.read_note(&path).await?.map(|r| r.status);
        IngestionStatus::validate_transition(previous, record.status).map_err(|source| {
            StoreError::IllegalTransition {
                slug: record.slug.clone(),
                source,
            }
        })?;

        write_atomic(&path, render_note(record)?.as_bytes()).await?;
        debug!(slug = %record.slug, status = %record.status, "note persisted");
        Ok(match previous {
            Some(previous) => UpsertOutcome::Replaced { previous },
            None => UpsertOutcome::Inserted,
        })
    }

    async fn transition(
        &self,
        slug: &str,
        to: IngestionStatus,
    ) -> Result<CampaignRecord, StoreError> {
        let path = self.note_path(slug);
        let mut record = self
            .read_note(&path)
            .await?
            .ok_or_else(|| StoreError::NotFound(slug.to_string()))?;
        IngestionStatus::validate_transition(Some(record.status), to).map_err(|source| {
            StoreError::IllegalTransition {
                slug: slug.to_string(),
                source,
            }
        })?;
        let from = record.status;
        record.status = to;
        write_atomic(&path, render_note(&record)?.as_bytes()).await?;
        info!(slug, %from, %to, "status transition");
        Ok(record)
    }

    async fn write_enrichment(&self, slug: &str, body: &str) -> Result<(), StoreError> {
        write_atomic(&self.enrichment_path(slug), body.as_bytes()).await
    }

    async fn delete_enrichment(&self, slug: &str) -> Result<bool, StoreError> {
        let path = self.enrichment_path(slug);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StoreError::io(&path, err)),
        }
    }

    async fn has_enrichment(&self, slug: &str) -> Result<bool, StoreError> {
        let path = self.enrichment_path(slug);
        fs::try_exists(&path)
            .await
            .map_err(|err| StoreError::io(&path, err))
    }

    async fn store_media(
        &self,
        slug: &str,
        index: usize,
        source_url: &str,
        bytes: &[u8],
    ) -> Result<String, StoreError> {
        let name = media_file_name(slug, index, source_url);
        let relative = format!("{MEDIA_DIR}/{name}");
        let path = self.root.join(&relative);
        let exists = fs::try_exists(&path)
            .await
            .map_err(|err| StoreError::io(&path, err))?;
        if !exists {
            write_atomic(&path, bytes).await?;
        }
        Ok(relative)
    }
}

/// `<slug>_<index>_<hash8>.<ext>`, stable for the same source URL.
pub fn media_file_name(slug: &str, index: usize, source_url: &str) -> String {
    let hash = sha256_hex(source_url.as_bytes());
    let lower = source_url.to_ascii_lowercase();
    let ext = [".jpeg", ".jpg", ".png", ".gif", ".webp"]
        .into_iter()
        .find(|ext| lower.contains(ext))
        .unwrap_or(".webp");
    format!("{slug}_{index}_{}{ext}", &hash[..8])
}

/// Write via a uniquely named temp file and rename, so readers never observe a
/// partially written note.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .map_err(|err| StoreError::io(parent, err))?;

    let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .map_err(|err| StoreError::io(&temp_path, err))?;
    file.write_all(bytes)
        .await
        .map_err(|err| StoreError::io(&temp_path, err))?;
    file.flush()
        .await
        .map_err(|err| StoreError::io(&temp_path, err))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StoreError::io(path, err));
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize)]
struct NoteFrontmatter {
    title: String,
    slug: String,
    #[serde(default)]
    brand: String,
    #[serde(default)]
    agency: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    agency_location: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    festival: String,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    awards: Vec<Award>,
    #[serde(default)]
    award_source: AwardSource,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    award_count_text: String,
    source_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    image_url: String,
    #[serde(default)]
    video_urls: Vec<String>,
    #[serde(default)]
    image_urls: Vec<String>,
    #[serde(default)]
    image_paths: Vec<String>,
    #[serde(default)]
    credits: Vec<Credit>,
    status: IngestionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scraped_at: Option<DateTime<Utc>>,
}

pub(crate) fn render_note(record: &CampaignRecord) -> Result<String, StoreError> {
    let meta = NoteFrontmatter {
        title: record.title.clone(),
        slug: record.slug.clone(),
        brand: record.brand.clone(),
        agency: record.agency.clone(),
        agency_location: record.agency_location.clone(),
        country: record.country.clone(),
        festival: record.festival.clone(),
        year: record.year,
        awards: record.awards.clone(),
        award_source: record.award_source,
        award_count_text: record.award_count_text.clone(),
        source_url: record.url.clone(),
        image_url: record.image_url.clone(),
        video_urls: record.video_urls.clone(),
        image_urls: record.image_urls.clone(),
        image_paths: record.image_paths.clone(),
        credits: record.credits.clone(),
        status: record.status,
        job_id: record.job_id.clone(),
        scraped_at: record.scraped_at,
    };
    let yaml = serde_yaml::to_string(&meta).map_err(|err| StoreError::Frontmatter {
        path: record.slug.clone(),
        message: err.to_string(),
    })?;

    let title = if record.title.trim().is_empty() {
        record.slug.as_str()
    } else {
        record.title.trim()
    };
    let mut out = format!("---\n{yaml}---\n# {title}\n\n");
    let heading_collides = record
        .sections
        .iter()
        .any(|section| section.heading.trim() == DESCRIPTION_HEADING);
    // The first block under the reserved heading is always the description, so
    // an empty one is written whenever a section shares that heading.
    if !record.description.trim().is_empty() || heading_collides {
        out.push_str(&format!(
            "## {DESCRIPTION_HEADING}\n{}\n\n",
            record.description.trim()
        ));
    }
    for section in &record.sections {
        out.push_str(&format!("## {}\n{}\n\n", section.heading.trim(), section.body.trim()));
    }
    Ok(out)
}

pub(crate) fn parse_note(text: &str) -> Result<CampaignRecord, String> {
    let (yaml, body) = split_frontmatter(text).ok_or_else(|| "missing frontmatter".to_string())?;
    let meta: NoteFrontmatter = serde_yaml::from_str(yaml).map_err(|err| err.to_string())?;
    let (description, sections) = parse_body(body);

    Ok(CampaignRecord {
        url: meta.source_url,
        slug: meta.slug,
        title: meta.title,
        brand: meta.brand,
        agency: meta.agency,
        agency_location: meta.agency_location,
        country: meta.country,
        festival: meta.festival,
        year: meta.year,
        image_url: meta.image_url,
        award_count_text: meta.award_count_text,
        awards: meta.awards,
        award_source: meta.award_source,
        description,
        sections,
        credits: meta.credits,
        video_urls: meta.video_urls,
        image_urls: meta.image_urls,
        image_paths: meta.image_paths,
        status: meta.status,
        job_id: meta.job_id,
        scraped_at: meta.scraped_at,
    })
}

fn split_frontmatter(text: &str) -> Option<(&str, &str)> {
    let rest = text
        .strip_prefix("---\n")
        .or_else(|| text.strip_prefix("---\r\n"))?;
    if let Some(body) = rest.strip_prefix("---\n") {
        return Some(("", body));
    }
    let end = rest.find("\n---\n")?;
    Some((&rest[..end + 1], &rest[end + 5..]))
}

fn parse_body(body: &str) -> (String, Vec<NarrativeSection>) {
    let mut description = String::new();
    let mut description_taken = false;
    let mut sections = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    let mut flush = |current: Option<(String, Vec<&str>)>| {
        if let Some((heading, lines)) = current {
            let text = lines.join("\n").trim().to_string();
            if heading == DESCRIPTION_HEADING && !description_taken {
                description = text;
                description_taken = true;
            } else {
                sections.push(NarrativeSection {
                    heading,
                    body: text,
                });
            }
        }
    };

    for line in body.lines() {
        if let Some(heading) = line.strip_prefix("## ") {
            flush(current.take());
            current = Some((heading.trim().to_string(), Vec::new()));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }
    flush(current.take());
    (description, sections)
}
