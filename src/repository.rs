//! C8 — Repository adapter.
//!
//! The persistence layer is an external collaborator; this module defines
//! only the contract (`RepositoryAdapter`), the persisted-schema
//! compatibility shim (`SubjectRecordRow`, `migrate_legacy_row`), and an
//! in-memory reference implementation used by tests and as a usage example.

use crate::error::{PipelineError, Result};
use crate::template::Template;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

/// Opaque identifier for an enrolled subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    /// Wraps an existing id string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// An enrolled subject and its templates, in the shape the repository
/// adapter's methods operate on (§6).
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectRecord {
    /// Subject identifier.
    pub id: RecordId,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Age in years, if captured.
    pub age: Option<u32>,
    /// Contact email, if captured.
    pub email: Option<String>,
    /// Contact phone, if captured.
    pub phone: Option<String>,
    /// Freeform notes.
    pub notes: Option<String>,
    /// Path of the persisted enrollment still image, if any.
    pub iris_image_path: Option<PathBuf>,
    /// Enrolled templates (up to 3 per §4.7's diverse-selection rule).
    pub templates: Vec<Template>,
    /// ISO-8601 creation timestamp, as supplied by the caller.
    pub created_at: String,
    /// ISO-8601 last-update timestamp, as supplied by the caller.
    pub updated_at: String,
}

/// The seven external-interface operations from §6. Storage durability is
/// the implementor's concern; this crate only shapes the contract.
#[cfg_attr(test, mockall::automock)]
pub trait RepositoryAdapter: Send + Sync {
    /// Persists a new record and returns its assigned id.
    fn insert(&self, record: SubjectRecord) -> Result<RecordId>;
    /// Looks up a record by id.
    fn get_by_id(&self, id: &RecordId) -> Result<Option<SubjectRecord>>;
    /// Lists every record (templates may be omitted for a lighter payload;
    /// use [`RepositoryAdapter::list_with_templates`] when templates are
    /// needed).
    fn list_all(&self) -> Result<Vec<SubjectRecord>>;
    /// Free-text search over name/email/phone/notes.
    fn search(&self, query: &str) -> Result<Vec<SubjectRecord>>;
    /// Lists every record with templates populated (used by the matcher's
    /// verification flow).
    fn list_with_templates(&self) -> Result<Vec<SubjectRecord>>;
    /// Overwrites an existing record.
    fn update(&self, record: SubjectRecord) -> Result<()>;
    /// Deletes a record by id.
    fn delete(&self, id: &RecordId) -> Result<()>;
}

/// The persisted row schema from §6's "Persisted schema (compatibility)"
/// table. `iris_templates` is the v2 JSON array-of-arrays-of-doubles column;
/// `iris_template` is the legacy v1 comma-separated singleton column, kept
/// for read compatibility only — writes always populate `iris_templates`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectRecordRow {
    /// Subject identifier.
    pub id: String,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Age in years.
    pub age: Option<u32>,
    /// Contact email.
    pub email: Option<String>,
    /// Contact phone.
    pub phone: Option<String>,
    /// Freeform notes.
    pub notes: Option<String>,
    /// Persisted enrollment still image path.
    pub iris_image_path: Option<String>,
    /// v2 column: array of equal-length double vectors.
    #[serde(default)]
    pub iris_templates: Option<Vec<Vec<f64>>>,
    /// v1 legacy column: a single comma-separated double vector.
    #[serde(default)]
    pub iris_template: Option<String>,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
    /// ISO-8601 last-update timestamp.
    pub updated_at: String,
}

/// Migrates a row read with the legacy v1 `iris_template` column into the v2
/// `iris_templates` shape: if `iris_templates` is already present it is left
/// untouched, otherwise a non-empty `iris_template` is parsed and wrapped in
/// a singleton array.
#[must_use]
pub fn migrate_legacy_row(mut row: SubjectRecordRow) -> SubjectRecordRow {
    if row.iris_templates.is_none() {
        if let Some(legacy) = row.iris_template.take() {
            if !legacy.trim().is_empty() {
                let parsed: Vec<f64> =
                    legacy.split(',').filter_map(|s| s.trim().parse().ok()).collect();
                row.iris_templates = Some(vec![parsed]);
            }
        }
    }
    row
}

/// Converts a row (already migrated) into a [`SubjectRecord`].
pub fn row_to_record(row: SubjectRecordRow) -> Result<SubjectRecord> {
    let templates = row
        .iris_templates
        .unwrap_or_default()
        .into_iter()
        .map(|flat| Template::from_flat_vec(flat.into_iter().map(|v| v as f32).collect()))
        .collect::<Result<Vec<_>>>()?;

    Ok(SubjectRecord {
        id: RecordId(row.id),
        first_name: row.first_name,
        last_name: row.last_name,
        age: row.age,
        email: row.email,
        phone: row.phone,
        notes: row.notes,
        iris_image_path: row.iris_image_path.map(PathBuf::from),
        templates,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

/// Converts a [`SubjectRecord`] into its v2 persisted row. Always writes
/// `iris_templates`; `iris_template` is left empty (v1 is read-only).
#[must_use]
pub fn record_to_row(record: &SubjectRecord) -> SubjectRecordRow {
    SubjectRecordRow {
        id: record.id.0.clone(),
        first_name: record.first_name.clone(),
        last_name: record.last_name.clone(),
        age: record.age,
        email: record.email.clone(),
        phone: record.phone.clone(),
        notes: record.notes.clone(),
        iris_image_path: record.iris_image_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
        iris_templates: Some(
            record
                .templates
                .iter()
                .map(|t| t.as_flat_vec().into_iter().map(f64::from).collect())
                .collect(),
        ),
        iris_template: None,
        created_at: record.created_at.clone(),
        updated_at: record.updated_at.clone(),
    }
}

/// In-memory [`RepositoryAdapter`] reference implementation, for tests and
/// as a usage example. Not itself durable; a real embedder backs this trait
/// with a database or file store.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    records: RwLock<HashMap<RecordId, SubjectRecord>>,
}

impl InMemoryRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<RecordId, SubjectRecord>>> {
        self.records
            .read()
            .map_err(|_| PipelineError::RepositoryUnavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<RecordId, SubjectRecord>>> {
        self.records
            .write()
            .map_err(|_| PipelineError::RepositoryUnavailable("lock poisoned".to_string()))
    }
}

impl RepositoryAdapter for InMemoryRepository {
    fn insert(&self, record: SubjectRecord) -> Result<RecordId> {
        let id = record.id.clone();
        self.write()?.insert(id.clone(), record);
        Ok(id)
    }

    fn get_by_id(&self, id: &RecordId) -> Result<Option<SubjectRecord>> {
        Ok(self.read()?.get(id).cloned())
    }

    fn list_all(&self) -> Result<Vec<SubjectRecord>> {
        Ok(self
            .read()?
            .values()
            .cloned()
            .map(|mut record| {
                record.templates.clear();
                record
            })
            .collect())
    }

    fn search(&self, query: &str) -> Result<Vec<SubjectRecord>> {
        let needle = query.to_lowercase();
        Ok(self
            .read()?
            .values()
            .filter(|record| {
                [&record.first_name, &record.last_name]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&needle))
                    || record
                        .email
                        .as_deref()
                        .is_some_and(|e| e.to_lowercase().contains(&needle))
                    || record
                        .phone
                        .as_deref()
                        .is_some_and(|p| p.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect())
    }

    fn list_with_templates(&self) -> Result<Vec<SubjectRecord>> {
        Ok(self.read()?.values().cloned().collect())
    }

    fn update(&self, record: SubjectRecord) -> Result<()> {
        let mut guard = self.write()?;
        if !guard.contains_key(&record.id) {
            return Err(PipelineError::RepositoryUnavailable(format!(
                "no record with id {:?}",
                record.id
            )));
        }
        guard.insert(record.id.clone(), record);
        Ok(())
    }

    fn delete(&self, id: &RecordId) -> Result<()> {
        self.write()?.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(id: &str) -> SubjectRecord {
        SubjectRecord {
            id: RecordId::new(id),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            age: Some(30),
            email: Some("ada@example.com".to_string()),
            phone: None,
            notes: None,
            iris_image_path: None,
            templates: vec![Template::from_parts(
                vec![1.0; Template::HALF_LEN],
                vec![1.0; Template::HALF_LEN],
            )],
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn insert_then_get_by_id_round_trips() {
        let repo = InMemoryRepository::new();
        let id = repo.insert(sample_record("1")).unwrap();
        let fetched = repo.get_by_id(&id).unwrap().unwrap();
        assert_eq!(fetched.first_name, "Ada");
        assert_eq!(fetched.templates.len(), 1);
    }

    #[test]
    fn list_all_omits_templates_but_list_with_templates_keeps_them() {
        let repo = InMemoryRepository::new();
        repo.insert(sample_record("1")).unwrap();
        let summary = repo.list_all().unwrap();
        assert!(summary[0].templates.is_empty());
        let full = repo.list_with_templates().unwrap();
        assert_eq!(full[0].templates.len(), 1);
    }

    #[test]
    fn search_matches_case_insensitively() {
        let repo = InMemoryRepository::new();
        repo.insert(sample_record("1")).unwrap();
        assert_eq!(repo.search("lovelace").unwrap().len(), 1);
        assert_eq!(repo.search("nobody").unwrap().len(), 0);
    }

    #[test]
    fn update_rejects_unknown_id() {
        let repo = InMemoryRepository::new();
        let result = repo.update(sample_record("missing"));
        assert!(matches!(result, Err(PipelineError::RepositoryUnavailable(_))));
    }

    #[test]
    fn delete_removes_record() {
        let repo = InMemoryRepository::new();
        repo.insert(sample_record("1")).unwrap();
        repo.delete(&RecordId::new("1")).unwrap();
        assert!(repo.get_by_id(&RecordId::new("1")).unwrap().is_none());
    }

    #[test]
    fn legacy_row_migrates_into_v2_singleton_array() {
        let row = SubjectRecordRow {
            id: "1".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            age: None,
            email: None,
            phone: None,
            notes: None,
            iris_image_path: None,
            iris_templates: None,
            iris_template: Some((0..Template::LEN).map(|i| (i % 2) as f64).collect::<Vec<_>>().iter().map(f64::to_string).collect::<Vec<_>>().join(",")),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        };
        let migrated = migrate_legacy_row(row);
        assert!(migrated.iris_template.is_none());
        let templates = migrated.iris_templates.unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].len(), Template::LEN);
    }

    #[test]
    fn row_already_on_v2_is_left_untouched_by_migration() {
        let row = SubjectRecordRow {
            id: "1".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            age: None,
            email: None,
            phone: None,
            notes: None,
            iris_image_path: None,
            iris_templates: Some(vec![vec![0.0; Template::LEN]]),
            iris_template: Some("1,2,3".to_string()),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        };
        let migrated = migrate_legacy_row(row);
        assert_eq!(migrated.iris_templates.unwrap().len(), 1);
    }
}
