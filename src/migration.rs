// 🚚 Migration Run - every entity CSV, in dependency order
//
// borrowers → loans → repayments → savings → expenses → applications
//
// Row failures are counted per entity and never stop the run. An error that
// escapes an importer (unreadable file, audit-log failure) does; whatever was
// already written stays committed.

use crate::csv_source::CsvTable;
use crate::db::{self, EntityKind, Event};
use crate::importers::{importer_for, run_import, ImportOptions, ImportStats};
use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const MIGRATION_ACTOR: &str = "migration";

/// Which CSV feeds which entity. Entities without a file are skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub files: HashMap<EntityKind, PathBuf>,
}

impl MigrationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, entity: EntityKind, path: impl Into<PathBuf>) -> Self {
        self.files.insert(entity, path.into());
        self
    }

    /// `dir/<file name>` for each configured entity
    pub fn from_dir(dir: &Path, names: &[(EntityKind, String)]) -> Self {
        let files = names
            .iter()
            .map(|(entity, name)| (*entity, dir.join(name)))
            .collect();
        MigrationPlan { files }
    }

    pub fn file_for(&self, entity: EntityKind) -> Option<&Path> {
        self.files.get(&entity).map(|p| p.as_path())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MigrationOptions {
    /// Delete every imported table's rows before importing
    pub fresh: bool,
    pub import: ImportOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub cleared_rows: usize,
    pub entities: Vec<ImportStats>,
    pub skipped_entities: Vec<EntityKind>,
}

impl MigrationReport {
    pub fn total_imported(&self) -> usize {
        self.entities.iter().map(|s| s.imported + s.updated).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.entities.iter().map(|s| s.failed).sum()
    }

    pub fn stats_for(&self, entity: EntityKind) -> Option<&ImportStats> {
        self.entities.iter().find(|s| s.entity == entity)
    }
}

pub fn run_migration(conn: &Connection, plan: &MigrationPlan, options: &MigrationOptions) -> Result<MigrationReport> {
    let started_at = chrono::Utc::now();
    let actor = db::ensure_user(conn, MIGRATION_ACTOR, "Migration Script", "system")
        .context("Failed to register migration user")?;

    let mut import_options = options.import.clone();
    import_options.actor = actor.username.clone();

    let cleared_rows = if options.fresh {
        let removed = db::clear_tables(conn, &EntityKind::IMPORT_ORDER)?;
        tracing::warn!(rows = removed, "fresh migration: cleared existing data");
        removed
    } else {
        0
    };

    let mut entities = Vec::new();
    let mut skipped_entities = Vec::new();

    for entity in EntityKind::IMPORT_ORDER {
        let path = match plan.file_for(entity) {
            Some(p) if p.exists() => p,
            Some(p) => {
                tracing::warn!(entity = entity.name(), file = %p.display(), "⚠️ file not found, skipping");
                skipped_entities.push(entity);
                continue;
            }
            None => {
                tracing::debug!(entity = entity.name(), "no file configured");
                skipped_entities.push(entity);
                continue;
            }
        };

        let table = CsvTable::from_path(path)?;
        let mut importer = importer_for(entity, &import_options);
        let stats = run_import(conn, importer.as_mut(), &table, &import_options)
            .with_context(|| format!("Import of {} aborted", entity.name()))?;
        entities.push(stats);
    }

    let report = MigrationReport {
        started_at,
        finished_at: chrono::Utc::now(),
        cleared_rows,
        entities,
        skipped_entities,
    };

    let event = Event::new(
        "migration_completed",
        "migration",
        &started_at.to_rfc3339(),
        serde_json::json!({
            "fresh": options.fresh,
            "imported": report.total_imported(),
            "failed": report.total_failed(),
            "entities": report.entities.iter().map(|s| s.summary()).collect::<Vec<_>>(),
        }),
        &actor.username,
    );
    db::insert_event(conn, &event)?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        conn
    }

    fn sample_plan(dir: &Path) -> MigrationPlan {
        MigrationPlan::new()
            .with_file(
                EntityKind::Borrowers,
                write(dir, "borrowers.csv", "Name,Phone\nJane Doe,0772123456\nJohn Okello,0701000111\n"),
            )
            .with_file(
                EntityKind::Loans,
                write(
                    dir,
                    "loans.csv",
                    "Loan ID,Borrower ID,Amount,Interest Rate\nLN-1,JD001,100000,10\nLN-2,JO001,200000,10\n",
                ),
            )
            .with_file(
                EntityKind::Repayments,
                write(dir, "repayments.csv", "Loan ID,Amount,Date\nLN-1,50000,01/02/2024\n"),
            )
            .with_file(EntityKind::Expenses, dir.join("missing.csv"))
    }

    #[test]
    fn test_migration_runs_in_dependency_order() {
        let dir = tempfile::tempdir().unwrap();
        let conn = test_db();

        let report = run_migration(&conn, &sample_plan(dir.path()), &MigrationOptions::default()).unwrap();

        assert_eq!(report.entities.len(), 3);
        assert_eq!(report.entities[0].entity, EntityKind::Borrowers);
        assert_eq!(report.total_failed(), 0);
        assert!(report.skipped_entities.contains(&EntityKind::Expenses));

        let loan = db::find_loan_by_number(&conn, "LN-1").unwrap().unwrap();
        assert!((loan.outstanding_balance - 60_000.0).abs() < 0.001);

        let events = db::get_events_for_entity(&conn, "migration", &report.started_at.to_rfc3339()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].actor, MIGRATION_ACTOR);
    }

    #[test]
    fn test_fresh_migration_replaces_data() {
        let dir = tempfile::tempdir().unwrap();
        let conn = test_db();
        let plan = sample_plan(dir.path());

        run_migration(&conn, &plan, &MigrationOptions::default()).unwrap();
        let fresh = MigrationOptions {
            fresh: true,
            ..MigrationOptions::default()
        };
        let report = run_migration(&conn, &plan, &fresh).unwrap();

        assert!(report.cleared_rows > 0);
        assert_eq!(db::count_rows(&conn, "borrowers").unwrap(), 2);
        assert_eq!(db::count_rows(&conn, "repayments").unwrap(), 1);
        // codes regenerate identically on an empty table
        assert!(db::find_borrower_by_code(&conn, "JD001").unwrap().is_some());
    }

    #[test]
    fn test_rerun_without_fresh_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let conn = test_db();
        let plan = sample_plan(dir.path());

        run_migration(&conn, &plan, &MigrationOptions::default()).unwrap();
        let second = run_migration(&conn, &plan, &MigrationOptions::default()).unwrap();

        assert_eq!(db::count_rows(&conn, "borrowers").unwrap(), 2);
        assert_eq!(db::count_rows(&conn, "loans").unwrap(), 2);
        assert_eq!(second.stats_for(EntityKind::Repayments).unwrap().skipped, 1);
    }
}
