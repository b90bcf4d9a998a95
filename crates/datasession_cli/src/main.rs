//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `datasession_core` linkage.
//! - Run one insert/update/delete cycle against an in-memory store.
//! - Keep output deterministic for quick local sanity checks.

use datasession_core::{
    ContextBinding, ContextConfig, DataAccessConfig, Entity, EntityDeclaration, EntityRegistry,
    Field, FieldValues, Session, ValidationList,
};
use rusqlite::Row;
use std::error::Error;
use std::sync::Arc;

const CONTEXT: &str = "SmokeContext";

#[derive(Debug, Default)]
struct Task {
    task_id: i64,
    title: String,
}

impl Entity for Task {
    type Key = i64;

    fn declare(entity: EntityDeclaration) -> EntityDeclaration {
        entity
            .table("Task")
            .field(Field::long("TaskId").key())
            .field(Field::text("Title").required().max_length(80))
            .unique("UIX_Task_Title", &["Title"])
    }

    fn key(&self) -> i64 {
        self.task_id
    }

    fn set_key(&mut self, key: i64) {
        self.task_id = key;
    }

    fn field_values(&self) -> FieldValues {
        FieldValues::new().with("Title", self.title.clone())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            task_id: row.get("TaskId")?,
            title: row.get("Title")?,
        })
    }
}

fn registry() -> Result<Arc<EntityRegistry>, Box<dyn Error>> {
    let config = DataAccessConfig::new().with_context(
        CONTEXT,
        ContextConfig::memory().migration(
            1,
            "CREATE TABLE Task (
                TaskId INTEGER PRIMARY KEY AUTOINCREMENT,
                Title TEXT NOT NULL
            );
            CREATE UNIQUE INDEX UIX_Task_Title ON Task (Title);",
        ),
    );
    let registry = EntityRegistry::builder()
        .context(ContextBinding::new(CONTEXT).entity_set::<Task>("TaskDbSet"))
        .build(&config)?;
    Ok(Arc::new(registry))
}

fn outcome(validation: &ValidationList) -> String {
    if validation.is_valid() {
        "ok".to_string()
    } else {
        validation.to_string()
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let session = Session::open(registry()?);

    let transaction = session.begin_transaction()?;

    let mut task = Task {
        title: "write smoke test".to_string(),
        ..Task::default()
    };
    let inserted = session.save(&mut task, None)?;
    println!("insert={} key={}", outcome(&inserted), task.task_id);

    task.title = "run smoke test".to_string();
    let updated = session.save(&mut task, None)?;
    println!("update={} key={}", outcome(&updated), task.task_id);

    let mut duplicate = Task {
        title: "run smoke test".to_string(),
        ..Task::default()
    };
    let rejected = session.save(&mut duplicate, None)?;
    println!("duplicate={}", outcome(&rejected));

    let deleted = session.delete(&mut task, false, None)?;
    println!("delete={} key={}", outcome(&deleted), task.task_id);

    transaction.commit()?;
    let remaining = session.query::<Task>(None)?.count()?;
    println!("remaining={remaining}");
    println!("datasession_core version={}", datasession_core::core_version());
    Ok(())
}
