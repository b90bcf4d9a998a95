use datasession_core::{
    ContextBinding, ContextConfig, DataAccessConfig, DataError, Entity, EntityDeclaration,
    EntityRegistry, Field, FieldValues, Session,
};
use rusqlite::Row;
use std::sync::Arc;
use std::time::Duration;

const CONTEXT: &str = "ClockContext";
const SHORT: Duration = Duration::from_millis(50);

const CLOCK_SCHEMA: &str = "
CREATE VIEW Tick AS
    WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 1000000000)
    SELECT x AS TickId FROM c;
CREATE TABLE Marker (
    MarkerId INTEGER PRIMARY KEY AUTOINCREMENT,
    Name TEXT NOT NULL
);
CREATE TRIGGER Marker_StallInsert AFTER INSERT ON Marker WHEN NEW.Name = 'stall'
BEGIN
    SELECT COUNT(*) FROM Tick;
END;
CREATE TRIGGER Marker_StallDelete AFTER DELETE ON Marker WHEN OLD.Name = 'sticky'
BEGIN
    SELECT COUNT(*) FROM Tick;
END;
";

#[derive(Debug, Clone, Default, PartialEq)]
struct Tick {
    tick_id: i64,
}

impl Entity for Tick {
    type Key = i64;

    fn declare(entity: EntityDeclaration) -> EntityDeclaration {
        entity.view("Tick").field(Field::long("TickId").key())
    }

    fn key(&self) -> i64 {
        self.tick_id
    }

    fn set_key(&mut self, key: i64) {
        self.tick_id = key;
    }

    fn field_values(&self) -> FieldValues {
        FieldValues::new()
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            tick_id: row.get("TickId")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Marker {
    marker_id: i64,
    name: String,
}

impl Marker {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

impl Entity for Marker {
    type Key = i64;

    fn declare(entity: EntityDeclaration) -> EntityDeclaration {
        entity
            .table("Marker")
            .field(Field::long("MarkerId").key())
            .field(Field::text("Name").required())
    }

    fn key(&self) -> i64 {
        self.marker_id
    }

    fn set_key(&mut self, key: i64) {
        self.marker_id = key;
    }

    fn field_values(&self) -> FieldValues {
        FieldValues::new().with("Name", self.name.clone())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            marker_id: row.get("MarkerId")?,
            name: row.get("Name")?,
        })
    }
}

fn open_session(context: ContextConfig) -> Session {
    let config = DataAccessConfig::new().with_context(CONTEXT, context.migration(1, CLOCK_SCHEMA));
    let registry = EntityRegistry::builder()
        .context(
            ContextBinding::new(CONTEXT)
                .entity_set::<Tick>("TickDbSet")
                .entity_set::<Marker>("MarkerDbSet"),
        )
        .build(&config)
        .unwrap();
    Session::open(Arc::new(registry))
}

fn assert_timeout(err: DataError, expected_ms: u128) {
    match err {
        DataError::Timeout {
            context,
            timeout_ms,
        } => {
            assert_eq!(context, CONTEXT);
            assert_eq!(timeout_ms, expected_ms);
        }
        other => panic!("expected timeout, got {other}"),
    }
}

fn marker_names(session: &Session) -> Vec<String> {
    session
        .query::<Marker>(None)
        .unwrap()
        .order_by("MarkerId")
        .fetch()
        .unwrap()
        .into_iter()
        .map(|marker| marker.name)
        .collect()
}

#[test]
fn slow_query_times_out_and_session_stays_usable() {
    let session = open_session(ContextConfig::memory());

    let err = session
        .query::<Tick>(Some(SHORT))
        .unwrap()
        .count()
        .unwrap_err();
    assert_timeout(err, 50);

    let err = session.get::<Tick>(0, Some(SHORT)).unwrap_err();
    assert_timeout(err, 50);

    let mut marker = Marker::named("after");
    assert!(session.save(&mut marker, None).unwrap().is_valid());
    assert_eq!(marker_names(&session), vec!["after"]);
}

#[test]
fn context_command_timeout_applies_without_a_per_call_value() {
    let session = open_session(ContextConfig::memory().command_timeout_ms(40));

    let err = session.query::<Tick>(None).unwrap().count().unwrap_err();
    assert_timeout(err, 40);

    let err = session
        .query::<Tick>(Some(Duration::from_millis(30)))
        .unwrap()
        .count()
        .unwrap_err();
    assert_timeout(err, 30);
}

#[test]
fn slow_writes_time_out_without_changing_rows() {
    let session = open_session(ContextConfig::memory());

    let mut stalled = Marker::named("stall");
    let err = session.save(&mut stalled, Some(SHORT)).unwrap_err();
    assert_timeout(err, 50);
    assert_eq!(stalled.marker_id, 0);
    assert!(marker_names(&session).is_empty());

    let mut sticky = Marker::named("sticky");
    assert!(session.save(&mut sticky, None).unwrap().is_valid());
    let key = sticky.marker_id;

    let err = session.delete(&mut sticky, false, Some(SHORT)).unwrap_err();
    assert_timeout(err, 50);
    assert_eq!(sticky.marker_id, key);

    let query = session
        .query::<Marker>(Some(SHORT))
        .unwrap()
        .eq("Name", "sticky".to_string());
    let err = session.delete_query(query).unwrap_err();
    assert_timeout(err, 50);

    assert_eq!(marker_names(&session), vec!["sticky"]);
}
