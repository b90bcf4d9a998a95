#![allow(dead_code)]

use datasession_core::{
    AuditBy, AuditFields, ContextBinding, ContextConfig, DataAccessConfig, DataResult, Entity,
    EntityDeclaration, EntityHooks, EntityRegistry, Field, FieldValues, RegistryBuilder, Session,
    ValidationList,
};
use rusqlite::Row;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const EMPLOYEE_CONTEXT: &str = "EmployeeContext";
pub const AUDIT_CONTEXT: &str = "AuditContext";
pub const TAG_EVENTS: &str = "tag_events";

const EMPLOYEE_SCHEMA_V1: &str = "
CREATE TABLE Location (
    LocationId INTEGER PRIMARY KEY AUTOINCREMENT,
    Name TEXT NOT NULL
);
CREATE TABLE Employer (
    EmployerId INTEGER PRIMARY KEY AUTOINCREMENT,
    Name TEXT NOT NULL,
    LocationId INTEGER NOT NULL REFERENCES Location(LocationId),
    CreatedOn INTEGER,
    CreatedBy INTEGER,
    ModifiedOn INTEGER,
    ModifiedBy INTEGER
);
CREATE UNIQUE INDEX UIX_Employer_Name ON Employer (Name);
CREATE TABLE Employee (
    EmployeeId INTEGER PRIMARY KEY AUTOINCREMENT,
    FirstName TEXT NOT NULL,
    LastName TEXT,
    SSN TEXT NOT NULL,
    EmployerId INTEGER REFERENCES Employer(EmployerId),
    CreatedOn INTEGER,
    CreatedBy TEXT,
    ModifiedOn INTEGER,
    ModifiedBy TEXT
);
CREATE UNIQUE INDEX UIX_Employee_SSN ON Employee (SSN);
CREATE UNIQUE INDEX \"UIX_Employee_FirstName-LastName\" ON Employee (FirstName, LastName);
";

const EMPLOYEE_SCHEMA_V2: &str = "
CREATE TABLE Note (
    NoteId INTEGER PRIMARY KEY AUTOINCREMENT,
    EmployeeId INTEGER REFERENCES Employee(EmployeeId) ON DELETE SET NULL,
    Body TEXT NOT NULL,
    IsDeleted INTEGER NOT NULL DEFAULT 0,
    UniqueIdentifier TEXT NOT NULL
);
CREATE TABLE Tag (
    TagId INTEGER PRIMARY KEY AUTOINCREMENT,
    EmployeeId INTEGER NOT NULL REFERENCES Employee(EmployeeId),
    Code TEXT NOT NULL
);
CREATE VIEW EmployeeDirectory AS
SELECT e.EmployeeId AS EmployeeId,
       e.FirstName || ' ' || COALESCE(e.LastName, '') AS FullName,
       r.Name AS EmployerName
FROM Employee e
LEFT JOIN Employer r ON r.EmployerId = e.EmployerId;
";

const AUDIT_SCHEMA_V1: &str = "
CREATE TABLE AuditEntry (
    AuditEntryId INTEGER PRIMARY KEY AUTOINCREMENT,
    Action TEXT NOT NULL,
    CreatedOn INTEGER,
    CreatedBy TEXT
);
";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Location {
    pub location_id: i32,
    pub name: String,
}

impl Entity for Location {
    type Key = i32;

    fn declare(entity: EntityDeclaration) -> EntityDeclaration {
        entity
            .table("Location")
            .field(Field::int("LocationId").key())
            .field(Field::text("Name").required().max_length(100))
    }

    fn key(&self) -> i32 {
        self.location_id
    }

    fn set_key(&mut self, key: i32) {
        self.location_id = key;
    }

    fn field_values(&self) -> FieldValues {
        FieldValues::new().with("Name", self.name.clone())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            location_id: row.get("LocationId")?,
            name: row.get("Name")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Employer {
    pub employer_id: i32,
    pub name: String,
    pub location_id: i32,
    pub created_on: i64,
    pub created_by: i64,
    pub modified_on: i64,
    pub modified_by: i64,
}

impl Entity for Employer {
    type Key = i32;

    fn declare(entity: EntityDeclaration) -> EntityDeclaration {
        entity
            .table("Employer")
            .field(Field::int("EmployerId").key())
            .field(Field::text("Name").required())
            .field(Field::int("LocationId").required().parent::<Location>())
            .field(Field::timestamp("CreatedOn"))
            .field(Field::long("CreatedBy"))
            .field(Field::timestamp("ModifiedOn"))
            .field(Field::long("ModifiedBy"))
            .unique("An employer with the same name already exist.", &["Name"])
    }

    fn key(&self) -> i32 {
        self.employer_id
    }

    fn set_key(&mut self, key: i32) {
        self.employer_id = key;
    }

    fn field_values(&self) -> FieldValues {
        FieldValues::new()
            .with("Name", self.name.clone())
            .with("LocationId", self.location_id)
            .with("CreatedOn", self.created_on)
            .with("CreatedBy", self.created_by)
            .with("ModifiedOn", self.modified_on)
            .with("ModifiedBy", self.modified_by)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            employer_id: row.get("EmployerId")?,
            name: row.get("Name")?,
            location_id: row.get("LocationId")?,
            created_on: row.get("CreatedOn")?,
            created_by: row.get("CreatedBy")?,
            modified_on: row.get("ModifiedOn")?,
            modified_by: row.get("ModifiedBy")?,
        })
    }

    fn audit_fields(&mut self) -> AuditFields<'_> {
        AuditFields {
            created_on: Some(&mut self.created_on),
            created_by: Some(AuditBy::Id(&mut self.created_by)),
            modified_on: Some(&mut self.modified_on),
            modified_by: Some(AuditBy::Id(&mut self.modified_by)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Employee {
    pub employee_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub ssn: String,
    pub employer_id: Option<i32>,
    pub created_on: i64,
    pub created_by: String,
    pub modified_on: i64,
    pub modified_by: String,
}

impl Employee {
    pub fn new(first_name: &str, last_name: &str, ssn: &str) -> Self {
        Self {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            ssn: ssn.to_string(),
            ..Self::default()
        }
    }
}

impl Entity for Employee {
    type Key = i64;

    fn declare(entity: EntityDeclaration) -> EntityDeclaration {
        entity
            .table("Employee")
            .display_name("Employee")
            .field(Field::long("EmployeeId").key())
            .field(Field::text("FirstName").display("First Name").required().max_length(50))
            .field(Field::text("LastName").display("Last Name").max_length(50))
            .field(Field::text("SSN").required())
            .field(
                Field::int("EmployerId")
                    .parent_with::<Employer>("The specified employer doesn't exist."),
            )
            .field(Field::timestamp("CreatedOn"))
            .field(Field::text("CreatedBy"))
            .field(Field::timestamp("ModifiedOn"))
            .field(Field::text("ModifiedBy"))
            .unique("UIX_Employee_SSN", &["SSN"])
            .unique("UIX_Employee_FirstName-LastName", &["FirstName", "LastName"])
    }

    fn key(&self) -> i64 {
        self.employee_id
    }

    fn set_key(&mut self, key: i64) {
        self.employee_id = key;
    }

    fn field_values(&self) -> FieldValues {
        FieldValues::new()
            .with("FirstName", self.first_name.clone())
            .with("LastName", self.last_name.clone())
            .with("SSN", self.ssn.clone())
            .with("EmployerId", self.employer_id)
            .with("CreatedOn", self.created_on)
            .with("CreatedBy", self.created_by.clone())
            .with("ModifiedOn", self.modified_on)
            .with("ModifiedBy", self.modified_by.clone())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            employee_id: row.get("EmployeeId")?,
            first_name: row.get("FirstName")?,
            last_name: row.get("LastName")?,
            ssn: row.get("SSN")?,
            employer_id: row.get("EmployerId")?,
            created_on: row.get("CreatedOn")?,
            created_by: row.get("CreatedBy")?,
            modified_on: row.get("ModifiedOn")?,
            modified_by: row.get("ModifiedBy")?,
        })
    }

    fn audit_fields(&mut self) -> AuditFields<'_> {
        AuditFields {
            created_on: Some(&mut self.created_on),
            created_by: Some(AuditBy::Name(&mut self.created_by)),
            modified_on: Some(&mut self.modified_on),
            modified_by: Some(AuditBy::Name(&mut self.modified_by)),
        }
    }

    fn validate(&self) -> ValidationList {
        let mut validation = ValidationList::new();
        if !self.ssn.is_empty() && !self.ssn.chars().all(|c| c.is_ascii_digit()) {
            validation.add("SSN", "SSN must contain digits only.");
        }
        validation
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Note {
    pub note_id: i64,
    pub employee_id: Option<i64>,
    pub body: String,
    pub is_deleted: bool,
    pub unique_identifier: String,
}

impl Entity for Note {
    type Key = i64;

    fn declare(entity: EntityDeclaration) -> EntityDeclaration {
        entity
            .table("Note")
            .field(Field::long("NoteId").key())
            .field(Field::long("EmployeeId").parent::<Employee>())
            .field(Field::text("Body").required())
            .field(Field::bool("IsDeleted"))
            .field(Field::text("UniqueIdentifier"))
    }

    fn key(&self) -> i64 {
        self.note_id
    }

    fn set_key(&mut self, key: i64) {
        self.note_id = key;
    }

    fn field_values(&self) -> FieldValues {
        FieldValues::new()
            .with("EmployeeId", self.employee_id)
            .with("Body", self.body.clone())
            .with("IsDeleted", self.is_deleted)
            .with("UniqueIdentifier", self.unique_identifier.clone())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            note_id: row.get("NoteId")?,
            employee_id: row.get("EmployeeId")?,
            body: row.get("Body")?,
            is_deleted: row.get("IsDeleted")?,
            unique_identifier: row.get("UniqueIdentifier")?,
        })
    }

    fn unique_identifier(&mut self) -> Option<&mut String> {
        Some(&mut self.unique_identifier)
    }

    fn deleted_flag(&mut self) -> Option<&mut bool> {
        Some(&mut self.is_deleted)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    pub tag_id: i64,
    pub employee_id: i64,
    pub code: String,
}

impl Entity for Tag {
    type Key = i64;

    fn declare(entity: EntityDeclaration) -> EntityDeclaration {
        entity
            .table("Tag")
            .field(Field::long("TagId").key())
            .field(Field::long("EmployeeId").required().parent::<Employee>())
            .field(Field::text("Code").required().max_length(16))
    }

    fn key(&self) -> i64 {
        self.tag_id
    }

    fn set_key(&mut self, key: i64) {
        self.tag_id = key;
    }

    fn field_values(&self) -> FieldValues {
        FieldValues::new()
            .with("EmployeeId", self.employee_id)
            .with("Code", self.code.clone())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            tag_id: row.get("TagId")?,
            employee_id: row.get("EmployeeId")?,
            code: row.get("Code")?,
        })
    }
}

/// Refuses to delete locked tags and records successful writes in the
/// session item `TAG_EVENTS` when the caller installed one.
pub struct TagHooks;

impl TagHooks {
    fn record(session: &Session, event: String) {
        session.with_item::<Vec<String>, _>(TAG_EVENTS, |events| events.push(event));
    }
}

impl EntityHooks<Tag> for TagHooks {
    fn inserting(&self, _session: &Session, entity: &Tag) -> DataResult<ValidationList> {
        if entity.code.starts_with('#') {
            return Ok(ValidationList::single("Code", "Tag codes cannot start with '#'."));
        }
        Ok(ValidationList::new())
    }

    fn deleting(&self, _session: &Session, entity: &Tag) -> DataResult<ValidationList> {
        if entity.code == "LOCKED" {
            return Ok(ValidationList::single("Code", "Locked tags cannot be deleted."));
        }
        Ok(ValidationList::new())
    }

    fn inserted(&self, session: &Session, entity: &Tag) -> DataResult<()> {
        Self::record(session, format!("inserted:{}", entity.code));
        Ok(())
    }

    fn updated(&self, session: &Session, entity: &Tag) -> DataResult<()> {
        Self::record(session, format!("updated:{}", entity.code));
        Ok(())
    }

    fn deleted(&self, session: &Session, entity: &Tag) -> DataResult<()> {
        Self::record(session, format!("deleted:{}", entity.code));
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditEntry {
    pub audit_entry_id: i64,
    pub action: String,
    pub created_on: i64,
    pub created_by: String,
}

impl AuditEntry {
    pub fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            ..Self::default()
        }
    }
}

impl Entity for AuditEntry {
    type Key = i64;

    fn declare(entity: EntityDeclaration) -> EntityDeclaration {
        entity
            .table("AuditEntry")
            .display_name("Audit Entry")
            .field(Field::long("AuditEntryId").key())
            .field(Field::text("Action").required())
            .field(Field::timestamp("CreatedOn"))
            .field(Field::text("CreatedBy"))
    }

    fn key(&self) -> i64 {
        self.audit_entry_id
    }

    fn set_key(&mut self, key: i64) {
        self.audit_entry_id = key;
    }

    fn field_values(&self) -> FieldValues {
        FieldValues::new()
            .with("Action", self.action.clone())
            .with("CreatedOn", self.created_on)
            .with("CreatedBy", self.created_by.clone())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            audit_entry_id: row.get("AuditEntryId")?,
            action: row.get("Action")?,
            created_on: row.get("CreatedOn")?,
            created_by: row.get("CreatedBy")?,
        })
    }

    fn audit_fields(&mut self) -> AuditFields<'_> {
        AuditFields {
            created_on: Some(&mut self.created_on),
            created_by: Some(AuditBy::Name(&mut self.created_by)),
            ..AuditFields::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmployeeDirectory {
    pub employee_id: i64,
    pub full_name: String,
    pub employer_name: Option<String>,
}

impl Entity for EmployeeDirectory {
    type Key = i64;

    fn declare(entity: EntityDeclaration) -> EntityDeclaration {
        entity
            .view("EmployeeDirectory")
            .field(Field::long("EmployeeId").key())
            .field(Field::text("FullName"))
            .field(Field::text("EmployerName"))
    }

    fn key(&self) -> i64 {
        self.employee_id
    }

    fn set_key(&mut self, key: i64) {
        self.employee_id = key;
    }

    fn field_values(&self) -> FieldValues {
        FieldValues::new()
            .with("FullName", self.full_name.clone())
            .with("EmployerName", self.employer_name.clone())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            employee_id: row.get("EmployeeId")?,
            full_name: row.get("FullName")?,
            employer_name: row.get("EmployerName")?,
        })
    }
}

fn employee_context(config: ContextConfig) -> ContextConfig {
    config
        .migration(1, EMPLOYEE_SCHEMA_V1)
        .migration(2, EMPLOYEE_SCHEMA_V2)
}

fn audit_context(config: ContextConfig) -> ContextConfig {
    config.migration(1, AUDIT_SCHEMA_V1)
}

/// Both contexts backed by database files under `dir`.
pub fn file_config(dir: &Path) -> DataAccessConfig {
    DataAccessConfig::new()
        .with_context(
            EMPLOYEE_CONTEXT,
            employee_context(ContextConfig::file(dir.join("employees.db"))),
        )
        .with_context(
            AUDIT_CONTEXT,
            audit_context(ContextConfig::file(dir.join("audit.db"))),
        )
}

/// Both contexts in memory; every session sees its own empty stores.
pub fn memory_config() -> DataAccessConfig {
    DataAccessConfig::new()
        .with_context(EMPLOYEE_CONTEXT, employee_context(ContextConfig::memory()))
        .with_context(AUDIT_CONTEXT, audit_context(ContextConfig::memory()))
}

pub fn registry_builder() -> RegistryBuilder {
    EntityRegistry::builder()
        .context(
            ContextBinding::new(EMPLOYEE_CONTEXT)
                .entity_set::<Location>("LocationDbSet")
                .entity_set::<Employer>("EmployerDbSet")
                .entity_set::<Employee>("EmployeeDbSet")
                .entity_set::<Note>("NoteDbSet")
                .entity_set_with::<Tag, TagHooks>("TagDbSet", TagHooks)
                .entity_set::<EmployeeDirectory>("EmployeeDirectoryDbSet"),
        )
        .context(ContextBinding::new(AUDIT_CONTEXT).entity_set::<AuditEntry>("AuditEntryDbSet"))
}

/// File-backed registry whose stores live as long as the fixture.
pub struct Fixture {
    pub dir: TempDir,
    pub registry: Arc<EntityRegistry>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_builder().build(&file_config(dir.path())).unwrap();
        Self {
            dir,
            registry: Arc::new(registry),
        }
    }

    /// Same stores, with `timeout_ms` as the employee context's command timeout.
    pub fn with_command_timeout(timeout_ms: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let employees = ContextConfig::file(dir.path().join("employees.db"))
            .command_timeout_ms(timeout_ms);
        let config = DataAccessConfig::new()
            .with_context(EMPLOYEE_CONTEXT, employee_context(employees))
            .with_context(
                AUDIT_CONTEXT,
                audit_context(ContextConfig::file(dir.path().join("audit.db"))),
            );
        let registry = registry_builder().build(&config).unwrap();
        Self {
            dir,
            registry: Arc::new(registry),
        }
    }

    pub fn session(&self) -> Session {
        Session::open(Arc::clone(&self.registry))
    }
}

pub fn seed_location(session: &Session, name: &str) -> Location {
    let mut location = Location {
        name: name.to_string(),
        ..Location::default()
    };
    assert!(session.save(&mut location, None).unwrap().is_valid());
    location
}

pub fn seed_employer(session: &Session, name: &str) -> Employer {
    let location = seed_location(session, "Head Office");
    let mut employer = Employer {
        name: name.to_string(),
        location_id: location.location_id,
        ..Employer::default()
    };
    assert!(session.save(&mut employer, None).unwrap().is_valid());
    employer
}

pub fn seed_employee(session: &Session, first_name: &str, last_name: &str, ssn: &str) -> Employee {
    let mut employee = Employee::new(first_name, last_name, ssn);
    let validation = session.save(&mut employee, None).unwrap();
    assert!(validation.is_valid(), "unexpected validation: {validation}");
    employee
}

pub fn seed_tag(session: &Session, employee: &Employee, code: &str) -> Tag {
    let mut tag = Tag {
        employee_id: employee.employee_id,
        code: code.to_string(),
        ..Tag::default()
    };
    assert!(session.save(&mut tag, None).unwrap().is_valid());
    tag
}

pub fn seed_note(session: &Session, employee: &Employee, body: &str) -> Note {
    let mut note = Note {
        employee_id: Some(employee.employee_id),
        body: body.to_string(),
        ..Note::default()
    };
    assert!(session.save(&mut note, None).unwrap().is_valid());
    note
}
