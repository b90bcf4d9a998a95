mod common;

use common::{seed_employee, seed_location, Employee, Fixture, Location};
use datasession_core::{DataError, Session};
use rusqlite::types::Value;
use std::time::Duration;

fn seed_staff(session: &Session) -> Vec<Employee> {
    vec![
        seed_employee(session, "Ada", "Lovelace", "100000001"),
        seed_employee(session, "Grace", "Hopper", "100000002"),
        seed_employee(session, "Alan", "Turing", "100000003"),
        seed_employee(session, "Edsger", "Dijkstra", "100000004"),
    ]
}

fn first_names(employees: &[Employee]) -> Vec<&str> {
    employees.iter().map(|employee| employee.first_name.as_str()).collect()
}

#[test]
fn filters_order_and_paging_compose() {
    let fixture = Fixture::new();
    let session = fixture.session();
    seed_staff(&session);

    let ordered = session
        .query::<Employee>(None)
        .unwrap()
        .order_by("FirstName")
        .fetch()
        .unwrap();
    assert_eq!(first_names(&ordered), vec!["Ada", "Alan", "Edsger", "Grace"]);

    let page = session
        .query::<Employee>(None)
        .unwrap()
        .order_by_desc("SSN")
        .limit(2)
        .offset(1)
        .fetch()
        .unwrap();
    assert_eq!(first_names(&page), vec!["Alan", "Grace"]);

    let skipped = session
        .query::<Employee>(None)
        .unwrap()
        .order_by("SSN")
        .offset(3)
        .fetch()
        .unwrap();
    assert_eq!(first_names(&skipped), vec!["Edsger"]);

    let a_names = session
        .query::<Employee>(None)
        .unwrap()
        .like("FirstName", "A%")
        .ne("LastName", "Turing".to_string())
        .fetch()
        .unwrap();
    assert_eq!(first_names(&a_names), vec!["Ada"]);

    let range = session
        .query::<Employee>(None)
        .unwrap()
        .ge("SSN", "100000002".to_string())
        .lt("SSN", "100000004".to_string())
        .count()
        .unwrap();
    assert_eq!(range, 2);
}

#[test]
fn null_checks_and_membership() {
    let fixture = Fixture::new();
    let session = fixture.session();
    let staff = seed_staff(&session);

    let unemployed = session
        .query::<Employee>(None)
        .unwrap()
        .is_null("EmployerId")
        .count()
        .unwrap();
    assert_eq!(unemployed, 4);
    let employed = session
        .query::<Employee>(None)
        .unwrap()
        .is_not_null("EmployerId")
        .count()
        .unwrap();
    assert_eq!(employed, 0);

    let chosen = session
        .query::<Employee>(None)
        .unwrap()
        .in_values("EmployeeId", [staff[1].employee_id, staff[3].employee_id])
        .order_by("EmployeeId")
        .keys()
        .unwrap();
    assert_eq!(chosen, vec![staff[1].employee_id, staff[3].employee_id]);

    let none = session
        .query::<Employee>(None)
        .unwrap()
        .in_values("EmployeeId", Vec::<i64>::new())
        .fetch()
        .unwrap();
    assert!(none.is_empty());
}

#[test]
fn first_returns_one_row_or_none() {
    let fixture = Fixture::new();
    let session = fixture.session();
    let location = seed_location(&session, "Zurich");

    let found = session
        .query::<Location>(None)
        .unwrap()
        .eq("Name", "Zurich".to_string())
        .first()
        .unwrap();
    assert_eq!(found, Some(location));

    let missing = session
        .query::<Location>(None)
        .unwrap()
        .eq("Name", "Geneva".to_string())
        .first()
        .unwrap();
    assert_eq!(missing, None);
}

#[test]
fn rendered_sql_quotes_identifiers_and_binds_values() {
    let fixture = Fixture::new();
    let session = fixture.session();

    let (sql, values) = session
        .query::<Location>(Some(Duration::from_secs(5)))
        .unwrap()
        .eq("Name", "Zurich".to_string())
        .le("LocationId", 10)
        .order_by("Name")
        .limit(5)
        .to_sql()
        .unwrap();

    assert_eq!(
        sql,
        "SELECT \"LocationId\", \"Name\" FROM \"Location\" WHERE 1 = 1 \
         AND \"Name\" = ? AND \"LocationId\" <= ? ORDER BY \"Name\" ASC LIMIT ?"
    );
    assert_eq!(
        values,
        vec![
            Value::Text("Zurich".to_string()),
            Value::Integer(10),
            Value::Integer(5)
        ]
    );
}

#[test]
fn unknown_fields_fail_when_rendered() {
    let fixture = Fixture::new();
    let session = fixture.session();

    let err = session
        .query::<Employee>(None)
        .unwrap()
        .eq("MiddleName", "Augusta".to_string())
        .order_by("FirstName")
        .fetch()
        .unwrap_err();

    match err {
        DataError::UnknownField { entity, field } => {
            assert_eq!(entity, "Employee");
            assert_eq!(field, "MiddleName");
        }
        other => panic!("expected unknown field, got {other}"),
    }
}
