use pagedb::{ColumnSchema, ColumnType, ColumnValue, Config, Database, Error, Row};
use tempfile::TempDir;

fn users_columns() -> Vec<ColumnSchema> {
    vec![
        ColumnSchema {
            name: "id".into(),
            type_: ColumnType::Integer,
            is_primary: true,
        },
        ColumnSchema {
            name: "name".into(),
            type_: ColumnType::Text,
            is_primary: false,
        },
        ColumnSchema {
            name: "age".into(),
            type_: ColumnType::Integer,
            is_primary: false,
        },
    ]
}

fn open_db(dir: &TempDir) -> Database {
    let mut config = Config::new(dir.path().join("test.db"));
    config.default_branching_factor = 3;
    Database::open(config).unwrap()
}

#[test]
fn test_create_insert_search() {
    let dir = TempDir::new().unwrap();
    let mut db = open_db(&dir);
    db.create_table("users", users_columns()).unwrap();

    db.insert_row(
        "users",
        Row::new().set("id", 1).set("name", "Alice").set("age", 30),
    )
    .unwrap();

    let row = db.search_row("users", 1).unwrap();
    assert_eq!(row.get("name"), Some(&ColumnValue::from("Alice")));
    assert_eq!(row.get("age"), Some(&ColumnValue::Int(30)));

    assert!(matches!(
        db.search_row("users", 2),
        Err(Error::KeyNotFound(2))
    ));
}

#[test]
fn test_update_row_merges_and_protects_primary_key() {
    let dir = TempDir::new().unwrap();
    let mut db = open_db(&dir);
    db.create_table("users", users_columns()).unwrap();

    db.insert_row(
        "users",
        Row::new().set("id", 1).set("name", "Alice").set("age", 30),
    )
    .unwrap();

    db.update_row("users", 1, Row::new().set("name", "Bob"))
        .unwrap();
    let row = db.search_row("users", 1).unwrap();
    assert_eq!(row.get("id"), Some(&ColumnValue::Int(1)));
    assert_eq!(row.get("name"), Some(&ColumnValue::from("Bob")));
    assert_eq!(row.get("age"), Some(&ColumnValue::Int(30)));

    assert!(matches!(
        db.update_row("users", 1, Row::new().set("id", 2)),
        Err(Error::PrimaryKeyUpdateForbidden(_))
    ));
}

#[test]
fn test_update_missing_row() {
    let dir = TempDir::new().unwrap();
    let mut db = open_db(&dir);
    db.create_table("users", users_columns()).unwrap();
    assert!(matches!(
        db.update_row("users", 7, Row::new().set("name", "Bob")),
        Err(Error::KeyNotFound(7))
    ));
}

#[test]
fn test_insert_is_an_upsert() {
    let dir = TempDir::new().unwrap();
    let mut db = open_db(&dir);
    db.create_table("users", users_columns()).unwrap();

    db.insert_row("users", Row::new().set("id", 1).set("name", "Alice"))
        .unwrap();
    db.insert_row("users", Row::new().set("id", 1).set("name", "Bob"))
        .unwrap();

    let row = db.search_row("users", 1).unwrap();
    assert_eq!(row.get("name"), Some(&ColumnValue::from("Bob")));
    assert_eq!(db.scan_table("users").unwrap().len(), 1);
}

#[test]
fn test_delete_row() {
    let dir = TempDir::new().unwrap();
    let mut db = open_db(&dir);
    db.create_table("users", users_columns()).unwrap();

    db.insert_row("users", Row::new().set("id", 1).set("name", "Alice"))
        .unwrap();
    db.delete_row("users", 1).unwrap();
    assert!(matches!(
        db.search_row("users", 1),
        Err(Error::KeyNotFound(1))
    ));
    assert!(matches!(
        db.delete_row("users", 1),
        Err(Error::KeyNotFound(1))
    ));
}

#[test]
fn test_scan_empty_table() {
    let dir = TempDir::new().unwrap();
    let mut db = open_db(&dir);
    db.create_table("users", users_columns()).unwrap();
    assert!(db.scan_table("users").unwrap().is_empty());
    assert!(db
        .scan_range("users", Some(1), Some(100), true, true)
        .unwrap()
        .is_empty());
}

#[test]
fn test_scan_returns_rows_in_key_order() {
    let dir = TempDir::new().unwrap();
    let mut db = open_db(&dir);
    db.create_table("users", users_columns()).unwrap();

    for id in [30i64, 10, 20, 5, 25, 15] {
        db.insert_row(
            "users",
            Row::new()
                .set("id", id)
                .set("name", format!("user{}", id))
                .set("age", id),
        )
        .unwrap();
    }

    let rows = db.scan_table("users").unwrap();
    let ids: Vec<i64> = rows
        .iter()
        .map(|r| match r.get("id") {
            Some(ColumnValue::Int(v)) => *v,
            other => panic!("unexpected id value {:?}", other),
        })
        .collect();
    assert_eq!(ids, vec![5, 10, 15, 20, 25, 30]);
}

#[test]
fn test_scan_range_honors_bounds() {
    let dir = TempDir::new().unwrap();
    let mut db = open_db(&dir);
    db.create_table("users", users_columns()).unwrap();

    for id in [10i64, 20, 30, 40, 50] {
        db.insert_row("users", Row::new().set("id", id).set("name", "x"))
            .unwrap();
    }

    let ids = |rows: Vec<Row>| -> Vec<i64> {
        rows.iter()
            .map(|r| match r.get("id") {
                Some(ColumnValue::Int(v)) => *v,
                other => panic!("unexpected id value {:?}", other),
            })
            .collect()
    };

    let rows = db.scan_range("users", Some(20), Some(40), true, false).unwrap();
    assert_eq!(ids(rows), vec![20, 30]);

    let rows = db.scan_range("users", Some(35), Some(39), true, false).unwrap();
    assert_eq!(ids(rows), Vec::<i64>::new());

    let rows = db.scan_range("users", None, None, true, true).unwrap();
    assert_eq!(ids(rows), vec![10, 20, 30, 40, 50]);
}

#[test]
fn test_duplicate_table_rejected() {
    let dir = TempDir::new().unwrap();
    let mut db = open_db(&dir);
    db.create_table("users", users_columns()).unwrap();
    assert!(matches!(
        db.create_table("users", users_columns()),
        Err(Error::DuplicateTable(_))
    ));
}

#[test]
fn test_invalid_schema_rejected() {
    let dir = TempDir::new().unwrap();
    let mut db = open_db(&dir);
    let columns = vec![ColumnSchema {
        name: "name".into(),
        type_: ColumnType::Text,
        is_primary: false,
    }];
    assert!(matches!(
        db.create_table("users", columns),
        Err(Error::SchemaInvalid(_))
    ));
    assert!(db.list_tables().is_empty());
}

#[test]
fn test_row_validation_errors_surface() {
    let dir = TempDir::new().unwrap();
    let mut db = open_db(&dir);
    db.create_table("users", users_columns()).unwrap();

    assert!(matches!(
        db.insert_row("users", Row::new().set("name", "Alice")),
        Err(Error::MissingPrimaryKey(_))
    ));
    assert!(matches!(
        db.insert_row("users", Row::new().set("id", 1).set("nick", "Al")),
        Err(Error::UnknownColumn(_))
    ));
    assert!(matches!(
        db.insert_row("users", Row::new().set("id", 1).set("age", "old")),
        Err(Error::TypeMismatch { .. })
    ));
}

#[test]
fn test_unknown_table_errors() {
    let dir = TempDir::new().unwrap();
    let mut db = open_db(&dir);
    assert!(matches!(
        db.insert_row("ghost", Row::new().set("id", 1)),
        Err(Error::TableNotFound(_))
    ));
    assert!(matches!(
        db.search_row("ghost", 1),
        Err(Error::TableNotFound(_))
    ));
    assert!(matches!(
        db.scan_table("ghost"),
        Err(Error::TableNotFound(_))
    ));
    assert!(matches!(
        db.drop_table("ghost"),
        Err(Error::TableNotFound(_))
    ));
}

#[test]
fn test_drop_table_removes_everything() {
    let dir = TempDir::new().unwrap();
    let mut db = open_db(&dir);
    db.create_table("users", users_columns()).unwrap();
    db.insert_row("users", Row::new().set("id", 1).set("name", "Alice"))
        .unwrap();

    db.drop_table("users").unwrap();
    assert!(db.list_tables().is_empty());
    assert!(matches!(
        db.search_row("users", 1),
        Err(Error::TableNotFound(_))
    ));

    // The name is free again and the new table starts empty.
    db.create_table("users", users_columns()).unwrap();
    assert!(db.scan_table("users").unwrap().is_empty());
}

#[test]
fn test_list_tables_sorted() {
    let dir = TempDir::new().unwrap();
    let mut db = open_db(&dir);
    db.create_table("orders", users_columns()).unwrap();
    db.create_table("users", users_columns()).unwrap();
    db.create_table("audit", users_columns()).unwrap();
    assert_eq!(db.list_tables(), vec!["audit", "orders", "users"]);
}

#[test]
fn test_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("test.db");

    {
        let mut config = Config::new(&path);
        config.default_branching_factor = 3;
        let mut db = Database::open(config).unwrap();
        db.create_table("users", users_columns()).unwrap();
        for id in 1..=20i64 {
            db.insert_row(
                "users",
                Row::new()
                    .set("id", id)
                    .set("name", format!("user{}", id))
                    .set("age", 20 + id),
            )
            .unwrap();
        }
        db.close().unwrap();
    }

    let mut config = Config::new(&path);
    config.default_branching_factor = 3;
    let db = Database::open(config).unwrap();
    assert_eq!(db.list_tables(), vec!["users"]);
    let row = db.search_row("users", 17).unwrap();
    assert_eq!(row.get("name"), Some(&ColumnValue::from("user17")));
    assert_eq!(db.scan_table("users").unwrap().len(), 20);
}

#[test]
fn test_many_rows_with_structural_churn() {
    let dir = TempDir::new().unwrap();
    let mut db = open_db(&dir);
    db.create_table("users", users_columns()).unwrap();

    for id in 1..=100i64 {
        db.insert_row(
            "users",
            Row::new()
                .set("id", id)
                .set("name", format!("user{}", id))
                .set("age", id % 80),
        )
        .unwrap();
    }
    for id in (1..=100i64).filter(|id| id % 3 == 0) {
        db.delete_row("users", id).unwrap();
    }

    let rows = db.scan_table("users").unwrap();
    let expected: Vec<i64> = (1..=100).filter(|id| id % 3 != 0).collect();
    let ids: Vec<i64> = rows
        .iter()
        .map(|r| match r.get("id") {
            Some(ColumnValue::Int(v)) => *v,
            other => panic!("unexpected id value {:?}", other),
        })
        .collect();
    assert_eq!(ids, expected);

    for id in expected {
        let row = db.search_row("users", id).unwrap();
        assert_eq!(
            row.get("name"),
            Some(&ColumnValue::from(format!("user{}", id)))
        );
    }
}

#[test]
fn test_integer_widening_through_the_api() {
    let dir = TempDir::new().unwrap();
    let mut db = open_db(&dir);
    db.create_table("users", users_columns()).unwrap();

    db.insert_row(
        "users",
        Row::new().set("id", 1u8).set("name", "Alice").set("age", 30i16),
    )
    .unwrap();

    let row = db.search_row("users", 1).unwrap();
    assert_eq!(row.get("age"), Some(&ColumnValue::Int(30)));
}
