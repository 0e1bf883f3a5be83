use logiq::error::{ErrorKind, LogiqError};
use logiq::schema::SchemaRegistry;
use logiq::validator::{QueryValidator, ValidatorOptions, BANNED_TOKENS, MAX_LIMIT};

fn validator() -> QueryValidator {
    QueryValidator::new(SchemaRegistry::canonical(), ValidatorOptions::default())
}

const READ_QUERIES: [&str; 6] = [
    "SELECT * FROM trucks",
    "select plate from trucks where region = 'north';",
    "SELECT d.name FROM drivers d JOIN trucks t ON t.driver_id = d.driver_id LIMIT 5",
    "WITH recent AS (SELECT * FROM alerts) SELECT * FROM recent",
    "SELECT brand, COUNT(*) FROM trucks GROUP BY brand ORDER BY 2 DESC",
    "  SELECT AVG(speed_kmh) FROM telemetry  ",
];

#[test]
fn test_every_banned_token_is_rejected_in_any_case() {
    for token in BANNED_TOKENS {
        for variant in [token.to_string(), token.to_lowercase()] {
            // a leading ';' would trip the statement check first
            let variant = variant.trim_start_matches(';');
            let sql = format!("SELECT * FROM trucks WHERE plate = 'x' {} 1", variant);
            match validator().validate(&sql) {
                Err(LogiqError::BannedToken(_)) => {}
                other => panic!("expected BannedToken for {:?}, got {:?}", sql, other),
            }
        }
    }
}

#[test]
fn test_non_read_only_starts_rejected() {
    for sql in [
        "DELETE FROM trucks",
        "update trucks set status = 'x'",
        "INSERT INTO trucks VALUES ('x')",
        "PRAGMA table_info(trucks)",
        "EXPLAIN SELECT * FROM trucks",
        "(SELECT * FROM trucks)",
    ] {
        assert!(
            matches!(validator().validate(sql), Err(LogiqError::NotReadOnly(_))),
            "{}",
            sql
        );
    }
}

#[test]
fn test_validated_text_has_exactly_one_terminator_at_the_end() {
    for sql in READ_QUERIES {
        let validated = validator().validate(sql).unwrap();
        let text = validated.as_str();
        assert!(text.ends_with(';'), "{}", text);
        assert_eq!(text.matches(';').count(), 1, "{}", text);
    }
}

#[test]
fn test_revalidation_is_idempotent() {
    for sql in READ_QUERIES {
        let once = validator().validate(sql).unwrap();
        let twice = validator().validate(once.as_str()).unwrap();
        assert_eq!(once.as_str(), twice.as_str());
        assert_eq!(twice.as_str().matches("LIMIT").count(), once.as_str().matches("LIMIT").count());
    }
}

#[test]
fn test_limit_cap_boundary() {
    for limit in [1, 10, 999, 1000, 5000, MAX_LIMIT] {
        let sql = format!("SELECT * FROM trips LIMIT {}", limit);
        assert!(validator().validate(&sql).is_ok(), "{}", sql);
    }
    for limit in [MAX_LIMIT + 1, 50_000, 1_000_000] {
        let sql = format!("SELECT * FROM trips LIMIT {}", limit);
        match validator().validate(&sql) {
            Err(LogiqError::LimitTooHigh { value, .. }) => assert_eq!(value, limit),
            other => panic!("expected LimitTooHigh for {}, got {:?}", sql, other),
        }
    }
}

#[test]
fn test_unknown_tables_named_exactly() {
    let cases: [(&str, &[&str]); 3] = [
        ("SELECT * FROM invoices", &["invoices"]),
        ("SELECT * FROM trucks JOIN Payroll ON 1 = 1", &["payroll"]),
        ("SELECT * FROM users u JOIN accounts a ON u.id = a.id JOIN trips t ON 1 = 1", &["accounts", "users"]),
    ];
    for (sql, expected) in cases {
        match validator().validate(sql) {
            Err(LogiqError::UnknownTable(names)) => assert_eq!(names, expected, "{}", sql),
            other => panic!("expected UnknownTable for {}, got {:?}", sql, other),
        }
    }
}

#[test]
fn test_reference_scenarios() {
    assert_eq!(
        validator().validate("SELECT * FROM trucks").unwrap().as_str(),
        "SELECT * FROM trucks LIMIT 1000;"
    );
    assert!(matches!(
        validator().validate("DROP TABLE trucks"),
        Err(LogiqError::NotReadOnly(_))
    ));
    assert!(matches!(
        validator().validate("SELECT * FROM trucks; DELETE FROM trips"),
        Err(LogiqError::MultipleStatements)
    ));
    assert!(matches!(
        validator().validate("SELECT * FROM trucks LIMIT 50000"),
        Err(LogiqError::LimitTooHigh { value: 50000, .. })
    ));
}

#[test]
fn test_every_limit_must_be_a_plain_row_count() {
    let malformed = [
        "-1",
        "- 1",
        "0x7fffffff",
        "0X10",
        "10 + 100000",
        "100000 - 1",
        "(SELECT 100000)",
        "1e9",
        "10.5",
        "abs(-5)",
        "10 OFFSET -5 + 100000",
        "",
    ];
    for clause in malformed {
        for sql in [
            format!("SELECT * FROM telemetry LIMIT {}", clause),
            format!("SELECT * FROM telemetry WHERE truck_id IN (SELECT truck_id FROM trucks LIMIT {}) LIMIT 10", clause),
        ] {
            let err = validator().validate(&sql).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::LimitTooHigh, "{}: {:?}", sql, err);
        }
    }
}

#[test]
fn test_limit_inside_literals_does_not_count() {
    let cases = [
        "SELECT * FROM telemetry WHERE truck_id <> 'limit'",
        "SELECT * FROM alerts WHERE message = 'LIMIT 5'",
        "SELECT * FROM alerts WHERE message LIKE '%limit 99999%'",
        "SELECT \"limit\" FROM trucks",
        "SELECT plate AS [limit 1] FROM trucks",
    ];
    for sql in cases {
        let validated = validator().validate(sql).unwrap();
        assert!(validated.limit_added(), "{}", sql);
        assert_eq!(validated.as_str(), format!("{} LIMIT 1000;", sql));
    }
}

#[test]
fn test_subquery_limit_leaves_outer_query_capped() {
    let cases = [
        "SELECT * FROM telemetry WHERE truck_id IN (SELECT truck_id FROM trucks LIMIT 5)",
        "SELECT * FROM (SELECT * FROM telemetry LIMIT 10)",
        "WITH few AS (SELECT * FROM telemetry LIMIT 3) SELECT * FROM telemetry",
    ];
    for sql in cases {
        let validated = validator().validate(sql).unwrap();
        assert!(validated.limit_added(), "{}", sql);
        assert_eq!(validated.as_str(), format!("{} LIMIT 1000;", sql));
    }

    for sql in [
        "SELECT * FROM telemetry WHERE truck_id IN (SELECT truck_id FROM trucks LIMIT 10001) LIMIT 5",
        "SELECT * FROM (SELECT * FROM telemetry LIMIT 0, 20000) LIMIT 5",
    ] {
        assert!(
            matches!(validator().validate(sql), Err(LogiqError::LimitTooHigh { .. })),
            "{}",
            sql
        );
    }

    let outer = validator()
        .validate("SELECT * FROM (SELECT * FROM telemetry LIMIT 10) LIMIT 5")
        .unwrap();
    assert!(!outer.limit_added());
    assert_eq!(outer.as_str(), "SELECT * FROM (SELECT * FROM telemetry LIMIT 10) LIMIT 5;");
}

#[test]
fn test_window_definitions_do_not_hide_tables() {
    let sql = "WITH a AS (SELECT 1) SELECT name, sql FROM sqlite_master WINDOW w AS (), sqlite_master AS ()";
    match validator().validate(sql) {
        Err(LogiqError::UnknownTable(names)) => assert_eq!(names, vec!["sqlite_master"]),
        other => panic!("expected UnknownTable, got {:?}", other),
    }
}
