use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

use vacancy::tenant::TenantManager;
use vacancy::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("vacancy_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000));

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, "vacancy".to_string(), None).await;
            });
        }
    });

    (addr, tm)
}

/// Connect as `user` — the session user is the trusted owner identity.
async fn connect(addr: SocketAddr, db: &str, user: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname(db)
        .user(user)
        .password("vacancy");

    let (client, connection) = config.connect(NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });
    client
}

fn tenant_name() -> String {
    format!("t{}", Ulid::new())
}

/// Collect the data rows of a simple query result.
fn data_rows(messages: Vec<SimpleQueryMessage>) -> Vec<tokio_postgres::SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

fn assert_sqlstate(err: tokio_postgres::Error, expected: &str) {
    let db = err.as_db_error().expect("expected a database error");
    assert_eq!(db.code().code(), expected, "message: {}", db.message());
}

const HOUR: i64 = 3_600_000;

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn search_lock_confirm_list_flow() {
    let (addr, _tm) = start_test_server().await;
    let db = tenant_name();
    let client = connect(addr, &db, "alice").await;

    let rid = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO rooms (id, name, kind, capacity, building) VALUES ('{rid}', 'Aurora', 'conference', 12, 'North')"
        ))
        .await
        .unwrap();

    // Search: the room is free
    let rows = data_rows(
        client
            .simple_query(&format!(
                r#"SELECT * FROM availability WHERE start >= {} AND "end" <= {}"#,
                10 * HOUR,
                11 * HOUR
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(0), Some(rid.to_string().as_str()));
    assert_eq!(rows[0].get(1), Some("Aurora"));

    // Lock it, asking for the grant back
    let lock_id = Ulid::new();
    let rows = data_rows(
        client
            .simple_query(&format!(
                r#"INSERT INTO locks (id, room_id, start, "end") VALUES ('{lock_id}', '{rid}', {}, {}) RETURNING id, expires_at"#,
                10 * HOUR,
                11 * HOUR
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(0), Some(lock_id.to_string().as_str()));
    let expires_at: i64 = rows[0].get(1).unwrap().parse().unwrap();
    assert!(expires_at > 0);

    // Confirm the lock into a booking
    let booking_id = Ulid::new();
    let rows = data_rows(
        client
            .simple_query(&format!(
                "INSERT INTO bookings (id, lock_id) VALUES ('{booking_id}', '{lock_id}') RETURNING id, status"
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(0), Some(booking_id.to_string().as_str()));
    assert_eq!(rows[0].get(1), Some("confirmed"));

    // The room no longer shows up for any intersecting range
    let rows = data_rows(
        client
            .simple_query(&format!(
                r#"SELECT * FROM availability WHERE start >= {} AND "end" <= {}"#,
                10 * HOUR + 30 * 60_000,
                12 * HOUR
            ))
            .await
            .unwrap(),
    );
    assert!(rows.is_empty());

    // list-my-bookings
    let rows = data_rows(client.simple_query("SELECT * FROM bookings").await.unwrap());
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(0), Some(booking_id.to_string().as_str()));
    assert_eq!(rows[0].get(4), Some("alice"));
    assert_eq!(rows[0].get(5), Some("confirmed"));
}

#[tokio::test]
async fn overlapping_lock_gets_conflict_sqlstate() {
    let (addr, _tm) = start_test_server().await;
    let db = tenant_name();
    let alice = connect(addr, &db, "alice").await;
    let bob = connect(addr, &db, "bob").await;

    let rid = Ulid::new();
    alice
        .batch_execute(&format!("INSERT INTO rooms (id) VALUES ('{rid}')"))
        .await
        .unwrap();

    alice
        .batch_execute(&format!(
            r#"INSERT INTO locks (id, room_id, start, "end") VALUES ('{}', '{rid}', {}, {})"#,
            Ulid::new(),
            10 * HOUR,
            11 * HOUR
        ))
        .await
        .unwrap();

    let err = bob
        .batch_execute(&format!(
            r#"INSERT INTO locks (id, room_id, start, "end") VALUES ('{}', '{rid}', {}, {})"#,
            Ulid::new(),
            10 * HOUR + 30 * 60_000,
            11 * HOUR + 30 * 60_000
        ))
        .await
        .unwrap_err();
    assert_sqlstate(err, "55P03");
}

#[tokio::test]
async fn stranger_cannot_release_or_confirm() {
    let (addr, _tm) = start_test_server().await;
    let db = tenant_name();
    let alice = connect(addr, &db, "alice").await;
    let mallory = connect(addr, &db, "mallory").await;

    let rid = Ulid::new();
    alice
        .batch_execute(&format!("INSERT INTO rooms (id) VALUES ('{rid}')"))
        .await
        .unwrap();

    let lock_id = Ulid::new();
    alice
        .batch_execute(&format!(
            r#"INSERT INTO locks (id, room_id, start, "end") VALUES ('{lock_id}', '{rid}', {}, {})"#,
            10 * HOUR,
            11 * HOUR
        ))
        .await
        .unwrap();

    let err = mallory
        .batch_execute(&format!("DELETE FROM locks WHERE id = '{lock_id}'"))
        .await
        .unwrap_err();
    assert_sqlstate(err, "42501");

    let err = mallory
        .batch_execute(&format!(
            "INSERT INTO bookings (id, lock_id) VALUES ('{}', '{lock_id}')",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_sqlstate(err, "42501");

    // The owner's lock is intact and still confirmable
    alice
        .batch_execute(&format!(
            "INSERT INTO bookings (id, lock_id) VALUES ('{}', '{lock_id}')",
            Ulid::new()
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn release_frees_the_slot_for_others() {
    let (addr, _tm) = start_test_server().await;
    let db = tenant_name();
    let alice = connect(addr, &db, "alice").await;
    let bob = connect(addr, &db, "bob").await;

    let rid = Ulid::new();
    alice
        .batch_execute(&format!("INSERT INTO rooms (id) VALUES ('{rid}')"))
        .await
        .unwrap();

    let lock_id = Ulid::new();
    alice
        .batch_execute(&format!(
            r#"INSERT INTO locks (id, room_id, start, "end") VALUES ('{lock_id}', '{rid}', {}, {})"#,
            10 * HOUR,
            11 * HOUR
        ))
        .await
        .unwrap();
    alice
        .batch_execute(&format!("DELETE FROM locks WHERE id = '{lock_id}'"))
        .await
        .unwrap();

    // Immediately reacquirable by another principal
    bob.batch_execute(&format!(
        r#"INSERT INTO locks (id, room_id, start, "end") VALUES ('{}', '{rid}', {}, {})"#,
        Ulid::new(),
        10 * HOUR,
        11 * HOUR
    ))
    .await
    .unwrap();
}

#[tokio::test]
async fn expired_lock_confirm_reports_lock_expired() {
    let (addr, _tm) = start_test_server().await;
    let db = tenant_name();
    let alice = connect(addr, &db, "alice").await;

    let rid = Ulid::new();
    alice
        .batch_execute(&format!("INSERT INTO rooms (id) VALUES ('{rid}')"))
        .await
        .unwrap();

    let lock_id = Ulid::new();
    alice
        .batch_execute(&format!(
            r#"INSERT INTO locks (id, room_id, start, "end", ttl) VALUES ('{lock_id}', '{rid}', {}, {}, 50)"#,
            10 * HOUR,
            11 * HOUR
        ))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    let err = alice
        .batch_execute(&format!(
            "INSERT INTO bookings (id, lock_id) VALUES ('{}', '{lock_id}')",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_sqlstate(err, "55000");
}

#[tokio::test]
async fn confirming_twice_reports_lock_not_found() {
    let (addr, _tm) = start_test_server().await;
    let db = tenant_name();
    let alice = connect(addr, &db, "alice").await;

    let rid = Ulid::new();
    alice
        .batch_execute(&format!("INSERT INTO rooms (id) VALUES ('{rid}')"))
        .await
        .unwrap();

    let lock_id = Ulid::new();
    alice
        .batch_execute(&format!(
            r#"INSERT INTO locks (id, room_id, start, "end") VALUES ('{lock_id}', '{rid}', {}, {})"#,
            10 * HOUR,
            11 * HOUR
        ))
        .await
        .unwrap();
    alice
        .batch_execute(&format!(
            "INSERT INTO bookings (id, lock_id) VALUES ('{}', '{lock_id}')",
            Ulid::new()
        ))
        .await
        .unwrap();

    let err = alice
        .batch_execute(&format!(
            "INSERT INTO bookings (id, lock_id) VALUES ('{}', '{lock_id}')",
            Ulid::new()
        ))
        .await
        .unwrap_err();
    assert_sqlstate(err, "P0002");

    // At most one booking exists
    let rows = data_rows(alice.simple_query("SELECT * FROM bookings").await.unwrap());
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn bookings_listing_is_owner_scoped() {
    let (addr, _tm) = start_test_server().await;
    let db = tenant_name();
    let alice = connect(addr, &db, "alice").await;
    let bob = connect(addr, &db, "bob").await;

    let rid = Ulid::new();
    alice
        .batch_execute(&format!("INSERT INTO rooms (id) VALUES ('{rid}')"))
        .await
        .unwrap();

    for (client, start) in [(&alice, 9 * HOUR), (&bob, 10 * HOUR)] {
        let lock_id = Ulid::new();
        client
            .batch_execute(&format!(
                r#"INSERT INTO locks (id, room_id, start, "end") VALUES ('{lock_id}', '{rid}', {start}, {})"#,
                start + HOUR
            ))
            .await
            .unwrap();
        client
            .batch_execute(&format!(
                "INSERT INTO bookings (id, lock_id) VALUES ('{}', '{lock_id}')",
                Ulid::new()
            ))
            .await
            .unwrap();
    }

    let alice_rows = data_rows(alice.simple_query("SELECT * FROM bookings").await.unwrap());
    assert_eq!(alice_rows.len(), 1);
    assert_eq!(alice_rows[0].get(4), Some("alice"));

    let bob_rows = data_rows(bob.simple_query("SELECT * FROM bookings").await.unwrap());
    assert_eq!(bob_rows.len(), 1);
    assert_eq!(bob_rows[0].get(4), Some("bob"));

    // Per-room view shows both
    let room_rows = data_rows(
        alice
            .simple_query(&format!("SELECT * FROM bookings WHERE room_id = '{rid}'"))
            .await
            .unwrap(),
    );
    assert_eq!(room_rows.len(), 2);
}

#[tokio::test]
async fn malformed_range_is_a_validation_error() {
    let (addr, _tm) = start_test_server().await;
    let db = tenant_name();
    let alice = connect(addr, &db, "alice").await;

    let rid = Ulid::new();
    alice
        .batch_execute(&format!("INSERT INTO rooms (id) VALUES ('{rid}')"))
        .await
        .unwrap();

    // start >= end
    let err = alice
        .batch_execute(&format!(
            r#"INSERT INTO locks (id, room_id, start, "end") VALUES ('{}', '{rid}', {}, {})"#,
            Ulid::new(),
            11 * HOUR,
            10 * HOUR
        ))
        .await
        .unwrap_err();
    assert_sqlstate(err, "22023");

    // Unknown room is validation-class too
    let err = alice
        .batch_execute(&format!(
            r#"INSERT INTO locks (id, room_id, start, "end") VALUES ('{}', '{}', {}, {})"#,
            Ulid::new(),
            Ulid::new(),
            10 * HOUR,
            11 * HOUR
        ))
        .await
        .unwrap_err();
    assert_sqlstate(err, "22023");
}

#[tokio::test]
async fn free_windows_reflect_bookings() {
    let (addr, _tm) = start_test_server().await;
    let db = tenant_name();
    let alice = connect(addr, &db, "alice").await;

    let rid = Ulid::new();
    alice
        .batch_execute(&format!("INSERT INTO rooms (id) VALUES ('{rid}')"))
        .await
        .unwrap();

    let lock_id = Ulid::new();
    alice
        .batch_execute(&format!(
            r#"INSERT INTO locks (id, room_id, start, "end") VALUES ('{lock_id}', '{rid}', {}, {})"#,
            10 * HOUR,
            11 * HOUR
        ))
        .await
        .unwrap();
    alice
        .batch_execute(&format!(
            "INSERT INTO bookings (id, lock_id) VALUES ('{}', '{lock_id}')",
            Ulid::new()
        ))
        .await
        .unwrap();

    let rows = data_rows(
        alice
            .simple_query(&format!(
                r#"SELECT * FROM free_windows WHERE room_id = '{rid}' AND start >= {} AND "end" <= {}"#,
                9 * HOUR,
                12 * HOUR
            ))
            .await
            .unwrap(),
    );
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get(1), Some((9 * HOUR).to_string().as_str()));
    assert_eq!(rows[0].get(2), Some((10 * HOUR).to_string().as_str()));
    assert_eq!(rows[1].get(1), Some((11 * HOUR).to_string().as_str()));
    assert_eq!(rows[1].get(2), Some((12 * HOUR).to_string().as_str()));
}

#[tokio::test]
async fn tenants_are_isolated_over_the_wire() {
    let (addr, _tm) = start_test_server().await;
    let site_a = connect(addr, &tenant_name(), "alice").await;
    let site_b = connect(addr, &tenant_name(), "alice").await;

    let rid = Ulid::new();
    site_a
        .batch_execute(&format!("INSERT INTO rooms (id) VALUES ('{rid}')"))
        .await
        .unwrap();

    // The other tenant has no such room
    let rows = data_rows(site_b.simple_query("SELECT * FROM rooms").await.unwrap());
    assert!(rows.is_empty());
}

#[tokio::test]
async fn garbage_sql_is_a_syntax_error() {
    let (addr, _tm) = start_test_server().await;
    let db = tenant_name();
    let alice = connect(addr, &db, "alice").await;

    let err = alice
        .batch_execute("UPDATE rooms SET name = 'x'")
        .await
        .unwrap_err();
    assert_sqlstate(err, "42601");
}
