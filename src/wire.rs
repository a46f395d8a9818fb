use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::VacancyAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct VacancyHandler {
    tenants: Arc<TenantManager>,
    query_parser: Arc<VacancyQueryParser>,
}

impl VacancyHandler {
    pub fn new(tenants: Arc<TenantManager>) -> Self {
        Self {
            tenants,
            query_parser: Arc::new(VacancyQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenants.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        owner: &str,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::RegisterRoom {
                id,
                name,
                kind,
                capacity,
                building,
            } => {
                engine
                    .register_room(id, name, kind, capacity, building)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::AcquireLock {
                id,
                room_id,
                start,
                end,
                ttl_ms,
                returning,
            } => {
                let range = TimeRange { start, end };
                let grant = match engine.acquire_lock(id, room_id, range, owner, ttl_ms).await {
                    Ok(grant) => grant,
                    Err(e) => {
                        if matches!(e, EngineError::RoomUnavailable { .. }) {
                            metrics::counter!(observability::LOCK_CONFLICTS_TOTAL).increment(1);
                        }
                        return Err(engine_err(e));
                    }
                };
                if returning {
                    let schema = Arc::new(lock_grant_schema());
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&grant.id.to_string())?;
                    encoder.encode_field(&grant.expires_at)?;
                    let rows = vec![Ok(encoder.take_row())];
                    Ok(vec![Response::Query(QueryResponse::new(
                        schema,
                        stream::iter(rows),
                    ))])
                } else {
                    Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
                }
            }
            Command::ReleaseLock { id } => {
                engine.release_lock(id, owner).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::ConfirmBooking {
                id,
                lock_id,
                returning,
            } => {
                let booking = engine
                    .confirm_booking(id, lock_id, owner)
                    .await
                    .map_err(engine_err)?;
                if returning {
                    let schema = Arc::new(booking_ack_schema());
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&booking.id.to_string())?;
                    encoder.encode_field(&"confirmed")?;
                    let rows = vec![Ok(encoder.take_row())];
                    Ok(vec![Response::Query(QueryResponse::new(
                        schema,
                        stream::iter(rows),
                    ))])
                } else {
                    Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
                }
            }
            Command::SelectRooms => {
                let rooms = engine.list_rooms().await;
                Ok(vec![room_rows(rooms)])
            }
            Command::SelectAvailability {
                room_ids,
                start,
                end,
            } => {
                let free = engine
                    .free_rooms(&room_ids, TimeRange { start, end })
                    .await
                    .map_err(engine_err)?;
                Ok(vec![room_rows(free)])
            }
            Command::SelectFreeWindows {
                room_id,
                start,
                end,
                min_duration,
            } => {
                let windows = engine
                    .free_windows_for_room(room_id, TimeRange { start, end }, min_duration)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(window_schema());
                let rid_str = room_id.to_string();
                let rows: Vec<PgWireResult<_>> = windows
                    .into_iter()
                    .map(|w| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&rid_str)?;
                        encoder.encode_field(&w.start)?;
                        encoder.encode_field(&w.end)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBookings { room_id } => {
                let bookings = match room_id {
                    Some(rid) => engine.bookings_for_room(rid).await.map_err(engine_err)?,
                    None => engine.bookings_for_owner(owner).await,
                };
                let schema = Arc::new(booking_schema());
                let rows: Vec<PgWireResult<_>> = bookings
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.room_id.to_string())?;
                        encoder.encode_field(&b.range.start)?;
                        encoder.encode_field(&b.range.end)?;
                        encoder.encode_field(&b.owner)?;
                        encoder.encode_field(&"confirmed")?;
                        encoder.encode_field(&b.created_at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectLocks { room_id } => {
                let locks = engine.locks_for_room(room_id).await.map_err(engine_err)?;
                let schema = Arc::new(lock_schema());
                let rows: Vec<PgWireResult<_>> = locks
                    .into_iter()
                    .map(|l| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&l.id.to_string())?;
                        encoder.encode_field(&l.room_id.to_string())?;
                        encoder.encode_field(&l.range.start)?;
                        encoder.encode_field(&l.range.end)?;
                        encoder.encode_field(&l.owner)?;
                        encoder.encode_field(&l.created_at)?;
                        encoder.encode_field(&l.expires_at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
        }
    }
}

fn room_rows(rooms: Vec<RoomInfo>) -> Response {
    let schema = Arc::new(room_schema());
    let rows: Vec<PgWireResult<_>> = rooms
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.name)?;
            encoder.encode_field(&r.kind)?;
            encoder.encode_field(&(r.capacity as i32))?;
            encoder.encode_field(&r.building)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn room_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        text_field("kind"),
        FieldInfo::new("capacity".into(), None, None, Type::INT4, FieldFormat::Text),
        text_field("building"),
    ]
}

fn lock_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("room_id"),
        int8_field("start"),
        int8_field("end"),
        text_field("owner"),
        int8_field("created_at"),
        int8_field("expires_at"),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("room_id"),
        int8_field("start"),
        int8_field("end"),
        text_field("owner"),
        text_field("status"),
        int8_field("created_at"),
    ]
}

fn window_schema() -> Vec<FieldInfo> {
    vec![
        text_field("room_id"),
        int8_field("start"),
        int8_field("end"),
    ]
}

fn lock_grant_schema() -> Vec<FieldInfo> {
    vec![text_field("id"), int8_field("expires_at")]
}

fn booking_ack_schema() -> Vec<FieldInfo> {
    vec![text_field("id"), text_field("status")]
}

/// The authenticated session user — the trusted `owner` for every
/// lock/confirm/release in this connection. Identity was validated by
/// the upstream auth collaborator before it ever reached us.
fn session_owner<C: ClientInfo>(client: &C) -> PgWireResult<String> {
    client.metadata().get("user").cloned().ok_or_else(|| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "28000".into(),
            "no session user".into(),
        )))
    })
}

#[async_trait]
impl SimpleQueryHandler for VacancyHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let owner = session_owner(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;

        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(&engine, &owner, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        metrics::counter!(
            observability::QUERIES_TOTAL,
            "command" => label,
            "status" => if result.is_ok() { "ok" } else { "error" },
        )
        .increment(1);
        result
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct VacancyQueryParser;

#[async_trait]
impl QueryParser for VacancyQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for_statement(stmt))
    }
}

/// Crude but sufficient: the dialect is fixed, so the result shape
/// follows from which table the statement touches.
fn schema_for_statement(stmt: &str) -> Vec<FieldInfo> {
    let upper = stmt.to_uppercase();
    if upper.contains("INSERT") {
        if !upper.contains("RETURNING") {
            return vec![];
        }
        if upper.contains("LOCKS") {
            return lock_grant_schema();
        }
        if upper.contains("BOOKINGS") {
            return booking_ack_schema();
        }
        return vec![];
    }
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("AVAILABILITY") || upper.contains("ROOMS") {
        room_schema()
    } else if upper.contains("FREE_WINDOWS") {
        window_schema()
    } else if upper.contains("BOOKINGS") {
        booking_schema()
    } else if upper.contains("LOCKS") {
        lock_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl ExtendedQueryHandler for VacancyHandler {
    type Statement = String;
    type QueryParser = VacancyQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let owner = session_owner(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.execute_command(&engine, &owner, cmd).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for_statement(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for_statement(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct VacancyFactory {
    handler: Arc<VacancyHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<VacancyAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl VacancyFactory {
    pub fn new(tenants: Arc<TenantManager>, password: String) -> Self {
        let auth_source = VacancyAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(VacancyHandler::new(tenants)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for VacancyFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one accepted connection until the client disconnects.
pub async fn process_connection(
    socket: TcpStream,
    tenants: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = VacancyFactory::new(tenants, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    // Each taxonomy entry gets its own SQLSTATE so callers can branch
    // without string-matching: contention is not a syntax error, and
    // "you were too slow" is not "no such lock".
    let code = match &e {
        EngineError::Validation(_) | EngineError::UnknownRoom(_) => "22023",
        EngineError::RoomUnavailable { .. } => "55P03",
        EngineError::LockNotFound(_) => "P0002",
        EngineError::LockExpired(_) => "55000",
        EngineError::OwnerMismatch(_) => "42501",
        EngineError::AlreadyExists(_) => "42710",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
