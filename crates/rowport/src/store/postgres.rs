//! PostgreSQL store.
//!
//! Statements are sent as literal SQL through the simple query protocol.
//! Values travel as quoted text literals and PostgreSQL coerces them to the
//! column types, so the same converters that produce the data file text
//! produce the SQL text. Results are read back cast to text.
//!
//! With autocommit off, each insert runs inside a savepoint. A rejected
//! statement rolls back to it and leaves the open transaction usable.

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::config::SslMode;
use tokio_postgres::{Config as PgConfig, NoTls, SimpleQueryMessage};
use tracing::{debug, info, warn};

use crate::config::{LoaderConfig, TargetConfig};
use crate::core::identifier::{qualify_pg, quote_literal, quote_pg};
use crate::core::{Column, ColumnKind, ConverterRegistry, Row, StoreAdapter, Table, Value};
use crate::error::{Result, RowportError};

const SAVEPOINT: &str = "rowport_insert";

/// PostgreSQL target store holding one connection.
///
/// Inserts, commits and reads share the connection, so a load sees its own
/// uncommitted rows.
pub struct PgStore {
    client: Object,
    config: TargetConfig,
    converters: ConverterRegistry,
    autocommit: bool,
    identity_override: bool,
    in_transaction: bool,
}

impl PgStore {
    /// Connect to the target database.
    pub async fn connect(config: &TargetConfig, loader: &LoaderConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.ssl_mode(match config.ssl_mode.to_lowercase().as_str() {
            "disable" => SslMode::Disable,
            "prefer" => SslMode::Prefer,
            other => {
                return Err(RowportError::Config(format!(
                    "target.ssl_mode '{}' is not supported; use 'disable' or 'prefer'",
                    other
                )));
            }
        });

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(1)
            .build()
            .map_err(|e| RowportError::pool(e.to_string(), "creating PostgreSQL pool"))?;

        let client = pool
            .get()
            .await
            .map_err(|e| RowportError::pool(e.to_string(), "getting PostgreSQL connection"))?;

        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self {
            client,
            config: config.clone(),
            converters: ConverterRegistry::default(),
            autocommit: loader.autocommit,
            identity_override: loader.identity_override,
            in_transaction: false,
        })
    }

    /// Use custom value converters.
    pub fn with_converters(mut self, converters: ConverterRegistry) -> Self {
        self.converters = converters;
        self
    }

    async fn begin_if_needed(&mut self) -> Result<()> {
        if !self.autocommit && !self.in_transaction {
            self.client.simple_query("BEGIN").await?;
            self.in_transaction = true;
        }
        Ok(())
    }

    async fn run_insert(&mut self, table: &Table, rows: &[Row]) -> Result<Vec<Row>> {
        let sql = insert_sql(
            &self.config.schema,
            table,
            rows,
            &self.converters,
            self.identity_override,
        )?;
        self.begin_if_needed().await?;
        debug!("Inserting {} row(s) into {}", rows.len(), table.name);
        let sql = if self.in_transaction {
            in_savepoint(&sql)
        } else {
            sql
        };
        match self.client.simple_query(&sql).await {
            Ok(messages) => rows_from_messages(table, &messages, &self.converters),
            Err(e) => {
                self.recover().await;
                Err(RowportError::store(&table.name, e.to_string()))
            }
        }
    }

    /// Undo a failed insert inside a transaction.
    ///
    /// Rolls back to the insert's savepoint. If that fails too, the whole
    /// transaction is rolled back and the next insert begins a new one.
    async fn recover(&mut self) {
        if !self.in_transaction {
            return;
        }
        let rollback_to = format!("ROLLBACK TO SAVEPOINT {}", SAVEPOINT);
        if let Err(e) = self.client.simple_query(&rollback_to).await {
            warn!("Rollback to savepoint failed, rolling back transaction: {}", e);
            if let Err(e) = self.client.simple_query("ROLLBACK").await {
                warn!("Rollback failed: {}", e);
            }
            self.in_transaction = false;
        }
    }
}

#[async_trait]
impl StoreAdapter for PgStore {
    async fn insert(&mut self, table: &Table, row: Row) -> Result<Row> {
        let mut stored = self.run_insert(table, std::slice::from_ref(&row)).await?;
        stored
            .pop()
            .ok_or_else(|| RowportError::store(&table.name, "insert returned no row"))
    }

    async fn insert_batch(&mut self, table: &Table, rows: Vec<Row>) -> Result<Vec<Row>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        self.run_insert(table, &rows).await
    }

    fn is_autocommit(&self) -> bool {
        self.autocommit
    }

    async fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.client.simple_query("COMMIT").await?;
            self.in_transaction = false;
        }
        Ok(())
    }

    async fn read_table(&mut self, table: &Table) -> Result<Vec<Row>> {
        let sql = select_sql(&self.config.schema, table)?;
        let messages = self.client.simple_query(&sql).await?;
        rows_from_messages(table, &messages, &self.converters)
    }

    fn db_type(&self) -> &str {
        "postgres"
    }
}

/// Wrap a statement in a savepoint released on success.
fn in_savepoint(sql: &str) -> String {
    format!(
        "SAVEPOINT {sp}; {sql}; RELEASE SAVEPOINT {sp}",
        sp = SAVEPOINT,
        sql = sql
    )
}

/// Column expression yielding the text form the converters read.
fn text_expr(column: &Column) -> Result<String> {
    let name = quote_pg(&column.name)?;
    Ok(match column.kind() {
        ColumnKind::Binary => format!("translate(encode({}, 'base64'), E'\\n', '')", name),
        _ => format!("{}::text", name),
    })
}

fn returning_list(table: &Table) -> Result<String> {
    let exprs = table
        .columns
        .iter()
        .map(text_expr)
        .collect::<Result<Vec<_>>>()?;
    Ok(exprs.join(", "))
}

/// Build a multi-row `INSERT … RETURNING` statement.
///
/// Columns are those set in any of the rows, in table order. A row missing
/// one of them gets `DEFAULT`. Identity columns are left to the database
/// unless `identity_override` is set.
fn insert_sql(
    schema: &str,
    table: &Table,
    rows: &[Row],
    converters: &ConverterRegistry,
    identity_override: bool,
) -> Result<String> {
    let columns: Vec<&Column> = table
        .columns
        .iter()
        .filter(|c| identity_override || !c.is_identity)
        .filter(|c| rows.iter().any(|r| r.get(&c.name).is_some()))
        .collect();

    let target = qualify_pg(schema, &table.name)?;
    let returning = returning_list(table)?;

    if columns.is_empty() {
        if rows.len() != 1 {
            return Err(RowportError::store(
                &table.name,
                "cannot batch rows without column values",
            ));
        }
        return Ok(format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING {}",
            target, returning
        ));
    }

    let names = columns
        .iter()
        .map(|c| quote_pg(&c.name))
        .collect::<Result<Vec<_>>>()?;

    let mut tuples = Vec::with_capacity(rows.len());
    for row in rows {
        let mut literals = Vec::with_capacity(columns.len());
        for column in &columns {
            let literal = match row.get(&column.name) {
                None => "DEFAULT".to_string(),
                Some(value) => match converters.to_text(table, column, value)? {
                    None => "NULL".to_string(),
                    Some(text) if column.kind() == ColumnKind::Binary => {
                        format!("decode({}, 'base64')", quote_literal(&text))
                    }
                    Some(text) => quote_literal(&text),
                },
            };
            literals.push(literal);
        }
        tuples.push(format!("({})", literals.join(", ")));
    }

    let overriding = if identity_override && table.identity_columns().next().is_some() {
        " OVERRIDING SYSTEM VALUE"
    } else {
        ""
    };

    Ok(format!(
        "INSERT INTO {} ({}){} VALUES {} RETURNING {}",
        target,
        names.join(", "),
        overriding,
        tuples.join(", "),
        returning
    ))
}

/// Build the `SELECT` used to read a whole table, ordered by primary key.
fn select_sql(schema: &str, table: &Table) -> Result<String> {
    let mut sql = format!(
        "SELECT {} FROM {}",
        returning_list(table)?,
        qualify_pg(schema, &table.name)?
    );
    if table.has_pk() {
        let keys = table
            .primary_key
            .iter()
            .map(|c| quote_pg(c))
            .collect::<Result<Vec<_>>>()?;
        sql.push_str(&format!(" ORDER BY {}", keys.join(", ")));
    }
    Ok(sql)
}

/// Convert text result rows (columns in table order) back to typed rows.
fn rows_from_messages(
    table: &Table,
    messages: &[SimpleQueryMessage],
    converters: &ConverterRegistry,
) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    for message in messages {
        let SimpleQueryMessage::Row(result) = message else {
            continue;
        };
        let mut row = Row::new(table.name.clone());
        for (i, column) in table.columns.iter().enumerate() {
            let value = match result.try_get(i)? {
                Some(text) => converters.from_text(table, column, text)?,
                None => Value::Null,
            };
            row.values.insert(column.name.clone(), value);
        }
        rows.push(row);
    }
    Ok(rows)
}
