use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::ledger::{
    CounterKey, DailyUsage, Direction, LedgerError, QuotaLimit, Reservation, UsageCounter,
    UsageDelta, UsageStore,
};

use super::error::StorageError;
use super::schema::init_database;
use super::USAGE_DB_FILENAME;

/// SQLite-backed usage store. Every reservation is a single `IMMEDIATE`
/// transaction, so the check and the increment commit together or not at all.
pub struct SqliteUsageStore {
    conn: Mutex<Connection>,
}

impl SqliteUsageStore {
    pub fn new(data_dir: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&data_dir)?;
        let db_path = data_dir.join(USAGE_DB_FILENAME);
        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        init_database(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        init_database(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn reserve_in_tx(
        &self,
        key: &CounterKey,
        direction: Direction,
        delta: UsageDelta,
        limit: QuotaLimit,
    ) -> Result<Reservation, StorageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = Utc::now().to_rfc3339();

        tx.execute(
            r#"
            INSERT INTO usage_counters (scope_id, day, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(scope_id, day) DO NOTHING
            "#,
            params![key.scope_id, key.day, now],
        )?;

        let mut counter = read_counter(&tx, key)?.unwrap_or_default();

        if let Err(denial) = counter.check(direction, delta, &limit) {
            tx.commit()?;
            return Ok(Reservation::Denied(denial));
        }

        counter.apply(direction, delta);
        write_counter(&tx, key, &counter, &now)?;
        tx.commit()?;

        Ok(Reservation::Granted(counter))
    }

    fn release_in_tx(
        &self,
        key: &CounterKey,
        direction: Direction,
        delta: UsageDelta,
    ) -> Result<(), StorageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(mut counter) = read_counter(&tx, key)? {
            counter.revert(direction, delta);
            write_counter(&tx, key, &counter, &Utc::now().to_rfc3339())?;
        }

        tx.commit()?;
        Ok(())
    }

    fn load_counter(&self, key: &CounterKey) -> Result<UsageCounter, StorageError> {
        let conn = self.lock()?;
        Ok(read_counter(&conn, key)?.unwrap_or_default())
    }

    fn list_days(&self, scope_id: &str) -> Result<Vec<DailyUsage>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT day, messages_in, messages_out, bytes_in, bytes_out
            FROM usage_counters
            WHERE scope_id = ?1
            ORDER BY day DESC
            "#,
        )?;

        let rows = stmt.query_map(params![scope_id], |row| {
            Ok((
                row.get::<_, NaiveDate>(0)?,
                [
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ],
            ))
        })?;

        let mut usage = Vec::new();
        for row in rows {
            let (day, raw) = row?;
            usage.push(DailyUsage {
                day,
                counter: counter_from_raw(scope_id, raw)?,
            });
        }
        Ok(usage)
    }
}

impl UsageStore for SqliteUsageStore {
    fn reserve(
        &self,
        key: &CounterKey,
        direction: Direction,
        delta: UsageDelta,
        limit: QuotaLimit,
    ) -> Result<Reservation, LedgerError> {
        Ok(self.reserve_in_tx(key, direction, delta, limit)?)
    }

    fn release(
        &self,
        key: &CounterKey,
        direction: Direction,
        delta: UsageDelta,
    ) -> Result<(), LedgerError> {
        Ok(self.release_in_tx(key, direction, delta)?)
    }

    fn load(&self, key: &CounterKey) -> Result<UsageCounter, LedgerError> {
        Ok(self.load_counter(key)?)
    }

    fn history(&self, scope_id: &str) -> Result<Vec<DailyUsage>, LedgerError> {
        Ok(self.list_days(scope_id)?)
    }
}

fn read_counter(conn: &Connection, key: &CounterKey) -> Result<Option<UsageCounter>, StorageError> {
    let raw = conn
        .query_row(
            r#"
            SELECT messages_in, messages_out, bytes_in, bytes_out
            FROM usage_counters
            WHERE scope_id = ?1 AND day = ?2
            "#,
            params![key.scope_id, key.day],
            |row| {
                Ok([
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ])
            },
        )
        .optional()?;

    raw.map(|raw| counter_from_raw(&key.scope_id, raw))
        .transpose()
}

fn write_counter(
    conn: &Connection,
    key: &CounterKey,
    counter: &UsageCounter,
    now: &str,
) -> Result<(), StorageError> {
    conn.execute(
        r#"
        UPDATE usage_counters
        SET messages_in = ?3, messages_out = ?4, bytes_in = ?5, bytes_out = ?6, updated_at = ?7
        WHERE scope_id = ?1 AND day = ?2
        "#,
        params![
            key.scope_id,
            key.day,
            to_sql_int(&key.scope_id, counter.messages_in)?,
            to_sql_int(&key.scope_id, counter.messages_out)?,
            to_sql_int(&key.scope_id, counter.bytes_in)?,
            to_sql_int(&key.scope_id, counter.bytes_out)?,
            now,
        ],
    )?;
    Ok(())
}

fn counter_from_raw(scope_id: &str, raw: [i64; 4]) -> Result<UsageCounter, StorageError> {
    let convert = |value: i64| {
        u64::try_from(value).map_err(|_| StorageError::CounterOutOfRange(scope_id.to_string()))
    };

    Ok(UsageCounter {
        messages_in: convert(raw[0])?,
        messages_out: convert(raw[1])?,
        bytes_in: convert(raw[2])?,
        bytes_out: convert(raw[3])?,
    })
}

fn to_sql_int(scope_id: &str, value: u64) -> Result<i64, StorageError> {
    i64::try_from(value).map_err(|_| StorageError::CounterOutOfRange(scope_id.to_string()))
}
