use crate::domain_port::StoreError;
use sqlx::mysql::MySqlDatabaseError;

const ER_DUP_ENTRY: u16 = 1062;
const ER_LOCK_WAIT_TIMEOUT: u16 = 1205;
const ER_LOCK_DEADLOCK: u16 = 1213;
const ER_CON_COUNT_ERROR: u16 = 1040;
const ER_SERVER_SHUTDOWN: u16 = 1053;
const CR_SERVER_GONE_ERROR: u16 = 2006;
const CR_SERVER_LOST: u16 = 2013;

fn mysql_error_number(err: &sqlx::Error) -> Option<u16> {
    if let sqlx::Error::Database(db) = err {
        if let Some(mysql_err) = db.try_downcast_ref::<MySqlDatabaseError>() {
            return Some(mysql_err.number());
        }
    }
    None
}

pub fn is_dup_key(err: &sqlx::Error) -> bool {
    mysql_error_number(err) == Some(ER_DUP_ENTRY)
}

/// Maps a driver error onto the storage taxonomy. This is the only place
/// MySQL error numbers are interpreted.
pub fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
        sqlx::Error::Database(_) => match mysql_error_number(&err) {
            Some(ER_DUP_ENTRY) => StoreError::Conflict(err.to_string()),
            Some(ER_LOCK_DEADLOCK | ER_LOCK_WAIT_TIMEOUT) => {
                StoreError::Transient(err.to_string())
            }
            Some(
                ER_CON_COUNT_ERROR | ER_SERVER_SHUTDOWN | CR_SERVER_GONE_ERROR | CR_SERVER_LOST,
            ) => StoreError::Unavailable(err.to_string()),
            _ => StoreError::Database(err.to_string()),
        },
        _ => StoreError::Database(err.to_string()),
    }
}
