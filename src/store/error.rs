use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum StoreError {
    LockPoisoned(&'static str),
    Sql(rusqlite::Error),
    Io(std::io::Error),
    /// A uniqueness or reference constraint rejected a write.
    Constraint(String),
    /// A stored row could not be decoded into its model type.
    Corrupt(String),
    /// The transaction was already committed or rolled back.
    TransactionFinished,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::LockPoisoned(operation) => {
                write!(f, "store lock poisoned during {}", operation)
            }
            StoreError::Sql(err) => write!(f, "sqlite: {}", err),
            StoreError::Io(err) => write!(f, "io: {}", err),
            StoreError::Constraint(message) => write!(f, "constraint violated: {}", message),
            StoreError::Corrupt(message) => write!(f, "corrupt row: {}", message),
            StoreError::TransactionFinished => write!(f, "transaction already finished"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::Sql(err) => Some(err),
            StoreError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Sql(err)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}
