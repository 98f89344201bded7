use thiserror::Error;

/// Error type for the connection/dispatch layer. Wraps the two subsystems
/// it sits on top of and adds the error kinds specific to command
/// handling and transactions.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Resp(#[from] crate::resp::Error),
    #[error(transparent)]
    Storage(#[from] crate::storage::Error),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("syntax error")]
    SyntaxError,
    #[error("key must not be empty")]
    EmptyKey,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("wrong number of arguments for '{0}' command")]
    WrongArity(String),
    #[error("{0}")]
    TransactionError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
