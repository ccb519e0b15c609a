use thiserror::Error;

pub type ParleyResult<T> = Result<T, ParleyError>;

#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("config error: {0}")]
    Config(String),

    #[error("contact card error: {0}")]
    ContactCard(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
