#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unsupported instruction form: {0}")]
    Unsupported(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
