#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Store: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("Control point: {0}")]
    ControlPoint(#[from] crate::control::ControlPointError),
    #[error("Reader: {0}")]
    Supervisor(#[from] crate::reader::SupervisorError),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
