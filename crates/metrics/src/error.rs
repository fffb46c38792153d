#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to build prometheus recorder: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
}

pub type Result<T> = std::result::Result<T, Error>;
