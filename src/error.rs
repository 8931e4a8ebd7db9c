/// Everything that can go wrong between a tile URL arriving and bytes
/// leaving. The protocol adapter converts all of these into an empty
/// payload at the boundary; nothing here ever reaches the rendering client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed tile URL: {0}")]
    Parse(String),

    #[error("no layer registered under id '{0}'")]
    ConfigMissing(String),

    #[error("failed to acquire a database connection")]
    Connection(#[source] sqlx::Error),

    #[error("tile query failed")]
    Query(#[from] sqlx::Error),

    #[error("'{0}' is not a valid SQL identifier")]
    Identifier(String),

    #[error("tile encoding failed: {0}")]
    Encoding(String),

    #[error("spatial index operation failed")]
    Index(#[source] sqlx::Error),

    #[error("invalid layer source YAML")]
    Source(#[from] serde_yaml::Error),
}
