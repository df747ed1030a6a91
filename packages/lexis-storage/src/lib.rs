pub mod cache;
pub mod db;
pub mod qdrant;
pub mod schema;

mod error;

pub use cache::PgCacheBackend;
pub use db::Db;
pub use error::Error;
pub use qdrant::QdrantIndex;

pub type Result<T, E = Error> = std::result::Result<T, E>;
