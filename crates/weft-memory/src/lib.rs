pub mod db;
pub mod embeddings;
pub mod index;

pub use db::DbPool;
pub use embeddings::HttpEmbeddingProvider;
pub use index::{cosine_similarity, EmbeddingIndex};
