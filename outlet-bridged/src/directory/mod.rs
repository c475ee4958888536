pub mod cache;
pub mod hash;

pub use cache::DirectoryCache;
