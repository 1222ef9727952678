pub mod kmeans;
pub(crate) mod retry;
