pub mod ingest;
pub mod normalize;
pub mod tracking;
pub mod transition;
pub mod validate;
