/// Common constants used across Origraph.
///
/// These defaults are used by configuration and ingestion when explicit
/// values are not provided.
pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 30;
pub const DEFAULT_STORAGE_KEY: &str = "origraph_models";
pub const DEFAULT_MODEL_NAME: &str = "Untitled Model";

/// Name of the sled tree that holds persisted models.
pub const MODELS_TREE: &str = "origraph";

/// Value used as the group key when an aggregated attribute is missing.
pub const MISSING_VALUE_KEY: &str = "undefined";
