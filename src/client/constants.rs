pub const DEFAULT_URL: &str = "http://dl-api.dev/api/public/index.php/";

pub const ENV_URL: &str = "DL_API_URL";
pub const ENV_APP_ID: &str = "DL_API_APP_ID";
pub const ENV_KEY: &str = "DL_API_KEY";
pub const ENV_PROXY: &str = "DL_API_PROXY";
pub const ENV_CREDENTIALS_IN_QUERY: &str = "DL_API_CREDENTIALS_IN_QUERY";

pub const COLLECTION_SEGMENT: &str = "collection/";
pub const CHANNEL_SEGMENT: &str = "channels/";
