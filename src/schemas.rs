use serde::{Serialize, Deserialize};

/// Result of scraping a collection page
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CollectionListing {
    pub app_id: Option<String>,
    pub items: Vec<String>,
}

/// Schema of config.toml
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct Config {
    pub steamcmd_path: String,
    pub app_id: Option<String>,
    pub output_path: Option<String>,
}
