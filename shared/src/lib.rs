use serde::{Deserialize, Serialize};

// ===== ENTITY TYPES =====
//
// Records owned by the backend collaborator. Hierarchy is expressed only
// through `parent_id`; every tree surface receives these as-is.

/// Unix timestamp in milliseconds.
pub type Timestamp = i64;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NoteEntity {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub title: String,
    #[serde(default)]
    pub icon: Option<String>,
    /// Number of child notes as reported by the backend, when known.
    #[serde(default)]
    pub child_count: Option<u32>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MaterialKind {
    Folder,
    WebPage,
    Pdf,
    Image,
    Other,
}

impl MaterialKind {
    pub fn is_folder(self) -> bool {
        matches!(self, MaterialKind::Folder)
    }

    pub fn icon(self) -> &'static str {
        match self {
            MaterialKind::Folder => "folder",
            MaterialKind::WebPage => "globe",
            MaterialKind::Pdf => "file-pdf",
            MaterialKind::Image => "image",
            MaterialKind::Other => "file",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MaterialEntity {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub name: String,
    pub kind: MaterialKind,
    #[serde(default)]
    pub child_count: Option<u32>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MemoEntity {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub content: String,
    /// Memo folders report their size here; plain memos leave it empty.
    #[serde(default)]
    pub child_count: Option<u32>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

// ===== SORT TYPES =====

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Title,
    CreatedAt,
    UpdatedAt,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortOptions {
    pub by: SortBy,
    pub order: SortOrder,
}

impl SortOptions {
    pub fn new(by: SortBy, order: SortOrder) -> Self {
        Self { by, order }
    }

    /// Same key, given direction.
    pub fn with_order(self, order: SortOrder) -> Self {
        Self { order, ..self }
    }
}

// ===== CONFIG TYPES =====

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TreeConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub tree: TreeSection,
}

impl TreeConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

// AppSection carries the config format version so older files can be migrated
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppSection {
    pub version: String,
}

impl AppSection {
    /// Current configuration format version
    pub const CURRENT_VERSION: &'static str = "1.0.0";

    /// Check if this config needs migration to current version
    pub fn needs_migration(&self) -> bool {
        self.version != Self::CURRENT_VERSION
    }

    pub fn get_migration_strategy(&self) -> MigrationStrategy {
        match self.version.as_str() {
            "1.0.0" => MigrationStrategy::None,
            "0.9.0" => MigrationStrategy::Upgrade("0.9.0 -> 1.0.0".to_string()),
            _ => MigrationStrategy::Recreate,
        }
    }
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            version: Self::CURRENT_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MigrationStrategy {
    None,                    // No migration needed
    Upgrade(String),         // Automatic upgrade with description
    Recreate,                // Unknown version, create new config
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TreeSection {
    #[serde(default)]
    pub sort_by: SortBy,
    #[serde(default)]
    pub sort_order: SortOrder,
    /// Collapse a parent whose last child was moved or removed.
    #[serde(default = "default_true")]
    pub collapse_emptied_parents: bool,
}

impl TreeSection {
    pub fn sort_options(&self) -> SortOptions {
        SortOptions::new(self.sort_by, self.sort_order)
    }
}

impl Default for TreeSection {
    fn default() -> Self {
        Self {
            sort_by: SortBy::Title,
            sort_order: SortOrder::Asc,
            collapse_emptied_parents: true,
        }
    }
}

fn default_true() -> bool {
    true
}

// ===== UTILITY FUNCTIONS =====

const MEMO_TITLE_MAX_CHARS: usize = 40;

/// Derive a display title from memo content: first non-empty line, truncated.
pub fn memo_title(content: &str) -> String {
    let first_line = content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();

    if first_line.chars().count() > MEMO_TITLE_MAX_CHARS {
        let truncated: String = first_line.chars().take(MEMO_TITLE_MAX_CHARS).collect();
        format!("{}…", truncated.trim_end())
    } else {
        first_line.to_string()
    }
}
