use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::structure::StructureDocument;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Outline {
    pub id: String,
    pub project_id: String,
    pub order_index: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    /// Serialized structure document; see [`crate::structure`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<String>,
}

impl Outline {
    pub fn display_title(&self) -> String {
        if self.title.trim().is_empty() {
            format!("第{}章", self.order_index)
        } else {
            self.title.clone()
        }
    }

    /// The normalized structure document; an absent structure is empty.
    pub fn structure_document(&self) -> anyhow::Result<StructureDocument> {
        StructureDocument::parse(self.structure.as_deref().unwrap_or_default())
    }

    pub fn outline_ref(&self) -> OutlineRef {
        OutlineRef {
            id: self.id.clone(),
            order_index: self.order_index,
            title: self.display_title(),
        }
    }
}

/// Identity of an outline as reported back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutlineRef {
    pub id: String,
    pub order_index: i64,
    pub title: String,
}

impl fmt::Display for OutlineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.order_index, self.title)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineList {
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub items: Vec<Outline>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scene {
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(default)]
    pub purpose: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChapterPlan {
    pub sub_index: u32,
    pub title: String,
    #[serde(default)]
    pub plot_summary: String,
    #[serde(default)]
    pub key_events: Vec<String>,
    #[serde(default)]
    pub character_focus: Vec<String>,
    #[serde(default)]
    pub emotional_tone: String,
    #[serde(default)]
    pub narrative_goal: String,
    #[serde(default)]
    pub conflict_type: String,
    #[serde(default)]
    pub estimated_words: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenes: Option<Vec<Scene>>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionStrategy {
    #[default]
    Balanced,
    Climax,
    Detail,
}

impl ExpansionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Balanced => "balanced",
            Self::Climax => "climax",
            Self::Detail => "detail",
        }
    }
}

impl fmt::Display for ExpansionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpansionStrategy {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "balanced" => Ok(Self::Balanced),
            "climax" => Ok(Self::Climax),
            "detail" => Ok(Self::Detail),
            other => anyhow::bail!("unsupported expansion strategy: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExpansionResult {
    pub outline_id: String,
    #[serde(default)]
    pub outline_title: String,
    #[serde(default)]
    pub expansion_strategy: String,
    #[serde(default)]
    pub actual_chapter_count: usize,
    #[serde(default)]
    pub chapter_plans: Vec<ChapterPlan>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedOutline {
    pub outline_id: String,
    #[serde(default)]
    pub outline_title: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchExpansionResult {
    #[serde(default)]
    pub total_outlines_expanded: usize,
    #[serde(default)]
    pub expansion_results: Vec<ExpansionResult>,
    #[serde(default)]
    pub skipped_outlines: Vec<SkippedOutline>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExistingChapter {
    pub id: String,
    pub chapter_number: i64,
    #[serde(default)]
    pub title: String,
}

/// Response of the "does this outline already have chapters" query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutlineChapters {
    pub has_chapters: bool,
    #[serde(default)]
    pub chapters: Vec<ExistingChapter>,
    #[serde(default)]
    pub expansion_plans: Option<Vec<ChapterPlan>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExpandOutlineRequest {
    pub target_chapter_count: u32,
    pub expansion_strategy: ExpansionStrategy,
    pub auto_create_chapters: bool,
    pub enable_scene_analysis: bool,
}

impl ExpandOutlineRequest {
    /// Generation never auto-commits; chapters are created from the cached plans later.
    pub fn preview(target_chapter_count: u32, expansion_strategy: ExpansionStrategy) -> Self {
        Self {
            target_chapter_count,
            expansion_strategy,
            auto_create_chapters: false,
            enable_scene_analysis: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchExpandRequest {
    pub project_id: String,
    pub chapters_per_outline: u32,
    pub expansion_strategy: ExpansionStrategy,
    pub auto_create_chapters: bool,
}

impl BatchExpandRequest {
    pub fn preview(
        project_id: impl Into<String>,
        chapters_per_outline: u32,
        expansion_strategy: ExpansionStrategy,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            chapters_per_outline,
            expansion_strategy,
            auto_create_chapters: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateChaptersRequest<'a> {
    pub chapter_plans: &'a [ChapterPlan],
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatedChapters {
    #[serde(default)]
    pub outline_id: Option<String>,
    pub chapters_created: usize,
}

/// A chapter created one-to-one from an outline, without AI expansion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatedChapter {
    pub id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub chapter_number: i64,
    #[serde(default)]
    pub sub_index: u32,
    #[serde(default)]
    pub outline_id: Option<String>,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SingleChapterResponse {
    #[serde(default)]
    pub message: String,
    pub chapter: CreatedChapter,
}
