//! Outline structure documents.
//!
//! Two shapes exist in stored data. Legacy documents list participants and
//! scenes as bare strings; current documents use `{name, type}` and
//! `{location, characters, purpose}` objects. [`StructureDocument`] reads
//! both through one conversion and always writes the current shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::Scene;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    #[default]
    Character,
    Organization,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParticipantKind,
}

impl Participant {
    pub fn character(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParticipantKind::Character,
        }
    }

    pub fn organization(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParticipantKind::Organization,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawStructure", into = "WireStructure")]
pub struct StructureDocument {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub characters: Vec<Participant>,
    pub scenes: Vec<Scene>,
    pub key_points: Vec<String>,
    pub key_events: Vec<String>,
    pub emotion: Option<String>,
    pub goal: Option<String>,
    /// Keys this crate does not interpret; carried through unchanged.
    pub extra: Map<String, Value>,
}

impl StructureDocument {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let doc = serde_json::from_str(raw)
            .map_err(|err| anyhow::anyhow!("parse outline structure: {err}"))?;
        Ok(doc)
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string(self).map_err(|err| anyhow::anyhow!("serialize structure: {err}"))
    }

    /// Mirrors an outline edit into the document, as the backend does on update.
    pub fn sync_from_outline(&mut self, title: Option<&str>, content: Option<&str>) {
        if let Some(title) = title {
            self.title = Some(title.to_owned());
        }
        if let Some(content) = content {
            self.summary = Some(content.to_owned());
            self.content = Some(content.to_owned());
        }
    }

    pub fn character_names(&self) -> Vec<&str> {
        self.names_of(ParticipantKind::Character)
    }

    pub fn organization_names(&self) -> Vec<&str> {
        self.names_of(ParticipantKind::Organization)
    }

    fn names_of(&self, kind: ParticipantKind) -> Vec<&str> {
        self.characters
            .iter()
            .filter(|p| p.kind == kind)
            .map(|p| p.name.trim())
            .filter(|name| !name.is_empty())
            .collect()
    }

    pub fn summary_text(&self) -> Option<&str> {
        self.summary
            .as_deref()
            .or(self.content.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawParticipant {
    Legacy(String),
    Current {
        #[serde(default)]
        name: String,
        #[serde(default, rename = "type")]
        kind: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawScene {
    Legacy(String),
    Current(Scene),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTextList {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Default, Deserialize)]
struct RawStructure {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    characters: Option<Vec<RawParticipant>>,
    #[serde(default)]
    scenes: Option<Vec<RawScene>>,
    #[serde(default)]
    key_points: Option<RawTextList>,
    #[serde(default)]
    key_events: Option<RawTextList>,
    #[serde(default)]
    emotion: Option<String>,
    #[serde(default)]
    goal: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<RawStructure> for StructureDocument {
    fn from(raw: RawStructure) -> Self {
        let characters = raw
            .characters
            .unwrap_or_default()
            .into_iter()
            .map(|entry| match entry {
                RawParticipant::Legacy(name) => Participant::character(name),
                RawParticipant::Current { name, kind } => match kind.as_deref() {
                    Some("organization") => Participant::organization(name),
                    _ => Participant::character(name),
                },
            })
            .collect();

        let scenes = raw
            .scenes
            .unwrap_or_default()
            .into_iter()
            .map(|scene| match scene {
                RawScene::Legacy(location) => Scene {
                    location,
                    ..Scene::default()
                },
                RawScene::Current(scene) => scene,
            })
            .collect();

        Self {
            title: raw.title,
            summary: raw.summary,
            content: raw.content,
            characters,
            scenes,
            key_points: text_list(raw.key_points),
            key_events: text_list(raw.key_events),
            emotion: raw.emotion,
            goal: raw.goal,
            extra: raw.extra,
        }
    }
}

fn text_list(raw: Option<RawTextList>) -> Vec<String> {
    match raw {
        None => Vec::new(),
        Some(RawTextList::One(text)) if text.trim().is_empty() => Vec::new(),
        Some(RawTextList::One(text)) => vec![text],
        Some(RawTextList::Many(items)) => items,
    }
}

#[derive(Debug, Serialize)]
struct WireStructure {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    characters: Vec<Participant>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    scenes: Vec<Scene>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    key_points: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    key_events: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    emotion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    goal: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<StructureDocument> for WireStructure {
    fn from(doc: StructureDocument) -> Self {
        Self {
            title: doc.title,
            summary: doc.summary,
            content: doc.content,
            characters: doc.characters,
            scenes: doc.scenes,
            key_points: doc.key_points,
            key_events: doc.key_events,
            emotion: doc.emotion,
            goal: doc.goal,
            extra: doc.extra,
        }
    }
}
