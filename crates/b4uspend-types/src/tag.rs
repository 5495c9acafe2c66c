//! Resource tags linking cached reads to the writes that make them stale.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Class of server-held data a read can provide and a write can invalidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TagKind {
    User,
    Expenses,
    Budget,
    Goals,
    Checklist,
    Dashboard,
    Challenges,
    MyChallenges,
    Chat,
}

impl TagKind {
    pub const ALL: [TagKind; 9] = [
        TagKind::User,
        TagKind::Expenses,
        TagKind::Budget,
        TagKind::Goals,
        TagKind::Checklist,
        TagKind::Dashboard,
        TagKind::Challenges,
        TagKind::MyChallenges,
        TagKind::Chat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::User => "User",
            TagKind::Expenses => "Expenses",
            TagKind::Budget => "Budget",
            TagKind::Goals => "Goals",
            TagKind::Checklist => "Checklist",
            TagKind::Dashboard => "Dashboard",
            TagKind::Challenges => "Challenges",
            TagKind::MyChallenges => "MyChallenges",
            TagKind::Chat => "Chat",
        }
    }
}

/// A tag, optionally narrowed to one entity (`Goals#<uuid>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    pub kind: TagKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Tag {
    pub fn kind(kind: TagKind) -> Self {
        Self { kind, id: None }
    }

    pub fn entity(kind: TagKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: Some(id.into()),
        }
    }

    /// Whether invalidating `self` makes a read that provided `provided` stale.
    ///
    /// A kind-only tag covers every provided tag of that kind; an entity tag
    /// covers only the same entity.
    pub fn invalidates(&self, provided: &Tag) -> bool {
        if self.kind != provided.kind {
            return false;
        }
        match &self.id {
            None => true,
            Some(id) => provided.id.as_deref() == Some(id.as_str()),
        }
    }
}

impl From<TagKind> for Tag {
    fn from(kind: TagKind) -> Self {
        Tag::kind(kind)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}#{}", self.kind.as_str(), id),
            None => f.write_str(self.kind.as_str()),
        }
    }
}
