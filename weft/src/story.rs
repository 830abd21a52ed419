//! Story delivery types: the inbound unit of work.

use serde::{Deserialize, Serialize};

/// What kind of work a story describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryType {
    App,
    DevOps,
}

impl std::str::FromStr for StoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "app" => Ok(Self::App),
            "devops" => Ok(Self::DevOps),
            other => Err(format!("unknown story type: {other}")),
        }
    }
}

impl std::fmt::Display for StoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::App => f.write_str("app"),
            Self::DevOps => f.write_str("devops"),
        }
    }
}

/// One unit of work, delivered exactly once over the inbound story channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoryMessage {
    /// Transport message id.
    pub id: String,
    pub story_id: String,
    pub story_type: StoryType,
    /// Task description fed into the planning prompt.
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn story_type_parse_and_display() {
        assert_eq!("app".parse::<StoryType>().unwrap(), StoryType::App);
        assert_eq!("DEVOPS".parse::<StoryType>().unwrap(), StoryType::DevOps);
        assert!("epic".parse::<StoryType>().is_err());
        assert_eq!(StoryType::App.to_string(), "app");
    }

    #[test]
    fn story_message_serde() {
        let s = StoryMessage {
            id: "m1".into(),
            story_id: "050".into(),
            story_type: StoryType::App,
            content: "add /health endpoint".into(),
        };
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"story_type\":\"app\""));
        let back: StoryMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.story_id, "050");
    }
}
