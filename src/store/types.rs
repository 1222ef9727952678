use serde::{Deserialize, Serialize};

/// Lifecycle shared by an analyzed item and each of its runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Processing,
    Done,
    Failed,
}

impl RunStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Done | RunStatus::Failed)
    }

    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(RunStatus::Queued),
            "processing" => Some(RunStatus::Processing),
            "done" => Some(RunStatus::Done),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl AsRef<str> for RunStatus {
    fn as_ref(&self) -> &str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Processing => "processing",
            RunStatus::Done => "done",
            RunStatus::Failed => "failed",
        }
    }
}

/// Position a cluster takes towards the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    Support,
    Skeptic,
    #[default]
    Neutral,
}

impl Stance {
    /// Lenient parse of a model reply; anything unrecognized is `Neutral`.
    #[must_use]
    pub fn from_reply(raw: &str) -> Self {
        match raw.trim().trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase().as_str() {
            "support" | "supportive" => Stance::Support,
            "skeptic" | "skeptical" => Stance::Skeptic,
            _ => Stance::Neutral,
        }
    }

    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw {
            "support" => Some(Stance::Support),
            "skeptic" => Some(Stance::Skeptic),
            "neutral" => Some(Stance::Neutral),
            _ => None,
        }
    }
}

impl AsRef<str> for Stance {
    fn as_ref(&self) -> &str {
        match self {
            Stance::Support => "support",
            Stance::Skeptic => "skeptic",
            Stance::Neutral => "neutral",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("support", Stance::Support)]
    #[case(" Skeptical.", Stance::Skeptic)]
    #[case("NEUTRAL", Stance::Neutral)]
    #[case("mixed", Stance::Neutral)]
    #[case("", Stance::Neutral)]
    fn stance_from_reply(#[case] raw: &str, #[case] expected: Stance) {
        assert_eq!(Stance::from_reply(raw), expected);
    }

    #[test]
    fn run_status_round_trips_through_text() {
        for status in [
            RunStatus::Queued,
            RunStatus::Processing,
            RunStatus::Done,
            RunStatus::Failed,
        ] {
            assert_eq!(RunStatus::parse(status.as_ref()), Some(status));
        }
        assert_eq!(RunStatus::parse("running"), None);
    }

    #[test]
    fn only_done_and_failed_are_terminal() {
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Processing.is_terminal());
        assert!(RunStatus::Done.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn serde_uses_lowercase() {
        let json = serde_json::to_string(&RunStatus::Processing).expect("serialize");
        assert_eq!(json, "\"processing\"");
    }
}
