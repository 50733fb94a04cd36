use serde::{Deserialize, Serialize};

/// Job priority for queue ordering (higher values = higher priority)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobPriority(pub i32);

impl Default for JobPriority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl JobPriority {
    /// Low priority jobs (processed last)
    pub const LOW: Self = Self(-100);

    /// Normal priority jobs (default)
    pub const NORMAL: Self = Self(0);

    /// High priority jobs
    pub const HIGH: Self = Self(100);

    /// Critical priority jobs
    pub const CRITICAL: Self = Self(1000);

    /// Get the numeric value for ordering
    pub fn value(self) -> i32 {
        self.0
    }

    /// Get human-readable name for the well-known levels
    pub fn name(self) -> Option<&'static str> {
        match self {
            Self::LOW => Some("low"),
            Self::NORMAL => Some("normal"),
            Self::HIGH => Some("high"),
            Self::CRITICAL => Some("critical"),
            _ => None,
        }
    }
}

impl From<i32> for JobPriority {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{}", self.0),
        }
    }
}

impl std::str::FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::LOW),
            "normal" => Ok(Self::NORMAL),
            "high" => Ok(Self::HIGH),
            "critical" => Ok(Self::CRITICAL),
            other => other
                .parse::<i32>()
                .map(Self)
                .map_err(|_| format!("Invalid priority: {}", s)),
        }
    }
}
