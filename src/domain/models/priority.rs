//! Request priority bands for the LLM dispatcher.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Priority band of an LLM request. Lower numeric value is served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RequestPriority {
    Pm = 0,
    HarnessMerge = 1,
    Merge = 2,
    Qa = 3,
    HarnessDev = 4,
    Dev = 5,
}

impl RequestPriority {
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pm => "pm",
            Self::HarnessMerge => "harness_merge",
            Self::Merge => "merge",
            Self::Qa => "qa",
            Self::HarnessDev => "harness_dev",
            Self::Dev => "dev",
        }
    }
}

impl fmt::Display for RequestPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.as_str(), self.ordinal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_match_bands() {
        assert_eq!(RequestPriority::Pm.ordinal(), 0);
        assert_eq!(RequestPriority::HarnessMerge.ordinal(), 1);
        assert_eq!(RequestPriority::Merge.ordinal(), 2);
        assert_eq!(RequestPriority::Qa.ordinal(), 3);
        assert_eq!(RequestPriority::HarnessDev.ordinal(), 4);
        assert_eq!(RequestPriority::Dev.ordinal(), 5);
    }

    #[test]
    fn test_ordering_follows_ordinal() {
        assert!(RequestPriority::Pm < RequestPriority::Merge);
        assert!(RequestPriority::Qa < RequestPriority::Dev);
    }
}
