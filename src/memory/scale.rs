/*!
 * Reporting Scale
 * Unit conversion for figures read out of a baseline
 */

use crate::core::errors::NmtError;
use crate::core::limits::{G, K, M};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unit in which front ends present byte amounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Scale {
    #[serde(rename = "B")]
    Bytes,
    #[default]
    #[serde(rename = "KB")]
    Kilo,
    #[serde(rename = "MB")]
    Mega,
    #[serde(rename = "GB")]
    Giga,
}

impl Scale {
    pub const fn factor(self) -> usize {
        match self {
            Scale::Bytes => 1,
            Scale::Kilo => K,
            Scale::Mega => M,
            Scale::Giga => G,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Scale::Bytes => "B",
            Scale::Kilo => "KB",
            Scale::Mega => "MB",
            Scale::Giga => "GB",
        }
    }

    /// `amount` in this scale, rounded to nearest
    pub fn amount_in_scale(self, amount: usize) -> usize {
        let factor = self.factor();
        amount.saturating_add(factor / 2) / factor
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scale {
    type Err = NmtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "1" | "B" => Ok(Scale::Bytes),
            "KB" | "K" => Ok(Scale::Kilo),
            "MB" | "M" => Ok(Scale::Mega),
            "GB" | "G" => Ok(Scale::Giga),
            _ => Err(NmtError::UnknownScale(s.to_string())),
        }
    }
}
