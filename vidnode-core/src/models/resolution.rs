use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Adaptive output tier with its fixed bandwidth and frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "240p")]
    P240,
    #[serde(rename = "360p")]
    P360,
    #[serde(rename = "480p")]
    P480,
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
    #[serde(rename = "1440p")]
    P1440,
    #[serde(rename = "2160p")]
    P2160,
}

impl Resolution {
    pub const ALL: [Self; 7] = [
        Self::P240,
        Self::P360,
        Self::P480,
        Self::P720,
        Self::P1080,
        Self::P1440,
        Self::P2160,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::P240 => "240p",
            Self::P360 => "360p",
            Self::P480 => "480p",
            Self::P720 => "720p",
            Self::P1080 => "1080p",
            Self::P1440 => "1440p",
            Self::P2160 => "2160p",
        }
    }

    /// Advertised `BANDWIDTH` in bits per second.
    #[must_use]
    pub const fn bandwidth(self) -> u64 {
        match self {
            Self::P240 => 250_000,
            Self::P360 => 500_000,
            Self::P480 => 1_000_000,
            Self::P720 => 3_000_000,
            Self::P1080 => 6_000_000,
            Self::P1440 => 8_000_000,
            Self::P2160 => 16_000_000,
        }
    }

    #[must_use]
    pub const fn dimensions(self) -> (u32, u32) {
        match self {
            Self::P240 => (426, 240),
            Self::P360 => (640, 360),
            Self::P480 => (854, 480),
            Self::P720 => (1280, 720),
            Self::P1080 => (1920, 1080),
            Self::P1440 => (2560, 1440),
            Self::P2160 => (3840, 2160),
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Resolution {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unsupported resolution: {s}")))
    }
}

/// Adaptive streaming container. Only HLS is produced by this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdaptiveFormat {
    M3u8,
}

impl AdaptiveFormat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::M3u8 => "m3u8",
        }
    }
}

impl std::str::FromStr for AdaptiveFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "m3u8" => Ok(Self::M3u8),
            other => Err(Error::InvalidInput(format!("unsupported format: {other}"))),
        }
    }
}

/// URL shape of a manifest: `dynamic` while live, `static` once ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestMode {
    Dynamic,
    Static,
}

impl ManifestMode {
    #[must_use]
    pub const fn for_streaming(is_streaming: bool) -> Self {
        if is_streaming {
            Self::Dynamic
        } else {
            Self::Static
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dynamic => "dynamic",
            Self::Static => "static",
        }
    }
}

impl std::str::FromStr for ManifestMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dynamic" => Ok(Self::Dynamic),
            "static" => Ok(Self::Static),
            other => Err(Error::InvalidInput(format!("unsupported manifest type: {other}"))),
        }
    }
}
