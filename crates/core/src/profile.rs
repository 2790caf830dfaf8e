//! Resource Profile Selection
//!
//! Maps the number of samples in one clustering invocation to the tuned
//! clustering knobs and the resource ceiling class for that invocation.
//! Larger inputs get smaller sketches, a narrower k-mer range, smaller
//! batches, and a larger memory class.

use serde::{Deserialize, Serialize};

/// Profile tier, ordered from least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileTier {
    /// N <= 100: no restriction, tool defaults apply
    Default,
    /// 100 < N <= 200
    Moderate,
    /// 200 < N <= 300
    Conservative,
    /// N > 300
    MostConservative,
}

impl std::fmt::Display for ProfileTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileTier::Default => write!(f, "default"),
            ProfileTier::Moderate => write!(f, "moderate"),
            ProfileTier::Conservative => write!(f, "conservative"),
            ProfileTier::MostConservative => write!(f, "most_conservative"),
        }
    }
}

/// Memory ceiling class for a clustering invocation. The concrete megabyte
/// value for each class comes from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CeilingClass {
    Standard,
    Large,
    ExtraLarge,
}

impl std::fmt::Display for CeilingClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CeilingClass::Standard => write!(f, "standard"),
            CeilingClass::Large => write!(f, "large"),
            CeilingClass::ExtraLarge => write!(f, "extra_large"),
        }
    }
}

/// Tuned execution parameters for one clustering invocation.
///
/// `None` knobs impose no restriction and are left to the tool's defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceProfile {
    pub tier: ProfileTier,
    pub sketch_size: Option<u32>,
    pub min_k: Option<u32>,
    pub max_k: Option<u32>,
    pub k_step: Option<u32>,
    pub batch_size: Option<u32>,
    pub ceiling_class: CeilingClass,
}

impl ResourceProfile {
    const DEFAULT: Self = Self {
        tier: ProfileTier::Default,
        sketch_size: None,
        min_k: None,
        max_k: None,
        k_step: None,
        batch_size: None,
        ceiling_class: CeilingClass::Standard,
    };

    const MODERATE: Self = Self {
        tier: ProfileTier::Moderate,
        sketch_size: Some(8_000),
        min_k: Some(13),
        max_k: Some(29),
        k_step: Some(4),
        batch_size: Some(100),
        ceiling_class: CeilingClass::Large,
    };

    const CONSERVATIVE: Self = Self {
        tier: ProfileTier::Conservative,
        sketch_size: Some(5_000),
        min_k: Some(15),
        max_k: Some(27),
        k_step: Some(4),
        batch_size: Some(50),
        ceiling_class: CeilingClass::ExtraLarge,
    };

    const MOST_CONSERVATIVE: Self = Self {
        tier: ProfileTier::MostConservative,
        sketch_size: Some(2_500),
        min_k: Some(17),
        max_k: Some(25),
        k_step: Some(4),
        batch_size: Some(25),
        ceiling_class: CeilingClass::ExtraLarge,
    };

    /// The profile for a given tier.
    pub const fn for_tier(tier: ProfileTier) -> Self {
        match tier {
            ProfileTier::Default => Self::DEFAULT,
            ProfileTier::Moderate => Self::MODERATE,
            ProfileTier::Conservative => Self::CONSERVATIVE,
            ProfileTier::MostConservative => Self::MOST_CONSERVATIVE,
        }
    }
}

/// Tier for a sample count. Thresholds are inclusive upper bounds, so a
/// 150-sample chunk gets `Moderate`; `Conservative` starts at 201.
///
/// # Panics
///
/// Panics if `sample_count` is zero; callers never cluster an empty input.
pub fn select_tier(sample_count: usize) -> ProfileTier {
    assert!(sample_count > 0, "resource profile requested for zero samples");
    match sample_count {
        n if n > 300 => ProfileTier::MostConservative,
        n if n > 200 => ProfileTier::Conservative,
        n if n > 100 => ProfileTier::Moderate,
        _ => ProfileTier::Default,
    }
}

/// Select the resource profile for a clustering invocation over
/// `sample_count` samples.
///
/// # Panics
///
/// Panics if `sample_count` is zero.
pub fn select_profile(sample_count: usize) -> ResourceProfile {
    ResourceProfile::for_tier(select_tier(sample_count))
}
