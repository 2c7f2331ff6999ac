use serde::Serialize;

/// Expected count used for a borough missing from [`BOROUGH_PUB_COUNTS`].
pub const DEFAULT_EXPECTED_COUNT: u32 = 50;

const LOW_CEILING: u32 = 70;
const MEDIUM_CEILING: u32 = 150;

/// Rough pub counts per London borough, used to pick a sampling density.
pub const BOROUGH_PUB_COUNTS: &[(&str, u32)] = &[
    ("Westminster", 445),
    ("Camden", 245),
    ("Islington", 210),
    ("Hackney", 210),
    ("Southwark", 180),
    ("Lambeth", 160),
    ("City of London", 145),
    ("Tower Hamlets", 150),
    ("Wandsworth", 125),
    ("Hammersmith and Fulham", 105),
    ("Lewisham", 100),
    ("Kensington and Chelsea", 100),
    ("Bromley", 100),
    ("Richmond upon Thames", 95),
    ("Bexley", 90),
    ("Croydon", 80),
    ("Ealing", 80),
    ("Hillingdon", 80),
    ("Barnet", 75),
    ("Hounslow", 75),
    ("Enfield", 70),
    ("Greenwich", 65),
    ("Haringey", 65),
    ("Brent", 65),
    ("Harrow", 45),
    ("Sutton", 45),
    ("Redbridge", 45),
    ("Newham", 45),
    ("Merton", 50),
    ("Kingston upon Thames", 55),
    ("Waltham Forest", 55),
    ("Barking and Dagenham", 20),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DensityTier {
    Low,
    Medium,
    High,
}

/// Grid spacing and search radius, both in metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TierSettings {
    pub spacing: f64,
    pub radius: u32,
}

impl DensityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            DensityTier::Low => "low",
            DensityTier::Medium => "medium",
            DensityTier::High => "high",
        }
    }

    pub fn settings(&self) -> TierSettings {
        match self {
            DensityTier::Low => TierSettings {
                spacing: 1000.0,
                radius: 700,
            },
            DensityTier::Medium => TierSettings {
                spacing: 600.0,
                radius: 500,
            },
            DensityTier::High => TierSettings {
                spacing: 300.0,
                radius: 400,
            },
        }
    }
}

pub fn classify(expected_count: u32) -> DensityTier {
    if expected_count <= LOW_CEILING {
        DensityTier::Low
    } else if expected_count <= MEDIUM_CEILING {
        DensityTier::Medium
    } else {
        DensityTier::High
    }
}

pub fn expected_count(region_name: &str) -> u32 {
    BOROUGH_PUB_COUNTS
        .iter()
        .find(|(name, _)| *name == region_name)
        .map(|(_, count)| *count)
        .unwrap_or(DEFAULT_EXPECTED_COUNT)
}
