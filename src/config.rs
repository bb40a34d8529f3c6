use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::domain::errors::EngineError;
use crate::domain::mseg::{BreakoutPath, MsegKey, TechSide};
use crate::domain::value::Year;

/// Consumer adoption scenario under which markets are apportioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdoptScheme {
    /// Full stock turnover every year; competed shares apply immediately.
    TechnicalPotential,
    /// Stock turns over at realistic replacement/retrofit rates.
    MaxAdoption,
}

/// Commercial adopter time-preference premiums: seven discount-rate tiers
/// and default population fractions per end use. Per-key distributions in a
/// measure's choice parameters take precedence; these defaults back them up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommercialTimePrefs {
    pub rates: Vec<f64>,
    pub distributions: BTreeMap<String, Vec<f64>>,
}

impl Default for CommercialTimePrefs {
    fn default() -> Self {
        let distributions = BTreeMap::from(
            [
                ("heating", vec![0.265, 0.226, 0.196, 0.192, 0.105, 0.013, 0.003]),
                ("cooling", vec![0.264, 0.225, 0.193, 0.192, 0.106, 0.016, 0.004]),
                ("water heating", vec![0.263, 0.249, 0.212, 0.169, 0.097, 0.006, 0.004]),
                ("ventilation", vec![0.265, 0.226, 0.196, 0.192, 0.105, 0.013, 0.003]),
                ("cooking", vec![0.261, 0.248, 0.214, 0.171, 0.097, 0.005, 0.004]),
                ("lighting", vec![0.264, 0.225, 0.193, 0.193, 0.085, 0.013, 0.027]),
                ("refrigeration", vec![0.262, 0.248, 0.213, 0.170, 0.097, 0.006, 0.004]),
            ]
            .map(|(k, v)| (k.to_string(), v)),
        );
        CommercialTimePrefs {
            rates: vec![10.0, 1.0, 0.45, 0.25, 0.15, 0.065, 0.0],
            distributions,
        }
    }
}

impl CommercialTimePrefs {
    pub fn tier_count(&self) -> usize {
        self.rates.len()
    }

    pub fn default_distribution(&self, end_use: &str) -> Option<&[f64]> {
        self.distributions.get(end_use).map(|v| v.as_slice())
    }
}

/// One reporting category and the microsegment labels it covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakoutGroup {
    pub category: String,
    pub members: Vec<String>,
}

impl BreakoutGroup {
    fn new(category: &str, members: &[&str]) -> Self {
        BreakoutGroup {
            category: category.to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
        }
    }
}

/// Engine-wide analysis parameters and reporting-category tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub first_year: Year,
    pub last_year: Year,
    /// Real discount rate for portfolio-level cash flows.
    pub discount_rate: f64,
    /// Annual retrofit rate added to replacement-driven stock turnover.
    pub retrofit_rate: f64,
    pub adopt_schemes: Vec<AdoptScheme>,
    pub com_time_prefs: CommercialTimePrefs,
    pub climate_breakouts: Vec<BreakoutGroup>,
    pub building_breakouts: Vec<BreakoutGroup>,
    pub end_use_breakouts: Vec<BreakoutGroup>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            first_year: 2024,
            last_year: 2050,
            discount_rate: 0.07,
            retrofit_rate: 0.01,
            adopt_schemes: vec![AdoptScheme::TechnicalPotential, AdoptScheme::MaxAdoption],
            com_time_prefs: CommercialTimePrefs::default(),
            climate_breakouts: vec![
                BreakoutGroup::new("AIA CZ1", &["AIA_CZ1", "AIA CZ1"]),
                BreakoutGroup::new("AIA CZ2", &["AIA_CZ2", "AIA CZ2"]),
                BreakoutGroup::new("AIA CZ3", &["AIA_CZ3", "AIA CZ3"]),
                BreakoutGroup::new("AIA CZ4", &["AIA_CZ4", "AIA CZ4"]),
                BreakoutGroup::new("AIA CZ5", &["AIA_CZ5", "AIA CZ5"]),
            ],
            building_breakouts: vec![
                BreakoutGroup::new(
                    "Residential (New)",
                    &["new", "single family home", "multi family home", "mobile home"],
                ),
                BreakoutGroup::new(
                    "Residential (Existing)",
                    &["existing", "single family home", "multi family home", "mobile home"],
                ),
                BreakoutGroup::new(
                    "Commercial (New)",
                    &[
                        "new",
                        "assembly",
                        "education",
                        "food sales",
                        "food service",
                        "health care",
                        "mercantile/service",
                        "lodging",
                        "large office",
                        "small office",
                        "warehouse",
                        "other",
                    ],
                ),
                BreakoutGroup::new(
                    "Commercial (Existing)",
                    &[
                        "existing",
                        "assembly",
                        "education",
                        "food sales",
                        "food service",
                        "health care",
                        "mercantile/service",
                        "lodging",
                        "large office",
                        "small office",
                        "warehouse",
                        "other",
                    ],
                ),
            ],
            end_use_breakouts: vec![
                BreakoutGroup::new("Heating (Equip.)", &["heating", "secondary heating"]),
                BreakoutGroup::new("Cooling (Equip.)", &["cooling"]),
                BreakoutGroup::new("Heating (Env.)", &["heating", "secondary heating"]),
                BreakoutGroup::new("Cooling (Env.)", &["cooling"]),
                BreakoutGroup::new("Ventilation", &["ventilation"]),
                BreakoutGroup::new("Lighting", &["lighting"]),
                BreakoutGroup::new("Water Heating", &["water heating"]),
                BreakoutGroup::new("Refrigeration", &["refrigeration", "other"]),
                BreakoutGroup::new(
                    "Computers and Electronics",
                    &["PCs", "non-PC office equipment", "TVs", "computers"],
                ),
                BreakoutGroup::new(
                    "Other",
                    &["cooking", "drying", "ceiling fan", "fans & pumps", "MELs", "other"],
                ),
            ],
        }
    }
}

const EQUIP_CATEGORIES: [&str; 2] = ["Heating (Equip.)", "Cooling (Equip.)"];
const ENVELOPE_CATEGORIES: [&str; 2] = ["Heating (Env.)", "Cooling (Env.)"];

impl AnalysisConfig {
    /// Modeling horizon as an inclusive year iterator.
    pub fn years(&self) -> std::ops::RangeInclusive<Year> {
        self.first_year..=self.last_year
    }

    pub fn horizon_len(&self) -> usize {
        (self.last_year - self.first_year + 1) as usize
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read analysis config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse analysis config {}", path.display()))
    }

    /// Map a contributing microsegment key to the reporting categories its
    /// competed values are broken out under.
    pub fn resolve_breakout(&self, key: &MsegKey) -> Result<BreakoutPath, EngineError> {
        let climate = self
            .climate_breakouts
            .iter()
            .find(|g| g.members.contains(&key.climate))
            .map(|g| g.category.clone())
            .ok_or(EngineError::UnmappedBreakout {
                key: key.to_string(),
                field: "climate zone",
            })?;

        let structure_label = key.structure.label().to_string();
        let building = self
            .building_breakouts
            .iter()
            .find(|g| g.members.contains(&key.building) && g.members.contains(&structure_label))
            .map(|g| g.category.clone())
            .ok_or(EngineError::UnmappedBreakout {
                key: key.to_string(),
                field: "building class",
            })?;

        let end_use = self.resolve_end_use_category(key).ok_or(EngineError::UnmappedBreakout {
            key: key.to_string(),
            field: "end use",
        })?;

        Ok(BreakoutPath {
            climate,
            building,
            end_use,
        })
    }

    fn resolve_end_use_category(&self, key: &MsegKey) -> Option<String> {
        // The 'other' end use maps to refrigeration or the catch-all bucket
        // depending on the technology named in the key.
        if key.end_use == "other" {
            return Some(
                if key.technology.as_deref() == Some("freezers") {
                    "Refrigeration"
                } else {
                    "Other"
                }
                .to_string(),
            );
        }
        let mut resolved = None;
        for group in &self.end_use_breakouts {
            if group.members.contains(&key.end_use) {
                let category = group.category.as_str();
                let equip = EQUIP_CATEGORIES.contains(&category);
                let envelope = ENVELOPE_CATEGORIES.contains(&category);
                let matches = (equip && key.side == Some(TechSide::Supply))
                    || (envelope && key.side == Some(TechSide::Demand) && key.is_primary())
                    || (!equip && !envelope);
                if matches {
                    resolved = Some(group.category.clone());
                }
            } else if key.technology.as_deref() == Some("lighting gain") {
                // Secondary heating/cooling microsegments representing waste
                // heat from lights report under the lighting category.
                resolved = Some("Lighting".to_string());
            }
        }
        resolved
    }
}
