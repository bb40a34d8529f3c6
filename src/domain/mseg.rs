use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::EngineError;
use crate::domain::value::{NumValue, Year, YearSeries};

/// Building types treated as residential when routing a competed key to a
/// market-share model.
pub const RESIDENTIAL_BUILDINGS: [&str; 3] =
    ["single family home", "multi family home", "mobile home"];

/// End uses participating in supply/demand-side overlap removal.
pub const HEAT_COOL_END_USES: [&str; 3] = ["heating", "cooling", "secondary heating"];

/// Whether a contributing microsegment is directly displaced by a measure
/// (`Primary`) or affected indirectly (`Secondary`). `Primary` sorts before
/// `Secondary`, which the competition driver relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SegmentType {
    Primary,
    Secondary,
}

/// Supply side (equipment) vs. demand side (envelope) of a heating or
/// cooling microsegment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TechSide {
    Supply,
    Demand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureType {
    New,
    Existing,
}

impl StructureType {
    /// Label used in building-class breakout tables.
    pub fn label(&self) -> &'static str {
        match self {
            StructureType::New => "new",
            StructureType::Existing => "existing",
        }
    }
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentType::Primary => write!(f, "primary"),
            SegmentType::Secondary => write!(f, "secondary"),
        }
    }
}

impl fmt::Display for TechSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TechSide::Supply => write!(f, "supply"),
            TechSide::Demand => write!(f, "demand"),
        }
    }
}

impl fmt::Display for StructureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Structured identity of a contributing market microsegment.
///
/// The derived ordering (field by field, `Primary` before `Secondary`)
/// defines the deterministic processing order used during competition.
/// The canonical serialized form is a pipe-separated string, produced and
/// parsed only at the collaborator boundary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MsegKey {
    pub segment: SegmentType,
    pub climate: String,
    pub building: String,
    pub fuel: String,
    pub end_use: String,
    /// Present only for heating/cooling microsegments.
    pub side: Option<TechSide>,
    pub technology: Option<String>,
    pub structure: StructureType,
}

impl MsegKey {
    pub fn is_primary(&self) -> bool {
        self.segment == SegmentType::Primary
    }

    pub fn is_secondary(&self) -> bool {
        self.segment == SegmentType::Secondary
    }

    /// Whether the key denotes a residential building segment.
    pub fn is_residential(&self) -> bool {
        RESIDENTIAL_BUILDINGS.contains(&self.building.as_str())
    }

    pub fn is_new_structure(&self) -> bool {
        self.structure == StructureType::New
    }

    /// Key linking this microsegment to secondary-adjustment records.
    pub fn link_key(&self) -> LinkKey {
        LinkKey {
            climate: self.climate.clone(),
            building: self.building.clone(),
            structure: self.structure,
        }
    }

    /// Key into the heating/cooling overlap ledger, present only for keys
    /// on the supply or demand side of heating/cooling.
    pub fn overlap_key(&self) -> Option<(TechSide, OverlapKey)> {
        self.side.map(|side| {
            (
                side,
                OverlapKey {
                    climate: self.climate.clone(),
                    building: self.building.clone(),
                    structure: self.structure,
                    fuel: self.fuel.clone(),
                    end_use: self.end_use.clone(),
                },
            )
        })
    }
}

impl fmt::Display for MsegKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.segment,
            self.climate,
            self.building,
            self.fuel,
            self.end_use,
            self.side.map(|s| s.to_string()).unwrap_or_default(),
            self.technology.as_deref().unwrap_or_default(),
            self.structure,
        )
    }
}

impl FromStr for MsegKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('|').collect();
        if parts.len() != 8 {
            return Err(format!("expected 8 '|'-separated fields, got {}", parts.len()));
        }
        let segment = match parts[0] {
            "primary" => SegmentType::Primary,
            "secondary" => SegmentType::Secondary,
            other => return Err(format!("unknown segment type '{other}'")),
        };
        let side = match parts[5] {
            "" => None,
            "supply" => Some(TechSide::Supply),
            "demand" => Some(TechSide::Demand),
            other => return Err(format!("unknown technology side '{other}'")),
        };
        let structure = match parts[7] {
            "new" => StructureType::New,
            "existing" => StructureType::Existing,
            other => return Err(format!("unknown structure type '{other}'")),
        };
        Ok(MsegKey {
            segment,
            climate: parts[1].to_string(),
            building: parts[2].to_string(),
            fuel: parts[3].to_string(),
            end_use: parts[4].to_string(),
            side,
            technology: if parts[6].is_empty() {
                None
            } else {
                Some(parts[6].to_string())
            },
            structure,
        })
    }
}

impl Serialize for MsegKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MsegKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Links a primary microsegment to the secondary microsegments it affects:
/// same climate zone, building type, and structure type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkKey {
    pub climate: String,
    pub building: String,
    pub structure: StructureType,
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.climate, self.building, self.structure)
    }
}

impl FromStr for LinkKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('|').collect();
        if parts.len() != 3 {
            return Err(format!("expected 3 '|'-separated fields, got {}", parts.len()));
        }
        let structure = match parts[2] {
            "new" => StructureType::New,
            "existing" => StructureType::Existing,
            other => return Err(format!("unknown structure type '{other}'")),
        };
        Ok(LinkKey {
            climate: parts[0].to_string(),
            building: parts[1].to_string(),
            structure,
        })
    }
}

impl Serialize for LinkKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for LinkKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Identifies a potentially overlapping heating/cooling market: climate
/// zone, building type, structure type, fuel, and end use.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OverlapKey {
    pub climate: String,
    pub building: String,
    pub structure: StructureType,
    pub fuel: String,
    pub end_use: String,
}

impl fmt::Display for OverlapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}",
            self.climate, self.building, self.structure, self.fuel, self.end_use
        )
    }
}

impl FromStr for OverlapKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('|').collect();
        if parts.len() != 5 {
            return Err(format!("expected 5 '|'-separated fields, got {}", parts.len()));
        }
        let structure = match parts[2] {
            "new" => StructureType::New,
            "existing" => StructureType::Existing,
            other => return Err(format!("unknown structure type '{other}'")),
        };
        Ok(OverlapKey {
            climate: parts[0].to_string(),
            building: parts[1].to_string(),
            structure,
            fuel: parts[3].to_string(),
            end_use: parts[4].to_string(),
        })
    }
}

impl Serialize for OverlapKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for OverlapKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Total addressable heating/cooling energy by overlap key, supplied by the
/// upstream preparation stage and consumed only by overlap removal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverlapTotals(pub BTreeMap<OverlapKey, YearSeries>);

impl OverlapTotals {
    pub fn get(&self, key: &OverlapKey) -> Option<&YearSeries> {
        self.0.get(key)
    }
}

/// Baseline and efficient-case values of one quantity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideValues {
    pub baseline: YearSeries,
    pub efficient: YearSeries,
}

/// One resource quantity split into totals (all adoptions to date) and the
/// portion competed in the current year.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub total: SideValues,
    pub competed: SideValues,
}

/// Stock counts: all applicable units and the units captured by the
/// measure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StockSide {
    pub all: YearSeries,
    pub captured: YearSeries,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StockTracking {
    pub total: StockSide,
    pub competed: StockSide,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostTotals {
    pub stock: Quantity,
    pub energy: Quantity,
    pub carbon: Quantity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lifetimes {
    pub baseline: YearSeries,
    pub measure: NumValue,
}

/// Stock, energy, carbon, and cost totals for one market microsegment
/// (master or contributing).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketMseg {
    pub stock: StockTracking,
    pub energy: Quantity,
    pub carbon: Quantity,
    pub cost: CostTotals,
    pub lifetime: Lifetimes,
}

impl MarketMseg {
    /// Visit every year-keyed series in the record with a labeled callback.
    pub fn for_each_series(&self, mut f: impl FnMut(&str, &YearSeries)) {
        f("stock.total.all", &self.stock.total.all);
        f("stock.total.captured", &self.stock.total.captured);
        f("stock.competed.all", &self.stock.competed.all);
        f("stock.competed.captured", &self.stock.competed.captured);
        for (label, q) in [
            ("energy", &self.energy),
            ("carbon", &self.carbon),
            ("cost.stock", &self.cost.stock),
            ("cost.energy", &self.cost.energy),
            ("cost.carbon", &self.cost.carbon),
        ] {
            f(&format!("{label}.total.baseline"), &q.total.baseline);
            f(&format!("{label}.total.efficient"), &q.total.efficient);
            f(&format!("{label}.competed.baseline"), &q.competed.baseline);
            f(&format!("{label}.competed.efficient"), &q.competed.efficient);
        }
        f("lifetime.baseline", &self.lifetime.baseline);
    }

    /// Check year coverage over the horizon and per-year sample-length
    /// consistency across all series in the record.
    pub fn validate(
        &self,
        years: impl Iterator<Item = Year> + Clone,
        context: &str,
    ) -> Result<(), EngineError> {
        let mut failure: Option<EngineError> = None;
        let mut lengths: BTreeMap<Year, usize> = BTreeMap::new();
        self.for_each_series(|label, series| {
            if failure.is_some() {
                return;
            }
            for year in years.clone() {
                let Some(value) = series.get(year) else {
                    failure = Some(EngineError::MissingYear {
                        year,
                        context: format!("{context}.{label}"),
                    });
                    return;
                };
                if let Some(len) = value.len() {
                    let expected = *lengths.entry(year).or_insert(len);
                    if expected != len {
                        failure = Some(EngineError::SampleLength {
                            context: format!("{context}.{label} ({year})"),
                            left: expected,
                            right: len,
                        });
                        return;
                    }
                }
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Baseline/efficient/savings energy broken out by reporting category:
/// climate zone -> building class -> end-use category -> year series.
pub type BreakoutTree = BTreeMap<String, BTreeMap<String, BTreeMap<String, YearSeries>>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputBreakouts {
    pub baseline: BreakoutTree,
    pub efficient: BreakoutTree,
    pub savings: BreakoutTree,
}

/// Resolved breakout categories for one contributing microsegment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakoutPath {
    pub climate: String,
    pub building: String,
    pub end_use: String,
}

impl OutputBreakouts {
    /// Mutable references to the baseline/efficient/savings slots for one
    /// breakout path, or `None` when any slot is absent.
    pub fn slots_mut(
        &mut self,
        path: &BreakoutPath,
    ) -> Option<(&mut YearSeries, &mut YearSeries, &mut YearSeries)> {
        fn slot<'a>(tree: &'a mut BreakoutTree, path: &BreakoutPath) -> Option<&'a mut YearSeries> {
            tree.get_mut(&path.climate)?
                .get_mut(&path.building)?
                .get_mut(&path.end_use)
        }
        let Self {
            baseline,
            efficient,
            savings,
        } = self;
        Some((slot(baseline, path)?, slot(efficient, path)?, slot(savings, path)?))
    }
}
