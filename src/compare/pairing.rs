use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::ConfigError;

use super::CompareEntry;

/// How base and target entries are matched up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingStrategy {
    /// Each base entry against every target entry it lists in `targets`,
    /// or with the same scenario name when it lists none.
    OneToMany,
    /// `base[i]` against `target[i]`.
    PairByIndex,
    /// Entries sharing `field=value` are paired in order within the bucket.
    GroupByField { field: String },
}

impl PairingStrategy {
    /// Parse a `mode` string. `group_by_field` needs `group_field`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown mode, or `group_by_field` without a
    /// field name.
    pub fn parse(mode: &str, group_field: Option<&str>) -> Result<Self, ConfigError> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "" | "one_to_many" | "one-to-many" => Ok(PairingStrategy::OneToMany),
            "pair_by_index" | "pair-by-index" => Ok(PairingStrategy::PairByIndex),
            "group_by_field" | "group-by-field" => {
                let field = group_field
                    .map(str::trim)
                    .filter(|field| !field.is_empty())
                    .ok_or(ConfigError::GroupFieldRequired)?;
                Ok(PairingStrategy::GroupByField {
                    field: field.to_owned(),
                })
            }
            _ => Err(ConfigError::UnknownPairingMode {
                mode: mode.to_owned(),
            }),
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            PairingStrategy::OneToMany => "one_to_many",
            PairingStrategy::PairByIndex => "pair_by_index",
            PairingStrategy::GroupByField { .. } => "group_by_field",
        }
    }

    /// Match base entries with target entries. Anything left over is
    /// reported in [`Pairing::unpaired`].
    #[must_use]
    pub fn pair(&self, base: &[CompareEntry], target: &[CompareEntry]) -> Pairing {
        match self {
            PairingStrategy::OneToMany => pair_one_to_many(base, target),
            PairingStrategy::PairByIndex => pair_by_index(base, target),
            PairingStrategy::GroupByField { field } => pair_by_field(field, base, target),
        }
    }
}

impl fmt::Display for PairingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairingStrategy::GroupByField { field } => write!(f, "group_by_field({})", field),
            PairingStrategy::OneToMany | PairingStrategy::PairByIndex => f.write_str(self.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PairLabel(String);

impl PairLabel {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PairLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Base,
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Base => f.write_str("base"),
            Side::Target => f.write_str("target"),
        }
    }
}

/// Positions into the base and target entry lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPair {
    pub label: PairLabel,
    pub base: usize,
    pub target: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnpairedEntry {
    pub side: Side,
    pub name: String,
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pairing {
    pub pairs: Vec<EntryPair>,
    pub unpaired: Vec<UnpairedEntry>,
}

impl Pairing {
    fn unpaired(&mut self, side: Side, entry: &CompareEntry, reason: String) {
        self.unpaired.push(UnpairedEntry {
            side,
            name: entry.name.clone(),
            index: entry.index,
            reason,
        });
    }
}

fn pair_one_to_many(base: &[CompareEntry], target: &[CompareEntry]) -> Pairing {
    let mut pairing = Pairing::default();
    let mut target_used = vec![false; target.len()];

    for (base_pos, base_entry) in base.iter().enumerate() {
        let mut matched = false;
        for (target_pos, target_entry) in target.iter().enumerate() {
            let wanted = if base_entry.targets.is_empty() {
                target_entry.name == base_entry.name
            } else {
                base_entry.targets.contains(&target_entry.name)
            };
            if !wanted {
                continue;
            }
            matched = true;
            if let Some(used) = target_used.get_mut(target_pos) {
                *used = true;
            }
            pairing.pairs.push(EntryPair {
                label: PairLabel(format!("{} vs {}", base_entry.name, target_entry.name)),
                base: base_pos,
                target: target_pos,
            });
        }
        if !matched {
            let reason = if base_entry.targets.is_empty() {
                format!("no target entry named '{}'", base_entry.name)
            } else {
                format!("no target entry among [{}]", base_entry.targets.join(", "))
            };
            pairing.unpaired(Side::Base, base_entry, reason);
        }
    }

    for (target_pos, target_entry) in target.iter().enumerate() {
        if !target_used.get(target_pos).copied().unwrap_or(false) {
            pairing.unpaired(
                Side::Target,
                target_entry,
                format!("no base entry for '{}'", target_entry.name),
            );
        }
    }
    pairing
}

fn pair_by_index(base: &[CompareEntry], target: &[CompareEntry]) -> Pairing {
    let mut pairing = Pairing::default();
    for (position, (base_entry, target_entry)) in base.iter().zip(target).enumerate() {
        pairing.pairs.push(EntryPair {
            label: PairLabel(format!(
                "#{} {} vs {}",
                position, base_entry.name, target_entry.name
            )),
            base: position,
            target: position,
        });
    }
    for (position, entry) in base.iter().enumerate().skip(target.len()) {
        pairing.unpaired(Side::Base, entry, format!("no target entry at index {}", position));
    }
    for (position, entry) in target.iter().enumerate().skip(base.len()) {
        pairing.unpaired(Side::Target, entry, format!("no base entry at index {}", position));
    }
    pairing
}

fn pair_by_field(field: &str, base: &[CompareEntry], target: &[CompareEntry]) -> Pairing {
    let mut pairing = Pairing::default();
    let mut buckets: BTreeMap<String, (Vec<usize>, Vec<usize>)> = BTreeMap::new();

    for (side, entries) in [(Side::Base, base), (Side::Target, target)] {
        for (position, entry) in entries.iter().enumerate() {
            let Some(value) = entry.fields.get(field) else {
                pairing.unpaired(side, entry, format!("missing field '{}'", field));
                continue;
            };
            let bucket = buckets.entry(format!("{}={}", field, value)).or_default();
            match side {
                Side::Base => bucket.0.push(position),
                Side::Target => bucket.1.push(position),
            }
        }
    }

    for (key, (base_positions, target_positions)) in buckets {
        for (&base_pos, &target_pos) in base_positions.iter().zip(&target_positions) {
            let (Some(base_entry), Some(target_entry)) = (base.get(base_pos), target.get(target_pos))
            else {
                continue;
            };
            pairing.pairs.push(EntryPair {
                label: PairLabel(format!(
                    "{} vs {} ({})",
                    base_entry.name, target_entry.name, key
                )),
                base: base_pos,
                target: target_pos,
            });
        }
        for &position in base_positions.iter().skip(target_positions.len()) {
            if let Some(entry) = base.get(position) {
                pairing.unpaired(Side::Base, entry, format!("no target entry in {}", key));
            }
        }
        for &position in target_positions.iter().skip(base_positions.len()) {
            if let Some(entry) = target.get(position) {
                pairing.unpaired(Side::Target, entry, format!("no base entry in {}", key));
            }
        }
    }
    pairing
}
