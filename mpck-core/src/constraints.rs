// mpck-core/src/constraints.rs
//! Pairwise constraint storage
//!
//! Holds must-link / cannot-link pairs in canonical form (smaller index first)
//! with two lookup paths:
//! - pair -> constraint, for O(1) "is this pair constrained?" queries
//! - instance -> constraints, for O(degree) scans during assignment and
//!   metric learning
//!
//! The store only grows. Conflicting re-insertion of a pair with the opposite
//! link type keeps the first entry and logs a warning.

use std::collections::HashMap;
use std::fmt;

use log::{trace, warn};
use serde::{Deserialize, Serialize};

/// Type of a pairwise constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkType {
    /// The two instances must end up in the same cluster
    MustLink,
    /// The two instances must end up in different clusters
    CannotLink,
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkType::MustLink => write!(f, "must-link"),
            LinkType::CannotLink => write!(f, "cannot-link"),
        }
    }
}

/// A canonicalized constraint: `first < second` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub first: usize,
    pub second: usize,
    pub link: LinkType,
    /// Cost of violating this constraint
    pub weight: f64,
}

impl Constraint {
    /// Index of the endpoint that is not `idx`.
    ///
    /// Callers only pass one of the two endpoints.
    #[inline]
    pub fn other(&self, idx: usize) -> usize {
        if self.first == idx {
            self.second
        } else {
            self.first
        }
    }

    #[inline]
    pub fn pair(&self) -> (usize, usize) {
        (self.first, self.second)
    }

    /// Whether the constraint is violated for the given cluster ids.
    /// Unassigned endpoints (`None`) never violate anything.
    #[inline]
    pub fn is_violated(&self, a: Option<usize>, b: Option<usize>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => match self.link {
                LinkType::MustLink => a != b,
                LinkType::CannotLink => a == b,
            },
            _ => false,
        }
    }
}

/// Result of an insertion attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Insertion {
    /// New pair stored
    Inserted,
    /// Same pair with the same link type already present; nothing changed
    Duplicate,
    /// Same pair with the opposite link type already present; the existing
    /// entry is kept
    Conflict { existing: LinkType },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintError {
    SelfPair(usize),
    InvalidWeight(f64),
}

impl fmt::Display for ConstraintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintError::SelfPair(i) => {
                write!(f, "Constraint between instance {} and itself", i)
            }
            ConstraintError::InvalidWeight(w) => {
                write!(f, "Constraint weight must be finite and >= 0, got {}", w)
            }
        }
    }
}

impl std::error::Error for ConstraintError {}

/// Canonical constraint storage with per-instance adjacency.
#[derive(Debug, Clone, Default)]
pub struct ConstraintStore {
    /// Insertion-ordered constraints; iteration order is deterministic
    constraints: Vec<Constraint>,
    /// canonical pair -> position in `constraints`
    by_pair: HashMap<(usize, usize), usize>,
    /// instance -> positions in `constraints`
    by_instance: HashMap<usize, Vec<usize>>,
    must_link_weight: f64,
    cannot_link_weight: f64,
}

impl ConstraintStore {
    pub fn new() -> Self {
        Self::with_default_weights(1.0, 1.0)
    }

    /// Store whose `add` uses the given per-type violation weights.
    pub fn with_default_weights(must_link_weight: f64, cannot_link_weight: f64) -> Self {
        Self {
            constraints: Vec::new(),
            by_pair: HashMap::new(),
            by_instance: HashMap::new(),
            must_link_weight,
            cannot_link_weight,
        }
    }

    pub fn default_weight(&self, link: LinkType) -> f64 {
        match link {
            LinkType::MustLink => self.must_link_weight,
            LinkType::CannotLink => self.cannot_link_weight,
        }
    }

    /// Replace the default weights used by later `add` calls.
    /// Already stored constraints keep their weight.
    pub fn set_default_weights(&mut self, must_link_weight: f64, cannot_link_weight: f64) {
        self.must_link_weight = must_link_weight;
        self.cannot_link_weight = cannot_link_weight;
    }

    /// Add a constraint with the default weight for its type.
    pub fn add(&mut self, i: usize, j: usize, link: LinkType) -> Result<Insertion, ConstraintError> {
        let weight = self.default_weight(link);
        self.add_weighted(i, j, link, weight)
    }

    /// Add a constraint with an explicit violation weight.
    pub fn add_weighted(
        &mut self,
        i: usize,
        j: usize,
        link: LinkType,
        weight: f64,
    ) -> Result<Insertion, ConstraintError> {
        if i == j {
            return Err(ConstraintError::SelfPair(i));
        }
        if !weight.is_finite() || weight < 0.0 {
            return Err(ConstraintError::InvalidWeight(weight));
        }

        let key = canonical(i, j);
        if let Some(&pos) = self.by_pair.get(&key) {
            let existing = self.constraints[pos].link;
            if existing == link {
                trace!("Duplicate {} ({}, {}) ignored", link, key.0, key.1);
                return Ok(Insertion::Duplicate);
            }
            warn!(
                "Conflicting constraint ({}, {}): keeping existing {}, dropping {}",
                key.0, key.1, existing, link
            );
            return Ok(Insertion::Conflict { existing });
        }

        let pos = self.constraints.len();
        self.constraints.push(Constraint {
            first: key.0,
            second: key.1,
            link,
            weight,
        });
        self.by_pair.insert(key, pos);
        self.by_instance.entry(key.0).or_default().push(pos);
        self.by_instance.entry(key.1).or_default().push(pos);
        trace!("Stored {} ({}, {}) weight={}", link, key.0, key.1, weight);

        Ok(Insertion::Inserted)
    }

    /// Link type stored for the pair, in either order.
    pub fn lookup(&self, i: usize, j: usize) -> Option<LinkType> {
        self.get(i, j).map(|c| c.link)
    }

    pub fn get(&self, i: usize, j: usize) -> Option<&Constraint> {
        self.by_pair
            .get(&canonical(i, j))
            .map(|&pos| &self.constraints[pos])
    }

    pub fn contains(&self, i: usize, j: usize) -> bool {
        self.by_pair.contains_key(&canonical(i, j))
    }

    /// Constraints involving instance `i`. Calling again restarts the scan.
    pub fn constraints_of(&self, i: usize) -> impl Iterator<Item = &Constraint> + '_ {
        self.by_instance
            .get(&i)
            .into_iter()
            .flat_map(move |positions| positions.iter().map(move |&p| &self.constraints[p]))
    }

    /// Number of constraints involving instance `i`.
    pub fn degree(&self, i: usize) -> usize {
        self.by_instance.get(&i).map_or(0, Vec::len)
    }

    /// All constraints in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Constraint> + '_ {
        self.constraints.iter()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn count(&self, link: LinkType) -> usize {
        self.constraints.iter().filter(|c| c.link == link).count()
    }

    /// Largest instance index referenced by any constraint.
    pub fn max_index(&self) -> Option<usize> {
        self.constraints.iter().map(|c| c.second).max()
    }
}

#[inline]
fn canonical(i: usize, j: usize) -> (usize, usize) {
    if i < j { (i, j) } else { (j, i) }
}
