//! Stable task identity derived from a spatial tile and a time period.
//!
//! A [`TaskKey`] names one unit of work: the reduction of every dataset
//! that touches one grid tile during one period. Keys have a canonical
//! string form, `period/x+NNN/y-NNN`, used in catalog files, queue
//! payloads, and output paths. Parsing accepts the three fields in any
//! order, separated by `/` or `,`, and always reproduces the exact tuple
//! that produced the string.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A time-period label, e.g. `2016--P1Y` or `2016-03--P3M`.
///
/// The label is treated as opaque beyond validation: it must be non-empty,
/// contain no whitespace or field separators, and must not be confusable
/// with a tile-coordinate field (`x`/`y` followed by an optional sign and
/// digits). Periods order lexicographically, which for the date-prefixed
/// labels used here coincides with chronological order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period(String);

impl Period {
    /// Creates a validated period label.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the label is empty, contains whitespace
    /// or a field separator, or would parse as a tile coordinate.
    pub fn new(label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        if label.is_empty() {
            return Err(Error::parse(label, "period label cannot be empty"));
        }
        if label.chars().any(char::is_whitespace) {
            return Err(Error::parse(label, "period label cannot contain whitespace"));
        }
        if label.contains('/') || label.contains(',') {
            return Err(Error::parse(label, "period label cannot contain '/' or ','"));
        }
        if parse_coordinate(&label).is_some() || parse_bare_integer(&label).is_some() {
            return Err(Error::parse(
                label,
                "period label is ambiguous with a tile coordinate",
            ));
        }
        Ok(Self(label))
    }

    /// Returns the label as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Period {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.0
    }
}

/// Identity of one unit of spatial-tile × time-period work.
///
/// Immutable once created. The total order is `(period, tile_y, tile_x)`,
/// which fixes the enumeration order of catalogs and makes index- and
/// slice-based task addressing reproducible across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskKey {
    /// The time period this task covers.
    pub period: Period,
    /// Tile column in the fixed grid coordinate system.
    pub tile_x: i32,
    /// Tile row in the fixed grid coordinate system.
    pub tile_y: i32,
}

impl TaskKey {
    /// Creates a new task key.
    #[must_use]
    pub const fn new(period: Period, tile_x: i32, tile_y: i32) -> Self {
        Self {
            period,
            tile_x,
            tile_y,
        }
    }

    /// Returns the canonical string form, `period/x+NNN/y-NNN`.
    ///
    /// Signs are always explicit and coordinates are zero-padded to three
    /// digits. Parsing a canonical string reproduces the exact tuple, and
    /// re-serializing yields the identical string.
    #[must_use]
    pub fn canonical_string(&self) -> String {
        format!(
            "{}/x{:+04}/y{:+04}",
            self.period, self.tile_x, self.tile_y
        )
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_string())
    }
}

impl PartialOrd for TaskKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TaskKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.period
            .cmp(&other.period)
            .then_with(|| self.tile_y.cmp(&other.tile_y))
            .then_with(|| self.tile_x.cmp(&other.tile_x))
    }
}

impl From<TaskKey> for String {
    fn from(key: TaskKey) -> Self {
        key.canonical_string()
    }
}

impl TryFrom<String> for TaskKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// A coordinate axis within a task key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    X,
    Y,
}

/// Parses an axis-prefixed coordinate field like `x+003` or `y-4`.
///
/// The sign is optional; a bare `x3` reads as `x+3`.
fn parse_coordinate(field: &str) -> Option<(Axis, i32)> {
    let rest = field.strip_prefix(['x', 'y'])?;
    let axis = if field.starts_with('x') { Axis::X } else { Axis::Y };
    let value = parse_bare_integer(rest)?;
    Some((axis, value))
}

/// Parses an optionally signed integer with at least one digit.
fn parse_bare_integer(field: &str) -> Option<i32> {
    let digits = field.strip_prefix(['+', '-']).unwrap_or(field);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

impl FromStr for TaskKey {
    type Err = Error;

    /// Parses a task key from any field-order permutation.
    ///
    /// Accepted grammars (separated by `/` or `,`):
    /// - `period/x+NNN/y-NNN` (canonical)
    /// - `x+NNN/y-NNN/period`, `y-NNN,period,x+NNN`, and so on
    /// - `period,X,Y` with bare integers assigned positionally (first bare
    ///   integer is the column, second the row)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] on a field count other than three, a
    /// non-integer coordinate, a duplicated axis, or a missing period.
    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split(['/', ',']).collect();
        if fields.len() != 3 {
            return Err(Error::parse(
                s,
                format!("expected 3 fields (period, x, y), got {}", fields.len()),
            ));
        }

        let mut tile_x: Option<i32> = None;
        let mut tile_y: Option<i32> = None;
        let mut period: Option<Period> = None;
        let mut bare: Vec<i32> = Vec::new();

        for field in fields {
            if let Some((axis, value)) = parse_coordinate(field) {
                let slot = match axis {
                    Axis::X => &mut tile_x,
                    Axis::Y => &mut tile_y,
                };
                if slot.is_some() {
                    return Err(Error::parse(s, format!("duplicate field '{field}'")));
                }
                *slot = Some(value);
            } else if let Some(value) = parse_bare_integer(field) {
                bare.push(value);
            } else if period.is_some() {
                return Err(Error::parse(s, format!("duplicate period field '{field}'")));
            } else {
                period = Some(Period::new(field)?);
            }
        }

        // Bare integers fill the unclaimed axes in column-then-row order.
        let mut bare = bare.into_iter();
        if tile_x.is_none() {
            tile_x = bare.next();
        }
        if tile_y.is_none() {
            tile_y = bare.next();
        }
        if bare.next().is_some() {
            return Err(Error::parse(s, "more coordinate fields than axes"));
        }

        match (period, tile_x, tile_y) {
            (Some(period), Some(tile_x), Some(tile_y)) => Ok(Self {
                period,
                tile_x,
                tile_y,
            }),
            (None, ..) => Err(Error::parse(s, "missing period field")),
            _ => Err(Error::parse(s, "missing tile coordinate field")),
        }
    }
}
