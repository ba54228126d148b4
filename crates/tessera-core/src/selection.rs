//! Task selection: turning specification strings into catalog positions.
//!
//! A run names its tasks with zero or more specifiers, each in one of
//! three mutually exclusive grammars:
//!
//! 1. **Explicit key**: any field-order permutation accepted by
//!    [`TaskKey::from_str`], e.g. `2016--P1Y/x+003/y-004` or `x+3,y-4,2016--P1Y`
//! 2. **Index**: a single non-negative integer, a zero-based catalog
//!    position
//! 3. **Slice**: `start:stop:step` with every component optional and
//!    negative indices counting from the end, matching standard slicing
//!    semantics (`::10` yields positions 0, 10, 20, ...)
//!
//! Specifiers concatenate in the order given, without deduplication,
//! since re-running a task is a valid use case. No specifiers selects the
//! whole catalog in catalog order.

use std::fmt;
use std::str::FromStr;

use crate::catalog::TaskCatalog;
use crate::error::{Error, Result};
use crate::task_key::TaskKey;

/// A `start:stop:step` slice over catalog positions.
///
/// Components are stored unresolved; negative values count from the end of
/// the catalog at resolution time. Only positive steps are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceSpec {
    /// First position, defaulting to 0.
    pub start: Option<i64>,
    /// One past the last position, defaulting to the catalog size.
    pub stop: Option<i64>,
    /// Stride, defaulting to 1.
    pub step: Option<i64>,
}

impl SliceSpec {
    /// Clamps a possibly negative index to `0..=len`.
    fn resolve_bound(bound: i64, len: usize) -> usize {
        let len = i64::try_from(len).unwrap_or(i64::MAX);
        let resolved = if bound < 0 { len + bound } else { bound };
        usize::try_from(resolved.clamp(0, len)).unwrap_or(0)
    }

    /// Expands the slice against a catalog of `len` tasks.
    #[must_use]
    pub fn positions(&self, len: usize) -> Vec<usize> {
        let start = Self::resolve_bound(self.start.unwrap_or(0), len);
        let stop = Self::resolve_bound(self.stop.unwrap_or(i64::MAX), len);
        let step = usize::try_from(self.step.unwrap_or(1)).unwrap_or(1).max(1);
        (start..stop).step_by(step).collect()
    }
}

impl FromStr for SliceSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(Error::parse(s, "expected start:stop or start:stop:step"));
        }
        let component = |part: &str| -> Result<Option<i64>> {
            if part.is_empty() {
                return Ok(None);
            }
            part.parse()
                .map(Some)
                .map_err(|_| Error::parse(s, format!("invalid slice component '{part}'")))
        };
        let step = parts.get(2).map_or(Ok(None), |p| component(p))?;
        if matches!(step, Some(v) if v < 1) {
            return Err(Error::parse(s, "slice step must be >= 1"));
        }
        Ok(Self {
            start: component(parts[0])?,
            stop: component(parts[1])?,
            step,
        })
    }
}

/// One parsed task specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSpecifier {
    /// An explicit task key, resolved through the catalog index.
    Key(TaskKey),
    /// A zero-based catalog position.
    Index(usize),
    /// A slice of catalog positions.
    Slice(SliceSpec),
}

impl TaskSpecifier {
    /// Resolves the specifier to concrete catalog positions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskNotFound`] for an absent key and
    /// [`Error::IndexOutOfRange`] for an index beyond the catalog.
    /// Slices never fail: positions outside the catalog are simply not
    /// produced.
    pub fn resolve(&self, catalog: &TaskCatalog) -> Result<Vec<usize>> {
        match self {
            Self::Key(key) => catalog
                .position_of(key)
                .map(|position| vec![position])
                .ok_or_else(|| Error::TaskNotFound {
                    key: key.to_string(),
                }),
            Self::Index(index) => {
                if *index < catalog.len() {
                    Ok(vec![*index])
                } else {
                    Err(Error::IndexOutOfRange {
                        index: *index,
                        len: catalog.len(),
                    })
                }
            }
            Self::Slice(slice) => Ok(slice.positions(catalog.len())),
        }
    }
}

impl fmt::Display for TaskSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => write!(f, "{key}"),
            Self::Index(index) => write!(f, "{index}"),
            Self::Slice(slice) => {
                let part = |v: &Option<i64>| v.map(|n| n.to_string()).unwrap_or_default();
                write!(f, "{}:{}", part(&slice.start), part(&slice.stop))?;
                if let Some(step) = slice.step {
                    write!(f, ":{step}")?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for TaskSpecifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.contains(':') {
            return s.parse().map(Self::Slice);
        }
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            let index = s
                .parse()
                .map_err(|_| Error::parse(s, "index does not fit in usize"))?;
            return Ok(Self::Index(index));
        }
        s.parse().map(Self::Key)
    }
}

/// The result of resolving a batch of specifiers.
///
/// A bad specifier is fatal for that selection only: the remaining
/// specifiers still resolve, and the rejection is reported alongside them.
#[derive(Debug)]
pub struct SelectionOutcome {
    /// Concatenated catalog positions, in specifier order, duplicates
    /// preserved.
    pub positions: Vec<usize>,
    /// Specifiers that failed to parse or resolve, with their errors.
    pub rejected: Vec<(String, Error)>,
}

impl SelectionOutcome {
    /// Returns true if every specifier resolved.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Resolves task specifiers against a catalog.
///
/// With no specifiers, selects the entire catalog in catalog order.
#[must_use]
pub fn resolve<S: AsRef<str>>(specs: &[S], catalog: &TaskCatalog) -> SelectionOutcome {
    if specs.is_empty() {
        return SelectionOutcome {
            positions: (0..catalog.len()).collect(),
            rejected: Vec::new(),
        };
    }

    let mut positions = Vec::new();
    let mut rejected = Vec::new();
    for spec in specs {
        let spec = spec.as_ref();
        match spec.parse::<TaskSpecifier>().and_then(|s| s.resolve(catalog)) {
            Ok(resolved) => positions.extend(resolved),
            Err(err) => rejected.push((spec.to_string(), err)),
        }
    }
    SelectionOutcome {
        positions,
        rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetGroup;
    use crate::task_key::Period;

    fn catalog(n: usize) -> TaskCatalog {
        TaskCatalog::build((0..n).map(|i| DatasetGroup {
            key: TaskKey::new(
                Period::new("2016--P1Y").unwrap(),
                i32::try_from(i).unwrap(),
                0,
            ),
            datasets: vec![],
        }))
    }

    fn resolve_one(spec: &str, catalog: &TaskCatalog) -> Result<Vec<usize>> {
        spec.parse::<TaskSpecifier>()?.resolve(catalog)
    }

    #[test]
    fn specifier_grammar_dispatch() {
        assert!(matches!(
            "3".parse::<TaskSpecifier>().unwrap(),
            TaskSpecifier::Index(3)
        ));
        assert!(matches!(
            "::10".parse::<TaskSpecifier>().unwrap(),
            TaskSpecifier::Slice(_)
        ));
        assert!(matches!(
            "2016--P1Y/x+003/y-004".parse::<TaskSpecifier>().unwrap(),
            TaskSpecifier::Key(_)
        ));
    }

    #[test]
    fn explicit_key_resolves_via_index() {
        let catalog = catalog(5);
        assert_eq!(
            resolve_one("2016--P1Y/x+002/y+000", &catalog).unwrap(),
            vec![2]
        );
        // Non-canonical spellings resolve to the same position.
        assert_eq!(resolve_one("x+2,y+0,2016--P1Y", &catalog).unwrap(), vec![2]);
    }

    #[test]
    fn missing_key_is_task_not_found() {
        let catalog = catalog(2);
        let err = resolve_one("2016--P1Y/x+009/y+000", &catalog).unwrap_err();
        assert!(matches!(err, Error::TaskNotFound { .. }));
    }

    #[test]
    fn index_out_of_range() {
        let catalog = catalog(2);
        assert_eq!(resolve_one("1", &catalog).unwrap(), vec![1]);
        let err = resolve_one("2", &catalog).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { index: 2, len: 2 }));
    }

    #[test]
    fn slice_defaults_and_stride() {
        let catalog = catalog(25);
        assert_eq!(
            resolve_one("::10", &catalog).unwrap(),
            vec![0, 10, 20]
        );
        assert_eq!(
            resolve_one("1::10", &catalog).unwrap(),
            vec![1, 11, 21]
        );
        assert_eq!(resolve_one(":3", &catalog).unwrap(), vec![0, 1, 2]);
        // Stop beyond the catalog is clamped, not an error.
        assert_eq!(resolve_one(":100", &catalog).unwrap().len(), 25);
    }

    #[test]
    fn slice_negative_indices_count_from_end() {
        let catalog = catalog(10);
        assert_eq!(resolve_one("-2:", &catalog).unwrap(), vec![8, 9]);
        assert_eq!(
            resolve_one(":-7", &catalog).unwrap(),
            vec![0, 1, 2]
        );
        // More negative than the catalog is long clamps to the start.
        assert_eq!(resolve_one("-99:2", &catalog).unwrap(), vec![0, 1]);
    }

    #[test]
    fn slice_on_small_catalog() {
        let catalog = catalog(3);
        assert_eq!(resolve_one("1::10", &catalog).unwrap(), vec![1]);
    }

    #[test]
    fn slice_rejects_bad_steps() {
        assert!("::0".parse::<SliceSpec>().is_err());
        assert!("::-1".parse::<SliceSpec>().is_err());
        assert!("a:b".parse::<SliceSpec>().is_err());
        assert!("1:2:3:4".parse::<SliceSpec>().is_err());
    }

    #[test]
    fn empty_selection_is_whole_catalog() {
        let catalog = catalog(4);
        let outcome = resolve::<&str>(&[], &catalog);
        assert!(outcome.is_clean());
        assert_eq!(outcome.positions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn specifiers_concatenate_with_duplicates() {
        let catalog = catalog(3);
        let outcome = resolve(&["0", "1", "2", "1"], &catalog);
        assert!(outcome.is_clean());
        assert_eq!(outcome.positions, vec![0, 1, 2, 1]);
    }

    #[test]
    fn bad_specifier_does_not_abort_the_batch() {
        let catalog = catalog(3);
        let outcome = resolve(&["0", "99", "1"], &catalog);
        assert_eq!(outcome.positions, vec![0, 1]);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].0, "99");
    }
}
