//! Merge semantics over delimited values.
//!
//! Everything here is pure: it works on already-split segment lists and
//! decides whether the declared segments are in place, or computes the
//! segment list to write back.
//!
//! Segment comparison folds case, except clobber in present mode, which
//! compares exactly.

use super::{Action, Change};
use crate::resource::{Ensure, EnvResource, MergeMode, ValueKind};
use crate::store::RawValue;

/// Split a stored value into segments. The empty string has no segments.
pub fn split(value: &str, separator: &str) -> Vec<String> {
  if value.is_empty() {
    return Vec::new();
  }
  value.split(separator).map(str::to_string).collect()
}

pub fn join(segments: &[String], separator: &str) -> String {
  segments.join(separator)
}

fn same(a: &str, b: &str) -> bool {
  a == b || a.to_lowercase() == b.to_lowercase()
}

fn all_same(current: &[String], desired: &[String]) -> bool {
  current.len() == desired.len() && current.iter().zip(desired).all(|(c, d)| same(c, d))
}

/// Whether the declared segments are present in `current`.
///
/// `None` means the variable is unset, which never counts as present. For
/// `ensure => absent` this is the condition under which there is something to
/// remove; for `ensure => present` it is the condition for being in sync.
pub fn exists(resource: &EnvResource, current: Option<&[String]>) -> bool {
  let Some(current) = current else {
    return false;
  };
  let desired = resource.segments();

  match resource.comparison_mode() {
    MergeMode::Clobber => match resource.ensure() {
      Ensure::Present => current == desired,
      // Any stored value is enough to warrant deleting the variable.
      Ensure::Absent => true,
    },
    MergeMode::Insert => contains_in_order(current, desired),
    MergeMode::Append => ends_with(current, desired),
    MergeMode::Prepend => starts_with(current, desired),
  }
}

/// Each desired segment occurs in `current`, and the first occurrences are in
/// strictly increasing order.
pub fn contains_in_order(current: &[String], desired: &[String]) -> bool {
  let mut previous: Option<usize> = None;
  for wanted in desired {
    let Some(index) = current.iter().position(|c| same(c, wanted)) else {
      return false;
    };
    if previous.is_some_and(|p| index <= p) {
      return false;
    }
    previous = Some(index);
  }
  true
}

pub fn ends_with(current: &[String], desired: &[String]) -> bool {
  current.len() >= desired.len() && all_same(&current[current.len() - desired.len()..], desired)
}

pub fn starts_with(current: &[String], desired: &[String]) -> bool {
  current.len() >= desired.len() && all_same(&current[..desired.len()], desired)
}

/// `current` without any segment matching a desired segment, order kept.
pub fn remove_matching(current: &[String], desired: &[String]) -> Vec<String> {
  current
    .iter()
    .filter(|c| !desired.iter().any(|d| same(c, d)))
    .cloned()
    .collect()
}

/// Segments to write when making the declared value present.
///
/// Clobber replaces the value. Insert and append move the declared segments
/// to the end; prepend moves them to the front.
pub fn merged(mode: MergeMode, current: &[String], desired: &[String]) -> Vec<String> {
  match mode {
    MergeMode::Clobber => desired.to_vec(),
    MergeMode::Insert | MergeMode::Append => {
      let mut segments = remove_matching(current, desired);
      segments.extend_from_slice(desired);
      segments
    }
    MergeMode::Prepend => {
      let mut segments = desired.to_vec();
      segments.extend(remove_matching(current, desired));
      segments
    }
  }
}

/// Decide what, if anything, has to change for `resource` given the stored
/// value (`None` when unset).
pub fn plan(resource: &EnvResource, current: Option<&RawValue>) -> Option<Change> {
  let separator = resource.separator();
  let desired = resource.segments();
  let segments = current.map(|value| split(&value.data, separator));
  let exists = exists(resource, segments.as_deref());

  match (resource.ensure(), current, segments) {
    (Ensure::Present, None, _) => Some(Change {
      action: Action::Create,
      before: None,
      // Nothing to merge into: write the declared value as is.
      after: Some(RawValue::new(
        resource.value_kind().unwrap_or(ValueKind::Text),
        join(desired, separator),
      )),
    }),
    (Ensure::Present, Some(stored), Some(segments)) if !exists => {
      let merged = merged(resource.merge_mode(), &segments, desired);
      Some(Change {
        action: Action::Create,
        before: Some(stored.clone()),
        after: Some(RawValue::new(
          resource.value_kind().unwrap_or(stored.kind),
          join(&merged, separator),
        )),
      })
    }
    (Ensure::Present, Some(stored), _) => match resource.value_kind() {
      Some(kind) if kind != stored.kind => Some(Change {
        action: Action::SetKind,
        before: Some(stored.clone()),
        after: Some(RawValue::new(kind, stored.data.clone())),
      }),
      _ => None,
    },
    (Ensure::Absent, Some(stored), Some(segments)) if exists => {
      let after = match resource.comparison_mode() {
        MergeMode::Clobber => None,
        _ => Some(RawValue::new(
          stored.kind,
          join(&remove_matching(&segments, desired), separator),
        )),
      };
      Some(Change {
        action: Action::Destroy,
        before: Some(stored.clone()),
        after,
      })
    }
    (Ensure::Absent, _, _) => None,
  }
}
