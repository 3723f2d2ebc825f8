//! Game timeline: an append-only sequence of steps.
//!
//! [`Timeline`] is the single source of truth for what happened in the
//! game, independent of what the board currently displays. It only ever
//! grows by [`Timeline::append`]; the one exception is
//! [`Timeline::replace`], the full-reload path after a suspected missed
//! message window.

use serde::{Deserialize, Serialize};

use crate::domain::square::Uci;
use crate::error::SyncError;

/// One half-move of the game: position after the move plus notation.
///
/// Immutable once appended to a [`Timeline`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Ply number, contiguous within the owning timeline.
    pub ply: u32,
    /// Position after this ply, in FEN.
    pub fen: String,
    /// Standard algebraic notation of the move, absent for the initial
    /// position step.
    #[serde(default)]
    pub san: Option<String>,
    /// UCI encoding of the move, absent for the initial position step.
    #[serde(default)]
    pub uci: Option<Uci>,
    /// Whether the side to move is in check after this ply.
    #[serde(default)]
    pub check: bool,
}

/// Ordered, gap-free sequence of [`Step`]s.
///
/// Invariant: `steps[i].ply == steps[0].ply + i`. Enforced on
/// construction, on every append and on every replace; a violation is
/// fatal to the caller (recover via full reload).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    steps: Vec<Step>,
}

impl Timeline {
    /// Builds a timeline from a snapshot's step list.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MalformedEvent`] for an empty list and
    /// [`SyncError::NonContiguousPly`] when ply numbers have gaps.
    pub fn new(steps: Vec<Step>) -> Result<Self, SyncError> {
        let Some(first) = steps.first() else {
            return Err(SyncError::MalformedEvent(
                "snapshot carries no steps".to_string(),
            ));
        };
        let first_ply = first.ply;
        for (i, step) in steps.iter().enumerate() {
            let expected = first_ply.saturating_add(u32::try_from(i).unwrap_or(u32::MAX));
            if step.ply != expected {
                return Err(SyncError::NonContiguousPly {
                    expected,
                    got: step.ply,
                });
            }
        }
        Ok(Self { steps })
    }

    /// Ply of the first recorded step.
    #[must_use]
    pub fn first_ply(&self) -> u32 {
        self.steps.first().map_or(0, |s| s.ply)
    }

    /// Ply of the last recorded step.
    #[must_use]
    pub fn last_ply(&self) -> u32 {
        self.steps.last().map_or(0, |s| s.ply)
    }

    /// Step at the given ply, or `None` outside `first_ply..=last_ply`.
    #[must_use]
    pub fn step_at(&self, ply: u32) -> Option<&Step> {
        let index = ply.checked_sub(self.first_ply())?;
        self.steps.get(index as usize)
    }

    /// The last recorded step.
    #[must_use]
    pub fn last_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// Number of recorded steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// `true` when the timeline holds no steps. Cannot happen through
    /// the public constructors; kept for the `len`/`is_empty` pair.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Appends a step, enforcing the contiguous-ply invariant.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NonContiguousPly`] if `step.ply` is not
    /// exactly `last_ply() + 1`. The timeline is left untouched; the
    /// caller must resynchronize via a full reload.
    pub fn append(&mut self, step: Step) -> Result<(), SyncError> {
        let expected = self.last_ply().saturating_add(1);
        if step.ply != expected {
            return Err(SyncError::NonContiguousPly {
                expected,
                got: step.ply,
            });
        }
        self.steps.push(step);
        Ok(())
    }

    /// Replaces the whole sequence from a fresh server snapshot.
    ///
    /// # Errors
    ///
    /// Same validation as [`Timeline::new`]; on error the current
    /// sequence is preserved.
    pub fn replace(&mut self, steps: Vec<Step>) -> Result<(), SyncError> {
        *self = Self::new(steps)?;
        Ok(())
    }

    /// Concatenated SAN of every step, used to detect divergence between
    /// a fresh snapshot and the local timeline on reload.
    #[must_use]
    pub fn moves_hash(&self) -> String {
        self.steps
            .iter()
            .filter_map(|s| s.san.as_deref())
            .collect()
    }

    /// Iterates over the recorded steps in order.
    pub fn iter(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn step(ply: u32, san: &str) -> Step {
        Step {
            ply,
            fen: format!("fen-{ply}"),
            san: Some(san.to_string()),
            uci: None,
            check: false,
        }
    }

    fn timeline(first_ply: u32, count: u32) -> Timeline {
        let steps = (0..count).map(|i| step(first_ply + i, "e4")).collect();
        let Ok(tl) = Timeline::new(steps) else {
            panic!("contiguous steps must build");
        };
        tl
    }

    #[test]
    fn rejects_empty_snapshot() {
        assert!(Timeline::new(Vec::new()).is_err());
    }

    #[test]
    fn rejects_gapped_snapshot() {
        let steps = vec![step(3, "e4"), step(5, "e5")];
        let Err(err) = Timeline::new(steps) else {
            panic!("gap must be rejected");
        };
        assert!(err.is_fatal());
    }

    #[test]
    fn contiguity_holds_after_every_append() {
        let mut tl = timeline(10, 1);
        for ply in 11..30 {
            let result = tl.append(step(ply, "Nf3"));
            assert!(result.is_ok());
            let first = tl.first_ply();
            for (i, s) in tl.iter().enumerate() {
                assert_eq!(u64::from(s.ply), u64::from(first) + i as u64);
            }
        }
    }

    #[test]
    fn append_rejects_gap_and_preserves_state() {
        let mut tl = timeline(10, 2);
        let Err(err) = tl.append(step(13, "Qh5")) else {
            panic!("gap must be rejected");
        };
        let SyncError::NonContiguousPly { expected, got } = err else {
            panic!("wrong error kind");
        };
        assert_eq!(expected, 12);
        assert_eq!(got, 13);
        assert_eq!(tl.last_ply(), 11);
        assert_eq!(tl.len(), 2);
    }

    #[test]
    fn append_rejects_duplicate_ply() {
        let mut tl = timeline(10, 2);
        assert!(tl.append(step(11, "Qh5")).is_err());
        assert_eq!(tl.len(), 2);
    }

    #[test]
    fn append_never_reorders_prior_steps() {
        let mut tl = timeline(0, 3);
        let before: Vec<u32> = tl.iter().map(|s| s.ply).collect();
        let result = tl.append(step(3, "d4"));
        assert!(result.is_ok());
        let after: Vec<u32> = tl.iter().take(3).map(|s| s.ply).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn step_at_bounds() {
        let tl = timeline(10, 3);
        assert!(tl.step_at(9).is_none());
        assert!(tl.step_at(13).is_none());
        let Some(s) = tl.step_at(11) else {
            panic!("ply 11 exists");
        };
        assert_eq!(s.ply, 11);
    }

    #[test]
    fn replace_swaps_sequence_wholesale() {
        let mut tl = timeline(0, 5);
        let result = tl.replace(vec![step(2, "e4"), step(3, "c5")]);
        assert!(result.is_ok());
        assert_eq!(tl.first_ply(), 2);
        assert_eq!(tl.last_ply(), 3);
    }

    #[test]
    fn replace_keeps_old_sequence_on_error() {
        let mut tl = timeline(0, 5);
        let result = tl.replace(vec![step(2, "e4"), step(9, "c5")]);
        assert!(result.is_err());
        assert_eq!(tl.first_ply(), 0);
        assert_eq!(tl.len(), 5);
    }

    #[test]
    fn moves_hash_skips_missing_san() {
        let initial = Step {
            ply: 0,
            fen: "start".to_string(),
            san: None,
            uci: None,
            check: false,
        };
        let Ok(mut tl) = Timeline::new(vec![initial]) else {
            panic!("valid timeline");
        };
        let ok = tl.append(step(1, "e4")).is_ok() && tl.append(step(2, "c5")).is_ok();
        assert!(ok);
        assert_eq!(tl.moves_hash(), "e4c5");
    }
}
