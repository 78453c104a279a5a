//! Queue index navigation
//!
//! Pure functions over `(len, current, repeat, shuffle)`; randomness is
//! injected so callers and tests control it.

use rand::Rng;

use crate::types::RepeatMode;

/// Index to play after `current`, or `None` to stop
///
/// - empty queue: `None`
/// - no current item: 0
/// - repeat one: `current`
/// - last index: 0 (or a random other index when shuffling) with repeat all,
///   otherwise `None`
/// - otherwise `current + 1` (or a random other index when shuffling)
pub fn next_index<R: Rng + ?Sized>(
    len: usize,
    current: Option<usize>,
    repeat: RepeatMode,
    shuffle: bool,
    rng: &mut R,
) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let Some(current) = current else {
        return Some(0);
    };
    let current = current.min(len - 1);

    if repeat == RepeatMode::One {
        return Some(current);
    }

    if current == len - 1 {
        if repeat != RepeatMode::All {
            return None;
        }
        return Some(if shuffle {
            random_other(len, current, rng)
        } else {
            0
        });
    }

    Some(if shuffle {
        random_other(len, current, rng)
    } else {
        current + 1
    })
}

/// Index to play before `current`; the mirror of [`next_index`]
///
/// At index 0 it wraps to the last index with repeat all, otherwise stops.
pub fn previous_index<R: Rng + ?Sized>(
    len: usize,
    current: Option<usize>,
    repeat: RepeatMode,
    shuffle: bool,
    rng: &mut R,
) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let Some(current) = current else {
        return Some(0);
    };
    let current = current.min(len - 1);

    if repeat == RepeatMode::One {
        return Some(current);
    }

    if current == 0 {
        if repeat != RepeatMode::All {
            return None;
        }
        return Some(if shuffle {
            random_other(len, current, rng)
        } else {
            len - 1
        });
    }

    Some(if shuffle {
        random_other(len, current, rng)
    } else {
        current - 1
    })
}

/// Uniform pick from `0..len` excluding `current`; 0 when nothing else exists
pub fn random_other<R: Rng + ?Sized>(len: usize, current: usize, rng: &mut R) -> usize {
    if len <= 1 {
        return 0;
    }
    let pick = rng.gen_range(0..len - 1);
    if pick >= current {
        pick + 1
    } else {
        pick
    }
}

/// Current index after removing `removed` from a list of `len_before` items
///
/// When the current item itself is removed, `successor` (computed on the old
/// list with the queue's policy) decides the new current item.
pub fn index_after_removal(
    len_before: usize,
    current: Option<usize>,
    removed: usize,
    successor: Option<usize>,
) -> Option<usize> {
    let len_after = len_before.saturating_sub(1);
    if len_after == 0 {
        return None;
    }
    let current = current?;

    let shifted = |index: usize| if index > removed { index - 1 } else { index };

    if current != removed {
        return Some(shifted(current));
    }

    match successor {
        None => None,
        // Repeat-one picks the removed item itself; the item that slid into
        // its place takes over.
        Some(next) if next == removed => (removed < len_after).then_some(removed),
        Some(next) => Some(shifted(next)),
    }
}

/// Current index after moving the item at `from` to `to`
pub fn index_after_move(current: Option<usize>, from: usize, to: usize) -> Option<usize> {
    let current = current?;
    Some(if current == from {
        to
    } else if from < current && current <= to {
        current - 1
    } else if to <= current && current < from {
        current + 1
    } else {
        current
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn next_on_empty_queue_is_none() {
        assert_eq!(next_index(0, None, RepeatMode::All, false, &mut rng()), None);
    }

    #[test]
    fn next_without_current_starts_at_zero() {
        assert_eq!(next_index(3, None, RepeatMode::Off, true, &mut rng()), Some(0));
    }

    #[test]
    fn next_wraps_with_repeat_all() {
        assert_eq!(next_index(3, Some(2), RepeatMode::All, false, &mut rng()), Some(0));
    }

    #[test]
    fn next_stops_at_end_without_repeat() {
        assert_eq!(next_index(3, Some(2), RepeatMode::Off, false, &mut rng()), None);
        assert_eq!(next_index(3, Some(1), RepeatMode::Off, false, &mut rng()), Some(2));
    }

    #[test]
    fn repeat_one_stays() {
        assert_eq!(next_index(3, Some(1), RepeatMode::One, true, &mut rng()), Some(1));
        assert_eq!(previous_index(3, Some(1), RepeatMode::One, false, &mut rng()), Some(1));
    }

    #[test]
    fn previous_mirrors_next() {
        assert_eq!(previous_index(3, Some(0), RepeatMode::Off, false, &mut rng()), None);
        assert_eq!(previous_index(3, Some(0), RepeatMode::All, false, &mut rng()), Some(2));
        assert_eq!(previous_index(3, Some(2), RepeatMode::Off, false, &mut rng()), Some(1));
    }

    #[test]
    fn single_item_shuffle_is_deterministic() {
        assert_eq!(next_index(1, Some(0), RepeatMode::All, true, &mut rng()), Some(0));
        assert_eq!(next_index(1, Some(0), RepeatMode::Off, true, &mut rng()), None);
    }

    #[test]
    fn removing_current_moves_to_successor() {
        // [A, B, C], current B removed, successor C (old index 2) -> new index 1
        assert_eq!(index_after_removal(3, Some(1), 1, Some(2)), Some(1));
        // current C removed at the end without repeat
        assert_eq!(index_after_removal(3, Some(2), 2, None), None);
        // removal before current shifts it down
        assert_eq!(index_after_removal(3, Some(2), 0, None), Some(1));
        // last item removed
        assert_eq!(index_after_removal(1, Some(0), 0, Some(0)), None);
    }

    #[test]
    fn move_tracks_current_item() {
        assert_eq!(index_after_move(Some(0), 0, 2), Some(2));
        assert_eq!(index_after_move(Some(1), 0, 2), Some(0));
        assert_eq!(index_after_move(Some(1), 2, 0), Some(2));
        assert_eq!(index_after_move(Some(2), 0, 1), Some(2));
        assert_eq!(index_after_move(None, 0, 1), None);
    }
}
