use rand::seq::SliceRandom;
use std::time::Duration;

use crate::config::QuestionSelection;
use crate::models::WorkItem;

/// Plans when each work item becomes due.
///
/// Burst mode (no spread window) makes every item due at run start. With a
/// spread window `D`, item `i` of `N` is due at `D * i / N`, a deterministic
/// uniform arrival rate over `[0, D)`. The scheduler never sleeps itself.
pub struct RequestScheduler;

impl RequestScheduler {
    /// Dispatch offsets from run start, one per item, non-decreasing
    pub fn plan(count: usize, spread_window: Option<Duration>) -> Vec<Duration> {
        match spread_window {
            None => vec![Duration::ZERO; count],
            Some(window) => {
                let total = window.as_nanos();
                (0..count)
                    .map(|i| {
                        let nanos = total * i as u128 / count as u128;
                        Duration::from_nanos(nanos as u64)
                    })
                    .collect()
            }
        }
    }

    /// Plan a run and attach a payload to every slot.
    ///
    /// Payloads are cycled in order, or drawn at random with
    /// [`QuestionSelection::Sample`]. Empty payload lists yield no items.
    pub fn schedule(
        count: usize,
        spread_window: Option<Duration>,
        questions: &[String],
        selection: QuestionSelection,
    ) -> Vec<WorkItem> {
        if questions.is_empty() {
            return Vec::new();
        }

        let mut rng = rand::thread_rng();
        Self::plan(count, spread_window)
            .into_iter()
            .enumerate()
            .map(|(id, offset)| {
                let query = match selection {
                    QuestionSelection::Cycle => &questions[id % questions.len()],
                    QuestionSelection::Sample => questions.choose(&mut rng).unwrap_or(&questions[0]),
                };
                WorkItem::new(id, query.clone(), offset)
            })
            .collect()
    }
}
