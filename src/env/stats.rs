//! Episode statistics
//!
//! Per-instance accumulators and the bounded history of completed episodes
//! used for rolling-window reporting.

use std::{collections::VecDeque, time::Duration, time::Instant};

use serde::{Deserialize, Serialize};

/// Default number of completed episodes kept per instance
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Running totals of the current episode
#[derive(Debug, Clone)]
pub struct EpisodeAccumulator {
    /// Cumulative reward for each agent
    pub reward_sum: Vec<f64>,

    /// Steps taken since the last reset
    pub step_count: usize,

    /// When the episode started
    pub start_time: Instant,
}

impl EpisodeAccumulator {
    /// Create a zeroed accumulator for `num_agents` agents
    pub fn new(num_agents: usize) -> Self {
        Self { reward_sum: vec![0.0; num_agents], step_count: 0, start_time: Instant::now() }
    }

    /// Zero every counter and restart the clock
    pub fn clear(&mut self) {
        self.reward_sum.iter_mut().for_each(|r| *r = 0.0);
        self.step_count = 0;
        self.start_time = Instant::now();
    }

    /// Add one step worth of rewards
    pub fn record(&mut self, rewards: &[f32]) {
        for (sum, &reward) in self.reward_sum.iter_mut().zip(rewards) {
            *sum += reward as f64;
        }
        self.step_count += 1;
    }

    /// Snapshot the current totals as a finished episode
    pub fn finish(&self, truncated: bool) -> EpisodeRecord {
        EpisodeRecord {
            rewards: self.reward_sum.clone(),
            length: self.step_count,
            duration: self.start_time.elapsed(),
            truncated,
        }
    }
}

/// Summary of one completed episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    /// Cumulative reward for each agent
    pub rewards: Vec<f64>,

    /// Number of steps in the episode
    pub length: usize,

    /// Wall-clock time from reset to the final step
    pub duration: Duration,

    /// Episode was cut off rather than terminated naturally
    pub truncated: bool,
}

impl EpisodeRecord {
    /// Sum of all agents' rewards
    pub fn total_reward(&self) -> f64 {
        self.rewards.iter().sum()
    }
}

/// Bounded history of completed episodes, oldest evicted first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsHistory {
    records: VecDeque<EpisodeRecord>,
    capacity: usize,
}

impl StatisticsHistory {
    /// Create an empty history holding at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        Self { records: VecDeque::with_capacity(capacity), capacity }
    }

    /// Append a record, evicting the oldest one when full
    pub fn push(&mut self, record: EpisodeRecord) {
        if self.capacity == 0 {
            return;
        }
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Merge several histories into one with the given capacity
    ///
    /// Records are taken round-robin from the inputs, oldest first, so the
    /// most recent episodes of every input survive eviction.
    pub fn merge<'a>(
        histories: impl IntoIterator<Item = &'a StatisticsHistory>,
        capacity: usize,
    ) -> StatisticsHistory {
        let mut iters: Vec<_> = histories.into_iter().map(|h| h.records.iter()).collect();
        let mut merged = StatisticsHistory::new(capacity);
        loop {
            let mut any = false;
            for iter in iters.iter_mut() {
                if let Some(record) = iter.next() {
                    merged.push(record.clone());
                    any = true;
                }
            }
            if !any {
                break;
            }
        }
        merged
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no episode has been recorded
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Maximum number of records kept
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterate over records, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &EpisodeRecord> {
        self.records.iter()
    }

    /// Most recent record
    pub fn latest(&self) -> Option<&EpisodeRecord> {
        self.records.back()
    }

    /// Rolling-window averages over the stored records
    pub fn summary(&self) -> Option<HistorySummary> {
        let count = self.records.len();
        if count == 0 {
            return None;
        }

        let num_agents = self.records.iter().map(|r| r.rewards.len()).max().unwrap_or(0);
        let mut mean_rewards = vec![0.0; num_agents];
        let mut total_length = 0usize;
        let mut truncations = 0usize;
        for record in &self.records {
            for (mean, reward) in mean_rewards.iter_mut().zip(&record.rewards) {
                *mean += reward;
            }
            total_length += record.length;
            truncations += record.truncated as usize;
        }
        let n = count as f64;
        mean_rewards.iter_mut().for_each(|m| *m /= n);

        Some(HistorySummary {
            episodes: count,
            mean_total_reward: mean_rewards.iter().sum(),
            mean_rewards,
            mean_length: total_length as f64 / n,
            truncation_rate: truncations as f64 / n,
        })
    }
}

impl Default for StatisticsHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Averages over a window of completed episodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    /// Number of episodes in the window
    pub episodes: usize,

    /// Mean cumulative reward per agent
    pub mean_rewards: Vec<f64>,

    /// Mean of the summed team reward
    pub mean_total_reward: f64,

    /// Mean episode length
    pub mean_length: f64,

    /// Fraction of episodes that were truncated
    pub truncation_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(rewards: Vec<f64>, length: usize) -> EpisodeRecord {
        EpisodeRecord { rewards, length, duration: Duration::ZERO, truncated: false }
    }

    #[test]
    fn test_accumulator_record_and_finish() {
        let mut acc = EpisodeAccumulator::new(2);
        acc.record(&[1.0, 2.0]);
        acc.record(&[0.5, 0.5]);

        let rec = acc.finish(false);
        assert_eq!(rec.rewards, vec![1.5, 2.5]);
        assert_eq!(rec.length, 2);
        assert_eq!(rec.total_reward(), 4.0);

        acc.clear();
        assert_eq!(acc.reward_sum, vec![0.0, 0.0]);
        assert_eq!(acc.step_count, 0);
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = StatisticsHistory::new(2);
        history.push(record(vec![1.0], 1));
        history.push(record(vec![2.0], 2));
        history.push(record(vec![3.0], 3));

        assert_eq!(history.len(), 2);
        let lengths: Vec<usize> = history.iter().map(|r| r.length).collect();
        assert_eq!(lengths, vec![2, 3]);
        assert_eq!(history.latest().unwrap().length, 3);
    }

    #[test]
    fn test_history_zero_capacity_keeps_nothing() {
        let mut history = StatisticsHistory::new(0);
        history.push(record(vec![1.0], 1));
        assert!(history.is_empty());
    }

    #[test]
    fn test_summary() {
        let mut history = StatisticsHistory::new(10);
        assert!(history.summary().is_none());

        history.push(record(vec![1.0, 3.0], 2));
        history.push(EpisodeRecord { truncated: true, ..record(vec![3.0, 5.0], 4) });

        let summary = history.summary().unwrap();
        assert_eq!(summary.episodes, 2);
        assert_eq!(summary.mean_rewards, vec![2.0, 4.0]);
        assert_eq!(summary.mean_total_reward, 6.0);
        assert_eq!(summary.mean_length, 3.0);
        assert_eq!(summary.truncation_rate, 0.5);
    }

    #[test]
    fn test_merge_round_robin_keeps_recent() {
        let mut a = StatisticsHistory::new(10);
        let mut b = StatisticsHistory::new(10);
        for i in 0..3 {
            a.push(record(vec![0.0], i));
            b.push(record(vec![0.0], 10 + i));
        }

        let merged = StatisticsHistory::merge([&a, &b], 4);
        let lengths: Vec<usize> = merged.iter().map(|r| r.length).collect();
        assert_eq!(lengths, vec![1, 11, 2, 12]);
    }
}
