//! Experience memory.
//!
//! A ring buffer of committed experience records addressed by absolute,
//! monotonically increasing indices. Absolute index `i` lives at ring
//! slot `i % capacity`; once `i` falls below `oldest()` the record has
//! been overwritten and is no longer addressable. Callers (the learner
//! and the reward estimator) only ever see absolute indices.
use crate::{
    base::{BatchBase, Values},
    config::{MemoryConfig, Retrieval},
    error::VantageError,
};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use std::collections::VecDeque;

/// Ring buffer of committed experience records.
pub struct Memory<S, I, X, A> {
    capacity: usize,
    values: Values<S, I, X, A>,
    /// Absolute index of the next record to commit.
    next: usize,
    size: usize,
    /// `(start, end)` absolute index ranges of completed episodes still
    /// fully resident, oldest first.
    episodes: VecDeque<(usize, usize)>,
    /// Absolute index of the first record of the in-progress episode.
    episode_start: usize,
    retrieval: Retrieval,
    rng: StdRng,
}

impl<S, I, X, A> Memory<S, I, X, A>
where
    S: BatchBase,
    I: BatchBase,
    X: BatchBase,
    A: BatchBase,
{
    /// Builds an empty memory from its configuration.
    pub fn build(config: &MemoryConfig) -> Self {
        Self {
            capacity: config.capacity,
            values: Values::new(config.capacity),
            next: 0,
            size: 0,
            episodes: VecDeque::new(),
            episode_start: 0,
            retrieval: config.retrieval,
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    /// Number of resident records.
    pub fn len(&self) -> usize {
        self.size
    }

    /// True if no record has been committed yet or all were overwritten.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Absolute index of the oldest resident record.
    pub fn oldest(&self) -> usize {
        self.next - self.size
    }

    /// Absolute index of the newest resident record.
    ///
    /// Panics when the memory is empty.
    pub fn latest(&self) -> usize {
        assert!(self.size > 0, "latest() on empty memory");
        self.next - 1
    }

    /// Number of completed episodes still fully resident.
    pub fn num_episodes(&self) -> usize {
        self.episodes.len()
    }

    fn ring(&self, ix: usize) -> usize {
        debug_assert!(ix >= self.oldest() && ix < self.next);
        ix % self.capacity
    }

    /// Commits a batch of records, overwriting the oldest when full.
    pub fn push(&mut self, data: &Values<S, I, X, A>) {
        let n = data.len();
        if n == 0 {
            return;
        }
        self.values.push(self.next, data);
        for k in 0..n {
            let abs = self.next + k;
            if data.terminal[k] != 0 {
                self.episodes.push_back((self.episode_start, abs));
                self.episode_start = abs + 1;
            }
        }
        self.next += n;
        self.size = (self.size + n).min(self.capacity);
        let oldest = self.oldest();
        while matches!(self.episodes.front(), Some(&(start, _)) if start < oldest) {
            self.episodes.pop_front();
        }
    }

    /// Terminal kind of the record at the given absolute index.
    pub fn terminal(&self, ix: usize) -> i8 {
        self.values.terminal[self.ring(ix)]
    }

    /// Reward of the record at the given absolute index.
    pub fn reward(&self, ix: usize) -> f32 {
        self.values.reward[self.ring(ix)]
    }

    /// Gathers the records at the given absolute indices.
    pub fn retrieve(&self, indices: &[usize]) -> Values<S, I, X, A> {
        let ring: Vec<usize> = indices.iter().map(|&ix| self.ring(ix)).collect();
        self.values.sample(&ring)
    }

    /// Selects `n` timestep indices eligible as batch instances.
    ///
    /// Eligible records have at least `past` resident predecessors
    /// available below them and `future` committed successors above
    /// them, so horizon gathers never run off the buffer.
    pub fn retrieve_timesteps(
        &mut self,
        n: usize,
        past: usize,
        future: usize,
    ) -> Result<Vec<usize>, VantageError> {
        if self.size == 0 {
            return Err(VantageError::Precondition(
                "timestep retrieval from empty memory".into(),
            ));
        }
        let low = self.oldest() + past;
        let high = self
            .latest()
            .checked_sub(future)
            .filter(|&high| high >= low)
            .ok_or_else(|| {
                VantageError::Precondition(format!(
                    "no timestep satisfies past horizon {} and future horizon {}",
                    past, future
                ))
            })?;
        match self.retrieval {
            Retrieval::Recent => {
                let first = (high + 1).checked_sub(n).filter(|&first| first >= low).ok_or_else(
                    || {
                        VantageError::Precondition(format!(
                            "recent retrieval of {} timesteps, only {} eligible",
                            n,
                            high - low + 1
                        ))
                    },
                )?;
                Ok((first..=high).collect())
            }
            Retrieval::Uniform => {
                let span = high - low + 1;
                Ok((0..n)
                    .map(|_| low + self.rng.next_u32() as usize % span)
                    .collect())
            }
        }
    }

    /// Selects the timestep indices of the `n` most recent completed
    /// episodes, oldest episode first.
    pub fn retrieve_episodes(&self, n: usize) -> Result<Vec<usize>, VantageError> {
        if self.episodes.len() < n {
            return Err(VantageError::Precondition(format!(
                "episode retrieval of {} episodes, only {} resident",
                n,
                self.episodes.len()
            )));
        }
        let mut indices = Vec::new();
        for &(start, end) in self.episodes.iter().skip(self.episodes.len() - n) {
            indices.extend(start..=end);
        }
        Ok(indices)
    }

    /// Gathers the predecessor windows of the given instances.
    ///
    /// Each window extends backwards from the instance by up to `horizon`
    /// extra timesteps, stopping at the episode start or the oldest
    /// resident record. Returns per-instance `(offset, length)` windows
    /// into the flattened states, the flattened states, and the
    /// window-initial internal states.
    pub fn predecessors(&self, indices: &[usize], horizon: usize) -> (Vec<(usize, usize)>, S, I) {
        let mut horizons = Vec::with_capacity(indices.len());
        let mut window_ixs = Vec::new();
        let mut start_ixs = Vec::with_capacity(indices.len());
        for &ix in indices {
            let lo = self.oldest().max(ix.saturating_sub(horizon));
            let mut start = ix;
            while start > lo && self.terminal(start - 1) == 0 {
                start -= 1;
            }
            horizons.push((window_ixs.len(), ix - start + 1));
            window_ixs.extend((start..=ix).map(|j| self.ring(j)));
            start_ixs.push(self.ring(start));
        }
        (
            horizons,
            self.values.states.sample(&window_ixs),
            self.values.internals.sample(&start_ixs),
        )
    }

    /// Walks forward from each instance by up to `horizon` timesteps,
    /// stopping at a terminal record or the newest committed one.
    /// Returns `(steps, end, end_terminal)` per instance, where `end` is
    /// the absolute index reached and `steps` how far it lies ahead.
    pub fn successors(&self, indices: &[usize], horizon: usize) -> Vec<(usize, usize, i8)> {
        let latest = self.latest();
        indices
            .iter()
            .map(|&ix| {
                let mut end = ix;
                let mut steps = 0;
                while steps < horizon && end < latest && self.terminal(end) == 0 {
                    end += 1;
                    steps += 1;
                }
                (steps, end, self.terminal(end))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dummy::VecBatch;

    type TestMemory = Memory<VecBatch, VecBatch, VecBatch, VecBatch>;

    fn record(state: f32, terminal: i8, reward: f32) -> Values<VecBatch, VecBatch, VecBatch, VecBatch> {
        Values {
            states: VecBatch::from_rows(vec![vec![state]]),
            internals: VecBatch::from_rows(vec![vec![0.0]]),
            auxiliaries: VecBatch::from_rows(vec![vec![0.0]]),
            actions: VecBatch::from_rows(vec![vec![0.0]]),
            terminal: vec![terminal],
            reward: vec![reward],
        }
    }

    fn fill(memory: &mut TestMemory, episodes: &[usize]) {
        // Episode lengths; state value encodes the absolute index.
        let mut abs = 0;
        for &len in episodes {
            for k in 0..len {
                let terminal = if k + 1 == len { 1 } else { 0 };
                memory.push(&record(abs as f32, terminal, 1.0));
                abs += 1;
            }
        }
    }

    #[test]
    fn predecessors_stop_at_episode_boundaries() {
        let mut memory = TestMemory::build(&MemoryConfig::new(20));
        fill(&mut memory, &[3, 4]);

        // Absolute index 4 is the second record of the second episode.
        let (horizons, states, internals) = memory.predecessors(&[4, 6], 5);
        assert_eq!(horizons, vec![(0, 2), (2, 4)]);
        assert_eq!(states.rows()[0], vec![3.0]);
        assert_eq!(states.rows()[1], vec![4.0]);
        assert_eq!(states.rows()[2..].len(), 4);
        assert_eq!(internals.len(), 2);
    }

    #[test]
    fn successors_stop_at_terminals() {
        let mut memory = TestMemory::build(&MemoryConfig::new(20));
        fill(&mut memory, &[3, 4]);

        let walked = memory.successors(&[0, 2, 3], 10);
        assert_eq!(walked[0], (2, 2, 1));
        assert_eq!(walked[1], (0, 2, 1));
        assert_eq!(walked[2], (3, 6, 1));
    }

    #[test]
    fn episode_retrieval_returns_complete_episodes() {
        let mut memory = TestMemory::build(&MemoryConfig::new(20));
        fill(&mut memory, &[3, 4, 2]);

        let indices = memory.retrieve_episodes(2).unwrap();
        assert_eq!(indices, vec![3, 4, 5, 6, 7, 8]);
        assert!(memory.retrieve_episodes(4).is_err());
    }

    #[test]
    fn overwritten_episodes_are_pruned() {
        let mut memory = TestMemory::build(&MemoryConfig::new(5));
        fill(&mut memory, &[3, 4]);

        // Capacity 5 holds indices 2..=6; the first episode (0..=2) lost
        // its start, so only the second remains retrievable.
        assert_eq!(memory.oldest(), 2);
        assert_eq!(memory.num_episodes(), 1);
        assert_eq!(memory.retrieve_episodes(1).unwrap(), vec![3, 4, 5, 6]);
    }

    #[test]
    fn recent_retrieval_respects_horizon_margins() {
        let mut memory = TestMemory::build(&MemoryConfig::new(20));
        fill(&mut memory, &[8]);

        let indices = memory.retrieve_timesteps(3, 1, 2).unwrap();
        assert_eq!(indices, vec![3, 4, 5]);
        assert!(memory.retrieve_timesteps(6, 1, 2).is_err());
    }

    #[test]
    fn uniform_retrieval_stays_in_eligible_range() {
        let mut memory =
            TestMemory::build(&MemoryConfig::new(20).retrieval(Retrieval::Uniform).seed(7));
        fill(&mut memory, &[8]);

        let indices = memory.retrieve_timesteps(50, 2, 3).unwrap();
        assert_eq!(indices.len(), 50);
        assert!(indices.iter().all(|&ix| (2..=4).contains(&ix)));
    }
}
