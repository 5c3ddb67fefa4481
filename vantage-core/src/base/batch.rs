//! Batches of experience values.

/// Columnar storage for one component of an experience batch.
///
/// The same trait backs both message-style batches (length equals the number
/// of records carried) and ring storage inside [`Memory`]: storage is
/// allocated once with [`BatchBase::new`] and written with [`BatchBase::push`],
/// which wraps modulo the allocated capacity.
///
/// [`Memory`]: crate::Memory
pub trait BatchBase: Clone {
    /// Creates a new batch with the given capacity.
    fn new(capacity: usize) -> Self;

    /// Writes the rows of `data` starting at index `ix`, wrapping modulo
    /// the capacity of `self`.
    fn push(&mut self, ix: usize, data: &Self);

    /// Gathers the rows at the given indices into a new batch.
    fn sample(&self, ixs: &[usize]) -> Self;

    /// Number of rows held (the capacity, for storage batches).
    fn len(&self) -> usize;

    /// True if the batch holds no rows.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One batch of experience records, aligned along the batch axis.
///
/// Each row is a timestep: state, policy internal state, auxiliaries
/// (e.g. action masks), action, terminal flag and scalar reward.
/// Terminal flags distinguish kinds: 0 is non-terminal, 1 a true episode
/// end, 2 an episode timeout.
#[derive(Debug, Clone)]
pub struct Values<S, I, X, A> {
    /// States, per named state component.
    pub states: S,

    /// Policy internal (recurrent) state.
    pub internals: I,

    /// Auxiliary inputs such as action masks.
    pub auxiliaries: X,

    /// Actions, per named action component.
    pub actions: A,

    /// Terminal flags.
    pub terminal: Vec<i8>,

    /// Scalar rewards.
    pub reward: Vec<f32>,
}

impl<S, I, X, A> Values<S, I, X, A>
where
    S: BatchBase,
    I: BatchBase,
    X: BatchBase,
    A: BatchBase,
{
    /// Creates empty storage for `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            states: S::new(capacity),
            internals: I::new(capacity),
            auxiliaries: X::new(capacity),
            actions: A::new(capacity),
            terminal: vec![0; capacity],
            reward: vec![0.0; capacity],
        }
    }

    /// Number of records (the capacity, for storage).
    pub fn len(&self) -> usize {
        self.reward.len()
    }

    /// True if the batch holds no records.
    pub fn is_empty(&self) -> bool {
        self.reward.is_empty()
    }

    /// Writes the records of `data` starting at index `ix`, wrapping
    /// modulo the capacity of `self`.
    pub fn push(&mut self, ix: usize, data: &Self) {
        let capacity = self.reward.len();
        if capacity == 0 || data.is_empty() {
            return;
        }
        self.states.push(ix, &data.states);
        self.internals.push(ix, &data.internals);
        self.auxiliaries.push(ix, &data.auxiliaries);
        self.actions.push(ix, &data.actions);
        let mut j = ix % capacity;
        for k in 0..data.len() {
            self.terminal[j] = data.terminal[k];
            self.reward[j] = data.reward[k];
            j += 1;
            if j == capacity {
                j = 0;
            }
        }
    }

    /// Gathers the records at the given indices into a new batch.
    pub fn sample(&self, ixs: &[usize]) -> Self {
        Self {
            states: self.states.sample(ixs),
            internals: self.internals.sample(ixs),
            auxiliaries: self.auxiliaries.sample(ixs),
            actions: self.actions.sample(ixs),
            terminal: ixs.iter().map(|&ix| self.terminal[ix]).collect(),
            reward: ixs.iter().map(|&ix| self.reward[ix]).collect(),
        }
    }

    /// Extracts the single record at `ix`.
    pub fn get(&self, ix: usize) -> Self {
        self.sample(&[ix])
    }

    /// Concatenates two batches along the batch axis.
    pub fn concat(a: &Self, b: &Self) -> Self {
        let mut out = Self::new(a.len() + b.len());
        out.push(0, a);
        out.push(a.len(), b);
        out
    }
}

/// A batch assembled for a loss evaluation.
///
/// `states` holds the gathered predecessor sequences of all instances,
/// concatenated; `horizons` locates each instance's window in it as
/// `(offset, length)`, with the instance's own state last in the window.
/// `internals` are the window-initial recurrent states.
#[derive(Debug, Clone)]
pub struct TrainingBatch<S, I, X, A> {
    /// Gathered predecessor state sequences, concatenated.
    pub states: S,

    /// Per-instance `(offset, length)` into `states`.
    pub horizons: Vec<(usize, usize)>,

    /// Window-initial internal states, one per instance.
    pub internals: I,

    /// Auxiliaries of the instances themselves.
    pub auxiliaries: X,

    /// Actions of the instances themselves.
    pub actions: A,

    /// Training reward signal (completed, possibly advantage-adjusted).
    pub reward: Vec<f32>,
}

impl<S, I, X, A> TrainingBatch<S, I, X, A> {
    /// Number of instances in the batch.
    pub fn len(&self) -> usize {
        self.reward.len()
    }

    /// True if the batch has no instances.
    pub fn is_empty(&self) -> bool {
        self.reward.is_empty()
    }
}
