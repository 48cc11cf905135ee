//! Persistent parallel pipelines.
//!
//! A pipeline is a source sequence, a worker count, and one fused
//! per-element process function. Every combinator returns a *new*
//! pipeline wrapping the previous process in another closure — the
//! original value is never mutated, so a base pipeline can be cloned and
//! forked into independent runs. The deliberate exceptions are
//! [`skip`](ParallelSeq::skip), [`take`](ParallelSeq::take), and
//! [`unique`](ParallelSeq::unique), whose cross-worker coordination
//! state is tied to the pipeline value that created it.

use crate::map::ConcurrentMap;
use crate::sync::AtomicCounter;
use sluice_core::Sequence;
use std::hash::Hash;
use std::sync::Arc;

/// The fused per-element step: `None` means the element was filtered
/// out by some stage.
pub(super) type ProcessFn<V> = dyn Fn(V) -> Option<V> + Send + Sync;

/// A parallel pipeline over a lazy sequence.
///
/// Built with [`IntoParallelSeq::parallel`]; executed with
/// [`range`](ParallelSeq::range) and the executors built on it
/// (`collect`, `for_each`, `find`, ...), which fan the source out to a
/// fixed set of worker threads and fan results back in. Element order
/// across workers is not preserved.
///
/// ```
/// use sluice_concurrency::seq::IntoParallelSeq;
///
/// let mut doubled = (1..=10)
///     .parallel()
///     .map(|x| x * 2)
///     .filter(|x| x % 3 == 0)
///     .collect();
/// doubled.sort_unstable();
/// assert_eq!(doubled, vec![6, 12, 18]);
/// ```
pub struct ParallelSeq<S: Sequence> {
    pub(super) source: S,
    pub(super) workers: usize,
    pub(super) process: Arc<ProcessFn<S::Item>>,
}

/// Wraps a sequence into a [`ParallelSeq`].
pub trait IntoParallelSeq: Sequence + Sized {
    /// Wrap this sequence into a parallel pipeline with one worker per
    /// available CPU.
    fn parallel(self) -> ParallelSeq<Self>;
}

impl<S: Sequence> IntoParallelSeq for S {
    fn parallel(self) -> ParallelSeq<S> {
        ParallelSeq {
            source: self,
            workers: num_cpus::get().max(1),
            process: Arc::new(|item| Some(item)),
        }
    }
}

impl<S: Sequence> ParallelSeq<S>
where
    <S as Sequence>::Item: 'static,
{
    /// Override the worker count, clamped to at least 1.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// The number of workers this pipeline will run with.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Transform every element.
    pub fn map(self, f: impl Fn(S::Item) -> S::Item + Send + Sync + 'static) -> Self {
        let prev = self.process;
        Self {
            source: self.source,
            workers: self.workers,
            process: Arc::new(move |item| prev(item).map(&f)),
        }
    }

    /// Keep only elements matching the predicate.
    pub fn filter(self, f: impl Fn(&S::Item) -> bool + Send + Sync + 'static) -> Self {
        let prev = self.process;
        Self {
            source: self.source,
            workers: self.workers,
            process: Arc::new(move |item| prev(item).filter(|item| f(item))),
        }
    }

    /// Drop elements matching the predicate.
    pub fn exclude(self, f: impl Fn(&S::Item) -> bool + Send + Sync + 'static) -> Self {
        let prev = self.process;
        Self {
            source: self.source,
            workers: self.workers,
            process: Arc::new(move |item| prev(item).filter(|item| !f(item))),
        }
    }

    /// Observe every surviving element without changing it.
    pub fn inspect(self, f: impl Fn(&S::Item) + Send + Sync + 'static) -> Self {
        let prev = self.process;
        Self {
            source: self.source,
            workers: self.workers,
            process: Arc::new(move |item| {
                prev(item).map(|item| {
                    f(&item);
                    item
                })
            }),
        }
    }

    /// Drop the first `n` surviving elements, counted globally across
    /// workers.
    ///
    /// The count is exact; *which* elements fall near the cutoff is
    /// non-deterministic when `workers > 1`. The shared counter belongs
    /// to this pipeline value: run it once.
    pub fn skip(self, n: usize) -> Self {
        let seen = Arc::new(AtomicCounter::new());
        let prev = self.process;
        Self {
            source: self.source,
            workers: self.workers,
            process: Arc::new(move |item| prev(item).filter(|_| seen.increment() > n)),
        }
    }

    /// Keep only the first `n` surviving elements, counted globally
    /// across workers.
    ///
    /// Same cutoff semantics and single-run caveat as
    /// [`skip`](Self::skip).
    pub fn take(self, n: usize) -> Self {
        let taken = Arc::new(AtomicCounter::new());
        let prev = self.process;
        Self {
            source: self.source,
            workers: self.workers,
            process: Arc::new(move |item| prev(item).filter(|_| taken.increment() <= n)),
        }
    }

    /// Drop duplicate elements, first seen wins across workers.
    ///
    /// Backed by a concurrent set shared by the workers; like
    /// [`skip`](Self::skip), the set belongs to this pipeline value.
    pub fn unique(self) -> Self
    where
        S::Item: Eq + Hash + Clone + Send + Sync + 'static,
    {
        let seen: Arc<ConcurrentMap<S::Item, ()>> = Arc::new(ConcurrentMap::new());
        let prev = self.process;
        Self {
            source: self.source,
            workers: self.workers,
            process: Arc::new(move |item| {
                prev(item).filter(|item| seen.insert_if_absent(item.clone(), ()))
            }),
        }
    }
}

impl<S> ParallelSeq<S>
where
    S: Sequence + IntoIterator<Item = <S as Sequence>::Item>,
{
    /// Append another source; the fused process applies to elements of
    /// both halves.
    pub fn chain<C>(self, other: C) -> ParallelSeq<std::iter::Chain<S::IntoIter, C::IntoIter>>
    where
        C: IntoIterator<Item = <S as Sequence>::Item>,
    {
        ParallelSeq {
            source: self.source.into_iter().chain(other),
            workers: self.workers,
            process: self.process,
        }
    }
}

impl<S> ParallelSeq<S>
where
    S: Sequence + IntoIterator<Item = <S as Sequence>::Item>,
    <S as Sequence>::Item: IntoIterator,
{
    /// Flatten a sequence of sequences into a pipeline over the inner
    /// elements.
    ///
    /// Stages fused *before* the flatten operate on the outer sequences
    /// and run on the producer thread; the flattened pipeline starts
    /// with an identity process over the inner elements.
    pub fn flatten(
        self,
    ) -> ParallelSeq<impl Iterator<Item = <<S as Sequence>::Item as IntoIterator>::Item>> {
        let process = self.process;
        let source = self
            .source
            .into_iter()
            .filter_map(move |outer| process(outer))
            .flatten();
        ParallelSeq {
            source,
            workers: self.workers,
            process: Arc::new(|item| Some(item)),
        }
    }
}

impl<S: Sequence + Clone> Clone for ParallelSeq<S> {
    /// Fork the pipeline for an independent run.
    ///
    /// Clones share any skip/take/unique coordination state already
    /// fused in; fork *before* applying those combinators when each run
    /// needs its own cutoff.
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            workers: self.workers,
            process: Arc::clone(&self.process),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combinators_do_not_mutate_the_original() {
        let base = (0..10).parallel().with_workers(2);
        let mapped = base.clone().map(|x| x * 10);
        let filtered = base.clone().filter(|x| x % 2 == 0);

        let mut a = base.collect();
        let mut b = mapped.collect();
        let mut c = filtered.collect();
        a.sort_unstable();
        b.sort_unstable();
        c.sort_unstable();

        assert_eq!(a, (0..10).collect::<Vec<_>>());
        assert_eq!(b, (0..10).map(|x| x * 10).collect::<Vec<_>>());
        assert_eq!(c, vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn test_worker_count_is_clamped() {
        let seq = (0..4).parallel().with_workers(0);
        assert_eq!(seq.workers(), 1);
    }
}
