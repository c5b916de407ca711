//! Lazy sequences with a total known up front.

/// Wraps a lazy iterator together with the number of items it will produce,
/// so callers can report progress without materializing it.
#[derive(Debug)]
pub struct SizedIter<I> {
    inner: I,
    total: usize,
}

impl<I: Iterator> SizedIter<I> {
    pub fn new(inner: I, total: usize) -> Self {
        Self { inner, total }
    }

    /// Number of items the sequence yields in total, independent of progress.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn into_inner(self) -> I {
        self.inner
    }
}

impl<I: Iterator> Iterator for SizedIter<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_is_known_before_iteration() {
        let mut produced = 0;
        let iter = SizedIter::new(
            std::iter::from_fn(|| {
                produced += 1;
                (produced <= 3).then_some(produced)
            }),
            3,
        );
        assert_eq!(iter.total(), 3);
        assert_eq!(iter.collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
