//! Binary heap merger.

use std::cmp::Ordering;

use crate::heap::{Compare, MinHeap};

/// Heap entry: an item together with the index of the input it was pulled from.
type Entry<T> = (T, usize);

/// Binary heap merger implementation.
/// Merges multiple sorted inputs into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of items,
/// *n* is the number of inputs.
pub struct BinaryHeapMerger<T, E, F, C>
where
    F: Fn(&T, &T) -> Ordering,
    C: IntoIterator<Item = Result<T, E>>,
{
    items: MinHeap<Entry<T>, EntryOrder<F>>,
    inputs: Vec<C::IntoIter>,
    initiated: bool,
    pending_error: Option<E>,
    failed: bool,
}

/// Orders heap entries by their items only.
pub struct EntryOrder<F>(F);

impl<T, F> Compare<Entry<T>> for EntryOrder<F>
where
    F: Fn(&T, &T) -> Ordering,
{
    #[inline]
    fn compare(&self, a: &Entry<T>, b: &Entry<T>) -> Ordering {
        (self.0)(&a.0, &b.0)
    }
}

impl<T, E, F, C> BinaryHeapMerger<T, E, F, C>
where
    F: Fn(&T, &T) -> Ordering,
    C: IntoIterator<Item = Result<T, E>>,
{
    /// Creates an instance of a binary heap merger using chunks as inputs.
    /// Input items should be sorted in ascending order of `compare` otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `inputs` - Inputs to be merged in a single sorted one
    /// * `compare` - Function used to compare items
    pub fn new<I>(inputs: I, compare: F) -> Self
    where
        I: IntoIterator<Item = C>,
    {
        let inputs = Vec::from_iter(inputs.into_iter().map(|c| c.into_iter()));
        let items = MinHeap::with_capacity(inputs.len(), EntryOrder(compare));

        return BinaryHeapMerger {
            inputs,
            items,
            initiated: false,
            pending_error: None,
            failed: false,
        };
    }

    fn pull(&mut self, idx: usize) -> Result<(), E> {
        if let Some(item) = self.inputs[idx].next() {
            self.items.push((item?, idx));
        }
        return Ok(());
    }
}

impl<T, E, F, C> Iterator for BinaryHeapMerger<T, E, F, C>
where
    F: Fn(&T, &T) -> Ordering,
    C: IntoIterator<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    /// Returns the next item from the inputs in ascending order.
    /// The merge stops after the first input error.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(err) = self.pending_error.take() {
            self.failed = true;
            return Some(Err(err));
        }

        if !self.initiated {
            self.initiated = true;
            for idx in 0..self.inputs.len() {
                if let Err(err) = self.pull(idx) {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }

        let (result, idx) = self.items.pop()?;
        if let Err(err) = self.pull(idx) {
            // the popped item is still emitted, the error follows on the next call
            self.pending_error = Some(err);
        }

        return Some(Ok(result));
    }
}

#[cfg(test)]
mod test {
    use rstest::*;
    use std::error::Error;
    use std::io::{self, ErrorKind};

    use super::BinaryHeapMerger;
    use crate::compare::compare_lines;

    #[rstest]
    #[case(
        vec![],
        vec![],
    )]
    #[case(
        vec![
            vec![],
            vec![]
        ],
        vec![],
    )]
    #[case(
        vec![
            vec![Ok(4), Ok(5), Ok(7)],
            vec![Ok(1), Ok(6)],
            vec![Ok(3)],
            vec![],
        ],
        vec![Ok(1), Ok(3), Ok(4), Ok(5), Ok(6), Ok(7)],
    )]
    #[case(
        vec![
            vec![Result::Err(io::Error::new(ErrorKind::Other, "test error"))]
        ],
        vec![
            Result::Err(io::Error::new(ErrorKind::Other, "test error"))
        ],
    )]
    #[case(
        vec![
            vec![Ok(3), Result::Err(io::Error::new(ErrorKind::Other, "test error"))],
            vec![Ok(1), Ok(2)],
        ],
        vec![
            Ok(1),
            Ok(2),
            Ok(3),
            Result::Err(io::Error::new(ErrorKind::Other, "test error")),
        ],
    )]
    fn test_merger(
        #[case] chunks: Vec<Vec<Result<i32, io::Error>>>,
        #[case] expected_result: Vec<Result<i32, io::Error>>,
    ) {
        let merger = BinaryHeapMerger::new(chunks, |a: &i32, b: &i32| a.cmp(b));
        let actual_result = merger.collect();
        assert!(
            compare_vectors_of_result::<_, io::Error>(&actual_result, &expected_result),
            "actual={:?}, expected={:?}",
            actual_result,
            expected_result
        );
    }

    #[test]
    fn test_merge_lines() {
        let inputs = vec![
            vec!["apple", "zebra"],
            vec!["Banana", "mango"],
            vec!["cherry"],
        ];
        let inputs = inputs
            .into_iter()
            .map(|input| Vec::from_iter(input.into_iter().map(|line| Ok::<_, io::Error>(line.to_string()))));

        let merger = BinaryHeapMerger::new(inputs, |a: &String, b: &String| compare_lines(a, b));
        let merged: Result<Vec<String>, _> = merger.collect();

        assert_eq!(merged.unwrap(), vec!["apple", "Banana", "cherry", "mango", "zebra"]);
    }

    fn compare_vectors_of_result<T: PartialEq, E: Error + 'static>(
        actual: &Vec<Result<T, E>>,
        expected: &Vec<Result<T, E>>,
    ) -> bool {
        actual.len() == expected.len()
            && actual
                .into_iter()
                .zip(expected)
                .all(
                    |(actual_result, expected_result)| match (actual_result, expected_result) {
                        (Ok(actual_result), Ok(expected_result)) if actual_result == expected_result => true,
                        (Err(actual_err), Err(expected_err)) => actual_err.to_string() == expected_err.to_string(),
                        _ => false,
                    },
                )
    }
}
