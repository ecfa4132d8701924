use num_traits::Float;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

///////////////////
// Float on heap //
///////////////////

/// Wrapper for floats that implements Ord for use in BinaryHeap
///
/// NaN compares equal to everything; coordinates are validated to be finite
/// at construction so distances never are NaN.
#[derive(Clone, Copy, Debug)]
pub struct OrderedFloat<T>(pub T);

/// Partial equality trait
impl<T: Float> PartialEq for OrderedFloat<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// Equality trait
impl<T: Float> Eq for OrderedFloat<T> {}

/// Partial ordering trait
impl<T: Float> PartialOrd for OrderedFloat<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Comparing one to the other
impl<T: Float> Ord for OrderedFloat<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(Ordering::Equal)
    }
}

///////////////
// Neighbour //
///////////////

/// A single query result
///
/// ### Fields
///
/// * `index` - Zero-based index of the point in the point set
/// * `distance` - True (not squared) metric distance to the query
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbour<T> {
    pub index: usize,
    pub distance: T,
}

impl<T: Float> Neighbour<T> {
    /// Generate a new neighbour
    pub fn new(index: usize, distance: T) -> Self {
        Self { index, distance }
    }

    /// Result ordering: ascending distance, ties by ascending index
    #[inline]
    pub fn result_order(&self, other: &Self) -> Ordering {
        OrderedFloat(self.distance)
            .cmp(&OrderedFloat(other.distance))
            .then_with(|| self.index.cmp(&other.index))
    }
}

/// Sort neighbours into result order
pub fn sort_neighbours<T: Float>(neighbours: &mut [Neighbour<T>]) {
    neighbours.sort_unstable_by(|a, b| a.result_order(b));
}

/// Split neighbours into the `(indices, distances)` layout of the batch API
pub fn unzip_neighbours<T: Float>(neighbours: Vec<Neighbour<T>>) -> (Vec<usize>, Vec<T>) {
    neighbours
        .into_iter()
        .map(|nb| (nb.index, nb.distance))
        .unzip()
}

///////////////////
// NeighbourHeap //
///////////////////

/// Bounded best-candidates structure for k-NN queries
///
/// A max-heap over `(distance, index)` that keeps the `k` lexicographically
/// smallest pairs offered to it. Because the index takes part in the
/// comparison, the retained set does not depend on the order of the offers.
pub struct NeighbourHeap<T> {
    heap: BinaryHeap<(OrderedFloat<T>, usize)>,
    k: usize,
}

impl<T: Float> NeighbourHeap<T> {
    /// Create an empty heap for `k` neighbours
    ///
    /// ### Params
    ///
    /// * `k` - Number of neighbours to keep
    ///
    /// ### Returns
    ///
    /// Initialised, empty heap
    pub fn with_capacity(k: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(k + 1),
            k,
        }
    }

    /// Number of stored candidates
    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether no candidates are stored
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Whether `k` candidates are stored
    #[inline]
    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.k
    }

    /// Distance of the worst accepted candidate, or infinity while not full
    #[inline]
    pub fn worst_distance(&self) -> T {
        if self.is_full() {
            self.heap.peek().map_or(T::infinity(), |top| top.0 .0)
        } else {
            T::infinity()
        }
    }

    /// Offer a candidate
    ///
    /// ### Params
    ///
    /// * `index` - Point index
    /// * `dist` - Distance to the query
    ///
    /// ### Returns
    ///
    /// `true` if the candidate was accepted
    #[inline]
    pub fn offer(&mut self, index: usize, dist: T) -> bool {
        if self.k == 0 {
            return false;
        }
        let entry = (OrderedFloat(dist), index);
        if self.heap.len() < self.k {
            self.heap.push(entry);
            return true;
        }
        match self.heap.peek() {
            Some(top) if entry < *top => {
                self.heap.pop();
                self.heap.push(entry);
                true
            }
            _ => false,
        }
    }

    /// Drain into result order
    ///
    /// ### Returns
    ///
    /// Neighbours sorted by ascending distance, ties by ascending index
    pub fn into_sorted_vec(self) -> Vec<Neighbour<T>> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|(OrderedFloat(dist), idx)| Neighbour::new(idx, dist))
            .collect()
    }
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Reverse;

    #[test]
    fn test_ordered_float_ordering() {
        let a = OrderedFloat(1.0_f32);
        let b = OrderedFloat(2.0_f32);
        let c = OrderedFloat(1.0_f32);

        assert_eq!(a.cmp(&b), Ordering::Less);
        assert_eq!(b.cmp(&a), Ordering::Greater);
        assert_eq!(a.cmp(&c), Ordering::Equal);
    }

    #[test]
    fn test_ordered_float_in_reverse_binary_heap() {
        let mut heap = BinaryHeap::new();
        heap.push(Reverse(OrderedFloat(3.0_f64)));
        heap.push(Reverse(OrderedFloat(1.0_f64)));
        heap.push(Reverse(OrderedFloat(2.0_f64)));

        assert_eq!(heap.pop(), Some(Reverse(OrderedFloat(1.0))));
        assert_eq!(heap.pop(), Some(Reverse(OrderedFloat(2.0))));
        assert_eq!(heap.pop(), Some(Reverse(OrderedFloat(3.0))));
    }

    #[test]
    fn test_ordered_float_infinity() {
        let inf = OrderedFloat(f32::INFINITY);
        let finite = OrderedFloat(1.0_f32);
        assert!(finite < inf);
    }

    #[test]
    fn test_neighbour_heap_keeps_k_smallest() {
        let mut heap = NeighbourHeap::with_capacity(3);
        for (idx, dist) in [(0, 5.0), (1, 1.0), (2, 4.0), (3, 0.5), (4, 3.0)] {
            heap.offer(idx, dist);
        }

        assert!(heap.is_full());
        assert_eq!(heap.worst_distance(), 3.0);

        let result = heap.into_sorted_vec();
        let indices: Vec<usize> = result.iter().map(|nb| nb.index).collect();
        assert_eq!(indices, vec![3, 1, 4]);
    }

    #[test]
    fn test_neighbour_heap_tie_break_independent_of_order() {
        let offers = [(7, 1.0_f64), (2, 1.0), (5, 1.0), (9, 0.0)];

        let mut forward = NeighbourHeap::with_capacity(2);
        offers.iter().for_each(|&(i, d)| {
            forward.offer(i, d);
        });

        let mut backward = NeighbourHeap::with_capacity(2);
        offers.iter().rev().for_each(|&(i, d)| {
            backward.offer(i, d);
        });

        let f = forward.into_sorted_vec();
        let b = backward.into_sorted_vec();
        assert_eq!(f, b);
        assert_eq!(f, vec![Neighbour::new(9, 0.0), Neighbour::new(2, 1.0)]);
    }

    #[test]
    fn test_neighbour_heap_worst_distance_not_full() {
        let mut heap = NeighbourHeap::with_capacity(4);
        heap.offer(0, 1.0_f32);
        assert!(!heap.is_full());
        assert_eq!(heap.worst_distance(), f32::INFINITY);
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn test_neighbour_heap_rejects_worse() {
        let mut heap = NeighbourHeap::with_capacity(1);
        assert!(heap.offer(3, 2.0_f32));
        assert!(!heap.offer(1, 2.5));
        assert!(heap.offer(1, 2.0)); // same distance, smaller index wins
        assert_eq!(heap.into_sorted_vec(), vec![Neighbour::new(1, 2.0)]);
    }

    #[test]
    fn test_sort_neighbours() {
        let mut v = vec![
            Neighbour::new(4, 1.0_f64),
            Neighbour::new(0, 0.0),
            Neighbour::new(2, 1.0),
        ];
        sort_neighbours(&mut v);
        let (indices, dists) = unzip_neighbours(v);
        assert_eq!(indices, vec![0, 2, 4]);
        assert_eq!(dists, vec![0.0, 1.0, 1.0]);
    }
}
