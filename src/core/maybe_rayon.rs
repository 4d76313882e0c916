//! Parallel or sequential execution, selected by the `parallel` feature.
//!
//! Row reductions use `into_par_iter` from here; ndarray lock-step loops go
//! through [`zip_for_each!`]. Without the feature both run on the calling
//! thread.

#[cfg(feature = "parallel")]
pub use rayon::prelude::*;

#[cfg(not(feature = "parallel"))]
mod sequential {
    /// Sequential stand-in for `rayon::prelude::IntoParallelIterator`
    pub trait IntoParallelIterator {
        type Iter;
        type Item;
        fn into_par_iter(self) -> Self::Iter;
    }

    impl<I: IntoIterator> IntoParallelIterator for I {
        type Iter = I::IntoIter;
        type Item = I::Item;
        fn into_par_iter(self) -> Self::Iter {
            self.into_iter()
        }
    }
}

#[cfg(not(feature = "parallel"))]
pub use sequential::*;

/// `Zip::par_for_each` with the `parallel` feature, `Zip::for_each` without
macro_rules! zip_for_each {
    ($zip:expr, $body:expr) => {{
        #[cfg(feature = "parallel")]
        $zip.par_for_each($body);
        #[cfg(not(feature = "parallel"))]
        $zip.for_each($body);
    }};
}

pub(crate) use zip_for_each;

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Zip};

    #[test]
    fn test_zip_for_each_visits_every_cell() {
        let mut out = Array2::from_elem((3, 4), 0usize);
        zip_for_each!(Zip::indexed(&mut out), |(row, col), cell| {
            *cell = row * 10 + col;
        });
        assert_eq!(out[[2, 3]], 23);
        assert_eq!(out.iter().filter(|&&v| v == 0).count(), 1);
    }

    #[test]
    fn test_into_par_iter_collects_in_order() {
        let squares: Vec<u64> = (0..5u64).into_par_iter().map(|v| v * v).collect();
        assert_eq!(squares, vec![0, 1, 4, 9, 16]);
    }
}
