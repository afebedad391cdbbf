//! Strided structure-of-arrays views for batch arguments
//!
//! Batch entry points take their per-task arguments as parallel
//! arrays. Each array is a [`StridedSlice`]: a base slice, a logical
//! task count, and an element stride. A stride of 0 broadcasts the
//! first element to every task; an absent array (empty base) lets the
//! consumer substitute a default for every task.
//!
//! Strides are measured in elements. Byte strides coming from a
//! foreign ABI are accepted through [`StridedSlice::from_byte_stride`]
//! and must be a multiple of the element size; anything else is an
//! `args_invalid` error at construction, so the dispatch paths never
//! see a misaligned view.

use std::mem;

use crate::error::{LatticeError, Result};

/// Borrowed strided view over a batch argument array
#[derive(Debug, Clone, Copy)]
pub struct StridedSlice<'a, T> {
    items: &'a [T],
    stride: usize,
    count: usize,
}

impl<'a, T> StridedSlice<'a, T> {
    /// One element per task, in order.
    pub fn dense(items: &'a [T]) -> Self {
        StridedSlice {
            items,
            stride: 1,
            count: items.len(),
        }
    }

    /// The same element for every one of `count` tasks.
    pub fn broadcast(item: &'a T, count: usize) -> Self {
        StridedSlice {
            items: std::slice::from_ref(item),
            stride: 0,
            count,
        }
    }

    /// No array supplied; [`StridedSlice::get`] yields nothing and
    /// consumers substitute their default per task.
    pub fn absent(count: usize) -> Self {
        StridedSlice {
            items: &[],
            stride: 0,
            count,
        }
    }

    /// A view with an explicit element stride over `items`.
    ///
    /// Stride 0 broadcasts the first element. A non-zero stride must
    /// keep every task index inside `items`.
    pub fn with_stride(items: &'a [T], stride: usize, count: usize) -> Result<Self> {
        if count > 0 && items.is_empty() {
            return Err(LatticeError::args_invalid(
                "strided view over an empty array",
            ));
        }
        if stride > 0 && count > 0 {
            let last = (count - 1)
                .checked_mul(stride)
                .ok_or_else(|| LatticeError::args_invalid("stride overflow"))?;
            if last >= items.len() {
                return Err(LatticeError::args_invalid(
                    "strided view reaches past the end of its array",
                ));
            }
        }
        Ok(StridedSlice {
            items,
            stride,
            count,
        })
    }

    /// A view with a byte stride, as foreign batch layouts express it.
    /// The stride must be a multiple of the element size.
    pub fn from_byte_stride(items: &'a [T], stride_bytes: usize, count: usize) -> Result<Self> {
        let width = mem::size_of::<T>();
        if stride_bytes == 0 {
            return Self::with_stride(items, 0, count);
        }
        if width == 0 || stride_bytes % width != 0 {
            return Err(LatticeError::args_invalid(format!(
                "byte stride {} is not a multiple of the {}-byte element",
                stride_bytes, width
            )));
        }
        Self::with_stride(items, stride_bytes / width, count)
    }

    /// Logical number of tasks this view covers.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the view covers no tasks.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Whether no array was supplied at all.
    pub fn is_absent(&self) -> bool {
        self.items.is_empty()
    }

    /// The element for task `index`, or `None` past the end or when
    /// the array is absent.
    pub fn get(&self, index: usize) -> Option<&'a T> {
        if index >= self.count {
            return None;
        }
        self.items.get(index * self.stride)
    }
}

impl<'a, T: Copy> StridedSlice<'a, T> {
    /// The element for task `index`, or `default` when the array is
    /// absent. An in-range index over a present array always yields
    /// the array's element.
    pub fn get_or(&self, index: usize, default: T) -> T {
        self.get(index).copied().unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_view() {
        let keys = [10u64, 20, 30];
        let view = StridedSlice::dense(&keys);
        assert_eq!(view.len(), 3);
        assert_eq!(view.get(0), Some(&10));
        assert_eq!(view.get(2), Some(&30));
        assert_eq!(view.get(3), None);
    }

    #[test]
    fn test_broadcast_view() {
        let value = 7u64;
        let view = StridedSlice::broadcast(&value, 5);
        assert_eq!(view.len(), 5);
        for index in 0..5 {
            assert_eq!(view.get(index), Some(&7));
        }
        assert_eq!(view.get(5), None);
    }

    #[test]
    fn test_absent_view_defaults() {
        let view: StridedSlice<'_, u64> = StridedSlice::absent(3);
        assert!(view.is_absent());
        assert_eq!(view.get(0), None);
        assert_eq!(view.get_or(1, 99), 99);
    }

    #[test]
    fn test_element_stride_skips() {
        // Every second element of a packed pair array.
        let packed = [1u64, 100, 2, 200, 3, 300];
        let view = StridedSlice::with_stride(&packed, 2, 3).unwrap();
        assert_eq!(view.get(0), Some(&1));
        assert_eq!(view.get(1), Some(&2));
        assert_eq!(view.get(2), Some(&3));
    }

    #[test]
    fn test_stride_bounds_validated() {
        let items = [1u64, 2, 3];
        assert!(StridedSlice::with_stride(&items, 2, 3).is_err());
        assert!(StridedSlice::with_stride(&items, 1, 3).is_ok());
        let empty: [u64; 0] = [];
        assert!(StridedSlice::with_stride(&empty, 1, 1).is_err());
        assert!(StridedSlice::with_stride(&empty, 1, 0).is_ok());
    }

    #[test]
    fn test_byte_stride_must_align() {
        let items = [1u64, 2, 3, 4];
        let view = StridedSlice::from_byte_stride(&items, 16, 2).unwrap();
        assert_eq!(view.get(0), Some(&1));
        assert_eq!(view.get(1), Some(&3));

        let err = StridedSlice::from_byte_stride(&items, 12, 2).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ArgsInvalid);
    }

    #[test]
    fn test_zero_byte_stride_broadcasts() {
        let items = [42u64];
        let view = StridedSlice::from_byte_stride(&items, 0, 4).unwrap();
        assert_eq!(view.get(3), Some(&42));
    }
}
