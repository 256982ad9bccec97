//! Maps output positions onto strided input lanes.

use crate::error::{MeanError, Result, ShapeError};

/// Describes a reduction as "one lane of the input per output position".
///
/// Output positions are enumerated in row-major order over `out_shape`.
/// Moving one step along output dimension `d` moves `out_strides[d]`
/// elements through the input; the lane itself is `lane_len` elements,
/// `lane_stride` apart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaneMap {
    pub out_shape: Vec<usize>,
    pub out_strides: Vec<isize>,
    pub lane_len: usize,
    pub lane_stride: isize,
}

impl LaneMap {
    /// Lanes along `axis`; the remaining dimensions index the outputs.
    pub fn along_axis(shape: &[usize], strides: &[isize], axis: usize) -> Self {
        let (out_shape, out_strides) = shape
            .iter()
            .zip(strides)
            .enumerate()
            .filter(|&(dim, _)| dim != axis)
            .map(|(_, (&len, &stride))| (len, stride))
            .unzip();
        Self {
            out_shape,
            out_strides,
            lane_len: shape[axis],
            lane_stride: strides[axis],
        }
    }

    /// Lanes of `window` consecutive elements along `axis`, one per valid
    /// window start.
    pub fn windows(shape: &[usize], strides: &[isize], axis: usize, window: usize) -> Self {
        let mut out_shape = shape.to_vec();
        out_shape[axis] = shape[axis] + 1 - window;
        Self {
            out_shape,
            out_strides: strides.to_vec(),
            lane_len: window,
            lane_stride: strides[axis],
        }
    }

    pub fn outputs(&self) -> Result<usize> {
        checked_product(&self.out_shape)
    }

    /// Dimension of the last output axis and its input stride.
    pub fn inner(&self) -> Option<(usize, isize)> {
        self.out_shape
            .last()
            .copied()
            .zip(self.out_strides.last().copied())
    }

    /// Whether consecutive outputs sit closer together in memory than
    /// consecutive lane elements, making a lane-index-first sweep cheaper.
    pub fn prefers_row_sweep(&self) -> bool {
        match self.inner() {
            Some((len, stride)) => len > 1 && stride.unsigned_abs() < self.lane_stride.unsigned_abs(),
            None => false,
        }
    }
}

/// Normalises a possibly negative axis against `ndim`.
pub fn normalize_axis(axis: isize, ndim: usize) -> Result<usize> {
    let signed_ndim = ndim as isize;
    let resolved = if axis < 0 { axis + signed_ndim } else { axis };
    if resolved < 0 || resolved >= signed_ndim {
        return Err(ShapeError::AxisOutOfRange { axis, ndim }.into());
    }
    Ok(resolved as usize)
}

pub fn checked_product(values: &[usize]) -> Result<usize> {
    values.iter().try_fold(1usize, |acc, &value| {
        acc.checked_mul(value)
            .ok_or(MeanError::Allocation { elements: usize::MAX })
    })
}

/// Row-major walk over output positions that tracks the matching input
/// offset.
#[derive(Clone, Debug)]
pub struct Cursor<'a> {
    shape: &'a [usize],
    strides: &'a [isize],
    coords: Vec<usize>,
    offset: isize,
}

impl<'a> Cursor<'a> {
    /// Positions the cursor on output `flat_index`.
    pub fn at(map: &'a LaneMap, flat_index: usize) -> Self {
        let shape = map.out_shape.as_slice();
        let strides = map.out_strides.as_slice();
        let mut coords = vec![0usize; shape.len()];
        let mut remainder = flat_index;
        for dim in (0..shape.len()).rev() {
            let len = shape[dim];
            if len == 0 {
                continue;
            }
            coords[dim] = remainder % len;
            remainder /= len;
        }
        let offset = coords
            .iter()
            .zip(strides)
            .map(|(&coord, &stride)| coord as isize * stride)
            .sum();
        Self {
            shape,
            strides,
            coords,
            offset,
        }
    }

    #[inline]
    pub fn offset(&self) -> isize {
        self.offset
    }

    /// Outputs left on the current innermost row, this one included.
    #[inline]
    pub fn remaining_in_row(&self) -> usize {
        match (self.shape.last(), self.coords.last()) {
            (Some(&len), Some(&coord)) => len - coord,
            _ => 1,
        }
    }

    /// Steps to the next output position.
    pub fn advance(&mut self) {
        for dim in (0..self.shape.len()).rev() {
            self.coords[dim] += 1;
            self.offset += self.strides[dim];
            if self.coords[dim] < self.shape[dim] {
                return;
            }
            self.offset -= self.strides[dim] * self.shape[dim] as isize;
            self.coords[dim] = 0;
        }
    }

    /// Skips `count` outputs that all lie on the current innermost row.
    pub fn advance_in_row(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        if let (Some(coord), Some(&stride)) = (self.coords.last_mut(), self.strides.last()) {
            *coord += count - 1;
            self.offset += stride * (count - 1) as isize;
        }
        self.advance();
    }
}
