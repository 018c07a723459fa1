// Copyright (c) 2019-2023, The mvsearch contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License. If
// the BSD 2 Clause License was not distributed with this source code in the
// LICENSE file, you can obtain it at www.opensource.org/licenses/bsd-license

use crate::plane::PlaneSlice;
use crate::util::*;

#[inline(always)]
fn sad_row<T: Pixel>(org: &[T], rf: &[T], width: usize) -> u32 {
  org
    .iter()
    .take(width)
    .zip(rf)
    .map(|(&a, &b)| (i32::cast_from(a) - i32::cast_from(b)).unsigned_abs())
    .sum::<u32>()
}

#[inline(always)]
pub fn get_sad<T: Pixel>(
  plane_org: &PlaneSlice<'_, T>, plane_ref: &PlaneSlice<'_, T>,
  blk_w: usize, blk_h: usize, _bit_depth: usize,
) -> u32 {
  let mut sum = 0u32;

  for (slice_org, slice_ref) in
    plane_org.rows_iter().take(blk_h).zip(plane_ref.rows_iter())
  {
    sum += sad_row(slice_org, slice_ref, blk_w);
  }

  sum
}

/// SAD with row subsampling: even rows are summed first and the doubled
/// partial total is returned as an estimate once it already exceeds
/// `cutoff`, skipping the odd rows. When the estimate stays below the
/// cutoff the exact SAD is returned.
pub fn get_sad_with_cutoff<T: Pixel>(
  plane_org: &PlaneSlice<'_, T>, plane_ref: &PlaneSlice<'_, T>,
  blk_w: usize, blk_h: usize, _bit_depth: usize, cutoff: u32,
) -> u32 {
  debug_assert!(blk_h >= 2);
  let mut sum = 0u32;

  for y in (0..blk_h).step_by(2) {
    sum += sad_row(plane_org.row(y), plane_ref.row(y), blk_w);
  }
  if sum.saturating_mul(2) > cutoff {
    return sum * 2;
  }
  for y in (1..blk_h).step_by(2) {
    sum += sad_row(plane_org.row(y), plane_ref.row(y), blk_w);
  }

  sum
}

pub fn get_sse<T: Pixel>(
  plane_org: &PlaneSlice<'_, T>, plane_ref: &PlaneSlice<'_, T>,
  blk_w: usize, blk_h: usize,
) -> u64 {
  let mut sse = 0u64;

  for (slice_org, slice_ref) in
    plane_org.rows_iter().take(blk_h).zip(plane_ref.rows_iter())
  {
    sse += slice_org
      .iter()
      .take(blk_w)
      .zip(slice_ref)
      .map(|(&a, &b)| {
        let d = (i32::cast_from(a) - i32::cast_from(b)) as i64;
        (d * d) as u64
      })
      .sum::<u64>();
  }

  sse
}

#[inline(always)]
fn butterfly(a: i32, b: i32) -> (i32, i32) {
  ((a + b), (a - b))
}

#[inline(always)]
#[allow(clippy::identity_op, clippy::erasing_op)]
fn hadamard4_1d(data: &mut [i32], n: usize, stride0: usize, stride1: usize) {
  for i in 0..n {
    let sub: &mut [i32] = &mut data[i * stride0..];
    let (a0, a1) = butterfly(sub[0 * stride1], sub[1 * stride1]);
    let (a2, a3) = butterfly(sub[2 * stride1], sub[3 * stride1]);
    let (b0, b2) = butterfly(a0, a2);
    let (b1, b3) = butterfly(a1, a3);
    sub[0 * stride1] = b0;
    sub[1 * stride1] = b1;
    sub[2 * stride1] = b2;
    sub[3 * stride1] = b3;
  }
}

#[inline(always)]
#[allow(clippy::identity_op, clippy::erasing_op)]
fn hadamard8_1d(data: &mut [i32], n: usize, stride0: usize, stride1: usize) {
  for i in 0..n {
    let sub: &mut [i32] = &mut data[i * stride0..];

    let (a0, a1) = butterfly(sub[0 * stride1], sub[1 * stride1]);
    let (a2, a3) = butterfly(sub[2 * stride1], sub[3 * stride1]);
    let (a4, a5) = butterfly(sub[4 * stride1], sub[5 * stride1]);
    let (a6, a7) = butterfly(sub[6 * stride1], sub[7 * stride1]);

    let (b0, b2) = butterfly(a0, a2);
    let (b1, b3) = butterfly(a1, a3);
    let (b4, b6) = butterfly(a4, a6);
    let (b5, b7) = butterfly(a5, a7);

    let (c0, c4) = butterfly(b0, b4);
    let (c1, c5) = butterfly(b1, b5);
    let (c2, c6) = butterfly(b2, b6);
    let (c3, c7) = butterfly(b3, b7);

    sub[0 * stride1] = c0;
    sub[1 * stride1] = c1;
    sub[2 * stride1] = c2;
    sub[3 * stride1] = c3;
    sub[4 * stride1] = c4;
    sub[5 * stride1] = c5;
    sub[6 * stride1] = c6;
    sub[7 * stride1] = c7;
  }
}

#[inline(always)]
fn hadamard2d(data: &mut [i32], (w, h): (usize, usize)) {
  /*Vertical transform.*/
  let vert_func = if h == 4 { hadamard4_1d } else { hadamard8_1d };
  vert_func(data, w, 1, h);
  /*Horizontal transform.*/
  let horz_func = if w == 4 { hadamard4_1d } else { hadamard8_1d };
  horz_func(data, h, w, 1);
}

fn hadamard4x4(data: &mut [i32]) {
  hadamard2d(data, (4, 4));
}

fn hadamard8x8(data: &mut [i32]) {
  hadamard2d(data, (8, 8));
}

/// Sum of absolute transformed differences
/// Use the sum of 4x4 and 8x8 hadamard transforms for the transform. 4x* and
/// *x4 blocks use 4x4 and all others use 8x8.
#[inline(always)]
pub fn get_satd<T: Pixel>(
  plane_org: &PlaneSlice<'_, T>, plane_ref: &PlaneSlice<'_, T>,
  blk_w: usize, blk_h: usize, _bit_depth: usize,
) -> u32 {
  let size: usize = blk_w.min(blk_h).min(8);
  let tx2d = if size == 4 { hadamard4x4 } else { hadamard8x8 };

  let mut sum = 0u64;

  // Loop over chunks the size of the chosen transform
  for chunk_y in (0..blk_h).step_by(size) {
    for chunk_x in (0..blk_w).step_by(size) {
      let chunk_org = plane_org.subslice(chunk_x, chunk_y);
      let chunk_ref = plane_ref.subslice(chunk_x, chunk_y);
      let buf: &mut [i32] = &mut [0; 8 * 8][..size * size];

      // Move the difference of the transforms to a buffer
      for (row_diff, (row_org, row_ref)) in buf
        .chunks_mut(size)
        .zip(chunk_org.rows_iter().zip(chunk_ref.rows_iter()))
      {
        for (diff, (a, b)) in
          row_diff.iter_mut().zip(row_org.iter().zip(row_ref.iter()))
        {
          *diff = i32::cast_from(*a) - i32::cast_from(*b);
        }
      }

      // Perform the hadamard transform on the differences
      tx2d(buf);

      // Sum the absolute values of the transformed differences
      sum += buf.iter().map(|a| a.unsigned_abs() as u64).sum::<u64>();
    }
  }

  // Normalize the results
  let ln = msb(size as i32) as u64;
  ((sum + (1 << ln >> 1)) >> ln) as u32
}

#[cfg(test)]
pub mod test {
  use super::*;
  use crate::plane::Plane;

  // Two planes with a fixed diagonal pattern difference
  fn setup_planes<T: Pixel>() -> (Plane<T>, Plane<T>) {
    let mut input_plane = Plane::new(640, 480, 128 + 8, 128 + 8);
    let mut rec_plane = Plane::new(640, 480, 128 + 8, 128 + 8);

    let xpad_off =
      (input_plane.cfg.xorigin - input_plane.cfg.xpad) as i32 - 8i32;

    for (i, row) in
      input_plane.data.chunks_mut(input_plane.cfg.stride).enumerate()
    {
      for (j, pixel) in row.iter_mut().enumerate() {
        let val = (j + i) as i32 - xpad_off & 255i32;
        assert!(val >= u8::MIN.into() && val <= u8::MAX.into());
        *pixel = T::cast_from(val);
      }
    }

    for (i, row) in rec_plane.data.chunks_mut(rec_plane.cfg.stride).enumerate()
    {
      for (j, pixel) in row.iter_mut().enumerate() {
        let val = j as i32 - i as i32 - xpad_off & 255i32;
        assert!(val >= u8::MIN.into() && val <= u8::MAX.into());
        *pixel = T::cast_from(val);
      }
    }

    (input_plane, rec_plane)
  }

  fn get_sad_same_inner<T: Pixel>() {
    let blocks: Vec<(usize, usize, u32)> = vec![
      (4, 4, 1912),
      (8, 8, 7824),
      (16, 16, 31136),
      (32, 32, 120128),
      (64, 64, 438912),
      (128, 128, 1689792),
    ];

    let bit_depth: usize = 8;
    let (input_plane, rec_plane) = setup_planes::<T>();

    for (w, h, expected) in blocks {
      let input_slice = input_plane.slice(crate::plane::PlaneOffset { x: 32, y: 40 });
      let rec_slice = rec_plane.slice(crate::plane::PlaneOffset { x: 32, y: 40 });

      assert_eq!(expected, get_sad(&input_slice, &rec_slice, w, h, bit_depth));
    }
  }

  #[test]
  fn get_sad_same_u8() {
    get_sad_same_inner::<u8>();
  }

  #[test]
  fn get_sad_same_u16() {
    get_sad_same_inner::<u16>();
  }

  #[test]
  fn sad_cutoff_exact_when_below() {
    let (input_plane, rec_plane) = setup_planes::<u8>();
    let a = input_plane.slice(crate::plane::PlaneOffset { x: 32, y: 40 });
    let b = rec_plane.slice(crate::plane::PlaneOffset { x: 32, y: 40 });
    let exact = get_sad(&a, &b, 16, 16, 8);
    assert_eq!(exact, get_sad_with_cutoff(&a, &b, 16, 16, 8, u32::MAX));
    // an exceeded cutoff must still report a value above the cutoff
    let est = get_sad_with_cutoff(&a, &b, 16, 16, 8, 100);
    assert!(est > 100);
  }

  #[test]
  fn satd_zero_on_identical() {
    let (input_plane, _) = setup_planes::<u8>();
    let a = input_plane.slice(crate::plane::PlaneOffset { x: 32, y: 40 });
    assert_eq!(0, get_satd(&a, &a, 16, 16, 8));
    assert_eq!(0, get_sad(&a, &a, 16, 16, 8));
    assert_eq!(0, get_sse(&a, &a, 16, 16));
  }

  #[test]
  fn satd_same_matches_reference() {
    let (input_plane, rec_plane) = setup_planes::<u8>();
    let a = input_plane.slice(crate::plane::PlaneOffset { x: 32, y: 40 });
    let b = rec_plane.slice(crate::plane::PlaneOffset { x: 32, y: 40 });
    assert_eq!(9984, get_satd(&a, &b, 16, 16, 8));
  }
}
