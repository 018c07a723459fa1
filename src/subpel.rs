// Copyright (c) 2019-2023, The mvsearch contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License. If
// the BSD 2 Clause License was not distributed with this source code in the
// LICENSE file, you can obtain it at www.opensource.org/licenses/bsd-license

use crate::amvp::AmvpList;
use crate::dist::{get_sad, get_satd};
use crate::mv::{MotionVector, MvPrecision};
use crate::plane::{Plane, PlaneOffset, PlaneSlice};
use crate::rdcost::{RdCost, AMVP_MAX_CANDS};
use crate::util::Pixel;

// center plus 8 neighbors, shared by the half- and quarter-pel passes;
// the quarter pass re-centers on the half-pel winner
const MV_REFINE: [(i16, i16); 9] = [
  (0, 0),
  (0, -1),
  (0, 1),
  (-1, 0),
  (1, 0),
  (-1, -1),
  (1, -1),
  (-1, 1),
  (1, 1),
];

#[derive(Clone, Copy, Debug)]
pub struct SubpelResult {
  /// Combined vector at quarter-pel precision.
  pub mv: MotionVector,
  /// Best distortion plus the motion-bit cost of the winning vector.
  pub cost: u64,
}

#[inline]
fn refine_metric<T: Pixel>(
  org: &PlaneSlice<'_, T>, pred: &PlaneSlice<'_, T>, blk_w: usize,
  blk_h: usize, bit_depth: usize, use_satd: bool,
) -> u64 {
  if use_satd {
    get_satd(org, pred, blk_w, blk_h, bit_depth) as u64
  } else {
    get_sad(org, pred, blk_w, blk_h, bit_depth) as u64
  }
}

fn refine_pass<T: Pixel>(
  rd: RdCost, org: &PlaneSlice<'_, T>, rf: &Plane<T>, po: PlaneOffset,
  blk_w: usize, blk_h: usize, pred: MotionVector, base: MotionVector,
  step: i16, bit_depth: usize, use_satd: bool, scratch: &mut Plane<T>,
) -> (MotionVector, u64) {
  let mut best_mv = base;
  let mut best_cost = u64::MAX;

  for &(dx, dy) in MV_REFINE.iter() {
    let cand = MotionVector::new(base.col + dx * step, base.row + dy * step);
    let mv_internal =
      cand.change_precision(MvPrecision::Quarter, MvPrecision::Internal);
    crate::mc::predict_translational(
      scratch,
      PlaneOffset { x: 0, y: 0 },
      rf,
      po,
      blk_w,
      blk_h,
      mv_internal,
      bit_depth,
    );
    let pred_slice = scratch.slice(PlaneOffset { x: 0, y: 0 });
    let dist =
      refine_metric(org, &pred_slice, blk_w, blk_h, bit_depth, use_satd);
    let cost = dist + rd.mv_cost(RdCost::mv_bits(cand, pred, 0));

    if cost < best_cost {
      best_cost = cost;
      best_mv = cand;
    }
  }

  (best_mv, best_cost)
}

/// Half- then quarter-pel refinement around the integer winner. The
/// distortion metric may switch to the transform-domain SATD, which tracks
/// coding cost better at sub-pel precision. The integer search window
/// already keeps a one-pel margin, so the candidates need no re-clipping.
pub fn frac_refine<T: Pixel>(
  rd: RdCost, org: &PlaneSlice<'_, T>, rf: &Plane<T>, po: PlaneOffset,
  blk_w: usize, blk_h: usize, pred: MotionVector, mv_int: MotionVector,
  bit_depth: usize, use_satd: bool, scratch: &mut Plane<T>,
) -> SubpelResult {
  let base = mv_int << MvPrecision::Quarter.shift();

  let (half_mv, _) = refine_pass(
    rd, org, rf, po, blk_w, blk_h, pred, base, 2, bit_depth, use_satd,
    scratch,
  );

  let (quarter_mv, quarter_cost) = refine_pass(
    rd, org, rf, po, blk_w, blk_h, pred, half_mv, 1, bit_depth, use_satd,
    scratch,
  );

  SubpelResult { mv: quarter_mv, cost: quarter_cost }
}

#[derive(Clone, Copy, Debug)]
pub struct IntRefineResult {
  pub mv: MotionVector,
  pub mvp_idx: usize,
  pub pred: MotionVector,
  pub bits: u32,
  pub cost: u64,
}

/// Joint (vector, predictor-index) refinement for the non-quarter signalled
/// resolutions. Tests the integer winner and its 8 neighbors at the target
/// grid against every predictor candidate simultaneously, which removes the
/// need for a separate reselection pass. Distortion is read at the
/// truncated whole-pel position.
pub fn int_precision_refine<T: Pixel>(
  rd: RdCost, org: &PlaneSlice<'_, T>, rf: &Plane<T>, po: PlaneOffset,
  blk_w: usize, blk_h: usize, amvp: &AmvpList, mv: MotionVector,
  prec_shift: u8, base_bits: u32, weight: f64, pic_w: usize, pic_h: usize,
  bit_depth: usize, use_satd: bool,
) -> IntRefineResult {
  debug_assert!(prec_shift > 0, "quarter resolution uses frac_refine");

  const TEST_POS: [(i16, i16); 9] = [
    (0, 0),
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
  ];

  let num_cands = amvp.len().max(1);
  let mv_offset = 1i16 << prec_shift;

  // per-candidate mvd snapped to the signalled grid
  let mut base_mvd = [MotionVector::ZERO; AMVP_MAX_CANDS];
  for (i, d) in base_mvd.iter_mut().enumerate().take(num_cands) {
    let raw = mv - amvp.get(i);
    let grid = if prec_shift >= 4 { MvPrecision::Int } else { MvPrecision::Quarter };
    // round the mvd so that candidate + mvd stays representable; 4-pel
    // snapping reuses the int grid then clears the remaining low pel bits
    let mut r = raw.rounded_to(MvPrecision::Quarter, grid);
    if prec_shift >= 4 {
      r = MotionVector::new((r.col >> 4) << 4, (r.row >> 4) << 4);
    }
    *d = r;
  }

  let mut best_cost = u64::MAX;
  let mut best_mv = mv;
  let mut best_idx = 0usize;
  let mut best_bits = 0u32;

  for &(dx, dy) in TEST_POS.iter() {
    let mut prev_test: Option<(MotionVector, u64)> = None;
    for idx in 0..num_cands {
      let test_mv = amvp.get(idx)
        + base_mvd[idx]
        + MotionVector::new(dx * mv_offset, dy * mv_offset);

      let dist = match prev_test {
        Some((mv0, d)) if mv0 == test_mv => d,
        _ => {
          // clamp the read position to the padded allocation; the bit
          // estimate below still uses the unclipped vector
          let margin = rf.cfg.xpad.min(rf.cfg.ypad) as i32;
          let col_min = (-(po.x as i32) - margin) << 2;
          let col_max =
            ((pic_w as i32 - po.x as i32 - blk_w as i32 + margin) << 2) - 1;
          let row_min = (-(po.y as i32) - margin) << 2;
          let row_max =
            ((pic_h as i32 - po.y as i32 - blk_h as i32 + margin) << 2) - 1;
          let read_mv = test_mv.clamped(col_min, col_max, row_min, row_max);
          let rf_slice = rf.slice(PlaneOffset {
            x: po.x + (read_mv.col >> 2) as isize,
            y: po.y + (read_mv.row >> 2) as isize,
          });
          let d = refine_metric(
            org, &rf_slice, blk_w, blk_h, bit_depth, use_satd,
          );
          let d = (d as f64 * weight).floor() as u64;
          prev_test = Some((test_mv, d));
          d
        }
      };

      let mv_bits = RdCost::mvp_idx_bits(idx, amvp.len())
        + RdCost::mv_bits(test_mv, amvp.get(idx), prec_shift);
      let cost = dist + rd.mv_cost(mv_bits);

      if cost < best_cost {
        best_cost = cost;
        best_mv = test_mv;
        best_idx = idx;
        best_bits = mv_bits;
      }
    }
  }

  let bits = base_bits + best_bits;
  let cost = best_cost - rd.mv_cost(best_bits) + rd.mv_cost(bits);
  IntRefineResult {
    mv: best_mv,
    mvp_idx: best_idx,
    pred: amvp.get(best_idx),
    bits,
    cost,
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::me::test::matched_planes;

  #[test]
  fn quarter_zero_offset_wins_on_exact_integer_match() {
    let (org, rf, po) = matched_planes(3, 2);
    let rd = RdCost::select_lambda(28, false);
    let org_slice = org.slice(po);
    let mut scratch = Plane::new(16, 16, 0, 0);
    let r = frac_refine(
      rd,
      &org_slice,
      &rf,
      po,
      16,
      16,
      MotionVector::ZERO,
      MotionVector::new(3, 2),
      8,
      false,
      &mut scratch,
    );
    assert_eq!(r.mv, MotionVector::new(12, 8));
    let bits = RdCost::mv_bits(r.mv, MotionVector::ZERO, 0);
    assert_eq!(r.cost, rd.mv_cost(bits));
  }

  #[test]
  fn int_refine_snaps_to_signalled_grid() {
    let (org, rf, po) = matched_planes(4, 0);
    let rd = RdCost::select_lambda(28, false);
    let org_slice = org.slice(po);
    let amvp = AmvpList::from_slice(&[
      MotionVector::ZERO,
      MotionVector::new(8, 8),
    ]);
    let r = int_precision_refine(
      rd,
      &org_slice,
      &rf,
      po,
      16,
      16,
      &amvp,
      MotionVector::new(16, 0),
      2,
      5,
      1.0,
      96,
      96,
      8,
      false,
    );
    // integer resolution: mvd against the chosen predictor is whole-pel
    let mvd = r.mv - r.pred;
    assert_eq!(mvd.col % 4, 0);
    assert_eq!(mvd.row % 4, 0);
    assert_eq!(r.mv, MotionVector::new(16, 0));
  }
}
