// Copyright (c) 2019-2023, The mvsearch contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License. If
// the BSD 2 Clause License was not distributed with this source code in the
// LICENSE file, you can obtain it at www.opensource.org/licenses/bsd-license

use arrayvec::ArrayVec;

use crate::dist::get_sad;
use crate::mc::predict_translational;
use crate::mv::{MotionVector, MvPrecision};
use crate::plane::{Plane, PlaneOffset, PlaneSlice};
use crate::rdcost::{RdCost, AMVP_MAX_CANDS};
use crate::util::Pixel;

/// Ordered predictor candidate list for one (list, reference) pair,
/// immutable once filled. Derivation from spatial/temporal neighbors is the
/// caller's concern; vectors are quarter-pel.
#[derive(Clone, Debug, Default)]
pub struct AmvpList {
  pub cands: ArrayVec<MotionVector, AMVP_MAX_CANDS>,
}

impl AmvpList {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_slice(cands: &[MotionVector]) -> Self {
    let mut list = Self::new();
    for &c in cands.iter().take(AMVP_MAX_CANDS) {
      list.cands.push(c);
    }
    list
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.cands.len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.cands.is_empty()
  }

  /// Candidate by index; an empty list degenerates to the zero vector.
  #[inline]
  pub fn get(&self, idx: usize) -> MotionVector {
    self.cands.get(idx).copied().unwrap_or(MotionVector::ZERO)
  }
}

#[derive(Clone, Copy, Debug)]
pub struct AmvpSelection {
  pub idx: usize,
  pub pred: MotionVector,
  /// Template-matching cost of the winning candidate, including its index
  /// signalling cost.
  pub cost: u64,
}

/// Evaluates every candidate by motion compensating the block at the
/// candidate vector and comparing against the co-located source samples,
/// seeding the integer search with the cheapest predictor.
pub fn select_initial<T: Pixel>(
  rd: RdCost, org: &PlaneSlice<'_, T>, rf: &Plane<T>, po: PlaneOffset,
  blk_w: usize, blk_h: usize, amvp: &AmvpList, pic_w: usize, pic_h: usize,
  bit_depth: usize, scratch: &mut Plane<T>,
) -> AmvpSelection {
  if amvp.is_empty() {
    return AmvpSelection { idx: 0, pred: MotionVector::ZERO, cost: u64::MAX };
  }

  let mut best =
    AmvpSelection { idx: 0, pred: amvp.get(0), cost: u64::MAX };

  for (idx, &cand) in amvp.cands.iter().enumerate() {
    let mv = cand
      .change_precision(MvPrecision::Quarter, MvPrecision::Internal)
      .clip_to_picture(
        po.x as usize,
        po.y as usize,
        crate::me::MAX_BLOCK_SIZE,
        pic_w,
        pic_h,
        MvPrecision::Internal,
      );
    predict_translational(
      scratch,
      PlaneOffset { x: 0, y: 0 },
      rf,
      po,
      blk_w,
      blk_h,
      mv,
      bit_depth,
    );
    let pred_slice = scratch.slice(PlaneOffset { x: 0, y: 0 });
    let sad = get_sad(org, &pred_slice, blk_w, blk_h, bit_depth) as u64;
    let cost =
      sad + rd.mv_cost(RdCost::mvp_idx_bits(idx, amvp.len()));

    if cost < best.cost {
      best = AmvpSelection { idx, pred: cand, cost };
    }
  }

  best
}

#[derive(Clone, Copy, Debug)]
pub struct Reselection {
  pub idx: usize,
  pub pred: MotionVector,
  pub bits: u32,
  pub cost: u64,
}

/// After the final vector is fixed, recomputes the signalling bits against
/// every candidate and swaps the predictor when another index is strictly
/// cheaper. The running totals are adjusted by the bit delta, not
/// re-derived, so the distortion term is untouched.
///
/// Defined only for quarter-pel resolution; for the coarser signalled
/// resolutions the joint integer refinement already fixed the pair.
pub fn reselect(
  rd: RdCost, mv: MotionVector, amvp: &AmvpList, cur_idx: usize, bits: u32,
  cost: u64,
) -> Reselection {
  let unchanged = Reselection { idx: cur_idx, pred: amvp.get(cur_idx), bits, cost };
  if amvp.len() < 2 {
    return unchanged;
  }

  let org_mv_bits = RdCost::mv_bits(mv, amvp.get(cur_idx), 0)
    + RdCost::mvp_idx_bits(cur_idx, amvp.len());
  let mut best_idx = cur_idx;
  let mut best_mv_bits = org_mv_bits;

  for idx in 0..amvp.len() {
    if idx == cur_idx {
      continue;
    }
    let mv_bits = RdCost::mv_bits(mv, amvp.get(idx), 0)
      + RdCost::mvp_idx_bits(idx, amvp.len());
    if mv_bits < best_mv_bits {
      best_mv_bits = mv_bits;
      best_idx = idx;
    }
  }

  if best_idx == cur_idx {
    return unchanged;
  }

  let new_bits = bits - org_mv_bits + best_mv_bits;
  let new_cost = (cost - rd.mv_cost(bits)) + rd.mv_cost(new_bits);
  Reselection {
    idx: best_idx,
    pred: amvp.get(best_idx),
    bits: new_bits,
    cost: new_cost,
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn reselect_switches_to_cheaper_candidate() {
    let rd = RdCost::with_lambda_q16(4 << 16);
    let mv = MotionVector::new(40, 0);
    // candidate B coincides with the final vector, so its mvd is free
    let amvp = AmvpList::from_slice(&[
      MotionVector::new(0, 0),
      MotionVector::new(40, 0),
    ]);

    let bits_a = RdCost::mv_bits(mv, amvp.get(0), 0)
      + RdCost::mvp_idx_bits(0, AMVP_MAX_CANDS);
    let dist = 1000u64;
    let total_bits = 7 + bits_a;
    let cost = rd.cost(dist, total_bits);

    let r = reselect(rd, mv, &amvp, 0, total_bits, cost);
    assert_eq!(r.idx, 1);
    let bits_b = RdCost::mv_bits(mv, amvp.get(1), 0)
      + RdCost::mvp_idx_bits(1, AMVP_MAX_CANDS);
    assert_eq!(r.bits, 7 + bits_b);
    // bit-exact: distortion plus lambda times the new bit total
    assert_eq!(r.cost, rd.cost(dist, 7 + bits_b));
  }

  #[test]
  fn reselect_keeps_current_when_not_cheaper() {
    let rd = RdCost::with_lambda_q16(4 << 16);
    let mv = MotionVector::new(4, 4);
    let amvp = AmvpList::from_slice(&[
      MotionVector::new(4, 4),
      MotionVector::new(-64, 64),
    ]);
    let r = reselect(rd, mv, &amvp, 0, 10, 500);
    assert_eq!(r.idx, 0);
    assert_eq!(r.bits, 10);
    assert_eq!(r.cost, 500);
  }

  #[test]
  fn short_list_skips_reselection() {
    let rd = RdCost::with_lambda_q16(1 << 16);
    let amvp = AmvpList::from_slice(&[MotionVector::ZERO]);
    let r = reselect(rd, MotionVector::new(8, 8), &amvp, 0, 12, 300);
    assert_eq!((r.idx, r.bits, r.cost), (0, 12, 300));
  }
}
