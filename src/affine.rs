// Copyright (c) 2019-2023, The mvsearch contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License. If
// the BSD 2 Clause License was not distributed with this source code in the
// LICENSE file, you can obtain it at www.opensource.org/licenses/bsd-license

use arrayvec::ArrayVec;
use log::debug;

use crate::config::{BlockParams, EngineConfig};
use crate::dist::{get_sad, get_satd};
use crate::inter::{build_bi_target, Block, PredDir, Scratch, SearchInputs};
use crate::mc::{predict_affine, AffineModelType};
use crate::mv::{MotionVector, MvPrecision};
use crate::mvcache::MvCache;
use crate::plane::{Plane, PlaneOffset, PlaneSlice};
use crate::rdcost::{RdCost, AMVP_MAX_CANDS};
use crate::util::{CastFromPrimitive, Pixel};

/// Affine predictor candidate list: up to two candidates, each a triple of
/// control-point vectors at quarter-pel precision.
#[derive(Clone, Debug, Default)]
pub struct AffineAmvp {
  pub cands: ArrayVec<[MotionVector; 3], AMVP_MAX_CANDS>,
}

impl AffineAmvp {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_slice(cands: &[[MotionVector; 3]]) -> Self {
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

  #[inline]
  pub fn get(&self, idx: usize) -> [MotionVector; 3] {
    self.cands.get(idx).copied().unwrap_or([MotionVector::ZERO; 3])
  }
}

/// Finalized affine motion state of one list.
#[derive(Clone, Copy, Debug)]
pub struct AffineListMotion {
  pub cpmv: [MotionVector; 3],
  pub pred: [MotionVector; 3],
  pub ref_idx: usize,
  pub mvp_idx: usize,
}

#[derive(Clone, Debug)]
pub struct AffineDecision {
  pub model: AffineModelType,
  pub dir: PredDir,
  pub l0: Option<AffineListMotion>,
  pub l1: Option<AffineListMotion>,
  pub bits: u32,
  pub cost: u64,
}

/// Control-point mvd bits. Control points past the first are predicted
/// from their own candidate plus the first point's delta, so a pure
/// translation costs the extra points nothing.
fn affine_mv_bits(
  cpmv: &[MotionVector; 3], pred: &[MotionVector; 3], num_points: usize,
) -> u32 {
  let mut bits = 0;
  let d0 = cpmv[0] - pred[0];
  for i in 0..num_points {
    let eff_pred = if i == 0 { pred[0] } else { pred[i] + d0 };
    bits += RdCost::mv_bits(cpmv[i], eff_pred, 0);
  }
  bits
}

// same, for control points still at internal precision during the
// gradient loop; mvd components are truncated to the quarter grid
fn affine_mv_bits_internal(
  cpmv: &[MotionVector; 3], pred_q: &[MotionVector; 3], num_points: usize,
) -> u32 {
  let mv0_q =
    cpmv[0].change_precision(MvPrecision::Internal, MvPrecision::Quarter);
  let d0 = mv0_q - pred_q[0];
  let mut bits = 0;
  for i in 0..num_points {
    let eff_pred = if i == 0 { pred_q[0] } else { pred_q[i] + d0 };
    let trunc = MotionVector::new(cpmv[i].col >> 2, cpmv[i].row >> 2);
    bits += RdCost::mv_bits(trunc, eff_pred, 0);
  }
  bits
}

#[derive(Clone, Copy, Debug)]
struct AffineAmvpSelection {
  idx: usize,
  pred: [MotionVector; 3],
}

/// Template-matching selection of the affine predictor, Hadamard metric.
fn estimate_affine_amvp<T: Pixel>(
  rd: RdCost, org: &PlaneSlice<'_, T>, rf: &Plane<T>, po: PlaneOffset,
  blk_w: usize, blk_h: usize, model: AffineModelType, amvp: &AffineAmvp,
  pic_w: usize, pic_h: usize, bit_depth: usize, scratch: &mut Plane<T>,
) -> AffineAmvpSelection {
  let mut best = AffineAmvpSelection { idx: 0, pred: amvp.get(0) };
  let mut best_cost = u64::MAX;

  for (idx, cand) in amvp.cands.iter().enumerate() {
    let cpmv = to_internal_clipped(cand, po, pic_w, pic_h);
    predict_affine(
      scratch,
      PlaneOffset { x: 0, y: 0 },
      rf,
      po,
      blk_w,
      blk_h,
      &cpmv,
      model,
      pic_w,
      pic_h,
      bit_depth,
    );
    let pred_slice = scratch.slice(PlaneOffset { x: 0, y: 0 });
    let dist = get_satd(org, &pred_slice, blk_w, blk_h, bit_depth) as u64;
    let cost = dist + rd.mv_cost(RdCost::mvp_idx_bits(idx, amvp.len()));
    if cost < best_cost {
      best_cost = cost;
      best = AffineAmvpSelection { idx, pred: *cand };
    }
  }

  best
}

fn to_internal_clipped(
  cpmv: &[MotionVector; 3], po: PlaneOffset, pic_w: usize, pic_h: usize,
) -> [MotionVector; 3] {
  let mut out = [MotionVector::ZERO; 3];
  for (o, mv) in out.iter_mut().zip(cpmv.iter()) {
    *o = mv
      .change_precision(MvPrecision::Quarter, MvPrecision::Internal)
      .clip_to_picture(
        po.x as usize,
        po.y as usize,
        crate::me::MAX_BLOCK_SIZE,
        pic_w,
        pic_h,
        MvPrecision::Internal,
      );
  }
  out
}

/// Reselects the affine predictor index once the control points are fixed,
/// adjusting the running totals by the bit delta.
fn check_best_affine_mvp(
  rd: RdCost, amvp: &AffineAmvp, num_points: usize,
  cpmv: &[MotionVector; 3], cur_idx: usize, bits: u32, cost: u64,
) -> (usize, [MotionVector; 3], u32, u64) {
  if amvp.len() < 2 {
    return (cur_idx, amvp.get(cur_idx), bits, cost);
  }

  let org_bits = affine_mv_bits(cpmv, &amvp.get(cur_idx), num_points)
    + RdCost::mvp_idx_bits(cur_idx, amvp.len());
  let mut best_idx = cur_idx;
  let mut best_bits = org_bits;

  for idx in 0..amvp.len() {
    if idx == cur_idx {
      continue;
    }
    let b = affine_mv_bits(cpmv, &amvp.get(idx), num_points)
      + RdCost::mvp_idx_bits(idx, amvp.len());
    if b < best_bits {
      best_bits = b;
      best_idx = idx;
    }
  }

  if best_idx == cur_idx {
    return (cur_idx, amvp.get(cur_idx), bits, cost);
  }
  let new_bits = bits - org_bits + best_bits;
  let new_cost = (cost - rd.mv_cost(bits)) + rd.mv_cost(new_bits);
  (best_idx, amvp.get(best_idx), new_bits, new_cost)
}

fn sobel_gradients<T: Pixel>(
  pred: &Plane<T>, w: usize, h: usize, gx: &mut [i32], gy: &mut [i32],
) {
  let p = |x: usize, y: usize| i32::cast_from(pred.p(x, y));
  for y in 1..h - 1 {
    for x in 1..w - 1 {
      let idx = y * w + x;
      gx[idx] = (p(x + 1, y - 1) - p(x - 1, y - 1))
        + 2 * (p(x + 1, y) - p(x - 1, y))
        + (p(x + 1, y + 1) - p(x - 1, y + 1));
      gy[idx] = (p(x - 1, y + 1) - p(x - 1, y - 1))
        + 2 * (p(x, y + 1) - p(x, y - 1))
        + (p(x + 1, y + 1) - p(x + 1, y - 1));
    }
  }
  // replicate the border gradients from the interior
  for y in 1..h - 1 {
    gx[y * w] = gx[y * w + 1];
    gx[y * w + w - 1] = gx[y * w + w - 2];
    gy[y * w] = gy[y * w + 1];
    gy[y * w + w - 1] = gy[y * w + w - 2];
  }
  for x in 0..w {
    gx[x] = gx[w + x];
    gx[(h - 1) * w + x] = gx[(h - 2) * w + x];
    gy[x] = gy[w + x];
    gy[(h - 1) * w + x] = gy[(h - 2) * w + x];
  }
}

fn accumulate_normal_equations(
  err: &[i32], gx: &[i32], gy: &[i32], w: usize, h: usize, six: bool,
  coeff: &mut [[i64; 7]; 7],
) {
  let n = if six { 6 } else { 4 };
  for j in 0..h {
    let cy = (((j >> 2) << 2) + 2) as i64;
    for i in 0..w {
      let cx = (((i >> 2) << 2) + 2) as i64;
      let idx = j * w + i;
      let gxv = gx[idx] as i64;
      let gyv = gy[idx] as i64;
      let c: [i64; 6] = if six {
        [gxv, cx * gxv, gyv, cx * gyv, cy * gxv, cy * gyv]
      } else {
        [gxv, cx * gxv + cy * gyv, gyv, cy * gxv - cx * gyv, 0, 0]
      };
      for col in 0..n {
        for row in 0..n {
          coeff[col + 1][row] += c[col] * c[row];
        }
        coeff[col + 1][n] += (c[col] * err[idx] as i64) << 3;
      }
    }
  }
}

/// Gaussian elimination with partial pivoting. A degenerate pivot leaves
/// the parameters at zero, skipping the update for that iteration.
fn solve_equal(
  coeff: &mut [[f64; 7]; 7], order: usize, result: &mut [f64; 6],
) {
  for r in result.iter_mut().take(order) {
    *r = 0.0;
  }

  // row echelon
  for i in 1..order {
    let mut temp = coeff[i][i - 1].abs();
    let mut temp_idx = i;
    for j in i + 1..=order {
      if coeff[j][i - 1].abs() > temp {
        temp = coeff[j][i - 1].abs();
        temp_idx = j;
      }
    }
    if temp_idx != i {
      coeff.swap(i, temp_idx);
    }
    if coeff[i][i - 1] == 0.0 {
      return;
    }
    for j in i + 1..=order {
      for k in i..=order {
        coeff[j][k] -= coeff[i][k] * coeff[j][i - 1] / coeff[i][i - 1];
      }
    }
  }

  if coeff[order][order - 1] == 0.0 {
    return;
  }
  result[order - 1] = coeff[order][order] / coeff[order][order - 1];
  for i in (0..order - 1).rev() {
    if coeff[i + 1][i] == 0.0 {
      for r in result.iter_mut().take(order) {
        *r = 0.0;
      }
      return;
    }
    let mut temp = 0.0;
    for j in i + 1..order {
      temp += coeff[i + 1][j] * result[j];
    }
    result[i] = (coeff[i + 1][order] - temp) / coeff[i + 1][i];
  }
}

#[inline]
fn quarter_round(v: f64) -> i16 {
  let r = (v * 4.0 + v.signum() * 0.5) as i32;
  ((r << 2).clamp(i16::MIN as i32, i16::MAX as i32)) as i16
}

struct AffineMeBufs<'b, T: Pixel> {
  pred_plane: &'b mut Plane<T>,
  err: &'b mut [i32],
  gx: &'b mut [i32],
  gy: &'b mut [i32],
}

/// Iterative gradient refinement of the control-point vectors: prediction
/// error and Sobel gradients feed a small normal-equations system whose
/// solution is a parametric delta, converted to per-control-point deltas
/// and applied until the budgeted iteration count or a zero delta. A final
/// perturbation pass tests a handful of fixed control-point substitutions
/// the gradient solver cannot reach.
fn affine_me<T: Pixel>(
  rd: RdCost, target: &PlaneSlice<'_, T>, rf: &Plane<T>, po: PlaneOffset,
  blk_w: usize, blk_h: usize, model: AffineModelType,
  pred_q: &[MotionVector; 3], start_q: &[MotionVector; 3], base_bits: u32,
  weight: f64, bi: bool, perturb_gate: u64, pic_w: usize, pic_h: usize,
  bit_depth: usize, use_satd: bool, bufs: &mut AffineMeBufs<'_, T>,
) -> ([MotionVector; 3], u32, u64) {
  let n = model.num_points();
  let six = model == AffineModelType::SixParam;

  let metric = |scratch: &Plane<T>| -> u64 {
    let pred_slice = scratch.slice(PlaneOffset { x: 0, y: 0 });
    if use_satd {
      get_satd(target, &pred_slice, blk_w, blk_h, bit_depth) as u64
    } else {
      get_sad(target, &pred_slice, blk_w, blk_h, bit_depth) as u64
    }
  };

  let mut cur = to_internal_clipped(start_q, po, pic_w, pic_h);
  predict_affine(
    bufs.pred_plane,
    PlaneOffset { x: 0, y: 0 },
    rf,
    po,
    blk_w,
    blk_h,
    &cur,
    model,
    pic_w,
    pic_h,
    bit_depth,
  );
  let dist = metric(bufs.pred_plane);
  let mut best_bits = base_bits + affine_mv_bits_internal(&cur, pred_q, n);
  let mut best_cost =
    (dist as f64 * weight).floor() as u64 + rd.mv_cost(best_bits);
  let mut best = cur;

  let iterations = match (six, bi) {
    (true, true) => 3,
    (true, false) => 4,
    (false, true) => 3,
    (false, false) => 5,
  };

  for _iter in 0..iterations {
    // prediction error of the current model
    for y in 0..blk_h {
      let trow = target.row(y);
      for x in 0..blk_w {
        bufs.err[y * blk_w + x] = i32::cast_from(trow[x])
          - i32::cast_from(bufs.pred_plane.p(x, y));
      }
    }

    sobel_gradients(bufs.pred_plane, blk_w, blk_h, bufs.gx, bufs.gy);

    let mut icoeff = [[0i64; 7]; 7];
    accumulate_normal_equations(
      bufs.err, bufs.gx, bufs.gy, blk_w, blk_h, six, &mut icoeff,
    );
    let mut coeff = [[0f64; 7]; 7];
    for (frow, irow) in coeff.iter_mut().zip(icoeff.iter()) {
      for (f, &i) in frow.iter_mut().zip(irow.iter()) {
        *f = i as f64;
      }
    }

    let order = if six { 6 } else { 4 };
    let mut para = [0f64; 6];
    solve_equal(&mut coeff, order, &mut para);

    // parametric solution to per-control-point deltas, in pel units
    let w = blk_w as f64;
    let h = blk_h as f64;
    let (d0x, d0y) = (para[0], para[2]);
    let (d1x, d1y, d2x, d2y) = if six {
      (
        para[1] * w + para[0],
        para[3] * w + para[2],
        para[4] * h + para[0],
        para[5] * h + para[2],
      )
    } else {
      (para[1] * w + para[0], -para[3] * w + para[2], 0.0, 0.0)
    };

    let mut delta = [MotionVector::ZERO; 3];
    delta[0] = MotionVector::new(quarter_round(d0x), quarter_round(d0y));
    delta[1] = MotionVector::new(quarter_round(d1x), quarter_round(d1y));
    if six {
      delta[2] = MotionVector::new(quarter_round(d2x), quarter_round(d2y));
    }

    if delta.iter().take(n).all(|d| d.is_zero()) {
      break;
    }

    for i in 0..n {
      cur[i] = MotionVector::new(
        cur[i].col.saturating_add(delta[i].col),
        cur[i].row.saturating_add(delta[i].row),
      )
      .clamped(-32760, 32760, -32760, 32760)
      .rounded_to(MvPrecision::Internal, MvPrecision::Quarter)
      .clip_to_picture(
          po.x as usize,
          po.y as usize,
          crate::me::MAX_BLOCK_SIZE,
          pic_w,
          pic_h,
          MvPrecision::Internal,
        );
    }

    predict_affine(
      bufs.pred_plane,
      PlaneOffset { x: 0, y: 0 },
      rf,
      po,
      blk_w,
      blk_h,
      &cur,
      model,
      pic_w,
      pic_h,
      bit_depth,
    );
    let dist = metric(bufs.pred_plane);
    let bits = base_bits + affine_mv_bits_internal(&cur, pred_q, n);
    let cost = (dist as f64 * weight).floor() as u64 + rd.mv_cost(bits);

    if cost < best_cost {
      best_cost = cost;
      best_bits = bits;
      best = cur;
    }
  }

  // local perturbations of individual control points, only worthwhile when
  // the gradient result is already competitive
  if best_cost <= perturb_gate {
    let mut try_cpmv = |cand: &[MotionVector; 3],
                        best: &mut [MotionVector; 3],
                        best_bits: &mut u32,
                        best_cost: &mut u64| {
      predict_affine(
        bufs.pred_plane,
        PlaneOffset { x: 0, y: 0 },
        rf,
        po,
        blk_w,
        blk_h,
        cand,
        model,
        pic_w,
        pic_h,
        bit_depth,
      );
      let pred_slice = bufs.pred_plane.slice(PlaneOffset { x: 0, y: 0 });
      let dist = if use_satd {
        get_satd(target, &pred_slice, blk_w, blk_h, bit_depth) as u64
      } else {
        get_sad(target, &pred_slice, blk_w, blk_h, bit_depth) as u64
      };
      let bits = base_bits + affine_mv_bits_internal(cand, pred_q, n);
      let cost = (dist as f64 * weight).floor() as u64 + rd.mv_cost(bits);
      if cost < *best_cost {
        *best_cost = cost;
        *best_bits = bits;
        *best = *cand;
      }
    };

    let pred_i = to_internal_clipped(pred_q, po, pic_w, pic_h);
    let mv_me = best;
    let d_mv = mv_me[0] - pred_i[0];

    // substitute single control points by their predictors
    for j in 0..n {
      let differs = if j == 0 {
        mv_me[0] != pred_i[0]
      } else {
        mv_me[j] != pred_i[j] + d_mv
      };
      if differs {
        let mut cand = mv_me;
        cand[j] = pred_i[j];
        if j != 0 {
          cand[j] = cand[j] + d_mv;
        }
        try_cpmv(&cand, &mut best, &mut best_bits, &mut best_cost);
      }
    }

    // keep the rotation/zoom, drop the translation back to the predictor
    if mv_me[0] != pred_i[0] {
      let mut cand = mv_me;
      for c in cand.iter_mut().take(n).skip(1) {
        *c = *c - d_mv;
      }
      cand[0] = pred_i[0];
      try_cpmv(&cand, &mut best, &mut best_bits, &mut best_cost);
    }

    // keep the translation, drop the shear back to the predictor
    if six && mv_me[1] != pred_i[1] + d_mv && mv_me[2] != pred_i[2] + d_mv {
      let mut cand = mv_me;
      cand[1] = pred_i[1] + d_mv;
      cand[2] = pred_i[2] + d_mv;
      try_cpmv(&cand, &mut best, &mut best_bits, &mut best_cost);
    }

    // wide 4-parameter models: nudge the second control point one quarter
    // pel in each direction
    if !six {
      let d = best[1] - best[0];
      if d.col.abs() > 4 || d.row.abs() > 4 {
        const TEST_POS: [(i16, i16); 4] = [(-1, 0), (0, -1), (0, 1), (1, 0)];
        let center = best;
        for (dx, dy) in TEST_POS {
          let mut cand = center;
          cand[1] =
            MotionVector::new(cand[1].col + (dx << 2), cand[1].row + (dy << 2));
          try_cpmv(&cand, &mut best, &mut best_bits, &mut best_cost);
        }
      }
    }
  }

  let mut out = [MotionVector::ZERO; 3];
  for (o, mv) in out.iter_mut().zip(best.iter()) {
    *o =
      mv.change_precision(MvPrecision::Internal, MvPrecision::Quarter);
  }
  (out, best_bits, best_cost)
}

#[derive(Clone, Copy, Debug)]
struct AffineUniResult {
  cpmv: [MotionVector; 3],
  pred: [MotionVector; 3],
  mvp_idx: usize,
  bits: u32,
  cost: u64,
}

/// Searches one affine model type over both lists and the bi-predictive
/// combination, mirroring the translational optimizer's structure.
fn affine_model_search<T: Pixel>(
  model: AffineModelType, rd: RdCost, cfg: &EngineConfig,
  params: &BlockParams, inputs: &SearchInputs<'_, T>, block: &Block,
  trans_seeds: &[Vec<Option<MotionVector>>; 2], trans_best_cost: u64,
  four_param_winners: &[Option<[MotionVector; 3]>; 2], cache: &mut MvCache,
  scratch: &mut Scratch<T>,
) -> Option<AffineDecision> {
  let po = block.plane_offset();
  let pic_w = inputs.org.cfg.width;
  let pic_h = inputs.org.cfg.height;
  let bd = cfg.bit_depth;
  let n = model.num_points();
  let mode_bits = RdCost::mode_bits(inputs.b_slice);
  let num_lists = if inputs.b_slice { 2 } else { 1 };

  let mut results: [Vec<Option<AffineUniResult>>; 2] =
    [vec![None; inputs.refs[0].len()], vec![None; inputs.refs[1].len()]];
  let mut best_uni: [Option<(AffineUniResult, usize)>; 2] = [None, None];

  for list in 0..num_lists {
    for ref_idx in 0..inputs.refs[list].len() {
      let rp = &inputs.refs[list][ref_idx];
      let Some(amvp) = &rp.affine_amvp else { continue };
      if amvp.is_empty() {
        continue;
      }
      let base_bits = mode_bits[list]
        + RdCost::ref_idx_bits(ref_idx, inputs.refs[list].len());

      let org_slice = inputs.org.slice(po);
      let sel = estimate_affine_amvp(
        rd,
        &org_slice,
        rp.plane,
        po,
        block.w,
        block.h,
        model,
        amvp,
        pic_w,
        pic_h,
        bd,
        &mut scratch.pred,
      );
      let bits_with_idx =
        base_bits + RdCost::mvp_idx_bits(sel.idx, amvp.len());

      let mut r = if let Some((cpmv, dist)) =
        cache.get_affine(model, list, ref_idx)
      {
        let bits = bits_with_idx + affine_mv_bits(&cpmv, &sel.pred, n);
        AffineUniResult {
          cpmv,
          pred: sel.pred,
          mvp_idx: sel.idx,
          bits,
          cost: dist + rd.mv_cost(bits),
        }
      } else {
        // competing seeds: the predictor itself, the translational
        // winner broadcast to all control points, inherited neighbor
        // models, and the 4-parameter winner when refining 6-parameter
        let mut seeds: ArrayVec<[MotionVector; 3], 8> = ArrayVec::new();
        seeds.push(sel.pred);
        if let Some(mv) = trans_seeds[list][ref_idx] {
          seeds.push([mv, mv, mv]);
        }
        for s in inputs.affine_seeds.iter().take(4) {
          let _ = seeds.try_push(*s);
        }
        if model == AffineModelType::SixParam {
          if let Some(w4) = four_param_winners[list] {
            let _ = seeds.try_push(w4);
          }
        }

        let mut start = sel.pred;
        let mut start_cost = u64::MAX;
        for seed in &seeds {
          let cpmv = to_internal_clipped(seed, po, pic_w, pic_h);
          predict_affine(
            &mut scratch.pred,
            PlaneOffset { x: 0, y: 0 },
            rp.plane,
            po,
            block.w,
            block.h,
            &cpmv,
            model,
            pic_w,
            pic_h,
            bd,
          );
          let pred_slice = scratch.pred.slice(PlaneOffset { x: 0, y: 0 });
          let dist =
            get_satd(&org_slice, &pred_slice, block.w, block.h, bd) as u64;
          if dist < start_cost {
            start_cost = dist;
            start = *seed;
          }
        }

        let Scratch { affine_pred, err, gx, gy, .. } = &mut *scratch;
        let mut bufs = AffineMeBufs {
          pred_plane: affine_pred,
          err: err.as_mut_slice(),
          gx: gx.as_mut_slice(),
          gy: gy.as_mut_slice(),
        };
        let (cpmv, bits, cost) = affine_me(
          rd,
          &org_slice,
          rp.plane,
          po,
          block.w,
          block.h,
          model,
          &sel.pred,
          &start,
          bits_with_idx,
          1.0,
          false,
          trans_best_cost,
          pic_w,
          pic_h,
          bd,
          cfg.use_satd_subpel,
          &mut bufs,
        );
        cache.put_affine(
          model,
          list,
          ref_idx,
          cpmv,
          cost - rd.mv_cost(bits),
        );
        AffineUniResult {
          cpmv,
          pred: sel.pred,
          mvp_idx: sel.idx,
          bits,
          cost,
        }
      };

      let (idx, pred, bits, cost) = check_best_affine_mvp(
        rd, amvp, n, &r.cpmv, r.mvp_idx, r.bits, r.cost,
      );
      r.mvp_idx = idx;
      r.pred = pred;
      r.bits = bits;
      r.cost = cost;

      results[list][ref_idx] = Some(r);
      if best_uni[list].map_or(true, |(b, _)| r.cost < b.cost) {
        best_uni[list] = Some((r, ref_idx));
      }
    }
  }

  // bi-predictive affine refinement, seeded from the uni winners
  let bi = if params.allow_bipred
    && best_uni[0].is_some()
    && best_uni[1].is_some()
  {
    affine_bi_refine(
      model, rd, cfg, inputs, block, &mode_bits, &mut results, &best_uni,
      trans_best_cost, scratch,
    )
  } else {
    None
  };

  let cost0 = best_uni[0].map_or(u64::MAX, |(r, _)| r.cost);
  let cost1 = best_uni[1].map_or(u64::MAX, |(r, _)| r.cost);
  let cost_bi = bi.as_ref().map_or(u64::MAX, |b| b.cost);

  if cost0 == u64::MAX && cost1 == u64::MAX && cost_bi == u64::MAX {
    return None;
  }

  let to_list_motion = |r: AffineUniResult, ref_idx: usize| AffineListMotion {
    cpmv: r.cpmv,
    pred: r.pred,
    ref_idx,
    mvp_idx: r.mvp_idx,
  };

  Some(if cost_bi <= cost0 && cost_bi <= cost1 {
    let b = bi.unwrap();
    AffineDecision {
      model,
      dir: PredDir::Bi,
      l0: Some(b.l[0]),
      l1: Some(b.l[1]),
      bits: b.bits,
      cost: b.cost,
    }
  } else if cost0 <= cost1 {
    let (r, ref_idx) = best_uni[0].unwrap();
    AffineDecision {
      model,
      dir: PredDir::L0,
      l0: Some(to_list_motion(r, ref_idx)),
      l1: None,
      bits: r.bits,
      cost: r.cost,
    }
  } else {
    let (r, ref_idx) = best_uni[1].unwrap();
    AffineDecision {
      model,
      dir: PredDir::L1,
      l0: None,
      l1: Some(to_list_motion(r, ref_idx)),
      bits: r.bits,
      cost: r.cost,
    }
  })
}

struct AffineBiOutcome {
  l: [AffineListMotion; 2],
  bits: u32,
  cost: u64,
}

fn affine_bi_refine<T: Pixel>(
  model: AffineModelType, rd: RdCost, cfg: &EngineConfig,
  inputs: &SearchInputs<'_, T>, block: &Block, mode_bits: &[u32; 3],
  results: &mut [Vec<Option<AffineUniResult>>; 2],
  best_uni: &[Option<(AffineUniResult, usize)>; 2], trans_best_cost: u64,
  scratch: &mut Scratch<T>,
) -> Option<AffineBiOutcome> {
  let po = block.plane_offset();
  let pic_w = inputs.org.cfg.width;
  let pic_h = inputs.org.cfg.height;
  let bd = cfg.bit_depth;
  let n = model.num_points();

  let mut winner = [best_uni[0]?.0, best_uni[1]?.0];
  let mut ref_bi = [best_uni[0]?.1, best_uni[1]?.1];
  let mut mot_bits = [
    winner[0].bits - mode_bits[0],
    winner[1].bits - mode_bits[1],
  ];
  let mut bits_bi = mode_bits[2] + mot_bits[0] + mot_bits[1];
  let mut cost_bi = u64::MAX;

  // other-list prediction from the list 1 uni winner
  {
    let (r, ref_idx) = best_uni[1]?;
    let cpmv = to_internal_clipped(&r.cpmv, po, pic_w, pic_h);
    predict_affine(
      &mut scratch.other_pred[1],
      PlaneOffset { x: 0, y: 0 },
      inputs.refs[1][ref_idx].plane,
      po,
      block.w,
      block.h,
      &cpmv,
      model,
      pic_w,
      pic_h,
      bd,
    );
  }

  let num_iter = cfg.bi_iterations;
  for iter in 0..num_iter {
    let list = iter % 2;
    let other = 1 - list;

    build_bi_target(
      &mut scratch.bi_target,
      inputs.org,
      po,
      &scratch.other_pred[other],
      block.w,
      block.h,
      bd,
    );

    let mut changed = false;

    for ref_idx in 0..inputs.refs[list].len() {
      let Some(seed) = results[list][ref_idx] else { continue };
      let rp = &inputs.refs[list][ref_idx];
      let Some(amvp) = &rp.affine_amvp else { continue };

      let base_bits = mode_bits[2]
        + mot_bits[other]
        + RdCost::ref_idx_bits(ref_idx, inputs.refs[list].len())
        + RdCost::mvp_idx_bits(seed.mvp_idx, amvp.len());

      let Scratch { bi_target, affine_pred, err, gx, gy, .. } =
        &mut *scratch;
      let mut bufs = AffineMeBufs {
        pred_plane: affine_pred,
        err: err.as_mut_slice(),
        gx: gx.as_mut_slice(),
        gy: gy.as_mut_slice(),
      };
      let target = bi_target.slice(PlaneOffset { x: 0, y: 0 });
      let (cpmv, mut bits, mut cost) = affine_me(
        rd,
        &target,
        rp.plane,
        po,
        block.w,
        block.h,
        model,
        &seed.pred,
        &seed.cpmv,
        base_bits,
        0.5,
        true,
        trans_best_cost,
        pic_w,
        pic_h,
        bd,
        cfg.use_satd_subpel,
        &mut bufs,
      );

      let (idx, pred, b, c) = check_best_affine_mvp(
        rd, amvp, n, &cpmv, seed.mvp_idx, bits, cost,
      );
      bits = b;
      cost = c;

      // later rounds restart from this round's control points
      results[list][ref_idx] = Some(AffineUniResult {
        cpmv,
        pred,
        mvp_idx: idx,
        bits: seed.bits,
        cost: seed.cost,
      });

      if cost < cost_bi {
        changed = true;
        winner[list] = AffineUniResult {
          cpmv,
          pred,
          mvp_idx: idx,
          bits,
          cost,
        };
        ref_bi[list] = ref_idx;
        cost_bi = cost;
        mot_bits[list] = bits - mode_bits[2] - mot_bits[other];
        bits_bi = bits;

        if num_iter != 1 {
          let cpmv_i = to_internal_clipped(&cpmv, po, pic_w, pic_h);
          predict_affine(
            &mut scratch.other_pred[list],
            PlaneOffset { x: 0, y: 0 },
            rp.plane,
            po,
            block.w,
            block.h,
            &cpmv_i,
            model,
            pic_w,
            pic_h,
            bd,
          );
        }
      }
    }

    if !changed {
      break;
    }
  }

  if cost_bi == u64::MAX {
    return None;
  }

  Some(AffineBiOutcome {
    l: [
      AffineListMotion {
        cpmv: winner[0].cpmv,
        pred: winner[0].pred,
        ref_idx: ref_bi[0],
        mvp_idx: winner[0].mvp_idx,
      },
      AffineListMotion {
        cpmv: winner[1].cpmv,
        pred: winner[1].pred,
        ref_idx: ref_bi[1],
        mvp_idx: winner[1].mvp_idx,
      },
    ],
    bits: bits_bi,
    cost: cost_bi,
  })
}

/// Top-level affine hypothesis: the 4-parameter model always, the
/// 6-parameter model only when the 4-parameter cost lands within 105% of
/// the best translational cost. Adds the model-type signalling bit when
/// both models are enabled.
pub(crate) fn affine_search<T: Pixel>(
  rd: RdCost, cfg: &EngineConfig, params: &BlockParams,
  inputs: &SearchInputs<'_, T>, block: &Block,
  trans_seeds: &[Vec<Option<MotionVector>>; 2], trans_best_cost: u64,
  cache: &mut MvCache, scratch: &mut Scratch<T>,
) -> Option<AffineDecision> {
  let no_winners = [None, None];
  let four = affine_model_search(
    AffineModelType::FourParam,
    rd,
    cfg,
    params,
    inputs,
    block,
    trans_seeds,
    trans_best_cost,
    &no_winners,
    cache,
    scratch,
  )?;

  let mut best = four.clone();

  if cfg.enable_affine_six_param {
    // 6-parameter pruning heuristic
    if four.cost.saturating_mul(20) < trans_best_cost.saturating_mul(21) {
      let winners = [
        four.l0.map(|l| l.cpmv),
        four.l1.map(|l| l.cpmv),
      ];
      if let Some(six) = affine_model_search(
        AffineModelType::SixParam,
        rd,
        cfg,
        params,
        inputs,
        block,
        trans_seeds,
        trans_best_cost,
        &winners,
        cache,
        scratch,
      ) {
        if six.cost < best.cost {
          debug!("six-parameter affine wins: {} < {}", six.cost, best.cost);
          best = six;
        }
      }
    }
    // model-type flag
    best.bits += 1;
    best.cost += rd.mv_cost(1);
  }

  Some(best)
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn solver_recovers_diagonal_system() {
    // 4-parameter system with a dominant diagonal: x = [1, 2, 3, 4]
    let mut coeff = [[0f64; 7]; 7];
    let diag = [10.0, 20.0, 30.0, 40.0];
    for r in 0..4 {
      coeff[r + 1][r] = diag[r];
      coeff[r + 1][4] = diag[r] * (r as f64 + 1.0);
    }
    let mut out = [0f64; 6];
    solve_equal(&mut coeff, 4, &mut out);
    for (i, v) in out.iter().take(4).enumerate() {
      assert!((v - (i as f64 + 1.0)).abs() < 1e-9);
    }
  }

  #[test]
  fn solver_degenerate_pivot_yields_zero() {
    let mut coeff = [[0f64; 7]; 7];
    // first pivot column entirely zero
    coeff[1][1] = 5.0;
    let mut out = [1f64; 6];
    solve_equal(&mut coeff, 4, &mut out);
    // parameters were reset before the early return
    assert_eq!(&out[..4], &[0.0; 4]);
  }

  #[test]
  fn cp_bits_free_for_pure_translation() {
    let pred = [
      MotionVector::new(4, 4),
      MotionVector::new(8, 4),
      MotionVector::new(4, 8),
    ];
    // every control point moved by the same delta: only point 0 costs
    let d = MotionVector::new(12, -8);
    let cpmv = [pred[0] + d, pred[1] + d, pred[2] + d];
    let bits = affine_mv_bits(&cpmv, &pred, 3);
    let zero_bits = RdCost::mv_bits(MotionVector::ZERO, MotionVector::ZERO, 0);
    assert_eq!(
      bits,
      RdCost::mv_bits(cpmv[0], pred[0], 0) + 2 * zero_bits
    );
  }

  #[test]
  fn quarter_round_ties_away_from_zero() {
    assert_eq!(quarter_round(0.125), 4); // 0.125 pel -> 1 quarter -> 4/16
    assert_eq!(quarter_round(-0.125), -4);
    assert_eq!(quarter_round(0.0), 0);
  }

  #[test]
  fn zero_residual_converges_with_zero_delta() {
    // reference identical to the source: the gradient solver must leave
    // the control points untouched and the cost is the rate term alone
    let mut org = Plane::<u8>::new(32, 32, 16, 16);
    for y in 0..32usize {
      for x in 0..32usize {
        let i = (y + org.cfg.yorigin) * org.cfg.stride + x + org.cfg.xorigin;
        org.data[i] = ((x * 31 + y * 17) % 255) as u8;
      }
    }
    org.pad();
    let rf = org.clone();

    let rd = RdCost::select_lambda(30, false);
    let po = PlaneOffset { x: 8, y: 8 };
    let pred = [MotionVector::ZERO; 3];
    let mut pred_plane = Plane::new(16, 16, 0, 0);
    let mut err = vec![0i32; 16 * 16];
    let mut gx = vec![0i32; 16 * 16];
    let mut gy = vec![0i32; 16 * 16];
    let mut bufs = AffineMeBufs {
      pred_plane: &mut pred_plane,
      err: &mut err,
      gx: &mut gx,
      gy: &mut gy,
    };

    let org_slice = org.slice(po);
    let base_bits = 5;
    let (cpmv, bits, cost) = affine_me(
      rd,
      &org_slice,
      &rf,
      po,
      16,
      16,
      AffineModelType::FourParam,
      &pred,
      &pred,
      base_bits,
      1.0,
      false,
      u64::MAX,
      32,
      32,
      8,
      true,
      &mut bufs,
    );

    assert_eq!(cpmv, [MotionVector::ZERO; 3]);
    let expected_bits = base_bits + affine_mv_bits(&cpmv, &pred, 2);
    assert_eq!(bits, expected_bits);
    assert_eq!(cost, rd.mv_cost(expected_bits));
  }
}
