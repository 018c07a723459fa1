// Copyright (c) 2019-2023, The mvsearch contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License. If
// the BSD 2 Clause License was not distributed with this source code in the
// LICENSE file, you can obtain it at www.opensource.org/licenses/bsd-license

use log::debug;

use crate::affine::{affine_search, AffineAmvp, AffineDecision};
use crate::amvp::{reselect, select_initial, AmvpList};
use crate::config::{
  BlockParams, ConfigError, EngineConfig, ImvMode, SearchMethod,
};
use crate::mc::predict_translational;
use crate::me::{
  full_search, selective_search, tz_search, IntSearchResult, MeCtx,
  TzConfig, MAX_BLOCK_SIZE,
};
use crate::mv::{MotionVector, MvPrecision};
use crate::mvcache::{MvCache, MAX_REF_IDX};
use crate::plane::{Plane, PlaneOffset};
use crate::rdcost::RdCost;
use crate::subpel::{frac_refine, int_precision_refine};
use crate::util::Pixel;

/// One prediction unit: a rectangular region of the current picture.
#[derive(Clone, Copy, Debug)]
pub struct Block {
  pub x: usize,
  pub y: usize,
  pub w: usize,
  pub h: usize,
}

impl Block {
  #[inline]
  pub fn plane_offset(&self) -> PlaneOffset {
    PlaneOffset { x: self.x as isize, y: self.y as isize }
  }
}

/// One admissible reference picture for a list, with its externally derived
/// predictor candidates.
pub struct RefPlane<'a, T: Pixel> {
  pub plane: &'a Plane<T>,
  pub amvp: AmvpList,
  pub affine_amvp: Option<AffineAmvp>,
  /// For list 1 entries addressing the same picture as a list 0 entry: the
  /// list 0 index, enabling the search-reuse shortcut.
  pub same_as_l0: Option<usize>,
}

/// Everything the mode-decision caller supplies for one block search.
pub struct SearchInputs<'a, T: Pixel> {
  pub org: &'a Plane<T>,
  pub refs: [Vec<RefPlane<'a, T>>; 2],
  pub b_slice: bool,
  /// Affine control-point seeds inherited from neighboring blocks,
  /// quarter-pel.
  pub affine_seeds: Vec<[MotionVector; 3]>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredDir {
  L0,
  L1,
  Bi,
}

/// Finalized translational motion state of one list.
#[derive(Clone, Copy, Debug)]
pub struct ListMotion {
  pub mv: MotionVector,
  pub pred: MotionVector,
  pub ref_idx: usize,
  pub mvp_idx: usize,
}

impl ListMotion {
  #[inline]
  pub fn mvd(&self) -> MotionVector {
    self.mv - self.pred
  }
}

#[derive(Clone, Copy, Debug)]
pub struct TransDecision {
  pub dir: PredDir,
  pub l0: Option<ListMotion>,
  pub l1: Option<ListMotion>,
  pub bits: u32,
  pub cost: u64,
}

/// Finalized motion decision for one block. Exactly one hypothesis
/// survives; losing hypotheses leave no partial state behind.
#[derive(Clone, Debug)]
pub enum MotionDecision {
  Translational(TransDecision),
  Affine(AffineDecision),
}

impl MotionDecision {
  #[inline]
  pub fn cost(&self) -> u64 {
    match self {
      MotionDecision::Translational(t) => t.cost,
      MotionDecision::Affine(a) => a.cost,
    }
  }
}

/// Scratch buffers sized once at construction and reused across blocks, so
/// the per-block search allocates nothing.
pub(crate) struct Scratch<T: Pixel> {
  pub pred: Plane<T>,
  pub other_pred: [Plane<T>; 2],
  pub bi_target: Plane<T>,
  pub affine_pred: Plane<T>,
  pub err: Vec<i32>,
  pub gx: Vec<i32>,
  pub gy: Vec<i32>,
}

impl<T: Pixel> Scratch<T> {
  fn new() -> Self {
    let n = MAX_BLOCK_SIZE * MAX_BLOCK_SIZE;
    Scratch {
      pred: Plane::new(MAX_BLOCK_SIZE, MAX_BLOCK_SIZE, 0, 0),
      other_pred: [
        Plane::new(MAX_BLOCK_SIZE, MAX_BLOCK_SIZE, 0, 0),
        Plane::new(MAX_BLOCK_SIZE, MAX_BLOCK_SIZE, 0, 0),
      ],
      bi_target: Plane::new(MAX_BLOCK_SIZE, MAX_BLOCK_SIZE, 0, 0),
      affine_pred: Plane::new(MAX_BLOCK_SIZE, MAX_BLOCK_SIZE, 0, 0),
      err: vec![0; n],
      gx: vec![0; n],
      gy: vec![0; n],
    }
  }
}

/// Outcome of one uni-directional (list, reference) search.
#[derive(Clone, Copy, Debug)]
struct UniResult {
  mv: MotionVector,
  pred: MotionVector,
  mvp_idx: usize,
  bits: u32,
  cost: u64,
}

/// The motion-vector search and RD optimization engine. One instance per
/// worker thread; it owns its scratch arena and per-block caches and shares
/// nothing mutable.
pub struct MotionEstimator<T: Pixel> {
  cfg: EngineConfig,
  cache: MvCache,
  adapt_range: [[i32; MAX_REF_IDX]; 2],
  scratch: Scratch<T>,
}

impl<T: Pixel> MotionEstimator<T> {
  pub fn new(cfg: EngineConfig) -> Result<Self, ConfigError> {
    cfg.validate()?;
    let range = cfg.search_range;
    Ok(MotionEstimator {
      cfg,
      cache: MvCache::new(),
      adapt_range: [[range; MAX_REF_IDX]; 2],
      scratch: Scratch::new(),
    })
  }

  pub fn config(&self) -> &EngineConfig {
    &self.cfg
  }

  /// Clears the per-block motion cache, forcing the next invocation to
  /// search cold.
  pub fn clear_cache(&mut self) {
    self.cache.clear();
  }

  /// Finds the best motion decision for one block: per-list translational
  /// search, iterative bi-predictive refinement, and the affine
  /// hypotheses, returning the overall RD winner.
  pub fn pred_inter_search(
    &mut self, inputs: &SearchInputs<'_, T>, block: &Block, qp: u8,
    bypass: bool, imv: ImvMode,
  ) -> MotionDecision {
    let pic_w = inputs.org.cfg.width;
    let pic_h = inputs.org.cfg.height;
    assert!(
      block.x + block.w <= pic_w && block.y + block.h <= pic_h,
      "block outside picture"
    );
    assert!(
      inputs.refs[0].len() <= MAX_REF_IDX
        && inputs.refs[1].len() <= MAX_REF_IDX
    );
    assert!(
      !inputs.refs[0].is_empty() || !inputs.refs[1].is_empty(),
      "no admissible reference pictures"
    );
    assert!(
      inputs.b_slice || !inputs.refs[0].is_empty(),
      "uni-predicted slices search list 0"
    );
    for list in &inputs.refs {
      for rp in list {
        assert!(
          rp.plane.cfg.xpad >= 16 && rp.plane.cfg.ypad >= 16,
          "reference planes need at least 16 pixels of edge padding"
        );
      }
    }

    let params = self.cfg.resolve(block.w, block.h, inputs.b_slice, imv);
    let rd = RdCost::select_lambda(qp, bypass);
    self.cache.begin_block(block.x, block.y, block.w, block.h);

    let mode_bits = RdCost::mode_bits(inputs.b_slice);
    let num_lists = if inputs.b_slice { 2 } else { 1 };
    let po = block.plane_offset();

    // Uni-directional prediction: per list, per admissible reference.
    let mut results: [Vec<Option<UniResult>>; 2] =
      [vec![None; inputs.refs[0].len()], vec![None; inputs.refs[1].len()]];
    let mut best_uni: [Option<(UniResult, usize)>; 2] = [None, None];
    // list 1 winner among genuinely searched references only
    let mut best_l1_valid: Option<(UniResult, usize)> = None;

    for list in 0..num_lists {
      for ref_idx in 0..inputs.refs[list].len() {
        let rp = &inputs.refs[list][ref_idx];
        let base_bits = mode_bits[list]
          + RdCost::ref_idx_bits(ref_idx, inputs.refs[list].len());

        let sel = select_initial(
          rd,
          &inputs.org.slice(po),
          rp.plane,
          po,
          block.w,
          block.h,
          &rp.amvp,
          pic_w,
          pic_h,
          self.cfg.bit_depth,
          &mut self.scratch.pred,
        );

        let reused = list == 1 && rp.same_as_l0.is_some();
        let mut r = if let Some(l0_idx) = rp.same_as_l0.filter(|_| list == 1)
        {
          // the same picture was already searched through list 0; reuse
          // the vector and correct only the rate part
          let l0r = results[0][l0_idx].expect("list 0 searched first");
          let bits = base_bits
            + RdCost::mvp_idx_bits(sel.idx, rp.amvp.len())
            + RdCost::mv_bits(l0r.mv, sel.pred, params.prec_shift);
          let cost = l0r.cost - rd.mv_cost(l0r.bits) + rd.mv_cost(bits);
          UniResult { mv: l0r.mv, pred: sel.pred, mvp_idx: sel.idx, bits, cost }
        } else {
          self.search_uni(
            inputs, block, list, ref_idx, &sel, base_bits, &params, rd,
          )
        };

        if params.imv == ImvMode::Quarter {
          let rs =
            reselect(rd, r.mv, &rp.amvp, r.mvp_idx, r.bits, r.cost);
          r = UniResult {
            mv: r.mv,
            pred: rs.pred,
            mvp_idx: rs.idx,
            bits: rs.bits,
            cost: rs.cost,
          };
        }

        results[list][ref_idx] = Some(r);

        if best_uni[list].map_or(true, |(b, _)| r.cost < b.cost) {
          best_uni[list] = Some((r, ref_idx));
        }
        if list == 1
          && !reused
          && best_l1_valid.map_or(true, |(b, _)| r.cost < b.cost)
        {
          best_l1_valid = Some((r, ref_idx));
        }
      }
    }

    // snapshot of the per-reference translational winners used to seed the
    // affine search; the bi loop refines `results` in place afterwards
    let trans_seeds: [Vec<Option<MotionVector>>; 2] = [
      results[0].iter().map(|r| r.map(|r| r.mv)).collect(),
      results[1].iter().map(|r| r.map(|r| r.mv)).collect(),
    ];

    // Bi-predictive motion estimation.
    let bi = if params.allow_bipred
      && best_uni[0].is_some()
      && best_uni[1].is_some()
    {
      self.bi_refine(
        inputs, block, &params, rd, &mode_bits, &mut results, &best_uni,
      )
    } else {
      None
    };

    let cost0 = best_uni[0].map_or(u64::MAX, |(r, _)| r.cost);
    // the list 1 hypothesis must be signalled against its own reference
    let cost1 = best_l1_valid.map_or(u64::MAX, |(r, _)| r.cost);
    let cost_bi = bi.as_ref().map_or(u64::MAX, |b| b.cost);

    let trans = if cost_bi <= cost0 && cost_bi <= cost1 {
      let b = bi.unwrap();
      TransDecision {
        dir: PredDir::Bi,
        l0: Some(b.l[0]),
        l1: Some(b.l[1]),
        bits: b.bits,
        cost: b.cost,
      }
    } else if cost0 <= cost1 {
      let (r, ref_idx) = best_uni[0].expect("list 0 result");
      TransDecision {
        dir: PredDir::L0,
        l0: Some(ListMotion {
          mv: r.mv,
          pred: r.pred,
          ref_idx,
          mvp_idx: r.mvp_idx,
        }),
        l1: None,
        bits: r.bits,
        cost: r.cost,
      }
    } else {
      let (r, ref_idx) = best_l1_valid.expect("list 1 result");
      TransDecision {
        dir: PredDir::L1,
        l0: None,
        l1: Some(ListMotion {
          mv: r.mv,
          pred: r.pred,
          ref_idx,
          mvp_idx: r.mvp_idx,
        }),
        bits: r.bits,
        cost: r.cost,
      }
    };

    debug!(
      "block {}x{}@({},{}): {:?} cost {}",
      block.w, block.h, block.x, block.y, trans.dir, trans.cost
    );

    // Affine hypotheses, compared against the translational winner.
    if params.allow_affine {
      if let Some(aff) = affine_search(
        rd,
        &self.cfg,
        &params,
        inputs,
        block,
        &trans_seeds,
        trans.cost,
        &mut self.cache,
        &mut self.scratch,
      ) {
        if aff.cost < trans.cost {
          debug!(
            "affine {:?} wins: {} < {}",
            aff.model, aff.cost, trans.cost
          );
          return MotionDecision::Affine(aff);
        }
      }
    }

    MotionDecision::Translational(trans)
  }

  /// One uni-directional search: cache probe, then integer pattern search,
  /// then fractional (or integer-grid) refinement.
  fn search_uni(
    &mut self, inputs: &SearchInputs<'_, T>, block: &Block, list: usize,
    ref_idx: usize, sel: &crate::amvp::AmvpSelection, base_bits: u32,
    params: &BlockParams, rd: RdCost,
  ) -> UniResult {
    let rp = &inputs.refs[list][ref_idx];
    let po = block.plane_offset();
    let pic_w = inputs.org.cfg.width;
    let pic_h = inputs.org.cfg.height;
    let bits_with_idx =
      base_bits + RdCost::mvp_idx_bits(sel.idx, rp.amvp.len());

    if params.imv == ImvMode::Quarter {
      if let Some((mv, dist)) = self.cache.get_uni(list, ref_idx) {
        let bits = bits_with_idx + RdCost::mv_bits(mv, sel.pred, 0);
        return UniResult {
          mv,
          pred: sel.pred,
          mvp_idx: sel.idx,
          bits,
          cost: dist + rd.mv_cost(bits),
        };
      }
    }

    let range = self.adapt_range[list][ref_idx].min(self.cfg.search_range);
    let ctx = MeCtx {
      org: inputs.org.slice(po),
      rf: rp.plane,
      po,
      blk_w: block.w,
      blk_h: block.h,
      pic_w,
      pic_h,
      range,
      pred: sel.pred,
      prec_shift: params.prec_shift,
      bit_depth: self.cfg.bit_depth,
      sub_sample_sad: self.cfg.sub_sample_sad,
      rd,
    };

    let int_result: IntSearchResult = match self.cfg.search_method {
      SearchMethod::Full => full_search(&ctx, sel.pred, range),
      SearchMethod::Diamond => tz_search(
        &ctx,
        sel.pred,
        TzConfig {
          extended: false,
          fast: self.cfg.fast_tz,
          assume_smooth_mv: self.cfg.assume_smooth_mv,
        },
      ),
      SearchMethod::DiamondEnhanced => tz_search(
        &ctx,
        sel.pred,
        TzConfig {
          extended: true,
          fast: self.cfg.fast_tz,
          assume_smooth_mv: self.cfg.assume_smooth_mv,
        },
      ),
      SearchMethod::Selective => selective_search(&ctx, sel.pred),
    };

    // adaptive search range: converging references get a tighter window
    // on the next block, distant winners reset it
    let pred_int =
      sel.pred.change_precision(MvPrecision::Quarter, MvPrecision::Int);
    let dist_from_pred = (int_result.mv.col as i32 - pred_int.col as i32)
      .abs()
      .max((int_result.mv.row as i32 - pred_int.row as i32).abs());
    self.adapt_range[list][ref_idx] = if dist_from_pred * 4 <= range {
      (range / 2).max(8)
    } else {
      self.cfg.search_range
    };

    if params.imv == ImvMode::Quarter {
      let frac = frac_refine(
        rd,
        &inputs.org.slice(po),
        rp.plane,
        po,
        block.w,
        block.h,
        sel.pred,
        int_result.mv,
        self.cfg.bit_depth,
        self.cfg.use_satd_subpel,
        &mut self.scratch.pred,
      );
      let mv_bits = RdCost::mv_bits(frac.mv, sel.pred, 0);
      let dist = frac.cost - rd.mv_cost(mv_bits);
      let bits = bits_with_idx + mv_bits;
      let cost = dist + rd.mv_cost(bits);
      self.cache.put_uni(list, ref_idx, frac.mv, dist);
      UniResult { mv: frac.mv, pred: sel.pred, mvp_idx: sel.idx, bits, cost }
    } else {
      let mv_q = int_result.mv << MvPrecision::Quarter.shift();
      let r = int_precision_refine(
        rd,
        &inputs.org.slice(po),
        rp.plane,
        po,
        block.w,
        block.h,
        &rp.amvp,
        mv_q,
        params.prec_shift,
        base_bits,
        1.0,
        pic_w,
        pic_h,
        self.cfg.bit_depth,
        self.cfg.use_satd_subpel,
      );
      UniResult {
        mv: r.mv,
        pred: r.pred,
        mvp_idx: r.mvp_idx,
        bits: r.bits,
        cost: r.cost,
      }
    }
  }

  /// Iterative bi-predictive refinement. Both lists are seeded from the
  /// uni-directional winners; up to `bi_iterations` rounds alternate which
  /// list is re-searched against the one-sided target formed by removing
  /// the other list's prediction from the source, terminating early once a
  /// round improves neither list.
  fn bi_refine(
    &mut self, inputs: &SearchInputs<'_, T>, block: &Block,
    params: &BlockParams, rd: RdCost, mode_bits: &[u32; 3],
    results: &mut [Vec<Option<UniResult>>; 2],
    best_uni: &[Option<(UniResult, usize)>; 2],
  ) -> Option<BiOutcome> {
    let po = block.plane_offset();
    let pic_w = inputs.org.cfg.width;
    let pic_h = inputs.org.cfg.height;
    let bd = self.cfg.bit_depth;

    // seed both lists from the uni-directional winners
    let mut mv_bi = [best_uni[0]?.0.mv, best_uni[1]?.0.mv];
    let mut ref_bi = [best_uni[0]?.1, best_uni[1]?.1];

    // per-reference predictor state, refined independently of the uni pass
    let mut pred_bi: [Vec<(MotionVector, usize)>; 2] = [
      results[0]
        .iter()
        .map(|r| r.map_or((MotionVector::ZERO, 0), |r| (r.pred, r.mvp_idx)))
        .collect(),
      results[1]
        .iter()
        .map(|r| r.map_or((MotionVector::ZERO, 0), |r| (r.pred, r.mvp_idx)))
        .collect(),
    ];

    let mut mot_bits = [
      best_uni[0]?.0.bits - mode_bits[0],
      best_uni[1]?.0.bits - mode_bits[1],
    ];
    let mut bits_bi = mode_bits[2] + mot_bits[0] + mot_bits[1];
    let mut cost_bi = u64::MAX;

    // the other list starts as the list 1 uni winner's prediction
    {
      let (r, ref_idx) = best_uni[1]?;
      let mv = r
        .mv
        .change_precision(MvPrecision::Quarter, MvPrecision::Internal)
        .clip_to_picture(
          block.x,
          block.y,
          MAX_BLOCK_SIZE,
          pic_w,
          pic_h,
          MvPrecision::Internal,
        );
      predict_translational(
        &mut self.scratch.other_pred[1],
        PlaneOffset { x: 0, y: 0 },
        inputs.refs[1][ref_idx].plane,
        po,
        block.w,
        block.h,
        mv,
        bd,
      );
    }

    let num_iter = self.cfg.bi_iterations;
    for iter in 0..num_iter {
      let list = iter % 2;
      let other = 1 - list;

      // one-sided target: the other list's motion-compensated prediction
      // subtracted, weighted, from the source
      build_bi_target(
        &mut self.scratch.bi_target,
        inputs.org,
        po,
        &self.scratch.other_pred[other],
        block.w,
        block.h,
        bd,
      );

      let mut changed = false;

      for ref_idx in 0..inputs.refs[list].len() {
        let Some(seed) = results[list][ref_idx] else { continue };
        let rp = &inputs.refs[list][ref_idx];
        let (pred, mvp_idx) = pred_bi[list][ref_idx];

        let base_bits = mode_bits[2]
          + mot_bits[other]
          + RdCost::ref_idx_bits(ref_idx, inputs.refs[list].len())
          + RdCost::mvp_idx_bits(mvp_idx, rp.amvp.len());

        let Scratch { bi_target, pred: pred_scratch, .. } =
          &mut self.scratch;
        let ctx = MeCtx {
          org: bi_target.slice(PlaneOffset { x: 0, y: 0 }),
          rf: rp.plane,
          po,
          blk_w: block.w,
          blk_h: block.h,
          pic_w,
          pic_h,
          range: self.cfg.bipred_search_range,
          pred,
          prec_shift: params.prec_shift,
          bit_depth: bd,
          sub_sample_sad: false,
          rd,
        };
        // a small exhaustive window around the current vector
        let int_result =
          full_search(&ctx, seed.mv, self.cfg.bipred_search_range);

        let (mv, mv_bits, dist) = if params.imv == ImvMode::Quarter {
          let frac = frac_refine(
            rd,
            &bi_target.slice(PlaneOffset { x: 0, y: 0 }),
            rp.plane,
            po,
            block.w,
            block.h,
            pred,
            int_result.mv,
            bd,
            self.cfg.use_satd_subpel,
            pred_scratch,
          );
          let mv_bits = RdCost::mv_bits(frac.mv, pred, 0);
          (frac.mv, mv_bits, frac.cost - rd.mv_cost(mv_bits))
        } else {
          let mv_q = int_result.mv << MvPrecision::Quarter.shift();
          let mv_bits =
            RdCost::mv_bits(mv_q, pred, params.prec_shift);
          (mv_q, mv_bits, int_result.sad)
        };

        // the one-sided residual counts both directions; halve it
        let mut bits_temp = base_bits + mv_bits;
        let mut cost_temp =
          ((dist as f64 * 0.5).floor()) as u64 + rd.mv_cost(bits_temp);

        // later rounds restart the window from this round's winner
        results[list][ref_idx] = Some(UniResult {
          mv,
          pred,
          mvp_idx,
          bits: seed.bits,
          cost: seed.cost,
        });

        if params.imv == ImvMode::Quarter {
          let rs = reselect(rd, mv, &rp.amvp, mvp_idx, bits_temp, cost_temp);
          bits_temp = rs.bits;
          cost_temp = rs.cost;
          pred_bi[list][ref_idx] = (rs.pred, rs.idx);
        }

        if cost_temp < cost_bi {
          changed = true;
          mv_bi[list] = mv;
          ref_bi[list] = ref_idx;
          cost_bi = cost_temp;
          mot_bits[list] = bits_temp - mode_bits[2] - mot_bits[other];
          bits_bi = bits_temp;

          if num_iter != 1 {
            // refresh this list's prediction for the next round
            let mv_int = mv
              .change_precision(MvPrecision::Quarter, MvPrecision::Internal)
              .clip_to_picture(
                block.x,
                block.y,
                MAX_BLOCK_SIZE,
                pic_w,
                pic_h,
                MvPrecision::Internal,
              );
            predict_translational(
              &mut self.scratch.other_pred[list],
              PlaneOffset { x: 0, y: 0 },
              rp.plane,
              po,
              block.w,
              block.h,
              mv_int,
              bd,
            );
          }
        }
      }

      if !changed {
        let cost0 = best_uni[0].map_or(u64::MAX, |(r, _)| r.cost);
        let cost1 = best_uni[1].map_or(u64::MAX, |(r, _)| r.cost);
        if cost_bi <= cost0 && cost_bi <= cost1 && params.imv == ImvMode::Quarter
        {
          // final predictor re-check for both winning references
          for list in 0..2 {
            let amvp = &inputs.refs[list][ref_bi[list]].amvp;
            let (_, idx) = pred_bi[list][ref_bi[list]];
            let rs = reselect(rd, mv_bi[list], amvp, idx, bits_bi, cost_bi);
            pred_bi[list][ref_bi[list]] = (rs.pred, rs.idx);
            bits_bi = rs.bits;
            cost_bi = rs.cost;
          }
        }
        break;
      }
    }

    if cost_bi == u64::MAX {
      return None;
    }

    Some(BiOutcome {
      l: [
        ListMotion {
          mv: mv_bi[0],
          pred: pred_bi[0][ref_bi[0]].0,
          ref_idx: ref_bi[0],
          mvp_idx: pred_bi[0][ref_bi[0]].1,
        },
        ListMotion {
          mv: mv_bi[1],
          pred: pred_bi[1][ref_bi[1]].0,
          ref_idx: ref_bi[1],
          mvp_idx: pred_bi[1][ref_bi[1]].1,
        },
      ],
      bits: bits_bi,
      cost: cost_bi,
    })
  }
}

struct BiOutcome {
  l: [ListMotion; 2],
  bits: u32,
  cost: u64,
}

/// Forms the one-sided bi-predictive target `clip(2*org - other_pred)`.
/// Searching one list against it approximates the joint two-list residual
/// while holding the other list fixed.
pub(crate) fn build_bi_target<T: Pixel>(
  dst: &mut Plane<T>, org: &Plane<T>, po: PlaneOffset, other: &Plane<T>,
  blk_w: usize, blk_h: usize, bit_depth: usize,
) {
  use crate::util::CastFromPrimitive;
  let max_val = (1i32 << bit_depth) - 1;
  let org_slice = org.slice(po);
  for y in 0..blk_h {
    let org_row = org_slice.row(y);
    for x in 0..blk_w {
      let o = i32::cast_from(org_row[x]);
      let p = i32::cast_from(other.p(x, y));
      let v = (2 * o - p).clamp(0, max_val);
      let idx = (y + dst.cfg.yorigin) * dst.cfg.stride + x + dst.cfg.xorigin;
      dst.data[idx] = T::cast_from(v as u32);
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn bi_target_is_clipped_difference() {
    let org = Plane::wrap(vec![100u8; 64], 8);
    let mut other = Plane::wrap(vec![0u8; 64], 8);
    other.data[0] = 250;
    let mut dst = Plane::new(8, 8, 0, 0);
    build_bi_target(
      &mut dst,
      &org,
      PlaneOffset { x: 0, y: 0 },
      &other,
      8,
      8,
      8,
    );
    // 2*100 - 250 clamps to 0; 2*100 - 0 clamps to 200
    assert_eq!(dst.p(0, 0), 0);
    assert_eq!(dst.p(1, 0), 200);
  }
}
