// Copyright (c) 2019-2023, The mvsearch contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License. If
// the BSD 2 Clause License was not distributed with this source code in the
// LICENSE file, you can obtain it at www.opensource.org/licenses/bsd-license

use crate::mc::AffineModelType;
use crate::mv::MotionVector;

/// Upper bound on reference indices per list.
pub const MAX_REF_IDX: usize = 16;

#[derive(Clone, Copy, Default)]
struct UniEntry {
  mv: MotionVector,
  dist_cost: u64,
  valid: bool,
}

#[derive(Clone, Copy, Default)]
struct AffineEntry {
  cpmv: [MotionVector; 3],
  dist_cost: u64,
  valid: bool,
}

/// Per-block history of evaluated motion vectors, keyed by (list, reference
/// index) and, for affine results, the model type. Competing coding
/// hypotheses for the same block re-enter the search engine several times;
/// a warm entry short-circuits the repeated search.
///
/// Stored costs are distortion-only: the motion-bit term is recomputed by
/// the reader against the predictor in effect, so reuse stays bit-exact
/// even when the candidate list differs between calls.
pub struct MvCache {
  block_key: Option<(usize, usize, usize, usize)>,
  uni: [[UniEntry; MAX_REF_IDX]; 2],
  affine: [[[AffineEntry; MAX_REF_IDX]; 2]; 2],
}

impl Default for MvCache {
  fn default() -> Self {
    Self::new()
  }
}

impl MvCache {
  pub fn new() -> Self {
    MvCache {
      block_key: None,
      uni: [[UniEntry::default(); MAX_REF_IDX]; 2],
      affine: [[[AffineEntry::default(); MAX_REF_IDX]; 2]; 2],
    }
  }

  pub fn clear(&mut self) {
    self.block_key = None;
    for list in self.uni.iter_mut() {
      for e in list.iter_mut() {
        e.valid = false;
      }
    }
    for model in self.affine.iter_mut() {
      for list in model.iter_mut() {
        for e in list.iter_mut() {
          e.valid = false;
        }
      }
    }
  }

  /// Invalidates the history when a different block is entered; calls for
  /// the same geometry keep it warm.
  pub fn begin_block(&mut self, x: usize, y: usize, w: usize, h: usize) {
    let key = (x, y, w, h);
    if self.block_key != Some(key) {
      self.clear();
      self.block_key = Some(key);
    }
  }

  #[inline]
  fn model_slot(model: AffineModelType) -> usize {
    match model {
      AffineModelType::FourParam => 0,
      AffineModelType::SixParam => 1,
    }
  }

  pub fn get_uni(
    &self, list: usize, ref_idx: usize,
  ) -> Option<(MotionVector, u64)> {
    let e = &self.uni[list][ref_idx];
    e.valid.then_some((e.mv, e.dist_cost))
  }

  pub fn put_uni(
    &mut self, list: usize, ref_idx: usize, mv: MotionVector, dist_cost: u64,
  ) {
    self.uni[list][ref_idx] = UniEntry { mv, dist_cost, valid: true };
  }

  pub fn get_affine(
    &self, model: AffineModelType, list: usize, ref_idx: usize,
  ) -> Option<([MotionVector; 3], u64)> {
    let e = &self.affine[Self::model_slot(model)][list][ref_idx];
    e.valid.then_some((e.cpmv, e.dist_cost))
  }

  pub fn put_affine(
    &mut self, model: AffineModelType, list: usize, ref_idx: usize,
    cpmv: [MotionVector; 3], dist_cost: u64,
  ) {
    self.affine[Self::model_slot(model)][list][ref_idx] =
      AffineEntry { cpmv, dist_cost, valid: true };
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn round_trip_and_model_separation() {
    let mut cache = MvCache::new();
    cache.begin_block(0, 0, 16, 16);
    assert!(cache.get_uni(0, 0).is_none());

    cache.put_uni(0, 2, MotionVector::new(8, -4), 1234);
    assert_eq!(cache.get_uni(0, 2), Some((MotionVector::new(8, -4), 1234)));
    assert!(cache.get_uni(1, 2).is_none());

    let cpmv = [MotionVector::new(4, 0); 3];
    cache.put_affine(AffineModelType::FourParam, 0, 0, cpmv, 99);
    assert!(cache.get_affine(AffineModelType::SixParam, 0, 0).is_none());
    assert_eq!(
      cache.get_affine(AffineModelType::FourParam, 0, 0),
      Some((cpmv, 99))
    );
  }

  #[test]
  fn geometry_change_invalidates() {
    let mut cache = MvCache::new();
    cache.begin_block(0, 0, 16, 16);
    cache.put_uni(0, 0, MotionVector::new(1, 1), 5);

    // same block again: stays warm
    cache.begin_block(0, 0, 16, 16);
    assert!(cache.get_uni(0, 0).is_some());

    cache.begin_block(16, 0, 16, 16);
    assert!(cache.get_uni(0, 0).is_none());
  }
}
