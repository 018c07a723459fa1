// Copyright (c) 2019-2023, The mvsearch contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License. If
// the BSD 2 Clause License was not distributed with this source code in the
// LICENSE file, you can obtain it at www.opensource.org/licenses/bsd-license

use pretty_assertions::assert_eq;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use mvsearch::{
  AmvpList, Block, EngineConfig, ImvMode, MotionDecision, MotionEstimator,
  MotionVector, Plane, PredDir, RefPlane, SearchInputs, SearchMethod,
};

const PIC: usize = 96;
const PAD: usize = 40;

fn textured_plane(seed: u64) -> Plane<u8> {
  let mut rng = ChaCha8Rng::seed_from_u64(seed);
  let mut p = Plane::new(PIC, PIC, PAD, PAD);
  for y in 0..PIC {
    for x in 0..PIC {
      let i = (y + p.cfg.yorigin) * p.cfg.stride + x + p.cfg.xorigin;
      p.data[i] = rng.gen();
    }
  }
  p.pad();
  p
}

// reference whose content is the source displaced by (dx, dy), plus noise
fn shifted_ref(org: &Plane<u8>, dx: isize, dy: isize, noise: u8) -> Plane<u8> {
  let mut rng = ChaCha8Rng::seed_from_u64(0x5151);
  let mut p = Plane::new(PIC, PIC, PAD, PAD);
  for y in 0..PIC {
    for x in 0..PIC {
      let sx = (x as isize - dx).clamp(0, PIC as isize - 1) as usize;
      let sy = (y as isize - dy).clamp(0, PIC as isize - 1) as usize;
      let n: u8 = if noise > 0 { rng.gen_range(0..=noise) } else { 0 };
      let i = (y + p.cfg.yorigin) * p.cfg.stride + x + p.cfg.xorigin;
      p.data[i] = org.p(sx, sy).wrapping_add(n);
    }
  }
  p.pad();
  p
}

fn amvp() -> AmvpList {
  AmvpList::from_slice(&[MotionVector::ZERO, MotionVector::new(8, 0)])
}

fn inputs<'a>(
  org: &'a Plane<u8>, l0: &'a [Plane<u8>], l1: &'a [Plane<u8>],
  b_slice: bool,
) -> SearchInputs<'a, u8> {
  SearchInputs {
    org,
    refs: [
      l0.iter()
        .map(|p| RefPlane {
          plane: p,
          amvp: amvp(),
          affine_amvp: None,
          same_as_l0: None,
        })
        .collect(),
      l1.iter()
        .map(|p| RefPlane {
          plane: p,
          amvp: amvp(),
          affine_amvp: None,
          same_as_l0: None,
        })
        .collect(),
    ],
    b_slice,
    affine_seeds: Vec::new(),
  }
}

fn small_range_config() -> EngineConfig {
  EngineConfig { search_range: 16, ..Default::default() }
}

// exhaustive integer search, for tests asserting exact winners on
// unstructured textures where a local search has no gradient to follow
fn exhaustive_config() -> EngineConfig {
  EngineConfig {
    search_range: 16,
    search_method: SearchMethod::Full,
    ..Default::default()
  }
}

#[test]
fn uni_search_finds_planted_displacement() {
  let org = textured_plane(1);
  let l0 = vec![shifted_ref(&org, 5, -3, 0)];
  let inputs = inputs(&org, &l0, &[], false);
  let block = Block { x: 32, y: 32, w: 16, h: 16 };

  let mut me = MotionEstimator::new(exhaustive_config()).unwrap();
  let d = me.pred_inter_search(&inputs, &block, 32, false, ImvMode::Quarter);

  let MotionDecision::Translational(t) = d else {
    panic!("expected translational")
  };
  assert_eq!(t.dir, PredDir::L0);
  assert_eq!(t.l0.unwrap().mv, MotionVector::new(20, -12));
}

#[test]
fn bypass_search_reaches_zero_distortion() {
  let org = textured_plane(2);
  let l0 = vec![shifted_ref(&org, -4, 2, 0)];
  let inputs = inputs(&org, &l0, &[], false);
  let block = Block { x: 40, y: 40, w: 16, h: 16 };

  let mut me = MotionEstimator::new(exhaustive_config()).unwrap();
  let d = me.pred_inter_search(&inputs, &block, 32, true, ImvMode::Quarter);

  // lossless lambda: the cost is pure distortion, and the planted match
  // is exact
  assert_eq!(d.cost(), 0);
}

#[test]
fn bi_prediction_never_worse_than_best_uni() {
  let org = textured_plane(3);
  let l0 = vec![shifted_ref(&org, 3, 1, 6)];
  let l1 = vec![shifted_ref(&org, -2, -2, 6)];

  let block = Block { x: 32, y: 32, w: 16, h: 16 };

  let mut uni_cfg = small_range_config();
  uni_cfg.enable_bipred = false;
  uni_cfg.enable_affine = false;
  let mut me_uni = MotionEstimator::new(uni_cfg).unwrap();
  let uni_inputs = inputs(&org, &l0, &l1, true);
  let uni =
    me_uni.pred_inter_search(&uni_inputs, &block, 32, false, ImvMode::Quarter);

  let mut bi_cfg = small_range_config();
  bi_cfg.enable_affine = false;
  let mut me_bi = MotionEstimator::new(bi_cfg).unwrap();
  let bi_inputs = inputs(&org, &l0, &l1, true);
  let bi =
    me_bi.pred_inter_search(&bi_inputs, &block, 32, false, ImvMode::Quarter);

  assert!(bi.cost() <= uni.cost());
}

#[test]
fn cache_warm_and_cold_agree() {
  let org = textured_plane(4);
  let l0 = vec![shifted_ref(&org, 2, 4, 4)];
  let l1 = vec![shifted_ref(&org, -3, 1, 4)];
  let block = Block { x: 24, y: 24, w: 16, h: 16 };

  let mk = || MotionEstimator::new(small_range_config()).unwrap();

  let mut warm = mk();
  let i1 = inputs(&org, &l0, &l1, true);
  let first =
    warm.pred_inter_search(&i1, &block, 32, false, ImvMode::Quarter);
  let second =
    warm.pred_inter_search(&i1, &block, 32, false, ImvMode::Quarter);

  let mut cold = mk();
  let third =
    cold.pred_inter_search(&i1, &block, 32, false, ImvMode::Quarter);

  assert_eq!(first.cost(), second.cost());
  assert_eq!(first.cost(), third.cost());
  match (&first, &second) {
    (
      MotionDecision::Translational(a),
      MotionDecision::Translational(b),
    ) => {
      assert_eq!(a.dir, b.dir);
      assert_eq!(a.l0.map(|l| l.mv), b.l0.map(|l| l.mv));
      assert_eq!(a.l1.map(|l| l.mv), b.l1.map(|l| l.mv));
    }
    _ => {}
  }
}

#[test]
fn integer_resolution_signals_whole_pel_mvd() {
  let org = textured_plane(5);
  let l0 = vec![shifted_ref(&org, 6, -2, 3)];
  let inputs = inputs(&org, &l0, &[], false);
  let block = Block { x: 32, y: 32, w: 16, h: 16 };

  let mut me = MotionEstimator::new(exhaustive_config()).unwrap();
  let d = me.pred_inter_search(&inputs, &block, 32, false, ImvMode::FullPel);

  let MotionDecision::Translational(t) = d else {
    panic!("expected translational")
  };
  let mvd = t.l0.unwrap().mvd();
  assert_eq!(mvd.col % 4, 0, "mvd must sit on the whole-pel grid");
  assert_eq!(mvd.row % 4, 0);
}

#[test]
fn multiple_references_pick_the_better_one() {
  let org = textured_plane(6);
  // ref 0 is noisy, ref 1 is an exact displaced copy
  let l0 = vec![shifted_ref(&org, 1, 1, 40), shifted_ref(&org, -4, 3, 0)];
  let inputs = inputs(&org, &l0, &[], false);
  let block = Block { x: 48, y: 48, w: 16, h: 16 };

  let mut me = MotionEstimator::new(exhaustive_config()).unwrap();
  let d = me.pred_inter_search(&inputs, &block, 32, false, ImvMode::Quarter);

  let MotionDecision::Translational(t) = d else {
    panic!("expected translational")
  };
  assert_eq!(t.l0.unwrap().ref_idx, 1);
  assert_eq!(t.l0.unwrap().mv, MotionVector::new(-16, 12));
}

#[test]
fn list1_reuse_shortcut_matches_list0_vector() {
  let org = textured_plane(7);
  let l0 = vec![shifted_ref(&org, 4, 4, 5)];
  // list 1 addresses the same picture
  let mut i = SearchInputs {
    org: &org,
    refs: [
      vec![RefPlane {
        plane: &l0[0],
        amvp: amvp(),
        affine_amvp: None,
        same_as_l0: None,
      }],
      vec![RefPlane {
        plane: &l0[0],
        amvp: amvp(),
        affine_amvp: None,
        same_as_l0: Some(0),
      }],
    ],
    b_slice: true,
    affine_seeds: Vec::new(),
  };
  i.refs[1][0].same_as_l0 = Some(0);
  let block = Block { x: 32, y: 32, w: 16, h: 16 };

  let mut cfg = small_range_config();
  cfg.enable_bipred = false;
  cfg.enable_affine = false;
  let mut me = MotionEstimator::new(cfg).unwrap();
  let d = me.pred_inter_search(&i, &block, 32, false, ImvMode::Quarter);

  // the decision signals through list 0; the reused list 1 entry may not
  // win the uni comparison on its own
  let MotionDecision::Translational(t) = d else {
    panic!("expected translational")
  };
  assert_eq!(t.dir, PredDir::L0);
}
