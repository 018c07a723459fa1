// Copyright (c) 2019-2023, The mvsearch contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License. If
// the BSD 2 Clause License was not distributed with this source code in the
// LICENSE file, you can obtain it at www.opensource.org/licenses/bsd-license

use thiserror::Error;

use crate::me::MAX_BLOCK_SIZE;

pub const MAX_SEARCH_RANGE: i32 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("search range {0} outside 4..={MAX_SEARCH_RANGE}")]
  InvalidSearchRange(i32),
  #[error("bi-predictive search range {0} outside 1..=search range")]
  InvalidBipredSearchRange(i32),
  #[error("unsupported bit depth {0}; expected 8, 10 or 12")]
  UnsupportedBitDepth(usize),
  #[error("bi-predictive iteration count {0} outside 1..=8")]
  InvalidBiIterations(usize),
}

/// Integer-pel search strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMethod {
  /// Exhaustive window scan.
  Full,
  /// Diamond/raster hybrid.
  Diamond,
  /// Diamond with adaptive raster and extra corner/zero probes.
  DiamondEnhanced,
  /// Coarse-grid hybrid with raster escape.
  Selective,
}

/// Signalled motion vector resolution for one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImvMode {
  Quarter,
  FullPel,
  FourPel,
}

impl ImvMode {
  /// Shift applied to the mvd for rate estimation.
  #[inline]
  pub const fn prec_shift(self) -> u8 {
    match self {
      ImvMode::Quarter => 0,
      ImvMode::FullPel => 2,
      ImvMode::FourPel => 4,
    }
  }
}

/// Engine configuration, validated once at construction and immutable
/// afterwards. Components read only the fields relevant to them.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  pub search_method: SearchMethod,
  /// Uni-directional search radius in whole pels.
  pub search_range: i32,
  /// Radius of the joint refinement around each bi-predictive seed.
  pub bipred_search_range: i32,
  pub bit_depth: usize,
  /// Transform-domain (Hadamard) metric for sub-pel and affine refinement.
  pub use_satd_subpel: bool,
  /// Row-subsampled SAD with early exit in the integer search.
  pub sub_sample_sad: bool,
  pub enable_bipred: bool,
  pub enable_affine: bool,
  pub enable_affine_six_param: bool,
  /// Fast diamond settings: halved window, coarse raster, early stop.
  pub fast_tz: bool,
  /// Stop the first diamond pass early, assuming a smooth motion field.
  pub assume_smooth_mv: bool,
  /// Maximum alternating rounds of the bi-predictive refinement loop.
  pub bi_iterations: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    EngineConfig {
      search_method: SearchMethod::Diamond,
      search_range: 64,
      bipred_search_range: 4,
      bit_depth: 8,
      use_satd_subpel: true,
      sub_sample_sad: false,
      enable_bipred: true,
      enable_affine: true,
      enable_affine_six_param: true,
      fast_tz: false,
      assume_smooth_mv: false,
      bi_iterations: 4,
    }
  }
}

impl EngineConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(4..=MAX_SEARCH_RANGE).contains(&self.search_range) {
      return Err(ConfigError::InvalidSearchRange(self.search_range));
    }
    if self.bipred_search_range < 1
      || self.bipred_search_range > self.search_range
    {
      return Err(ConfigError::InvalidBipredSearchRange(
        self.bipred_search_range,
      ));
    }
    if !matches!(self.bit_depth, 8 | 10 | 12) {
      return Err(ConfigError::UnsupportedBitDepth(self.bit_depth));
    }
    if !(1..=8).contains(&self.bi_iterations) {
      return Err(ConfigError::InvalidBiIterations(self.bi_iterations));
    }
    Ok(())
  }

  /// Resolves the per-block feature set once, before any search stage
  /// runs. Every stage reads this instead of re-deriving flag
  /// combinations.
  pub fn resolve(
    &self, blk_w: usize, blk_h: usize, b_slice: bool, imv: ImvMode,
  ) -> BlockParams {
    assert!(
      (4..=MAX_BLOCK_SIZE).contains(&blk_w)
        && (4..=MAX_BLOCK_SIZE).contains(&blk_h),
      "block {blk_w}x{blk_h} outside supported range"
    );
    BlockParams {
      allow_bipred: self.enable_bipred && b_slice && blk_w + blk_h > 12,
      allow_affine: self.enable_affine
        && imv == ImvMode::Quarter
        && blk_w > 8
        && blk_h > 8
        && blk_w.is_power_of_two()
        && blk_h.is_power_of_two(),
      imv,
      prec_shift: imv.prec_shift(),
      b_slice,
    }
  }
}

/// Per-block parameters resolved from the engine configuration and the
/// block geometry.
#[derive(Debug, Clone, Copy)]
pub struct BlockParams {
  pub allow_bipred: bool,
  pub allow_affine: bool,
  pub imv: ImvMode,
  pub prec_shift: u8,
  pub b_slice: bool,
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn default_config_validates() {
    assert!(EngineConfig::default().validate().is_ok());
  }

  #[test]
  fn rejects_bad_ranges() {
    let mut cfg = EngineConfig::default();
    cfg.search_range = 2;
    assert_eq!(cfg.validate(), Err(ConfigError::InvalidSearchRange(2)));
    cfg.search_range = 64;
    cfg.bipred_search_range = 128;
    assert!(matches!(
      cfg.validate(),
      Err(ConfigError::InvalidBipredSearchRange(128))
    ));
    cfg.bipred_search_range = 4;
    cfg.bit_depth = 9;
    assert_eq!(cfg.validate(), Err(ConfigError::UnsupportedBitDepth(9)));
  }

  #[test]
  fn small_blocks_disallow_bipred_and_affine() {
    let cfg = EngineConfig::default();
    let p = cfg.resolve(4, 8, true, ImvMode::Quarter);
    assert!(!p.allow_bipred);
    assert!(!p.allow_affine);
    let p = cfg.resolve(16, 16, true, ImvMode::Quarter);
    assert!(p.allow_bipred);
    assert!(p.allow_affine);
    // affine requires quarter-pel resolution
    let p = cfg.resolve(16, 16, true, ImvMode::FullPel);
    assert!(!p.allow_affine);
  }
}
