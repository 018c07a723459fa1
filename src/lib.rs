// Copyright (c) 2019-2023, The mvsearch contributors. All rights reserved
//
// This source code is subject to the terms of the BSD 2 Clause License. If
// the BSD 2 Clause License was not distributed with this source code in the
// LICENSE file, you can obtain it at www.opensource.org/licenses/bsd-license

//! Motion-vector search and rate-distortion optimization engine for
//! block-based video encoders.
//!
//! For every coding block the engine finds, for one or two reference
//! pictures, the translational or affine motion that minimizes a
//! Lagrangian cost combining prediction error and estimated bit cost, then
//! picks among the uni-directional, bi-directional and affine hypotheses.
//! It is invoked per block by an external mode-decision controller, which
//! supplies reference sample planes and predictor candidate lists and
//! receives back a finalized [`MotionDecision`].
//!
//! One [`MotionEstimator`] instance serves one worker thread; instances
//! own their scratch buffers and share nothing mutable.

pub mod affine;
pub mod amvp;
pub mod config;
pub mod dist;
pub mod inter;
pub mod mc;
pub mod me;
pub mod mv;
pub mod mvcache;
pub mod plane;
pub mod rdcost;
pub mod subpel;
pub mod util;

pub use crate::affine::{AffineAmvp, AffineDecision, AffineListMotion};
pub use crate::amvp::AmvpList;
pub use crate::config::{
  ConfigError, EngineConfig, ImvMode, SearchMethod,
};
pub use crate::inter::{
  Block, ListMotion, MotionDecision, MotionEstimator, PredDir, RefPlane,
  SearchInputs, TransDecision,
};
pub use crate::mc::AffineModelType;
pub use crate::mv::{MotionVector, MvPrecision};
pub use crate::plane::{Plane, PlaneOffset};
pub use crate::rdcost::RdCost;
pub use crate::util::Pixel;
