//! Coarse-to-fine autofocus.
//!
//! The search minimises the camera's focus score (green-channel Laplacian
//! variance):
//!
//! 1. Reconcile the stage so the search starts from the device position.
//! 2. Coarse sweep: move up by `offset + coarse_step` with
//!    `offset = (coarse_slices * coarse_step + coarse_step) / 2`, then take
//!    `coarse_slices` samples stepping down by `coarse_step`.
//! 3. Seed the fine search with the lowest coarse sample and move there.
//! 4. Fine search up by `fine_step` while the score keeps dropping, at most
//!    `max_fine_steps` times, then return to the best position.
//! 5. The same downwards, then move to the final best position.
//!
//! Each sample costs one camera exposure.

use scope_core::{Camera, Position, ScopeError, ScopeResult, Stage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Search parameters, in millimeters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutofocusSettings {
    /// Distance between coarse samples.
    pub coarse_step: f64,
    /// Number of coarse samples.
    pub coarse_slices: u32,
    /// Distance between fine samples.
    pub fine_step: f64,
    /// Upper bound on fine steps per direction.
    pub max_fine_steps: u32,
}

impl Default for AutofocusSettings {
    fn default() -> Self {
        Self {
            coarse_step: 0.05,
            coarse_slices: 10,
            fine_step: 0.04,
            max_fine_steps: 20,
        }
    }
}

impl AutofocusSettings {
    /// Reject settings that cannot produce a search.
    pub fn validate(&self) -> ScopeResult<()> {
        if self.coarse_slices == 0 {
            return Err(ScopeError::InvalidInput(
                "autofocus needs at least one coarse slice".to_string(),
            ));
        }
        for (name, step) in [("coarse_step", self.coarse_step), ("fine_step", self.fine_step)] {
            if !step.is_finite() || step <= 0.0 {
                return Err(ScopeError::InvalidInput(format!(
                    "autofocus {name} must be positive, got {step}"
                )));
            }
        }
        Ok(())
    }

    /// Distance from the starting plane to the first coarse sample.
    pub fn coarse_offset(&self) -> f64 {
        let n = f64::from(self.coarse_slices);
        (n * self.coarse_step + self.coarse_step) / 2.0
    }
}

/// One scored position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusSample {
    /// Device-reported position at capture time.
    pub position: Position,
    /// Focus score of the frame captured there.
    pub score: f64,
}

/// Outcome of an autofocus run.
#[derive(Debug, Clone, PartialEq)]
pub struct FocusResult {
    /// Lowest-score sample; the stage is left here.
    pub best: FocusSample,
    /// Coarse sweep samples, top to bottom.
    pub coarse: Vec<FocusSample>,
    /// Fine steps taken upwards (including the final non-improving one).
    pub fine_up_steps: u32,
    /// Fine steps taken downwards (including the final non-improving one).
    pub fine_down_steps: u32,
}

/// Run the coarse-to-fine search and leave the stage at the best position.
#[instrument(skip_all, fields(slices = settings.coarse_slices))]
pub async fn autofocus(
    stage: &dyn Stage,
    camera: &dyn Camera,
    settings: &AutofocusSettings,
) -> ScopeResult<FocusResult> {
    settings.validate()?;
    let start = stage.reconcile().await?;
    info!(z = start.z, "Starting autofocus");

    let step = settings.coarse_step;
    stage
        .move_relative(0.0, 0.0, Some(settings.coarse_offset() + step))
        .await?;

    let mut coarse = Vec::with_capacity(settings.coarse_slices as usize);
    for _ in 0..settings.coarse_slices {
        stage.move_relative(0.0, 0.0, Some(-step)).await?;
        coarse.push(sample(stage, camera).await?);
    }

    // First minimum wins on ties.
    let mut best = coarse
        .iter()
        .copied()
        .reduce(|best, s| if s.score < best.score { s } else { best })
        .ok_or_else(|| ScopeError::InvalidInput("coarse sweep took no samples".to_string()))?;
    debug!(z = best.position.z, score = best.score, "Coarse sweep done");
    stage.move_to(best.position).await?;

    let fine_up_steps = fine_search(stage, camera, settings, settings.fine_step, &mut best).await?;
    stage.move_to(best.position).await?;

    let fine_down_steps =
        fine_search(stage, camera, settings, -settings.fine_step, &mut best).await?;
    stage.move_to(best.position).await?;

    info!(
        z = best.position.z,
        score = best.score,
        fine_up_steps,
        fine_down_steps,
        "Autofocus finished"
    );
    Ok(FocusResult {
        best,
        coarse,
        fine_up_steps,
        fine_down_steps,
    })
}

async fn sample(stage: &dyn Stage, camera: &dyn Camera) -> ScopeResult<FocusSample> {
    let position = stage.query_position().await?;
    let score = camera.focus_score().await?;
    debug!(z = position.z, score, "Focus sample");
    Ok(FocusSample { position, score })
}

/// Step by `dz` while the score improves; returns the number of steps taken.
async fn fine_search(
    stage: &dyn Stage,
    camera: &dyn Camera,
    settings: &AutofocusSettings,
    dz: f64,
    best: &mut FocusSample,
) -> ScopeResult<u32> {
    let mut steps = 0;
    while steps < settings.max_fine_steps {
        stage.move_relative(0.0, 0.0, Some(dz)).await?;
        steps += 1;
        let candidate = sample(stage, camera).await?;
        if candidate.score < best.score {
            *best = candidate;
        } else {
            break;
        }
    }
    Ok(steps)
}
