use crate::config::SceneSettings;
use crate::media_tool::GrayFrame;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Scene {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneAnalysis {
    pub total_scenes: usize,
    /// Timestamps where a cut was detected.
    pub cuts: Vec<f64>,
    pub scenes: Vec<Scene>,
    pub average_scene_length: f64,
    pub total_duration: f64,
    pub frames_analyzed: usize,
}

/// Mean absolute per-pixel difference between two frames of equal size.
pub fn mean_abs_diff(a: &GrayFrame, b: &GrayFrame) -> f64 {
    if a.pixels.is_empty() || a.pixels.len() != b.pixels.len() {
        return 0.0;
    }
    let sum: u64 = a
        .pixels
        .iter()
        .zip(&b.pixels)
        .map(|(&x, &y)| x.abs_diff(y) as u64)
        .sum();
    sum as f64 / a.pixels.len() as f64
}

/// Splits `frames` into scenes at every jump in content above the threshold.
///
/// `duration` is the clip length; when unknown the last frame timestamp is
/// used.
pub fn detect_scenes(frames: &[GrayFrame], settings: &SceneSettings, duration: Option<f64>) -> SceneAnalysis {
    let total_duration = duration
        .filter(|d| d.is_finite() && *d > 0.0)
        .or_else(|| frames.last().map(|f| f.timestamp_secs + 1.0 / settings.sample_fps))
        .unwrap_or(0.0);

    let mut cuts = Vec::new();
    let mut last_boundary = 0.0;
    for pair in frames.windows(2) {
        let diff = mean_abs_diff(&pair[0], &pair[1]);
        let at = pair[1].timestamp_secs;
        if diff > settings.threshold && at - last_boundary >= settings.min_scene_length_secs {
            cuts.push(at);
            last_boundary = at;
        }
    }

    let mut boundaries = Vec::with_capacity(cuts.len() + 2);
    boundaries.push(0.0);
    boundaries.extend(cuts.iter().copied().filter(|c| *c < total_duration));
    boundaries.push(total_duration);

    let scenes: Vec<Scene> = boundaries
        .windows(2)
        .filter(|w| w[1] > w[0])
        .map(|w| Scene {
            start: w[0],
            end: w[1],
            duration: w[1] - w[0],
        })
        .collect();

    let average_scene_length = if scenes.is_empty() {
        total_duration
    } else {
        scenes.iter().map(|s| s.duration).sum::<f64>() / scenes.len() as f64
    };

    SceneAnalysis {
        total_scenes: scenes.len(),
        cuts,
        scenes,
        average_scene_length,
        total_duration,
        frames_analyzed: frames.len(),
    }
}
