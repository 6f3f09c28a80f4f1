use crate::config::LogoSettings;
use crate::media_tool::GrayFrame;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};

/// Side of the square window used for the local mean threshold.
const BLOCK_SIZE: i64 = 11;
/// A pixel is foreground when it is this much darker than its surroundings.
const THRESHOLD_OFFSET: f64 = 2.0;
const MIN_ASPECT: f64 = 0.5;
const MAX_ASPECT: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    fn contains(&self, other: &Region) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.width <= self.x + self.width
            && other.y + other.height <= self.y + self.height
            && other != self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogoDetection {
    pub timestamp: f64,
    pub position: Region,
    pub confidence: f64,
    /// Filled area in source-resolution pixels.
    pub area: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionCount {
    pub position: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogoAnalysis {
    pub total_logos_detected: usize,
    pub logo_appearances: Vec<LogoDetection>,
    pub coverage_percentage: f64,
    pub common_positions: Vec<PositionCount>,
    pub frames_analyzed: usize,
    pub sample_rate_used: f64,
    pub confidence_threshold: f64,
}

/// Foreground mask: pixels darker than the mean of their neighbourhood.
fn local_threshold(frame: &GrayFrame) -> Vec<bool> {
    let w = frame.width as i64;
    let h = frame.height as i64;
    // Summed-area table with a zero row and column.
    let stride = (w + 1) as usize;
    let mut integral = vec![0u64; stride * (h + 1) as usize];
    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            row_sum += frame.get(x as u32, y as u32) as u64;
            let idx = (y + 1) as usize * stride + (x + 1) as usize;
            integral[idx] = integral[idx - stride] + row_sum;
        }
    }

    let half = BLOCK_SIZE / 2;
    let mut mask = vec![false; (w * h) as usize];
    for y in 0..h {
        for x in 0..w {
            let x0 = (x - half).max(0) as usize;
            let y0 = (y - half).max(0) as usize;
            let x1 = (x + half + 1).min(w) as usize;
            let y1 = (y + half + 1).min(h) as usize;
            let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            let count = ((x1 - x0) * (y1 - y0)) as f64;
            let mean = sum as f64 / count;
            mask[(y * w + x) as usize] = frame.get(x as u32, y as u32) as f64 <= mean - THRESHOLD_OFFSET;
        }
    }
    mask
}

/// Background pixels reachable from the frame border.
fn outside_mask(mask: &[bool], w: usize, h: usize) -> Vec<bool> {
    let mut outside = vec![false; w * h];
    let mut queue = VecDeque::new();
    for x in 0..w {
        for y in [0, h - 1] {
            queue.push_back((x, y));
        }
    }
    for y in 0..h {
        for x in [0, w - 1] {
            queue.push_back((x, y));
        }
    }
    while let Some((x, y)) = queue.pop_front() {
        let idx = y * w + x;
        if mask[idx] || outside[idx] {
            continue;
        }
        outside[idx] = true;
        if x > 0 {
            queue.push_back((x - 1, y));
        }
        if x + 1 < w {
            queue.push_back((x + 1, y));
        }
        if y > 0 {
            queue.push_back((x, y - 1));
        }
        if y + 1 < h {
            queue.push_back((x, y + 1));
        }
    }
    outside
}

/// Bounding box and filled area (holes included) of each 8-connected
/// foreground component that is not nested inside another one.
fn outer_components(mask: &[bool], w: usize, h: usize) -> Vec<(Region, usize)> {
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let outside = outside_mask(mask, w, h);
    let mut labels = vec![usize::MAX; w * h];
    let mut boxes: Vec<Region> = Vec::new();

    for start in 0..w * h {
        if !mask[start] || labels[start] != usize::MAX {
            continue;
        }
        let label = boxes.len();
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (w, h, 0, 0);
        let mut queue = VecDeque::from([start]);
        labels[start] = label;
        while let Some(idx) = queue.pop_front() {
            let (x, y) = (idx % w, idx / w);
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    let nx = x as i64 + dx;
                    let ny = y as i64 + dy;
                    if nx < 0 || ny < 0 || nx >= w as i64 || ny >= h as i64 {
                        continue;
                    }
                    let n = ny as usize * w + nx as usize;
                    if mask[n] && labels[n] == usize::MAX {
                        labels[n] = label;
                        queue.push_back(n);
                    }
                }
            }
        }
        boxes.push(Region {
            x: min_x as u32,
            y: min_y as u32,
            width: (max_x - min_x + 1) as u32,
            height: (max_y - min_y + 1) as u32,
        });
    }

    boxes
        .iter()
        .enumerate()
        .filter(|(_, region)| !boxes.iter().any(|other| other.contains(region)))
        .map(|(label, region)| {
            let mut area = 0;
            for y in region.y..region.y + region.height {
                for x in region.x..region.x + region.width {
                    let idx = y as usize * w + x as usize;
                    if labels[idx] == label || (!mask[idx] && !outside[idx]) {
                        area += 1;
                    }
                }
            }
            (*region, area)
        })
        .collect()
}

/// Candidate logo regions in one frame.
///
/// `scale` converts sample pixels to source pixels so area bounds are
/// independent of the sampling resolution.
pub fn detect_logos_in_frame(frame: &GrayFrame, settings: &LogoSettings, scale: f64) -> Vec<LogoDetection> {
    let w = frame.width as usize;
    let h = frame.height as usize;
    let mask = local_threshold(frame);

    outer_components(&mask, w, h)
        .into_iter()
        .filter_map(|(region, filled)| {
            let area = filled as f64 * scale;
            if area < settings.min_area as f64 || area > settings.max_area as f64 {
                return None;
            }
            let aspect = region.width as f64 / region.height as f64;
            if !(MIN_ASPECT..=MAX_ASPECT).contains(&aspect) {
                return None;
            }
            let confidence = (area / settings.max_area as f64).min(1.0);
            if confidence < settings.confidence_threshold {
                return None;
            }
            Some(LogoDetection {
                timestamp: frame.timestamp_secs,
                position: region,
                confidence,
                area,
            })
        })
        .collect()
}

/// Names the cell of a 3x3 grid holding the region's centre.
fn grid_position(region: &Region, width: u32, height: u32) -> &'static str {
    const NAMES: [[&str; 3]; 3] = [
        ["top_left", "top_center", "top_right"],
        ["middle_left", "center", "middle_right"],
        ["bottom_left", "bottom_center", "bottom_right"],
    ];
    let cx = region.x as f64 + region.width as f64 / 2.0;
    let cy = region.y as f64 + region.height as f64 / 2.0;
    let col = ((cx * 3.0 / width.max(1) as f64) as usize).min(2);
    let row = ((cy * 3.0 / height.max(1) as f64) as usize).min(2);
    NAMES[row][col]
}

pub fn detect_logos(
    frames: &[GrayFrame],
    settings: &LogoSettings,
    scale: f64,
    duration: Option<f64>,
) -> LogoAnalysis {
    let mut appearances = Vec::new();
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut frames_with_logo = HashSet::new();

    for (index, frame) in frames.iter().enumerate() {
        let found = detect_logos_in_frame(frame, settings, scale);
        if !found.is_empty() {
            frames_with_logo.insert(index);
        }
        for detection in found {
            *counts
                .entry(grid_position(&detection.position, frame.width, frame.height))
                .or_default() += 1;
            appearances.push(detection);
        }
    }

    let duration = duration
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(frames.len() as f64 / settings.sample_fps);
    let coverage_percentage = if duration > 0.0 {
        (frames_with_logo.len() as f64 / settings.sample_fps / duration * 100.0).min(100.0)
    } else {
        0.0
    };

    let mut common_positions: Vec<PositionCount> = counts
        .into_iter()
        .map(|(position, count)| PositionCount { position, count })
        .collect();
    common_positions.sort_by(|a, b| b.count.cmp(&a.count).then(a.position.cmp(b.position)));

    LogoAnalysis {
        total_logos_detected: appearances.len(),
        logo_appearances: appearances,
        coverage_percentage,
        common_positions,
        frames_analyzed: frames.len(),
        sample_rate_used: settings.sample_fps,
        confidence_threshold: settings.confidence_threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> LogoSettings {
        LogoSettings {
            sample_fps: 1.0,
            min_area: 500,
            max_area: 2000,
            confidence_threshold: 0.5,
        }
    }

    /// Bright 160x90 frame with a dark `size`x`size` square at (`x`, `y`).
    fn frame_with_square(t: f64, x: u32, y: u32, w: u32, h: u32) -> GrayFrame {
        let mut frame = GrayFrame::filled(160, 90, t, 200);
        for yy in y..y + h {
            for xx in x..x + w {
                frame.pixels[(yy * 160 + xx) as usize] = 20;
            }
        }
        frame
    }

    #[test]
    fn flat_frame_has_no_foreground() {
        let frame = GrayFrame::filled(32, 18, 0.0, 128);
        assert!(local_threshold(&frame).iter().all(|&fg| !fg));
        assert!(detect_logos_in_frame(&frame, &settings(), 1.0).is_empty());
    }

    #[test]
    fn dark_square_is_detected_with_filled_area() {
        let frame = frame_with_square(0.0, 10, 10, 40, 40);
        let found = detect_logos_in_frame(&frame, &settings(), 1.0);

        assert_eq!(found.len(), 1);
        let logo = &found[0];
        assert_eq!(
            logo.position,
            Region {
                x: 10,
                y: 10,
                width: 40,
                height: 40
            }
        );
        assert_eq!(logo.area, 1600.0);
        assert!((logo.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn shape_and_size_filters_apply() {
        // Too wide.
        let banner = frame_with_square(0.0, 5, 30, 120, 20);
        assert!(detect_logos_in_frame(&banner, &settings(), 1.0).is_empty());
        // Too small at native scale, large enough once scaled up.
        let small = frame_with_square(0.0, 60, 30, 20, 20);
        assert!(detect_logos_in_frame(&small, &settings(), 1.0).is_empty());
        assert_eq!(detect_logos_in_frame(&small, &settings(), 4.0).len(), 1);
    }

    #[test]
    fn aggregates_coverage_and_positions() {
        let frames = vec![
            frame_with_square(0.0, 110, 5, 40, 40),
            frame_with_square(1.0, 110, 5, 40, 40),
            GrayFrame::filled(160, 90, 2.0, 200),
            frame_with_square(3.0, 10, 45, 40, 40),
        ];
        let analysis = detect_logos(&frames, &settings(), 1.0, Some(4.0));

        assert_eq!(analysis.total_logos_detected, 3);
        assert_eq!(analysis.frames_analyzed, 4);
        assert!((analysis.coverage_percentage - 75.0).abs() < 1e-9);
        assert_eq!(
            analysis.common_positions[0],
            PositionCount {
                position: "top_right",
                count: 2
            }
        );
        assert_eq!(analysis.common_positions[1].position, "bottom_left");
    }
}
