//! Frame-based analysis processors and the runner that records their runs.

mod logo;
mod scene;

pub use logo::{detect_logos, detect_logos_in_frame, LogoAnalysis, LogoDetection, Region};
pub use scene::{detect_scenes, mean_abs_diff, Scene, SceneAnalysis};

use crate::config::ProcessorSettings;
use crate::media_store::{
    MediaAsset, MediaStore, NewProcessingResult, ProcessingResult, ProcessingStatus,
    ValidationError,
};
use crate::media_tool::{FrameSampling, GrayFrame, MediaTool};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Processor {
    Scene,
    Logo,
}

impl Processor {
    pub const ALL: [Processor; 2] = [Processor::Scene, Processor::Logo];

    pub fn name(&self) -> &'static str {
        match self {
            Processor::Scene => "scene",
            Processor::Logo => "logo",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == s)
    }

    fn sample_fps(&self, settings: &ProcessorSettings) -> f64 {
        match self {
            Processor::Scene => settings.scene.sample_fps,
            Processor::Logo => settings.logo.sample_fps,
        }
    }

    /// Runs the analysis over already decoded frames.
    pub fn analyze(
        &self,
        frames: &[GrayFrame],
        settings: &ProcessorSettings,
        asset: &MediaAsset,
    ) -> Result<serde_json::Value> {
        let duration = asset.probed.duration;
        let value = match self {
            Processor::Scene => serde_json::to_value(detect_scenes(frames, &settings.scene, duration))?,
            Processor::Logo => {
                let scale = source_pixels_per_sample(asset, settings);
                serde_json::to_value(detect_logos(frames, &settings.logo, scale, duration))?
            }
        };
        Ok(value)
    }
}

/// How many source pixels one sampled pixel stands for.
fn source_pixels_per_sample(asset: &MediaAsset, settings: &ProcessorSettings) -> f64 {
    let sample = settings.frame_width as f64 * settings.frame_height as f64;
    match (asset.probed.width, asset.probed.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 && sample > 0.0 => (w * h) as f64 / sample,
        _ => 1.0,
    }
}

pub struct ProcessorRunner {
    store: Arc<dyn MediaStore>,
    tool: Arc<dyn MediaTool>,
    settings: ProcessorSettings,
    media_root: PathBuf,
}

impl ProcessorRunner {
    pub fn new(
        store: Arc<dyn MediaStore>,
        tool: Arc<dyn MediaTool>,
        settings: ProcessorSettings,
        media_root: PathBuf,
    ) -> Self {
        Self {
            store,
            tool,
            settings,
            media_root,
        }
    }

    /// Run `processor` against one asset, recording the run as a
    /// processing result that ends up `completed` or `failed`.
    pub async fn run(&self, asset_id: i64, processor: Processor) -> Result<ProcessingResult> {
        let asset = self
            .store
            .get_asset(asset_id)?
            .ok_or_else(|| ValidationError::NotFound {
                entity: "Asset",
                id: asset_id.to_string(),
            })?;

        let result_id = self.store.append_processing_result(
            asset_id,
            &NewProcessingResult {
                processor_name: processor.name().to_string(),
                status: ProcessingStatus::Processing,
                result_data: None,
                error_message: None,
            },
        )?;

        info!("Running {} processor on asset {}", processor.name(), asset_id);
        match self.analyze(&asset, processor).await {
            Ok(data) => {
                self.store.update_processing_result(
                    result_id,
                    ProcessingStatus::Completed,
                    Some(&data),
                    None,
                )?;
            }
            Err(e) => {
                error!("{} processor failed for asset {}: {:#}", processor.name(), asset_id, e);
                self.store.update_processing_result(
                    result_id,
                    ProcessingStatus::Failed,
                    None,
                    Some(&format!("{:#}", e)),
                )?;
            }
        }

        self.store
            .list_processing_results(asset_id)?
            .into_iter()
            .find(|r| r.id == result_id)
            .ok_or_else(|| anyhow!("Processing result {} disappeared", result_id))
    }

    /// Run several processors on one asset concurrently. Each entry is the
    /// outcome of the processor at the same index.
    pub async fn run_all(
        &self,
        asset_id: i64,
        processors: &[Processor],
    ) -> Vec<Result<ProcessingResult>> {
        futures::future::join_all(processors.iter().map(|p| self.run(asset_id, *p))).await
    }

    async fn analyze(&self, asset: &MediaAsset, processor: Processor) -> Result<serde_json::Value> {
        let path = self.media_root.join(&asset.file_path);
        let sampling = FrameSampling {
            fps: processor.sample_fps(&self.settings),
            width: self.settings.frame_width,
            height: self.settings.frame_height,
        };
        let frames = self
            .tool
            .sample_frames(&path, sampling)
            .await
            .with_context(|| format!("Failed to sample frames from {:?}", path))?;
        if frames.is_empty() {
            return Err(anyhow!("No frames decoded from {:?}", path));
        }

        let settings = self.settings.clone();
        let asset = asset.clone();
        tokio::task::spawn_blocking(move || processor.analyze(&frames, &settings, &asset))
            .await
            .context("Analysis task panicked")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media_store::{NewMediaAsset, ProbedFields, SqliteMediaStore, SupportedExtensions};
    use crate::media_tool::{FrameRequest, ProbeReport, ToolError};
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::TempDir;

    struct FrameSource {
        frames: Vec<GrayFrame>,
    }

    #[async_trait]
    impl MediaTool for FrameSource {
        async fn probe(&self, _path: &Path) -> Result<ProbeReport, ToolError> {
            Ok(ProbeReport::default())
        }

        async fn extract_frame(
            &self,
            _input: &Path,
            _output: &Path,
            _request: FrameRequest,
        ) -> Result<(), ToolError> {
            Ok(())
        }

        async fn sample_frames(
            &self,
            _input: &Path,
            _sampling: FrameSampling,
        ) -> Result<Vec<GrayFrame>, ToolError> {
            if self.frames.is_empty() {
                return Err(ToolError::Failed {
                    tool: "ffmpeg".to_string(),
                    stderr: "Invalid data found when processing input".to_string(),
                });
            }
            Ok(self.frames.clone())
        }
    }

    fn setup(frames: Vec<GrayFrame>) -> (ProcessorRunner, Arc<SqliteMediaStore>, i64, TempDir) {
        let dir = TempDir::new().unwrap();
        let absolute_path = dir.path().join("spot.mp4");
        std::fs::write(&absolute_path, vec![1u8; 256]).unwrap();
        let store = Arc::new(SqliteMediaStore::in_memory(SupportedExtensions::default()).unwrap());
        let asset = store
            .create_asset(&NewMediaAsset {
                title: "spot".to_string(),
                description: None,
                file_path: "spot.mp4".to_string(),
                absolute_path,
                file_size: 256,
                file_size_mb: 0.0,
                probed: ProbedFields {
                    duration: Some(2.0),
                    width: Some(160),
                    height: Some(90),
                    ..Default::default()
                },
                metadata: serde_json::json!({}),
                directory_id: None,
            })
            .unwrap();
        let runner = ProcessorRunner::new(
            store.clone(),
            Arc::new(FrameSource { frames }),
            ProcessorSettings::default(),
            dir.path().to_path_buf(),
        );
        (runner, store, asset.id, dir)
    }

    #[test]
    fn processor_names_round_trip() {
        for p in Processor::ALL {
            assert_eq!(Processor::parse(p.name()), Some(p));
        }
        assert_eq!(Processor::parse("faces"), None);
    }

    #[tokio::test]
    async fn scene_run_is_recorded_as_completed() {
        let frames: Vec<GrayFrame> = (0..10)
            .map(|i| GrayFrame::filled(160, 90, i as f64 * 0.2, if i < 5 { 10 } else { 240 }))
            .collect();
        let (runner, store, asset_id, _dir) = setup(frames);

        let result = runner.run(asset_id, Processor::Scene).await.unwrap();

        assert_eq!(result.processor_name, "scene");
        assert_eq!(result.status, ProcessingStatus::Completed);
        let data = result.result_data.unwrap();
        assert_eq!(data["total_scenes"], 2);
        assert_eq!(store.list_processing_results(asset_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn decode_failure_is_recorded_as_failed() {
        let (runner, _store, asset_id, _dir) = setup(Vec::new());

        let result = runner.run(asset_id, Processor::Logo).await.unwrap();

        assert_eq!(result.status, ProcessingStatus::Failed);
        assert!(result
            .error_message
            .unwrap()
            .contains("Failed to sample frames"));
    }

    #[tokio::test]
    async fn run_all_records_one_result_per_processor() {
        let frames: Vec<GrayFrame> = (0..4)
            .map(|i| GrayFrame::filled(160, 90, i as f64, 128))
            .collect();
        let (runner, store, asset_id, _dir) = setup(frames);

        let results = runner.run_all(asset_id, &Processor::ALL).await;

        assert_eq!(results.len(), 2);
        let logo = results[1].as_ref().unwrap();
        assert_eq!(logo.processor_name, "logo");
        assert_eq!(logo.status, ProcessingStatus::Completed);
        assert_eq!(logo.result_data.as_ref().unwrap()["total_logos_detected"], 0);
        assert_eq!(store.list_processing_results(asset_id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_asset_is_an_error() {
        let (runner, _store, _asset_id, _dir) = setup(Vec::new());
        assert!(runner.run(999, Processor::Scene).await.is_err());
    }
}
