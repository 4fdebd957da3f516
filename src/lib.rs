pub mod config;
pub mod error;
pub mod frame_source;
pub mod video_processor;
pub mod similarity;
pub mod slide_detector;
pub mod video_source;
pub mod ocr;
pub mod renderer;
pub mod pdf_renderer;
pub mod html_renderer;
pub mod metadata;
pub mod processor;
pub mod scheduler;
pub mod handler;

#[cfg(test)]
mod testing;

pub use config::{ConfigLoader, ConfigOverrides, ExportFormat, ExtractConfig, ResolutionTier};
pub use error::{ConfigError, ExtractError, FailureKind, RenderError, SourceError};
pub use frame_source::{FrameSource, SampledFrame, VideoHandle, VideoInfo};
pub use video_processor::FfmpegFrameSource;
pub use similarity::{PerceptualSimilarity, SimilarityEngine};
pub use slide_detector::{detect, SlideCandidate, SlideDetector};
pub use video_source::{DefaultVideoSource, FetchedVideo, VideoSource};
pub use ocr::{OcrEngine, TesseractOcr};
pub use renderer::{renderer_for, DocumentRenderer};
pub use metadata::{DeckMetadata, SlideMetadata};
pub use processor::{
    CancelFlag, Collaborators, ExtractionJob, ExtractionResult, JobEvent, JobStage, JobStatus,
    ProgressCallback, VideoId,
};
pub use scheduler::{notify_webhook, BatchReport, BatchScheduler};
