pub mod error;
pub mod ffmpeg_tools;
pub mod duration_probe;
pub mod segment_planner;
pub mod segment_encoder;
pub mod color;
pub mod labeler;
pub mod filter_labeler;
pub mod raster_labeler;
pub mod reporter;
pub mod metadata;
pub mod processor;
pub mod config;

pub use error::{Result, SplitError};
pub use ffmpeg_tools::{CommandRunner, MediaTools, SystemRunner};
pub use duration_probe::DurationProbe;
pub use segment_planner::{plan, CutPlan};
pub use segment_encoder::SegmentEncoder;
pub use color::Color;
pub use labeler::{LabelPosition, LabelRenderer, LabelSpec};
pub use filter_labeler::FilterLabeler;
pub use raster_labeler::RasterLabeler;
pub use reporter::{PipelineState, Reporter, TracingReporter};
pub use metadata::{resolve_video_file, Segment, SegmentManifest, VideoAsset};
pub use processor::{process_video, Pipeline, ProcessConfig, ProcessOutput};
pub use config::{AppConfig, ConfigLayer, ConfigLoader, LabelLayer};
