pub mod config;
pub mod errors;
pub mod executor;
pub mod filters;
pub mod metrics;
pub mod progress;
pub mod results;
pub mod search;
pub mod spec;

pub use config::{EngineConfig, EngineOverrides};
pub use errors::{ScanError, ScanResult};
pub use executor::{
    AnalysisResponse, CustomContext, Insight, InsightDefinition, InsightExecutor, InsightOutput,
    InsightRun, InsightStatus,
};
pub use filters::{FileFilter, FileTarget, ScanSet};
pub use metrics::{ScanMetrics, ScanStats};
pub use progress::{
    CancellationToken, CollectingSink, EventKind, FilePosition, NullSink, ProgressEvent,
    ProgressReporter, ProgressSink,
};
pub use results::{FileMatches, FilterResult, MatchedLine};
pub use search::{LineFilter, RipgrepProbe};
pub use spec::{FilterSpec, FilterSpecConfig, ReadingMode};
