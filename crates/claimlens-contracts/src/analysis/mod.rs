mod parser;
mod result;

pub use parser::{
    extract_structured, is_placeholder, to_analysis_result, StructuredFields, StructuredVehicle,
};
pub use result::{AnalysisPhase, AnalysisResult, VehicleMetadata, UNKNOWN_SENTINEL};
