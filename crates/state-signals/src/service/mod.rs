//! Service layer: the exporter and responder endpoints.

pub mod diagnostics;
pub mod exporter;
pub mod responder;

pub use diagnostics::ListenerDiagnostic;
pub use exporter::{
    ExporterState, InitializeOptions, PublishOptions, ShutdownOptions, SignalExporter, WaitOptions,
};
pub use responder::SignalResponder;
