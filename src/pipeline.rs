use crate::compression::{CompressionLayer, CompressionService};
use crate::conditional::{ConditionalLayer, ConditionalService};
use crate::config::Settings;
use crate::finalize::{FinalizeLayer, FinalizeService};
use tower::Layer;

/// The full response pipeline as a single layer.
///
/// Wraps a handler so that validators are attached as soon as it returns,
/// compression is queued behind every callback the handler registered, and
/// the finalized response answers conditional requests.
///
/// ```ignore
/// use armonaut::{PipelineLayer, Settings};
/// use tower::ServiceBuilder;
///
/// let settings = Settings::from_env()?;
/// let service = ServiceBuilder::new()
///     .layer(PipelineLayer::from_settings(&settings))
///     .service(my_handler);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PipelineLayer {
    finalize: FinalizeLayer,
    compression: CompressionLayer,
    conditional: ConditionalLayer,
}

impl PipelineLayer {
    /// Creates a pipeline that answers conditional requests.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pipeline configured from `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            finalize: FinalizeLayer::new()
                .evaluate_preconditions(!settings.http.prevent_http_cache),
            ..Self::default()
        }
    }
}

impl<S> Layer<S> for PipelineLayer {
    type Service = FinalizeService<CompressionService<ConditionalService<S>>>;

    fn layer(&self, inner: S) -> Self::Service {
        let conditional = self.conditional.layer(inner);
        let compression = self.compression.layer(conditional);
        self.finalize.layer(compression)
    }
}
