//! Feature engineering: leakage-aware, two-phase transformers.
//!
//! Every stage implements [`Transformer`]. Stateless stages treat `fit` as a
//! no-op; stateful stages refuse to `transform` until fitted. The
//! [`FeaturePipeline`] composes the stages in a fixed order.

pub mod config;
pub mod group_average;
pub mod leakage;
pub mod pipeline;
pub mod signals;
pub mod temporal;

pub use config::FeatureConfig;
pub use group_average::{GroupAverageEncoder, GroupAverageState, GroupTable};
pub use leakage::LeakageGuard;
pub use pipeline::FeaturePipeline;
pub use signals::DerivedSignals;
pub use temporal::{PeriodOfDay, TemporalFeatures};

use crate::data::Frame;
use crate::error::MlError;

/// Column names shared by the raw extract and the derived feature set.
pub mod columns {
    // Raw
    pub const SCHEDULED_DEPARTURE: &str = "partida_prevista";
    pub const ACTUAL_DEPARTURE: &str = "partida_real";
    pub const SCHEDULED_ARRIVAL: &str = "chegada_prevista";
    pub const ACTUAL_ARRIVAL: &str = "chegada_real";
    pub const CARRIER: &str = "empresa_aerea";
    pub const ORIGIN: &str = "aerodromo_origem";
    pub const DESTINATION: &str = "aerodromo_destino";
    pub const LINE_TYPE: &str = "codigo_tipo_linha";
    pub const FLIGHT_STATUS: &str = "situacao_voo";
    pub const JUSTIFICATION_CODE: &str = "codigo_justificativa";

    // Labels
    pub const DELAY_MINUTES: &str = "atraso_partida_min";
    pub const TARGET: &str = "atrasado";

    // Temporal
    pub const HOUR: &str = "hora_dia";
    pub const DAY_OF_WEEK: &str = "dia_semana";
    pub const MONTH: &str = "mes_ano";
    pub const PERIOD_OF_DAY: &str = "periodo_dia";
    pub const WEEKEND: &str = "fim_de_semana";
    pub const PEAK_SEASON: &str = "alta_temporada";
    pub const DELAY_LOG: &str = "atraso_log";
    pub const DELAY_CAPPED: &str = "atraso_capped";

    // Signals
    pub const HOUR_SIN: &str = "hora_sin";
    pub const HOUR_COS: &str = "hora_cos";
    pub const IS_HUB: &str = "is_hub";

    // Group averages
    pub const CARRIER_MEAN_DELAY: &str = "media_atraso_empresa";
    pub const ORIGIN_MEAN_DELAY: &str = "media_atraso_origem";
    pub const DESTINATION_MEAN_DELAY: &str = "media_atraso_destino";
}

/// A two-phase table transformation.
pub trait Transformer {
    /// Stage name used in logs and fit-state errors.
    fn name(&self) -> &'static str;

    /// Learn whatever state the stage needs. Stateless stages do nothing.
    fn fit(&mut self, frame: &Frame) -> Result<(), MlError>;

    /// Apply the stage. Must never mutate fit state.
    fn transform(&self, frame: Frame) -> Result<Frame, MlError>;

    /// Whether the stage learns anything in `fit`.
    fn is_stateful(&self) -> bool;

    /// Stateless stages are always ready.
    fn is_fitted(&self) -> bool {
        !self.is_stateful()
    }

    fn fit_transform(&mut self, frame: Frame) -> Result<Frame, MlError> {
        self.fit(&frame)?;
        self.transform(frame)
    }
}
