//! Weather provider seam.
//!
//! Sign-in triggers one best-effort fetch through this trait; the result
//! (if any) reaches the frontend as a notification event. Geolocation-based
//! lookup is out of scope — [`StaticWeather`] ships a fixed report, and a
//! real provider can plug into the same seam.

/// Errors from a weather fetch. Always non-fatal: failures are logged and
/// the report is simply not shown.
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    /// The provider could not produce a report.
    #[error("weather service unavailable: {0}")]
    Unavailable(String),
}

/// A weather observation for display.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReport {
    /// Where the observation is for.
    pub place: String,
    /// Short human-readable conditions.
    pub summary: String,
    /// Temperature in degrees Celsius.
    pub temperature_c: f32,
}

/// Async weather source.
pub trait WeatherProvider: Send + Sync {
    /// Fetch the current report.
    fn fetch(
        &self,
    ) -> impl std::future::Future<Output = Result<WeatherReport, WeatherError>> + Send;
}

/// Provider that returns the same report every time.
#[derive(Debug, Clone)]
pub struct StaticWeather {
    report: WeatherReport,
}

impl StaticWeather {
    /// Wraps a fixed report.
    #[must_use]
    pub const fn new(report: WeatherReport) -> Self {
        Self { report }
    }
}

impl Default for StaticWeather {
    fn default() -> Self {
        Self::new(WeatherReport {
            place: "somewhere".to_string(),
            summary: "conditions unknown".to_string(),
            temperature_c: 20.0,
        })
    }
}

impl WeatherProvider for StaticWeather {
    async fn fetch(&self) -> Result<WeatherReport, WeatherError> {
        Ok(self.report.clone())
    }
}
