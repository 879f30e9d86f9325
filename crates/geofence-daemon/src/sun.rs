//! Sunset and sunrise times from sunrise-sunset.org.
//!
//! The API returns today's times in UTC formatted like `7:12:03 PM`. Sunrise
//! is taken on the following day, so "past sunset" means the night between
//! today's sunset and tomorrow's sunrise.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use geofence_core::{Location, SunsetProvider};
use serde::Deserialize;

/// Public sunrise-sunset.org endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.sunrise-sunset.org/json";

const TIME_FORMAT: &str = "%I:%M:%S %p";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One night: from sunset to the next sunrise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SunTimes {
    /// Today's sunset.
    pub sunset: DateTime<Utc>,
    /// Tomorrow's sunrise.
    pub sunrise: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct SunResponse {
    results: SunResults,
    status: String,
}

#[derive(Debug, Deserialize)]
struct SunResults {
    sunrise: String,
    sunset: String,
}

/// Parses a `7:12:03 PM` style time on `day`, in UTC.
#[must_use]
pub fn parse_sun_time(input: &str, day: NaiveDate) -> Option<DateTime<Utc>> {
    NaiveTime::parse_from_str(input.trim(), TIME_FORMAT)
        .ok()
        .map(|time| day.and_time(time).and_utc())
}

/// Sunset provider backed by sunrise-sunset.org.
pub struct SunClock {
    client: reqwest::Client,
    endpoint: String,
    location: Option<Location>,
    times: RwLock<Option<SunTimes>>,
}

impl SunClock {
    /// Create a clock for `location`. Without a location it never reports
    /// past sunset.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(location: Option<Location>) -> anyhow::Result<Self> {
        Self::with_endpoint(location, DEFAULT_ENDPOINT)
    }

    /// Create a clock querying `endpoint` instead of the public API.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_endpoint(
        location: Option<Location>,
        endpoint: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            location,
            times: RwLock::new(None),
        })
    }

    /// The times currently in use.
    #[must_use]
    pub fn times(&self) -> Option<SunTimes> {
        *self.times.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the times in use.
    pub fn set_times(&self, times: SunTimes) {
        *self.times.write().unwrap_or_else(PoisonError::into_inner) = Some(times);
    }

    /// Fetch today's times. On failure the previous times are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the answer cannot be parsed.
    pub async fn refresh(&self) -> anyhow::Result<()> {
        let Some(location) = self.location else {
            tracing::debug!("No location configured, skipping sunset lookup");
            return Ok(());
        };

        let response: SunResponse = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("lat", location.latitude.to_string()),
                ("lng", location.longitude.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.status != "OK" {
            anyhow::bail!("sunset lookup returned status {}", response.status);
        }

        let today = Utc::now().date_naive();
        let tomorrow = today
            .checked_add_days(Days::new(1))
            .ok_or_else(|| anyhow::anyhow!("date overflow"))?;
        let sunset = parse_sun_time(&response.results.sunset, today)
            .ok_or_else(|| anyhow::anyhow!("bad sunset time '{}'", response.results.sunset))?;
        let sunrise = parse_sun_time(&response.results.sunrise, tomorrow)
            .ok_or_else(|| anyhow::anyhow!("bad sunrise time '{}'", response.results.sunrise))?;

        tracing::info!(%sunset, %sunrise, "Sunset times updated");
        self.set_times(SunTimes { sunset, sunrise });
        Ok(())
    }

    /// Whether `now` lies strictly between sunset and the next sunrise.
    #[must_use]
    pub fn is_past_sunset_at(&self, now: DateTime<Utc>) -> bool {
        self.times()
            .is_some_and(|times| times.sunset < now && now < times.sunrise)
    }
}

impl SunsetProvider for SunClock {
    fn is_past_sunset(&self) -> bool {
        self.is_past_sunset_at(Utc::now())
    }
}
