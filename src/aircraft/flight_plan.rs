// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! Flight plan enrichment via `FlightAware` `AeroAPI`.
//!
//! Lookups are paid per call, so they never happen on the render path.
//! Interesting callsigns are queued with a priority and drained in the
//! background under an hourly window, a daily budget and a monthly cost cap.
//! Results are cached with a TTL and rendering only ever reads the cache.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use adsb_feed::tracker::AircraftState;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use log::{debug, error, info, warn};
use serde::Deserialize;
use thiserror::Error;

use super::category::is_worth_fetching;

pub const AEROAPI_BASE_URL: &str = "https://aeroapi.flightaware.com/aeroapi";

/// Aircraft closer than this are looked up first.
const NEAR_PRIORITY_MILES: f64 = 5.0;
/// A failed lookup is not retried for this long.
const FAILURE_BACKOFF_MINUTES: i64 = 15;
const BUDGET_WARNING_THRESHOLD: f64 = 0.8;
const BUDGET_EMERGENCY_THRESHOLD: f64 = 0.95;

#[derive(Debug, Error)]
pub enum FlightPlanError {
    #[error("hourly rate limit reached ({0} calls in the last hour)")]
    RateLimited(u32),

    #[error("daily budget of {0} calls reached")]
    DailyBudgetReached(u32),

    #[error("monthly budget nearly exhausted (${spent:.2} of ${budget:.2})")]
    MonthlyBudgetReached { spent: f64, budget: f64 },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("flight plan service returned status {0}")]
    Status(u16),

    #[error("no flight data for {0}")]
    NoData(String),

    #[error("invalid response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
}

/// Route and type for one flight. Every field may be unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlightPlan {
    pub origin: Option<String>,
    pub destination: Option<String>,
    pub aircraft_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AeroApiResponse {
    #[serde(default)]
    flights: Vec<AeroApiFlight>,
}

#[derive(Debug, Deserialize)]
struct AeroApiFlight {
    origin: Option<AeroApiAirport>,
    destination: Option<AeroApiAirport>,
    aircraft_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AeroApiAirport {
    code: Option<String>,
}

fn airport_code(airport: Option<AeroApiAirport>) -> Option<String> {
    airport
        .and_then(|a| a.code)
        .filter(|code| !code.trim().is_empty())
}

/// Extract the most recent flight from an `/flights/{ident}` response.
pub fn parse_flights(callsign: &str, body: &[u8]) -> Result<FlightPlan, FlightPlanError> {
    let response: AeroApiResponse = serde_json::from_slice(body)?;
    let flight = response
        .flights
        .into_iter()
        .next()
        .ok_or_else(|| FlightPlanError::NoData(callsign.to_string()))?;

    Ok(FlightPlan {
        origin: airport_code(flight.origin),
        destination: airport_code(flight.destination),
        aircraft_type: flight.aircraft_type.filter(|t| !t.trim().is_empty()),
    })
}

/// Source of flight plans.
pub trait FlightPlanClient: Send + Sync {
    fn fetch(&self, callsign: &str) -> Result<FlightPlan, FlightPlanError>;
}

/// Blocking `AeroAPI` client.
#[derive(Debug)]
pub struct AeroApiClient {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
}

impl AeroApiClient {
    pub fn new(api_key: String, timeout: StdDuration) -> Result<Self, FlightPlanError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: AEROAPI_BASE_URL.to_string(),
            api_key,
        })
    }
}

impl FlightPlanClient for AeroApiClient {
    fn fetch(&self, callsign: &str) -> Result<FlightPlan, FlightPlanError> {
        let url = format!("{}/flights/{}", self.base_url, callsign.trim());
        let response = self
            .client
            .get(&url)
            .header("x-apikey", &self.api_key)
            .send()?;

        if !response.status().is_success() {
            return Err(FlightPlanError::Status(response.status().as_u16()));
        }

        let body = response.bytes()?;
        parse_flights(callsign, &body)
    }
}

/// Budget settings for [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimits {
    pub max_calls_per_hour: u32,
    pub daily_budget: u32,
    pub monthly_budget: f64,
    pub cost_per_call: f64,
}

/// Hourly sliding window plus daily and monthly call budgets.
#[derive(Debug)]
pub struct RateLimiter {
    limits: RateLimits,
    recent: VecDeque<DateTime<Utc>>,
    day: Option<NaiveDate>,
    calls_today: u32,
    month: Option<(i32, u32)>,
    calls_this_month: u32,
}

impl RateLimiter {
    #[must_use]
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            recent: VecDeque::new(),
            day: None,
            calls_today: 0,
            month: None,
            calls_this_month: 0,
        }
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.day != Some(today) {
            if self.day.is_some() {
                info!("Daily flight plan budget reset: {} calls available", self.limits.daily_budget);
            }
            self.day = Some(today);
            self.calls_today = 0;
        }

        let month = (now.year(), now.month());
        if self.month != Some(month) {
            self.month = Some(month);
            self.calls_this_month = 0;
        }

        let hour_ago = now - Duration::hours(1);
        while self.recent.front().is_some_and(|t| *t <= hour_ago) {
            self.recent.pop_front();
        }
    }

    fn monthly_spend(&self) -> f64 {
        f64::from(self.calls_this_month) * self.limits.cost_per_call
    }

    fn budget_usage(&self) -> f64 {
        if self.limits.monthly_budget > 0.0 {
            self.monthly_spend() / self.limits.monthly_budget
        } else {
            1.0
        }
    }

    /// Whether one more call is allowed at `now`.
    pub fn check(&mut self, now: DateTime<Utc>) -> Result<(), FlightPlanError> {
        self.roll(now);

        if self.budget_usage() >= BUDGET_EMERGENCY_THRESHOLD {
            return Err(FlightPlanError::MonthlyBudgetReached {
                spent: self.monthly_spend(),
                budget: self.limits.monthly_budget,
            });
        }
        if self.calls_today >= self.limits.daily_budget {
            return Err(FlightPlanError::DailyBudgetReached(self.limits.daily_budget));
        }
        #[allow(clippy::cast_possible_truncation)]
        let in_window = self.recent.len() as u32;
        if in_window >= self.limits.max_calls_per_hour {
            return Err(FlightPlanError::RateLimited(in_window));
        }
        Ok(())
    }

    /// Count a call made at `now` against every budget.
    pub fn record(&mut self, now: DateTime<Utc>) {
        self.roll(now);
        self.recent.push_back(now);
        self.calls_today += 1;
        self.calls_this_month += 1;

        let usage = self.budget_usage();
        info!(
            "Flight plan call recorded. Today: {}/{}, monthly: {} calls (${:.2}), budget usage: {:.1}%",
            self.calls_today,
            self.limits.daily_budget,
            self.calls_this_month,
            self.monthly_spend(),
            usage * 100.0
        );
        if usage >= BUDGET_EMERGENCY_THRESHOLD {
            error!("Flight plan lookups stopped: {:.1}% of monthly budget used", usage * 100.0);
        } else if usage >= BUDGET_WARNING_THRESHOLD {
            warn!(
                "Flight plan budget warning: {:.1}% of monthly budget used (${:.2}/${:.2})",
                usage * 100.0,
                self.monthly_spend(),
                self.limits.monthly_budget
            );
        }
    }
}

/// Settings for [`FlightPlanService`].
#[derive(Debug, Clone)]
pub struct FlightPlanSettings {
    pub limits: RateLimits,
    pub cache_ttl: Duration,
    pub min_callsign_length: usize,
    pub max_calls_per_drain: usize,
}

struct CacheEntry {
    plan: Option<FlightPlan>,
    fetched_at: DateTime<Utc>,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now - self.fetched_at < self.ttl
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Cached, budgeted flight plan lookups.
pub struct FlightPlanService {
    client: Arc<dyn FlightPlanClient>,
    settings: FlightPlanSettings,
    cache: Mutex<HashMap<String, CacheEntry>>,
    /// Callsign to priority, lower first.
    pending: Mutex<HashMap<String, u8>>,
    limiter: Mutex<RateLimiter>,
}

impl std::fmt::Debug for FlightPlanService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightPlanService")
            .field("settings", &self.settings)
            .field("pending", &lock(&self.pending).len())
            .finish_non_exhaustive()
    }
}

fn cache_key(callsign: &str) -> String {
    callsign.trim().to_uppercase()
}

impl FlightPlanService {
    #[must_use]
    pub fn new(client: Arc<dyn FlightPlanClient>, settings: FlightPlanSettings) -> Self {
        let limiter = RateLimiter::new(settings.limits.clone());
        Self {
            client,
            settings,
            cache: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            limiter: Mutex::new(limiter),
        }
    }

    /// Cached plan for a callsign, if one was fetched within the TTL.
    #[must_use]
    pub fn cached(&self, callsign: &str, now: DateTime<Utc>) -> Option<FlightPlan> {
        let cache = lock(&self.cache);
        cache
            .get(&cache_key(callsign))
            .filter(|entry| entry.is_fresh(now))
            .and_then(|entry| entry.plan.clone())
    }

    fn is_fresh(&self, key: &str, now: DateTime<Utc>) -> bool {
        lock(&self.cache)
            .get(key)
            .is_some_and(|entry| entry.is_fresh(now))
    }

    /// Queue lookups for tracked aircraft that have no fresh cache entry.
    pub fn queue_candidates(&self, aircraft: &[AircraftState], now: DateTime<Utc>) -> usize {
        let mut queued = 0;
        for state in aircraft {
            let Some(callsign) = state.callsign.as_deref() else {
                continue;
            };
            if !is_worth_fetching(callsign, self.settings.min_callsign_length) {
                continue;
            }
            let key = cache_key(callsign);
            if self.is_fresh(&key, now) {
                continue;
            }

            let priority = if state.distance_miles < NEAR_PRIORITY_MILES { 1 } else { 2 };
            let mut pending = lock(&self.pending);
            let slot = pending.entry(key).or_insert_with(|| {
                queued += 1;
                priority
            });
            *slot = (*slot).min(priority);
        }
        queued
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Perform queued lookups, highest priority first. Blocking.
    ///
    /// Stops early when a budget is exhausted; the rest stay queued. Every
    /// attempt counts against the budgets, and a callsign whose lookup
    /// failed is not queued again for a while. Returns the number of lookups
    /// attempted.
    pub fn drain(&self, now: DateTime<Utc>) -> usize {
        let batch: Vec<(u8, String)> = {
            let pending = lock(&self.pending);
            let mut batch: Vec<(u8, String)> = pending
                .iter()
                .map(|(callsign, priority)| (*priority, callsign.clone()))
                .collect();
            batch.sort();
            batch.truncate(self.settings.max_calls_per_drain);
            batch
        };

        if batch.is_empty() {
            return 0;
        }
        info!("Background fetching {} flight plans", batch.len());

        let mut attempted = 0;
        for (priority, callsign) in batch {
            if let Err(e) = lock(&self.limiter).check(now) {
                warn!("{e}, deferring {} callsigns", self.pending_len());
                break;
            }

            attempted += 1;
            lock(&self.pending).remove(&callsign);
            let result = self.client.fetch(&callsign);
            lock(&self.limiter).record(now);

            match result {
                Ok(plan) => {
                    info!(
                        "Fetched flight plan (priority {priority}) for {callsign}: {} -> {}",
                        plan.origin.as_deref().unwrap_or("?"),
                        plan.destination.as_deref().unwrap_or("?")
                    );
                    self.store(callsign, Some(plan), now);
                }
                Err(FlightPlanError::NoData(_)) => {
                    debug!("No flight plan for {callsign}");
                    self.store(callsign, None, now);
                }
                Err(e) => {
                    warn!("Failed to fetch flight plan for {callsign}, retrying in {FAILURE_BACKOFF_MINUTES} min: {e}");
                    let backoff = Duration::minutes(FAILURE_BACKOFF_MINUTES).min(self.settings.cache_ttl);
                    lock(&self.cache).insert(
                        callsign,
                        CacheEntry {
                            plan: None,
                            fetched_at: now,
                            ttl: backoff,
                        },
                    );
                }
            }
        }
        attempted
    }

    fn store(&self, callsign: String, plan: Option<FlightPlan>, now: DateTime<Utc>) {
        let ttl = self.settings.cache_ttl;
        lock(&self.cache).insert(callsign, CacheEntry { plan, fetched_at: now, ttl });
    }

    /// Clear old cache entries
    pub fn cleanup_cache(&self, now: DateTime<Utc>) {
        lock(&self.cache).retain(|_, entry| entry.is_fresh(now));
    }
}
