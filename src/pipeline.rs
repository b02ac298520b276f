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


//! The live pipeline: feed polling, tracking, alerting and rendering.
//!
//! One guarded step mutates state: a feed poll is ingested under the state
//! lock, the alert engine advances, and a new immutable
//! [`PipelineSnapshot`] is published through a `watch` channel. The render
//! loop only ever clones the latest snapshot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use adsb_feed::geo::Viewport;
use adsb_feed::tracker::{AircraftTracker, IngestReport, TrackerConfig, TrackerSnapshot};
use adsb_feed::FeedSnapshot;
use chrono::{DateTime, Utc};
use image::RgbImage;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::aircraft::{AircraftTypeLookup, Enrichment, FlightPlanService};
use crate::alert::{AlertState, ProximityAlertEngine};
use crate::display_mode::{self, DisplayMode, EffectiveMode};
use crate::feed::{FeedError, FeedSource};
use crate::map::MapBackground;
use crate::render::{FrameInput, RenderCompositor};
use crate::sink::{FrameSink, SinkError};

/// Immutable view handed to renderers
#[derive(Debug, Clone)]
pub struct PipelineSnapshot {
    /// Increases with every publish
    pub version: u64,
    pub viewport: Viewport,
    pub tracker: TrackerSnapshot,
    pub alert: AlertState,
    /// When the alert last changed state
    pub alert_since: Option<DateTime<Utc>>,
    pub mode: EffectiveMode,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub display_mode: DisplayMode,
    pub target: (u32, u32),
    pub update_interval: Duration,
    pub frame_interval: Duration,
    pub drain_interval: Duration,
    /// Stop after this many frames; run until cancelled when `None`
    pub max_frames: Option<u64>,
}

struct PipelineState {
    tracker: AircraftTracker,
    alert: ProximityAlertEngine,
    viewport: Viewport,
    version: u64,
}

impl PipelineState {
    fn publish(&mut self, display_mode: DisplayMode, now: DateTime<Utc>) -> Arc<PipelineSnapshot> {
        self.version += 1;
        let tracker = self.tracker.snapshot();
        let alert = self.alert.state();
        Arc::new(PipelineSnapshot {
            version: self.version,
            viewport: self.viewport,
            tracker,
            alert,
            alert_since: self.alert.since(),
            mode: display_mode::resolve(display_mode, alert),
            updated_at: now,
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

pub struct Pipeline {
    settings: PipelineSettings,
    state: Mutex<PipelineState>,
    snapshots: watch::Sender<Arc<PipelineSnapshot>>,
    feed: Arc<dyn FeedSource>,
    compositor: RenderCompositor,
    map: Option<Arc<MapBackground>>,
    database: Option<Arc<dyn AircraftTypeLookup>>,
    flight_plans: Option<Arc<FlightPlanService>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("settings", &self.settings)
            .field("version", &self.latest().version)
            .field("map", &self.map)
            .field("flight_plans", &self.flight_plans)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    #[must_use]
    pub fn new(
        settings: PipelineSettings,
        viewport: Viewport,
        tracker_config: TrackerConfig,
        alert: ProximityAlertEngine,
        feed: Arc<dyn FeedSource>,
        compositor: RenderCompositor,
    ) -> Self {
        let mut state = PipelineState {
            tracker: AircraftTracker::new(tracker_config),
            alert,
            viewport,
            version: 0,
        };
        let initial = state.publish(settings.display_mode, Utc::now());
        let (snapshots, _) = watch::channel(initial);
        Self {
            settings,
            state: Mutex::new(state),
            snapshots,
            feed,
            compositor,
            map: None,
            database: None,
            flight_plans: None,
        }
    }

    #[must_use]
    pub fn with_map(mut self, map: Arc<MapBackground>) -> Self {
        map.set_viewport(self.latest().viewport);
        self.map = Some(map);
        self
    }

    #[must_use]
    pub fn with_database(mut self, database: Arc<dyn AircraftTypeLookup>) -> Self {
        self.database = Some(database);
        self
    }

    #[must_use]
    pub fn with_flight_plans(mut self, service: Arc<FlightPlanService>) -> Self {
        self.flight_plans = Some(service);
        self
    }

    #[must_use]
    pub fn latest(&self) -> Arc<PipelineSnapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    /// Ingest one feed poll and publish the resulting snapshot.
    pub fn apply_feed(&self, feed: &FeedSnapshot, now: DateTime<Utc>) -> IngestReport {
        let (report, snapshot) = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            let report = state.tracker.ingest(feed, &state.viewport, now);
            let min_distance = state.tracker.snapshot().min_distance();
            state.alert.update(min_distance, now);
            (report, state.publish(self.settings.display_mode, now))
        };

        info!(
            "Feed: {} records, {} malformed, {} out of range, +{} ~{} -{}, tracking {}; alert {:?}, showing {:?}",
            report.received,
            report.malformed,
            report.out_of_range,
            report.added,
            report.updated,
            report.removed,
            report.tracked,
            snapshot.alert,
            snapshot.mode
        );
        self.snapshots.send_replace(snapshot);
        report
    }

    /// Move the map, re-measuring tracked aircraft against the new center.
    pub fn set_viewport(&self, viewport: Viewport, now: DateTime<Utc>) {
        let snapshot = {
            let mut state = lock(&self.state);
            state.viewport = viewport;
            let dropped = state.tracker.rebase(&viewport);
            if dropped > 0 {
                debug!("{dropped} aircraft fell outside the new viewport");
            }
            let min_distance = state.tracker.snapshot().min_distance();
            state.alert.update(min_distance, now);
            state.publish(self.settings.display_mode, now)
        };
        self.snapshots.send_replace(snapshot);
        if let Some(map) = &self.map {
            map.set_viewport(viewport);
        }
    }

    /// Advance the alert clock without new feed data, using the last known
    /// minimum distance. Publishes only when the alert state changes.
    pub fn tick_alert(&self, now: DateTime<Utc>) -> AlertState {
        let snapshot = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            let before = state.alert.state();
            let min_distance = state.tracker.snapshot().min_distance();
            let after = state.alert.update(min_distance, now);
            if after == before {
                return after;
            }
            state.publish(self.settings.display_mode, now)
        };
        info!("Alert {:?} without feed update, showing {:?}", snapshot.alert, snapshot.mode);
        let alert = snapshot.alert;
        self.snapshots.send_replace(snapshot);
        alert
    }

    /// Poll the feed on the blocking pool and ingest the result. On error the
    /// previous snapshot stays published.
    pub async fn poll_feed(&self) -> Result<IngestReport, FeedError> {
        let feed = Arc::clone(&self.feed);
        let polled = tokio::task::spawn_blocking(move || feed.poll())
            .await
            .map_err(|e| FeedError::Task(e.to_string()))??;
        Ok(self.apply_feed(&polled, Utc::now()))
    }

    /// Enrichment for the aircraft the current views can show
    fn enrichment_for(&self, tracker: &TrackerSnapshot, now: DateTime<Utc>) -> HashMap<String, Enrichment> {
        let mut enrichment = HashMap::new();
        for aircraft in [tracker.closest(), tracker.fastest(), tracker.highest()].into_iter().flatten() {
            if enrichment.contains_key(&aircraft.icao) {
                continue;
            }
            let flight_plan = self
                .flight_plans
                .as_ref()
                .zip(aircraft.callsign.as_deref())
                .and_then(|(service, callsign)| service.cached(callsign, now));
            let gathered = Enrichment::gather(aircraft, self.database.as_deref(), flight_plan);
            enrichment.insert(aircraft.icao.clone(), gathered);
        }
        enrichment
    }

    /// Draw the latest snapshot. Never waits on the map background.
    #[must_use]
    pub fn render_frame(&self, now: DateTime<Utc>) -> RgbImage {
        let snapshot = self.latest();
        let background = match (&self.map, snapshot.mode) {
            (Some(map), EffectiveMode::Map) => map.current(&snapshot.viewport),
            _ => None,
        };
        let enrichment = self.enrichment_for(&snapshot.tracker, now);
        self.compositor.render(&FrameInput {
            viewport: &snapshot.viewport,
            tile_image: background.as_ref().map(|map| &map.image),
            snapshot: &snapshot.tracker,
            mode: snapshot.mode,
            target: self.settings.target,
            now,
            enrichment: &enrichment,
        })
    }

    async fn feed_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.settings.update_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Feed polling stopped");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.poll_feed().await {
                        warn!("Feed unavailable, keeping previous state: {e}");
                        self.tick_alert(Utc::now());
                    }
                }
            }
        }
    }

    async fn flight_plan_loop(self: Arc<Self>, service: Arc<FlightPlanService>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.settings.drain_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = interval.tick() => {
                    let now = Utc::now();
                    let snapshot = self.latest();
                    let queued = service.queue_candidates(&snapshot.tracker.aircraft, now);
                    if queued > 0 {
                        debug!("Queued {queued} flight plan lookups");
                    }
                    let worker = Arc::clone(&service);
                    let drained = tokio::task::spawn_blocking(move || {
                        let attempted = worker.drain(now);
                        worker.cleanup_cache(now);
                        attempted
                    })
                    .await;
                    if let Err(e) = drained {
                        error!("Flight plan worker failed: {e}");
                    }
                }
            }
        }
    }

    /// Run feed, enrichment and render loops until `cancel` fires or the
    /// frame limit is reached. Returns the number of frames presented.
    pub async fn run(self: Arc<Self>, mut sink: Box<dyn FrameSink>, cancel: CancellationToken) -> Result<u64, SinkError> {
        let feed_task = tokio::spawn(Arc::clone(&self).feed_loop(cancel.clone()));
        let plan_task = self
            .flight_plans
            .clone()
            .map(|service| tokio::spawn(Arc::clone(&self).flight_plan_loop(service, cancel.clone())));

        let result = self.render_loop(sink.as_mut(), &cancel).await;
        cancel.cancel();

        if let Err(e) = feed_task.await {
            error!("Feed task failed: {e}");
        }
        if let Some(task) = plan_task {
            if let Err(e) = task.await {
                error!("Flight plan task failed: {e}");
            }
        }
        result
    }

    async fn render_loop(&self, sink: &mut dyn FrameSink, cancel: &CancellationToken) -> Result<u64, SinkError> {
        let mut interval = tokio::time::interval(self.settings.frame_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut frames = 0;
        loop {
            if self.settings.max_frames.is_some_and(|max| frames >= max) {
                info!("Rendered {frames} frames, stopping");
                return Ok(frames);
            }
            tokio::select! {
                () = cancel.cancelled() => return Ok(frames),
                _ = interval.tick() => {
                    let frame = self.render_frame(Utc::now());
                    sink.present(&frame, frames)?;
                    frames += 1;
                }
            }
        }
    }
}
