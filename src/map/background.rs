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


use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use adsb_feed::geo::Viewport;
use log::debug;
use tokio_util::sync::CancellationToken;

use super::{ComposedMap, TileCache};

/// Keeps the composed background for the current viewport.
///
/// Composition runs in a background task so the render loop never waits on
/// tile I/O. Changing the viewport cancels the running composition; tile
/// fetches it already started finish on their own and land in the cache.
pub struct MapBackground {
    cache: Arc<TileCache>,
    target: (u32, u32),
    retry_after: Duration,
    state: Mutex<BackgroundState>,
}

#[derive(Default)]
struct BackgroundState {
    viewport: Option<Viewport>,
    composed: Option<Arc<ComposedMap>>,
    composed_at: Option<Instant>,
    composing: bool,
    cancel: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl std::fmt::Debug for MapBackground {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("MapBackground")
            .field("target", &self.target)
            .field("viewport", &state.viewport)
            .field("composing", &state.composing)
            .finish_non_exhaustive()
    }
}

impl MapBackground {
    /// `retry_after` controls how soon an image with missing or stale tiles
    /// is composed again.
    #[must_use]
    pub fn new(cache: Arc<TileCache>, target: (u32, u32), retry_after: Duration) -> Self {
        Self {
            cache,
            target,
            retry_after,
            state: Mutex::new(BackgroundState::default()),
        }
    }

    /// Switch to `viewport`, dropping the old image and cancelling any
    /// composition in progress. No-op when the viewport is unchanged.
    pub fn set_viewport(&self, viewport: Viewport) {
        let mut state = lock(&self.state);
        if state.viewport == Some(viewport) {
            return;
        }
        state.cancel.cancel();
        if state.composing {
            debug!("Cancelled map composition for the previous viewport");
        }
        *state = BackgroundState {
            viewport: Some(viewport),
            ..BackgroundState::default()
        };
    }

    /// Latest image for `viewport` without waiting. Starts a composition
    /// when there is no image yet, or when the last one was incomplete and
    /// `retry_after` has passed.
    pub fn current(self: &Arc<Self>, viewport: &Viewport) -> Option<Arc<ComposedMap>> {
        self.set_viewport(*viewport);

        let mut state = lock(&self.state);
        let needs_compose = match (&state.composed, state.composed_at) {
            (Some(map), Some(at)) => (map.failed > 0 || map.stale > 0) && at.elapsed() >= self.retry_after,
            _ => true,
        };
        if needs_compose && !state.composing {
            state.composing = true;
            self.spawn_composition(*viewport, state.cancel.clone());
        }
        state.composed.clone()
    }

    fn spawn_composition(self: &Arc<Self>, viewport: Viewport, cancel: CancellationToken) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let composed = tokio::select! {
                () = cancel.cancelled() => {
                    debug!("Map composition cancelled");
                    return;
                }
                composed = this.cache.get_viewport_image(&viewport, this.target) => composed,
            };

            let mut state = lock(&this.state);
            if cancel.is_cancelled() || state.viewport != Some(viewport) {
                return;
            }
            state.composed = Some(Arc::new(composed));
            state.composed_at = Some(Instant::now());
            state.composing = false;
        });
    }
}
