//! Page render queue
//!
//! At most one rasterization is in flight. A request that arrives while a
//! page is rendering replaces the pending page (last writer wins) and is
//! started when the in-flight render settles.
//!
//! [`RenderQueue`] is the bare state machine. [`spawn_render_service`] runs it
//! as a task fed by a message channel and publishes every outcome on a
//! `watch` channel, which is the only place the current [`Viewport`] is
//! written.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::coords::Viewport;
use crate::error::PlacementError;
use crate::events::{EditorEvent, EventEmitter};
use crate::rasterizer::{Rasterizer, ViewportParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Rendering { page: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderQueue {
    state: QueueState,
    pending: Option<u32>,
}

impl Default for RenderQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderQueue {
    pub fn new() -> Self {
        Self {
            state: QueueState::Idle,
            pending: None,
        }
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn is_rendering(&self) -> bool {
        matches!(self.state, QueueState::Rendering { .. })
    }

    pub fn rendering_page(&self) -> Option<u32> {
        match self.state {
            QueueState::Rendering { page } => Some(page),
            QueueState::Idle => None,
        }
    }

    pub fn pending(&self) -> Option<u32> {
        self.pending
    }

    /// Returns the page to start rendering now, or `None` if the request was
    /// parked as the pending page.
    pub fn request_render(&mut self, page: u32) -> Option<u32> {
        match self.state {
            QueueState::Idle => {
                self.state = QueueState::Rendering { page };
                Some(page)
            }
            QueueState::Rendering { page: current } => {
                if let Some(dropped) = self.pending.replace(page) {
                    debug!(dropped, page, "Superseded pending render");
                } else {
                    debug!(current, page, "Render in flight, deferring");
                }
                None
            }
        }
    }

    /// Settle the in-flight render and return the follow-up page to start.
    ///
    /// A page-range failure only discards the failed request; any other
    /// failure also discards the pending page.
    pub fn complete(
        &mut self,
        outcome: &Result<Viewport, PlacementError>,
    ) -> Result<Option<u32>, PlacementError> {
        if self.state == QueueState::Idle {
            return Err(PlacementError::InvalidState(
                "render completed while no render was in flight".to_string(),
            ));
        }
        self.state = QueueState::Idle;

        match outcome {
            Ok(_) | Err(PlacementError::PageRange { .. }) => {}
            Err(_) => {
                if let Some(dropped) = self.pending.take() {
                    debug!(dropped, "Dropped pending render after failure");
                }
            }
        }

        Ok(self.pending.take().and_then(|page| self.request_render(page)))
    }
}

/// Render state as published to readers
#[derive(Debug, Clone, Default)]
pub struct RenderSnapshot {
    /// Viewport of the last successful render
    pub viewport: Option<Viewport>,
    pub rendering: Option<u32>,
    pub pending: Option<u32>,
    /// Number of requests the service has taken off its channel
    pub accepted: u64,
    /// Number of renders that have settled, successfully or not
    pub settled: u64,
    /// Error of the most recently settled render, if it failed
    pub last_error: Option<PlacementError>,
}

impl RenderSnapshot {
    fn outcome(&self) -> Result<Viewport, PlacementError> {
        match (&self.last_error, self.viewport) {
            (Some(err), _) => Err(err.clone()),
            (None, Some(viewport)) => Ok(viewport),
            (None, None) => Err(PlacementError::NoViewport),
        }
    }
}

/// Handle to a running render service
#[derive(Debug, Clone)]
pub struct RenderHandle {
    requests: mpsc::UnboundedSender<u32>,
    snapshot: watch::Receiver<RenderSnapshot>,
    /// Requests sent by every clone of this handle
    sent: Arc<AtomicU64>,
}

impl RenderHandle {
    /// Queue a page render without waiting for it
    pub fn request_render(&self, page: u32) -> Result<(), PlacementError> {
        self.send(page).map(|_| ())
    }

    /// Send a request and return its ticket, the `accepted` count at which
    /// the service has seen it.
    fn send(&self, page: u32) -> Result<u64, PlacementError> {
        // `sent` never lags the loop's `accepted` count
        let ticket = self.sent.fetch_add(1, Ordering::SeqCst) + 1;
        if self.requests.send(page).is_err() {
            self.sent.fetch_sub(1, Ordering::SeqCst);
            return Err(PlacementError::InvalidState(
                "render service stopped".to_string(),
            ));
        }
        Ok(ticket)
    }

    /// Request a page and wait until the queue has drained.
    ///
    /// Resolves with the viewport of the last render that settled, which is
    /// this page unless a later request superseded it.
    pub async fn render(&self, page: u32) -> Result<Viewport, PlacementError> {
        let mut rx = self.snapshot.clone();
        let baseline = rx.borrow_and_update().settled;
        let ticket = self.send(page)?;
        let snapshot = rx
            .wait_for(|s| s.accepted >= ticket && s.settled > baseline && s.rendering.is_none())
            .await
            .map_err(|_| PlacementError::InvalidState("render service stopped".to_string()))?
            .clone();
        snapshot.outcome()
    }

    /// Wait until every request sent so far has been taken by the service
    /// and no render is in flight, then return the current viewport
    pub async fn wait_idle(&self) -> Result<Viewport, PlacementError> {
        let mut rx = self.snapshot.clone();
        let sent = self.sent.load(Ordering::SeqCst);
        let snapshot = rx
            .wait_for(|s| s.accepted >= sent && s.rendering.is_none())
            .await
            .map_err(|_| PlacementError::InvalidState("render service stopped".to_string()))?
            .clone();
        snapshot.viewport.ok_or(PlacementError::NoViewport)
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.snapshot.borrow().viewport
    }

    pub fn snapshot(&self) -> RenderSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RenderSnapshot> {
        self.snapshot.clone()
    }
}

/// Start the render service on the current tokio runtime.
///
/// The service stops once every [`RenderHandle`] has been dropped.
pub fn spawn_render_service<R: Rasterizer>(
    rasterizer: Arc<R>,
    params: ViewportParams,
    events: EventEmitter,
) -> RenderHandle {
    if params.rotation != 0 {
        warn!(
            rotation = params.rotation,
            "Rendering rotated pages; coordinate mapping assumes an unrotated page"
        );
    }

    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(RenderSnapshot::default());

    tokio::spawn(run_render_loop(
        rasterizer,
        params,
        events,
        request_rx,
        snapshot_tx,
    ));

    RenderHandle {
        requests: request_tx,
        snapshot: snapshot_rx,
        sent: Arc::new(AtomicU64::new(0)),
    }
}

async fn run_render_loop<R: Rasterizer>(
    rasterizer: Arc<R>,
    params: ViewportParams,
    events: EventEmitter,
    mut requests: mpsc::UnboundedReceiver<u32>,
    snapshot: watch::Sender<RenderSnapshot>,
) {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(u32, Result<Viewport, PlacementError>)>();
    let mut queue = RenderQueue::new();

    let start = move |page: u32| {
        let rasterizer = Arc::clone(&rasterizer);
        let done_tx = done_tx.clone();
        debug!(page, "Starting render");
        tokio::spawn(async move {
            let result = rasterizer.render_page(page, params).await;
            // The loop is gone only when every handle was dropped
            let _ = done_tx.send((page, result));
        });
    };

    loop {
        tokio::select! {
            biased;

            request = requests.recv() => {
                let Some(page) = request else {
                    debug!("Render service stopped");
                    break;
                };
                if let Some(page) = queue.request_render(page) {
                    start(page);
                }
                snapshot.send_modify(|s| {
                    s.rendering = queue.rendering_page();
                    s.pending = queue.pending();
                    s.accepted += 1;
                });
            }

            Some((page, outcome)) = done_rx.recv() => {
                let next = match queue.complete(&outcome) {
                    Ok(next) => next,
                    Err(e) => {
                        warn!(page, error = %e, "Discarding unexpected render completion");
                        continue;
                    }
                };

                match &outcome {
                    Ok(viewport) => {
                        info!(
                            page,
                            width = viewport.width_px,
                            height = viewport.height_px,
                            "Page rendered"
                        );
                        events.emit(EditorEvent::Rendered { viewport: *viewport });
                    }
                    Err(e @ PlacementError::PageRange { .. }) => {
                        warn!(page, error = %e, "Ignoring render request");
                        events.emit(EditorEvent::RenderFailed { page, reason: e.to_string() });
                    }
                    Err(e) => {
                        warn!(page, error = %e, "Render failed");
                        events.emit(EditorEvent::RenderFailed { page, reason: e.to_string() });
                    }
                }

                if let Some(page) = next {
                    start(page);
                }
                snapshot.send_modify(|s| {
                    match outcome {
                        Ok(viewport) => {
                            s.viewport = Some(viewport);
                            s.last_error = None;
                        }
                        Err(e) => s.last_error = Some(e),
                    }
                    s.rendering = queue.rendering_page();
                    s.pending = queue.pending();
                    s.settled += 1;
                });
            }
        }
    }
}
