//! Scheduler span tracing.
//!
//! Records what each worker spends its time on (idle waits, front-end runs,
//! macrotile drains, compute dispatch) together with the draw and tile
//! involved. Spans land in thread-local buffers with no cross-thread
//! contention on the hot path; each worker flushes its buffer on the way
//! out and the host exports everything as a Chrome Tracing / Perfetto JSON
//! file with one track per worker.
//!
//! Collection call sites in the scheduler are compiled in under the `trace`
//! feature.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

use crate::tilemgr::MacroTileMgr;

/// What a worker was doing during a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    /// Blocked or spinning with no runnable draw.
    Idle,
    /// Running the front end of one draw.
    FrontEnd,
    /// Holding one macrotile's lock and draining its work FIFO.
    TileDrain,
    /// Executing work groups of one compute dispatch.
    ComputeDispatch,
}

impl SpanKind {
    fn name(self) -> &'static str {
        match self {
            SpanKind::Idle => "idle",
            SpanKind::FrontEnd => "front_end",
            SpanKind::TileDrain => "tile_drain",
            SpanKind::ComputeDispatch => "compute_dispatch",
        }
    }
}

/// One finished span on one worker.
#[derive(Debug, Clone, Copy)]
pub struct SchedSpan {
    pub kind: SpanKind,
    pub worker_id: u32,
    pub draw_id: Option<u32>,
    pub tile_id: Option<u32>,
    /// Work items executed inside the span (FIFO entries, compute groups).
    pub work_items: u32,
    pub start_us: u64,
    pub duration_us: u64,
}

thread_local! {
    static LOCAL_SPANS: RefCell<Vec<SchedSpan>> = RefCell::new(Vec::with_capacity(4096));
}

lazy_static::lazy_static! {
    static ref TRACE_EPOCH: Instant = Instant::now();
    static ref FLUSHED_SPANS: Mutex<Vec<SchedSpan>> = Mutex::new(Vec::new());
}

/// RAII span: stamps the clock on creation, records itself on drop.
pub struct SpanGuard {
    kind: SpanKind,
    worker_id: u32,
    draw_id: Option<u32>,
    tile_id: Option<u32>,
    work_items: u32,
    start: Instant,
}

impl SpanGuard {
    fn begin(kind: SpanKind, worker_id: u32, draw_id: Option<u32>, tile_id: Option<u32>) -> Self {
        SpanGuard {
            kind,
            worker_id,
            draw_id,
            tile_id,
            work_items: 0,
            start: Instant::now(),
        }
    }

    /// The worker has no runnable draw and is about to wait.
    pub fn idle(worker_id: u32) -> Self {
        Self::begin(SpanKind::Idle, worker_id, None, None)
    }

    /// The worker claimed a draw's front end.
    pub fn front_end(worker_id: u32, draw_id: u32) -> Self {
        Self::begin(SpanKind::FrontEnd, worker_id, Some(draw_id), None)
    }

    /// The worker locked a macrotile and is draining it.
    pub fn tile_drain(worker_id: u32, draw_id: u32, tile_id: u32) -> Self {
        Self::begin(SpanKind::TileDrain, worker_id, Some(draw_id), Some(tile_id))
    }

    /// The worker is pulling groups off a compute dispatch.
    pub fn compute_dispatch(worker_id: u32, draw_id: u32) -> Self {
        Self::begin(SpanKind::ComputeDispatch, worker_id, Some(draw_id), None)
    }

    /// Credit `n` executed work items to this span.
    pub fn add_work_items(&mut self, n: u32) {
        self.work_items += n;
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        let start_us = self
            .start
            .saturating_duration_since(*TRACE_EPOCH)
            .as_micros() as u64;
        let duration_us = self.start.elapsed().as_micros() as u64;
        LOCAL_SPANS.with(|spans| {
            spans.borrow_mut().push(SchedSpan {
                kind: self.kind,
                worker_id: self.worker_id,
                draw_id: self.draw_id,
                tile_id: self.tile_id,
                work_items: self.work_items,
                start_us,
                duration_us,
            });
        });
    }
}

/// Fold the calling thread's spans into the shared list. Each worker calls
/// this once on exit; the host calls it on its own thread before exporting.
pub fn flush_thread_spans() {
    LOCAL_SPANS.with(|spans| {
        let mut local = spans.borrow_mut();
        if !local.is_empty() {
            FLUSHED_SPANS.lock().unwrap().append(&mut local);
        }
    });
}

/// Every span flushed so far, in flush order.
pub fn flushed_spans() -> Vec<SchedSpan> {
    FLUSHED_SPANS.lock().unwrap().clone()
}

/// Chrome Tracing "complete" event. `tid` carries the worker id so each
/// worker renders as its own track.
#[derive(Serialize)]
struct ChromeEvent {
    name: &'static str,
    ph: &'static str,
    ts: u64,
    dur: u64,
    pid: u32,
    tid: u32,
    args: ChromeArgs,
}

#[derive(Serialize)]
struct ChromeArgs {
    #[serde(skip_serializing_if = "Option::is_none")]
    draw: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tile_x: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tile_y: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    work_items: Option<u32>,
}

fn chrome_event(span: &SchedSpan) -> ChromeEvent {
    let (tile_x, tile_y) = match span.tile_id {
        Some(id) => {
            let (x, y) = MacroTileMgr::get_tile_indices(id);
            (Some(x), Some(y))
        }
        None => (None, None),
    };
    ChromeEvent {
        name: span.kind.name(),
        ph: "X",
        ts: span.start_us,
        dur: span.duration_us,
        pid: 1,
        tid: span.worker_id,
        args: ChromeArgs {
            draw: span.draw_id,
            tile_x,
            tile_y,
            work_items: (span.work_items != 0).then_some(span.work_items),
        },
    }
}

/// Export every flushed span to a JSON file readable by chrome://tracing
/// or ui.perfetto.dev.
pub fn export_to_file<P: AsRef<Path>>(path: P) -> io::Result<()> {
    let events: Vec<ChromeEvent> = FLUSHED_SPANS
        .lock()
        .unwrap()
        .iter()
        .map(chrome_event)
        .collect();

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &events)?;
    writer.flush()
}
