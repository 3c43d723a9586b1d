//! End-to-end scheduling tests: front-end exclusivity, back-end coverage
//! and in-order retirement across a real worker pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rasterpool::{
    BeWork, ClientCallbacks, DrawSlot, DrawSubmit, HotTileManager, MacroTileMgr, RasterContext,
    RetireCallback, ThreadPool, ThreadingConfig, WorkKind,
};

fn pooled_context(
    workers: u32,
    callbacks: ClientCallbacks,
) -> (Arc<RasterContext>, ThreadPool) {
    let mut config = ThreadingConfig::default();
    // The override path skips pinning, which keeps these tests polite on
    // shared machines.
    config.max_worker_threads = workers;
    let ctx = RasterContext::new(config, callbacks).unwrap();
    let pool = ThreadPool::create(&ctx).unwrap();
    (ctx, pool)
}

fn wait_idle(ctx: &RasterContext) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !ctx.is_idle() {
        assert!(Instant::now() < deadline, "scheduler failed to go idle");
        std::thread::sleep(Duration::from_millis(1));
    }
}

struct CountingHotTiles {
    inits: Mutex<HashMap<u32, usize>>,
}

impl HotTileManager for CountingHotTiles {
    fn initialize_hot_tiles(&self, _ctx: &RasterContext, _dc: &DrawSlot, tile_id: u32) {
        *self.inits.lock().unwrap().entry(tile_id).or_insert(0) += 1;
    }
}

#[test]
fn single_draw_covers_every_tile() {
    let hot = Arc::new(CountingHotTiles {
        inits: Mutex::new(HashMap::new()),
    });
    let mut callbacks = ClientCallbacks::default();
    callbacks.hot_tile_mgr = Some(hot.clone());

    let (ctx, pool) = pooled_context(4, callbacks);

    let tile_runs: Arc<Mutex<HashMap<u32, usize>>> = Arc::new(Mutex::new(HashMap::new()));
    let retired = Arc::new(AtomicUsize::new(0));

    let tile_ids: Vec<u32> = (0..4)
        .map(|i| MacroTileMgr::tile_id(i % 2, i / 2))
        .collect();

    let fe_tiles = tile_ids.clone();
    let be_runs = tile_runs.clone();
    let retired_cb = retired.clone();

    ctx.submit_draw(
        DrawSubmit::graphics(
            Arc::new(move |_ctx, dc, _worker, _desc| {
                for &tile in &fe_tiles {
                    let be_runs = be_runs.clone();
                    dc.tile_mgr().enqueue(
                        tile,
                        BeWork::new(
                            WorkKind::Draw,
                            Arc::new(move |_dc, _worker, tile_id, _desc| {
                                *be_runs.lock().unwrap().entry(tile_id).or_insert(0) += 1;
                            }),
                            0,
                        ),
                    );
                }
            }),
            0,
        )
        .retire_callback(RetireCallback::new(
            Arc::new(move |_, _, _| {
                retired_cb.fetch_add(1, Ordering::SeqCst);
            }),
            [0; 3],
        )),
    );

    wait_idle(&ctx);
    pool.shutdown();

    let runs = tile_runs.lock().unwrap();
    let inits = hot.inits.lock().unwrap();
    for tile in &tile_ids {
        assert_eq!(runs.get(tile), Some(&1), "tile {tile} back end ran once");
        assert_eq!(inits.get(tile), Some(&1), "tile {tile} hot tiles init once");
    }
    assert_eq!(retired.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.ring().tail(), 1);
    assert_eq!(ctx.ring().head(), 1);
}

#[test]
fn front_end_runs_exactly_once_per_draw() {
    let (ctx, pool) = pooled_context(4, ClientCallbacks::default());

    const DRAWS: usize = 64;
    let fe_counts: Arc<Vec<AtomicUsize>> =
        Arc::new((0..DRAWS).map(|_| AtomicUsize::new(0)).collect());

    for i in 0..DRAWS {
        let fe_counts = fe_counts.clone();
        ctx.submit_draw(DrawSubmit::graphics(
            Arc::new(move |_ctx, _dc, _worker, desc| {
                fe_counts[desc as usize].fetch_add(1, Ordering::SeqCst);
            }),
            i as u64,
        ));
    }

    wait_idle(&ctx);
    pool.shutdown();

    for (i, count) in fe_counts.iter().enumerate() {
        assert_eq!(count.load(Ordering::SeqCst), 1, "draw {i} front end");
    }
}

#[test]
fn draws_retire_in_submission_order() {
    let (ctx, pool) = pooled_context(4, ClientCallbacks::default());

    const DRAWS: usize = 48;
    let retired_order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

    for i in 0..DRAWS {
        let order = retired_order.clone();
        let submit = DrawSubmit::graphics(
            Arc::new(move |_ctx, dc, _worker, desc| {
                // One tile of real work per draw, tile chosen by draw index.
                dc.tile_mgr().enqueue(
                    (desc % 7) as u32,
                    BeWork::new(WorkKind::Draw, Arc::new(|_, _, _, _| {}), desc),
                );
            }),
            i as u64,
        )
        .retire_callback(RetireCallback::new(
            Arc::new(move |idx, _, _| {
                order.lock().unwrap().push(idx);
            }),
            [i, 0, 0],
        ));
        ctx.submit_draw(submit);
    }

    wait_idle(&ctx);
    pool.shutdown();

    let order = retired_order.lock().unwrap();
    let expected: Vec<usize> = (0..DRAWS).collect();
    assert_eq!(*order, expected, "no hole, duplicate or reorder");
}

#[test]
fn client_stats_are_summed_across_workers() {
    let reported: Arc<Mutex<Vec<rasterpool::DrawStats>>> = Arc::new(Mutex::new(Vec::new()));
    let mut callbacks = ClientCallbacks::default();
    let sink = reported.clone();
    callbacks.update_stats = Some(Arc::new(move |stats| {
        sink.lock().unwrap().push(*stats);
    }));

    let (ctx, pool) = pooled_context(4, callbacks);

    ctx.submit_draw(
        DrawSubmit::graphics(
            Arc::new(|_ctx, dc, _worker, _desc| {
                for tile in 0..4u32 {
                    dc.tile_mgr().enqueue(
                        tile,
                        BeWork::new(
                            WorkKind::Draw,
                            Arc::new(|dc, worker, _tile, _desc| {
                                dc.worker_stats(worker)
                                    .depth_pass_count
                                    .fetch_add(10, Ordering::Relaxed);
                            }),
                            0,
                        ),
                    );
                }
            }),
            0,
        )
        .enable_stats(true),
    );

    wait_idle(&ctx);
    pool.shutdown();

    let reports = reported.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].depth_pass_count, 40);
}

#[test]
fn fe_stats_and_so_offsets_flush_at_fe_completion() {
    let fe_stats: Arc<Mutex<Vec<rasterpool::FeStatsSnapshot>>> = Arc::new(Mutex::new(Vec::new()));
    let so_writes: Arc<Mutex<Vec<(u32, u32)>>> = Arc::new(Mutex::new(Vec::new()));

    let mut callbacks = ClientCallbacks::default();
    let fe_sink = fe_stats.clone();
    callbacks.update_stats_fe = Some(Arc::new(move |snap| {
        fe_sink.lock().unwrap().push(*snap);
    }));
    let so_sink = so_writes.clone();
    callbacks.update_so_write_offset = Some(Arc::new(move |buffer, offset| {
        so_sink.lock().unwrap().push((buffer, offset));
    }));

    let (ctx, pool) = pooled_context(2, callbacks);

    let mut enables = [false; rasterpool::MAX_SO_BUFFERS];
    enables[1] = true;
    ctx.submit_draw(
        DrawSubmit::graphics(
            Arc::new(|_ctx, dc, _worker, _desc| {
                dc.dyn_state()
                    .stats_fe
                    .prims_processed
                    .fetch_add(12, Ordering::Relaxed);
                dc.dyn_state().set_so_write_offset(1, 0x100);
                // Dirty but not enabled: must not be flushed.
                dc.dyn_state().set_so_write_offset(2, 0x200);
            }),
            0,
        )
        .enable_stats(true)
        .so_write_enable(enables),
    );

    wait_idle(&ctx);
    pool.shutdown();

    assert_eq!(fe_stats.lock().unwrap()[0].prims_processed, 12);
    assert_eq!(*so_writes.lock().unwrap(), vec![(1, 0x100)]);
}
