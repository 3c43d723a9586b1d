//! Draw dependencies and graphics/compute interleaving.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rasterpool::{
    BeWork, ClientCallbacks, DrawSubmit, RasterContext, RetireCallback, ThreadPool,
    ThreadingConfig, WorkKind,
};

fn pooled_context(workers: u32) -> (Arc<RasterContext>, ThreadPool) {
    let mut config = ThreadingConfig::default();
    config.max_worker_threads = workers;
    let ctx = RasterContext::new(config, ClientCallbacks::default()).unwrap();
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

#[test]
fn dependent_draw_waits_for_predecessor() {
    let (ctx, pool) = pooled_context(4);

    let first_done = Arc::new(AtomicBool::new(false));
    let order_ok = Arc::new(AtomicBool::new(true));
    let tiles_run = Arc::new(AtomicUsize::new(0));
    let retire_order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

    // First draw: one slow tile. The done flag is the last thing its work
    // item writes.
    let tiles = tiles_run.clone();
    let done_flag = first_done.clone();
    let order = retire_order.clone();
    ctx.submit_draw(
        DrawSubmit::graphics(
            Arc::new(move |_ctx, dc, _worker, _desc| {
                let tiles = tiles.clone();
                let done_flag = done_flag.clone();
                dc.tile_mgr().enqueue(
                    0,
                    BeWork::new(
                        WorkKind::Draw,
                        Arc::new(move |_, _, _, _| {
                            std::thread::sleep(Duration::from_millis(20));
                            tiles.fetch_add(1, Ordering::SeqCst);
                            done_flag.store(true, Ordering::SeqCst);
                        }),
                        0,
                    ),
                );
            }),
            0,
        )
        .retire_callback(RetireCallback::new(
            Arc::new(move |idx, _, _| order.lock().unwrap().push(idx)),
            [1, 0, 0],
        )),
    );

    // Second draw depends on the first: its tile must never run before the
    // first draw's back-end work finished. It shares tile 0, so without the
    // dependency gate a worker probing ahead could otherwise reach it.
    let tiles = tiles_run.clone();
    let done_flag = first_done.clone();
    let ok = order_ok.clone();
    let order = retire_order.clone();
    ctx.submit_draw(
        DrawSubmit::graphics(
            Arc::new(move |_ctx, dc, _worker, _desc| {
                let tiles = tiles.clone();
                let done_flag = done_flag.clone();
                let ok = ok.clone();
                dc.tile_mgr().enqueue(
                    0,
                    BeWork::new(
                        WorkKind::Draw,
                        Arc::new(move |_, _, _, _| {
                            if !done_flag.load(Ordering::SeqCst) {
                                ok.store(false, Ordering::SeqCst);
                            }
                            tiles.fetch_add(1, Ordering::SeqCst);
                        }),
                        0,
                    ),
                );
            }),
            0,
        )
        .dependent(true)
        .retire_callback(RetireCallback::new(
            Arc::new(move |idx, _, _| order.lock().unwrap().push(idx)),
            [2, 0, 0],
        )),
    );

    wait_idle(&ctx);
    pool.shutdown();

    assert_eq!(tiles_run.load(Ordering::SeqCst), 2);
    assert!(
        order_ok.load(Ordering::SeqCst),
        "dependent draw ran before its predecessor finished"
    );
    assert_eq!(*retire_order.lock().unwrap(), vec![1, 2]);
}

#[test]
fn compute_then_graphics_runs_all_groups_first() {
    let (ctx, pool) = pooled_context(4);

    let groups_seen: Arc<Mutex<HashSet<u32>>> = Arc::new(Mutex::new(HashSet::new()));
    let group_runs = Arc::new(AtomicUsize::new(0));
    let graphics_order_ok = Arc::new(AtomicBool::new(true));
    let fe_done = Arc::new(AtomicBool::new(false));

    let seen = groups_seen.clone();
    let runs = group_runs.clone();
    ctx.submit_draw(DrawSubmit::compute(
        16,
        Arc::new(move |_dc, _worker, group_id, _spill| {
            std::thread::sleep(Duration::from_millis(1));
            seen.lock().unwrap().insert(group_id);
            runs.fetch_add(1, Ordering::SeqCst);
        }),
    ));

    let runs = group_runs.clone();
    let ok = graphics_order_ok.clone();
    let fe_flag = fe_done.clone();
    ctx.submit_draw(DrawSubmit::graphics(
        Arc::new(move |_ctx, dc, _worker, _desc| {
            fe_flag.store(true, Ordering::SeqCst);
            for tile in 0..2u32 {
                let runs = runs.clone();
                let ok = ok.clone();
                dc.tile_mgr().enqueue(
                    tile,
                    BeWork::new(
                        WorkKind::Draw,
                        Arc::new(move |_, _, _, _| {
                            // Back-end draw order: every group of the
                            // compute draw ahead of us already executed.
                            if runs.load(Ordering::SeqCst) != 16 {
                                ok.store(false, Ordering::SeqCst);
                            }
                        }),
                        0,
                    ),
                );
            }
        }),
        0,
    ));

    wait_idle(&ctx);
    pool.shutdown();

    assert_eq!(group_runs.load(Ordering::SeqCst), 16, "each group exactly once");
    assert_eq!(groups_seen.lock().unwrap().len(), 16);
    assert!(fe_done.load(Ordering::SeqCst));
    assert!(
        graphics_order_ok.load(Ordering::SeqCst),
        "graphics back end started before the compute draw finished"
    );
}

#[test]
fn dependent_compute_waits_for_previous_draw() {
    let (ctx, pool) = pooled_context(4);

    let first_done = Arc::new(AtomicBool::new(false));
    let order_ok = Arc::new(AtomicBool::new(true));
    let groups = Arc::new(AtomicUsize::new(0));

    let done_flag = first_done.clone();
    ctx.submit_draw(DrawSubmit::graphics(
        Arc::new(move |_ctx, dc, _worker, _desc| {
            let done_flag = done_flag.clone();
            dc.tile_mgr().enqueue(
                3,
                BeWork::new(
                    WorkKind::Draw,
                    Arc::new(move |_, _, _, _| {
                        std::thread::sleep(Duration::from_millis(10));
                        done_flag.store(true, Ordering::SeqCst);
                    }),
                    0,
                ),
            );
        }),
        0,
    ));

    let done_flag = first_done.clone();
    let ok = order_ok.clone();
    let group_count = groups.clone();
    ctx.submit_draw(
        DrawSubmit::compute(
            8,
            Arc::new(move |_dc, _worker, _group, _spill| {
                if !done_flag.load(Ordering::SeqCst) {
                    ok.store(false, Ordering::SeqCst);
                }
                group_count.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .dependent(true),
    );

    wait_idle(&ctx);
    pool.shutdown();

    assert_eq!(groups.load(Ordering::SeqCst), 8);
    assert!(order_ok.load(Ordering::SeqCst));
}
