use rasterpool::pool::ThreadPlan;
use rasterpool::{ThreadingConfig, Topology};

fn main() {
    let topo = Topology::probe();
    println!("Detected {} NUMA nodes", topo.nodes.len());
    for (n, node) in topo.nodes.iter().enumerate() {
        for (c, core) in node.cores.iter().enumerate() {
            println!(
                "node {} core {} (group {}): threads {:?}",
                n, c, core.proc_group, core.thread_ids
            );
        }
    }
    println!("threads per proc group: {}", topo.threads_per_proc_group);

    match ThreadPlan::derive(&ThreadingConfig::default(), &topo) {
        Ok(plan) => {
            println!(
                "plan: {} workers, numa mask {:#x}, single threaded {}",
                plan.workers.len(),
                plan.numa_mask,
                plan.single_threaded
            );
            for w in &plan.workers {
                println!(
                    "  worker {} -> node {} core {} ht {} (group {}, hw thread {})",
                    w.worker_id, w.numa_id, w.core_id, w.ht_id, w.proc_group_id, w.thread_id
                );
            }
        }
        Err(e) => println!("plan derivation failed: {}", e),
    }
}
