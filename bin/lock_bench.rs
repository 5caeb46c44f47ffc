use nodelock::lock::lock_store::LockStore;
use nodelock::node::node_service::NodeService;
use nodelock::node::node_store::NodeStore;
use nodelock::options::WriteOptions;
use nodelock::{Lifetime, LockRequest, LockService, LockType, NodeRef, StoreRef};
use procfs::CpuInfo;
use rand::distributions::Uniform;
use rand::Rng;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const NUM_NODES: usize = 10000;
const NUM_OPS: usize = 100000;
const CONTENDED_NODES: usize = 64;

fn print_environment() {
    println!("nodelock: version {}", env!("CARGO_PKG_VERSION"));

    let datetime = chrono::Utc::now();
    println!("Date: {:?}", datetime.naive_utc());

    match CpuInfo::new() {
        Ok(cpu_info) => {
            println!(
                "CPU: {} * {}",
                cpu_info.cpus.len(),
                cpu_info.fields.get("model name").map_or("unknown", |s| s.as_str())
            );
            println!(
                "CPU Cache: {}",
                cpu_info.fields.get("cache size").map_or("unknown", |s| s.as_str())
            );
        }
        Err(e) => println!("CPU: unavailable ({})", e),
    }
    println!("Threads: {}", rayon::current_num_threads());
}

fn print_arguments() {
    println!("Nodes: {}", NUM_NODES);
    println!("Operations: {}", NUM_OPS);
    println!("Contended nodes: {}", CONTENDED_NODES);
}

struct BenchMark {
    _temp_dir: TempDir,
    store: Arc<NodeStore>,
    lock_service: Arc<LockService>,
    nodes: Vec<NodeRef>,
}

impl BenchMark {
    fn new() -> BenchMark {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(NodeStore::open(temp_dir.path()).unwrap());
        let node_service = NodeService::new();
        let lock_service = Arc::new(LockService::new(Arc::new(LockStore::new())));
        lock_service.bind_node_policies(&node_service);

        let mut txn = NodeStore::begin(&store, "bench");
        let root = node_service
            .create_root(&mut txn, StoreRef::workspace("bench"), "root")
            .unwrap();
        let nodes = (0..NUM_NODES)
            .map(|i| {
                node_service
                    .create_node(&mut txn, &root, &format!("node-{}", i))
                    .unwrap()
            })
            .collect();
        txn.commit().unwrap();

        BenchMark {
            _temp_dir: temp_dir,
            store,
            lock_service,
            nodes,
        }
    }

    fn ephemeral_seq(&self) {
        let request = LockRequest::new(LockType::WriteLock)
            .time_to_expire(60)
            .lifetime(Lifetime::Ephemeral);
        let start = std::time::Instant::now();
        for i in 0..NUM_OPS {
            let node = &self.nodes[i % NUM_NODES];
            let mut txn = NodeStore::begin(&self.store, "bench");
            self.lock_service.lock_with(&mut txn, node, &request).unwrap();
            self.lock_service.unlock(&mut txn, node).unwrap();
            txn.commit().unwrap();
        }
        let elapsed = start.elapsed().as_secs_f64();
        println!(
            "ephemeral_seq: {:.0} lock/unlock pairs per second",
            NUM_OPS as f64 / elapsed
        );
    }

    fn persistent_commit(&self, sync: bool) {
        let num_ops = if sync { NUM_OPS / 100 } else { NUM_OPS / 10 };
        let mut random = rand::thread_rng().sample_iter(Uniform::new(0, NUM_NODES));
        let start = std::time::Instant::now();
        for _ in 0..num_ops {
            let node = &self.nodes[random.next().unwrap()];
            let mut txn =
                NodeStore::begin_with_options(&self.store, "bench", WriteOptions { sync });
            self.lock_service
                .lock(&mut txn, node, LockType::WriteLock)
                .unwrap();
            txn.commit().unwrap();

            let mut txn =
                NodeStore::begin_with_options(&self.store, "bench", WriteOptions { sync });
            self.lock_service.unlock(&mut txn, node).unwrap();
            txn.commit().unwrap();
        }
        let elapsed = start.elapsed().as_secs_f64();
        println!(
            "persistent_commit (sync: {}): {:.0} commits per second ({} ops)",
            sync,
            2.0 * num_ops as f64 / elapsed,
            num_ops
        );
    }

    /// Every thread races for the same few nodes; losers count their failures.
    fn contended_parallel(&self) {
        let acquired = AtomicUsize::new(0);
        let refused = AtomicUsize::new(0);
        let request = LockRequest::new(LockType::WriteLock)
            .time_to_expire(60)
            .lifetime(Lifetime::Ephemeral);
        let start = std::time::Instant::now();
        (0..NUM_OPS).into_par_iter().for_each(|i| {
            let user = format!("user-{}", i % 8);
            let node = &self.nodes[rand::thread_rng().gen_range(0..CONTENDED_NODES)];
            let mut txn = NodeStore::begin(&self.store, user);
            match self.lock_service.lock_with(&mut txn, node, &request) {
                Ok(()) => {
                    acquired.fetch_add(1, Ordering::Relaxed);
                    self.lock_service.unlock(&mut txn, node).unwrap();
                }
                Err(_) => {
                    refused.fetch_add(1, Ordering::Relaxed);
                }
            }
            let _ = txn.commit();
        });
        let elapsed = start.elapsed().as_secs_f64();
        println!(
            "contended_parallel: {:.0} attempts per second ({} acquired, {} refused)",
            NUM_OPS as f64 / elapsed,
            acquired.load(Ordering::Relaxed),
            refused.load(Ordering::Relaxed)
        );
    }

    fn checkpoint(&self) {
        let start = std::time::Instant::now();
        self.store.checkpoint().unwrap();
        println!(
            "checkpoint: {} nodes in {:?}",
            self.store.len(),
            start.elapsed()
        );
    }
}

fn main() {
    print_environment();
    print_arguments();

    println!("-------------------------------------------------");
    let benchmark = BenchMark::new();
    benchmark.ephemeral_seq();
    benchmark.persistent_commit(false);
    benchmark.persistent_commit(true);
    benchmark.contended_parallel();
    benchmark.checkpoint();
}
