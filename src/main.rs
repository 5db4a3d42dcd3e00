use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use stevedore::manager::{self, Manager, ManagerServer};
use stevedore::scheduler::SchedulerKind;
use stevedore::store::StoreKind;
use stevedore::worker::{self, TaskServer, Worker};

#[derive(Parser, Debug)]
#[command(name = "stevedore")]
#[command(about = "A minimal container orchestrator: one manager, many workers")]
struct Args {
    /// Host the worker APIs bind to
    #[arg(long, env = "STEVEDORE_WORKER_HOST", default_value = "127.0.0.1")]
    worker_host: String,

    /// Base port for worker APIs; each worker takes the next port up
    #[arg(long, env = "STEVEDORE_WORKER_PORT", default_value_t = 5555)]
    worker_port: u16,

    /// Number of workers to run in this process
    #[arg(long, env = "STEVEDORE_WORKERS", default_value_t = 3)]
    workers: u16,

    /// Host the manager API binds to
    #[arg(long, env = "STEVEDORE_MANAGER_HOST", default_value = "127.0.0.1")]
    manager_host: String,

    /// Port for the manager API
    #[arg(long, env = "STEVEDORE_MANAGER_PORT", default_value_t = 5566)]
    manager_port: u16,

    /// Scheduler variant: "roundrobin" or "epvm"
    #[arg(long, env = "STEVEDORE_SCHEDULER", default_value = "roundrobin")]
    scheduler: String,

    /// Store backend: "memory" or "file"
    #[arg(long, env = "STEVEDORE_DB", default_value = "memory")]
    db: String,

    /// Directory for file-backed stores
    #[arg(long, env = "STEVEDORE_DB_PATH", default_value = "stevedore-db")]
    db_path: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let store_kind = match args.db.as_str() {
        "file" => StoreKind::File(args.db_path.clone()),
        _ => StoreKind::Memory,
    };

    let scheduler_kind = match args.scheduler.as_str() {
        "epvm" => SchedulerKind::Epvm,
        _ => SchedulerKind::RoundRobin,
    };

    info!(
        workers = args.workers,
        scheduler = ?scheduler_kind,
        db = %args.db,
        "starting stevedore"
    );

    let worker_addrs = init_workers(&args, &store_kind)?;
    init_manager(&args, worker_addrs, scheduler_kind, &store_kind).await?;

    Ok(())
}

fn init_workers(args: &Args, store: &StoreKind) -> Result<Vec<String>, Box<dyn Error>> {
    let mut addrs = Vec::new();

    for i in 0..args.workers {
        let name = format!("worker-{i}");
        let port = args.worker_port + i;
        let worker = Arc::new(Mutex::new(Worker::new(&name, store)?));

        tokio::spawn(worker::run_tasks(worker.clone()));
        tokio::spawn(worker::update_tasks(worker.clone()));
        tokio::spawn(worker::collect_stats(worker.clone()));

        let server = TaskServer::new(worker, &args.worker_host, port);
        tokio::spawn(async move {
            if let Err(err) = server.start().await {
                error!(error = %err, "worker api exited");
            }
        });

        info!(%name, port, "worker started");
        addrs.push(format!("{}:{}", args.worker_host, port));
    }

    Ok(addrs)
}

async fn init_manager(
    args: &Args,
    workers: Vec<String>,
    scheduler: SchedulerKind,
    store: &StoreKind,
) -> Result<(), Box<dyn Error>> {
    let manager = Arc::new(Mutex::new(Manager::new(workers, scheduler, store)?));

    tokio::spawn(manager::process_tasks(manager.clone()));
    tokio::spawn(manager::update_tasks(manager.clone()));
    tokio::spawn(manager::do_health_checks(manager.clone()));

    let server = ManagerServer::new(manager, &args.manager_host, args.manager_port);
    server.start().await?;

    Ok(())
}
