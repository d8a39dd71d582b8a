mod config;
use config::MonitorConfig;
use linewatch_core::format::{
    f_delta, f_duration, f_duration_simple, f_number, f_percent, f_relative_time,
};
use linewatch_core::machine::{MetricsCallback, RuntimeBlockCallback};
use linewatch_core::telemetry::{init_tracing, DEFAULT_FILTER};
use linewatch_core::{MachineHubClient, OeeUpdate, RuntimeBlock};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(&format!("{},monitor=info", DEFAULT_FILTER));

    // Defaults + env + optional TOML overlay
    let cfg = MonitorConfig::load();
    if cfg.machines.is_empty() {
        warn!(target = "monitor", "No machines configured; set LINEWATCH_MACHINES or `machines` in linewatch.toml");
    }

    let client = MachineHubClient::new(&cfg.hub)?;

    // Report connection state transitions
    let mut state_rx = client.watch_state();
    let state_task = tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow_and_update();
            info!(target = "monitor", state = %state, "Hub connection state");
        }
    });

    client.start().await;

    for machine in &cfg.machines {
        let on_runtime_block = cfg.show_runtime_blocks.then(block_printer);
        client
            .subscribe(machine, metrics_printer(machine), on_runtime_block)
            .await;

        if cfg.query_on_start {
            match client.get_aggregation(machine).await {
                Some(update) => print_update(machine, &update),
                None => println!("[{}] no aggregation yet", machine),
            }
            let blocks = client.get_runtime_blocks(machine).await;
            if let Some(last) = blocks.iter().max_by_key(|b| b.start_time) {
                print_block(last);
            }
            println!(
                "[{}] {} watching",
                machine,
                client.get_subscriber_count(machine).await
            );
        }
    }

    info!(target = "monitor", machines = cfg.machines.len(), "Monitor running; press Ctrl+C to exit");
    signal::ctrl_c().await?;

    info!(target = "monitor", "Shutting down");
    for machine in &cfg.machines {
        client.unsubscribe(machine).await;
    }
    client.stop().await;
    state_task.abort();

    Ok(())
}

fn metrics_printer(machine: &str) -> MetricsCallback {
    let machine = machine.to_string();
    Arc::new(move |update: OeeUpdate| print_update(&machine, &update))
}

fn block_printer() -> RuntimeBlockCallback {
    Arc::new(|block: RuntimeBlock| print_block(&block))
}

fn print_update(machine: &str, update: &OeeUpdate) {
    println!(
        "[{}] OEE {} ({})  A {}  P {}  Q {}  good {}/{}  run {} ({})  down {}  product {}",
        machine,
        f_percent(update.oee),
        f_delta(update.oee_delta),
        f_percent(update.availability),
        f_percent(update.performance),
        f_percent(update.quality),
        f_number(update.good_count),
        f_number(update.total_count),
        f_duration(update.run_time.as_deref()),
        f_duration_simple(update.run_time.as_deref()),
        f_duration_simple(update.downtime.as_deref()),
        update.current_product.as_deref().unwrap_or("-"),
    );
}

fn print_block(block: &RuntimeBlock) {
    println!(
        "[{}] {:?} since {}{}",
        block.machine_id.as_deref().unwrap_or("?"),
        block.state,
        f_relative_time(block.start_time),
        block
            .stop_reason_name
            .as_deref()
            .map(|reason| format!(" ({})", reason))
            .unwrap_or_default(),
    );
}
