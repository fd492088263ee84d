use multical2json::{channel_subscriber, output::Printer, Config, MeterDevice, MeterManager, MeterUpdate};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use std::{env, path::PathBuf, process::ExitCode, sync::Arc, time::Duration};
use log::{error, info};

const CHANNEL_SIZE: usize = 1024;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    let default_filter = std::env::var("M2J_LOG_LEVEL").unwrap_or("info".to_string());
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = match Config::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    /* Every committed reading of every meter ends up in this channel */
    let (update_tx, mut update_rx) = mpsc::channel::<MeterUpdate>(CHANNEL_SIZE);

    let mut devices = Vec::new();
    for meter in &config.meters {
        let device = match MeterDevice::from_config(meter) {
            Ok(d) => d,
            Err(e) => {
                error!("Meter {}: {e}", meter.name);
                return ExitCode::FAILURE;
            }
        };
        device.subscribe(channel_subscriber(update_tx.clone()));
        info!("Listening for {} {} ({})", meter.meter_type, device.id(), meter.name);
        devices.push(Arc::new(device));
    }
    /* Only the subscribers keep the printer alive */
    drop(update_tx);

    let (line_tx, line_rx) = mpsc::channel::<String>(CHANNEL_SIZE);
    let mut threads: Vec<JoinHandle<()>> = Vec::new();

    threads.push(tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line_tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Reading telegrams failed: {e}");
                    break;
                }
            }
        }
    }));

    let manager = MeterManager::new(devices, config.output.explain).with_telegram_log(config.logtelegrams);
    threads.push(tokio::spawn(async move {
        manager.start_thread(line_rx).await;
    }));

    let mut printer = Printer::new(config.output.clone(), config.shells.clone());
    if config.oneshot {
        printer = printer.oneshot(config.meters.iter().map(|m| m.name.clone()).collect());
    }
    let printing = async move {
        while let Some(update) = update_rx.recv().await {
            if printer.print(&update).await {
                info!("Every meter reported once, exiting");
                break;
            }
        }
    };

    if config.exitafter > 0 {
        if tokio::time::timeout(Duration::from_secs(config.exitafter), printing).await.is_err() {
            info!("Exiting after {} seconds", config.exitafter);
        }
    } else {
        printing.await;
    }

    /* Input may still be open after oneshot or exitafter */
    for task in threads {
        task.abort();
    }
    return ExitCode::SUCCESS;
}
