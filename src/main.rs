use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rfcore_rs::rfcore::hal::SimRadio;
use rfcore_rs::rfcore::mailbox::{CpeInterrupt, CMD_PROP_RADIO_DIV_SETUP, CMD_PROP_RADIO_SETUP};
use rfcore_rs::rfcore::types::CmdCallback;
use rfcore_rs::{
    init_logger, log_info, ClientId, CmdHandle, DriverConfig, EventMask, Priority, RadioOp, RadioSetup,
    RfDriver, RfError, RfHandle, RfMode, RfModeKind, RfParams, ScheduleParams, StartTrigger,
};

/// Proprietary TX command of the simulated PHYs
const CMD_PROP_TX: u16 = 0x3801;

#[derive(Parser)]
#[command(name = "rfcore-sim")]
#[command(about = "Drive the RF core scheduler against a simulated radio")]
struct Cli {
    /// Driver configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the schedule map as JSON while commands are queued
    #[arg(long)]
    dump_schedule: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Power up and run one command
    Basic,
    /// A high priority client preempts a running command of another client
    Preempt,
    /// Timed commands, one of which overlaps and is rejected
    Schedule,
    /// Random posts from two clients, checking per-client ordering
    Stress {
        #[arg(long, default_value = "200")]
        commands: usize,
        #[arg(long, default_value = "1")]
        seed: u64,
    },
}

fn open(driver: &RfDriver, kind: RfModeKind, setup: u16) -> Result<RfHandle, RfError> {
    driver.open(
        RfMode::new(kind),
        RadioSetup::new(RadioOp::new(setup)),
        RfParams {
            inactivity_timeout_us: Some(2_000),
            ..RfParams::default()
        },
    )
}

fn tagged(tag: &[u8]) -> Arc<RadioOp> {
    Arc::new(RadioOp::new(CMD_PROP_TX).with_payload(tag.to_vec()))
}

fn dump_schedule(driver: &RfDriver, enabled: bool) -> Result<()> {
    if enabled {
        let json = serde_json::to_string_pretty(&driver.schedule_map())?;
        println!("{json}");
    }
    Ok(())
}

async fn basic(driver: &RfDriver, dump: bool) -> Result<()> {
    let rf = open(driver, RfModeKind::ProprietarySub1G, CMD_PROP_RADIO_DIV_SETUP)?;
    let handle = rf.post_cmd(tagged(b"basic"), Priority::Normal, None, EventMask::TX_DONE)?;
    dump_schedule(driver, dump)?;
    let events = rf.pend_cmd(handle, EventMask::empty()).await?;
    log_info(&format!("Command {handle} finished with {events:?}"));
    println!("basic: {handle} -> {events:?}");
    rf.close().await?;
    Ok(())
}

async fn preempt(driver: &RfDriver, radio: &SimRadio, dump: bool) -> Result<()> {
    let low = open(driver, RfModeKind::ProprietarySub1G, CMD_PROP_RADIO_DIV_SETUP)?;
    let high = open(driver, RfModeKind::Proprietary2G4, CMD_PROP_RADIO_SETUP)?;
    radio.set_auto_complete(false);

    // the victim may retire before a pend could register, so listen on its callback
    let (retired_tx, mut retired_rx) = tokio::sync::mpsc::unbounded_channel();
    let on_retire: CmdCallback = Arc::new(move |_, handle, events| {
        let _ = retired_tx.send((handle, events));
    });
    let victim = low.post_cmd(
        tagged(b"low"),
        Priority::Normal,
        Some(on_retire),
        EventMask::empty(),
    )?;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let winner = high.post_cmd(tagged(b"high"), Priority::High, None, EventMask::empty())?;
    dump_schedule(driver, dump)?;

    let lost = loop {
        match tokio::time::timeout(driver.config().pend_timeout(), retired_rx.recv()).await {
            Ok(Some((handle, events))) if handle == victim => break events,
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => bail!("low priority command never retired"),
        }
    };
    println!("preempt: {victim} -> {lost:?}");

    for _ in 0..100 {
        if radio.complete_current(CpeInterrupt::empty()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let won = high.pend_cmd(winner, EventMask::empty()).await?;
    println!("preempt: {winner} -> {won:?}");
    if !lost.contains(EventMask::CMD_PREEMPTED) {
        bail!("low priority command was not preempted");
    }

    radio.set_auto_complete(true);
    high.close().await?;
    low.close().await?;
    Ok(())
}

async fn schedule(driver: &RfDriver, dump: bool) -> Result<()> {
    let rf = open(driver, RfModeKind::ProprietarySub1G, CMD_PROP_RADIO_DIV_SETUP)?;
    let now = driver.get_current_time();
    let mut handles = Vec::new();
    for (index, offset) in [40_000u32, 80_000].into_iter().enumerate() {
        let start = now.wrapping_add(offset);
        let op = Arc::new(
            RadioOp::new(CMD_PROP_TX)
                .with_payload(vec![index as u8])
                .with_trigger(StartTrigger::at(start)),
        );
        let params = ScheduleParams {
            end_time: Some(start.wrapping_add(8_000)),
            ..ScheduleParams::default()
        };
        handles.push(rf.schedule_cmd(op, params, None, EventMask::empty())?);
    }
    dump_schedule(driver, dump)?;

    let overlap = Arc::new(
        RadioOp::new(CMD_PROP_TX).with_trigger(StartTrigger::at(now.wrapping_add(44_000))),
    );
    let params = ScheduleParams {
        end_time: Some(now.wrapping_add(50_000)),
        ..ScheduleParams::default()
    };
    match rf.schedule_cmd(overlap, params, None, EventMask::empty()) {
        Err(RfError::ScheduleRejected) => println!("schedule: overlapping command rejected"),
        other => bail!("overlap was not rejected: {other:?}"),
    }

    for handle in handles {
        let events = rf.pend_cmd(handle, EventMask::empty()).await?;
        println!("schedule: {handle} -> {events:?}");
    }
    rf.close().await?;
    Ok(())
}

async fn stress(
    driver: &RfDriver,
    radio: &SimRadio,
    commands: usize,
    seed: u64,
) -> Result<()> {
    let clients = [
        open(driver, RfModeKind::ProprietarySub1G, CMD_PROP_RADIO_DIV_SETUP)?,
        open(driver, RfModeKind::Proprietary2G4, CMD_PROP_RADIO_SETUP)?,
    ];
    let mut rng = StdRng::seed_from_u64(seed);
    let retired: Arc<Mutex<HashMap<u8, Vec<u16>>>> = Arc::default();
    let mut outstanding: Vec<(usize, CmdHandle)> = Vec::new();

    for seq in 0..commands {
        let who = rng.gen_range(0..clients.len());
        let log = Arc::clone(&retired);
        let tag = who as u8;
        let callback: CmdCallback = Arc::new(move |_: ClientId, _: CmdHandle, events: EventMask| {
            if events.contains(EventMask::LAST_CMD_DONE) {
                log.lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .entry(tag)
                    .or_default()
                    .push(seq as u16);
            }
        });
        let op = Arc::new(
            RadioOp::new(CMD_PROP_TX)
                .with_payload(vec![tag, (seq & 0xFF) as u8, (seq >> 8) as u8]),
        );
        loop {
            let posted = clients[who].post_cmd(
                Arc::clone(&op),
                Priority::Normal,
                Some(Arc::clone(&callback)),
                EventMask::empty(),
            );
            match posted {
                Ok(handle) => {
                    outstanding.push((who, handle));
                    break;
                }
                Err(RfError::AllocationExhausted) if !outstanding.is_empty() => {
                    let (owner, oldest) = outstanding.remove(0);
                    clients[owner].pend_cmd(oldest, EventMask::empty()).await?;
                }
                Err(e) => return Err(e).context("post failed"),
            }
        }
    }
    for (owner, handle) in outstanding {
        clients[owner].pend_cmd(handle, EventMask::empty()).await?;
    }

    let mut per_client: HashMap<u8, Vec<u16>> = HashMap::new();
    for payload in radio.dispatched_payloads() {
        if payload.len() == 3 {
            let seq = u16::from_le_bytes([payload[1], payload[2]]);
            per_client.entry(payload[0]).or_default().push(seq);
        }
    }
    for (client, order) in &per_client {
        if order.windows(2).any(|w| w[0] >= w[1]) {
            bail!("client {client} dispatched out of order: {order:?}");
        }
    }
    let retired = retired.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let total: usize = retired.values().map(Vec::len).sum();
    println!("stress: {commands} posted, {total} retired, per-client order preserved");
    if total != commands {
        bail!("{} commands never retired", commands - total);
    }

    let [first, second] = clients;
    first.close().await?;
    second.close().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => DriverConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DriverConfig::default(),
    };
    let (driver, radio, _power) = RfDriver::simulated_realtime(config);
    let service = driver.spawn_service();

    let outcome = match cli.command {
        Commands::Basic => basic(&driver, cli.dump_schedule).await,
        Commands::Preempt => preempt(&driver, &radio, cli.dump_schedule).await,
        Commands::Schedule => schedule(&driver, cli.dump_schedule).await,
        Commands::Stress { commands, seed } => stress(&driver, &radio, commands, seed).await,
    };

    service.stop().await;
    log_info(&format!("FSM trace: {:?}", driver.fsm_trace()));
    outcome
}
