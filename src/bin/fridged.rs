//! fridged - fridge door-cycle daemon
//!
//! This daemon:
//! 1. Loads configuration (`FRIDGE_CONFIG` file plus `FRIDGE_*` overrides)
//! 2. Builds the controller: cameras, comparator, detector, faces, inventory
//! 3. Drives door cycles from a sysfs GPIO reed switch, or from stdin commands
//!    when no GPIO is configured
//! 4. Prints one JSON cycle report per door close on stdout

use anyhow::Result;
use serde_json::Map;
use std::cell::RefCell;
use std::io::BufRead;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use fridge_kernel::door::SysfsGpioDoor;
use fridge_kernel::{now_ms, now_s, DoorSensor, FridgeConfig, FridgeController};

const HELP: &str = "commands: open | close | cycle | who | enroll <name> | status | inventory | waste | quit";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = FridgeConfig::load()?;
    let controller = Rc::new(RefCell::new(FridgeController::from_config(&cfg)?));
    log::info!(
        "fridged running: {} camera(s), inventory in {}",
        cfg.cameras.len(),
        cfg.inventory.db_path
    );

    let mut door = DoorSensor::new(cfg.door.debounce_ms);
    {
        let ctl = Rc::clone(&controller);
        let identify = cfg.face_zone.is_some();
        door.register_open_callback(move |ts| {
            let mut ctl = ctl.borrow_mut();
            if identify {
                ctl.detect_user();
            }
            ctl.on_door_open(ts);
        });
        let ctl = Rc::clone(&controller);
        door.register_close_callback(move |ts| {
            let report = ctl.borrow_mut().on_door_close(ts);
            print_json(&report);
        });
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))?;
    }

    let result = match &cfg.door.gpio_value_path {
        Some(path) => run_gpio(
            &mut door,
            path,
            Duration::from_millis(cfg.door.poll_interval_ms.max(1)),
            &running,
        ),
        None => run_stdin(&mut door, &controller, &running),
    };

    controller.borrow().shutdown();
    log::info!("fridged stopped");
    result
}

fn run_gpio(
    door: &mut DoorSensor,
    path: &Path,
    poll_interval: Duration,
    running: &AtomicBool,
) -> Result<()> {
    let gpio = SysfsGpioDoor::with_path(path);
    log::info!("watching door on {}", gpio.path().display());
    let mut read_failures = 0u64;
    while running.load(Ordering::SeqCst) {
        match gpio.read_is_open() {
            Ok(is_open) => {
                read_failures = 0;
                door.observe_level(is_open, now_ms());
            }
            Err(e) => {
                read_failures += 1;
                // one line per burst of failures
                if read_failures == 1 {
                    log::warn!("door sensor read failed: {:#}", e);
                }
            }
        }
        std::thread::sleep(poll_interval);
    }
    Ok(())
}

fn run_stdin(
    door: &mut DoorSensor,
    controller: &Rc<RefCell<FridgeController>>,
    running: &AtomicBool,
) -> Result<()> {
    let (tx, rx) = mpsc::channel::<String>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    log::info!("no door gpio configured; reading commands from stdin");
    eprintln!("{}", HELP);

    while running.load(Ordering::SeqCst) {
        let line = match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let mut parts = line.trim().splitn(2, char::is_whitespace);
        let command = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).unwrap_or_default();
        match command {
            "" => {}
            "open" => {
                door.simulate_open();
            }
            "close" => {
                door.simulate_close();
            }
            "cycle" => {
                door.simulate_open();
                door.simulate_close();
            }
            "who" => {
                let found = controller.borrow_mut().detect_user();
                print_json(&found);
            }
            "enroll" if !arg.is_empty() => {
                match controller.borrow_mut().enroll_user(arg, Map::new()) {
                    Ok(profile) => {
                        log::info!("enrolled {} as user {}", profile.display_name, profile.user_id)
                    }
                    Err(e) => log::error!("enrollment failed: {:#}", e),
                }
            }
            "status" => {
                let status = controller.borrow_mut().status();
                print_json(&status);
            }
            "inventory" => {
                let mut ctl = controller.borrow_mut();
                let user_id = ctl.current_user_id();
                let records = ctl.inventory_mut().get_inventory(user_id);
                print_json(&records);
            }
            "waste" => {
                let mut ctl = controller.borrow_mut();
                let user_id = ctl.current_user_id();
                let report = ctl.inventory_mut().waste_report(user_id, now_s());
                print_json(&report);
            }
            "quit" | "exit" => break,
            _ => eprintln!("{}", HELP),
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{}", json),
        Err(e) => log::error!("failed to serialise output: {}", e),
    }
}
