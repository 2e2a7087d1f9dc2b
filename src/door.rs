//! Door open/close events.
//!
//! `DoorSensor` turns raw open/closed levels into debounced transitions and
//! calls the registered callbacks with the transition time in epoch
//! milliseconds. `SysfsGpioDoor` reads the level of a reed switch exported
//! through sysfs.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::now_ms;

pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

pub type DoorCallback = Box<dyn FnMut(u64)>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DoorEvent {
    Opened,
    Closed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DoorStats {
    pub opens: u64,
    pub closes: u64,
    pub last_event_at_ms: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoorConfig {
    /// sysfs value file of the door GPIO. When unset the door is driven from stdin.
    pub gpio_value_path: Option<PathBuf>,
    pub debounce_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for DoorConfig {
    fn default() -> Self {
        Self {
            gpio_value_path: None,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            poll_interval_ms: 50,
        }
    }
}

pub struct DoorSensor {
    debounce_ms: u64,
    is_open: bool,
    last_event_at_ms: Option<u64>,
    open_callbacks: Vec<DoorCallback>,
    close_callbacks: Vec<DoorCallback>,
    stats: DoorStats,
}

impl Default for DoorSensor {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_MS)
    }
}

impl DoorSensor {
    /// The door starts closed.
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            debounce_ms,
            is_open: false,
            last_event_at_ms: None,
            open_callbacks: Vec::new(),
            close_callbacks: Vec::new(),
            stats: DoorStats::default(),
        }
    }

    pub fn register_open_callback(&mut self, callback: impl FnMut(u64) + 'static) {
        self.open_callbacks.push(Box::new(callback));
    }

    pub fn register_close_callback(&mut self, callback: impl FnMut(u64) + 'static) {
        self.close_callbacks.push(Box::new(callback));
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn stats(&self) -> DoorStats {
        self.stats
    }

    /// Feed one raw level reading.
    ///
    /// A level equal to the current state is ignored. A change less than the
    /// debounce interval after the previous transition is treated as bounce
    /// and ignored.
    pub fn observe_level(&mut self, is_open: bool, now_ms: u64) -> Option<DoorEvent> {
        if is_open == self.is_open {
            return None;
        }
        if let Some(last) = self.last_event_at_ms {
            if now_ms.saturating_sub(last) < self.debounce_ms {
                log::debug!(
                    "door bounce ignored ({} ms after last transition)",
                    now_ms.saturating_sub(last)
                );
                return None;
            }
        }
        Some(self.transition(is_open, now_ms))
    }

    /// Open the door without debounce. No-op when already open.
    pub fn simulate_open(&mut self) -> Option<DoorEvent> {
        if self.is_open {
            return None;
        }
        Some(self.transition(true, now_ms()))
    }

    /// Close the door without debounce. No-op when already closed.
    pub fn simulate_close(&mut self) -> Option<DoorEvent> {
        if !self.is_open {
            return None;
        }
        Some(self.transition(false, now_ms()))
    }

    fn transition(&mut self, is_open: bool, at_ms: u64) -> DoorEvent {
        self.is_open = is_open;
        self.last_event_at_ms = Some(at_ms);
        self.stats.last_event_at_ms = Some(at_ms);
        let (event, callbacks) = if is_open {
            self.stats.opens += 1;
            (DoorEvent::Opened, &mut self.open_callbacks)
        } else {
            self.stats.closes += 1;
            (DoorEvent::Closed, &mut self.close_callbacks)
        };
        log::info!("door {:?} at {}", event, at_ms);
        for callback in callbacks.iter_mut() {
            callback(at_ms);
        }
        event
    }
}

/// Reed switch on a sysfs-exported GPIO. LOW means open.
#[derive(Clone, Debug)]
pub struct SysfsGpioDoor {
    value_path: PathBuf,
}

impl SysfsGpioDoor {
    pub fn new(pin: u32) -> Self {
        Self::with_path(format!("/sys/class/gpio/gpio{}/value", pin))
    }

    pub fn with_path(value_path: impl Into<PathBuf>) -> Self {
        Self {
            value_path: value_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.value_path
    }

    pub fn read_is_open(&self) -> Result<bool> {
        let raw = std::fs::read_to_string(&self.value_path)
            .with_context(|| format!("read door gpio {}", self.value_path.display()))?;
        match raw.trim() {
            "0" => Ok(true),
            "1" => Ok(false),
            other => Err(anyhow!(
                "unexpected gpio value {:?} in {}",
                other,
                self.value_path.display()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn callbacks_fire_with_timestamp() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut door = DoorSensor::new(500);
        let opens = Rc::clone(&seen);
        door.register_open_callback(move |ts| opens.borrow_mut().push(("open", ts)));
        let closes = Rc::clone(&seen);
        door.register_close_callback(move |ts| closes.borrow_mut().push(("close", ts)));

        assert_eq!(door.observe_level(true, 1_000), Some(DoorEvent::Opened));
        assert!(door.is_open());
        assert_eq!(door.observe_level(false, 2_000), Some(DoorEvent::Closed));
        assert_eq!(*seen.borrow(), vec![("open", 1_000), ("close", 2_000)]);
        assert_eq!(door.stats().opens, 1);
        assert_eq!(door.stats().closes, 1);
    }

    #[test]
    fn bounce_is_ignored() {
        let mut door = DoorSensor::new(500);
        assert_eq!(door.observe_level(true, 1_000), Some(DoorEvent::Opened));
        assert_eq!(door.observe_level(false, 1_100), None);
        assert!(door.is_open());
        assert_eq!(door.observe_level(true, 1_200), None);
        assert_eq!(door.observe_level(false, 1_500), Some(DoorEvent::Closed));
    }

    #[test]
    fn simulate_is_idempotent() {
        let mut door = DoorSensor::default();
        assert_eq!(door.simulate_close(), None);
        assert_eq!(door.simulate_open(), Some(DoorEvent::Opened));
        assert_eq!(door.simulate_open(), None);
        assert_eq!(door.simulate_close(), Some(DoorEvent::Closed));
    }

    #[test]
    fn sysfs_level_low_is_open() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("value");
        let gpio = SysfsGpioDoor::with_path(&path);

        std::fs::write(&path, "0\n")?;
        assert!(gpio.read_is_open()?);
        std::fs::write(&path, "1\n")?;
        assert!(!gpio.read_is_open()?);
        std::fs::write(&path, "x")?;
        assert!(gpio.read_is_open().is_err());
        Ok(())
    }
}
