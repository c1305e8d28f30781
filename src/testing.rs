//! Simulated transceivers sharing one medium
//!
//! Every node has its own clock, offset from the medium's global clock.
//! Frames take a fixed time of flight to reach all other nodes. Events are
//! queued on the medium and handed to the nodes' event handlers by [`pump`],
//! in the order they happen.

use core::convert::Infallible;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::Duration as StdDuration,
    vec::Vec,
};

use ieee802154::mac::{PanId, ShortAddress};

use crate::{
    driver::{EventHandler, Transceiver, TxStart},
    schedule::{ANTENNA_DELAY_SHIFT, DELAYED_TX_MASK},
    time::{Duration, Instant},
};


pub const NODE_A: u16 = 0x1001;
pub const NODE_B: u16 = 0x1002;
pub const PAN_ID: u16 = 0xdeca;
pub const ANTENNA_DELAY: u64 = 16436;
pub const CLOCK_OFFSET_B: u64 = 300;

const START_TIME: u64 = 1_000_000;
const TIME_OF_FLIGHT: u64 = 1000;
const PROCESSING_TIME: u64 = 2000;
const RX_TIMEOUT_UNIT: u64 = 512;


#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Loss {
    /// Every frame arrives
    None,
    /// No frame arrives, receivers time out
    Lossy,
    /// No frame arrives, and no timeout fires
    Silent,
    /// The first `n` frames on the medium arrive, later ones are lost as
    /// with `Lossy`
    After(usize),
}

#[derive(Clone, Debug)]
pub struct Transmission {
    pub frame: Vec<u8>,
    pub delayed: Option<Instant>,
    pub rx_timeout: Option<u16>,
}

pub struct Air {
    state: Mutex<State>,
}

struct State {
    now: u64,
    loss: Loss,
    nodes: Vec<Node>,
    events: Vec<Event>,
    next_id: u64,
}

struct Node {
    address: u16,
    clock_offset: u64,
    reception: Option<Reception>,
    transmissions: Vec<Transmission>,
}

struct Reception {
    frame: Vec<u8>,
    time: u64,
}

struct Event {
    time: u64,
    id: u64,
    node: usize,
    kind: EventKind,
}

enum EventKind {
    TxDone,
    Rx(Vec<u8>),
    RxTimeout,
}

enum Interrupt {
    TxDone,
    Rx,
    RxTimeout,
}

impl Air {
    pub fn new() -> Arc<Self> {
        Arc::new(Air {
            state: Mutex::new(State {
                now: START_TIME,
                loss: Loss::None,
                nodes: Vec::new(),
                events: Vec::new(),
                next_id: 0,
            }),
        })
    }

    pub fn set_loss(&self, loss: Loss) {
        self.state().loss = loss;
    }

    pub fn transmissions(&self, address: u16) -> usize {
        let state = self.state();
        state.node(address).transmissions.len()
    }

    pub fn last_transmission(&self, address: u16) -> Option<Transmission> {
        let state = self.state();
        state.node(address).transmissions.last().cloned()
    }

    /// Places `frame` in the receive buffer of `address`, received at
    /// `local_time` on that node's clock
    pub fn inject(&self, address: u16, frame: &[u8], local_time: u64) {
        let mut state = self.state();
        let index = state.index(address);
        let now = local_time.saturating_sub(state.nodes[index].clock_offset);

        state.now = state.now.max(now);
        state.nodes[index].reception = Some(Reception {
            frame: frame.to_vec(),
            time: local_time,
        });
    }

    fn register(&self, address: u16, clock_offset: u64) -> usize {
        let mut state = self.state();
        state.nodes.push(Node {
            address,
            clock_offset,
            reception: None,
            transmissions: Vec::new(),
        });
        state.nodes.len() - 1
    }

    /// Returns the local transmission time, or `None` if a delayed start
    /// time has already passed
    fn transmit(&self, node: usize, transmission: Transmission) -> Option<u64> {
        let mut state = self.state();
        let offset = state.nodes[node].clock_offset;
        let local_now = state.now + offset;

        let tx_local = match transmission.delayed {
            Some(time) => {
                let start = time.value() & DELAYED_TX_MASK;
                if start <= local_now {
                    return None;
                }
                start + (ANTENNA_DELAY << ANTENNA_DELAY_SHIFT)
            }
            None => local_now + PROCESSING_TIME + (ANTENNA_DELAY << ANTENNA_DELAY_SHIFT),
        };
        let tx_global = tx_local - offset;

        state.push(tx_global, node, EventKind::TxDone);
        let sent: usize = state.nodes.iter().map(|node| node.transmissions.len()).sum();
        let loss = match state.loss {
            Loss::After(n) if sent < n => Loss::None,
            Loss::After(_) => Loss::Lossy,
            loss => loss,
        };
        match loss {
            Loss::None => {
                for other in 0..state.nodes.len() {
                    if other != node {
                        let frame = transmission.frame.clone();
                        state.push(tx_global + TIME_OF_FLIGHT, other, EventKind::Rx(frame));
                    }
                }
            }
            Loss::Lossy => {
                if let Some(period) = transmission.rx_timeout {
                    let timeout = tx_global + u64::from(period) * RX_TIMEOUT_UNIT;
                    state.push(timeout, node, EventKind::RxTimeout);
                }
            }
            Loss::Silent | Loss::After(_) => {}
        }

        state.nodes[node].transmissions.push(transmission);
        Some(tx_local)
    }

    fn with_reception<U>(&self, node: usize, f: impl FnOnce(&Reception) -> U) -> Option<U> {
        self.state().nodes[node].reception.as_ref().map(f)
    }

    fn pop(&self) -> Option<(usize, Interrupt)> {
        let mut state = self.state();

        let next = state
            .events
            .iter()
            .enumerate()
            .min_by_key(|(_, event)| (event.time, event.id))
            .map(|(i, _)| i)?;
        let event = state.events.remove(next);
        state.now = state.now.max(event.time);

        let interrupt = match event.kind {
            EventKind::TxDone => Interrupt::TxDone,
            EventKind::RxTimeout => Interrupt::RxTimeout,
            EventKind::Rx(frame) => {
                let node = &mut state.nodes[event.node];
                node.reception = Some(Reception {
                    frame,
                    time: event.time + node.clock_offset,
                });
                Interrupt::Rx
            }
        };

        Some((event.node, interrupt))
    }

    fn state(&self) -> MutexGuard<State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl State {
    fn push(&mut self, time: u64, node: usize, kind: EventKind) {
        let id = self.next_id;
        self.next_id += 1;
        self.events.push(Event {
            time,
            id,
            node,
            kind,
        });
    }

    fn index(&self, address: u16) -> usize {
        self.nodes
            .iter()
            .position(|node| node.address == address)
            .unwrap()
    }

    fn node(&self, address: u16) -> &Node {
        &self.nodes[self.index(address)]
    }
}


/// Hands queued events to the nodes' event handlers
///
/// `handlers` must be in the order the nodes' radios were created. Returns
/// once `done` is set and no events are left.
pub fn pump(air: &Air, handlers: &[&(dyn EventHandler + Sync)], done: &AtomicBool) {
    loop {
        match air.pop() {
            Some((node, Interrupt::TxDone)) => handlers[node].on_tx_complete(),
            Some((node, Interrupt::Rx)) => handlers[node].on_rx_complete(),
            Some((node, Interrupt::RxTimeout)) => handlers[node].on_rx_timeout(),
            None if done.load(Ordering::SeqCst) => break,
            None => thread::sleep(StdDuration::from_millis(1)),
        }
    }
}

/// Runs `f` while pumping events on another thread
pub fn run<T>(air: &Air, handlers: &[&(dyn EventHandler + Sync)], f: impl FnOnce() -> T) -> T {
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        let pump = scope.spawn(|| pump(air, handlers, &done));
        let result = f();
        done.store(true, Ordering::SeqCst);
        pump.join().unwrap();
        result
    })
}


pub struct SimRadio {
    air: Arc<Air>,
    node: usize,
    pub address: u16,
    pub reject_tx: bool,
    tx_buffer: [u8; 128],
    tx_len: usize,
    wait_for_response: bool,
    rx_timeout: u16,
    delay_start: Option<Instant>,
    last_tx_time: u64,
}

impl SimRadio {
    pub fn new(air: &Arc<Air>, address: u16, clock_offset: u64) -> Self {
        SimRadio {
            air: air.clone(),
            node: air.register(address, clock_offset),
            address,
            reject_tx: false,
            tx_buffer: [0; 128],
            tx_len: 0,
            wait_for_response: false,
            rx_timeout: 0,
            delay_start: None,
            last_tx_time: 0,
        }
    }

    fn rx_time(&self) -> u64 {
        self.air.with_reception(self.node, |rx| rx.time).unwrap_or(0)
    }
}

impl Transceiver for SimRadio {
    type Error = Infallible;

    fn address(&mut self) -> Result<(PanId, ShortAddress), Self::Error> {
        Ok((PanId(PAN_ID), ShortAddress(self.address)))
    }

    fn tx_antenna_delay(&mut self) -> Result<Duration, Self::Error> {
        Ok(Duration::wrapping(ANTENNA_DELAY))
    }

    fn rx_frame_control(&mut self) -> Result<u16, Self::Error> {
        let frame_control = self.air.with_reception(self.node, |rx| match rx.frame.get(..2) {
            Some(bytes) => u16::from_le_bytes([bytes[0], bytes[1]]),
            None => 0,
        });
        Ok(frame_control.unwrap_or(0))
    }

    fn rx_frame_len(&mut self) -> Result<usize, Self::Error> {
        Ok(self.air.with_reception(self.node, |rx| rx.frame.len()).unwrap_or(0))
    }

    fn read_rx(&mut self, offset: usize, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.air.with_reception(self.node, |rx| {
            let available = rx.frame.get(offset..).unwrap_or(&[]);
            let len = available.len().min(buffer.len());
            buffer[..len].copy_from_slice(&available[..len]);
        });
        Ok(())
    }

    fn write_tx(&mut self, offset: usize, data: &[u8]) -> Result<(), Self::Error> {
        self.tx_buffer[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn write_tx_fctrl(&mut self, len: usize, _: usize, _: bool) -> Result<(), Self::Error> {
        self.tx_len = len;
        Ok(())
    }

    fn set_wait_for_response(&mut self, enabled: bool) -> Result<(), Self::Error> {
        self.wait_for_response = enabled;
        Ok(())
    }

    fn set_rx_timeout(&mut self, period: u16) -> Result<(), Self::Error> {
        self.rx_timeout = period;
        Ok(())
    }

    fn set_delay_start(&mut self, time: Instant) -> Result<(), Self::Error> {
        self.delay_start = Some(time);
        Ok(())
    }

    fn start_tx(&mut self) -> Result<TxStart, Self::Error> {
        let delayed = self.delay_start.take();
        if self.reject_tx {
            return Ok(TxStart::Rejected);
        }

        let transmission = Transmission {
            frame: self.tx_buffer[..self.tx_len].to_vec(),
            delayed,
            rx_timeout: if self.wait_for_response {
                Some(self.rx_timeout)
            } else {
                None
            },
        };

        match self.air.transmit(self.node, transmission) {
            Some(time) => {
                self.last_tx_time = time;
                Ok(TxStart::Started)
            }
            None => Ok(TxStart::Rejected),
        }
    }

    fn read_rx_time(&mut self) -> Result<Instant, Self::Error> {
        Ok(Instant::wrapping(self.rx_time()))
    }

    fn read_tx_time_lo(&mut self) -> Result<u32, Self::Error> {
        Ok(self.last_tx_time as u32)
    }

    fn read_rx_time_lo(&mut self) -> Result<u32, Self::Error> {
        Ok(self.rx_time() as u32)
    }
}
